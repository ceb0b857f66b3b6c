//! Binary wire codec (§4.A).
//!
//! Frame shape: `varint(length) ⧺ kind-byte ⧺ body`, where `length` is the
//! byte length of everything after the varint (kind-byte plus body).
//! `body` layout is fixed per kind and always starts with the shared
//! envelope fields (`id`, `encrypted`, `document`) followed by a
//! kind-specific sub-payload, length-prefixed so trailing bytes are never
//! ambiguous. Encoding is deterministic: two equal messages always produce
//! identical bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, TlResult};
use crate::message::{AckPayload, AwarenessPayload, DocPayload, Message, MessageId, MessageKind, Payload};

/// Encodes a full frame (length prefix included) for `msg`.
pub fn encode(msg: &Message) -> Bytes {
	let mut body = BytesMut::new();
	body.put_u8(msg.kind.to_byte());
	body.put_slice(&msg.id.to_bytes());
	body.put_u8(u8::from(msg.encrypted));
	put_blob(&mut body, msg.document.as_bytes());
	encode_payload(&mut body, &msg.payload);

	let mut frame = BytesMut::new();
	put_varint(&mut frame, body.len() as u64);
	frame.put_slice(&body);
	frame.freeze()
}

fn encode_payload(out: &mut BytesMut, payload: &Payload) {
	match payload {
		Payload::Doc(doc) => {
			out.put_u8(doc.subkind_byte());
			match doc {
				DocPayload::SyncStep1 { state_vector } => put_blob(out, state_vector),
				DocPayload::SyncStep2 { update } | DocPayload::Update { update } => put_blob(out, update),
				DocPayload::SyncDone => {}
				DocPayload::AuthRequest { token } => put_blob(out, token),
				DocPayload::AuthFail { reason } => put_blob(out, reason.as_bytes()),
			}
		}
		Payload::Awareness(AwarenessPayload { update }) => put_blob(out, update),
		Payload::Ack(AckPayload { message_id }) => out.put_slice(&message_id.to_bytes()),
		Payload::Auth { token } => put_blob(out, token),
		Payload::FileRpc { body } | Payload::MilestoneRpc { body } => put_blob(out, body),
	}
}

/// Decodes a single frame from the front of `buf`. Returns the message and
/// the number of bytes consumed so the caller can advance a streaming
/// buffer. Rejects frames whose declared length doesn't match the bytes
/// actually consumed while parsing the body, whose kind byte is unknown,
/// whose document id is non-UTF8, or whose body (or any sub-blob) exceeds
/// `max_message_size`.
pub fn decode(buf: &[u8], max_message_size: usize) -> TlResult<(Message, usize)> {
	let mut cursor = buf;
	let start_len = buf.len();
	let declared_len = get_varint(&mut cursor)
		.ok_or_else(|| Error::MalformedFrame("truncated length prefix".to_string()))?;
	let declared_len = declared_len as usize;

	if declared_len > max_message_size {
		return Err(Error::SizeExceeded);
	}
	if cursor.len() < declared_len {
		return Err(Error::MalformedFrame("truncated frame body".to_string()));
	}

	let body = &cursor[..declared_len];
	let mut body_cursor = body;

	let kind_byte = get_u8(&mut body_cursor)
		.ok_or_else(|| Error::MalformedFrame("missing kind byte".to_string()))?;
	let kind = MessageKind::from_byte(kind_byte)
		.ok_or_else(|| Error::MalformedFrame(format!("unknown kind byte {kind_byte}")))?;

	let id_bytes = get_fixed::<16>(&mut body_cursor)
		.ok_or_else(|| Error::MalformedFrame("truncated message id".to_string()))?;
	let id = MessageId::from_bytes(&id_bytes);

	let encrypted_byte =
		get_u8(&mut body_cursor).ok_or_else(|| Error::MalformedFrame("missing encrypted flag".to_string()))?;
	let encrypted = encrypted_byte != 0;

	let doc_bytes = get_blob(&mut body_cursor, max_message_size)
		.ok_or_else(|| Error::MalformedFrame("truncated document id".to_string()))?;
	let document = String::from_utf8(doc_bytes.to_vec())
		.map_err(|_| Error::MalformedFrame("document id is not valid UTF-8".to_string()))?;

	let payload = decode_payload(kind, &mut body_cursor, max_message_size)?;

	if !body_cursor.is_empty() {
		return Err(Error::MalformedFrame("trailing bytes after payload".to_string()));
	}

	let consumed = start_len - cursor.len() + declared_len;
	let mut message = Message::new(id, document, encrypted, payload);
	message.kind = kind;
	Ok((message, consumed))
}

fn decode_payload(kind: MessageKind, cursor: &mut &[u8], max_message_size: usize) -> TlResult<Payload> {
	match kind {
		MessageKind::Doc => {
			let subkind = get_u8(cursor).ok_or_else(|| Error::MalformedFrame("missing doc subkind".to_string()))?;
			let doc = match subkind {
				0 => DocPayload::SyncStep1 {
					state_vector: get_blob(cursor, max_message_size)
						.ok_or_else(|| Error::MalformedFrame("truncated state vector".to_string()))?,
				},
				1 => DocPayload::SyncStep2 {
					update: get_blob(cursor, max_message_size)
						.ok_or_else(|| Error::MalformedFrame("truncated update".to_string()))?,
				},
				2 => DocPayload::Update {
					update: get_blob(cursor, max_message_size)
						.ok_or_else(|| Error::MalformedFrame("truncated update".to_string()))?,
				},
				3 => DocPayload::SyncDone,
				4 => DocPayload::AuthRequest {
					token: get_blob(cursor, max_message_size)
						.ok_or_else(|| Error::MalformedFrame("truncated auth token".to_string()))?,
				},
				5 => {
					let reason = get_blob(cursor, max_message_size)
						.ok_or_else(|| Error::MalformedFrame("truncated auth-fail reason".to_string()))?;
					DocPayload::AuthFail {
						reason: String::from_utf8(reason.to_vec())
							.map_err(|_| Error::MalformedFrame("auth-fail reason is not valid UTF-8".to_string()))?,
					}
				}
				other => return Err(Error::MalformedFrame(format!("unknown doc subkind {other}"))),
			};
			Ok(Payload::Doc(doc))
		}
		MessageKind::Awareness => {
			let update = get_blob(cursor, max_message_size)
				.ok_or_else(|| Error::MalformedFrame("truncated awareness update".to_string()))?;
			Ok(Payload::Awareness(AwarenessPayload { update }))
		}
		MessageKind::Ack => {
			let id_bytes = get_fixed::<16>(cursor)
				.ok_or_else(|| Error::MalformedFrame("truncated ack message id".to_string()))?;
			Ok(Payload::Ack(AckPayload { message_id: MessageId::from_bytes(&id_bytes) }))
		}
		MessageKind::Auth => {
			let token = get_blob(cursor, max_message_size)
				.ok_or_else(|| Error::MalformedFrame("truncated auth token".to_string()))?;
			Ok(Payload::Auth { token })
		}
		MessageKind::FileRpc => {
			let body = get_blob(cursor, max_message_size)
				.ok_or_else(|| Error::MalformedFrame("truncated file-rpc body".to_string()))?;
			Ok(Payload::FileRpc { body })
		}
		MessageKind::MilestoneRpc => {
			let body = get_blob(cursor, max_message_size)
				.ok_or_else(|| Error::MalformedFrame("truncated milestone-rpc body".to_string()))?;
			Ok(Payload::MilestoneRpc { body })
		}
	}
}

fn put_varint(out: &mut BytesMut, mut value: u64) {
	loop {
		let byte = (value & 0x7f) as u8;
		value >>= 7;
		if value == 0 {
			out.put_u8(byte);
			break;
		}
		out.put_u8(byte | 0x80);
	}
}

fn get_varint(cursor: &mut &[u8]) -> Option<u64> {
	let mut result: u64 = 0;
	let mut shift = 0u32;
	loop {
		if cursor.is_empty() || shift >= 64 {
			return None;
		}
		let byte = cursor[0];
		cursor.advance(1);
		result |= u64::from(byte & 0x7f) << shift;
		if byte & 0x80 == 0 {
			return Some(result);
		}
		shift += 7;
	}
}

fn put_blob(out: &mut BytesMut, data: &[u8]) {
	put_varint(out, data.len() as u64);
	out.put_slice(data);
}

fn get_blob(cursor: &mut &[u8], max_message_size: usize) -> Option<Bytes> {
	let len = get_varint(cursor)? as usize;
	if len > max_message_size || cursor.len() < len {
		return None;
	}
	let data = Bytes::copy_from_slice(&cursor[..len]);
	cursor.advance(len);
	Some(data)
}

fn get_u8(cursor: &mut &[u8]) -> Option<u8> {
	if cursor.is_empty() {
		return None;
	}
	let b = cursor[0];
	cursor.advance(1);
	Some(b)
}

fn get_fixed<const N: usize>(cursor: &mut &[u8]) -> Option<[u8; N]> {
	if cursor.len() < N {
		return None;
	}
	let mut out = [0u8; N];
	out.copy_from_slice(&cursor[..N]);
	cursor.advance(N);
	Some(out)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::message::Message;

	const MAX: usize = 1 << 20;

	#[test]
	fn round_trips_update_message() {
		let msg = Message::doc(1, "doc-1", false, DocPayload::Update { update: Bytes::from_static(&[1, 2, 3]) });
		let frame = encode(&msg);
		let (decoded, consumed) = decode(&frame, MAX).expect("decodes");
		assert_eq!(consumed, frame.len());
		assert_eq!(decoded.id, msg.id);
		assert_eq!(decoded.document, msg.document);
		assert_eq!(decoded.encrypted, msg.encrypted);
		assert_eq!(decoded.payload, msg.payload);
	}

	#[test]
	fn round_trips_awareness_message() {
		let msg = Message::awareness(7, "doc-2", false, Bytes::from_static(&[9, 9]));
		let frame = encode(&msg);
		let (decoded, _) = decode(&frame, MAX).expect("decodes");
		assert_eq!(decoded.payload, msg.payload);
	}

	#[test]
	fn round_trips_ack_message() {
		let acked = MessageId::new(5);
		let msg = Message::ack(5, "doc-3", acked);
		let frame = encode(&msg);
		let (decoded, _) = decode(&frame, MAX).expect("decodes");
		match decoded.payload {
			Payload::Ack(AckPayload { message_id }) => assert_eq!(message_id, acked),
			other => panic!("unexpected payload: {other:?}"),
		}
	}

	#[test]
	fn encoding_is_deterministic() {
		let msg = Message::doc(1, "doc-1", true, DocPayload::SyncDone);
		assert_eq!(encode(&msg), encode(&msg));
	}

	#[test]
	fn rejects_unknown_kind_byte() {
		let msg = Message::doc(1, "doc-1", false, DocPayload::SyncDone);
		let mut frame = encode(&msg).to_vec();
		// kind byte sits right after the single-byte varint length prefix
		// for this short frame.
		let kind_index = frame.len() - body_len(&msg);
		frame[kind_index] = 0xFF;
		let err = decode(&frame, MAX).unwrap_err();
		assert_eq!(err.kind(), crate::error::ErrorKind::MalformedFrame);
	}

	#[test]
	fn rejects_oversized_frame() {
		let msg = Message::doc(1, "doc-1", false, DocPayload::Update { update: Bytes::from_static(&[0u8; 64]) });
		let frame = encode(&msg);
		let err = decode(&frame, 4).unwrap_err();
		assert_eq!(err.kind(), crate::error::ErrorKind::SizeExceeded);
	}

	#[test]
	fn rejects_non_utf8_document_id() {
		let mut body = BytesMut::new();
		body.put_u8(MessageKind::Doc.to_byte());
		body.put_slice(&[0u8; 16]);
		body.put_u8(0);
		put_blob(&mut body, &[0xFF, 0xFE]);
		body.put_u8(3); // SyncDone
		let mut frame = BytesMut::new();
		put_varint(&mut frame, body.len() as u64);
		frame.put_slice(&body);
		let err = decode(&frame, MAX).unwrap_err();
		assert_eq!(err.kind(), crate::error::ErrorKind::MalformedFrame);
	}

	fn body_len(msg: &Message) -> usize {
		encode(msg).len() - 1
	}
}

// vim: ts=4
