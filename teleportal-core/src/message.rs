//! The typed message envelope (§3, §4.B).
//!
//! A [`Message`] is the unit of exchange between client sessions, document
//! sessions, and the pub/sub substrate. `id` is assigned once at
//! construction and never recomputed; `encoded()` lazily caches the wire
//! form so that re-broadcasting an already-encoded message never re-runs
//! the codec.

use std::collections::HashMap;
use std::sync::OnceLock;

use bytes::Bytes;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::codec;

/// 128-bit identifier, unique within a node's lifetime by construction: a
/// random 64-bit component concatenated with the node's own 64-bit id. This
/// avoids a second randomness source beyond `rand`, which the rest of the
/// core already depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub u128);

impl MessageId {
	pub fn new(node_id: u64) -> Self {
		let mut rng = rand::rng();
		let entropy: u64 = rng.random();
		MessageId((u128::from(entropy) << 64) | u128::from(node_id))
	}

	pub fn from_raw(raw: u128) -> Self {
		MessageId(raw)
	}

	pub fn to_bytes(self) -> [u8; 16] {
		self.0.to_be_bytes()
	}

	pub fn from_bytes(bytes: &[u8; 16]) -> Self {
		MessageId(u128::from_be_bytes(*bytes))
	}
}

impl std::fmt::Display for MessageId {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{:032x}", self.0)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
	Doc,
	Awareness,
	Ack,
	Auth,
	FileRpc,
	MilestoneRpc,
}

impl MessageKind {
	pub(crate) fn to_byte(self) -> u8 {
		match self {
			MessageKind::Doc => 0,
			MessageKind::Awareness => 1,
			MessageKind::Ack => 2,
			MessageKind::Auth => 3,
			MessageKind::FileRpc => 4,
			MessageKind::MilestoneRpc => 5,
		}
	}

	pub(crate) fn from_byte(b: u8) -> Option<Self> {
		match b {
			0 => Some(MessageKind::Doc),
			1 => Some(MessageKind::Awareness),
			2 => Some(MessageKind::Ack),
			3 => Some(MessageKind::Auth),
			4 => Some(MessageKind::FileRpc),
			5 => Some(MessageKind::MilestoneRpc),
			_ => None,
		}
	}
}

/// Doc-scoped payload variants (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocPayload {
	SyncStep1 { state_vector: Bytes },
	SyncStep2 { update: Bytes },
	Update { update: Bytes },
	SyncDone,
	AuthRequest { token: Bytes },
	AuthFail { reason: String },
}

impl DocPayload {
	pub(crate) fn subkind_byte(&self) -> u8 {
		match self {
			DocPayload::SyncStep1 { .. } => 0,
			DocPayload::SyncStep2 { .. } => 1,
			DocPayload::Update { .. } => 2,
			DocPayload::SyncDone => 3,
			DocPayload::AuthRequest { .. } => 4,
			DocPayload::AuthFail { .. } => 5,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwarenessPayload {
	pub update: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckPayload {
	pub message_id: MessageId,
}

/// The kind-specific body of a [`Message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
	Doc(DocPayload),
	Awareness(AwarenessPayload),
	Ack(AckPayload),
	Auth { token: Bytes },
	FileRpc { body: Bytes },
	MilestoneRpc { body: Bytes },
}

#[derive(Debug, Clone)]
pub struct Message {
	pub id: MessageId,
	pub kind: MessageKind,
	/// Empty for non-document-scoped kinds.
	pub document: String,
	pub encrypted: bool,
	/// Opaque local-routing metadata; never serialized on the wire.
	pub context: HashMap<String, String>,
	pub payload: Payload,
	encoded: OnceLock<Bytes>,
}

impl PartialEq for Message {
	fn eq(&self, other: &Self) -> bool {
		self.id == other.id
	}
}
impl Eq for Message {}

impl Message {
	pub fn new(id: MessageId, document: impl Into<String>, encrypted: bool, payload: Payload) -> Self {
		let kind = match &payload {
			Payload::Doc(_) => MessageKind::Doc,
			Payload::Awareness(_) => MessageKind::Awareness,
			Payload::Ack(_) => MessageKind::Ack,
			Payload::Auth { .. } => MessageKind::Auth,
			Payload::FileRpc { .. } => MessageKind::FileRpc,
			Payload::MilestoneRpc { .. } => MessageKind::MilestoneRpc,
		};
		Message {
			id,
			kind,
			document: document.into(),
			encrypted,
			context: HashMap::new(),
			payload,
			encoded: OnceLock::new(),
		}
	}

	pub fn doc(node_id: u64, document: impl Into<String>, encrypted: bool, payload: DocPayload) -> Self {
		Message::new(MessageId::new(node_id), document, encrypted, Payload::Doc(payload))
	}

	pub fn awareness(node_id: u64, document: impl Into<String>, encrypted: bool, update: Bytes) -> Self {
		Message::new(
			MessageId::new(node_id),
			document,
			encrypted,
			Payload::Awareness(AwarenessPayload { update }),
		)
	}

	pub fn ack(node_id: u64, document: impl Into<String>, acked: MessageId) -> Self {
		Message::new(
			MessageId::new(node_id),
			document,
			false,
			Payload::Ack(AckPayload { message_id: acked }),
		)
	}

	pub fn file_rpc(node_id: u64, document: impl Into<String>, body: Bytes) -> Self {
		Message::new(MessageId::new(node_id), document, false, Payload::FileRpc { body })
	}

	pub fn milestone_rpc(node_id: u64, document: impl Into<String>, body: Bytes) -> Self {
		Message::new(MessageId::new(node_id), document, false, Payload::MilestoneRpc { body })
	}

	/// Lazily encodes and caches the wire form of this message.
	pub fn encoded(&self) -> Bytes {
		self.encoded.get_or_init(|| codec::encode(self)).clone()
	}
}

// vim: ts=4
