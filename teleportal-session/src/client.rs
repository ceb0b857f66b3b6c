//! Client session (§4.G): owns one connected client's transport, decodes
//! inbound frames, routes them to the right document session, and drains
//! an outbound queue back onto the wire.
//!
//! Grounded on `server/src/core/ws_bus.rs`'s `handle_bus_connection`: a
//! single task racing "read the next inbound frame" against "write the
//! next queued outbound frame" via `tokio::select!`. The donor splits a
//! concrete `WebSocket` into sink/stream halves; here the abstract
//! [`Transport`] trait owns both directions itself, so the client actor
//! just alternates between `transport.recv()` and draining its own
//! `OutboundQueue` — no `Arc<Mutex<..>>` split needed.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use teleportal_core::{rate_limit::RateLimitManager, Message, MessageKind, TlResult};
use teleportal_metrics::Metrics;

use crate::context::{AuthzHook, SessionContext};
use crate::document::{ClientSink, DocumentHandle};
use crate::transport::Transport;

#[derive(Debug, Clone, Copy)]
pub struct ClientConfig {
	/// Outbound queue capacity before doc messages start piling up and the
	/// slow-consumer grace timer starts (§5, Testable Property 9).
	pub outbound_capacity: usize,
	/// Queue length above which the client is considered a slow consumer.
	pub outbound_high_watermark: usize,
	pub slow_consumer_grace: Duration,
	pub idle_timeout: Duration,
}

impl Default for ClientConfig {
	fn default() -> Self {
		ClientConfig {
			outbound_capacity: 512,
			outbound_high_watermark: 256,
			slow_consumer_grace: Duration::from_secs(15),
			idle_timeout: Duration::from_secs(60),
		}
	}
}

/// Resolves (and lazily opens) the document session for an id. Implemented
/// by the server, which alone owns the single-flight document registry;
/// client sessions hold only document ids, never a pinned handle, so a
/// document's lifecycle is never extended by a client merely having
/// visited it (§5).
#[async_trait::async_trait]
pub trait DocumentLookup: Send + Sync {
	async fn get_or_open(&self, document_id: &str) -> DocumentHandle;
}

enum PushOutcome {
	Queued,
	DroppedOldest,
	Rejected,
}

struct OutboundQueue {
	inner: Mutex<VecDeque<Arc<Message>>>,
	notify: Notify,
	capacity: usize,
}

impl OutboundQueue {
	fn new(capacity: usize) -> Self {
		OutboundQueue { inner: Mutex::new(VecDeque::with_capacity(capacity.min(64))), notify: Notify::new(), capacity }
	}

	fn push(&self, msg: Arc<Message>) -> PushOutcome {
		let mut q = self.inner.lock();
		if q.len() < self.capacity {
			q.push_back(msg);
			drop(q);
			self.notify.notify_one();
			return PushOutcome::Queued;
		}
		if msg.kind == MessageKind::Awareness {
			// Awareness is best-effort and superseded by its own next
			// update; drop the oldest queued frame to make room.
			q.pop_front();
			q.push_back(msg);
			drop(q);
			self.notify.notify_one();
			return PushOutcome::DroppedOldest;
		}
		// Doc messages are never dropped: queue past capacity rather than
		// lose data. The watermark check below bounds how long this lasts.
		q.push_back(msg);
		drop(q);
		self.notify.notify_one();
		PushOutcome::Rejected
	}

	fn len(&self) -> usize {
		self.inner.lock().len()
	}

	async fn pop(&self) -> Arc<Message> {
		loop {
			let notified = self.notify.notified();
			if let Some(msg) = self.inner.lock().pop_front() {
				return msg;
			}
			notified.await;
		}
	}
}

/// Implements [`ClientSink`] over a client's outbound queue, handed to
/// document sessions the client subscribes to.
struct ClientOutbound {
	client_id: String,
	queue: Arc<OutboundQueue>,
}

impl ClientSink for ClientOutbound {
	fn client_id(&self) -> &str {
		&self.client_id
	}

	fn send(&self, msg: Arc<Message>) {
		match self.queue.push(msg) {
			PushOutcome::Queued => {}
			PushOutcome::DroppedOldest => {
				tracing::debug!(client_id = %self.client_id, "dropped oldest queued awareness frame");
			}
			PushOutcome::Rejected => {
				warn!(client_id = %self.client_id, "outbound queue over capacity for a doc message");
			}
		}
	}
}

/// A handle to a running client session; cloneable, cheap.
#[derive(Clone)]
pub struct ClientHandle {
	pub client_id: Arc<str>,
	cancel: CancellationToken,
}

impl ClientHandle {
	pub fn disconnect(&self) {
		self.cancel.cancel();
	}
}

pub struct ClientSessionDeps {
	pub documents: Arc<dyn DocumentLookup>,
	pub authz: AuthzHook,
	pub rate_limiter: Option<Arc<RateLimitManager>>,
	pub metrics: Option<Arc<Metrics>>,
}

/// Spawns the client session actor over an already-connected [`Transport`]
/// and returns a handle. The task exits (and the transport is closed) when
/// the peer disconnects, the transport errors, the idle timeout elapses,
/// or `ClientHandle::disconnect` is called.
pub fn spawn_client<T: Transport + 'static>(
	client_id: impl Into<String>,
	context: SessionContext,
	transport: T,
	config: ClientConfig,
	deps: ClientSessionDeps,
) -> ClientHandle {
	let client_id: Arc<str> = Arc::from(client_id.into());
	let cancel = CancellationToken::new();

	if let Some(metrics) = &deps.metrics {
		metrics.client_connected();
	}

	tokio::spawn(run(client_id.clone(), context, transport, config, deps, cancel.clone()));

	ClientHandle { client_id, cancel }
}

async fn run<T: Transport>(
	client_id: Arc<str>,
	context: SessionContext,
	mut transport: T,
	config: ClientConfig,
	deps: ClientSessionDeps,
	cancel: CancellationToken,
) {
	info!(client_id = %client_id, "client session connected");

	let queue = Arc::new(OutboundQueue::new(config.outbound_capacity));
	let sink: Arc<dyn ClientSink> = Arc::new(ClientOutbound { client_id: client_id.to_string(), queue: queue.clone() });
	let mut documents: Vec<String> = Vec::new();
	let mut over_watermark_since: Option<Instant> = None;
	let disconnect_reason;

	'outer: loop {
		let reading_paused = queue.len() > config.outbound_high_watermark;

		if let Some(since) = over_watermark_since {
			if since.elapsed() > config.slow_consumer_grace {
				disconnect_reason = "slow_consumer";
				break 'outer;
			}
		}
		if queue.len() > config.outbound_high_watermark {
			over_watermark_since.get_or_insert_with(Instant::now);
		} else {
			over_watermark_since = None;
		}

		tokio::select! {
			biased;

			_ = cancel.cancelled() => {
				disconnect_reason = "server_initiated";
				break 'outer;
			}

			_ = tokio::time::sleep(config.idle_timeout) => {
				disconnect_reason = "idle_timeout";
				break 'outer;
			}

			frame = transport.recv(), if !reading_paused => {
				match frame {
					Ok(Some(bytes)) => {
						if let Err(err) = handle_inbound(&client_id, &context, bytes, &sink, &mut documents, &deps).await {
							warn!(client_id = %client_id, %err, "disconnecting after inbound error");
							send_error_frame(&mut transport, &err).await;
							disconnect_reason = err.code();
							break 'outer;
						}
					}
					Ok(None) => {
						disconnect_reason = "peer_closed";
						break 'outer;
					}
					Err(err) => {
						warn!(client_id = %client_id, %err, "transport error");
						disconnect_reason = "transport_error";
						break 'outer;
					}
				}
			}

			outbound = queue.pop() => {
				if transport.send(outbound.encoded()).await.is_err() {
					disconnect_reason = "transport_error";
					break 'outer;
				}
			}
		}
	}

	for doc_id in &documents {
		deps.documents.get_or_open(doc_id).await.unsubscribe(client_id.to_string()).await;
	}
	transport.close().await;
	if let Some(metrics) = &deps.metrics {
		metrics.client_disconnected();
	}
	info!(client_id = %client_id, reason = disconnect_reason, "client session disconnected");
}

async fn handle_inbound(
	client_id: &str,
	context: &SessionContext,
	frame: Bytes,
	sink: &Arc<dyn ClientSink>,
	documents: &mut Vec<String>,
	deps: &ClientSessionDeps,
) -> TlResult<()> {
	let max_size = deps.rate_limiter.as_ref().map(|r| r.max_message_size()).unwrap_or(usize::MAX);
	let (message, _consumed) = teleportal_core::codec::decode(&frame, max_size)?;

	if let Some(rate_limiter) = &deps.rate_limiter {
		if let Err(err) = rate_limiter.check(&context.user_id, &message.document, frame.len()) {
			if let (Some(metrics), teleportal_core::Error::RateLimited { scope, .. }) = (&deps.metrics, &err) {
				let track_by = scope.split_once(':').map_or(scope.as_str(), |(prefix, _)| prefix);
				metrics.record_rate_limit_exceeded(track_by, scope);
			}
			return Err(err);
		}
	}

	if !message.document.is_empty() && !documents.contains(&message.document) {
		let handle = deps.documents.get_or_open(&message.document).await;
		handle.subscribe(sink.clone(), context.clone(), message.encrypted).await?;
		documents.push(message.document.clone());
	}

	if message.document.is_empty() {
		return Ok(());
	}

	let handle = deps.documents.get_or_open(&message.document).await;
	handle.receive(message, context.clone(), sink.clone()).await?;
	let _ = client_id;
	Ok(())
}

async fn send_error_frame<T: Transport>(transport: &mut T, err: &teleportal_core::Error) {
	// Best-effort: the transport may already be broken, in which case this
	// is a no-op. No document context is available for a pre-dispatch
	// error, so disconnects carry an empty document id.
	let msg = Message::doc(0, String::new(), false, teleportal_core::DocPayload::AuthFail { reason: err.code().to_string() });
	let _ = transport.send(msg.encoded()).await;
}

#[cfg(test)]
mod tests {
	use super::*;
	use dashmap::DashMap;
	use teleportal_core::rate_limit::{Rule, TrackBy};
	use teleportal_core::{codec, DocPayload, MessageKind, Payload};
	use teleportal_pubsub::InMemoryPubSub;
	use teleportal_storage::InMemoryStorage;

	use crate::context::allow_all;
	use crate::document::spawn_document;
	use crate::transport::in_process::InProcessTransport;

	/// Lazily spawns a real document actor per id, over shared in-memory
	/// storage/pub-sub, standing in for the server's single-flight registry
	/// (§4.H is covered separately; this fake just satisfies the
	/// `DocumentLookup` seam for client-session tests).
	struct FakeDocuments {
		storage: Arc<InMemoryStorage>,
		pubsub: Arc<InMemoryPubSub>,
		docs: DashMap<String, DocumentHandle>,
	}

	impl FakeDocuments {
		fn new() -> Arc<Self> {
			Arc::new(FakeDocuments { storage: Arc::new(InMemoryStorage::new()), pubsub: Arc::new(InMemoryPubSub::new()), docs: DashMap::new() })
		}
	}

	#[async_trait::async_trait]
	impl DocumentLookup for FakeDocuments {
		async fn get_or_open(&self, document_id: &str) -> DocumentHandle {
			self.docs
				.entry(document_id.to_string())
				.or_insert_with(|| {
					spawn_document(
						document_id,
						crate::document::DocumentConfig::default(),
						self.storage.clone(),
						self.pubsub.clone(),
						allow_all(),
						None,
					)
				})
				.clone()
		}
	}

	fn update_frame(doc_id: &str, byte: u8) -> Bytes {
		let msg = Message::doc(1, doc_id, false, DocPayload::Update { update: Bytes::copy_from_slice(&[byte]) });
		codec::encode(&msg)
	}

	async fn recv_timeout(transport: &mut InProcessTransport) -> Option<Bytes> {
		tokio::time::timeout(Duration::from_millis(500), transport.recv()).await.ok()?.ok()?
	}

	#[tokio::test]
	async fn routes_update_to_document_and_returns_ack() {
		let (mut client_end, server_end) = InProcessTransport::pair();
		let deps = ClientSessionDeps { documents: FakeDocuments::new(), authz: allow_all(), rate_limiter: None, metrics: None };
		let _handle = spawn_client("c1", SessionContext::new("alice"), server_end, ClientConfig::default(), deps);

		client_end.send(update_frame("doc-1", 7)).await.unwrap();

		// First frame back is the sync-step-1 emitted on lazy-open, second
		// is the ack for the update.
		let _sync1 = recv_timeout(&mut client_end).await.expect("sync-step-1");
		let ack_frame = recv_timeout(&mut client_end).await.expect("ack");
		let (decoded, _) = codec::decode(&ack_frame, usize::MAX).unwrap();
		assert_eq!(decoded.kind, MessageKind::Ack);
	}

	#[tokio::test]
	async fn oversized_frame_disconnects_before_body_decode() {
		let (mut client_end, server_end) = InProcessTransport::pair();
		let deps = ClientSessionDeps { documents: FakeDocuments::new(), authz: allow_all(), rate_limiter: Some(Arc::new(RateLimitManager::new(vec![], 8))), metrics: None };
		let _handle = spawn_client("c1", SessionContext::new("alice"), server_end, ClientConfig::default(), deps);

		client_end.send(update_frame("doc-1", 1)).await.unwrap();

		let err_frame = recv_timeout(&mut client_end).await.expect("error frame");
		let (decoded, _) = codec::decode(&err_frame, usize::MAX).unwrap();
		match decoded.payload {
			Payload::Doc(DocPayload::AuthFail { reason }) => assert_eq!(reason, "E-CODEC-TOOLARGE"),
			other => panic!("expected an AuthFail carrying the disconnect code, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn rate_limit_rule_disconnects_after_max_messages() {
		let (mut client_end, server_end) = InProcessTransport::pair();
		let rule = Rule { id: "r1".to_string(), max_messages: 3, window_ms: 1_000, track_by: TrackBy::User };
		let limiter = Arc::new(RateLimitManager::new(vec![rule], 1 << 20));
		let deps = ClientSessionDeps { documents: FakeDocuments::new(), authz: allow_all(), rate_limiter: Some(limiter), metrics: None };
		let _handle = spawn_client("c1", SessionContext::new("alice"), server_end, ClientConfig::default(), deps);

		for byte in 0..4u8 {
			client_end.send(update_frame("doc-1", byte)).await.unwrap();
		}

		// Drain: sync-step-1 on open, then an ack per accepted update (3),
		// then the rate-limit disconnect's error frame.
		let mut saw_rate_limited = false;
		for _ in 0..6 {
			let Some(frame) = recv_timeout(&mut client_end).await else { break };
			let Ok((decoded, _)) = codec::decode(&frame, usize::MAX) else { continue };
			if let Payload::Doc(DocPayload::AuthFail { reason }) = decoded.payload {
				assert_eq!(reason, "E-CORE-RATELIMIT");
				saw_rate_limited = true;
				break;
			}
		}
		assert!(saw_rate_limited, "expected the 4th message to trip the rate limit and disconnect");
	}
}

// vim: ts=4
