//! Document session (§4.F): the actor that owns one document's
//! authoritative, serialized view of its CRDT state.
//!
//! Grounded on `server/src/crdt/websocket.rs`'s per-document connection
//! handler (the shape of sync-step1/sync-step2/update handling) and
//! `server/src/crdt_adapter.rs` (the storage call shape), generalized into
//! a standalone actor fed through an `mpsc` mailbox — the "per-document
//! serial queue" that is this system's single source of ordering truth
//! (§5). Unlike the donor, this actor never echoes a message back to the
//! client that sent it (Testable Property 4).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use teleportal_core::{DocPayload, Error, Message, MessageKind, Payload, TlResult};
use teleportal_metrics::Metrics;
use teleportal_pubsub::{document_topic, PubSub, SubscriptionId};
use teleportal_storage::types::{DocumentMetadata, TriggerKind};
use teleportal_storage::{dispatch_file_rpc, dispatch_milestone_rpc, Storage};

use crate::context::{AuthzHook, SessionContext};

/// Where an inbound message came from: a live client (whose sink receives
/// direct replies and who is excluded from local broadcast) or another
/// node's replication feed (broadcast locally, never re-persisted, never
/// re-published).
enum Origin {
	Client { context: SessionContext, sink: Arc<dyn ClientSink> },
	Replication,
}

/// The document session's view of a subscriber: enough to deliver
/// messages and to exclude the originator from a broadcast.
pub trait ClientSink: Send + Sync {
	fn client_id(&self) -> &str;
	/// Best-effort, non-blocking enqueue. Back-pressure and drop policy are
	/// the client session's concern (§4.G); the document session never
	/// blocks on a slow subscriber.
	fn send(&self, msg: Arc<Message>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocLifecycle {
	Opening,
	Ready,
	Draining,
	Closed,
}

#[derive(Debug, Clone, Copy)]
pub struct DocumentConfig {
	pub node_id: u64,
	/// How long a document stays in `Draining` after its last subscriber
	/// leaves before it tears down.
	pub teardown_grace: Duration,
}

impl Default for DocumentConfig {
	fn default() -> Self {
		DocumentConfig { node_id: 0, teardown_grace: Duration::from_secs(30) }
	}
}

enum DocCommand {
	Subscribe { sink: Arc<dyn ClientSink>, context: SessionContext, encrypted_hint: bool, reply: tokio::sync::oneshot::Sender<TlResult<()>> },
	Unsubscribe { client_id: String },
	Receive { message: Message, origin: Origin, reply: tokio::sync::oneshot::Sender<TlResult<()>> },
	ReceiveReplicated { frame: Bytes },
	AttachReplication { topic: String, subscription_id: SubscriptionId },
	MaybeTeardown { generation: u64 },
}

/// A cheap, cloneable reference to a running document actor.
#[derive(Clone)]
pub struct DocumentHandle {
	pub id: Arc<str>,
	cmd_tx: mpsc::Sender<DocCommand>,
	lifecycle: watch::Receiver<DocLifecycle>,
}

impl DocumentHandle {
	pub fn lifecycle(&self) -> DocLifecycle {
		*self.lifecycle.borrow()
	}

	pub async fn subscribe(&self, sink: Arc<dyn ClientSink>, context: SessionContext, encrypted_hint: bool) -> TlResult<()> {
		let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
		self.cmd_tx
			.send(DocCommand::Subscribe { sink, context, encrypted_hint, reply: reply_tx })
			.await
			.map_err(|_| Error::Internal("document actor gone".to_string()))?;
		reply_rx.await.map_err(|_| Error::Internal("document actor dropped reply".to_string()))?
	}

	pub async fn unsubscribe(&self, client_id: impl Into<String>) {
		let _ = self.cmd_tx.send(DocCommand::Unsubscribe { client_id: client_id.into() }).await;
	}

	/// Feeds an inbound message from a live client into the document's
	/// serial queue. Resolves once the message has been fully handled
	/// (including durable persistence, where applicable) — callers must not
	/// ack the client before this resolves (Testable Property 10).
	pub async fn receive(&self, message: Message, context: SessionContext, sink: Arc<dyn ClientSink>) -> TlResult<()> {
		let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
		self.cmd_tx
			.send(DocCommand::Receive { message, origin: Origin::Client { context, sink }, reply: reply_tx })
			.await
			.map_err(|_| Error::Internal("document actor gone".to_string()))?;
		reply_rx.await.map_err(|_| Error::Internal("document actor dropped reply".to_string()))?
	}

	/// Feeds a wire frame received from another node's pub/sub feed. Fire
	/// and forget: replication is best-effort and must never block the
	/// publisher.
	pub async fn receive_replicated(&self, frame: Bytes) {
		let _ = self.cmd_tx.send(DocCommand::ReceiveReplicated { frame }).await;
	}

	/// Records the replication adapter's subscription for this document so
	/// teardown can close it (§4.F: "close the pub/sub subscription and
	/// enter closed"). Fire-and-forget: if the actor is already gone the
	/// subscription was never going to receive anything for it anyway.
	pub async fn attach_replication_subscription(&self, topic: String, subscription_id: SubscriptionId) {
		let _ = self.cmd_tx.send(DocCommand::AttachReplication { topic, subscription_id }).await;
	}
}

struct Subscriber {
	sink: Arc<dyn ClientSink>,
}

struct DocumentActor {
	id: Arc<str>,
	config: DocumentConfig,
	storage: Arc<dyn Storage>,
	pubsub: Arc<dyn PubSub>,
	authz: AuthzHook,
	metrics: Option<Arc<Metrics>>,
	subscribers: HashMap<String, Subscriber>,
	encrypted: Option<bool>,
	metadata: DocumentMetadata,
	lifecycle_tx: watch::Sender<DocLifecycle>,
	replication_sub: Option<(String, SubscriptionId)>,
	drain_generation: u64,
	updates_since_milestone: u64,
	last_milestone_at: std::time::Instant,
}

/// Spawns a document session actor and returns a handle to it. The actor
/// runs until its mailbox is dropped (all handles gone) or it completes a
/// teardown after its last subscriber leaves.
pub fn spawn_document(
	id: impl Into<String>,
	config: DocumentConfig,
	storage: Arc<dyn Storage>,
	pubsub: Arc<dyn PubSub>,
	authz: AuthzHook,
	metrics: Option<Arc<Metrics>>,
) -> DocumentHandle {
	let id: Arc<str> = Arc::from(id.into());
	let (cmd_tx, cmd_rx) = mpsc::channel(256);
	let (lifecycle_tx, lifecycle_rx) = watch::channel(DocLifecycle::Opening);

	let actor = DocumentActor {
		id: id.clone(),
		config,
		storage,
		pubsub,
		authz,
		metrics,
		subscribers: HashMap::new(),
		encrypted: None,
		metadata: DocumentMetadata::default(),
		lifecycle_tx,
		replication_sub: None,
		drain_generation: 0,
		updates_since_milestone: 0,
		last_milestone_at: std::time::Instant::now(),
	};

	tokio::spawn(run(actor, cmd_rx, cmd_tx.clone()));

	DocumentHandle { id, cmd_tx, lifecycle: lifecycle_rx }
}

async fn run(mut actor: DocumentActor, mut cmd_rx: mpsc::Receiver<DocCommand>, self_tx: mpsc::Sender<DocCommand>) {
	if let Some(metrics) = &actor.metrics {
		metrics.record_document_opened();
		metrics.document_opened_gauge();
	}
	info!(document_id = %actor.id, "document session opened");

	while let Some(cmd) = cmd_rx.recv().await {
		match cmd {
			DocCommand::Subscribe { sink, context, encrypted_hint, reply } => {
				let result = actor.handle_subscribe(sink, context, encrypted_hint).await;
				let _ = reply.send(result);
			}
			DocCommand::Unsubscribe { client_id } => {
				actor.handle_unsubscribe(&client_id, &self_tx);
			}
			DocCommand::Receive { message, origin, reply } => {
				let result = actor.handle_message(message, origin).await;
				let _ = reply.send(result);
			}
			DocCommand::ReceiveReplicated { frame } => {
				if let Err(err) = actor.handle_replicated_frame(frame).await {
					warn!(document_id = %actor.id, %err, "failed to apply replicated frame");
				}
			}
			DocCommand::AttachReplication { topic, subscription_id } => {
				actor.replication_sub = Some((topic, subscription_id));
			}
			DocCommand::MaybeTeardown { generation } => {
				if actor.should_tear_down(generation) {
					break;
				}
			}
		}
	}

	if let Some((topic, subscription_id)) = actor.replication_sub.take() {
		actor.pubsub.unsubscribe(&topic, subscription_id).await;
	}
	let _ = actor.lifecycle_tx.send(DocLifecycle::Closed);
	if let Some(metrics) = &actor.metrics {
		metrics.document_closed_gauge();
		metrics.remove_document_size(&actor.id);
	}
	info!(document_id = %actor.id, "document session closed");
}

fn kind_label(kind: MessageKind) -> &'static str {
	match kind {
		MessageKind::Doc => "doc",
		MessageKind::Awareness => "awareness",
		MessageKind::Ack => "ack",
		MessageKind::Auth => "auth",
		MessageKind::FileRpc => "file_rpc",
		MessageKind::MilestoneRpc => "milestone_rpc",
	}
}

impl DocumentActor {
	async fn handle_subscribe(&mut self, sink: Arc<dyn ClientSink>, _context: SessionContext, encrypted_hint: bool) -> TlResult<()> {
		let client_id = sink.client_id().to_string();
		let was_empty = self.subscribers.is_empty();
		let first_ever_open = *self.lifecycle_tx.borrow() == DocLifecycle::Opening;

		if first_ever_open {
			self.metadata = self.storage.get_document_metadata(&self.id).await.unwrap_or_default();
			if self.encrypted.is_none() {
				self.encrypted = Some(encrypted_hint);
			}
		}

		let snapshot = self.storage.get_document(&self.id).await?;
		let state_vector = snapshot.map(|s| s.state_vector).unwrap_or_default();
		let sync1 = Message::doc(self.config.node_id, self.id.to_string(), self.encrypted.unwrap_or(false), DocPayload::SyncStep1 { state_vector });
		sink.send(Arc::new(sync1));

		let was_draining = *self.lifecycle_tx.borrow() == DocLifecycle::Draining;
		if first_ever_open || was_draining {
			let _ = self.lifecycle_tx.send(DocLifecycle::Ready);
		}

		self.subscribers.insert(client_id, Subscriber { sink });

		if was_empty && !self.subscribers.is_empty() {
			self.maybe_fire_client_join_milestone();
		}
		Ok(())
	}

	fn handle_unsubscribe(&mut self, client_id: &str, self_tx: &mpsc::Sender<DocCommand>) {
		self.subscribers.remove(client_id);
		if self.subscribers.is_empty() {
			self.drain_generation += 1;
			let generation = self.drain_generation;
			let _ = self.lifecycle_tx.send(DocLifecycle::Draining);
			let grace = self.config.teardown_grace;
			let tx = self_tx.clone();
			tokio::spawn(async move {
				tokio::time::sleep(grace).await;
				let _ = tx.send(DocCommand::MaybeTeardown { generation }).await;
			});
		}
	}

	fn should_tear_down(&self, generation: u64) -> bool {
		*self.lifecycle_tx.borrow() == DocLifecycle::Draining && generation == self.drain_generation && self.subscribers.is_empty()
	}

	async fn handle_replicated_frame(&mut self, frame: Bytes) -> TlResult<()> {
		let (message, _) = teleportal_core::codec::decode(&frame, usize::MAX)?;
		self.handle_message(message, Origin::Replication).await
	}

	async fn handle_message(&mut self, message: Message, origin: Origin) -> TlResult<()> {
		if let Some(metrics) = &self.metrics {
			metrics.record_message(kind_label(message.kind));
		}

		if let Origin::Client { context, sink } = &origin {
			if let Some(expected) = self.encrypted {
				if expected != message.encrypted {
					warn!(document_id = %self.id, client_id = %sink.client_id(), "encryption mismatch, dropping client");
					return Err(Error::EncryptionMismatch);
				}
			} else {
				self.encrypted = Some(message.encrypted);
			}

			if !(self.authz)(context, &message).await {
				let fail = Message::doc(
					self.config.node_id,
					self.id.to_string(),
					message.encrypted,
					DocPayload::AuthFail { reason: "unauthorized".to_string() },
				);
				sink.send(Arc::new(fail));
				return Err(Error::Unauthorized);
			}
		}

		match message.payload.clone() {
			Payload::Doc(doc_payload) => self.handle_doc_payload(doc_payload, &message, &origin).await,
			Payload::Awareness(payload) => {
				self.broadcast_awareness(payload.update, &origin).await;
				Ok(())
			}
			Payload::FileRpc { body } => {
				self.handle_file_rpc(body, &origin).await;
				Ok(())
			}
			Payload::MilestoneRpc { body } => {
				self.handle_milestone_rpc(body, &origin).await;
				Ok(())
			}
			Payload::Ack(_) | Payload::Auth { .. } => Ok(()),
		}
	}

	/// Dispatches a `file-rpc` request to the storage layer's file
	/// sub-collaborator and routes the response back to the single
	/// requester (§4.F). Replicated frames never carry a requester to reply
	/// to, so they are ignored: file operations are not part of the CRDT
	/// replication stream.
	async fn handle_file_rpc(&self, body: Bytes, origin: &Origin) {
		let Origin::Client { sink, .. } = origin else { return };
		let response_body = dispatch_file_rpc(self.storage.file_storage(), &self.id, &body).await;
		let response = Message::file_rpc(self.config.node_id, self.id.to_string(), response_body);
		sink.send(Arc::new(response));
	}

	/// Dispatches a `milestone-rpc` request, supplying the document's
	/// current merged snapshot for `Create` requests, and routes the
	/// response back to the single requester (§4.F).
	async fn handle_milestone_rpc(&self, body: Bytes, origin: &Origin) {
		let Origin::Client { sink, .. } = origin else { return };
		let current_snapshot = match self.storage.get_document(&self.id).await {
			Ok(Some(snapshot)) => snapshot.update,
			_ => Bytes::new(),
		};
		let response_body = dispatch_milestone_rpc(self.storage.milestone_storage(), &self.id, &body, current_snapshot).await;
		let response = Message::milestone_rpc(self.config.node_id, self.id.to_string(), response_body);
		sink.send(Arc::new(response));
	}

	async fn handle_doc_payload(&mut self, payload: DocPayload, message: &Message, origin: &Origin) -> TlResult<()> {
		match payload {
			DocPayload::SyncStep1 { state_vector } => {
				if let Origin::Client { sink, .. } = origin {
					let snapshot = self.storage.handle_sync_step1(&self.id, state_vector).await?;
					let step2 = Message::doc(self.config.node_id, self.id.to_string(), message.encrypted, DocPayload::SyncStep2 { update: snapshot.update });
					sink.send(Arc::new(step2));
					let done = Message::doc(self.config.node_id, self.id.to_string(), message.encrypted, DocPayload::SyncDone);
					sink.send(Arc::new(done));
				}
				Ok(())
			}
			DocPayload::SyncStep2 { update } | DocPayload::Update { update } => {
				self.apply_and_broadcast_update(update, message, origin).await
			}
			DocPayload::AuthRequest { .. } | DocPayload::AuthFail { .. } | DocPayload::SyncDone => Ok(()),
		}
	}

	async fn apply_and_broadcast_update(&mut self, update: Bytes, message: &Message, origin: &Origin) -> TlResult<()> {
		let replicated = matches!(origin, Origin::Replication);

		if !replicated {
			self.storage.handle_update(&self.id, update.clone()).await?;
			self.updates_since_milestone += 1;
			self.maybe_fire_count_or_time_milestone();

			if let Some(metrics) = &self.metrics {
				if let Ok(Some(snapshot)) = self.storage.get_document(&self.id).await {
					metrics.set_document_size(&self.id, snapshot.update.len());
				}
			}
		}

		let broadcast = Arc::new(Message::doc(self.config.node_id, self.id.to_string(), message.encrypted, DocPayload::Update { update: update.clone() }));
		let exclude = match origin {
			Origin::Client { sink, .. } => Some(sink.client_id()),
			Origin::Replication => None,
		};
		self.broadcast_local(broadcast, exclude);

		if let Origin::Client { sink, .. } = origin {
			let ack = Message::ack(self.config.node_id, self.id.to_string(), message.id);
			sink.send(Arc::new(ack));
			self.publish_to_other_nodes(message.encoded()).await;
		}

		Ok(())
	}

	async fn broadcast_awareness(&self, update: Bytes, origin: &Origin) {
		let encrypted = self.encrypted.unwrap_or(false);
		let msg = Arc::new(Message::awareness(self.config.node_id, self.id.to_string(), encrypted, update));
		let exclude = match origin {
			Origin::Client { sink, .. } => Some(sink.client_id()),
			Origin::Replication => None,
		};
		self.broadcast_local(msg.clone(), exclude);
		if matches!(origin, Origin::Client { .. }) {
			self.publish_to_other_nodes(msg.encoded()).await;
		}
	}

	fn broadcast_local(&self, msg: Arc<Message>, exclude_client: Option<&str>) {
		for (client_id, subscriber) in &self.subscribers {
			if Some(client_id.as_str()) == exclude_client {
				continue;
			}
			subscriber.sink.send(msg.clone());
		}
	}

	async fn publish_to_other_nodes(&self, frame: Bytes) {
		let topic = document_topic(&self.id);
		let source_id = self.config.node_id.to_string();
		self.pubsub.publish(&topic, frame, &source_id).await;
	}

	fn maybe_fire_client_join_milestone(&mut self) {
		let fires = self.metadata.milestone_triggers.iter().any(|t| matches!(t.kind, TriggerKind::ClientJoin));
		if fires {
			self.spawn_milestone("client-join");
		}
	}

	fn maybe_fire_count_or_time_milestone(&mut self) {
		for trigger in self.metadata.milestone_triggers.clone() {
			let fires = match trigger.kind {
				TriggerKind::UpdateCount => self.updates_since_milestone >= trigger.threshold,
				TriggerKind::TimeBased => self.last_milestone_at.elapsed().as_millis() as u64 >= trigger.threshold,
				TriggerKind::ClientJoin => false,
			};
			if fires {
				self.updates_since_milestone = 0;
				self.last_milestone_at = std::time::Instant::now();
				self.spawn_milestone("auto");
				break;
			}
		}
	}

	/// Snapshots the current merged state and hands it to the milestone
	/// collaborator off the document's serial queue, so a slow milestone
	/// write never delays the next inbound message.
	fn spawn_milestone(&self, name: &'static str) {
		if self.storage.milestone_storage().is_none() {
			return;
		}
		let storage = self.storage.clone();
		let doc_id = self.id.to_string();
		tokio::spawn(async move {
			let Ok(Some(snapshot)) = storage.get_document(&doc_id).await else {
				return;
			};
			if let Some(ms) = storage.milestone_storage() {
				if let Err(err) = ms.create_milestone(&doc_id, name, snapshot.update).await {
					debug!(document_id = %doc_id, %err, "milestone creation failed");
				}
			}
		});
	}
}


// vim: ts=4
