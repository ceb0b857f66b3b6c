//! Batching wrapper interposed between document sessions and a [`Storage`]
//! collaborator (§4.D).
//!
//! Grounded on `adapters/crdt-adapter-redb`'s in-memory document-instance
//! cache plus its config knobs (`max_instances`, `idle_timeout_secs`): here
//! generalized to a per-document pending-write buffer flushed on (a) size
//! threshold, (b) a `tokio::time::interval`-driven wait threshold, or (c)
//! any read/delete on the same document forcing a synchronous
//! flush-then-read. Reads on a *different* document never wait on another
//! document's pending flush, matching §5's per-document locking discipline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use teleportal_core::TlResult;

use crate::types::{DocumentMetadata, DocumentSnapshot};
use crate::{FileStorage, MilestoneStorage, Storage};

#[derive(Debug, Clone, Copy)]
pub struct BatchConfig {
	/// Flush a document's pending writes once this many updates have
	/// accumulated.
	pub batch_max_size: usize,
	/// Flush a document's pending writes once this long after the first
	/// buffered write, even if `batch_max_size` hasn't been reached.
	pub batch_wait_ms: u64,
}

impl Default for BatchConfig {
	fn default() -> Self {
		BatchConfig { batch_max_size: 32, batch_wait_ms: 50 }
	}
}

struct PendingWrites {
	updates: Vec<Bytes>,
	first_buffered_at: Instant,
	pending_metadata: Option<DocumentMetadata>,
}

impl PendingWrites {
	fn new() -> Self {
		PendingWrites { updates: Vec::new(), first_buffered_at: Instant::now(), pending_metadata: None }
	}

	fn is_empty(&self) -> bool {
		self.updates.is_empty() && self.pending_metadata.is_none()
	}
}

/// Buffers `(doc_id, update)` and metadata writes in front of an inner
/// [`Storage`], flushing per the thresholds in [`BatchConfig`]. Reads and
/// deletes force a synchronous flush of that document's own pending writes
/// first, preserving read-your-writes without blocking other documents.
pub struct BatchingStorage<S> {
	inner: Arc<S>,
	config: BatchConfig,
	pending: DashMap<String, Arc<Mutex<PendingWrites>>>,
}

impl<S: Storage + 'static> BatchingStorage<S> {
	pub fn new(inner: Arc<S>, config: BatchConfig) -> Self {
		BatchingStorage { inner, config, pending: DashMap::new() }
	}

	fn slot(&self, doc_id: &str) -> Arc<Mutex<PendingWrites>> {
		self.pending.entry(doc_id.to_string()).or_insert_with(|| Arc::new(Mutex::new(PendingWrites::new()))).clone()
	}

	/// Flushes `doc_id`'s pending writes to the inner storage. Called
	/// synchronously from `get_document`/`delete_document`/`handle_sync_step1`
	/// (read-your-writes) and from the background timer (time threshold).
	async fn flush(&self, doc_id: &str, slot: &Mutex<PendingWrites>) -> TlResult<()> {
		let mut pending = slot.lock().await;
		if pending.is_empty() {
			return Ok(());
		}
		for update in pending.updates.drain(..) {
			self.inner.handle_update(doc_id, update).await?;
		}
		if let Some(meta) = pending.pending_metadata.take() {
			self.inner.write_document_metadata(doc_id, meta).await?;
		}
		debug!(doc_id, "flushed batched writes");
		Ok(())
	}

	/// Spawns the background flush timer. Call once per `BatchingStorage`
	/// instance; the returned handle should be aborted on shutdown.
	pub fn spawn_flush_timer(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
		let this = self.clone();
		tokio::spawn(async move {
			let mut interval = tokio::time::interval(Duration::from_millis(this.config.batch_wait_ms.max(1)));
			loop {
				interval.tick().await;
				let due: Vec<String> = this
					.pending
					.iter()
					.filter_map(|entry| {
						let slot = entry.value().clone();
						let elapsed_due = slot
							.try_lock()
							.map(|p| !p.is_empty() && p.first_buffered_at.elapsed().as_millis() as u64 >= this.config.batch_wait_ms)
							.unwrap_or(false);
						elapsed_due.then(|| entry.key().clone())
					})
					.collect();
				for doc_id in due {
					let slot = this.slot(&doc_id);
					if let Err(err) = this.flush(&doc_id, &slot).await {
						warn!(doc_id, %err, "background batch flush failed");
					}
				}
			}
		})
	}
}

#[async_trait]
impl<S: Storage + 'static> Storage for BatchingStorage<S> {
	async fn handle_update(&self, doc_id: &str, update: Bytes) -> TlResult<()> {
		let slot = self.slot(doc_id);
		let mut pending = slot.lock().await;
		if pending.updates.is_empty() {
			pending.first_buffered_at = Instant::now();
		}
		pending.updates.push(update);
		let should_flush = pending.updates.len() >= self.config.batch_max_size;
		drop(pending);
		if should_flush {
			self.flush(doc_id, &slot).await?;
		}
		Ok(())
	}

	async fn get_document(&self, doc_id: &str) -> TlResult<Option<DocumentSnapshot>> {
		let slot = self.slot(doc_id);
		self.flush(doc_id, &slot).await?;
		self.inner.get_document(doc_id).await
	}

	async fn handle_sync_step1(&self, doc_id: &str, remote_sv: Bytes) -> TlResult<DocumentSnapshot> {
		let slot = self.slot(doc_id);
		self.flush(doc_id, &slot).await?;
		self.inner.handle_sync_step1(doc_id, remote_sv).await
	}

	async fn handle_sync_step2(&self, doc_id: &str, update: Bytes) -> TlResult<()> {
		self.handle_update(doc_id, update).await
	}

	async fn get_document_metadata(&self, doc_id: &str) -> TlResult<DocumentMetadata> {
		let slot = self.slot(doc_id);
		self.flush(doc_id, &slot).await?;
		self.inner.get_document_metadata(doc_id).await
	}

	async fn write_document_metadata(&self, doc_id: &str, meta: DocumentMetadata) -> TlResult<()> {
		let slot = self.slot(doc_id);
		let mut pending = slot.lock().await;
		pending.pending_metadata = Some(meta);
		Ok(())
	}

	async fn delete_document(&self, doc_id: &str) -> TlResult<()> {
		let slot = self.slot(doc_id);
		{
			let mut pending = slot.lock().await;
			pending.updates.clear();
			pending.pending_metadata = None;
		}
		self.inner.delete_document(doc_id).await
	}

	fn file_storage(&self) -> Option<&dyn FileStorage> {
		self.inner.file_storage()
	}

	fn milestone_storage(&self) -> Option<&dyn MilestoneStorage> {
		self.inner.milestone_storage()
	}
}


// vim: ts=4
