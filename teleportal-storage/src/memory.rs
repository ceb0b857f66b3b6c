//! In-memory reference [`Storage`] implementation, for tests and local
//! development (§1's explicit scope note: not a production driver).
//!
//! Grounded on `server::crdt_adapter::CrdtAdapter`'s own testability: the
//! donor's adapters keep an append-only update log per document plus a
//! metadata map. This keeps the same shape, backed by [`dashmap::DashMap`]
//! rather than the donor's `RwLock<HashMap<_>>>` since per-document entries
//! are independent and benefit from lock-free cross-document access (§5's
//! locking discipline).

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;

use teleportal_core::error::StorageErrorKind;
use teleportal_core::{Error, TlResult};

use crate::crdt_ops::{AppendOnlyCrdtOps, CrdtOps};
use crate::types::{DocumentMetadata, DocumentSnapshot, Milestone, MilestoneLifecycle};
use crate::{FileStorage, MilestoneStorage, Storage};

#[derive(Default)]
struct DocumentRecord {
	log: Vec<Bytes>,
}

/// Append-only, all-in-process [`Storage`]. Documents and metadata that are
/// never written simply don't exist in the maps, which is the legal "empty
/// document" state per §4.D.
///
/// Carries its own [`InMemoryFileStorage`] and [`InMemoryMilestoneStorage`]
/// sub-collaborators so tests and local development get working `file-rpc`/
/// `milestone-rpc` dispatch without a separate wiring step.
pub struct InMemoryStorage<C: CrdtOps = AppendOnlyCrdtOps> {
	documents: DashMap<String, Mutex<DocumentRecord>>,
	metadata: DashMap<String, DocumentMetadata>,
	files: InMemoryFileStorage,
	milestones: InMemoryMilestoneStorage,
	ops: C,
}

impl InMemoryStorage<AppendOnlyCrdtOps> {
	pub fn new() -> Self {
		InMemoryStorage::with_ops(AppendOnlyCrdtOps)
	}
}

impl Default for InMemoryStorage<AppendOnlyCrdtOps> {
	fn default() -> Self {
		InMemoryStorage::new()
	}
}

impl<C: CrdtOps> InMemoryStorage<C> {
	pub fn with_ops(ops: C) -> Self {
		InMemoryStorage {
			documents: DashMap::new(),
			metadata: DashMap::new(),
			files: InMemoryFileStorage::default(),
			milestones: InMemoryMilestoneStorage::default(),
			ops,
		}
	}

	/// Number of updates ever applied to `doc_id`, for test assertions.
	pub fn update_count(&self, doc_id: &str) -> usize {
		self.documents.get(doc_id).map(|r| r.lock().log.len()).unwrap_or(0)
	}
}

#[async_trait]
impl<C: CrdtOps> Storage for InMemoryStorage<C> {
	async fn handle_update(&self, doc_id: &str, update: Bytes) -> TlResult<()> {
		let record = self.documents.entry(doc_id.to_string()).or_default();
		record.lock().log.push(update);
		Ok(())
	}

	async fn get_document(&self, doc_id: &str) -> TlResult<Option<DocumentSnapshot>> {
		let Some(record) = self.documents.get(doc_id) else { return Ok(None) };
		let log = record.lock();
		if log.log.is_empty() {
			return Ok(None);
		}
		Ok(Some(DocumentSnapshot {
			update: self.ops.merge(&log.log),
			state_vector: self.ops.state_vector(&log.log),
		}))
	}

	async fn handle_sync_step1(&self, doc_id: &str, remote_sv: Bytes) -> TlResult<DocumentSnapshot> {
		let record = self.documents.entry(doc_id.to_string()).or_default();
		let log = record.lock();
		Ok(DocumentSnapshot {
			update: self.ops.diff(&log.log, &remote_sv),
			state_vector: self.ops.state_vector(&log.log),
		})
	}

	async fn get_document_metadata(&self, doc_id: &str) -> TlResult<DocumentMetadata> {
		Ok(self.metadata.get(doc_id).map(|m| m.clone()).unwrap_or_default())
	}

	async fn write_document_metadata(&self, doc_id: &str, meta: DocumentMetadata) -> TlResult<()> {
		self.metadata.insert(doc_id.to_string(), meta);
		Ok(())
	}

	async fn delete_document(&self, doc_id: &str) -> TlResult<()> {
		self.documents.remove(doc_id);
		self.metadata.remove(doc_id);
		Ok(())
	}

	fn file_storage(&self) -> Option<&dyn FileStorage> {
		Some(&self.files)
	}

	fn milestone_storage(&self) -> Option<&dyn MilestoneStorage> {
		Some(&self.milestones)
	}
}

/// All-in-process [`FileStorage`], keyed by `(doc_id, name)`.
#[derive(Default)]
pub struct InMemoryFileStorage {
	files: DashMap<(String, String), Bytes>,
}

#[async_trait]
impl FileStorage for InMemoryFileStorage {
	async fn put_file(&self, doc_id: &str, name: &str, bytes: Bytes) -> TlResult<()> {
		self.files.insert((doc_id.to_string(), name.to_string()), bytes);
		Ok(())
	}

	async fn get_file(&self, doc_id: &str, name: &str) -> TlResult<Option<Bytes>> {
		Ok(self.files.get(&(doc_id.to_string(), name.to_string())).map(|b| b.clone()))
	}

	async fn delete_file(&self, doc_id: &str, name: &str) -> TlResult<()> {
		self.files.remove(&(doc_id.to_string(), name.to_string()));
		Ok(())
	}
}

/// All-in-process [`MilestoneStorage`]: an append-only list of milestones
/// per document, with lifecycle transitions applied in place.
#[derive(Default)]
pub struct InMemoryMilestoneStorage {
	milestones: DashMap<String, Mutex<Vec<Milestone>>>,
	next_id: std::sync::atomic::AtomicU64,
}

#[async_trait]
impl MilestoneStorage for InMemoryMilestoneStorage {
	async fn create_milestone(&self, doc_id: &str, name: &str, snapshot: Bytes) -> TlResult<Milestone> {
		let id = self.next_id.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
		let milestone = Milestone {
			id: format!("milestone-{id}"),
			document_id: doc_id.to_string(),
			name: name.to_string(),
			created_at: chrono::Utc::now(),
			snapshot_ref: format!("inline:{}", snapshot.len()),
			lifecycle: MilestoneLifecycle::Active,
		};
		self.milestones.entry(doc_id.to_string()).or_default().lock().push(milestone.clone());
		Ok(milestone)
	}

	async fn list_milestones(&self, doc_id: &str) -> TlResult<Vec<Milestone>> {
		Ok(self.milestones.get(doc_id).map(|m| m.lock().clone()).unwrap_or_default())
	}

	async fn soft_delete_milestone(&self, doc_id: &str, milestone_id: &str) -> TlResult<()> {
		let Some(record) = self.milestones.get(doc_id) else { return Err(Error::Storage(StorageErrorKind::NotFound)) };
		let mut milestones = record.lock();
		let Some(m) = milestones.iter_mut().find(|m| m.id == milestone_id) else {
			return Err(Error::Storage(StorageErrorKind::NotFound));
		};
		m.lifecycle = MilestoneLifecycle::SoftDeleted;
		Ok(())
	}

	async fn restore_milestone(&self, doc_id: &str, milestone_id: &str) -> TlResult<()> {
		let Some(record) = self.milestones.get(doc_id) else { return Err(Error::Storage(StorageErrorKind::NotFound)) };
		let mut milestones = record.lock();
		let Some(m) = milestones.iter_mut().find(|m| m.id == milestone_id) else {
			return Err(Error::Storage(StorageErrorKind::NotFound));
		};
		m.lifecycle = MilestoneLifecycle::Restored;
		Ok(())
	}
}

/// A [`Storage`] wrapper that fails every operation, for exercising the
/// `storage_error` / non-durable-write path in document session tests.
pub struct FailingStorage {
	pub kind: StorageErrorKind,
}

#[async_trait]
impl Storage for FailingStorage {
	async fn handle_update(&self, _doc_id: &str, _update: Bytes) -> TlResult<()> {
		Err(Error::Storage(self.kind))
	}

	async fn get_document(&self, _doc_id: &str) -> TlResult<Option<DocumentSnapshot>> {
		Err(Error::Storage(self.kind))
	}

	async fn handle_sync_step1(&self, _doc_id: &str, _remote_sv: Bytes) -> TlResult<DocumentSnapshot> {
		Err(Error::Storage(self.kind))
	}

	async fn get_document_metadata(&self, _doc_id: &str) -> TlResult<DocumentMetadata> {
		Err(Error::Storage(self.kind))
	}

	async fn write_document_metadata(&self, _doc_id: &str, _meta: DocumentMetadata) -> TlResult<()> {
		Err(Error::Storage(self.kind))
	}

	async fn delete_document(&self, _doc_id: &str) -> TlResult<()> {
		Err(Error::Storage(self.kind))
	}
}

/// Convenience alias so tests that don't care about in-memory collaborators
/// reaching each other's internals can share an `Arc`.
pub type SharedInMemoryStorage = Arc<InMemoryStorage>;

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn empty_document_is_a_legal_state() {
		let storage = InMemoryStorage::new();
		assert!(storage.get_document("doc-1").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn read_your_writes() {
		let storage = InMemoryStorage::new();
		storage.handle_update("doc-1", Bytes::from_static(b"a")).await.unwrap();
		let snap = storage.get_document("doc-1").await.unwrap().unwrap();
		assert_eq!(snap.update, Bytes::from_static(b"a"));
	}

	#[tokio::test]
	async fn sync_step1_diffs_against_remote_state_vector() {
		let storage = InMemoryStorage::new();
		storage.handle_update("doc-1", Bytes::from_static(b"a")).await.unwrap();
		storage.handle_update("doc-1", Bytes::from_static(b"b")).await.unwrap();

		let empty_sv = Bytes::new();
		let snap = storage.handle_sync_step1("doc-1", empty_sv).await.unwrap();
		assert_eq!(snap.update, Bytes::from_static(b"ab"));
	}

	#[tokio::test]
	async fn metadata_round_trips() {
		let storage = InMemoryStorage::new();
		let mut meta = DocumentMetadata::default();
		meta.encrypted = true;
		storage.write_document_metadata("doc-1", meta).await.unwrap();
		let read = storage.get_document_metadata("doc-1").await.unwrap();
		assert!(read.encrypted);
	}

	#[tokio::test]
	async fn delete_clears_document_and_metadata() {
		let storage = InMemoryStorage::new();
		storage.handle_update("doc-1", Bytes::from_static(b"a")).await.unwrap();
		storage.write_document_metadata("doc-1", DocumentMetadata::default()).await.unwrap();
		storage.delete_document("doc-1").await.unwrap();
		assert!(storage.get_document("doc-1").await.unwrap().is_none());
		assert!(!storage.get_document_metadata("doc-1").await.unwrap().encrypted);
	}
}

// vim: ts=4
