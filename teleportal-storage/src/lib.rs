#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

//! Storage interface, batching wrapper, and an in-memory reference adapter
//! (§4.D).
//!
//! Grounded on `server::crdt_adapter::CrdtAdapter` (the donor's
//! `store_update`/`get_meta`/`set_meta`/`delete_doc` method set maps almost
//! directly onto `handleUpdate`/`getDocumentMetadata`/`writeDocumentMetadata`/
//! `deleteDocument`) and `adapters/crdt-adapter-redb` for the
//! batch/flush-on-read idiom. The CRDT `diff`/`merge` operations themselves
//! stay behind the [`crdt_ops::CrdtOps`] seam: this crate never implements a
//! real Yjs/yrs merge algorithm (out of scope per the synchronization
//! core's contract), only the storage plumbing around it.

pub mod batching;
pub mod crdt_ops;
pub mod memory;
pub mod rpc;
pub mod types;

pub use batching::{BatchConfig, BatchingStorage};
pub use crdt_ops::{AppendOnlyCrdtOps, CrdtOps};
pub use memory::{InMemoryFileStorage, InMemoryMilestoneStorage, InMemoryStorage};
pub use rpc::{dispatch_file_rpc, dispatch_milestone_rpc};
pub use types::{DocumentMetadata, DocumentSnapshot, Milestone, MilestoneLifecycle, TriggerConfig, TriggerKind};

use async_trait::async_trait;
use bytes::Bytes;
use teleportal_core::TlResult;

/// Storage collaborator consumed by the document session (§4.D, §6). All
/// operations are async and return `storage_error` kinds on failure
/// (`io_error | timeout | conflict | not_found`, see
/// `teleportal_core::error::StorageErrorKind`).
#[async_trait]
pub trait Storage: Send + Sync {
	/// Append an update. Idempotent on byte equality is allowed but not
	/// required.
	async fn handle_update(&self, doc_id: &str, update: Bytes) -> TlResult<()>;

	/// Returns the merged current state, or `None` for a document with no
	/// stored updates (a legal, empty state).
	async fn get_document(&self, doc_id: &str) -> TlResult<Option<DocumentSnapshot>>;

	/// Returns the diff against `remote_sv` plus this node's resulting
	/// state vector.
	async fn handle_sync_step1(&self, doc_id: &str, remote_sv: Bytes) -> TlResult<DocumentSnapshot>;

	/// Applies a client's bulk update. May be a thin wrapper over
	/// `handle_update`.
	async fn handle_sync_step2(&self, doc_id: &str, update: Bytes) -> TlResult<()> {
		self.handle_update(doc_id, update).await
	}

	async fn get_document_metadata(&self, doc_id: &str) -> TlResult<DocumentMetadata>;
	async fn write_document_metadata(&self, doc_id: &str, meta: DocumentMetadata) -> TlResult<()>;

	async fn delete_document(&self, doc_id: &str) -> TlResult<()>;

	/// Optional sub-collaborator for `file-rpc` messages. `None` means the
	/// deployment has not wired one up; the document session answers
	/// `file-rpc` requests with `storage_error` in that case.
	fn file_storage(&self) -> Option<&dyn FileStorage> {
		None
	}

	/// Optional sub-collaborator for milestone snapshots and `milestone-rpc`
	/// messages.
	fn milestone_storage(&self) -> Option<&dyn MilestoneStorage> {
		None
	}
}

#[async_trait]
pub trait FileStorage: Send + Sync {
	async fn put_file(&self, doc_id: &str, name: &str, bytes: Bytes) -> TlResult<()>;
	async fn get_file(&self, doc_id: &str, name: &str) -> TlResult<Option<Bytes>>;
	async fn delete_file(&self, doc_id: &str, name: &str) -> TlResult<()>;
}

#[async_trait]
pub trait MilestoneStorage: Send + Sync {
	async fn create_milestone(&self, doc_id: &str, name: &str, snapshot: Bytes) -> TlResult<Milestone>;
	async fn list_milestones(&self, doc_id: &str) -> TlResult<Vec<Milestone>>;
	async fn soft_delete_milestone(&self, doc_id: &str, milestone_id: &str) -> TlResult<()>;
	async fn restore_milestone(&self, doc_id: &str, milestone_id: &str) -> TlResult<()>;
}

// vim: ts=4
