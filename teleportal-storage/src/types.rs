//! Data model types for the storage layer (§3).

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// The result of a read (`getDocument`, `handleSyncStep1`): a merged update
/// plus the state vector it was computed against.
#[derive(Debug, Clone)]
pub struct DocumentSnapshot {
	pub update: Bytes,
	pub state_vector: Bytes,
}

/// `{createdAt, updatedAt, encrypted, milestone_triggers[]}` (§3).
#[derive(Debug, Clone)]
pub struct DocumentMetadata {
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub encrypted: bool,
	pub milestone_triggers: Vec<TriggerConfig>,
}

impl Default for DocumentMetadata {
	fn default() -> Self {
		let now = Utc::now();
		DocumentMetadata { created_at: now, updated_at: now, encrypted: false, milestone_triggers: Vec::new() }
	}
}

/// Milestone trigger vocabulary, ratified in DESIGN.md's Open Question
/// decisions on milestone trigger event vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
	TimeBased,
	UpdateCount,
	/// Fires when a document's subscriber count transitions 0 -> 1.
	ClientJoin,
}

#[derive(Debug, Clone)]
pub struct TriggerConfig {
	pub kind: TriggerKind,
	/// For `TimeBased`: minimum milliseconds since the last milestone. For
	/// `UpdateCount`: number of accepted updates since the last milestone.
	/// Unused for `ClientJoin`.
	pub threshold: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MilestoneLifecycle {
	Active,
	SoftDeleted,
	Restored,
}

#[derive(Debug, Clone)]
pub struct Milestone {
	pub id: String,
	pub document_id: String,
	pub name: String,
	pub created_at: DateTime<Utc>,
	pub snapshot_ref: String,
	pub lifecycle: MilestoneLifecycle,
}

// vim: ts=4
