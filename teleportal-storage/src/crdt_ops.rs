//! The CRDT seam: `diff`/`merge` as an opaque, pluggable collaborator.
//!
//! Per the synchronization core's scope, the CRDT algorithm itself (Yjs/
//! `yrs` or any other implementation) lives outside this crate. Storage
//! adapters that back real documents plug in a real implementation;
//! [`AppendOnlyCrdtOps`] is a deterministic stand-in used by
//! [`crate::memory::InMemoryStorage`] and by tests, where "merge" is
//! concatenation in arrival order and the "state vector" is simply the
//! update count already applied. It upholds the two properties the core
//! actually relies on: `merge` is associative/commutative-in-effect over
//! the update log, and `diff(sv)` returns exactly the updates the caller is
//! missing.

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// `diff(state_vector) -> update` and `merge(update*) -> update`, per §1 and
/// §4.D.
pub trait CrdtOps: Send + Sync {
	/// Returns the updates in `log` the holder of `state_vector` doesn't
	/// have yet, merged into one update blob.
	fn diff(&self, log: &[Bytes], state_vector: &[u8]) -> Bytes;

	/// Merges the full update log into one update blob representing the
	/// document's current state.
	fn merge(&self, log: &[Bytes]) -> Bytes;

	/// Derives the state vector for a log of this length.
	fn state_vector(&self, log: &[Bytes]) -> Bytes;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AppendOnlyCrdtOps;

impl AppendOnlyCrdtOps {
	fn decode_count(state_vector: &[u8]) -> usize {
		let mut cursor = state_vector;
		if cursor.len() < 8 {
			return 0;
		}
		cursor.get_u64() as usize
	}

	fn encode_count(count: usize) -> Bytes {
		let mut buf = BytesMut::with_capacity(8);
		buf.put_u64(count as u64);
		buf.freeze()
	}
}

impl CrdtOps for AppendOnlyCrdtOps {
	fn diff(&self, log: &[Bytes], state_vector: &[u8]) -> Bytes {
		let known = Self::decode_count(state_vector).min(log.len());
		let mut out = BytesMut::new();
		for update in &log[known..] {
			out.put_slice(update);
		}
		out.freeze()
	}

	fn merge(&self, log: &[Bytes]) -> Bytes {
		let mut out = BytesMut::new();
		for update in log {
			out.put_slice(update);
		}
		out.freeze()
	}

	fn state_vector(&self, log: &[Bytes]) -> Bytes {
		Self::encode_count(log.len())
	}
}


// vim: ts=4
