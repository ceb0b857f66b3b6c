//! Request/response encoding for the `file-rpc` and `milestone-rpc` message
//! kinds (§4.F: "dispatch to the registered sub-collaborator; response
//! routed back to the single requester").
//!
//! The wire codec (§4.A) treats a `file-rpc`/`milestone-rpc` body as an
//! opaque length-prefixed blob; what lives inside it is this module's
//! concern. Requests and responses are JSON (`serde_json`, matching the
//! donor's own use of the crate for everything outside the hot binary wire
//! path — see `teleportal-metrics`'s `/status` view).

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::types::Milestone;
use crate::{FileStorage, MilestoneStorage};

#[derive(Debug, Serialize, Deserialize)]
pub enum FileRpcRequest {
	Put { name: String, bytes: Vec<u8> },
	Get { name: String },
	Delete { name: String },
}

#[derive(Debug, Serialize, Deserialize)]
pub enum FileRpcResponse {
	Ok,
	File { bytes: Option<Vec<u8>> },
	Error { reason: String },
}

#[derive(Debug, Serialize, Deserialize)]
pub enum MilestoneRpcRequest {
	Create { name: String },
	List,
	SoftDelete { milestone_id: String },
	Restore { milestone_id: String },
}

#[derive(Debug, Serialize, Deserialize)]
pub enum MilestoneRpcResponse {
	Created { milestone_id: String },
	List { milestones: Vec<MilestoneView> },
	Ok,
	Error { reason: String },
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MilestoneView {
	pub id: String,
	pub name: String,
	pub created_at: chrono::DateTime<chrono::Utc>,
}

impl From<&Milestone> for MilestoneView {
	fn from(m: &Milestone) -> Self {
		MilestoneView { id: m.id.clone(), name: m.name.clone(), created_at: m.created_at }
	}
}

fn encode<T: Serialize>(response: &T) -> Bytes {
	match serde_json::to_vec(response) {
		Ok(bytes) => Bytes::from(bytes),
		Err(_) => Bytes::from_static(br#"{"reason":"response encoding failed"}"#),
	}
}

/// Decodes `body` and dispatches it to `storage`'s file sub-collaborator (if
/// any), returning the encoded response to send back to the requester.
pub async fn dispatch_file_rpc(storage: Option<&dyn FileStorage>, doc_id: &str, body: &Bytes) -> Bytes {
	let response = match serde_json::from_slice::<FileRpcRequest>(body) {
		Ok(request) => match storage {
			Some(fs) => handle_file_request(fs, doc_id, request).await,
			None => FileRpcResponse::Error { reason: "file storage is not configured".to_string() },
		},
		Err(err) => FileRpcResponse::Error { reason: format!("malformed file-rpc body: {err}") },
	};
	encode(&response)
}

async fn handle_file_request(fs: &dyn FileStorage, doc_id: &str, request: FileRpcRequest) -> FileRpcResponse {
	match request {
		FileRpcRequest::Put { name, bytes } => match fs.put_file(doc_id, &name, Bytes::from(bytes)).await {
			Ok(()) => FileRpcResponse::Ok,
			Err(err) => FileRpcResponse::Error { reason: err.to_string() },
		},
		FileRpcRequest::Get { name } => match fs.get_file(doc_id, &name).await {
			Ok(bytes) => FileRpcResponse::File { bytes: bytes.map(|b| b.to_vec()) },
			Err(err) => FileRpcResponse::Error { reason: err.to_string() },
		},
		FileRpcRequest::Delete { name } => match fs.delete_file(doc_id, &name).await {
			Ok(()) => FileRpcResponse::Ok,
			Err(err) => FileRpcResponse::Error { reason: err.to_string() },
		},
	}
}

/// Decodes `body` and dispatches it to `storage`'s milestone sub-collaborator
/// (if any), returning the encoded response to send back to the requester.
/// `current_snapshot` is the document's current merged update, supplied by
/// the document session (the only caller that can produce it); only
/// `MilestoneRpcRequest::Create` consumes it.
pub async fn dispatch_milestone_rpc(storage: Option<&dyn MilestoneStorage>, doc_id: &str, body: &Bytes, current_snapshot: Bytes) -> Bytes {
	let response = match serde_json::from_slice::<MilestoneRpcRequest>(body) {
		Ok(request) => match storage {
			Some(ms) => handle_milestone_request(ms, doc_id, request, current_snapshot).await,
			None => MilestoneRpcResponse::Error { reason: "milestone storage is not configured".to_string() },
		},
		Err(err) => MilestoneRpcResponse::Error { reason: format!("malformed milestone-rpc body: {err}") },
	};
	encode(&response)
}

async fn handle_milestone_request(ms: &dyn MilestoneStorage, doc_id: &str, request: MilestoneRpcRequest, current_snapshot: Bytes) -> MilestoneRpcResponse {
	match request {
		MilestoneRpcRequest::Create { name } => match ms.create_milestone(doc_id, &name, current_snapshot).await {
			Ok(milestone) => MilestoneRpcResponse::Created { milestone_id: milestone.id },
			Err(err) => MilestoneRpcResponse::Error { reason: err.to_string() },
		},
		MilestoneRpcRequest::List => match ms.list_milestones(doc_id).await {
			Ok(milestones) => MilestoneRpcResponse::List { milestones: milestones.iter().map(MilestoneView::from).collect() },
			Err(err) => MilestoneRpcResponse::Error { reason: err.to_string() },
		},
		MilestoneRpcRequest::SoftDelete { milestone_id } => match ms.soft_delete_milestone(doc_id, &milestone_id).await {
			Ok(()) => MilestoneRpcResponse::Ok,
			Err(err) => MilestoneRpcResponse::Error { reason: err.to_string() },
		},
		MilestoneRpcRequest::Restore { milestone_id } => match ms.restore_milestone(doc_id, &milestone_id).await {
			Ok(()) => MilestoneRpcResponse::Ok,
			Err(err) => MilestoneRpcResponse::Error { reason: err.to_string() },
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::memory::InMemoryStorage;
	use crate::Storage;

	#[tokio::test]
	async fn file_rpc_round_trips_put_then_get() {
		let storage = InMemoryStorage::new();
		let put = serde_json::to_vec(&FileRpcRequest::Put { name: "a.txt".to_string(), bytes: b"hi".to_vec() }).unwrap();
		let resp = dispatch_file_rpc(storage.file_storage(), "doc-1", &Bytes::from(put)).await;
		let decoded: FileRpcResponse = serde_json::from_slice(&resp).unwrap();
		assert!(matches!(decoded, FileRpcResponse::Ok));

		let get = serde_json::to_vec(&FileRpcRequest::Get { name: "a.txt".to_string() }).unwrap();
		let resp = dispatch_file_rpc(storage.file_storage(), "doc-1", &Bytes::from(get)).await;
		let decoded: FileRpcResponse = serde_json::from_slice(&resp).unwrap();
		match decoded {
			FileRpcResponse::File { bytes: Some(bytes) } => assert_eq!(bytes, b"hi"),
			other => panic!("expected the stored file, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn file_rpc_without_a_configured_collaborator_reports_an_error() {
		let resp = dispatch_file_rpc(None, "doc-1", &Bytes::from(serde_json::to_vec(&FileRpcRequest::Get { name: "a".to_string() }).unwrap())).await;
		let decoded: FileRpcResponse = serde_json::from_slice(&resp).unwrap();
		assert!(matches!(decoded, FileRpcResponse::Error { .. }));
	}

	#[tokio::test]
	async fn milestone_rpc_lists_created_milestones() {
		let storage = InMemoryStorage::new();
		let ms = storage.milestone_storage().expect("in-memory storage configures milestone storage");
		ms.create_milestone("doc-1", "first", Bytes::from_static(b"snap")).await.unwrap();

		let list = serde_json::to_vec(&MilestoneRpcRequest::List).unwrap();
		let resp = dispatch_milestone_rpc(Some(ms), "doc-1", &Bytes::from(list), Bytes::new()).await;
		let decoded: MilestoneRpcResponse = serde_json::from_slice(&resp).unwrap();
		match decoded {
			MilestoneRpcResponse::List { milestones } => assert_eq!(milestones.len(), 1),
			other => panic!("expected a milestone list, got {other:?}"),
		}
	}

	#[tokio::test]
	async fn milestone_rpc_create_snapshots_the_supplied_current_state() {
		let storage = InMemoryStorage::new();
		let ms = storage.milestone_storage().expect("in-memory storage configures milestone storage");

		let create = serde_json::to_vec(&MilestoneRpcRequest::Create { name: "launch".to_string() }).unwrap();
		let resp = dispatch_milestone_rpc(Some(ms), "doc-1", &Bytes::from(create), Bytes::from_static(b"current-state")).await;
		let decoded: MilestoneRpcResponse = serde_json::from_slice(&resp).unwrap();
		assert!(matches!(decoded, MilestoneRpcResponse::Created { .. }));
	}
}

// vim: ts=4
