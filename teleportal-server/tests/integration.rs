//! End-to-end scenarios over a real [`Server`], exercising the Testable
//! Properties from §8 across the client/document/replication seams rather
//! than any single actor in isolation.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use teleportal_core::codec;
use teleportal_core::rate_limit::{RateLimitManager, Rule, TrackBy};
use teleportal_core::{DocPayload, Message, MessageKind, Payload};
use teleportal_metrics::Metrics;
use teleportal_pubsub::InMemoryPubSub;
use teleportal_server::{Server, ServerConfig, ServerDeps};
use teleportal_session::context::{allow_all, SessionContext};
use teleportal_session::transport::in_process::InProcessTransport;
use teleportal_session::transport::Transport;
use teleportal_storage::{InMemoryStorage, Storage};

fn test_server(rate_limiter: Option<Arc<RateLimitManager>>) -> Arc<Server> {
	Server::new(
		ServerConfig::default(),
		ServerDeps {
			storage: Arc::new(InMemoryStorage::new()),
			pubsub: Arc::new(InMemoryPubSub::new()),
			authz: allow_all(),
			rate_limiter,
			metrics: Arc::new(Metrics::new().unwrap()),
		},
	)
}

async fn recv(transport: &mut InProcessTransport) -> Option<Bytes> {
	tokio::time::timeout(Duration::from_millis(500), transport.recv()).await.ok()?.ok()?
}

/// Drains frames off `transport` until one decodes to `kind`, returning it.
/// Panics if none arrives before the timeout, so a missing broadcast fails
/// the test loudly instead of hanging.
async fn recv_kind(transport: &mut InProcessTransport, kind: MessageKind) -> Message {
	loop {
		let frame = recv(transport).await.expect("expected frame before timeout");
		let (message, _) = codec::decode(&frame, usize::MAX).unwrap();
		if message.kind == kind {
			return message;
		}
	}
}

fn update_frame(doc_id: &str, byte: u8) -> Bytes {
	let msg = Message::doc(1, doc_id, false, DocPayload::Update { update: Bytes::copy_from_slice(&[byte]) });
	codec::encode(&msg)
}

fn awareness_frame(doc_id: &str, byte: u8) -> Bytes {
	let msg = Message::awareness(1, doc_id, false, Bytes::copy_from_slice(&[byte]));
	codec::encode(&msg)
}

/// Scenario A (§8): two clients on one document, one update propagates to
/// the other but never echoes back to its own sender.
#[tokio::test]
async fn two_clients_update_propagates_without_self_echo() {
	let server = test_server(None);

	let (mut alice_end, alice_transport) = InProcessTransport::pair();
	let (mut bob_end, bob_transport) = InProcessTransport::pair();
	server.handle_connection(SessionContext::new("alice"), alice_transport);
	server.handle_connection(SessionContext::new("bob"), bob_transport);

	alice_end.send(update_frame("doc-1", 1)).await.unwrap();
	let _alice_sync1 = recv_kind(&mut alice_end, MessageKind::Doc).await;

	bob_end.send(update_frame("doc-1", 2)).await.unwrap();
	let _bob_sync1 = recv_kind(&mut bob_end, MessageKind::Doc).await;

	alice_end.send(update_frame("doc-1", 3)).await.unwrap();

	let ack = recv_kind(&mut alice_end, MessageKind::Ack).await;
	assert_eq!(ack.document, "doc-1");

	let forwarded = recv_kind(&mut bob_end, MessageKind::Doc).await;
	match forwarded.payload {
		Payload::Doc(DocPayload::Update { update }) => assert_eq!(update.as_ref(), &[3]),
		other => panic!("expected an update forwarded to bob, got {other:?}"),
	}

	// Alice must never see her own update echoed back as a Doc::Update
	// frame (only her Ack); give the actor a moment to misbehave, then
	// confirm nothing else arrived.
	assert!(recv(&mut alice_end).await.is_none(), "alice should not receive her own update back");
}

/// Scenario B (§8): a late joiner receives sync-step-1 against the
/// document's current state vector as soon as it subscribes.
#[tokio::test]
async fn late_joiner_receives_sync_step1_on_subscribe() {
	let server = test_server(None);

	let (mut first_end, first_transport) = InProcessTransport::pair();
	server.handle_connection(SessionContext::new("alice"), first_transport);
	first_end.send(update_frame("doc-1", 9)).await.unwrap();
	let _sync1 = recv_kind(&mut first_end, MessageKind::Doc).await;
	let _ack = recv_kind(&mut first_end, MessageKind::Ack).await;

	let (mut late_end, late_transport) = InProcessTransport::pair();
	server.handle_connection(SessionContext::new("carol"), late_transport);
	late_end.send(update_frame("doc-1", 0)).await.unwrap();

	let sync1 = recv_kind(&mut late_end, MessageKind::Doc).await;
	match sync1.payload {
		Payload::Doc(DocPayload::SyncStep1 { .. }) => {}
		other => panic!("expected sync-step-1 on subscribe, got {other:?}"),
	}
}

/// Scenario C (§8): a client that trips a rate-limit rule is disconnected
/// and the rejection is counted exactly once.
#[tokio::test]
async fn rate_limited_client_is_disconnected() {
	let rule = Rule { id: "default".to_string(), max_messages: 2, window_ms: 1_000, track_by: TrackBy::User };
	let limiter = Arc::new(RateLimitManager::new(vec![rule], 1 << 20));
	let server = test_server(Some(limiter));

	let (mut client_end, transport) = InProcessTransport::pair();
	server.handle_connection(SessionContext::new("dave"), transport);

	for byte in 0..3u8 {
		client_end.send(update_frame("doc-1", byte)).await.unwrap();
	}

	let mut disconnected = false;
	for _ in 0..6 {
		let Some(frame) = recv(&mut client_end).await else { break };
		let Ok((message, _)) = codec::decode(&frame, usize::MAX) else { continue };
		if let Payload::Doc(DocPayload::AuthFail { reason }) = message.payload {
			assert_eq!(reason, "E-CORE-RATELIMIT");
			disconnected = true;
			break;
		}
	}
	assert!(disconnected, "expected the 3rd message within the window to trip the rate limit");
	assert_eq!(server.metrics().status(1).top_rate_limit_offenders.len(), 1);
}

/// Scenario D (§8): an oversized frame is rejected before its body is
/// decoded and the connection is closed.
#[tokio::test]
async fn oversized_frame_is_rejected_before_decode() {
	let limiter = Arc::new(RateLimitManager::new(vec![], 8));
	let server = test_server(Some(limiter));

	let (mut client_end, transport) = InProcessTransport::pair();
	server.handle_connection(SessionContext::new("erin"), transport);

	client_end.send(update_frame("doc-1", 1)).await.unwrap();

	let frame = recv(&mut client_end).await.expect("expected a disconnect frame");
	let (message, _) = codec::decode(&frame, usize::MAX).unwrap();
	match message.payload {
		Payload::Doc(DocPayload::AuthFail { reason }) => assert_eq!(reason, "E-CODEC-TOOLARGE"),
		other => panic!("expected a too-large disconnect, got {other:?}"),
	}
	assert!(recv(&mut client_end).await.is_none(), "connection should be closed after the size violation");
}

/// Scenario E (§8): two nodes sharing one pub/sub substrate fan an update
/// out to a subscriber on the other node, without that node re-persisting
/// the update against its own storage (replicated frames skip persist).
#[tokio::test]
async fn cross_node_update_fans_out_without_local_persist() {
	let pubsub = Arc::new(InMemoryPubSub::new());
	let node1_storage = Arc::new(InMemoryStorage::new());
	let node2_storage = Arc::new(InMemoryStorage::new());

	let node1 = Server::new(
		ServerConfig { node_id: 1, ..ServerConfig::default() },
		ServerDeps { storage: node1_storage.clone(), pubsub: pubsub.clone(), authz: allow_all(), rate_limiter: None, metrics: Arc::new(Metrics::new().unwrap()) },
	);
	let node2 = Server::new(
		ServerConfig { node_id: 2, ..ServerConfig::default() },
		ServerDeps { storage: node2_storage.clone(), pubsub: pubsub.clone(), authz: allow_all(), rate_limiter: None, metrics: Arc::new(Metrics::new().unwrap()) },
	);

	let (mut n1_end, n1_transport) = InProcessTransport::pair();
	server_handle(&node1, "alice", n1_transport, &mut n1_end).await;

	let (mut n2_end, n2_transport) = InProcessTransport::pair();
	server_handle(&node2, "bob", n2_transport, &mut n2_end).await;

	n1_end.send(update_frame("shared-doc", 42)).await.unwrap();
	let _ack = recv_kind(&mut n1_end, MessageKind::Ack).await;

	let forwarded = recv_kind(&mut n2_end, MessageKind::Doc).await;
	match forwarded.payload {
		Payload::Doc(DocPayload::Update { update }) => assert_eq!(update.as_ref(), &[42]),
		other => panic!("expected the update to fan out to node 2's subscriber, got {other:?}"),
	}

	assert!(node2_storage.get_document("shared-doc").await.unwrap().is_none(), "a replicated update must not be persisted again on the receiving node");
	assert!(node1_storage.get_document("shared-doc").await.unwrap().is_some(), "the originating node must have persisted the update once");
}

/// Scenario F: a `file-rpc` request round-trips through a live server
/// connection and the response comes back only to the requester, never
/// broadcast to other subscribers of the same document.
#[tokio::test]
async fn file_rpc_round_trips_through_a_live_connection() {
	let server = test_server(None);

	let (mut alice_end, alice_transport) = InProcessTransport::pair();
	let (mut bob_end, bob_transport) = InProcessTransport::pair();
	server.handle_connection(SessionContext::new("alice"), alice_transport);
	server.handle_connection(SessionContext::new("bob"), bob_transport);

	alice_end.send(update_frame("doc-1", 1)).await.unwrap();
	let _alice_sync1 = recv_kind(&mut alice_end, MessageKind::Doc).await;
	bob_end.send(update_frame("doc-1", 2)).await.unwrap();
	let _bob_sync1 = recv_kind(&mut bob_end, MessageKind::Doc).await;
	let _ack = recv_kind(&mut alice_end, MessageKind::Ack).await;
	let _forwarded = recv_kind(&mut bob_end, MessageKind::Doc).await;

	let put = serde_json::to_vec(&teleportal_storage::rpc::FileRpcRequest::Put { name: "notes.txt".to_string(), bytes: b"hello".to_vec() }).unwrap();
	let msg = Message::file_rpc(1, "doc-1", Bytes::from(put));
	alice_end.send(codec::encode(&msg)).await.unwrap();

	let reply = recv_kind(&mut alice_end, MessageKind::FileRpc).await;
	match reply.payload {
		Payload::FileRpc { body } => {
			let decoded: teleportal_storage::rpc::FileRpcResponse = serde_json::from_slice(&body).unwrap();
			assert!(matches!(decoded, teleportal_storage::rpc::FileRpcResponse::Ok));
		}
		other => panic!("expected a file-rpc reply, got {other:?}"),
	}

	// Bob must never see alice's file-rpc reply.
	assert!(recv(&mut bob_end).await.is_none(), "file-rpc responses must only reach the requester");
}

/// Subscribes a freshly connected transport to `shared-doc` and drains its
/// sync-step-1, so later assertions only see the frames under test. Uses an
/// awareness frame to trigger the subscribe, since (unlike an update) it is
/// never persisted and so can't contaminate the persistence assertions.
async fn server_handle(server: &Arc<Server>, user: &str, transport: InProcessTransport, end: &mut InProcessTransport) {
	server.handle_connection(SessionContext::new(user), transport);
	end.send(awareness_frame("shared-doc", 0)).await.unwrap();
	let _sync1 = recv_kind(end, MessageKind::Doc).await;
}

// vim: ts=4
