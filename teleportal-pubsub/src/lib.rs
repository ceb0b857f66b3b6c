#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

//! PubSub interface and in-memory implementation (§4.C).
//!
//! Grounded on `cloudillo-core::ws_broadcast::BroadcastManager`: a registry
//! of handlers keyed by address (there, per-user; here, per-topic), fanned
//! out with per-handler failure isolation so one lagging or erroring
//! subscriber never blocks delivery to the rest. The topic vocabulary used
//! by the synchronization core is `document/<id>` for updates and, only
//! when a deployment opts in, `ack/<client_id>` for cross-node ack delivery
//! (see DESIGN.md's Open Question resolution).

mod memory;

pub use memory::InMemoryPubSub;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use teleportal_core::TlResult;

pub const TOPIC_DOCUMENT_PREFIX: &str = "document/";
pub const TOPIC_ACK_PREFIX: &str = "ack/";

pub fn document_topic(document_id: &str) -> String {
	format!("{TOPIC_DOCUMENT_PREFIX}{document_id}")
}

pub fn ack_topic(client_id: &str) -> String {
	format!("{TOPIC_ACK_PREFIX}{client_id}")
}

/// A subscription handler: invoked with the published payload and the
/// publisher's `source_id` for every subscriber whose own `source_id`
/// differs from the publisher's. A handler error is logged and isolated;
/// it never prevents delivery to other subscribers of the same topic.
pub type Handler = Arc<dyn Fn(Bytes, &str) -> TlResult<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Topic-based fan-out with source filtering. External implementations
/// (redis, nats, ...) fulfill the same contract: delivery is at-least-once
/// and may reorder across topics, never within a single document's topic.
#[async_trait]
pub trait PubSub: Send + Sync {
	async fn subscribe(&self, topic: &str, source_id: &str, handler: Handler) -> SubscriptionId;
	async fn unsubscribe(&self, topic: &str, id: SubscriptionId);
	async fn publish(&self, topic: &str, payload: Bytes, source_id: &str);
	async fn destroy(&self);
}

// vim: ts=4
