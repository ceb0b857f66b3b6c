//! Replication adapter (§4.I): cross-node fan-out via the pub/sub
//! substrate's `document/<id>` topic.
//!
//! The donor workspace has no direct cross-node replication module — its
//! `ws_broadcast::BroadcastManager` is single-node. This is modeled as a
//! thin consumer of the [`teleportal_pubsub::PubSub`] contract instead,
//! following the rest of the session layer's task-spawn idiom
//! (`document.rs`'s own `tokio::spawn` calls for off-path work like
//! milestone snapshots).
//!
//! Publication is the document session's own responsibility
//! (`DocumentActor::publish_to_other_nodes`, §4.F); this adapter only
//! covers the receive side: subscribing each live document to its topic
//! and feeding inbound frames into the document's replicated-inbound path.
//! The pub/sub contract's own source filtering (`source_id != publisher's`)
//! is what gives Testable Property 5 (no cross-node self-echo) for free —
//! this adapter does not need to de-duplicate its own publications.

use teleportal_pubsub::{document_topic, Handler, PubSub};
use teleportal_session::document::DocumentHandle;
use tracing::debug;

use std::sync::Arc;

#[derive(Clone)]
pub struct ReplicationAdapter {
	pubsub: Arc<dyn PubSub>,
	node_id: String,
}

impl ReplicationAdapter {
	pub fn new(pubsub: Arc<dyn PubSub>, node_id: String) -> Self {
		ReplicationAdapter { pubsub, node_id }
	}

	/// Subscribes `doc`'s topic so frames published by other nodes are fed
	/// into its replicated-inbound path. Call once per document open; the
	/// subscription id is handed back to the document actor itself, which
	/// closes it during its own teardown (§4.F), so a document that reopens
	/// many times over its node's lifetime never accumulates dangling
	/// subscriptions in the pub/sub registry.
	pub fn attach(&self, doc: &DocumentHandle) {
		let topic = document_topic(&doc.id);
		let handler_doc = doc.clone();
		let document_id = doc.id.clone();
		let handler: Handler = Arc::new(move |frame, _source_id| {
			let doc = handler_doc.clone();
			tokio::spawn(async move {
				doc.receive_replicated(frame).await;
			});
			Ok(())
		});

		let pubsub = self.pubsub.clone();
		let node_id = self.node_id.clone();
		let owning_doc = doc.clone();
		tokio::spawn(async move {
			let subscription_id = pubsub.subscribe(&topic, &node_id, handler).await;
			debug!(document_id = %document_id, topic = %topic, "replication adapter subscribed");
			owning_doc.attach_replication_subscription(topic, subscription_id).await;
		});
	}
}

// vim: ts=4
