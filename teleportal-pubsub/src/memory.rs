//! In-memory [`PubSub`] implementation, single-process, single-node.
//!
//! Kept intentionally simple: a `topic -> subscribers` map guarded by a
//! `parking_lot::RwLock` (matching the donor's use of `parking_lot` for
//! similar short-critical-section registries in `cloudillo-core::app`).
//! Publication holds only a read lock while iterating the topic's
//! subscriber list, matching the server-level locking discipline of §5:
//! no lock is held across a suspension point, and handlers here are
//! synchronous callbacks, not awaited futures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tracing::warn;

use crate::{Handler, PubSub, SubscriptionId};

struct Subscriber {
	id: u64,
	source_id: String,
	handler: Handler,
}

#[derive(Default)]
pub struct InMemoryPubSub {
	topics: RwLock<HashMap<String, Vec<Subscriber>>>,
	next_id: AtomicU64,
}

impl InMemoryPubSub {
	pub fn new() -> Self {
		InMemoryPubSub::default()
	}
}

#[async_trait]
impl PubSub for InMemoryPubSub {
	async fn subscribe(&self, topic: &str, source_id: &str, handler: Handler) -> SubscriptionId {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let mut topics = self.topics.write();
		topics.entry(topic.to_string()).or_default().push(Subscriber {
			id,
			source_id: source_id.to_string(),
			handler,
		});
		SubscriptionId(id)
	}

	async fn unsubscribe(&self, topic: &str, id: SubscriptionId) {
		let mut topics = self.topics.write();
		if let Some(subs) = topics.get_mut(topic) {
			subs.retain(|s| s.id != id.0);
			if subs.is_empty() {
				topics.remove(topic);
			}
		}
	}

	async fn publish(&self, topic: &str, payload: Bytes, source_id: &str) {
		// Snapshot under a read lock; handler invocation itself happens
		// outside any lock on `self.topics` apart from holding the read
		// guard for the duration of this synchronous fan-out (no
		// suspension points occur while it is held).
		let topics = self.topics.read();
		let Some(subs) = topics.get(topic) else { return };
		for sub in subs {
			if sub.source_id == source_id {
				continue;
			}
			if let Err(err) = (sub.handler)(payload.clone(), source_id) {
				warn!(topic, subscriber = sub.id, %err, "pubsub handler failed, continuing delivery to others");
			}
		}
	}

	async fn destroy(&self) {
		self.topics.write().clear();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::AtomicUsize;
	use std::sync::Arc;
	use teleportal_core::Error;

	fn counting_handler(counter: Arc<AtomicUsize>) -> Handler {
		Arc::new(move |_payload, _source| {
			counter.fetch_add(1, Ordering::SeqCst);
			Ok(())
		})
	}

	#[tokio::test]
	async fn excludes_the_publisher_own_source_id() {
		let pubsub = InMemoryPubSub::new();
		let received = Arc::new(AtomicUsize::new(0));
		pubsub.subscribe("document/doc-1", "node-a", counting_handler(received.clone())).await;

		pubsub.publish("document/doc-1", Bytes::from_static(b"x"), "node-a").await;
		assert_eq!(received.load(Ordering::SeqCst), 0, "publisher must not receive its own publication");

		pubsub.publish("document/doc-1", Bytes::from_static(b"x"), "node-b").await;
		assert_eq!(received.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn delivers_to_all_other_subscribers() {
		let pubsub = InMemoryPubSub::new();
		let a = Arc::new(AtomicUsize::new(0));
		let b = Arc::new(AtomicUsize::new(0));
		pubsub.subscribe("document/doc-1", "client-a", counting_handler(a.clone())).await;
		pubsub.subscribe("document/doc-1", "client-b", counting_handler(b.clone())).await;

		pubsub.publish("document/doc-1", Bytes::from_static(b"x"), "client-a").await;

		assert_eq!(a.load(Ordering::SeqCst), 0);
		assert_eq!(b.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn one_handler_error_does_not_block_delivery_to_others() {
		let pubsub = InMemoryPubSub::new();
		let ok_count = Arc::new(AtomicUsize::new(0));
		let failing: Handler = Arc::new(|_p, _s| Err(Error::Internal("boom".to_string())));
		pubsub.subscribe("document/doc-1", "client-a", failing).await;
		pubsub.subscribe("document/doc-1", "client-b", counting_handler(ok_count.clone())).await;

		pubsub.publish("document/doc-1", Bytes::from_static(b"x"), "publisher").await;

		assert_eq!(ok_count.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn unsubscribe_stops_delivery() {
		let pubsub = InMemoryPubSub::new();
		let count = Arc::new(AtomicUsize::new(0));
		let id = pubsub.subscribe("document/doc-1", "client-a", counting_handler(count.clone())).await;
		pubsub.unsubscribe("document/doc-1", id).await;

		pubsub.publish("document/doc-1", Bytes::from_static(b"x"), "someone-else").await;
		assert_eq!(count.load(Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn destroy_clears_all_topics() {
		let pubsub = InMemoryPubSub::new();
		let count = Arc::new(AtomicUsize::new(0));
		pubsub.subscribe("document/doc-1", "client-a", counting_handler(count.clone())).await;
		pubsub.destroy().await;

		pubsub.publish("document/doc-1", Bytes::from_static(b"x"), "someone-else").await;
		assert_eq!(count.load(Ordering::SeqCst), 0);
	}
}

// vim: ts=4
