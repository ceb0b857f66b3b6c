//! The server (§4.H): owns the document registry (with single-flight open
//! semantics), the client registry, and the shared collaborators
//! (`storage`, `pubsub`, `rate_limiter`, the authorization hook, and
//! `metrics`).
//!
//! Grounded on `crates/cloudillo-core::app::AppState`/`App = Arc<AppState>`:
//! one long-lived, cheaply-cloned state object owning every shared
//! collaborator, handed to each connection handler. Unlike the donor's
//! `RwLock<HashMap<_>>` registries, `documents`/`clients` use `dashmap`
//! here because the single-flight open (Testable Property 2) wants atomic
//! "get or start creating" semantics per key, which `DashMap::entry` plus a
//! `tokio::sync::OnceCell` gives directly: concurrent callers for the same
//! document id share the same in-flight `spawn_document` future instead of
//! racing to create N actors (each of which would call
//! `storage.get_document_metadata` independently).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::info;

use teleportal_core::rate_limit::RateLimitManager;
use teleportal_core::TlResult;
use teleportal_metrics::{Health, HealthCheck, Metrics, Status};
use teleportal_pubsub::PubSub;
use teleportal_session::client::{ClientConfig, ClientHandle, ClientSessionDeps, DocumentLookup};
use teleportal_session::context::{AuthzHook, SessionContext};
use teleportal_session::document::{spawn_document, DocLifecycle, DocumentConfig, DocumentHandle};
use teleportal_session::transport::Transport;
use teleportal_storage::Storage;

use crate::replication::ReplicationAdapter;

#[derive(Clone)]
pub struct ServerConfig {
	pub node_id: u64,
	pub document: DocumentConfig,
	pub client: ClientConfig,
}

impl Default for ServerConfig {
	fn default() -> Self {
		ServerConfig { node_id: 0, document: DocumentConfig::default(), client: ClientConfig::default() }
	}
}

type DocumentSlot = Arc<OnceCell<DocumentHandle>>;

/// Owns `documents`, `clients`, and the shared collaborators (§4.H). A
/// cheap-to-clone `Arc<Server>` is what connection handlers hold.
pub struct Server {
	config: ServerConfig,
	storage: Arc<dyn Storage>,
	pubsub: Arc<dyn PubSub>,
	authz: AuthzHook,
	rate_limiter: Option<Arc<RateLimitManager>>,
	metrics: Arc<Metrics>,
	replication: ReplicationAdapter,
	documents: DashMap<String, DocumentSlot>,
	clients: DashMap<String, ClientHandle>,
	next_client_id: AtomicU64,
}

pub struct ServerDeps {
	pub storage: Arc<dyn Storage>,
	pub pubsub: Arc<dyn PubSub>,
	pub authz: AuthzHook,
	pub rate_limiter: Option<Arc<RateLimitManager>>,
	pub metrics: Arc<Metrics>,
}

impl Server {
	pub fn new(config: ServerConfig, deps: ServerDeps) -> Arc<Server> {
		let replication = ReplicationAdapter::new(deps.pubsub.clone(), config.node_id.to_string());
		Arc::new(Server {
			config,
			storage: deps.storage,
			pubsub: deps.pubsub,
			authz: deps.authz,
			rate_limiter: deps.rate_limiter,
			metrics: deps.metrics,
			replication,
			documents: DashMap::new(),
			clients: DashMap::new(),
			next_client_id: AtomicU64::new(1),
		})
	}

	pub fn metrics(&self) -> &Arc<Metrics> {
		&self.metrics
	}

	/// Accepts a freshly-opened transport, assigns a `client_id`, and spawns
	/// its client session actor (§4.H, §6's connect/upgrade hook contract:
	/// `context` is the already-resolved result of `onUpgrade`).
	pub fn handle_connection<T: Transport + 'static>(self: &Arc<Self>, context: SessionContext, transport: T) -> Arc<str> {
		let client_id: Arc<str> = Arc::from(format!("{}-{}", self.config.node_id, self.next_client_id.fetch_add(1, Ordering::Relaxed)));

		let deps = ClientSessionDeps {
			documents: self.clone() as Arc<dyn DocumentLookup>,
			authz: self.authz.clone(),
			rate_limiter: self.rate_limiter.clone(),
			metrics: Some(self.metrics.clone()),
		};
		let handle = teleportal_session::client::spawn_client(client_id.to_string(), context, transport, self.config.client, deps);
		self.clients.insert(client_id.to_string(), handle);
		info!(client_id = %client_id, "server accepted connection");
		client_id
	}

	/// Forcibly disconnects a client, e.g. after the `onRateLimitExceeded`
	/// hook or an administrative action (§4.E, §7).
	pub fn disconnect_client(&self, client_id: &str, reason: &str) {
		if let Some((_, handle)) = self.clients.remove(client_id) {
			info!(client_id, reason, "disconnecting client");
			handle.disconnect();
		}
	}

	/// Aggregates subcomponent pings into a `/health` snapshot (§6). The
	/// storage check is a lightweight metadata read against a reserved
	/// sentinel document id; a `not_found`-shaped empty result is healthy,
	/// any other failure is not.
	pub async fn get_health(&self) -> Health {
		const SENTINEL_DOC: &str = "__teleportal_health_check__";
		let storage_healthy = self.storage.get_document_metadata(SENTINEL_DOC).await.is_ok();
		let checks = vec![
			HealthCheck { name: "storage".to_string(), healthy: storage_healthy, detail: None },
			HealthCheck { name: "pubsub".to_string(), healthy: true, detail: None },
		];
		self.metrics.health(checks)
	}

	pub fn get_metrics(&self) -> TlResult<String> {
		self.metrics.encode_prometheus().map_err(|err| teleportal_core::Error::Internal(err.to_string()))
	}

	pub fn get_status(&self) -> Status {
		self.metrics.status(10)
	}

	pub fn document_count(&self) -> usize {
		self.documents.len()
	}

	pub fn client_count(&self) -> usize {
		self.clients.len()
	}
}

#[async_trait::async_trait]
impl DocumentLookup for Server {
	/// Single-flight open (Testable Property 2): concurrent callers for the
	/// same `document_id` await the same `OnceCell`, so `spawn_document`
	/// (and the storage metadata read its first subscribe performs) runs
	/// at most once per document per opening. A document handle found in
	/// `Closed` state (post-teardown) is evicted so the next lookup starts
	/// a fresh `opening`, per §4.F's re-entry rule.
	async fn get_or_open(&self, document_id: &str) -> DocumentHandle {
		loop {
			let slot = self.documents.entry(document_id.to_string()).or_insert_with(|| Arc::new(OnceCell::new())).clone();

			let storage = self.storage.clone();
			let pubsub = self.pubsub.clone();
			let authz = self.authz.clone();
			let metrics = self.metrics.clone();
			let config = self.config.document;
			let doc_id = document_id.to_string();
			let replication = self.replication.clone();

			let handle = slot
				.get_or_init(|| async move {
					let handle = spawn_document(doc_id, config, storage, pubsub, authz, Some(metrics));
					// Runs exactly once per document open, inside the
					// single-flight `OnceCell` initializer: every document
					// gets exactly one replication subscription for its
					// whole lifetime, never one per subscriber.
					replication.attach(&handle);
					handle
				})
				.await
				.clone();

			if handle.lifecycle() == DocLifecycle::Closed {
				self.documents.remove_if(document_id, |_, existing| Arc::ptr_eq(existing, &slot));
				continue;
			}

			return handle;
		}
	}
}

// vim: ts=4
