//! Reference binary: assembles the in-memory reference [`Storage`] and
//! [`PubSub`] implementations behind a [`Server`] and serves the
//! observability routes over HTTP.
//!
//! Grounded on `basic-server/src/main.rs`'s role in the donor workspace: a
//! thin composition root that wires concrete adapters into the library
//! crate and calls its `run`-shaped entry point. Concrete transports
//! (WebSocket framing, HTTP long-poll) are out of this core's scope per
//! §1; this binary only demonstrates the observability surface that *is*
//! in scope.

use std::env;
use std::sync::Arc;

use teleportal_core::rate_limit::{RateLimitManager, Rule, TrackBy};
use teleportal_metrics::Metrics;
use teleportal_pubsub::InMemoryPubSub;
use teleportal_server::{Server, ServerConfig, ServerDeps};
use teleportal_session::context::allow_all;
use teleportal_storage::{BatchConfig, BatchingStorage, InMemoryStorage};

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).with_target(false).init();

	let listen = env::var("TELEPORTAL_LISTEN").unwrap_or_else(|_| "127.0.0.1:8787".to_string());

	let storage = Arc::new(InMemoryStorage::new());
	let batching = Arc::new(BatchingStorage::new(storage, BatchConfig::default()));
	batching.spawn_flush_timer();

	let rate_limiter = Arc::new(RateLimitManager::new(
		vec![Rule { id: "default".to_string(), max_messages: 200, window_ms: 1_000, track_by: TrackBy::User }],
		1 << 20,
	));

	let metrics = match Metrics::new() {
		Ok(m) => Arc::new(m),
		Err(err) => {
			tracing::error!(%err, "failed to initialize metrics registry");
			return;
		}
	};

	let server = Server::new(
		ServerConfig::default(),
		ServerDeps {
			storage: batching,
			pubsub: Arc::new(InMemoryPubSub::new()),
			authz: allow_all(),
			rate_limiter: Some(rate_limiter),
			metrics,
		},
	);

	let router = teleportal_server::routes::router(server);
	let listener = match tokio::net::TcpListener::bind(&listen).await {
		Ok(l) => l,
		Err(err) => {
			tracing::error!(%err, listen, "failed to bind observability listener");
			return;
		}
	};
	tracing::info!(listen, "teleportal observability endpoints listening");
	if let Err(err) = axum::serve(listener, router).await {
		tracing::error!(%err, "server exited with error");
	}
}

// vim: ts=4
