//! Observability HTTP routes (§6): `GET /health`, `GET /metrics`,
//! `GET /status`.
//!
//! Grounded on the donor's `axum::Router<App>` assembly style
//! (`server/src/routes.rs`'s `init_protected_routes`/`init_public_routes`
//! taking `App = Arc<AppState>` as router state) generalized to this
//! crate's own `Arc<Server>` state type.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};

use crate::server::Server;

pub fn router(server: Arc<Server>) -> Router {
	Router::new()
		.route("/health", get(get_health))
		.route("/metrics", get(get_metrics))
		.route("/status", get(get_status))
		.with_state(server)
}

async fn get_health(State(server): State<Arc<Server>>) -> impl IntoResponse {
	let health = server.get_health().await;
	let status = if health.status == "healthy" { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
	(status, Json(health))
}

async fn get_metrics(State(server): State<Arc<Server>>) -> Response {
	match server.get_metrics() {
		Ok(text) => ([("content-type", "text/plain; version=0.0.4")], text).into_response(),
		Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
	}
}

async fn get_status(State(server): State<Arc<Server>>) -> impl IntoResponse {
	Json(server.get_status())
}

// vim: ts=4
