#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

//! Counters, gauges, histograms, and health/status snapshots for the
//! synchronization core (§4.J).
//!
//! The donor workspace has no metrics crate (confirmed absent from every
//! `Cargo.toml` in the pack); this is a deliberate, documented ambient-stack
//! addition (see DESIGN.md) rather than a deviation from the donor's
//! dependency stack. `prometheus` supplies the counter/gauge/
//! histogram primitives and `TextEncoder`; everything the `/status` JSON
//! endpoint needs beyond what Prometheus conveniently reads back (message
//! breakdowns, top rate-limit offenders, per-document sizes) is tracked
//! alongside in a small `parking_lot::RwLock<HashMap<_>>` registry, mirroring
//! the donor's own bookkeeping style for short-critical-section maps (see
//! `cloudillo-core::app::AppState`'s `certs`/`acme_challenge_map` fields).

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use prometheus::{Encoder, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};
use serde::Serialize;

pub type MetricsResult<T> = Result<T, prometheus::Error>;

pub struct Metrics {
	registry: Registry,
	documents_opened_total: IntCounter,
	messages_total: IntCounterVec,
	storage_operations_total: IntCounterVec,
	errors_total: IntCounterVec,
	rate_limit_exceeded_total: IntCounterVec,
	clients_active: IntGauge,
	sessions_active: IntGauge,
	document_size_bytes: IntGaugeVec,
	message_duration_seconds: HistogramVec,
	storage_operation_duration_seconds: HistogramVec,

	message_counts: RwLock<HashMap<String, u64>>,
	rate_limit_offenders: RwLock<HashMap<String, u64>>,
	document_sizes: RwLock<HashMap<String, i64>>,
	clients_active_raw: AtomicI64,
	sessions_active_raw: AtomicI64,
	started_at: Instant,
	started_at_utc: DateTime<Utc>,
}

impl Metrics {
	pub fn new() -> MetricsResult<Self> {
		let registry = Registry::new();

		let documents_opened_total =
			IntCounter::new("documents_opened_total", "Total document sessions opened")?;
		let messages_total =
			IntCounterVec::new(Opts::new("messages_total", "Total messages handled, by kind"), &["kind"])?;
		let storage_operations_total = IntCounterVec::new(
			Opts::new("storage_operations_total", "Total storage calls, by operation and result"),
			&["op", "result"],
		)?;
		let errors_total = IntCounterVec::new(Opts::new("errors_total", "Total errors, by kind"), &["kind"])?;
		let rate_limit_exceeded_total = IntCounterVec::new(
			Opts::new("rate_limit_exceeded_total", "Total rate-limit rejections, by track_by"),
			&["track_by"],
		)?;
		let clients_active = IntGauge::new("clients_active", "Currently connected client sessions")?;
		let sessions_active = IntGauge::new("sessions_active", "Currently open document sessions")?;
		let document_size_bytes = IntGaugeVec::new(
			Opts::new("document_size_bytes", "Merged document size in bytes, by document id"),
			&["id"],
		)?;
		let message_duration_seconds = HistogramVec::new(
			prometheus::HistogramOpts::new("message_duration_seconds", "Message handling latency, by kind"),
			&["kind"],
		)?;
		let storage_operation_duration_seconds = HistogramVec::new(
			prometheus::HistogramOpts::new(
				"storage_operation_duration_seconds",
				"Storage call latency, by operation",
			),
			&["op"],
		)?;

		registry.register(Box::new(documents_opened_total.clone()))?;
		registry.register(Box::new(messages_total.clone()))?;
		registry.register(Box::new(storage_operations_total.clone()))?;
		registry.register(Box::new(errors_total.clone()))?;
		registry.register(Box::new(rate_limit_exceeded_total.clone()))?;
		registry.register(Box::new(clients_active.clone()))?;
		registry.register(Box::new(sessions_active.clone()))?;
		registry.register(Box::new(document_size_bytes.clone()))?;
		registry.register(Box::new(message_duration_seconds.clone()))?;
		registry.register(Box::new(storage_operation_duration_seconds.clone()))?;

		Ok(Metrics {
			registry,
			documents_opened_total,
			messages_total,
			storage_operations_total,
			errors_total,
			rate_limit_exceeded_total,
			clients_active,
			sessions_active,
			document_size_bytes,
			message_duration_seconds,
			storage_operation_duration_seconds,
			message_counts: RwLock::new(HashMap::new()),
			rate_limit_offenders: RwLock::new(HashMap::new()),
			document_sizes: RwLock::new(HashMap::new()),
			clients_active_raw: AtomicI64::new(0),
			sessions_active_raw: AtomicI64::new(0),
			started_at: Instant::now(),
			started_at_utc: Utc::now(),
		})
	}

	pub fn record_document_opened(&self) {
		self.documents_opened_total.inc();
	}

	pub fn record_message(&self, kind: &str) {
		self.messages_total.with_label_values(&[kind]).inc();
		*self.message_counts.write().entry(kind.to_string()).or_insert(0) += 1;
	}

	pub fn observe_message_duration(&self, kind: &str, duration: Duration) {
		self.message_duration_seconds.with_label_values(&[kind]).observe(duration.as_secs_f64());
	}

	pub fn record_storage_operation(&self, op: &str, ok: bool, duration: Duration) {
		let result = if ok { "ok" } else { "error" };
		self.storage_operations_total.with_label_values(&[op, result]).inc();
		self.storage_operation_duration_seconds.with_label_values(&[op]).observe(duration.as_secs_f64());
	}

	pub fn record_error(&self, kind: &str) {
		self.errors_total.with_label_values(&[kind]).inc();
	}

	pub fn record_rate_limit_exceeded(&self, track_by: &str, scope: &str) {
		self.rate_limit_exceeded_total.with_label_values(&[track_by]).inc();
		*self.rate_limit_offenders.write().entry(scope.to_string()).or_insert(0) += 1;
	}

	pub fn client_connected(&self) {
		self.clients_active.inc();
		self.clients_active_raw.fetch_add(1, Ordering::Relaxed);
	}

	pub fn client_disconnected(&self) {
		self.clients_active.dec();
		self.clients_active_raw.fetch_sub(1, Ordering::Relaxed);
	}

	pub fn document_opened_gauge(&self) {
		self.sessions_active.inc();
		self.sessions_active_raw.fetch_add(1, Ordering::Relaxed);
	}

	pub fn document_closed_gauge(&self) {
		self.sessions_active.dec();
		self.sessions_active_raw.fetch_sub(1, Ordering::Relaxed);
	}

	pub fn set_document_size(&self, document_id: &str, size_bytes: usize) {
		self.document_size_bytes.with_label_values(&[document_id]).set(size_bytes as i64);
		self.document_sizes.write().insert(document_id.to_string(), size_bytes as i64);
	}

	pub fn remove_document_size(&self, document_id: &str) {
		let _ = self.document_size_bytes.remove_label_values(&[document_id]);
		self.document_sizes.write().remove(document_id);
	}

	/// Encodes the full registry in Prometheus text exposition format.
	pub fn encode_prometheus(&self) -> MetricsResult<String> {
		let families = self.registry.gather();
		let mut buf = Vec::new();
		TextEncoder::new().encode(&families, &mut buf)?;
		String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(e.to_string()))
	}

	pub fn uptime(&self) -> Duration {
		self.started_at.elapsed()
	}

	pub fn started_at(&self) -> DateTime<Utc> {
		self.started_at_utc
	}

	/// Aggregates subcomponent pings into a `/health` snapshot (§6).
	pub fn health(&self, checks: Vec<HealthCheck>) -> Health {
		let status = if checks.iter().all(|c| c.healthy) { "healthy" } else { "unhealthy" };
		Health { status, timestamp: Utc::now(), checks, uptime_seconds: self.uptime().as_secs() }
	}

	/// Assembles a `/status` snapshot: message breakdowns, top rate-limit
	/// offenders, and document size stats (§6).
	pub fn status(&self, top_n: usize) -> Status {
		let message_breakdown = self
			.message_counts
			.read()
			.iter()
			.map(|(kind, count)| MessageBreakdown { kind: kind.clone(), count: *count })
			.collect();

		let mut offenders: Vec<RateLimitOffender> = self
			.rate_limit_offenders
			.read()
			.iter()
			.map(|(scope, count)| RateLimitOffender { scope: scope.clone(), count: *count })
			.collect();
		offenders.sort_by(|a, b| b.count.cmp(&a.count));
		offenders.truncate(top_n);

		let document_sizes = self
			.document_sizes
			.read()
			.iter()
			.map(|(id, size)| DocumentSizeStat { document_id: id.clone(), size_bytes: *size })
			.collect();

		Status {
			timestamp: Utc::now(),
			clients_active: self.clients_active_raw.load(Ordering::Relaxed),
			sessions_active: self.sessions_active_raw.load(Ordering::Relaxed),
			message_breakdown,
			top_rate_limit_offenders: offenders,
			document_sizes,
		}
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthCheck {
	pub name: String,
	pub healthy: bool,
	pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Health {
	pub status: &'static str,
	pub timestamp: DateTime<Utc>,
	pub checks: Vec<HealthCheck>,
	pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageBreakdown {
	pub kind: String,
	pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimitOffender {
	pub scope: String,
	pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentSizeStat {
	pub document_id: String,
	pub size_bytes: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Status {
	pub timestamp: DateTime<Utc>,
	pub clients_active: i64,
	pub sessions_active: i64,
	pub message_breakdown: Vec<MessageBreakdown>,
	pub top_rate_limit_offenders: Vec<RateLimitOffender>,
	pub document_sizes: Vec<DocumentSizeStat>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn prometheus_encoding_includes_registered_metrics() {
		let metrics = Metrics::new().unwrap();
		metrics.record_document_opened();
		metrics.record_message("doc");
		let text = metrics.encode_prometheus().unwrap();
		assert!(text.contains("documents_opened_total"));
		assert!(text.contains("messages_total"));
	}

	#[test]
	fn status_reports_top_rate_limit_offenders_sorted_desc() {
		let metrics = Metrics::new().unwrap();
		metrics.record_rate_limit_exceeded("user", "user:a");
		metrics.record_rate_limit_exceeded("user", "user:a");
		metrics.record_rate_limit_exceeded("user", "user:b");

		let status = metrics.status(10);
		assert_eq!(status.top_rate_limit_offenders[0].scope, "user:a");
		assert_eq!(status.top_rate_limit_offenders[0].count, 2);
	}

	#[test]
	fn health_is_unhealthy_if_any_check_fails() {
		let metrics = Metrics::new().unwrap();
		let health = metrics.health(vec![
			HealthCheck { name: "storage".to_string(), healthy: true, detail: None },
			HealthCheck { name: "pubsub".to_string(), healthy: false, detail: Some("timeout".to_string()) },
		]);
		assert_eq!(health.status, "unhealthy");
	}

	#[test]
	fn gauges_track_connect_disconnect() {
		let metrics = Metrics::new().unwrap();
		metrics.client_connected();
		metrics.client_connected();
		metrics.client_disconnected();
		let status = metrics.status(10);
		assert_eq!(status.clients_active, 1);
	}
}

// vim: ts=4
