//! Teleportal is a storage-, transport-, and runtime-agnostic server and
//! client library for synchronizing CRDT documents (following the Yjs wire
//! model) between many concurrent participants.
//!
//! This facade crate re-exports the synchronization core's component
//! crates under one dependency, the way `crates/cloudillo` re-exports the
//! donor's feature crates (`cloudillo_action as action`, `cloudillo_auth as
//! auth`, ...) behind a single `cloudillo` dependency:
//!
//! - [`core`] — the binary wire codec, message model, error taxonomy, and
//!   rate limiter (§4.A, §4.B, §4.E).
//! - [`pubsub`] — the pub/sub interface and in-memory implementation
//!   (§4.C).
//! - [`storage`] — the storage interface, batching wrapper, and an
//!   in-memory reference adapter (§4.D).
//! - [`session`] — the document session and client session state machines,
//!   the heart of the system (§4.F, §4.G).
//! - [`metrics`] — counters, gauges, histograms, and health/status
//!   snapshots (§4.J).
//! - [`server`] — the document/client registries, single-flight document
//!   open, the replication adapter, and observability HTTP routes (§4.H,
//!   §4.I).
//!
//! # Scope
//!
//! Out of scope for this crate, per §1: concrete transport adapters
//! (WebSocket framers, HTTP+SSE pairing), concrete storage drivers (KV,
//! SQL, object store), and the CRDT algorithm itself. Those are external
//! collaborators consumed through the [`session::Transport`] and
//! [`storage::Storage`] trait seams.

pub use teleportal_core as core;
pub use teleportal_metrics as metrics;
pub use teleportal_pubsub as pubsub;
pub use teleportal_server as server;
pub use teleportal_session as session;
pub use teleportal_storage as storage;

// vim: ts=4
