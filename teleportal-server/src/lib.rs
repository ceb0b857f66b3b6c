#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

//! The server (§4.H), the replication adapter (§4.I), and the
//! observability HTTP routes that expose §4.J's metrics and health
//! snapshots (§6).
//!
//! This is the assembly point of the synchronization core: it owns no
//! protocol logic of its own (that lives in `teleportal-session`) and no
//! storage/pub-sub logic of its own (those live in `teleportal-storage`/
//! `teleportal-pubsub`); it wires the collaborators together behind a
//! single-flight document registry and a client registry, the way
//! `crates/cloudillo-core::app::AppState` assembles the donor's adapters
//! behind one `Arc<AppState>`.

pub mod replication;
pub mod routes;
pub mod server;

pub use replication::ReplicationAdapter;
pub use server::{Server, ServerConfig, ServerDeps};

// vim: ts=4
