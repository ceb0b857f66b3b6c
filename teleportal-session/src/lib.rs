#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

//! Document session and client session state machines (§4.F, §4.G): the
//! per-document and per-connection coordinators at the heart of the
//! synchronization core.

pub mod client;
pub mod context;
pub mod document;
pub mod transport;

pub use client::{ClientConfig, ClientHandle, ClientSessionDeps, DocumentLookup};
pub use context::{AuthzHook, SessionContext};
pub use document::{spawn_document, ClientSink, DocLifecycle, DocumentConfig, DocumentHandle};
pub use transport::Transport;

// vim: ts=4
