#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![forbid(unsafe_code)]

//! Shared infrastructure for Teleportal's server-side synchronization core:
//! the binary wire codec, the typed message model, the error taxonomy, and
//! the rate limiter. Every other `teleportal-*` crate depends on this one.

pub mod codec;
pub mod error;
pub mod message;
pub mod rate_limit;

pub use error::{Error, TlResult};
pub use message::{AckPayload, AwarenessPayload, DocPayload, Message, MessageId, MessageKind, Payload};
pub use rate_limit::{RateLimitManager, Rule, TrackBy};

// vim: ts=4
