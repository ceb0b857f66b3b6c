//! Shared connection context (§3, §6).
//!
//! Produced once by the `onUpgrade` hook and carried, read-only, through a
//! client session's lifetime; document sessions see a clone per message.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use teleportal_core::Message;

/// Auth + tenant info resolved by the connect/upgrade hook, carried through
/// the client session and passed to the authorization hook on every
/// non-control message.
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
	pub user_id: String,
	pub attributes: HashMap<String, String>,
}

impl SessionContext {
	pub fn new(user_id: impl Into<String>) -> Self {
		SessionContext { user_id: user_id.into(), attributes: HashMap::new() }
	}
}

/// `checkPermission(context, message) -> boolean` (§6). Must be
/// non-blocking or fast; invoked for every inbound non-control message.
pub type AuthzHook = Arc<dyn Fn(&SessionContext, &Message) -> BoxFuture<'static, bool> + Send + Sync>;

/// An authorization hook that allows everything, for tests and
/// deployments that enforce permission elsewhere (e.g. at the transport
/// boundary).
pub fn allow_all() -> AuthzHook {
	Arc::new(|_ctx, _msg| Box::pin(async { true }))
}

// vim: ts=4
