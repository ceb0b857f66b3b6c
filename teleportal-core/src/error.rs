//! Error taxonomy for the synchronization core.
//!
//! Every fallible operation in `teleportal-*` returns [`TlResult<T>`]. Each
//! [`Error`] variant carries a stable `code()` string (for logs and wire
//! disconnect frames) and a `kind()` discriminant matching the taxonomy the
//! rest of the core dispatches on. No variant carries a stack trace; none is
//! ever sent to a client beyond its code and message.

pub type TlResult<T> = std::result::Result<T, Error>;

/// Discriminant used by callers that need to branch on error class without
/// matching the full `Error` enum (e.g. the metrics `errors_total{kind}`
/// counter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	MalformedFrame,
	Unauthorized,
	RateLimited,
	SizeExceeded,
	EncryptionMismatch,
	StorageError,
	PubsubError,
	SlowConsumer,
	Internal,
}

impl ErrorKind {
	pub fn as_str(self) -> &'static str {
		match self {
			ErrorKind::MalformedFrame => "malformed_frame",
			ErrorKind::Unauthorized => "unauthorized",
			ErrorKind::RateLimited => "rate_limited",
			ErrorKind::SizeExceeded => "size_exceeded",
			ErrorKind::EncryptionMismatch => "encryption_mismatch",
			ErrorKind::StorageError => "storage_error",
			ErrorKind::PubsubError => "pubsub_error",
			ErrorKind::SlowConsumer => "slow_consumer",
			ErrorKind::Internal => "internal",
		}
	}
}

/// Storage-specific failure, nested inside [`Error::Storage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageErrorKind {
	IoError,
	Timeout,
	Conflict,
	NotFound,
}

#[derive(Debug)]
pub enum Error {
	/// Codec rejected an inbound frame: length mismatch, unknown kind,
	/// non-UTF8 document id, or oversized subpayload.
	MalformedFrame(String),
	/// The authorization hook denied a message.
	Unauthorized,
	/// A rate-limit rule tripped for the given scope.
	RateLimited { rule: String, scope: String },
	/// A frame (or sub-payload) exceeded the configured size limit.
	SizeExceeded,
	/// A message's `encrypted` flag contradicted the document's established
	/// encryption state, in either direction.
	EncryptionMismatch,
	/// The storage collaborator failed.
	Storage(StorageErrorKind),
	/// The pub/sub collaborator failed. Never fails the local write path;
	/// logged and counted only.
	Pubsub(String),
	/// A client's outbound queue stayed over its high-water mark past the
	/// grace period.
	SlowConsumer,
	/// Bug class: an internal invariant was violated. Logged with a
	/// correlation id; never detailed to the client.
	Internal(String),
}

impl Error {
	pub fn kind(&self) -> ErrorKind {
		match self {
			Error::MalformedFrame(_) => ErrorKind::MalformedFrame,
			Error::Unauthorized => ErrorKind::Unauthorized,
			Error::RateLimited { .. } => ErrorKind::RateLimited,
			Error::SizeExceeded => ErrorKind::SizeExceeded,
			Error::EncryptionMismatch => ErrorKind::EncryptionMismatch,
			Error::Storage(_) => ErrorKind::StorageError,
			Error::Pubsub(_) => ErrorKind::PubsubError,
			Error::SlowConsumer => ErrorKind::SlowConsumer,
			Error::Internal(_) => ErrorKind::Internal,
		}
	}

	/// Stable machine-readable code, in the donor's `E-<AREA>-<REASON>`
	/// style, used both for logging and for the disconnect reason sent to
	/// clients.
	pub fn code(&self) -> &'static str {
		match self {
			Error::MalformedFrame(_) => "E-CODEC-MALFORMED",
			Error::Unauthorized => "E-AUTH-DENIED",
			Error::RateLimited { .. } => "E-CORE-RATELIMIT",
			Error::SizeExceeded => "E-CODEC-TOOLARGE",
			Error::EncryptionMismatch => "E-DOC-ENCMISMATCH",
			Error::Storage(StorageErrorKind::IoError) => "E-STORE-IO",
			Error::Storage(StorageErrorKind::Timeout) => "E-STORE-TIMEOUT",
			Error::Storage(StorageErrorKind::Conflict) => "E-STORE-CONFLICT",
			Error::Storage(StorageErrorKind::NotFound) => "E-STORE-NOTFOUND",
			Error::Pubsub(_) => "E-PUBSUB-FAIL",
			Error::SlowConsumer => "E-CLIENT-SLOWCONSUMER",
			Error::Internal(_) => "E-CORE-INTERNAL",
		}
	}

	/// Human-readable message safe to send to a client alongside `code()`.
	/// Never includes internal detail (file paths, backend error text).
	pub fn client_message(&self) -> String {
		match self {
			Error::MalformedFrame(reason) => format!("malformed frame: {reason}"),
			Error::Unauthorized => "not authorized".to_string(),
			Error::RateLimited { rule, .. } => format!("rate limit exceeded: {rule}"),
			Error::SizeExceeded => "message too large".to_string(),
			Error::EncryptionMismatch => "encryption mismatch".to_string(),
			Error::Storage(_) => "storage unavailable".to_string(),
			Error::Pubsub(_) => "replication unavailable".to_string(),
			Error::SlowConsumer => "disconnected: slow consumer".to_string(),
			Error::Internal(_) => "internal error".to_string(),
		}
	}

	/// Whether this error class disconnects the originating client session,
	/// per the propagation policy in §7.
	pub fn disconnects_client(&self) -> bool {
		!matches!(self, Error::Storage(_) | Error::Pubsub(_))
	}
}

impl std::fmt::Display for Error {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{} ({})", self.client_message(), self.code())
	}
}

impl std::error::Error for Error {}

/// Poison-safe mutex/rwlock locking, mirroring the donor's `lock!` macro:
/// a poisoned lock is an internal invariant violation, not a panic.
#[macro_export]
macro_rules! lock {
	($mutex:expr) => {
		$mutex
			.lock()
			.map_err(|_| $crate::error::Error::Internal("mutex poisoned".into()))
	};
	($mutex:expr, $context:expr) => {
		$mutex
			.lock()
			.map_err(|_| $crate::error::Error::Internal(format!("mutex poisoned: {}", $context)))
	};
}

// vim: ts=4
