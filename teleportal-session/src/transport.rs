//! The `Transport` seam (§6): a byte-framed duplex connection, abstracted
//! away from any specific wire protocol (WebSocket, QUIC stream, in-process
//! pipe). A client session owns one `Transport` for its whole lifetime.
//!
//! Grounded on `server/src/core/ws_bus.rs`'s `handle_bus_connection`, which
//! takes an already-split `WebSocket` and loops on `ws_receiver.next()` /
//! `ws_sender.send()`; generalized here to a trait so the session state
//! machine never names `axum::extract::ws` directly.

use async_trait::async_trait;
use bytes::Bytes;
use teleportal_core::TlResult;

/// A framed duplex byte transport. Each `recv`/`send` call exchanges one
/// whole wire frame (already length-delimited by the caller; the transport
/// itself does not need to re-frame — a WebSocket message *is* a frame).
#[async_trait]
pub trait Transport: Send {
	/// Waits for the next inbound frame. `Ok(None)` means the peer closed
	/// the connection cleanly; `Err` means the transport broke.
	async fn recv(&mut self) -> TlResult<Option<Bytes>>;

	/// Sends one outbound frame.
	async fn send(&mut self, frame: Bytes) -> TlResult<()>;

	/// Best-effort close; never required to succeed.
	async fn close(&mut self);
}

/// An in-process transport for tests: a pair of bounded channels standing
/// in for a socket. `InProcessTransport::pair()` returns the two ends.
pub mod in_process {
	use super::{async_trait, Bytes, Transport, TlResult};
	use teleportal_core::Error;
	use tokio::sync::mpsc;

	pub struct InProcessTransport {
		tx: Option<mpsc::Sender<Bytes>>,
		rx: mpsc::Receiver<Bytes>,
	}

	impl InProcessTransport {
		/// Builds a connected pair; frames sent on one side arrive via `recv`
		/// on the other.
		pub fn pair() -> (InProcessTransport, InProcessTransport) {
			let (a_tx, a_rx) = mpsc::channel(64);
			let (b_tx, b_rx) = mpsc::channel(64);
			(InProcessTransport { tx: Some(b_tx), rx: a_rx }, InProcessTransport { tx: Some(a_tx), rx: b_rx })
		}
	}

	#[async_trait]
	impl Transport for InProcessTransport {
		async fn recv(&mut self) -> TlResult<Option<Bytes>> {
			Ok(self.rx.recv().await)
		}

		async fn send(&mut self, frame: Bytes) -> TlResult<()> {
			match &self.tx {
				Some(tx) => tx.send(frame).await.map_err(|_| Error::Internal("peer transport closed".to_string())),
				None => Err(Error::Internal("transport already closed".to_string())),
			}
		}

		async fn close(&mut self) {
			self.tx = None;
		}
	}
}

// vim: ts=4
