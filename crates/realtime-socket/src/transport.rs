#[cfg(any(test, feature = "inmem"))]
mod memory;
mod websocket;

#[cfg(any(test, feature = "inmem"))]
pub use memory::{MemoryConnector, MemoryListener, MemoryPeer};
pub use websocket::WebSocketConnector;

use futures::{Sink, Stream};
use std::pin::Pin;
use thiserror::Error;

/// Transport-level failures. Everything except `Unauthorized` is treated as transient.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
	#[error("connection refused: {0}")]
	Refused(String),

	#[error("server rejected the upgrade with status {0}")]
	Unauthorized(u16),

	#[error("transport closed")]
	Closed,

	#[error("websocket error: {0}")]
	WebSocket(String),
}

impl TransportError {
	pub const fn is_auth_rejection(&self) -> bool {
		matches!(self, Self::Unauthorized(_))
	}
}

pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// One open text-frame link to the server.
pub struct Link {
	pub sink: FrameSink,
	pub stream: FrameStream,
}

impl Link {
	pub fn new(sink: FrameSink, stream: FrameStream) -> Self {
		Self { sink, stream }
	}
}

impl std::fmt::Debug for Link {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Link").finish_non_exhaustive()
	}
}

/// Opens links to the real-time server. The only place a transport is constructed.
#[async_trait::async_trait]
pub trait Connector: Send + Sync + 'static {
	async fn connect(&self, endpoint: &str) -> Result<Link, TransportError>;
}
