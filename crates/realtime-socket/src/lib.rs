//! # realtime-socket
//!
//! One shared, authenticated Socket.IO channel per process.
//!
//! ## Overview
//!
//! [`SocketManager`] owns at most one [`Connection`]. It is created only when
//! a session credential is available, re-uses itself for every caller, and is
//! released by [`SocketManager::teardown`]. Around it:
//!
//! - **Credential gating**: no credential means no connection attempt; a
//!   missing credential is re-checked once after a short delay.
//! - **Bounded reconnection**: a dropped link is retried a fixed number of
//!   times at a fixed delay, then the session is marked failed and the user
//!   is told the connection was lost.
//! - **Auth rejection is terminal**: the user is told their session expired
//!   and is sent back to login after a delay. Nothing is retried.
//! - **Pub/sub**: `emit` publishes only while connected; `on`/`subscribe`
//!   register listeners on the current Connection.
//!
//! ## Known Limitations
//!
//! Subscriptions live in the Connection's registry. They survive automatic
//! reconnects but not teardown followed by a new `initialize`; consumers must
//! register again on the new Connection.

mod config;
mod connection;
mod context;
mod credential;
mod handshake;
mod manager;
mod notifier;
mod protocol;
mod retry;
mod state;
mod subscription;
mod transport;

use std::time::Duration;
use thiserror::Error;

pub use config::{ConfigError, CredentialRetry, ReconnectConfig, SocketConfig, DEFAULT_COOKIE_NAME, DEFAULT_URL};
pub use connection::{events, Connection, ConnectionHandle, ConnectionId};
pub use context::{global, install};
pub use credential::{find_cookie, CookieCredentials, Credential, CredentialSource, EnvCredentials, SharedCredential};
pub use handshake::{HandshakeError, Session};
pub use manager::{InitOutcome, SocketManager, SocketManagerBuilder};
pub use notifier::{Notice, SessionNotifier, TracingNotifier};
pub use protocol::{collapse_args, EnginePacket, OpenInfo, ProtocolError, SocketPacket, DEFAULT_NAMESPACE};
pub use retry::BoundedRetry;
pub use state::{ConnectionState, DisconnectReason, FailureReason, StateError, StateTransition};
pub use subscription::{Callback, EventStream, SubscriptionId, SubscriptionRegistry};
pub use transport::{Connector, FrameSink, FrameStream, Link, TransportError, WebSocketConnector};
#[cfg(any(test, feature = "inmem"))]
pub use transport::{MemoryConnector, MemoryListener, MemoryPeer};

/// Errors for realtime-socket crate
#[derive(Debug, Error)]
pub enum RealtimeError {
	#[error("Configuration error: {0}")]
	Config(#[from] ConfigError),

	#[error("Not connected")]
	NotConnected,

	#[error("Command queue full")]
	Backpressure,

	#[error("Connection closed")]
	Closed,

	#[error("No acknowledgement for {event:?} within {timeout:?}")]
	AckTimeout { event: String, timeout: Duration },

	#[error("Connection dropped before {0:?} was acknowledged")]
	AckDropped(String),

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("A global socket manager is already installed")]
	AlreadyInstalled,
}

pub type Result<T> = std::result::Result<T, RealtimeError>;
