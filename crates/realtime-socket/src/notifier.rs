use std::fmt;
use tracing::{error, warn};

/// User-facing notices raised by the connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
	/// Reconnection attempts are exhausted.
	ConnectionLost,
	/// The server rejected the session credential.
	AuthenticationFailed { message: String },
}

impl fmt::Display for Notice {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::ConnectionLost => f.write_str("Connection lost. Please refresh to reconnect."),
			Self::AuthenticationFailed { message } => write!(f, "Your session has expired ({message}). Please sign in again."),
		}
	}
}

/// Surface for notices and the forced return to the login entry point.
pub trait SessionNotifier: Send + Sync + 'static {
	fn notify(&self, notice: Notice);

	fn redirect_to_login(&self, login_path: &str);
}

/// Default notifier: logs both notices and redirects.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl SessionNotifier for TracingNotifier {
	fn notify(&self, notice: Notice) {
		match &notice {
			Notice::ConnectionLost => warn!(%notice, "realtime connection lost"),
			Notice::AuthenticationFailed { message } => error!(%message, "realtime authentication failed"),
		}
	}

	fn redirect_to_login(&self, login_path: &str) {
		warn!(%login_path, "redirecting to login");
	}
}
