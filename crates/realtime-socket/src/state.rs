use std::fmt;
use std::time::Instant;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
	/// `disconnect()` was called on this side
	ClientDisconnect,
	/// The server sent a Socket.IO disconnect packet
	ServerDisconnect,
	TransportClose,
	TransportError(String),
	PingTimeout,
	/// The handshake did not complete
	HandshakeFailed(String),
}

impl DisconnectReason {
	/// Whether automatic reconnection applies.
	pub const fn is_transient(&self) -> bool {
		!matches!(self, Self::ClientDisconnect | Self::ServerDisconnect)
	}
}

impl fmt::Display for DisconnectReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::ClientDisconnect => f.write_str("io client disconnect"),
			Self::ServerDisconnect => f.write_str("io server disconnect"),
			Self::TransportClose => f.write_str("transport close"),
			Self::TransportError(e) => write!(f, "transport error: {e}"),
			Self::PingTimeout => f.write_str("ping timeout"),
			Self::HandshakeFailed(e) => write!(f, "handshake failed: {e}"),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
	/// The server refused the credential. Terminal for the session.
	AuthRejected(String),
	RetriesExhausted { attempts: u32 },
}

#[derive(Debug, Clone)]
pub enum ConnectionState {
	Absent,
	Pending { started_at: Instant },
	Connected { sid: String, connected_at: Instant },
	Disconnected { reason: DisconnectReason, since: Instant },
	Failed { reason: FailureReason, failed_at: Instant },
}

impl ConnectionState {
	pub const fn is_connected(&self) -> bool {
		matches!(self, Self::Connected { .. })
	}

	pub const fn is_auth_failure(&self) -> bool {
		matches!(
			self,
			Self::Failed {
				reason: FailureReason::AuthRejected(_),
				..
			}
		)
	}

	pub const fn name(&self) -> &'static str {
		match self {
			Self::Absent => "absent",
			Self::Pending { .. } => "pending",
			Self::Connected { .. } => "connected",
			Self::Disconnected { .. } => "disconnected",
			Self::Failed { .. } => "failed",
		}
	}

	/// Validate a transition and return the resulting state.
	pub fn apply(&self, transition: StateTransition) -> Result<Self, StateError> {
		use StateTransition as T;

		let next = match (self, transition) {
			(Self::Absent | Self::Disconnected { .. }, T::StartHandshake) => Self::Pending { started_at: Instant::now() },
			(Self::Failed { reason, .. }, T::StartHandshake) if !matches!(reason, FailureReason::AuthRejected(_)) => Self::Pending { started_at: Instant::now() },
			(Self::Pending { .. }, T::HandshakeAccepted { sid }) => Self::Connected {
				sid,
				connected_at: Instant::now(),
			},
			(Self::Pending { .. } | Self::Connected { .. }, T::Lost(reason)) => Self::Disconnected { reason, since: Instant::now() },
			(Self::Disconnected { .. }, T::Lost(reason)) if reason == DisconnectReason::ClientDisconnect => Self::Disconnected { reason, since: Instant::now() },
			(Self::Pending { .. } | Self::Disconnected { .. }, T::Fail(reason)) => Self::Failed {
				reason,
				failed_at: Instant::now(),
			},
			(from, transition) => {
				return Err(StateError::InvalidTransition {
					from: from.name(),
					transition: transition.name(),
				})
			}
		};

		Ok(next)
	}
}

impl fmt::Display for ConnectionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateTransition {
	StartHandshake,
	HandshakeAccepted { sid: String },
	Lost(DisconnectReason),
	Fail(FailureReason),
}

impl StateTransition {
	const fn name(&self) -> &'static str {
		match self {
			Self::StartHandshake => "start_handshake",
			Self::HandshakeAccepted { .. } => "handshake_accepted",
			Self::Lost(_) => "lost",
			Self::Fail(_) => "fail",
		}
	}
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
	#[error("invalid state transition {transition} from {from}")]
	InvalidTransition { from: &'static str, transition: &'static str },
}

#[cfg(test)]
mod tests {
	use super::*;

	fn connected() -> ConnectionState {
		ConnectionState::Absent
			.apply(StateTransition::StartHandshake)
			.and_then(|s| s.apply(StateTransition::HandshakeAccepted { sid: "s1".into() }))
			.unwrap()
	}

	#[test]
	fn test_happy_path_reaches_connected() {
		let state = connected();
		assert!(state.is_connected());
		match state {
			ConnectionState::Connected { sid, .. } => assert_eq!(sid, "s1"),
			other => panic!("expected connected, got {other}"),
		}
	}

	#[test]
	fn test_transport_drop_then_retry() {
		let dropped = connected().apply(StateTransition::Lost(DisconnectReason::TransportClose)).unwrap();
		assert!(matches!(dropped, ConnectionState::Disconnected { .. }));

		let retrying = dropped.apply(StateTransition::StartHandshake).unwrap();
		assert!(matches!(retrying, ConnectionState::Pending { .. }));
	}

	#[test]
	fn test_exhausted_retries_can_be_restarted_manually() {
		let dropped = connected().apply(StateTransition::Lost(DisconnectReason::PingTimeout)).unwrap();
		let failed = dropped.apply(StateTransition::Fail(FailureReason::RetriesExhausted { attempts: 5 })).unwrap();

		assert!(!failed.is_auth_failure());
		assert!(failed.apply(StateTransition::StartHandshake).is_ok());
	}

	#[test]
	fn test_auth_rejection_is_terminal() {
		let pending = ConnectionState::Absent.apply(StateTransition::StartHandshake).unwrap();
		let failed = pending.apply(StateTransition::Fail(FailureReason::AuthRejected("Authentication error".into()))).unwrap();

		assert!(failed.is_auth_failure());
		assert_eq!(
			failed.apply(StateTransition::StartHandshake).unwrap_err(),
			StateError::InvalidTransition {
				from: "failed",
				transition: "start_handshake"
			}
		);
	}

	#[test]
	fn test_cannot_accept_handshake_without_pending() {
		assert!(ConnectionState::Absent.apply(StateTransition::HandshakeAccepted { sid: "x".into() }).is_err());
		assert!(connected().apply(StateTransition::HandshakeAccepted { sid: "y".into() }).is_err());
	}

	#[test]
	fn test_manual_disconnect_while_retrying() {
		let dropped = connected().apply(StateTransition::Lost(DisconnectReason::TransportClose)).unwrap();
		let stopped = dropped.apply(StateTransition::Lost(DisconnectReason::ClientDisconnect)).unwrap();

		match stopped {
			ConnectionState::Disconnected { reason, .. } => assert!(!reason.is_transient()),
			other => panic!("expected disconnected, got {other}"),
		}
	}
}
