use crate::credential::Credential;
use crate::protocol::{EnginePacket, OpenInfo, ProtocolError, SocketPacket};
use crate::transport::{Link, TransportError};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
	/// The server refused the credential. Never retried.
	#[error("authentication rejected: {0}")]
	Rejected(String),

	#[error("transport error: {0}")]
	Transport(#[from] TransportError),

	#[error("protocol error: {0}")]
	Protocol(#[from] ProtocolError),

	#[error("handshake timed out after {0:?}")]
	Timeout(Duration),

	#[error("connection closed during handshake")]
	Closed,
}

impl HandshakeError {
	pub const fn is_auth_rejection(&self) -> bool {
		matches!(self, Self::Rejected(_) | Self::Transport(TransportError::Unauthorized(_)))
	}
}

/// Negotiated session parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
	pub sid: String,
	pub engine: OpenInfo,
}

/// Run the Engine.IO open + Socket.IO connect exchange on a fresh link.
pub async fn perform(link: &mut Link, namespace: &str, credential: &Credential) -> Result<Session, HandshakeError> {
	let engine = wait_for_open(link).await?;
	debug!(engine_sid = %engine.sid, ping_interval = engine.ping_interval, "engine.io session opened");

	let connect = SocketPacket::Connect {
		nsp: namespace.to_string(),
		data: Some(json!({ "token": credential.expose() })),
	};
	link.sink.send(connect.into_frame()).await?;

	loop {
		let frame = next_frame(link).await?;

		match EnginePacket::decode(&frame)? {
			EnginePacket::Ping(body) => {
				link.sink.send(EnginePacket::Pong(body).encode()).await?;
			}
			EnginePacket::Close => return Err(HandshakeError::Closed),
			EnginePacket::Message(body) => match SocketPacket::decode(&body)? {
				SocketPacket::Connect { nsp, data } if nsp == namespace => {
					let sid = data
						.as_ref()
						.and_then(|d| d.get("sid"))
						.and_then(|s| s.as_str())
						.map_or_else(|| engine.sid.clone(), str::to_string);
					info!(%sid, %namespace, "socket connected");
					return Ok(Session { sid, engine });
				}
				SocketPacket::ConnectError { nsp, data } if nsp == namespace => {
					return Err(HandshakeError::Rejected(SocketPacket::error_message(&data)));
				}
				other => trace!(?other, "ignoring packet before connect"),
			},
			other => trace!(?other, "ignoring engine packet before connect"),
		}
	}
}

async fn wait_for_open(link: &mut Link) -> Result<OpenInfo, HandshakeError> {
	loop {
		let frame = next_frame(link).await?;
		match EnginePacket::decode(&frame)? {
			EnginePacket::Open(info) => return Ok(info),
			EnginePacket::Close => return Err(HandshakeError::Closed),
			other => trace!(?other, "ignoring engine packet before open"),
		}
	}
}

async fn next_frame(link: &mut Link) -> Result<String, HandshakeError> {
	match link.stream.next().await {
		Some(Ok(frame)) => Ok(frame),
		Some(Err(e)) => Err(e.into()),
		None => Err(HandshakeError::Closed),
	}
}
