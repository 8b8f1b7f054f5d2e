//! In-process transport: the client side is handed to the manager, the server
//! side surfaces on a [`MemoryListener`] so tests can play the server.

use super::{Connector, Link, TransportError};
use crate::protocol::{EnginePacket, OpenInfo, SocketPacket};
use futures::channel::mpsc as frame_mpsc;
use futures::{FutureExt, SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct MemoryConnector {
	accept_tx: mpsc::UnboundedSender<MemoryPeer>,
	refusing: Arc<AtomicBool>,
	attempts: Arc<AtomicUsize>,
}

#[derive(Debug)]
pub struct MemoryListener {
	accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryConnector {
	pub fn pair() -> (Self, MemoryListener) {
		let (accept_tx, accept_rx) = mpsc::unbounded_channel();
		let connector = Self {
			accept_tx,
			refusing: Arc::new(AtomicBool::new(false)),
			attempts: Arc::new(AtomicUsize::new(0)),
		};
		(connector, MemoryListener { accept_rx })
	}

	/// Refuse every following connection attempt until switched back.
	pub fn set_refusing(&self, refusing: bool) {
		self.refusing.store(refusing, Ordering::SeqCst);
	}

	/// Number of connection attempts seen, refused ones included.
	pub fn attempts(&self) -> usize {
		self.attempts.load(Ordering::SeqCst)
	}
}

#[async_trait::async_trait]
impl Connector for MemoryConnector {
	async fn connect(&self, endpoint: &str) -> Result<Link, TransportError> {
		self.attempts.fetch_add(1, Ordering::SeqCst);

		if self.refusing.load(Ordering::SeqCst) {
			return Err(TransportError::Refused(endpoint.to_string()));
		}

		let (client_tx, server_rx) = frame_mpsc::unbounded::<String>();
		let (server_tx, client_rx) = frame_mpsc::unbounded::<Result<String, TransportError>>();

		let peer = MemoryPeer {
			endpoint: endpoint.to_string(),
			incoming: server_rx,
			outgoing: Some(server_tx),
		};
		self.accept_tx.send(peer).map_err(|_| TransportError::Refused(endpoint.to_string()))?;

		let sink = client_tx.sink_map_err(|_| TransportError::Closed);
		Ok(Link::new(Box::pin(sink), Box::pin(client_rx)))
	}
}

impl MemoryListener {
	pub async fn accept(&mut self) -> Option<MemoryPeer> {
		self.accept_rx.recv().await
	}

	pub fn try_accept(&mut self) -> Option<MemoryPeer> {
		self.accept_rx.try_recv().ok()
	}
}

/// Server end of one in-memory link.
#[derive(Debug)]
pub struct MemoryPeer {
	endpoint: String,
	incoming: frame_mpsc::UnboundedReceiver<String>,
	outgoing: Option<frame_mpsc::UnboundedSender<Result<String, TransportError>>>,
}

impl MemoryPeer {
	pub fn endpoint(&self) -> &str {
		&self.endpoint
	}

	/// Send a raw frame to the client. Returns `false` once the client is gone.
	pub fn send(&self, frame: impl Into<String>) -> bool {
		self.outgoing.as_ref().is_some_and(|tx| tx.unbounded_send(Ok(frame.into())).is_ok())
	}

	pub fn send_packet(&self, packet: SocketPacket) -> bool {
		self.send(packet.into_frame())
	}

	/// Push a transport error to the client.
	pub fn fail(&self, error: TransportError) -> bool {
		self.outgoing.as_ref().is_some_and(|tx| tx.unbounded_send(Err(error)).is_ok())
	}

	/// Next frame written by the client, `None` once the client dropped its side.
	pub async fn recv(&mut self) -> Option<String> {
		self.incoming.next().await
	}

	/// Next frame that is not an Engine.IO pong.
	pub async fn recv_packet(&mut self) -> Option<SocketPacket> {
		loop {
			let frame = self.recv().await?;
			if let Ok(EnginePacket::Message(body)) = EnginePacket::decode(&frame) {
				if let Ok(packet) = SocketPacket::decode(&body) {
					return Some(packet);
				}
			}
		}
	}

	pub fn try_recv(&mut self) -> Option<String> {
		self.incoming.next().now_or_never().flatten()
	}

	/// Drop the server side, ending the client's stream.
	pub fn close(&mut self) {
		self.outgoing.take();
	}

	pub fn open(&self, sid: &str) -> bool {
		let info = OpenInfo {
			sid: sid.to_string(),
			upgrades: Vec::new(),
			ping_interval: 25_000,
			ping_timeout: 20_000,
			max_payload: 1_000_000,
		};
		self.send(EnginePacket::Open(info).encode())
	}

	/// Play the server side of a successful handshake and return the client's auth payload.
	pub async fn accept_handshake(&mut self, sid: &str) -> Option<Value> {
		self.open(&format!("engine-{sid}"));
		let (nsp, auth) = self.expect_connect().await?;
		self.send_packet(SocketPacket::Connect {
			nsp,
			data: Some(json!({ "sid": sid })),
		});
		Some(auth)
	}

	/// Play the server side of a rejected handshake.
	pub async fn reject_handshake(&mut self, message: &str) -> Option<Value> {
		self.open("engine-rejected");
		let (nsp, auth) = self.expect_connect().await?;
		self.send_packet(SocketPacket::ConnectError {
			nsp,
			data: json!({ "message": message }),
		});
		Some(auth)
	}

	async fn expect_connect(&mut self) -> Option<(String, Value)> {
		match self.recv_packet().await? {
			SocketPacket::Connect { nsp, data } => Some((nsp, data.unwrap_or(Value::Null))),
			_ => None,
		}
	}
}
