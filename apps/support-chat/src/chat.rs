//! Terminal chat loop: joins the support room on every (re)connect, prints
//! inbound messages and sends each input line as a chat message.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use realtime_socket::{ConnectionState, InitOutcome, SocketManager};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub const JOIN_ROOM: &str = "join_room";
pub const SEND_MESSAGE: &str = "send_message";
pub const RECEIVE_MESSAGE: &str = "receive_message";

const CREDENTIAL_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Serialize)]
struct JoinRoom<'a> {
	room: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
	pub room: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub sender: Option<String>,
	pub message: String,
	pub sent_at: DateTime<Utc>,
}

/// One line for the terminal. Payloads that are not chat messages are shown raw.
pub fn render(payload: &Value) -> String {
	match serde_json::from_value::<ChatMessage>(payload.clone()) {
		Ok(msg) => format!("[{}] {}: {}", msg.sent_at.format("%H:%M:%S"), msg.sender.as_deref().unwrap_or("support"), msg.message),
		Err(_) => format!("[raw] {payload}"),
	}
}

enum Input {
	Message(String),
	Reconnect,
	Status,
	Quit,
	Empty,
}

impl Input {
	fn parse(line: &str) -> Self {
		match line.trim() {
			"" => Self::Empty,
			"/quit" | "/exit" => Self::Quit,
			"/reconnect" => Self::Reconnect,
			"/status" => Self::Status,
			text => Self::Message(text.to_string()),
		}
	}
}

pub struct ChatClient {
	manager: Arc<SocketManager>,
	room: String,
	sender: Option<String>,
	shutdown: CancellationToken,
}

impl ChatClient {
	pub fn new(manager: Arc<SocketManager>, room: impl Into<String>, sender: Option<String>, shutdown: CancellationToken) -> Self {
		Self {
			manager,
			room: room.into(),
			sender,
			shutdown,
		}
	}

	/// Run until the input ends, `/quit`, shutdown, or a rejected session.
	#[instrument(skip_all, fields(room = %self.room))]
	pub async fn run<R>(self, input: R) -> Result<()>
	where
		R: AsyncBufRead + Unpin,
	{
		self.start().await?;

		let (Some(mut state), Some(mut inbound)) = (self.manager.watch_state(), self.manager.subscribe(RECEIVE_MESSAGE)) else {
			return Err(Error::NoCredential);
		};

		let mut lines = input.lines();
		let mut joined: Option<String> = None;
		let mut state_open = true;
		let mut inbound_open = true;

		let initial = state.borrow_and_update().clone();
		self.on_state(&initial, &mut joined);

		loop {
			tokio::select! {
				() = self.shutdown.cancelled() => break,
				changed = state.changed(), if state_open => {
					if changed.is_err() {
						state_open = false;
						continue;
					}
					let current = state.borrow_and_update().clone();
					self.on_state(&current, &mut joined);
				}
				payload = inbound.next(), if inbound_open => match payload {
					Some(payload) => println!("{}", render(&payload)),
					None => {
						debug!("inbound stream closed");
						inbound_open = false;
					}
				},
				line = lines.next_line() => match line? {
					Some(line) => {
						if !self.on_input(Input::parse(&line)) {
							break;
						}
					}
					None => break,
				},
			}
		}

		let rejected = self.manager.state().is_auth_failure();
		self.manager.teardown().await;
		info!("left support chat");

		if rejected {
			Err(Error::SessionRejected)
		} else {
			Ok(())
		}
	}

	async fn start(&self) -> Result<()> {
		match self.manager.initialize() {
			InitOutcome::Connecting | InitOutcome::AlreadyInitialized => Ok(()),
			InitOutcome::CredentialUnavailable => Err(Error::NoCredential),
			InitOutcome::Deferred => {
				println!("waiting for a session credential...");
				loop {
					// sample the re-check before the connection so a finishing re-check is never missed
					let pending = self.manager.recheck_pending();
					if self.manager.connection_id().is_some() {
						return Ok(());
					}
					if !pending {
						return Err(Error::NoCredential);
					}
					tokio::select! {
						() = self.shutdown.cancelled() => return Err(Error::NoCredential),
						() = tokio::time::sleep(CREDENTIAL_POLL) => {}
					}
				}
			}
		}
	}

	fn on_state(&self, state: &ConnectionState, joined: &mut Option<String>) {
		match state {
			ConnectionState::Connected { sid, .. } if joined.as_deref() != Some(sid.as_str()) => {
				println!("connected, joining #{}", self.room);
				if self.manager.emit(JOIN_ROOM, JoinRoom { room: &self.room }) {
					*joined = Some(sid.clone());
				}
			}
			ConnectionState::Disconnected { reason, .. } => {
				*joined = None;
				println!("disconnected ({reason})");
			}
			ConnectionState::Failed { .. } => {
				*joined = None;
				println!("connection failed; type /reconnect to try again");
			}
			_ => {}
		}
	}

	/// Returns `false` when the user asked to leave.
	fn on_input(&self, input: Input) -> bool {
		match input {
			Input::Quit => return false,
			Input::Empty => {}
			Input::Status => println!("status: {}", self.manager.state()),
			Input::Reconnect => {
				if !self.manager.reconnect() {
					println!("reconnect not possible right now");
				}
			}
			Input::Message(message) => {
				let msg = ChatMessage {
					room: self.room.clone(),
					sender: self.sender.clone(),
					message,
					sent_at: Utc::now(),
				};
				if !self.manager.emit(SEND_MESSAGE, &msg) {
					warn!("message not sent");
					println!("(not connected, message not sent)");
				}
			}
		}
		true
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::notifier::ConsoleNotifier;
	use realtime_socket::{MemoryConnector, MemoryListener, SharedCredential, SocketConfig, SocketPacket};
	use serde_json::json;
	use tokio::io::{AsyncWriteExt, BufReader, DuplexStream};

	fn manager(token: Option<&str>, shutdown: &CancellationToken) -> (Arc<SocketManager>, MemoryListener) {
		let (connector, listener) = MemoryConnector::pair();
		let credentials = token.map_or_else(SharedCredential::new, SharedCredential::with_token);
		let manager = SocketManager::builder(SocketConfig::default(), credentials)
			.connector(connector)
			.notifier(ConsoleNotifier::new(shutdown.clone()))
			.build()
			.unwrap();
		(manager, listener)
	}

	fn spawn_client(manager: &Arc<SocketManager>, shutdown: &CancellationToken) -> (DuplexStream, tokio::task::JoinHandle<Result<()>>) {
		let (input, reader) = tokio::io::duplex(1024);
		let client = ChatClient::new(Arc::clone(manager), "support", Some("agent-7".into()), shutdown.clone());
		(input, tokio::spawn(client.run(BufReader::new(reader))))
	}

	#[test]
	fn test_render_chat_message() {
		let payload = json!({
			"room": "support",
			"sender": "maria",
			"message": "order shipped",
			"sentAt": "2024-05-01T09:30:00Z",
		});
		assert_eq!(render(&payload), "[09:30:00] maria: order shipped");
		assert_eq!(render(&json!("plain")), "[raw] \"plain\"");
	}

	#[tokio::test(start_paused = true)]
	async fn test_joins_room_and_sends_lines() {
		let shutdown = CancellationToken::new();
		let (manager, mut listener) = manager(Some("tok"), &shutdown);
		let (mut input, task) = spawn_client(&manager, &shutdown);

		let mut peer = listener.accept().await.unwrap();
		peer.accept_handshake("s1").await.unwrap();

		match peer.recv_packet().await.unwrap() {
			SocketPacket::Event { name, args, .. } => {
				assert_eq!(name, JOIN_ROOM);
				assert_eq!(args, vec![json!({ "room": "support" })]);
			}
			other => panic!("expected join_room, got {other:?}"),
		}

		input.write_all(b"hello there\n").await.unwrap();
		match peer.recv_packet().await.unwrap() {
			SocketPacket::Event { name, args, .. } => {
				assert_eq!(name, SEND_MESSAGE);
				assert_eq!(args[0]["room"], "support");
				assert_eq!(args[0]["sender"], "agent-7");
				assert_eq!(args[0]["message"], "hello there");
				assert!(args[0]["sentAt"].is_string());
			}
			other => panic!("expected send_message, got {other:?}"),
		}

		input.write_all(b"/quit\n").await.unwrap();
		task.await.unwrap().unwrap();
		assert!(manager.connection_id().is_none());
	}

	#[tokio::test(start_paused = true)]
	async fn test_rejoins_after_reconnect() {
		let shutdown = CancellationToken::new();
		let (manager, mut listener) = manager(Some("tok"), &shutdown);
		let (_input, _task) = spawn_client(&manager, &shutdown);

		let mut peer = listener.accept().await.unwrap();
		peer.accept_handshake("s1").await.unwrap();
		assert!(matches!(peer.recv_packet().await, Some(SocketPacket::Event { ref name, .. }) if name == JOIN_ROOM));

		peer.close();
		let mut peer = listener.accept().await.unwrap();
		peer.accept_handshake("s2").await.unwrap();
		assert!(matches!(peer.recv_packet().await, Some(SocketPacket::Event { ref name, .. }) if name == JOIN_ROOM));
	}

	#[tokio::test(start_paused = true)]
	async fn test_rejected_session_ends_chat() {
		let shutdown = CancellationToken::new();
		let (manager, mut listener) = manager(Some("expired"), &shutdown);
		let (_input, task) = spawn_client(&manager, &shutdown);

		let mut peer = listener.accept().await.unwrap();
		peer.reject_handshake("Authentication error").await.unwrap();

		assert!(matches!(task.await.unwrap(), Err(Error::SessionRejected)));
		assert!(shutdown.is_cancelled());
	}

	#[tokio::test(start_paused = true)]
	async fn test_late_credential_is_picked_up_by_recheck() {
		let shutdown = CancellationToken::new();
		let (connector, mut listener) = MemoryConnector::pair();
		let credentials = SharedCredential::new();
		let manager = SocketManager::builder(SocketConfig::default(), credentials.clone())
			.connector(connector)
			.notifier(ConsoleNotifier::new(shutdown.clone()))
			.build()
			.unwrap();
		let (_input, task) = spawn_client(&manager, &shutdown);

		tokio::time::sleep(Duration::from_millis(500)).await;
		credentials.set("late");

		let mut peer = listener.accept().await.unwrap();
		assert_eq!(peer.accept_handshake("s1").await, Some(json!({ "token": "late" })));
		assert!(matches!(peer.recv_packet().await, Some(SocketPacket::Event { ref name, .. }) if name == JOIN_ROOM));
		assert!(!task.is_finished());
	}

	#[tokio::test(start_paused = true)]
	async fn test_missing_credential_gives_up() {
		let shutdown = CancellationToken::new();
		let (manager, _listener) = manager(None, &shutdown);
		let (_input, task) = spawn_client(&manager, &shutdown);

		assert!(matches!(task.await.unwrap(), Err(Error::NoCredential)));
	}
}
