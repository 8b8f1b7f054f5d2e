use crate::config::SocketConfig;
use crate::credential::Credential;
use crate::handshake::{self, HandshakeError, Session};
use crate::notifier::{Notice, SessionNotifier};
use crate::protocol::{collapse_args, EnginePacket, SocketPacket};
use crate::retry::BoundedRetry;
use crate::state::{ConnectionState, DisconnectReason, FailureReason, StateTransition};
use crate::subscription::{Callback, EventStream, SubscriptionId, SubscriptionRegistry};
use crate::transport::{Connector, FrameSink, Link, TransportError};
use crate::{RealtimeError, Result};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn, Instrument};
use uuid::Uuid;

/// Lifecycle events dispatched to subscribers alongside server events.
pub mod events {
	pub const CONNECT: &str = "connect";
	pub const DISCONNECT: &str = "disconnect";
	pub const CONNECT_ERROR: &str = "connect_error";
	pub const RECONNECT_ATTEMPT: &str = "reconnect_attempt";
	pub const RECONNECT: &str = "reconnect";
	pub const RECONNECT_ERROR: &str = "reconnect_error";
	pub const RECONNECT_FAILED: &str = "reconnect_failed";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
	fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl fmt::Display for ConnectionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

#[derive(Debug)]
enum Command {
	Emit {
		event: String,
		args: Vec<Value>,
		ack: Option<oneshot::Sender<Vec<Value>>>,
	},
	Disconnect,
	Reconnect,
}

/// Cloneable access to a live Connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
	id: ConnectionId,
	commands: mpsc::Sender<Command>,
	state: watch::Receiver<ConnectionState>,
	registry: Arc<SubscriptionRegistry>,
}

impl ConnectionHandle {
	pub const fn id(&self) -> ConnectionId {
		self.id
	}

	pub fn state(&self) -> ConnectionState {
		self.state.borrow().clone()
	}

	pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
		self.state.clone()
	}

	pub fn is_connected(&self) -> bool {
		self.state.borrow().is_connected()
	}

	/// Queue an event for publication. Logs and returns `false` unless connected.
	pub fn emit(&self, event: &str, args: Vec<Value>) -> bool {
		if !self.is_connected() {
			warn!(%event, state = %self.state.borrow().name(), "dropping emit: not connected");
			return false;
		}
		self.send(Command::Emit {
			event: event.to_string(),
			args,
			ack: None,
		})
		.map_err(|e| warn!(%event, error = %e, "dropping emit"))
		.is_ok()
	}

	/// Publish an event and wait for the server's acknowledgement.
	pub async fn emit_with_ack(&self, event: &str, args: Vec<Value>, timeout: Duration) -> Result<Value> {
		if !self.is_connected() {
			return Err(RealtimeError::NotConnected);
		}

		let (tx, rx) = oneshot::channel();
		self.send(Command::Emit {
			event: event.to_string(),
			args,
			ack: Some(tx),
		})?;

		match tokio::time::timeout(timeout, rx).await {
			Ok(Ok(args)) => Ok(collapse_args(args)),
			Ok(Err(_)) => Err(RealtimeError::AckDropped(event.to_string())),
			Err(_) => Err(RealtimeError::AckTimeout {
				event: event.to_string(),
				timeout,
			}),
		}
	}

	pub fn on(&self, event: &str, callback: Callback) -> SubscriptionId {
		self.registry.on(event, callback)
	}

	pub fn off(&self, event: &str, id: SubscriptionId) -> bool {
		self.registry.off(event, id)
	}

	pub fn subscribe(&self, event: &str) -> EventStream {
		self.registry.subscribe(event)
	}

	pub fn disconnect(&self) -> bool {
		self.send(Command::Disconnect).is_ok()
	}

	/// Restart the handshake. Refused once the server has rejected the credential.
	pub fn reconnect(&self) -> bool {
		if self.state.borrow().is_auth_failure() {
			warn!("reconnect refused: credential was rejected");
			return false;
		}
		self.send(Command::Reconnect).is_ok()
	}

	fn send(&self, command: Command) -> Result<()> {
		self.commands.try_send(command).map_err(|e| match e {
			mpsc::error::TrySendError::Full(_) => RealtimeError::Backpressure,
			mpsc::error::TrySendError::Closed(_) => RealtimeError::Closed,
		})
	}
}

/// The single live channel. Owned by the manager; dropping it stops the actor.
#[derive(Debug)]
pub struct Connection {
	handle: ConnectionHandle,
	cancel: CancellationToken,
	task: Option<JoinHandle<()>>,
}

impl Connection {
	/// Spawn the connection actor. Must be called inside a tokio runtime.
	pub fn spawn(config: Arc<SocketConfig>, credential: Credential, connector: Arc<dyn Connector>, notifier: Arc<dyn SessionNotifier>) -> Result<Self> {
		let endpoint = config.endpoint()?;
		let id = ConnectionId::new();
		let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer.max(1));
		let (state_tx, state_rx) = watch::channel(ConnectionState::Absent);
		let registry = Arc::new(SubscriptionRegistry::new());
		let cancel = CancellationToken::new();

		let actor = ConnectionActor {
			config,
			endpoint,
			credential,
			connector,
			notifier,
			registry: Arc::clone(&registry),
			state: state_tx,
			commands: cmd_rx,
			cancel: cancel.clone(),
			pending_acks: PendingAcks::default(),
		};

		let span = tracing::info_span!("connection", id = %id);
		let task = tokio::spawn(actor.run().instrument(span));

		Ok(Self {
			handle: ConnectionHandle {
				id,
				commands: cmd_tx,
				state: state_rx,
				registry,
			},
			cancel,
			task: Some(task),
		})
	}

	pub const fn handle(&self) -> &ConnectionHandle {
		&self.handle
	}

	/// Close the link and wait for the actor to finish.
	pub async fn shutdown(mut self) {
		self.cancel.cancel();
		if let Some(task) = self.task.take() {
			if let Err(e) = task.await {
				if !e.is_cancelled() {
					error!(error = %e, "connection task failed");
				}
			}
		}
	}
}

impl Drop for Connection {
	fn drop(&mut self) {
		self.cancel.cancel();
	}
}

enum SessionEnd {
	Cancelled,
	Closed(DisconnectReason),
}

enum FrameOutcome {
	Continue,
	ServerDisconnect,
	Close,
}

enum Backoff {
	Elapsed,
	Disconnect,
	Stop,
}

enum Idle {
	Reconnect,
	Stop,
}

enum Attempt {
	Finished(std::result::Result<(Link, Session), HandshakeError>),
	Disconnect,
	Stop,
}

async fn open_session(
	connector: Arc<dyn Connector>,
	endpoint: String,
	namespace: String,
	credential: Credential,
	timeout: Duration,
) -> std::result::Result<(Link, Session), HandshakeError> {
	let attempt = async {
		let mut link = connector.connect(&endpoint).await?;
		let session = handshake::perform(&mut link, &namespace, &credential).await?;
		Ok::<_, HandshakeError>((link, session))
	};

	tokio::time::timeout(timeout, attempt).await.unwrap_or(Err(HandshakeError::Timeout(timeout)))
}

/// Senders waiting for a server ack, keyed by ack id.
#[derive(Debug, Default)]
struct PendingAcks {
	waiting: HashMap<u64, oneshot::Sender<Vec<Value>>>,
	next_id: u64,
}

impl PendingAcks {
	/// Register a waiter and return its ack id. Waiters whose caller gave up are dropped first.
	fn register(&mut self, tx: oneshot::Sender<Vec<Value>>) -> u64 {
		self.waiting.retain(|_, waiter| !waiter.is_closed());

		let id = self.next_id;
		self.next_id = self.next_id.wrapping_add(1);
		self.waiting.insert(id, tx);
		id
	}

	fn resolve(&mut self, id: u64, args: Vec<Value>) -> bool {
		self.waiting.remove(&id).is_some_and(|tx| tx.send(args).is_ok())
	}

	fn len(&self) -> usize {
		self.waiting.len()
	}

	/// Fail every waiter with a dropped-channel error.
	fn clear(&mut self) {
		self.waiting.clear();
	}
}

struct ConnectionActor {
	config: Arc<SocketConfig>,
	endpoint: String,
	credential: Credential,
	connector: Arc<dyn Connector>,
	notifier: Arc<dyn SessionNotifier>,
	registry: Arc<SubscriptionRegistry>,
	state: watch::Sender<ConnectionState>,
	commands: mpsc::Receiver<Command>,
	cancel: CancellationToken,
	pending_acks: PendingAcks,
}

impl ConnectionActor {
	async fn run(mut self) {
		let mut retry = BoundedRetry::from(&self.config.reconnection);
		let mut reconnecting = false;

		'session: loop {
			if reconnecting {
				self.dispatch(events::RECONNECT_ATTEMPT, &json!(retry.attempts()));
			}
			self.transition(StateTransition::StartHandshake);

			let outcome = match self.attempt_session().await {
				Attempt::Finished(outcome) => outcome,
				Attempt::Stop => break 'session,
				Attempt::Disconnect => {
					info!("disconnected by client during handshake");
					self.transition(StateTransition::Lost(DisconnectReason::ClientDisconnect));
					self.dispatch(events::DISCONNECT, &json!(DisconnectReason::ClientDisconnect.to_string()));
					match self.idle().await {
						Idle::Reconnect => {
							retry.reset();
							reconnecting = false;
							continue 'session;
						}
						Idle::Stop => break 'session,
					}
				}
			};

			let reason = match outcome {
				Ok((link, session)) => {
					self.transition(StateTransition::HandshakeAccepted { sid: session.sid.clone() });
					if reconnecting {
						info!(attempt = retry.attempts(), "reconnected");
						self.dispatch(events::RECONNECT, &json!(retry.attempts()));
					}
					retry.reset();
					self.dispatch(events::CONNECT, &json!({ "sid": session.sid }));

					match self.run_session(link, &session).await {
						SessionEnd::Cancelled => break 'session,
						SessionEnd::Closed(reason) => {
							self.pending_acks.clear();
							self.transition(StateTransition::Lost(reason.clone()));
							self.dispatch(events::DISCONNECT, &json!(reason.to_string()));
							reason
						}
					}
				}
				Err(err) if err.is_auth_rejection() => {
					self.reject(&err).await;
					break 'session;
				}
				Err(err) => {
					let message = err.to_string();
					warn!(error = %message, endpoint = %self.endpoint, "handshake failed");
					let reason = DisconnectReason::HandshakeFailed(message.clone());
					self.transition(StateTransition::Lost(reason.clone()));
					self.dispatch(events::CONNECT_ERROR, &json!({ "message": message }));
					if reconnecting {
						self.dispatch(events::RECONNECT_ERROR, &json!({ "message": message }));
					}
					reason
				}
			};

			if !reason.is_transient() || !self.config.reconnection.enabled {
				info!(%reason, "not reconnecting automatically");
				match self.idle().await {
					Idle::Reconnect => {
						retry.reset();
						reconnecting = false;
						continue 'session;
					}
					Idle::Stop => break 'session,
				}
			}

			if let Some(delay) = retry.next_delay() {
				reconnecting = true;
				debug!(attempt = retry.attempts(), max = retry.max_attempts(), ?delay, "scheduling reconnect");

				match self.backoff(delay).await {
					Backoff::Elapsed => {}
					Backoff::Stop => break 'session,
					Backoff::Disconnect => {
						self.transition(StateTransition::Lost(DisconnectReason::ClientDisconnect));
						self.dispatch(events::DISCONNECT, &json!(DisconnectReason::ClientDisconnect.to_string()));
						match self.idle().await {
							Idle::Reconnect => {
								retry.reset();
								reconnecting = false;
							}
							Idle::Stop => break 'session,
						}
					}
				}
			} else {
				let attempts = retry.attempts();
				error!(attempts, "reconnection attempts exhausted");
				self.transition(StateTransition::Fail(FailureReason::RetriesExhausted { attempts }));
				self.dispatch(events::RECONNECT_FAILED, &Value::Null);
				self.notifier.notify(Notice::ConnectionLost);

				match self.idle().await {
					Idle::Reconnect => {
						retry.reset();
						reconnecting = false;
					}
					Idle::Stop => break 'session,
				}
			}
		}

		self.pending_acks.clear();
		self.registry.clear();
		if self.cancel.is_cancelled() {
			self.state.send_replace(ConnectionState::Absent);
		}
		debug!("connection actor stopped");
	}

	/// Open a link and handshake while still serving commands. A `Disconnect`
	/// abandons the in-flight attempt.
	async fn attempt_session(&mut self) -> Attempt {
		let attempt = open_session(
			Arc::clone(&self.connector),
			self.endpoint.clone(),
			self.config.namespace.clone(),
			self.credential.clone(),
			self.config.handshake_timeout,
		);
		tokio::pin!(attempt);

		loop {
			tokio::select! {
				() = self.cancel.cancelled() => return Attempt::Stop,
				outcome = &mut attempt => return Attempt::Finished(outcome),
				command = self.commands.recv() => match command {
					Some(Command::Disconnect) => return Attempt::Disconnect,
					Some(Command::Reconnect) => debug!("reconnect ignored: handshake in flight"),
					Some(Command::Emit { event, .. }) => warn!(%event, "dropping emit: handshake in flight"),
					None => return Attempt::Stop,
				},
			}
		}
	}

	async fn run_session(&mut self, link: Link, session: &Session) -> SessionEnd {
		let Link { mut sink, mut stream } = link;
		let window = session.engine.heartbeat_window();
		let heartbeat = tokio::time::sleep(window);
		tokio::pin!(heartbeat);

		loop {
			tokio::select! {
				() = self.cancel.cancelled() => {
					self.close_link(&mut sink).await;
					return SessionEnd::Cancelled;
				}
				() = &mut heartbeat => {
					warn!(?window, "no traffic from server within heartbeat window");
					return SessionEnd::Closed(DisconnectReason::PingTimeout);
				}
				frame = stream.next() => {
					heartbeat.as_mut().reset(tokio::time::Instant::now() + window);
					match frame {
						Some(Ok(frame)) => match self.handle_frame(&frame, &mut sink).await {
							Ok(FrameOutcome::Continue) => {}
							Ok(FrameOutcome::ServerDisconnect) => {
								info!("disconnected by server");
								return SessionEnd::Closed(DisconnectReason::ServerDisconnect);
							}
							Ok(FrameOutcome::Close) => return SessionEnd::Closed(DisconnectReason::TransportClose),
							Err(e) => return SessionEnd::Closed(DisconnectReason::TransportError(e.to_string())),
						},
						Some(Err(TransportError::Closed)) | None => return SessionEnd::Closed(DisconnectReason::TransportClose),
						Some(Err(e)) => return SessionEnd::Closed(DisconnectReason::TransportError(e.to_string())),
					}
				}
				command = self.commands.recv() => match command {
					Some(Command::Emit { event, args, ack }) => {
						let id = ack.map(|tx| self.pending_acks.register(tx));
						trace!(%event, ?id, waiting = self.pending_acks.len(), "emitting");
						let packet = SocketPacket::Event {
							nsp: self.config.namespace.clone(),
							id,
							name: event,
							args,
						};
						if let Err(e) = sink.send(packet.into_frame()).await {
							return SessionEnd::Closed(DisconnectReason::TransportError(e.to_string()));
						}
					}
					Some(Command::Disconnect) => {
						self.close_link(&mut sink).await;
						info!("disconnected by client");
						return SessionEnd::Closed(DisconnectReason::ClientDisconnect);
					}
					Some(Command::Reconnect) => debug!("reconnect ignored: already connected"),
					None => {
						self.close_link(&mut sink).await;
						return SessionEnd::Cancelled;
					}
				},
			}
		}
	}

	async fn handle_frame(&mut self, frame: &str, sink: &mut FrameSink) -> std::result::Result<FrameOutcome, TransportError> {
		let packet = match EnginePacket::decode(frame) {
			Ok(packet) => packet,
			Err(e) => {
				warn!(error = %e, "dropping undecodable frame");
				return Ok(FrameOutcome::Continue);
			}
		};

		let body = match packet {
			EnginePacket::Ping(body) => {
				sink.send(EnginePacket::Pong(body).encode()).await?;
				return Ok(FrameOutcome::Continue);
			}
			EnginePacket::Close => return Ok(FrameOutcome::Close),
			EnginePacket::Message(body) => body,
			other => {
				trace!(?other, "ignoring engine packet");
				return Ok(FrameOutcome::Continue);
			}
		};

		let packet = match SocketPacket::decode(&body) {
			Ok(packet) if packet.nsp() == self.config.namespace => packet,
			Ok(packet) => {
				trace!(nsp = %packet.nsp(), "ignoring packet for another namespace");
				return Ok(FrameOutcome::Continue);
			}
			Err(e) => {
				warn!(error = %e, "dropping undecodable packet");
				return Ok(FrameOutcome::Continue);
			}
		};

		match packet {
			SocketPacket::Event { id, name, args, .. } => {
				self.dispatch(&name, &collapse_args(args));
				if let Some(id) = id {
					let ack = SocketPacket::Ack {
						nsp: self.config.namespace.clone(),
						id,
						args: Vec::new(),
					};
					sink.send(ack.into_frame()).await?;
				}
			}
			SocketPacket::Ack { id, args, .. } => {
				if !self.pending_acks.resolve(id, args) {
					debug!(id, "ack for unknown or abandoned id");
				}
			}
			SocketPacket::Disconnect { .. } => return Ok(FrameOutcome::ServerDisconnect),
			SocketPacket::ConnectError { data, .. } => {
				warn!(message = %SocketPacket::error_message(&data), "connect error after handshake");
			}
			SocketPacket::Connect { .. } => trace!("duplicate connect packet"),
		}

		Ok(FrameOutcome::Continue)
	}

	async fn close_link(&self, sink: &mut FrameSink) {
		let disconnect = SocketPacket::Disconnect {
			nsp: self.config.namespace.clone(),
		};
		if let Err(e) = sink.send(disconnect.into_frame()).await {
			debug!(error = %e, "disconnect packet not delivered");
		}
		let _ = sink.close().await;
	}

	async fn reject(&self, err: &HandshakeError) {
		let message = match err {
			HandshakeError::Rejected(message) => message.clone(),
			other => other.to_string(),
		};
		error!(%message, "authentication rejected; not retrying");

		self.transition(StateTransition::Fail(FailureReason::AuthRejected(message.clone())));
		self.dispatch(events::CONNECT_ERROR, &json!({ "message": message }));
		self.notifier.notify(Notice::AuthenticationFailed { message });

		tokio::select! {
			() = self.cancel.cancelled() => debug!("torn down before login redirect"),
			() = tokio::time::sleep(self.config.auth_redirect_delay) => {
				self.notifier.redirect_to_login(&self.config.login_path);
			}
		}
	}

	async fn backoff(&mut self, delay: Duration) -> Backoff {
		let sleep = tokio::time::sleep(delay);
		tokio::pin!(sleep);

		loop {
			tokio::select! {
				() = self.cancel.cancelled() => return Backoff::Stop,
				() = &mut sleep => return Backoff::Elapsed,
				command = self.commands.recv() => match command {
					Some(Command::Reconnect) => return Backoff::Elapsed,
					Some(Command::Disconnect) => return Backoff::Disconnect,
					Some(Command::Emit { event, .. }) => warn!(%event, "dropping emit: reconnecting"),
					None => return Backoff::Stop,
				},
			}
		}
	}

	async fn idle(&mut self) -> Idle {
		loop {
			tokio::select! {
				() = self.cancel.cancelled() => return Idle::Stop,
				command = self.commands.recv() => match command {
					Some(Command::Reconnect) => {
						info!("manual reconnect requested");
						return Idle::Reconnect;
					}
					Some(Command::Emit { event, .. }) => warn!(%event, "dropping emit: not connected"),
					Some(Command::Disconnect) => debug!("already disconnected"),
					None => return Idle::Stop,
				},
			}
		}
	}

	fn transition(&self, transition: StateTransition) {
		let current = self.state.borrow().clone();
		match current.apply(transition) {
			Ok(next) => {
				debug!(from = %current, to = %next, "state transition");
				self.state.send_replace(next);
			}
			Err(e) => warn!(error = %e, "state transition ignored"),
		}
	}

	fn dispatch(&self, event: &str, payload: &Value) {
		self.registry.dispatch(event, payload);
	}
}
