//! Process-wide owner of the single real-time Connection.
//!
//! The manager gates Connection creation on the credential, re-checks a
//! missing credential a bounded number of times, and forwards publish,
//! subscribe and lifecycle calls to whichever Connection is current.
//!
//! All entry points except [`SocketManager::teardown`] are synchronous and
//! must be called from within a tokio runtime.

use crate::config::SocketConfig;
use crate::connection::{Connection, ConnectionHandle, ConnectionId};
use crate::credential::{Credential, CredentialSource};
use crate::notifier::{SessionNotifier, TracingNotifier};
use crate::retry::BoundedRetry;
use crate::state::ConnectionState;
use crate::subscription::{EventStream, SubscriptionId};
use crate::transport::{Connector, WebSocketConnector};
use crate::{RealtimeError, Result};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Result of [`SocketManager::initialize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
	/// A new Connection was created and is handshaking.
	Connecting,
	/// A Connection already exists; nothing was done.
	AlreadyInitialized,
	/// No credential yet; a deferred re-check is scheduled.
	Deferred,
	/// No credential and the re-check budget for this session is spent.
	CredentialUnavailable,
}

#[derive(Debug)]
struct Slot {
	connection: Option<Connection>,
	recheck: Option<JoinHandle<()>>,
	rechecks: BoundedRetry,
}

pub struct SocketManager {
	config: Arc<SocketConfig>,
	credentials: Arc<dyn CredentialSource>,
	connector: Arc<dyn Connector>,
	notifier: Arc<dyn SessionNotifier>,
	slot: Mutex<Slot>,
}

impl std::fmt::Debug for SocketManager {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SocketManager").field("config", &self.config).finish_non_exhaustive()
	}
}

pub struct SocketManagerBuilder {
	config: SocketConfig,
	credentials: Arc<dyn CredentialSource>,
	connector: Option<Arc<dyn Connector>>,
	notifier: Option<Arc<dyn SessionNotifier>>,
}

impl SocketManagerBuilder {
	#[must_use]
	pub fn connector(mut self, connector: impl Connector) -> Self {
		let connector: Arc<dyn Connector> = Arc::new(connector);
		self.connector = Some(connector);
		self
	}

	#[must_use]
	pub fn notifier(mut self, notifier: impl SessionNotifier) -> Self {
		let notifier: Arc<dyn SessionNotifier> = Arc::new(notifier);
		self.notifier = Some(notifier);
		self
	}

	pub fn build(self) -> Result<Arc<SocketManager>> {
		self.config.validate()?;

		let rechecks = BoundedRetry::from(&self.config.credential_retry);
		let connector = self.connector.unwrap_or_else(|| Arc::new(WebSocketConnector::new()) as Arc<dyn Connector>);
		let notifier = self.notifier.unwrap_or_else(|| Arc::new(TracingNotifier) as Arc<dyn SessionNotifier>);

		Ok(Arc::new(SocketManager {
			config: Arc::new(self.config),
			credentials: self.credentials,
			connector,
			notifier,
			slot: Mutex::new(Slot {
				connection: None,
				recheck: None,
				rechecks,
			}),
		}))
	}
}

impl SocketManager {
	pub fn builder(config: SocketConfig, credentials: impl CredentialSource) -> SocketManagerBuilder {
		let credentials: Arc<dyn CredentialSource> = Arc::new(credentials);
		SocketManagerBuilder {
			config,
			credentials,
			connector: None,
			notifier: None,
		}
	}

	pub fn config(&self) -> &SocketConfig {
		&self.config
	}

	fn slot(&self) -> MutexGuard<'_, Slot> {
		self.slot.lock().unwrap_or_else(PoisonError::into_inner)
	}

	fn handle(&self) -> Option<ConnectionHandle> {
		self.slot().connection.as_ref().map(|c| c.handle().clone())
	}

	/// Create the Connection if a credential is available. Idempotent.
	///
	/// The credential is read before the slot lock is taken; check-then-create
	/// happens under the lock, so concurrent callers can never produce a second
	/// Connection.
	pub fn initialize(self: &Arc<Self>) -> InitOutcome {
		let credential = self.credentials.credential();
		let mut slot = self.slot();
		self.create(&mut slot, credential)
	}

	fn create(self: &Arc<Self>, slot: &mut Slot, credential: Option<Credential>) -> InitOutcome {
		if slot.connection.is_some() {
			debug!("realtime connection already initialized");
			return InitOutcome::AlreadyInitialized;
		}

		let Some(credential) = credential else {
			return self.defer(slot);
		};

		match Connection::spawn(Arc::clone(&self.config), credential, Arc::clone(&self.connector), Arc::clone(&self.notifier)) {
			Ok(connection) => {
				info!(id = %connection.handle().id(), url = %self.config.url, "realtime connection created");
				slot.connection = Some(connection);
				if let Some(recheck) = slot.recheck.take() {
					recheck.abort();
				}
				InitOutcome::Connecting
			}
			Err(e) => {
				// config is validated at build time, so this only fires on a broken invariant
				warn!(error = %e, "failed to create realtime connection");
				InitOutcome::CredentialUnavailable
			}
		}
	}

	fn defer(self: &Arc<Self>, slot: &mut Slot) -> InitOutcome {
		if slot.recheck.is_some() {
			debug!("credential re-check already scheduled");
			return InitOutcome::Deferred;
		}

		let Some(delay) = slot.rechecks.next_delay() else {
			info!("no credential available; realtime connection not started");
			return InitOutcome::CredentialUnavailable;
		};

		debug!(?delay, attempt = slot.rechecks.attempts(), "no credential yet; re-checking later");
		let manager = Arc::clone(self);
		slot.recheck = Some(tokio::spawn(async move {
			tokio::time::sleep(delay).await;
			let credential = manager.credentials.credential();

			// clearing the re-check and creating must be one step for `recheck_pending` observers
			let mut slot = manager.slot();
			slot.recheck = None;
			let outcome = manager.create(&mut slot, credential);
			debug!(?outcome, "credential re-check finished");
		}));

		InitOutcome::Deferred
	}

	/// Whether a deferred credential re-check is pending.
	///
	/// Once this returns `false`, the re-check has either created the
	/// Connection or given up; check `connection_id` after this, not before.
	pub fn recheck_pending(&self) -> bool {
		self.slot().recheck.as_ref().is_some_and(|h| !h.is_finished())
	}

	/// Close the current Connection and clear the shared reference.
	pub async fn teardown(&self) {
		let connection = {
			let mut slot = self.slot();
			if let Some(recheck) = slot.recheck.take() {
				recheck.abort();
			}
			slot.rechecks.reset();
			slot.connection.take()
		};

		if let Some(connection) = connection {
			let id = connection.handle().id();
			connection.shutdown().await;
			info!(%id, "realtime connection torn down");
		}
	}

	pub fn connection_id(&self) -> Option<ConnectionId> {
		self.handle().map(|h| h.id())
	}

	pub fn state(&self) -> ConnectionState {
		self.handle().map_or(ConnectionState::Absent, |h| h.state())
	}

	pub fn watch_state(&self) -> Option<watch::Receiver<ConnectionState>> {
		self.handle().map(|h| h.watch_state())
	}

	pub fn is_connected(&self) -> bool {
		self.handle().is_some_and(|h| h.is_connected())
	}

	/// Publish `payload` under `event`. Never fails loudly: returns whether the
	/// event was queued for delivery.
	pub fn emit(&self, event: &str, payload: impl Serialize) -> bool {
		let Some(handle) = self.handle() else {
			warn!(%event, "dropping emit: no realtime connection");
			return false;
		};

		match serde_json::to_value(payload) {
			Ok(value) => handle.emit(event, vec![value]),
			Err(e) => {
				warn!(%event, error = %e, "dropping emit: payload not serializable");
				false
			}
		}
	}

	/// Publish and wait for the server's acknowledgement.
	pub async fn emit_with_ack(&self, event: &str, payload: impl Serialize, timeout: Duration) -> Result<Value> {
		let handle = self.handle().ok_or(RealtimeError::NotConnected)?;
		let value = serde_json::to_value(payload)?;
		handle.emit_with_ack(event, vec![value], timeout).await
	}

	/// Register a callback on the current Connection. `None` when there is no Connection.
	pub fn on<F>(&self, event: &str, callback: F) -> Option<SubscriptionId>
	where
		F: Fn(&Value) + Send + Sync + 'static,
	{
		self.handle().map(|h| h.on(event, Arc::new(callback)))
	}

	pub fn off(&self, event: &str, id: SubscriptionId) -> bool {
		self.handle().is_some_and(|h| h.off(event, id))
	}

	/// Channel-based subscription on the current Connection.
	pub fn subscribe(&self, event: &str) -> Option<EventStream> {
		self.handle().map(|h| h.subscribe(event))
	}

	pub fn disconnect(&self) -> bool {
		self.handle().is_some_and(|h| h.disconnect())
	}

	pub fn reconnect(&self) -> bool {
		self.handle().is_some_and(|h| h.reconnect())
	}
}
