//! Per-connection event subscriptions.
//!
//! A registry belongs to exactly one Connection. Replacing the Connection
//! (teardown, then initialize) starts from an empty registry; consumers that
//! need continuity must subscribe again.

use dashmap::DashMap;
use futures::Stream;
use serde_json::Value;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::trace;

pub type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "sub-{}", self.0)
	}
}

enum Listener {
	Callback(Callback),
	Channel(mpsc::UnboundedSender<Value>),
}

struct Entry {
	id: SubscriptionId,
	listener: Listener,
}

#[derive(Default)]
pub struct SubscriptionRegistry {
	listeners: DashMap<String, Vec<Entry>>,
	next_id: AtomicU64,
}

impl SubscriptionRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	fn next_id(&self) -> SubscriptionId {
		SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
	}

	fn insert(&self, event: &str, listener: Listener) -> SubscriptionId {
		let id = self.next_id();
		self.listeners.entry(event.to_string()).or_default().push(Entry { id, listener });
		trace!(%event, %id, "subscription added");
		id
	}

	pub fn on(&self, event: &str, callback: Callback) -> SubscriptionId {
		self.insert(event, Listener::Callback(callback))
	}

	pub fn subscribe(self: &Arc<Self>, event: &str) -> EventStream {
		let (tx, rx) = mpsc::unbounded_channel();
		let id = self.insert(event, Listener::Channel(tx));
		EventStream {
			event: event.to_string(),
			id,
			rx,
			registry: Arc::downgrade(self),
		}
	}

	/// Returns whether a subscription was removed.
	pub fn off(&self, event: &str, id: SubscriptionId) -> bool {
		let Some(mut entries) = self.listeners.get_mut(event) else {
			return false;
		};

		let before = entries.len();
		entries.retain(|entry| entry.id != id);
		let removed = entries.len() != before;
		let now_empty = entries.is_empty();
		drop(entries);

		if now_empty {
			self.listeners.remove_if(event, |_, entries| entries.is_empty());
		}
		removed
	}

	/// Drop every subscription for `event`, returning how many there were.
	pub fn off_all(&self, event: &str) -> usize {
		self.listeners.remove(event).map_or(0, |(_, entries)| entries.len())
	}

	/// Deliver `payload` to every listener of `event`. Returns the number of listeners reached.
	pub fn dispatch(&self, event: &str, payload: &Value) -> usize {
		// Snapshot callbacks so none run while the shard lock is held.
		let mut callbacks: Vec<Callback> = Vec::new();
		let mut delivered = 0;

		if let Some(mut entries) = self.listeners.get_mut(event) {
			entries.retain(|entry| match &entry.listener {
				Listener::Callback(callback) => {
					callbacks.push(Arc::clone(callback));
					true
				}
				Listener::Channel(tx) => {
					let open = tx.send(payload.clone()).is_ok();
					delivered += usize::from(open);
					open
				}
			});
		}

		for callback in &callbacks {
			callback(payload);
		}

		trace!(%event, listeners = delivered + callbacks.len(), "event dispatched");
		delivered + callbacks.len()
	}

	pub fn count(&self, event: &str) -> usize {
		self.listeners.get(event).map_or(0, |entries| entries.len())
	}

	pub fn is_empty(&self) -> bool {
		self.listeners.iter().all(|entries| entries.is_empty())
	}

	/// Close channel subscriptions and forget callbacks.
	pub fn clear(&self) {
		self.listeners.clear();
	}
}

impl fmt::Debug for SubscriptionRegistry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SubscriptionRegistry").field("events", &self.listeners.len()).finish()
	}
}

/// Channel-backed subscription. Dropping it unregisters the listener.
pub struct EventStream {
	event: String,
	id: SubscriptionId,
	rx: mpsc::UnboundedReceiver<Value>,
	registry: std::sync::Weak<SubscriptionRegistry>,
}

impl EventStream {
	pub fn event(&self) -> &str {
		&self.event
	}

	pub const fn id(&self) -> SubscriptionId {
		self.id
	}

	/// Next payload, or `None` once the owning Connection is gone.
	pub async fn recv(&mut self) -> Option<Value> {
		self.rx.recv().await
	}
}

impl Stream for EventStream {
	type Item = Value;

	fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		self.rx.poll_recv(cx)
	}
}

impl Drop for EventStream {
	fn drop(&mut self) {
		if let Some(registry) = self.registry.upgrade() {
			registry.off(&self.event, self.id);
		}
	}
}

impl fmt::Debug for EventStream {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("EventStream").field("event", &self.event).field("id", &self.id).finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;
	use std::sync::atomic::AtomicUsize;

	fn counter() -> (Arc<AtomicUsize>, Callback) {
		let hits = Arc::new(AtomicUsize::new(0));
		let seen = Arc::clone(&hits);
		let callback: Callback = Arc::new(move |_: &Value| {
			seen.fetch_add(1, Ordering::SeqCst);
		});
		(hits, callback)
	}

	#[test]
	fn test_dispatch_reaches_only_matching_event() {
		let registry = SubscriptionRegistry::new();
		let (hits, callback) = counter();
		registry.on("receive_message", callback);

		assert_eq!(registry.dispatch("receive_message", &json!({"text": "hi"})), 1);
		assert_eq!(registry.dispatch("typing", &json!(null)), 0);
		assert_eq!(hits.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn test_off_removes_only_that_subscription() {
		let registry = SubscriptionRegistry::new();
		let (first_hits, first) = counter();
		let (second_hits, second) = counter();
		let first_id = registry.on("connect", first);
		registry.on("connect", second);

		assert!(registry.off("connect", first_id));
		assert!(!registry.off("connect", first_id), "second removal is a no-op");

		registry.dispatch("connect", &Value::Null);
		assert_eq!(first_hits.load(Ordering::SeqCst), 0);
		assert_eq!(second_hits.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn test_ids_are_unique() {
		let registry = SubscriptionRegistry::new();
		let (_, callback) = counter();
		let a = registry.on("x", Arc::clone(&callback));
		let b = registry.on("x", callback);
		assert_ne!(a, b);
		assert_eq!(registry.count("x"), 2);
	}

	#[test]
	fn test_off_all_clears_event() {
		let registry = SubscriptionRegistry::new();
		let (_, callback) = counter();
		registry.on("x", Arc::clone(&callback));
		registry.on("x", callback);

		assert_eq!(registry.off_all("x"), 2);
		assert!(registry.is_empty());
	}

	#[test]
	fn test_callback_may_unsubscribe_itself() {
		let registry = Arc::new(SubscriptionRegistry::new());
		let slot: Arc<std::sync::Mutex<Option<SubscriptionId>>> = Arc::default();

		let inner_registry = Arc::clone(&registry);
		let inner_slot = Arc::clone(&slot);
		let id = registry.on(
			"once",
			Arc::new(move |_: &Value| {
				if let Some(id) = inner_slot.lock().unwrap().take() {
					inner_registry.off("once", id);
				}
			}),
		);
		*slot.lock().unwrap() = Some(id);

		assert_eq!(registry.dispatch("once", &Value::Null), 1);
		assert_eq!(registry.dispatch("once", &Value::Null), 0);
	}

	#[tokio::test]
	async fn test_channel_subscription_receives_and_unregisters_on_drop() {
		let registry = Arc::new(SubscriptionRegistry::new());
		let mut stream = registry.subscribe("receive_message");

		registry.dispatch("receive_message", &json!("hello"));
		assert_eq!(stream.recv().await, Some(json!("hello")));

		drop(stream);
		assert_eq!(registry.count("receive_message"), 0);
	}

	#[tokio::test]
	async fn test_clear_ends_channel_streams() {
		let registry = Arc::new(SubscriptionRegistry::new());
		let mut stream = registry.subscribe("x");

		registry.clear();
		assert_eq!(stream.recv().await, None);
	}
}
