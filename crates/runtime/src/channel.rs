//! Channel - one logical service stream multiplexed over the connection.
//!
//! A [`Channel`] owns the transport queues for its service and a pump task
//! that fans every inbound event out to the registered listeners, in
//! arrival order. Listeners come in two kinds:
//!
//! - **Subscribers**: unbounded queues fed every event until removed
//! - **Waiters**: one-shot slots consumed by the next event (command replies)

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{MutexGuard, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::transport::RawChannel;

/// Identifies a listener registered on a [`Channel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Listeners {
	last_id: u64,
	subscribers: Vec<(ListenerId, mpsc::UnboundedSender<Value>)>,
	waiters: Vec<(ListenerId, oneshot::Sender<Value>)>,
	/// Set once the inbound queue has ended; no further events will arrive.
	ended: bool,
	/// Bumped by every bulk detach.
	detach_epoch: u64,
}

impl Listeners {
	fn next_id(&mut self) -> ListenerId {
		self.last_id += 1;
		ListenerId(self.last_id)
	}

	fn deliver(&mut self, event: Value) {
		for (_, waiter) in self.waiters.drain(..) {
			let _ = waiter.send(event.clone());
		}
		self.subscribers.retain(|(_, tx)| tx.send(event.clone()).is_ok());
	}

	fn end(&mut self) {
		self.ended = true;
		self.subscribers.clear();
		self.waiters.clear();
	}
}

/// A logical channel for one service.
pub struct Channel {
	service: Arc<str>,
	id: i32,
	outbound: mpsc::UnboundedSender<Value>,
	listeners: Arc<Mutex<Listeners>>,
	/// Serializes commands so only one reply is awaited at a time.
	commands: tokio::sync::Mutex<()>,
	pump: JoinHandle<()>,
}

impl Channel {
	/// Wraps transport queues and starts the event pump.
	pub fn new(service: &str, raw: RawChannel) -> Arc<Self> {
		let RawChannel { id, outbound, mut inbound } = raw;
		let service: Arc<str> = Arc::from(service);
		let listeners = Arc::new(Mutex::new(Listeners::default()));

		let pump = {
			let listeners = Arc::clone(&listeners);
			let service = Arc::clone(&service);
			tokio::spawn(async move {
				while let Some(event) = inbound.recv().await {
					trace!(service = %service, "event: {}", event);
					listeners.lock().deliver(event);
				}
				debug!(service = %service, "inbound queue ended");
				listeners.lock().end();
			})
		};

		Arc::new(Self {
			service,
			id,
			outbound,
			listeners,
			commands: tokio::sync::Mutex::new(()),
			pump,
		})
	}

	pub fn service(&self) -> &str {
		&self.service
	}

	/// Transport-assigned channel id.
	pub fn id(&self) -> i32 {
		self.id
	}

	/// Queues `payload` for sending. The payload must be a JSON object.
	pub fn send(&self, payload: Value) -> Result<()> {
		if !payload.is_object() {
			return Err(Error::InvalidPayload(format!(
				"commands on '{}' must be JSON objects, got {}",
				self.service, payload
			)));
		}
		self.outbound
			.send(payload)
			.map_err(|_| Error::Transport(format!("channel '{}' is closed", self.service)))
	}

	/// Returns true once the transport has stopped delivering events.
	pub fn is_ended(&self) -> bool {
		self.listeners.lock().ended
	}

	/// Registered subscribers plus pending waiters.
	pub fn listener_count(&self) -> usize {
		let listeners = self.listeners.lock();
		listeners.subscribers.len() + listeners.waiters.len()
	}

	pub fn subscriber_count(&self) -> usize {
		self.listeners.lock().subscribers.len()
	}

	/// Registers a subscriber fed every event from now on.
	///
	/// On an ended channel the returned queue is already closed.
	pub(crate) fn subscribe(&self) -> (ListenerId, mpsc::UnboundedReceiver<Value>) {
		let (tx, rx) = mpsc::unbounded_channel();
		let mut listeners = self.listeners.lock();
		let id = listeners.next_id();
		if !listeners.ended {
			listeners.subscribers.push((id, tx));
		}
		(id, rx)
	}

	/// Registers a waiter consumed by the next event.
	pub(crate) fn register_waiter(&self) -> (ListenerId, oneshot::Receiver<Value>) {
		let (tx, rx) = oneshot::channel();
		let mut listeners = self.listeners.lock();
		let id = listeners.next_id();
		if !listeners.ended {
			listeners.waiters.push((id, tx));
		}
		(id, rx)
	}

	/// Removes one listener of either kind. Returns true if it was registered.
	pub(crate) fn remove_listener(&self, id: ListenerId) -> bool {
		let mut listeners = self.listeners.lock();
		let before = listeners.subscribers.len() + listeners.waiters.len();
		listeners.subscribers.retain(|(lid, _)| *lid != id);
		listeners.waiters.retain(|(lid, _)| *lid != id);
		before != listeners.subscribers.len() + listeners.waiters.len()
	}

	/// Removes every subscriber, ending their streams. Waiters are untouched.
	pub(crate) fn remove_subscribers(&self) -> usize {
		let mut listeners = self.listeners.lock();
		let removed = listeners.subscribers.len();
		listeners.subscribers.clear();
		listeners.detach_epoch += 1;
		removed
	}

	/// Count of bulk detaches so far. A subscription created under an older
	/// value has been detached, even if events are still sitting in its queue.
	pub(crate) fn detach_epoch(&self) -> u64 {
		self.listeners.lock().detach_epoch
	}

	/// Waits for this channel's turn to run a command.
	pub(crate) async fn lock_commands(&self) -> MutexGuard<'_, ()> {
		self.commands.lock().await
	}
}

impl Drop for Channel {
	fn drop(&mut self) {
		self.pump.abort();
	}
}

impl std::fmt::Debug for Channel {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Channel")
			.field("service", &self.service)
			.field("id", &self.id)
			.field("listeners", &self.listener_count())
			.finish()
	}
}
