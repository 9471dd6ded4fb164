//! Subscription handle returned by `Session::attach`.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::channel::{Channel, ListenerId};

/// A lazy, unbounded stream of every event on one channel from attach time on.
///
/// Not restartable: once detached or ended, attach again for a fresh stream.
/// Dropping the handle detaches it.
pub struct Subscription {
	channel: Arc<Channel>,
	id: ListenerId,
	epoch: u64,
	rx: mpsc::UnboundedReceiver<Value>,
}

impl Subscription {
	pub(crate) fn new(channel: Arc<Channel>) -> Self {
		let (id, rx) = channel.subscribe();
		// Read after subscribing: a detach in between also closed `rx`.
		let epoch = channel.detach_epoch();
		Self { channel, id, epoch, rx }
	}

	fn is_detached(&self) -> bool {
		self.channel.detach_epoch() != self.epoch
	}

	/// Service this subscription listens to.
	pub fn service(&self) -> &str {
		self.channel.service()
	}

	/// Next event, or `None` once detached or the connection is gone.
	pub async fn recv(&mut self) -> Option<Value> {
		if self.is_detached() {
			return None;
		}
		let event = self.rx.recv().await?;
		(!self.is_detached()).then_some(event)
	}

	/// Stops receiving events. Anything already queued is discarded.
	pub fn detach(self) {}
}

impl Stream for Subscription {
	type Item = Value;

	fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Value>> {
		if self.is_detached() {
			return Poll::Ready(None);
		}
		self.rx.poll_recv(cx)
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		self.channel.remove_listener(self.id);
	}
}

impl std::fmt::Debug for Subscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Subscription")
			.field("service", &self.channel.service())
			.field("id", &self.id)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use futures_util::StreamExt;
	use serde_json::json;

	use super::*;
	use crate::transport::RawChannel;

	#[tokio::test]
	async fn test_stream_yields_events_then_ends() {
		let (raw, _outbound, inbound) = RawChannel::pair(1);
		let channel = Channel::new("shell", raw);
		let mut subscription = Subscription::new(Arc::clone(&channel));

		inbound.send(json!({"output": "hi"})).unwrap();
		let event = tokio::time::timeout(Duration::from_secs(1), subscription.next()).await.unwrap();
		assert_eq!(event, Some(json!({"output": "hi"})));

		drop(inbound);
		let end = tokio::time::timeout(Duration::from_secs(1), subscription.recv()).await.unwrap();
		assert_eq!(end, None);
	}

	#[tokio::test]
	async fn test_detach_releases_listener() {
		let (raw, _outbound, _inbound) = RawChannel::pair(1);
		let channel = Channel::new("shell", raw);

		let subscription = Subscription::new(Arc::clone(&channel));
		assert_eq!(subscription.service(), "shell");
		assert_eq!(channel.listener_count(), 1);

		subscription.detach();
		assert_eq!(channel.listener_count(), 0);
	}

	#[tokio::test]
	async fn test_bulk_detach_discards_queued_events() {
		let (raw, _outbound, inbound) = RawChannel::pair(1);
		let channel = Channel::new("shell", raw);
		let mut subscription = Subscription::new(Arc::clone(&channel));
		let (_, delivered) = channel.register_waiter();

		inbound.send(json!({"output": "late"})).unwrap();
		tokio::time::timeout(Duration::from_secs(1), delivered).await.unwrap().unwrap();
		assert_eq!(channel.remove_subscribers(), 1);

		assert_eq!(subscription.recv().await, None);
		assert_eq!(subscription.next().await, None);
	}
}
