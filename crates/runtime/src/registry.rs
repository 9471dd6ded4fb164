//! Channel registry: one cached [`Channel`] per service name.
//!
//! The first caller for a name parks a shared open future in the slot. Any
//! caller arriving while it is in flight awaits that same future, so there
//! is exactly one open request per name and every waiter sees the same
//! outcome, success or failure. A failed open clears the slot once it
//! settles so a later call can try again. Entries are never evicted.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use goval_protocol::is_known_service;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::channel::Channel;
use crate::error::{Error, Result};
use crate::transport::Transport;

type OpenOutcome = std::result::Result<Arc<Channel>, Arc<Error>>;
type PendingOpen = Shared<BoxFuture<'static, OpenOutcome>>;

enum Slot {
	Opening(PendingOpen),
	Open(Arc<Channel>),
}

#[derive(Default)]
pub struct ChannelRegistry {
	slots: Mutex<HashMap<String, Slot>>,
}

impl ChannelRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// The cached channel for `service`, without opening anything.
	pub fn cached(&self, service: &str) -> Option<Arc<Channel>> {
		match self.slots.lock().get(service) {
			Some(Slot::Open(channel)) => Some(Arc::clone(channel)),
			_ => None,
		}
	}

	/// Names of every service with an open channel, sorted.
	pub fn names(&self) -> Vec<String> {
		let mut names: Vec<String> = self
			.slots
			.lock()
			.iter()
			.filter(|(_, slot)| matches!(slot, Slot::Open(_)))
			.map(|(name, _)| name.clone())
			.collect();
		names.sort();
		names
	}

	/// Returns the channel for `service`, opening it through `transport` on first use.
	pub async fn get(
		&self,
		service: &str,
		transport: &Arc<dyn Transport>,
		cancel: &CancellationToken,
	) -> Result<Arc<Channel>> {
		if !is_known_service(service) {
			return Err(Error::ChannelUnavailable {
				service: service.to_string(),
				reason: "unknown service".to_string(),
			});
		}

		let pending = {
			let mut slots = self.slots.lock();
			match slots.get(service) {
				Some(Slot::Open(channel)) => return Ok(Arc::clone(channel)),
				Some(Slot::Opening(pending)) => pending.clone(),
				None => {
					let pending = open_channel(Arc::clone(transport), service.to_string());
					slots.insert(service.to_string(), Slot::Opening(pending.clone()));
					pending
				}
			}
		};

		let outcome = tokio::select! {
			biased;
			_ = cancel.cancelled() => return Err(Error::SessionClosed),
			outcome = pending.clone() => outcome,
		};

		let mut slots = self.slots.lock();
		let still_ours = matches!(slots.get(service), Some(Slot::Opening(current)) if current.ptr_eq(&pending));
		match outcome {
			Ok(channel) => {
				if still_ours {
					debug!(service, id = channel.id(), "channel cached");
					slots.insert(service.to_string(), Slot::Open(Arc::clone(&channel)));
				}
				Ok(channel)
			}
			Err(err) => {
				if still_ours {
					slots.remove(service);
				}
				Err(Error::from_shared(err))
			}
		}
	}
}

fn open_channel(transport: Arc<dyn Transport>, service: String) -> PendingOpen {
	async move {
		debug!(service = %service, "opening channel");
		match transport.open_channel(&service).await {
			Ok(raw) => Ok(Channel::new(&service, raw)),
			Err(err) => {
				debug!(service = %service, error = %err, "channel open failed");
				Err(Arc::new(err))
			}
		}
	}
	.boxed()
	.shared()
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use futures_util::future::join_all;

	use super::*;
	use crate::testing::MockTransport;

	fn transport() -> (MockTransport, Arc<dyn Transport>) {
		let mock = MockTransport::connected();
		let shared: Arc<dyn Transport> = Arc::new(mock.clone());
		(mock, shared)
	}

	#[tokio::test]
	async fn test_concurrent_first_use_opens_once() {
		let (transport, handle) = transport();
		transport.set_open_delay(Duration::from_millis(20));
		let registry = ChannelRegistry::new();
		let cancel = CancellationToken::new();

		let results = join_all((0..8).map(|_| registry.get("exec", &handle, &cancel))).await;

		let channels: Vec<Arc<Channel>> = results.into_iter().map(|r| r.unwrap()).collect();
		assert_eq!(transport.open_count("exec"), 1);
		assert!(channels.iter().all(|c| Arc::ptr_eq(c, &channels[0])));
	}

	#[tokio::test]
	async fn test_concurrent_failed_open_is_shared() {
		let (transport, handle) = transport();
		transport.refuse("exec");
		transport.set_open_delay(Duration::from_millis(20));
		let registry = ChannelRegistry::new();
		let cancel = CancellationToken::new();

		let results = join_all((0..4).map(|_| registry.get("exec", &handle, &cancel))).await;

		assert_eq!(transport.open_count("exec"), 1);
		for result in results {
			let err = result.unwrap_err();
			assert!(matches!(err, Error::ChannelUnavailable { ref service, .. } if service == "exec"), "{err:?}");
		}
		assert!(registry.cached("exec").is_none());

		transport.allow("exec");
		registry.get("exec", &handle, &cancel).await.unwrap();
		assert_eq!(transport.open_count("exec"), 2);
	}

	#[tokio::test]
	async fn test_cached_channel_skips_transport() {
		let (transport, handle) = transport();
		let registry = ChannelRegistry::new();
		let cancel = CancellationToken::new();

		let first = registry.get("shell", &handle, &cancel).await.unwrap();
		let second = registry.get("shell", &handle, &cancel).await.unwrap();

		assert!(Arc::ptr_eq(&first, &second));
		assert_eq!(transport.open_count("shell"), 1);
		assert_eq!(registry.names(), vec!["shell".to_string()]);
	}

	#[tokio::test]
	async fn test_unknown_service_is_unavailable() {
		let (transport, handle) = transport();
		let registry = ChannelRegistry::new();
		let cancel = CancellationToken::new();

		let err = registry.get("nope", &handle, &cancel).await.unwrap_err();

		assert!(matches!(err, Error::ChannelUnavailable { ref service, .. } if service == "nope"), "{err:?}");
		assert_eq!(transport.open_count("nope"), 0);
		assert!(registry.cached("nope").is_none());
	}

	#[tokio::test]
	async fn test_failed_open_can_be_retried() {
		let (transport, handle) = transport();
		transport.refuse("exec");
		let registry = ChannelRegistry::new();
		let cancel = CancellationToken::new();

		assert!(registry.get("exec", &handle, &cancel).await.is_err());
		assert!(registry.cached("exec").is_none());

		transport.allow("exec");
		registry.get("exec", &handle, &cancel).await.unwrap();
		assert_eq!(transport.open_count("exec"), 2);
	}

	#[tokio::test]
	async fn test_cancel_abandons_open_in_flight() {
		let (transport, handle) = transport();
		transport.set_open_delay(Duration::from_secs(60));
		let registry = ChannelRegistry::new();
		let cancel = CancellationToken::new();

		let trigger = cancel.clone();
		tokio::spawn(async move {
			tokio::time::sleep(Duration::from_millis(20)).await;
			trigger.cancel();
		});

		let err = registry.get("exec", &handle, &cancel).await.unwrap_err();
		assert!(err.is_closed(), "{err:?}");
	}
}
