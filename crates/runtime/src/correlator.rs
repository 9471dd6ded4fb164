//! Command correlation over a channel without request ids.
//!
//! The wire protocol carries no request id on service channels, so a reply is
//! simply the next event the channel delivers after the command is sent.
//! Commands on one channel are serialized through the channel's command lock,
//! which keeps a reply from being claimed by a different command.

use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::channel::{Channel, ListenerId};
use crate::error::{Error, Result};

/// One in-flight command waiting for its reply.
///
/// Dropping it unregisters the waiter, so a reply arriving after a timeout or
/// cancellation is delivered to nobody.
struct PendingCommand<'a> {
	channel: &'a Channel,
	id: ListenerId,
	rx: oneshot::Receiver<Value>,
}

impl<'a> PendingCommand<'a> {
	fn register(channel: &'a Channel) -> Self {
		let (id, rx) = channel.register_waiter();
		Self { channel, id, rx }
	}
}

impl Drop for PendingCommand<'_> {
	fn drop(&mut self) {
		// A delivered reply already consumed the waiter, so only an abandoned one is left here.
		if self.channel.remove_listener(self.id) {
			debug!(service = self.channel.service(), "PendingCommand: removed orphaned waiter");
		}
	}
}

/// Resolves after `timeout`, or never when there is none.
async fn deadline(timeout: Option<Duration>) {
	match timeout {
		Some(after) => tokio::time::sleep(after).await,
		None => std::future::pending().await,
	}
}

/// Sends `payload` on `channel` and resolves with the channel's next event.
///
/// Fails with [`Error::CommandTimeout`] if no event arrives within `timeout`
/// (`None` waits indefinitely) and with [`Error::SessionClosed`] once
/// `cancel` fires.
pub async fn correlate(
	channel: &Channel,
	payload: Value,
	timeout: Option<Duration>,
	cancel: &CancellationToken,
) -> Result<Value> {
	let _turn = tokio::select! {
		biased;
		_ = cancel.cancelled() => return Err(Error::SessionClosed),
		turn = channel.lock_commands() => turn,
	};

	// Register before sending so a fast reply cannot slip past.
	let mut pending = PendingCommand::register(channel);
	channel.send(payload)?;
	debug!(service = channel.service(), timeout_ms = ?timeout.map(|t| t.as_millis()), "command sent");

	let outcome = tokio::select! {
		biased;
		_ = cancel.cancelled() => Err(Error::SessionClosed),
		event = &mut pending.rx => event.map_err(|_| {
			Error::Transport(format!("channel '{}' closed before a reply arrived", channel.service()))
		}),
		_ = deadline(timeout) => {
			let after = timeout.unwrap_or_default();
			debug!(service = channel.service(), "command timed out after {}ms", after.as_millis());
			Err(Error::command_timeout(channel.service(), after))
		}
	};
	outcome
}
