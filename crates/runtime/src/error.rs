//! Error types for the goval runtime.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the goval runtime.
#[derive(Debug, Error)]
pub enum Error {
	/// Caller-fixable setup problem (missing credential or session id).
	#[error("configuration error: {0}")]
	Configuration(String),

	/// Current-user or session lookup failed.
	#[error("identity lookup failed: {0}")]
	Identity(String),

	/// The metadata endpoint refused the request.
	#[error("remote rejected request ({status}): {message}")]
	RemoteRejected { status: u16, message: String },

	/// The metadata endpoint demanded an anti-automation challenge we cannot pass.
	#[error("challenge failed ({status}): {message}")]
	ChallengeFailed { status: u16, message: String },

	/// A response body could not be decoded.
	#[error("malformed response: {0}")]
	ProtocolDecode(String),

	/// The metadata fetch was aborted before it completed.
	#[error("connection metadata fetch aborted")]
	Aborted,

	/// The service name is unknown, reserved, or refused by the remote end.
	#[error("channel '{service}' unavailable: {reason}")]
	ChannelUnavailable { service: String, reason: String },

	/// No event arrived on the channel before the command deadline.
	#[error(
		"command on '{service}' timed out after {timeout_ms}ms. If you wish to wait longer, raise the REPLIT_TIMEOUT environment variable (milliseconds, 0 disables the timeout)"
	)]
	CommandTimeout { service: String, timeout_ms: u64 },

	/// The session was closed while the operation was pending, or before it started.
	#[error("session closed")]
	SessionClosed,

	/// A channel operation was attempted before `connect()` succeeded.
	#[error("session is not connected")]
	NotConnected,

	/// The transport could not establish the root channel.
	#[error("failed to connect: {0}")]
	ConnectFailed(String),

	/// Transport-level failure after the connection was established.
	#[error("transport error: {0}")]
	Transport(String),

	/// A command payload could not be framed.
	#[error("invalid command payload: {0}")]
	InvalidPayload(String),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	/// HTTP client error.
	#[error("HTTP error: {0}")]
	Http(#[from] reqwest::Error),
}

impl Error {
	/// Returns true if this is a command timeout.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::CommandTimeout { .. })
	}

	pub(crate) fn command_timeout(service: &str, timeout: Duration) -> Self {
		Error::CommandTimeout {
			service: service.to_string(),
			timeout_ms: timeout.as_millis() as u64,
		}
	}

	/// Recovers an owned error from one shared between several waiters.
	///
	/// Foreign source errors cannot be cloned, so `Json` and `Http` come back
	/// as `Transport` carrying their message.
	pub(crate) fn from_shared(shared: Arc<Error>) -> Self {
		let err = match Arc::try_unwrap(shared) {
			Ok(err) => return err,
			Err(shared) => shared,
		};
		match &*err {
			Error::Configuration(msg) => Error::Configuration(msg.clone()),
			Error::Identity(msg) => Error::Identity(msg.clone()),
			Error::RemoteRejected { status, message } => Error::RemoteRejected {
				status: *status,
				message: message.clone(),
			},
			Error::ChallengeFailed { status, message } => Error::ChallengeFailed {
				status: *status,
				message: message.clone(),
			},
			Error::ProtocolDecode(msg) => Error::ProtocolDecode(msg.clone()),
			Error::Aborted => Error::Aborted,
			Error::ChannelUnavailable { service, reason } => Error::ChannelUnavailable {
				service: service.clone(),
				reason: reason.clone(),
			},
			Error::CommandTimeout { service, timeout_ms } => Error::CommandTimeout {
				service: service.clone(),
				timeout_ms: *timeout_ms,
			},
			Error::SessionClosed => Error::SessionClosed,
			Error::NotConnected => Error::NotConnected,
			Error::ConnectFailed(msg) => Error::ConnectFailed(msg.clone()),
			Error::Transport(msg) => Error::Transport(msg.clone()),
			Error::InvalidPayload(msg) => Error::InvalidPayload(msg.clone()),
			Error::Json(_) | Error::Http(_) => Error::Transport(err.to_string()),
		}
	}

	/// Returns true if the session was closed under the operation.
	pub fn is_closed(&self) -> bool {
		matches!(self, Error::SessionClosed)
	}

	/// Returns true for failures raised on the connection-metadata path.
	pub fn is_metadata_failure(&self) -> bool {
		matches!(
			self,
			Error::RemoteRejected { .. } | Error::ChallengeFailed { .. } | Error::ProtocolDecode(_) | Error::Aborted
		)
	}

	/// Returns the remote status code for rejected metadata requests.
	pub fn status(&self) -> Option<u16> {
		match self {
			Error::RemoteRejected { status, .. } | Error::ChallengeFailed { status, .. } => Some(*status),
			_ => None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn timeout_message_mentions_override() {
		let err = Error::CommandTimeout {
			service: "exec".to_string(),
			timeout_ms: 50,
		};

		let msg = err.to_string();
		assert!(err.is_timeout());
		assert!(msg.contains("50ms"), "{msg}");
		assert!(msg.contains(crate::config::TIMEOUT_ENV), "{msg}");
	}

	#[test]
	fn shared_error_keeps_its_variant() {
		let shared = Arc::new(Error::ChannelUnavailable {
			service: "exec".into(),
			reason: "refused by remote".into(),
		});
		let held = Arc::clone(&shared);

		let err = Error::from_shared(shared);
		assert!(matches!(err, Error::ChannelUnavailable { ref service, .. } if service == "exec"), "{err:?}");
		assert!(matches!(Error::from_shared(held), Error::ChannelUnavailable { .. }));

		let json = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
		let shared = Arc::new(Error::Json(json));
		let _held = Arc::clone(&shared);
		assert!(matches!(Error::from_shared(shared), Error::Transport(ref msg) if msg.starts_with("JSON error")));
	}

	#[test]
	fn metadata_failures_are_classified() {
		assert!(Error::Aborted.is_metadata_failure());
		assert!(
			Error::ChallengeFailed {
				status: 403,
				message: "captcha failed".into()
			}
			.is_metadata_failure()
		);
		assert!(!Error::SessionClosed.is_metadata_failure());
		assert_eq!(
			Error::RemoteRejected {
				status: 404,
				message: "no repl".into()
			}
			.status(),
			Some(404)
		);
	}
}
