use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
	#[error("please authenticate with .login before opening a session")]
	NotLoggedIn,

	#[error("no session is open; use .connect first")]
	NoSession,

	#[error("{0}")]
	Usage(String),

	#[error("unknown command .{0}")]
	UnknownCommand(String),

	#[error("{0} is not a channel or cannot be attached to")]
	UnknownService(String),

	#[error("already attached to {0}")]
	AlreadyAttached(String),

	#[error("not attached to {0}")]
	NotAttached(String),

	#[error("invalid JSON for {service}: {source}")]
	InvalidJson {
		service: String,
		#[source]
		source: serde_json::Error,
	},

	#[error(transparent)]
	Runtime(#[from] goval_runtime::Error),

	#[error(transparent)]
	Io(#[from] std::io::Error),
}

impl CliError {
	/// A follow-up hint for errors the user can act on.
	pub fn hint(&self) -> Option<&'static str> {
		match self {
			CliError::Runtime(err) if err.is_timeout() => Some("set --timeout 0 to wait indefinitely"),
			CliError::Runtime(goval_runtime::Error::ChallengeFailed { .. }) => {
				Some("the account API asked for a captcha; log in through a browser and retry")
			}
			CliError::Runtime(goval_runtime::Error::NotConnected) | CliError::NoSession => Some("try .connect <id>"),
			CliError::UnknownService(_) => Some("run .channels to list services"),
			_ => None,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn runtime_errors_keep_their_message() {
		let err = CliError::from(goval_runtime::Error::SessionClosed);
		assert_eq!(err.to_string(), "session closed");
		assert!(err.hint().is_none());
	}

	#[test]
	fn service_errors_point_at_channel_list() {
		let err = CliError::UnknownService("bogus".into());
		assert_eq!(err.to_string(), "bogus is not a channel or cannot be attached to");
		assert_eq!(err.hint(), Some("run .channels to list services"));
	}
}
