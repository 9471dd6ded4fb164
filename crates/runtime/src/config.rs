//! Session configuration.
//!
//! A [`SessionConfig`] can be built explicitly or read from the environment
//! with [`SessionConfig::from_env`]. The CLI layers its own flags on top.

use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};

/// Environment variable holding the account credential.
pub const TOKEN_ENV: &str = "REPLIT_TOKEN";
/// Environment variable holding the target session identifier.
pub const SESSION_ENV: &str = "REPLIT_ID";
/// Environment variable overriding the per-command timeout in milliseconds.
pub const TIMEOUT_ENV: &str = "REPLIT_TIMEOUT";
/// Environment variable overriding the connect timeout in milliseconds.
pub const CONNECT_TIMEOUT_ENV: &str = "REPLIT_CONNECT_TIMEOUT";

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_millis(3000);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(3000);

/// Opaque account secret. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
	pub fn new(secret: impl Into<String>) -> Self {
		Self(secret.into())
	}

	pub fn expose(&self) -> &str {
		&self.0
	}

	pub fn is_empty(&self) -> bool {
		self.0.trim().is_empty()
	}
}

impl fmt::Debug for Credential {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("Credential(<redacted>)")
	}
}

/// Everything a [`Session`](crate::Session) needs before it can connect.
#[derive(Debug, Clone)]
pub struct SessionConfig {
	pub credential: Option<Credential>,
	pub session_id: Option<String>,
	/// `None` waits for command replies indefinitely.
	pub command_timeout: Option<Duration>,
	pub connect_timeout: Duration,
}

impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			credential: None,
			session_id: None,
			command_timeout: Some(DEFAULT_COMMAND_TIMEOUT),
			connect_timeout: DEFAULT_CONNECT_TIMEOUT,
		}
	}
}

impl SessionConfig {
	pub fn new() -> Self {
		Self::default()
	}

	/// Reads the recognized `REPLIT_*` variables from the process environment.
	pub fn from_env() -> Result<Self> {
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	/// Builds a config from an arbitrary variable source.
	pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
		let mut config = Self::default();

		if let Some(token) = lookup(TOKEN_ENV).filter(|v| !v.trim().is_empty()) {
			config.credential = Some(Credential::new(token));
		}
		if let Some(id) = lookup(SESSION_ENV).filter(|v| !v.trim().is_empty()) {
			config.session_id = Some(id);
		}
		if let Some(raw) = lookup(TIMEOUT_ENV) {
			config.command_timeout = timeout_from_millis(parse_millis(TIMEOUT_ENV, &raw)?);
		}
		if let Some(raw) = lookup(CONNECT_TIMEOUT_ENV) {
			let ms = parse_millis(CONNECT_TIMEOUT_ENV, &raw)?;
			config.connect_timeout = timeout_from_millis(ms).ok_or_else(|| {
				Error::Configuration(format!("{CONNECT_TIMEOUT_ENV} must be a positive number of milliseconds"))
			})?;
		}

		Ok(config)
	}

	pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
		self.credential = Some(Credential::new(credential));
		self
	}

	pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
		self.session_id = Some(session_id.into());
		self
	}

	/// Sets the command timeout; `ms <= 0` disables it.
	pub fn with_command_timeout_ms(mut self, ms: i64) -> Self {
		self.command_timeout = timeout_from_millis(ms);
		self
	}

	pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
		self.connect_timeout = timeout;
		self
	}

	/// The credential, or a [`Error::Configuration`] naming the variable to set.
	pub fn require_credential(&self) -> Result<&Credential> {
		self.credential
			.as_ref()
			.filter(|c| !c.is_empty())
			.ok_or_else(|| Error::Configuration(format!("no credential provided; log in or set {TOKEN_ENV}")))
	}

	/// The session id, or a [`Error::Configuration`] naming the variable to set.
	pub fn require_session_id(&self) -> Result<&str> {
		self.session_id
			.as_deref()
			.filter(|id| !id.trim().is_empty())
			.ok_or_else(|| Error::Configuration(format!("no session id found; pass one to connect or set {SESSION_ENV}")))
	}
}

/// Converts a millisecond setting into a timeout, where `<= 0` means none.
pub fn timeout_from_millis(ms: i64) -> Option<Duration> {
	u64::try_from(ms).ok().filter(|ms| *ms > 0).map(Duration::from_millis)
}

fn parse_millis(key: &str, raw: &str) -> Result<i64> {
	raw.trim()
		.parse::<i64>()
		.map_err(|_| Error::Configuration(format!("{key} must be an integer number of milliseconds, got '{raw}'")))
}
