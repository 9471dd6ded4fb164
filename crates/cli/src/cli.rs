use clap::Parser;
use clap::builder::Styles;
use clap::builder::styling::AnsiColor;
use goval_runtime::SessionConfig;
use goval_runtime::config::{CONNECT_TIMEOUT_ENV, SESSION_ENV, TIMEOUT_ENV, TOKEN_ENV};

/// Help colors: yellow headers, cyan literals.
fn cli_styles() -> Styles {
	Styles::styled()
		.header(AnsiColor::Yellow.on_default().bold())
		.usage(AnsiColor::Yellow.on_default().bold())
		.literal(AnsiColor::Cyan.on_default())
		.placeholder(AnsiColor::Cyan.on_default())
}

#[derive(Parser, Debug)]
#[command(name = "goval")]
#[command(about = "Interactive shell for remote workspace sessions")]
#[command(version)]
#[command(styles = cli_styles())]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Session cookie used by `.login`; takes precedence over the token argument
	#[arg(long, env = TOKEN_ENV, hide_env_values = true, value_name = "TOKEN")]
	pub token: Option<String>,

	/// Session id used by `.connect`; takes precedence over the id argument
	#[arg(long, env = SESSION_ENV, value_name = "ID")]
	pub id: Option<String>,

	/// Command timeout in milliseconds (0 or less waits forever)
	#[arg(long, env = TIMEOUT_ENV, value_name = "MS", allow_negative_numbers = true)]
	pub timeout: Option<i64>,

	/// Connect timeout in milliseconds
	#[arg(long, env = CONNECT_TIMEOUT_ENV, value_name = "MS")]
	pub connect_timeout: Option<u64>,
}

impl Cli {
	/// Session settings from flags; anything unset keeps its default.
	pub fn session_config(&self) -> SessionConfig {
		let mut config = SessionConfig::new();
		if let Some(token) = self.token.as_deref().filter(|t| !t.trim().is_empty()) {
			config = config.with_credential(token);
		}
		if let Some(id) = self.id.as_deref().filter(|id| !id.trim().is_empty()) {
			config = config.with_session_id(id);
		}
		if let Some(ms) = self.timeout {
			config = config.with_command_timeout_ms(ms);
		}
		if let Some(ms) = self.connect_timeout.filter(|ms| *ms > 0) {
			config = config.with_connect_timeout(std::time::Duration::from_millis(ms));
		}
		config
	}
}
