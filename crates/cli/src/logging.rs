//! Diagnostics for the shell.
//!
//! The prompt and attachment output own stdout, so log lines go to stderr.
//! By default only errors are shown: anything chattier would land between a
//! printed event and the next prompt. Raw frame logging from tungstenite is
//! kept at warn until `-vv`, where everything is wanted.

use tracing_subscriber::EnvFilter;

/// Default directives for a `-v` count. `RUST_LOG` overrides them.
pub fn default_directives(verbosity: u8) -> &'static str {
	match verbosity {
		0 => "error",
		1 => "goval=info,goval_cli=info,goval_runtime=info,tungstenite=warn,tokio_tungstenite=warn",
		_ => "debug",
	}
}

pub fn init_logging(verbosity: u8) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(verbosity)));

	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_writer(std::io::stderr)
		.with_target(verbosity > 1)
		.compact()
		.init();
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn quiet_by_default() {
		assert_eq!(default_directives(0), "error");
	}

	#[test]
	fn single_v_keeps_frame_logging_quiet() {
		let directives = default_directives(1);
		assert!(directives.contains("goval_runtime=info"), "{directives}");
		assert!(directives.contains("tokio_tungstenite=warn"), "{directives}");
		assert_eq!(default_directives(4), "debug");
	}

	#[test]
	fn directives_parse() {
		for verbosity in 0..3 {
			EnvFilter::try_new(default_directives(verbosity)).unwrap();
		}
	}
}
