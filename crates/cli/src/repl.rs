//! Line grammar for the interactive shell.

use serde_json::Value;

use crate::error::{CliError, Result};

/// One parsed input line.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
	Empty,
	Login(Option<String>),
	Connect(Option<String>),
	Attach(String),
	Detach(String),
	Close,
	Channels,
	Clear,
	Exit,
	/// `<service> <json>`
	Command { service: String, payload: Value },
}

fn optional(rest: &str) -> Option<String> {
	rest.split_whitespace().next().map(str::to_string)
}

fn required(rest: &str, usage: &str) -> Result<String> {
	optional(rest).ok_or_else(|| CliError::Usage(format!("usage: {usage}")))
}

pub fn parse_line(line: &str) -> Result<ReplCommand> {
	let line = line.trim();
	if line.is_empty() {
		return Ok(ReplCommand::Empty);
	}

	let (head, rest) = match line.split_once(char::is_whitespace) {
		Some((head, rest)) => (head, rest.trim()),
		None => (line, ""),
	};

	if let Some(name) = head.strip_prefix('.') {
		return match name {
			"login" => Ok(ReplCommand::Login(optional(rest))),
			"connect" => Ok(ReplCommand::Connect(optional(rest))),
			"attach" => Ok(ReplCommand::Attach(required(rest, ".attach <service>")?)),
			"detach" => Ok(ReplCommand::Detach(required(rest, ".detach <service>")?)),
			"close" => Ok(ReplCommand::Close),
			"channels" => Ok(ReplCommand::Channels),
			"clear" => Ok(ReplCommand::Clear),
			"exit" | "quit" => Ok(ReplCommand::Exit),
			other => Err(CliError::UnknownCommand(other.to_string())),
		};
	}

	if rest.is_empty() {
		return Err(CliError::Usage(format!("usage: {head} <json>")));
	}
	let payload = serde_json::from_str(rest).map_err(|source| CliError::InvalidJson {
		service: head.to_string(),
		source,
	})?;
	Ok(ReplCommand::Command {
		service: head.to_string(),
		payload,
	})
}

#[cfg(test)]
mod tests;
