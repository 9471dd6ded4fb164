use serde_json::json;

use super::*;

#[test]
fn blank_lines_are_empty() {
	assert_eq!(parse_line("").unwrap(), ReplCommand::Empty);
	assert_eq!(parse_line("   \t").unwrap(), ReplCommand::Empty);
}

#[test]
fn dot_commands() {
	assert_eq!(parse_line(".login").unwrap(), ReplCommand::Login(None));
	assert_eq!(parse_line(".login abc").unwrap(), ReplCommand::Login(Some("abc".into())));
	assert_eq!(parse_line("  .connect   xyz123  ").unwrap(), ReplCommand::Connect(Some("xyz123".into())));
	assert_eq!(parse_line(".attach shell").unwrap(), ReplCommand::Attach("shell".into()));
	assert_eq!(parse_line(".detach shell").unwrap(), ReplCommand::Detach("shell".into()));
	assert_eq!(parse_line(".close").unwrap(), ReplCommand::Close);
	assert_eq!(parse_line(".channels").unwrap(), ReplCommand::Channels);
	assert_eq!(parse_line(".clear").unwrap(), ReplCommand::Clear);
	assert_eq!(parse_line(".exit").unwrap(), ReplCommand::Exit);
}

#[test]
fn attach_needs_a_service() {
	let err = parse_line(".attach").unwrap_err();
	assert_eq!(err.to_string(), "usage: .attach <service>");
}

#[test]
fn unknown_dot_command() {
	assert!(matches!(parse_line(".frobnicate").unwrap_err(), CliError::UnknownCommand(name) if name == "frobnicate"));
}

#[test]
fn service_command_keeps_json_with_spaces() {
	let parsed = parse_line(r#"exec {"exec": {"args": ["echo", "a b"]}}"#).unwrap();
	assert_eq!(
		parsed,
		ReplCommand::Command {
			service: "exec".into(),
			payload: json!({"exec": {"args": ["echo", "a b"]}}),
		}
	);
}

#[test]
fn service_command_requires_valid_json() {
	assert!(matches!(parse_line("exec").unwrap_err(), CliError::Usage(_)));
	match parse_line("exec {nope").unwrap_err() {
		CliError::InvalidJson { service, .. } => assert_eq!(service, "exec"),
		other => panic!("unexpected error: {other:?}"),
	}
}
