use std::time::Duration;

use super::*;
use crate::testing::MockApi;

#[tokio::test]
async fn ready_outcome_has_no_error() {
	let api = MockApi::new();
	let credential = Credential::new("secret");
	let cancel = CancellationToken::new();

	let outcome = get_connection_metadata(&api, Some(&credential), "xyz123", &cancel).await;

	assert!(outcome.error().is_none());
	assert_eq!(outcome.into_result().unwrap().token, "t0k");
	assert_eq!(api.metadata_requests(), vec!["xyz123".to_string()]);
}

#[tokio::test]
async fn missing_credential_is_configuration_error() {
	let api = MockApi::new();
	let cancel = CancellationToken::new();

	let outcome = get_connection_metadata(&api, None, "xyz123", &cancel).await;
	assert!(matches!(outcome.error(), Some(Error::Configuration(_))), "{outcome:?}");

	let empty = Credential::new("");
	let outcome = get_connection_metadata(&api, Some(&empty), "xyz123", &cancel).await;
	assert!(matches!(outcome.error(), Some(Error::Configuration(_))), "{outcome:?}");
	assert!(api.metadata_requests().is_empty());
}

#[tokio::test]
async fn cancel_aborts_fetch_in_flight() {
	let api = MockApi::new();
	api.hang_metadata();
	let credential = Credential::new("secret");
	let cancel = CancellationToken::new();

	let trigger = cancel.clone();
	tokio::spawn(async move {
		tokio::time::sleep(Duration::from_millis(20)).await;
		trigger.cancel();
	});

	let outcome = get_connection_metadata(&api, Some(&credential), "xyz123", &cancel).await;
	assert!(outcome.is_aborted(), "{outcome:?}");
	assert!(matches!(outcome.error(), Some(Error::Aborted)));
	assert!(matches!(outcome.into_result(), Err(Error::Aborted)));
}

#[tokio::test]
async fn provider_timeout_is_reported_as_aborted() {
	let api = MockApi::new();
	api.fail_metadata(|| Error::Aborted);
	let credential = Credential::new("secret");

	let outcome = get_connection_metadata(&api, Some(&credential), "xyz123", &CancellationToken::new()).await;

	assert!(matches!(outcome, MetadataOutcome::Aborted), "{outcome:?}");
}

#[tokio::test]
async fn provider_failure_is_folded_into_outcome() {
	let api = MockApi::new();
	api.fail_metadata(|| classify_rejection(403, r#"{"message":"Repl not found"}"#));
	let credential = Credential::new("secret");

	let outcome = get_connection_metadata(&api, Some(&credential), "xyz123", &CancellationToken::new()).await;

	match outcome.error() {
		Some(Error::RemoteRejected { status, message }) => {
			assert_eq!(*status, 403);
			assert_eq!(message, "Repl not found");
		}
		other => panic!("unexpected outcome: {other:?}"),
	}
}

#[test]
fn challenge_rejection_is_distinguished() {
	let err = classify_rejection(403, r#"{"message":"Captcha failed, please try again"}"#);
	assert!(matches!(err, Error::ChallengeFailed { status: 403, .. }), "{err:?}");
	assert!(err.is_metadata_failure());
}

#[test]
fn rejection_falls_back_to_raw_body() {
	let err = classify_rejection(500, "  upstream exploded \n");
	match err {
		Error::RemoteRejected { status, message } => {
			assert_eq!(status, 500);
			assert_eq!(message, "upstream exploded");
		}
		other => panic!("unexpected error: {other:?}"),
	}
}

#[test]
fn malformed_body_is_protocol_decode() {
	let err = parse_metadata("xyz123", "<html>nope</html>").unwrap_err();
	match err {
		Error::ProtocolDecode(message) => {
			assert!(message.contains("xyz123"));
			assert!(message.contains("<html>nope</html>"));
		}
		other => panic!("unexpected error: {other:?}"),
	}
}

#[test]
fn metadata_body_keeps_unknown_fields() {
	let metadata = parse_metadata("xyz123", r#"{"token":"abc","gurl":"wss://g.example","conmanURL":"https://c","extra":1}"#)
		.unwrap();
	assert_eq!(metadata.token, "abc");
	assert_eq!(metadata.gurl.as_deref(), Some("wss://g.example"));
	assert_eq!(metadata.conman_url.as_deref(), Some("https://c"));
	assert_eq!(metadata.extra.get("extra"), Some(&serde_json::json!(1)));
}
