//! Channel envelopes and the control-channel handshake.
//!
//! Every frame on the wire is a JSON object carrying the numeric channel it
//! belongs to, an optional `ref` used to correlate control requests, and the
//! command body itself (a single field naming the command kind):
//!
//! ```text
//! {"channel": 0, "ref": "r1", "openChan": {"service": "exec", "action": "ATTACH_OR_CREATE"}}
//! {"channel": 0, "ref": "r1", "openChanRes": {"id": 4, "state": "CREATED"}}
//! {"channel": 4, "exec": {"args": ["ls"]}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Channel id reserved for connection-level control traffic.
pub const CONTROL_CHANNEL: i32 = 0;

/// A single framed command on a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
	/// Channel the command travels on.
	#[serde(default)]
	pub channel: i32,
	/// Correlation tag, only used on the control channel.
	#[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
	pub reference: Option<String>,
	/// Command body.
	#[serde(flatten)]
	pub body: Map<String, Value>,
}

impl Envelope {
	pub fn new(channel: i32, body: Map<String, Value>) -> Self {
		Self {
			channel,
			reference: None,
			body,
		}
	}

	/// Wraps a caller-supplied payload for `channel`.
	///
	/// Returns [`None`] if the payload is not a JSON object. A `channel` field
	/// in the payload is overwritten; a string `ref` is lifted into
	/// [`reference`](Self::reference).
	pub fn from_payload(channel: i32, payload: Value) -> Option<Self> {
		let Value::Object(mut body) = payload else {
			return None;
		};
		body.remove("channel");
		let reference = match body.remove("ref") {
			Some(Value::String(r)) => Some(r),
			_ => None,
		};
		Some(Self {
			channel,
			reference,
			body,
		})
	}

	/// Builds the control-channel request that opens a service channel.
	pub fn open_channel_request(reference: impl Into<String>, request: &OpenChannel) -> Self {
		let mut body = Map::new();
		body.insert(
			"openChan".to_string(),
			serde_json::to_value(request).unwrap_or(Value::Null),
		);
		Self {
			channel: CONTROL_CHANNEL,
			reference: Some(reference.into()),
			body,
		}
	}

	/// Name of the command kind carried in the body, if any.
	pub fn kind(&self) -> Option<&str> {
		self.body.keys().next().map(String::as_str)
	}

	/// Parses an `openChanRes` body.
	pub fn open_channel_response(&self) -> Option<OpenChannelResponse> {
		self.body
			.get("openChanRes")
			.and_then(|v| serde_json::from_value(v.clone()).ok())
	}

	/// Parses a `containerState` body.
	pub fn container_state(&self) -> Option<ContainerState> {
		self.body
			.get("containerState")
			.and_then(|v| serde_json::from_value(v.clone()).ok())
	}

	/// Converts the envelope into the event value handed to listeners.
	pub fn into_event(self) -> Value {
		Value::Object(self.body)
	}
}

/// What the remote end should do when a channel for the service exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpenChannelAction {
	Create,
	Attach,
	#[default]
	AttachOrCreate,
}

/// Body of an `openChan` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenChannel {
	pub service: String,
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub name: String,
	#[serde(default)]
	pub action: OpenChannelAction,
}

impl OpenChannel {
	pub fn new(service: impl Into<String>) -> Self {
		Self {
			service: service.into(),
			name: String::new(),
			action: OpenChannelAction::AttachOrCreate,
		}
	}
}

/// Result state of an `openChan` request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OpenChannelState {
	Created,
	Attached,
	Error,
}

/// Body of an `openChanRes` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenChannelResponse {
	#[serde(default)]
	pub id: i32,
	pub state: OpenChannelState,
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub error: String,
}

impl OpenChannelResponse {
	pub fn is_error(&self) -> bool {
		self.state == OpenChannelState::Error
	}
}

/// Body of a `containerState` notification on the control channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerState {
	pub state: String,
}

impl ContainerState {
	pub fn is_ready(&self) -> bool {
		self.state.eq_ignore_ascii_case("READY")
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn payload_is_wrapped_with_channel_id() {
		let envelope = Envelope::from_payload(4, json!({"exec": {"args": ["ls"]}, "channel": 99})).unwrap();
		let wire = serde_json::to_value(&envelope).unwrap();

		assert_eq!(wire, json!({"channel": 4, "exec": {"args": ["ls"]}}));
	}

	#[test]
	fn non_object_payload_is_rejected() {
		assert!(Envelope::from_payload(1, json!([1, 2, 3])).is_none());
		assert!(Envelope::from_payload(1, json!("ls")).is_none());
	}

	#[test]
	fn open_channel_request_format() {
		let envelope = Envelope::open_channel_request("r7", &OpenChannel::new("exec"));
		let wire = serde_json::to_value(&envelope).unwrap();

		assert_eq!(
			wire,
			json!({"channel": 0, "ref": "r7", "openChan": {"service": "exec", "action": "ATTACH_OR_CREATE"}})
		);
	}

	#[test]
	fn open_channel_response_parsing() {
		let envelope: Envelope =
			serde_json::from_value(json!({"channel": 0, "ref": "r7", "openChanRes": {"id": 12, "state": "CREATED"}})).unwrap();

		assert_eq!(envelope.reference.as_deref(), Some("r7"));
		let res = envelope.open_channel_response().unwrap();
		assert_eq!(res.id, 12);
		assert!(!res.is_error());
	}

	#[test]
	fn open_channel_error_response() {
		let envelope: Envelope = serde_json::from_value(
			json!({"channel": 0, "ref": "r2", "openChanRes": {"state": "ERROR", "error": "no such service"}}),
		)
		.unwrap();

		let res = envelope.open_channel_response().unwrap();
		assert!(res.is_error());
		assert_eq!(res.error, "no such service");
	}

	#[test]
	fn container_ready_detection() {
		let envelope: Envelope = serde_json::from_value(json!({"channel": 0, "containerState": {"state": "READY"}})).unwrap();

		assert_eq!(envelope.kind(), Some("containerState"));
		assert!(envelope.container_state().unwrap().is_ready());
	}

	#[test]
	fn event_drops_routing_fields() {
		let envelope: Envelope = serde_json::from_value(json!({"channel": 3, "output": "hi\n"})).unwrap();

		assert_eq!(envelope.into_event(), json!({"output": "hi\n"}));
	}
}
