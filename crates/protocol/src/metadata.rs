//! Connection metadata handed to the transport when it opens.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Token material for one physical connection.
///
/// Fields the client does not interpret are kept in [`extra`](Self::extra)
/// so they survive a round trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionMetadata {
	pub token: String,
	/// Base WebSocket URL of the evaluation cluster, e.g. `wss://eval.global.replit.com`.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub gurl: Option<String>,
	#[serde(rename = "conmanURL", default, skip_serializing_if = "Option::is_none")]
	pub conman_url: Option<String>,
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}
