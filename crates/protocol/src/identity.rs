//! Identity records returned by the account query API.

use serde::{Deserialize, Serialize};

/// The account the credential belongs to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentUser {
	#[serde(default)]
	pub id: i64,
	pub username: String,
	/// Paid accounts are served by a separate evaluation cluster.
	#[serde(default)]
	pub is_hacker: bool,
}

/// What the remote workspace's language runtime supports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageCapabilities {
	#[serde(default)]
	pub id: String,
	#[serde(default)]
	pub runner: bool,
	#[serde(default)]
	pub packager3: bool,
	#[serde(default)]
	pub terminal: bool,
	#[serde(default)]
	pub interpreter: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub engine: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub main_file: Option<String>,
	#[serde(default)]
	pub supports_multi_files: bool,
}

/// The remote workspace a session targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescriptor {
	pub id: String,
	#[serde(default)]
	pub title: String,
	#[serde(default)]
	pub slug: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub language: Option<String>,
	#[serde(default)]
	pub is_private: bool,
	#[serde(default, rename = "lang")]
	pub capabilities: LanguageCapabilities,
}
