//! HTTP client for the account API: identity lookups and connection metadata.
//!
//! One [`ReplitApi`] serves both collaborator roles the session needs, so a
//! single `reqwest` connection pool is shared between them.

use std::time::Duration;

use async_trait::async_trait;
use goval_protocol::{ConnectionMetadata, CurrentUser, SessionDescriptor};
use reqwest::header::{COOKIE, HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, trace};

use crate::config::Credential;
use crate::error::{Error, Result};
use crate::identity::IdentityService;
use crate::metadata::{MetadataProvider, classify_rejection, parse_metadata};

/// Production API origin.
pub const DEFAULT_ORIGIN: &str = "https://replit.com";

/// Client build the metadata endpoint expects to be talking to.
const CLIENT_VERSION: &str = "7561851";

const CLIENT_NAME: &str = concat!("goval-rs/", env!("CARGO_PKG_VERSION"));

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const CURRENT_USER_QUERY: &str = r#"
query CurrentUser {
  currentUser {
    id
    username
    isHacker
  }
}"#;

const SESSION_QUERY: &str = r#"
query Repl($id: String!) {
  repl(id: $id) {
    ... on Repl {
      id
      title
      slug
      description
      language
      isPrivate
      lang {
        id
        runner: canUseShellRunner
        packager3: supportsPackager3
        terminal: usesTerminal2
        interpreter: usesInterpreter
        engine
        mainFile
        supportsMultiFiles
      }
    }
  }
}"#;

/// `reqwest`-backed [`IdentityService`] and [`MetadataProvider`].
#[derive(Debug, Clone)]
pub struct ReplitApi {
	http: reqwest::Client,
	origin: String,
}

impl ReplitApi {
	pub fn new() -> Result<Self> {
		Self::with_origin(DEFAULT_ORIGIN)
	}

	/// Targets another origin, e.g. a local stand-in server.
	pub fn with_origin(origin: impl Into<String>) -> Result<Self> {
		let mut headers = HeaderMap::new();
		headers.insert("x-requested-with", HeaderValue::from_static(CLIENT_NAME));
		headers.insert("referrer", HeaderValue::from_static(DEFAULT_ORIGIN));

		let http = reqwest::Client::builder()
			.user_agent(CLIENT_NAME)
			.default_headers(headers)
			.timeout(REQUEST_TIMEOUT)
			.build()?;

		Ok(Self {
			http,
			origin: origin.into().trim_end_matches('/').to_string(),
		})
	}

	pub fn origin(&self) -> &str {
		&self.origin
	}

	fn session_cookie(credential: &Credential) -> Result<HeaderValue> {
		HeaderValue::from_str(&format!("connect.sid={}", credential.expose()))
			.map_err(|_| Error::Configuration("credential contains characters not allowed in a cookie".into()))
	}

	/// Runs a GraphQL query and decodes `data.<field>`.
	async fn query<T: DeserializeOwned>(
		&self,
		credential: &Credential,
		query: &str,
		variables: Value,
		field: &str,
	) -> Result<T> {
		let url = format!("{}/graphql/", self.origin);
		debug!(field, "graphql query");

		let response = self
			.http
			.post(&url)
			.header(COOKIE, Self::session_cookie(credential)?)
			.json(&json!({ "query": query, "variables": variables }))
			.send()
			.await
			.map_err(|e| Error::Identity(format!("{field} request failed: {e}")))?;

		let status = response.status();
		let body = response
			.text()
			.await
			.map_err(|e| Error::Identity(format!("{field} response unreadable: {e}")))?;
		trace!(field, %status, "graphql response: {body}");

		let parsed: Value = serde_json::from_str(&body)
			.map_err(|e| Error::Identity(format!("{field} response is not JSON ({status}): {e}")))?;

		if let Some(errors) = parsed.get("errors").and_then(Value::as_array).filter(|e| !e.is_empty()) {
			let messages: Vec<&str> = errors
				.iter()
				.filter_map(|e| e.get("message").and_then(Value::as_str))
				.collect();
			return Err(Error::Identity(format!("{field} query failed: {}", messages.join("; "))));
		}

		match parsed.get("data").and_then(|data| data.get(field)) {
			Some(value) if !value.is_null() => serde_json::from_value(value.clone())
				.map_err(|e| Error::Identity(format!("unexpected {field} shape: {e}"))),
			_ => Err(Error::Identity(format!("unexpected response, expected {field}, received {body}"))),
		}
	}
}

#[async_trait]
impl IdentityService for ReplitApi {
	async fn current_user(&self, credential: &Credential) -> Result<CurrentUser> {
		self.query(credential, CURRENT_USER_QUERY, json!({}), "currentUser").await
	}

	async fn session_descriptor(&self, credential: &Credential, session_id: &str) -> Result<SessionDescriptor> {
		self.query(credential, SESSION_QUERY, json!({ "id": session_id }), "repl").await
	}
}

/// Abandoned requests count as an abort, not a transport failure.
fn request_error(err: reqwest::Error) -> Error {
	if err.is_timeout() { Error::Aborted } else { Error::Http(err) }
}

#[async_trait]
impl MetadataProvider for ReplitApi {
	async fn fetch_connection_metadata(&self, credential: &Credential, session_id: &str) -> Result<ConnectionMetadata> {
		let url = format!("{}/data/repls/{session_id}/get_connection_metadata", self.origin);
		debug!(session_id, "fetching connection metadata");

		let response = self
			.http
			.post(&url)
			.header(COOKIE, Self::session_cookie(credential)?)
			.json(&json!({ "clientVersion": CLIENT_VERSION, "format": "pbuf" }))
			.send()
			.await
			.map_err(request_error)?;

		let status = response.status().as_u16();
		let body = response.text().await.map_err(request_error)?;

		if status > 399 {
			return Err(classify_rejection(status, &body));
		}
		parse_metadata(session_id, &body)
	}
}
