//! Connection-metadata collaborator and failure classification.
//!
//! The transport calls back into [`get_connection_metadata`] while it opens.
//! Every failure is folded into a [`MetadataOutcome`] instead of escaping as an
//! error, so the transport can decide to abort the connect attempt cleanly.

use async_trait::async_trait;
use goval_protocol::ConnectionMetadata;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::Credential;
use crate::error::{Error, Result};

/// Message fragment the metadata endpoint uses for anti-automation rejections.
const CHALLENGE_FAILED_MARKER: &str = "captcha failed";

/// Source of connection metadata for a session.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
	/// Fetches the material needed to open the physical transport.
	async fn fetch_connection_metadata(&self, credential: &Credential, session_id: &str) -> Result<ConnectionMetadata>;
}

/// Result of a metadata fetch as seen by the transport.
#[derive(Debug)]
pub enum MetadataOutcome {
	Ready(ConnectionMetadata),
	/// The fetch was cancelled or timed out before a response arrived.
	Aborted,
	Failed(Error),
}

static ABORTED: Error = Error::Aborted;

impl MetadataOutcome {
	/// The failure, or [`None`] when metadata is ready.
	pub fn error(&self) -> Option<&Error> {
		match self {
			MetadataOutcome::Ready(_) => None,
			MetadataOutcome::Aborted => Some(&ABORTED),
			MetadataOutcome::Failed(err) => Some(err),
		}
	}

	pub fn is_aborted(&self) -> bool {
		matches!(self, MetadataOutcome::Aborted)
	}

	pub fn into_result(self) -> Result<ConnectionMetadata> {
		match self {
			MetadataOutcome::Ready(metadata) => Ok(metadata),
			MetadataOutcome::Aborted => Err(Error::Aborted),
			MetadataOutcome::Failed(err) => Err(err),
		}
	}
}

/// Fetches connection metadata, folding every failure into the outcome.
///
/// Cancelling `cancel` aborts the fetch in flight; nothing received so far is
/// parsed.
pub async fn get_connection_metadata(
	provider: &dyn MetadataProvider,
	credential: Option<&Credential>,
	session_id: &str,
	cancel: &CancellationToken,
) -> MetadataOutcome {
	let Some(credential) = credential.filter(|c| !c.is_empty()) else {
		return MetadataOutcome::Failed(Error::Configuration("no credential provided for connection metadata".into()));
	};

	let fetched = tokio::select! {
		biased;
		_ = cancel.cancelled() => {
			debug!(session_id, "connection metadata fetch aborted");
			return MetadataOutcome::Aborted;
		}
		res = provider.fetch_connection_metadata(credential, session_id) => res,
	};

	match fetched {
		Ok(metadata) => MetadataOutcome::Ready(metadata),
		Err(Error::Aborted) => MetadataOutcome::Aborted,
		Err(err) => {
			warn!(session_id, error = %err, "connection metadata fetch failed");
			MetadataOutcome::Failed(err)
		}
	}
}

#[derive(Deserialize)]
struct RemoteMessage {
	#[serde(default)]
	message: Option<String>,
}

/// Maps a non-success metadata response to the matching error.
pub fn classify_rejection(status: u16, body: &str) -> Error {
	let message = serde_json::from_str::<RemoteMessage>(body)
		.ok()
		.and_then(|m| m.message)
		.unwrap_or_else(|| body.trim().to_string());

	if message.to_ascii_lowercase().contains(CHALLENGE_FAILED_MARKER) {
		Error::ChallengeFailed { status, message }
	} else {
		Error::RemoteRejected { status, message }
	}
}

/// Decodes a successful metadata response body.
pub fn parse_metadata(session_id: &str, body: &str) -> Result<ConnectionMetadata> {
	serde_json::from_str(body).map_err(|e| {
		Error::ProtocolDecode(format!("invalid JSON while fetching connection metadata for {session_id}: {e}: {body:?}"))
	})
}

#[cfg(test)]
mod tests;
