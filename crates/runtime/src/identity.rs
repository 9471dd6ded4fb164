//! Identity collaborator: who is connecting and to which session.

use async_trait::async_trait;
use goval_protocol::{CurrentUser, SessionDescriptor};

use crate::config::Credential;
use crate::error::Result;

/// Resolves the current user and the session being connected to.
///
/// Failures surface as [`Error::Identity`](crate::Error::Identity).
#[async_trait]
pub trait IdentityService: Send + Sync {
	/// The account the credential belongs to.
	async fn current_user(&self, credential: &Credential) -> Result<CurrentUser>;

	/// Descriptor for the session named by `session_id`.
	async fn session_descriptor(&self, credential: &Credential, session_id: &str) -> Result<SessionDescriptor>;
}
