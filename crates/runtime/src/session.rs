//! Session facade: connect, channel access, subscriptions, and commands.
//!
//! A [`Session`] owns one transport connection and the registry of channels
//! opened over it. Every suspension point selects on the session's
//! cancellation token, so [`Session::close`] fails whatever is pending with
//! [`Error::SessionClosed`].

use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use goval_protocol::{CurrentUser, SessionDescriptor};
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::ReplitApi;
use crate::channel::Channel;
use crate::config::{Credential, SessionConfig};
use crate::correlator::correlate;
use crate::error::{Error, Result};
use crate::identity::IdentityService;
use crate::metadata::{MetadataProvider, get_connection_metadata};
use crate::registry::ChannelRegistry;
use crate::subscription::Subscription;
use crate::transport::{ConnectContext, HostSelection, MetadataHook, OpenOptions, Transport, WebSocketTransport};

#[derive(Default)]
struct SessionState {
	user: Option<CurrentUser>,
	descriptor: Option<SessionDescriptor>,
	connected: bool,
	closed: bool,
}

/// One connection to a remote session.
pub struct Session {
	config: SessionConfig,
	identity: Arc<dyn IdentityService>,
	metadata: Arc<dyn MetadataProvider>,
	transport: Arc<dyn Transport>,
	registry: ChannelRegistry,
	state: Mutex<SessionState>,
	/// Serializes `connect` calls.
	connecting: tokio::sync::Mutex<()>,
	cancel: CancellationToken,
}

impl Session {
	pub fn new(
		config: SessionConfig,
		identity: Arc<dyn IdentityService>,
		metadata: Arc<dyn MetadataProvider>,
		transport: Arc<dyn Transport>,
	) -> Self {
		Self {
			config,
			identity,
			metadata,
			transport,
			registry: ChannelRegistry::new(),
			state: Mutex::new(SessionState::default()),
			connecting: tokio::sync::Mutex::new(()),
			cancel: CancellationToken::new(),
		}
	}

	/// Uses one collaborator for both identity and metadata.
	pub fn with_api<A>(config: SessionConfig, api: Arc<A>, transport: Arc<dyn Transport>) -> Self
	where
		A: IdentityService + MetadataProvider + 'static,
	{
		let identity: Arc<dyn IdentityService> = api.clone();
		let metadata: Arc<dyn MetadataProvider> = api;
		Self::new(config, identity, metadata, transport)
	}

	/// A session against the production API over WebSockets.
	pub fn replit(config: SessionConfig) -> Result<Self> {
		let api = Arc::new(ReplitApi::new()?);
		Ok(Self::with_api(config, api, Arc::new(WebSocketTransport::new())))
	}

	pub fn config(&self) -> &SessionConfig {
		&self.config
	}

	pub fn is_connected(&self) -> bool {
		self.state.lock().connected
	}

	pub fn is_closed(&self) -> bool {
		self.state.lock().closed
	}

	/// The connecting account, once `connect` has resolved it.
	pub fn current_user(&self) -> Option<CurrentUser> {
		self.state.lock().user.clone()
	}

	/// The target session, once `connect` has resolved it.
	pub fn descriptor(&self) -> Option<SessionDescriptor> {
		self.state.lock().descriptor.clone()
	}

	/// Services with a cached channel, sorted.
	pub fn open_channels(&self) -> Vec<String> {
		self.registry.names()
	}

	/// Resolves identity, fetches metadata, and opens the transport.
	///
	/// No-op when already connected. Nothing is retried; on failure the
	/// session stays disconnected and `connect` may be called again.
	pub async fn connect(&self) -> Result<()> {
		let _connecting = tokio::select! {
			biased;
			_ = self.cancel.cancelled() => return Err(Error::SessionClosed),
			guard = self.connecting.lock() => guard,
		};
		{
			let state = self.state.lock();
			if state.closed {
				return Err(Error::SessionClosed);
			}
			if state.connected {
				return Ok(());
			}
		}

		let session_id = self.config.require_session_id()?.to_string();
		let credential = self.config.require_credential()?.clone();
		info!(session_id = %session_id, "connecting");

		let user = self.cancellable(self.identity.current_user(&credential)).await?;
		debug!(user = %user.username, hacker = user.is_hacker, "resolved current user");
		self.state.lock().user = Some(user.clone());

		let descriptor = self
			.cancellable(self.identity.session_descriptor(&credential, &session_id))
			.await?;
		debug!(slug = %descriptor.slug, "resolved session");
		self.state.lock().descriptor = Some(descriptor.clone());

		let target = if descriptor.id.is_empty() { session_id } else { descriptor.id.clone() };
		let options = OpenOptions {
			context: ConnectContext::new(&user.username, &target),
			host: HostSelection::for_user(&user),
			fetch_metadata: self.metadata_hook(credential, target),
			connect_timeout: self.config.connect_timeout,
		};

		// Nothing reads the root channel after open. Dropping it closes its
		// inbound queue so the transport stops routing control traffic into it.
		match self.cancellable(self.transport.open(options)).await {
			Ok(root) => drop(root),
			Err(err) => {
				warn!(error = %err, "connect failed");
				return Err(err);
			}
		};

		let mut state = self.state.lock();
		if state.closed {
			return Err(Error::SessionClosed);
		}
		state.connected = true;
		info!(slug = %descriptor.slug, "connected");
		Ok(())
	}

	/// Closes the session. Idempotent; pending operations fail with [`Error::SessionClosed`].
	pub async fn close(&self) {
		{
			let mut state = self.state.lock();
			if state.closed {
				return;
			}
			state.closed = true;
			state.connected = false;
		}
		self.cancel.cancel();
		self.transport.close().await;
		info!("session closed");
	}

	/// The channel for `service`, opened on first use.
	pub async fn channel(&self, service: &str) -> Result<Arc<Channel>> {
		self.ensure_connected()?;
		self.registry.get(service, &self.transport, &self.cancel).await
	}

	/// Streams every event on `service` from now on.
	pub async fn attach(&self, service: &str) -> Result<Subscription> {
		let channel = self.channel(service).await?;
		debug!(service, "attached");
		Ok(Subscription::new(channel))
	}

	/// Ends every subscription on `service`. Returns how many were removed.
	///
	/// Never opens or closes the channel itself.
	pub fn detach(&self, service: &str) -> usize {
		let removed = self
			.registry
			.cached(service)
			.map(|channel| channel.remove_subscribers())
			.unwrap_or(0);
		debug!(service, removed, "detached");
		removed
	}

	/// Sends `payload` on `service` and resolves with the next event.
	pub async fn command(&self, service: &str, payload: Value) -> Result<Value> {
		let channel = self.channel(service).await?;
		correlate(&channel, payload, self.config.command_timeout, &self.cancel).await
	}

	fn ensure_connected(&self) -> Result<()> {
		let state = self.state.lock();
		if state.closed {
			Err(Error::SessionClosed)
		} else if !state.connected {
			Err(Error::NotConnected)
		} else {
			Ok(())
		}
	}

	async fn cancellable<T>(&self, operation: impl Future<Output = Result<T>>) -> Result<T> {
		tokio::select! {
			biased;
			_ = self.cancel.cancelled() => Err(Error::SessionClosed),
			res = operation => res,
		}
	}

	fn metadata_hook(&self, credential: Credential, session_id: String) -> MetadataHook {
		let provider = Arc::clone(&self.metadata);
		let cancel = self.cancel.clone();
		Arc::new(move || {
			let provider = Arc::clone(&provider);
			let credential = credential.clone();
			let session_id = session_id.clone();
			let cancel = cancel.clone();
			async move { get_connection_metadata(provider.as_ref(), Some(&credential), &session_id, &cancel).await }
				.boxed()
		})
	}
}

impl Drop for Session {
	fn drop(&mut self) {
		self.cancel.cancel();
	}
}

impl std::fmt::Debug for Session {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.state.lock();
		f.debug_struct("Session")
			.field("session_id", &self.config.session_id)
			.field("connected", &state.connected)
			.field("closed", &state.closed)
			.finish()
	}
}
