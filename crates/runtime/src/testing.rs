//! Test doubles for the session's collaborators.
//!
//! [`MockApi`] stands in for the account API and [`MockTransport`] for the
//! physical connection, so session behavior can be exercised without a
//! network. Both are cheap to clone; clones share state, which lets a test
//! hand one clone to the session and keep another for inspection.
//!
//! # Example
//!
//! ```ignore
//! use goval_runtime::testing::{MockApi, MockTransport};
//!
//! let api = MockApi::new();
//! let transport = MockTransport::new();
//! transport.respond_with("exec", |_| Some(json!({"output": "ok"})));
//!
//! let session = Session::with_api(config, Arc::new(api.clone()), Arc::new(transport.clone()));
//! session.connect().await?;
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use goval_protocol::{ConnectionMetadata, CurrentUser, LanguageCapabilities, SessionDescriptor};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{Notify, mpsc};

use crate::config::Credential;
use crate::error::{Error, Result};
use crate::identity::IdentityService;
use crate::metadata::MetadataProvider;
use crate::transport::{ConnectContext, HostSelection, OpenOptions, RawChannel, Transport};

type MetadataFailure = Arc<dyn Fn() -> Error + Send + Sync>;

struct ApiState {
	user: CurrentUser,
	descriptor: SessionDescriptor,
	metadata: ConnectionMetadata,
	metadata_failure: Option<MetadataFailure>,
	identity_failure: Option<String>,
	hang_identity: bool,
	hang_metadata: bool,
	identity_calls: usize,
	metadata_requests: Vec<String>,
}

/// In-memory [`IdentityService`] and [`MetadataProvider`].
///
/// Defaults to user `alice` owning session `xyz123` with slug `my-repl`.
#[derive(Clone)]
pub struct MockApi {
	state: Arc<Mutex<ApiState>>,
}

impl Default for MockApi {
	fn default() -> Self {
		Self::new()
	}
}

impl MockApi {
	pub fn new() -> Self {
		let state = ApiState {
			user: CurrentUser {
				id: 1,
				username: "alice".into(),
				is_hacker: false,
			},
			descriptor: SessionDescriptor {
				id: "xyz123".into(),
				title: "My Repl".into(),
				slug: "my-repl".into(),
				language: Some("python3".into()),
				capabilities: LanguageCapabilities {
					id: "python3".into(),
					..Default::default()
				},
				..Default::default()
			},
			metadata: ConnectionMetadata {
				token: "t0k".into(),
				..Default::default()
			},
			metadata_failure: None,
			identity_failure: None,
			hang_identity: false,
			hang_metadata: false,
			identity_calls: 0,
			metadata_requests: Vec::new(),
		};
		Self {
			state: Arc::new(Mutex::new(state)),
		}
	}

	pub fn set_user(&self, user: CurrentUser) {
		self.state.lock().user = user;
	}

	pub fn set_descriptor(&self, descriptor: SessionDescriptor) {
		self.state.lock().descriptor = descriptor;
	}

	pub fn set_metadata(&self, metadata: ConnectionMetadata) {
		self.state.lock().metadata = metadata;
	}

	/// Makes every metadata fetch fail with the error `make` builds.
	pub fn fail_metadata(&self, make: impl Fn() -> Error + Send + Sync + 'static) {
		self.state.lock().metadata_failure = Some(Arc::new(make));
	}

	pub fn fail_identity(&self, message: impl Into<String>) {
		self.state.lock().identity_failure = Some(message.into());
	}

	/// Metadata fetches never complete.
	pub fn hang_metadata(&self) {
		self.state.lock().hang_metadata = true;
	}

	/// Identity lookups never complete.
	pub fn hang_identity(&self) {
		self.state.lock().hang_identity = true;
	}

	/// Number of identity lookups made, of either kind.
	pub fn identity_calls(&self) -> usize {
		self.state.lock().identity_calls
	}

	/// Session ids metadata was requested for, in order.
	pub fn metadata_requests(&self) -> Vec<String> {
		self.state.lock().metadata_requests.clone()
	}

	async fn identity_gate(&self) -> Result<()> {
		let (hang, failure) = {
			let mut state = self.state.lock();
			state.identity_calls += 1;
			(state.hang_identity, state.identity_failure.clone())
		};
		if hang {
			std::future::pending::<()>().await;
		}
		match failure {
			Some(message) => Err(Error::Identity(message)),
			None => Ok(()),
		}
	}
}

#[async_trait]
impl IdentityService for MockApi {
	async fn current_user(&self, _credential: &Credential) -> Result<CurrentUser> {
		self.identity_gate().await?;
		Ok(self.state.lock().user.clone())
	}

	async fn session_descriptor(&self, _credential: &Credential, session_id: &str) -> Result<SessionDescriptor> {
		self.identity_gate().await?;
		let descriptor = self.state.lock().descriptor.clone();
		if descriptor.id != session_id {
			return Err(Error::Identity(format!("unexpected response, expected repl, received null for {session_id}")));
		}
		Ok(descriptor)
	}
}

#[async_trait]
impl MetadataProvider for MockApi {
	async fn fetch_connection_metadata(&self, _credential: &Credential, session_id: &str) -> Result<ConnectionMetadata> {
		let (hang, failure, metadata) = {
			let mut state = self.state.lock();
			state.metadata_requests.push(session_id.to_string());
			(state.hang_metadata, state.metadata_failure.clone(), state.metadata.clone())
		};
		if hang {
			std::future::pending::<()>().await;
		}
		match failure {
			Some(make) => Err(make()),
			None => Ok(metadata),
		}
	}
}

type Responder = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

#[derive(Default)]
struct TransportState {
	connected: bool,
	closed: bool,
	hang_open: bool,
	next_id: i32,
	contexts: Vec<ConnectContext>,
	hosts: Vec<HostSelection>,
	open_delay: Option<Duration>,
	open_counts: HashMap<String, usize>,
	refused: HashSet<String>,
	responders: HashMap<String, Responder>,
	inbound: HashMap<String, mpsc::UnboundedSender<Value>>,
	sent: HashMap<String, Vec<Value>>,
	/// Transport side of the root channel's inbound queue.
	root: Option<mpsc::UnboundedSender<Value>>,
}

#[derive(Default)]
struct TransportInner {
	state: Mutex<TransportState>,
	sent: Notify,
}

/// In-memory [`Transport`] with scripted channel behavior.
#[derive(Clone, Default)]
pub struct MockTransport {
	inner: Arc<TransportInner>,
}

impl MockTransport {
	pub fn new() -> Self {
		Self::default()
	}

	/// A transport that behaves as if `open` already succeeded.
	pub fn connected() -> Self {
		let transport = Self::new();
		transport.inner.state.lock().connected = true;
		transport
	}

	/// Delays every channel open by `delay`.
	pub fn set_open_delay(&self, delay: Duration) {
		self.inner.state.lock().open_delay = Some(delay);
	}

	/// `open` never completes (it still runs the metadata hook first).
	pub fn hang_open(&self) {
		self.inner.state.lock().hang_open = true;
	}

	/// Channel opens for `service` fail as if the remote refused them.
	pub fn refuse(&self, service: &str) {
		self.inner.state.lock().refused.insert(service.to_string());
	}

	pub fn allow(&self, service: &str) {
		self.inner.state.lock().refused.remove(service);
	}

	/// Replies to each payload sent on `service` with whatever `respond` returns.
	pub fn respond_with(&self, service: &str, respond: impl Fn(&Value) -> Option<Value> + Send + Sync + 'static) {
		self.inner
			.state
			.lock()
			.responders
			.insert(service.to_string(), Arc::new(respond));
	}

	/// Pushes `event` onto `service`'s inbound queue. Returns false if the channel is not open.
	pub fn emit(&self, service: &str, event: Value) -> bool {
		let state = self.inner.state.lock();
		state
			.inbound
			.get(service)
			.is_some_and(|tx| tx.send(event).is_ok())
	}

	/// Pushes a control-channel frame. Returns false once the root queue's reader is gone.
	pub fn emit_control(&self, event: Value) -> bool {
		let state = self.inner.state.lock();
		state.root.as_ref().is_some_and(|tx| tx.send(event).is_ok())
	}

	/// How many times a channel open was requested for `service`.
	pub fn open_count(&self, service: &str) -> usize {
		self.inner.state.lock().open_counts.get(service).copied().unwrap_or(0)
	}

	/// Total `open` attempts that reached the transport.
	pub fn connect_count(&self) -> usize {
		self.inner.state.lock().contexts.len()
	}

	pub fn contexts(&self) -> Vec<ConnectContext> {
		self.inner.state.lock().contexts.clone()
	}

	pub fn hosts(&self) -> Vec<HostSelection> {
		self.inner.state.lock().hosts.clone()
	}

	pub fn is_closed(&self) -> bool {
		self.inner.state.lock().closed
	}

	/// Payloads sent on `service` so far.
	pub fn sent(&self, service: &str) -> Vec<Value> {
		self.inner.state.lock().sent.get(service).cloned().unwrap_or_default()
	}

	/// Waits until at least `count` payloads were sent on `service`.
	pub async fn wait_for_sent(&self, service: &str, count: usize) -> Vec<Value> {
		loop {
			let notified = self.inner.sent.notified();
			let sent = self.sent(service);
			if sent.len() >= count {
				return sent;
			}
			notified.await;
		}
	}

	fn record_sent(inner: &TransportInner, service: &str, payload: Value) {
		let reply = {
			let mut state = inner.state.lock();
			state.sent.entry(service.to_string()).or_default().push(payload.clone());
			let responder = state.responders.get(service).cloned();
			let reply = responder
				.and_then(|respond| respond(&payload))
				.and_then(|reply| state.inbound.get(service).map(|tx| (tx.clone(), reply)));
			reply
		};
		inner.sent.notify_waiters();
		if let Some((tx, reply)) = reply {
			let _ = tx.send(reply);
		}
	}
}

#[async_trait]
impl Transport for MockTransport {
	async fn open(&self, options: OpenOptions) -> Result<RawChannel> {
		{
			let mut state = self.inner.state.lock();
			state.contexts.push(options.context.clone());
			state.hosts.push(options.host.clone());
		}

		(options.fetch_metadata)().await.into_result()?;

		if self.inner.state.lock().hang_open {
			std::future::pending::<()>().await;
		}

		let (root, _outbound, inbound_tx) = RawChannel::pair(0);
		let mut state = self.inner.state.lock();
		if state.closed {
			return Err(Error::SessionClosed);
		}
		state.connected = true;
		state.root = Some(inbound_tx);
		Ok(root)
	}

	async fn open_channel(&self, service: &str) -> Result<RawChannel> {
		let delay = {
			let mut state = self.inner.state.lock();
			if !state.connected || state.closed {
				return Err(Error::Transport("not connected".into()));
			}
			*state.open_counts.entry(service.to_string()).or_default() += 1;
			state.open_delay
		};
		if let Some(delay) = delay {
			tokio::time::sleep(delay).await;
		}

		let (raw, mut outbound_rx, inbound_tx) = {
			let mut state = self.inner.state.lock();
			if state.refused.contains(service) {
				return Err(Error::ChannelUnavailable {
					service: service.to_string(),
					reason: "refused by remote".into(),
				});
			}
			state.next_id += 1;
			RawChannel::pair(state.next_id)
		};
		self.inner.state.lock().inbound.insert(service.to_string(), inbound_tx);

		let inner = Arc::clone(&self.inner);
		let name = service.to_string();
		tokio::spawn(async move {
			while let Some(payload) = outbound_rx.recv().await {
				Self::record_sent(&inner, &name, payload);
			}
		});

		Ok(raw)
	}

	async fn close(&self) {
		let mut state = self.inner.state.lock();
		state.closed = true;
		state.connected = false;
		state.root = None;
		state.inbound.clear();
	}
}
