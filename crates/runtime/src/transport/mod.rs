//! Transport seam: one physical duplex connection carrying many channels.
//!
//! The [`Transport`] trait is what the session drives. It resolves
//! [`open`](Transport::open) exactly once, with the root channel on success or
//! an error in place of a missing root channel. Framing and encoding are the
//! implementation's business; the core only sees [`RawChannel`] queues of JSON
//! payloads.

mod websocket;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use goval_protocol::CurrentUser;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::metadata::MetadataOutcome;

pub use websocket::WebSocketTransport;

/// Callback the transport invokes to obtain connection metadata while opening.
pub type MetadataHook = Arc<dyn Fn() -> BoxFuture<'static, MetadataOutcome> + Send + Sync>;

/// Who is connecting and to what, attached to the connection for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectContext {
	pub user: ContextUser,
	pub session: ContextSession,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextUser {
	pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSession {
	pub id: String,
}

impl ConnectContext {
	pub fn new(user_name: impl Into<String>, session_id: impl Into<String>) -> Self {
		Self {
			user: ContextUser { name: user_name.into() },
			session: ContextSession { id: session_id.into() },
		}
	}
}

/// Evaluation cluster to connect to when metadata does not name one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSelection {
	pub secure: bool,
	pub host: String,
}

impl HostSelection {
	/// Paid accounts live on the `hacker` cluster, everyone else on `global`.
	pub fn for_user(user: &CurrentUser) -> Self {
		let cluster = if user.is_hacker { "hacker" } else { "global" };
		Self {
			secure: true,
			host: format!("eval.{cluster}.replit.com"),
		}
	}

	/// Base URL with the WebSocket scheme, without a trailing slash.
	pub fn base_url(&self) -> String {
		let scheme = if self.secure { "wss" } else { "ws" };
		format!("{scheme}://{}", self.host)
	}
}

/// Everything [`Transport::open`] needs.
#[derive(Clone)]
pub struct OpenOptions {
	pub context: ConnectContext,
	pub host: HostSelection,
	pub fetch_metadata: MetadataHook,
	pub connect_timeout: Duration,
}

impl fmt::Debug for OpenOptions {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("OpenOptions")
			.field("context", &self.context)
			.field("host", &self.host)
			.field("connect_timeout", &self.connect_timeout)
			.finish()
	}
}

/// Raw queues for one logical channel.
///
/// Payloads sent on `outbound` are framed onto the channel by the transport.
/// Events for the channel arrive on `inbound` in transport order; the queue
/// ends when the connection goes away.
#[derive(Debug)]
pub struct RawChannel {
	pub id: i32,
	pub outbound: mpsc::UnboundedSender<Value>,
	pub inbound: mpsc::UnboundedReceiver<Value>,
}

impl RawChannel {
	/// Creates a channel and returns the transport-side ends alongside it.
	pub fn pair(id: i32) -> (Self, mpsc::UnboundedReceiver<Value>, mpsc::UnboundedSender<Value>) {
		let (outbound, outbound_rx) = mpsc::unbounded_channel();
		let (inbound_tx, inbound) = mpsc::unbounded_channel();
		(Self { id, outbound, inbound }, outbound_rx, inbound_tx)
	}
}

/// One physical connection to the remote host.
#[async_trait]
pub trait Transport: Send + Sync {
	/// Connects and resolves once the root channel is established.
	async fn open(&self, options: OpenOptions) -> Result<RawChannel>;

	/// Opens a logical channel for `service` over the established connection.
	async fn open_channel(&self, service: &str) -> Result<RawChannel>;

	/// Closes the connection. Safe to call more than once or before `open`.
	async fn close(&self);
}
