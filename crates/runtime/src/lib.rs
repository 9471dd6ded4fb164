//! goval runtime - session lifecycle, channel multiplexing, and command correlation
//!
//! This crate drives one session against a remote workspace container:
//!
//! - **Session**: connect, close, and the public channel operations
//! - **Registry**: one cached channel per service name, opened on first use
//! - **Correlator**: pairs a command with the next event on its channel
//! - **Transport**: the physical WebSocket connection and its framing
//! - **API**: identity lookups and connection metadata over HTTP
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │           Session            │  connect / close / attach / detach / command
//! │  ┌──────────┐ ┌────────────┐ │
//! │  │ Registry │ │ Correlator │ │
//! │  └────┬─────┘ └─────┬──────┘ │
//! │       └──── Channel ┘        │  per-service pump + listeners
//! └──────┬───────────────┬───────┘
//!        │ Transport     │ IdentityService / MetadataProvider
//! ┌──────▼──────┐  ┌─────▼─────┐
//! │  WebSocket  │  │ ReplitApi │
//! └─────────────┘  └───────────┘
//! ```
//!
//! The collaborators are traits, so sessions can be driven entirely by the
//! doubles in [`testing`].

pub mod api;
pub mod channel;
pub mod config;
pub mod correlator;
pub mod error;
pub mod identity;
pub mod metadata;
pub mod registry;
pub mod session;
pub mod subscription;
pub mod testing;
pub mod transport;

pub use api::ReplitApi;
pub use channel::Channel;
pub use config::{Credential, SessionConfig};
pub use error::{Error, Result};
pub use identity::IdentityService;
pub use metadata::{MetadataOutcome, MetadataProvider, get_connection_metadata};
pub use registry::ChannelRegistry;
pub use session::Session;
pub use subscription::Subscription;
pub use transport::{ConnectContext, HostSelection, OpenOptions, RawChannel, Transport, WebSocketTransport};
