//! Wire types for the goval multiplexed session protocol.
//!
//! This crate holds the serializable records shared by the runtime and the
//! CLI. It has no I/O and no async dependencies.
//!
//! # Main Types
//!
//! - [`Envelope`] - One framed command on a channel (channel id, optional ref, body)
//! - [`OpenChannel`] / [`OpenChannelResponse`] - Control-channel open handshake
//! - [`CurrentUser`] / [`SessionDescriptor`] - Identity lookups
//! - [`ConnectionMetadata`] - Token material for opening the transport
//! - [`SERVICES`] - Service names a session may open channels for

pub mod envelope;
pub mod identity;
pub mod metadata;
pub mod services;

pub use envelope::{
	CONTROL_CHANNEL, ContainerState, Envelope, OpenChannel, OpenChannelAction, OpenChannelResponse,
	OpenChannelState,
};
pub use identity::{CurrentUser, LanguageCapabilities, SessionDescriptor};
pub use metadata::ConnectionMetadata;
pub use services::{SERVICES, is_known_service};
