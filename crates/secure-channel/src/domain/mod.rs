//! Domain types for the secure channel.
//!
//! Envelopes, connection ids, configuration, lifecycle state and errors.

pub mod config;
pub mod correlation;
pub mod envelope;
pub mod error;
pub mod state;

pub use config::{AuthConfig, ChannelConfig, ChannelSettings, ConfigError, CryptoConfig, LiveConfig};
pub use correlation::ConnectionId;
pub use envelope::{
    codes, now_millis, ConnectionStatusPayload, Envelope, ErrorPayload, MessageSource,
};
pub use error::{ChannelError, ChannelResult};
pub use state::ServerState;
