//! WebSocket transport for the secure channel.
//!
//! - `connection`: outbound handle and close signal per connection
//! - `registry`: the single record store for live connections
//! - `dispatch`: explicit subscriber registry for decoded envelopes
//! - `handler`: upgrade, admission and the per-connection read loop

pub mod connection;
pub mod dispatch;
pub(crate) mod handler;
pub mod registry;

pub use connection::{ConnectionHandle, Outbound, SendError};
pub use dispatch::{
    ChannelSubscriber, EnvelopeSubscriber, InboundEnvelope, Origin, SubscriberRegistry,
    SubscriptionId,
};
pub use handler::CLOSE_TRY_AGAIN_LATER;
pub use registry::{ConnectionInfo, ConnectionRegistry, RegistryError};
