//! Secure Channel - authenticated, encrypted, rate-limited WebSocket messaging.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         SECURE CHANNEL                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ConfigReactor ──restart / hot-apply──▶ ChannelServer            │
//! │                                             │ (listener, axum)   │
//! │                                             ▼                    │
//! │  upgrade ─▶ Authenticator ─▶ ConnectionRegistry (admit/evict)    │
//! │                                             │                    │
//! │  frame ───▶ RateLimiter ─▶ FrameCodec ─▶ SubscriberRegistry      │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Wire pipeline
//!
//! Outbound: JSON → encrypt (XChaCha20-Poly1305, base64 armor) → optional
//! zlib deflate. Uncompressed envelopes travel as text frames, compressed
//! ones as binary frames. Inbound mirrors this exactly.
//!
//! # Usage
//!
//! ```ignore
//! use secure_channel::{ChannelServer, ChannelSettings};
//! use std::sync::Arc;
//!
//! let settings = ChannelSettings::load(Some("channel.toml".as_ref()))?;
//! let server = Arc::new(ChannelServer::from_settings(&settings)?);
//! server.subscribe(Arc::new(|env: &Envelope, origin: &Origin| {
//!     println!("{} from {}", env.kind(), origin.principal);
//! }));
//! server.start().await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod codec;
pub mod domain;
pub mod middleware;
pub mod reactor;
pub mod service;
pub mod ws;

// Re-exports for public API
pub use codec::{ConfidentialityProvider, DecodeError, EncodeError, FrameCodec, WireFrame, XChaChaProvider};
pub use domain::{
    ChannelConfig, ChannelError, ChannelResult, ChannelSettings, ConfigError, ConnectionId,
    Envelope, ErrorPayload, LiveConfig, MessageSource, ServerState,
};
pub use middleware::{AuthOutcome, Authenticator, ChannelMetrics, Identity, StaticTokenAuthenticator};
pub use reactor::{classify, ConfigChange, ConfigReactor};
pub use service::{BroadcastReport, ChannelServer};
pub use ws::{ChannelSubscriber, EnvelopeSubscriber, InboundEnvelope, Origin, SendError, SubscriptionId};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
