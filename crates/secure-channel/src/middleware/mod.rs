//! Per-connection policy: authentication, rate limiting and metrics.
//!
//! Order on the connection path: Auth (once, before upgrade completes) →
//! Registry admit → RateLimit (every data frame) → Codec → Dispatch.

pub mod auth;
pub mod metrics;
pub mod rate_limit;

pub use auth::{constant_time_compare, AuthOutcome, Authenticator, Identity, StaticTokenAuthenticator};
pub use metrics::ChannelMetrics;
pub use rate_limit::{Admission, RateLimitParams, RateLimitWindow, RateLimiter};
