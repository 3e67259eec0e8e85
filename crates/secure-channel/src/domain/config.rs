//! Channel configuration with validation.
//!
//! [`ChannelSettings`] is what an operator writes (TOML file + environment
//! overrides). [`ChannelConfig`] is the live, reconfigurable part that the
//! config reactor diffs and applies to a running server.

use crate::middleware::rate_limit::RateLimitParams;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Default listening port
pub const DEFAULT_PORT: u16 = 3711;

/// Default max messages per rate-limit window
pub const DEFAULT_RATE_LIMIT_MAX_MESSAGES: u32 = 100;

/// Default rate-limit window (60s)
pub const DEFAULT_RATE_LIMIT_WINDOW_MS: u64 = 60_000;

/// Default maximum frame size, also the inflate bound (1MB)
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// Full operator-facing settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    /// Live-reconfigurable channel parameters
    pub channel: ChannelConfig,
    /// Static token authenticator policy
    pub auth: AuthConfig,
    /// Confidentiality provider key material
    pub crypto: CryptoConfig,
}

/// Shared, live view of the channel configuration.
///
/// Read on every inbound frame; written only by the config reactor.
#[derive(Debug, Clone, Default)]
pub struct LiveConfig {
    inner: Arc<RwLock<ChannelConfig>>,
}

impl LiveConfig {
    /// Live view starting at `config`
    pub fn new(config: ChannelConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Copy of the current configuration
    pub fn current(&self) -> ChannelConfig {
        self.inner.read().clone()
    }

    /// Current rate-limit parameters
    pub fn rate_limit(&self) -> RateLimitParams {
        self.inner.read().rate_limit()
    }

    /// Swap in `config`, returning the previous value
    pub(crate) fn replace(&self, config: ChannelConfig) -> ChannelConfig {
        std::mem::replace(&mut *self.inner.write(), config)
    }
}

/// Live channel configuration.
///
/// `host` and `port` are structural (a change needs a restart); every other
/// field is applied in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Bind address
    pub host: IpAddr,
    /// Listening port (0 = ephemeral, useful in tests)
    pub port: u16,
    /// Max inbound frames per connection per window
    pub rate_limit_max_messages: u32,
    /// Window length in milliseconds
    pub rate_limit_window_ms: u64,
    /// Max inbound frame size and max inflated size, in bytes
    pub max_message_bytes: usize,
    /// Max simultaneously admitted connections
    pub max_connections: usize,
    /// Outbound frames buffered per connection before sends report backpressure
    pub outbound_buffer: usize,
    /// Upper bound on how long `stop()` waits for connection tasks to drain
    pub drain_timeout_ms: u64,
    /// Compress status and broadcast envelopes
    pub compress_outbound: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            rate_limit_max_messages: DEFAULT_RATE_LIMIT_MAX_MESSAGES,
            rate_limit_window_ms: DEFAULT_RATE_LIMIT_WINDOW_MS,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            max_connections: 1024,
            outbound_buffer: 256,
            drain_timeout_ms: 5_000,
            compress_outbound: true,
        }
    }
}

impl ChannelConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit_max_messages == 0 {
            return Err(ConfigError::InvalidRateLimit(
                "rate_limit_max_messages cannot be 0".into(),
            ));
        }

        if self.rate_limit_window_ms == 0 {
            return Err(ConfigError::InvalidRateLimit(
                "rate_limit_window_ms cannot be 0".into(),
            ));
        }

        if self.max_message_bytes == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_message_bytes cannot be 0".into(),
            ));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidLimit(
                "max_connections cannot be 0".into(),
            ));
        }

        if self.outbound_buffer == 0 {
            return Err(ConfigError::InvalidLimit(
                "outbound_buffer cannot be 0".into(),
            ));
        }

        Ok(())
    }

    /// Get bind address
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Rate-limit parameters as read by the limiter on every frame
    pub fn rate_limit(&self) -> RateLimitParams {
        RateLimitParams {
            max_messages: self.rate_limit_max_messages,
            window_ms: self.rate_limit_window_ms,
        }
    }

    /// Drain timeout as a `Duration`
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

/// Static token authenticator policy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Accepted token -> principal
    pub tokens: HashMap<String, String>,
}

/// Confidentiality key material
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Pre-shared passphrase the channel key is derived from
    pub shared_secret: String,
}

impl std::fmt::Debug for CryptoConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoConfig")
            .field("shared_secret", &"<redacted>")
            .finish()
    }
}

impl ChannelSettings {
    /// Load settings from a TOML file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_env_overrides(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse a TOML settings file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&raw)
    }

    /// Parse TOML settings text
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Override fields from `SC_*` variables. `lookup` is injectable for tests.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("SC_HOST") {
            self.channel.host = host
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("SC_HOST: invalid address {host}")))?;
        }
        if let Some(port) = lookup("SC_PORT") {
            self.channel.port = port
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("SC_PORT: invalid port {port}")))?;
        }
        if let Some(max) = lookup("SC_RATE_LIMIT_MAX_MESSAGES") {
            self.channel.rate_limit_max_messages = max.parse().map_err(|_| {
                ConfigError::InvalidRateLimit(format!("SC_RATE_LIMIT_MAX_MESSAGES: {max}"))
            })?;
        }
        if let Some(window) = lookup("SC_RATE_LIMIT_WINDOW_MS") {
            self.channel.rate_limit_window_ms = window.parse().map_err(|_| {
                ConfigError::InvalidRateLimit(format!("SC_RATE_LIMIT_WINDOW_MS: {window}"))
            })?;
        }
        if let Some(secret) = lookup("SC_SHARED_SECRET") {
            self.crypto.shared_secret = secret;
        }
        Ok(())
    }

    /// Sections that differ from `other` but are only read when the server
    /// is built: `auth` and `crypto`. A reload cannot apply them.
    pub fn restart_only_changes(&self, other: &ChannelSettings) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.auth != other.auth {
            changed.push("auth");
        }
        if self.crypto != other.crypto {
            changed.push("crypto");
        }
        changed
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.channel.validate()?;
        if self.crypto.shared_secret.is_empty() {
            return Err(ConfigError::Invalid(
                "crypto.shared_secret must be set (or SC_SHARED_SECRET)".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Invalid rate limiting configuration
    #[error("invalid rate limit: {0}")]
    InvalidRateLimit(String),
    /// Invalid size or count limit
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    /// Settings file could not be read
    #[error("cannot read settings: {0}")]
    Io(String),
    /// Settings file is not valid TOML for this schema
    #[error("cannot parse settings: {0}")]
    Parse(String),
    /// General configuration error
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ChannelConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.port, 3711);
        assert_eq!(config.rate_limit_max_messages, 100);
        assert_eq!(config.rate_limit_window_ms, 60_000);
    }

    #[test]
    fn test_bind_addr() {
        let config = ChannelConfig::default();
        assert_eq!(config.bind_addr().port(), 3711);
        assert!(config.bind_addr().ip().is_loopback());
    }

    #[test]
    fn test_rate_limit_validation() {
        let mut config = ChannelConfig::default();
        config.rate_limit_max_messages = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRateLimit(_))
        ));

        let mut config = ChannelConfig::default();
        config.rate_limit_window_ms = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidRateLimit(_))
        ));
    }

    #[test]
    fn test_limit_validation() {
        let mut config = ChannelConfig::default();
        config.outbound_buffer = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidLimit(_))));
    }

    #[test]
    fn test_parse_toml_with_defaults() {
        let settings = ChannelSettings::from_toml(
            r#"
            [channel]
            port = 4000
            rate_limit_max_messages = 5

            [auth.tokens]
            "token-a" = "alice"

            [crypto]
            shared_secret = "s3cret"
            "#,
        )
        .unwrap();

        assert_eq!(settings.channel.port, 4000);
        assert_eq!(settings.channel.rate_limit_max_messages, 5);
        assert_eq!(settings.channel.rate_limit_window_ms, DEFAULT_RATE_LIMIT_WINDOW_MS);
        assert_eq!(settings.auth.tokens.get("token-a").map(String::as_str), Some("alice"));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            ChannelSettings::from_toml("[channel]\nport = \"not a port\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = ChannelSettings::default();
        let env: HashMap<&str, &str> = [
            ("SC_PORT", "9000"),
            ("SC_RATE_LIMIT_MAX_MESSAGES", "7"),
            ("SC_RATE_LIMIT_WINDOW_MS", "250"),
            ("SC_SHARED_SECRET", "from-env"),
        ]
        .into_iter()
        .collect();

        settings
            .apply_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(settings.channel.port, 9000);
        assert_eq!(settings.channel.rate_limit_max_messages, 7);
        assert_eq!(settings.channel.rate_limit_window_ms, 250);
        assert_eq!(settings.crypto.shared_secret, "from-env");
    }

    #[test]
    fn test_env_override_rejects_bad_port() {
        let mut settings = ChannelSettings::default();
        let result = settings.apply_env_overrides(|k| {
            (k == "SC_PORT").then(|| "seventy".to_string())
        });
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_secret_fails_validation() {
        let settings = ChannelSettings::default();
        assert!(matches!(settings.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_live_config_replace_is_visible_to_clones() {
        let live = LiveConfig::new(ChannelConfig::default());
        let reader = live.clone();
        let mut next = ChannelConfig::default();
        next.rate_limit_max_messages = 1;

        let previous = live.replace(next);
        assert_eq!(previous.rate_limit_max_messages, 100);
        assert_eq!(reader.rate_limit().max_messages, 1);
    }

    #[test]
    fn test_crypto_debug_is_redacted() {
        let crypto = CryptoConfig {
            shared_secret: "hunter2".into(),
        };
        assert!(!format!("{:?}", crypto).contains("hunter2"));
    }
    #[test]
    fn test_restart_only_changes() {
        let base = ChannelSettings::from_toml(
            r#"
            [auth.tokens]
            "token-a" = "alice"

            [crypto]
            shared_secret = "one"
            "#,
        )
        .unwrap();

        let mut reloaded = base.clone();
        reloaded.channel.port = 4000;
        reloaded.channel.rate_limit_max_messages = 5;
        assert!(base.restart_only_changes(&reloaded).is_empty());

        reloaded
            .auth
            .tokens
            .insert("token-b".into(), "bob".into());
        assert_eq!(base.restart_only_changes(&reloaded), vec!["auth"]);

        reloaded.crypto.shared_secret = "two".into();
        assert_eq!(base.restart_only_changes(&reloaded), vec!["auth", "crypto"]);
    }
}
