//! Envelope: the structured unit exchanged over the channel.
//!
//! Wire shape (post-decode, pre-dispatch):
//!
//! ```json
//! {"id": "…", "source": "SERVER", "timestamp": 1700000000000, "type": "…", "payload": …}
//! ```
//!
//! Envelopes are immutable once constructed; fields are only readable.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Envelope type for error reports
pub const ERROR_MESSAGE: &str = "ERROR_MESSAGE";

/// Envelope type for the post-admission status notice
pub const CONNECTION_STATUS: &str = "CONNECTION_STATUS";

/// Status string sent once per successful admission
pub const STATUS_CONNECTED: &str = "connected";

/// Error codes carried in `ERROR_MESSAGE` payloads
pub mod codes {
    /// Rate limit window exhausted
    pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";
    /// Binary frame could not be inflated
    pub const DECOMPRESSION_FAILED: &str = "DECOMPRESSION_FAILED";
    /// Confidentiality layer could not be removed
    pub const DECRYPTION_FAILED: &str = "DECRYPTION_FAILED";
    /// Decrypted bytes are not a valid envelope
    pub const MALFORMED_ENVELOPE: &str = "MALFORMED_ENVELOPE";
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Who emitted an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageSource {
    /// The channel server itself
    Server,
    /// A client class tag, e.g. `CHROME_EXTENSION`
    Client(String),
}

impl MessageSource {
    const SERVER_TAG: &'static str = "SERVER";

    /// Client source with the given class tag
    pub fn client(tag: impl Into<String>) -> Self {
        Self::from(tag.into())
    }

    /// Wire tag
    pub fn as_str(&self) -> &str {
        match self {
            Self::Server => Self::SERVER_TAG,
            Self::Client(tag) => tag,
        }
    }
}

impl From<String> for MessageSource {
    fn from(tag: String) -> Self {
        if tag == Self::SERVER_TAG {
            Self::Server
        } else {
            Self::Client(tag)
        }
    }
}

impl From<MessageSource> for String {
    fn from(source: MessageSource) -> Self {
        match source {
            MessageSource::Server => MessageSource::SERVER_TAG.to_string(),
            MessageSource::Client(tag) => tag,
        }
    }
}

impl fmt::Display for MessageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The structured unit of data exchanged over the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    id: String,
    source: MessageSource,
    timestamp: i64,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: serde_json::Value,
}

impl Envelope {
    /// New envelope with a fresh id and the current wall-clock time
    pub fn new(source: MessageSource, kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source,
            timestamp: now_millis(),
            kind: kind.into(),
            payload,
        }
    }

    /// New server-originated envelope
    pub fn server(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(MessageSource::Server, kind, payload)
    }

    /// Build from explicit parts (replay, tests, foreign producers)
    pub fn from_parts(
        id: impl Into<String>,
        source: MessageSource,
        timestamp: i64,
        kind: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            source,
            timestamp,
            kind: kind.into(),
            payload,
        }
    }

    /// `ERROR_MESSAGE` envelope
    pub fn error(payload: ErrorPayload) -> Self {
        Self::server(
            ERROR_MESSAGE,
            serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
        )
    }

    /// `CONNECTION_STATUS` envelope
    pub fn connection_status(status: impl Into<String>, message: Option<String>) -> Self {
        let payload = ConnectionStatusPayload {
            status: status.into(),
            message,
        };
        Self::server(
            CONNECTION_STATUS,
            serde_json::to_value(payload).unwrap_or(serde_json::Value::Null),
        )
    }

    /// Unique (per instance) id, for correlation only
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Emitter
    pub fn source(&self) -> &MessageSource {
        &self.source
    }

    /// Emitter wall-clock capture time (ms)
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Type tag
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Application payload
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Deserialize the payload into a typed structure
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    /// Whether this is an `ERROR_MESSAGE`
    pub fn is_error(&self) -> bool {
        self.kind == ERROR_MESSAGE
    }
}

/// `ERROR_MESSAGE` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human readable message
    pub message: String,
    /// Machine readable code (see [`codes`])
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Underlying error text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorPayload {
    /// Plain error without a code
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
            details: None,
        }
    }

    /// Attach a code
    pub fn with_code(mut self, code: &str) -> Self {
        self.code = Some(code.to_string());
        self
    }

    /// Attach details
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Rate limit exceeded
    pub fn rate_limited() -> Self {
        Self::new("Rate limit exceeded. Too many messages.").with_code(codes::RATE_LIMIT_EXCEEDED)
    }
}

/// `CONNECTION_STATUS` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatusPayload {
    /// `connected` or another status string
    pub status: String,
    /// Optional human readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wire_shape() {
        let env = Envelope::from_parts(
            "abc",
            MessageSource::client("CHROME_EXTENSION"),
            1_700_000_000_000,
            "PING",
            json!({"n": 1}),
        );
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "abc",
                "source": "CHROME_EXTENSION",
                "timestamp": 1_700_000_000_000i64,
                "type": "PING",
                "payload": {"n": 1}
            })
        );
    }

    #[test]
    fn test_source_tags() {
        assert_eq!(MessageSource::from("SERVER".to_string()), MessageSource::Server);
        assert_eq!(
            MessageSource::client("VSCODE_EXTENSION"),
            MessageSource::Client("VSCODE_EXTENSION".into())
        );
        assert_eq!(MessageSource::Server.to_string(), "SERVER");
    }

    #[test]
    fn test_missing_payload_defaults_to_null() {
        let env: Envelope = serde_json::from_str(
            r#"{"id":"1","source":"SERVER","timestamp":5,"type":"NOOP"}"#,
        )
        .unwrap();
        assert!(env.payload().is_null());
    }

    #[test]
    fn test_missing_required_field_is_rejected() {
        let result: Result<Envelope, _> =
            serde_json::from_str(r#"{"id":"1","source":"SERVER","type":"NOOP"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_new_envelopes_have_unique_ids() {
        let a = Envelope::server("X", json!(null));
        let b = Envelope::server("X", json!(null));
        assert_ne!(a.id(), b.id());
        assert!(a.timestamp() > 0);
    }

    #[test]
    fn test_error_envelope_payload() {
        let env = Envelope::error(ErrorPayload::rate_limited());
        assert!(env.is_error());
        assert_eq!(env.source(), &MessageSource::Server);
        let payload: ErrorPayload = env.payload_as().unwrap();
        assert_eq!(payload.code.as_deref(), Some(codes::RATE_LIMIT_EXCEEDED));
        assert!(payload.details.is_none());
        assert!(env.payload().get("details").is_none());
    }

    #[test]
    fn test_connection_status_envelope() {
        let env = Envelope::connection_status(STATUS_CONNECTED, None);
        assert_eq!(env.kind(), CONNECTION_STATUS);
        assert_eq!(env.payload(), &json!({"status": "connected"}));
    }
}
