//! Server lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a [`crate::ChannelServer`].
///
/// ```text
/// Stopped ──start──▶ Starting ──bound──▶ Listening
///    ▲                  │                   │
///    └──── bind error ──┘                 stop
///    └──────────────── Stopping ◀──────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    /// No listener
    Stopped,
    /// Binding the listener
    Starting,
    /// Accepting connections
    Listening,
    /// Closing connections and releasing the listener
    Stopping,
}

impl ServerState {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Listening => "listening",
            Self::Stopping => "stopping",
        }
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
