//! Connection identifiers.
//!
//! Uses UUID v7 for time-ordered, unique identifiers. A reconnect always gets
//! a fresh id; ids are never reused.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identifier of one live transport session.
///
/// Uses UUID v7 which is time-ordered, making it ideal for:
/// - Log correlation across the connection's lifetime
/// - Sorting snapshots by admission order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a new connection ID (UUID v7)
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Parse from string
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_connection_id() {
        let id1 = ConnectionId::new();
        let id2 = ConnectionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_connection_id_display_and_parse() {
        let id = ConnectionId::new();
        let s = id.to_string();
        assert_eq!(s.len(), 36); // UUID format: 8-4-4-4-12
        assert_eq!(ConnectionId::parse(&s).unwrap(), id);
    }

    #[test]
    fn test_connection_ids_are_time_ordered() {
        let first = ConnectionId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = ConnectionId::new();
        assert!(first < second);
    }
}
