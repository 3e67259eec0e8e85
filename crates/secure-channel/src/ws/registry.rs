//! Connection registry.
//!
//! The single authority over live connections. One record per connection
//! holds the identity, admission time, rate-limit window and outbound handle;
//! every mutation goes through one lock so admission, eviction and window
//! updates are serialized.

use crate::domain::ConnectionId;
use crate::middleware::auth::Identity;
use crate::middleware::rate_limit::{Admission, RateLimitParams, RateLimitWindow, RateLimiter};
use crate::ws::connection::ConnectionHandle;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Registry errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// `max_connections` reached
    #[error("connection limit reached ({limit})")]
    CapacityExceeded {
        /// Configured limit
        limit: usize,
    },
    /// Id already registered
    #[error("connection {0} already registered")]
    Duplicate(ConnectionId),
}

/// Point-in-time view of one connection
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Connection id
    pub id: ConnectionId,
    /// Authenticated identity
    pub identity: Identity,
    /// Admission time (ms since epoch)
    pub connected_at: i64,
    /// Outbound handle
    pub handle: ConnectionHandle,
}

struct ConnectionRecord {
    identity: Identity,
    connected_at: i64,
    window: RateLimitWindow,
    handle: ConnectionHandle,
}

impl ConnectionRecord {
    fn info(&self, id: ConnectionId) -> ConnectionInfo {
        ConnectionInfo {
            id,
            identity: self.identity.clone(),
            connected_at: self.connected_at,
            handle: self.handle.clone(),
        }
    }
}

/// Registry of admitted connections
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, ConnectionRecord>>,
    count: watch::Sender<usize>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    /// Empty registry
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            connections: Mutex::new(HashMap::new()),
            count,
        }
    }

    /// Register an authenticated connection. Its rate-limit window starts at `now_ms`.
    pub fn admit(
        &self,
        handle: ConnectionHandle,
        identity: Identity,
        now_ms: i64,
        max_connections: usize,
    ) -> Result<(), RegistryError> {
        let id = handle.id();
        let mut connections = self.connections.lock();

        if connections.contains_key(&id) {
            return Err(RegistryError::Duplicate(id));
        }
        if connections.len() >= max_connections {
            return Err(RegistryError::CapacityExceeded {
                limit: max_connections,
            });
        }

        connections.insert(
            id,
            ConnectionRecord {
                identity,
                connected_at: now_ms,
                window: RateLimitWindow::new(now_ms),
                handle,
            },
        );
        self.count.send_replace(connections.len());
        debug!(connection_id = %id, total = connections.len(), "Connection registered");
        Ok(())
    }

    /// Remove a connection. Returns `false` if it was not registered.
    pub fn evict(&self, id: &ConnectionId) -> bool {
        let mut connections = self.connections.lock();
        let removed = connections.remove(id).is_some();
        if removed {
            self.count.send_replace(connections.len());
            debug!(connection_id = %id, total = connections.len(), "Connection evicted");
        }
        removed
    }

    /// Look up one connection
    pub fn lookup(&self, id: &ConnectionId) -> Option<ConnectionInfo> {
        self.connections.lock().get(id).map(|r| r.info(*id))
    }

    /// Copy of every live connection, in admission order. Iterate freely:
    /// no lock is held.
    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        let mut infos: Vec<_> = self
            .connections
            .lock()
            .iter()
            .map(|(id, r)| r.info(*id))
            .collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// Count one inbound frame for `id`. `None` if the connection is gone.
    pub fn admit_frame(
        &self,
        id: &ConnectionId,
        now_ms: i64,
        params: RateLimitParams,
    ) -> Option<Admission> {
        self.connections
            .lock()
            .get_mut(id)
            .map(|record| RateLimiter::admit(&mut record.window, now_ms, params))
    }

    /// Current window of `id` (diagnostics and tests)
    pub fn window(&self, id: &ConnectionId) -> Option<RateLimitWindow> {
        self.connections.lock().get(id).map(|r| r.window)
    }

    /// Number of live connections
    pub fn len(&self) -> usize {
        *self.count.borrow()
    }

    /// Whether no connection is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until every connection has been evicted, up to `timeout`.
    /// Returns `false` on timeout.
    pub async fn wait_until_empty(&self, timeout: Duration) -> bool {
        let mut count = self.count.subscribe();
        let drained = matches!(
            tokio::time::timeout(timeout, count.wait_for(|n| *n == 0)).await,
            Ok(Ok(_))
        );
        drained
    }
}
