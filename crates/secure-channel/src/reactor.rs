//! Config reactor: applies configuration updates to a running server.
//!
//! Every update is diffed against the live configuration:
//!
//! | Change                 | Action                       |
//! |------------------------|------------------------------|
//! | `host` / `port`        | write live config, restart   |
//! | anything else          | write live config in place   |
//! | nothing                | ignored                      |
//!
//! A batch that changes both kinds of field still restarts at most once.

use crate::domain::{ChannelConfig, ChannelError, ChannelResult, ServerState};
use crate::service::ChannelServer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Classification of one configuration update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigChange {
    /// Identical configuration
    Unchanged,
    /// Only in-place fields changed
    HotApply,
    /// The listening address changed
    Restart,
}

/// Classify the update from `old` to `new`
pub fn classify(old: &ChannelConfig, new: &ChannelConfig) -> ConfigChange {
    if old.host != new.host || old.port != new.port {
        ConfigChange::Restart
    } else if old != new {
        ConfigChange::HotApply
    } else {
        ConfigChange::Unchanged
    }
}

/// Applies configuration updates to one [`ChannelServer`]
pub struct ConfigReactor {
    server: Arc<ChannelServer>,
    /// Last reactor-driven restart failed to bind
    bind_failed: AtomicBool,
}

impl ConfigReactor {
    /// Reactor driving `server`
    pub fn new(server: Arc<ChannelServer>) -> Self {
        Self {
            server,
            bind_failed: AtomicBool::new(false),
        }
    }

    /// Apply one update. Invalid configurations are rejected and leave the
    /// live configuration untouched.
    pub async fn apply(&self, new: ChannelConfig) -> ChannelResult<ConfigChange> {
        new.validate()?;

        let live = self.server.live_config();
        let change = classify(&live.current(), &new);

        match change {
            ConfigChange::Unchanged => {
                debug!("Configuration unchanged");
            }
            ConfigChange::HotApply => {
                let previous = live.replace(new.clone());
                info!(
                    max_messages = new.rate_limit_max_messages,
                    window_ms = new.rate_limit_window_ms,
                    previous_max_messages = previous.rate_limit_max_messages,
                    previous_window_ms = previous.rate_limit_window_ms,
                    "Configuration applied in place"
                );
            }
            ConfigChange::Restart => {
                let previous = live.replace(new.clone());
                info!(
                    old = %previous.bind_addr(),
                    new = %new.bind_addr(),
                    "Listening address changed; restarting"
                );
                // A stopped server binds the new address on its next start,
                // unless a previous address change left it stopped.
                if self.server.state() == ServerState::Listening
                    || self.bind_failed.load(Ordering::Acquire)
                {
                    let result = self.server.restart().await;
                    self.bind_failed.store(
                        matches!(result, Err(ChannelError::Bind { .. })),
                        Ordering::Release,
                    );
                    result?;
                }
            }
        }

        Ok(change)
    }

    /// Apply the current value of `updates`, then every value published
    /// until the sender is dropped.
    pub async fn run(self, mut updates: watch::Receiver<ChannelConfig>) {
        let initial = updates.borrow_and_update().clone();
        self.handle(initial).await;

        while updates.changed().await.is_ok() {
            let next = updates.borrow_and_update().clone();
            self.handle(next).await;
        }
        debug!("Configuration source closed; reactor exiting");
    }

    async fn handle(&self, next: ChannelConfig) {
        match self.apply(next).await {
            Ok(change) => debug!(change = ?change, "Configuration update processed"),
            Err(e @ ChannelError::Config(_)) => {
                warn!(error = %e, "Ignoring invalid configuration update");
            }
            Err(e) => error!(error = %e, "Failed to apply configuration update"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::XChaChaProvider;
    use crate::middleware::auth::{AuthOutcome, Identity};
    use std::net::{IpAddr, Ipv4Addr};

    fn base() -> ChannelConfig {
        ChannelConfig {
            port: 0,
            ..ChannelConfig::default()
        }
    }

    fn server(config: ChannelConfig) -> Arc<ChannelServer> {
        let auth = |_: Option<&str>| AuthOutcome::Accepted(Identity::new("t"));
        Arc::new(
            ChannelServer::new(
                config,
                Arc::new(auth),
                Arc::new(XChaChaProvider::from_passphrase("reactor").unwrap()),
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_classify() {
        let old = base();
        assert_eq!(classify(&old, &old.clone()), ConfigChange::Unchanged);

        let mut hot = old.clone();
        hot.rate_limit_max_messages = 1;
        hot.rate_limit_window_ms = 10;
        assert_eq!(classify(&old, &hot), ConfigChange::HotApply);

        let mut port = old.clone();
        port.port = 4000;
        assert_eq!(classify(&old, &port), ConfigChange::Restart);

        let mut host = old.clone();
        host.host = IpAddr::V4(Ipv4Addr::UNSPECIFIED);
        assert_eq!(classify(&old, &host), ConfigChange::Restart);

        // mixed batch is still a single restart
        let mut both = port.clone();
        both.rate_limit_max_messages = 1;
        assert_eq!(classify(&old, &both), ConfigChange::Restart);
    }

    #[tokio::test]
    async fn test_hot_apply_does_not_restart() {
        let server = server(base());
        server.start().await.unwrap();
        let reactor = ConfigReactor::new(Arc::clone(&server));

        let mut next = server.config();
        next.rate_limit_max_messages = 1;
        assert_eq!(reactor.apply(next).await.unwrap(), ConfigChange::HotApply);

        assert_eq!(server.live_config().rate_limit().max_messages, 1);
        assert_eq!(server.metrics().restarts.load(Ordering::Relaxed), 0);
        server.stop().await.unwrap();
    }

    fn free_port() -> u16 {
        std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    #[tokio::test]
    async fn test_mixed_update_restarts_once() {
        let server = server(base());
        server.start().await.unwrap();
        let reactor = ConfigReactor::new(Arc::clone(&server));

        let port = free_port();
        let mut next = server.config();
        next.port = port;
        next.rate_limit_max_messages = 3;
        assert_eq!(reactor.apply(next).await.unwrap(), ConfigChange::Restart);

        assert_eq!(server.state(), ServerState::Listening);
        assert_eq!(server.local_addr().map(|a| a.port()), Some(port));
        assert_eq!(server.metrics().restarts.load(Ordering::Relaxed), 1);
        assert_eq!(server.live_config().rate_limit().max_messages, 3);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_restart_is_retried_on_next_address_change() {
        let server = server(base());
        server.start().await.unwrap();
        let reactor = ConfigReactor::new(Arc::clone(&server));

        let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut taken = server.config();
        taken.port = occupied.local_addr().unwrap().port();
        assert!(matches!(
            reactor.apply(taken).await,
            Err(ChannelError::Bind { .. })
        ));
        assert_eq!(server.state(), ServerState::Stopped);

        let port = free_port();
        let mut next = server.config();
        next.port = port;
        reactor.apply(next).await.unwrap();
        assert_eq!(server.state(), ServerState::Listening);
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_update_is_rejected() {
        let server = server(base());
        let reactor = ConfigReactor::new(Arc::clone(&server));

        let mut bad = server.config();
        bad.rate_limit_window_ms = 0;
        assert!(reactor.apply(bad).await.is_err());
        assert_eq!(server.config(), base());
    }

    #[tokio::test]
    async fn test_stopped_server_is_not_started_by_port_change() {
        let server = server(base());
        let reactor = ConfigReactor::new(Arc::clone(&server));

        let mut next = server.config();
        next.port = 4999;
        assert_eq!(reactor.apply(next).await.unwrap(), ConfigChange::Restart);
        assert_eq!(server.state(), ServerState::Stopped);
        assert_eq!(server.config().port, 4999);
    }

    #[tokio::test]
    async fn test_run_consumes_watch_updates() {
        let server = server(base());
        let (tx, rx) = watch::channel(server.config());
        let task = tokio::spawn(ConfigReactor::new(Arc::clone(&server)).run(rx));

        let mut next = server.config();
        next.rate_limit_max_messages = 9;
        tx.send(next).unwrap();

        for _ in 0..50 {
            if server.live_config().rate_limit().max_messages == 9 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(server.live_config().rate_limit().max_messages, 9);

        drop(tx);
        task.await.unwrap();
    }
}
