//! Channel server: listener lifecycle, broadcast and targeted sends.
//!
//! ```text
//! Stopped ──start()──▶ Starting ──bind ok──▶ Listening ──stop()──▶ Stopping ──▶ Stopped
//!                          └────bind error────▶ Stopped
//! ```
//!
//! Lifecycle calls are serialized by one async mutex, so `restart()` can
//! never interleave with another `start()` or `stop()`.

use crate::codec::{ConfidentialityProvider, FrameCodec, XChaChaProvider};
use crate::domain::{
    ChannelConfig, ChannelError, ChannelResult, ChannelSettings, ConnectionId, Envelope,
    LiveConfig, ServerState,
};
use crate::middleware::auth::{Authenticator, StaticTokenAuthenticator};
use crate::middleware::metrics::ChannelMetrics;
use crate::ws::connection::SendError;
use crate::ws::dispatch::{EnvelopeSubscriber, SubscriberRegistry, SubscriptionId};
use crate::ws::handler::{health, ws_upgrade, ConnectionContext};
use crate::ws::registry::{ConnectionInfo, ConnectionRegistry};
use axum::extract::ws::close_code;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Outcome of a broadcast. Not transactional: each recipient succeeds or
/// fails on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections the frame was queued for
    pub delivered: usize,
    /// Connections that refused the frame
    pub failures: Vec<(ConnectionId, SendError)>,
}

impl BroadcastReport {
    /// Whether every recipient accepted the frame
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// One listener run, between a successful start and the matching stop
struct RunningServer {
    local_addr: SocketAddr,
    stopping: watch::Sender<bool>,
    shutdown: oneshot::Sender<()>,
    serve_task: JoinHandle<std::io::Result<()>>,
}

/// Secure messaging channel server
pub struct ChannelServer {
    live: LiveConfig,
    registry: Arc<ConnectionRegistry>,
    subscribers: Arc<SubscriberRegistry>,
    authenticator: Arc<dyn Authenticator>,
    codec: FrameCodec,
    metrics: Arc<ChannelMetrics>,
    state: watch::Sender<ServerState>,
    local_addr: parking_lot::Mutex<Option<SocketAddr>>,
    lifecycle: Mutex<Option<RunningServer>>,
}

impl ChannelServer {
    /// Create a stopped server
    pub fn new(
        config: ChannelConfig,
        authenticator: Arc<dyn Authenticator>,
        provider: Arc<dyn ConfidentialityProvider>,
    ) -> ChannelResult<Self> {
        config.validate()?;

        let codec = FrameCodec::new(provider, config.max_message_bytes);
        let (state, _) = watch::channel(ServerState::Stopped);

        Ok(Self {
            live: LiveConfig::new(config),
            registry: Arc::new(ConnectionRegistry::new()),
            subscribers: Arc::new(SubscriberRegistry::new()),
            authenticator,
            codec,
            metrics: Arc::new(ChannelMetrics::new()),
            state,
            local_addr: parking_lot::Mutex::new(None),
            lifecycle: Mutex::new(None),
        })
    }

    /// Create a stopped server with the static token authenticator and the
    /// XChaCha20-Poly1305 provider described by `settings`
    pub fn from_settings(settings: &ChannelSettings) -> ChannelResult<Self> {
        settings.validate()?;
        let authenticator = StaticTokenAuthenticator::from_config(&settings.auth);
        if authenticator.is_empty() {
            warn!("No auth tokens configured; every connection will be rejected");
        }
        let provider = XChaChaProvider::from_passphrase(&settings.crypto.shared_secret)?;
        Self::new(
            settings.channel.clone(),
            Arc::new(authenticator),
            Arc::new(provider),
        )
    }

    /// Current lifecycle state
    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Observe lifecycle transitions
    pub fn subscribe_state(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Bound address while listening
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Live configuration handle
    pub fn live_config(&self) -> &LiveConfig {
        &self.live
    }

    /// Copy of the current configuration
    pub fn config(&self) -> ChannelConfig {
        self.live.current()
    }

    /// Metrics
    pub fn metrics(&self) -> Arc<ChannelMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Register a subscriber for decoded inbound envelopes
    pub fn subscribe(&self, subscriber: Arc<dyn EnvelopeSubscriber>) -> SubscriptionId {
        self.subscribers.subscribe(subscriber)
    }

    /// Remove a subscriber
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    /// Point-in-time copy of live connections
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.registry.snapshot()
    }

    /// Number of live connections
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Bind the configured address and start accepting connections.
    ///
    /// Only valid from `Stopped`. A bind failure leaves the server `Stopped`
    /// and is not retried.
    pub async fn start(&self) -> ChannelResult<SocketAddr> {
        let mut running = self.lifecycle.lock().await;
        self.start_locked(&mut running).await
    }

    /// Close every connection, release the listener and wait for connection
    /// tasks to drain (bounded by `drain_timeout_ms`).
    pub async fn stop(&self) -> ChannelResult<()> {
        let mut running = self.lifecycle.lock().await;
        self.stop_locked(&mut running).await
    }

    /// Stop (if listening), then start once the listener is released.
    pub async fn restart(&self) -> ChannelResult<SocketAddr> {
        let mut running = self.lifecycle.lock().await;
        info!(state = %self.state(), "Restarting secure channel");
        if self.state() == ServerState::Listening {
            self.stop_locked(&mut running).await?;
        }
        self.metrics.record_restart();
        self.start_locked(&mut running).await
    }

    async fn start_locked(&self, running: &mut Option<RunningServer>) -> ChannelResult<SocketAddr> {
        let current = self.state();
        if current != ServerState::Stopped {
            return Err(ChannelError::InvalidState {
                expected: ServerState::Stopped,
                actual: current,
            });
        }
        self.state.send_replace(ServerState::Starting);

        let addr = self.live.current().bind_addr();
        let (listener, local_addr) = match bind(addr).await {
            Ok(bound) => bound,
            Err(source) => {
                error!(addr = %addr, error = %source, "Failed to bind secure channel");
                self.metrics.record_bind_failure();
                self.state.send_replace(ServerState::Stopped);
                return Err(ChannelError::Bind { addr, source });
            }
        };

        let (stopping, stopping_rx) = watch::channel(false);
        let (shutdown, shutdown_rx) = oneshot::channel::<()>();
        let router = self.router(stopping_rx);

        let serve_task = tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
        });

        *running = Some(RunningServer {
            local_addr,
            stopping,
            shutdown,
            serve_task,
        });
        *self.local_addr.lock() = Some(local_addr);
        self.state.send_replace(ServerState::Listening);

        info!(addr = %local_addr, "Secure channel listening");
        Ok(local_addr)
    }

    async fn stop_locked(&self, running: &mut Option<RunningServer>) -> ChannelResult<()> {
        let current = self.state();
        if current != ServerState::Listening {
            return Err(ChannelError::InvalidState {
                expected: ServerState::Listening,
                actual: current,
            });
        }
        let run = running
            .take()
            .ok_or_else(|| ChannelError::Internal("listening without a listener".into()))?;

        self.state.send_replace(ServerState::Stopping);
        info!(addr = %run.local_addr, "Stopping secure channel");

        // Late upgrades of this run observe the flag and close themselves
        run.stopping.send_replace(true);

        let snapshot = self.registry.snapshot();
        for conn in &snapshot {
            conn.handle.close(close_code::AWAY, "Server shutting down");
        }
        debug!(connections = snapshot.len(), "Close requested for all connections");

        let _ = run.shutdown.send(());

        let drain_timeout = self.live.current().drain_timeout();
        let mut serve_task = run.serve_task;
        match tokio::time::timeout(drain_timeout, &mut serve_task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!(error = %e, "Listener exited with error"),
            Ok(Err(e)) => warn!(error = %e, "Listener task failed"),
            Err(_) => {
                warn!("Listener did not shut down in time; aborting");
                serve_task.abort();
                // Awaiting the aborted task guarantees the socket is released
                let _ = serve_task.await;
            }
        }

        if !self.registry.wait_until_empty(drain_timeout).await {
            warn!(
                remaining = self.registry.len(),
                "Connections still draining after stop"
            );
        }

        *self.local_addr.lock() = None;
        self.state.send_replace(ServerState::Stopped);
        info!("Secure channel stopped");
        Ok(())
    }

    /// Encode `envelope` once (compressed per `compress_outbound`) and queue
    /// it for every live connection.
    pub fn broadcast(&self, envelope: &Envelope) -> ChannelResult<BroadcastReport> {
        let compress = self.live.current().compress_outbound;
        let frame = self.codec.encode(envelope, compress)?;

        let mut report = BroadcastReport::default();
        for conn in self.registry.snapshot() {
            match conn.handle.send(frame.clone()) {
                Ok(()) => {
                    report.delivered += 1;
                    self.metrics.record_send(true);
                }
                Err(e) => {
                    debug!(connection_id = %conn.id, error = %e, "Broadcast skipped connection");
                    self.metrics.record_send(false);
                    report.failures.push((conn.id, e));
                }
            }
        }

        debug!(
            kind = envelope.kind(),
            delivered = report.delivered,
            failed = report.failures.len(),
            "Broadcast complete"
        );
        Ok(report)
    }

    /// Encode `envelope` and queue it for one connection
    pub fn send_to(&self, id: ConnectionId, envelope: &Envelope, compress: bool) -> ChannelResult<()> {
        let conn = self
            .registry
            .lookup(&id)
            .ok_or(ChannelError::UnknownConnection(id))?;
        let frame = self.codec.encode(envelope, compress)?;

        let result = conn.handle.send(frame);
        self.metrics.record_send(result.is_ok());
        result.map_err(ChannelError::from)
    }

    /// Close one connection with a normal close code. Eviction happens in the
    /// connection's own task.
    pub fn disconnect(&self, id: ConnectionId, reason: &str) -> ChannelResult<()> {
        let conn = self
            .registry
            .lookup(&id)
            .ok_or(ChannelError::UnknownConnection(id))?;
        info!(connection_id = %id, reason = reason, "Disconnecting connection");
        conn.handle.close(close_code::NORMAL, reason);
        Ok(())
    }

    fn router(&self, stopping: watch::Receiver<bool>) -> Router {
        let ctx = ConnectionContext {
            registry: Arc::clone(&self.registry),
            subscribers: Arc::clone(&self.subscribers),
            authenticator: Arc::clone(&self.authenticator),
            codec: self.codec.clone(),
            live: self.live.clone(),
            metrics: Arc::clone(&self.metrics),
            server_state: self.state.subscribe(),
            stopping,
        };

        Router::new()
            .route("/health", get(health))
            .fallback(ws_upgrade)
            .with_state(ctx)
    }
}

async fn bind(addr: SocketAddr) -> std::io::Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    Ok((listener, local_addr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::auth::AuthOutcome;
    use crate::middleware::Identity;
    use crate::ws::connection::{ConnectionHandle, Outbound};
    use serde_json::json;
    use tokio::sync::mpsc;

    fn server() -> ChannelServer {
        let config = ChannelConfig {
            port: 0,
            ..ChannelConfig::default()
        };
        let auth = |_: Option<&str>| AuthOutcome::Accepted(Identity::new("test"));
        ChannelServer::new(
            config,
            Arc::new(auth),
            Arc::new(XChaChaProvider::from_passphrase("unit").unwrap()),
        )
        .unwrap()
    }

    fn register(server: &ChannelServer, buffer: usize) -> (ConnectionId, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(buffer);
        let handle = ConnectionHandle::new(ConnectionId::new(), tx);
        let id = handle.id();
        server
            .registry
            .admit(handle, Identity::new("peer"), 0, 16)
            .unwrap();
        (id, rx)
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = ChannelConfig {
            rate_limit_max_messages: 0,
            ..ChannelConfig::default()
        };
        let auth = |_: Option<&str>| AuthOutcome::rejected("no");
        let result = ChannelServer::new(
            config,
            Arc::new(auth),
            Arc::new(XChaChaProvider::from_passphrase("unit").unwrap()),
        );
        assert!(matches!(result, Err(ChannelError::Config(_))));
    }

    #[test]
    fn test_broadcast_isolates_failures() {
        let server = server();
        let (ok_a, mut rx_a) = register(&server, 4);
        let (dead, rx_dead) = register(&server, 4);
        let (ok_b, mut rx_b) = register(&server, 4);
        drop(rx_dead);

        let report = server
            .broadcast(&Envelope::server("NOTICE", json!({"n": 1})))
            .unwrap();

        assert_eq!(report.delivered, 2);
        assert_eq!(report.failures, vec![(dead, SendError::Closed)]);
        assert!(!report.is_complete());

        for rx in [&mut rx_a, &mut rx_b] {
            match rx.try_recv().unwrap() {
                Outbound::Frame(frame) => assert!(frame.is_binary()),
                other => panic!("unexpected {other:?}"),
            }
        }
        let _ = (ok_a, ok_b);
    }

    #[test]
    fn test_broadcast_reports_backpressure() {
        let server = server();
        let (full, _rx) = register(&server, 1);
        let envelope = Envelope::server("NOTICE", json!(null));

        assert_eq!(server.broadcast(&envelope).unwrap().delivered, 1);
        let report = server.broadcast(&envelope).unwrap();
        assert_eq!(report.failures, vec![(full, SendError::Backpressure)]);
    }

    #[test]
    fn test_send_to_and_disconnect() {
        let server = server();
        let (id, mut rx) = register(&server, 4);

        server
            .send_to(id, &Envelope::server("DIRECT", json!(1)), false)
            .unwrap();
        assert!(matches!(rx.try_recv(), Ok(Outbound::Frame(f)) if !f.is_binary()));

        server.disconnect(id, "bye").unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            Outbound::Close {
                code: close_code::NORMAL,
                reason: "bye".into()
            }
        );

        let unknown = ConnectionId::new();
        assert!(matches!(
            server.send_to(unknown, &Envelope::server("X", json!(null)), true),
            Err(ChannelError::UnknownConnection(u)) if u == unknown
        ));
    }

    #[tokio::test]
    async fn test_lifecycle_state_transitions() {
        let server = server();
        let mut states = server.subscribe_state();
        assert_eq!(server.state(), ServerState::Stopped);

        let addr = server.start().await.unwrap();
        assert_ne!(addr.port(), 0);
        assert_eq!(*states.borrow_and_update(), ServerState::Listening);
        assert_eq!(server.local_addr(), Some(addr));

        assert!(matches!(
            server.start().await,
            Err(ChannelError::InvalidState {
                expected: ServerState::Stopped,
                actual: ServerState::Listening
            })
        ));

        server.stop().await.unwrap();
        assert_eq!(server.state(), ServerState::Stopped);
        assert_eq!(server.local_addr(), None);

        assert!(matches!(
            server.stop().await,
            Err(ChannelError::InvalidState { .. })
        ));
    }

    #[tokio::test]
    async fn test_restart_rebinds_same_port() {
        let server = server();
        let first = server.start().await.unwrap();

        // Pin the port so the restart has to reuse it
        let mut pinned = server.config();
        pinned.port = first.port();
        server.live_config().replace(pinned);

        let second = server.restart().await.unwrap();
        assert_eq!(first.port(), second.port());
        assert_eq!(server.state(), ServerState::Listening);
        assert_eq!(server.metrics().restarts.load(std::sync::atomic::Ordering::Relaxed), 1);

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_bind_failure_leaves_server_stopped() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = occupied.local_addr().unwrap().port();

        let server = server();
        let mut config = server.config();
        config.port = port;
        server.live_config().replace(config);

        assert!(matches!(
            server.start().await,
            Err(ChannelError::Bind { .. })
        ));
        assert_eq!(server.state(), ServerState::Stopped);
        assert_eq!(
            server.metrics().bind_failures.load(std::sync::atomic::Ordering::Relaxed),
            1
        );
    }
}
