//! Per-connection WebSocket handling.
//!
//! Upgrade path: authenticate the `token` query parameter once, then either
//! close with 1008 or admit the connection and run its read loop.
//!
//! Read loop, for every data frame, in arrival order:
//! rate limit → decode → dispatch. Throttling and decode failures are
//! reported to the sender as uncompressed error envelopes and the loop
//! continues. Ping and pong frames are not counted.

use crate::codec::FrameCodec;
use crate::domain::envelope::STATUS_CONNECTED;
use crate::domain::{now_millis, ConnectionId, Envelope, ErrorPayload, LiveConfig, ServerState};
use crate::middleware::auth::{AuthOutcome, Authenticator, Identity};
use crate::middleware::metrics::ChannelMetrics;
use crate::middleware::rate_limit::Admission;
use crate::ws::connection::{close_message, ConnectionHandle, Outbound};
use crate::ws::dispatch::{Origin, SubscriberRegistry};
use crate::ws::registry::ConnectionRegistry;
use axum::extract::ws::{close_code, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// How long a finished connection waits for its writer to flush
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a rejected connection waits for the peer's close reply
const REJECT_LINGER: Duration = Duration::from_secs(1);

/// Close code for "try again later" (capacity)
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

/// Everything a connection task needs, shared across one server run.
#[derive(Clone)]
pub(crate) struct ConnectionContext {
    pub registry: Arc<ConnectionRegistry>,
    pub subscribers: Arc<SubscriberRegistry>,
    pub authenticator: Arc<dyn Authenticator>,
    pub codec: FrameCodec,
    pub live: LiveConfig,
    pub metrics: Arc<ChannelMetrics>,
    pub server_state: watch::Receiver<ServerState>,
    /// Flips to `true` when this run starts stopping
    pub stopping: watch::Receiver<bool>,
}

/// `GET /` upgrade handler
pub(crate) async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    State(ctx): State<ConnectionContext>,
) -> Response {
    let outcome = ctx
        .authenticator
        .validate(params.get("token").map(String::as_str));
    let max_message_bytes = ctx.live.current().max_message_bytes;

    ws.max_message_size(max_message_bytes)
        .max_frame_size(max_message_bytes)
        .on_upgrade(move |socket| async move {
            match outcome {
                AuthOutcome::Accepted(identity) => {
                    handle_connection(socket, identity, peer, ctx).await
                }
                AuthOutcome::Rejected { reason } => {
                    warn!(peer = %peer, reason = %reason, "Authentication failed");
                    ctx.metrics.record_rejected();
                    reject(
                        socket,
                        close_code::POLICY,
                        &format!("Authentication failed: {reason}"),
                    )
                    .await;
                }
            }
        })
}

/// `GET /health`
pub(crate) async fn health(State(ctx): State<ConnectionContext>) -> impl IntoResponse {
    let state = *ctx.server_state.borrow();
    Json(serde_json::json!({
        "state": state,
        "connections": ctx.registry.len(),
        "subscribers": ctx.subscribers.len(),
        "metrics": ctx.metrics.to_json(),
    }))
}

/// Close an un-admitted socket and let the peer acknowledge.
async fn reject(mut socket: WebSocket, code: u16, reason: &str) {
    if let Err(e) = socket.send(close_message(code, reason)).await {
        debug!(error = %e, "Failed to send close frame");
        return;
    }
    let _ = tokio::time::timeout(REJECT_LINGER, async {
        while let Some(Ok(_)) = socket.recv().await {}
    })
    .await;
}

async fn handle_connection(
    socket: WebSocket,
    identity: Identity,
    peer: SocketAddr,
    ctx: ConnectionContext,
) {
    let config = ctx.live.current();

    if *ctx.stopping.borrow() {
        reject(socket, close_code::AWAY, "Server shutting down").await;
        return;
    }

    let id = ConnectionId::new();
    let (outbound_tx, outbound_rx) = mpsc::channel(config.outbound_buffer);
    let handle = ConnectionHandle::new(id, outbound_tx);

    if let Err(e) = ctx.registry.admit(
        handle.clone(),
        identity.clone(),
        now_millis(),
        config.max_connections,
    ) {
        warn!(peer = %peer, error = %e, "Connection refused");
        ctx.metrics.record_rejected();
        reject(socket, CLOSE_TRY_AGAIN_LATER, "Server at capacity").await;
        return;
    }
    ctx.metrics.record_admitted();

    info!(
        connection_id = %id,
        principal = %identity,
        peer = %peer,
        "Connection admitted"
    );

    let codec = ctx.codec.with_inflate_limit(config.max_message_bytes);
    let (sink, mut stream) = socket.split();
    let writer = tokio::spawn(write_loop(id, sink, outbound_rx));

    let status = Envelope::connection_status(
        STATUS_CONNECTED,
        Some("Connected to secure channel".to_string()),
    );
    send_envelope(&ctx, &codec, &handle, &status, config.compress_outbound);

    let origin = Origin {
        connection_id: id,
        principal: identity.principal().to_string(),
    };
    let mut stopping = ctx.stopping.clone();

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if !handle_frame(&ctx, &codec, &handle, &origin, text.as_bytes(), false) {
                        break;
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    if !handle_frame(&ctx, &codec, &handle, &origin, &data, true) {
                        break;
                    }
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    debug!(
                        connection_id = %id,
                        code = frame.as_ref().map(|f| f.code),
                        "Close received"
                    );
                    break;
                }
                Some(Err(e)) => {
                    warn!(connection_id = %id, error = %e, "WebSocket error");
                    break;
                }
                None => break,
            },
            _ = handle.closed() => {
                debug!(connection_id = %id, "Close requested");
                break;
            }
            _ = stopping.wait_for(|s| *s) => {
                handle.close(close_code::AWAY, "Server shutting down");
                break;
            }
        }
    }

    if ctx.registry.evict(&id) {
        ctx.metrics.record_evicted();
    }
    drop(handle);

    // The writer exits once every handle clone is gone
    let mut writer = writer;
    if tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }

    info!(connection_id = %id, principal = %origin.principal, "Connection closed");
}

/// Process one data frame. Returns `false` when the read loop should stop.
fn handle_frame(
    ctx: &ConnectionContext,
    codec: &FrameCodec,
    handle: &ConnectionHandle,
    origin: &Origin,
    bytes: &[u8],
    is_binary: bool,
) -> bool {
    ctx.metrics.record_frame();
    let id = origin.connection_id;

    match ctx
        .registry
        .admit_frame(&id, now_millis(), ctx.live.rate_limit())
    {
        None => false,
        Some(Admission::Throttled) => {
            ctx.metrics.record_throttled();
            warn!(connection_id = %id, "Rate limit exceeded");
            send_envelope(
                ctx,
                codec,
                handle,
                &Envelope::error(ErrorPayload::rate_limited()),
                false,
            );
            true
        }
        Some(Admission::Allowed) => {
            match codec.decode(bytes, is_binary) {
                Ok(envelope) => {
                    let delivered = ctx.subscribers.dispatch(&envelope, origin);
                    ctx.metrics.record_dispatched();
                    debug!(
                        connection_id = %id,
                        envelope_id = envelope.id(),
                        kind = envelope.kind(),
                        subscribers = delivered,
                        "Envelope dispatched"
                    );
                }
                Err(e) => {
                    ctx.metrics.record_decode_failure();
                    warn!(connection_id = %id, code = e.code(), error = %e, "Frame rejected");
                    let payload = ErrorPayload::new(e.summary())
                        .with_code(e.code())
                        .with_details(e.to_string());
                    send_envelope(ctx, codec, handle, &Envelope::error(payload), false);
                }
            }
            true
        }
    }
}

/// Encode and queue one envelope for this connection
fn send_envelope(
    ctx: &ConnectionContext,
    codec: &FrameCodec,
    handle: &ConnectionHandle,
    envelope: &Envelope,
    compress: bool,
) {
    let frame = match codec.encode(envelope, compress) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(connection_id = %handle.id(), error = %e, "Failed to encode envelope");
            ctx.metrics.record_send(false);
            return;
        }
    };

    let result = handle.send(frame);
    ctx.metrics.record_send(result.is_ok());
    if let Err(e) = result {
        debug!(
            connection_id = %handle.id(),
            kind = envelope.kind(),
            error = %e,
            "Envelope not queued"
        );
    }
}

/// Drain the outbound queue into the socket
async fn write_loop(
    id: ConnectionId,
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Outbound>,
) {
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Frame(frame) => {
                if let Err(e) = sink.send(Message::from(frame)).await {
                    debug!(connection_id = %id, error = %e, "Write failed");
                    return;
                }
            }
            Outbound::Close { code, reason } => {
                if let Err(e) = sink.send(close_message(code, &reason)).await {
                    debug!(connection_id = %id, error = %e, "Close frame not sent");
                }
                return;
            }
        }
    }
    let _ = sink.close().await;
}
