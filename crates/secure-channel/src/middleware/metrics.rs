//! Channel metrics.
//!
//! Plain atomic counters, exported as JSON on `GET /health`.

use std::sync::atomic::{AtomicU64, Ordering};

/// Secure channel metrics
#[derive(Debug, Default)]
pub struct ChannelMetrics {
    // Admission
    pub connections_admitted: AtomicU64,
    pub connections_rejected: AtomicU64,
    pub connections_active: AtomicU64,

    // Inbound frames
    pub frames_received: AtomicU64,
    pub frames_throttled: AtomicU64,
    pub decode_failures: AtomicU64,
    pub envelopes_dispatched: AtomicU64,

    // Outbound
    pub envelopes_sent: AtomicU64,
    pub send_failures: AtomicU64,

    // Lifecycle
    pub restarts: AtomicU64,
    pub bind_failures: AtomicU64,
}

impl ChannelMetrics {
    /// All counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection admitted to the registry
    pub fn record_admitted(&self) {
        self.connections_admitted.fetch_add(1, Ordering::Relaxed);
        self.connections_active.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a connection evicted from the registry
    pub fn record_evicted(&self) {
        self.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record an authentication or capacity rejection
    pub fn record_rejected(&self) {
        self.connections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an inbound data frame
    pub fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a throttled frame
    pub fn record_throttled(&self) {
        self.frames_throttled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a frame that failed to decode
    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an envelope handed to subscribers
    pub fn record_dispatched(&self) {
        self.envelopes_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an outbound send attempt
    pub fn record_send(&self, success: bool) {
        if success {
            self.envelopes_sent.fetch_add(1, Ordering::Relaxed);
        } else {
            self.send_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a restart
    pub fn record_restart(&self) {
        self.restarts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a failed bind
    pub fn record_bind_failure(&self) {
        self.bind_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Export metrics as JSON
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "connections": {
                "admitted": self.connections_admitted.load(Ordering::Relaxed),
                "rejected": self.connections_rejected.load(Ordering::Relaxed),
                "active": self.connections_active.load(Ordering::Relaxed),
            },
            "frames": {
                "received": self.frames_received.load(Ordering::Relaxed),
                "throttled": self.frames_throttled.load(Ordering::Relaxed),
                "decode_failures": self.decode_failures.load(Ordering::Relaxed),
                "dispatched": self.envelopes_dispatched.load(Ordering::Relaxed),
            },
            "outbound": {
                "sent": self.envelopes_sent.load(Ordering::Relaxed),
                "failures": self.send_failures.load(Ordering::Relaxed),
            },
            "lifecycle": {
                "restarts": self.restarts.load(Ordering::Relaxed),
                "bind_failures": self.bind_failures.load(Ordering::Relaxed),
            }
        })
    }
}
