//! Handle to one live connection's outbound side.
//!
//! Every connection task owns a writer fed by a bounded mpsc queue. Other
//! tasks (broadcast, targeted sends, disconnect, stop) only ever talk to the
//! connection through a cloned [`ConnectionHandle`].

use crate::codec::WireFrame;
use crate::domain::ConnectionId;
use axum::extract::ws::{CloseFrame, Message};
use std::borrow::Cow;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

/// Largest close reason a close frame can carry (125 byte payload minus the code)
pub const MAX_CLOSE_REASON_BYTES: usize = 123;

/// Item queued for a connection's writer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Encoded envelope
    Frame(WireFrame),
    /// Close frame; the writer stops after sending it
    Close {
        /// WebSocket close code
        code: u16,
        /// Close reason
        reason: String,
    },
}

/// Why an outbound frame was not queued
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// Writer has exited
    #[error("connection closed")]
    Closed,
    /// Outbound queue is full
    #[error("outbound buffer full")]
    Backpressure,
}

impl<T> From<mpsc::error::TrySendError<T>> for SendError {
    fn from(e: mpsc::error::TrySendError<T>) -> Self {
        match e {
            mpsc::error::TrySendError::Full(_) => SendError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        }
    }
}

/// Cloneable handle to a connection's writer and close signal
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: mpsc::Sender<Outbound>,
    close_signal: Arc<Notify>,
}

impl ConnectionHandle {
    /// Handle over an outbound queue
    pub fn new(id: ConnectionId, outbound: mpsc::Sender<Outbound>) -> Self {
        Self {
            id,
            outbound,
            close_signal: Arc::new(Notify::new()),
        }
    }

    /// Connection id
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a frame without waiting
    pub fn send(&self, frame: WireFrame) -> Result<(), SendError> {
        self.outbound.try_send(Outbound::Frame(frame))?;
        Ok(())
    }

    /// Ask the connection to close with `code` and `reason`.
    ///
    /// The close frame is queued behind pending frames; if the queue is full
    /// the read loop still stops and the writer closes once it drains.
    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.outbound.try_send(Outbound::Close {
            code,
            reason: truncate_reason(reason).to_string(),
        });
        self.close_signal.notify_one();
    }

    /// Resolves once [`close`](Self::close) has been called
    pub async fn closed(&self) {
        self.close_signal.notified().await
    }

    /// Whether the writer has exited
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

impl From<WireFrame> for Message {
    fn from(frame: WireFrame) -> Self {
        match frame {
            WireFrame::Text(text) => Message::Text(text),
            WireFrame::Binary(bytes) => Message::Binary(bytes),
        }
    }
}

/// Close frame message with a length-safe reason
pub fn close_message(code: u16, reason: &str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: Cow::Owned(truncate_reason(reason).to_string()),
    }))
}

fn truncate_reason(reason: &str) -> &str {
    if reason.len() <= MAX_CLOSE_REASON_BYTES {
        return reason;
    }
    let mut end = MAX_CLOSE_REASON_BYTES;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_reports_backpressure_then_closed() {
        let (tx, rx) = mpsc::channel(1);
        let handle = ConnectionHandle::new(ConnectionId::new(), tx);

        assert!(handle.send(WireFrame::Text("a".into())).is_ok());
        assert_eq!(
            handle.send(WireFrame::Text("b".into())),
            Err(SendError::Backpressure)
        );

        drop(rx);
        assert_eq!(
            handle.send(WireFrame::Text("c".into())),
            Err(SendError::Closed)
        );
        assert!(handle.is_closed());
    }

    #[tokio::test]
    async fn test_close_queues_frame_and_signals() {
        let (tx, mut rx) = mpsc::channel(4);
        let handle = ConnectionHandle::new(ConnectionId::new(), tx);

        handle.close(1000, "bye");
        // permit is stored even though nobody was waiting yet
        tokio::time::timeout(std::time::Duration::from_secs(1), handle.closed())
            .await
            .unwrap();

        assert_eq!(
            rx.recv().await,
            Some(Outbound::Close {
                code: 1000,
                reason: "bye".into()
            })
        );
    }

    #[test]
    fn test_reason_truncated_on_char_boundary() {
        let long = "é".repeat(100);
        let truncated = truncate_reason(&long);
        assert!(truncated.len() <= MAX_CLOSE_REASON_BYTES);
        assert!(long.starts_with(truncated));
    }

    #[test]
    fn test_frame_to_message() {
        assert_eq!(
            Message::from(WireFrame::Binary(vec![1, 2])),
            Message::Binary(vec![1, 2])
        );
    }
}
