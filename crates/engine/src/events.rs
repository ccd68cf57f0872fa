//! Outward notifications from the engines.
//!
//! Every engine hands its constructor's caller an unbounded receiver; all
//! tasks inside the engine publish through a cloned [`EventSender`]. There
//! are no callback registrations — observers consume the channel. Every
//! per-connection failure produces exactly one event before any cleanup
//! completes.

use std::net::SocketAddr;

use tokio::sync::mpsc;

use crate::session::SessionId;

/// Severity of an [`EngineEvent::Information`] notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Direction of a file transfer, from the emitting engine's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// This engine is streaming a local file to the peer.
    Upload,
    /// This engine is writing a file received from the peer.
    Download,
}

/// Notifications surfaced to the embedding application.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Operational status, human-readable.
    Information { message: String, severity: Severity },

    /// A session completed its handshake and was registered.
    SessionConnected {
        session_id: SessionId,
        peer_addr: SocketAddr,
    },

    /// A session's connection ended and it was removed from the registry.
    SessionClosed { session_id: SessionId },

    /// A complete, signature-verified message arrived on the control
    /// channel.
    DataReceived { session_id: SessionId, text: String },

    /// A complete message failed signature verification and was discarded;
    /// the session survives.
    SignatureMismatch { session_id: SessionId },

    /// Bytes moved on an active file transfer.
    TransferProgress {
        direction: TransferDirection,
        file_name: String,
        declared_size: u64,
        bytes_transferred: u64,
    },

    /// A file transfer reached its declared size and was closed. Emitted
    /// exactly once per transfer.
    TransferComplete {
        direction: TransferDirection,
        file_name: String,
        bytes_transferred: u64,
    },
}

/// Cloneable publishing half of the event channel.
///
/// Sends are infallible from the engine's perspective: if the receiver is
/// gone, events are dropped silently (the embedding application has shut
/// down) but still mirrored to tracing.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EventSender {
    /// Creates the channel pair for a new engine.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Publishes an event.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    /// Publishes an informational status message.
    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{}", message);
        self.emit(EngineEvent::Information {
            message,
            severity: Severity::Info,
        });
    }

    /// Publishes a warning.
    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{}", message);
        self.emit(EngineEvent::Information {
            message,
            severity: Severity::Warning,
        });
    }

    /// Publishes an error notification.
    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("{}", message);
        self.emit(EngineEvent::Information {
            message,
            severity: Severity::Error,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_delivers_in_order() {
        let (events, mut rx) = EventSender::channel();
        events.info("one");
        events.warn("two");

        match rx.recv().await.unwrap() {
            EngineEvent::Information { message, severity } => {
                assert_eq!(message, "one");
                assert_eq!(severity, Severity::Info);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        match rx.recv().await.unwrap() {
            EngineEvent::Information { message, severity } => {
                assert_eq!(message, "two");
                assert_eq!(severity, Severity::Warning);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_emit_without_receiver_does_not_panic() {
        let (events, rx) = EventSender::channel();
        drop(rx);
        events.error("nobody is listening");
    }

    #[tokio::test]
    async fn test_clones_share_one_channel() {
        let (events, mut rx) = EventSender::channel();
        let clone = events.clone();
        clone.emit(EngineEvent::SessionClosed {
            session_id: SessionId(3),
        });
        assert_eq!(
            rx.recv().await.unwrap(),
            EngineEvent::SessionClosed {
                session_id: SessionId(3)
            }
        );
    }
}
