//! Per-session control-channel receive loop.
//!
//! Each verified session gets exactly one receive task, which exclusively
//! owns the socket's read half and the session's [`FrameReassembler`]. The
//! next read is only issued after the bytes of the previous one are fully
//! processed, so there is never more than one receive in flight per socket
//! and the reassembler needs no locking.

use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tracing::debug;

use protocol::{FrameEvent, FrameReassembler};

use crate::events::{EngineEvent, EventSender};
use crate::session::{Session, SessionRegistry};

/// Drives one session's receive loop until the connection ends or the
/// session is torn down, then removes it from the registry.
///
/// Failures never escape this task: frame-level errors discard the message
/// and keep the loop alive; socket errors end the loop. Whichever side
/// removes the session from the registry first (this loop, or an engine
/// `stop`) is the one that emits `SessionClosed`, so it fires exactly once.
pub async fn run_receive_loop(
    session: Arc<Session>,
    mut reader: OwnedReadHalf,
    buffer_size: usize,
    registry: Arc<SessionRegistry>,
    events: EventSender,
) {
    let id = session.id();
    let mut reassembler = FrameReassembler::new();

    loop {
        // Every read gets its own freshly sized buffer; the reassembler
        // queues whatever does not yet complete a block.
        let mut buf = vec![0u8; buffer_size];
        let read = tokio::select! {
            _ = session.closed() => None,
            result = reader.read(&mut buf) => Some(result),
        };

        let Some(result) = read else {
            debug!(session_id = %id, "receive loop stopped by teardown");
            break;
        };

        match result {
            Ok(0) => {
                debug!(session_id = %id, "connection closed by peer");
                break;
            }
            Ok(n) => {
                match reassembler.push(&buf[..n], session.local_keys(), session.peer_public_key())
                {
                    Ok(frame_events) => {
                        for event in frame_events {
                            match event {
                                FrameEvent::Message(text) => {
                                    debug!(session_id = %id, len = text.len(), "message received");
                                    events.emit(EngineEvent::DataReceived {
                                        session_id: id,
                                        text,
                                    });
                                }
                                FrameEvent::SignatureMismatch => {
                                    tracing::warn!(
                                        session_id = %id,
                                        "signature mismatch, message discarded"
                                    );
                                    events.emit(EngineEvent::SignatureMismatch { session_id: id });
                                }
                            }
                        }
                    }
                    // Undecodable block: the in-progress message is gone
                    // but the connection survives.
                    Err(e) => events.warn(format!("session {}: {}", id, e)),
                }
            }
            Err(e) => {
                events.warn(format!("session {} receive failed: {}", id, e));
                break;
            }
        }
    }

    // An engine stop drains the registry itself and emits SessionClosed for
    // what it drained; only announce sessions this loop removed.
    if registry.remove(id).is_some() {
        events.emit(EngineEvent::SessionClosed { session_id: id });
    }
}
