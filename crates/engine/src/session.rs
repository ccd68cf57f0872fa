//! Session state and the thread-safe session registry.
//!
//! A [`Session`] is one verified control connection: its socket write half,
//! the peer's public key, and this side's keypair. The read half never
//! lives here — it is owned exclusively by the session's receive task,
//! which is what keeps exactly one receive in flight per socket.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, Notify};

use protocol::{encode_message, KeyPair, RsaPublicKey};

use crate::error::{EngineError, Result};

/// Unique identifier of one control connection, stable for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State for one active control connection.
pub struct Session {
    id: SessionId,
    peer_addr: SocketAddr,
    writer: Mutex<OwnedWriteHalf>,
    peer_public_key: RsaPublicKey,
    local_keys: KeyPair,
    verified: bool,
    /// Signalled on teardown so the receive task stops waiting on the
    /// socket instead of hanging until the peer closes.
    closed: Notify,
    /// Opaque authorization metadata set by the embedding application;
    /// framing never interprets it.
    service_tag: std::sync::Mutex<Option<String>>,
}

impl Session {
    /// Creates a verified session. Sessions only exist after a successful
    /// handshake, so `verified` starts true by construction.
    pub fn new(
        id: SessionId,
        peer_addr: SocketAddr,
        writer: OwnedWriteHalf,
        peer_public_key: RsaPublicKey,
        local_keys: KeyPair,
    ) -> Self {
        Self {
            id,
            peer_addr,
            writer: Mutex::new(writer),
            peer_public_key,
            local_keys,
            verified: true,
            closed: Notify::new(),
            service_tag: std::sync::Mutex::new(None),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn peer_public_key(&self) -> &RsaPublicKey {
        &self.peer_public_key
    }

    pub fn local_keys(&self) -> &KeyPair {
        &self.local_keys
    }

    pub fn is_verified(&self) -> bool {
        self.verified
    }

    /// Sets the opaque service tag.
    pub fn set_service_tag(&self, tag: Option<String>) {
        *self.service_tag.lock().expect("service tag lock") = tag;
    }

    /// Returns a copy of the opaque service tag.
    pub fn service_tag(&self) -> Option<String> {
        self.service_tag.lock().expect("service tag lock").clone()
    }

    /// Frames and writes one signed message to the peer.
    ///
    /// Blocks are written in order under the writer lock, so concurrent
    /// senders cannot interleave blocks of different messages.
    pub async fn send(&self, text: &str) -> Result<()> {
        let wire = encode_message(text, &self.local_keys, &self.peer_public_key)?;
        let mut writer = self.writer.lock().await;
        writer
            .write_all(&wire)
            .await
            .map_err(|e| EngineError::ConnectionLost(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| EngineError::ConnectionLost(e.to_string()))?;
        Ok(())
    }

    /// Completes when [`Session::shutdown`] has been called.
    ///
    /// `notify_one` stores a permit, so a teardown signalled while the
    /// receive task is mid-processing is still observed on its next wait.
    pub async fn closed(&self) {
        self.closed.notified().await;
    }

    /// Tears the connection down: signals the receive task and shuts down
    /// the write half.
    pub async fn shutdown(&self) {
        self.closed.notify_one();
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("verified", &self.verified)
            .field("keys", &"[REDACTED]")
            .finish()
    }
}

/// Thread-safe collection of active sessions.
///
/// The registry is the only structure mutated by multiple engine tasks
/// concurrently (the accept path adds, failing receive loops remove);
/// DashMap keeps individual operations atomic without an outer lock.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<SessionId, Arc<Session>>,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Allocates the next session id. Ids are never reused.
    pub fn next_id(&self) -> SessionId {
        SessionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers a session under its own id.
    pub fn insert(&self, session: Arc<Session>) {
        self.sessions.insert(session.id(), session);
    }

    /// Looks up a session by id.
    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    /// Removes and returns a session.
    pub fn remove(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.remove(&id).map(|(_, session)| session)
    }

    /// Removes every session, returning them for teardown.
    pub fn drain(&self) -> Vec<Arc<Session>> {
        let ids: Vec<SessionId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    /// Ids of all registered sessions.
    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
