//! The listening (server) engine.
//!
//! Owns the control listener, the file-transfer listener, and the session
//! registry. Every accepted control connection runs the handshake and, if
//! verified, gets a registered [`Session`](crate::session::Session) plus its
//! own receive task. The accept loop re-arms immediately after each accept;
//! per-connection setup never holds it up.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info};

use protocol::KeyPair;

use crate::config::ServerConfig;
use crate::control;
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventSender};
use crate::handshake;
use crate::session::{Session, SessionId, SessionRegistry};
use crate::transfer;

/// Outcome of a `start` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartStatus {
    /// The engine came online.
    Started,
    /// The engine was already online; nothing changed.
    AlreadyRunning,
}

/// Outcome of a `stop` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopStatus {
    /// The engine went offline and released its sockets.
    Stopped,
    /// The engine was already offline; nothing changed.
    AlreadyStopped,
}

/// Live resources held while the engine is online.
struct Running {
    accept_task: JoinHandle<()>,
    transfer_listener: Arc<TcpListener>,
    transfer_tasks: Vec<JoinHandle<()>>,
    local_addr: SocketAddr,
    transfer_addr: SocketAddr,
}

/// The listening engine: accepts control connections, holds many sessions,
/// and targets one of them at a time for `send`.
pub struct ServerEngine {
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    events: EventSender,
    state: tokio::sync::Mutex<Option<Running>>,
    bound_target: std::sync::Mutex<Option<SessionId>>,
}

impl ServerEngine {
    /// Creates an offline engine and the event receiver for its observer.
    pub fn new(config: ServerConfig) -> Result<(Self, UnboundedReceiver<EngineEvent>)> {
        config.validate()?;
        let (events, rx) = EventSender::channel();
        Ok((
            Self {
                config,
                registry: Arc::new(SessionRegistry::new()),
                events,
                state: tokio::sync::Mutex::new(None),
                bound_target: std::sync::Mutex::new(None),
            },
            rx,
        ))
    }

    /// Brings the engine online. Idempotent: when already online, nothing
    /// changes and `AlreadyRunning` is returned.
    pub async fn start(&self) -> Result<StartStatus> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            self.events.info("server already running");
            return Ok(StartStatus::AlreadyRunning);
        }

        let listener = match self.bind_control() {
            Ok(listener) => listener,
            Err(e) => {
                self.events.error(format!("control bind failed: {}", e));
                return Err(e);
            }
        };
        let local_addr = listener.local_addr()?;

        let transfer_listener = match TcpListener::bind(SocketAddr::from((
            [0, 0, 0, 0],
            self.config.transfer_port,
        )))
        .await
        {
            Ok(listener) => Arc::new(listener),
            Err(e) => {
                self.events.error(format!("transfer bind failed: {}", e));
                return Err(e.into());
            }
        };
        let transfer_addr = transfer_listener.local_addr()?;

        let accept_task = tokio::spawn(accept_loop(
            listener,
            self.config.buffer_size,
            Arc::clone(&self.registry),
            self.events.clone(),
        ));

        *state = Some(Running {
            accept_task,
            transfer_listener,
            transfer_tasks: Vec::new(),
            local_addr,
            transfer_addr,
        });
        self.events.info(format!(
            "server online: control {}, transfer {}",
            local_addr, transfer_addr
        ));
        Ok(StartStatus::Started)
    }

    fn bind_control(&self) -> Result<TcpListener> {
        let socket = TcpSocket::new_v4()?;
        socket.set_reuseaddr(true)?;
        socket.bind(SocketAddr::from(([0, 0, 0, 0], self.config.listen_port)))?;
        Ok(socket.listen(self.config.backlog)?)
    }

    /// Takes the engine offline: closes every session socket, clears the
    /// registry, and releases both listeners. Idempotent no-op when already
    /// offline.
    pub async fn stop(&self) -> StopStatus {
        let mut state = self.state.lock().await;
        let Some(running) = state.take() else {
            return StopStatus::AlreadyStopped;
        };

        running.accept_task.abort();
        for task in running.transfer_tasks {
            task.abort();
        }
        drop(running.transfer_listener);

        for session in self.registry.drain() {
            session.shutdown().await;
            self.events.emit(EngineEvent::SessionClosed {
                session_id: session.id(),
            });
        }
        *self.bound_target.lock().expect("bound target lock") = None;

        self.events.info("server stopped");
        StopStatus::Stopped
    }

    /// Chooses which session subsequent `send` calls target. Fails without
    /// side effects when the id is unknown.
    pub fn bind(&self, id: SessionId) -> Result<()> {
        if self.registry.get(id).is_none() {
            return Err(EngineError::TargetNotFound(id));
        }
        *self.bound_target.lock().expect("bound target lock") = Some(id);
        Ok(())
    }

    /// Clears the send target.
    pub fn unbind(&self) {
        *self.bound_target.lock().expect("bound target lock") = None;
    }

    /// Sends a signed message to the bound session.
    pub async fn send(&self, text: &str) -> Result<()> {
        let target = (*self.bound_target.lock().expect("bound target lock"))
            .ok_or(EngineError::NoTarget)?;
        self.send_to(target, text).await
    }

    /// Sends a signed message to a specific session.
    pub async fn send_to(&self, id: SessionId, text: &str) -> Result<()> {
        let session = self.registry.get(id).ok_or(EngineError::TargetNotFound(id))?;
        session.send(text).await
    }

    /// Streams a local file to the given session's peer.
    ///
    /// The peer connects to this engine's transfer endpoint to pick the file
    /// up (its own `receive_file` does that); this side validates the source
    /// now, then arms one accept and plays the sender role over it.
    pub async fn begin_send_file(&self, id: SessionId, source: &Path) -> Result<()> {
        let session = self.registry.get(id).ok_or(EngineError::TargetNotFound(id))?;
        let (file_name, declared_size) = match transfer::source_metadata(source) {
            Ok(meta) => meta,
            Err(e) => {
                self.events.error(e.to_string());
                return Err(e);
            }
        };

        let mut state = self.state.lock().await;
        let running = state.as_mut().ok_or(EngineError::Offline)?;

        let listener = Arc::clone(&running.transfer_listener);
        let peer_key = session.peer_public_key().clone();
        let events = self.events.clone();
        let source = source.to_path_buf();
        let handle = tokio::spawn(async move {
            match listener.accept().await {
                Ok((mut stream, peer)) => {
                    debug!(%peer, "transfer connection accepted for upload");
                    if let Err(e) =
                        transfer::run_sender(&mut stream, &source, &peer_key, &events).await
                    {
                        events.error(format!("upload of {} failed: {}", source.display(), e));
                    }
                }
                Err(e) => events.warn(format!("transfer accept failed: {}", e)),
            }
        });
        running.transfer_tasks.push(handle);

        self.events.info(format!(
            "session {}: waiting to send {} ({} bytes)",
            id, file_name, declared_size
        ));
        Ok(())
    }

    /// Receives one file from the given session's peer into `dest_dir`.
    ///
    /// Validates the destination now, then arms one accept on the transfer
    /// endpoint and plays the receiver role over it.
    pub async fn receive_file(&self, id: SessionId, dest_dir: &Path) -> Result<()> {
        let session = self.registry.get(id).ok_or(EngineError::TargetNotFound(id))?;
        if let Err(e) = transfer::ensure_dest_dir(dest_dir) {
            self.events.error(e.to_string());
            return Err(e);
        }

        let mut state = self.state.lock().await;
        let running = state.as_mut().ok_or(EngineError::Offline)?;

        let listener = Arc::clone(&running.transfer_listener);
        let local_keys = session.local_keys().clone();
        let events = self.events.clone();
        let dest_dir = dest_dir.to_path_buf();
        let handle = tokio::spawn(async move {
            match listener.accept().await {
                Ok((mut stream, peer)) => {
                    debug!(%peer, "transfer connection accepted for download");
                    if let Err(e) =
                        transfer::run_receiver(&mut stream, &dest_dir, &local_keys, &events).await
                    {
                        events.error(format!("file receive failed: {}", e));
                    }
                }
                Err(e) => events.warn(format!("transfer accept failed: {}", e)),
            }
        });
        running.transfer_tasks.push(handle);
        Ok(())
    }

    /// Attaches opaque authorization metadata to a session.
    pub fn set_service_tag(&self, id: SessionId, tag: Option<String>) -> Result<()> {
        let session = self.registry.get(id).ok_or(EngineError::TargetNotFound(id))?;
        session.set_service_tag(tag);
        Ok(())
    }

    /// True while the engine is online.
    pub async fn is_running(&self) -> bool {
        self.state.lock().await.is_some()
    }

    /// Control listener address while online.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.state.lock().await.as_ref().map(|r| r.local_addr)
    }

    /// Transfer listener address while online.
    pub async fn transfer_addr(&self) -> Option<SocketAddr> {
        self.state.lock().await.as_ref().map(|r| r.transfer_addr)
    }

    /// Ids of all registered sessions.
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.registry.ids()
    }

    /// Number of registered sessions.
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }
}

/// Accepts control connections forever. Each accept immediately re-arms;
/// handshake and registration happen in a per-connection task owned by
/// this loop's `JoinSet`, so aborting the loop (engine stop) also kills
/// every in-flight handshake and receive loop — a connection can never
/// register itself into a stopped engine.
async fn accept_loop(
    listener: TcpListener,
    buffer_size: usize,
    registry: Arc<SessionRegistry>,
    events: EventSender,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    debug!(%peer_addr, "control connection accepted");
                    connections.spawn(setup_connection(
                        stream,
                        peer_addr,
                        buffer_size,
                        Arc::clone(&registry),
                        events.clone(),
                    ));
                }
                Err(e) => {
                    events.warn(format!("accept failed: {}", e));
                }
            },
            // Reap finished connection tasks so the set does not grow.
            Some(_) = connections.join_next() => {}
        }
    }
}

/// Handshakes one accepted connection and, if it verifies, registers the
/// session and runs its receive loop. Failures drop the socket with no
/// session ever registered.
async fn setup_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    buffer_size: usize,
    registry: Arc<SessionRegistry>,
    events: EventSender,
) {
    let local_keys = match KeyPair::generate() {
        Ok(keys) => keys,
        Err(e) => {
            events.error(format!("keypair generation failed: {}", e));
            return;
        }
    };

    let peer_key = match handshake::server_handshake(&mut stream, &local_keys).await {
        Ok(key) => key,
        Err(e) => {
            events.warn(format!("handshake with {} failed: {}", peer_addr, e));
            return;
        }
    };

    let id = registry.next_id();
    let (reader, writer) = stream.into_split();
    let session = Arc::new(Session::new(id, peer_addr, writer, peer_key, local_keys));
    registry.insert(Arc::clone(&session));
    info!(session_id = %id, %peer_addr, "session verified");
    events.emit(EngineEvent::SessionConnected {
        session_id: id,
        peer_addr,
    });

    control::run_receive_loop(session, reader, buffer_size, registry, events).await;
}
