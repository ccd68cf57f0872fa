//! The initiating (client) engine.
//!
//! Mirrors the server engine with a single implicit session: `start`
//! connects and handshakes, `send` targets the server without a session id,
//! and the file-transfer operations open their own socket to the server's
//! transfer endpoint (the client never listens).

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use protocol::KeyPair;

use crate::config::ClientConfig;
use crate::control;
use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventSender};
use crate::handshake;
use crate::server::{StartStatus, StopStatus};
use crate::session::{Session, SessionId, SessionRegistry};
use crate::transfer;

/// Receive buffer size for the client's control connection.
const CLIENT_BUFFER_SIZE: usize = 8192;

/// Live resources held while the client is connected.
struct Running {
    session: Arc<Session>,
    transfer_tasks: Vec<JoinHandle<()>>,
}

/// The initiating engine: one control connection to the server.
pub struct ClientEngine {
    config: ClientConfig,
    registry: Arc<SessionRegistry>,
    events: EventSender,
    state: tokio::sync::Mutex<Option<Running>>,
}

impl ClientEngine {
    /// Creates a disconnected engine and the event receiver for its
    /// observer.
    pub fn new(config: ClientConfig) -> Result<(Self, UnboundedReceiver<EngineEvent>)> {
        config.validate()?;
        let (events, rx) = EventSender::channel();
        Ok((
            Self {
                config,
                registry: Arc::new(SessionRegistry::new()),
                events,
                state: tokio::sync::Mutex::new(None),
            },
            rx,
        ))
    }

    /// Connects to the server and completes the handshake. Idempotent:
    /// when already connected, nothing changes and `AlreadyRunning` is
    /// returned.
    pub async fn start(&self) -> Result<StartStatus> {
        let mut state = self.state.lock().await;
        if state.is_some() {
            self.events.info("client already connected");
            return Ok(StartStatus::AlreadyRunning);
        }

        let addr = format!("{}:{}", self.config.server_ip, self.config.server_port);
        let mut stream = match TcpStream::connect(&addr).await {
            Ok(stream) => stream,
            Err(e) => {
                self.events.error(format!("connect to {} failed: {}", addr, e));
                return Err(e.into());
            }
        };
        let peer_addr = stream.peer_addr()?;

        let local_keys = KeyPair::generate()?;
        let peer_key = match handshake::client_handshake(&mut stream, &local_keys).await {
            Ok(key) => key,
            Err(e) => {
                self.events.warn(format!("handshake with {} failed: {}", addr, e));
                return Err(e);
            }
        };

        let id = self.registry.next_id();
        let (reader, writer) = stream.into_split();
        let session = Arc::new(Session::new(id, peer_addr, writer, peer_key, local_keys));
        self.registry.insert(Arc::clone(&session));
        info!(session_id = %id, server = %addr, "connected and verified");
        self.events.emit(EngineEvent::SessionConnected {
            session_id: id,
            peer_addr,
        });

        tokio::spawn(control::run_receive_loop(
            Arc::clone(&session),
            reader,
            CLIENT_BUFFER_SIZE,
            Arc::clone(&self.registry),
            self.events.clone(),
        ));

        *state = Some(Running {
            session,
            transfer_tasks: Vec::new(),
        });
        self.events.info(format!("client online, server {}", addr));
        Ok(StartStatus::Started)
    }

    /// Disconnects and clears the session. Idempotent no-op when already
    /// disconnected.
    pub async fn stop(&self) -> StopStatus {
        let mut state = self.state.lock().await;
        let Some(running) = state.take() else {
            return StopStatus::AlreadyStopped;
        };

        for task in running.transfer_tasks {
            task.abort();
        }
        for session in self.registry.drain() {
            session.shutdown().await;
            self.events.emit(EngineEvent::SessionClosed {
                session_id: session.id(),
            });
        }
        drop(running.session);

        self.events.info("client stopped");
        StopStatus::Stopped
    }

    /// Sends a signed message to the server.
    pub async fn send(&self, text: &str) -> Result<()> {
        let state = self.state.lock().await;
        let running = state.as_ref().ok_or(EngineError::NoTarget)?;
        running.session.send(text).await
    }

    /// Streams a local file to the server.
    ///
    /// Validates the source now; the stream itself runs in its own task,
    /// connecting out to the server's transfer endpoint and playing the
    /// sender role. The server must have armed a matching `receive_file`.
    pub async fn begin_send_file(&self, source: &Path) -> Result<()> {
        let mut state = self.state.lock().await;
        let running = state.as_mut().ok_or(EngineError::NoTarget)?;

        if let Err(e) = transfer::source_metadata(source) {
            self.events.error(e.to_string());
            return Err(e);
        }

        let addr = self.transfer_endpoint(&running.session);
        let peer_key = running.session.peer_public_key().clone();
        let events = self.events.clone();
        let source = source.to_path_buf();
        let handle = tokio::spawn(async move {
            match TcpStream::connect(addr).await {
                Ok(mut stream) => {
                    debug!(%addr, "transfer connection opened for upload");
                    if let Err(e) =
                        transfer::run_sender(&mut stream, &source, &peer_key, &events).await
                    {
                        events.error(format!("upload of {} failed: {}", source.display(), e));
                    }
                }
                Err(e) => events.error(format!("transfer connect to {} failed: {}", addr, e)),
            }
        });
        running.transfer_tasks.push(handle);
        Ok(())
    }

    /// Receives one file from the server into `dest_dir`.
    ///
    /// Validates the destination now; the stream itself runs in its own
    /// task, connecting out to the server's transfer endpoint and playing
    /// the receiver role. The server must have armed a matching
    /// `begin_send_file`.
    pub async fn receive_file(&self, dest_dir: &Path) -> Result<()> {
        let mut state = self.state.lock().await;
        let running = state.as_mut().ok_or(EngineError::NoTarget)?;

        if let Err(e) = transfer::ensure_dest_dir(dest_dir) {
            self.events.error(e.to_string());
            return Err(e);
        }

        let addr = self.transfer_endpoint(&running.session);
        let local_keys = running.session.local_keys().clone();
        let events = self.events.clone();
        let dest_dir = dest_dir.to_path_buf();
        let handle = tokio::spawn(async move {
            match TcpStream::connect(addr).await {
                Ok(mut stream) => {
                    debug!(%addr, "transfer connection opened for download");
                    if let Err(e) =
                        transfer::run_receiver(&mut stream, &dest_dir, &local_keys, &events).await
                    {
                        events.error(format!("file receive failed: {}", e));
                    }
                }
                Err(e) => events.error(format!("transfer connect to {} failed: {}", addr, e)),
            }
        });
        running.transfer_tasks.push(handle);
        Ok(())
    }

    /// The server's file-transfer endpoint: the control connection's
    /// address with the configured transfer port.
    fn transfer_endpoint(&self, session: &Session) -> SocketAddr {
        SocketAddr::new(session.peer_addr().ip(), self.config.transfer_port)
    }

    /// True while connected.
    pub async fn is_running(&self) -> bool {
        self.state.lock().await.is_some()
    }

    /// Id of the single session while connected.
    pub async fn session_id(&self) -> Option<SessionId> {
        self.state
            .lock()
            .await
            .as_ref()
            .map(|running| running.session.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> ClientConfig {
        ClientConfig {
            server_ip: "127.0.0.1".to_string(),
            server_port: 1, // nothing listens here
            transfer_port: 2,
        }
    }

    #[tokio::test]
    async fn test_stop_when_disconnected_is_noop() {
        let (client, _rx) = ClientEngine::new(test_config()).unwrap();
        assert_eq!(client.stop().await, StopStatus::AlreadyStopped);
    }

    #[tokio::test]
    async fn test_send_without_connection_is_no_target() {
        let (client, _rx) = ClientEngine::new(test_config()).unwrap();
        let result = client.send("hello").await;
        assert!(matches!(result, Err(EngineError::NoTarget)));
    }

    #[tokio::test]
    async fn test_transfers_without_connection_are_no_target() {
        let (client, _rx) = ClientEngine::new(test_config()).unwrap();
        let dir = tempfile::tempdir().unwrap();

        let result = client.begin_send_file(&dir.path().join("f.bin")).await;
        assert!(matches!(result, Err(EngineError::NoTarget)));

        let result = client.receive_file(dir.path()).await;
        assert!(matches!(result, Err(EngineError::NoTarget)));
    }

    #[tokio::test]
    async fn test_start_against_dead_server_fails_with_event() {
        let (client, mut rx) = ClientEngine::new(test_config()).unwrap();
        let result = client.start().await;
        assert!(result.is_err());
        assert!(!client.is_running().await);

        match rx.recv().await.unwrap() {
            EngineEvent::Information { severity, .. } => {
                assert_eq!(severity, crate::events::Severity::Error);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = ClientConfig {
            server_ip: String::new(),
            ..test_config()
        };
        assert!(ClientEngine::new(config).is_err());
    }
}
