//! # Farlink Engine
//!
//! Socket-driven engines for the Farlink remote-control link. The server
//! engine listens, verifies connecting clients, and holds many sessions;
//! the client engine initiates a single session to a server. Both drive the
//! `protocol` crate's framing over raw TCP and stream files over a
//! dedicated secondary channel.
//!
//! Observers consume an event channel handed out at construction; engines
//! never call back into the embedding application.
//!
//! ## Modules
//!
//! - [`config`]: TOML-backed server/client configuration
//! - [`events`]: the outward notification channel
//! - [`session`]: per-connection state and the session registry
//! - [`handshake`]: tag check and public-key exchange
//! - [`control`]: the per-session receive loop
//! - [`transfer`]: the file-transfer channel (sender and receiver roles)
//! - [`server`] / [`client`]: the two engine variants
//! - [`error`]: error types

pub mod client;
pub mod config;
pub mod control;
pub mod error;
pub mod events;
pub mod handshake;
pub mod server;
pub mod session;
pub mod transfer;

pub use client::ClientEngine;
pub use config::{ClientConfig, ConfigError, ServerConfig};
pub use error::{EngineError, Result};
pub use events::{EngineEvent, EventSender, Severity, TransferDirection};
pub use server::{ServerEngine, StartStatus, StopStatus};
pub use session::{Session, SessionId, SessionRegistry};
