//! # Farlink Protocol Library
//!
//! Wire-level building blocks for the Farlink remote-control link: signed
//! block framing for the control channel and the cipher bootstrap material
//! for the file-transfer channel. This crate is pure protocol logic — it
//! never touches a socket; the `engine` crate drives it with real I/O.
//!
//! ## Layering
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Application messages (UTF-8)     │
//! ├─────────────────────────────────────────┤
//! │   Signed block framing                  │  SHA-256/PKCS#1 v1.5 + RSA blocks
//! ├─────────────────────────────────────────┤
//! │   Transport (raw TCP, engine crate)     │
//! └─────────────────────────────────────────┘
//! ```
//!
//! File transfers bypass the control framing entirely: they bootstrap an
//! ephemeral AES-128-CBC session over four RSA blocks, then stream
//! independently padded ciphertext chunks (see [`crypto::SymmetricSession`]).
//!
//! ## Modules
//!
//! - [`crypto`]: RSA keypairs, sign/verify, and AES cipher sessions
//! - [`framing`]: the frame encoder and per-connection reassembler
//! - [`wire`]: byte-exact wire constants
//! - [`error`]: error types

pub mod crypto;
pub mod error;
pub mod framing;
pub mod wire;

pub use crypto::{encrypt_for, import_public_key, verify, KeyPair, SymmetricSession};
pub use error::{ProtocolError, Result};
pub use framing::{encode_message, FrameEvent, FrameReassembler, FrameState};
pub use wire::{
    HANDSHAKE_TAG, KEY_EXCHANGE_BUFFER, KEY_EXCHANGE_TIMEOUT_SECS, MESSAGE_CHUNK_CHARS,
    RSA_BLOCK_SIZE, TRANSFER_CHUNK_CIPHERTEXT, TRANSFER_CHUNK_SIZE, TRANSFER_PORT_OFFSET,
};

// Engine code needs the concrete peer-key type without depending on the
// rsa crate directly.
pub use rsa::RsaPublicKey;
