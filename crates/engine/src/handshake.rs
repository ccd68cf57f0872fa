//! Control-channel bootstrap: tag check and public-key exchange.
//!
//! Sequence, client to server:
//!
//! 1. client sends the literal 4-byte tag
//! 2. server reads exactly 4 bytes and compares; mismatch closes the socket
//!    with no session created
//! 3. server sends its PKCS#1 DER public key
//! 4. client imports it and replies with its own DER key
//! 5. server reads the reply (bounded by a 5-second timeout), imports it,
//!    and only then may a session be registered
//!
//! Any failure here aborts before session creation; a half-initialized
//! session is never registered.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::debug;

use protocol::crypto;
use protocol::{KeyPair, RsaPublicKey, HANDSHAKE_TAG, KEY_EXCHANGE_BUFFER, KEY_EXCHANGE_TIMEOUT_SECS};

use crate::error::{EngineError, Result};

/// Server side of the bootstrap: validate the tag, send our key, receive
/// the peer's key.
pub async fn server_handshake<S>(stream: &mut S, local: &KeyPair) -> Result<RsaPublicKey>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut tag = [0u8; HANDSHAKE_TAG.len()];
    stream
        .read_exact(&mut tag)
        .await
        .map_err(|e| EngineError::HandshakeFailure(format!("tag read failed: {}", e)))?;
    if tag != HANDSHAKE_TAG {
        return Err(EngineError::HandshakeFailure(format!(
            "unexpected tag {:?}",
            tag
        )));
    }

    let der = local.public_key_der()?;
    stream
        .write_all(&der)
        .await
        .map_err(|e| EngineError::HandshakeFailure(format!("key send failed: {}", e)))?;
    stream
        .flush()
        .await
        .map_err(|e| EngineError::HandshakeFailure(format!("key send failed: {}", e)))?;

    // The peer key arrives in one receive into a fixed-size buffer,
    // truncated to the actual length. Peers that stall here are cut off by
    // the timeout.
    let peer_der = timeout(
        Duration::from_secs(KEY_EXCHANGE_TIMEOUT_SECS),
        read_key_material(stream),
    )
    .await
    .map_err(|_| EngineError::HandshakeFailure("key exchange timed out".to_string()))??;

    let peer = crypto::import_public_key(&peer_der)
        .map_err(|e| EngineError::HandshakeFailure(e.to_string()))?;
    debug!(fingerprint = %crypto::fingerprint(&peer_der), "peer key imported");
    Ok(peer)
}

/// Client side of the bootstrap: send the tag, receive the server's key,
/// reply with our own.
pub async fn client_handshake<S>(stream: &mut S, local: &KeyPair) -> Result<RsaPublicKey>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream
        .write_all(&HANDSHAKE_TAG)
        .await
        .map_err(|e| EngineError::HandshakeFailure(format!("tag send failed: {}", e)))?;
    stream
        .flush()
        .await
        .map_err(|e| EngineError::HandshakeFailure(format!("tag send failed: {}", e)))?;

    let server_der = read_key_material(stream).await?;
    let peer = crypto::import_public_key(&server_der)
        .map_err(|e| EngineError::HandshakeFailure(e.to_string()))?;
    debug!(fingerprint = %crypto::fingerprint(&server_der), "server key imported");

    let der = local.public_key_der()?;
    stream
        .write_all(&der)
        .await
        .map_err(|e| EngineError::HandshakeFailure(format!("key send failed: {}", e)))?;
    stream
        .flush()
        .await
        .map_err(|e| EngineError::HandshakeFailure(format!("key send failed: {}", e)))?;

    Ok(peer)
}

/// Reads one variable-length key export: a single receive into a
/// [`KEY_EXCHANGE_BUFFER`]-sized buffer, resized to what arrived.
async fn read_key_material<S>(stream: &mut S) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; KEY_EXCHANGE_BUFFER];
    let n = stream
        .read(&mut buf)
        .await
        .map_err(|e| EngineError::HandshakeFailure(format!("key read failed: {}", e)))?;
    if n == 0 {
        return Err(EngineError::HandshakeFailure(
            "peer closed during key exchange".to_string(),
        ));
    }
    buf.truncate(n);
    Ok(buf)
}
