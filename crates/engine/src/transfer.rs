//! File-transfer channel: one socket, one file, its own cipher bootstrap.
//!
//! A transfer never rides the control channel. The sending side opens (or
//! is handed) a dedicated socket, generates an ephemeral AES-128-CBC
//! session, and sends four RSA-encrypted bootstrap blocks in strict order:
//! key, IV, file name, file size (ASCII decimal). The file then streams as
//! fixed 512-byte plaintext chunks, each padded and finalized on its own —
//! the receiver sizes its reads from the remaining byte count and detects
//! completion when `bytes_written` reaches the declared size.
//!
//! Filesystem preconditions (source exists, destination directory exists)
//! are validated by [`source_metadata`] / [`ensure_dest_dir`] before any
//! socket is opened; the engines call these synchronously so the caller
//! gets the rejection directly.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use protocol::wire::{padded_chunk_len, RSA_BLOCK_SIZE, TRANSFER_CHUNK_CIPHERTEXT, TRANSFER_CHUNK_SIZE};
use protocol::{crypto, KeyPair, RsaPublicKey, SymmetricSession};

use crate::error::{EngineError, Result};
use crate::events::{EngineEvent, EventSender, TransferDirection};

/// Validates a transfer source and returns its file name and size.
///
/// Rejected before any socket is opened: a missing path, a directory, or a
/// non-UTF-8 file name all fail here.
pub fn source_metadata(path: &Path) -> Result<(String, u64)> {
    let meta = std::fs::metadata(path)
        .map_err(|_| EngineError::Filesystem(format!("source file not found: {}", path.display())))?;
    if !meta.is_file() {
        return Err(EngineError::Filesystem(format!(
            "source is not a file: {}",
            path.display()
        )));
    }
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            EngineError::Filesystem(format!("source file name is not UTF-8: {}", path.display()))
        })?
        .to_string();
    Ok((name, meta.len()))
}

/// Validates that a transfer destination directory exists.
pub fn ensure_dest_dir(dir: &Path) -> Result<()> {
    if !dir.is_dir() {
        return Err(EngineError::Filesystem(format!(
            "destination directory does not exist: {}",
            dir.display()
        )));
    }
    Ok(())
}

/// Sender role: bootstraps the cipher and streams `source` over `stream`.
///
/// The four bootstrap payloads are each RSA-encrypted for the receiver and
/// sent as one 256-byte block. Progress events carry the cumulative
/// plaintext byte count.
pub async fn run_sender<S>(
    stream: &mut S,
    source: &Path,
    peer_key: &RsaPublicKey,
    events: &EventSender,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (file_name, declared_size) = source_metadata(source)?;
    let cipher = SymmetricSession::generate();

    // Bootstrap blocks, strict order: key, IV, name, size.
    for payload in [
        cipher.key().as_slice(),
        cipher.iv().as_slice(),
        file_name.as_bytes(),
        declared_size.to_string().as_bytes(),
    ] {
        let block = crypto::encrypt_for(peer_key, payload)?;
        stream.write_all(&block).await?;
    }
    debug!(file = %file_name, size = declared_size, "transfer bootstrap sent");

    let mut file = File::open(source).await?;
    let mut sent = 0u64;
    loop {
        let mut chunk = vec![0u8; TRANSFER_CHUNK_SIZE];
        let n = read_chunk(&mut file, &mut chunk).await?;
        if n == 0 {
            break;
        }
        chunk.truncate(n);

        // Each chunk is a self-contained padded unit.
        let ciphertext = cipher.encrypt_chunk(&chunk);
        stream.write_all(&ciphertext).await?;

        sent += n as u64;
        events.emit(EngineEvent::TransferProgress {
            direction: TransferDirection::Upload,
            file_name: file_name.clone(),
            declared_size,
            bytes_transferred: sent,
        });

        if n < TRANSFER_CHUNK_SIZE {
            break;
        }
    }
    stream.flush().await?;
    stream.shutdown().await?;

    events.emit(EngineEvent::TransferComplete {
        direction: TransferDirection::Upload,
        file_name,
        bytes_transferred: sent,
    });
    Ok(())
}

/// Receiver role: decodes the bootstrap, writes the incoming file under
/// `dest_dir`, and returns the written path.
///
/// Any directory components in the announced file name are stripped; the
/// peer cannot pick a path outside `dest_dir`. A chunk that fails to
/// decrypt aborts the transfer and leaves the partial file in place.
pub async fn run_receiver<S>(
    stream: &mut S,
    dest_dir: &Path,
    local: &KeyPair,
    events: &EventSender,
) -> Result<PathBuf>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    ensure_dest_dir(dest_dir)?;

    // Bootstrap blocks, strict order: key, IV, name, size.
    let key = read_bootstrap_block(stream, local).await?;
    let iv = read_bootstrap_block(stream, local).await?;
    let name_bytes = read_bootstrap_block(stream, local).await?;
    let size_bytes = read_bootstrap_block(stream, local).await?;

    let cipher = SymmetricSession::from_parts(&key, &iv)?;
    let announced = String::from_utf8(name_bytes)
        .map_err(|e| EngineError::TransferCrypto(format!("file name: {}", e)))?;
    let file_name = Path::new(&announced)
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            EngineError::TransferCrypto(format!("unusable file name {:?}", announced))
        })?
        .to_string();
    let declared_size: u64 = String::from_utf8(size_bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| EngineError::TransferCrypto("unparseable file size".to_string()))?;
    debug!(file = %file_name, size = declared_size, "transfer bootstrap received");

    let out_path = dest_dir.join(&file_name);
    let mut out = File::create(&out_path).await?;

    let mut written = 0u64;
    while written < declared_size {
        let remaining = (declared_size - written) as usize;
        let expected = if remaining >= TRANSFER_CHUNK_SIZE {
            TRANSFER_CHUNK_CIPHERTEXT
        } else {
            padded_chunk_len(remaining)
        };

        let mut ciphertext = vec![0u8; expected];
        stream
            .read_exact(&mut ciphertext)
            .await
            .map_err(|e| EngineError::ConnectionLost(format!("transfer stream: {}", e)))?;

        let plaintext = cipher
            .decrypt_chunk(&ciphertext)
            .map_err(|e| EngineError::TransferCrypto(e.to_string()))?;
        out.write_all(&plaintext).await?;
        written += plaintext.len() as u64;

        events.emit(EngineEvent::TransferProgress {
            direction: TransferDirection::Download,
            file_name: file_name.clone(),
            declared_size,
            bytes_transferred: written,
        });
    }
    out.flush().await?;

    events.emit(EngineEvent::TransferComplete {
        direction: TransferDirection::Download,
        file_name,
        bytes_transferred: written,
    });
    Ok(out_path)
}

/// Reads one 256-byte bootstrap block and decrypts it with the local
/// private key.
async fn read_bootstrap_block<S>(stream: &mut S, local: &KeyPair) -> Result<Vec<u8>>
where
    S: AsyncRead + Unpin,
{
    let mut block = vec![0u8; RSA_BLOCK_SIZE];
    stream
        .read_exact(&mut block)
        .await
        .map_err(|e| EngineError::ConnectionLost(format!("transfer bootstrap: {}", e)))?;
    Ok(local.decrypt(&block)?)
}

/// Fills `buf` from the file, looping over short reads; returns the bytes
/// read, which is only less than `buf.len()` at end of file.
async fn read_chunk(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
