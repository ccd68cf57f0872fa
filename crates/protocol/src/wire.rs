//! Byte-exact wire constants shared by both ends of a link.
//!
//! Every quantity here is part of the on-wire contract: changing one breaks
//! interoperability with existing peers. The control channel moves fixed
//! 256-byte RSA blocks with no delimiters, so both sides must agree on every
//! size in this module.

/// Literal tag a connecting client sends immediately after the TCP connect.
///
/// The server reads exactly these four bytes before anything else; a
/// mismatch closes the socket without creating a session.
pub const HANDSHAKE_TAG: [u8; 4] = *b"[VF]";

/// Size of one control-channel block on the wire.
///
/// This is the ciphertext length produced by RSA-2048, and also the length
/// of a PKCS#1 v1.5 signature from the same modulus.
pub const RSA_BLOCK_SIZE: usize = 256;

/// Largest plaintext that fits a single RSA-2048 block under PKCS#1 v1.5.
pub const RSA_PLAINTEXT_CAPACITY: usize = RSA_BLOCK_SIZE - 11;

/// Maximum characters per control-message data chunk.
///
/// Chunks are split at character boundaries; 60 characters of worst-case
/// four-byte UTF-8 (240 bytes) still fit [`RSA_PLAINTEXT_CAPACITY`], so any
/// chunk encrypts to exactly one wire block.
pub const MESSAGE_CHUNK_CHARS: usize = 60;

/// Receive buffer for the handshake public-key exchange.
///
/// The exported PKCS#1 DER key is variable-length (around 270 bytes for
/// RSA-2048); it is read in one receive into a buffer of this size and
/// truncated to the actual length.
pub const KEY_EXCHANGE_BUFFER: usize = 500;

/// Seconds the server waits for the client's public key before giving up.
pub const KEY_EXCHANGE_TIMEOUT_SECS: u64 = 5;

/// AES-128 key length for the file-transfer cipher.
pub const AES_KEY_LEN: usize = 16;

/// AES CBC initialization-vector length.
pub const AES_IV_LEN: usize = 16;

/// AES block length; PKCS7 padding always rounds up to a multiple of this.
pub const AES_BLOCK_LEN: usize = 16;

/// Plaintext bytes per file-transfer chunk.
pub const TRANSFER_CHUNK_SIZE: usize = 512;

/// Ciphertext bytes for one full file-transfer chunk.
///
/// Each chunk is padded and finalized on its own, so a full 512-byte chunk
/// always gains one whole padding block.
pub const TRANSFER_CHUNK_CIPHERTEXT: usize = TRANSFER_CHUNK_SIZE + AES_BLOCK_LEN;

/// Conventional offset of the file-transfer port from the control port.
pub const TRANSFER_PORT_OFFSET: u16 = 1;

/// Ciphertext length of a partial (final) transfer chunk of `plaintext_len`
/// bytes under PKCS7 padding.
pub fn padded_chunk_len(plaintext_len: usize) -> usize {
    (plaintext_len / AES_BLOCK_LEN + 1) * AES_BLOCK_LEN
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_is_four_ascii_bytes() {
        assert_eq!(&HANDSHAKE_TAG, b"[VF]");
    }

    #[test]
    fn test_full_chunk_ciphertext_length() {
        assert_eq!(padded_chunk_len(TRANSFER_CHUNK_SIZE), TRANSFER_CHUNK_CIPHERTEXT);
    }

    #[test]
    fn test_partial_chunk_rounds_up_to_block() {
        assert_eq!(padded_chunk_len(0), 16);
        assert_eq!(padded_chunk_len(1), 16);
        assert_eq!(padded_chunk_len(15), 16);
        assert_eq!(padded_chunk_len(16), 32);
        assert_eq!(padded_chunk_len(511), 512);
    }

    #[test]
    fn test_worst_case_chunk_fits_one_block() {
        assert!(MESSAGE_CHUNK_CHARS * 4 <= RSA_PLAINTEXT_CAPACITY);
    }
}
