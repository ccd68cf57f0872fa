//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering all possible failure modes.
#[derive(Debug, Error)]
pub enum ProtocolError {
    // Asymmetric crypto
    /// RSA keypair generation failed.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// Invalid or malformed public key material.
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Encryption operation failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Decryption operation failed.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Signing failed, or a signature did not verify.
    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    // Symmetric crypto
    /// AES-CBC encrypt/decrypt failure (bad padding, wrong key material).
    #[error("cipher failure: {0}")]
    SymmetricCipher(String),

    // Framing
    /// The decrypted size block did not hold a decimal length.
    #[error("malformed size block: {0:?}")]
    MalformedSizeBlock(String),

    /// A decrypted data chunk was not valid UTF-8.
    #[error("message chunk is not valid UTF-8: {0}")]
    InvalidUtf8(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

// Conversions from underlying crate errors

impl From<rsa::pkcs1::Error> for ProtocolError {
    fn from(err: rsa::pkcs1::Error) -> Self {
        ProtocolError::InvalidPublicKey(err.to_string())
    }
}

impl From<std::string::FromUtf8Error> for ProtocolError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        ProtocolError::InvalidUtf8(err.to_string())
    }
}
