//! Asymmetric key material and symmetric cipher sessions.
//!
//! This module provides RSA-2048 keypair generation, PKCS#1 DER public-key
//! import/export, PKCS#1 v1.5 block encryption, SHA-256/PKCS#1 v1.5 signing
//! and verification, and the ephemeral AES-128-CBC sessions used by the
//! file-transfer channel.
//!
//! Every connection owns exactly one [`KeyPair`]; the private half never
//! leaves the process. The peer's public key arrives during the handshake as
//! PKCS#1 DER and is imported with [`import_public_key`].

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::pkcs1::{DecodeRsaPublicKey, EncodeRsaPublicKey};
use rsa::{Pkcs1v15Encrypt, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256};

use crate::error::{ProtocolError, Result};
use crate::wire::{AES_IV_LEN, AES_KEY_LEN};

/// RSA modulus size in bits. Fixed by the wire protocol: every control
/// block is one RSA-2048 ciphertext (256 bytes).
pub const RSA_KEY_BITS: usize = 2048;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;

/// An RSA-2048 keypair owned by one side of a connection.
///
/// Used to decrypt inbound blocks and sign outbound messages. The matching
/// operations against the *peer* key are the free functions
/// [`encrypt_for`] and [`verify`].
#[derive(Clone)]
pub struct KeyPair {
    private: RsaPrivateKey,
    public: RsaPublicKey,
}

impl KeyPair {
    /// Generates a fresh RSA-2048 keypair from the OS random number
    /// generator.
    pub fn generate() -> Result<Self> {
        let private = RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS)
            .map_err(|e| ProtocolError::KeyGeneration(e.to_string()))?;
        let public = RsaPublicKey::from(&private);
        Ok(Self { private, public })
    }

    /// Returns the public half.
    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    /// Exports the public key as PKCS#1 DER, the format sent on the wire
    /// during the handshake.
    pub fn public_key_der(&self) -> Result<Vec<u8>> {
        Ok(self.public.to_pkcs1_der()?.as_bytes().to_vec())
    }

    /// Decrypts one inbound wire block with the private key.
    pub fn decrypt(&self, block: &[u8]) -> Result<Vec<u8>> {
        self.private
            .decrypt(Pkcs1v15Encrypt, block)
            .map_err(|e| ProtocolError::Decryption(e.to_string()))
    }

    /// Signs `data` with SHA-256 + PKCS#1 v1.5.
    ///
    /// The signature is always 256 bytes, exactly one wire block.
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        let digest = Sha256::digest(data);
        self.private
            .sign(Pkcs1v15Sign::new::<Sha256>(), &digest)
            .map_err(|e| ProtocolError::InvalidSignature(e.to_string()))
    }

    /// Short hex fingerprint of the public key, for logging.
    pub fn fingerprint(&self) -> String {
        self.public_key_der()
            .map(|der| fingerprint(&der))
            .unwrap_or_else(|_| "<unexportable>".to_string())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("fingerprint", &self.fingerprint())
            .field("private", &"[REDACTED]")
            .finish()
    }
}

/// Imports a peer public key from the PKCS#1 DER bytes received during the
/// handshake.
pub fn import_public_key(der: &[u8]) -> Result<RsaPublicKey> {
    Ok(RsaPublicKey::from_pkcs1_der(der)?)
}

/// Encrypts `plaintext` for the holder of `public`, producing one 256-byte
/// wire block.
///
/// Fails if the plaintext exceeds the PKCS#1 v1.5 capacity (245 bytes).
pub fn encrypt_for(public: &RsaPublicKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    public
        .encrypt(&mut OsRng, Pkcs1v15Encrypt, plaintext)
        .map_err(|e| ProtocolError::Encryption(e.to_string()))
}

/// Verifies a SHA-256/PKCS#1 v1.5 signature produced by the holder of
/// `public` over `data`.
pub fn verify(public: &RsaPublicKey, data: &[u8], signature: &[u8]) -> bool {
    let digest = Sha256::digest(data);
    public
        .verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
        .is_ok()
}

/// Short hex fingerprint of exported public-key bytes.
pub fn fingerprint(der: &[u8]) -> String {
    let hash = Sha256::digest(der);
    hex::encode(&hash[..8])
}

/// An ephemeral AES-128-CBC/PKCS7 session for one file transfer.
///
/// The sending side calls [`SymmetricSession::generate`]; the receiving
/// side reconstructs the same session from the decrypted bootstrap blocks
/// with [`SymmetricSession::from_parts`]. Each chunk is padded and
/// finalized independently with the same key and IV — this is the wire
/// contract, not a streaming CBC across the whole file.
///
/// Key and IV bytes are wiped when the session drops.
pub struct SymmetricSession {
    key: [u8; AES_KEY_LEN],
    iv: [u8; AES_IV_LEN],
}

impl SymmetricSession {
    /// Generates a fresh random key and IV.
    pub fn generate() -> Self {
        let mut key = [0u8; AES_KEY_LEN];
        let mut iv = [0u8; AES_IV_LEN];
        OsRng.fill_bytes(&mut key);
        OsRng.fill_bytes(&mut iv);
        Self { key, iv }
    }

    /// Reconstructs a session from key and IV bytes received from the peer.
    pub fn from_parts(key: &[u8], iv: &[u8]) -> Result<Self> {
        if key.len() != AES_KEY_LEN {
            return Err(ProtocolError::SymmetricCipher(format!(
                "key must be {} bytes, got {}",
                AES_KEY_LEN,
                key.len()
            )));
        }
        if iv.len() != AES_IV_LEN {
            return Err(ProtocolError::SymmetricCipher(format!(
                "iv must be {} bytes, got {}",
                AES_IV_LEN,
                iv.len()
            )));
        }
        let mut session = Self {
            key: [0u8; AES_KEY_LEN],
            iv: [0u8; AES_IV_LEN],
        };
        session.key.copy_from_slice(key);
        session.iv.copy_from_slice(iv);
        Ok(session)
    }

    /// Returns the raw key bytes, for the sender's bootstrap block.
    pub fn key(&self) -> &[u8; AES_KEY_LEN] {
        &self.key
    }

    /// Returns the raw IV bytes, for the sender's bootstrap block.
    pub fn iv(&self) -> &[u8; AES_IV_LEN] {
        &self.iv
    }

    /// Encrypts one chunk as a self-contained padded unit.
    pub fn encrypt_chunk(&self, plaintext: &[u8]) -> Vec<u8> {
        Aes128CbcEnc::new(&self.key.into(), &self.iv.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }

    /// Decrypts one chunk that was encrypted as a self-contained unit.
    pub fn decrypt_chunk(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        Aes128CbcDec::new(&self.key.into(), &self.iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|e| ProtocolError::SymmetricCipher(e.to_string()))
    }
}

impl Drop for SymmetricSession {
    fn drop(&mut self) {
        // Best-effort wipe of ephemeral key material.
        self.key.fill(0);
        self.iv.fill(0);
    }
}

impl std::fmt::Debug for SymmetricSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymmetricSession")
            .field("key", &"[REDACTED]")
            .field("iv", &"[REDACTED]")
            .finish()
    }
}
