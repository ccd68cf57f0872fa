//! Signed block framing for the control channel.
//!
//! # Frame format
//!
//! One logical message travels as a sequence of fixed 256-byte blocks with
//! no delimiters or sequence numbers:
//!
//! ```text
//! [signature block][size block][data block]...
//! ```
//!
//! - signature block: the raw SHA-256/PKCS#1 v1.5 signature over the full
//!   plaintext (a 2048-bit signature is exactly one block, so it is sent
//!   as-is, never re-encrypted)
//! - size block: RSA-encrypted ASCII decimal of the plaintext length,
//!   counted in **characters**
//! - data blocks: RSA-encrypted UTF-8 chunks of at most
//!   [`MESSAGE_CHUNK_CHARS`] characters, the last chunk holding the
//!   remainder
//!
//! The stream carries no message ids; the reassembler relies entirely on
//! blocks arriving in the order they were sent. The size block counts
//! characters rather than bytes — both the encoder and the reassembler here
//! count characters, so the framing is self-consistent for any UTF-8
//! payload.

use bytes::{Buf, BytesMut};
use rsa::RsaPublicKey;

use crate::crypto::{self, KeyPair};
use crate::error::{ProtocolError, Result};
use crate::wire::{MESSAGE_CHUNK_CHARS, RSA_BLOCK_SIZE};

/// Encodes one outbound message into its on-wire block sequence.
///
/// Signs the plaintext with `local`, then encrypts the size block and each
/// data chunk for `peer`. Chunks are split at character boundaries so every
/// chunk is valid UTF-8 on its own and fits one RSA block even at four
/// bytes per character.
pub fn encode_message(text: &str, local: &KeyPair, peer: &RsaPublicKey) -> Result<Vec<u8>> {
    let signature = local.sign(text.as_bytes())?;
    debug_assert_eq!(signature.len(), RSA_BLOCK_SIZE);

    let char_count = text.chars().count();
    let chunks = char_count.div_ceil(MESSAGE_CHUNK_CHARS);
    let mut out = Vec::with_capacity((2 + chunks) * RSA_BLOCK_SIZE);

    out.extend_from_slice(&signature);
    out.extend_from_slice(&crypto::encrypt_for(peer, char_count.to_string().as_bytes())?);

    let mut rest = text;
    while !rest.is_empty() {
        let split = rest
            .char_indices()
            .nth(MESSAGE_CHUNK_CHARS)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let (chunk, tail) = rest.split_at(split);
        out.extend_from_slice(&crypto::encrypt_for(peer, chunk.as_bytes())?);
        rest = tail;
    }

    Ok(out)
}

/// Events surfaced by the reassembler as complete frames decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    /// A complete message whose signature verified.
    Message(String),
    /// A complete message whose signature did not verify; the plaintext was
    /// discarded.
    SignatureMismatch,
}

/// Reassembly phase. Advances in a strict cycle and always returns to
/// `AwaitingSignature` once a message is delivered or discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameState {
    /// Next block is the raw signature.
    #[default]
    AwaitingSignature,
    /// Next block is the encrypted character count.
    AwaitingSize,
    /// Subsequent blocks are encrypted plaintext chunks.
    AccumulatingData,
}

/// Per-connection state machine turning raw socket bytes back into signed
/// messages.
///
/// Bytes are queued as they arrive; whenever at least one full block is
/// queued it is consumed according to the current [`FrameState`]. Partial
/// blocks stay queued until the rest arrives, so delivery split at
/// arbitrary boundaries decodes identically to one contiguous read.
#[derive(Debug, Default)]
pub struct FrameReassembler {
    queue: BytesMut,
    state: FrameState,
    pending_signature: Vec<u8>,
    declared_chars: usize,
    accumulated: String,
}

impl FrameReassembler {
    /// Creates an empty reassembler in `AwaitingSignature`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current phase.
    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Number of queued bytes not yet consumed into a block.
    pub fn pending_bytes(&self) -> usize {
        self.queue.len()
    }

    /// Feeds newly received bytes and returns the events completed by them.
    ///
    /// A decrypt or decode failure discards the in-progress message, resets
    /// the cycle to `AwaitingSignature`, and surfaces the error; the
    /// connection itself survives and later well-formed frames decode
    /// normally.
    pub fn push(
        &mut self,
        bytes: &[u8],
        local: &KeyPair,
        peer: &RsaPublicKey,
    ) -> Result<Vec<FrameEvent>> {
        self.queue.extend_from_slice(bytes);

        let mut events = Vec::new();
        while self.queue.len() >= RSA_BLOCK_SIZE {
            let block = self.queue.copy_to_bytes(RSA_BLOCK_SIZE);
            match self.consume_block(&block, local, peer) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(e) => {
                    self.reset();
                    return Err(e);
                }
            }
        }
        Ok(events)
    }

    fn consume_block(
        &mut self,
        block: &[u8],
        local: &KeyPair,
        peer: &RsaPublicKey,
    ) -> Result<Option<FrameEvent>> {
        match self.state {
            FrameState::AwaitingSignature => {
                // The signature travels raw; it is only checked once the
                // whole plaintext has been accumulated.
                self.pending_signature = block.to_vec();
                self.state = FrameState::AwaitingSize;
                Ok(None)
            }
            FrameState::AwaitingSize => {
                let plain = local.decrypt(block)?;
                let text = String::from_utf8(plain)?;
                self.declared_chars = text
                    .parse()
                    .map_err(|_| ProtocolError::MalformedSizeBlock(text.clone()))?;
                self.accumulated.clear();
                self.state = FrameState::AccumulatingData;
                if self.declared_chars == 0 {
                    // An empty message carries no data blocks at all.
                    return Ok(Some(self.finish(peer)));
                }
                Ok(None)
            }
            FrameState::AccumulatingData => {
                let plain = local.decrypt(block)?;
                self.accumulated.push_str(&String::from_utf8(plain)?);
                if self.accumulated.chars().count() >= self.declared_chars {
                    return Ok(Some(self.finish(peer)));
                }
                Ok(None)
            }
        }
    }

    /// Verifies the completed plaintext against the pending signature and
    /// resets the cycle.
    fn finish(&mut self, peer: &RsaPublicKey) -> FrameEvent {
        let plaintext = std::mem::take(&mut self.accumulated);
        let signature = std::mem::take(&mut self.pending_signature);
        self.state = FrameState::AwaitingSignature;
        self.declared_chars = 0;

        if crypto::verify(peer, plaintext.as_bytes(), &signature) {
            FrameEvent::Message(plaintext)
        } else {
            FrameEvent::SignatureMismatch
        }
    }

    fn reset(&mut self) {
        self.state = FrameState::AwaitingSignature;
        self.pending_signature.clear();
        self.accumulated.clear();
        self.declared_chars = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    // One keypair per side, shared across the module: generation dominates
    // test time otherwise.
    fn sides() -> &'static (KeyPair, KeyPair) {
        static KEYS: OnceLock<(KeyPair, KeyPair)> = OnceLock::new();
        KEYS.get_or_init(|| (KeyPair::generate().unwrap(), KeyPair::generate().unwrap()))
    }

    /// Encodes on the sender side and decodes on the receiver side in one
    /// contiguous push.
    fn roundtrip(text: &str) -> Vec<FrameEvent> {
        let (sender, receiver) = sides();
        let wire = encode_message(text, sender, receiver.public_key()).unwrap();
        let mut reassembler = FrameReassembler::new();
        reassembler
            .push(&wire, receiver, sender.public_key())
            .unwrap()
    }

    #[test]
    fn test_roundtrip_short_ascii() {
        assert_eq!(
            roundtrip("hello"),
            vec![FrameEvent::Message("hello".to_string())]
        );
    }

    #[test]
    fn test_roundtrip_empty_message() {
        assert_eq!(roundtrip(""), vec![FrameEvent::Message(String::new())]);
    }

    #[test]
    fn test_roundtrip_multi_chunk() {
        let text = "x".repeat(MESSAGE_CHUNK_CHARS * 3 + 17);
        assert_eq!(roundtrip(&text), vec![FrameEvent::Message(text.clone())]);
    }

    #[test]
    fn test_roundtrip_exact_chunk_boundary() {
        let text = "y".repeat(MESSAGE_CHUNK_CHARS * 2);
        assert_eq!(roundtrip(&text), vec![FrameEvent::Message(text.clone())]);
    }

    #[test]
    fn test_roundtrip_multibyte_utf8() {
        let text = "héllo wörld — ここはどこ 🦀🦀🦀 end";
        assert_eq!(roundtrip(text), vec![FrameEvent::Message(text.to_string())]);
    }

    #[test]
    fn test_roundtrip_long_multibyte_utf8() {
        // Several chunks of worst-case four-byte characters.
        let text = "🦀".repeat(MESSAGE_CHUNK_CHARS * 2 + 5);
        assert_eq!(roundtrip(&text), vec![FrameEvent::Message(text.clone())]);
    }

    #[test]
    fn test_encoded_length_is_whole_blocks() {
        let (sender, receiver) = sides();
        for text in ["", "short", &"z".repeat(200)] {
            let wire = encode_message(text, sender, receiver.public_key()).unwrap();
            assert_eq!(wire.len() % RSA_BLOCK_SIZE, 0);
        }
    }

    #[test]
    fn test_partial_delivery_one_byte_at_a_time() {
        let (sender, receiver) = sides();
        let wire = encode_message("partial delivery", sender, receiver.public_key()).unwrap();

        let mut reassembler = FrameReassembler::new();
        let mut events = Vec::new();
        for byte in &wire {
            events.extend(
                reassembler
                    .push(std::slice::from_ref(byte), receiver, sender.public_key())
                    .unwrap(),
            );
        }
        assert_eq!(
            events,
            vec![FrameEvent::Message("partial delivery".to_string())]
        );
    }

    #[test]
    fn test_partial_delivery_arbitrary_splits() {
        let (sender, receiver) = sides();
        let text = "split at odd boundaries, including mid-block";
        let wire = encode_message(text, sender, receiver.public_key()).unwrap();

        // Prime-sized reads guarantee splits inside blocks.
        for step in [7usize, 113, 255, 300, 1021] {
            let mut reassembler = FrameReassembler::new();
            let mut events = Vec::new();
            for piece in wire.chunks(step) {
                events.extend(
                    reassembler
                        .push(piece, receiver, sender.public_key())
                        .unwrap(),
                );
            }
            assert_eq!(
                events,
                vec![FrameEvent::Message(text.to_string())],
                "delivery in {}-byte reads must match contiguous delivery",
                step
            );
        }
    }

    #[test]
    fn test_two_messages_back_to_back() {
        let (sender, receiver) = sides();
        let mut wire = encode_message("first", sender, receiver.public_key()).unwrap();
        wire.extend(encode_message("second", sender, receiver.public_key()).unwrap());

        let mut reassembler = FrameReassembler::new();
        let events = reassembler
            .push(&wire, receiver, sender.public_key())
            .unwrap();
        assert_eq!(
            events,
            vec![
                FrameEvent::Message("first".to_string()),
                FrameEvent::Message("second".to_string()),
            ]
        );
    }

    #[test]
    fn test_tampered_signature_is_rejected_then_recovers() {
        let (sender, receiver) = sides();
        let mut wire = encode_message("tampered", sender, receiver.public_key()).unwrap();
        wire[10] ^= 0x01; // inside the signature block

        let mut reassembler = FrameReassembler::new();
        let events = reassembler
            .push(&wire, receiver, sender.public_key())
            .unwrap();
        assert_eq!(events, vec![FrameEvent::SignatureMismatch]);
        assert_eq!(reassembler.state(), FrameState::AwaitingSignature);

        // A subsequent valid message still decodes.
        let wire = encode_message("recovered", sender, receiver.public_key()).unwrap();
        let events = reassembler
            .push(&wire, receiver, sender.public_key())
            .unwrap();
        assert_eq!(events, vec![FrameEvent::Message("recovered".to_string())]);
    }

    #[test]
    fn test_wrong_peer_key_is_signature_mismatch() {
        let (sender, receiver) = sides();
        let wire = encode_message("who signed this", sender, receiver.public_key()).unwrap();

        // Verifying against the receiver's own key instead of the sender's.
        let mut reassembler = FrameReassembler::new();
        let events = reassembler
            .push(&wire, receiver, receiver.public_key())
            .unwrap();
        assert_eq!(events, vec![FrameEvent::SignatureMismatch]);
    }

    #[test]
    fn test_corrupted_data_block_errors_then_recovers() {
        let (sender, receiver) = sides();
        let mut wire = encode_message("corrupt me", sender, receiver.public_key()).unwrap();
        // Flip a bit inside the first data block (third block on the wire);
        // RSA decryption of that block fails outright.
        wire[RSA_BLOCK_SIZE * 2 + 5] ^= 0x40;

        let mut reassembler = FrameReassembler::new();
        let result = reassembler.push(&wire, receiver, sender.public_key());
        assert!(result.is_err());
        assert_eq!(reassembler.state(), FrameState::AwaitingSignature);

        // The cycle reset; a later valid frame decodes normally.
        let wire = encode_message("clean again", sender, receiver.public_key()).unwrap();
        let events = reassembler
            .push(&wire, receiver, sender.public_key())
            .unwrap();
        assert_eq!(events, vec![FrameEvent::Message("clean again".to_string())]);
    }

    #[test]
    fn test_size_block_must_be_decimal() {
        let (sender, receiver) = sides();
        let mut wire = Vec::new();
        wire.extend_from_slice(&sender.sign(b"x").unwrap());
        wire.extend_from_slice(
            &crypto::encrypt_for(receiver.public_key(), b"not a number").unwrap(),
        );

        let mut reassembler = FrameReassembler::new();
        let result = reassembler.push(&wire, receiver, sender.public_key());
        assert!(matches!(result, Err(ProtocolError::MalformedSizeBlock(_))));
        assert_eq!(reassembler.state(), FrameState::AwaitingSignature);
    }

    #[test]
    fn test_state_cycle_during_assembly() {
        let (sender, receiver) = sides();
        let wire = encode_message("state walk", sender, receiver.public_key()).unwrap();

        let mut reassembler = FrameReassembler::new();
        assert_eq!(reassembler.state(), FrameState::AwaitingSignature);

        reassembler
            .push(&wire[..RSA_BLOCK_SIZE], receiver, sender.public_key())
            .unwrap();
        assert_eq!(reassembler.state(), FrameState::AwaitingSize);

        reassembler
            .push(
                &wire[RSA_BLOCK_SIZE..RSA_BLOCK_SIZE * 2],
                receiver,
                sender.public_key(),
            )
            .unwrap();
        assert_eq!(reassembler.state(), FrameState::AccumulatingData);

        let events = reassembler
            .push(&wire[RSA_BLOCK_SIZE * 2..], receiver, sender.public_key())
            .unwrap();
        assert_eq!(events, vec![FrameEvent::Message("state walk".to_string())]);
        assert_eq!(reassembler.state(), FrameState::AwaitingSignature);
    }

    #[test]
    fn test_leftover_bytes_stay_queued() {
        let (sender, receiver) = sides();
        let wire = encode_message("queued", sender, receiver.public_key()).unwrap();

        let mut reassembler = FrameReassembler::new();
        reassembler
            .push(&wire[..100], receiver, sender.public_key())
            .unwrap();
        assert_eq!(reassembler.pending_bytes(), 100);

        let events = reassembler
            .push(&wire[100..], receiver, sender.public_key())
            .unwrap();
        assert_eq!(events, vec![FrameEvent::Message("queued".to_string())]);
        assert_eq!(reassembler.pending_bytes(), 0);
    }
}
