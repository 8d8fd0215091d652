//! # Duplex Channel Cipher
//!
//! Authenticated encryption for one direction of an established session.
//! The construction is a keyed cSHAKE-256 keystream XORed over the
//! plaintext, with a KMAC-256 tag over `aad ‖ ciphertext` appended.
//!
//! ## Keystream discipline
//!
//! The keystream position is continuous across packets: each packet
//! consumes exactly `len(plaintext)` bytes of stream, so the two ends of
//! a direction stay aligned as long as every packet is processed exactly
//! once and in order. The surrounding session enforces that ordering with
//! sequence numbers.
//!
//! ## Rekeying
//!
//! After [`REKEY_INTERVAL`] bytes have been processed, the cipher derives
//! a fresh key from the old one (`xof(key, rekey-context ‖ nonce)`),
//! resets the keystream, and forgets the old key. Both peers hit the
//! boundary at the same byte count, so no rekey message ever crosses the
//! wire, and recorded traffic before the boundary cannot be recovered
//! from a later key.
//!
//! ## Tag-before-plaintext
//!
//! Decryption recomputes and verifies the tag in constant time before a
//! single byte of keystream is consumed. A forged packet therefore leaves
//! the cipher state untouched and yields no plaintext.

use crate::crypto::error::{CryptoError, Result};
use crate::crypto::kdf::{self, XofStream, REKEY_CONTEXT};
use crate::crypto::{KEY_SIZE, TAG_SIZE};
use zeroize::Zeroize;

/// Bytes of payload one direction may process before the cipher rekeys.
pub const REKEY_INTERVAL: u64 = 1 << 20;

/// One direction of an authenticated duplex channel.
///
/// Holds the direction key, the MAC personalization nonce, the live
/// keystream state, and the byte counter driving the rekey schedule.
/// Key material is zeroized on drop.
pub struct ChannelCipher {
    key: [u8; KEY_SIZE],
    nonce: [u8; KEY_SIZE],
    keystream: XofStream,
    bytes_processed: u64,
}

impl ChannelCipher {
    /// Create a cipher from a direction key and nonce.
    pub fn new(key: [u8; KEY_SIZE], nonce: [u8; KEY_SIZE]) -> Self {
        let keystream = XofStream::new(&key, &nonce);
        Self {
            key,
            nonce,
            keystream,
            bytes_processed: 0,
        }
    }

    /// Encrypt `plaintext`, authenticating `aad` alongside it.
    ///
    /// Returns `ciphertext ‖ tag`; the tag is always [`TAG_SIZE`] bytes,
    /// so an empty plaintext still produces an authenticated packet.
    pub fn encrypt(&mut self, plaintext: &[u8], aad: &[u8]) -> Vec<u8> {
        let mut output = Vec::with_capacity(plaintext.len() + TAG_SIZE);
        output.extend_from_slice(plaintext);
        self.keystream.apply(&mut output);

        let mut tag = [0u8; TAG_SIZE];
        kdf::mac_parts(&self.key, &self.nonce, &[aad, output.as_slice()], &mut tag);
        output.extend_from_slice(&tag);

        self.advance(plaintext.len() as u64);
        output
    }

    /// Verify and decrypt `ciphertext ‖ tag` under the same `aad`.
    ///
    /// # Errors
    ///
    /// - [`CryptoError::TruncatedCiphertext`] if the input is shorter
    ///   than the tag
    /// - [`CryptoError::Authentication`] on tag mismatch; no plaintext is
    ///   produced and the keystream does not advance
    pub fn decrypt(&mut self, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < TAG_SIZE {
            return Err(CryptoError::TruncatedCiphertext(ciphertext.len()));
        }
        let (body, tag) = ciphertext.split_at(ciphertext.len() - TAG_SIZE);

        let mut expected = [0u8; TAG_SIZE];
        kdf::mac_parts(&self.key, &self.nonce, &[aad, body], &mut expected);
        let matched = kdf::verify(&expected, tag);
        expected.zeroize();
        if !matched {
            return Err(CryptoError::Authentication);
        }

        let mut plaintext = body.to_vec();
        self.keystream.apply(&mut plaintext);
        self.advance(body.len() as u64);
        Ok(plaintext)
    }

    /// Payload bytes processed since the last rekey.
    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed
    }

    fn advance(&mut self, len: u64) {
        self.bytes_processed = self.bytes_processed.saturating_add(len);
        if self.bytes_processed >= REKEY_INTERVAL {
            self.rekey();
        }
    }

    fn rekey(&mut self) {
        let mut info = Vec::with_capacity(REKEY_CONTEXT.len() + KEY_SIZE);
        info.extend_from_slice(REKEY_CONTEXT);
        info.extend_from_slice(&self.nonce);

        let mut next = [0u8; KEY_SIZE];
        kdf::xof(&self.key, &info, &mut next);
        self.key.copy_from_slice(&next);
        next.zeroize();

        self.keystream = XofStream::new(&self.key, &self.nonce);
        self.bytes_processed = 0;
    }
}

impl Drop for ChannelCipher {
    fn drop(&mut self) {
        self.key.zeroize();
        self.nonce.zeroize();
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_roundtrip(
            data in prop::collection::vec(any::<u8>(), 0..2048),
            aad in prop::collection::vec(any::<u8>(), 0..64),
        ) {
            let key = [7u8; KEY_SIZE];
            let nonce = [9u8; KEY_SIZE];
            let mut tx = ChannelCipher::new(key, nonce);
            let mut rx = ChannelCipher::new(key, nonce);
            let sealed = tx.encrypt(&data, &aad);
            prop_assert_eq!(rx.decrypt(&sealed, &aad).unwrap(), data);
        }

        #[test]
        fn prop_any_flipped_bit_rejected(
            data in prop::collection::vec(any::<u8>(), 1..256),
            flip_byte in 0usize..256,
            flip_bit in 0u8..8,
        ) {
            let key = [7u8; KEY_SIZE];
            let nonce = [9u8; KEY_SIZE];
            let mut tx = ChannelCipher::new(key, nonce);
            let mut rx = ChannelCipher::new(key, nonce);
            let mut sealed = tx.encrypt(&data, b"aad");
            let index = flip_byte % sealed.len();
            sealed[index] ^= 1 << flip_bit;
            prop_assert!(rx.decrypt(&sealed, b"aad").is_err());
        }
    }
}
