//! # Keyed XOF and MAC Primitives
//!
//! Provides the two SP 800-185 constructions the protocol is built from:
//! a cSHAKE-256 extendable-output function for key expansion and a
//! KMAC-256 keyed MAC for derivation and authentication tags.
//!
//! ## Modes
//!
//! - **One-shot expansion**: [`xof`] fills a buffer from `(key, info)`
//! - **Incremental keystream**: [`XofStream`] keeps the squeezing state
//!   alive so the channel cipher can draw keystream across packets
//! - **Keyed tagging**: [`mac`] computes a KMAC tag with the nonce as the
//!   customization string
//!
//! ## Security Properties
//!
//! - Deterministic: identical inputs always produce identical output
//! - Domain separated: the customization strings below are pairwise
//!   prefix-free, so material derived under one context can never be
//!   recreated under another
//! - Tag comparison is constant-time via [`verify`]
//!
//! Both security levels run over the cSHAKE-256/KMAC-256 sponge (512-bit
//! capacity); the wide build only changes the output lengths requested.

use subtle::ConstantTimeEq;
use tiny_keccak::{CShake, Hasher, Kmac, Xof};

// Derivation context strings. Pairwise prefix-free; changing any of these
// breaks interoperability with every deployed key hierarchy.
/// Branch key derivation from a master key
pub const BRANCH_KEY_CONTEXT: &[u8] = b"SKDP-branch-key";
/// Device key derivation from a branch key
pub const DEVICE_KEY_CONTEXT: &[u8] = b"SKDP-device-key";
/// Session transmit-key expansion
pub const SESSION_TX_CONTEXT: &[u8] = b"SKDP-session-tx";
/// Session receive-key expansion
pub const SESSION_RX_CONTEXT: &[u8] = b"SKDP-session-rx";
/// Transmit-nonce expansion
pub const NONCE_TX_CONTEXT: &[u8] = b"SKDP-nonce-tx";
/// Receive-nonce expansion
pub const NONCE_RX_CONTEXT: &[u8] = b"SKDP-nonce-rx";
/// Client proof-of-possession tag
pub const ESTABLISH_PROOF_CONTEXT: &[u8] = b"SKDP-establish-proof";
/// Server confirmation tag
pub const CONFIRM_PROOF_CONTEXT: &[u8] = b"SKDP-confirm-proof";
/// Channel cipher rekey personalization
pub const REKEY_CONTEXT: &[u8] = b"SKDP-rekey";

/// Expand `(key, info)` into `output.len()` bytes of cSHAKE-256 output.
///
/// `info` is absorbed as the cSHAKE customization string and `key` as the
/// message input, so outputs under distinct `info` values are independent.
///
/// # Example
///
/// ```
/// use skdp_core::crypto::kdf::xof;
///
/// let mut a = [0u8; 32];
/// let mut b = [0u8; 32];
/// xof(b"seed", b"context-a", &mut a);
/// xof(b"seed", b"context-b", &mut b);
/// assert_ne!(a, b);
/// ```
pub fn xof(key: &[u8], info: &[u8], output: &mut [u8]) {
    let mut state = CShake::v256(b"", info);
    state.update(key);
    state.squeeze(output);
}

/// Compute a KMAC-256 tag over `data`, keyed by `key` and personalized by
/// `nonce` (the KMAC customization string).
///
/// The tag length is whatever `tag.len()` requests; the protocol always
/// asks for the configured key width.
pub fn mac(key: &[u8], nonce: &[u8], data: &[u8], tag: &mut [u8]) {
    let mut state = Kmac::v256(key, nonce);
    state.update(data);
    state.finalize(tag);
}

/// Compute a KMAC-256 tag over the concatenation of `parts`.
///
/// Equivalent to [`mac`] on the joined input; absorbing the slices
/// separately avoids building the `aad ‖ ciphertext` buffer the channel
/// cipher would otherwise allocate per packet.
pub fn mac_parts(key: &[u8], nonce: &[u8], parts: &[&[u8]], tag: &mut [u8]) {
    let mut state = Kmac::v256(key, nonce);
    for part in parts {
        state.update(part);
    }
    state.finalize(tag);
}

/// Constant-time equality check for MAC tags.
///
/// Returns `false` for length mismatches without inspecting content.
/// Every tag comparison in the protocol goes through this function.
pub fn verify(a: &[u8], b: &[u8]) -> bool {
    bool::from(a.ct_eq(b))
}

/// An owned cSHAKE-256 squeezing state.
///
/// Unlike [`xof`], the state survives between calls, so consecutive
/// [`squeeze`](Self::squeeze) calls continue the same output stream. The
/// channel cipher uses this to keep its keystream position across packet
/// boundaries without re-absorbing the key.
pub struct XofStream {
    state: CShake,
}

impl XofStream {
    /// Create a squeezing state keyed by `key` and personalized by `info`.
    pub fn new(key: &[u8], info: &[u8]) -> Self {
        let mut state = CShake::v256(b"", info);
        state.update(key);
        Self { state }
    }

    /// Fill `output` with the next bytes of the stream.
    pub fn squeeze(&mut self, output: &mut [u8]) {
        self.state.squeeze(output);
    }

    /// XOR the next keystream bytes into `data` in place.
    pub fn apply(&mut self, data: &mut [u8]) {
        use zeroize::Zeroize;

        let mut keystream = vec![0u8; data.len()];
        self.state.squeeze(&mut keystream);
        for (byte, pad) in data.iter_mut().zip(keystream.iter()) {
            *byte ^= pad;
        }
        keystream.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── XOF determinism and separation ──────────────────────────────────

    #[test]
    fn test_xof_deterministic() {
        let mut a = [0u8; 64];
        let mut b = [0u8; 64];
        xof(b"key", b"info", &mut a);
        xof(b"key", b"info", &mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn test_xof_key_separation() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        xof(b"key-1", b"info", &mut a);
        xof(b"key-2", b"info", &mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn test_xof_info_separation() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        xof(b"key", b"info-1", &mut a);
        xof(b"key", b"info-2", &mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn test_xof_prefix_consistency() {
        // A longer request must begin with the shorter request's output.
        let mut short = [0u8; 16];
        let mut long = [0u8; 48];
        xof(b"key", b"info", &mut short);
        xof(b"key", b"info", &mut long);
        assert_eq!(short, long[..16]);
    }

    // ── Incremental keystream ───────────────────────────────────────────

    #[test]
    fn test_stream_matches_one_shot() {
        let mut stream = XofStream::new(b"key", b"info");
        let mut first = [0u8; 20];
        let mut second = [0u8; 44];
        stream.squeeze(&mut first);
        stream.squeeze(&mut second);

        let mut oneshot = [0u8; 64];
        xof(b"key", b"info", &mut oneshot);
        assert_eq!(first, oneshot[..20]);
        assert_eq!(second, oneshot[20..]);
    }

    #[test]
    fn test_stream_apply_roundtrip() {
        let mut message = *b"the quick brown fox";
        let mut enc = XofStream::new(b"key", b"info");
        let mut dec = XofStream::new(b"key", b"info");
        enc.apply(&mut message);
        assert_ne!(&message, b"the quick brown fox");
        dec.apply(&mut message);
        assert_eq!(&message, b"the quick brown fox");
    }

    // ── KMAC tags ───────────────────────────────────────────────────────

    #[test]
    fn test_mac_deterministic() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        mac(b"key", b"nonce", b"data", &mut a);
        mac(b"key", b"nonce", b"data", &mut b);
        assert_eq!(a, b);
    }

    #[test]
    fn test_mac_nonce_separation() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        mac(b"key", b"nonce-1", b"data", &mut a);
        mac(b"key", b"nonce-2", b"data", &mut b);
        assert_ne!(a, b);
    }

    #[test]
    fn test_mac_parts_matches_concatenation() {
        let mut joined = [0u8; 32];
        let mut split = [0u8; 32];
        mac(b"key", b"nonce", b"header and body", &mut joined);
        mac_parts(b"key", b"nonce", &[b"header", b" and ", b"body"], &mut split);
        assert_eq!(joined, split);
    }

    #[test]
    fn test_mac_differs_from_xof() {
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        mac(b"key", b"ctx", b"", &mut a);
        xof(b"key", b"ctx", &mut b);
        assert_ne!(a, b);
    }

    // ── Constant-time verify ────────────────────────────────────────────

    #[test]
    fn test_verify_equal() {
        assert!(verify(&[1, 2, 3, 4], &[1, 2, 3, 4]));
    }

    #[test]
    fn test_verify_unequal() {
        assert!(!verify(&[1, 2, 3, 4], &[1, 2, 3, 5]));
    }

    #[test]
    fn test_verify_length_mismatch() {
        assert!(!verify(&[1, 2, 3], &[1, 2, 3, 4]));
    }

    // ── Context strings ─────────────────────────────────────────────────

    #[test]
    fn test_contexts_pairwise_prefix_free() {
        let contexts: [&[u8]; 9] = [
            BRANCH_KEY_CONTEXT,
            DEVICE_KEY_CONTEXT,
            SESSION_TX_CONTEXT,
            SESSION_RX_CONTEXT,
            NONCE_TX_CONTEXT,
            NONCE_RX_CONTEXT,
            ESTABLISH_PROOF_CONTEXT,
            CONFIRM_PROOF_CONTEXT,
            REKEY_CONTEXT,
        ];
        for (i, a) in contexts.iter().enumerate() {
            for (j, b) in contexts.iter().enumerate() {
                if i != j {
                    assert!(!b.starts_with(a), "context {i} is a prefix of {j}");
                }
            }
        }
    }
}
