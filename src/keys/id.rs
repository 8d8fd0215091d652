//! # Key Identifiers
//!
//! A device is named by a 16-byte identifier built from three fields:
//!
//! ```text
//! +-----------+-----------+----------------+
//! | mid (4 B) | bid (4 B) | did (8 B)      |
//! +-----------+-----------+----------------+
//! ```
//!
//! `mid` names the master key, `bid` the branch issued under it, and
//! `did` the individual device. Identifiers are opaque byte strings;
//! nothing interprets them numerically. Master and branch identifiers
//! zero-pad the unused trailing fields.

use std::fmt;
use zeroize::Zeroize;

/// Total identifier width in bytes
pub const KID_SIZE: usize = 16;

/// Master identifier field width
pub const MID_SIZE: usize = 4;

/// Branch identifier field width
pub const BID_SIZE: usize = 4;

/// Device identifier field width
pub const DID_SIZE: usize = 8;

/// 16-byte key identifier (`mid ‖ bid ‖ did`).
///
/// Two devices can interoperate iff they share the same `(mid, bid)`
/// prefix; [`same_branch`](Self::same_branch) is that test.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Zeroize)]
pub struct KeyId([u8; KID_SIZE]);

impl KeyId {
    /// Identifier for a master key: `mid` populated, remainder zero.
    pub fn master(mid: [u8; MID_SIZE]) -> Self {
        let mut bytes = [0u8; KID_SIZE];
        bytes[..MID_SIZE].copy_from_slice(&mid);
        Self(bytes)
    }

    /// Identifier for a branch key: `mid ‖ bid`, device field zero.
    pub fn branch(mid: [u8; MID_SIZE], bid: [u8; BID_SIZE]) -> Self {
        let mut bytes = [0u8; KID_SIZE];
        bytes[..MID_SIZE].copy_from_slice(&mid);
        bytes[MID_SIZE..MID_SIZE + BID_SIZE].copy_from_slice(&bid);
        Self(bytes)
    }

    /// Identifier for a device key: all three fields populated.
    pub fn device(mid: [u8; MID_SIZE], bid: [u8; BID_SIZE], did: [u8; DID_SIZE]) -> Self {
        let mut bytes = [0u8; KID_SIZE];
        bytes[..MID_SIZE].copy_from_slice(&mid);
        bytes[MID_SIZE..MID_SIZE + BID_SIZE].copy_from_slice(&bid);
        bytes[MID_SIZE + BID_SIZE..].copy_from_slice(&did);
        Self(bytes)
    }

    /// Construct from a raw 16-byte array.
    pub fn from_bytes(bytes: [u8; KID_SIZE]) -> Self {
        Self(bytes)
    }

    /// Construct from a wire slice; `None` unless exactly 16 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; KID_SIZE] = bytes.try_into().ok()?;
        Some(Self(bytes))
    }

    /// The raw identifier bytes.
    pub fn as_bytes(&self) -> &[u8; KID_SIZE] {
        &self.0
    }

    /// The master identifier field.
    pub fn mid(&self) -> &[u8] {
        &self.0[..MID_SIZE]
    }

    /// The branch identifier field.
    pub fn bid(&self) -> &[u8] {
        &self.0[MID_SIZE..MID_SIZE + BID_SIZE]
    }

    /// The device identifier field.
    pub fn did(&self) -> &[u8] {
        &self.0[MID_SIZE + BID_SIZE..]
    }

    /// True when `other` shares this identifier's `(mid, bid)` prefix.
    pub fn same_branch(&self, other: &KeyId) -> bool {
        self.0[..MID_SIZE + BID_SIZE] == other.0[..MID_SIZE + BID_SIZE]
    }

    /// True when the device field is populated (a leaf identifier).
    pub fn is_device(&self) -> bool {
        self.did().iter().any(|&b| b != 0)
    }
}

impl fmt::Debug for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "KeyId(mid={}, bid={}, did={})",
            hex::encode(self.mid()),
            hex::encode(self.bid()),
            hex::encode(self.did())
        )
    }
}
