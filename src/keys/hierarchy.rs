//! # Key Hierarchy
//!
//! Implements the derivation chain from a master secret down to
//! individual device secrets:
//!
//! ```text
//! MasterKey (mdk, authority only)
//!     │
//!     ├─ KMAC(mdk, branch kid, "SKDP-branch-key") → BranchKey (bdk, server)
//!     │        │
//!     │        └─ KMAC(bdk, device kid, "SKDP-device-key") → DeviceKey (ddk, device)
//! ```
//!
//! The server retains only its branch secret; on receipt of a device's
//! identifier it re-derives that device's secret on demand. Compromise of
//! one branch discloses neither the master nor sibling branches.
//!
//! ## Security Properties
//!
//! - All secret types implement `Zeroize` and `ZeroizeOnDrop`
//! - Debug implementations never expose key material
//! - Derivation is deterministic: the device and the server reach the
//!   same `ddk` independently
//!
//! ## Stored Record Layout
//!
//! Each record serializes to a fixed-width blob:
//!
//! ```text
//! offset  size
//! 0       16      kid (unused fields zero-padded)
//! 16      K       secret
//! 16+K    8       expiration (little-endian UNIX seconds)
//! ```

use crate::crypto::error::{CryptoError, Result};
use crate::crypto::kdf::{self, BRANCH_KEY_CONTEXT, DEVICE_KEY_CONTEXT};
use crate::crypto::KEY_SIZE;
use crate::keys::id::{BID_SIZE, DID_SIZE, KID_SIZE, MID_SIZE};
use crate::keys::KeyId;
use rand::rngs::OsRng;
use rand::RngCore;
use std::io;
use std::path::Path;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Serialized width of a stored key record.
pub const RECORD_SIZE: usize = KID_SIZE + KEY_SIZE + 8;

fn encode_record(kid: &KeyId, key: &[u8; KEY_SIZE], expiration: u64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(RECORD_SIZE);
    bytes.extend_from_slice(kid.as_bytes());
    bytes.extend_from_slice(key);
    bytes.extend_from_slice(&expiration.to_le_bytes());
    bytes
}

fn decode_record(data: &[u8]) -> Result<(KeyId, [u8; KEY_SIZE], u64)> {
    if data.len() != RECORD_SIZE {
        return Err(CryptoError::InvalidKeyLength {
            expected: RECORD_SIZE,
            actual: data.len(),
        });
    }
    let kid = KeyId::from_slice(&data[..KID_SIZE]).expect("slice width checked above");
    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&data[KID_SIZE..KID_SIZE + KEY_SIZE]);
    let expiration = u64::from_le_bytes(
        data[KID_SIZE + KEY_SIZE..]
            .try_into()
            .expect("slice width checked above"),
    );
    Ok((kid, key, expiration))
}

fn load_record(path: &Path) -> io::Result<(KeyId, [u8; KEY_SIZE], u64)> {
    let mut data = std::fs::read(path)?;
    let record = decode_record(&data)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()));
    data.zeroize();
    record
}

/// Master key record, held by the key-issuing authority.
///
/// Never deployed to servers or devices and never sent on the wire; its
/// only operational use is deriving branch records at issuance time.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    kid: KeyId,
    key: [u8; KEY_SIZE],
    expiration: u64,
}

impl MasterKey {
    /// Generate a fresh master key from the operating system RNG.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::Random`] if the OS RNG fails; no partial
    /// key is ever returned.
    pub fn generate(mid: [u8; MID_SIZE], expiration: u64) -> Result<Self> {
        let mut key = [0u8; KEY_SIZE];
        OsRng
            .try_fill_bytes(&mut key)
            .map_err(|e| CryptoError::random(e.to_string()))?;
        Ok(Self {
            kid: KeyId::master(mid),
            key,
            expiration,
        })
    }

    /// Reconstruct a master key from raw parts.
    pub fn from_parts(mid: [u8; MID_SIZE], key: [u8; KEY_SIZE], expiration: u64) -> Self {
        Self {
            kid: KeyId::master(mid),
            key,
            expiration,
        }
    }

    /// Issue the branch key for `bid`.
    ///
    /// `bdk = KMAC(mdk, mid ‖ bid ‖ 0…0, branch context)`; the branch
    /// inherits this master's expiration.
    pub fn derive_branch(&self, bid: [u8; BID_SIZE]) -> BranchKey {
        let mut mid = [0u8; MID_SIZE];
        mid.copy_from_slice(self.kid.mid());
        let kid = KeyId::branch(mid, bid);

        let mut key = [0u8; KEY_SIZE];
        kdf::mac(&self.key, BRANCH_KEY_CONTEXT, kid.as_bytes(), &mut key);
        BranchKey {
            kid,
            key,
            expiration: self.expiration,
        }
    }

    /// The master identifier (`mid` populated, remainder zero).
    pub fn kid(&self) -> KeyId {
        self.kid
    }

    /// Expiration as UNIX seconds.
    pub fn expiration(&self) -> u64 {
        self.expiration
    }

    /// Serialize to the fixed record layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        encode_record(&self.kid, &self.key, self.expiration)
    }

    /// Parse a record previously produced by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let (kid, key, expiration) = decode_record(data)?;
        Ok(Self {
            kid,
            key,
            expiration,
        })
    }

    /// Write the record to `path`.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        std::fs::write(path, self.to_bytes())
    }

    /// Read a record from `path`.
    pub fn load(path: &Path) -> io::Result<Self> {
        let (kid, key, expiration) = load_record(path)?;
        Ok(Self {
            kid,
            key,
            expiration,
        })
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey([REDACTED])")
    }
}

/// Branch key record, deployed to a server.
///
/// From its secret the server can reconstruct any device key issued
/// under the branch, given only the device's identifier.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct BranchKey {
    kid: KeyId,
    key: [u8; KEY_SIZE],
    expiration: u64,
}

impl BranchKey {
    /// Reconstruct a branch key from raw parts.
    pub fn from_parts(
        mid: [u8; MID_SIZE],
        bid: [u8; BID_SIZE],
        key: [u8; KEY_SIZE],
        expiration: u64,
    ) -> Self {
        Self {
            kid: KeyId::branch(mid, bid),
            key,
            expiration,
        }
    }

    /// Issue the device key for `did`.
    ///
    /// `ddk = KMAC(bdk, mid ‖ bid ‖ did, device context)`; the device
    /// inherits this branch's expiration.
    pub fn derive_device(&self, did: [u8; DID_SIZE]) -> DeviceKey {
        let mut mid = [0u8; MID_SIZE];
        let mut bid = [0u8; BID_SIZE];
        mid.copy_from_slice(self.kid.mid());
        bid.copy_from_slice(self.kid.bid());
        self.derive_device_for(&KeyId::device(mid, bid, did))
    }

    /// Re-derive the device key for a presented identifier.
    ///
    /// The caller is responsible for checking that `kid` belongs to this
    /// branch first; the derivation itself uses the identifier verbatim.
    pub(crate) fn derive_device_for(&self, kid: &KeyId) -> DeviceKey {
        let mut key = [0u8; KEY_SIZE];
        kdf::mac(&self.key, DEVICE_KEY_CONTEXT, kid.as_bytes(), &mut key);
        DeviceKey {
            kid: *kid,
            key,
            expiration: self.expiration,
        }
    }

    /// The branch identifier (`mid ‖ bid`, device field zero).
    pub fn kid(&self) -> KeyId {
        self.kid
    }

    /// Expiration as UNIX seconds.
    pub fn expiration(&self) -> u64 {
        self.expiration
    }

    /// Serialize to the fixed record layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        encode_record(&self.kid, &self.key, self.expiration)
    }

    /// Parse a record previously produced by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let (kid, key, expiration) = decode_record(data)?;
        Ok(Self {
            kid,
            key,
            expiration,
        })
    }

    /// Write the record to `path`.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        std::fs::write(path, self.to_bytes())
    }

    /// Read a record from `path`.
    pub fn load(path: &Path) -> io::Result<Self> {
        let (kid, key, expiration) = load_record(path)?;
        Ok(Self {
            kid,
            key,
            expiration,
        })
    }
}

impl std::fmt::Debug for BranchKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchKey")
            .field("kid", &self.kid)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Device key record, embedded in a single device.
///
/// Used only to authenticate the handshake and wrap session tokens;
/// message traffic never runs under this secret.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DeviceKey {
    kid: KeyId,
    key: [u8; KEY_SIZE],
    expiration: u64,
}

impl DeviceKey {
    /// Reconstruct a device key from raw parts.
    pub fn from_parts(kid: KeyId, key: [u8; KEY_SIZE], expiration: u64) -> Self {
        Self {
            kid,
            key,
            expiration,
        }
    }

    /// The full device identifier.
    pub fn kid(&self) -> KeyId {
        self.kid
    }

    /// The device secret.
    ///
    /// # Security Warning
    ///
    /// This exposes the raw key material. Use with caution and ensure
    /// the result is never logged or persisted outside the record
    /// layout.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    /// Expiration as UNIX seconds.
    pub fn expiration(&self) -> u64 {
        self.expiration
    }

    /// True once the record's expiration has passed.
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expiration
    }

    /// Serialize to the fixed record layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        encode_record(&self.kid, &self.key, self.expiration)
    }

    /// Parse a record previously produced by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let (kid, key, expiration) = decode_record(data)?;
        Ok(Self {
            kid,
            key,
            expiration,
        })
    }

    /// Write the record to `path`.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        std::fs::write(path, self.to_bytes())
    }

    /// Read a record from `path`.
    pub fn load(path: &Path) -> io::Result<Self> {
        let (kid, key, expiration) = load_record(path)?;
        Ok(Self {
            kid,
            key,
            expiration,
        })
    }
}

impl std::fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceKey")
            .field("kid", &self.kid)
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Server-side collection of branch keys.
///
/// A listener consults the store when a device presents its identifier:
/// the store locates the branch by `(mid, bid)` prefix and re-derives
/// the device secret on demand.
#[derive(Default)]
pub struct KeyStore {
    branches: Vec<BranchKey>,
}

impl KeyStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a branch key to the store.
    pub fn insert(&mut self, branch: BranchKey) {
        self.branches.push(branch);
    }

    /// Locate the branch matching a presented identifier's prefix.
    pub fn find(&self, kid: &KeyId) -> Option<&BranchKey> {
        self.branches.iter().find(|b| b.kid().same_branch(kid))
    }

    /// Re-derive the device key for a presented identifier.
    ///
    /// `None` when no branch in the store matches the identifier's
    /// `(mid, bid)` prefix.
    pub fn derive_device(&self, kid: &KeyId) -> Option<DeviceKey> {
        self.find(kid).map(|b| b.derive_device_for(kid))
    }

    /// Number of branches held.
    pub fn len(&self) -> usize {
        self.branches.len()
    }

    /// True when the store holds no branches.
    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }
}
