//! # Cryptographic Primitives Module
//!
//! The small primitive set the protocol consumes: a keyed XOF, a keyed
//! MAC, and the duplex channel cipher built from them.
//!
//! ## Design Principles
//!
//! 1. **Type Safety**: key material lives in fixed-width arrays sized by
//!    the build's security level
//! 2. **Memory Safety**: every secret is zeroized on drop
//! 3. **No Runtime Agility**: the security level is a compile-time
//!    choice; there is no cipher negotiation
//!
//! ## Module Structure
//!
//! - `error` - Unified error types for all crypto operations
//! - `kdf` - cSHAKE-256 expansion and KMAC-256 tagging
//! - `aead` - Rekeying duplex channel cipher

// Error handling
pub mod error;

// Cryptographic primitives
pub mod aead;
pub mod kdf;

// Re-export common types at the crypto module level
pub use aead::{ChannelCipher, REKEY_INTERVAL};
pub use error::{CryptoError, Result};
pub use kdf::{mac, verify, xof, XofStream};

/// Width in bytes of every key, nonce, token, and tag.
///
/// 32 bytes in the default (L1) build; 64 bytes with the `l5` feature.
#[cfg(not(feature = "l5"))]
pub const KEY_SIZE: usize = 32;

/// Width in bytes of every key, nonce, token, and tag.
///
/// 32 bytes in the default (L1) build; 64 bytes with the `l5` feature.
#[cfg(feature = "l5")]
pub const KEY_SIZE: usize = 64;

/// Authentication tag width; equal to the key width at both levels.
pub const TAG_SIZE: usize = KEY_SIZE;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_constants() {
        #[cfg(not(feature = "l5"))]
        assert_eq!(KEY_SIZE, 32);
        #[cfg(feature = "l5")]
        assert_eq!(KEY_SIZE, 64);
        assert_eq!(TAG_SIZE, KEY_SIZE);
    }
}
