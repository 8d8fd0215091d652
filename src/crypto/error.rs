//! # Cryptographic Error Types
//!
//! Unified error handling for the primitive layer.
//!
//! ## Design Principles
//!
//! - **No Information Leakage**: Error messages never contain key material
//! - **Type Safety**: Strongly typed errors prevent silent failures

use thiserror::Error;

/// Result type alias for cryptographic operations
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Unified error type for the primitive layer
///
/// All errors in the crypto module are represented by this enum,
/// ensuring consistent error handling and preventing sensitive data leakage.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Authentication tag verification failed
    ///
    /// The recomputed KMAC tag did not match the received tag. No
    /// plaintext is released when this error is returned.
    #[error("Authentication failed: ciphertext integrity cannot be guaranteed")]
    Authentication,

    /// Invalid key or nonce length provided
    ///
    /// Includes expected and actual lengths for debugging.
    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// The expected length in bytes
        expected: usize,
        /// The actual length provided in bytes
        actual: usize,
    },

    /// Ciphertext shorter than the trailing authentication tag
    #[error("Ciphertext too short: {0} bytes is less than the tag width")]
    TruncatedCiphertext(usize),

    /// The operating system random generator failed
    ///
    /// Key and token generation refuse to proceed on a degraded RNG.
    #[error("Random generator failure: {0}")]
    Random(String),
}

impl CryptoError {
    /// Create a random-generator error from a string message
    pub fn random(msg: impl Into<String>) -> Self {
        Self::Random(msg.into())
    }
}
