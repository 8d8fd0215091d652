//! # SKDP Protocol Core
//!
//! A symmetric key distribution protocol: devices pre-loaded with keys
//! from a three-level hierarchy (master → branch → device) authenticate
//! each other, exchange fresh session tokens under the device secret,
//! and run authenticated-encrypted traffic under keys independent of any
//! embedded material.
//!
//! ## Security Architecture
//!
//! - Embedded device keys never encrypt message streams; they only wrap
//!   the ephemeral tokens the session keys grow from, so captured
//!   traffic stays sealed even if a device key leaks later
//! - A server holds one branch secret and re-derives any device's key on
//!   demand; compromise of a branch exposes neither the master key nor
//!   sibling branches
//! - Every packet is sequenced and authenticated; any deviation from the
//!   expected order is fatal
//!
//! ## Module Organization
//!
//! - `crypto` - cSHAKE/KMAC primitives and the rekeying channel cipher
//! - `keys` - identifiers, the key hierarchy, and record storage
//! - `protocol` - packet codec, handshake machines, duplex session
//! - `net` - transport abstraction and listener/connector glue
//!
//! ## Safety Guarantees
//!
//! - All secret keys and session tokens are zeroized on drop
//! - MAC comparisons are constant-time
//! - Security level (32- or 64-byte material) is fixed at build time

#![warn(missing_docs)]
#![warn(unused_extern_crates)]
#![warn(unused_imports)]

/// Cryptographic primitives module
pub mod crypto;

/// Key identity and hierarchy module
pub mod keys;

/// Net transport glue module
pub mod net;

/// Protocol layer module
pub mod protocol;

// Re-export common types at the crate root
pub use crypto::{CryptoError, KEY_SIZE, TAG_SIZE};
pub use keys::{BranchKey, DeviceKey, KeyId, KeyStore, MasterKey};
pub use net::{SkdpConnector, SkdpListener, SkdpStream, Transport};
pub use protocol::{
    ErrorCode, Packet, PacketFlag, ProtocolState, SessionMode, SkdpError, SkdpSession,
};
