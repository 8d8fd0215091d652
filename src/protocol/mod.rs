//! # Protocol Layer
//!
//! The handshake state machines and the post-handshake duplex session.
//!
//! ## Handshake
//!
//! Four wire messages establish a session from a shared device secret:
//!
//! ```text
//! Client                                Server
//!   │  ConnectRequest (kid)              │   validate kid, derive ddk,
//!   ├───────────────────────────────────►│   draw stok/vtok
//!   │  ExchangeResponse (wrapped tokens) │
//!   │◄───────────────────────────────────┤
//!   │  EstablishRequest (proof tag)      │   verify proof,
//!   ├───────────────────────────────────►│   derive mirror keys
//!   │  EstablishResponse (confirm tag)   │
//!   │◄───────────────────────────────────┤
//!   │  EncryptedMessage ...              │
//! ```
//!
//! The device secret never travels and never keys message traffic; it
//! only wraps the two fresh session tokens the rest of the key schedule
//! grows from. Compromising the device secret after the fact does not
//! recover recorded sessions.
//!
//! ## Ordering discipline
//!
//! Each state accepts exactly one packet flag; anything else is fatal.
//! Handshake packets are sequenced 0, 1 per side and carry a send
//! timestamp checked against local wall clock. Post-handshake traffic
//! restarts both direction counters at zero.
//!
//! ## Modules
//!
//! - `packet` - header codec and packet flags
//! - `error` - protocol error enum and wire error codes
//! - `client` / `server` - handshake state machines
//! - `session` - established duplex session

pub mod client;
pub mod error;
pub mod packet;
pub mod server;
pub mod session;

// Re-export common types at the protocol module level
pub use client::ClientHandshake;
pub use error::{ErrorCode, Result, SkdpError};
pub use packet::{Packet, PacketFlag};
pub use server::ServerHandshake;
pub use session::{SessionMode, SkdpSession};

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Fixed header width in bytes
pub const HEADER_SIZE: usize = 21;

/// Maximum payload length accepted in a single packet
pub const MESSAGE_MAX: usize = 0x0100_0000;

/// Tolerated clock skew on handshake packet timestamps, in seconds
pub const TIME_SKEW_MAX_SECS: u64 = 60;

/// Wall-clock deadline for each handshake phase
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Handshake and session lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    /// Initial state
    None,
    /// Connect request sent (client) or awaited (server)
    Connect,
    /// Token exchange sent (server) or awaited (client)
    Exchange,
    /// Establish verification sent (client) or awaited (server)
    Establish,
    /// Handshake complete; ordinary traffic flows
    Session,
    /// Terminal; the connection must be torn down
    Error,
}

/// Seconds since the UNIX epoch.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Validate a received handshake packet against the single flag and
/// sequence number the current state accepts.
///
/// An `ErrorCondition` packet is decoded into [`SkdpError::Peer`] so the
/// peer's abort reason surfaces to the caller.
pub(crate) fn check_handshake_packet(
    packet: &Packet,
    expected_flag: PacketFlag,
    expected_sequence: u64,
    now: u64,
) -> Result<()> {
    if packet.flag == PacketFlag::ErrorCondition {
        let code = packet
            .payload
            .first()
            .and_then(|&b| ErrorCode::from_byte(b))
            .unwrap_or(ErrorCode::None);
        return Err(SkdpError::Peer(code));
    }
    if packet.flag != expected_flag {
        return Err(SkdpError::UnexpectedPacket {
            expected: expected_flag,
            actual: packet.flag,
        });
    }
    if packet.sequence != expected_sequence {
        return Err(SkdpError::Unsequenced {
            expected: expected_sequence,
            actual: packet.sequence,
        });
    }
    if now.abs_diff(packet.utc) > TIME_SKEW_MAX_SECS {
        return Err(SkdpError::PacketInvalid(
            "handshake packet timestamp outside the skew window".to_string(),
        ));
    }
    Ok(())
}
