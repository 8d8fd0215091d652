//! # Protocol Error Types
//!
//! Every failure in the protocol maps onto a single error enum, and —
//! where the peer should be told — onto a one-byte wire code carried in
//! the payload of an `ErrorCondition` packet.
//!
//! ## Error Categories
//!
//! - Protocol errors (peer misbehaved or stream corrupted):
//!   `PacketInvalid`, `PacketHeaderInvalid`, `Unsequenced`,
//!   `UnexpectedPacket`, `UnknownProtocol`
//! - Cryptographic errors: `Authentication`, `HashInvalid`, `InvalidKey`
//! - Lifecycle errors: `Expired`, `Disconnected`, `Channel`, `Connection`,
//!   `Connect`
//! - Input errors (local misuse, never sent on the wire): `InvalidInput`,
//!   `InvalidRequest`
//! - Resource errors: `Receive`, RNG failures via `Crypto`
//! - Liveness: `BadKeepAlive`
//!
//! Every error is fatal to its session; the protocol has no in-session
//! recovery.

use crate::crypto::error::CryptoError;
use crate::protocol::packet::PacketFlag;
use std::io;
use thiserror::Error;

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, SkdpError>;

/// Wire representation of an error, carried as the single payload byte
/// of an `ErrorCondition` packet.
///
/// Byte values are stable across builds; both peers of a deployment must
/// agree on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    /// No error
    None = 0x00,
    /// MAC verification failed on an encrypted packet
    AuthenticationFailure = 0x01,
    /// Keepalive echo mismatch
    BadKeepAlive = 0x02,
    /// The transport failed while writing
    ChannelDown = 0x03,
    /// The transport could not be established
    ConnectionFailure = 0x04,
    /// The connect phase of the handshake failed
    ConnectFailure = 0x05,
    /// The peer ended the session
    Disconnected = 0x06,
    /// A key record or session passed its expiration
    Expiration = 0x07,
    /// A handshake proof tag did not verify
    HashInvalid = 0x08,
    /// A caller supplied invalid input
    InvalidInput = 0x09,
    /// No key material is known for the presented identifier
    InvalidKey = 0x0A,
    /// A request was made in an invalid state
    InvalidRequest = 0x0B,
    /// A packet header could not be parsed
    PacketHeaderInvalid = 0x0C,
    /// A packet failed structural validation
    PacketInvalid = 0x0D,
    /// A packet arrived out of sequence
    PacketUnsequenced = 0x0E,
    /// The transport failed while reading
    ReceiveFailure = 0x0F,
    /// The random generator failed
    RandomFailure = 0x10,
    /// An unrecognized packet flag was received
    UnknownProtocol = 0x11,
    /// A packet flag did not match the expected state
    UnexpectedPacket = 0x12,
}

impl ErrorCode {
    /// Convert from the wire byte; `None` for unassigned values.
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(ErrorCode::None),
            0x01 => Some(ErrorCode::AuthenticationFailure),
            0x02 => Some(ErrorCode::BadKeepAlive),
            0x03 => Some(ErrorCode::ChannelDown),
            0x04 => Some(ErrorCode::ConnectionFailure),
            0x05 => Some(ErrorCode::ConnectFailure),
            0x06 => Some(ErrorCode::Disconnected),
            0x07 => Some(ErrorCode::Expiration),
            0x08 => Some(ErrorCode::HashInvalid),
            0x09 => Some(ErrorCode::InvalidInput),
            0x0A => Some(ErrorCode::InvalidKey),
            0x0B => Some(ErrorCode::InvalidRequest),
            0x0C => Some(ErrorCode::PacketHeaderInvalid),
            0x0D => Some(ErrorCode::PacketInvalid),
            0x0E => Some(ErrorCode::PacketUnsequenced),
            0x0F => Some(ErrorCode::ReceiveFailure),
            0x10 => Some(ErrorCode::RandomFailure),
            0x11 => Some(ErrorCode::UnknownProtocol),
            0x12 => Some(ErrorCode::UnexpectedPacket),
            _ => None,
        }
    }

    /// Convert to the wire byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Unified protocol error type.
///
/// Variants carry the local diagnostic context; [`code`](Self::code)
/// collapses each onto the byte the peer is told about.
#[derive(Debug, Error)]
pub enum SkdpError {
    /// Keepalive response does not match the outstanding request
    #[error("Keepalive response does not match the outstanding request")]
    BadKeepAlive,

    /// The transport failed while writing
    #[error("Channel write failed: {0}")]
    Channel(#[source] io::Error),

    /// The transport could not be opened or accepted
    #[error("Connection failed: {0}")]
    Connection(#[source] io::Error),

    /// The connect phase of the handshake failed
    #[error("Connect failed: {0}")]
    Connect(String),

    /// The peer ended the session
    #[error("Peer disconnected")]
    Disconnected,

    /// A key record or session passed its expiration, or a handshake
    /// phase deadline elapsed
    #[error("Key or session expired")]
    Expired,

    /// A handshake proof tag did not verify
    #[error("Handshake proof does not verify")]
    HashInvalid,

    /// A caller supplied invalid input; reported locally, never sent
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No key material is known for the presented identifier
    #[error("No key known for the presented identifier")]
    InvalidKey,

    /// A state machine entry point was driven out of order; reported
    /// locally, never sent
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A packet header could not be parsed
    #[error("Packet header invalid")]
    PacketHeaderInvalid,

    /// A packet failed structural validation
    #[error("Packet invalid: {0}")]
    PacketInvalid(String),

    /// A packet arrived out of sequence
    #[error("Packet out of sequence: expected {expected}, got {actual}")]
    Unsequenced {
        /// The sequence number the receiver was waiting for
        expected: u64,
        /// The sequence number the packet carried
        actual: u64,
    },

    /// The transport failed while reading
    #[error("Receive failed: {0}")]
    Receive(#[source] io::Error),

    /// An unrecognized packet flag was received
    #[error("Unknown protocol flag: {0:#04x}")]
    UnknownProtocol(u8),

    /// A packet flag did not match the expected state
    #[error("Unexpected {actual:?} while waiting for {expected:?}")]
    UnexpectedPacket {
        /// The flag the state machine was waiting for
        expected: PacketFlag,
        /// The flag the packet carried
        actual: PacketFlag,
    },

    /// The peer reported an error and tore the session down
    #[error("Peer reported {0:?}")]
    Peer(ErrorCode),

    /// Failure raised by the primitive layer
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl SkdpError {
    /// The wire code describing this error to the peer.
    pub fn code(&self) -> ErrorCode {
        match self {
            SkdpError::BadKeepAlive => ErrorCode::BadKeepAlive,
            SkdpError::Channel(_) => ErrorCode::ChannelDown,
            SkdpError::Connection(_) => ErrorCode::ConnectionFailure,
            SkdpError::Connect(_) => ErrorCode::ConnectFailure,
            SkdpError::Disconnected => ErrorCode::Disconnected,
            SkdpError::Expired => ErrorCode::Expiration,
            SkdpError::HashInvalid => ErrorCode::HashInvalid,
            SkdpError::InvalidInput(_) => ErrorCode::InvalidInput,
            SkdpError::InvalidKey => ErrorCode::InvalidKey,
            SkdpError::InvalidRequest(_) => ErrorCode::InvalidRequest,
            SkdpError::PacketHeaderInvalid => ErrorCode::PacketHeaderInvalid,
            SkdpError::PacketInvalid(_) => ErrorCode::PacketInvalid,
            SkdpError::Unsequenced { .. } => ErrorCode::PacketUnsequenced,
            SkdpError::Receive(_) => ErrorCode::ReceiveFailure,
            SkdpError::UnknownProtocol(_) => ErrorCode::UnknownProtocol,
            SkdpError::UnexpectedPacket { .. } => ErrorCode::UnexpectedPacket,
            SkdpError::Peer(code) => *code,
            SkdpError::Crypto(CryptoError::Random(_)) => ErrorCode::RandomFailure,
            SkdpError::Crypto(CryptoError::InvalidKeyLength { .. }) => ErrorCode::InvalidInput,
            SkdpError::Crypto(_) => ErrorCode::AuthenticationFailure,
        }
    }

    /// True for errors reported to the local caller only; these are
    /// never announced to the peer.
    pub fn is_local_only(&self) -> bool {
        matches!(
            self,
            SkdpError::InvalidInput(_) | SkdpError::InvalidRequest(_)
        )
    }
}
