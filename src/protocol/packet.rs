//! # Packet Codec
//!
//! Frames every protocol message as a fixed 21-byte header followed by a
//! variable payload. The codec is oblivious to cryptography; the header
//! bytes double as the associated data the channel cipher authenticates.
//!
//! ## Wire Format
//!
//! ```text
//! offset  size  field
//! 0       1     flag     (packet type)
//! 1       4     msg_len  (little-endian u32, payload size)
//! 5       8     seq      (little-endian u64)
//! 13      8     utc      (little-endian u64, seconds since UNIX epoch)
//! 21      *     payload  (msg_len bytes)
//! ```

use crate::protocol::error::{Result, SkdpError};
use crate::protocol::{HEADER_SIZE, MESSAGE_MAX};

/// Packet type identifiers.
///
/// Byte values are stable across builds. `ConnectResponse` and
/// `ExchangeRequest` are reserved codes that this implementation never
/// emits; `SessionEstablishVerify` marks the terminal handshake
/// transition and is likewise not wire-visible in the current exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketFlag {
    /// No packet type
    None = 0x00,
    /// Client opens a session; payload is the client's key identifier
    ConnectRequest = 0x01,
    /// Reserved
    ConnectResponse = 0x02,
    /// Reserved
    ExchangeRequest = 0x03,
    /// Server continues the handshake; payload is the wrapped token pair
    ExchangeResponse = 0x04,
    /// Client proof of possession
    EstablishRequest = 0x05,
    /// Server confirmation
    EstablishResponse = 0x06,
    /// Post-handshake authenticated traffic, either direction
    EncryptedMessage = 0x07,
    /// Abort signal; payload is a single error code byte
    ErrorCondition = 0x08,
    /// Idle keepalive probe
    KeepAliveRequest = 0x09,
    /// Keepalive echo
    KeepAliveResponse = 0x0A,
    /// Terminal handshake transition marker
    SessionEstablishVerify = 0x0B,
}

impl PacketFlag {
    /// Convert from the wire byte; `None` for unassigned values.
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(PacketFlag::None),
            0x01 => Some(PacketFlag::ConnectRequest),
            0x02 => Some(PacketFlag::ConnectResponse),
            0x03 => Some(PacketFlag::ExchangeRequest),
            0x04 => Some(PacketFlag::ExchangeResponse),
            0x05 => Some(PacketFlag::EstablishRequest),
            0x06 => Some(PacketFlag::EstablishResponse),
            0x07 => Some(PacketFlag::EncryptedMessage),
            0x08 => Some(PacketFlag::ErrorCondition),
            0x09 => Some(PacketFlag::KeepAliveRequest),
            0x0A => Some(PacketFlag::KeepAliveResponse),
            0x0B => Some(PacketFlag::SessionEstablishVerify),
            _ => None,
        }
    }

    /// Convert to the wire byte.
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Encode a header directly from its fields.
///
/// Used by the session layer to build the associated data for a packet
/// whose payload has not been encrypted yet.
pub fn encode_header(flag: PacketFlag, msg_len: u32, sequence: u64, utc: u64) -> [u8; HEADER_SIZE] {
    let mut header = [0u8; HEADER_SIZE];
    header[0] = flag.to_byte();
    header[1..5].copy_from_slice(&msg_len.to_le_bytes());
    header[5..13].copy_from_slice(&sequence.to_le_bytes());
    header[13..21].copy_from_slice(&utc.to_le_bytes());
    header
}

/// A protocol packet: parsed header plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet type
    pub flag: PacketFlag,
    /// Monotonic per-direction sequence number
    pub sequence: u64,
    /// Send time, seconds since the UNIX epoch
    pub utc: u64,
    /// Payload bytes (`msg_len` on the wire)
    pub payload: Vec<u8>,
}

impl Packet {
    /// Assemble a packet from its fields.
    pub fn new(flag: PacketFlag, sequence: u64, utc: u64, payload: Vec<u8>) -> Self {
        Self {
            flag,
            sequence,
            utc,
            payload,
        }
    }

    /// The 21-byte header for this packet, as fed to the MAC.
    pub fn header_bytes(&self) -> [u8; HEADER_SIZE] {
        encode_header(self.flag, self.payload.len() as u32, self.sequence, self.utc)
    }

    /// Serialize to wire bytes: header followed by payload.
    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE + self.payload.len());
        bytes.extend_from_slice(&self.header_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    /// Parse a packet from wire bytes.
    ///
    /// # Errors
    ///
    /// - [`SkdpError::PacketHeaderInvalid`] if fewer than 21 bytes
    /// - [`SkdpError::UnknownProtocol`] for an unassigned flag byte
    /// - [`SkdpError::PacketInvalid`] if `msg_len` exceeds the payload
    ///   ceiling (checked before any allocation) or the buffer does not
    ///   hold exactly `msg_len` payload bytes
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(SkdpError::PacketHeaderInvalid);
        }

        let flag = PacketFlag::from_byte(data[0]).ok_or(SkdpError::UnknownProtocol(data[0]))?;
        let msg_len =
            u32::from_le_bytes(data[1..5].try_into().expect("slice width is fixed")) as usize;
        if msg_len > MESSAGE_MAX {
            return Err(SkdpError::PacketInvalid(format!(
                "payload length {msg_len} exceeds the maximum"
            )));
        }
        if data.len() != HEADER_SIZE + msg_len {
            return Err(SkdpError::PacketInvalid(format!(
                "buffer holds {} payload bytes, header claims {msg_len}",
                data.len() - HEADER_SIZE
            )));
        }

        let sequence = u64::from_le_bytes(data[5..13].try_into().expect("slice width is fixed"));
        let utc = u64::from_le_bytes(data[13..21].try_into().expect("slice width is fixed"));

        Ok(Self {
            flag,
            sequence,
            utc,
            payload: data[HEADER_SIZE..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_layout() {
        let packet = Packet::new(PacketFlag::EncryptedMessage, 7, 1_700_000_000, vec![1, 2, 3]);
        let bytes = packet.serialize();
        assert_eq!(bytes.len(), HEADER_SIZE + 3);
        assert_eq!(bytes[0], 0x07);
        assert_eq!(u32::from_le_bytes(bytes[1..5].try_into().unwrap()), 3);
        assert_eq!(u64::from_le_bytes(bytes[5..13].try_into().unwrap()), 7);
        assert_eq!(
            u64::from_le_bytes(bytes[13..21].try_into().unwrap()),
            1_700_000_000
        );
        assert_eq!(&bytes[21..], &[1, 2, 3]);
    }

    #[test]
    fn test_roundtrip() {
        let packet = Packet::new(PacketFlag::ConnectRequest, 0, 12345, b"identifier bytes".to_vec());
        let parsed = Packet::deserialize(&packet.serialize()).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn test_roundtrip_empty_payload() {
        let packet = Packet::new(PacketFlag::KeepAliveRequest, 42, 0, Vec::new());
        let parsed = Packet::deserialize(&packet.serialize()).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn test_short_header_rejected() {
        let result = Packet::deserialize(&[0u8; HEADER_SIZE - 1]);
        assert!(matches!(result, Err(SkdpError::PacketHeaderInvalid)));
    }

    #[test]
    fn test_unknown_flag_rejected() {
        let mut bytes = Packet::new(PacketFlag::None, 0, 0, Vec::new()).serialize();
        bytes[0] = 0xEE;
        let result = Packet::deserialize(&bytes);
        assert!(matches!(result, Err(SkdpError::UnknownProtocol(0xEE))));
    }

    #[test]
    fn test_oversized_length_rejected_before_allocation() {
        let mut bytes = Packet::new(PacketFlag::EncryptedMessage, 0, 0, Vec::new()).serialize();
        bytes[1..5].copy_from_slice(&(u32::MAX).to_le_bytes());
        let result = Packet::deserialize(&bytes);
        assert!(matches!(result, Err(SkdpError::PacketInvalid(_))));
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let bytes = Packet::new(PacketFlag::EncryptedMessage, 0, 0, vec![0u8; 16]).serialize();
        let result = Packet::deserialize(&bytes[..bytes.len() - 1]);
        assert!(matches!(result, Err(SkdpError::PacketInvalid(_))));
    }

    #[test]
    fn test_header_bytes_match_serialization() {
        let packet = Packet::new(PacketFlag::ErrorCondition, 9, 77, vec![0x01]);
        assert_eq!(packet.serialize()[..HEADER_SIZE], packet.header_bytes());
    }

    #[test]
    fn test_flag_byte_roundtrip() {
        for byte in 0x00..=0x0Bu8 {
            let flag = PacketFlag::from_byte(byte).expect("assigned flag");
            assert_eq!(flag.to_byte(), byte);
        }
        assert!(PacketFlag::from_byte(0x0C).is_none());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_roundtrip(
            flag_byte in 0x00..=0x0Bu8,
            sequence in any::<u64>(),
            utc in any::<u64>(),
            payload in prop::collection::vec(any::<u8>(), 0..512),
        ) {
            let flag = PacketFlag::from_byte(flag_byte).unwrap();
            let packet = Packet::new(flag, sequence, utc, payload);
            let parsed = Packet::deserialize(&packet.serialize()).unwrap();
            prop_assert_eq!(parsed, packet);
        }
    }
}
