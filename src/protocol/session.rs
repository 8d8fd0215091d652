//! # Duplex Session
//!
//! The established session object: two channel cipher halves, two
//! monotonic sequence counters, and an expiration. All post-handshake
//! traffic is encoded and decoded here.
//!
//! ## Sequencing
//!
//! Each direction counts packets independently from zero. A received
//! packet whose sequence is not exactly the expected next value is fatal;
//! there is no tolerance window, so replays and reorders surface as
//! `Unsequenced` before any cryptography runs. Counters never wrap: a
//! direction that exhausts 2^64 packets ends the session.
//!
//! ## Keepalives
//!
//! Idle probes carry the sender's timestamp in clear and are echoed back
//! verbatim. They consume sequence numbers like any other packet but are
//! not encrypted; a mismatched echo is `BadKeepAlive`.

use crate::crypto::aead::ChannelCipher;
use crate::crypto::kdf::{
    self, NONCE_RX_CONTEXT, NONCE_TX_CONTEXT, SESSION_RX_CONTEXT, SESSION_TX_CONTEXT,
};
use crate::crypto::{KEY_SIZE, TAG_SIZE};
use crate::keys::KeyId;
use crate::protocol::error::{ErrorCode, Result, SkdpError};
use crate::protocol::packet::{encode_header, Packet, PacketFlag};
use crate::protocol::{unix_now, MESSAGE_MAX};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Session operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    /// No session established
    #[default]
    None,
    /// One-way channel, initiating side
    SimplexClient,
    /// One-way channel, accepting side
    SimplexServer,
    /// Two-way channel, initiating side
    DuplexClient,
    /// Two-way channel, accepting side
    DuplexServer,
}

/// The four direction secrets a handshake produces.
///
/// Named from the owner's perspective; the peer holds the same material
/// with tx and rx swapped.
#[derive(Zeroize, ZeroizeOnDrop)]
pub(crate) struct SessionKeys {
    pub txk: [u8; KEY_SIZE],
    pub rxk: [u8; KEY_SIZE],
    pub txn: [u8; KEY_SIZE],
    pub rxn: [u8; KEY_SIZE],
}

/// Expand the session token pair into direction keys and nonces.
///
/// The client expands under the tx labels for its transmit half; the
/// server swaps the labels, so client-tx equals server-rx and vice
/// versa. All four expansions bind the device identifier.
pub(crate) fn derive_session_keys(
    stok: &[u8; KEY_SIZE],
    vtok: &[u8; KEY_SIZE],
    kid: &KeyId,
    client: bool,
) -> SessionKeys {
    let (tx_label, rx_label) = if client {
        (SESSION_TX_CONTEXT, SESSION_RX_CONTEXT)
    } else {
        (SESSION_RX_CONTEXT, SESSION_TX_CONTEXT)
    };
    let (ntx_label, nrx_label) = if client {
        (NONCE_TX_CONTEXT, NONCE_RX_CONTEXT)
    } else {
        (NONCE_RX_CONTEXT, NONCE_TX_CONTEXT)
    };

    let mut keys = SessionKeys {
        txk: [0u8; KEY_SIZE],
        rxk: [0u8; KEY_SIZE],
        txn: [0u8; KEY_SIZE],
        rxn: [0u8; KEY_SIZE],
    };
    kdf::xof(stok, &context_info(tx_label, kid), &mut keys.txk);
    kdf::xof(stok, &context_info(rx_label, kid), &mut keys.rxk);
    kdf::xof(vtok, &context_info(ntx_label, kid), &mut keys.txn);
    kdf::xof(vtok, &context_info(nrx_label, kid), &mut keys.rxn);
    keys
}

fn context_info(label: &[u8], kid: &KeyId) -> Vec<u8> {
    let mut info = Vec::with_capacity(label.len() + kid.as_bytes().len());
    info.extend_from_slice(label);
    info.extend_from_slice(kid.as_bytes());
    info
}

/// An established duplex session.
///
/// Owns its key material exclusively; the transport is the caller's.
/// Dropping the session zeroizes both cipher halves.
pub struct SkdpSession {
    mode: SessionMode,
    kid: KeyId,
    expiration: u64,
    tx: ChannelCipher,
    rx: ChannelCipher,
    tx_sequence: u64,
    rx_sequence: u64,
    pending_keepalive: Option<u64>,
}

impl std::fmt::Debug for SkdpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkdpSession")
            .field("kid", &self.kid)
            .field("mode", &self.mode)
            .finish()
    }
}

impl SkdpSession {
    pub(crate) fn new(mode: SessionMode, kid: KeyId, expiration: u64, keys: SessionKeys) -> Self {
        Self {
            mode,
            kid,
            expiration,
            tx: ChannelCipher::new(keys.txk, keys.txn),
            rx: ChannelCipher::new(keys.rxk, keys.rxn),
            tx_sequence: 0,
            rx_sequence: 0,
            pending_keepalive: None,
        }
    }

    /// The session's operating mode.
    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    /// The peer's key identifier as presented during the handshake.
    pub fn kid(&self) -> KeyId {
        self.kid
    }

    /// Session expiration, seconds since the UNIX epoch.
    pub fn expiration(&self) -> u64 {
        self.expiration
    }

    /// Packets sent so far.
    pub fn tx_sequence(&self) -> u64 {
        self.tx_sequence
    }

    /// Packets received so far.
    pub fn rx_sequence(&self) -> u64 {
        self.rx_sequence
    }

    /// Encrypt `plaintext` into the next outbound packet.
    ///
    /// The header (flag, length, sequence, timestamp) is bound as
    /// associated data, so tampering with any header field fails
    /// authentication on the far side.
    pub fn encode_message(&mut self, plaintext: &[u8]) -> Result<Packet> {
        if plaintext.len() + TAG_SIZE > MESSAGE_MAX {
            return Err(SkdpError::InvalidInput(format!(
                "message of {} bytes exceeds the payload ceiling",
                plaintext.len()
            )));
        }
        let now = self.check_expiration()?;

        let msg_len = (plaintext.len() + TAG_SIZE) as u32;
        let aad = encode_header(PacketFlag::EncryptedMessage, msg_len, self.tx_sequence, now);
        let sealed = self.tx.encrypt(plaintext, &aad);

        let packet = Packet::new(PacketFlag::EncryptedMessage, self.tx_sequence, now, sealed);
        self.bump_tx()?;
        Ok(packet)
    }

    /// Verify and decrypt an inbound `EncryptedMessage` packet.
    ///
    /// # Errors
    ///
    /// Sequence mismatches, authentication failures, and expiry are all
    /// fatal; the caller must tear the session down and may announce the
    /// error code to the peer first.
    pub fn decode_message(&mut self, packet: &Packet) -> Result<Vec<u8>> {
        self.check_expiration()?;
        if packet.flag != PacketFlag::EncryptedMessage {
            return Err(SkdpError::UnexpectedPacket {
                expected: PacketFlag::EncryptedMessage,
                actual: packet.flag,
            });
        }
        self.check_rx_sequence(packet)?;
        if packet.payload.len() < TAG_SIZE {
            return Err(SkdpError::PacketInvalid(
                "encrypted payload shorter than its tag".to_string(),
            ));
        }

        let aad = packet.header_bytes();
        let plaintext = self.rx.decrypt(&packet.payload, &aad)?;
        self.bump_rx()?;
        Ok(plaintext)
    }

    /// Build an idle keepalive probe carrying the current timestamp.
    pub fn encode_keepalive(&mut self) -> Result<Packet> {
        let now = self.check_expiration()?;
        let packet = Packet::new(
            PacketFlag::KeepAliveRequest,
            self.tx_sequence,
            now,
            now.to_le_bytes().to_vec(),
        );
        self.bump_tx()?;
        self.pending_keepalive = Some(now);
        Ok(packet)
    }

    /// Answer a peer's keepalive probe, echoing its payload verbatim.
    pub fn keepalive_response(&mut self, request: &Packet) -> Result<Packet> {
        let now = self.check_expiration()?;
        if request.flag != PacketFlag::KeepAliveRequest {
            return Err(SkdpError::UnexpectedPacket {
                expected: PacketFlag::KeepAliveRequest,
                actual: request.flag,
            });
        }
        self.check_rx_sequence(request)?;
        if request.payload.len() != 8 {
            return Err(SkdpError::PacketInvalid(
                "keepalive payload is not a timestamp".to_string(),
            ));
        }
        self.bump_rx()?;

        let response = Packet::new(
            PacketFlag::KeepAliveResponse,
            self.tx_sequence,
            now,
            request.payload.clone(),
        );
        self.bump_tx()?;
        Ok(response)
    }

    /// Confirm a keepalive echo against the outstanding probe.
    pub fn confirm_keepalive(&mut self, response: &Packet) -> Result<()> {
        self.check_expiration()?;
        if response.flag != PacketFlag::KeepAliveResponse {
            return Err(SkdpError::UnexpectedPacket {
                expected: PacketFlag::KeepAliveResponse,
                actual: response.flag,
            });
        }
        self.check_rx_sequence(response)?;
        self.bump_rx()?;

        match self.pending_keepalive.take() {
            Some(sent) if response.payload == sent.to_le_bytes() => Ok(()),
            _ => Err(SkdpError::BadKeepAlive),
        }
    }

    /// Build the courtesy abort packet carrying `code`.
    pub fn encode_error(&mut self, code: ErrorCode) -> Packet {
        let packet = Packet::new(
            PacketFlag::ErrorCondition,
            self.tx_sequence,
            unix_now(),
            vec![code.to_byte()],
        );
        // The session is ending; counter overflow no longer matters.
        self.tx_sequence = self.tx_sequence.saturating_add(1);
        packet
    }

    fn check_expiration(&self) -> Result<u64> {
        let now = unix_now();
        if now >= self.expiration {
            return Err(SkdpError::Expired);
        }
        Ok(now)
    }

    fn check_rx_sequence(&self, packet: &Packet) -> Result<()> {
        if packet.sequence != self.rx_sequence {
            return Err(SkdpError::Unsequenced {
                expected: self.rx_sequence,
                actual: packet.sequence,
            });
        }
        Ok(())
    }

    fn bump_tx(&mut self) -> Result<()> {
        self.tx_sequence = self.tx_sequence.checked_add(1).ok_or(SkdpError::Expired)?;
        Ok(())
    }

    fn bump_rx(&mut self) -> Result<()> {
        self.rx_sequence = self.rx_sequence.checked_add(1).ok_or(SkdpError::Expired)?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn force_sequences(&mut self, tx: u64, rx: u64) {
        self.tx_sequence = tx;
        self.rx_sequence = rx;
    }
}
