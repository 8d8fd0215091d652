//! # Client Handshake
//!
//! The initiating side of the handshake. The client presents its key
//! identifier, unwraps the server's session tokens under a key derived
//! from its embedded device secret, proves possession of the tokens, and
//! verifies the server's confirmation before any traffic flows.
//!
//! The machine is transport-free: each step consumes the peer's packet
//! and produces the next one (or the finished session). Any failure is
//! terminal; transient secrets are zeroized on every exit path.

use crate::crypto::kdf::{self, XofStream, CONFIRM_PROOF_CONTEXT, ESTABLISH_PROOF_CONTEXT};
use crate::crypto::{KEY_SIZE, TAG_SIZE};
use crate::keys::DeviceKey;
use crate::protocol::error::{Result, SkdpError};
use crate::protocol::packet::{Packet, PacketFlag};
use crate::protocol::session::{derive_session_keys, SessionKeys, SessionMode, SkdpSession};
use crate::protocol::{check_handshake_packet, unix_now, ProtocolState, HANDSHAKE_TIMEOUT};
use log::debug;
use std::time::Instant;
use zeroize::Zeroize;

/// Client-side handshake state machine.
///
/// Drive it with [`initiate`](Self::initiate), feed the server's replies
/// to [`exchange`](Self::exchange) and [`establish`](Self::establish);
/// the latter consumes the machine and returns the live session.
pub struct ClientHandshake {
    device: DeviceKey,
    state: ProtocolState,
    deadline: Instant,
    stok: [u8; KEY_SIZE],
    vtok: [u8; KEY_SIZE],
    keys: Option<SessionKeys>,
}

impl ClientHandshake {
    /// Create a handshake for the given device key record.
    pub fn new(device: DeviceKey) -> Self {
        Self {
            device,
            state: ProtocolState::None,
            deadline: Instant::now() + HANDSHAKE_TIMEOUT,
            stok: [0u8; KEY_SIZE],
            vtok: [0u8; KEY_SIZE],
            keys: None,
        }
    }

    /// Current state of the machine.
    pub fn state(&self) -> ProtocolState {
        self.state
    }

    /// Build the opening `ConnectRequest` carrying this device's
    /// identifier.
    pub fn initiate(&mut self) -> Result<Packet> {
        if self.state != ProtocolState::None {
            self.state = ProtocolState::Error;
            return Err(SkdpError::InvalidRequest(
                "connect already initiated".to_string(),
            ));
        }
        let now = unix_now();
        if self.device.is_expired(now) {
            self.state = ProtocolState::Error;
            return Err(SkdpError::Expired);
        }

        debug!("client connect: {:?}", self.device.kid());
        let packet = Packet::new(
            PacketFlag::ConnectRequest,
            0,
            now,
            self.device.kid().as_bytes().to_vec(),
        );
        self.state = ProtocolState::Connect;
        self.deadline = Instant::now() + HANDSHAKE_TIMEOUT;
        Ok(packet)
    }

    /// Process the server's `ExchangeResponse`: unwrap the session
    /// tokens, derive the session keys, and produce the
    /// `EstablishRequest` proof.
    pub fn exchange(&mut self, response: &Packet) -> Result<Packet> {
        if self.state != ProtocolState::Connect {
            self.state = ProtocolState::Error;
            return Err(SkdpError::InvalidRequest(
                "exchange before connect".to_string(),
            ));
        }
        match self.exchange_inner(response) {
            Ok(packet) => Ok(packet),
            Err(e) => {
                self.fail();
                Err(e)
            }
        }
    }

    fn exchange_inner(&mut self, response: &Packet) -> Result<Packet> {
        if Instant::now() > self.deadline {
            return Err(SkdpError::Expired);
        }
        check_handshake_packet(response, PacketFlag::ExchangeResponse, 0, unix_now())?;
        if response.payload.len() != 2 * KEY_SIZE {
            return Err(SkdpError::PacketInvalid(
                "token payload has the wrong width".to_string(),
            ));
        }

        // Unwrap stok ‖ vtok under the device-secret-derived key.
        let kid = self.device.kid();
        let mut wrap_key = [0u8; KEY_SIZE];
        kdf::xof(self.device.as_bytes(), kid.as_bytes(), &mut wrap_key);
        let mut tokens = response.payload.clone();
        XofStream::new(&wrap_key, b"").apply(&mut tokens);
        wrap_key.zeroize();

        self.stok.copy_from_slice(&tokens[..KEY_SIZE]);
        self.vtok.copy_from_slice(&tokens[KEY_SIZE..]);
        tokens.zeroize();

        self.keys = Some(derive_session_keys(&self.stok, &self.vtok, &kid, true));

        let mut proof = [0u8; TAG_SIZE];
        kdf::mac_parts(
            &self.stok,
            &self.vtok,
            &[kid.as_bytes().as_slice(), ESTABLISH_PROOF_CONTEXT],
            &mut proof,
        );

        debug!("client exchange complete: {:?}", kid);
        self.state = ProtocolState::Establish;
        self.deadline = Instant::now() + HANDSHAKE_TIMEOUT;
        Ok(Packet::new(
            PacketFlag::EstablishRequest,
            1,
            unix_now(),
            proof.to_vec(),
        ))
    }

    /// Verify the server's `EstablishResponse` confirmation and return
    /// the established session.
    ///
    /// Consumes the machine; transient token material is zeroized
    /// whether verification succeeds or not.
    pub fn establish(mut self, response: &Packet) -> Result<SkdpSession> {
        if self.state != ProtocolState::Establish {
            self.state = ProtocolState::Error;
            return Err(SkdpError::InvalidRequest(
                "establish before exchange".to_string(),
            ));
        }
        if Instant::now() > self.deadline {
            self.fail();
            return Err(SkdpError::Expired);
        }
        if let Err(e) = check_handshake_packet(response, PacketFlag::EstablishResponse, 1, unix_now())
        {
            self.fail();
            return Err(e);
        }

        let kid = self.device.kid();
        let mut confirm = [0u8; TAG_SIZE];
        kdf::mac_parts(
            &self.vtok,
            &self.stok,
            &[kid.as_bytes().as_slice(), CONFIRM_PROOF_CONTEXT],
            &mut confirm,
        );
        let verified = kdf::verify(&confirm, &response.payload);
        confirm.zeroize();
        if !verified {
            self.fail();
            return Err(SkdpError::HashInvalid);
        }

        let keys = self.keys.take().expect("keys derived during exchange");
        debug!("client session established: {:?}", kid);
        self.state = ProtocolState::Session;
        Ok(SkdpSession::new(
            SessionMode::DuplexClient,
            kid,
            self.device.expiration(),
            keys,
        ))
    }

    fn fail(&mut self) {
        self.state = ProtocolState::Error;
        self.stok.zeroize();
        self.vtok.zeroize();
        self.keys = None;
    }
}

impl Drop for ClientHandshake {
    fn drop(&mut self) {
        self.stok.zeroize();
        self.vtok.zeroize();
    }
}
