//! # Server Handshake
//!
//! The accepting side of the handshake. On a connect request the server
//! locates the branch for the presented identifier, re-derives the
//! device secret, draws two fresh session tokens from the OS RNG, and
//! returns them wrapped under a key only that device can reconstruct.
//! The session forms once the client proves it unwrapped the tokens.
//!
//! The expired-key and unknown-key paths both answer before any token is
//! generated, and the error code never reveals whether the identifier
//! would otherwise have been valid material for a different branch.

use crate::crypto::kdf::{self, XofStream, CONFIRM_PROOF_CONTEXT, ESTABLISH_PROOF_CONTEXT};
use crate::crypto::{CryptoError, KEY_SIZE, TAG_SIZE};
use crate::keys::{KeyId, KeyStore};
use crate::protocol::error::{Result, SkdpError};
use crate::protocol::packet::{Packet, PacketFlag};
use crate::protocol::session::{derive_session_keys, SessionKeys, SessionMode, SkdpSession};
use crate::protocol::{check_handshake_packet, unix_now, ProtocolState, HANDSHAKE_TIMEOUT};
use log::{debug, warn};
use rand::rngs::OsRng;
use rand::RngCore;
use std::time::Instant;
use zeroize::Zeroize;

/// Server-side handshake state machine.
///
/// Feed the client's `ConnectRequest` to [`respond`](Self::respond) and
/// its `EstablishRequest` to [`establish`](Self::establish); the latter
/// consumes the machine and returns the confirmation packet together
/// with the live session.
pub struct ServerHandshake {
    state: ProtocolState,
    deadline: Instant,
    kid: Option<KeyId>,
    expiration: u64,
    stok: [u8; KEY_SIZE],
    vtok: [u8; KEY_SIZE],
    keys: Option<SessionKeys>,
}

impl ServerHandshake {
    /// Create a handshake awaiting a connect request.
    pub fn new() -> Self {
        Self {
            state: ProtocolState::Connect,
            deadline: Instant::now() + HANDSHAKE_TIMEOUT,
            kid: None,
            expiration: 0,
            stok: [0u8; KEY_SIZE],
            vtok: [0u8; KEY_SIZE],
            keys: None,
        }
    }

    /// Current state of the machine.
    pub fn state(&self) -> ProtocolState {
        self.state
    }

    /// Process a `ConnectRequest` against the branch store and produce
    /// the `ExchangeResponse` carrying the wrapped session tokens.
    pub fn respond(&mut self, request: &Packet, store: &KeyStore) -> Result<Packet> {
        if self.state != ProtocolState::Connect {
            self.state = ProtocolState::Error;
            return Err(SkdpError::InvalidRequest(
                "respond outside the connect phase".to_string(),
            ));
        }
        match self.respond_inner(request, store) {
            Ok(packet) => Ok(packet),
            Err(e) => {
                warn!("server connect rejected: {e}");
                self.fail();
                Err(e)
            }
        }
    }

    fn respond_inner(&mut self, request: &Packet, store: &KeyStore) -> Result<Packet> {
        if Instant::now() > self.deadline {
            return Err(SkdpError::Expired);
        }
        let now = unix_now();
        check_handshake_packet(request, PacketFlag::ConnectRequest, 0, now)?;

        let kid = KeyId::from_slice(&request.payload)
            .ok_or_else(|| SkdpError::Connect("malformed key identifier".to_string()))?;
        let device = store.derive_device(&kid).ok_or(SkdpError::InvalidKey)?;
        if device.is_expired(now) {
            return Err(SkdpError::Expired);
        }

        // Fresh token pair; these are the roots of every session key.
        OsRng
            .try_fill_bytes(&mut self.stok)
            .map_err(|e| CryptoError::random(e.to_string()))?;
        OsRng
            .try_fill_bytes(&mut self.vtok)
            .map_err(|e| CryptoError::random(e.to_string()))?;

        let mut wrap_key = [0u8; KEY_SIZE];
        kdf::xof(device.as_bytes(), kid.as_bytes(), &mut wrap_key);
        let mut wrapped = Vec::with_capacity(2 * KEY_SIZE);
        wrapped.extend_from_slice(&self.stok);
        wrapped.extend_from_slice(&self.vtok);
        XofStream::new(&wrap_key, b"").apply(&mut wrapped);
        wrap_key.zeroize();

        self.keys = Some(derive_session_keys(&self.stok, &self.vtok, &kid, false));
        self.kid = Some(kid);
        self.expiration = device.expiration();

        debug!("server exchange: {:?}", kid);
        self.state = ProtocolState::Exchange;
        self.deadline = Instant::now() + HANDSHAKE_TIMEOUT;
        Ok(Packet::new(
            PacketFlag::ExchangeResponse,
            0,
            now,
            wrapped,
        ))
    }

    /// Verify the client's `EstablishRequest` proof and return the
    /// `EstablishResponse` confirmation together with the established
    /// session.
    ///
    /// Consumes the machine; token material is zeroized on every path.
    pub fn establish(mut self, request: &Packet) -> Result<(Packet, SkdpSession)> {
        if self.state != ProtocolState::Exchange {
            self.state = ProtocolState::Error;
            return Err(SkdpError::InvalidRequest(
                "establish outside the exchange phase".to_string(),
            ));
        }
        match self.establish_inner(request) {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!("server establish rejected: {e}");
                self.fail();
                Err(e)
            }
        }
    }

    fn establish_inner(&mut self, request: &Packet) -> Result<(Packet, SkdpSession)> {
        if Instant::now() > self.deadline {
            return Err(SkdpError::Expired);
        }
        let now = unix_now();
        check_handshake_packet(request, PacketFlag::EstablishRequest, 1, now)?;

        let kid = self.kid.expect("identifier recorded during connect");
        let mut proof = [0u8; TAG_SIZE];
        kdf::mac_parts(
            &self.stok,
            &self.vtok,
            &[kid.as_bytes().as_slice(), ESTABLISH_PROOF_CONTEXT],
            &mut proof,
        );
        let verified = kdf::verify(&proof, &request.payload);
        proof.zeroize();
        if !verified {
            return Err(SkdpError::HashInvalid);
        }

        let mut confirm = [0u8; TAG_SIZE];
        kdf::mac_parts(
            &self.vtok,
            &self.stok,
            &[kid.as_bytes().as_slice(), CONFIRM_PROOF_CONTEXT],
            &mut confirm,
        );
        let keys = self.keys.take().expect("keys derived during connect");
        let session = SkdpSession::new(SessionMode::DuplexServer, kid, self.expiration, keys);

        debug!("server session established: {:?}", kid);
        self.state = ProtocolState::Session;
        self.stok.zeroize();
        self.vtok.zeroize();
        Ok((
            Packet::new(PacketFlag::EstablishResponse, 1, now, confirm.to_vec()),
            session,
        ))
    }

    fn fail(&mut self) {
        self.state = ProtocolState::Error;
        self.stok.zeroize();
        self.vtok.zeroize();
        self.keys = None;
    }
}

impl Default for ServerHandshake {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ServerHandshake {
    fn drop(&mut self) {
        self.stok.zeroize();
        self.vtok.zeroize();
    }
}
