//! # Transport Glue
//!
//! Runs the handshake exactly once over a reliable byte stream and wraps
//! the result in a connected duplex handle.
//!
//! ## Transport abstraction
//!
//! The protocol needs three capabilities from its carrier: blocking
//! exact reads, blocking complete writes, and close. Anything providing
//! [`Transport`] works; `std::net::TcpStream` is the reference carrier,
//! and the integration tests drive the same code over an in-memory pipe.
//!
//! ## Failure behavior
//!
//! Handshake and session failures are fatal. When the transport is still
//! writable the failing side sends a courtesy `ErrorCondition` carrying
//! its error code before closing; local-misuse errors are reported to
//! the caller only and nothing is sent.

use crate::keys::{DeviceKey, KeyStore};
use crate::protocol::error::{ErrorCode, Result, SkdpError};
use crate::protocol::packet::{Packet, PacketFlag};
use crate::protocol::session::SkdpSession;
use crate::protocol::{
    unix_now, ClientHandshake, ServerHandshake, HANDSHAKE_TIMEOUT, HEADER_SIZE, MESSAGE_MAX,
};
use log::{debug, info, warn};
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};

/// The capability set the protocol requires from a byte stream.
///
/// All three operations block; the protocol never issues partial reads
/// or writes.
pub trait Transport {
    /// Fill `buf` completely from the stream.
    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()>;
    /// Write all of `buf` to the stream.
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;
    /// Tear the stream down. Subsequent operations may fail.
    fn close(&mut self) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        Read::read_exact(self, buf)
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        Write::write_all(self, buf)
    }

    fn close(&mut self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

/// Read one framed packet: a 21-byte header, then the payload the
/// header announces.
fn read_packet<T: Transport>(transport: &mut T) -> Result<Packet> {
    let mut frame = vec![0u8; HEADER_SIZE];
    transport
        .read_exact(&mut frame)
        .map_err(SkdpError::Receive)?;

    let msg_len = u32::from_le_bytes(frame[1..5].try_into().expect("slice width is fixed")) as usize;
    if msg_len > MESSAGE_MAX {
        return Err(SkdpError::PacketInvalid(format!(
            "announced payload of {msg_len} bytes exceeds the maximum"
        )));
    }
    frame.resize(HEADER_SIZE + msg_len, 0);
    transport
        .read_exact(&mut frame[HEADER_SIZE..])
        .map_err(SkdpError::Receive)?;
    Packet::deserialize(&frame)
}

fn write_packet<T: Transport>(transport: &mut T, packet: &Packet) -> Result<()> {
    transport
        .write_all(&packet.serialize())
        .map_err(SkdpError::Channel)
}

/// Best-effort courtesy notification during the handshake, before any
/// session exists to carry it.
fn send_handshake_error<T: Transport>(transport: &mut T, error: &SkdpError) {
    if error.is_local_only() {
        return;
    }
    let packet = Packet::new(
        PacketFlag::ErrorCondition,
        0,
        unix_now(),
        vec![error.code().to_byte()],
    );
    let _ = write_packet(transport, &packet);
}

/// A connected duplex stream: transport plus established session.
///
/// Keepalive requests from the peer are answered transparently inside
/// [`receive`](Self::receive); everything else surfaces to the caller.
pub struct SkdpStream<T: Transport> {
    transport: T,
    session: SkdpSession,
}

impl<T: Transport> std::fmt::Debug for SkdpStream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkdpStream")
            .field("session", &self.session.kid())
            .finish()
    }
}

impl<T: Transport> SkdpStream<T> {
    fn new(transport: T, session: SkdpSession) -> Self {
        Self { transport, session }
    }

    /// The established session's parameters.
    pub fn session(&self) -> &SkdpSession {
        &self.session
    }

    /// Encrypt and send one message.
    pub fn send(&mut self, message: &[u8]) -> Result<()> {
        let packet = match self.session.encode_message(message) {
            Ok(packet) => packet,
            Err(e) => {
                if !e.is_local_only() {
                    self.abort(&e);
                }
                return Err(e);
            }
        };
        if let Err(e) = write_packet(&mut self.transport, &packet) {
            let _ = self.transport.close();
            return Err(e);
        }
        Ok(())
    }

    /// Receive the next message, servicing keepalives along the way.
    ///
    /// Returns the decrypted plaintext of the next `EncryptedMessage`.
    /// Any protocol violation tears the stream down after the courtesy
    /// error packet; a received `ErrorCondition` is surfaced as
    /// [`SkdpError::Peer`].
    pub fn receive(&mut self) -> Result<Vec<u8>> {
        loop {
            let packet = match read_packet(&mut self.transport) {
                Ok(packet) => packet,
                Err(e) => {
                    let _ = self.transport.close();
                    return Err(e);
                }
            };

            match packet.flag {
                PacketFlag::EncryptedMessage => match self.session.decode_message(&packet) {
                    Ok(message) => return Ok(message),
                    Err(e) => {
                        self.abort(&e);
                        return Err(e);
                    }
                },
                PacketFlag::KeepAliveRequest => {
                    let response = match self.session.keepalive_response(&packet) {
                        Ok(response) => response,
                        Err(e) => {
                            self.abort(&e);
                            return Err(e);
                        }
                    };
                    write_packet(&mut self.transport, &response)?;
                }
                PacketFlag::KeepAliveResponse => {
                    if let Err(e) = self.session.confirm_keepalive(&packet) {
                        self.abort(&e);
                        return Err(e);
                    }
                }
                PacketFlag::ErrorCondition => {
                    let code = packet
                        .payload
                        .first()
                        .and_then(|&b| ErrorCode::from_byte(b))
                        .unwrap_or(ErrorCode::None);
                    warn!("peer aborted session: {code:?}");
                    let _ = self.transport.close();
                    return Err(SkdpError::Peer(code));
                }
                other => {
                    let e = SkdpError::UnexpectedPacket {
                        expected: PacketFlag::EncryptedMessage,
                        actual: other,
                    };
                    self.abort(&e);
                    return Err(e);
                }
            }
        }
    }

    /// Send an idle keepalive probe; the echo is consumed by the next
    /// [`receive`](Self::receive) call.
    pub fn keepalive(&mut self) -> Result<()> {
        let packet = match self.session.encode_keepalive() {
            Ok(packet) => packet,
            Err(e) => {
                if !e.is_local_only() {
                    self.abort(&e);
                }
                return Err(e);
            }
        };
        write_packet(&mut self.transport, &packet)
    }

    /// Close the stream. Key material is zeroized as the session drops.
    pub fn close(mut self) -> Result<()> {
        self.transport.close().map_err(SkdpError::Channel)
    }

    fn abort(&mut self, error: &SkdpError) {
        if !error.is_local_only() {
            let packet = self.session.encode_error(error.code());
            let _ = write_packet(&mut self.transport, &packet);
        }
        let _ = self.transport.close();
    }
}

/// Opens one protocol session over a transport.
pub struct SkdpConnector;

impl SkdpConnector {
    /// Run the client handshake over an already-open transport.
    pub fn connect<T: Transport>(mut transport: T, device: DeviceKey) -> Result<SkdpStream<T>> {
        let mut handshake = ClientHandshake::new(device);

        let connect = match handshake.initiate() {
            Ok(packet) => packet,
            Err(e) => {
                let _ = transport.close();
                return Err(e);
            }
        };
        write_packet(&mut transport, &connect)?;

        let reply = read_packet(&mut transport)?;
        let establish = match handshake.exchange(&reply) {
            Ok(packet) => packet,
            Err(e) => {
                send_handshake_error(&mut transport, &e);
                let _ = transport.close();
                return Err(e);
            }
        };
        write_packet(&mut transport, &establish)?;

        let confirm = read_packet(&mut transport)?;
        let session = match handshake.establish(&confirm) {
            Ok(session) => session,
            Err(e) => {
                send_handshake_error(&mut transport, &e);
                let _ = transport.close();
                return Err(e);
            }
        };

        info!("session established: {:?}", session.kid());
        Ok(SkdpStream::new(transport, session))
    }

    /// Connect a TCP stream to `addr` and run the client handshake.
    ///
    /// The handshake runs under a socket read timeout matching the phase
    /// deadline; the established stream blocks indefinitely.
    pub fn connect_tcp(
        addr: impl ToSocketAddrs,
        device: DeviceKey,
    ) -> Result<SkdpStream<TcpStream>> {
        let stream = TcpStream::connect(addr).map_err(SkdpError::Connection)?;
        stream
            .set_read_timeout(Some(HANDSHAKE_TIMEOUT))
            .map_err(SkdpError::Connection)?;
        let connected = Self::connect(stream, device)?;
        connected
            .transport
            .set_read_timeout(None)
            .map_err(SkdpError::Connection)?;
        Ok(connected)
    }
}

/// Accepts protocol sessions for the branches in a key store.
pub struct SkdpListener {
    listener: TcpListener,
}

impl SkdpListener {
    /// Bind a TCP listener on `addr`.
    pub fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr).map_err(SkdpError::Connection)?;
        Ok(Self { listener })
    }

    /// The bound socket address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept one TCP connection and run the server handshake.
    pub fn accept(&self, store: &KeyStore) -> Result<SkdpStream<TcpStream>> {
        let (stream, peer) = self.listener.accept().map_err(SkdpError::Connection)?;
        debug!("accepted transport connection from {peer}");
        stream
            .set_read_timeout(Some(HANDSHAKE_TIMEOUT))
            .map_err(SkdpError::Connection)?;
        let connected = Self::accept_stream(stream, store)?;
        connected
            .transport
            .set_read_timeout(None)
            .map_err(SkdpError::Connection)?;
        Ok(connected)
    }

    /// Run the server handshake over an already-open transport.
    pub fn accept_stream<T: Transport>(
        mut transport: T,
        store: &KeyStore,
    ) -> Result<SkdpStream<T>> {
        let mut handshake = ServerHandshake::new();

        let connect = read_packet(&mut transport)?;
        let exchange = match handshake.respond(&connect, store) {
            Ok(packet) => packet,
            Err(e) => {
                send_handshake_error(&mut transport, &e);
                let _ = transport.close();
                return Err(e);
            }
        };
        write_packet(&mut transport, &exchange)?;

        let establish = read_packet(&mut transport)?;
        let (confirm, session) = match handshake.establish(&establish) {
            Ok(result) => result,
            Err(e) => {
                send_handshake_error(&mut transport, &e);
                let _ = transport.close();
                return Err(e);
            }
        };
        write_packet(&mut transport, &confirm)?;

        info!("session established: {:?}", session.kid());
        Ok(SkdpStream::new(transport, session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct LoopbackTransport {
        buffer: VecDeque<u8>,
        closed: bool,
    }

    impl LoopbackTransport {
        fn new() -> Self {
            Self {
                buffer: VecDeque::new(),
                closed: false,
            }
        }
    }

    impl Transport for LoopbackTransport {
        fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
            if self.buffer.len() < buf.len() {
                return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "drained"));
            }
            for byte in buf.iter_mut() {
                *byte = self.buffer.pop_front().expect("length checked above");
            }
            Ok(())
        }

        fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
            if self.closed {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"));
            }
            self.buffer.extend(buf);
            Ok(())
        }

        fn close(&mut self) -> io::Result<()> {
            self.closed = true;
            Ok(())
        }
    }

    #[test]
    fn test_packet_roundtrip_over_transport() {
        let mut transport = LoopbackTransport::new();
        let packet = Packet::new(PacketFlag::ConnectRequest, 0, unix_now(), vec![7u8; 16]);
        write_packet(&mut transport, &packet).unwrap();
        let parsed = read_packet(&mut transport).unwrap();
        assert_eq!(parsed, packet);
        assert!(transport.buffer.is_empty());
    }

    #[test]
    fn test_read_packet_rejects_oversized_announcement() {
        let mut transport = LoopbackTransport::new();
        let mut header = [0u8; HEADER_SIZE];
        header[0] = PacketFlag::EncryptedMessage.to_byte();
        header[1..5].copy_from_slice(&u32::MAX.to_le_bytes());
        transport.write_all(&header).unwrap();
        let result = read_packet(&mut transport);
        assert!(matches!(result, Err(SkdpError::PacketInvalid(_))));
    }

    #[test]
    fn test_truncated_stream_is_receive_failure() {
        let mut transport = LoopbackTransport::new();
        transport.write_all(&[0u8; HEADER_SIZE - 3]).unwrap();
        let result = read_packet(&mut transport);
        assert!(matches!(result, Err(SkdpError::Receive(_))));
    }

    #[test]
    fn test_handshake_error_packet_shape() {
        let mut transport = LoopbackTransport::new();
        send_handshake_error(&mut transport, &SkdpError::InvalidKey);
        let packet = read_packet(&mut transport).unwrap();
        assert_eq!(packet.flag, PacketFlag::ErrorCondition);
        assert_eq!(packet.payload, vec![ErrorCode::InvalidKey.to_byte()]);
    }

    #[test]
    fn test_local_misuse_is_never_announced() {
        let mut transport = LoopbackTransport::new();
        send_handshake_error(
            &mut transport,
            &SkdpError::InvalidInput("oversized".to_string()),
        );
        assert!(transport.buffer.is_empty());
    }
}
