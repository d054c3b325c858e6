//! Engine adapter: a thin, non-blocking wrapper around [`rustls::Connection`].
//!
//! The engine never touches a socket. It consumes and produces opaque
//! ciphertext records through plain buffers; each pump step is exposed
//! individually so the transport core can interleave it with socket
//! readiness and user commands instead of running it to quiescence in one
//! call.

use std::io::{self, Read, Write};
use std::sync::Arc;

use bytes::{Buf, BytesMut};
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, Connection, ServerConfig, ServerConnection};

use crate::error::TransportError;

/// Outcome of a single non-blocking engine step.
#[derive(Debug)]
pub enum EngineStatus {
    /// Progress was made (or there was nothing to do); no I/O is required.
    Ok,
    /// The engine needs more ciphertext from the peer before it can do
    /// anything further.
    WantRead,
    /// The engine has ciphertext it needs the caller to flush to the
    /// socket before it can do anything further.
    WantWrite,
    /// The engine failed irrecoverably.
    Fatal(TransportError),
    /// `read_app` only: the peer sent a close-notify and there is no more
    /// application data to read, ever. Distinct from `WantRead`, which
    /// means only "nothing available right now".
    Eof,
}

/// What a configured [`Engine`] should be: the half of the picture the
/// user's `ssl_context_factory` controls. `server_hostname` (SNI / the name
/// checked against the peer certificate) is supplied separately by the
/// transport, since it is connection-specific rather than context-specific.
pub enum EngineConfig {
    Client(Arc<ClientConfig>),
    Server(Arc<ServerConfig>),
}

/// Non-blocking wrapper over a client or server [`rustls::Connection`].
///
/// Every method here is a leaf operation from §4.1 of the design: inject
/// ciphertext, extract ciphertext, step the handshake, read app data, write
/// app data, shut down. None of them perform I/O; all operate on buffers
/// handed to them by the transport core.
pub struct Engine {
    conn: Connection,
}

impl Engine {
    pub fn new_client(config: Arc<ClientConfig>, server_name: ServerName<'static>) -> Result<Self, TransportError> {
        let conn = ClientConnection::new(config, server_name)?;
        Ok(Self { conn: Connection::Client(conn) })
    }

    pub fn new_server(config: Arc<ServerConfig>) -> Result<Self, TransportError> {
        let conn = ServerConnection::new(config)?;
        Ok(Self { conn: Connection::Server(conn) })
    }

    /// Builds the engine from whatever `ssl_context_factory` returned,
    /// combining it with the transport's own `server_hostname` for the
    /// client case (needed for SNI and certificate-name checking).
    pub fn from_config(config: EngineConfig, server_hostname: Option<&str>) -> Result<Self, TransportError> {
        match config {
            EngineConfig::Client(cfg) => {
                let host = server_hostname.ok_or(TransportError::InvalidState(
                    "server_hostname is required to build a client TLS engine",
                ))?;
                let name = ServerName::try_from(host.to_string())
                    .map_err(|_| TransportError::InvalidState("server_hostname is not a valid DNS name or IP"))?;
                Self::new_client(cfg, name)
            }
            EngineConfig::Server(cfg) => Self::new_server(cfg),
        }
    }

    pub fn is_handshaking(&self) -> bool {
        self.conn.is_handshaking()
    }

    pub fn wants_read(&self) -> bool {
        self.conn.wants_read()
    }

    pub fn wants_write(&self) -> bool {
        self.conn.wants_write()
    }

    /// Feed ciphertext read from the socket into the engine. Consumes the
    /// bytes the engine accepted from the front of `buf`.
    pub fn inject_ciphertext(&mut self, buf: &mut BytesMut) -> Result<usize, TransportError> {
        let mut reader = (&buf[..]).reader();
        let n = match self.conn.read_tls(&mut reader) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => 0,
            Err(e) => return Err(e.into()),
        };
        buf.advance(n);
        Ok(n)
    }

    /// Drain ciphertext the engine wants to send, appending it to `out`.
    pub fn extract_ciphertext(&mut self, out: &mut BytesMut) -> Result<usize, TransportError> {
        let mut total = 0;
        while self.conn.wants_write() {
            let mut writer = BytesMutWriter(out);
            let n = match self.conn.write_tls(&mut writer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            };
            total += n;
        }
        Ok(total)
    }

    /// Attempt to advance the handshake (or, once established, to process
    /// any newly-arrived TLS records — this is also how renegotiation is
    /// driven transparently per §4.2/§4.3).
    pub fn step_handshake(&mut self) -> EngineStatus {
        match self.conn.process_new_packets() {
            // `wants_read()` is `received_plaintext.is_empty()` under the
            // hood, which is true immediately after the handshake finishes
            // (no app data buffered yet) just as much as mid-handshake, so
            // completion must be read off `is_handshaking()` rather than
            // `wants_read()`/`wants_write()`.
            Ok(_) if !self.conn.is_handshaking() => EngineStatus::Ok,
            Ok(_) => {
                if self.conn.wants_write() {
                    EngineStatus::WantWrite
                } else {
                    EngineStatus::WantRead
                }
            }
            Err(e) => EngineStatus::Fatal(e.into()),
        }
    }

    /// Read as much decrypted application data as is currently available.
    /// Returns `WantRead` once drained.
    pub fn read_app(&mut self, out: &mut BytesMut) -> EngineStatus {
        let mut reader = self.conn.reader();
        let mut scratch = [0u8; 16 * 1024];
        loop {
            match reader.read(&mut scratch) {
                // `rustls::Reader::read` returns `Ok(0)` specifically to
                // signal a received close-notify, never to mean "nothing
                // available yet" (that case is `WouldBlock`).
                Ok(0) => return EngineStatus::Eof,
                Ok(n) => out.extend_from_slice(&scratch[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return EngineStatus::WantRead,
                Err(e) => return EngineStatus::Fatal(e.into()),
            }
        }
    }

    /// Feed plaintext into the engine for encryption. Only legal once the
    /// engine is not mid-handshake — callers must check `is_handshaking()`
    /// first.
    pub fn write_app(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let n = self.conn.writer().write(data)?;
        Ok(n)
    }

    /// Request a clean shutdown: queue a close-notify alert. The caller
    /// must still drain `extract_ciphertext` afterwards.
    pub fn shutdown(&mut self) {
        self.conn.send_close_notify();
    }

    pub fn peer_certificates(&self) -> Option<Vec<Vec<u8>>> {
        self.conn
            .peer_certificates()
            .map(|certs| certs.iter().map(|c| c.as_ref().to_vec()).collect())
    }

    pub fn negotiated_cipher_suite(&self) -> Option<String> {
        self.conn
            .negotiated_cipher_suite()
            .map(|cs| format!("{:?}", cs.suite()))
    }

    pub fn alpn_protocol(&self) -> Option<Vec<u8>> {
        self.conn.alpn_protocol().map(|p| p.to_vec())
    }

    pub fn protocol_version(&self) -> Option<&'static str> {
        self.conn.protocol_version().map(|v| match v {
            rustls::ProtocolVersion::TLSv1_2 => "TLSv1.2",
            rustls::ProtocolVersion::TLSv1_3 => "TLSv1.3",
            _ => "unknown",
        })
    }
}

/// Adapts `&mut BytesMut` to `std::io::Write` so `rustls` can append
/// ciphertext records directly without an intermediate `Vec`.
struct BytesMutWriter<'a>(&'a mut BytesMut);

impl Write for BytesMutWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::RootCertStore;

    fn test_configs() -> (Arc<ServerConfig>, Arc<ClientConfig>) {
        const CERT_PEM: &str = include_str!("../tests/testdata/cert.pem");
        const KEY_PEM: &str = include_str!("../tests/testdata/key.pem");

        let certs = rustls_pemfile::certs(&mut CERT_PEM.as_bytes())
            .map(|c| c.unwrap())
            .collect::<Vec<_>>();
        let key = rustls_pemfile::private_key(&mut KEY_PEM.as_bytes())
            .unwrap()
            .unwrap();

        let server = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(certs.clone(), key)
            .unwrap();

        let mut roots = RootCertStore::empty();
        roots.add_parsable_certificates(certs);
        let client = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();

        (Arc::new(server), Arc::new(client))
    }

    #[test]
    fn handshake_completes_and_exchanges_app_data() {
        let (server_cfg, client_cfg) = test_configs();
        let mut server = Engine::new_server(server_cfg).unwrap();
        let mut client =
            Engine::new_client(client_cfg, ServerName::try_from("example.com").unwrap()).unwrap();

        let mut c2s = BytesMut::new();
        let mut s2c = BytesMut::new();
        let mut client_status = None;
        let mut server_status = None;

        // Drive the handshake to completion by bouncing ciphertext back
        // and forth until both sides stop wanting anything.
        for _ in 0..20 {
            client.extract_ciphertext(&mut c2s).unwrap();
            server.extract_ciphertext(&mut s2c).unwrap();
            if !c2s.is_empty() {
                server.inject_ciphertext(&mut c2s).unwrap();
                server_status = Some(server.step_handshake());
            }
            if !s2c.is_empty() {
                client.inject_ciphertext(&mut s2c).unwrap();
                client_status = Some(client.step_handshake());
            }
            if !client.is_handshaking() && !server.is_handshaking() {
                break;
            }
        }
        assert!(!client.is_handshaking());
        assert!(!server.is_handshaking());
        // The step that actually finishes the handshake must report `Ok`,
        // not `WantRead` — rustls's own `wants_read()` stays true right
        // after completion (no buffered app plaintext yet), so this is the
        // condition `step_handshake` has to special-case.
        assert!(matches!(client_status, Some(EngineStatus::Ok)));
        assert!(matches!(server_status, Some(EngineStatus::Ok)));

        client.write_app(b"foobar").unwrap();
        let mut wire = BytesMut::new();
        client.extract_ciphertext(&mut wire).unwrap();
        server.inject_ciphertext(&mut wire).unwrap();
        server.step_handshake();
        let mut plain = BytesMut::new();
        server.read_app(&mut plain);
        assert_eq!(&plain[..], b"foobar");
    }
}
