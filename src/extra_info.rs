//! `get_extra_info` key/value types (§6). Kept as a small closed enum
//! rather than a stringly-typed map, since the set of introspectable facts
//! is fixed by the design rather than open-ended like asyncio's transport
//! info dict.

use std::net::SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtraInfoKey {
    PeerAddr,
    LocalAddr,
    PeerCertificates,
    NegotiatedCipherSuite,
    AlpnProtocol,
    ProtocolVersion,
}

#[derive(Debug, Clone)]
pub enum ExtraInfoValue {
    Addr(SocketAddr),
    /// DER-encoded peer certificate chain, leaf first.
    Certificates(Vec<Vec<u8>>),
    Cipher(String),
    Alpn(Vec<u8>),
    Version(&'static str),
}

/// Snapshot of the facts that only become known once the TLS handshake
/// completes. Lives behind a `Mutex` shared between the connection task
/// (writer) and any number of `TransportHandle` clones (readers).
#[derive(Default)]
pub struct ExtraInfoSnapshot {
    pub peer_certificates: Option<Vec<Vec<u8>>>,
    pub negotiated_cipher_suite: Option<String>,
    pub alpn_protocol: Option<Vec<u8>>,
    pub protocol_version: Option<&'static str>,
}
