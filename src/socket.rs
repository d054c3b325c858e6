//! Raw socket endpoint: a non-blocking bidirectional byte pipe over
//! [`tokio::net::TcpStream`]. The transport core only ever asks it for
//! readability/writability and hands it plain byte slices, never anything
//! TLS-aware.

use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncWriteExt, Interest};
use tokio::net::TcpStream;

pub struct RawSocket {
    stream: TcpStream,
}

impl RawSocket {
    pub fn new(stream: TcpStream) -> Self {
        stream.set_nodelay(true).ok();
        Self { stream }
    }

    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.stream.peer_addr()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.stream.local_addr()
    }

    /// Cancel-safe: suitable as a `tokio::select!` branch guarding a
    /// subsequent non-blocking `try_read`/`try_write`.
    pub async fn readable(&self) -> io::Result<()> {
        self.stream.ready(Interest::READABLE).await.map(|_| ())
    }

    pub async fn writable(&self) -> io::Result<()> {
        self.stream.ready(Interest::WRITABLE).await.map(|_| ())
    }

    pub fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.try_read(buf)
    }

    pub fn try_write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.stream.try_write(data)
    }

    /// Orderly half-close of the write direction (used by `write_eof()` in
    /// `Raw` phase, and as the final step of a graceful `close()`).
    pub async fn close(&mut self) -> io::Result<()> {
        self.stream.shutdown().await
    }

    /// Abrupt teardown: set `SO_LINGER(0)` so the kernel sends a `RST`
    /// instead of attempting a clean `FIN` exchange.
    pub fn abort(&mut self) {
        let _ = self.stream.set_linger(Some(std::time::Duration::ZERO));
    }
}
