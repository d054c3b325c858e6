//! Error taxonomy for the transport.
//!
//! Mirrors the distinction the engine makes between transient signals
//! (`want-read` / `want-write`, not errors at all) and the handful of ways a
//! connection can die: the TLS engine itself, the socket, an unexpected
//! peer EOF, a failing post-handshake hook, or plain misuse of the API.

use std::fmt;
use std::io;
use std::sync::Arc;

/// Boxed hook error, cheaply cloneable so it can be delivered both to the
/// pending `starttls()` caller and to `connection_lost`.
pub type HookError = Arc<dyn std::error::Error + Send + Sync>;

/// Every way a [`crate::Transport`] can fail or be refused an operation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The TLS engine reported a fatal protocol or cryptographic error.
    #[error("TLS error: {0}")]
    Tls(#[from] RustlsErr),

    /// The underlying socket failed.
    #[error("I/O error: {0}")]
    Io(IoErr),

    /// The peer went away without a clean TLS close-notify, or without
    /// completing the handshake.
    #[error("connection reset by peer")]
    ConnectionReset,

    /// The post-handshake hook returned an error.
    #[error("post-handshake hook failed: {0}")]
    Hook(HookError),

    /// The post-handshake hook, or the handshake itself, was cancelled by
    /// a concurrent `close()`/`abort()`, or the caller dropped the
    /// `starttls()` future.
    #[error("connection aborted")]
    ConnectionAborted,

    /// An operation was attempted that the current phase does not allow
    /// (e.g. `write()` after `close()`, `starttls()` outside `Raw`).
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// `write_eof()` was called on a TLS-wrapped transport.
    #[error("operation not supported over TLS: {0}")]
    NotSupported(&'static str),

    /// `write()`/`starttls()` called after the transport reached `Closing`
    /// or `Closed`.
    #[error("connection already closed")]
    ConnectionClosed,

    /// The transport task itself went away (bug, or runtime shutdown)
    /// before a command could be answered.
    #[error("transport task gone")]
    TaskGone,
}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        if matches!(
            e.kind(),
            io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset
        ) {
            TransportError::ConnectionReset
        } else {
            TransportError::Io(IoErr::new(e))
        }
    }
}

impl From<rustls::Error> for TransportError {
    fn from(e: rustls::Error) -> Self {
        TransportError::Tls(RustlsErr::new(e))
    }
}

/// `rustls::Error` does not implement `Clone`, but `TransportError` needs
/// to be handed both to the `starttls()` waiter and to `connection_lost`.
/// Stash the formatted message once instead of carrying the original.
#[derive(Debug, Clone)]
pub struct RustlsErr(Arc<str>);

impl RustlsErr {
    fn new(e: rustls::Error) -> Self {
        Self(e.to_string().into())
    }
}

impl fmt::Display for RustlsErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for RustlsErr {}

/// Same cloning problem as [`RustlsErr`], for `std::io::Error`.
#[derive(Debug, Clone)]
pub struct IoErr(Arc<str>, io::ErrorKind);

impl IoErr {
    fn new(e: io::Error) -> Self {
        Self(e.to_string().into(), e.kind())
    }

    pub fn kind(&self) -> io::ErrorKind {
        self.1
    }
}

impl fmt::Display for IoErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for IoErr {}

pub type Result<T> = std::result::Result<T, TransportError>;
