//! Connection factory (§6): resolves and connects a TCP socket, then hands
//! it and a freshly-constructed protocol instance to a [`ConnectionActor`]
//! task.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpSocket, TcpStream};
use tokio::task::JoinHandle;

use crate::engine::{Engine, EngineConfig};
use crate::error::{Result, TransportError};
use crate::protocol::Protocol;
use crate::socket::RawSocket;
use crate::transport::{ActorConfig, ConnectionActor, Phase, PostHookFn, SslContextFactory, TransportHandle};

/// Configuration for [`create_starttls_connection`]. Built with the
/// constructor plus a `with_*` chain: a small builder rather than a
/// constructor with a dozen positional arguments.
pub struct StartTlsOptions {
    host: String,
    port: u16,
    local_addr: Option<SocketAddr>,
    server_hostname: Option<String>,
    use_starttls: bool,
    ssl_context_factory: SslContextFactory,
    post_handshake_callback: Option<PostHookFn>,
    write_high: usize,
    write_low: usize,
}

impl StartTlsOptions {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        ssl_context_factory: impl Fn(&TransportHandle) -> EngineConfig + Send + Sync + 'static,
    ) -> Self {
        let host = host.into();
        Self {
            server_hostname: Some(host.clone()),
            host,
            port,
            local_addr: None,
            use_starttls: true,
            ssl_context_factory: Arc::new(ssl_context_factory),
            post_handshake_callback: None,
            write_high: crate::buffers::DEFAULT_WRITE_HIGH,
            write_low: crate::buffers::DEFAULT_WRITE_LOW,
        }
    }

    pub fn local_addr(mut self, addr: SocketAddr) -> Self {
        self.local_addr = Some(addr);
        self
    }

    /// Overrides the name used for SNI / certificate verification; defaults
    /// to the connect host.
    pub fn server_hostname(mut self, name: impl Into<String>) -> Self {
        self.server_hostname = Some(name.into());
        self
    }

    /// `false` (the default is `true`) starts the TLS handshake immediately
    /// instead of waiting for an explicit `starttls()` call.
    pub fn use_starttls(mut self, value: bool) -> Self {
        self.use_starttls = value;
        self
    }

    pub fn post_handshake_callback(
        mut self,
        f: impl Fn(TransportHandle) -> crate::transport::HookFuture + Send + Sync + 'static,
    ) -> Self {
        self.post_handshake_callback = Some(Arc::new(f));
        self
    }

    pub fn write_watermarks(mut self, high: usize, low: usize) -> Self {
        self.write_high = high;
        self.write_low = low;
        self
    }
}

async fn connect_socket(options: &StartTlsOptions) -> io::Result<TcpStream> {
    match options.local_addr {
        Some(local) => {
            let sock = if local.is_ipv4() {
                TcpSocket::new_v4()?
            } else {
                TcpSocket::new_v6()?
            };
            sock.set_reuseaddr(true)?;
            sock.bind(local)?;
            let remote = resolve(&options.host, options.port).await?;
            sock.connect(remote).await
        }
        None => TcpStream::connect((options.host.as_str(), options.port)).await,
    }
}

async fn resolve(host: &str, port: u16) -> io::Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no address found for {host}")))
}

/// Connects to `options.host:options.port` and starts a connection task
/// running `protocol`. For `use_starttls(false)` (immediate-TLS mode) this
/// resolves only once the handshake (and any post-handshake hook) has
/// completed; the returned [`JoinHandle`] resolves once the connection task
/// exits, after `connection_lost` has been delivered.
pub async fn create_starttls_connection<P: Protocol>(
    protocol_factory: impl FnOnce() -> P,
    options: StartTlsOptions,
) -> Result<(TransportHandle, JoinHandle<()>)> {
    let stream = connect_socket(&options).await?;
    spawn_actor(
        stream,
        protocol_factory,
        options.server_hostname,
        options.use_starttls,
        options.ssl_context_factory,
        options.post_handshake_callback,
        options.write_high,
        options.write_low,
    )
    .await
}

/// Mirror of [`create_starttls_connection`] for the accepting side of a
/// listener (`TcpListener::accept`), or any other already-established
/// stream. The distilled spec only names the dialing half (modeled on
/// `loop.create_connection`), but a STARTTLS-capable protocol is rarely
/// only a client — SMTP/IMAP/FTP servers need exactly this wrapped around
/// an accepted socket.
pub async fn starttls_over_stream<P: Protocol>(
    stream: TcpStream,
    protocol_factory: impl FnOnce() -> P,
    options: AcceptTlsOptions,
) -> Result<(TransportHandle, JoinHandle<()>)> {
    spawn_actor(
        stream,
        protocol_factory,
        None,
        options.use_starttls,
        options.ssl_context_factory,
        options.post_handshake_callback,
        options.write_high,
        options.write_low,
    )
    .await
}

#[allow(clippy::too_many_arguments)]
async fn spawn_actor<P: Protocol>(
    stream: TcpStream,
    protocol_factory: impl FnOnce() -> P,
    server_hostname: Option<String>,
    use_starttls: bool,
    ssl_context_factory: SslContextFactory,
    post_handshake_callback: Option<PostHookFn>,
    write_high: usize,
    write_low: usize,
) -> Result<(TransportHandle, JoinHandle<()>)> {
    let peer_addr = stream.peer_addr()?;
    let local_addr = stream.local_addr()?;
    let socket = RawSocket::new(stream);

    let (handle, cmd_rx) = TransportHandle::new_pair(peer_addr, local_addr);

    let (engine, initial_phase) = if use_starttls {
        (None, Phase::Raw)
    } else {
        let cfg = (ssl_context_factory)(&handle);
        let engine = Engine::from_config(cfg, server_hostname.as_deref())?;
        (Some(engine), Phase::Handshaking)
    };

    let (boot_waiter, boot_rx) = if initial_phase == Phase::Handshaking {
        let (tx, rx) = tokio::sync::oneshot::channel();
        (Some(tx), Some(rx))
    } else {
        (None, None)
    };

    let protocol = Box::new(protocol_factory());
    let actor = ConnectionActor::new(ActorConfig {
        socket,
        engine,
        initial_phase,
        protocol,
        handle: handle.clone(),
        cmd_rx,
        ssl_context_factory: Some(ssl_context_factory),
        server_hostname,
        post_hook: post_handshake_callback,
        boot_waiter,
        write_high,
        write_low,
    });

    let join = tokio::spawn(actor.run());

    if let Some(rx) = boot_rx {
        rx.await.map_err(|_| TransportError::TaskGone)??;
    }

    Ok((handle, join))
}

/// Configuration for [`starttls_over_stream`].
pub struct AcceptTlsOptions {
    use_starttls: bool,
    ssl_context_factory: SslContextFactory,
    post_handshake_callback: Option<PostHookFn>,
    write_high: usize,
    write_low: usize,
}

impl AcceptTlsOptions {
    pub fn new(ssl_context_factory: impl Fn(&TransportHandle) -> EngineConfig + Send + Sync + 'static) -> Self {
        Self {
            use_starttls: true,
            ssl_context_factory: Arc::new(ssl_context_factory),
            post_handshake_callback: None,
            write_high: crate::buffers::DEFAULT_WRITE_HIGH,
            write_low: crate::buffers::DEFAULT_WRITE_LOW,
        }
    }

    pub fn use_starttls(mut self, value: bool) -> Self {
        self.use_starttls = value;
        self
    }

    pub fn post_handshake_callback(
        mut self,
        f: impl Fn(TransportHandle) -> crate::transport::HookFuture + Send + Sync + 'static,
    ) -> Self {
        self.post_handshake_callback = Some(Arc::new(f));
        self
    }

    pub fn write_watermarks(mut self, high: usize, low: usize) -> Self {
        self.write_high = high;
        self.write_low = low;
        self
    }
}
