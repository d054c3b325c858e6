//! Transport core: the state machine bridging a non-blocking socket with
//! the memory-BIO TLS engine (§3, §4 of the design).
//!
//! One [`ConnectionActor`] runs as a single Tokio task per connection,
//! driven by a `select!` loop over socket readiness, user commands and
//! post-handshake-hook completion. Progress means draining both buffers
//! until nothing further can happen without waiting on real socket I/O or
//! a user-supplied async hook, so it is spread across suspension points
//! instead of a single synchronous call.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::buffers::{AppQueue, WireQueue, Watermarks};
use crate::engine::{Engine, EngineConfig, EngineStatus};
use crate::error::{HookError, Result, TransportError};
use crate::extra_info::{ExtraInfoKey, ExtraInfoSnapshot, ExtraInfoValue};
use crate::protocol::Protocol;

/// One read chunk per socket-readable event, matching the "at least 16
/// KiB" choice in §4.3.
const READ_CHUNK: usize = 16 * 1024;
/// Bound on how much plaintext `tx_drive` feeds the engine per pass, so a
/// huge queued write can't monopolise the task.
const WRITE_CHUNK: usize = 16 * 1024;

/// A future producing the post-handshake hook's result, boxed so
/// [`ConnectionActor`] doesn't need to be generic over the hook type.
pub type HookFuture = Pin<Box<dyn std::future::Future<Output = std::result::Result<(), HookError>> + Send>>;
/// User-supplied post-handshake hook factory: given a handle to the
/// transport (already in `PostHandshakeHook` phase), produce the future to
/// run before the transport is allowed to reach `Open`.
pub type PostHookFn = Arc<dyn Fn(TransportHandle) -> HookFuture + Send + Sync>;
/// User-supplied TLS context factory, invoked exactly once per §6.
pub type SslContextFactory = Arc<dyn Fn(&TransportHandle) -> EngineConfig + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Raw = 0,
    Handshaking = 1,
    PostHandshakeHook = 2,
    Open = 3,
    Closing = 4,
    Closed = 5,
}

impl Phase {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Phase::Raw,
            1 => Phase::Handshaking,
            2 => Phase::PostHandshakeHook,
            3 => Phase::Open,
            4 => Phase::Closing,
            _ => Phase::Closed,
        }
    }
}

/// Commands sent from a [`TransportHandle`] to its [`ConnectionActor`].
enum Command {
    Write(Bytes),
    WriteEof,
    Close,
    Abort,
    StartTls(oneshot::Sender<Result<()>>),
}

/// Cheaply-cloneable public handle to a running transport. This is what
/// `connection_made` hands to the protocol, and what the connection
/// factory returns.
#[derive(Clone)]
pub struct TransportHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    phase: Arc<AtomicU8>,
    snapshot: Arc<Mutex<ExtraInfoSnapshot>>,
    peer_addr: SocketAddr,
    local_addr: SocketAddr,
}

impl TransportHandle {
    /// Builds a fresh handle/receiver pair. `connect.rs` calls this once
    /// per connection; the resulting `TransportHandle` is cloned into the
    /// protocol, the post-handshake hook, and the factory's return value,
    /// while `cmd_rx` is consumed by the single [`ConnectionActor`].
    pub(crate) fn new_pair(
        peer_addr: SocketAddr,
        local_addr: SocketAddr,
    ) -> (Self, mpsc::UnboundedReceiver<Command>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let handle = Self {
            cmd_tx,
            phase: Arc::new(AtomicU8::new(Phase::Raw as u8)),
            snapshot: Arc::new(Mutex::new(ExtraInfoSnapshot::default())),
            peer_addr,
            local_addr,
        };
        (handle, cmd_rx)
    }

    pub(crate) fn phase_cell(&self) -> Arc<AtomicU8> {
        self.phase.clone()
    }

    pub(crate) fn snapshot_cell(&self) -> Arc<Mutex<ExtraInfoSnapshot>> {
        self.snapshot.clone()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Appends `data` to the outbound queue. See §4.1: the bytes are
    /// encrypted only once `phase == Open`; they sit buffered until then.
    pub fn write(&self, data: impl Into<Bytes>) -> Result<()> {
        match self.phase() {
            Phase::Closing | Phase::Closed => Err(TransportError::ConnectionClosed),
            _ => self
                .cmd_tx
                .send(Command::Write(data.into()))
                .map_err(|_| TransportError::TaskGone),
        }
    }

    /// Half-closes the write direction. Only meaningful before any TLS
    /// engine is installed.
    pub fn write_eof(&self) -> Result<()> {
        if self.phase() != Phase::Raw {
            return Err(TransportError::NotSupported(
                "write_eof() is not supported once TLS is active",
            ));
        }
        self.cmd_tx
            .send(Command::WriteEof)
            .map_err(|_| TransportError::TaskGone)
    }

    /// Idempotent graceful close (§4.1). Fire-and-forget: the actual
    /// teardown happens asynchronously on the connection task.
    pub fn close(&self) {
        let _ = self.cmd_tx.send(Command::Close);
    }

    /// Immediate, lossy teardown.
    pub fn abort(&self) {
        let _ = self.cmd_tx.send(Command::Abort);
    }

    /// Upgrades a `Raw` transport to TLS. Resolves once the handshake and
    /// any post-handshake hook have succeeded (`Open`), or fails with
    /// whatever knocked the connection back to `Closed`.
    pub async fn starttls(&self) -> Result<()> {
        if self.phase() != Phase::Raw {
            return Err(TransportError::InvalidState(
                "starttls() is only valid while the transport is in the Raw phase",
            ));
        }
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::StartTls(tx))
            .map_err(|_| TransportError::TaskGone)?;
        // Dropping this future (cancellation) drops `tx`'s counterpart
        // rx below, but the command has already been sent: the actor
        // still runs the handshake to completion. Per §5, a *cancelled*
        // `starttls()` is specified to abort the connection outright, so
        // callers that cancel are expected to follow up with `abort()`.
        rx.await.map_err(|_| TransportError::TaskGone)?
    }

    /// Synchronous, non-blocking introspection (§4.1, §6).
    pub fn get_extra_info(&self, key: ExtraInfoKey) -> Option<ExtraInfoValue> {
        match key {
            ExtraInfoKey::PeerAddr => Some(ExtraInfoValue::Addr(self.peer_addr)),
            ExtraInfoKey::LocalAddr => Some(ExtraInfoValue::Addr(self.local_addr)),
            ExtraInfoKey::PeerCertificates => self
                .snapshot
                .lock()
                .unwrap()
                .peer_certificates
                .clone()
                .map(ExtraInfoValue::Certificates),
            ExtraInfoKey::NegotiatedCipherSuite => self
                .snapshot
                .lock()
                .unwrap()
                .negotiated_cipher_suite
                .clone()
                .map(ExtraInfoValue::Cipher),
            ExtraInfoKey::AlpnProtocol => self
                .snapshot
                .lock()
                .unwrap()
                .alpn_protocol
                .clone()
                .map(ExtraInfoValue::Alpn),
            ExtraInfoKey::ProtocolVersion => self
                .snapshot
                .lock()
                .unwrap()
                .protocol_version
                .map(ExtraInfoValue::Version),
        }
    }
}

/// Everything a freshly-connected socket needs in order to spin up a
/// [`ConnectionActor`]; kept together so `connect.rs` doesn't need to
/// thread a dozen positional arguments through.
pub struct ActorConfig {
    pub socket: crate::socket::RawSocket,
    pub engine: Option<Engine>,
    pub initial_phase: Phase,
    pub protocol: Box<dyn Protocol>,
    pub handle: TransportHandle,
    pub cmd_rx: mpsc::UnboundedReceiver<Command>,
    pub ssl_context_factory: Option<SslContextFactory>,
    pub server_hostname: Option<String>,
    pub post_hook: Option<PostHookFn>,
    pub boot_waiter: Option<oneshot::Sender<Result<()>>>,
    pub write_high: usize,
    pub write_low: usize,
}

/// Owns the socket, the engine, and both buffers; runs as a Tokio task.
pub struct ConnectionActor {
    socket: crate::socket::RawSocket,
    engine: Option<Engine>,
    phase_local: Phase,
    phase_shared: Arc<AtomicU8>,
    snapshot: Arc<Mutex<ExtraInfoSnapshot>>,

    tx_app: AppQueue,
    tx_wire: WireQueue,
    rx_wire: BytesMut,
    watermarks: Watermarks,

    paused_reading: bool,
    write_eof_pending: bool,

    starttls_waiter: Option<oneshot::Sender<Result<()>>>,
    ssl_context_factory: Option<SslContextFactory>,
    server_hostname: Option<String>,

    post_hook: Option<PostHookFn>,
    hook_task: Option<JoinHandle<std::result::Result<(), HookError>>>,

    protocol: Box<dyn Protocol>,
    handle: TransportHandle,
    connection_made_fired: bool,
    close_reason: Option<TransportError>,

    cmd_rx: mpsc::UnboundedReceiver<Command>,
}

impl ConnectionActor {
    pub(crate) fn new(cfg: ActorConfig) -> Self {
        cfg.handle
            .phase_cell()
            .store(cfg.initial_phase as u8, Ordering::Release);
        Self {
            phase_shared: cfg.handle.phase_cell(),
            snapshot: cfg.handle.snapshot_cell(),
            socket: cfg.socket,
            engine: cfg.engine,
            phase_local: cfg.initial_phase,
            tx_app: AppQueue::default(),
            tx_wire: WireQueue::default(),
            rx_wire: BytesMut::new(),
            watermarks: Watermarks::new(cfg.write_high, cfg.write_low),
            paused_reading: false,
            write_eof_pending: false,
            starttls_waiter: cfg.boot_waiter,
            ssl_context_factory: cfg.ssl_context_factory,
            server_hostname: cfg.server_hostname,
            post_hook: cfg.post_hook,
            hook_task: None,
            protocol: cfg.protocol,
            handle: cfg.handle,
            connection_made_fired: false,
            close_reason: None,
            cmd_rx: cfg.cmd_rx,
        }
    }

    fn set_phase(&mut self, p: Phase) {
        tracing::debug!(from = ?self.phase_local, to = ?p, "transport phase transition");
        self.phase_local = p;
        self.phase_shared.store(p as u8, Ordering::Release);
    }

    fn fail_starttls_waiter(&mut self, e: TransportError) {
        if let Some(tx) = self.starttls_waiter.take() {
            let _ = tx.send(Err(e));
        }
    }

    /// Tears the connection down unconditionally: aborts any in-flight
    /// hook and waits for it to actually unwind, fails any waiter, discards
    /// both buffers (invariant 1), resets the socket and records
    /// `close_reason`. Used for every fatal path and for `abort()`.
    ///
    /// Awaiting the aborted `hook_task` (rather than just requesting the
    /// abort and moving on) is what gives P4: the hook must observe
    /// cancellation before `connection_lost` is dispatched by `finish()`,
    /// and `finish()` only runs once `run()`'s loop exits with `phase_local
    /// == Closed`, which happens after this function returns.
    async fn force_close(&mut self, reason: Option<TransportError>) {
        if self.phase_local == Phase::Closed {
            return;
        }
        if let Some(h) = self.hook_task.take() {
            h.abort();
            let _ = h.await;
        }
        if let Some(e) = &reason {
            tracing::warn!(error = %e, "transport closing with error");
            self.fail_starttls_waiter(e.clone());
        }
        self.close_reason = reason;
        self.tx_app = AppQueue::default();
        self.tx_wire = WireQueue::default();
        self.socket.abort();
        self.set_phase(Phase::Closed);
    }

    fn update_watermarks(&mut self) {
        let total = self.tx_app.len() + self.tx_wire.len();
        match self.watermarks.update(total) {
            Some(true) => self.protocol.pause_writing(),
            Some(false) => self.protocol.resume_writing(),
            None => {}
        }
    }

    fn update_snapshot_after_handshake(&mut self) {
        if let Some(engine) = &self.engine {
            let mut snap = self.snapshot.lock().unwrap();
            snap.peer_certificates = engine.peer_certificates();
            snap.negotiated_cipher_suite = engine.negotiated_cipher_suite();
            snap.alpn_protocol = engine.alpn_protocol();
            snap.protocol_version = engine.protocol_version();
        }
    }

    // ---- command handling -------------------------------------------------

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Write(data) => {
                self.do_write(data).await;
                self.maybe_finish_write_eof().await;
            }
            Command::WriteEof => {
                if self.phase_local == Phase::Raw {
                    self.write_eof_pending = true;
                    self.maybe_finish_write_eof().await;
                }
            }
            Command::Close => self.do_close().await,
            Command::Abort => self.force_close(Some(TransportError::ConnectionAborted)).await,
            Command::StartTls(tx) => self.do_starttls(tx).await,
        }
    }

    async fn do_write(&mut self, data: Bytes) {
        match self.phase_local {
            Phase::Closing | Phase::Closed => {}
            Phase::Raw => {
                self.tx_wire.extend(&data);
                self.update_watermarks();
            }
            Phase::Handshaking | Phase::PostHandshakeHook => {
                self.tx_app.push(data);
                self.update_watermarks();
            }
            Phase::Open => {
                self.tx_app.push(data);
                self.update_watermarks();
                self.tx_drive().await;
            }
        }
    }

    async fn maybe_finish_write_eof(&mut self) {
        if self.write_eof_pending && self.tx_wire.is_empty() {
            self.write_eof_pending = false;
            let _ = self.socket.close().await;
        }
    }

    async fn do_close(&mut self) {
        match self.phase_local {
            Phase::Closing | Phase::Closed => {}
            Phase::Handshaking | Phase::PostHandshakeHook => {
                self.force_close(Some(TransportError::ConnectionAborted)).await;
            }
            Phase::Raw => {
                let _ = self.socket.close().await;
                self.close_reason = None;
                self.set_phase(Phase::Closed);
            }
            Phase::Open => {
                if let Some(engine) = self.engine.as_mut() {
                    engine.shutdown();
                    let mut out = BytesMut::new();
                    if engine.extract_ciphertext(&mut out).is_ok() && !out.is_empty() {
                        self.tx_wire.extend(&out);
                    }
                }
                self.set_phase(Phase::Closing);
                self.maybe_finish_closing().await;
            }
        }
    }

    async fn maybe_finish_closing(&mut self) {
        if self.phase_local == Phase::Closing && self.tx_wire.is_empty() {
            let _ = self.socket.close().await;
            self.close_reason = None;
            self.set_phase(Phase::Closed);
        }
    }

    async fn do_starttls(&mut self, tx: oneshot::Sender<Result<()>>) {
        if self.phase_local != Phase::Raw {
            let _ = tx.send(Err(TransportError::InvalidState(
                "starttls() is only valid while the transport is in the Raw phase",
            )));
            return;
        }
        let factory = match self.ssl_context_factory.clone() {
            Some(f) => f,
            None => {
                let _ = tx.send(Err(TransportError::InvalidState(
                    "no ssl_context_factory was configured for this transport",
                )));
                return;
            }
        };
        let cfg = factory(&self.handle);
        let engine = match Engine::from_config(cfg, self.server_hostname.as_deref()) {
            Ok(e) => e,
            Err(e) => {
                let _ = tx.send(Err(e));
                return;
            }
        };
        self.engine = Some(engine);
        self.starttls_waiter = Some(tx);
        self.set_phase(Phase::Handshaking);
        self.drive_handshake().await;
    }

    // ---- handshake (§4.2) --------------------------------------------------

    async fn drive_handshake(&mut self) {
        loop {
            if !self.rx_wire.is_empty() {
                let engine = self.engine.as_mut().expect("engine present while handshaking");
                if let Err(e) = engine.inject_ciphertext(&mut self.rx_wire) {
                    self.force_close(Some(e)).await;
                    return;
                }
            }

            let status = self.engine.as_mut().unwrap().step_handshake();

            let mut out = BytesMut::new();
            match self.engine.as_mut().unwrap().extract_ciphertext(&mut out) {
                Ok(_) => {
                    if !out.is_empty() {
                        self.tx_wire.extend(&out);
                    }
                }
                Err(e) => {
                    self.force_close(Some(e)).await;
                    return;
                }
            }

            if let EngineStatus::Fatal(e) = status {
                self.force_close(Some(e)).await;
                return;
            }

            // Completion is read off the engine's own handshake-in-progress
            // flag rather than `EngineStatus::Ok`: rustls still reports
            // `wants_read() == true` on the very call that finishes the
            // handshake (no app plaintext buffered yet), so `step_handshake`
            // can return `WantRead` on the call that actually completes it.
            if !self.engine.as_ref().unwrap().is_handshaking() {
                if self.phase_local == Phase::Handshaking {
                    self.enter_post_handshake_hook().await;
                }
                return;
            }

            match status {
                EngineStatus::WantRead => {
                    if !self.rx_wire.is_empty() {
                        continue;
                    }
                    return;
                }
                EngineStatus::WantWrite | EngineStatus::Ok => return,
                EngineStatus::Fatal(_) | EngineStatus::Eof => unreachable!("handled above"),
            }
        }
    }

    async fn enter_post_handshake_hook(&mut self) {
        self.set_phase(Phase::PostHandshakeHook);
        self.update_snapshot_after_handshake();
        match self.post_hook.clone() {
            Some(hook) => {
                let handle = self.handle.clone();
                self.hook_task = Some(tokio::spawn(async move { hook(handle).await }));
            }
            None => self.complete_handshake_success().await,
        }
    }

    async fn on_hook_done(&mut self, res: std::result::Result<std::result::Result<(), HookError>, tokio::task::JoinError>) {
        self.hook_task = None;
        match res {
            Ok(Ok(())) => self.complete_handshake_success().await,
            Ok(Err(e)) => self.force_close(Some(TransportError::Hook(e))).await,
            Err(join_err) if join_err.is_cancelled() => {
                self.force_close(Some(TransportError::ConnectionAborted)).await
            }
            Err(join_err) => {
                self.force_close(Some(TransportError::Hook(Arc::new(io::Error::other(join_err.to_string())))))
                    .await
            }
        }
    }

    async fn complete_handshake_success(&mut self) {
        self.set_phase(Phase::Open);
        self.update_snapshot_after_handshake();
        if let Some(tx) = self.starttls_waiter.take() {
            let _ = tx.send(Ok(()));
        }
        if !self.connection_made_fired {
            self.connection_made_fired = true;
            self.protocol.connection_made(self.handle.clone());
        }
        self.tx_drive().await;
    }

    // ---- write path (§4.4) -------------------------------------------------

    async fn tx_drive(&mut self) {
        if self.phase_local != Phase::Open {
            return;
        }
        let mut fatal = None;
        loop {
            let engine = self.engine.as_mut().expect("engine present while Open");
            if engine.is_handshaking() || self.tx_app.is_empty() {
                break;
            }
            let mut consumed = 0usize;
            self.tx_app.drain_into(WRITE_CHUNK, |chunk| match engine.write_app(chunk) {
                Ok(n) => {
                    consumed += n;
                    n
                }
                Err(e) => {
                    fatal = Some(e);
                    0
                }
            });
            if fatal.is_some() {
                break;
            }
            let mut out = BytesMut::new();
            if let Err(e) = engine.extract_ciphertext(&mut out) {
                fatal = Some(e);
                break;
            }
            if !out.is_empty() {
                self.tx_wire.extend(&out);
            }
            if consumed == 0 {
                break;
            }
        }
        self.update_watermarks();
        if let Some(e) = fatal {
            self.force_close(Some(e)).await;
        }
    }

    // ---- read path (§4.3) --------------------------------------------------

    async fn rx_drive_open(&mut self) {
        loop {
            let mut progressed = false;
            if !self.rx_wire.is_empty() {
                let engine = self.engine.as_mut().expect("engine present while Open");
                match engine.inject_ciphertext(&mut self.rx_wire) {
                    Ok(n) => progressed |= n > 0,
                    Err(e) => {
                        self.force_close(Some(e)).await;
                        return;
                    }
                }
            }

            let status = self.engine.as_mut().unwrap().step_handshake();
            if let EngineStatus::Fatal(e) = status {
                self.force_close(Some(e)).await;
                return;
            }

            let mut out = BytesMut::new();
            match self.engine.as_mut().unwrap().extract_ciphertext(&mut out) {
                Ok(n) => {
                    if n > 0 {
                        self.tx_wire.extend(&out);
                        progressed = true;
                    }
                }
                Err(e) => {
                    self.force_close(Some(e)).await;
                    return;
                }
            }

            let mut plain = BytesMut::new();
            let read_status = self.engine.as_mut().unwrap().read_app(&mut plain);
            if !plain.is_empty() {
                progressed = true;
                self.protocol.data_received(plain.freeze());
            }
            match read_status {
                EngineStatus::Fatal(e) => {
                    self.force_close(Some(e)).await;
                    return;
                }
                EngineStatus::Eof => {
                    self.on_clean_peer_shutdown().await;
                    return;
                }
                _ => {}
            }

            if !progressed {
                break;
            }
        }
    }

    async fn on_clean_peer_shutdown(&mut self) {
        self.paused_reading = true;
        let keep_open = self.protocol.eof_received();
        if !keep_open {
            self.force_close(None).await;
        }
    }

    async fn on_peer_eof(&mut self) {
        match self.phase_local {
            Phase::Raw => {
                self.paused_reading = true;
                let keep_open = self.protocol.eof_received();
                if !keep_open {
                    self.force_close(None).await;
                }
            }
            Phase::Handshaking | Phase::PostHandshakeHook => {
                self.force_close(Some(TransportError::ConnectionReset)).await;
            }
            Phase::Open => {
                // A socket-level EOF that didn't go through a decrypted
                // close-notify (`EngineStatus::Eof` from `read_app`) is
                // treated as a reset — see the resolved open question in
                // the design notes.
                self.force_close(Some(TransportError::ConnectionReset)).await;
            }
            Phase::Closing | Phase::Closed => {}
        }
    }

    async fn on_readable(&mut self) {
        let mut buf = [0u8; READ_CHUNK];
        match self.socket.try_read(&mut buf) {
            Ok(0) => self.on_peer_eof().await,
            Ok(n) => match self.phase_local {
                Phase::Raw => {
                    self.protocol.data_received(Bytes::copy_from_slice(&buf[..n]));
                }
                Phase::Handshaking | Phase::PostHandshakeHook => {
                    self.rx_wire.extend_from_slice(&buf[..n]);
                    self.drive_handshake().await;
                }
                Phase::Open => {
                    self.rx_wire.extend_from_slice(&buf[..n]);
                    self.rx_drive_open().await;
                }
                Phase::Closing | Phase::Closed => {}
            },
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => self.force_close(Some(e.into())).await,
        }
    }

    async fn on_writable(&mut self) {
        if self.tx_wire.is_empty() {
            return;
        }
        match self.socket.try_write(self.tx_wire.as_slice()) {
            Ok(n) => {
                self.tx_wire.consume(n);
                self.update_watermarks();
                self.maybe_finish_closing().await;
                self.maybe_finish_write_eof().await;
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => self.force_close(Some(e.into())).await,
        }
    }

    // ---- main loop ----------------------------------------------------------

    pub async fn run(mut self) {
        if self.phase_local == Phase::Raw {
            self.connection_made_fired = true;
            self.protocol.connection_made(self.handle.clone());
        } else {
            self.drive_handshake().await;
        }

        while self.phase_local != Phase::Closed {
            let want_write = !self.tx_wire.is_empty();
            let hook_running = self.hook_task.is_some();
            tokio::select! {
                biased;

                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => self.force_close(Some(TransportError::ConnectionAborted)).await,
                    }
                }

                res = async { self.hook_task.as_mut().unwrap().await }, if hook_running => {
                    self.on_hook_done(res).await;
                }

                res = self.socket.writable(), if want_write => {
                    match res {
                        Ok(()) => self.on_writable().await,
                        Err(e) => self.force_close(Some(e.into())).await,
                    }
                }

                res = self.socket.readable(), if !self.paused_reading => {
                    match res {
                        Ok(()) => self.on_readable().await,
                        Err(e) => self.force_close(Some(e.into())).await,
                    }
                }
            }
        }

        self.finish();
    }

    fn finish(mut self) {
        if self.connection_made_fired {
            let reason = self.close_reason.take();
            self.protocol.connection_lost(reason);
        }
    }
}
