//! A Tokio transport bridging a non-blocking TCP socket with a memory-BIO
//! [**Rustls**] engine, adding STARTTLS (deferred handshake), transparent
//! mid-session renegotiation, and a cancellable post-handshake hook on top.
//!
//! The transport itself never blocks the connection's task on the TLS
//! engine or the socket: both are driven through explicit non-blocking
//! steps (`engine`, `socket`) orchestrated by a single `select!` loop
//! (`transport`). The `Protocol` trait is the user-facing surface — akin to
//! asyncio's `Protocol`, but delivered as plain synchronous callbacks from
//! one Tokio task per connection rather than event-loop callbacks.
//!
//! ```no_run
//! use bytes::Bytes;
//! use starttls_transport::{
//!     create_starttls_connection, EngineConfig, Protocol, StartTlsOptions, TransportError,
//!     TransportHandle,
//! };
//!
//! struct Echo;
//!
//! impl Protocol for Echo {
//!     fn data_received(&mut self, data: Bytes) {
//!         // echo back verbatim
//!     }
//!
//!     fn connection_lost(&mut self, _err: Option<TransportError>) {}
//! }
//!
//! # async fn run(client_config: std::sync::Arc<rustls::ClientConfig>) -> starttls_transport::Result<()> {
//! let options = StartTlsOptions::new("example.com", 443, move |_: &TransportHandle| {
//!     EngineConfig::Client(client_config.clone())
//! })
//! .use_starttls(false);
//!
//! let (_handle, join) = create_starttls_connection(|| Echo, options).await?;
//! join.await.ok();
//! # Ok(())
//! # }
//! ```

mod buffers;
mod connect;
mod engine;
mod error;
mod extra_info;
mod protocol;
mod socket;
mod transport;

pub use rustls;

pub use connect::{create_starttls_connection, starttls_over_stream, AcceptTlsOptions, StartTlsOptions};
pub use engine::EngineConfig;
pub use error::{Result, TransportError};
pub use extra_info::{ExtraInfoKey, ExtraInfoValue};
pub use protocol::Protocol;
pub use transport::{HookFuture, TransportHandle};
