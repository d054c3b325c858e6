//! User-protocol facade (§6): the outward-facing contract the transport
//! calls into, expressed as plain synchronous callbacks rather than a
//! second byte pipe, since the host protocol is not itself buffer-shaped.

use bytes::Bytes;

use crate::error::TransportError;
use crate::TransportHandle;

/// Implemented by the user's protocol. All methods are invoked
/// synchronously from the connection's task — implementations must not
/// block, and must not retain borrowed references to transport-internal
/// state.
pub trait Protocol: Send + 'static {
    /// Called once, immediately after socket connect (STARTTLS mode) or
    /// immediately after the transport first reaches `Open` (immediate-TLS
    /// mode).
    fn connection_made(&mut self, _transport: TransportHandle) {}

    /// Called for each chunk of decrypted application data, in `Open`,
    /// in peer order.
    fn data_received(&mut self, data: Bytes);

    /// Called at most once, when the peer has cleanly shut down the TLS
    /// session (close-notify received). Returning `true` leaves the write
    /// side open for a final flush; `false` aborts it too.
    fn eof_received(&mut self) -> bool {
        false
    }

    /// Backpressure notifications; calls always strictly alternate.
    fn pause_writing(&mut self) {}
    fn resume_writing(&mut self) {}

    /// Called exactly once, when the transport is finished. `None` means
    /// a clean shutdown; `Some(err)` carries the reason (§7).
    fn connection_lost(&mut self, err: Option<TransportError>);
}
