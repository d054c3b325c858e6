//! Flow-controlled buffers: `AppQueue` (outbound plaintext awaiting
//! encryption) and `WireQueue` (outbound ciphertext awaiting a socket
//! write). Keeping these two distinct, rather than a single pipe carrying
//! both ciphertext and plaintext, is what lets the transport core gate
//! `tx_app -> engine` strictly on `phase == Open` (invariant 2 in the
//! design).

use std::collections::VecDeque;

use bytes::{Buf, Bytes, BytesMut};

/// Default high watermark: `pause_writing` fires once
/// `tx_app.len() + tx_wire.len()` reaches this.
pub const DEFAULT_WRITE_HIGH: usize = 64 * 1024;
/// Default low watermark: `resume_writing` fires once the combined length
/// drops back below this.
pub const DEFAULT_WRITE_LOW: usize = 16 * 1024;

/// Ordered queue of user bytes awaiting encryption. A `VecDeque<Bytes>`
/// rather than one contiguous buffer, so large writes aren't copied twice.
#[derive(Default)]
pub struct AppQueue {
    chunks: VecDeque<Bytes>,
    len: usize,
}

impl AppQueue {
    pub fn push(&mut self, data: Bytes) {
        if data.is_empty() {
            return;
        }
        self.len += data.len();
        self.chunks.push_back(data);
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Remove up to `max` bytes from the front, in FIFO order, calling
    /// `sink` once per contiguous chunk. Stops as soon as `sink` signals it
    /// couldn't take any more (returns 0 for a non-empty slice).
    pub fn drain_into(&mut self, max: usize, mut sink: impl FnMut(&[u8]) -> usize) {
        let mut budget = max;
        while budget > 0 {
            let Some(front) = self.chunks.front_mut() else { break };
            let take = front.len().min(budget);
            let n = sink(&front[..take]);
            if n == 0 {
                break;
            }
            front.advance(n);
            self.len -= n;
            budget -= n;
            if front.is_empty() {
                self.chunks.pop_front();
            }
            if n < take {
                break;
            }
        }
    }
}

/// Ordered byte buffer of ciphertext awaiting a socket write. Contiguous,
/// since the socket write path needs a single slice to hand to `write()`.
#[derive(Default)]
pub struct WireQueue {
    buf: BytesMut,
}

impl WireQueue {
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn consume(&mut self, n: usize) {
        self.buf.advance(n);
    }
}

/// Hysteresis tracker for §4.5: fires `pause_writing` at most once per
/// upward crossing of `high`, and `resume_writing` at most once per
/// downward crossing of `low`.
pub struct Watermarks {
    pub high: usize,
    pub low: usize,
    paused: bool,
}

impl Watermarks {
    pub fn new(high: usize, low: usize) -> Self {
        Self { high, low, paused: false }
    }

    /// Returns `Some(true)` if writing should now be paused, `Some(false)`
    /// if it should now resume, `None` if nothing changed.
    pub fn update(&mut self, combined_len: usize) -> Option<bool> {
        if !self.paused && combined_len >= self.high {
            self.paused = true;
            Some(true)
        } else if self.paused && combined_len < self.low {
            self.paused = false;
            Some(false)
        } else {
            None
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }
}

impl Default for Watermarks {
    fn default() -> Self {
        Self::new(DEFAULT_WRITE_HIGH, DEFAULT_WRITE_LOW)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_queue_preserves_fifo_order_across_chunks() {
        let mut q = AppQueue::default();
        q.push(Bytes::from_static(b"foo"));
        q.push(Bytes::from_static(b"bar"));
        let mut out = Vec::new();
        q.drain_into(usize::MAX, |chunk| {
            out.extend_from_slice(chunk);
            chunk.len()
        });
        assert_eq!(out, b"foobar");
        assert!(q.is_empty());
    }

    #[test]
    fn app_queue_partial_drain_keeps_remainder_in_order() {
        let mut q = AppQueue::default();
        q.push(Bytes::from_static(b"hello"));
        q.push(Bytes::from_static(b"world"));
        let mut out = Vec::new();
        q.drain_into(3, |chunk| {
            out.extend_from_slice(chunk);
            chunk.len()
        });
        assert_eq!(out, b"hel");
        assert_eq!(q.len(), 7);
        out.clear();
        q.drain_into(usize::MAX, |chunk| {
            out.extend_from_slice(chunk);
            chunk.len()
        });
        assert_eq!(out, b"loworld");
    }

    #[test]
    fn watermarks_fire_once_per_crossing() {
        let mut w = Watermarks::new(100, 20);
        assert_eq!(w.update(50), None);
        assert_eq!(w.update(100), Some(true));
        assert_eq!(w.update(150), None); // already paused
        assert_eq!(w.update(30), None); // above low, still paused
        assert_eq!(w.update(19), Some(false));
        assert_eq!(w.update(10), None); // already resumed
    }
}
