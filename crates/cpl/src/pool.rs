//! 📦 The buffer pool — where payload buffers go between rides.
//!
//! Every submitted operation serializes its request fragment into a `Vec<u8>`
//! taken from here. Ownership then travels from the Bulker through the queue
//! into the flush, and
//! the buffer comes home only after the combined payload has been fully
//! assembled from it. No buffer is ever read by two stages at once; the move
//! semantics are the whole safety argument. 🦆

use std::sync::Mutex;

use crate::wire::SLOP;

/// 📦 A mutex-guarded stack of recycled payload buffers.
///
/// `take` pops a warm buffer or allocates a cold one with [`SLOP`] headroom.
/// `put` clears and restocks, unless the buffer ballooned past the retention
/// cap — oversized buffers get dropped rather than hoarded.
#[derive(Debug)]
pub(crate) struct BufPool {
    bufs: Mutex<Vec<Vec<u8>>>,
    /// 🔧 Buffers whose capacity outgrew this never come back. The pool is a
    /// parking lot, not a bus depot.
    retention_bytes: usize,
}

impl BufPool {
    pub(crate) fn new(retention_bytes: usize) -> Self {
        Self {
            bufs: Mutex::new(Vec::new()),
            retention_bytes,
        }
    }

    /// 🎯 Grab a buffer: recycled if available, freshly allocated otherwise.
    pub(crate) fn take(&self) -> Vec<u8> {
        let mut bufs = self.bufs.lock().expect("buffer pool mutex poisoned");
        bufs.pop().unwrap_or_else(|| Vec::with_capacity(SLOP))
    }

    /// 🔄 Return a buffer. Contents are cleared; capacity is kept (that's the
    /// entire point) unless it grew past the retention cap.
    pub(crate) fn put(&self, mut buf: Vec<u8>) {
        if buf.capacity() > self.retention_bytes {
            return;
        }
        buf.clear();
        let mut bufs = self.bufs.lock().expect("buffer pool mutex poisoned");
        bufs.push(buf);
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.bufs.lock().expect("buffer pool mutex poisoned").len()
    }
}
