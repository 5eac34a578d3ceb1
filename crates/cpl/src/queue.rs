//! 🧵 The queue — where pending operations wait for their ride.
//!
//! 🎬 *[a block joins the queue. the queue grows. a ticker ticks somewhere.]*
//! *[the flusher arrives. the whole queue leaves at once. carpooling.]*
//!
//! 🧠 Knowledge graph (read this before touching anything):
//! - **Block**: one serialized operation + its one-shot result slot. The
//!   oneshot sender IS the "single-slot, pre-reserved delivery channel":
//!   sending never blocks, and the type system forbids a second delivery.
//! - **Queue**: per-kind accumulator. Producers push under a mutex; the one
//!   flusher task per kind drains by swapping the whole state out with
//!   [`std::mem::take`]. After the swap, the caller-visible queue is empty
//!   and new blocks land on it concurrently with the in-flight flush.
//! - **Ordering**: block `i` of a drained batch corresponds to response item
//!   `i`. The `Vec` preserves push order; the flush walks it once to build
//!   the payload and once to distribute. That's the entire matching scheme.
//!   `seq` is for diagnostics only — it never participates in matching.
//!
//! ⚠️ Exactly one flusher per kind drains a queue. Two would need an MPMC
//! dequeue and a different design. Do not "just add another worker". 🦆

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Notify, oneshot};

use crate::error::BulkError;

/// 🎯 One queued operation: its serialized request fragment and the slot its
/// result will be delivered into.
///
/// The payload buffer is pool-recycled; ownership rides along with the block
/// through the queue into the flush, and the buffer goes back to the pool
/// once the combined payload has been assembled from it.
#[derive(Debug)]
pub(crate) struct Block<T> {
    /// 🔢 Enqueue sequence number. Diagnostics and log correlation only —
    /// response matching is positional, never seq-based.
    pub seq: u64,
    /// 📦 The serialized per-item request fragment.
    pub buf: Vec<u8>,
    /// ✉️ The pre-reserved delivery slot. Consumed by exactly one send.
    pub tx: oneshot::Sender<Delivery<T>>,
}

/// ✉️ What lands on a caller's handle: exactly one of these, ever.
#[derive(Debug)]
pub struct Delivery<T> {
    /// 🔢 The originating block's sequence number, for log correlation.
    pub seq: u64,
    /// 🎯 The per-item result: a parsed response item, or the error that
    /// claimed it (per-item or whole-flush, see [`BulkError`]).
    pub result: Result<T, BulkError>,
}

/// 🔖 The batching classes. Different kinds never share a combined call,
/// because the refresh option applies to the whole call, not per item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// 📖 Plain reads → one combined `_mget`.
    Read,
    /// 📖🔄 Reads that need just-written data visible → `_mget?refresh=true`.
    ReadRefresh,
    /// 📝 Writes → one combined `_bulk`.
    Write,
    /// 📝🔄 Writes that must be visible on return → `_bulk?refresh=true`.
    WriteRefresh,
}

impl QueueKind {
    /// 🔄 Does this kind carry the refresh option on its combined call?
    pub fn refresh(self) -> bool {
        matches!(self, QueueKind::ReadRefresh | QueueKind::WriteRefresh)
    }

    /// 🔖 Stable label for logs and metrics.
    pub fn label(self) -> &'static str {
        match self {
            QueueKind::Read => "read",
            QueueKind::ReadRefresh => "read-refresh",
            QueueKind::Write => "write",
            QueueKind::WriteRefresh => "write-refresh",
        }
    }
}

/// 📦 The swap-able part of a queue. [`std::mem::take`] of this struct under
/// the lock IS the drain-and-swap primitive the whole design leans on.
#[derive(Debug)]
struct QueueState<T> {
    blocks: Vec<Block<T>>,
    pending_bytes: usize,
}

impl<T> Default for QueueState<T> {
    fn default() -> Self {
        Self {
            blocks: Vec::new(),
            pending_bytes: 0,
        }
    }
}

/// 🧵 A per-kind accumulator of pending blocks.
///
/// Producers (`push`) and the consumer (`drain`) only ever meet at the mutex
/// around [`QueueState`]. The doorbell is rung when pending work crosses the
/// size or count threshold, so the flusher doesn't have to wait out its
/// ticker when a burst comes in.
#[derive(Debug)]
pub(crate) struct Queue<T> {
    kind: QueueKind,
    state: Mutex<QueueState<T>>,
    doorbell: Notify,
    /// 🔔 Ring when pending bytes reach this.
    threshold_bytes: usize,
    /// 🔔 Ring when the queued block count reaches this.
    max_pending: usize,
    /// 🔢 Monotonic, never reset by a drain. Diagnostics only.
    seq: AtomicU64,
}

impl<T> Queue<T> {
    pub(crate) fn new(kind: QueueKind, threshold_bytes: usize, max_pending: usize) -> Self {
        Self {
            kind,
            state: Mutex::new(QueueState::default()),
            doorbell: Notify::new(),
            threshold_bytes,
            max_pending,
            seq: AtomicU64::new(0),
        }
    }

    pub(crate) fn kind(&self) -> QueueKind {
        self.kind
    }

    /// 🔔 The flusher parks on this between ticks.
    pub(crate) fn doorbell(&self) -> &Notify {
        &self.doorbell
    }

    /// 🎯 Enqueue one serialized fragment; hand back the receiving half of
    /// its delivery slot.
    ///
    /// The oneshot pair is created *here*, before the block can be seen by
    /// any flush — the slot exists before the block enters the queue, which
    /// is what lets the flush side send without ever blocking.
    pub(crate) fn push(&self, buf: Vec<u8>) -> oneshot::Receiver<Delivery<T>> {
        let (tx, rx) = oneshot::channel();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);

        let ring = {
            let mut state = self.state.lock().expect("queue mutex poisoned");
            state.pending_bytes += buf.len();
            state.blocks.push(Block { seq, buf, tx });
            state.pending_bytes >= self.threshold_bytes || state.blocks.len() >= self.max_pending
        };
        // 🔔 Ring outside the lock. The flusher will drain whatever is there
        // by the time it wakes; over-ringing is harmless, under-ringing is a bug.
        if ring {
            self.doorbell.notify_one();
        }
        rx
    }

    /// 🔄 Drain-and-swap: take exclusive ownership of everything queued so
    /// far and leave a fresh empty state behind, atomically.
    ///
    /// From the moment the lock drops, new pushes land on the empty state and
    /// belong to the *next* flush. The returned batch is exclusively ours —
    /// no lock is held while the flush works through it.
    pub(crate) fn drain(&self) -> Drained<T> {
        let state = {
            let mut state = self.state.lock().expect("queue mutex poisoned");
            std::mem::take(&mut *state)
        };
        Drained {
            kind: self.kind,
            blocks: state.blocks,
            pending_bytes: state.pending_bytes,
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.state.lock().expect("queue mutex poisoned").blocks.len()
    }
}

/// 📦 One drained batch: the flusher's exclusive property from swap to
/// delivery. Blocks are consumed by value during distribution, so a block
/// cannot be touched after its result has been sent.
#[derive(Debug)]
pub(crate) struct Drained<T> {
    pub kind: QueueKind,
    pub blocks: Vec<Block<T>>,
    pub pending_bytes: usize,
}
