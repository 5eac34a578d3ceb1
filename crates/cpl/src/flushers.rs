//! 🧵 The flushers: the ones who actually drive the carpool to the cluster
//! while the Bulker takes all the credit in the sprint retro.
//!
//! One flusher task per queue kind, no exceptions — the drain-and-swap
//! discipline assumes a single consumer per queue. Each flusher parks on
//! two wake sources:
//! - ⏰ a ticker, so quiet queues still flush on a cadence
//! - 🔔 the queue's doorbell, rung when pending work crosses a threshold
//!
//! On shutdown (the channel closes), a flusher performs one final drain so
//! nothing queued is ever simply dropped, then clocks out. 🦆

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_channel::Receiver;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::backend::BackendHandle;
use crate::flush::bulk::flush_bulk;
use crate::flush::read::flush_read;
use crate::pool::BufPool;
use crate::queue::Queue;
use crate::wire::{BulkItem, MgetItem};

/// 🏗️ A background worker, that does work. duh.
///
/// Returns a `JoinHandle` because we trust but verify. Mostly verify.
/// Okay, we don't trust at all.
pub(crate) trait Worker {
    fn start(self) -> JoinHandle<Result<()>>;
}

/// 📖 Drains one read queue into combined `_mget` calls, forever (or until
/// the shutdown channel closes, whichever comes first — it's the shutdown).
#[derive(Debug)]
pub(crate) struct ReadFlusher {
    pub queue: Arc<Queue<MgetItem>>,
    pub backend: Arc<BackendHandle>,
    pub pool: Arc<BufPool>,
    pub interval: Duration,
    pub shutdown: Receiver<()>,
}

impl Worker for ReadFlusher {
    fn start(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            let kind = self.queue.kind();
            let mut ticker = tokio::time::interval(self.interval);
            // ⏰ If a flush overruns the cadence, don't machine-gun catch-up
            // ticks at the backend afterwards.
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(kind = kind.label(), "🧵 read flusher on duty");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = self.queue.doorbell().notified() => {}
                    _ = self.shutdown.recv() => {
                        // 🏁 Final drain: whatever is queued rides one last truck.
                        let drained = self.queue.drain();
                        let cnt = drained.blocks.len();
                        if let Err(err) = flush_read(&self.backend, &self.pool, drained).await {
                            warn!(kind = kind.label(), error = %err, "💀 final read flush failed; errors delivered");
                        }
                        debug!(kind = kind.label(), cnt, "🏁 read flusher clocking out");
                        return Ok(());
                    }
                }
                let drained = self.queue.drain();
                if drained.blocks.is_empty() {
                    continue;
                }
                // 💀 A failed flush already delivered its error to every
                // drained caller; log it and keep the loop alive for the
                // next batch. No internal retry — that's a policy layer's job.
                if let Err(err) = flush_read(&self.backend, &self.pool, drained).await {
                    warn!(kind = kind.label(), error = %err, "💀 read flush failed; errors delivered to all waiting callers");
                }
            }
        })
    }
}

/// 📝 Same loop, write flavor: drains one write queue into combined `_bulk`
/// calls. Kept as its own type rather than generics gymnastics: the day the
/// two loops diverge (and they will), they won't take each other down.
#[derive(Debug)]
pub(crate) struct WriteFlusher {
    pub queue: Arc<Queue<BulkItem>>,
    pub backend: Arc<BackendHandle>,
    pub pool: Arc<BufPool>,
    pub interval: Duration,
    pub shutdown: Receiver<()>,
}

impl Worker for WriteFlusher {
    fn start(self) -> JoinHandle<Result<()>> {
        tokio::spawn(async move {
            let kind = self.queue.kind();
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(kind = kind.label(), "🧵 write flusher on duty");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = self.queue.doorbell().notified() => {}
                    _ = self.shutdown.recv() => {
                        let drained = self.queue.drain();
                        let cnt = drained.blocks.len();
                        if let Err(err) = flush_bulk(&self.backend, &self.pool, drained).await {
                            warn!(kind = kind.label(), error = %err, "💀 final write flush failed; errors delivered");
                        }
                        debug!(kind = kind.label(), cnt, "🏁 write flusher clocking out");
                        return Ok(());
                    }
                }
                let drained = self.queue.drain();
                if drained.blocks.is_empty() {
                    continue;
                }
                if let Err(err) = flush_bulk(&self.backend, &self.pool, drained).await {
                    warn!(kind = kind.label(), error = %err, "💀 write flush failed; errors delivered to all waiting callers");
                }
            }
        })
    }
}
