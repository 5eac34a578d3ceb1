//! 🚗 The Bulker — the one who organizes the carpool.
//!
//! 🎬 COLD OPEN — INT. SERVICE PROCESS — 3:47 AM
//!
//! A thousand independent tasks each want one document. A thousand network
//! round trips would be a thousand bad decisions. The Bulker takes each
//! request at the door, serializes it into a pooled buffer, seats it in the
//! queue for its kind, and hands the caller a one-shot handle. The flushers
//! do the driving. The caller just waits for their stop.
//!
//! 🧠 Knowledge graph:
//! - `submit` never performs network I/O. It serializes, enqueues, returns.
//!   Caller latency is decoupled from backend round-trip scheduling — the
//!   caller's only suspension point is awaiting their own handle.
//! - Four queues, four flushers: read / read-refresh / write / write-refresh.
//!   Kinds never share a combined call; the refresh flag is call-level.
//! - One `Bulker` per process (or per cluster), constructed explicitly and
//!   shared via `Arc`. No global singleton. We're not animals.
//!
//! ⚠️ Shutdown contract: call [`Bulker::close`] once, from the owner. Pending
//! blocks are flushed, not dropped. Submitting concurrently with `close` is
//! a caller bug; such a submit either fails fast with `EngineClosed` or
//! resolves to `EngineClosed` when the engine drops. It never hangs the
//! flushers. 🦆

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::backend::BackendHandle;
use crate::error::BulkError;
use crate::flushers::{ReadFlusher, Worker, WriteFlusher};
use crate::pool::BufPool;
use crate::queue::{Queue, QueueKind};
use crate::wire::{BulkItem, MgetItem, WriteAction, write_bulk_fragment, write_mget_fragment};

/// 🔧 Per-operation options. `Default` gets you the plain queue kinds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Opts {
    /// 🔄 Route this operation to the refresh queue kind: the combined call
    /// asks the backend to make the result immediately visible. Costs more.
    /// Worth it exactly when it's worth it.
    pub refresh: bool,
}

impl Opts {
    /// 🔄 The "I need to read my own writes" variant.
    pub fn with_refresh() -> Self {
        Self { refresh: true }
    }
}

fn default_flush_interval_ms() -> u64 {
    250
}
fn default_flush_threshold_bytes() -> usize {
    1024 * 1024
}
fn default_max_pending() -> usize {
    1024
}
fn default_buf_retention_bytes() -> usize {
    8 * 1024
}

/// 🔧 The Bulker's knobs — flush cadence and thresholds.
///
/// Deserializable so it can ride in the app config; `Default` matches the
/// serde defaults so code-constructed and config-constructed engines agree.
#[derive(Debug, Clone, Deserialize)]
pub struct BulkerConfig {
    /// ⏰ Flush cadence per queue kind, in milliseconds. Quiet queues flush
    /// this often at most-wait; busy queues flush sooner via thresholds.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// 🔔 Ring the flusher early once a queue holds this many pending bytes.
    #[serde(default = "default_flush_threshold_bytes")]
    pub flush_threshold_bytes: usize,
    /// 🔔 ...or this many pending blocks, whichever trips first.
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
    /// 📦 Pooled buffers that grew past this capacity are dropped, not kept.
    #[serde(default = "default_buf_retention_bytes")]
    pub buf_retention_bytes: usize,
}

impl Default for BulkerConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
            flush_threshold_bytes: default_flush_threshold_bytes(),
            max_pending: default_max_pending(),
            buf_retention_bytes: default_buf_retention_bytes(),
        }
    }
}

/// 🚗 The request-coalescing engine. One instance owns its queues, its
/// buffer pool, and its flusher tasks.
#[derive(Debug)]
pub struct Bulker {
    pool: Arc<BufPool>,
    read_q: Arc<Queue<MgetItem>>,
    read_refresh_q: Arc<Queue<MgetItem>>,
    write_q: Arc<Queue<BulkItem>>,
    write_refresh_q: Arc<Queue<BulkItem>>,
    /// 🏁 Dropping this sender closes the shutdown channel all four flushers
    /// park on. Held in an Option so `close` can take it exactly once.
    shutdown_tx: Mutex<Option<async_channel::Sender<()>>>,
    flushers: Mutex<Vec<JoinHandle<Result<()>>>>,
    closed: AtomicBool,
}

impl Bulker {
    /// 🚀 Build the engine and put four flushers on duty.
    ///
    /// The backend is shared by all flushers; it's pure I/O and doesn't care
    /// which queue a combined call came from.
    pub fn new(backend: BackendHandle, config: BulkerConfig) -> Self {
        let backend = Arc::new(backend);
        let pool = Arc::new(BufPool::new(config.buf_retention_bytes));
        let interval = Duration::from_millis(config.flush_interval_ms);
        // 🏁 Nothing is ever sent on this channel; its closure IS the signal.
        let (shutdown_tx, shutdown_rx) = async_channel::bounded::<()>(1);

        let mk_read = |kind| {
            Arc::new(Queue::<MgetItem>::new(
                kind,
                config.flush_threshold_bytes,
                config.max_pending,
            ))
        };
        let mk_write = |kind| {
            Arc::new(Queue::<BulkItem>::new(
                kind,
                config.flush_threshold_bytes,
                config.max_pending,
            ))
        };
        let read_q = mk_read(QueueKind::Read);
        let read_refresh_q = mk_read(QueueKind::ReadRefresh);
        let write_q = mk_write(QueueKind::Write);
        let write_refresh_q = mk_write(QueueKind::WriteRefresh);

        // 🧵 Assemble the team! One flusher per kind, no more, no less —
        // the single-consumer drain discipline depends on it.
        let flushers = vec![
            ReadFlusher {
                queue: Arc::clone(&read_q),
                backend: Arc::clone(&backend),
                pool: Arc::clone(&pool),
                interval,
                shutdown: shutdown_rx.clone(),
            }
            .start(),
            ReadFlusher {
                queue: Arc::clone(&read_refresh_q),
                backend: Arc::clone(&backend),
                pool: Arc::clone(&pool),
                interval,
                shutdown: shutdown_rx.clone(),
            }
            .start(),
            WriteFlusher {
                queue: Arc::clone(&write_q),
                backend: Arc::clone(&backend),
                pool: Arc::clone(&pool),
                interval,
                shutdown: shutdown_rx.clone(),
            }
            .start(),
            WriteFlusher {
                queue: Arc::clone(&write_refresh_q),
                backend: Arc::clone(&backend),
                pool: Arc::clone(&pool),
                interval,
                shutdown: shutdown_rx,
            }
            .start(),
        ];

        debug!(
            interval_ms = config.flush_interval_ms,
            threshold_bytes = config.flush_threshold_bytes,
            max_pending = config.max_pending,
            "🚗 bulker open for carpooling"
        );

        Self {
            pool,
            read_q,
            read_refresh_q,
            write_q,
            write_refresh_q,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            flushers: Mutex::new(flushers),
            closed: AtomicBool::new(false),
        }
    }

    /// 📖 Read one document's raw `_source` bytes.
    ///
    /// Sugar over [`Bulker::read_raw`]: not-found surfaces as
    /// [`BulkError::NotFound`]; a found document with no source body (the
    /// backend can be configured that way) yields empty bytes.
    pub async fn read(&self, index: &str, id: &str, opts: Opts) -> Result<Vec<u8>, BulkError> {
        let item = self.read_raw(index, id, opts).await?;
        Ok(item.source_bytes().map(|b| b.to_vec()).unwrap_or_default())
    }

    /// 📖 Read one document, full per-item response.
    ///
    /// Serialize → enqueue → await the handle. No network I/O happens on
    /// this call path; the flusher for this queue kind does the driving.
    pub async fn read_raw(&self, index: &str, id: &str, opts: Opts) -> Result<MgetItem, BulkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BulkError::EngineClosed);
        }
        let mut buf = self.pool.take();
        if let Err(err) = write_mget_fragment(&mut buf, index, id) {
            self.pool.put(buf);
            return Err(err);
        }
        let queue = if opts.refresh {
            &self.read_refresh_q
        } else {
            &self.read_q
        };
        let rx = queue.push(buf);
        // ✉️ The only caller suspension point in the whole engine.
        match rx.await {
            Ok(delivery) => delivery.result,
            Err(_) => Err(BulkError::EngineClosed),
        }
    }

    /// 🆕 Create a document. Fails with [`BulkError::Conflict`] if the id
    /// already exists. `id: None` lets the backend pick one; the returned
    /// item carries it.
    pub async fn create(
        &self,
        index: &str,
        id: Option<&str>,
        body: &[u8],
        opts: Opts,
    ) -> Result<BulkItem, BulkError> {
        self.submit_write(WriteAction::Create, index, id, Some(body), opts)
            .await
    }

    /// 📝 Index (upsert) a document.
    pub async fn index(
        &self,
        index: &str,
        id: Option<&str>,
        body: &[u8],
        opts: Opts,
    ) -> Result<BulkItem, BulkError> {
        self.submit_write(WriteAction::Index, index, id, Some(body), opts)
            .await
    }

    /// 🔧 Partially update a document. `body` is the full update payload,
    /// e.g. `{"doc": {...}}` — passed through untouched.
    pub async fn update(
        &self,
        index: &str,
        id: &str,
        body: &[u8],
        opts: Opts,
    ) -> Result<BulkItem, BulkError> {
        self.submit_write(WriteAction::Update, index, Some(id), Some(body), opts)
            .await
    }

    /// 🗑️ Delete a document. Deleting the already-deleted comes back as
    /// [`BulkError::NotFound`], which is either fine or a bug in your
    /// caller. We wouldn't know. We're a delivery service.
    pub async fn delete(&self, index: &str, id: &str, opts: Opts) -> Result<BulkItem, BulkError> {
        self.submit_write(WriteAction::Delete, index, Some(id), None, opts)
            .await
    }

    /// 📝 The shared write path: serialize the NDJSON fragment, enqueue on
    /// the right write kind, await the handle.
    async fn submit_write(
        &self,
        action: WriteAction,
        index: &str,
        id: Option<&str>,
        body: Option<&[u8]>,
        opts: Opts,
    ) -> Result<BulkItem, BulkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BulkError::EngineClosed);
        }
        let mut buf = self.pool.take();
        if let Err(err) = write_bulk_fragment(&mut buf, action, index, id, body) {
            self.pool.put(buf);
            return Err(err);
        }
        let queue = if opts.refresh {
            &self.write_refresh_q
        } else {
            &self.write_q
        };
        let rx = queue.push(buf);
        match rx.await {
            Ok(delivery) => delivery.result,
            Err(_) => Err(BulkError::EngineClosed),
        }
    }

    /// 🏁 Shut down: refuse new submits, close the shutdown channel, let
    /// each flusher run its final drain, and join them all.
    ///
    /// Idempotent-ish: a second call finds no sender and no handles and
    /// returns Ok having done nothing, which is the correct amount of work.
    pub async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        // 🏁 Dropping the only sender closes the channel; all four flushers
        // wake, final-drain, and clock out.
        let sender = self
            .shutdown_tx
            .lock()
            .expect("bulker shutdown mutex poisoned")
            .take();
        drop(sender);

        let handles = std::mem::take(
            &mut *self
                .flushers
                .lock()
                .expect("bulker flushers mutex poisoned"),
        );
        let results = futures::future::join_all(handles).await;
        for result in results {
            result.context("💀 a flusher task panicked on the way out")??;
        }
        debug!("🏁 bulker closed; all flushers accounted for");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ScriptedBackend;

    // 🧪 End-to-end engine tests: many callers, scripted cluster, no sockets.
    // Current-thread runtime throughout: flushers can only run when we await,
    // which makes "all submits land before the flush" deterministic.

    /// 🔧 Knobs for tests: ticker effectively off, count threshold drives flushes.
    fn config_count_threshold(n: usize) -> BulkerConfig {
        BulkerConfig {
            flush_interval_ms: 3_600_000,
            flush_threshold_bytes: usize::MAX,
            max_pending: n,
            buf_retention_bytes: 8 * 1024,
        }
    }

    #[tokio::test]
    async fn the_one_where_three_readers_share_one_mget() {
        // 🧪 The headline scenario, end to end: A found, B missing, C found — one
        // combined call, each handle resolves to its own key's answer.
        let scripted = ScriptedBackend::new();
        scripted
            .push_response(
                r#"{"docs":[
                    {"_index":"idx","_id":"A","found":true,"_source":{"k":"a"}},
                    {"_index":"idx","_id":"B","found":false},
                    {"_index":"idx","_id":"C","found":true,"_source":{"k":"c"}}
                ]}"#,
            )
            .await;

        let bulker = Bulker::new(
            BackendHandle::Scripted(scripted.clone()),
            config_count_threshold(3),
        );

        let (a, b, c) = tokio::join!(
            bulker.read("idx", "A", Opts::default()),
            bulker.read("idx", "B", Opts::default()),
            bulker.read("idx", "C", Opts::default()),
        );
        assert_eq!(a.unwrap(), br#"{"k":"a"}"#.to_vec());
        assert!(matches!(b, Err(BulkError::NotFound { .. })));
        assert_eq!(c.unwrap(), br#"{"k":"c"}"#.to_vec());

        // 🚗 One truck. Three passengers. That's the whole product.
        assert_eq!(scripted.received().await.len(), 1);
        bulker.close().await.unwrap();
    }

    #[tokio::test]
    async fn the_one_where_late_arrivals_catch_the_next_truck() {
        // 🧪 A queue being drained accepts new submissions; they ride the
        // NEXT flush, untouched by the in-flight one.
        let scripted = ScriptedBackend::new();
        scripted
            .push_response(r#"{"docs":[{"_id":"A","found":true,"_source":1},{"_id":"B","found":true,"_source":2}]}"#)
            .await;
        scripted
            .push_response(r#"{"docs":[{"_id":"C","found":true,"_source":3},{"_id":"D","found":true,"_source":4}]}"#)
            .await;

        let bulker = Bulker::new(
            BackendHandle::Scripted(scripted.clone()),
            config_count_threshold(2),
        );

        let (a, b) = tokio::join!(
            bulker.read("idx", "A", Opts::default()),
            bulker.read("idx", "B", Opts::default()),
        );
        a.unwrap();
        b.unwrap();

        let (c, d) = tokio::join!(
            bulker.read("idx", "C", Opts::default()),
            bulker.read("idx", "D", Opts::default()),
        );
        c.unwrap();
        d.unwrap();

        let calls = scripted.received().await;
        assert_eq!(calls.len(), 2);
        assert!(calls[0].payload.contains(r#""A""#) && calls[0].payload.contains(r#""B""#));
        assert!(!calls[0].payload.contains(r#""C""#), "late arrivals absent from in-flight flush");
        assert!(calls[1].payload.contains(r#""C""#) && calls[1].payload.contains(r#""D""#));
        bulker.close().await.unwrap();
    }

    #[tokio::test]
    async fn the_one_where_refresh_traffic_rides_separately() {
        // 🧪 Same verb, different kind: refresh reads must not share a
        // combined call with plain reads.
        let scripted = ScriptedBackend::new();
        // Two single-item responses; either queue may flush first, both bodies fit.
        scripted
            .push_response(r#"{"docs":[{"_id":"A","found":true,"_source":1}]}"#)
            .await;
        scripted
            .push_response(r#"{"docs":[{"_id":"B","found":true,"_source":2}]}"#)
            .await;

        let bulker = Bulker::new(
            BackendHandle::Scripted(scripted.clone()),
            config_count_threshold(1),
        );

        bulker.read("idx", "A", Opts::default()).await.unwrap();
        bulker.read("idx", "B", Opts::with_refresh()).await.unwrap();

        let calls = scripted.received().await;
        assert_eq!(calls.len(), 2);
        assert!(!calls[0].refresh);
        assert!(calls[1].refresh);
        bulker.close().await.unwrap();
    }

    #[tokio::test]
    async fn the_one_where_writers_carpool_too() {
        // 🧪 The write path end to end: two writes, one combined bulk call.
        let scripted = ScriptedBackend::new();
        scripted
            .push_response(
                r#"{"errors":false,"items":[
                    {"index":{"_index":"idx","_id":"a","status":201,"result":"created"}},
                    {"delete":{"_index":"idx","_id":"b","status":200,"result":"deleted"}}
                ]}"#,
            )
            .await;

        let bulker = Bulker::new(
            BackendHandle::Scripted(scripted.clone()),
            config_count_threshold(2),
        );

        let (w, d) = tokio::join!(
            bulker.index("idx", Some("a"), br#"{"v":1}"#, Opts::default()),
            bulker.delete("idx", "b", Opts::default()),
        );
        assert_eq!(w.unwrap().result.as_deref(), Some("created"));
        assert_eq!(d.unwrap().result.as_deref(), Some("deleted"));
        assert_eq!(scripted.received().await.len(), 1);
        bulker.close().await.unwrap();
    }

    #[tokio::test]
    async fn the_one_where_close_flushes_the_stragglers() {
        // 🧪 Pending work at shutdown rides the final drain, never dropped.
        let scripted = ScriptedBackend::new();
        scripted
            .push_response(r#"{"docs":[{"_id":"A","found":true,"_source":"bye"}]}"#)
            .await;

        // ⏰ No ticker, no threshold: only close() can cause this flush.
        let bulker = Arc::new(Bulker::new(
            BackendHandle::Scripted(scripted.clone()),
            BulkerConfig {
                flush_interval_ms: 3_600_000,
                flush_threshold_bytes: usize::MAX,
                max_pending: usize::MAX,
                buf_retention_bytes: 8 * 1024,
            },
        ));

        let reader = {
            let bulker = Arc::clone(&bulker);
            tokio::spawn(async move { bulker.read("idx", "A", Opts::default()).await })
        };
        // Let the reader enqueue before we pull the handbrake.
        tokio::task::yield_now().await;

        bulker.close().await.unwrap();
        let result = reader.await.unwrap();
        assert_eq!(result.unwrap(), br#""bye""#.to_vec());
    }

    #[tokio::test]
    async fn the_one_where_the_door_is_locked_after_close() {
        // 🧪 Submits after close fail fast instead of queueing into the void.
        let bulker = Bulker::new(
            BackendHandle::Scripted(ScriptedBackend::new()),
            config_count_threshold(1),
        );
        bulker.close().await.unwrap();
        let err = bulker.read("idx", "A", Opts::default()).await.unwrap_err();
        assert_eq!(err, BulkError::EngineClosed);
        // 🔄 And closing twice does nothing, loudly.
        bulker.close().await.unwrap();
    }

    #[tokio::test]
    async fn the_one_where_a_bad_submit_never_reaches_a_queue() {
        // 🧪 Serialization errors are caught at the door; the buffer goes
        // back to the pool and no flush ever sees the operation.
        let scripted = ScriptedBackend::new();
        let bulker = Bulker::new(
            BackendHandle::Scripted(scripted.clone()),
            config_count_threshold(1),
        );
        let err = bulker
            .submit_write(WriteAction::Delete, "idx", Some("a"), Some(b"{}"), Opts::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BulkError::Serialize(_)));
        assert!(scripted.received().await.is_empty());
        bulker.close().await.unwrap();
    }
}
