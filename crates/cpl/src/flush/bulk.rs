//! 📝 The write flush — one combined `_bulk` per drained write queue.
//!
//! Same skeleton as the read flush, different wire clothes: fragments are
//! already NDJSON line pairs ending in `\n`, so assembly is pure
//! concatenation — no envelope, no comma ceremony. The response items come
//! back wearing verb-keyed wrappers that get shed before distribution.

use std::time::Instant;

use tracing::{error, trace, warn};

use crate::backend::{Backend, BackendHandle, CombinedApi, CombinedCall};
use crate::error::BulkError;
use crate::pool::BufPool;
use crate::queue::Drained;
use crate::wire::{BulkItem, BulkResponse};

use super::{deliver, fail_chain};

/// 🚽 Flush one drained write batch to completion, or fail it to completion.
pub(crate) async fn flush_bulk(
    backend: &BackendHandle,
    pool: &BufPool,
    mut drained: Drained<BulkItem>,
) -> Result<(), BulkError> {
    if drained.blocks.is_empty() {
        return Ok(());
    }
    let start = Instant::now();
    let cnt = drained.blocks.len();
    let kind = drained.kind;

    // 📦 NDJSON needs no framing: pending bytes is the exact payload size.
    let mut payload = Vec::with_capacity(drained.pending_bytes);
    for block in &mut drained.blocks {
        payload.extend_from_slice(&block.buf);
        pool.put(std::mem::take(&mut block.buf));
    }

    let body = match backend
        .execute(CombinedCall {
            api: CombinedApi::Bulk,
            refresh: kind.refresh(),
            payload,
        })
        .await
    {
        Ok(body) => body,
        Err(err) => {
            warn!(kind = kind.label(), cnt, error = %err, "💀 combined bulk failed; failing whole flush");
            fail_chain(drained.blocks, &err);
            return Err(err);
        }
    };

    let resp: BulkResponse = match serde_json::from_slice(&body) {
        Ok(resp) => resp,
        Err(e) => {
            let err = BulkError::PayloadParse(e.to_string());
            error!(kind = kind.label(), cnt, error = %err, "💀 combined bulk response unparseable");
            fail_chain(drained.blocks, &err);
            return Err(err);
        }
    };

    trace!(
        kind = kind.label(),
        refresh = kind.refresh(),
        cnt,
        body_sz = body.len(),
        rtt_ms = start.elapsed().as_millis() as u64,
        items = resp.items.len(),
        errors = resp.errors,
        "🚽 flush_bulk"
    );

    if resp.items.len() != cnt {
        let err = BulkError::Desync {
            sent: cnt,
            got: resp.items.len(),
        };
        error!(kind = kind.label(), sent = cnt, got = resp.items.len(), "🧨 bulk response desync");
        fail_chain(drained.blocks, &err);
        return Err(err);
    }

    // 🎭 Shed every verb wrapper BEFORE distribution starts. If any envelope
    // is malformed the whole flush fails cleanly — nobody has been delivered
    // to yet, so nobody gets half a batch.
    let mut items = Vec::with_capacity(cnt);
    for envelope in resp.items {
        match envelope.into_item() {
            Ok(item) => items.push(item),
            Err(err) => {
                error!(kind = kind.label(), error = %err, "💀 malformed bulk response item");
                fail_chain(drained.blocks, &err);
                return Err(err);
            }
        }
    }

    // 🔄 Lockstep walk: response item `i` belongs to drained block `i`.
    for (block, item) in drained.blocks.into_iter().zip(items) {
        let result = match item.derive_error() {
            Some(err) => Err(err),
            None => Ok(item),
        };
        deliver(block, result);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ScriptedBackend;
    use crate::queue::{Delivery, Queue, QueueKind};
    use crate::wire::{WriteAction, write_bulk_fragment};
    use tokio::sync::oneshot;

    fn write_queue() -> Queue<BulkItem> {
        Queue::new(QueueKind::Write, usize::MAX, usize::MAX)
    }

    fn push_write(
        queue: &Queue<BulkItem>,
        action: WriteAction,
        id: Option<&str>,
        body: Option<&[u8]>,
    ) -> oneshot::Receiver<Delivery<BulkItem>> {
        let mut buf = Vec::new();
        write_bulk_fragment(&mut buf, action, "idx", id, body).unwrap();
        queue.push(buf)
    }

    #[tokio::test]
    async fn the_one_where_mixed_verbs_share_one_truck() {
        // 🧪 An index, a create that loses its race, and a delete — one
        // combined call, three positionally matched verdicts.
        let scripted = ScriptedBackend::new();
        scripted
            .push_response(
                r#"{"errors":true,"items":[
                    {"index":{"_index":"idx","_id":"a","status":200,"result":"updated"}},
                    {"create":{"_index":"idx","_id":"b","status":409,"error":{"type":"version_conflict_engine_exception","reason":"already exists"}}},
                    {"delete":{"_index":"idx","_id":"c","status":200,"result":"deleted"}}
                ]}"#,
            )
            .await;

        let queue = write_queue();
        let rx_a = push_write(&queue, WriteAction::Index, Some("a"), Some(br#"{"v":1}"#));
        let rx_b = push_write(&queue, WriteAction::Create, Some("b"), Some(br#"{"v":2}"#));
        let rx_c = push_write(&queue, WriteAction::Delete, Some("c"), None);

        let backend = BackendHandle::Scripted(scripted.clone());
        let pool = BufPool::new(1024);
        flush_bulk(&backend, &pool, queue.drain()).await.unwrap();

        let a = rx_a.await.unwrap().result.unwrap();
        assert_eq!(a.result.as_deref(), Some("updated"));
        assert!(matches!(
            rx_b.await.unwrap().result,
            Err(BulkError::Conflict { .. })
        ));
        assert_eq!(rx_c.await.unwrap().result.unwrap().result.as_deref(), Some("deleted"));

        // 📦 Payload is pure NDJSON concatenation: 2 + 2 + 1 lines.
        let calls = scripted.received().await;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].api, CombinedApi::Bulk);
        assert_eq!(calls[0].payload.matches('\n').count(), 5);
        assert!(calls[0].payload.ends_with('\n'));
    }

    #[tokio::test]
    async fn the_one_where_a_rejected_bulk_call_fails_every_writer() {
        // 🧪 Backend-reported batch error = whole-flush failure, same as transport.
        let scripted = ScriptedBackend::new();
        scripted
            .push_error(BulkError::BackendRejected {
                status: 429,
                body: "too much carpool".into(),
            })
            .await;

        let queue = write_queue();
        let rx_a = push_write(&queue, WriteAction::Index, Some("a"), Some(b"{}"));
        let rx_b = push_write(&queue, WriteAction::Index, Some("b"), Some(b"{}"));

        let backend = BackendHandle::Scripted(scripted);
        let pool = BufPool::new(1024);
        let err = flush_bulk(&backend, &pool, queue.drain())
            .await
            .unwrap_err();
        assert!(matches!(err, BulkError::BackendRejected { .. }));

        let e1 = rx_a.await.unwrap().result.unwrap_err();
        let e2 = rx_b.await.unwrap().result.unwrap_err();
        assert_eq!(e1, e2);
    }

    #[tokio::test]
    async fn the_one_where_the_bulk_response_count_lies() {
        // 🧪 Desync on the write path behaves exactly like the read path.
        let scripted = ScriptedBackend::new();
        scripted
            .push_response(r#"{"errors":false,"items":[{"index":{"_id":"a","status":200}}]}"#)
            .await;

        let queue = write_queue();
        let rx_a = push_write(&queue, WriteAction::Index, Some("a"), Some(b"{}"));
        let rx_b = push_write(&queue, WriteAction::Index, Some("b"), Some(b"{}"));

        let backend = BackendHandle::Scripted(scripted);
        let pool = BufPool::new(1024);
        let err = flush_bulk(&backend, &pool, queue.drain())
            .await
            .unwrap_err();
        assert_eq!(err, BulkError::Desync { sent: 2, got: 1 });
        assert!(rx_a.await.unwrap().result.is_err());
        assert!(rx_b.await.unwrap().result.is_err());
    }

    #[tokio::test]
    async fn the_one_where_refresh_writes_ride_their_own_truck() {
        // 🧪 WriteRefresh flags the combined call; items are untouched.
        let scripted = ScriptedBackend::new();
        scripted
            .push_response(r#"{"errors":false,"items":[{"index":{"_id":"a","status":201,"result":"created"}}]}"#)
            .await;

        let queue: Queue<BulkItem> = Queue::new(QueueKind::WriteRefresh, usize::MAX, usize::MAX);
        let mut buf = Vec::new();
        write_bulk_fragment(&mut buf, WriteAction::Index, "idx", Some("a"), Some(b"{}")).unwrap();
        let rx = queue.push(buf);

        let backend = BackendHandle::Scripted(scripted.clone());
        let pool = BufPool::new(1024);
        flush_bulk(&backend, &pool, queue.drain()).await.unwrap();
        rx.await.unwrap().result.unwrap();
        assert!(scripted.received().await[0].refresh);
    }
}
