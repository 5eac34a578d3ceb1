//! 📖 The read flush — one combined `_mget` per drained read queue.
//!
//! The algorithm, step by step (deviate and the positional contract breaks):
//! 1. Size the combined buffer from tracked pending bytes, floored by a
//!    rough per-item estimate — no mid-assembly reallocs.
//! 2. Walk the drained chain once, head to tail, concatenating fragments.
//!    Buffers return to the pool as they're copied out.
//! 3. Strip the final trailing comma, close the envelope.
//! 4. One combined call. Kind-level refresh rides on the call, not per item.
//! 5. Parse; count check; a length mismatch is a desync, not a partial
//!    failure — nobody can be matched, so nobody gets a result.
//! 6. Walk the chain a second time in lockstep with the parsed items,
//!    consuming each block as its result is delivered.

use std::time::Instant;

use tracing::{error, trace, warn};

use crate::backend::{Backend, BackendHandle, CombinedApi, CombinedCall};
use crate::error::BulkError;
use crate::pool::BufPool;
use crate::queue::Drained;
use crate::wire::{MGET_PREFIX, MGET_SUFFIX, MgetItem, MgetResponse, ROUGH_ESTIMATE_PER_ITEM};

use super::{deliver, fail_chain};

/// 🚽 Flush one drained read batch to completion, or fail it to completion.
pub(crate) async fn flush_read(
    backend: &BackendHandle,
    pool: &BufPool,
    mut drained: Drained<MgetItem>,
) -> Result<(), BulkError> {
    if drained.blocks.is_empty() {
        return Ok(());
    }
    let start = Instant::now();
    let cnt = drained.blocks.len();
    let kind = drained.kind;

    // 📦 Size the combined buffer up front. The tracked pending-bytes figure
    // is exact for the fragments; the per-item estimate is the floor for
    // pathological tiny-fragment batches.
    let mut buf_sz = cnt * ROUGH_ESTIMATE_PER_ITEM;
    if buf_sz < drained.pending_bytes + MGET_SUFFIX.len() {
        buf_sz = drained.pending_bytes + MGET_SUFFIX.len();
    }

    let mut payload = Vec::with_capacity(MGET_PREFIX.len() + buf_sz);
    payload.extend_from_slice(MGET_PREFIX.as_bytes());

    // 🔄 First walk: concatenate fragments in drain order. Each fragment ends
    // with a comma, so blind concatenation yields a valid (overlong) array.
    // The buffer has done its job once copied — back to the pool it goes.
    for block in &mut drained.blocks {
        payload.extend_from_slice(&block.buf);
        pool.put(std::mem::take(&mut block.buf));
    }

    // ✂️ Strip the last fragment's trailing comma, close the envelope.
    payload.truncate(payload.len() - 1);
    payload.extend_from_slice(MGET_SUFFIX.as_bytes());

    let body = match backend
        .execute(CombinedCall {
            api: CombinedApi::Mget,
            refresh: kind.refresh(),
            payload,
        })
        .await
    {
        Ok(body) => body,
        Err(err) => {
            warn!(kind = kind.label(), cnt, error = %err, "💀 combined mget failed; failing whole flush");
            fail_chain(drained.blocks, &err);
            return Err(err);
        }
    };

    let resp: MgetResponse = match serde_json::from_slice(&body) {
        Ok(resp) => resp,
        Err(e) => {
            let err = BulkError::PayloadParse(e.to_string());
            error!(kind = kind.label(), cnt, error = %err, "💀 combined mget response unparseable");
            fail_chain(drained.blocks, &err);
            return Err(err);
        }
    };

    trace!(
        kind = kind.label(),
        refresh = kind.refresh(),
        cnt,
        buf_sz,
        body_sz = body.len(),
        rtt_ms = start.elapsed().as_millis() as u64,
        items = resp.docs.len(),
        "🚽 flush_read"
    );

    if resp.docs.len() != cnt {
        // 🧨 Protocol desync. Not transport weather — a contract bug between
        // us and the backend. No item can be attributed, nobody gets a result
        // they can't trust, the whole flush fails.
        let err = BulkError::Desync {
            sent: cnt,
            got: resp.docs.len(),
        };
        error!(kind = kind.label(), sent = cnt, got = resp.docs.len(), "🧨 mget response desync");
        fail_chain(drained.blocks, &err);
        return Err(err);
    }

    // 🔄 Second walk, in lockstep with the parsed items. Position `i` of the
    // response belongs to block `i` of the drain — by construction, end to
    // end. Each block is consumed as its result is sent.
    for (block, item) in drained.blocks.into_iter().zip(resp.docs) {
        let result = match item.derive_error() {
            Some(err) => Err(err),
            None => Ok(item),
        };
        deliver(block, result);
    }

    Ok(())
}
