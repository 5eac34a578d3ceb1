//! 🚽 The flush — where a queue's worth of waiting becomes one network call.
//!
//! 🎬 *[a drained chain of blocks sits on the loading dock. one combined
//! payload is assembled. one truck leaves. one truck returns. every block
//! gets exactly one parcel.]*
//!
//! The contract, carved in stone: given a non-empty drained batch, flush it
//! to completion or fail it to completion. Never partially. Every block gets
//! exactly one delivery — a per-item result on success, or a clone of the
//! same whole-flush error when the combined call itself went down.
//!
//! 🧠 Knowledge graph:
//! - `read` / `bulk` submodules: per-API payload assembly and response
//!   parsing. The coalescing skeleton is identical; only the wire shapes
//!   differ. New queue kinds mean new thin submodules, not new core logic.
//! - `deliver` consumes the block by value. Once a result is sent the block
//!   is gone — nothing can touch it afterward, by construction. This is the
//!   ownership-flavored rendition of "fetch next before sending".
//! - Buffers go back to the pool during payload assembly, before the network
//!   call: once the fragment bytes are copied into the combined payload the
//!   block's buffer has no further job. 🦆

pub(crate) mod bulk;
pub(crate) mod read;

use tracing::debug;

use crate::error::BulkError;
use crate::queue::{Block, Delivery};

/// ✉️ Send one result to one block's pre-reserved slot. Never blocks.
///
/// The send consumes the sender, so double delivery is a compile error, not
/// a 3am incident. A failed send means the caller dropped its handle
/// (timed out, gave up, went home) — their loss, logged and moved past;
/// an abandoned caller must never stall the flush.
pub(crate) fn deliver<T>(block: Block<T>, result: Result<T, BulkError>) {
    let seq = block.seq;
    if block.tx.send(Delivery { seq, result }).is_err() {
        debug!(seq, "✉️ caller abandoned its handle before delivery; result returned to sender");
    }
}

/// 💀 Fail the whole drained chain: every block receives a clone of the same
/// error, in drain order, each consumed exactly once.
pub(crate) fn fail_chain<T>(blocks: Vec<Block<T>>, err: &BulkError) {
    debug!(cnt = blocks.len(), error = %err, "💀 failing entire drained chain");
    for block in blocks {
        deliver(block, Err(err.clone()));
    }
}
