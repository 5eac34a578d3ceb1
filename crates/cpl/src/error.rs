//! 💀 The error taxonomy — a field guide to everything that can go wrong
//! between "I'd like one document please" and actually getting it.
//!
//! 🧠 Knowledge graph:
//! - **Per-item errors** (`NotFound`, `Conflict`, `ItemFailed`): one caller's
//!   problem. Derived from one element of the combined response. The batch is fine.
//! - **Whole-flush errors** (`Transport`, `BackendRejected`, `PayloadParse`,
//!   `Desync`): everyone's problem. Every drained block gets the same clone.
//! - `Desync` is special: it means the response array and the request array
//!   disagree about how many items exist. That's not weather. That's a bug.
//!
//! ⚠️ `Clone` is load-bearing here. A transport error gets fanned out to N
//! callers, and N callers cannot share one `anyhow::Error`. So the engine
//! speaks `BulkError` internally and leaves `anyhow` to the CLI, where errors
//! go to die (in a log line, with dignity). 🦆

use std::fmt;

/// 💀 Everything the coalescing engine can hand a caller instead of a document.
///
/// Per-item variants are local and recoverable. Whole-flush variants were
/// cloned to every caller in the drained batch — if you got one, so did
/// everyone else in the carpool. Solidarity through failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BulkError {
    /// 🔍 The backend looked. The document was not there. It was never there.
    NotFound { index: String, id: String },
    /// ⚔️ Version conflict — someone else got to the document first.
    /// The backend chose them. It's not personal. (It's a little personal.)
    Conflict { index: String, id: String },
    /// 💀 The backend processed this one item and disliked it specifically.
    /// `kind`/`reason` come straight from the response element's error object.
    ItemFailed { kind: String, reason: String },
    /// 📡 The network ate the combined request. Whole flush fails.
    /// We keep the message as a String because `reqwest::Error` doesn't Clone
    /// and N callers are waiting for their copy.
    Transport(String),
    /// 💀 The backend answered, but with a status code instead of documents.
    /// The combined call itself was rejected — whole flush fails.
    BackendRejected { status: u16, body: String },
    /// 🧨 Protocol desync: we sent `sent` items, the response carried `got`.
    /// No result can be attributed to any caller, so nobody gets one.
    /// This is a contract bug, not weather. Page someone.
    Desync { sent: usize, got: usize },
    /// 💀 The combined response body would not parse. Whole flush fails.
    PayloadParse(String),
    /// 🔧 We could not even serialize the per-item request fragment.
    /// Caught at submit time, before the block ever enters a queue.
    Serialize(String),
    /// 🏁 The engine shut down before this handle got its delivery.
    EngineClosed,
}

impl BulkError {
    /// 🎯 Did this error take the whole flush down with it?
    ///
    /// Per-item errors are one caller's burden. Whole-flush errors were
    /// cloned to every drained block. Useful for metrics and for deciding
    /// how loudly to log.
    pub fn is_whole_flush(&self) -> bool {
        matches!(
            self,
            BulkError::Transport(_)
                | BulkError::BackendRejected { .. }
                | BulkError::Desync { .. }
                | BulkError::PayloadParse(_)
        )
    }

    /// 🔍 Convenience: is this the polite "it's just not there" error?
    pub fn is_not_found(&self) -> bool {
        matches!(self, BulkError::NotFound { .. })
    }
}

impl fmt::Display for BulkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BulkError::NotFound { index, id } => {
                write!(f, "document not found: index '{index}', id '{id}'")
            }
            BulkError::Conflict { index, id } => {
                write!(f, "version conflict: index '{index}', id '{id}'")
            }
            BulkError::ItemFailed { kind, reason } => {
                write!(f, "backend rejected item: [{kind}] {reason}")
            }
            BulkError::Transport(msg) => write!(f, "transport error on combined call: {msg}"),
            BulkError::BackendRejected { status, body } => {
                write!(f, "backend rejected combined call: status {status}, body: {body}")
            }
            BulkError::Desync { sent, got } => write!(
                f,
                "combined response desync: sent {sent} items, response carried {got}"
            ),
            BulkError::PayloadParse(msg) => {
                write!(f, "combined response unparseable: {msg}")
            }
            BulkError::Serialize(msg) => write!(f, "request fragment serialization failed: {msg}"),
            BulkError::EngineClosed => write!(f, "engine closed before delivering a result"),
        }
    }
}

impl std::error::Error for BulkError {}

#[cfg(test)]
mod tests {
    use super::*;

    // 🧪 Taxonomy tests: making sure errors know which team they play for.

    #[test]
    fn the_one_where_flush_wide_errors_admit_it() {
        // 🧪 Whole-flush errors fan out to everyone; they should say so.
        assert!(BulkError::Transport("connection reset".into()).is_whole_flush());
        assert!(BulkError::Desync { sent: 3, got: 1 }.is_whole_flush());
        assert!(
            BulkError::BackendRejected {
                status: 503,
                body: "shard tantrum".into()
            }
            .is_whole_flush()
        );
        assert!(BulkError::PayloadParse("not json".into()).is_whole_flush());
    }

    #[test]
    fn the_one_where_item_errors_stay_in_their_lane() {
        // 🧪 Per-item errors are local. One caller's problem. Not a group chat.
        assert!(
            !BulkError::NotFound {
                index: "idx".into(),
                id: "a".into()
            }
            .is_whole_flush()
        );
        assert!(
            !BulkError::Conflict {
                index: "idx".into(),
                id: "a".into()
            }
            .is_whole_flush()
        );
        assert!(!BulkError::EngineClosed.is_whole_flush());
    }

    #[test]
    fn the_one_where_desync_explains_itself_in_the_logs() {
        // 🧪 Desync must be distinguishable from transport noise at 3am.
        let msg = BulkError::Desync { sent: 2, got: 1 }.to_string();
        assert!(msg.contains("desync"), "got: {msg}");
        assert!(msg.contains('2') && msg.contains('1'), "got: {msg}");
    }
}
