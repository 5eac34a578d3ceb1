//! 📡 The backend — the thing that actually drives to the cluster.
//!
//! The engine upstream does the carpooling: queueing, combining, splitting
//! results back out. A [`Backend`] does exactly one thing: take one combined
//! payload, execute one network call, hand back the combined response body.
//! Pure I/O. No buffering. No opinions about the passengers.
//!
//! # Contract 📜
//! - One `execute` = one combined call. The backend MUST preserve item order
//!   between the request array and the response array. (Elasticsearch does.
//!   We check anyway — see the desync handling in the flush.)
//! - Transport failures and rejected combined calls come back as
//!   [`BulkError::Transport`] / [`BulkError::BackendRejected`]. Per-item
//!   verdicts live inside the response body; not this layer's business.
//!
//! # Knowledge Graph 🧠
//! - Pattern: trait → concrete impls (EsBackend, ScriptedBackend) → BackendHandle enum
//! - The enum keeps the flushers blissfully ignorant of where bytes actually go.
//!   Ignorance is a feature. It's called "abstraction". 🦆

use async_trait::async_trait;

use crate::error::BulkError;

pub mod elasticsearch;
pub mod in_mem;

pub use elasticsearch::{EsBackend, EsBackendConfig};
pub use in_mem::{RecordedCall, ScriptedBackend};

/// 🔖 Which combined API a flush targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CombinedApi {
    /// 📖 `_mget` — one combined read.
    Mget,
    /// 📝 `_bulk` — one combined write.
    Bulk,
}

impl CombinedApi {
    /// 📡 URL path segment for this API.
    pub fn path(self) -> &'static str {
        match self {
            CombinedApi::Mget => "_mget",
            CombinedApi::Bulk => "_bulk",
        }
    }

    /// 📦 The Content-Type each API insists on. `_bulk` wants NDJSON and
    /// will sulk (406 or silent misbehavior) if you send plain JSON.
    pub fn content_type(self) -> &'static str {
        match self {
            CombinedApi::Mget => "application/json",
            CombinedApi::Bulk => "application/x-ndjson",
        }
    }
}

/// 📦 One fully assembled combined call, ready to leave the building.
#[derive(Debug)]
pub struct CombinedCall {
    pub api: CombinedApi,
    /// 🔄 Applies to the whole combined call — never per item. This is why
    /// refresh traffic gets its own queue kind.
    pub refresh: bool,
    pub payload: Vec<u8>,
}

/// 📡 Executes one combined call. I/O only. No questions asked.
#[async_trait]
pub trait Backend: Send + Sync + std::fmt::Debug {
    /// 🚀 Run the combined call, return the raw combined response body.
    async fn execute(&self, call: CombinedCall) -> Result<Vec<u8>, BulkError>;
}

/// 🎭 The many faces of a backend — enum dispatch so the flushers never know
/// whether they're talking to a cluster or a test script.
#[derive(Debug)]
pub enum BackendHandle {
    Elasticsearch(EsBackend),
    Scripted(ScriptedBackend),
}

#[async_trait]
impl Backend for BackendHandle {
    async fn execute(&self, call: CombinedCall) -> Result<Vec<u8>, BulkError> {
        match self {
            BackendHandle::Elasticsearch(b) => b.execute(call).await,
            BackendHandle::Scripted(b) => b.execute(call).await,
        }
    }
}
