//! 🚗 cpl — carpool: a bulk-request coalescing engine for Elasticsearch.
//!
//! 🎬 "In a world where every caller drove to the cluster alone...
//! one engine dared to share a ride." *[record scratch]* 🦆
//!
//! Many independent tasks each submit one read or write. The [`Bulker`]
//! queues them per kind, a flusher periodically (or on threshold) drains a
//! queue into ONE combined `_mget`/`_bulk` call, and the combined response
//! is split back out positionally — each caller's one-shot handle resolves
//! to exactly its own answer.
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use cpl::backend::{BackendHandle, EsBackend, EsBackendConfig};
//! use cpl::{Bulker, BulkerConfig, Opts};
//!
//! let backend = EsBackend::new(EsBackendConfig {
//!     url: "http://localhost:9200".into(),
//!     username: None,
//!     password: None,
//!     api_key: None,
//! })
//! .await?;
//! let bulker = Bulker::new(BackendHandle::Elasticsearch(backend), BulkerConfig::default());
//!
//! // A thousand tasks can do this concurrently; the cluster sees a handful
//! // of combined calls instead of a thousand lonely ones.
//! let doc = bulker.read("my-index", "doc-1", Opts::default()).await?;
//! bulker.close().await?;
//! # Ok(()) }
//! ```

pub mod app_config;
pub mod backend;
pub mod bulker;
pub mod error;
mod flush;
mod flushers;
mod pool;
pub mod queue;
pub mod wire;

pub use bulker::{Bulker, BulkerConfig, Opts};
pub use error::BulkError;
pub use queue::Delivery;
pub use wire::{BulkItem, MgetItem, WriteAction};
