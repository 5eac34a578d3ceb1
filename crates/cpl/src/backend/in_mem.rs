use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::backend::{Backend, CombinedApi, CombinedCall};
use crate::error::BulkError;

/// 📼 One combined call as the scripted backend saw it — the evidence.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub api: CombinedApi,
    pub refresh: bool,
    /// 📦 The payload as UTF-8. Combined payloads are JSON/NDJSON, so this
    /// is lossless in practice and much nicer to assert against.
    pub payload: String,
}

/// 🎬 The backend that never forgets and always follows the script.
///
/// `ScriptedBackend` records every combined call it receives and replays a
/// pre-loaded queue of responses (or errors) in order. It's the stunt double
/// for the whole cluster: the flush machinery can be exercised end to end
/// with zero sockets and total determinism.
///
/// 🔒 The `Arc<Mutex<...>>` nesting doll means tests can keep a clone and
/// peek inside after handing the backend off to a `Bulker`. Communist data,
/// but in a good way. The borrow checker approved. Barely. It had notes. 🦆
#[derive(Debug, Default, Clone)]
pub struct ScriptedBackend {
    /// 🎬 The script: each `execute` pops the front. An exhausted script is
    /// played as a transport error, which fails the flush loudly instead of
    /// hanging a test.
    script: Arc<Mutex<VecDeque<Result<Vec<u8>, BulkError>>>>,
    /// 📼 The evidence locker. Each entry = one combined call, in order.
    received: Arc<Mutex<Vec<RecordedCall>>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// 🎬 Queue up one successful combined response body.
    pub async fn push_response(&self, body: &str) {
        self.script
            .lock()
            .await
            .push_back(Ok(body.as_bytes().to_vec()));
    }

    /// 💀 Queue up one whole-call failure.
    pub async fn push_error(&self, err: BulkError) {
        self.script.lock().await.push_back(Err(err));
    }

    /// 📼 Everything this backend has been asked to do, in order.
    pub async fn received(&self) -> Vec<RecordedCall> {
        self.received.lock().await.clone()
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    /// 📼 Record the call, replay the next scripted act.
    async fn execute(&self, call: CombinedCall) -> Result<Vec<u8>, BulkError> {
        self.received.lock().await.push(RecordedCall {
            api: call.api,
            refresh: call.refresh,
            payload: String::from_utf8_lossy(&call.payload).into_owned(),
        });
        self.script.lock().await.pop_front().unwrap_or_else(|| {
            Err(BulkError::Transport(
                "scripted backend ran out of script".to_string(),
            ))
        })
    }
}
