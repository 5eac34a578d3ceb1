use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, trace, warn};

use crate::backend::{Backend, CombinedCall};
use crate::error::BulkError;

/// 📡 Where and how to reach the cluster that all these carpooled requests
/// are headed for.
///
/// 🔧 Auth is tri-modal: username+password, api_key, or "I hope anonymous
/// works" (on a production cluster: it won't).
#[derive(Debug, Deserialize, Clone)]
pub struct EsBackendConfig {
    /// 📡 The cluster URL. Scheme + host + port. Yes, all of it.
    /// No, `localhost` alone is not enough. Yes, I know it worked in dev.
    pub url: String,
    /// 🔒 Username for basic auth. Optional, like flossing.
    #[serde(default)]
    pub username: Option<String>,
    /// 🔒 Password. If this is plaintext in your config file, I've already
    /// filed a complaint with the Department of Security Choices.
    #[serde(default)]
    pub password: Option<String>,
    /// 🔒 API key — the velvet rope variant of authentication.
    /// Takes priority over basic auth. This is not a democracy.
    #[serde(default)]
    pub api_key: Option<String>,
}

/// 📡 The real backend: one `reqwest::Client`, reused across combined calls.
///
/// Pure I/O, zero buffering. The flush upstream already assembled the whole
/// combined payload; we POST it to `_mget` or `_bulk` and hand the body back.
/// Like a postal worker who delivers the mail without reading it.
///
/// 🔄 This type does not retry. Retries are the caller's problem. Good luck.
#[derive(Debug)]
pub struct EsBackend {
    client: reqwest::Client,
    config: EsBackendConfig,
}

impl EsBackend {
    /// 🚀 Stand up a backend, fully wired.
    ///
    /// Builds the `reqwest::Client` with sane timeouts (10s connect, 30s
    /// response — bulk calls can be meaty and we're not monsters), then
    /// pings the cluster root to confirm the URL is real and auth works.
    /// Fail loudly here, not 50,000 coalesced requests later.
    pub async fn new(config: EsBackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .context("💀 The HTTP client refused to be born. The TLS stack wept. Probably a missing cert or a cursed system OpenSSL. Either way: tragic.")?;

        // 📡 Connectivity ping — "Hello? Is this thing on?"
        let c = config.clone();
        client
            .get(&c.url)
            .basic_auth(c.username.unwrap_or_default(), c.password)
            .send()
            .await
            .context("💀 Reached out to say hello to the cluster. Got ghosted. Check the URL, check the network, check your feelings.")?;

        debug!("✅ Backend reachable — the cluster picked up the phone");
        Ok(Self { client, config })
    }

    /// 🔧 Skip the connectivity ping. For wiring a backend to an address you
    /// already trust (or a test server you just started).
    pub fn new_unchecked(config: EsBackendConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30))
            .build()
            .context("💀 The HTTP client refused to be born. Again. The TLS stack remains inconsolable.")?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Backend for EsBackend {
    /// 📡 POST one combined payload to its API endpoint; return the raw body.
    ///
    /// Error mapping, per the taxonomy:
    /// - network-level failure → [`BulkError::Transport`] (whole flush fails)
    /// - non-2xx status → [`BulkError::BackendRejected`] (whole flush fails)
    /// - per-item verdicts live inside the 2xx body; the flush sorts those out.
    async fn execute(&self, call: CombinedCall) -> Result<Vec<u8>, BulkError> {
        // 📡 `{url}/_mget` or `{url}/_bulk`, with the kind-level refresh flag
        // as a query param. trim_end_matches('/') — the slash hygiene you
        // didn't know you needed. One slash of difference. Infinite suffering.
        let mut url = format!(
            "{}/{}",
            self.config.url.trim_end_matches('/'),
            call.api.path()
        );
        if call.refresh {
            url.push_str("?refresh=true");
        }

        let mut request = self
            .client
            .post(&url)
            // ⚠️ `_bulk` demands application/x-ndjson. VERY important.
            // The x- prefix means "we made this up but we're committing to it."
            .header("Content-Type", call.api.content_type());

        // 🔒 Auth dance: api_key beats basic auth in this club.
        if let Some(ref api_key) = self.config.api_key {
            request = request.header("Authorization", format!("ApiKey {}", api_key));
        } else if let Some(ref username) = self.config.username {
            request = request.basic_auth(username, self.config.password.as_ref());
        }

        let payload_len = call.payload.len();
        trace!(
            api = call.api.path(),
            refresh = call.refresh,
            bytes = payload_len,
            "📡 combined call leaving the building, Elvis-style"
        );

        let response = request.body(call.payload).send().await.map_err(|e| {
            // 💀 The network layer, that capricious deity of bytes and routing
            // tables, looked upon our combined payload and dropped it.
            warn!(api = call.api.path(), error = %e, "💀 transport error on combined call");
            BulkError::Transport(e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            // 💀 We got a response! It just... wasn't good news. The body
            // usually explains which shard is having a rough morning.
            let body = response.text().await.unwrap_or_default();
            warn!(api = call.api.path(), status = status.as_u16(), "💀 backend rejected combined call");
            return Err(BulkError::BackendRejected {
                status: status.as_u16(),
                body,
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| BulkError::Transport(e.to_string()))?;
        trace!(
            api = call.api.path(),
            body_bytes = body.len(),
            "✅ combined response landed"
        );
        Ok(body.to_vec())
    }
}
