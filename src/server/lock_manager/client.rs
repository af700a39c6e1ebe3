//! Outbound peer transport: best-effort, fire-and-forget POSTs to
//! peer `/probe` and `/abort` endpoints.
//!
//! Mirrors the teacher's `client.rs` role (the store-to-store RPC
//! client the deadlock detector uses to reach other nodes) but speaks
//! plain JSON over HTTP instead of gRPC, matching spec.md §6's wire
//! protocol. Built on `reqwest`, the HTTP client `tos-network-tos`
//! uses for its own outbound calls.

use std::sync::Arc;
use std::time::Duration;

use log::warn;
use serde::Serialize;

/// Thin wrapper around a shared `reqwest::Client` with the peer-call
/// timeout baked in (spec.md §4.2 "peer-call timeout = 2s").
#[derive(Clone)]
pub struct PeerClient {
    http: reqwest::Client,
}

impl PeerClient {
    pub fn new(timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build reqwest client");
        Self { http }
    }

    /// Sends `body` as JSON to `{peer}{path}`. Errors (network,
    /// timeout, non-2xx) are logged at `warn!` and swallowed — the
    /// protocol is best-effort and never retries at this layer
    /// (spec.md §7).
    async fn post(&self, peer: &str, path: &str, body: impl Serialize) {
        let url = format!("{}{}", peer, path);
        match self.http.post(&url).json(&body).send().await {
            Ok(resp) if !resp.status().is_success() => {
                warn!("peer {} responded with {}", url, resp.status());
            }
            Ok(_) => {}
            Err(e) => warn!("peer call to {} failed: {}", url, e),
        }
    }

    /// Fans `body` out to every peer in `peers` concurrently, never
    /// waiting on the core lock — callers must only invoke this after
    /// releasing any state mutex (spec.md §5).
    pub async fn broadcast(self: Arc<Self>, peers: Vec<String>, path: String, body: impl Serialize + Clone + Send + 'static) {
        let sends = peers.into_iter().map(|peer| {
            let client = self.clone();
            let path = path.clone();
            let body = body.clone();
            tokio::spawn(async move { client.post(&peer, &path, body).await })
        });
        futures::future::join_all(sends).await;
    }
}
