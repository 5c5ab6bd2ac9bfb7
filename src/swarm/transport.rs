//! HTTP transport between mesh nodes.
//!
//! The single network boundary of the swarm core. Every helper issues one
//! request and returns a uniform [`TransportResponse`]; it never retries.
//! Retry policy belongs to the work distributor.

use std::time::{Duration, Instant};

use crate::swarm::protocol::{
    GossipMessage, HeartbeatMessage, JoinMessage, LeaveMessage, SwarmTaskRequest, SwarmTaskResult,
};

/// Default connect/read timeout for peer requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Uniform outcome of a peer request.
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub success: bool,
    /// HTTP status, or 0 when the connection itself failed.
    pub status: u16,
    /// Decoded JSON body, when one was returned.
    pub body: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Wall-clock round trip as measured by the caller.
    pub latency_ms: u64,
}

impl TransportResponse {
    /// Decode the body into a typed message.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Option<T> {
        self.body
            .as_ref()
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

/// Stateless request/response client for peer endpoints.
#[derive(Debug, Clone)]
pub struct PeerTransport {
    client: reqwest::Client,
    token: Option<String>,
}

impl PeerTransport {
    pub fn new(token: Option<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, token }
    }

    pub async fn fetch_identity(&self, base_url: &str) -> TransportResponse {
        self.get(base_url, "/identity").await
    }

    pub async fn send_join(&self, base_url: &str, msg: &JoinMessage) -> TransportResponse {
        self.post(base_url, "/join", msg).await
    }

    pub async fn send_leave(&self, base_url: &str, msg: &LeaveMessage) -> TransportResponse {
        self.post(base_url, "/leave", msg).await
    }

    pub async fn send_heartbeat(
        &self,
        base_url: &str,
        msg: &HeartbeatMessage,
    ) -> TransportResponse {
        self.post(base_url, "/heartbeat", msg).await
    }

    pub async fn send_gossip(&self, base_url: &str, msg: &GossipMessage) -> TransportResponse {
        self.post(base_url, "/gossip", msg).await
    }

    pub async fn send_task_request(
        &self,
        base_url: &str,
        req: &SwarmTaskRequest,
    ) -> TransportResponse {
        self.post(base_url, "/task/request", req).await
    }

    pub async fn send_task_result(
        &self,
        base_url: &str,
        res: &SwarmTaskResult,
    ) -> TransportResponse {
        self.post(base_url, "/task/result", res).await
    }

    async fn get(&self, base_url: &str, path: &str) -> TransportResponse {
        let url = join_url(base_url, path);
        let start = Instant::now();
        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        Self::complete(url, start, request.send().await).await
    }

    async fn post<B: serde::Serialize>(
        &self,
        base_url: &str,
        path: &str,
        body: &B,
    ) -> TransportResponse {
        let url = join_url(base_url, path);
        let start = Instant::now();
        let mut request = self.client.post(&url).json(body);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        Self::complete(url, start, request.send().await).await
    }

    async fn complete(
        url: String,
        start: Instant,
        outcome: Result<reqwest::Response, reqwest::Error>,
    ) -> TransportResponse {
        match outcome {
            Ok(response) => {
                let status = response.status().as_u16();
                let success = response.status().is_success();
                let body = response.json::<serde_json::Value>().await.ok();
                let latency_ms = start.elapsed().as_millis() as u64;
                let error = if success {
                    None
                } else {
                    tracing::debug!(%url, status, "peer request returned non-success status");
                    Some(format!("peer returned status {status}"))
                };
                TransportResponse {
                    success,
                    status,
                    body,
                    error,
                    latency_ms,
                }
            }
            Err(e) => {
                tracing::debug!(%url, "peer request failed: {}", e);
                TransportResponse {
                    success: false,
                    status: 0,
                    body: None,
                    error: Some(e.to_string()),
                    latency_ms: start.elapsed().as_millis() as u64,
                }
            }
        }
    }
}

fn join_url(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}
