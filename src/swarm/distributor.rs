//! Work distribution across the mesh.
//!
//! Turns one `distribute` call into exactly one task result (or a
//! structured failure): select candidate peers per strategy, delegate via
//! the mesh manager, await the asynchronously posted-back result keyed by
//! task id, and retry on alternative peers within the attempt budget.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{oneshot, Mutex};

use crate::config::SelectionStrategy;
use crate::error::SwarmError;
use crate::swarm::manager::{MeshManager, TaskResultSink};
use crate::swarm::protocol::{SwarmTaskResult, TaskConstraints};

/// Upper bound on concurrently outstanding delegations.
pub const MAX_PENDING_DELEGATIONS: usize = 4096;

/// One outstanding delegation awaiting its posted-back result.
struct ActiveDelegation {
    peer_node_id: String,
    sent_at: Instant,
    tx: oneshot::Sender<SwarmTaskResult>,
}

#[derive(Default)]
struct DistributorMetrics {
    attempts: AtomicU64,
    accepted: AtomicU64,
    rejected: AtomicU64,
    resolved: AtomicU64,
    timeouts: AtomicU64,
    cancelled: AtomicU64,
}

/// Point-in-time copy of the distributor counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub attempts: u64,
    pub accepted: u64,
    pub rejected: u64,
    pub resolved: u64,
    pub timeouts: u64,
    pub cancelled: u64,
}

pub struct WorkDistributor {
    mesh: Arc<MeshManager>,
    pending: Mutex<HashMap<String, ActiveDelegation>>,
    rr_index: AtomicUsize,
    metrics: DistributorMetrics,
}

impl WorkDistributor {
    /// Build a distributor and register it as the mesh's result sink.
    pub fn new(mesh: Arc<MeshManager>) -> Arc<Self> {
        let distributor = Arc::new(Self {
            mesh: Arc::clone(&mesh),
            pending: Mutex::new(HashMap::new()),
            rr_index: AtomicUsize::new(0),
            metrics: DistributorMetrics::default(),
        });
        mesh.set_result_sink(Arc::clone(&distributor) as Arc<dyn TaskResultSink>);
        distributor
    }

    /// Delegate a task to the mesh and await its result.
    ///
    /// Walks candidates in selection order, at most `max_retries + 1`
    /// attempts. Each accepted delegation is awaited up to the configured
    /// delegation timeout; timeout, cancellation, and peer rejection all
    /// advance to the next candidate. The last recorded error surfaces
    /// when every attempt fails.
    pub async fn distribute(
        &self,
        task_text: &str,
        session_id: &str,
        constraints: Option<TaskConstraints>,
    ) -> Result<SwarmTaskResult, SwarmError> {
        let candidates = self.select_candidates(constraints.as_ref());
        if candidates.is_empty() {
            return Err(SwarmError::NoSuitablePeers);
        }

        let timeout = self.mesh.config().delegation_timeout;
        let max_attempts = self.mesh.config().max_retries + 1;
        let mut last_error = SwarmError::NoSuitablePeers;

        for peer_node_id in candidates.into_iter().take(max_attempts) {
            self.metrics.attempts.fetch_add(1, Ordering::Relaxed);

            let ticket = self
                .mesh
                .delegate_task(&peer_node_id, task_text, session_id, constraints.clone())
                .await;
            if !ticket.accepted {
                self.metrics.rejected.fetch_add(1, Ordering::Relaxed);
                let reason = ticket
                    .reason
                    .unwrap_or_else(|| "peer rejected delegation".to_string());
                tracing::debug!(peer = %peer_node_id, reason = %reason, "delegation attempt rejected");
                last_error = SwarmError::DelegationRejected { reason };
                continue;
            }
            let task_id = match ticket.task_id {
                Some(id) => id,
                None => continue,
            };
            self.metrics.accepted.fetch_add(1, Ordering::Relaxed);

            let rx = self.register(task_id.clone(), peer_node_id.clone()).await?;
            match tokio::time::timeout(timeout, rx).await {
                Ok(Ok(result)) => {
                    self.metrics.resolved.fetch_add(1, Ordering::Relaxed);
                    return Ok(result);
                }
                Ok(Err(_)) => {
                    // Sender dropped without a result: cancel_all.
                    self.metrics.cancelled.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(task_id = %task_id, "delegation cancelled while pending");
                    last_error = SwarmError::DelegationCancelled { task_id };
                }
                Err(_) => {
                    self.pending.lock().await.remove(&task_id);
                    self.metrics.timeouts.fetch_add(1, Ordering::Relaxed);
                    let waited_ms = timeout.as_millis() as u64;
                    tracing::warn!(
                        task_id = %task_id,
                        peer = %peer_node_id,
                        waited_ms,
                        "delegation timed out"
                    );
                    last_error = SwarmError::DelegationTimeout { task_id, waited_ms };
                }
            }
        }

        Err(last_error)
    }

    /// Correlate a posted-back result with its outstanding delegation.
    /// Late or unknown results return false and are otherwise ignored.
    pub async fn resolve_task(&self, result: SwarmTaskResult) -> bool {
        let delegation = self.pending.lock().await.remove(&result.task_id);
        match delegation {
            Some(delegation) => {
                tracing::debug!(
                    task_id = %result.task_id,
                    peer = %delegation.peer_node_id,
                    elapsed_ms = delegation.sent_at.elapsed().as_millis() as u64,
                    "delegation resolved"
                );
                let _ = delegation.tx.send(result);
                true
            }
            None => {
                tracing::debug!(task_id = %result.task_id, "ignoring late or unknown task result");
                false
            }
        }
    }

    /// Reject every outstanding delegation. Canonical shutdown path.
    pub async fn cancel_all(&self) {
        let mut pending = self.pending.lock().await;
        let count = pending.len();
        // Dropping the senders rejects the awaiting receivers.
        pending.clear();
        if count > 0 {
            tracing::info!(count, "cancelled outstanding delegations");
        }
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            attempts: self.metrics.attempts.load(Ordering::Relaxed),
            accepted: self.metrics.accepted.load(Ordering::Relaxed),
            rejected: self.metrics.rejected.load(Ordering::Relaxed),
            resolved: self.metrics.resolved.load(Ordering::Relaxed),
            timeouts: self.metrics.timeouts.load(Ordering::Relaxed),
            cancelled: self.metrics.cancelled.load(Ordering::Relaxed),
        }
    }

    /// Candidate node ids in attempt order.
    ///
    /// Capability matching applies when the strategy asks for it and the
    /// constraints carry a non-empty allowlist; any overlap qualifies.
    /// Otherwise all active peers are rotated by a persistent index so
    /// successive calls prefer different starting peers.
    fn select_candidates(&self, constraints: Option<&TaskConstraints>) -> Vec<String> {
        let allowlist = constraints
            .and_then(|c| c.tool_allowlist.as_ref())
            .filter(|list| !list.is_empty());

        if self.mesh.config().strategy == SelectionStrategy::CapabilityMatch {
            if let Some(allowlist) = allowlist {
                let mut matched: Vec<String> = self
                    .mesh
                    .active_peers()
                    .into_iter()
                    .filter(|entry| {
                        entry
                            .identity
                            .capabilities
                            .iter()
                            .any(|c| allowlist.contains(c))
                    })
                    .map(|entry| entry.identity.node_id)
                    .collect();
                matched.sort();
                return matched;
            }
        }

        let mut active: Vec<String> = self
            .mesh
            .active_peers()
            .into_iter()
            .map(|entry| entry.identity.node_id)
            .collect();
        if active.is_empty() {
            return active;
        }
        active.sort();
        let start = self.rr_index.fetch_add(1, Ordering::Relaxed) % active.len();
        active.rotate_left(start);
        active
    }

    async fn register(
        &self,
        task_id: String,
        peer_node_id: String,
    ) -> Result<oneshot::Receiver<SwarmTaskResult>, SwarmError> {
        let mut pending = self.pending.lock().await;
        if pending.len() >= MAX_PENDING_DELEGATIONS {
            return Err(SwarmError::Saturated {
                max_pending: MAX_PENDING_DELEGATIONS,
            });
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(
            task_id,
            ActiveDelegation {
                peer_node_id,
                sent_at: Instant::now(),
                tx,
            },
        );
        Ok(rx)
    }
}

#[async_trait]
impl TaskResultSink for WorkDistributor {
    async fn on_task_result(&self, result: SwarmTaskResult) -> bool {
        self.resolve_task(result).await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::extract::State;
    use axum::routing::post;
    use axum::{Json, Router};
    use tokio::sync::mpsc;

    use super::*;
    use crate::config::SwarmConfig;
    use crate::settings::Settings;
    use crate::swarm::protocol::{
        DelegationReply, NodeIdentity, SwarmTaskRequest, SwarmTaskStatus,
    };

    fn test_config() -> SwarmConfig {
        let mut settings = Settings::default();
        settings.swarm.enabled = true;
        let mut config = SwarmConfig::resolve(&settings).unwrap();
        config.request_timeout = Duration::from_millis(500);
        config
    }

    fn identity(node_id: &str, api_url: &str, capabilities: &[&str]) -> NodeIdentity {
        NodeIdentity {
            node_id: node_id.to_string(),
            display_name: node_id.to_string(),
            api_url: api_url.to_string(),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            version: "0.3.0".to_string(),
        }
    }

    fn constraints_with_allowlist(tools: &[&str]) -> TaskConstraints {
        TaskConstraints {
            tool_allowlist: Some(tools.iter().map(|t| t.to_string()).collect()),
            ..TaskConstraints::default()
        }
    }

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        format!("http://{addr}")
    }

    /// A peer endpoint that accepts every delegation and reports each
    /// received task id on a channel.
    async fn accepting_peer(task_ids: mpsc::Sender<String>) -> String {
        let router = Router::new()
            .route(
                "/task/request",
                post(
                    |State(tx): State<mpsc::Sender<String>>,
                     Json(req): Json<SwarmTaskRequest>| async move {
                        let _ = tx.send(req.task_id).await;
                        Json(DelegationReply::accepted("sess-remote"))
                    },
                ),
            )
            .with_state(task_ids);
        serve(router).await
    }

    async fn rejecting_peer() -> String {
        let router = Router::new().route(
            "/task/request",
            post(|Json(_req): Json<SwarmTaskRequest>| async move {
                Json(DelegationReply::rejected("at capacity"))
            }),
        );
        serve(router).await
    }

    fn result_for(task_id: &str, peer: &str) -> SwarmTaskResult {
        SwarmTaskResult {
            task_id: task_id.to_string(),
            peer_node_id: peer.to_string(),
            peer_session_id: "sess-remote".to_string(),
            status: SwarmTaskStatus::Completed,
            findings: serde_json::json!([]),
            tokens_used: 10,
            cost_usd: 0.01,
            duration_ms: 5,
        }
    }

    #[tokio::test]
    async fn distribute_without_peers_fails_fast() {
        let mesh = MeshManager::new(test_config(), None);
        let distributor = WorkDistributor::new(mesh);
        let err = distributor.distribute("task", "sess-1", None).await.unwrap_err();
        assert!(matches!(err, SwarmError::NoSuitablePeers));
    }

    #[tokio::test]
    async fn round_robin_rotates_first_candidate() {
        let mesh = MeshManager::new(test_config(), None);
        mesh.handle_join(identity("alpha", "http://alpha:3100", &[])).unwrap();
        mesh.handle_join(identity("bravo", "http://bravo:3100", &[])).unwrap();
        mesh.handle_join(identity("charlie", "http://charlie:3100", &[])).unwrap();
        let distributor = WorkDistributor::new(mesh);

        let firsts: Vec<String> = (0..3)
            .map(|_| distributor.select_candidates(None)[0].clone())
            .collect();
        assert_eq!(firsts, vec!["alpha", "bravo", "charlie"]);

        // The rotation wraps and survives across calls.
        assert_eq!(distributor.select_candidates(None)[0], "alpha");
    }

    #[tokio::test]
    async fn capability_match_selects_overlapping_peers() {
        let mut config = test_config();
        config.strategy = SelectionStrategy::CapabilityMatch;
        let mesh = MeshManager::new(config, None);
        mesh.handle_join(identity("alpha", "http://alpha:3100", &["read-file"]))
            .unwrap();
        mesh.handle_join(identity("bravo", "http://bravo:3100", &["shell", "search"]))
            .unwrap();
        mesh.handle_join(identity("charlie", "http://charlie:3100", &["search"]))
            .unwrap();
        let distributor = WorkDistributor::new(mesh);

        let candidates =
            distributor.select_candidates(Some(&constraints_with_allowlist(&["search"])));
        assert_eq!(candidates, vec!["bravo", "charlie"]);

        // An empty allowlist falls back to plain rotation over all peers.
        let all = distributor.select_candidates(Some(&constraints_with_allowlist(&[])));
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn distribute_retries_past_rejecting_peer_and_resolves() {
        let reject_url = rejecting_peer().await;
        let (task_tx, mut task_rx) = mpsc::channel(1);
        let accept_url = accepting_peer(task_tx).await;

        let mesh = MeshManager::new(test_config(), None);
        mesh.handle_join(identity("alpha", &reject_url, &[])).unwrap();
        mesh.handle_join(identity("bravo", &accept_url, &[])).unwrap();
        let distributor = WorkDistributor::new(Arc::clone(&mesh));

        // Post the result back once the accepting peer sees the task. The
        // peer observes the task id before the originator registers the
        // delegation, so retry until correlation succeeds.
        let resolver = Arc::clone(&distributor);
        tokio::spawn(async move {
            let task_id = task_rx.recv().await.expect("task dispatched");
            for _ in 0..100 {
                if resolver.resolve_task(result_for(&task_id, "bravo")).await {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("delegation was never registered");
        });

        let result = distributor
            .distribute("inspect the logs", "sess-1", None)
            .await
            .expect("distribution resolves");
        assert_eq!(result.status, SwarmTaskStatus::Completed);
        assert_eq!(result.peer_node_id, "bravo");
        assert_eq!(distributor.pending_count().await, 0);

        let metrics = distributor.metrics();
        assert_eq!(metrics.rejected, 1);
        assert_eq!(metrics.resolved, 1);
    }

    #[tokio::test]
    async fn distribute_times_out_and_leaves_no_pending_state() {
        let (task_tx, _task_rx) = mpsc::channel(4);
        let accept_url = accepting_peer(task_tx).await;

        let mut config = test_config();
        config.delegation_timeout = Duration::from_millis(50);
        config.max_retries = 0;
        let mesh = MeshManager::new(config, None);
        mesh.handle_join(identity("alpha", &accept_url, &[])).unwrap();
        let distributor = WorkDistributor::new(mesh);

        let err = distributor.distribute("task", "sess-1", None).await.unwrap_err();
        assert!(matches!(err, SwarmError::DelegationTimeout { .. }));
        assert_eq!(distributor.pending_count().await, 0);
        assert_eq!(distributor.metrics().timeouts, 1);
    }

    #[tokio::test]
    async fn cancel_all_rejects_outstanding_delegations() {
        let (task_tx, mut task_rx) = mpsc::channel(1);
        let accept_url = accepting_peer(task_tx).await;

        let mut config = test_config();
        config.max_retries = 0;
        let mesh = MeshManager::new(config, None);
        mesh.handle_join(identity("alpha", &accept_url, &[])).unwrap();
        let distributor = WorkDistributor::new(mesh);

        let caller = Arc::clone(&distributor);
        let call = tokio::spawn(async move { caller.distribute("task", "sess-1", None).await });

        // Wait until the delegation is registered, then cancel.
        let _ = task_rx.recv().await;
        while distributor.pending_count().await == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        distributor.cancel_all().await;

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, SwarmError::DelegationCancelled { .. }));
        assert_eq!(distributor.pending_count().await, 0);
    }

    #[tokio::test]
    async fn late_results_are_ignored() {
        let mesh = MeshManager::new(test_config(), None);
        let distributor = WorkDistributor::new(mesh);
        assert!(!distributor.resolve_task(result_for("ghost-task", "alpha")).await);
    }
}
