//! Mesh manager: lifecycle owner of the swarm core.
//!
//! Owns the local node identity and the peer table, drives the periodic
//! heartbeat and sweep loops, services inbound membership and task
//! messages, enforces nonce replay protection, and mediates outbound
//! delegation. Result correlation lives in the work distributor; the
//! manager only forwards posted-back results to the registered sink.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::SwarmConfig;
use crate::error::SwarmError;
use crate::swarm::discovery::PeerDiscovery;
use crate::swarm::events::{MeshEvent, MeshEvents};
use crate::swarm::peer_table::{PeerEntry, PeerTable, SweepThresholds};
use crate::swarm::protocol::{
    DelegationReply, GossipMessage, GossipPeer, HeartbeatMessage, JoinMessage, LeaveMessage,
    NodeIdentity, PeerStatus, SwarmTaskRequest, SwarmTaskResult, TaskConstraints,
};
use crate::swarm::transport::PeerTransport;

/// Decides whether this node accepts a delegated task and, if so, under
/// which session it will run. The session itself executes independently
/// and posts its result back over `POST /task/result`.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn on_task_request(&self, req: &SwarmTaskRequest) -> DelegationReply;
}

/// Receives results peers post back. Typically the work distributor.
#[async_trait]
pub trait TaskResultSink: Send + Sync {
    /// Returns true when the result matched an outstanding delegation.
    async fn on_task_result(&self, result: SwarmTaskResult) -> bool;
}

/// Outcome of one outbound delegation attempt.
#[derive(Debug, Clone)]
pub struct DelegationTicket {
    pub accepted: bool,
    pub reason: Option<String>,
    /// Generated task id; None when the attempt failed before composing a
    /// request.
    pub task_id: Option<String>,
}

pub struct MeshManager {
    config: SwarmConfig,
    local: NodeIdentity,
    table: Arc<RwLock<PeerTable>>,
    transport: Arc<PeerTransport>,
    discovery: Arc<PeerDiscovery>,
    events: MeshEvents,
    /// nonce -> first seen. Expired lazily against `config.nonce_window`.
    nonces: Mutex<HashMap<String, Instant>>,
    session_factory: Option<Arc<dyn SessionFactory>>,
    result_sink: RwLock<Option<Arc<dyn TaskResultSink>>>,
    active_sessions: AtomicU32,
    load_hint: Mutex<f32>,
    running: AtomicBool,
    heartbeat_task: Mutex<Option<JoinHandle<()>>>,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
}

impl MeshManager {
    /// Build a manager with a fresh per-process node id.
    pub fn new(config: SwarmConfig, session_factory: Option<Arc<dyn SessionFactory>>) -> Arc<Self> {
        let local = NodeIdentity {
            node_id: Uuid::new_v4().to_string(),
            display_name: config.node_name.clone(),
            api_url: config.api_url.clone(),
            capabilities: config.capabilities.clone(),
            version: config.version.clone(),
        };
        Self::with_identity(config, local, session_factory)
    }

    /// Build a manager with an explicit identity.
    pub fn with_identity(
        config: SwarmConfig,
        local: NodeIdentity,
        session_factory: Option<Arc<dyn SessionFactory>>,
    ) -> Arc<Self> {
        let table = Arc::new(RwLock::new(PeerTable::new(config.max_peers)));
        let transport = Arc::new(PeerTransport::new(
            config.token.clone(),
            config.request_timeout,
        ));
        let events = MeshEvents::new();

        // Discovered peers enter the table immediately and get a join
        // announce so membership converges in both directions.
        let callback_table = Arc::clone(&table);
        let callback_transport = Arc::clone(&transport);
        let callback_events = events.clone();
        let callback_local = local.clone();
        let discovery = Arc::new(PeerDiscovery::new(
            config.mdns,
            config.gossip,
            config.seeds.clone(),
            local.clone(),
            Arc::clone(&transport),
            Arc::new(move |identity: NodeIdentity| {
                let node_id = identity.node_id.clone();
                let api_url = identity.api_url.clone();
                match callback_table.write().expect("peer table lock").add(identity) {
                    Ok(_) => {
                        callback_events.emit(MeshEvent::PeerDiscovered {
                            node_id: node_id.clone(),
                        });
                        let transport = Arc::clone(&callback_transport);
                        let join = JoinMessage {
                            identity: callback_local.clone(),
                        };
                        tokio::spawn(async move {
                            let resp = transport.send_join(&api_url, &join).await;
                            if !resp.success {
                                tracing::debug!(
                                    node_id = %node_id,
                                    "join announce failed: {:?}",
                                    resp.error
                                );
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(node_id = %node_id, "discovered peer not added: {}", e);
                    }
                }
            }),
        ));

        Arc::new(Self {
            config,
            local,
            table,
            transport,
            discovery,
            events,
            nonces: Mutex::new(HashMap::new()),
            session_factory,
            result_sink: RwLock::new(None),
            active_sessions: AtomicU32::new(0),
            load_hint: Mutex::new(0.0),
            running: AtomicBool::new(false),
            heartbeat_task: Mutex::new(None),
            sweep_task: Mutex::new(None),
        })
    }

    /// Start discovery and the periodic loops. Idempotent.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(
            node_id = %self.local.node_id,
            api_url = %self.local.api_url,
            "mesh node starting"
        );

        self.discovery.start().await;

        let manager = Arc::clone(self);
        let heartbeat = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.config.heartbeat_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                manager.heartbeat_tick().await;
            }
        });
        *self.heartbeat_task.lock().expect("timer lock") = Some(heartbeat);

        let manager = Arc::clone(self);
        let sweep = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.config.sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                manager.sweep_tick();
            }
        });
        *self.sweep_task.lock().expect("timer lock") = Some(sweep);
    }

    /// Cancel the loops, announce departure, and clear transient state.
    /// Idempotent.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.heartbeat_task.lock().expect("timer lock").take() {
            handle.abort();
        }
        if let Some(handle) = self.sweep_task.lock().expect("timer lock").take() {
            handle.abort();
        }

        let peers = self.active_peer_endpoints();
        let leave = LeaveMessage {
            node_id: self.local.node_id.clone(),
            reason: Some("shutting down".to_string()),
        };
        for (node_id, api_url) in peers {
            let resp = self.transport.send_leave(&api_url, &leave).await;
            if !resp.success {
                tracing::debug!(node_id = %node_id, "leave announce failed: {:?}", resp.error);
            }
        }

        self.discovery.stop();
        self.nonces.lock().expect("nonce lock").clear();
        tracing::info!(node_id = %self.local.node_id, "mesh node stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.local
    }

    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    pub fn discovery(&self) -> &Arc<PeerDiscovery> {
        &self.discovery
    }

    pub fn transport(&self) -> &Arc<PeerTransport> {
        &self.transport
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<MeshEvent> {
        self.events.subscribe()
    }

    /// Register the sink that receives posted-back task results.
    pub fn set_result_sink(&self, sink: Arc<dyn TaskResultSink>) {
        *self.result_sink.write().expect("result sink lock") = Some(sink);
    }

    /// Hint carried in outbound heartbeats.
    pub fn set_active_sessions(&self, count: u32) {
        self.active_sessions.store(count, Ordering::Relaxed);
    }

    /// Load hint in [0.0, 1.0]; values outside the range are clamped.
    pub fn set_load(&self, load: f32) {
        *self.load_hint.lock().expect("load lock") = load.clamp(0.0, 1.0);
    }

    // ------------------------------------------------------------------
    // Membership views
    // ------------------------------------------------------------------

    pub fn peer(&self, node_id: &str) -> Option<PeerEntry> {
        self.table.read().expect("peer table lock").get(node_id).cloned()
    }

    pub fn all_peers(&self) -> Vec<PeerEntry> {
        self.table.read().expect("peer table lock").all()
    }

    pub fn active_peers(&self) -> Vec<PeerEntry> {
        self.table.read().expect("peer table lock").active()
    }

    pub fn peers_by_status(&self, status: PeerStatus) -> Vec<PeerEntry> {
        self.table.read().expect("peer table lock").by_status(status)
    }

    pub fn peers_by_capability(&self, capability: &str) -> Vec<PeerEntry> {
        self.table
            .read()
            .expect("peer table lock")
            .by_capability(capability)
    }

    // ------------------------------------------------------------------
    // Inbound handlers (invoked by the web layer)
    // ------------------------------------------------------------------

    pub fn handle_join(&self, identity: NodeIdentity) -> Result<PeerEntry, SwarmError> {
        let node_id = identity.node_id.clone();
        let entry = self.table.write().expect("peer table lock").add(identity)?;
        // A joined peer is known; discovery must not announce it again.
        self.discovery.mark_known(&node_id);
        self.events.emit(MeshEvent::PeerJoined {
            node_id: node_id.clone(),
        });
        tracing::info!(node_id = %node_id, "peer joined");
        Ok(entry)
    }

    pub fn handle_leave(&self, node_id: &str) -> bool {
        let marked = self.table.write().expect("peer table lock").mark_left(node_id);
        if marked {
            self.events.emit(MeshEvent::PeerLeft {
                node_id: node_id.to_string(),
            });
            tracing::info!(node_id = %node_id, "peer left");
        }
        marked
    }

    pub fn handle_heartbeat(&self, msg: &HeartbeatMessage, observed_latency_ms: u64) -> bool {
        self.table
            .write()
            .expect("peer table lock")
            .record_heartbeat(&msg.node_id, observed_latency_ms)
    }

    /// Feed a digest through discovery, then answer with the local digest
    /// (self plus known active peers, excluding the sender).
    pub async fn handle_gossip(&self, msg: &GossipMessage) -> GossipMessage {
        self.discovery.process_gossip(&msg.peers).await;
        self.gossip_digest(Some(&msg.sender_node_id))
    }

    /// Replay-protected entry point for inbound delegations.
    pub async fn handle_task_request(&self, req: &SwarmTaskRequest) -> DelegationReply {
        self.expire_nonces();

        if self
            .nonces
            .lock()
            .expect("nonce lock")
            .contains_key(&req.nonce)
        {
            tracing::warn!(
                task_id = %req.task_id,
                originator = %req.originator_node_id,
                "rejected replayed nonce"
            );
            return DelegationReply::rejected("Replayed nonce");
        }

        // A node without a session factory rejects without burning the
        // nonce, so the originator can retry elsewhere with the same
        // request.
        let factory = match &self.session_factory {
            Some(factory) => Arc::clone(factory),
            None => return DelegationReply::rejected("Node does not accept delegated tasks"),
        };

        self.nonces
            .lock()
            .expect("nonce lock")
            .insert(req.nonce.clone(), Instant::now());

        factory.on_task_request(req).await
    }

    /// Lazy expiry: drop ledger entries older than the nonce window.
    fn expire_nonces(&self) {
        let window = self.config.nonce_window;
        self.nonces
            .lock()
            .expect("nonce lock")
            .retain(|_, first_seen| first_seen.elapsed() < window);
    }

    pub async fn handle_task_result(&self, result: SwarmTaskResult) -> bool {
        let task_id = result.task_id.clone();
        let sink = self.result_sink.read().expect("result sink lock").clone();
        match sink {
            Some(sink) => {
                let matched = sink.on_task_result(result).await;
                if matched {
                    self.events.emit(MeshEvent::TaskResolved { task_id });
                }
                matched
            }
            None => {
                tracing::debug!(task_id = %task_id, "task result arrived with no sink registered");
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Outbound delegation
    // ------------------------------------------------------------------

    /// Compose and send a task request to one peer. Does not await the
    /// task's result; correlation is the distributor's job.
    pub async fn delegate_task(
        &self,
        peer_node_id: &str,
        task_text: &str,
        originator_session_id: &str,
        constraints: Option<TaskConstraints>,
    ) -> DelegationTicket {
        let peer = self.peer(peer_node_id);
        let peer = match peer {
            Some(entry) if entry.status == PeerStatus::Active => entry,
            _ => {
                return DelegationTicket {
                    accepted: false,
                    reason: Some(format!("peer {peer_node_id} not active")),
                    task_id: None,
                };
            }
        };

        let req = SwarmTaskRequest {
            task_id: Uuid::new_v4().to_string(),
            originator_node_id: self.local.node_id.clone(),
            originator_session_id: originator_session_id.to_string(),
            task_text: task_text.to_string(),
            constraints,
            correlation_id: Uuid::new_v4().to_string(),
            nonce: Uuid::new_v4().to_string(),
        };

        let resp = self
            .transport
            .send_task_request(&peer.identity.api_url, &req)
            .await;
        if !resp.success {
            return DelegationTicket {
                accepted: false,
                reason: Some(
                    resp.error
                        .unwrap_or_else(|| "transport failure".to_string()),
                ),
                task_id: Some(req.task_id),
            };
        }

        match resp.decode::<DelegationReply>() {
            Some(reply) => {
                if reply.accepted {
                    tracing::info!(
                        task_id = %req.task_id,
                        peer = %peer_node_id,
                        "task delegated"
                    );
                    self.events.emit(MeshEvent::TaskDelegated {
                        task_id: req.task_id.clone(),
                        peer_node_id: peer_node_id.to_string(),
                    });
                }
                DelegationTicket {
                    accepted: reply.accepted,
                    reason: reply.reason,
                    task_id: Some(req.task_id),
                }
            }
            None => DelegationTicket {
                accepted: false,
                reason: Some("peer returned an undecodable reply".to_string()),
                task_id: Some(req.task_id),
            },
        }
    }

    // ------------------------------------------------------------------
    // Periodic loops
    // ------------------------------------------------------------------

    async fn heartbeat_tick(&self) {
        let peers = self.active_peer_endpoints();
        if peers.is_empty() {
            return;
        }

        let msg = HeartbeatMessage {
            node_id: self.local.node_id.clone(),
            timestamp: Utc::now(),
            active_sessions: self.active_sessions.load(Ordering::Relaxed),
            load: *self.load_hint.lock().expect("load lock"),
        };

        for (node_id, api_url) in peers {
            let resp = self.transport.send_heartbeat(&api_url, &msg).await;
            if !resp.success {
                let failures = self
                    .table
                    .write()
                    .expect("peer table lock")
                    .record_failure(&node_id);
                tracing::debug!(node_id = %node_id, failures, "heartbeat send failed");
                continue;
            }

            if self.config.gossip {
                let digest = self.gossip_digest(Some(&node_id));
                let resp = self.transport.send_gossip(&api_url, &digest).await;
                if resp.success {
                    if let Some(reply) = resp.decode::<GossipMessage>() {
                        self.discovery.process_gossip(&reply.peers).await;
                    }
                } else {
                    tracing::debug!(node_id = %node_id, "gossip exchange failed: {:?}", resp.error);
                }
            }
        }
    }

    fn sweep_tick(&self) {
        let outcome = self
            .table
            .write()
            .expect("peer table lock")
            .sweep(&self.sweep_thresholds());

        for node_id in &outcome.suspected {
            tracing::warn!(node_id = %node_id, "peer suspected");
            self.events.emit(MeshEvent::PeerSuspected {
                node_id: node_id.clone(),
            });
        }
        for node_id in &outcome.unreachable {
            tracing::warn!(node_id = %node_id, "peer unreachable");
            self.events.emit(MeshEvent::PeerUnreachable {
                node_id: node_id.clone(),
            });
        }
        for node_id in &outcome.evicted {
            tracing::warn!(node_id = %node_id, "peer evicted");
            // Allow eviction to be undone by a later re-discovery.
            self.discovery.forget(node_id);
            self.events.emit(MeshEvent::PeerEvicted {
                node_id: node_id.clone(),
            });
        }
    }

    fn sweep_thresholds(&self) -> SweepThresholds {
        SweepThresholds {
            suspected_after: self.config.suspected_after,
            unreachable_after: self.config.unreachable_after,
            evict_after: self.config.evict_after,
        }
    }

    fn gossip_digest(&self, exclude: Option<&str>) -> GossipMessage {
        let mut peers = vec![GossipPeer {
            node_id: self.local.node_id.clone(),
            api_url: self.local.api_url.clone(),
            status: PeerStatus::Active,
        }];
        for entry in self.active_peers() {
            if exclude == Some(entry.identity.node_id.as_str()) {
                continue;
            }
            peers.push(GossipPeer {
                node_id: entry.identity.node_id,
                api_url: entry.identity.api_url,
                status: entry.status,
            });
        }
        GossipMessage {
            sender_node_id: self.local.node_id.clone(),
            peers,
        }
    }

    fn active_peer_endpoints(&self) -> Vec<(String, String)> {
        self.active_peers()
            .into_iter()
            .map(|e| (e.identity.node_id, e.identity.api_url))
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn nonce_count(&self) -> usize {
        self.nonces.lock().expect("nonce lock").len()
    }
}
