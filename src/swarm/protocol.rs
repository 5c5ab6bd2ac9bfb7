//! Mesh wire messages.
//!
//! Defines the JSON bodies exchanged between nodes over the peer HTTP
//! endpoints. Unknown fields are ignored on decode; optional fields are
//! omitted on encode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable identity document a node serves at `GET /identity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Opaque id, unique per process instance.
    pub node_id: String,
    pub display_name: String,
    /// Absolute base URL peers use to reach this node.
    pub api_url: String,
    /// Tool names this node executes on behalf of peers.
    pub capabilities: Vec<String>,
    pub version: String,
}

/// Membership status of a peer entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PeerStatus {
    Active,
    Suspected,
    Unreachable,
    Left,
}

/// Periodic liveness announcement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatMessage {
    pub node_id: String,
    /// Sender's clock at send time. Informational; receivers measure
    /// liveness by arrival, not by this value.
    pub timestamp: DateTime<Utc>,
    pub active_sessions: u32,
    /// Load hint in [0.0, 1.0].
    pub load: f32,
}

/// One peer record inside a gossip digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipPeer {
    pub node_id: String,
    pub api_url: String,
    pub status: PeerStatus,
}

/// Opportunistic peer-list exchange. Carries only peers the sender
/// believes are active; departed peers are not propagated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GossipMessage {
    pub sender_node_id: String,
    pub peers: Vec<GossipPeer>,
}

/// Optional execution constraints attached to a delegation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_allowlist: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cost_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration_ms: Option<u64>,
}

/// Request one node sends another to execute a task in the peer's own
/// session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmTaskRequest {
    /// Originator-assigned, unique per task.
    pub task_id: String,
    pub originator_node_id: String,
    pub originator_session_id: String,
    pub task_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<TaskConstraints>,
    pub correlation_id: String,
    /// Replay-protection value, unique within the receiver's nonce window.
    pub nonce: String,
}

/// Terminal state of a delegated task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SwarmTaskStatus {
    Completed,
    Failed,
    Aborted,
}

/// Result a peer posts back to the originator once its session finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwarmTaskResult {
    pub task_id: String,
    pub peer_node_id: String,
    pub peer_session_id: String,
    pub status: SwarmTaskStatus,
    /// Opaque structured payload produced by the peer's session.
    pub findings: serde_json::Value,
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub duration_ms: u64,
}

/// Reply to `POST /task/request`: the receiving node's accept/reject
/// decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationReply {
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl DelegationReply {
    pub fn accepted(session_id: impl Into<String>) -> Self {
        Self {
            accepted: true,
            reason: None,
            session_id: Some(session_id.into()),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: Some(reason.into()),
            session_id: None,
        }
    }
}

/// Body of `POST /join`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinMessage {
    pub identity: NodeIdentity,
}

/// Body of `POST /leave`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaveMessage {
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Plain `{ok: true}` acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ack {
    pub ok: bool,
}

impl Ack {
    pub fn ok() -> Self {
        Self { ok: true }
    }
}
