//! Error types for the mesh core.

use thiserror::Error;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Swarm(#[from] SwarmError),

    #[error(transparent)]
    Tool(#[from] ToolError),
}

/// Configuration resolution errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("environment variable {key} is not valid unicode")]
    NotUnicode { key: String },

    #[error("failed to read settings file {path}: {message}")]
    Read { path: String, message: String },

    #[error("failed to parse settings file {path}: {message}")]
    Parse { path: String, message: String },
}

/// Errors surfaced by the swarm membership and delegation layer.
///
/// Reply-shaped outcomes (a peer declining a delegation, a replayed nonce)
/// travel as `DelegationReply` on the wire, not as errors. These variants
/// cover failures the caller has to act on.
#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("peer table is full (max {max} peers)")]
    CapacityExceeded { max: usize },

    #[error("unknown peer {node_id}")]
    UnknownPeer { node_id: String },

    #[error("no suitable peers for distribution")]
    NoSuitablePeers,

    #[error("delegation {task_id} timed out after {waited_ms}ms")]
    DelegationTimeout { task_id: String, waited_ms: u64 },

    #[error("delegation {task_id} was cancelled")]
    DelegationCancelled { task_id: String },

    #[error("delegation rejected: {reason}")]
    DelegationRejected { reason: String },

    #[error("transport failure: {message}")]
    Transport { message: String },

    #[error("too many pending delegations (max {max_pending})")]
    Saturated { max_pending: usize },
}

/// Tool execution errors.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid tool parameters: {0}")]
    InvalidParameters(String),

    #[error("tool execution failed: {0}")]
    ExecutionFailed(String),
}
