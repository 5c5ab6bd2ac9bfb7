//! File-level settings.
//!
//! Loaded from a TOML file or populated with defaults. Environment
//! variables override individual fields during [`crate::config`]
//! resolution, so a settings file is optional.

use serde::Deserialize;

use crate::error::ConfigError;

/// Root settings document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub swarm: SwarmSettings,
}

/// Swarm mesh settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SwarmSettings {
    /// Whether the mesh participates at all.
    #[serde(default)]
    pub enabled: bool,

    /// Shared bearer token for peer-to-peer requests. None disables auth.
    #[serde(default)]
    pub token: Option<String>,

    /// Human-readable node name, included in the identity document.
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// This node's publicly reachable base URL.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Seed base URLs contacted on startup.
    #[serde(default)]
    pub seeds: Vec<String>,

    /// mDNS discovery flag. Accepted but currently inert.
    #[serde(default)]
    pub mdns: bool,

    /// Whether gossip digests are exchanged and processed.
    #[serde(default = "default_true")]
    pub gossip: bool,

    /// Peer table capacity.
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    #[serde(default = "default_suspected_after_ms")]
    pub suspected_after_ms: u64,

    #[serde(default = "default_unreachable_after_ms")]
    pub unreachable_after_ms: u64,

    #[serde(default = "default_evict_after_ms")]
    pub evict_after_ms: u64,

    /// How long a `distribute` attempt waits for a posted-back result.
    #[serde(default = "default_delegation_timeout_ms")]
    pub delegation_timeout_ms: u64,

    /// Replay-protection window for task-request nonces.
    #[serde(default = "default_nonce_window_ms")]
    pub nonce_window_ms: u64,

    /// Version string advertised in the identity document.
    #[serde(default = "default_version")]
    pub version: String,

    /// Tool names this node executes on behalf of peers.
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Peer selection strategy: "round_robin" or "capability_match".
    #[serde(default = "default_strategy")]
    pub strategy: String,

    /// Additional peers tried after the first delegation attempt fails.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Connect/read timeout for outbound peer requests.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_node_name() -> String {
    "hivemesh".to_string()
}

fn default_api_url() -> String {
    "http://127.0.0.1:3100".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_peers() -> usize {
    50
}

fn default_heartbeat_interval_ms() -> u64 {
    5_000
}

fn default_sweep_interval_ms() -> u64 {
    10_000
}

fn default_suspected_after_ms() -> u64 {
    15_000
}

fn default_unreachable_after_ms() -> u64 {
    30_000
}

fn default_evict_after_ms() -> u64 {
    120_000
}

fn default_delegation_timeout_ms() -> u64 {
    300_000
}

fn default_nonce_window_ms() -> u64 {
    300_000
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_strategy() -> String {
    "round_robin".to_string()
}

fn default_max_retries() -> usize {
    2
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl Default for SwarmSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            token: None,
            node_name: default_node_name(),
            api_url: default_api_url(),
            seeds: Vec::new(),
            mdns: false,
            gossip: default_true(),
            max_peers: default_max_peers(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            suspected_after_ms: default_suspected_after_ms(),
            unreachable_after_ms: default_unreachable_after_ms(),
            evict_after_ms: default_evict_after_ms(),
            delegation_timeout_ms: default_delegation_timeout_ms(),
            nonce_window_ms: default_nonce_window_ms(),
            version: default_version(),
            capabilities: Vec::new(),
            strategy: default_strategy(),
            max_retries: default_max_retries(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file at the given path.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_string(),
            message: e.to_string(),
        })
    }
}
