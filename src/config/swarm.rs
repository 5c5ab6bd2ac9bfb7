use std::time::Duration;

use crate::config::helpers::{optional_env, parse_list};
use crate::error::ConfigError;
use crate::settings::Settings;

/// Peer selection strategy for the work distributor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionStrategy {
    RoundRobin,
    CapabilityMatch,
}

impl SelectionStrategy {
    fn parse(raw: &str) -> Result<Self, String> {
        match raw {
            "round_robin" => Ok(Self::RoundRobin),
            "capability_match" => Ok(Self::CapabilityMatch),
            other => Err(format!(
                "must be 'round_robin' or 'capability_match', got '{other}'"
            )),
        }
    }
}

/// Distributed swarm mesh configuration.
#[derive(Debug, Clone)]
pub struct SwarmConfig {
    pub enabled: bool,
    pub token: Option<String>,
    pub node_name: String,
    pub api_url: String,
    pub seeds: Vec<String>,
    pub mdns: bool,
    pub gossip: bool,
    pub max_peers: usize,
    pub heartbeat_interval: Duration,
    pub sweep_interval: Duration,
    pub suspected_after: Duration,
    pub unreachable_after: Duration,
    pub evict_after: Duration,
    pub delegation_timeout: Duration,
    pub nonce_window: Duration,
    pub version: String,
    pub capabilities: Vec<String>,
    pub strategy: SelectionStrategy,
    pub max_retries: usize,
    pub request_timeout: Duration,
}

impl SwarmConfig {
    pub fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let config = Self {
            enabled: optional_env("SWARM_ENABLED")?
                .map(|s| s.parse())
                .transpose()
                .map_err(|e| ConfigError::InvalidValue {
                    key: "SWARM_ENABLED".to_string(),
                    message: format!("must be 'true' or 'false': {e}"),
                })?
                .unwrap_or(settings.swarm.enabled),
            token: optional_env("SWARM_TOKEN")?.or_else(|| settings.swarm.token.clone()),
            node_name: optional_env("SWARM_NODE_NAME")?
                .unwrap_or_else(|| settings.swarm.node_name.clone()),
            api_url: optional_env("SWARM_API_URL")?
                .unwrap_or_else(|| settings.swarm.api_url.clone()),
            seeds: optional_env("SWARM_SEEDS")?
                .map(|s| parse_list(&s))
                .unwrap_or_else(|| settings.swarm.seeds.clone()),
            mdns: optional_env("SWARM_MDNS")?
                .map(|s| s.parse())
                .transpose()
                .map_err(|e| ConfigError::InvalidValue {
                    key: "SWARM_MDNS".to_string(),
                    message: format!("must be 'true' or 'false': {e}"),
                })?
                .unwrap_or(settings.swarm.mdns),
            gossip: optional_env("SWARM_GOSSIP")?
                .map(|s| s.parse())
                .transpose()
                .map_err(|e| ConfigError::InvalidValue {
                    key: "SWARM_GOSSIP".to_string(),
                    message: format!("must be 'true' or 'false': {e}"),
                })?
                .unwrap_or(settings.swarm.gossip),
            max_peers: optional_env("SWARM_MAX_PEERS")?
                .map(|s| s.parse())
                .transpose()
                .map_err(|e| ConfigError::InvalidValue {
                    key: "SWARM_MAX_PEERS".to_string(),
                    message: format!("must be a positive integer: {e}"),
                })?
                .unwrap_or(settings.swarm.max_peers),
            heartbeat_interval: Duration::from_millis(
                optional_env("SWARM_HEARTBEAT_INTERVAL_MS")?
                    .map(|s| s.parse())
                    .transpose()
                    .map_err(|e| ConfigError::InvalidValue {
                        key: "SWARM_HEARTBEAT_INTERVAL_MS".to_string(),
                        message: format!("must be a positive integer: {e}"),
                    })?
                    .unwrap_or(settings.swarm.heartbeat_interval_ms),
            ),
            sweep_interval: Duration::from_millis(
                optional_env("SWARM_SWEEP_INTERVAL_MS")?
                    .map(|s| s.parse())
                    .transpose()
                    .map_err(|e| ConfigError::InvalidValue {
                        key: "SWARM_SWEEP_INTERVAL_MS".to_string(),
                        message: format!("must be a positive integer: {e}"),
                    })?
                    .unwrap_or(settings.swarm.sweep_interval_ms),
            ),
            suspected_after: Duration::from_millis(
                optional_env("SWARM_SUSPECTED_AFTER_MS")?
                    .map(|s| s.parse())
                    .transpose()
                    .map_err(|e| ConfigError::InvalidValue {
                        key: "SWARM_SUSPECTED_AFTER_MS".to_string(),
                        message: format!("must be a positive integer: {e}"),
                    })?
                    .unwrap_or(settings.swarm.suspected_after_ms),
            ),
            unreachable_after: Duration::from_millis(
                optional_env("SWARM_UNREACHABLE_AFTER_MS")?
                    .map(|s| s.parse())
                    .transpose()
                    .map_err(|e| ConfigError::InvalidValue {
                        key: "SWARM_UNREACHABLE_AFTER_MS".to_string(),
                        message: format!("must be a positive integer: {e}"),
                    })?
                    .unwrap_or(settings.swarm.unreachable_after_ms),
            ),
            evict_after: Duration::from_millis(
                optional_env("SWARM_EVICT_AFTER_MS")?
                    .map(|s| s.parse())
                    .transpose()
                    .map_err(|e| ConfigError::InvalidValue {
                        key: "SWARM_EVICT_AFTER_MS".to_string(),
                        message: format!("must be a positive integer: {e}"),
                    })?
                    .unwrap_or(settings.swarm.evict_after_ms),
            ),
            delegation_timeout: Duration::from_millis(
                optional_env("SWARM_DELEGATION_TIMEOUT_MS")?
                    .map(|s| s.parse())
                    .transpose()
                    .map_err(|e| ConfigError::InvalidValue {
                        key: "SWARM_DELEGATION_TIMEOUT_MS".to_string(),
                        message: format!("must be a positive integer: {e}"),
                    })?
                    .unwrap_or(settings.swarm.delegation_timeout_ms),
            ),
            nonce_window: Duration::from_millis(
                optional_env("SWARM_NONCE_WINDOW_MS")?
                    .map(|s| s.parse())
                    .transpose()
                    .map_err(|e| ConfigError::InvalidValue {
                        key: "SWARM_NONCE_WINDOW_MS".to_string(),
                        message: format!("must be a positive integer: {e}"),
                    })?
                    .unwrap_or(settings.swarm.nonce_window_ms),
            ),
            version: optional_env("SWARM_VERSION")?
                .unwrap_or_else(|| settings.swarm.version.clone()),
            capabilities: optional_env("SWARM_CAPABILITIES")?
                .map(|s| parse_list(&s))
                .unwrap_or_else(|| settings.swarm.capabilities.clone()),
            strategy: match optional_env("SWARM_STRATEGY")? {
                Some(raw) => {
                    SelectionStrategy::parse(&raw).map_err(|message| ConfigError::InvalidValue {
                        key: "SWARM_STRATEGY".to_string(),
                        message,
                    })?
                }
                None => SelectionStrategy::parse(&settings.swarm.strategy).map_err(|message| {
                    ConfigError::InvalidValue {
                        key: "swarm.strategy".to_string(),
                        message,
                    }
                })?,
            },
            max_retries: optional_env("SWARM_MAX_RETRIES")?
                .map(|s| s.parse())
                .transpose()
                .map_err(|e| ConfigError::InvalidValue {
                    key: "SWARM_MAX_RETRIES".to_string(),
                    message: format!("must be a non-negative integer: {e}"),
                })?
                .unwrap_or(settings.swarm.max_retries),
            request_timeout: Duration::from_millis(
                optional_env("SWARM_REQUEST_TIMEOUT_MS")?
                    .map(|s| s.parse())
                    .transpose()
                    .map_err(|e| ConfigError::InvalidValue {
                        key: "SWARM_REQUEST_TIMEOUT_MS".to_string(),
                        message: format!("must be a positive integer: {e}"),
                    })?
                    .unwrap_or(settings.swarm.request_timeout_ms),
            ),
        };

        if let Err(e) = url::Url::parse(&config.api_url) {
            return Err(ConfigError::InvalidValue {
                key: "SWARM_API_URL".to_string(),
                message: format!("must be an absolute URL: {e}"),
            });
        }
        for seed in &config.seeds {
            if let Err(e) = url::Url::parse(seed) {
                return Err(ConfigError::InvalidValue {
                    key: "SWARM_SEEDS".to_string(),
                    message: format!("seed '{seed}' is not an absolute URL: {e}"),
                });
            }
        }

        // Sweep transitions assume suspected <= unreachable <= evict.
        if config.suspected_after > config.unreachable_after
            || config.unreachable_after > config.evict_after
        {
            return Err(ConfigError::InvalidValue {
                key: "SWARM_SUSPECTED_AFTER_MS".to_string(),
                message: format!(
                    "sweep thresholds must be ordered suspected <= unreachable <= evict, got {}ms/{}ms/{}ms",
                    config.suspected_after.as_millis(),
                    config.unreachable_after.as_millis(),
                    config.evict_after.as_millis()
                ),
            });
        }

        Ok(config)
    }
}
