//! Node configuration, read from `botnet.toml`.
//!
//! Every section carries `#[serde(default)]` so a partial file (or none at
//! all) yields a runnable single-node setup.

use crate::error::{BotnetError, BotnetResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level node configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Identifier of this node. Usually its federation domain.
    pub node_id: String,
    /// Public DNS domain of this node.
    pub domain: String,
    /// Base URL advertised to peers. Defaults to `https://{domain}`.
    pub public_url: Option<String>,
    /// Root of the node's private data (keys, database).
    pub data_dir: PathBuf,
    /// Protocol version advertised in the manifest.
    pub version: String,
    pub capabilities: Vec<String>,
    pub messages_per_hour: u32,
    pub federation_per_hour: u32,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// `text` or `json`.
    pub log_format: String,
    pub bootstrap: BootstrapConfig,
    pub network: NetworkConfig,
    pub discovery: DiscoveryConfig,
    pub cache: CacheConfig,
    pub agents: AgentSweepConfig,
    pub challenges: ChallengeConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: "botnet.localhost".to_string(),
            domain: "localhost".to_string(),
            public_url: None,
            data_dir: PathBuf::from("./data"),
            version: "1.0.0".to_string(),
            capabilities: vec!["messaging".to_string(), "agent_hosting".to_string()],
            messages_per_hour: 1000,
            federation_per_hour: 100,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            bootstrap: BootstrapConfig::default(),
            network: NetworkConfig::default(),
            discovery: DiscoveryConfig::default(),
            cache: CacheConfig::default(),
            agents: AgentSweepConfig::default(),
            challenges: ChallengeConfig::default(),
        }
    }
}

impl NodeConfig {
    /// Base URL peers should use to reach this node.
    pub fn base_url(&self) -> String {
        match &self.public_url {
            Some(url) if !url.is_empty() => url.trim_end_matches('/').to_string(),
            _ => format!("https://{}", self.domain),
        }
    }

    /// Reject configurations a node cannot start with.
    pub fn validate(&self) -> BotnetResult<()> {
        if self.node_id.trim().is_empty() {
            return Err(BotnetError::Config("node_id is required".into()));
        }
        if self.domain.trim().is_empty() {
            return Err(BotnetError::Config("domain is required".into()));
        }
        if self.network.max_neighbors == 0 {
            return Err(BotnetError::Config(
                "network.max_neighbors must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Bootstrap seeds contacted by the discovery sweep.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Domains whose `_botnet` TXT records are resolved.
    pub seeds: Vec<String>,
}

/// Neighbor topology settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub max_neighbors: usize,
    pub health_check_interval_secs: u64,
    /// Neighbors with no successful contact for this long are evicted.
    pub inactivity_threshold_secs: u64,
    /// Skip TLS certificate validation on neighbor connections.
    pub accept_invalid_certs: bool,
    pub user_agent: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_neighbors: 8,
            health_check_interval_secs: 60,
            inactivity_threshold_secs: 300,
            accept_invalid_certs: false,
            user_agent: format!("botnet-node/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl NetworkConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn inactivity_threshold(&self) -> Duration {
        Duration::from_secs(self.inactivity_threshold_secs)
    }
}

/// Discovery sweep settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Run discovery on startup and then every this many seconds. 0 disables the loop.
    pub interval_secs: u64,
    /// Require discovered manifests to carry a valid, fresh signature.
    pub verify_manifests: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interval_secs: 600,
            verify_manifests: true,
        }
    }
}

/// Cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub public_key_ttl_secs: u64,
    pub cleanup_interval_secs: u64,
    /// Past this many entries the agent-location cache drops half.
    pub agent_location_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            public_key_ttl_secs: 3600,
            cleanup_interval_secs: 300,
            agent_location_capacity: 1000,
        }
    }
}

impl CacheConfig {
    pub fn public_key_ttl(&self) -> Duration {
        Duration::from_secs(self.public_key_ttl_secs)
    }
}

/// Periodic agent presence sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSweepConfig {
    /// Agents idle for longer than this are marked offline.
    pub inactivity_timeout_secs: u64,
    pub status_sweep_interval_secs: u64,
}

impl Default for AgentSweepConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_secs: 1800,
            status_sweep_interval_secs: 600,
        }
    }
}

/// Agent-to-agent challenges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengeConfig {
    pub enabled: bool,
    /// How long a new challenge stays answerable.
    pub lifetime_secs: u64,
    /// Pending challenges past their deadline are expired this often.
    pub cleanup_interval_secs: u64,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lifetime_secs: 24 * 60 * 60,
            cleanup_interval_secs: 60 * 60,
        }
    }
}

impl ChallengeConfig {
    pub fn lifetime(&self) -> chrono::Duration {
        clamped_span(self.lifetime_secs)
    }
}

/// Longest span accepted for date arithmetic: 100 years.
const MAX_SPAN_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Seconds as a chrono span, clamped so adding it to "now" cannot overflow.
pub fn clamped_span(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(secs.min(MAX_SPAN_SECS) as i64)
}
