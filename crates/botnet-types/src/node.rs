//! Persisted metadata about nodes, and the liveness document nodes serve.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a known node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    #[default]
    Active,
    Inactive,
    Blacklisted,
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeStatus::Active => write!(f, "active"),
            NodeStatus::Inactive => write!(f, "inactive"),
            NodeStatus::Blacklisted => write!(f, "blacklisted"),
        }
    }
}

impl std::str::FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(NodeStatus::Active),
            "inactive" => Ok(NodeStatus::Inactive),
            "blacklisted" => Ok(NodeStatus::Blacklisted),
            other => Err(format!("unknown node status '{other}'")),
        }
    }
}

/// A node this node knows about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub domain: String,
    pub url: String,
    #[serde(default)]
    pub public_key: String,
    pub last_seen: DateTime<Utc>,
    #[serde(default)]
    pub status: NodeStatus,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    /// Fresh active record first seen now.
    pub fn new(domain: impl Into<String>, url: impl Into<String>) -> Self {
        let domain = domain.into();
        let now = Utc::now();
        Self {
            id: domain.clone(),
            domain,
            url: url.into(),
            public_key: String::new(),
            last_seen: now,
            status: NodeStatus::Active,
            version: String::new(),
            capabilities: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Liveness and summary document served at `/api/v1/info`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: String,
    pub version: String,
    pub domain: String,
    #[serde(default)]
    pub local_agents: usize,
    #[serde(default)]
    pub neighbors: usize,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub uptime_secs: u64,
    /// Most recent successful contact with any neighbor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
}
