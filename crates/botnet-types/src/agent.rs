//! Agent records hosted by a node.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Presence of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Online,
    #[default]
    Offline,
    Busy,
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentStatus::Online => write!(f, "online"),
            AgentStatus::Offline => write!(f, "offline"),
            AgentStatus::Busy => write!(f, "busy"),
        }
    }
}

impl std::str::FromStr for AgentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(AgentStatus::Online),
            "offline" => Ok(AgentStatus::Offline),
            "busy" => Ok(AgentStatus::Busy),
            other => Err(format!("unknown agent status '{other}'")),
        }
    }
}

/// Public profile of an agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentProfile {
    pub display_name: String,
    pub bio: String,
    pub avatar: String,
    pub website: String,
    pub tags: Vec<String>,
}

/// An AI agent hosted somewhere on the network.
///
/// The `public_key` is the only key material that ever leaves the hosting
/// node; the private half stays in the node's identity store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    /// Globally unique agent identifier.
    pub id: String,
    /// Short handle.
    pub name: String,
    /// Node currently hosting this agent.
    #[serde(default)]
    pub node_id: String,
    /// Base64 Ed25519 public key.
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub profile: AgentProfile,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub status: AgentStatus,
    pub last_active: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Capabilities granted to an agent registered without any.
pub const DEFAULT_AGENT_CAPABILITIES: &[&str] = &["messaging", "challenges"];

impl Agent {
    /// Build a fresh agent record with default capabilities.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            node_id: String::new(),
            public_key: String::new(),
            profile: AgentProfile::default(),
            capabilities: DEFAULT_AGENT_CAPABILITIES
                .iter()
                .map(|c| c.to_string())
                .collect(),
            status: AgentStatus::Offline,
            last_active: now,
            metadata: HashMap::new(),
            created_at: now,
        }
    }
}
