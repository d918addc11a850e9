//! Agent location cache and cross-neighbor location queries.

use crate::registry::NeighborEntry;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

/// Default number of entries kept before the cache halves itself.
pub const DEFAULT_LOCATION_CAPACITY: usize = 1000;

/// Agent id to hosting node id.
///
/// Once the cache grows past its capacity, half of it is dropped in
/// arbitrary order.
pub struct AgentLocationCache {
    entries: RwLock<HashMap<String, String>>,
    capacity: usize,
}

impl AgentLocationCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn get(&self, agent_id: &str) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(agent_id).cloned()
    }

    pub fn set(&self, agent_id: &str, node_id: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(agent_id.to_string(), node_id.to_string());
        if entries.len() > self.capacity {
            let drop_count = entries.len() / 2;
            let victims: Vec<String> = entries.keys().take(drop_count).cloned().collect();
            for key in victims {
                entries.remove(&key);
            }
            debug!(dropped = drop_count, "Agent location cache halved");
        }
    }

    pub fn remove(&self, agent_id: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(agent_id);
    }

    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for AgentLocationCache {
    fn default() -> Self {
        Self::new(DEFAULT_LOCATION_CAPACITY)
    }
}

/// A positive answer to a location query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocatedAgent {
    /// Node hosting the agent.
    pub node_id: String,
    /// Neighbor that answered.
    pub via_domain: String,
}

/// Ask each neighbor in turn where `agent_id` lives. First answer wins.
pub async fn query_neighbors(agent_id: &str, neighbors: &[NeighborEntry]) -> Option<LocatedAgent> {
    for neighbor in neighbors {
        match neighbor.client.locate_agent(agent_id).await {
            Ok(Some(location)) if !location.node_id.is_empty() => {
                return Some(LocatedAgent {
                    node_id: location.node_id,
                    via_domain: neighbor.domain.clone(),
                });
            }
            Ok(_) => {}
            Err(e) => {
                debug!(agent = %agent_id, neighbor = %neighbor.domain, error = %e, "Location query failed");
            }
        }
    }
    None
}
