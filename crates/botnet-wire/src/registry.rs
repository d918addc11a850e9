//! Neighbor registry: the bounded table of nodes this node federates with.
//!
//! The [`NeighborRegistry`] guards its table with a single reader/writer lock.
//! Callers take snapshots and release the lock before doing any network I/O.

use crate::client::NeighborClient;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Connection state of a neighbor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborStatus {
    /// Ping in flight.
    Connecting,
    /// Ping succeeded when the neighbor was added.
    Connected,
    /// A later health check succeeded.
    Active,
    /// The last health check failed.
    Inactive,
    /// Being removed.
    Disconnected,
}

impl NeighborStatus {
    /// Whether messages should be sent to a neighbor in this state.
    pub fn is_healthy(self) -> bool {
        matches!(self, NeighborStatus::Connected | NeighborStatus::Active)
    }
}

impl std::fmt::Display for NeighborStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NeighborStatus::Connecting => write!(f, "connecting"),
            NeighborStatus::Connected => write!(f, "connected"),
            NeighborStatus::Active => write!(f, "active"),
            NeighborStatus::Inactive => write!(f, "inactive"),
            NeighborStatus::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// A single neighbor.
#[derive(Debug, Clone)]
pub struct NeighborEntry {
    /// Node identifier. Defaults to the domain until a manifest says otherwise.
    pub node_id: String,
    pub domain: String,
    /// Persistent transport bound to the neighbor's base URL.
    pub client: NeighborClient,
    /// Last successful contact.
    pub last_seen: DateTime<Utc>,
    pub status: NeighborStatus,
    pub added_at: DateTime<Utc>,
}

impl NeighborEntry {
    pub fn new(domain: impl Into<String>, client: NeighborClient) -> Self {
        let domain = domain.into();
        let now = Utc::now();
        Self {
            node_id: domain.clone(),
            domain,
            client,
            last_seen: now,
            status: NeighborStatus::Connecting,
            added_at: now,
        }
    }

    pub fn url(&self) -> &str {
        self.client.base_url()
    }

    /// Whether this neighbor is, or fronts, the node `node_id`.
    pub fn is_node(&self, node_id: &str) -> bool {
        self.node_id == node_id || self.domain == node_id
    }
}

/// Result of trying to insert a neighbor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyPresent,
    Full,
}

/// Thread-safe table of neighbors keyed by domain.
#[derive(Debug, Clone)]
pub struct NeighborRegistry {
    neighbors: Arc<RwLock<HashMap<String, NeighborEntry>>>,
}

impl NeighborRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            neighbors: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Insert unless present or the table already holds `max` entries.
    pub fn insert_bounded(&self, entry: NeighborEntry, max: usize) -> InsertOutcome {
        let mut neighbors = self.neighbors.write().unwrap_or_else(|e| e.into_inner());
        if neighbors.contains_key(&entry.domain) {
            return InsertOutcome::AlreadyPresent;
        }
        if neighbors.len() >= max {
            return InsertOutcome::Full;
        }
        neighbors.insert(entry.domain.clone(), entry);
        InsertOutcome::Inserted
    }

    /// Remove a neighbor, returning it marked disconnected.
    pub fn remove(&self, domain: &str) -> Option<NeighborEntry> {
        let mut neighbors = self.neighbors.write().unwrap_or_else(|e| e.into_inner());
        neighbors.remove(domain).map(|mut entry| {
            entry.status = NeighborStatus::Disconnected;
            entry
        })
    }

    /// Remove a neighbor only if its last successful contact, read under the
    /// write lock, is older than `cutoff`.
    pub fn remove_if_silent_since(
        &self,
        domain: &str,
        cutoff: DateTime<Utc>,
    ) -> Option<NeighborEntry> {
        let mut neighbors = self.neighbors.write().unwrap_or_else(|e| e.into_inner());
        if neighbors.get(domain)?.last_seen >= cutoff {
            return None;
        }
        neighbors.remove(domain).map(|mut entry| {
            entry.status = NeighborStatus::Disconnected;
            entry
        })
    }

    pub fn contains(&self, domain: &str) -> bool {
        let neighbors = self.neighbors.read().unwrap_or_else(|e| e.into_inner());
        neighbors.contains_key(domain)
    }

    /// Snapshot of one neighbor.
    pub fn get(&self, domain: &str) -> Option<NeighborEntry> {
        let neighbors = self.neighbors.read().unwrap_or_else(|e| e.into_inner());
        neighbors.get(domain).cloned()
    }

    /// Snapshot of every neighbor, in no particular order.
    pub fn snapshot(&self) -> Vec<NeighborEntry> {
        let neighbors = self.neighbors.read().unwrap_or_else(|e| e.into_inner());
        neighbors.values().cloned().collect()
    }

    /// Snapshot of neighbors that are connected or active.
    pub fn healthy(&self) -> Vec<NeighborEntry> {
        let neighbors = self.neighbors.read().unwrap_or_else(|e| e.into_inner());
        neighbors
            .values()
            .filter(|n| n.status.is_healthy())
            .cloned()
            .collect()
    }

    /// Record a successful contact.
    pub fn mark_healthy(&self, domain: &str) {
        let mut neighbors = self.neighbors.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = neighbors.get_mut(domain) {
            entry.status = NeighborStatus::Active;
            entry.last_seen = Utc::now();
        }
    }

    /// Record a failed contact. `last_seen` is left alone.
    pub fn mark_unhealthy(&self, domain: &str) {
        let mut neighbors = self.neighbors.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = neighbors.get_mut(domain) {
            entry.status = NeighborStatus::Inactive;
        }
    }

    /// Update the node identifier learned for a neighbor.
    pub fn set_node_id(&self, domain: &str, node_id: &str) {
        let mut neighbors = self.neighbors.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = neighbors.get_mut(domain) {
            entry.node_id = node_id.to_string();
        }
    }

    /// Most recent successful contact with any neighbor.
    pub fn most_recent_contact(&self) -> Option<DateTime<Utc>> {
        let neighbors = self.neighbors.read().unwrap_or_else(|e| e.into_inner());
        neighbors.values().map(|n| n.last_seen).max()
    }

    pub fn len(&self) -> usize {
        let neighbors = self.neighbors.read().unwrap_or_else(|e| e.into_inner());
        neighbors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[cfg(test)]
    pub(crate) fn set_last_seen(&self, domain: &str, at: DateTime<Utc>) {
        let mut neighbors = self.neighbors.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = neighbors.get_mut(domain) {
            entry.last_seen = at;
        }
    }
}

impl Default for NeighborRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientConfig;
    use chrono::Duration;

    fn make_entry(domain: &str) -> NeighborEntry {
        let client =
            NeighborClient::new(&format!("https://{domain}"), &ClientConfig::default()).unwrap();
        let mut entry = NeighborEntry::new(domain, client);
        entry.status = NeighborStatus::Connected;
        entry
    }

    #[test]
    fn test_insert_and_get() {
        let registry = NeighborRegistry::new();
        assert_eq!(
            registry.insert_bounded(make_entry("a.example"), 8),
            InsertOutcome::Inserted
        );
        let entry = registry.get("a.example").unwrap();
        assert_eq!(entry.url(), "https://a.example");
        assert_eq!(entry.node_id, "a.example");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_insert_duplicate_is_noop() {
        let registry = NeighborRegistry::new();
        registry.insert_bounded(make_entry("a.example"), 8);
        assert_eq!(
            registry.insert_bounded(make_entry("a.example"), 8),
            InsertOutcome::AlreadyPresent
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_capacity() {
        let registry = NeighborRegistry::new();
        registry.insert_bounded(make_entry("a.example"), 2);
        registry.insert_bounded(make_entry("b.example"), 2);
        assert_eq!(
            registry.insert_bounded(make_entry("c.example"), 2),
            InsertOutcome::Full
        );
        registry.remove("a.example");
        assert_eq!(
            registry.insert_bounded(make_entry("c.example"), 2),
            InsertOutcome::Inserted
        );
    }

    #[test]
    fn test_remove_marks_disconnected() {
        let registry = NeighborRegistry::new();
        registry.insert_bounded(make_entry("a.example"), 8);
        let removed = registry.remove("a.example").unwrap();
        assert_eq!(removed.status, NeighborStatus::Disconnected);
        assert!(registry.is_empty());
        assert!(registry.remove("a.example").is_none());
    }

    #[test]
    fn test_health_transitions() {
        let registry = NeighborRegistry::new();
        registry.insert_bounded(make_entry("a.example"), 8);
        registry.insert_bounded(make_entry("b.example"), 8);

        registry.mark_unhealthy("a.example");
        let healthy = registry.healthy();
        assert_eq!(healthy.len(), 1);
        assert_eq!(healthy[0].domain, "b.example");

        let stale = Utc::now() - Duration::minutes(10);
        registry.set_last_seen("a.example", stale);
        registry.mark_healthy("a.example");
        let a = registry.get("a.example").unwrap();
        assert_eq!(a.status, NeighborStatus::Active);
        assert!(a.last_seen > stale);
        assert_eq!(registry.healthy().len(), 2);
    }

    #[test]
    fn test_conditional_removal_sees_fresh_contact() {
        let registry = NeighborRegistry::new();
        registry.insert_bounded(make_entry("a.example"), 8);
        registry.set_last_seen("a.example", Utc::now() - Duration::minutes(10));
        let stale_view = registry.get("a.example").unwrap();
        let cutoff = Utc::now() - Duration::minutes(5);
        assert!(stale_view.last_seen < cutoff);

        // Contact lands between the snapshot and the eviction decision.
        registry.mark_healthy("a.example");
        assert!(registry.remove_if_silent_since("a.example", cutoff).is_none());
        assert!(registry.contains("a.example"));

        registry.set_last_seen("a.example", Utc::now() - Duration::minutes(10));
        let removed = registry.remove_if_silent_since("a.example", cutoff).unwrap();
        assert_eq!(removed.status, NeighborStatus::Disconnected);
        assert!(registry.remove_if_silent_since("a.example", cutoff).is_none());
    }

    #[test]
    fn test_is_node_matches_id_or_domain() {
        let registry = NeighborRegistry::new();
        registry.insert_bounded(make_entry("a.example"), 8);
        registry.set_node_id("a.example", "node-a");
        let entry = registry.get("a.example").unwrap();
        assert!(entry.is_node("node-a"));
        assert!(entry.is_node("a.example"));
        assert!(!entry.is_node("b.example"));
    }

    #[test]
    fn test_most_recent_contact() {
        let registry = NeighborRegistry::new();
        assert!(registry.most_recent_contact().is_none());
        registry.insert_bounded(make_entry("a.example"), 8);
        let old = Utc::now() - Duration::hours(1);
        registry.set_last_seen("a.example", old);
        registry.insert_bounded(make_entry("b.example"), 8);
        assert!(registry.most_recent_contact().unwrap() > old);
    }
}
