//! Topology manager: adds, pings and evicts neighbors.
//!
//! The neighbor table is bounded. A full table refuses new neighbors; nothing
//! is ever evicted to make room. Neighbors are only removed explicitly or by
//! the health pass once they have been silent past the inactivity threshold.

use crate::client::{ClientConfig, NeighborClient};
use crate::registry::{InsertOutcome, NeighborEntry, NeighborRegistry, NeighborStatus};
use botnet_types::error::{BotnetError, BotnetResult};
use chrono::Utc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Topology settings.
#[derive(Debug, Clone)]
pub struct TopologyConfig {
    pub max_neighbors: usize,
    /// Neighbors failing checks with no contact for this long are evicted.
    pub inactivity_threshold: Duration,
    pub client: ClientConfig,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            max_neighbors: 8,
            inactivity_threshold: Duration::from_secs(5 * 60),
            client: ClientConfig::default(),
        }
    }
}

/// Outcome of one health pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthReport {
    pub healthy: Vec<String>,
    pub inactive: Vec<String>,
    pub evicted: Vec<String>,
}

/// Owns the neighbor registry and the shared HTTP pool.
pub struct TopologyManager {
    registry: NeighborRegistry,
    config: TopologyConfig,
    http: reqwest::Client,
}

impl TopologyManager {
    pub fn new(config: TopologyConfig) -> BotnetResult<Self> {
        let http = config.client.build_http()?;
        if config.client.accept_invalid_certs {
            warn!("TLS certificate validation is disabled for neighbor connections");
        }
        Ok(Self {
            registry: NeighborRegistry::new(),
            config,
            http,
        })
    }

    pub fn registry(&self) -> &NeighborRegistry {
        &self.registry
    }

    pub fn client_config(&self) -> &ClientConfig {
        &self.config.client
    }

    pub fn max_neighbors(&self) -> usize {
        self.config.max_neighbors
    }

    /// Build a client for an arbitrary base URL on the shared pool.
    pub fn client_for(&self, base_url: &str) -> BotnetResult<NeighborClient> {
        NeighborClient::with_http(base_url, self.http.clone(), &self.config.client)
            .map_err(BotnetError::from)
    }

    /// Ping and add a neighbor.
    ///
    /// Returns `Ok(false)` if the neighbor was already present. The ping runs
    /// without holding the table lock; capacity is checked again on insert.
    pub async fn add_neighbor(&self, domain: &str, url: &str) -> BotnetResult<bool> {
        if self.registry.contains(domain) {
            debug!(domain = %domain, "Neighbor already present");
            return Ok(false);
        }
        if self.registry.len() >= self.config.max_neighbors {
            return Err(BotnetError::NeighborLimitReached(self.config.max_neighbors));
        }

        let client = self.client_for(url)?;
        client
            .ping()
            .await
            .map_err(|e| BotnetError::NeighborUnreachable {
                domain: domain.to_string(),
                reason: e.to_string(),
            })?;

        let mut entry = NeighborEntry::new(domain, client);
        entry.status = NeighborStatus::Connected;
        entry.last_seen = Utc::now();
        match self
            .registry
            .insert_bounded(entry, self.config.max_neighbors)
        {
            InsertOutcome::Inserted => {
                info!(domain = %domain, url = %url, "Added neighbor");
                Ok(true)
            }
            InsertOutcome::AlreadyPresent => Ok(false),
            InsertOutcome::Full => Err(BotnetError::NeighborLimitReached(
                self.config.max_neighbors,
            )),
        }
    }

    /// Drop a neighbor. Unknown domains are ignored.
    pub fn remove_neighbor(&self, domain: &str) -> Option<NeighborEntry> {
        let removed = self.registry.remove(domain);
        if removed.is_some() {
            info!(domain = %domain, "Removed neighbor");
        }
        removed
    }

    pub fn neighbors(&self) -> Vec<NeighborEntry> {
        self.registry.snapshot()
    }

    pub fn healthy_neighbors(&self) -> Vec<NeighborEntry> {
        self.registry.healthy()
    }

    pub fn neighbor(&self, domain: &str) -> Option<NeighborEntry> {
        self.registry.get(domain)
    }

    pub fn mark_healthy(&self, domain: &str) {
        self.registry.mark_healthy(domain);
    }

    pub fn mark_unhealthy(&self, domain: &str) {
        self.registry.mark_unhealthy(domain);
    }

    /// Ping every neighbor once. Successes refresh `last_seen`; failures mark
    /// the neighbor inactive, or evict it once it has been silent past the
    /// inactivity threshold.
    pub async fn check_all_neighbors(&self) -> HealthReport {
        let snapshot = self.registry.snapshot();
        let pings = snapshot.iter().map(|n| async move { (n, n.client.ping().await) });
        let results = futures::future::join_all(pings).await;

        let threshold = chrono::Duration::from_std(self.config.inactivity_threshold)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        let cutoff = Utc::now() - threshold;
        let mut report = HealthReport::default();

        for (neighbor, result) in results {
            match result {
                Ok(()) => {
                    self.registry.mark_healthy(&neighbor.domain);
                    report.healthy.push(neighbor.domain.clone());
                }
                Err(e) => match self.registry.remove_if_silent_since(&neighbor.domain, cutoff) {
                    Some(evicted) => {
                        warn!(
                            domain = %neighbor.domain,
                            error = %e,
                            last_seen = %evicted.last_seen,
                            "Evicting unreachable neighbor"
                        );
                        report.evicted.push(neighbor.domain.clone());
                    }
                    None => {
                        warn!(domain = %neighbor.domain, error = %e, "Neighbor health check failed");
                        self.registry.mark_unhealthy(&neighbor.domain);
                        report.inactive.push(neighbor.domain.clone());
                    }
                },
            }
        }

        debug!(
            healthy = report.healthy.len(),
            inactive = report.inactive.len(),
            evicted = report.evicted.len(),
            "Neighbor health pass complete"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;
    use axum::Router;

    async fn spawn_neighbor() -> String {
        let router = Router::new().route("/api/v1/info", get(|| async { "{}" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn fast_config(max: usize) -> TopologyConfig {
        TopologyConfig {
            max_neighbors: max,
            inactivity_threshold: Duration::from_secs(300),
            client: ClientConfig {
                ping_timeout: Duration::from_millis(500),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_add_and_remove() {
        let url = spawn_neighbor().await;
        let topo = TopologyManager::new(fast_config(8)).unwrap();

        assert!(topo.add_neighbor("a.example", &url).await.unwrap());
        assert!(!topo.add_neighbor("a.example", &url).await.unwrap());
        assert_eq!(topo.neighbors().len(), 1);
        assert_eq!(
            topo.neighbor("a.example").unwrap().status,
            NeighborStatus::Connected
        );

        assert!(topo.remove_neighbor("a.example").is_some());
        assert!(topo.neighbors().is_empty());
    }

    #[tokio::test]
    async fn test_ninth_neighbor_rejected() {
        let url = spawn_neighbor().await;
        let topo = TopologyManager::new(fast_config(8)).unwrap();
        for i in 0..8 {
            topo.add_neighbor(&format!("n{i}.example"), &url)
                .await
                .unwrap();
        }
        let err = topo.add_neighbor("n8.example", &url).await.unwrap_err();
        assert!(matches!(err, BotnetError::NeighborLimitReached(8)));
        assert_eq!(topo.neighbors().len(), 8);

        topo.remove_neighbor("n0.example");
        assert!(topo.add_neighbor("n8.example", &url).await.unwrap());
    }

    #[tokio::test]
    async fn test_unreachable_neighbor_not_added() {
        let topo = TopologyManager::new(fast_config(8)).unwrap();
        let err = topo
            .add_neighbor("dead.example", "http://127.0.0.1:9")
            .await
            .unwrap_err();
        assert!(matches!(err, BotnetError::NeighborUnreachable { .. }));
        assert!(topo.neighbors().is_empty());
    }

    #[tokio::test]
    async fn test_health_pass_marks_and_evicts() {
        let url = spawn_neighbor().await;
        let topo = TopologyManager::new(fast_config(8)).unwrap();
        topo.add_neighbor("live.example", &url).await.unwrap();

        // Two dead neighbors inserted directly: one recently seen, one stale.
        for domain in ["recent.example", "stale.example"] {
            let client = topo.client_for("http://127.0.0.1:9").unwrap();
            let mut entry = NeighborEntry::new(domain, client);
            entry.status = NeighborStatus::Connected;
            topo.registry().insert_bounded(entry, 8);
        }
        topo.registry()
            .set_last_seen("stale.example", Utc::now() - chrono::Duration::minutes(6));

        let report = topo.check_all_neighbors().await;
        assert_eq!(report.healthy, vec!["live.example".to_string()]);
        assert_eq!(report.inactive, vec!["recent.example".to_string()]);
        assert_eq!(report.evicted, vec!["stale.example".to_string()]);

        assert_eq!(
            topo.neighbor("live.example").unwrap().status,
            NeighborStatus::Active
        );
        assert_eq!(
            topo.neighbor("recent.example").unwrap().status,
            NeighborStatus::Inactive
        );
        assert!(topo.neighbor("stale.example").is_none());
        assert_eq!(topo.healthy_neighbors().len(), 1);
    }
}
