//! Public key directory: a TTL cache of remote agents' public keys with
//! fetch-on-miss from neighbors.
//!
//! `get` treats expired entries as absent but never deletes them; the
//! periodic [`PublicKeyDirectory::evict_expired`] sweep does that.

use crate::registry::NeighborEntry;
use botnet_types::error::{BotnetError, BotnetResult};
use botnet_types::signing::public_key_from_base64;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Default lifetime of a cached key.
pub const DEFAULT_KEY_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
struct CachedKey {
    public_key: String,
    source_node_id: String,
    expires_at: Instant,
}

/// Cached public key with provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLookup {
    pub public_key: String,
    pub source_node_id: String,
}

/// Thread-safe TTL cache of agent public keys.
pub struct PublicKeyDirectory {
    entries: DashMap<String, CachedKey>,
    ttl: Duration,
}

impl PublicKeyDirectory {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Insert or overwrite, expiring `ttl` from now.
    pub fn set(&self, agent_id: &str, public_key: &str, source_node_id: &str) {
        self.entries.insert(
            agent_id.to_string(),
            CachedKey {
                public_key: public_key.to_string(),
                source_node_id: source_node_id.to_string(),
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Cached key if present and unexpired.
    pub fn get(&self, agent_id: &str) -> Option<String> {
        self.lookup(agent_id).map(|k| k.public_key)
    }

    /// Cached key and the node it came from, if unexpired.
    pub fn lookup(&self, agent_id: &str) -> Option<KeyLookup> {
        let entry = self.entries.get(agent_id)?;
        if Instant::now() >= entry.expires_at {
            return None;
        }
        Some(KeyLookup {
            public_key: entry.public_key.clone(),
            source_node_id: entry.source_node_id.clone(),
        })
    }

    pub fn delete(&self, agent_id: &str) {
        self.entries.remove(agent_id);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Remove every expired entry. Returns how many were dropped.
    pub fn evict_expired(&self) -> usize {
        let before = self.entries.len();
        let now = Instant::now();
        self.entries.retain(|_, entry| now < entry.expires_at);
        before.saturating_sub(self.entries.len())
    }

    /// Number of entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cached key, or ask each neighbor in turn until one knows the agent.
    ///
    /// Keys that do not decode as Ed25519 public keys are ignored.
    pub async fn fetch_public_key(
        &self,
        agent_id: &str,
        neighbors: &[NeighborEntry],
    ) -> BotnetResult<String> {
        if let Some(key) = self.get(agent_id) {
            return Ok(key);
        }

        for neighbor in neighbors {
            match neighbor.client.fetch_public_key(agent_id).await {
                Ok(Some(record)) => {
                    if let Err(e) = public_key_from_base64(&record.public_key) {
                        debug!(
                            agent = %agent_id,
                            neighbor = %neighbor.domain,
                            error = %e,
                            "Neighbor returned an unusable public key"
                        );
                        continue;
                    }
                    let source = if record.node_id.is_empty() {
                        neighbor.node_id.as_str()
                    } else {
                        record.node_id.as_str()
                    };
                    self.set(agent_id, &record.public_key, source);
                    info!(agent = %agent_id, source = %source, "Fetched public key");
                    return Ok(record.public_key);
                }
                Ok(None) => {
                    debug!(agent = %agent_id, neighbor = %neighbor.domain, "Neighbor does not know agent");
                }
                Err(e) => {
                    debug!(agent = %agent_id, neighbor = %neighbor.domain, error = %e, "Public key query failed");
                }
            }
        }

        Err(BotnetError::KeyNotFound(agent_id.to_string()))
    }
}

impl Default for PublicKeyDirectory {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_TTL)
    }
}
