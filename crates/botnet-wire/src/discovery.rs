//! DNS-based discovery of peer nodes.
//!
//! Every node publishes a TXT record at `_botnet.<domain>`:
//!
//! ```text
//! v=1 endpoint=https://node.example.com type=node capabilities=messaging,agent_hosting
//! ```
//!
//! Discovery resolves that record for each seed domain, fetches
//! `<endpoint>/.well-known/botnet-node.json` and keeps manifests that pass
//! validation. A seed that fails at any step is skipped.

use crate::client::{ClientConfig, NeighborClient, WireError};
use async_trait::async_trait;
use botnet_types::manifest::NodeManifest;
use botnet_types::signing::validate_manifest_with_timestamp;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// TXT record name for a domain.
pub fn txt_record_name(domain: &str) -> String {
    format!("_botnet.{domain}")
}

/// Pull the endpoint out of the first well-formed BotNet TXT record.
pub fn parse_endpoint(records: &[String]) -> Option<String> {
    records.iter().find_map(|record| {
        let mut parts = record.split_whitespace();
        if parts.next() != Some("v=1") {
            return None;
        }
        parts
            .find_map(|part| part.strip_prefix("endpoint="))
            .filter(|endpoint| !endpoint.is_empty())
            .map(|endpoint| endpoint.trim_end_matches('/').to_string())
    })
}

/// Source of TXT records.
#[async_trait]
pub trait TxtResolver: Send + Sync {
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, WireError>;
}

/// Resolver backed by the system DNS configuration.
pub struct SystemResolver {
    inner: hickory_resolver::TokioAsyncResolver,
}

impl SystemResolver {
    /// Use `/etc/resolv.conf`, falling back to public defaults.
    pub fn new() -> Self {
        let inner = match hickory_resolver::TokioAsyncResolver::tokio_from_system_conf() {
            Ok(resolver) => resolver,
            Err(e) => {
                warn!(error = %e, "System DNS configuration unavailable, using defaults");
                hickory_resolver::TokioAsyncResolver::tokio(
                    hickory_resolver::config::ResolverConfig::default(),
                    hickory_resolver::config::ResolverOpts::default(),
                )
            }
        };
        Self { inner }
    }
}

impl Default for SystemResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TxtResolver for SystemResolver {
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, WireError> {
        let lookup = self
            .inner
            .txt_lookup(name)
            .await
            .map_err(|e| WireError::Dns(format!("{name}: {e}")))?;
        Ok(lookup
            .iter()
            .map(|txt| {
                txt.txt_data()
                    .iter()
                    .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
                    .collect::<String>()
            })
            .collect())
    }
}

/// Fixed in-memory TXT records. Useful for closed test networks.
#[derive(Default)]
pub struct StaticResolver {
    records: RwLock<HashMap<String, Vec<String>>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the record a node at `domain` would publish.
    pub fn insert(&self, domain: &str, record: impl Into<String>) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records
            .entry(txt_record_name(domain))
            .or_default()
            .push(record.into());
    }
}

#[async_trait]
impl TxtResolver for StaticResolver {
    async fn lookup_txt(&self, name: &str) -> Result<Vec<String>, WireError> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records
            .get(name)
            .cloned()
            .ok_or_else(|| WireError::Dns(format!("{name}: no records")))
    }
}

/// A peer found through discovery.
#[derive(Debug, Clone)]
pub struct DiscoveredNode {
    /// Seed domain that led here.
    pub seed: String,
    /// Base URL from the TXT record.
    pub endpoint: String,
    pub manifest: NodeManifest,
}

/// Discovery settings.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub domain: String,
    pub base_url: String,
    pub capabilities: Vec<String>,
    /// Require a valid, fresh manifest signature.
    pub verify_manifests: bool,
    pub client: ClientConfig,
}

/// Resolves seeds to peer manifests and holds this node's own manifest.
pub struct DiscoveryService {
    resolver: Arc<dyn TxtResolver>,
    config: DiscoveryConfig,
    http: reqwest::Client,
    manifest: RwLock<Option<NodeManifest>>,
}

impl DiscoveryService {
    pub fn new(resolver: Arc<dyn TxtResolver>, config: DiscoveryConfig) -> Result<Self, WireError> {
        let http = config.client.build_http()?;
        Ok(Self {
            resolver,
            config,
            http,
            manifest: RwLock::new(None),
        })
    }

    /// Replace the manifest this node serves.
    pub fn set_manifest(&self, manifest: NodeManifest) {
        let mut current = self.manifest.write().unwrap_or_else(|e| e.into_inner());
        *current = Some(manifest);
    }

    /// The manifest this node serves, once published.
    pub fn manifest(&self) -> Option<NodeManifest> {
        let current = self.manifest.read().unwrap_or_else(|e| e.into_inner());
        current.clone()
    }

    /// The TXT record value this node should publish.
    pub fn txt_record(&self) -> String {
        format!(
            "v=1 endpoint={} type=node capabilities={}",
            self.config.base_url,
            self.config.capabilities.join(",")
        )
    }

    /// Log the TXT record that should be published. Pushing it to a DNS
    /// provider happens outside this process.
    pub fn publish_node_record(&self) -> (String, String) {
        let name = txt_record_name(&self.config.domain);
        let value = self.txt_record();
        info!(record = %name, value = %value, "DNS TXT record to publish");
        (name, value)
    }

    /// Best-effort discovery across all seeds, queried concurrently.
    pub async fn discover_nodes(&self, seeds: &[String]) -> Vec<DiscoveredNode> {
        let lookups = seeds.iter().map(|seed| self.discover_seed(seed));
        let found: Vec<DiscoveredNode> = futures::future::join_all(lookups)
            .await
            .into_iter()
            .flatten()
            .collect();
        info!(seeds = seeds.len(), found = found.len(), "DNS discovery finished");
        found
    }

    async fn discover_seed(&self, seed: &str) -> Option<DiscoveredNode> {
        let name = txt_record_name(seed);
        let records = match self.resolver.lookup_txt(&name).await {
            Ok(records) => records,
            Err(e) => {
                warn!(seed = %seed, error = %e, "TXT lookup failed");
                return None;
            }
        };
        let Some(endpoint) = parse_endpoint(&records) else {
            warn!(seed = %seed, "No BotNet endpoint in TXT records");
            return None;
        };
        debug!(seed = %seed, endpoint = %endpoint, "Resolved seed endpoint");

        match self.fetch_manifest(&endpoint).await {
            Ok(manifest) => Some(DiscoveredNode {
                seed: seed.to_string(),
                endpoint,
                manifest,
            }),
            Err(e) => {
                warn!(seed = %seed, endpoint = %endpoint, error = %e, "Skipping seed");
                None
            }
        }
    }

    /// Fetch and validate the manifest served at `endpoint`.
    pub async fn fetch_manifest(&self, endpoint: &str) -> Result<NodeManifest, WireError> {
        let client = NeighborClient::with_http(endpoint, self.http.clone(), &self.config.client)?;
        let manifest = client.fetch_manifest().await?;
        if manifest.node_id.is_empty() {
            return Err(WireError::InvalidManifest("missing node_id".into()));
        }
        if manifest.version.is_empty() {
            return Err(WireError::InvalidManifest("missing version".into()));
        }
        if self.config.verify_manifests {
            validate_manifest_with_timestamp(&manifest)
                .map_err(|e| WireError::InvalidManifest(e.to_string()))?;
        }
        Ok(manifest)
    }
}
