//! BotnetNode: assembles every subsystem and exposes the node's local
//! operations (agents, messages, peer registry, manifest).
//!
//! Cross-node behavior (broadcast, direct-message routing, inbound
//! verification, discovery) lives in [`crate::federation`].

use crate::background::BackgroundTasks;
use crate::error::{KernelError, KernelResult};
use crate::identity::{IdentityKind, IdentityStore};
use crate::supervisor::Supervisor;
use botnet_memory::{Page, SqliteStore, Storage};
use botnet_types::agent::{Agent, AgentStatus, DEFAULT_AGENT_CAPABILITIES};
use botnet_types::config::{clamped_span, NodeConfig};
use botnet_types::error::{BotnetError, BotnetResult};
use botnet_types::manifest::{format_node_public_key, NodeEndpoints, NodeManifest, RateLimitInfo};
use botnet_types::message::{ConversationPreview, Message, MessageContent, MessageType};
use botnet_types::node::{Node, NodeInfo, NodeStatus};
use botnet_types::signing::{sign_manifest, sign_message, KeyPair};
use botnet_wire::discovery::{txt_record_name, DiscoveryConfig as WireDiscoveryConfig};
use botnet_wire::{
    AgentLocationCache, ClientConfig, DiscoveryService, PublicKeyDirectory, SystemResolver,
    TopologyConfig, TopologyManager, TxtResolver,
};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// SQLite database file under the data directory.
const DB_FILE: &str = "botnet.db";

/// A served manifest older than this is re-signed before being handed out.
const MANIFEST_REFRESH: Duration = Duration::from_secs(24 * 60 * 60);

/// Page size used when a whole table has to be walked.
const SCAN_PAGE_SIZE: u32 = 1000;

/// Default capabilities recorded for peers that advertise none.
const DEFAULT_NODE_CAPABILITIES: &[&str] = &["messaging", "agent_hosting"];

/// A running BotNet node.
pub struct BotnetNode {
    pub(crate) config: NodeConfig,
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) identity: IdentityStore,
    node_keys: KeyPair,
    pub(crate) topology: TopologyManager,
    pub(crate) discovery: DiscoveryService,
    pub(crate) key_directory: PublicKeyDirectory,
    pub(crate) locations: AgentLocationCache,
    supervisor: Supervisor,
    background: BackgroundTasks,
    started_at: Instant,
}

impl BotnetNode {
    /// Boot with the on-disk SQLite store and the system DNS resolver.
    pub fn boot(config: NodeConfig) -> KernelResult<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir).map_err(|e| {
            KernelError::BootFailed(format!(
                "cannot create data dir {}: {e}",
                config.data_dir.display()
            ))
        })?;
        let storage = SqliteStore::open(&config.data_dir.join(DB_FILE))?;
        Self::boot_with(config, Arc::new(storage), Arc::new(SystemResolver::new()))
    }

    /// Boot with caller-supplied storage and TXT resolver.
    pub fn boot_with(
        config: NodeConfig,
        storage: Arc<dyn Storage>,
        resolver: Arc<dyn TxtResolver>,
    ) -> KernelResult<Self> {
        config.validate()?;

        let identity = IdentityStore::new(&config.data_dir);
        let node_keys = identity.node_identity(&config.node_id)?;

        let client = client_config(&config);
        let topology = TopologyManager::new(TopologyConfig {
            max_neighbors: config.network.max_neighbors,
            inactivity_threshold: config.network.inactivity_threshold(),
            client: client.clone(),
        })?;
        let discovery = DiscoveryService::new(
            resolver,
            WireDiscoveryConfig {
                domain: config.domain.clone(),
                base_url: config.base_url(),
                capabilities: config.capabilities.clone(),
                verify_manifests: config.discovery.verify_manifests,
                client,
            },
        )
        .map_err(|e| KernelError::BootFailed(format!("discovery: {e}")))?;
        discovery.set_manifest(build_manifest(&config, &node_keys)?);

        let mut own = Node::new(config.domain.clone(), config.base_url());
        own.id = config.node_id.clone();
        own.public_key = node_keys.public_key_base64();
        own.version = config.version.clone();
        own.capabilities = config.capabilities.clone();
        if let Some(existing) = storage.get_node(&own.id)? {
            own.created_at = existing.created_at;
        }
        storage.save_node(&own)?;

        let supervisor = Supervisor::new();
        let background = BackgroundTasks::new(supervisor.subscribe());

        info!(
            node_id = %config.node_id,
            domain = %config.domain,
            public_key = %node_keys.public_key_base64(),
            "BotNet node booted"
        );

        Ok(Self {
            key_directory: PublicKeyDirectory::new(config.cache.public_key_ttl()),
            locations: AgentLocationCache::new(config.cache.agent_location_capacity),
            config,
            storage,
            identity,
            node_keys,
            topology,
            discovery,
            supervisor,
            background,
            started_at: Instant::now(),
        })
    }

    /// Log the DNS record to publish and start every background loop.
    pub fn start(self: &Arc<Self>) {
        self.discovery.publish_node_record();
        let cfg = &self.config;

        if cfg.discovery.interval_secs > 0 && !cfg.bootstrap.seeds.is_empty() {
            let node = Arc::clone(self);
            self.background.spawn_periodic(
                "discovery",
                Duration::from_secs(cfg.discovery.interval_secs),
                true,
                move || {
                    let node = Arc::clone(&node);
                    async move {
                        node.discover_neighbors().await;
                    }
                },
            );
        }

        let node = Arc::clone(self);
        self.background.spawn_periodic(
            "neighbor_health",
            cfg.network.health_check_interval(),
            false,
            move || {
                let node = Arc::clone(&node);
                async move {
                    node.topology.check_all_neighbors().await;
                }
            },
        );

        let node = Arc::clone(self);
        self.background.spawn_periodic(
            "key_cache_sweep",
            Duration::from_secs(cfg.cache.cleanup_interval_secs),
            false,
            move || {
                let node = Arc::clone(&node);
                async move {
                    let evicted = node.key_directory.evict_expired();
                    if evicted > 0 {
                        debug!(evicted, "Swept expired public keys");
                    }
                }
            },
        );

        let node = Arc::clone(self);
        self.background.spawn_periodic(
            "agent_status_sweep",
            Duration::from_secs(cfg.agents.status_sweep_interval_secs),
            false,
            move || {
                let node = Arc::clone(&node);
                async move {
                    if let Err(e) = node.sweep_idle_agents() {
                        warn!(error = %e, "Agent status sweep failed");
                    }
                }
            },
        );

        if cfg.challenges.enabled {
            let node = Arc::clone(self);
            self.background.spawn_periodic(
                "challenge_expiry",
                Duration::from_secs(cfg.challenges.cleanup_interval_secs),
                false,
                move || {
                    let node = Arc::clone(&node);
                    async move {
                        if let Err(e) = node.expire_challenges() {
                            warn!(error = %e, "Challenge expiry sweep failed");
                        }
                    }
                },
            );
        }

        info!(tasks = ?self.background.running(), "Background loops started");
    }

    /// Signal every loop to stop and wait for them.
    pub async fn shutdown(&self) {
        self.supervisor.shutdown();
        self.background.join_all().await;
        info!(node_id = %self.config.node_id, "BotNet node stopped");
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn identity(&self) -> &IdentityStore {
        &self.identity
    }

    pub fn topology(&self) -> &TopologyManager {
        &self.topology
    }

    pub fn key_directory(&self) -> &PublicKeyDirectory {
        &self.key_directory
    }

    pub fn location_cache(&self) -> &AgentLocationCache {
        &self.locations
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn running_tasks(&self) -> Vec<&'static str> {
        self.background.running()
    }

    // -- node identity --

    /// This node's public key, `ed25519:`-prefixed.
    pub fn get_node_public_key(&self) -> String {
        format_node_public_key(&self.node_keys.public_key_base64())
    }

    /// The signed manifest served at `/.well-known/botnet-node.json`.
    pub fn get_node_manifest(&self) -> BotnetResult<NodeManifest> {
        if let Some(manifest) = self.discovery.manifest() {
            let age = Utc::now() - manifest.updated_at;
            if age.to_std().map(|a| a < MANIFEST_REFRESH).unwrap_or(true) {
                return Ok(manifest);
            }
        }
        let manifest = build_manifest(&self.config, &self.node_keys)?;
        self.discovery.set_manifest(manifest.clone());
        debug!(node_id = %self.config.node_id, "Re-signed node manifest");
        Ok(manifest)
    }

    /// DNS records this node should publish, name to value.
    pub fn dns_records(&self) -> BTreeMap<String, String> {
        let mut records = BTreeMap::new();
        records.insert(
            txt_record_name(&self.config.domain),
            self.discovery.txt_record(),
        );
        records
    }

    pub fn node_info(&self) -> BotnetResult<NodeInfo> {
        let local = self.storage.list_agents(Some(self.config.node_id.as_str()), 1, 1)?;
        Ok(NodeInfo {
            node_id: self.config.node_id.clone(),
            version: self.config.version.clone(),
            domain: self.config.domain.clone(),
            local_agents: local.total as usize,
            neighbors: self.topology.registry().len(),
            capabilities: self.config.capabilities.clone(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            last_sync: self.topology.registry().most_recent_contact(),
        })
    }

    // -- agents --

    /// Register (or re-register) an agent on this node.
    ///
    /// The agent is bound to this node and marked online. Its keypair is
    /// created on first registration and reused afterwards.
    pub fn register_agent(&self, mut agent: Agent) -> BotnetResult<Agent> {
        if agent.id.trim().is_empty() {
            return Err(BotnetError::InvalidInput("agent id is required".into()));
        }
        let keypair = self
            .identity
            .initialize_or_load(IdentityKind::Agent, &agent.id)?;

        let now = Utc::now();
        agent.node_id = self.config.node_id.clone();
        agent.status = AgentStatus::Online;
        agent.last_active = now;
        agent.created_at = match self.storage.get_agent(&agent.id)? {
            Some(existing) => existing.created_at,
            None => now,
        };
        if agent.capabilities.is_empty() {
            agent.capabilities = DEFAULT_AGENT_CAPABILITIES
                .iter()
                .map(|c| c.to_string())
                .collect();
        }
        agent.public_key = keypair.public_key_base64();

        self.storage.save_agent(&agent)?;
        info!(agent = %agent.id, name = %agent.name, node_id = %agent.node_id, "Registered local agent");
        Ok(agent)
    }

    /// Any agent record this node holds.
    pub fn get_agent(&self, agent_id: &str) -> BotnetResult<Agent> {
        self.storage
            .get_agent(agent_id)?
            .ok_or_else(|| BotnetError::AgentNotFound(agent_id.to_string()))
    }

    pub fn list_local_agents(&self, page: u32, page_size: u32) -> BotnetResult<Page<Agent>> {
        self.storage
            .list_agents(Some(self.config.node_id.as_str()), page, page_size)
    }

    /// Whether `agent_id` is hosted here.
    pub fn is_local_agent(&self, agent_id: &str) -> BotnetResult<bool> {
        Ok(self
            .storage
            .get_agent(agent_id)?
            .map(|a| a.node_id == self.config.node_id)
            .unwrap_or(false))
    }

    /// The record of an agent hosted here, or `AgentNotFound`.
    pub(crate) fn local_agent(&self, agent_id: &str) -> BotnetResult<Agent> {
        match self.storage.get_agent(agent_id)? {
            Some(agent) if agent.node_id == self.config.node_id => Ok(agent),
            _ => Err(BotnetError::AgentNotFound(agent_id.to_string())),
        }
    }

    /// Record activity. Failures are logged, not returned.
    pub(crate) fn touch_agent(&self, agent: &mut Agent) {
        agent.last_active = Utc::now();
        if agent.status == AgentStatus::Offline {
            agent.status = AgentStatus::Online;
        }
        if let Err(e) = self.storage.save_agent(agent) {
            warn!(agent = %agent.id, error = %e, "Failed to record agent activity");
        }
    }

    /// Mark local agents idle past the configured timeout as offline.
    pub fn sweep_idle_agents(&self) -> BotnetResult<usize> {
        let timeout = clamped_span(self.config.agents.inactivity_timeout_secs);
        let cutoff = Utc::now() - timeout;
        let changed = self
            .storage
            .mark_idle_agents_offline(&self.config.node_id, cutoff)?;
        if changed > 0 {
            info!(count = changed, "Marked idle agents offline");
        }
        Ok(changed)
    }

    // -- public messages --

    /// Sign, store and broadcast a public post.
    pub async fn post_message(
        &self,
        author_id: &str,
        content: MessageContent,
        metadata: HashMap<String, serde_json::Value>,
    ) -> BotnetResult<Message> {
        let mut message = Message::new(MessageType::Post, author_id, content);
        message.metadata = metadata;
        self.publish(message).await
    }

    /// Sign, store and broadcast a public reply to `parent_id`.
    pub async fn reply_to_message(
        &self,
        author_id: &str,
        parent_id: &str,
        content: MessageContent,
        metadata: HashMap<String, serde_json::Value>,
    ) -> BotnetResult<Message> {
        match self.storage.get_message(parent_id)? {
            Some(parent) if !parent.is_direct() => {}
            _ => {
                return Err(BotnetError::InvalidInput(format!(
                    "parent message not found: {parent_id}"
                )))
            }
        }
        let mut message = Message::new(MessageType::Reply, author_id, content);
        message.parent_id = Some(parent_id.to_string());
        message.metadata = metadata;
        self.publish(message).await
    }

    async fn publish(&self, mut message: Message) -> BotnetResult<Message> {
        if message.author_id.is_empty() {
            return Err(BotnetError::InvalidInput("author ID is required".into()));
        }
        let mut author = self.local_agent(&message.author_id)?;
        let keypair = self.identity.agent_keypair(&author.id)?;
        sign_message(&mut message, keypair.signing_key());
        self.storage.save_message(&message)?;
        self.touch_agent(&mut author);
        debug!(
            message_id = %message.id,
            author = %message.author_id,
            kind = %message.message_type,
            "Stored signed message"
        );

        // Fire and forget; the report only matters to callers awaiting it.
        drop(self.broadcast_message(&message));
        Ok(message)
    }

    /// A public message by id. Direct messages are never returned here.
    pub fn get_message(&self, message_id: &str) -> BotnetResult<Option<Message>> {
        Ok(self
            .storage
            .get_message(message_id)?
            .filter(|m| !m.is_direct()))
    }

    pub fn list_public_messages(&self, page: u32, page_size: u32) -> BotnetResult<Page<Message>> {
        self.storage.list_messages(page, page_size)
    }

    // -- direct message reads --

    /// Direct messages between a local agent and `other_agent`, oldest first.
    pub fn get_dm_conversation(
        &self,
        requesting_agent: &str,
        other_agent: &str,
        page: u32,
        page_size: u32,
    ) -> BotnetResult<Vec<Message>> {
        if !self.is_local_agent(requesting_agent)? {
            return Err(BotnetError::AccessDenied(format!(
                "requesting agent {requesting_agent} is not local to this node"
            )));
        }
        self.storage
            .get_dm_conversation(requesting_agent, other_agent, page, page_size)
    }

    /// One preview per conversation partner, most recent first.
    pub fn get_dm_conversations(&self, agent_id: &str) -> BotnetResult<Vec<ConversationPreview>> {
        if !self.is_local_agent(agent_id)? {
            return Err(BotnetError::AccessDenied(format!(
                "agent {agent_id} is not local to this node"
            )));
        }

        let mut by_peer: HashMap<String, ConversationPreview> = HashMap::new();
        for message in self.storage.list_direct_messages_for(agent_id)? {
            let other = if message.author_id == agent_id {
                message.recipient_id.clone().unwrap_or_default()
            } else {
                message.author_id.clone()
            };
            match by_peer.get_mut(&other) {
                Some(preview) => {
                    preview.message_count += 1;
                    preview.last_message = message;
                }
                None => {
                    by_peer.insert(
                        other.clone(),
                        ConversationPreview {
                            other_agent_id: other,
                            last_message: message,
                            message_count: 1,
                        },
                    );
                }
            }
        }

        let mut previews: Vec<ConversationPreview> = by_peer.into_values().collect();
        previews.sort_by(|a, b| {
            b.last_message
                .timestamp
                .cmp(&a.last_message.timestamp)
                .then_with(|| a.other_agent_id.cmp(&b.other_agent_id))
        });
        Ok(previews)
    }

    // -- peer registry --

    /// Record a peer node. The domain may not already belong to another id,
    /// and blacklisted ids or domains are refused.
    pub fn register_node(&self, mut node: Node) -> BotnetResult<Node> {
        if node.domain.trim().is_empty() {
            return Err(BotnetError::InvalidInput("node domain is required".into()));
        }
        if node.id.is_empty() {
            node.id = node.domain.clone();
        }

        let mut existing_record = None;
        for known in self.all_nodes()? {
            let same_id = known.id == node.id;
            if known.domain == node.domain && !same_id {
                return Err(BotnetError::InvalidInput(format!(
                    "domain already registered: {}",
                    node.domain
                )));
            }
            if known.status == NodeStatus::Blacklisted
                && (same_id || known.domain == node.domain)
            {
                return Err(BotnetError::AccessDenied(format!(
                    "node is blacklisted: {}",
                    node.id
                )));
            }
            if same_id {
                existing_record = Some(known);
            }
        }

        let now = Utc::now();
        node.status = NodeStatus::Active;
        node.last_seen = now;
        node.updated_at = now;
        node.created_at = existing_record.map(|n| n.created_at).unwrap_or(now);
        if node.version.is_empty() {
            node.version = "1.0.0".to_string();
        }
        if node.capabilities.is_empty() {
            node.capabilities = DEFAULT_NODE_CAPABILITIES
                .iter()
                .map(|c| c.to_string())
                .collect();
        }
        self.storage.save_node(&node)?;
        info!(node = %node.id, domain = %node.domain, "Registered peer node");
        Ok(node)
    }

    /// Replace a known node record, keeping its creation time.
    pub fn update_node(&self, mut node: Node) -> BotnetResult<Node> {
        let existing = self.get_node(&node.id)?;
        let now = Utc::now();
        node.created_at = existing.created_at;
        node.last_seen = now;
        node.updated_at = now;
        self.storage.save_node(&node)?;
        Ok(node)
    }

    pub fn get_node(&self, node_id: &str) -> BotnetResult<Node> {
        self.storage
            .get_node(node_id)?
            .ok_or_else(|| BotnetError::NodeNotFound(node_id.to_string()))
    }

    pub fn list_nodes(&self, page: u32, page_size: u32) -> BotnetResult<Page<Node>> {
        self.storage.list_nodes(page, page_size)
    }

    pub fn deregister_node(&self, node_id: &str) -> BotnetResult<()> {
        self.storage.delete_node(node_id)?;
        info!(node = %node_id, "Deregistered peer node");
        Ok(())
    }

    fn all_nodes(&self) -> BotnetResult<Vec<Node>> {
        let mut all = Vec::new();
        let mut page = 1;
        loop {
            let batch = self.storage.list_nodes(page, SCAN_PAGE_SIZE)?;
            let fetched = batch.items.len();
            all.extend(batch.items);
            if fetched < SCAN_PAGE_SIZE as usize || all.len() as u64 >= batch.total {
                return Ok(all);
            }
            page += 1;
        }
    }
}

/// Transport settings derived from the node configuration.
fn client_config(config: &NodeConfig) -> ClientConfig {
    ClientConfig {
        accept_invalid_certs: config.network.accept_invalid_certs,
        user_agent: config.network.user_agent.clone(),
        ..ClientConfig::default()
    }
}

/// Build and sign this node's manifest.
fn build_manifest(config: &NodeConfig, keys: &KeyPair) -> BotnetResult<NodeManifest> {
    let mut manifest = NodeManifest {
        node_id: config.node_id.clone(),
        version: config.version.clone(),
        public_key: String::new(),
        endpoints: NodeEndpoints::for_base_url(&config.base_url()),
        capabilities: config.capabilities.clone(),
        rate_limit: RateLimitInfo {
            messages_per_hour: config.messages_per_hour,
            federation_per_hour: config.federation_per_hour,
        },
        updated_at: Utc::now(),
        signature: String::new(),
    };
    sign_manifest(&mut manifest, keys.signing_key())?;
    Ok(manifest)
}
