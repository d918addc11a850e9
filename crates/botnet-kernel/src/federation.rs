//! Federation engine: everything a node does with its neighbors.
//!
//! - public posts and replies are broadcast to every healthy neighbor
//! - direct messages go to exactly one neighbor, chosen by where the
//!   recipient lives
//! - inbound messages are verified before anything is stored

use crate::node::BotnetNode;
use botnet_types::agent::Agent;
use botnet_types::error::{BotnetError, BotnetResult};
use botnet_types::message::Message;
use botnet_types::node::{Node, NodeStatus};
use botnet_types::signing::{sign_message, validate_message};
use botnet_wire::location::query_neighbors;
use botnet_wire::message::{AgentLocation, PublicKeyRecord};
use botnet_wire::NeighborEntry;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Tracing target for signature and access decisions.
pub const SECURITY_TARGET: &str = "botnet::security";

/// Sends of one broadcast still running after this long are abandoned.
pub const BROADCAST_DEADLINE: Duration = Duration::from_secs(15);

/// Result of accepting a verified inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncomingOutcome {
    /// Stored for the first time.
    Accepted,
    /// Already stored; nothing changed.
    Duplicate,
}

/// What happened to one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: Vec<String>,
    pub failed: Vec<String>,
    /// The deadline hit before every send finished.
    pub timed_out: bool,
}

/// Where an agent lives and, if a neighbor told us, which one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRoute {
    pub node_id: String,
    pub via_domain: Option<String>,
}

impl BotnetNode {
    // -- outbound --

    /// POST `message` to every healthy neighbor in one spawned task.
    ///
    /// Each send is independent. A failed send marks that neighbor unhealthy
    /// and nothing else. Sends still pending at [`BROADCAST_DEADLINE`] are
    /// dropped.
    pub fn broadcast_message(&self, message: &Message) -> JoinHandle<BroadcastReport> {
        let neighbors = self.topology.healthy_neighbors();
        let registry = self.topology.registry().clone();
        let message = message.clone();

        tokio::spawn(async move {
            let mut report = BroadcastReport::default();
            if neighbors.is_empty() {
                debug!(message_id = %message.id, "No healthy neighbors to broadcast to");
                return report;
            }

            let registry = &registry;
            let message = &message;
            let sends = neighbors.iter().map(move |neighbor| async move {
                match neighbor.client.post_message(message).await {
                    Ok(()) => {
                        registry.mark_healthy(&neighbor.domain);
                        (neighbor.domain.clone(), true)
                    }
                    Err(e) => {
                        warn!(
                            neighbor = %neighbor.domain,
                            message_id = %message.id,
                            error = %e,
                            "Broadcast to neighbor failed"
                        );
                        registry.mark_unhealthy(&neighbor.domain);
                        (neighbor.domain.clone(), false)
                    }
                }
            });

            match tokio::time::timeout(BROADCAST_DEADLINE, futures::future::join_all(sends)).await
            {
                Ok(results) => {
                    for (domain, ok) in results {
                        if ok {
                            report.delivered.push(domain);
                        } else {
                            report.failed.push(domain);
                        }
                    }
                }
                Err(_) => {
                    warn!(message_id = %message.id, "Broadcast deadline elapsed, abandoning stragglers");
                    report.timed_out = true;
                }
            }

            debug!(
                message_id = %message.id,
                delivered = report.delivered.len(),
                failed = report.failed.len(),
                "Broadcast finished"
            );
            report
        })
    }

    /// Sign and store a direct message, then hand it to the one neighbor
    /// that routes toward the recipient's node.
    ///
    /// Only an unresolvable recipient is an error. Delivery runs in the
    /// background; its failures are logged and not retried.
    pub async fn send_direct_message(
        &self,
        author_id: &str,
        recipient_id: &str,
        text: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) -> BotnetResult<Message> {
        if author_id.is_empty() {
            return Err(BotnetError::InvalidInput("author ID is required".into()));
        }
        if recipient_id.is_empty() {
            return Err(BotnetError::InvalidInput("recipient ID is required".into()));
        }
        let mut author = self.local_agent(author_id)?;
        let route = self
            .find_agent_location(recipient_id)
            .await?
            .ok_or_else(|| BotnetError::RecipientNotFound(recipient_id.to_string()))?;

        let keypair = self.identity.agent_keypair(author_id)?;
        let mut message = Message::direct(author_id, recipient_id, text);
        message.metadata = metadata;
        sign_message(&mut message, keypair.signing_key());
        self.storage.save_message(&message)?;
        self.touch_agent(&mut author);

        if route.node_id == self.config.node_id {
            debug!(from = %author_id, to = %recipient_id, "DM delivered locally");
        } else {
            drop(self.deliver_direct_message(message.clone(), &route));
        }
        Ok(message)
    }

    /// Spawn the single targeted POST of a direct message. `None` when no
    /// neighbor can take it.
    pub fn deliver_direct_message(
        &self,
        message: Message,
        route: &AgentRoute,
    ) -> Option<JoinHandle<bool>> {
        let Some(neighbor) = self.route_for(route) else {
            warn!(
                message_id = %message.id,
                target = %route.node_id,
                "No neighbor routes to target node, DM not delivered"
            );
            return None;
        };
        let registry = self.topology.registry().clone();
        let target = route.node_id.clone();

        Some(tokio::spawn(async move {
            match neighbor.client.deliver_direct_message(&message).await {
                Ok(()) => {
                    registry.mark_healthy(&neighbor.domain);
                    info!(
                        message_id = %message.id,
                        target = %target,
                        via = %neighbor.domain,
                        "DM delivered"
                    );
                    true
                }
                Err(e) => {
                    warn!(
                        message_id = %message.id,
                        target = %target,
                        via = %neighbor.domain,
                        error = %e,
                        "DM delivery failed"
                    );
                    false
                }
            }
        }))
    }

    /// Neighbor to hand a message for `route` to: the target node itself,
    /// else the neighbor that located the agent, else the longest-standing
    /// healthy neighbor.
    fn route_for(&self, route: &AgentRoute) -> Option<NeighborEntry> {
        let mut healthy = self.topology.healthy_neighbors();
        healthy.sort_by(|a, b| a.added_at.cmp(&b.added_at).then_with(|| a.domain.cmp(&b.domain)));

        if let Some(direct) = healthy.iter().find(|n| n.is_node(&route.node_id)) {
            return Some(direct.clone());
        }
        if let Some(via) = route.via_domain.as_deref() {
            if let Some(entry) = healthy.iter().find(|n| n.domain == via) {
                return Some(entry.clone());
            }
        }
        healthy.into_iter().next()
    }

    // -- lookups --

    /// Which node hosts `agent_id`: local records first, then the location
    /// cache, then a query across healthy neighbors. Positive neighbor
    /// answers are cached.
    pub async fn find_agent_location(&self, agent_id: &str) -> BotnetResult<Option<AgentRoute>> {
        if let Some(agent) = self.storage.get_agent(agent_id)? {
            if !agent.node_id.is_empty() {
                return Ok(Some(AgentRoute {
                    node_id: agent.node_id,
                    via_domain: None,
                }));
            }
        }
        if let Some(node_id) = self.locations.get(agent_id) {
            return Ok(Some(AgentRoute {
                node_id,
                via_domain: None,
            }));
        }

        let neighbors = self.topology.healthy_neighbors();
        match query_neighbors(agent_id, &neighbors).await {
            Some(found) => {
                self.locations.set(agent_id, &found.node_id);
                debug!(agent = %agent_id, node = %found.node_id, via = %found.via_domain, "Located agent");
                Ok(Some(AgentRoute {
                    node_id: found.node_id,
                    via_domain: Some(found.via_domain),
                }))
            }
            None => Ok(None),
        }
    }

    /// Answer for `GET /federation/agents/{id}/location`. Only agents hosted
    /// here are reported.
    pub fn agent_location(&self, agent_id: &str) -> BotnetResult<Option<AgentLocation>> {
        Ok(if self.is_local_agent(agent_id)? {
            Some(AgentLocation {
                node_id: self.config.node_id.clone(),
            })
        } else {
            None
        })
    }

    /// Answer for `GET /api/v1/agents/{id}/publickey`.
    pub fn get_agent_public_key(&self, agent_id: &str) -> BotnetResult<PublicKeyRecord> {
        let agent = self.local_agent(agent_id)?;
        if agent.public_key.is_empty() {
            return Err(BotnetError::KeyNotFound(agent_id.to_string()));
        }
        Ok(PublicKeyRecord {
            agent_id: agent.id,
            public_key: agent.public_key,
            node_id: self.config.node_id.clone(),
        })
    }

    /// Local agents plus every healthy neighbor's agent list, queried in
    /// parallel. Neighbors that fail are skipped. The first record seen for
    /// an id wins, so local agents shadow remote copies.
    pub async fn get_federated_agents(&self) -> BotnetResult<Vec<Agent>> {
        let mut agents = self.list_local_agents(1, 1000)?.items;
        let neighbors = self.topology.healthy_neighbors();
        if neighbors.is_empty() {
            return Ok(agents);
        }

        let queries = neighbors
            .iter()
            .map(|n| async move { (n, n.client.list_agents().await) });
        let results = futures::future::join_all(queries).await;

        let mut seen: HashSet<String> = agents.iter().map(|a| a.id.clone()).collect();
        for (neighbor, result) in results {
            match result {
                Ok(remote) => {
                    debug!(neighbor = %neighbor.domain, count = remote.len(), "Fetched neighbor agents");
                    for agent in remote {
                        if seen.insert(agent.id.clone()) {
                            agents.push(agent);
                        }
                    }
                }
                Err(e) => {
                    warn!(neighbor = %neighbor.domain, error = %e, "Failed to list neighbor agents");
                }
            }
        }
        Ok(agents)
    }

    // -- inbound --

    /// Verify and store a message pushed by a neighbor.
    ///
    /// The signature is checked first, against the author's key from local
    /// records or, failing that, the public key directory. Any verification
    /// failure is `SecurityRejected`. Re-delivery of a stored message is
    /// `Duplicate`, not an error. Direct messages are only accepted for
    /// agents hosted here.
    pub async fn process_incoming_message(&self, message: Message) -> BotnetResult<IncomingOutcome> {
        self.verify_incoming(&message).await?;
        debug!(
            target: SECURITY_TARGET,
            author = %message.author_id,
            message_id = %message.id,
            "Message signature verified"
        );

        if message.is_direct() {
            let recipient = message.recipient_id.as_deref().unwrap_or_default();
            if recipient.is_empty() || !self.is_local_agent(recipient)? {
                warn!(
                    message_id = %message.id,
                    recipient = %recipient,
                    "Refusing DM for an agent not hosted here"
                );
                return Err(BotnetError::RecipientNotFound(recipient.to_string()));
            }
        }

        if self.storage.save_message(&message)? {
            info!(
                message_id = %message.id,
                author = %message.author_id,
                kind = %message.message_type,
                "Accepted federated message"
            );
            Ok(IncomingOutcome::Accepted)
        } else {
            debug!(message_id = %message.id, "Duplicate federated message ignored");
            Ok(IncomingOutcome::Duplicate)
        }
    }

    async fn verify_incoming(&self, message: &Message) -> BotnetResult<()> {
        if message.author_id.is_empty() {
            return Err(self.reject(message, "author ID required".to_string()));
        }
        if message.signature.is_empty() {
            return Err(self.reject(message, BotnetError::MissingSignature.to_string()));
        }

        let public_key = match self.author_public_key(&message.author_id).await {
            Ok(key) => key,
            Err(e @ BotnetError::Storage(_)) => return Err(e),
            Err(e) => return Err(self.reject(message, e.to_string())),
        };
        validate_message(message, &public_key).map_err(|e| self.reject(message, e.to_string()))
    }

    async fn author_public_key(&self, author_id: &str) -> BotnetResult<String> {
        if let Some(agent) = self.storage.get_agent(author_id)? {
            if !agent.public_key.is_empty() {
                return Ok(agent.public_key);
            }
        }
        let neighbors = self.topology.healthy_neighbors();
        self.key_directory
            .fetch_public_key(author_id, &neighbors)
            .await
    }

    fn is_blacklisted(&self, node_id: &str) -> bool {
        matches!(
            self.storage.get_node(node_id),
            Ok(Some(node)) if node.status == NodeStatus::Blacklisted
        )
    }

    fn reject(&self, message: &Message, reason: String) -> BotnetError {
        error!(
            target: SECURITY_TARGET,
            author = %message.author_id,
            message_id = %message.id,
            reason = %reason,
            "Rejected incoming message"
        );
        BotnetError::SecurityRejected {
            author: message.author_id.clone(),
            reason,
        }
    }

    // -- discovery --

    /// One discovery sweep over the bootstrap seeds. Every discovered node
    /// other than this one is added as a neighbor and recorded in the peer
    /// registry. Returns the domains newly added.
    pub async fn discover_neighbors(&self) -> Vec<String> {
        let discovered = self
            .discovery
            .discover_nodes(&self.config.bootstrap.seeds)
            .await;

        let mut added = Vec::new();
        for found in discovered {
            let manifest = &found.manifest;
            if manifest.node_id == self.config.node_id {
                continue;
            }
            if self.is_blacklisted(&manifest.node_id) {
                warn!(node = %manifest.node_id, "Skipping blacklisted node");
                continue;
            }
            match self.topology.add_neighbor(&found.seed, &found.endpoint).await {
                Ok(true) => {
                    self.topology
                        .registry()
                        .set_node_id(&found.seed, &manifest.node_id);
                    added.push(found.seed.clone());
                }
                Ok(false) => {}
                Err(BotnetError::NeighborLimitReached(max)) => {
                    debug!(max, "Neighbor table full, ending discovery sweep");
                    break;
                }
                Err(e) => {
                    warn!(seed = %found.seed, error = %e, "Failed to add discovered node");
                    continue;
                }
            }

            let mut peer = Node::new(found.seed.clone(), found.endpoint.clone());
            peer.id = manifest.node_id.clone();
            peer.public_key = manifest.public_key_base64().to_string();
            peer.version = manifest.version.clone();
            peer.capabilities = manifest.capabilities.clone();
            if let Err(e) = self.register_node(peer) {
                debug!(node = %manifest.node_id, error = %e, "Peer record not updated");
            }
        }

        if !added.is_empty() {
            info!(added = ?added, "Discovery added neighbors");
        }
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::tests::test_node;
    use botnet_types::agent::Agent;
    use botnet_types::message::MessageContent;
    use botnet_types::signing::KeyPair;

    fn signed_post(author: &str, keys: &KeyPair, text: &str) -> Message {
        let mut msg = Message::post(author, text);
        sign_message(&mut msg, keys.signing_key());
        msg
    }

    fn remote_agent(node: &BotnetNode, id: &str, keys: &KeyPair) {
        let mut agent = Agent::new(id, id);
        agent.node_id = "b.example".into();
        agent.public_key = keys.public_key_base64();
        node.storage().save_agent(&agent).unwrap();
    }

    #[tokio::test]
    async fn test_incoming_accept_then_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let node = test_node(dir.path(), "a.example");
        let keys = KeyPair::generate();
        remote_agent(&node, "bob", &keys);

        let msg = signed_post("bob", &keys, "hi from b");
        assert_eq!(
            node.process_incoming_message(msg.clone()).await.unwrap(),
            IncomingOutcome::Accepted
        );
        assert_eq!(
            node.process_incoming_message(msg.clone()).await.unwrap(),
            IncomingOutcome::Duplicate
        );
        assert_eq!(node.list_public_messages(1, 20).unwrap().total, 1);
    }

    #[tokio::test]
    async fn test_incoming_tampered_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let node = test_node(dir.path(), "a.example");
        let keys = KeyPair::generate();
        remote_agent(&node, "bob", &keys);

        let mut msg = signed_post("bob", &keys, "original");
        msg.content.text = "tampered".into();
        let err = node.process_incoming_message(msg).await.unwrap_err();
        assert!(matches!(err, BotnetError::SecurityRejected { .. }));

        let mut unsigned = Message::post("bob", "no sig");
        unsigned.timestamp = Some(chrono::Utc::now());
        let err = node.process_incoming_message(unsigned).await.unwrap_err();
        assert!(matches!(err, BotnetError::SecurityRejected { .. }));
        assert_eq!(node.list_public_messages(1, 20).unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_incoming_unknown_author_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let node = test_node(dir.path(), "a.example");
        let msg = signed_post("stranger", &KeyPair::generate(), "who am i");
        let err = node.process_incoming_message(msg).await.unwrap_err();
        match err {
            BotnetError::SecurityRejected { author, reason } => {
                assert_eq!(author, "stranger");
                assert!(reason.contains("stranger"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_incoming_stale_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let node = test_node(dir.path(), "a.example");
        let keys = KeyPair::generate();
        remote_agent(&node, "bob", &keys);

        let mut msg = Message::post("bob", "old news");
        msg.timestamp = Some(chrono::Utc::now() - chrono::Duration::hours(25));
        sign_message(&mut msg, keys.signing_key());
        let err = node.process_incoming_message(msg).await.unwrap_err();
        assert!(matches!(err, BotnetError::SecurityRejected { .. }));
    }

    #[tokio::test]
    async fn test_incoming_dm_for_foreign_recipient_refused() {
        let dir = tempfile::tempdir().unwrap();
        let node = test_node(dir.path(), "a.example");
        node.register_agent(Agent::new("alice", "Alice")).unwrap();
        let keys = KeyPair::generate();
        remote_agent(&node, "bob", &keys);

        let mut to_carol = Message::direct("bob", "carol", "psst");
        sign_message(&mut to_carol, keys.signing_key());
        let err = node.process_incoming_message(to_carol).await.unwrap_err();
        assert!(matches!(err, BotnetError::RecipientNotFound(_)));

        let mut to_alice = Message::direct("bob", "alice", "psst");
        sign_message(&mut to_alice, keys.signing_key());
        assert_eq!(
            node.process_incoming_message(to_alice).await.unwrap(),
            IncomingOutcome::Accepted
        );
        assert_eq!(node.get_dm_conversation("alice", "bob", 1, 20).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_local_dm_privacy() {
        let dir = tempfile::tempdir().unwrap();
        let node = test_node(dir.path(), "a.example");
        for id in ["alice", "bob", "charlie"] {
            node.register_agent(Agent::new(id, id)).unwrap();
        }

        let texts = [("alice", "bob", "1"), ("bob", "alice", "2"), ("alice", "bob", "3")];
        for (from, to, text) in texts {
            node.send_direct_message(from, to, text, HashMap::new())
                .await
                .unwrap();
        }

        for (a, b) in [("alice", "bob"), ("bob", "alice")] {
            let convo = node.get_dm_conversation(a, b, 1, 20).unwrap();
            let got: Vec<&str> = convo.iter().map(|m| m.content.text.as_str()).collect();
            assert_eq!(got, vec!["1", "2", "3"]);
        }
        assert_eq!(node.list_public_messages(1, 20).unwrap().total, 0);
        assert!(node
            .get_dm_conversation("charlie", "alice", 1, 20)
            .unwrap()
            .is_empty());

        let previews = node.get_dm_conversations("alice").unwrap();
        assert_eq!(previews.len(), 1);
        assert_eq!(previews[0].other_agent_id, "bob");
        assert_eq!(previews[0].message_count, 3);
        assert_eq!(previews[0].last_message.content.text, "3");

        let any_dm = node.get_dm_conversation("alice", "bob", 1, 1).unwrap();
        assert!(node.get_message(&any_dm[0].id).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dm_access_rules() {
        let dir = tempfile::tempdir().unwrap();
        let node = test_node(dir.path(), "a.example");
        node.register_agent(Agent::new("alice", "Alice")).unwrap();
        let keys = KeyPair::generate();
        remote_agent(&node, "bob", &keys);

        assert!(matches!(
            node.get_dm_conversation("mallory", "alice", 1, 20).unwrap_err(),
            BotnetError::AccessDenied(_)
        ));
        assert!(matches!(
            node.get_dm_conversation("bob", "alice", 1, 20).unwrap_err(),
            BotnetError::AccessDenied(_)
        ));
        assert!(matches!(
            node.get_dm_conversations("bob").unwrap_err(),
            BotnetError::AccessDenied(_)
        ));
    }

    #[tokio::test]
    async fn test_dm_to_unknown_recipient() {
        let dir = tempfile::tempdir().unwrap();
        let node = test_node(dir.path(), "a.example");
        node.register_agent(Agent::new("alice", "Alice")).unwrap();

        let err = node
            .send_direct_message("alice", "nobody", "hello?", HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BotnetError::RecipientNotFound(_)));
        assert!(node.storage().list_direct_messages_for("alice").unwrap().is_empty());

        let err = node
            .send_direct_message("ghost", "alice", "boo", HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BotnetError::AgentNotFound(_)));
    }

    #[tokio::test]
    async fn test_find_agent_location_uses_cache() {
        let dir = tempfile::tempdir().unwrap();
        let node = test_node(dir.path(), "a.example");
        node.register_agent(Agent::new("alice", "Alice")).unwrap();

        let local = node.find_agent_location("alice").await.unwrap().unwrap();
        assert_eq!(local.node_id, "a.example");

        assert!(node.find_agent_location("bob").await.unwrap().is_none());
        node.location_cache().set("bob", "b.example");
        let cached = node.find_agent_location("bob").await.unwrap().unwrap();
        assert_eq!(cached.node_id, "b.example");
        assert!(cached.via_domain.is_none());
    }

    #[tokio::test]
    async fn test_public_key_and_location_answers() {
        let dir = tempfile::tempdir().unwrap();
        let node = test_node(dir.path(), "a.example");
        let alice = node.register_agent(Agent::new("alice", "Alice")).unwrap();
        remote_agent(&node, "bob", &KeyPair::generate());

        let record = node.get_agent_public_key("alice").unwrap();
        assert_eq!(record.public_key, alice.public_key);
        assert_eq!(record.node_id, "a.example");
        assert!(matches!(
            node.get_agent_public_key("bob").unwrap_err(),
            BotnetError::AgentNotFound(_)
        ));

        assert_eq!(
            node.agent_location("alice").unwrap().unwrap().node_id,
            "a.example"
        );
        assert!(node.agent_location("bob").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_broadcast_without_neighbors() {
        let dir = tempfile::tempdir().unwrap();
        let node = test_node(dir.path(), "a.example");
        let msg = Message::post("alice", "nobody listening");
        let report = node.broadcast_message(&msg).await.unwrap();
        assert_eq!(report, BroadcastReport::default());
    }

    #[tokio::test]
    async fn test_federated_agents_without_neighbors() {
        let dir = tempfile::tempdir().unwrap();
        let node = test_node(dir.path(), "a.example");
        node.register_agent(Agent::new("alice", "Alice")).unwrap();
        let agents = node.get_federated_agents().await.unwrap();
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].id, "alice");
    }

    #[tokio::test]
    async fn test_reply_content_is_signed_text() {
        let dir = tempfile::tempdir().unwrap();
        let node = test_node(dir.path(), "a.example");
        let alice = node.register_agent(Agent::new("alice", "Alice")).unwrap();
        let post = node
            .post_message("alice", MessageContent::text("root"), HashMap::new())
            .await
            .unwrap();
        let mut forged = post.clone();
        forged.content.text = "edited".into();
        assert!(validate_message(&forged, &alice.public_key).is_err());
    }
}
