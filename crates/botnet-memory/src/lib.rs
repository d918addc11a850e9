//! Persistence for BotNet nodes.
//!
//! The node talks to storage through the [`Storage`] trait. [`SqliteStore`]
//! is the only implementation; tests use it in-memory.
//!
//! Direct messages never show up in [`Storage::list_messages`]. They are only
//! reachable through the conversation queries, which the caller is expected
//! to gate on the requesting agent being local.

pub mod migration;
pub mod sqlite;

use botnet_types::agent::Agent;
use botnet_types::challenge::{Challenge, ChallengeStatus};
use botnet_types::message::Message;
use botnet_types::node::Node;
use botnet_types::BotnetResult;
use chrono::{DateTime, Utc};

pub use sqlite::SqliteStore;

/// One page of results together with the total number of matches.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
}

/// Storage contract used by the node.
///
/// Pages are 1-based; page 0 is treated as page 1.
pub trait Storage: Send + Sync {
    // -- nodes --
    fn save_node(&self, node: &Node) -> BotnetResult<()>;
    fn get_node(&self, id: &str) -> BotnetResult<Option<Node>>;
    fn list_nodes(&self, page: u32, page_size: u32) -> BotnetResult<Page<Node>>;
    fn delete_node(&self, id: &str) -> BotnetResult<()>;

    // -- agents --
    fn save_agent(&self, agent: &Agent) -> BotnetResult<()>;
    fn get_agent(&self, id: &str) -> BotnetResult<Option<Agent>>;
    /// Agents hosted by `node_id`, or every agent when `None`.
    fn list_agents(
        &self,
        node_id: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> BotnetResult<Page<Agent>>;
    fn delete_agent(&self, id: &str) -> BotnetResult<()>;
    /// Mark agents of `node_id` idle since before `cutoff` as offline.
    /// Returns how many changed.
    fn mark_idle_agents_offline(&self, node_id: &str, cutoff: DateTime<Utc>)
        -> BotnetResult<usize>;

    // -- messages --
    /// Store a message. Returns `false` if a message with the same id was
    /// already stored, in which case nothing changes.
    fn save_message(&self, message: &Message) -> BotnetResult<bool>;
    fn get_message(&self, id: &str) -> BotnetResult<Option<Message>>;
    /// Public messages, newest first. Never returns direct messages.
    fn list_messages(&self, page: u32, page_size: u32) -> BotnetResult<Page<Message>>;
    fn delete_message(&self, id: &str) -> BotnetResult<()>;
    /// Direct messages between two agents, in either direction, oldest first.
    fn get_dm_conversation(
        &self,
        agent_a: &str,
        agent_b: &str,
        page: u32,
        page_size: u32,
    ) -> BotnetResult<Vec<Message>>;
    /// Every direct message sent or received by `agent_id`, oldest first.
    fn list_direct_messages_for(&self, agent_id: &str) -> BotnetResult<Vec<Message>>;

    // -- challenges --
    /// Insert or replace a challenge.
    fn save_challenge(&self, challenge: &Challenge) -> BotnetResult<()>;
    fn get_challenge(&self, id: &str) -> BotnetResult<Option<Challenge>>;
    /// Challenges filtered by target and status, newest first.
    fn list_challenges(
        &self,
        target_id: Option<&str>,
        status: Option<ChallengeStatus>,
        page: u32,
        page_size: u32,
    ) -> BotnetResult<Page<Challenge>>;
    /// Mark pending challenges whose deadline is before `now` as expired.
    /// Returns how many changed.
    fn expire_challenges(&self, now: DateTime<Utc>) -> BotnetResult<usize>;
}

/// Translate a 1-based page into `(limit, offset)`.
pub(crate) fn page_bounds(page: u32, page_size: u32) -> (i64, i64) {
    let page = page.max(1) as i64;
    let size = page_size.max(1) as i64;
    (size, (page - 1) * size)
}
