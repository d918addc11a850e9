//! SQLite-backed [`Storage`] implementation.

use crate::migration::run_migrations;
use crate::{page_bounds, Page, Storage};
use botnet_types::agent::Agent;
use botnet_types::challenge::{Challenge, ChallengeStatus};
use botnet_types::error::{BotnetError, BotnetResult};
use botnet_types::message::Message;
use botnet_types::node::Node;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Node storage backed by a single SQLite connection.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    pub fn open(path: &Path) -> BotnetResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(storage_err)?;
        run_migrations(&conn).map_err(storage_err)?;
        debug!(path = %path.display(), "Opened node database");
        Ok(Self::new(Arc::new(Mutex::new(conn))))
    }

    /// Fresh in-memory database.
    pub fn open_in_memory() -> BotnetResult<Self> {
        let conn = Connection::open_in_memory().map_err(storage_err)?;
        run_migrations(&conn).map_err(storage_err)?;
        Ok(Self::new(Arc::new(Mutex::new(conn))))
    }

    /// Wrap an already-migrated connection.
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn conn(&self) -> BotnetResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| BotnetError::Internal(e.to_string()))
    }
}

fn storage_err(e: rusqlite::Error) -> BotnetError {
    BotnetError::Storage(e.to_string())
}

fn fmt_ts(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(s: &str) -> BotnetResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| BotnetError::Storage(format!("bad timestamp '{s}': {e}")))
}

fn to_json<T: serde::Serialize>(value: &T) -> BotnetResult<String> {
    serde_json::to_string(value).map_err(BotnetError::from)
}

fn from_json<T: serde::de::DeserializeOwned>(s: &str) -> BotnetResult<T> {
    serde_json::from_str(s).map_err(BotnetError::from)
}

fn count(conn: &Connection, sql: &str, args: impl rusqlite::Params) -> BotnetResult<u64> {
    let n: i64 = conn.query_row(sql, args, |row| row.get(0)).map_err(storage_err)?;
    Ok(n.max(0) as u64)
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

const NODE_COLUMNS: &str =
    "id, domain, url, public_key, last_seen, status, version, capabilities, created_at, updated_at";

struct RawNode {
    id: String,
    domain: String,
    url: String,
    public_key: String,
    last_seen: String,
    status: String,
    version: String,
    capabilities: String,
    created_at: String,
    updated_at: String,
}

impl RawNode {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            domain: row.get(1)?,
            url: row.get(2)?,
            public_key: row.get(3)?,
            last_seen: row.get(4)?,
            status: row.get(5)?,
            version: row.get(6)?,
            capabilities: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn decode(self) -> BotnetResult<Node> {
        Ok(Node {
            id: self.id,
            domain: self.domain,
            url: self.url,
            public_key: self.public_key,
            last_seen: parse_ts(&self.last_seen)?,
            status: self.status.parse().map_err(BotnetError::Storage)?,
            version: self.version,
            capabilities: from_json(&self.capabilities)?,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

const AGENT_COLUMNS: &str =
    "id, name, node_id, public_key, profile, capabilities, status, last_active, metadata, created_at";

struct RawAgent {
    id: String,
    name: String,
    node_id: String,
    public_key: String,
    profile: String,
    capabilities: String,
    status: String,
    last_active: String,
    metadata: String,
    created_at: String,
}

impl RawAgent {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            node_id: row.get(2)?,
            public_key: row.get(3)?,
            profile: row.get(4)?,
            capabilities: row.get(5)?,
            status: row.get(6)?,
            last_active: row.get(7)?,
            metadata: row.get(8)?,
            created_at: row.get(9)?,
        })
    }

    fn decode(self) -> BotnetResult<Agent> {
        Ok(Agent {
            id: self.id,
            name: self.name,
            node_id: self.node_id,
            public_key: self.public_key,
            profile: from_json(&self.profile)?,
            capabilities: from_json(&self.capabilities)?,
            status: self.status.parse().map_err(BotnetError::Storage)?,
            last_active: parse_ts(&self.last_active)?,
            metadata: from_json(&self.metadata)?,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

const MESSAGE_COLUMNS: &str =
    "id, message_type, author_id, recipient_id, parent_id, content, signature, timestamp, metadata";

struct RawMessage {
    id: String,
    message_type: String,
    author_id: String,
    recipient_id: Option<String>,
    parent_id: Option<String>,
    content: String,
    signature: String,
    timestamp: String,
    metadata: String,
}

impl RawMessage {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            message_type: row.get(1)?,
            author_id: row.get(2)?,
            recipient_id: row.get(3)?,
            parent_id: row.get(4)?,
            content: row.get(5)?,
            signature: row.get(6)?,
            timestamp: row.get(7)?,
            metadata: row.get(8)?,
        })
    }

    fn decode(self) -> BotnetResult<Message> {
        let timestamp = if self.timestamp.is_empty() {
            None
        } else {
            Some(parse_ts(&self.timestamp)?)
        };
        Ok(Message {
            id: self.id,
            message_type: self.message_type.parse().map_err(BotnetError::Storage)?,
            author_id: self.author_id,
            recipient_id: self.recipient_id,
            parent_id: self.parent_id,
            content: from_json(&self.content)?,
            signature: self.signature,
            timestamp,
            metadata: from_json(&self.metadata)?,
        })
    }
}

const CHALLENGE_COLUMNS: &str = "id, challenge_type, issuer_id, target_id, question, answer, status, \
     difficulty, expires_at, completed_at, created_at";

struct RawChallenge {
    id: String,
    challenge_type: String,
    issuer_id: String,
    target_id: String,
    question: String,
    answer: Option<String>,
    status: String,
    difficulty: i64,
    expires_at: String,
    completed_at: Option<String>,
    created_at: String,
}

impl RawChallenge {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            challenge_type: row.get(1)?,
            issuer_id: row.get(2)?,
            target_id: row.get(3)?,
            question: row.get(4)?,
            answer: row.get(5)?,
            status: row.get(6)?,
            difficulty: row.get(7)?,
            expires_at: row.get(8)?,
            completed_at: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    fn decode(self) -> BotnetResult<Challenge> {
        Ok(Challenge {
            id: self.id,
            challenge_type: self.challenge_type.parse().map_err(BotnetError::Storage)?,
            issuer_id: self.issuer_id,
            target_id: self.target_id,
            question: self.question,
            answer: self.answer,
            status: self.status.parse().map_err(BotnetError::Storage)?,
            difficulty: self.difficulty.clamp(0, u32::MAX as i64) as u32,
            expires_at: parse_ts(&self.expires_at)?,
            completed_at: self.completed_at.as_deref().map(parse_ts).transpose()?,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

fn collect<R, T>(
    rows: impl Iterator<Item = rusqlite::Result<R>>,
    decode: impl Fn(R) -> BotnetResult<T>,
) -> BotnetResult<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(decode(row.map_err(storage_err)?)?);
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

impl Storage for SqliteStore {
    fn save_node(&self, node: &Node) -> BotnetResult<()> {
        let caps = to_json(&node.capabilities)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO nodes (id, domain, url, public_key, last_seen, status, version, capabilities, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET domain = ?2, url = ?3, public_key = ?4, last_seen = ?5,
                 status = ?6, version = ?7, capabilities = ?8, updated_at = ?10",
            params![
                node.id,
                node.domain,
                node.url,
                node.public_key,
                fmt_ts(&node.last_seen),
                node.status.to_string(),
                node.version,
                caps,
                fmt_ts(&node.created_at),
                fmt_ts(&node.updated_at),
            ],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    fn get_node(&self, id: &str) -> BotnetResult<Option<Node>> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE id = ?1"),
                params![id],
                RawNode::from_row,
            )
            .optional()
            .map_err(storage_err)?;
        raw.map(RawNode::decode).transpose()
    }

    fn list_nodes(&self, page: u32, page_size: u32) -> BotnetResult<Page<Node>> {
        let (limit, offset) = page_bounds(page, page_size);
        let conn = self.conn()?;
        let total = count(&conn, "SELECT COUNT(*) FROM nodes", params![])?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {NODE_COLUMNS} FROM nodes ORDER BY last_seen DESC LIMIT ?1 OFFSET ?2"
            ))
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![limit, offset], RawNode::from_row)
            .map_err(storage_err)?;
        Ok(Page {
            items: collect(rows, RawNode::decode)?,
            total,
        })
    }

    fn delete_node(&self, id: &str) -> BotnetResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM nodes WHERE id = ?1", params![id])
            .map_err(storage_err)?;
        Ok(())
    }

    fn save_agent(&self, agent: &Agent) -> BotnetResult<()> {
        let profile = to_json(&agent.profile)?;
        let caps = to_json(&agent.capabilities)?;
        let metadata = to_json(&agent.metadata)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO agents (id, name, node_id, public_key, profile, capabilities, status, last_active, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET name = ?2, node_id = ?3, public_key = ?4, profile = ?5,
                 capabilities = ?6, status = ?7, last_active = ?8, metadata = ?9",
            params![
                agent.id,
                agent.name,
                agent.node_id,
                agent.public_key,
                profile,
                caps,
                agent.status.to_string(),
                fmt_ts(&agent.last_active),
                metadata,
                fmt_ts(&agent.created_at),
            ],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    fn get_agent(&self, id: &str) -> BotnetResult<Option<Agent>> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                &format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = ?1"),
                params![id],
                RawAgent::from_row,
            )
            .optional()
            .map_err(storage_err)?;
        raw.map(RawAgent::decode).transpose()
    }

    fn list_agents(
        &self,
        node_id: Option<&str>,
        page: u32,
        page_size: u32,
    ) -> BotnetResult<Page<Agent>> {
        let (limit, offset) = page_bounds(page, page_size);
        let conn = self.conn()?;
        let (total, items) = match node_id {
            Some(node_id) => {
                let total = count(
                    &conn,
                    "SELECT COUNT(*) FROM agents WHERE node_id = ?1",
                    params![node_id],
                )?;
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {AGENT_COLUMNS} FROM agents WHERE node_id = ?1
                         ORDER BY created_at, id LIMIT ?2 OFFSET ?3"
                    ))
                    .map_err(storage_err)?;
                let rows = stmt
                    .query_map(params![node_id, limit, offset], RawAgent::from_row)
                    .map_err(storage_err)?;
                (total, collect(rows, RawAgent::decode)?)
            }
            None => {
                let total = count(&conn, "SELECT COUNT(*) FROM agents", params![])?;
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT {AGENT_COLUMNS} FROM agents ORDER BY created_at, id LIMIT ?1 OFFSET ?2"
                    ))
                    .map_err(storage_err)?;
                let rows = stmt
                    .query_map(params![limit, offset], RawAgent::from_row)
                    .map_err(storage_err)?;
                (total, collect(rows, RawAgent::decode)?)
            }
        };
        Ok(Page { items, total })
    }

    fn delete_agent(&self, id: &str) -> BotnetResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM agents WHERE id = ?1", params![id])
            .map_err(storage_err)?;
        Ok(())
    }

    fn mark_idle_agents_offline(
        &self,
        node_id: &str,
        cutoff: DateTime<Utc>,
    ) -> BotnetResult<usize> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE agents SET status = 'offline'
             WHERE node_id = ?1 AND status != 'offline' AND last_active < ?2",
            params![node_id, fmt_ts(&cutoff)],
        )
        .map_err(storage_err)
    }

    fn save_message(&self, message: &Message) -> BotnetResult<bool> {
        let content = to_json(&message.content)?;
        let metadata = to_json(&message.metadata)?;
        let timestamp = message.timestamp.as_ref().map(fmt_ts).unwrap_or_default();
        let conn = self.conn()?;
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO messages
                     (id, message_type, author_id, recipient_id, parent_id, content, signature, timestamp, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    message.id,
                    message.message_type.to_string(),
                    message.author_id,
                    message.recipient_id,
                    message.parent_id,
                    content,
                    message.signature,
                    timestamp,
                    metadata,
                ],
            )
            .map_err(storage_err)?;
        Ok(inserted > 0)
    }

    fn get_message(&self, id: &str) -> BotnetResult<Option<Message>> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id],
                RawMessage::from_row,
            )
            .optional()
            .map_err(storage_err)?;
        raw.map(RawMessage::decode).transpose()
    }

    fn list_messages(&self, page: u32, page_size: u32) -> BotnetResult<Page<Message>> {
        let (limit, offset) = page_bounds(page, page_size);
        let conn = self.conn()?;
        let total = count(
            &conn,
            "SELECT COUNT(*) FROM messages WHERE message_type != 'dm'",
            params![],
        )?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE message_type != 'dm'
                 ORDER BY timestamp DESC, rowid DESC LIMIT ?1 OFFSET ?2"
            ))
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![limit, offset], RawMessage::from_row)
            .map_err(storage_err)?;
        Ok(Page {
            items: collect(rows, RawMessage::decode)?,
            total,
        })
    }

    fn delete_message(&self, id: &str) -> BotnetResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM messages WHERE id = ?1", params![id])
            .map_err(storage_err)?;
        Ok(())
    }

    fn get_dm_conversation(
        &self,
        agent_a: &str,
        agent_b: &str,
        page: u32,
        page_size: u32,
    ) -> BotnetResult<Vec<Message>> {
        let (limit, offset) = page_bounds(page, page_size);
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE message_type = 'dm'
                   AND ((author_id = ?1 AND recipient_id = ?2) OR (author_id = ?2 AND recipient_id = ?1))
                 ORDER BY timestamp ASC, rowid ASC LIMIT ?3 OFFSET ?4"
            ))
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![agent_a, agent_b, limit, offset], RawMessage::from_row)
            .map_err(storage_err)?;
        collect(rows, RawMessage::decode)
    }

    fn list_direct_messages_for(&self, agent_id: &str) -> BotnetResult<Vec<Message>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE message_type = 'dm' AND (author_id = ?1 OR recipient_id = ?1)
                 ORDER BY timestamp ASC, rowid ASC"
            ))
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![agent_id], RawMessage::from_row)
            .map_err(storage_err)?;
        collect(rows, RawMessage::decode)
    }

    fn save_challenge(&self, challenge: &Challenge) -> BotnetResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO challenges
                 (id, challenge_type, issuer_id, target_id, question, answer, status,
                  difficulty, expires_at, completed_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                challenge.id,
                challenge.challenge_type.to_string(),
                challenge.issuer_id,
                challenge.target_id,
                challenge.question,
                challenge.answer,
                challenge.status.to_string(),
                challenge.difficulty as i64,
                fmt_ts(&challenge.expires_at),
                challenge.completed_at.as_ref().map(fmt_ts),
                fmt_ts(&challenge.created_at),
            ],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    fn get_challenge(&self, id: &str) -> BotnetResult<Option<Challenge>> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(
                &format!("SELECT {CHALLENGE_COLUMNS} FROM challenges WHERE id = ?1"),
                params![id],
                RawChallenge::from_row,
            )
            .optional()
            .map_err(storage_err)?;
        raw.map(RawChallenge::decode).transpose()
    }

    fn list_challenges(
        &self,
        target_id: Option<&str>,
        status: Option<ChallengeStatus>,
        page: u32,
        page_size: u32,
    ) -> BotnetResult<Page<Challenge>> {
        let (limit, offset) = page_bounds(page, page_size);
        let status = status.map(|s| s.to_string());
        // NULL parameters disable their filter.
        let filter = "(?1 IS NULL OR target_id = ?1) AND (?2 IS NULL OR status = ?2)";
        let conn = self.conn()?;
        let total = count(
            &conn,
            &format!("SELECT COUNT(*) FROM challenges WHERE {filter}"),
            params![target_id, status],
        )?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {CHALLENGE_COLUMNS} FROM challenges WHERE {filter}
                 ORDER BY created_at DESC, rowid DESC LIMIT ?3 OFFSET ?4"
            ))
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(params![target_id, status, limit, offset], RawChallenge::from_row)
            .map_err(storage_err)?;
        Ok(Page {
            items: collect(rows, RawChallenge::decode)?,
            total,
        })
    }

    fn expire_challenges(&self, now: DateTime<Utc>) -> BotnetResult<usize> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE challenges SET status = 'expired'
             WHERE status = 'pending' AND expires_at < ?1",
            params![fmt_ts(&now)],
        )
        .map_err(storage_err)
    }
}
