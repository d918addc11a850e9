//! Identity store: Ed25519 keypairs for this node and its agents, persisted
//! as JSON key files under the data directory.
//!
//! Layout:
//!
//! ```text
//! <data_dir>/node_keys/node.key      node keypair
//! <data_dir>/keys/<agent_id>.key     one file per local agent
//! ```
//!
//! Key directories are created `0700` and key files `0600` on Unix. Only the
//! derived public key ever leaves this module as text; private key material
//! is zeroized when the in-memory record is dropped.

use botnet_types::error::{BotnetError, BotnetResult};
use botnet_types::signing::{private_key_from_base64, public_key_from_base64, KeyPair};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};
use zeroize::{Zeroize, ZeroizeOnDrop};

const NODE_KEYS_DIR: &str = "node_keys";
const NODE_KEY_FILE: &str = "node.key";
const AGENT_KEYS_DIR: &str = "keys";
const KEY_FILE_EXT: &str = "key";

/// Whose key a file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    Node,
    Agent,
}

impl std::fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentityKind::Node => write!(f, "node"),
            IdentityKind::Agent => write!(f, "agent"),
        }
    }
}

/// On-disk key file.
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct StoredKey {
    #[zeroize(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    node_id: Option<String>,
    #[zeroize(skip)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    agent_id: Option<String>,
    #[zeroize(skip)]
    public_key: String,
    private_key: String,
    /// Unix seconds.
    #[zeroize(skip)]
    created_at: i64,
}

impl StoredKey {
    fn new(kind: IdentityKind, owner_id: &str, keypair: &KeyPair) -> Self {
        let (node_id, agent_id) = match kind {
            IdentityKind::Node => (Some(owner_id.to_string()), None),
            IdentityKind::Agent => (None, Some(owner_id.to_string())),
        };
        Self {
            node_id,
            agent_id,
            public_key: keypair.public_key_base64(),
            private_key: keypair.private_key_base64(),
            created_at: Utc::now().timestamp(),
        }
    }

    fn owner(&self, kind: IdentityKind) -> Option<&str> {
        match kind {
            IdentityKind::Node => self.node_id.as_deref(),
            IdentityKind::Agent => self.agent_id.as_deref(),
        }
    }
}

/// Filesystem-backed keypair store.
#[derive(Debug, Clone)]
pub struct IdentityStore {
    data_dir: PathBuf,
}

impl IdentityStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn node_key_path(&self) -> PathBuf {
        self.data_dir.join(NODE_KEYS_DIR).join(NODE_KEY_FILE)
    }

    fn agent_keys_dir(&self) -> PathBuf {
        self.data_dir.join(AGENT_KEYS_DIR)
    }

    /// Key file for an agent. Identifiers that could escape the keys
    /// directory are refused.
    pub fn agent_key_path(&self, agent_id: &str) -> BotnetResult<PathBuf> {
        validate_agent_id(agent_id)?;
        Ok(self
            .agent_keys_dir()
            .join(format!("{agent_id}.{KEY_FILE_EXT}")))
    }

    fn key_path(&self, kind: IdentityKind, owner_id: &str) -> BotnetResult<PathBuf> {
        match kind {
            IdentityKind::Node => Ok(self.node_key_path()),
            IdentityKind::Agent => self.agent_key_path(owner_id),
        }
    }

    /// Load the persisted keypair for `owner_id`, generating and persisting a
    /// fresh one if none exists yet.
    pub fn initialize_or_load(&self, kind: IdentityKind, owner_id: &str) -> BotnetResult<KeyPair> {
        let path = self.key_path(kind, owner_id)?;
        if !path.exists() {
            let keypair = KeyPair::generate();
            if persist_new_key(&path, &StoredKey::new(kind, owner_id, &keypair))? {
                info!(kind = %kind, owner = %owner_id, "Generated new identity");
                return Ok(keypair);
            }
            // Lost a creation race; the winner's key is the identity.
        }
        let keypair = load_key_file(&path, kind, owner_id)?;
        debug!(kind = %kind, owner = %owner_id, "Loaded identity");
        Ok(keypair)
    }

    /// Node keypair, created on first boot.
    pub fn node_identity(&self, node_id: &str) -> BotnetResult<KeyPair> {
        self.initialize_or_load(IdentityKind::Node, node_id)
    }

    /// Generate a keypair for a new agent. Fails if the agent already has one.
    pub fn create_agent_identity(&self, agent_id: &str) -> BotnetResult<KeyPair> {
        let path = self.agent_key_path(agent_id)?;
        if path.exists() {
            return Err(BotnetError::DuplicateIdentity(agent_id.to_string()));
        }
        let keypair = KeyPair::generate();
        if !persist_new_key(&path, &StoredKey::new(IdentityKind::Agent, agent_id, &keypair))? {
            return Err(BotnetError::DuplicateIdentity(agent_id.to_string()));
        }
        info!(agent = %agent_id, "Generated agent identity");
        Ok(keypair)
    }

    pub fn has_agent_identity(&self, agent_id: &str) -> bool {
        self.agent_key_path(agent_id)
            .map(|p| p.exists())
            .unwrap_or(false)
    }

    /// Keypair of a local agent, for signing.
    pub fn agent_keypair(&self, agent_id: &str) -> BotnetResult<KeyPair> {
        let path = self.agent_key_path(agent_id)?;
        if !path.exists() {
            return Err(BotnetError::KeyNotFound(agent_id.to_string()));
        }
        load_key_file(&path, IdentityKind::Agent, agent_id)
    }

    /// Base64 public key of a local agent.
    pub fn agent_public_key(&self, agent_id: &str) -> BotnetResult<String> {
        self.agent_keypair(agent_id).map(|k| k.public_key_base64())
    }

    /// Remove an agent's key file. Missing files are not an error.
    pub fn delete_agent_identity(&self, agent_id: &str) -> BotnetResult<()> {
        let path = self.agent_key_path(agent_id)?;
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!(agent = %agent_id, "Deleted agent identity");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Agent identifiers with a key file, sorted.
    pub fn list_agent_identities(&self) -> BotnetResult<Vec<String>> {
        let dir = self.agent_keys_dir();
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(KEY_FILE_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

fn validate_agent_id(agent_id: &str) -> BotnetResult<()> {
    let bad = agent_id.is_empty()
        || agent_id.starts_with('.')
        || agent_id.contains("..")
        || agent_id.contains(['/', '\\', '\0']);
    if bad {
        return Err(BotnetError::InvalidInput(format!(
            "invalid agent id: {agent_id:?}"
        )));
    }
    Ok(())
}

fn load_key_file(path: &Path, kind: IdentityKind, owner_id: &str) -> BotnetResult<KeyPair> {
    let mut contents = std::fs::read_to_string(path)?;
    let parsed = serde_json::from_str::<StoredKey>(&contents);
    contents.zeroize();
    let stored = parsed.map_err(|e| {
        BotnetError::IdentityCorrupt(format!("{}: {e}", path.display()))
    })?;

    match stored.owner(kind) {
        Some(owner) if owner == owner_id => {}
        other => {
            return Err(BotnetError::IdentityCorrupt(format!(
                "{} belongs to {:?}, expected {owner_id}",
                path.display(),
                other.unwrap_or("")
            )));
        }
    }

    let public = public_key_from_base64(&stored.public_key)
        .map_err(|e| BotnetError::IdentityCorrupt(format!("{}: {e}", path.display())))?;
    let signing = private_key_from_base64(&stored.private_key)
        .map_err(|e| BotnetError::IdentityCorrupt(format!("{}: {e}", path.display())))?;
    if signing.verifying_key() != public {
        return Err(BotnetError::IdentityCorrupt(format!(
            "{}: private key does not match public key",
            path.display()
        )));
    }
    Ok(KeyPair::from_signing_key(signing))
}

/// Write a key file only if none exists at `path`.
///
/// The record is written to a private temp file and hard-linked into place,
/// so the key file never exists half-written and an existing one is never
/// replaced. Returns `false` if another key already occupies `path`.
fn persist_new_key(path: &Path, stored: &StoredKey) -> BotnetResult<bool> {
    let dir = path
        .parent()
        .ok_or_else(|| BotnetError::Internal(format!("{} has no parent", path.display())))?;
    std::fs::create_dir_all(dir)?;
    restrict_dir_permissions(dir);

    let tmp = temp_key_path(path);
    let mut json = serde_json::to_string_pretty(stored)?;
    let written = open_private_file(&tmp).and_then(|mut f| {
        f.write_all(json.as_bytes())?;
        f.sync_all()
    });
    json.zeroize();
    if let Err(e) = written {
        let _ = std::fs::remove_file(&tmp);
        return Err(e.into());
    }

    let linked = std::fs::hard_link(&tmp, path);
    let _ = std::fs::remove_file(&tmp);
    match linked {
        Ok(()) => {
            restrict_file_permissions(path);
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Unique sibling of `path` for staging a new key file.
fn temp_key_path(path: &Path) -> PathBuf {
    static NEXT: AtomicU64 = AtomicU64::new(0);
    let n = NEXT.fetch_add(1, Ordering::Relaxed);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.{n}.tmp", std::process::id()))
}

#[cfg(unix)]
fn open_private_file(path: &Path) -> std::io::Result<std::fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn open_private_file(path: &Path) -> std::io::Result<std::fs::File> {
    std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
}

/// Restrict file permissions to owner-only (0600) on Unix.
#[cfg(unix)]
fn restrict_file_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600));
}

#[cfg(not(unix))]
fn restrict_file_permissions(_path: &Path) {}

/// Restrict directory permissions to owner-only (0700) on Unix.
#[cfg(unix)]
fn restrict_dir_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700));
}

#[cfg(not(unix))]
fn restrict_dir_permissions(_path: &Path) {}
