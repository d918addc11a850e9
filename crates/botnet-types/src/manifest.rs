//! Node manifests, the signed self-description every node publishes at
//! `/.well-known/botnet-node.json`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix used for public keys embedded in manifests.
pub const NODE_KEY_PREFIX: &str = "ed25519:";

/// Path of the manifest document relative to a node's base URL.
pub const WELL_KNOWN_MANIFEST_PATH: &str = "/.well-known/botnet-node.json";

/// Named endpoint URLs advertised by a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeEndpoints {
    pub federation: String,
    pub api: String,
    pub web_ui: String,
}

impl NodeEndpoints {
    /// Standard endpoint layout for a node served at `https://{domain}`.
    pub fn for_domain(domain: &str) -> Self {
        Self::for_base_url(&format!("https://{domain}"))
    }

    /// Standard endpoint layout under an arbitrary base URL.
    pub fn for_base_url(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            federation: format!("{base}/federation"),
            api: format!("{base}/api/v1"),
            web_ui: format!("{base}/"),
        }
    }
}

/// Advertised rate limits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitInfo {
    pub messages_per_hour: u32,
    pub federation_per_hour: u32,
}

/// Signed description of a node.
///
/// Field order matters: the signature covers the JSON encoding of every field
/// before `signature`, in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeManifest {
    pub node_id: String,
    pub version: String,
    /// `ed25519:<base64>`
    pub public_key: String,
    pub endpoints: NodeEndpoints,
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub rate_limit: RateLimitInfo,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub signature: String,
}

/// Borrowed view of a manifest without its signature. This is what gets signed.
#[derive(Serialize)]
pub(crate) struct ManifestBody<'a> {
    pub node_id: &'a str,
    pub version: &'a str,
    pub public_key: &'a str,
    pub endpoints: &'a NodeEndpoints,
    pub capabilities: &'a [String],
    pub rate_limit: &'a RateLimitInfo,
    pub updated_at: &'a DateTime<Utc>,
}

impl NodeManifest {
    pub(crate) fn body(&self) -> ManifestBody<'_> {
        ManifestBody {
            node_id: &self.node_id,
            version: &self.version,
            public_key: &self.public_key,
            endpoints: &self.endpoints,
            capabilities: &self.capabilities,
            rate_limit: &self.rate_limit,
            updated_at: &self.updated_at,
        }
    }

    /// Base64 part of `public_key`, with the `ed25519:` prefix stripped.
    /// Bare base64 is accepted as-is.
    pub fn public_key_base64(&self) -> &str {
        parse_node_public_key(&self.public_key)
    }
}

/// Format a base64 public key for embedding in a manifest.
pub fn format_node_public_key(public_key_b64: &str) -> String {
    format!("{NODE_KEY_PREFIX}{public_key_b64}")
}

/// Strip the `ed25519:` prefix if present.
pub fn parse_node_public_key(formatted: &str) -> &str {
    formatted
        .strip_prefix(NODE_KEY_PREFIX)
        .unwrap_or(formatted)
}
