//! JSON bodies exchanged between neighbors over HTTP.
//!
//! Responses may arrive bare or wrapped in the legacy envelope
//! `{"success": .., "data": .., "error": ..}`; [`decode_body`] accepts both.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Liveness check.
pub const PATH_INFO: &str = "/api/v1/info";
/// Agent listing.
pub const PATH_AGENTS: &str = "/api/v1/agents";
/// Federation message intake.
pub const PATH_FEDERATION_MESSAGES: &str = "/federation/messages";

/// `GET {base}/api/v1/agents/{id}/publickey`, as path segments. The agent id
/// stays a single segment whatever it contains.
pub fn public_key_path(agent_id: &str) -> [&str; 5] {
    ["api", "v1", "agents", agent_id, "publickey"]
}

/// `GET {base}/federation/agents/{id}/location`, as path segments.
pub fn agent_location_path(agent_id: &str) -> [&str; 4] {
    ["federation", "agents", agent_id, "location"]
}

/// Legacy response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Public key of one agent, as served by its hosting node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyRecord {
    pub agent_id: String,
    pub public_key: String,
    #[serde(default)]
    pub node_id: String,
}

/// Which node hosts an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentLocation {
    pub node_id: String,
}

/// Acknowledgement for a federated message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederationAck {
    pub message_id: String,
    /// `accepted` or `duplicate`.
    pub status: String,
}

/// Decode a response body that may or may not be wrapped in [`ApiResponse`].
pub fn decode_body<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, String> {
    let value: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|e| format!("invalid JSON: {e}"))?;
    let is_envelope = value
        .as_object()
        .map(|o| o.contains_key("success") && (o.contains_key("data") || o.contains_key("error")))
        .unwrap_or(false);
    if is_envelope {
        let envelope: ApiResponse<T> =
            serde_json::from_value(value).map_err(|e| format!("invalid envelope: {e}"))?;
        if !envelope.success {
            return Err(envelope.error.unwrap_or_else(|| "request failed".into()));
        }
        return envelope.data.ok_or_else(|| "envelope has no data".to_string());
    }
    serde_json::from_value(value).map_err(|e| format!("unexpected body: {e}"))
}
