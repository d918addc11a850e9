//! HTTP client for talking to one neighbor.
//!
//! A [`NeighborClient`] wraps a pooled `reqwest::Client` bound to the
//! neighbor's base URL. Clones share the connection pool. Every call carries
//! its own timeout on top of the client-wide one.

use crate::message::{
    agent_location_path, decode_body, public_key_path, AgentLocation, PublicKeyRecord,
    PATH_AGENTS, PATH_FEDERATION_MESSAGES, PATH_INFO,
};
use botnet_types::agent::Agent;
use botnet_types::manifest::{NodeManifest, WELL_KNOWN_MANIFEST_PATH};
use botnet_types::message::Message;
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Errors from the neighbor transport.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("Invalid response: {0}")]
    Decode(String),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("DNS error: {0}")]
    Dns(String),
    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),
}

impl From<WireError> for botnet_types::BotnetError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::InvalidManifest(reason) => botnet_types::BotnetError::ManifestInvalid(reason),
            other => botnet_types::BotnetError::Network(other.to_string()),
        }
    }
}

/// Transport settings shared by every neighbor client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Upper bound for any single request.
    pub request_timeout: Duration,
    pub ping_timeout: Duration,
    pub location_timeout: Duration,
    pub public_key_timeout: Duration,
    pub manifest_timeout: Duration,
    pub federation_timeout: Duration,
    pub direct_message_timeout: Duration,
    pub agents_timeout: Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: Duration,
    /// Skip TLS certificate validation.
    pub accept_invalid_certs: bool,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            ping_timeout: Duration::from_secs(5),
            location_timeout: Duration::from_secs(5),
            public_key_timeout: Duration::from_secs(10),
            manifest_timeout: Duration::from_secs(10),
            federation_timeout: Duration::from_secs(10),
            direct_message_timeout: Duration::from_secs(30),
            agents_timeout: Duration::from_secs(10),
            pool_max_idle_per_host: 10,
            pool_idle_timeout: Duration::from_secs(90),
            accept_invalid_certs: false,
            user_agent: format!("botnet-node/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ClientConfig {
    /// Build the shared HTTP client.
    pub fn build_http(&self) -> Result<reqwest::Client, WireError> {
        let client = reqwest::Client::builder()
            .timeout(self.request_timeout)
            .pool_max_idle_per_host(self.pool_max_idle_per_host)
            .pool_idle_timeout(self.pool_idle_timeout)
            .danger_accept_invalid_certs(self.accept_invalid_certs)
            .user_agent(self.user_agent.clone())
            .build()?;
        Ok(client)
    }
}

/// Persistent client for one neighbor.
#[derive(Debug, Clone)]
pub struct NeighborClient {
    base: Url,
    http: reqwest::Client,
    config: ClientConfig,
}

impl NeighborClient {
    /// Create a client with its own connection pool.
    pub fn new(base_url: &str, config: &ClientConfig) -> Result<Self, WireError> {
        let http = config.build_http()?;
        Self::with_http(base_url, http, config)
    }

    /// Create a client sharing an existing connection pool.
    pub fn with_http(
        base_url: &str,
        http: reqwest::Client,
        config: &ClientConfig,
    ) -> Result<Self, WireError> {
        let base = Url::parse(base_url.trim_end_matches('/'))
            .map_err(|e| WireError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            return Err(WireError::InvalidUrl(base_url.to_string()));
        }
        Ok(Self {
            base,
            http,
            config: config.clone(),
        })
    }

    /// The neighbor's base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.base.as_str().trim_end_matches('/')
    }

    /// Resolve a path like `/api/v1/info` against the base URL, keeping any
    /// path prefix the base carries.
    fn endpoint(&self, path: &str) -> Result<Url, WireError> {
        self.endpoint_segments(path.split('/').filter(|s| !s.is_empty()))
    }

    /// Append each segment verbatim; `/` inside a segment is percent-encoded.
    fn endpoint_segments<'a>(
        &self,
        parts: impl IntoIterator<Item = &'a str>,
    ) -> Result<Url, WireError> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| WireError::InvalidUrl(self.base.to_string()))?;
            segments.pop_if_empty();
            segments.extend(parts);
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        timeout: Duration,
    ) -> Result<Option<T>, WireError> {
        let resp = self.http.get(url.clone()).timeout(timeout).send().await?;
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(WireError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        let bytes = resp.bytes().await?;
        decode_body(&bytes).map(Some).map_err(WireError::Decode)
    }

    /// Liveness check against `/api/v1/info`. Any 2xx counts.
    pub async fn ping(&self) -> Result<(), WireError> {
        let url = self.endpoint(PATH_INFO)?;
        let resp = self
            .http
            .get(url.clone())
            .timeout(self.config.ping_timeout)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(WireError::Status {
                url: url.to_string(),
                status: resp.status().as_u16(),
            });
        }
        Ok(())
    }

    /// Ask the neighbor for an agent's public key. `Ok(None)` on 404.
    pub async fn fetch_public_key(
        &self,
        agent_id: &str,
    ) -> Result<Option<PublicKeyRecord>, WireError> {
        let url = self.endpoint_segments(public_key_path(agent_id))?;
        self.get_json(url, self.config.public_key_timeout).await
    }

    /// Ask the neighbor which node hosts an agent. `Ok(None)` on 404.
    pub async fn locate_agent(&self, agent_id: &str) -> Result<Option<AgentLocation>, WireError> {
        let url = self.endpoint_segments(agent_location_path(agent_id))?;
        self.get_json(url, self.config.location_timeout).await
    }

    /// Agents the neighbor advertises.
    pub async fn list_agents(&self) -> Result<Vec<Agent>, WireError> {
        let agents: Option<Vec<Agent>> = self
            .get_json(self.endpoint(PATH_AGENTS)?, self.config.agents_timeout)
            .await?;
        Ok(agents.unwrap_or_default())
    }

    /// Fetch `/.well-known/botnet-node.json`.
    pub async fn fetch_manifest(&self) -> Result<NodeManifest, WireError> {
        let url = self.endpoint(WELL_KNOWN_MANIFEST_PATH)?;
        self.get_json(url, self.config.manifest_timeout)
            .await?
            .ok_or_else(|| WireError::Status {
                url: format!("{}{}", self.base_url(), WELL_KNOWN_MANIFEST_PATH),
                status: 404,
            })
    }

    /// Broadcast a public message to this neighbor.
    pub async fn post_message(&self, message: &Message) -> Result<(), WireError> {
        self.send_message(message, self.config.federation_timeout)
            .await
    }

    /// Deliver a direct message to this neighbor.
    pub async fn deliver_direct_message(&self, message: &Message) -> Result<(), WireError> {
        self.send_message(message, self.config.direct_message_timeout)
            .await
    }

    async fn send_message(&self, message: &Message, timeout: Duration) -> Result<(), WireError> {
        let url = self.endpoint(PATH_FEDERATION_MESSAGES)?;
        let resp = self
            .http
            .post(url.clone())
            .timeout(timeout)
            .json(message)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(WireError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        debug!(url = %url, message_id = %message.id, "Federated message");
        Ok(())
    }
}
