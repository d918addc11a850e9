//! Shared error types for BotNet nodes.

use thiserror::Error;

/// Top-level error type for a BotNet node.
#[derive(Error, Debug)]
pub enum BotnetError {
    /// A persisted key file could not be decoded or belongs to another owner.
    #[error("Identity corrupt: {0}")]
    IdentityCorrupt(String),

    /// A keypair already exists for this agent.
    #[error("Identity already exists for agent: {0}")]
    DuplicateIdentity(String),

    /// The message or manifest carries no signature.
    #[error("Missing signature")]
    MissingSignature,

    /// The signature does not verify against the supplied key.
    #[error("Invalid signature")]
    InvalidSignature,

    /// The signed timestamp is too old or too far in the future.
    #[error("Timestamp out of window: {0}")]
    TimestampOutOfWindow(String),

    /// A node manifest failed structural or signature validation.
    #[error("Invalid manifest: {0}")]
    ManifestInvalid(String),

    /// No public key could be found for this agent.
    #[error("Public key not found for agent: {0}")]
    KeyNotFound(String),

    /// The neighbor table is full.
    #[error("Neighbor limit reached ({0})")]
    NeighborLimitReached(usize),

    /// A prospective neighbor did not answer its liveness ping.
    #[error("Neighbor unreachable: {domain}: {reason}")]
    NeighborUnreachable {
        /// Domain of the neighbor.
        domain: String,
        /// Why the ping failed.
        reason: String,
    },

    /// The recipient of a direct message could not be located.
    #[error("Recipient not found: {0}")]
    RecipientNotFound(String),

    /// An incoming message failed verification.
    #[error("Security check failed for message from {author}: {reason}")]
    SecurityRejected {
        /// Claimed author of the message.
        author: String,
        /// Why verification failed.
        reason: String,
    },

    /// The caller is not allowed to read this data.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// The requested agent was not found.
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    /// The requested node record was not found.
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// The requested challenge was not found.
    #[error("Challenge not found: {0}")]
    ChallengeNotFound(String),

    /// The challenge passed its deadline before it was answered.
    #[error("Challenge expired: {0}")]
    ChallengeExpired(String),

    /// Invalid user input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A storage backend error occurred.
    #[error("Storage error: {0}")]
    Storage(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A network error occurred.
    #[error("Network error: {0}")]
    Network(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_json::Error> for BotnetError {
    fn from(e: serde_json::Error) -> Self {
        BotnetError::Serialization(e.to_string())
    }
}

/// Alias for Result with BotnetError.
pub type BotnetResult<T> = Result<T, BotnetError>;
