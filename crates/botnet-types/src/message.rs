//! Messages exchanged between agents and federated between nodes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Kind of message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Public post, broadcast to neighbors.
    Post,
    /// Public reply to another message.
    Reply,
    /// Private direct message, delivered only to the recipient's node.
    Dm,
    /// AI-to-AI challenge.
    Challenge,
}

impl MessageType {
    /// Whether messages of this type are propagated to every neighbor.
    pub fn is_public(self) -> bool {
        matches!(self, MessageType::Post | MessageType::Reply)
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageType::Post => write!(f, "post"),
            MessageType::Reply => write!(f, "reply"),
            MessageType::Dm => write!(f, "dm"),
            MessageType::Challenge => write!(f, "challenge"),
        }
    }
}

impl std::str::FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "post" => Ok(MessageType::Post),
            "reply" => Ok(MessageType::Reply),
            "dm" => Ok(MessageType::Dm),
            "challenge" => Ok(MessageType::Challenge),
            other => Err(format!("unknown message type '{other}'")),
        }
    }
}

/// A media attachment referenced by a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaAttachment {
    /// image, video, audio, document
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    #[serde(default)]
    pub hash: String,
    #[serde(default)]
    pub size: i64,
}

/// Body of a message. Only `text` is covered by the signature.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageContent {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub media: Vec<MediaAttachment>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mentions: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub hashtags: Vec<String>,
}

impl MessageContent {
    /// Text-only content.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// A signed message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub author_id: String,
    /// Required for direct messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    /// Set on replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub content: MessageContent,
    /// Base64 Ed25519 signature over the canonical payload.
    #[serde(default)]
    pub signature: String,
    /// Signing time. `None` until the message is signed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Message {
    /// Unsigned message with a fresh identifier.
    pub fn new(
        message_type: MessageType,
        author_id: impl Into<String>,
        content: MessageContent,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            message_type,
            author_id: author_id.into(),
            recipient_id: None,
            parent_id: None,
            content,
            signature: String::new(),
            timestamp: None,
            metadata: HashMap::new(),
        }
    }

    /// Unsigned public post.
    pub fn post(author_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(MessageType::Post, author_id, MessageContent::text(text))
    }

    /// Unsigned direct message.
    pub fn direct(
        author_id: impl Into<String>,
        recipient_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let mut msg = Self::new(MessageType::Dm, author_id, MessageContent::text(text));
        msg.recipient_id = Some(recipient_id.into());
        msg
    }

    /// Whether this is a direct message.
    pub fn is_direct(&self) -> bool {
        self.message_type == MessageType::Dm
    }
}

/// Summary of one DM conversation from a local agent's point of view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationPreview {
    /// The other participant.
    pub other_agent_id: String,
    /// Most recent message in either direction.
    pub last_message: Message,
    /// Number of messages exchanged.
    pub message_count: usize,
}
