//! AI-to-AI challenges issued by local agents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of task a challenge poses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeType {
    ProofOfWork,
    #[default]
    TuringTest,
    KnowledgeTest,
}

impl std::fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChallengeType::ProofOfWork => write!(f, "proof_of_work"),
            ChallengeType::TuringTest => write!(f, "turing_test"),
            ChallengeType::KnowledgeTest => write!(f, "knowledge_test"),
        }
    }
}

impl std::str::FromStr for ChallengeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "proof_of_work" => Ok(ChallengeType::ProofOfWork),
            "turing_test" => Ok(ChallengeType::TuringTest),
            "knowledge_test" => Ok(ChallengeType::KnowledgeTest),
            other => Err(format!("unknown challenge type '{other}'")),
        }
    }
}

/// Lifecycle of a challenge. Only `Pending` challenges accept answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeStatus {
    #[default]
    Pending,
    Completed,
    Failed,
    Expired,
}

impl std::fmt::Display for ChallengeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChallengeStatus::Pending => write!(f, "pending"),
            ChallengeStatus::Completed => write!(f, "completed"),
            ChallengeStatus::Failed => write!(f, "failed"),
            ChallengeStatus::Expired => write!(f, "expired"),
        }
    }
}

impl std::str::FromStr for ChallengeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ChallengeStatus::Pending),
            "completed" => Ok(ChallengeStatus::Completed),
            "failed" => Ok(ChallengeStatus::Failed),
            "expired" => Ok(ChallengeStatus::Expired),
            other => Err(format!("unknown challenge status '{other}'")),
        }
    }
}

/// A question one agent poses to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: String,
    #[serde(rename = "type", default)]
    pub challenge_type: ChallengeType,
    /// Local agent that posed the challenge.
    pub issuer_id: String,
    /// Agent expected to answer. May live on another node.
    pub target_id: String,
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default)]
    pub status: ChallengeStatus,
    #[serde(default)]
    pub difficulty: u32,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Fresh challenge identifier.
pub fn new_challenge_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl Challenge {
    /// A pending challenge with a fresh id. `expires_at` is `created_at`
    /// until the node applies its lifetime.
    pub fn new(
        issuer_id: impl Into<String>,
        target_id: impl Into<String>,
        question: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_challenge_id(),
            challenge_type: ChallengeType::default(),
            issuer_id: issuer_id.into(),
            target_id: target_id.into(),
            question: question.into(),
            answer: None,
            status: ChallengeStatus::Pending,
            difficulty: 1,
            expires_at: now,
            completed_at: None,
            created_at: now,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_strings() {
        for status in [
            ChallengeStatus::Pending,
            ChallengeStatus::Completed,
            ChallengeStatus::Failed,
            ChallengeStatus::Expired,
        ] {
            assert_eq!(status.to_string().parse::<ChallengeStatus>().unwrap(), status);
        }
        assert!("done".parse::<ChallengeStatus>().is_err());
    }

    #[test]
    fn test_json_uses_type_field() {
        let mut c = Challenge::new("alice", "bob", "2+2?");
        c.challenge_type = ChallengeType::KnowledgeTest;
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["type"], "knowledge_test");
        assert_eq!(json["status"], "pending");
        assert!(json.get("answer").is_none());

        let parsed: Challenge = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, c);
    }

    #[test]
    fn test_expiry_is_strict() {
        let c = Challenge::new("alice", "bob", "?");
        assert!(!c.is_expired_at(c.expires_at));
        assert!(c.is_expired_at(c.expires_at + chrono::Duration::seconds(1)));
    }
}
