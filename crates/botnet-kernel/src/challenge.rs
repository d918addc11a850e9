//! Agent-to-agent challenges.
//!
//! A local agent poses a question to any agent; the challenge stays
//! answerable until its deadline, after which the `challenge_expiry` loop
//! (or the first late answer) marks it expired.

use crate::node::BotnetNode;
use botnet_memory::Page;
use botnet_types::challenge::{new_challenge_id, Challenge, ChallengeStatus};
use botnet_types::error::{BotnetError, BotnetResult};
use chrono::Utc;
use tracing::{debug, info};

impl BotnetNode {
    /// Record a new pending challenge issued by a local agent.
    ///
    /// The node assigns status, creation time and deadline; an empty id is
    /// replaced with a fresh one.
    pub fn create_challenge(&self, mut challenge: Challenge) -> BotnetResult<Challenge> {
        if !self.config.challenges.enabled {
            return Err(BotnetError::InvalidInput(
                "challenges are disabled on this node".into(),
            ));
        }
        if challenge.issuer_id.trim().is_empty() || challenge.target_id.trim().is_empty() {
            return Err(BotnetError::InvalidInput(
                "issuer_id and target_id are required".into(),
            ));
        }
        if challenge.question.trim().is_empty() {
            return Err(BotnetError::InvalidInput("question is required".into()));
        }
        let mut issuer = self.local_agent(&challenge.issuer_id)?;

        if challenge.id.trim().is_empty() {
            challenge.id = new_challenge_id();
        } else if self.storage.get_challenge(&challenge.id)?.is_some() {
            return Err(BotnetError::InvalidInput(format!(
                "challenge already exists: {}",
                challenge.id
            )));
        }

        let now = Utc::now();
        challenge.status = ChallengeStatus::Pending;
        challenge.answer = None;
        challenge.completed_at = None;
        challenge.created_at = now;
        challenge.expires_at = now + self.config.challenges.lifetime();

        self.storage.save_challenge(&challenge)?;
        self.touch_agent(&mut issuer);
        info!(
            challenge = %challenge.id,
            issuer = %challenge.issuer_id,
            target = %challenge.target_id,
            kind = %challenge.challenge_type,
            "Challenge created"
        );
        Ok(challenge)
    }

    /// Answer a pending challenge.
    ///
    /// A challenge past its deadline is marked expired and the answer is
    /// refused with `ChallengeExpired`.
    pub fn respond_to_challenge(&self, challenge_id: &str, answer: &str) -> BotnetResult<Challenge> {
        let mut challenge = self.get_challenge(challenge_id)?;
        if challenge.status != ChallengeStatus::Pending {
            return Err(BotnetError::InvalidInput(format!(
                "challenge {challenge_id} is {}, not pending",
                challenge.status
            )));
        }

        let now = Utc::now();
        if challenge.is_expired_at(now) {
            challenge.status = ChallengeStatus::Expired;
            self.storage.save_challenge(&challenge)?;
            return Err(BotnetError::ChallengeExpired(challenge_id.to_string()));
        }

        // Any answer completes the challenge; grading is up to the issuer.
        challenge.answer = Some(answer.to_string());
        challenge.status = ChallengeStatus::Completed;
        challenge.completed_at = Some(now);
        self.storage.save_challenge(&challenge)?;
        info!(challenge = %challenge_id, target = %challenge.target_id, "Challenge answered");
        Ok(challenge)
    }

    pub fn get_challenge(&self, challenge_id: &str) -> BotnetResult<Challenge> {
        self.storage
            .get_challenge(challenge_id)?
            .ok_or_else(|| BotnetError::ChallengeNotFound(challenge_id.to_string()))
    }

    /// Challenges, newest first, optionally narrowed to one target and/or
    /// one status.
    pub fn list_challenges(
        &self,
        target_id: Option<&str>,
        status: Option<ChallengeStatus>,
        page: u32,
        page_size: u32,
    ) -> BotnetResult<Page<Challenge>> {
        self.storage
            .list_challenges(target_id, status, page, page_size)
    }

    /// Expire every pending challenge past its deadline.
    pub fn expire_challenges(&self) -> BotnetResult<usize> {
        let expired = self.storage.expire_challenges(Utc::now())?;
        if expired > 0 {
            info!(count = expired, "Expired overdue challenges");
        } else {
            debug!("No overdue challenges");
        }
        Ok(expired)
    }
}
