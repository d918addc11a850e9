//! Ed25519 signing for messages and node manifests.
//!
//! Messages are signed over the UTF-8 bytes of `author_id|text|unix_seconds`.
//! Only those three fields are authenticated: recipient, parent, media, links,
//! mentions, hashtags and metadata can be altered in transit without breaking
//! the signature.
//!
//! Manifests are signed over their JSON encoding with the `signature` field
//! left out, fields in declaration order.
//!
//! Validation checks timestamps before touching key material, so a stale
//! message is rejected even when its signature is perfectly good.
//!
//! All keys and signatures travel as standard base64. Private keys are the
//! 64-byte `secret || public` form.

use crate::error::{BotnetError, BotnetResult};
use crate::manifest::{format_node_public_key, parse_node_public_key, NodeManifest};
use crate::message::Message;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

/// Oldest acceptable message timestamp, in seconds.
pub const MESSAGE_MAX_AGE_SECS: i64 = 24 * 60 * 60;
/// Allowed clock skew for message timestamps, in seconds.
pub const MESSAGE_MAX_FUTURE_SECS: i64 = 5 * 60;
/// Oldest acceptable manifest timestamp, in seconds.
pub const MANIFEST_MAX_AGE_SECS: i64 = 7 * 24 * 60 * 60;
/// Allowed clock skew for manifest timestamps, in seconds.
pub const MANIFEST_MAX_FUTURE_SECS: i64 = 10 * 60;

/// An Ed25519 keypair owned by a node or an agent.
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key_base64())
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        Self { signing_key }
    }

    /// Rebuild a keypair from a base64 64-byte private key.
    pub fn from_private_base64(encoded: &str) -> BotnetResult<Self> {
        private_key_from_base64(encoded).map(Self::from_signing_key)
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn public_key_base64(&self) -> String {
        public_key_to_base64(&self.verifying_key())
    }

    /// Base64 of the 64-byte `secret || public` private key.
    pub fn private_key_base64(&self) -> String {
        B64.encode(self.signing_key.to_keypair_bytes())
    }
}

/// Encode a public key as standard base64.
pub fn public_key_to_base64(key: &VerifyingKey) -> String {
    B64.encode(key.to_bytes())
}

/// Decode a 32-byte base64 public key.
pub fn public_key_from_base64(encoded: &str) -> BotnetResult<VerifyingKey> {
    let bytes = B64
        .decode(encoded.trim())
        .map_err(|e| BotnetError::InvalidInput(format!("public key is not base64: {e}")))?;
    let bytes: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
        BotnetError::InvalidInput(format!(
            "invalid public key length: expected 32 bytes, got {}",
            bytes.len()
        ))
    })?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|e| BotnetError::InvalidInput(format!("invalid public key: {e}")))
}

/// Decode a 64-byte base64 private key. The embedded public half must match
/// the secret half.
pub fn private_key_from_base64(encoded: &str) -> BotnetResult<SigningKey> {
    let bytes = B64
        .decode(encoded.trim())
        .map_err(|e| BotnetError::InvalidInput(format!("private key is not base64: {e}")))?;
    let bytes: [u8; 64] = bytes.as_slice().try_into().map_err(|_| {
        BotnetError::InvalidInput(format!(
            "invalid private key length: expected 64 bytes, got {}",
            bytes.len()
        ))
    })?;
    SigningKey::from_keypair_bytes(&bytes)
        .map_err(|e| BotnetError::InvalidInput(format!("invalid private key: {e}")))
}

fn decode_signature(encoded: &str) -> BotnetResult<Signature> {
    let bytes = B64
        .decode(encoded)
        .map_err(|_| BotnetError::InvalidSignature)?;
    let bytes: [u8; 64] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| BotnetError::InvalidSignature)?;
    Ok(Signature::from_bytes(&bytes))
}

fn check_window(
    what: &str,
    at: DateTime<Utc>,
    now: DateTime<Utc>,
    max_age_secs: i64,
    max_future_secs: i64,
) -> BotnetResult<()> {
    let max_age = Duration::seconds(max_age_secs);
    let max_future = Duration::seconds(max_future_secs);
    if now - at > max_age {
        return Err(BotnetError::TimestampOutOfWindow(format!(
            "{what} timestamp too old (max age {}h)",
            max_age.num_hours()
        )));
    }
    if at - now > max_future {
        return Err(BotnetError::TimestampOutOfWindow(format!(
            "{what} timestamp too far in future (max {}m)",
            max_future.num_minutes()
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Bytes covered by a message signature.
pub fn canonical_message_payload(msg: &Message) -> Vec<u8> {
    let unix = msg.timestamp.map(|t| t.timestamp()).unwrap_or_default();
    format!("{}|{}|{}", msg.author_id, msg.content.text, unix).into_bytes()
}

/// Sign a message in place, stamping it with the current time if unset.
pub fn sign_message(msg: &mut Message, key: &SigningKey) {
    if msg.timestamp.is_none() {
        msg.timestamp = Some(Utc::now());
    }
    let signature = key.sign(&canonical_message_payload(msg));
    msg.signature = B64.encode(signature.to_bytes());
}

/// Check a message signature against a known key.
pub fn verify_message(msg: &Message, key: &VerifyingKey) -> BotnetResult<()> {
    if msg.signature.is_empty() {
        return Err(BotnetError::MissingSignature);
    }
    let signature = decode_signature(&msg.signature)?;
    key.verify(&canonical_message_payload(msg), &signature)
        .map_err(|_| BotnetError::InvalidSignature)
}

/// Full acceptance check for a message claimed to come from the holder of
/// `public_key_b64`.
pub fn validate_message(msg: &Message, public_key_b64: &str) -> BotnetResult<()> {
    validate_message_at(msg, public_key_b64, Utc::now())
}

/// [`validate_message`] against an explicit clock.
pub fn validate_message_at(
    msg: &Message,
    public_key_b64: &str,
    now: DateTime<Utc>,
) -> BotnetResult<()> {
    if msg.author_id.is_empty() {
        return Err(BotnetError::InvalidInput("message missing author ID".into()));
    }
    if msg.signature.is_empty() {
        return Err(BotnetError::MissingSignature);
    }
    let at = msg
        .timestamp
        .ok_or_else(|| BotnetError::TimestampOutOfWindow("message has no timestamp".into()))?;
    check_window(
        "message",
        at,
        now,
        MESSAGE_MAX_AGE_SECS,
        MESSAGE_MAX_FUTURE_SECS,
    )?;

    let key = public_key_from_base64(public_key_b64)?;
    verify_message(msg, &key)
}

// ---------------------------------------------------------------------------
// Manifests
// ---------------------------------------------------------------------------

/// Bytes covered by a manifest signature.
pub fn canonical_manifest_payload(manifest: &NodeManifest) -> BotnetResult<Vec<u8>> {
    serde_json::to_vec(&manifest.body()).map_err(BotnetError::from)
}

/// Stamp `updated_at`, embed the public key and sign.
pub fn sign_manifest(manifest: &mut NodeManifest, key: &SigningKey) -> BotnetResult<()> {
    sign_manifest_with_timestamp(manifest, key, Utc::now())
}

/// [`sign_manifest`] with an explicit `updated_at`.
pub fn sign_manifest_with_timestamp(
    manifest: &mut NodeManifest,
    key: &SigningKey,
    updated_at: DateTime<Utc>,
) -> BotnetResult<()> {
    manifest.updated_at = updated_at;
    manifest.public_key = format_node_public_key(&public_key_to_base64(&key.verifying_key()));
    let payload = canonical_manifest_payload(manifest)?;
    manifest.signature = B64.encode(key.sign(&payload).to_bytes());
    Ok(())
}

/// Check a manifest signature against its own embedded public key.
pub fn verify_manifest(manifest: &NodeManifest) -> BotnetResult<()> {
    if manifest.signature.is_empty() {
        return Err(BotnetError::MissingSignature);
    }
    if manifest.public_key.is_empty() {
        return Err(BotnetError::ManifestInvalid("manifest has no public key".into()));
    }
    let key = public_key_from_base64(parse_node_public_key(&manifest.public_key))
        .map_err(|e| BotnetError::ManifestInvalid(e.to_string()))?;
    let signature = decode_signature(&manifest.signature)?;
    let payload = canonical_manifest_payload(manifest)?;
    key.verify(&payload, &signature)
        .map_err(|_| BotnetError::InvalidSignature)
}

/// Structural, freshness and signature checks for a peer manifest.
pub fn validate_manifest_with_timestamp(manifest: &NodeManifest) -> BotnetResult<()> {
    validate_manifest_at(manifest, Utc::now())
}

/// [`validate_manifest_with_timestamp`] against an explicit clock.
pub fn validate_manifest_at(manifest: &NodeManifest, now: DateTime<Utc>) -> BotnetResult<()> {
    if manifest.node_id.is_empty() {
        return Err(BotnetError::ManifestInvalid("manifest missing node ID".into()));
    }
    if manifest.public_key.is_empty() {
        return Err(BotnetError::ManifestInvalid(
            "manifest missing public key".into(),
        ));
    }
    if manifest.signature.is_empty() {
        return Err(BotnetError::MissingSignature);
    }
    check_window(
        "manifest",
        manifest.updated_at,
        now,
        MANIFEST_MAX_AGE_SECS,
        MANIFEST_MAX_FUTURE_SECS,
    )?;
    verify_manifest(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{NodeEndpoints, RateLimitInfo};

    fn signed_post(kp: &KeyPair, author: &str, text: &str) -> Message {
        let mut msg = Message::post(author, text);
        sign_message(&mut msg, kp.signing_key());
        msg
    }

    fn make_manifest() -> NodeManifest {
        NodeManifest {
            node_id: "a.example.com".into(),
            version: "1.0.0".into(),
            public_key: String::new(),
            endpoints: NodeEndpoints::for_domain("a.example.com"),
            capabilities: vec!["messaging".into(), "agent_hosting".into()],
            rate_limit: RateLimitInfo {
                messages_per_hour: 1000,
                federation_per_hour: 100,
            },
            updated_at: Utc::now(),
            signature: String::new(),
        }
    }

    #[test]
    fn test_sign_and_verify() {
        let kp = KeyPair::generate();
        let msg = signed_post(&kp, "alice", "hello network");
        assert!(msg.timestamp.is_some());
        assert!(verify_message(&msg, &kp.verifying_key()).is_ok());
        assert!(validate_message(&msg, &kp.public_key_base64()).is_ok());
    }

    #[test]
    fn test_canonical_payload_format() {
        let mut msg = Message::post("alice", "hi there");
        msg.timestamp = DateTime::from_timestamp(1_700_000_000, 0);
        assert_eq!(
            canonical_message_payload(&msg),
            b"alice|hi there|1700000000".to_vec()
        );
    }

    #[test]
    fn test_sign_keeps_existing_timestamp() {
        let kp = KeyPair::generate();
        let at = Utc::now() - Duration::hours(1);
        let mut msg = Message::post("alice", "x");
        msg.timestamp = Some(at);
        sign_message(&mut msg, kp.signing_key());
        assert_eq!(msg.timestamp, Some(at));
    }

    #[test]
    fn test_tampered_text_fails() {
        let kp = KeyPair::generate();
        let mut msg = signed_post(&kp, "alice", "original");
        msg.content.text = "forged".into();
        assert!(matches!(
            verify_message(&msg, &kp.verifying_key()),
            Err(BotnetError::InvalidSignature)
        ));
    }

    #[test]
    fn test_unauthenticated_fields_do_not_break_signature() {
        let kp = KeyPair::generate();
        let mut msg = signed_post(&kp, "alice", "hello");
        msg.content.hashtags.push("injected".into());
        msg.metadata
            .insert("k".into(), serde_json::Value::String("v".into()));
        assert!(verify_message(&msg, &kp.verifying_key()).is_ok());
    }

    #[test]
    fn test_wrong_key_fails() {
        let k1 = KeyPair::generate();
        let k2 = KeyPair::generate();
        let msg = signed_post(&k1, "alice", "hello");
        assert!(verify_message(&msg, &k2.verifying_key()).is_err());
        assert!(validate_message(&msg, &k2.public_key_base64()).is_err());
    }

    #[test]
    fn test_missing_signature() {
        let kp = KeyPair::generate();
        let mut msg = Message::post("alice", "hello");
        msg.timestamp = Some(Utc::now());
        assert!(matches!(
            verify_message(&msg, &kp.verifying_key()),
            Err(BotnetError::MissingSignature)
        ));
        assert!(matches!(
            validate_message(&msg, &kp.public_key_base64()),
            Err(BotnetError::MissingSignature)
        ));
    }

    #[test]
    fn test_missing_author() {
        let kp = KeyPair::generate();
        let mut msg = signed_post(&kp, "alice", "hello");
        msg.author_id.clear();
        assert!(matches!(
            validate_message(&msg, &kp.public_key_base64()),
            Err(BotnetError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_message_window() {
        let kp = KeyPair::generate();
        let now = Utc::now();

        let mut old = Message::post("alice", "old");
        old.timestamp = Some(now - Duration::hours(25));
        sign_message(&mut old, kp.signing_key());
        assert!(verify_message(&old, &kp.verifying_key()).is_ok());
        assert!(matches!(
            validate_message_at(&old, &kp.public_key_base64(), now),
            Err(BotnetError::TimestampOutOfWindow(_))
        ));

        let mut recent = Message::post("alice", "recent");
        recent.timestamp = Some(now - Duration::hours(23));
        sign_message(&mut recent, kp.signing_key());
        assert!(validate_message_at(&recent, &kp.public_key_base64(), now).is_ok());

        let mut future = Message::post("alice", "future");
        future.timestamp = Some(now + Duration::minutes(6));
        sign_message(&mut future, kp.signing_key());
        assert!(validate_message_at(&future, &kp.public_key_base64(), now).is_err());
    }

    #[test]
    fn test_window_checked_before_key_decoding() {
        let kp = KeyPair::generate();
        let mut old = Message::post("alice", "old");
        old.timestamp = Some(Utc::now() - Duration::hours(30));
        sign_message(&mut old, kp.signing_key());
        assert!(matches!(
            validate_message(&old, "not base64!"),
            Err(BotnetError::TimestampOutOfWindow(_))
        ));
    }

    #[test]
    fn test_forgery_without_private_key_fails() {
        let alice = KeyPair::generate();
        let mallory = KeyPair::generate();
        let forged = signed_post(&mallory, "alice", "I am alice");
        assert!(validate_message(&forged, &alice.public_key_base64()).is_err());
    }

    #[test]
    fn test_key_base64_round_trip() {
        let kp = KeyPair::generate();
        let decoded = public_key_from_base64(&kp.public_key_base64()).unwrap();
        assert_eq!(decoded, kp.verifying_key());

        let restored = KeyPair::from_private_base64(&kp.private_key_base64()).unwrap();
        assert_eq!(restored.public_key_base64(), kp.public_key_base64());
    }

    #[test]
    fn test_bad_key_lengths() {
        assert!(public_key_from_base64(&B64.encode([0u8; 31])).is_err());
        assert!(private_key_from_base64(&B64.encode([0u8; 32])).is_err());
        assert!(public_key_from_base64("***").is_err());
    }

    #[test]
    fn test_private_key_with_mismatched_public_half() {
        let a = KeyPair::generate();
        let b = KeyPair::generate();
        let mut bytes = a.signing_key().to_keypair_bytes();
        bytes[32..].copy_from_slice(&b.verifying_key().to_bytes());
        assert!(private_key_from_base64(&B64.encode(bytes)).is_err());
    }

    #[test]
    fn test_manifest_sign_and_verify() {
        let kp = KeyPair::generate();
        let mut manifest = make_manifest();
        sign_manifest(&mut manifest, kp.signing_key()).unwrap();
        assert!(manifest.public_key.starts_with("ed25519:"));
        assert!(verify_manifest(&manifest).is_ok());
        assert!(validate_manifest_with_timestamp(&manifest).is_ok());
    }

    #[test]
    fn test_manifest_verifies_after_json_round_trip() {
        let kp = KeyPair::generate();
        let mut manifest = make_manifest();
        sign_manifest(&mut manifest, kp.signing_key()).unwrap();
        let json = serde_json::to_string_pretty(&manifest).unwrap();
        let received: NodeManifest = serde_json::from_str(&json).unwrap();
        assert!(validate_manifest_with_timestamp(&received).is_ok());
    }

    #[test]
    fn test_manifest_bare_base64_key_accepted() {
        let kp = KeyPair::generate();
        let mut manifest = make_manifest();
        sign_manifest(&mut manifest, kp.signing_key()).unwrap();
        // Re-sign over the bare form so the payload matches what we send.
        manifest.public_key = kp.public_key_base64();
        let payload = canonical_manifest_payload(&manifest).unwrap();
        manifest.signature = B64.encode(kp.signing_key().sign(&payload).to_bytes());
        assert!(verify_manifest(&manifest).is_ok());
    }

    #[test]
    fn test_manifest_tampered_fails() {
        let kp = KeyPair::generate();
        let mut manifest = make_manifest();
        sign_manifest(&mut manifest, kp.signing_key()).unwrap();
        manifest.capabilities.push("admin".into());
        assert!(matches!(
            verify_manifest(&manifest),
            Err(BotnetError::InvalidSignature)
        ));
    }

    #[test]
    fn test_manifest_window() {
        let kp = KeyPair::generate();
        let now = Utc::now();

        let mut stale = make_manifest();
        sign_manifest_with_timestamp(&mut stale, kp.signing_key(), now - Duration::days(8))
            .unwrap();
        assert!(matches!(
            validate_manifest_at(&stale, now),
            Err(BotnetError::TimestampOutOfWindow(_))
        ));

        let mut future = make_manifest();
        sign_manifest_with_timestamp(&mut future, kp.signing_key(), now + Duration::minutes(15))
            .unwrap();
        assert!(validate_manifest_at(&future, now).is_err());

        let mut fresh = make_manifest();
        sign_manifest_with_timestamp(&mut fresh, kp.signing_key(), now).unwrap();
        assert!(validate_manifest_at(&fresh, now).is_ok());
    }

    #[test]
    fn test_manifest_missing_fields() {
        let mut manifest = make_manifest();
        manifest.node_id.clear();
        assert!(matches!(
            validate_manifest_with_timestamp(&manifest),
            Err(BotnetError::ManifestInvalid(_))
        ));
    }
}
