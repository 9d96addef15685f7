//! In-memory ledger of outstanding linking challenges.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use crate::linking::signature::SignatureVerifier;

const HASH_PREFIX: &str = "UOSx";

/// One outstanding challenge.
///
/// Field order is the canonical serialization order used for hashing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkRequest {
    pub discord_user: String,
    pub original_message: String,
    /// Absolute expiry in Unix milliseconds.
    pub expiration: i64,
    pub nonce: u32,
    pub mark_as_expired: bool,
    #[serde(skip)]
    pub original_hash: String,
}

impl LinkRequest {
    fn is_purgeable(&self, now_ms: i64) -> bool {
        self.mark_as_expired || self.expiration <= now_ms
    }
}

/// `"UOSx"` + lowercase hex SHA-256 of the request's canonical JSON.
pub fn challenge_hash(request: &LinkRequest) -> String {
    // Serializing a struct of strings and integers cannot fail.
    let canonical = serde_json::to_string(request).unwrap_or_default();
    format!(
        "{HASH_PREFIX}{}",
        hex::encode(Sha256::digest(canonical.as_bytes()))
    )
}

/// Result of a verification attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified { discord_user: String },
    /// No active challenge for the hash (never issued, expired, or consumed).
    NotFound,
    SignatureRejected,
}

impl VerifyOutcome {
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified { .. })
    }
}

#[derive(Debug, Default)]
struct ChallengeState {
    by_user: HashMap<String, LinkRequest>,
    // original_hash -> discord_user
    by_hash: HashMap<String, String>,
}

impl ChallengeState {
    fn purge(&mut self, now_ms: i64) -> usize {
        let stale: Vec<String> = self
            .by_user
            .iter()
            .filter(|(_, request)| request.is_purgeable(now_ms))
            .map(|(user, _)| user.clone())
            .collect();
        for user in &stale {
            if let Some(request) = self.by_user.remove(user) {
                self.by_hash.remove(&request.original_hash);
            }
        }
        stale.len()
    }
}

/// Issues and verifies one-time signing challenges.
///
/// At most one challenge exists per identity. A challenge can be verified
/// once: the first attempt consumes it whatever the outcome.
pub struct ChallengeStore {
    ttl: Duration,
    verifier: Arc<dyn SignatureVerifier>,
    state: RwLock<ChallengeState>,
}

impl ChallengeStore {
    pub fn new(ttl: Duration, verifier: Arc<dyn SignatureVerifier>) -> Self {
        Self {
            ttl,
            verifier,
            state: RwLock::new(ChallengeState::default()),
        }
    }

    /// Issue a challenge for `discord_user`, or `None` if one is outstanding.
    pub async fn generate(&self, discord_user: &str, original_message: &str) -> Option<String> {
        self.generate_at(discord_user, original_message, rand::random::<u32>(), Utc::now())
            .await
    }

    pub async fn generate_at(
        &self,
        discord_user: &str,
        original_message: &str,
        nonce: u32,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let mut state = self.state.write().await;
        self.collect_garbage(&mut state, now);

        if state.by_user.contains_key(discord_user) {
            return None;
        }

        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::minutes(5));
        let mut request = LinkRequest {
            discord_user: discord_user.to_string(),
            original_message: original_message.to_string(),
            expiration: (now + ttl).timestamp_millis(),
            nonce,
            mark_as_expired: false,
            original_hash: String::new(),
        };
        let hash = challenge_hash(&request);
        request.original_hash = hash.clone();

        state
            .by_hash
            .insert(hash.clone(), discord_user.to_string());
        state.by_user.insert(discord_user.to_string(), request);
        tracing::debug!(discord_id = discord_user, "Issued linking challenge");
        Some(hash)
    }

    /// Consume the challenge for `hash` and check `signature` against it.
    pub async fn verify(&self, hash: &str, signature: &str, public_key: &str) -> VerifyOutcome {
        self.verify_at(hash, signature, public_key, Utc::now()).await
    }

    pub async fn verify_at(
        &self,
        hash: &str,
        signature: &str,
        public_key: &str,
        now: DateTime<Utc>,
    ) -> VerifyOutcome {
        let (discord_user, original_hash) = {
            let mut state = self.state.write().await;
            self.collect_garbage(&mut state, now);

            let Some(user) = state.by_hash.get(hash).cloned() else {
                return VerifyOutcome::NotFound;
            };
            let Some(request) = state.by_user.get_mut(&user) else {
                return VerifyOutcome::NotFound;
            };
            request.mark_as_expired = true;
            (user, request.original_hash.clone())
        };

        let verified = self.verifier.verify(signature, &original_hash, public_key);

        {
            let mut state = self.state.write().await;
            self.collect_garbage(&mut state, now);
        }

        if verified {
            VerifyOutcome::Verified { discord_user }
        } else {
            tracing::info!(discord_id = %discord_user, "Linking signature rejected");
            VerifyOutcome::SignatureRejected
        }
    }

    /// Whether an unexpired, unconsumed challenge exists for `discord_user`.
    pub async fn has_pending(&self, discord_user: &str) -> bool {
        let now_ms = Utc::now().timestamp_millis();
        self.state
            .read()
            .await
            .by_user
            .get(discord_user)
            .is_some_and(|request| !request.is_purgeable(now_ms))
    }

    /// Number of stored (not yet purged) challenges.
    pub async fn len(&self) -> usize {
        self.state.read().await.by_user.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn collect_garbage(&self, state: &mut ChallengeState, now: DateTime<Utc>) {
        let removed = state.purge(now.timestamp_millis());
        if removed > 0 {
            tracing::info!(removed, "Removed expired linking requests");
        }
    }
}
