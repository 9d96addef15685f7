//! Binding chat identities to blockchain accounts.
//!
//! `begin_link` issues a challenge and a signing URL; the wallet signs the
//! challenge hash off-system and posts it back to `/verifySignature`, which
//! lands in `complete_link`.

pub mod challenge;
pub mod signature;

use std::sync::Arc;

use chrono::Utc;
use url::Url;

use crate::chain::ChainGateway;
use crate::config::ServerConfig;
use crate::db::{Database, LinkedAccount};
use crate::error::{DatabaseError, LinkError};
use crate::platform::ChatPlatform;
use crate::roles::RoleReconciler;

pub use self::challenge::{ChallengeStore, LinkRequest, VerifyOutcome, challenge_hash};
pub use self::signature::{EosioK1Verifier, SignatureVerifier};

pub const VERIFY_SIGNATURE_PATH: &str = "/verifySignature";
pub const SIGN_MESSAGE_PATH: &str = "/signMessage";

const UNLINK_REASON: &str = "Account Unlinked";

/// Text the user signs, embedding their id.
pub fn link_message(discord_id: &str) -> String {
    format!(
        "{discord_id} is linking their blockchain id to this service. By signing this message this confirms identification"
    )
}

/// Builds signing-page URLs from the server addressing config.
#[derive(Debug, Clone)]
pub struct SigningUrls {
    signing_host: String,
    callback_url: String,
}

impl SigningUrls {
    pub fn new(server: &ServerConfig) -> Self {
        let signing_host = if server.signing_cname.contains("http") {
            server.signing_cname.trim_end_matches('/').to_string()
        } else {
            let port = if server.dev_mode {
                server.vite_port
            } else {
                server.port
            };
            format!("https://{}:{}", server.signing_cname.trim_end_matches('/'), port)
        };

        let callback_host = if server.cname.contains("http") {
            server.cname.trim_end_matches('/').to_string()
        } else {
            format!("https://{}:{}", server.cname, server.port)
        };
        // Wallets require https for the signing page, but the local callback is plain http.
        let callback_host = if server.dev_mode {
            callback_host.replacen("https", "http", 1)
        } else {
            callback_host
        };

        Self {
            signing_host,
            callback_url: format!("{callback_host}{VERIFY_SIGNATURE_PATH}"),
        }
    }

    pub fn callback_url(&self) -> &str {
        &self.callback_url
    }

    /// `{signing_host}/signMessage?cb=…&hash=…&message=…`
    pub fn signing_url(&self, hash: &str, message: &str) -> Result<String, LinkError> {
        let mut url = Url::parse(&format!("{}{}", self.signing_host, SIGN_MESSAGE_PATH))
            .map_err(|e| LinkError::InvalidInput(format!("invalid signing host: {e}")))?;
        url.query_pairs_mut()
            .append_pair("cb", &self.callback_url)
            .append_pair("hash", hash)
            .append_pair("message", message);
        Ok(url.into())
    }
}

/// Where a chat identity stands in the linking flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    Linked(LinkedAccount),
    /// A challenge was issued and has not been answered or expired yet.
    Pending,
    Unlinked,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlinkReport {
    pub account: LinkedAccount,
    pub revoked_roles: usize,
}

pub struct LinkService {
    challenges: Arc<ChallengeStore>,
    chain: Arc<ChainGateway>,
    db: Arc<dyn Database>,
    platform: Arc<dyn ChatPlatform>,
    reconciler: Arc<RoleReconciler>,
    urls: SigningUrls,
}

impl LinkService {
    pub fn new(
        challenges: Arc<ChallengeStore>,
        chain: Arc<ChainGateway>,
        db: Arc<dyn Database>,
        platform: Arc<dyn ChatPlatform>,
        reconciler: Arc<RoleReconciler>,
        urls: SigningUrls,
    ) -> Self {
        Self {
            challenges,
            chain,
            db,
            platform,
            reconciler,
            urls,
        }
    }

    /// Issue a challenge for `discord_id` and return the signing URL.
    pub async fn begin_link(&self, discord_id: &str) -> Result<String, LinkError> {
        if self.db.get_linked_account(discord_id).await?.is_some() {
            return Err(LinkError::Conflict(
                "You have already linked some Ultra Account to your Discord account. Unlink existing link first."
                    .to_string(),
            ));
        }

        let message = link_message(discord_id);
        let hash = self
            .challenges
            .generate(discord_id, &message)
            .await
            .ok_or_else(|| {
                LinkError::Conflict(
                    "Existing linking request already exists, use the previous URL or wait some time to try again."
                        .to_string(),
                )
            })?;
        self.urls.signing_url(&hash, &message)
    }

    /// Verify a signed challenge, persist the link, and refresh roles once.
    pub async fn complete_link(
        &self,
        hash: &str,
        signature: &str,
        public_key: &str,
    ) -> Result<LinkedAccount, LinkError> {
        let discord_id = match self.challenges.verify(hash, signature, public_key).await {
            VerifyOutcome::Verified { discord_user } => discord_user,
            VerifyOutcome::NotFound | VerifyOutcome::SignatureRejected => {
                return Err(LinkError::VerificationFailed);
            }
        };

        let accounts = self
            .chain
            .get_accounts_by_key(public_key)
            .await
            .map_err(LinkError::Upstream)?;
        let Some(blockchain_id) = accounts.into_iter().next() else {
            return Err(LinkError::InvalidInput(
                "No blockchain accounts exist for the provided public key.".to_string(),
            ));
        };

        if let Some(existing) = self
            .db
            .get_linked_account_by_blockchain_id(&blockchain_id)
            .await?
        {
            tracing::info!(
                discord_id = %discord_id,
                blockchain_id = %blockchain_id,
                linked_to = %existing.discord_id,
                "Blockchain account already linked"
            );
            return Err(LinkError::Conflict(
                "blockchain id is already linked to another discord user".to_string(),
            ));
        }

        let account = LinkedAccount {
            discord_id,
            blockchain_id,
            signature: signature.to_string(),
            created_at: Utc::now(),
        };
        self.db
            .insert_linked_account(&account)
            .await
            .map_err(|e| match e {
                DatabaseError::Constraint(_) => LinkError::Conflict(
                    "user is already linked with discord or blockchain id".to_string(),
                ),
                other => LinkError::Database(other),
            })?;
        tracing::info!(
            discord_id = %account.discord_id,
            blockchain_id = %account.blockchain_id,
            "Linked account"
        );

        if let Err(e) = self
            .reconciler
            .refresh_user(&account.discord_id, &account.blockchain_id)
            .await
        {
            tracing::warn!(discord_id = %account.discord_id, error = %e, "Initial role refresh failed");
        }
        Ok(account)
    }

    pub async fn link_status(&self, discord_id: &str) -> Result<LinkState, LinkError> {
        if let Some(account) = self.db.get_linked_account(discord_id).await? {
            return Ok(LinkState::Linked(account));
        }
        if self.challenges.has_pending(discord_id).await {
            return Ok(LinkState::Pending);
        }
        Ok(LinkState::Unlinked)
    }

    /// Remove the link and revoke every managed role the member holds.
    pub async fn unlink(&self, discord_id: &str) -> Result<UnlinkReport, LinkError> {
        let account = self.db.get_linked_account(discord_id).await?.ok_or_else(|| {
            LinkError::NotFound("discord user does not exist in the database".to_string())
        })?;
        self.db.delete_linked_account(discord_id).await?;
        tracing::info!(discord_id, blockchain_id = %account.blockchain_id, "Unlinked account");

        let held = match self.platform.list_member_roles(discord_id).await {
            Ok(Some(held)) => held,
            Ok(None) => {
                return Ok(UnlinkReport {
                    account,
                    revoked_roles: 0,
                });
            }
            Err(e) => {
                tracing::warn!(discord_id, error = %e, "Could not load roles to revoke after unlink");
                return Ok(UnlinkReport {
                    account,
                    revoked_roles: 0,
                });
            }
        };

        let mut revoked_roles = 0;
        for rule in self.db.list_role_rules().await? {
            if !held.contains(&rule.role_id) {
                continue;
            }
            match self
                .platform
                .remove_role(discord_id, &rule.role_id, UNLINK_REASON)
                .await
            {
                Ok(()) => revoked_roles += 1,
                Err(e) => {
                    tracing::warn!(discord_id, role_id = %rule.role_id, error = %e, "Failed to revoke role on unlink");
                }
            }
        }
        Ok(UnlinkReport {
            account,
            revoked_roles,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::chain::ChainRpc;
    use crate::config::{ChainConfig, RefreshConfig};
    use crate::db::{LinkedAccountStore, RoleRuleStore};
    use crate::error::ErrorKind;
    use crate::testing::{FakeChain, FakePlatform, MemoryDatabase, StaticVerifier};

    fn server(cname: &str, signing: &str, dev_mode: bool) -> ServerConfig {
        ServerConfig {
            host: "0.0.0.0".into(),
            port: 3000,
            cname: cname.into(),
            signing_cname: signing.into(),
            vite_port: 3102,
            dev_mode,
        }
    }

    struct Harness {
        service: LinkService,
        challenges: Arc<ChallengeStore>,
        db: Arc<MemoryDatabase>,
        platform: Arc<FakePlatform>,
    }

    fn harness(chain: FakeChain, accept: bool) -> Harness {
        let gateway = Arc::new(ChainGateway::new(
            vec![Arc::new(chain) as Arc<dyn ChainRpc>],
            ChainConfig::default(),
        ));
        let db = Arc::new(MemoryDatabase::default());
        let platform = Arc::new(FakePlatform::default());
        let challenges = Arc::new(ChallengeStore::new(
            Duration::from_secs(300),
            Arc::new(StaticVerifier::new(accept)),
        ));
        let reconciler = Arc::new(RoleReconciler::new(
            gateway.clone(),
            platform.clone(),
            db.clone(),
            RefreshConfig {
                interval: Duration::from_secs(60),
                single_user_delay: Duration::ZERO,
            },
        ));
        let service = LinkService::new(
            challenges.clone(),
            gateway,
            db.clone(),
            platform.clone(),
            reconciler,
            SigningUrls::new(&server("localhost", "https://sign.example/", false)),
        );
        Harness {
            service,
            challenges,
            db,
            platform,
        }
    }

    #[test]
    fn signing_url_uses_full_hosts_verbatim() {
        let urls = SigningUrls::new(&server("https://bot.example", "https://sign.example/", false));
        assert_eq!(urls.callback_url(), "https://bot.example/verifySignature");
        let url = Url::parse(&urls.signing_url("UOSxabc", "hello world").unwrap()).unwrap();
        assert_eq!(url.path(), "/signMessage");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("cb".into(), "https://bot.example/verifySignature".into()),
                ("hash".into(), "UOSxabc".into()),
                ("message".into(), "hello world".into()),
            ]
        );
    }

    #[test]
    fn dev_mode_uses_vite_port_and_plain_http_callback() {
        let urls = SigningUrls::new(&server("localhost", "localhost", true));
        assert_eq!(urls.callback_url(), "http://localhost:3000/verifySignature");
        assert!(
            urls.signing_url("h", "m")
                .unwrap()
                .starts_with("https://localhost:3102/signMessage?")
        );
    }

    #[tokio::test]
    async fn begin_link_refuses_second_outstanding_challenge() {
        let h = harness(FakeChain::named("a"), true);
        assert!(h.service.begin_link("d1").await.is_ok());
        let err = h.service.begin_link("d1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn link_status_reports_outstanding_challenge() {
        let chain = FakeChain::named("a").with_accounts("K", &["alice"]);
        let h = harness(chain, true);
        h.platform.set_member("d1", &[]);
        assert_eq!(h.service.link_status("d1").await.unwrap(), LinkState::Unlinked);

        h.service.begin_link("d1").await.unwrap();
        assert_eq!(h.service.link_status("d1").await.unwrap(), LinkState::Pending);

        h.platform.set_member("d2", &[]);
        let hash = h.challenges.generate("d2", "m").await.unwrap();
        h.service.complete_link(&hash, "s", "K").await.unwrap();
        assert!(matches!(
            h.service.link_status("d2").await.unwrap(),
            LinkState::Linked(account) if account.blockchain_id == "alice"
        ));
    }

    #[tokio::test]
    async fn complete_link_persists_first_account_and_refreshes() {
        let chain = FakeChain::named("a")
            .with_accounts("EOS_KEY", &["alice", "alice2"])
            .with_table(
                "eosio.nft.ft",
                "alice",
                "token.a",
                vec![json!({"token_factory_id": 5})],
                100,
            );
        let h = harness(chain, true);
        h.db.add_factory("F5", 5).await.unwrap();
        h.platform.set_member("d1", &[]);

        let hash = h.challenges.generate("d1", &link_message("d1")).await.unwrap();
        let account = h.service.complete_link(&hash, "SIG_K1_x", "EOS_KEY").await.unwrap();
        assert_eq!(account.blockchain_id, "alice");
        assert!(h.db.get_linked_account("d1").await.unwrap().is_some());
        assert_eq!(h.platform.roles_of("d1"), BTreeSet::from(["F5".to_string()]));

        let again = h.service.complete_link(&hash, "SIG_K1_x", "EOS_KEY").await.unwrap_err();
        assert_eq!(again.kind(), ErrorKind::VerificationFailed);
    }

    #[tokio::test]
    async fn key_without_accounts_is_rejected() {
        let h = harness(FakeChain::named("a"), true);
        let hash = h.challenges.generate("d1", "m").await.unwrap();
        let err = h.service.complete_link(&hash, "s", "EOS_NONE").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "No blockchain accounts exist for the provided public key."
        );
    }

    #[tokio::test]
    async fn chain_outage_during_link_is_upstream() {
        let h = harness(FakeChain::named("a").failing(), true);
        let hash = h.challenges.generate("d1", "m").await.unwrap();
        let err = h.service.complete_link(&hash, "s", "k").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UpstreamUnavailable);
    }

    #[tokio::test]
    async fn blockchain_id_can_only_be_linked_once() {
        let chain = FakeChain::named("a").with_accounts("K", &["alice"]);
        let h = harness(chain, true);
        for discord in ["d1", "d2"] {
            h.platform.set_member(discord, &[]);
        }
        let first = h.challenges.generate("d1", "m").await.unwrap();
        h.service.complete_link(&first, "s", "K").await.unwrap();

        let second = h.challenges.generate("d2", "m").await.unwrap();
        let err = h.service.complete_link(&second, "s", "K").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(
            err.to_string(),
            "blockchain id is already linked to another discord user"
        );
        assert!(h.db.get_linked_account("d2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unlink_revokes_only_managed_roles() {
        let h = harness(FakeChain::named("a"), true);
        h.db.add_factory("F1", 1).await.unwrap();
        h.db
            .insert_linked_account(&LinkedAccount {
                discord_id: "d1".into(),
                blockchain_id: "alice".into(),
                signature: "s".into(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        h.platform.set_member("d1", &["F1", "Moderator"]);

        let report = h.service.unlink("d1").await.unwrap();
        assert_eq!(report.revoked_roles, 1);
        assert_eq!(h.platform.roles_of("d1"), BTreeSet::from(["Moderator".to_string()]));
        assert_eq!(h.service.link_status("d1").await.unwrap(), LinkState::Unlinked);
        assert_eq!(
            h.service.unlink("d1").await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }
}
