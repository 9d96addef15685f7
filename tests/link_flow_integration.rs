//! End-to-end linking flow against a real libSQL file, a real K1 verifier,
//! and in-process chain and guild fakes.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use rust_decimal_macros::dec;
use serde_json::json;

use uos_linker::chain::{ChainGateway, ChainRpc, TablePage, TableQuery};
use uos_linker::config::{ChainConfig, RefreshConfig, ServerConfig};
use uos_linker::db::libsql::LibSqlBackend;
use uos_linker::db::{Database, LinkedAccountStore, RoleRuleStore};
use uos_linker::error::{ChainError, ErrorKind, PlatformError};
use uos_linker::linking::signature::{encode_public_key, sign_message};
use uos_linker::linking::{ChallengeStore, EosioK1Verifier, LinkService, SigningUrls};
use uos_linker::platform::ChatPlatform;
use uos_linker::roles::RoleReconciler;

struct StubChain {
    accounts: HashMap<String, Vec<String>>,
    tables: HashMap<(String, String, String), Vec<serde_json::Value>>,
}

#[async_trait]
impl ChainRpc for StubChain {
    fn name(&self) -> &str {
        "stub"
    }

    async fn get_key_accounts(&self, public_key: &str) -> Result<Vec<String>, ChainError> {
        Ok(self.accounts.get(public_key).cloned().unwrap_or_default())
    }

    async fn get_table_rows(&self, query: &TableQuery) -> Result<TablePage, ChainError> {
        let key = (query.code.clone(), query.scope.clone(), query.table.clone());
        Ok(TablePage {
            rows: self.tables.get(&key).cloned().unwrap_or_default(),
            more: false,
            next_key: String::new(),
        })
    }
}

#[derive(Default)]
struct Guild {
    members: Mutex<HashMap<String, BTreeSet<String>>>,
}

impl Guild {
    fn roles_of(&self, member_id: &str) -> BTreeSet<String> {
        self.members
            .lock()
            .unwrap()
            .get(member_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChatPlatform for Guild {
    async fn list_member_roles(
        &self,
        member_id: &str,
    ) -> Result<Option<BTreeSet<String>>, PlatformError> {
        Ok(self.members.lock().unwrap().get(member_id).cloned())
    }

    async fn add_role(&self, member_id: &str, role_id: &str, _: &str) -> Result<(), PlatformError> {
        if let Some(roles) = self.members.lock().unwrap().get_mut(member_id) {
            roles.insert(role_id.to_string());
        }
        Ok(())
    }

    async fn remove_role(
        &self,
        member_id: &str,
        role_id: &str,
        _: &str,
    ) -> Result<(), PlatformError> {
        if let Some(roles) = self.members.lock().unwrap().get_mut(member_id) {
            roles.remove(role_id);
        }
        Ok(())
    }
}

struct Harness {
    links: LinkService,
    db: Arc<LibSqlBackend>,
    guild: Arc<Guild>,
    wallet: SigningKey,
    _dir: tempfile::TempDir,
}

async fn harness() -> Harness {
    let wallet = SigningKey::from_slice(&[42u8; 32]).unwrap();
    let public_key = encode_public_key(wallet.verifying_key());

    let table = |contract: &str, scope: &str, name: &str| {
        (contract.to_string(), scope.to_string(), name.to_string())
    };
    let chain = StubChain {
        accounts: HashMap::from([(public_key, vec!["alice".to_string()])]),
        tables: HashMap::from([
            (
                table("eosio.nft.ft", "alice", "token.a"),
                vec![json!({"id": 1, "token_factory_id": 7})],
            ),
            (
                table("eosio.token", "alice", "accounts"),
                vec![json!({"balance": "150.00000000 UOS"})],
            ),
        ]),
    };
    let gateway = Arc::new(ChainGateway::new(
        vec![Arc::new(chain) as Arc<dyn ChainRpc>],
        ChainConfig::default(),
    ));

    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(LibSqlBackend::new_local(&dir.path().join("links.db")).await.unwrap());
    db.run_migrations().await.unwrap();
    db.add_factory("collector", 7).await.unwrap();
    db.set_threshold("tier-100", Some(dec!(100))).await.unwrap();
    db.set_threshold("tier-1000", Some(dec!(1000))).await.unwrap();

    let guild = Arc::new(Guild::default());
    guild
        .members
        .lock()
        .unwrap()
        .insert("d1".to_string(), BTreeSet::from(["tier-1000".to_string()]));

    let reconciler = Arc::new(RoleReconciler::new(
        gateway.clone(),
        guild.clone(),
        db.clone(),
        RefreshConfig {
            interval: Duration::from_secs(60),
            single_user_delay: Duration::ZERO,
        },
    ));
    let challenges = Arc::new(ChallengeStore::new(
        Duration::from_secs(300),
        Arc::new(EosioK1Verifier),
    ));
    let server = ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 3000,
        cname: "links.example.com".to_string(),
        signing_cname: "https://sign.example.com/".to_string(),
        vite_port: 3102,
        dev_mode: false,
    };
    let links = LinkService::new(
        challenges,
        gateway,
        db.clone(),
        guild.clone(),
        reconciler,
        SigningUrls::new(&server),
    );

    Harness {
        links,
        db,
        guild,
        wallet,
        _dir: dir,
    }
}

fn hash_from(signing_url: &str) -> String {
    let url = url::Url::parse(signing_url).unwrap();
    url.query_pairs()
        .find(|(k, _)| k == "hash")
        .map(|(_, v)| v.into_owned())
        .unwrap()
}

#[tokio::test]
async fn signed_challenge_links_account_and_grants_roles() {
    let h = harness().await;
    let signing_url = h.links.begin_link("d1").await.unwrap();
    assert!(signing_url.starts_with("https://sign.example.com/signMessage?cb="));

    let hash = hash_from(&signing_url);
    assert!(hash.starts_with("UOSx"));
    let signature = sign_message(&h.wallet, &hash).unwrap();
    let key = encode_public_key(h.wallet.verifying_key());

    let account = h.links.complete_link(&hash, &signature, &key).await.unwrap();
    assert_eq!(account.discord_id, "d1");
    assert_eq!(account.blockchain_id, "alice");

    let stored = h.db.get_linked_account("d1").await.unwrap().unwrap();
    assert_eq!(stored.blockchain_id, "alice");
    assert_eq!(stored.signature, signature);

    assert_eq!(
        h.guild.roles_of("d1"),
        BTreeSet::from(["collector".to_string(), "tier-100".to_string()])
    );

    let replay = h.links.complete_link(&hash, &signature, &key).await.unwrap_err();
    assert_eq!(replay.kind(), ErrorKind::VerificationFailed);
}

#[tokio::test]
async fn wrong_key_is_rejected_and_challenge_consumed() {
    let h = harness().await;
    let hash = hash_from(&h.links.begin_link("d1").await.unwrap());

    let intruder = SigningKey::from_slice(&[9u8; 32]).unwrap();
    let signature = sign_message(&intruder, &hash).unwrap();
    let victim_key = encode_public_key(h.wallet.verifying_key());

    let err = h
        .links
        .complete_link(&hash, &signature, &victim_key)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::VerificationFailed);
    assert!(h.db.get_linked_account("d1").await.unwrap().is_none());

    let genuine = sign_message(&h.wallet, &hash).unwrap();
    let err = h
        .links
        .complete_link(&hash, &genuine, &victim_key)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::VerificationFailed);
}

#[tokio::test]
async fn unlink_revokes_managed_roles() {
    let h = harness().await;
    let hash = hash_from(&h.links.begin_link("d1").await.unwrap());
    let signature = sign_message(&h.wallet, &hash).unwrap();
    let key = encode_public_key(h.wallet.verifying_key());
    h.links.complete_link(&hash, &signature, &key).await.unwrap();

    let report = h.links.unlink("d1").await.unwrap();
    assert_eq!(report.account.blockchain_id, "alice");
    assert_eq!(report.revoked_roles, 2);
    assert!(h.guild.roles_of("d1").is_empty());
    assert!(h.db.list_linked_accounts().await.unwrap().is_empty());
}
