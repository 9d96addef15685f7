//! In-process fakes shared by unit tests.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::chain::{ChainRpc, TablePage, TableQuery};
use crate::db::{Database, LinkedAccount, LinkedAccountStore, RoleRuleStore};
use crate::error::{ChainError, DatabaseError, PlatformError};
use crate::linking::SignatureVerifier;
use crate::platform::ChatPlatform;
use crate::roles::RoleRule;

type TableKey = (String, String, String);

fn table_key(contract: &str, scope: &str, table: &str) -> TableKey {
    (contract.to_string(), scope.to_string(), table.to_string())
}

/// Scriptable chain endpoint. Unknown tables answer with an empty page.
#[derive(Default)]
pub struct FakeChain {
    name: String,
    fail_all: bool,
    failing_page: Option<usize>,
    accounts: HashMap<String, Vec<String>>,
    tables: HashMap<TableKey, (Vec<serde_json::Value>, usize)>,
    stalled: HashSet<TableKey>,
    calls: AtomicUsize,
}

impl FakeChain {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail_all = true;
        self
    }

    /// Fail whenever the page at `index` (0-based) of a paginated scan is requested.
    pub fn failing_page(mut self, index: usize) -> Self {
        self.failing_page = Some(index);
        self
    }

    pub fn with_accounts(mut self, key: &str, accounts: &[&str]) -> Self {
        self.accounts.insert(
            key.to_string(),
            accounts.iter().map(|a| a.to_string()).collect(),
        );
        self
    }

    pub fn with_table(
        mut self,
        contract: &str,
        scope: &str,
        table: &str,
        rows: Vec<serde_json::Value>,
        page_size: usize,
    ) -> Self {
        self.tables
            .insert(table_key(contract, scope, table), (rows, page_size.max(1)));
        self
    }

    /// A table whose continuation key never advances.
    pub fn stalled_table(mut self, contract: &str, scope: &str, table: &str) -> Self {
        self.stalled.insert(table_key(contract, scope, table));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn failure(&self) -> ChainError {
        ChainError::RequestFailed {
            endpoint: self.name.clone(),
            reason: "scripted failure".to_string(),
        }
    }
}

fn row_id(row: &serde_json::Value) -> Option<u64> {
    row.get("id").and_then(serde_json::Value::as_u64)
}

#[async_trait]
impl ChainRpc for FakeChain {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_key_accounts(&self, public_key: &str) -> Result<Vec<String>, ChainError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_all {
            return Err(self.failure());
        }
        Ok(self.accounts.get(public_key).cloned().unwrap_or_default())
    }

    async fn get_table_rows(&self, query: &TableQuery) -> Result<TablePage, ChainError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_all {
            return Err(self.failure());
        }

        let key = table_key(&query.code, &query.scope, &query.table);
        if self.stalled.contains(&key) {
            return Ok(TablePage {
                rows: vec![serde_json::json!({"id": 1})],
                more: true,
                next_key: "1".to_string(),
            });
        }
        let Some((rows, page_size)) = self.tables.get(&key) else {
            return Ok(TablePage::default());
        };

        if let Some(upper) = &query.upper_bound {
            let lower: u64 = query
                .lower_bound
                .as_deref()
                .and_then(|l| l.parse().ok())
                .unwrap_or(0);
            let upper: u64 = upper.parse().unwrap_or(u64::MAX);
            return Ok(TablePage {
                rows: rows
                    .iter()
                    .filter(|row| row_id(row).is_some_and(|id| id >= lower && id <= upper))
                    .cloned()
                    .collect(),
                more: false,
                next_key: String::new(),
            });
        }

        let offset: usize = query
            .lower_bound
            .as_deref()
            .and_then(|l| l.parse().ok())
            .unwrap_or(0);
        if self.failing_page == Some(offset / page_size) {
            return Err(self.failure());
        }
        let end = (offset + page_size).min(rows.len());
        let more = end < rows.len();
        Ok(TablePage {
            rows: rows.get(offset..end).map(<[_]>::to_vec).unwrap_or_default(),
            more,
            next_key: if more { end.to_string() } else { String::new() },
        })
    }
}

/// In-memory guild with scriptable permission failures.
#[derive(Default)]
pub struct FakePlatform {
    members: Mutex<HashMap<String, BTreeSet<String>>>,
    denied: Mutex<HashSet<String>>,
    mutations: AtomicUsize,
}

impl FakePlatform {
    pub fn set_member(&self, member_id: &str, roles: &[&str]) {
        self.members.lock().unwrap().insert(
            member_id.to_string(),
            roles.iter().map(|r| r.to_string()).collect(),
        );
    }

    pub fn deny_role(&self, role_id: &str) {
        self.denied.lock().unwrap().insert(role_id.to_string());
    }

    pub fn roles_of(&self, member_id: &str) -> BTreeSet<String> {
        self.members
            .lock()
            .unwrap()
            .get(member_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    fn mutate(
        &self,
        member_id: &str,
        role_id: &str,
        grant: bool,
    ) -> Result<(), PlatformError> {
        if self.denied.lock().unwrap().contains(role_id) {
            return Err(PlatformError::PermissionDenied {
                role_id: role_id.to_string(),
                reason: "Missing Permissions".to_string(),
            });
        }
        let mut members = self.members.lock().unwrap();
        let roles = members
            .get_mut(member_id)
            .ok_or_else(|| PlatformError::UnexpectedStatus {
                status: 404,
                body: "Unknown Member".to_string(),
            })?;
        if grant {
            roles.insert(role_id.to_string());
        } else {
            roles.remove(role_id);
        }
        self.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ChatPlatform for FakePlatform {
    async fn list_member_roles(
        &self,
        member_id: &str,
    ) -> Result<Option<BTreeSet<String>>, PlatformError> {
        Ok(self.members.lock().unwrap().get(member_id).cloned())
    }

    async fn add_role(&self, member_id: &str, role_id: &str, _reason: &str) -> Result<(), PlatformError> {
        self.mutate(member_id, role_id, true)
    }

    async fn remove_role(
        &self,
        member_id: &str,
        role_id: &str,
        _reason: &str,
    ) -> Result<(), PlatformError> {
        self.mutate(member_id, role_id, false)
    }
}

/// Verifier with a fixed answer.
pub struct StaticVerifier {
    accept: bool,
}

impl StaticVerifier {
    pub fn new(accept: bool) -> Self {
        Self { accept }
    }
}

impl SignatureVerifier for StaticVerifier {
    fn verify(&self, _signature: &str, _message: &str, _public_key: &str) -> bool {
        self.accept
    }
}

#[derive(Default)]
struct MemoryState {
    accounts: BTreeMap<String, LinkedAccount>,
    rules: BTreeMap<String, RoleRule>,
}

/// Map-backed [`Database`] with the same constraint behaviour as libSQL.
#[derive(Default)]
pub struct MemoryDatabase {
    state: Mutex<MemoryState>,
}

#[async_trait]
impl LinkedAccountStore for MemoryDatabase {
    async fn insert_linked_account(&self, account: &LinkedAccount) -> Result<(), DatabaseError> {
        let mut state = self.state.lock().unwrap();
        let taken = state.accounts.contains_key(&account.discord_id)
            || state
                .accounts
                .values()
                .any(|a| a.blockchain_id == account.blockchain_id);
        if taken {
            return Err(DatabaseError::Constraint("already linked".to_string()));
        }
        state
            .accounts
            .insert(account.discord_id.clone(), account.clone());
        Ok(())
    }

    async fn get_linked_account(
        &self,
        discord_id: &str,
    ) -> Result<Option<LinkedAccount>, DatabaseError> {
        Ok(self.state.lock().unwrap().accounts.get(discord_id).cloned())
    }

    async fn get_linked_account_by_blockchain_id(
        &self,
        blockchain_id: &str,
    ) -> Result<Option<LinkedAccount>, DatabaseError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .accounts
            .values()
            .find(|a| a.blockchain_id == blockchain_id)
            .cloned())
    }

    async fn delete_linked_account(&self, discord_id: &str) -> Result<bool, DatabaseError> {
        Ok(self.state.lock().unwrap().accounts.remove(discord_id).is_some())
    }

    async fn list_linked_accounts(&self) -> Result<Vec<LinkedAccount>, DatabaseError> {
        Ok(self.state.lock().unwrap().accounts.values().cloned().collect())
    }
}

#[async_trait]
impl RoleRuleStore for MemoryDatabase {
    async fn get_role_rule(&self, role_id: &str) -> Result<Option<RoleRule>, DatabaseError> {
        Ok(self.state.lock().unwrap().rules.get(role_id).cloned())
    }

    async fn list_role_rules(&self) -> Result<Vec<RoleRule>, DatabaseError> {
        Ok(self.state.lock().unwrap().rules.values().cloned().collect())
    }

    async fn find_role_by_factory(&self, factory_id: u64) -> Result<Option<String>, DatabaseError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .rules
            .values()
            .find(|r| r.factories.contains(&factory_id))
            .map(|r| r.role_id.clone()))
    }

    async fn find_role_by_threshold(
        &self,
        threshold: Decimal,
    ) -> Result<Option<String>, DatabaseError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .rules
            .values()
            .find(|r| !r.is_holder_role && r.uos_threshold == Some(threshold))
            .map(|r| r.role_id.clone()))
    }

    async fn get_holder_role(&self) -> Result<Option<RoleRule>, DatabaseError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .rules
            .values()
            .find(|r| r.is_holder_role)
            .cloned())
    }

    async fn add_factory(&self, role_id: &str, factory_id: u64) -> Result<(), DatabaseError> {
        let mut state = self.state.lock().unwrap();
        if state.rules.values().any(|r| r.factories.contains(&factory_id)) {
            return Err(DatabaseError::Constraint(format!(
                "factory {factory_id} is already bound"
            )));
        }
        state
            .rules
            .entry(role_id.to_string())
            .or_insert_with(|| RoleRule::new(role_id))
            .factories
            .insert(factory_id);
        Ok(())
    }

    async fn remove_factory(&self, factory_id: u64) -> Result<Option<String>, DatabaseError> {
        let mut state = self.state.lock().unwrap();
        Ok(state
            .rules
            .values_mut()
            .find(|r| r.factories.contains(&factory_id))
            .map(|r| {
                r.factories.remove(&factory_id);
                r.role_id.clone()
            }))
    }

    async fn set_threshold(
        &self,
        role_id: &str,
        threshold: Option<Decimal>,
    ) -> Result<(), DatabaseError> {
        self.state
            .lock()
            .unwrap()
            .rules
            .entry(role_id.to_string())
            .or_insert_with(|| RoleRule::new(role_id))
            .uos_threshold = threshold;
        Ok(())
    }

    async fn set_holder_role(&self, role_id: &str, threshold: Decimal) -> Result<(), DatabaseError> {
        let mut state = self.state.lock().unwrap();
        for rule in state.rules.values_mut() {
            if rule.is_holder_role && rule.role_id != role_id {
                rule.is_holder_role = false;
                rule.uos_threshold = None;
            }
        }
        let rule = state
            .rules
            .entry(role_id.to_string())
            .or_insert_with(|| RoleRule::new(role_id));
        rule.is_holder_role = true;
        rule.uos_threshold = Some(threshold);
        Ok(())
    }

    async fn delete_role_rule(&self, role_id: &str) -> Result<bool, DatabaseError> {
        Ok(self.state.lock().unwrap().rules.remove(role_id).is_some())
    }

    async fn delete_empty_role_rules(
        &self,
        role_ids: &[String],
    ) -> Result<Vec<String>, DatabaseError> {
        let mut state = self.state.lock().unwrap();
        let empty: Vec<String> = role_ids
            .iter()
            .filter(|id| state.rules.get(id.as_str()).is_some_and(RoleRule::is_empty))
            .cloned()
            .collect();
        for role_id in &empty {
            state.rules.remove(role_id);
        }
        Ok(empty)
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        Ok(())
    }
}
