//! Persistence contracts and backends.
//!
//! Two record sets are stored: linked accounts and role rules. Backends
//! implement the per-concern store traits and the umbrella [`Database`].

#[cfg(feature = "libsql")]
pub mod libsql;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::DatabaseError;
use crate::roles::RoleRule;

/// A chat identity bound to a blockchain account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedAccount {
    pub discord_id: String,
    pub blockchain_id: String,
    pub signature: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait LinkedAccountStore: Send + Sync {
    /// Insert a link. Fails with [`DatabaseError::Constraint`] if either id is
    /// already linked.
    async fn insert_linked_account(&self, account: &LinkedAccount) -> Result<(), DatabaseError>;

    async fn get_linked_account(
        &self,
        discord_id: &str,
    ) -> Result<Option<LinkedAccount>, DatabaseError>;

    async fn get_linked_account_by_blockchain_id(
        &self,
        blockchain_id: &str,
    ) -> Result<Option<LinkedAccount>, DatabaseError>;

    /// Returns whether a record was removed.
    async fn delete_linked_account(&self, discord_id: &str) -> Result<bool, DatabaseError>;

    async fn list_linked_accounts(&self) -> Result<Vec<LinkedAccount>, DatabaseError>;
}

#[async_trait]
pub trait RoleRuleStore: Send + Sync {
    async fn get_role_rule(&self, role_id: &str) -> Result<Option<RoleRule>, DatabaseError>;

    async fn list_role_rules(&self) -> Result<Vec<RoleRule>, DatabaseError>;

    /// Role bound to `factory_id`, if any.
    async fn find_role_by_factory(&self, factory_id: u64) -> Result<Option<String>, DatabaseError>;

    /// Tier role carrying exactly `threshold`, if any. The holder role is excluded.
    async fn find_role_by_threshold(
        &self,
        threshold: Decimal,
    ) -> Result<Option<String>, DatabaseError>;

    async fn get_holder_role(&self) -> Result<Option<RoleRule>, DatabaseError>;

    /// Bind `factory_id` to `role_id`, creating the rule if needed.
    async fn add_factory(&self, role_id: &str, factory_id: u64) -> Result<(), DatabaseError>;

    /// Unbind `factory_id`. Returns the role it was bound to.
    async fn remove_factory(&self, factory_id: u64) -> Result<Option<String>, DatabaseError>;

    /// Set or clear the tier threshold of `role_id`, creating the rule if needed.
    async fn set_threshold(
        &self,
        role_id: &str,
        threshold: Option<Decimal>,
    ) -> Result<(), DatabaseError>;

    /// Make `role_id` the holder role. Any previous holder loses the flag and
    /// its threshold in the same transaction.
    async fn set_holder_role(&self, role_id: &str, threshold: Decimal) -> Result<(), DatabaseError>;

    /// Returns whether a rule was removed.
    async fn delete_role_rule(&self, role_id: &str) -> Result<bool, DatabaseError>;

    /// Delete the rules among `role_ids` that are still empty. Returns the
    /// removed role ids.
    async fn delete_empty_role_rules(
        &self,
        role_ids: &[String],
    ) -> Result<Vec<String>, DatabaseError>;
}

#[async_trait]
pub trait Database: LinkedAccountStore + RoleRuleStore + Send + Sync {
    async fn run_migrations(&self) -> Result<(), DatabaseError>;
}
