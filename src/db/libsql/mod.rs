//! libSQL backend for the [`Database`] trait.
//!
//! Embedded, file-based. A fresh connection is opened per operation; use a
//! file path (e.g. from `tempfile`) in tests since `:memory:` databases are
//! connection-local.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase};
use rust_decimal::Decimal;

use crate::db::{Database, LinkedAccount, LinkedAccountStore, RoleRuleStore};
use crate::error::DatabaseError;
use crate::roles::RoleRule;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS linked_accounts (
    discord_id TEXT PRIMARY KEY,
    blockchain_id TEXT NOT NULL UNIQUE,
    signature TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS role_rules (
    role_id TEXT PRIMARY KEY,
    uos_threshold TEXT,
    is_holder_role INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS role_factories (
    factory_id INTEGER PRIMARY KEY,
    role_id TEXT NOT NULL REFERENCES role_rules(role_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_role_factories_role ON role_factories(role_id);
"#;

const ACCOUNT_COLUMNS: &str = "discord_id, blockchain_id, signature, created_at";

pub struct LibSqlBackend {
    db: Arc<LibSqlDatabase>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {}", e))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {}", e)))?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Open a connection with a busy timeout so concurrent writers wait
    /// instead of failing with "database is locked".
    pub async fn connect(&self) -> Result<Connection, DatabaseError> {
        let conn = self
            .db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {}", e)))?;
        conn.query("PRAGMA busy_timeout = 5000", ())
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to set busy_timeout: {}", e)))?;
        conn.execute("PRAGMA foreign_keys = ON", ())
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to enable foreign keys: {}", e)))?;
        Ok(conn)
    }

    async fn query_accounts(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<LinkedAccount>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn.query(sql, params).await?;
        let mut accounts = Vec::new();
        while let Some(row) = rows.next().await? {
            accounts.push(row_to_linked_account(&row)?);
        }
        Ok(accounts)
    }

    async fn load_rules(
        &self,
        conn: &Connection,
        role_filter: Option<&str>,
    ) -> Result<Vec<RoleRule>, DatabaseError> {
        let mut rules: BTreeMap<String, RoleRule> = BTreeMap::new();

        let mut rows = match role_filter {
            Some(role_id) => {
                conn.query(
                    "SELECT role_id, uos_threshold, is_holder_role FROM role_rules WHERE role_id = ?1",
                    libsql::params![role_id],
                )
                .await?
            }
            None => {
                conn.query(
                    "SELECT role_id, uos_threshold, is_holder_role FROM role_rules",
                    (),
                )
                .await?
            }
        };
        while let Some(row) = rows.next().await? {
            let role_id = get_text(&row, 0);
            let rule = RoleRule {
                role_id: role_id.clone(),
                factories: BTreeSet::new(),
                uos_threshold: get_opt_decimal(&row, 1)?,
                is_holder_role: get_i64(&row, 2) != 0,
            };
            rules.insert(role_id, rule);
        }

        let mut rows = match role_filter {
            Some(role_id) => {
                conn.query(
                    "SELECT factory_id, role_id FROM role_factories WHERE role_id = ?1",
                    libsql::params![role_id],
                )
                .await?
            }
            None => {
                conn.query("SELECT factory_id, role_id FROM role_factories", ())
                    .await?
            }
        };
        while let Some(row) = rows.next().await? {
            let factory_id = get_i64(&row, 0);
            let role_id = get_text(&row, 1);
            if let Some(rule) = rules.get_mut(&role_id) {
                rule.factories.insert(factory_id as u64);
            }
        }

        Ok(rules.into_values().collect())
    }
}

// ==================== Helper functions ====================

/// Format a timestamp for storage (RFC 3339, millisecond precision).
fn fmt_ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Serialization(format!("unparseable timestamp {:?}: {}", s, e)))
}

/// Extract a text column, returning empty string for NULL.
fn get_text(row: &libsql::Row, idx: i32) -> String {
    row.get::<String>(idx).unwrap_or_default()
}

fn get_i64(row: &libsql::Row, idx: i32) -> i64 {
    row.get::<i64>(idx).unwrap_or(0)
}

fn get_opt_decimal(row: &libsql::Row, idx: i32) -> Result<Option<Decimal>, DatabaseError> {
    match row.get::<String>(idx) {
        Ok(s) => s
            .parse::<Decimal>()
            .map(Some)
            .map_err(|e| DatabaseError::Serialization(format!("bad decimal {:?}: {}", s, e))),
        Err(_) => Ok(None),
    }
}

fn opt_decimal(value: Option<Decimal>) -> libsql::Value {
    match value {
        Some(d) => libsql::Value::Text(d.normalize().to_string()),
        None => libsql::Value::Null,
    }
}

fn row_to_linked_account(row: &libsql::Row) -> Result<LinkedAccount, DatabaseError> {
    Ok(LinkedAccount {
        discord_id: get_text(row, 0),
        blockchain_id: get_text(row, 1),
        signature: get_text(row, 2),
        created_at: parse_ts(&get_text(row, 3))?,
    })
}

fn is_constraint_violation(e: &libsql::Error) -> bool {
    let msg = e.to_string().to_lowercase();
    msg.contains("unique constraint") || msg.contains("constraint failed")
}

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        conn.query("PRAGMA journal_mode=WAL", ())
            .await
            .map_err(|e| DatabaseError::Migration(format!("Failed to enable WAL mode: {}", e)))?;
        conn.execute_batch(SCHEMA)
            .await
            .map_err(|e| DatabaseError::Migration(format!("libSQL migration failed: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl LinkedAccountStore for LibSqlBackend {
    async fn insert_linked_account(&self, account: &LinkedAccount) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        conn.execute(
            "INSERT INTO linked_accounts (discord_id, blockchain_id, signature, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
            libsql::params![
                account.discord_id.as_str(),
                account.blockchain_id.as_str(),
                account.signature.as_str(),
                fmt_ts(&account.created_at),
            ],
        )
        .await
        .map_err(|e| {
            if is_constraint_violation(&e) {
                DatabaseError::Constraint(format!(
                    "discord id {} or blockchain id {} is already linked",
                    account.discord_id, account.blockchain_id
                ))
            } else {
                DatabaseError::LibSql(e)
            }
        })?;
        Ok(())
    }

    async fn get_linked_account(
        &self,
        discord_id: &str,
    ) -> Result<Option<LinkedAccount>, DatabaseError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM linked_accounts WHERE discord_id = ?1");
        Ok(self
            .query_accounts(&sql, libsql::params![discord_id])
            .await?
            .into_iter()
            .next())
    }

    async fn get_linked_account_by_blockchain_id(
        &self,
        blockchain_id: &str,
    ) -> Result<Option<LinkedAccount>, DatabaseError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM linked_accounts WHERE blockchain_id = ?1");
        Ok(self
            .query_accounts(&sql, libsql::params![blockchain_id])
            .await?
            .into_iter()
            .next())
    }

    async fn delete_linked_account(&self, discord_id: &str) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let affected = conn
            .execute(
                "DELETE FROM linked_accounts WHERE discord_id = ?1",
                libsql::params![discord_id],
            )
            .await?;
        Ok(affected > 0)
    }

    async fn list_linked_accounts(&self) -> Result<Vec<LinkedAccount>, DatabaseError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM linked_accounts ORDER BY created_at");
        self.query_accounts(&sql, ()).await
    }
}

#[async_trait]
impl RoleRuleStore for LibSqlBackend {
    async fn get_role_rule(&self, role_id: &str) -> Result<Option<RoleRule>, DatabaseError> {
        let conn = self.connect().await?;
        Ok(self.load_rules(&conn, Some(role_id)).await?.into_iter().next())
    }

    async fn list_role_rules(&self) -> Result<Vec<RoleRule>, DatabaseError> {
        let conn = self.connect().await?;
        self.load_rules(&conn, None).await
    }

    async fn find_role_by_factory(&self, factory_id: u64) -> Result<Option<String>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                "SELECT role_id FROM role_factories WHERE factory_id = ?1",
                libsql::params![factory_id as i64],
            )
            .await?;
        Ok(rows.next().await?.map(|row| get_text(&row, 0)))
    }

    async fn find_role_by_threshold(
        &self,
        threshold: Decimal,
    ) -> Result<Option<String>, DatabaseError> {
        // Decimal text forms vary ("100" vs "100.0"), so compare parsed values.
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                "SELECT role_id, uos_threshold FROM role_rules \
                 WHERE uos_threshold IS NOT NULL AND is_holder_role = 0",
                (),
            )
            .await?;
        while let Some(row) = rows.next().await? {
            if get_opt_decimal(&row, 1)? == Some(threshold) {
                return Ok(Some(get_text(&row, 0)));
            }
        }
        Ok(None)
    }

    async fn get_holder_role(&self) -> Result<Option<RoleRule>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                "SELECT role_id FROM role_rules WHERE is_holder_role = 1 LIMIT 1",
                (),
            )
            .await?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        let role_id = get_text(&row, 0);
        Ok(self.load_rules(&conn, Some(&role_id)).await?.into_iter().next())
    }

    async fn add_factory(&self, role_id: &str, factory_id: u64) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        let tx = conn.transaction().await?;
        tx.execute(
            "INSERT OR IGNORE INTO role_rules (role_id) VALUES (?1)",
            libsql::params![role_id],
        )
        .await?;
        tx.execute(
            "INSERT INTO role_factories (factory_id, role_id) VALUES (?1, ?2)",
            libsql::params![factory_id as i64, role_id],
        )
        .await
        .map_err(|e| {
            if is_constraint_violation(&e) {
                DatabaseError::Constraint(format!("factory {} is already bound", factory_id))
            } else {
                DatabaseError::LibSql(e)
            }
        })?;
        tx.commit().await?;
        Ok(())
    }

    async fn remove_factory(&self, factory_id: u64) -> Result<Option<String>, DatabaseError> {
        let role = self.find_role_by_factory(factory_id).await?;
        if role.is_some() {
            let conn = self.connect().await?;
            conn.execute(
                "DELETE FROM role_factories WHERE factory_id = ?1",
                libsql::params![factory_id as i64],
            )
            .await?;
        }
        Ok(role)
    }

    async fn set_threshold(
        &self,
        role_id: &str,
        threshold: Option<Decimal>,
    ) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        conn.execute(
            "INSERT INTO role_rules (role_id, uos_threshold) VALUES (?1, ?2) \
             ON CONFLICT(role_id) DO UPDATE SET uos_threshold = excluded.uos_threshold",
            libsql::params![role_id, opt_decimal(threshold)],
        )
        .await?;
        Ok(())
    }

    async fn set_holder_role(&self, role_id: &str, threshold: Decimal) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        let tx = conn.transaction().await?;
        tx.execute(
            "UPDATE role_rules SET is_holder_role = 0, uos_threshold = NULL \
             WHERE is_holder_role = 1 AND role_id != ?1",
            libsql::params![role_id],
        )
        .await?;
        tx.execute(
            "INSERT INTO role_rules (role_id, uos_threshold, is_holder_role) VALUES (?1, ?2, 1) \
             ON CONFLICT(role_id) DO UPDATE SET \
                uos_threshold = excluded.uos_threshold, is_holder_role = 1",
            libsql::params![role_id, opt_decimal(Some(threshold))],
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn delete_role_rule(&self, role_id: &str) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let tx = conn.transaction().await?;
        tx.execute(
            "DELETE FROM role_factories WHERE role_id = ?1",
            libsql::params![role_id],
        )
        .await?;
        let affected = tx
            .execute(
                "DELETE FROM role_rules WHERE role_id = ?1",
                libsql::params![role_id],
            )
            .await?;
        tx.commit().await?;
        Ok(affected > 0)
    }

    async fn delete_empty_role_rules(
        &self,
        role_ids: &[String],
    ) -> Result<Vec<String>, DatabaseError> {
        let conn = self.connect().await?;
        let tx = conn.transaction().await?;
        let mut removed = Vec::new();
        for role_id in role_ids {
            let affected = tx
                .execute(
                    "DELETE FROM role_rules \
                     WHERE role_id = ?1 \
                       AND uos_threshold IS NULL \
                       AND is_holder_role = 0 \
                       AND role_id NOT IN (SELECT role_id FROM role_factories)",
                    libsql::params![role_id.as_str()],
                )
                .await?;
            if affected > 0 {
                removed.push(role_id.clone());
            }
        }
        tx.commit().await?;
        Ok(removed)
    }
}
