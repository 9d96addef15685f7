//! Per-user role refresh and the periodic all-users sweep.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, MissedTickBehavior};

use crate::chain::{Asset, BalanceRow, ChainGateway, TokenRow, decode_rows};
use crate::config::RefreshConfig;
use crate::db::Database;
use crate::error::{ChainError, ReconcileError};
use crate::platform::ChatPlatform;
use crate::roles::eligibility::{EligibilityInput, MutationAction, plan_role_changes};

const PERMISSION_HINT: &str =
    "Does the bot role have Manage Roles? Is the bot role above all roles that it manages?";

/// On-chain facts for one account, read in full or not at all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainSnapshot {
    pub owned_factory_ids: BTreeSet<u64>,
    pub uos_balance: Option<Decimal>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub granted: usize,
    pub revoked: usize,
    pub failed: usize,
    pub token_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Applied(RefreshReport),
    /// The user is no longer a guild member; nothing to do.
    MemberNotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepSummary {
    pub users: usize,
    /// Users whose refresh aborted before applying changes.
    pub failed: usize,
    pub purged_rules: usize,
    pub elapsed: Duration,
}

pub struct RoleReconciler {
    chain: Arc<ChainGateway>,
    platform: Arc<dyn ChatPlatform>,
    db: Arc<dyn Database>,
    config: RefreshConfig,
    sweeping: AtomicBool,
}

// Clears the in-flight flag however the sweep ends.
struct SweepGuard<'a>(&'a AtomicBool);

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl RoleReconciler {
    pub fn new(
        chain: Arc<ChainGateway>,
        platform: Arc<dyn ChatPlatform>,
        db: Arc<dyn Database>,
        config: RefreshConfig,
    ) -> Self {
        Self {
            chain,
            platform,
            db,
            config,
            sweeping: AtomicBool::new(false),
        }
    }

    /// Read every token table and the balance table for `blockchain_id`.
    pub async fn fetch_snapshot(&self, blockchain_id: &str) -> Result<ChainSnapshot, ReconcileError> {
        let layout = self.chain.config();
        let snapshot_err = |what: &'static str| {
            move |source: ChainError| ReconcileError::Snapshot {
                what,
                blockchain_id: blockchain_id.to_string(),
                source,
            }
        };

        let mut owned_factory_ids = BTreeSet::new();
        for table in &layout.token_tables {
            let rows = self
                .chain
                .get_all_table_rows(&layout.token_contract, blockchain_id, table)
                .await
                .map_err(snapshot_err("tokens"))?;
            let tokens: Vec<TokenRow> = decode_rows(&rows).map_err(snapshot_err("tokens"))?;
            owned_factory_ids.extend(tokens.into_iter().map(|t| t.token_factory_id));
        }

        let rows = self
            .chain
            .get_all_table_rows(&layout.balance_contract, blockchain_id, &layout.balance_table)
            .await
            .map_err(snapshot_err("balance"))?;
        let balances: Vec<BalanceRow> = decode_rows(&rows).map_err(snapshot_err("balance"))?;
        let mut uos_balance = None;
        for row in balances {
            let asset: Asset = row.balance.parse().map_err(snapshot_err("balance"))?;
            if asset.symbol == layout.currency_symbol {
                uos_balance = Some(asset.amount);
                break;
            }
        }

        Ok(ChainSnapshot {
            owned_factory_ids,
            uos_balance,
        })
    }

    /// Bring one user's managed roles in line with their on-chain holdings.
    ///
    /// Any failed read aborts before a single role is touched. Individual
    /// role mutations fail independently.
    pub async fn refresh_user(
        &self,
        discord_id: &str,
        blockchain_id: &str,
    ) -> Result<RefreshOutcome, ReconcileError> {
        let snapshot = self.fetch_snapshot(blockchain_id).await.inspect_err(|e| {
            tracing::warn!(discord_id, blockchain_id, error = %e, "Skipping refresh, chain read failed");
        })?;
        let rules = self
            .db
            .list_role_rules()
            .await
            .map_err(ReconcileError::Rules)?;
        let Some(held_roles) = self
            .platform
            .list_member_roles(discord_id)
            .await
            .map_err(ReconcileError::Member)?
        else {
            tracing::debug!(discord_id, "Linked user is not a guild member");
            return Ok(RefreshOutcome::MemberNotFound);
        };

        let plan = plan_role_changes(EligibilityInput {
            owned_factory_ids: &snapshot.owned_factory_ids,
            uos_balance: snapshot.uos_balance,
            rules: &rules,
            held_roles: &held_roles,
        });

        let mut report = RefreshReport {
            token_count: snapshot.owned_factory_ids.len(),
            ..RefreshReport::default()
        };
        for mutation in &plan.mutations {
            let reason = mutation.reason.as_str();
            let result = match mutation.action {
                MutationAction::Grant => {
                    self.platform
                        .add_role(discord_id, &mutation.role_id, reason)
                        .await
                }
                MutationAction::Revoke => {
                    self.platform
                        .remove_role(discord_id, &mutation.role_id, reason)
                        .await
                }
            };
            match (result, mutation.action) {
                (Ok(()), MutationAction::Grant) => report.granted += 1,
                (Ok(()), MutationAction::Revoke) => report.revoked += 1,
                (Err(e), action) => {
                    report.failed += 1;
                    tracing::warn!(
                        discord_id,
                        role_id = %mutation.role_id,
                        action = ?action,
                        reason,
                        error = %e,
                        hint = PERMISSION_HINT,
                        "Cannot assign roles"
                    );
                }
            }
        }

        tracing::info!(
            discord_id,
            blockchain_id,
            granted = report.granted,
            revoked = report.revoked,
            failed = report.failed,
            token_count = report.token_count,
            "Refreshed roles"
        );
        Ok(RefreshOutcome::Applied(report))
    }

    pub fn is_sweeping(&self) -> bool {
        self.sweeping.load(Ordering::Acquire)
    }

    /// Refresh every linked account. Returns `None` if a sweep is already
    /// running.
    pub async fn run_sweep(self: &Arc<Self>) -> Option<SweepSummary> {
        if self
            .sweeping
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Previous refresh still running, skipping tick");
            return None;
        }
        let _guard = SweepGuard(&self.sweeping);
        let started = Instant::now();
        tracing::info!("Refresh started");

        let accounts = match self.db.list_linked_accounts().await {
            Ok(accounts) => accounts,
            Err(e) => {
                tracing::error!(error = %e, "Failed to load linked accounts");
                return Some(SweepSummary {
                    users: 0,
                    failed: 0,
                    purged_rules: 0,
                    elapsed: started.elapsed(),
                });
            }
        };

        // Only rules every refresh in this sweep saw as empty may be purged.
        let empty_at_start: Vec<String> = match self.db.list_role_rules().await {
            Ok(rules) => rules
                .into_iter()
                .filter(|rule| rule.is_empty())
                .map(|rule| rule.role_id)
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load role rules, skipping empty rule cleanup");
                Vec::new()
            }
        };

        let mut tasks = JoinSet::new();
        for (i, account) in accounts.iter().enumerate() {
            if i > 0 && !self.config.single_user_delay.is_zero() {
                time::sleep(self.config.single_user_delay).await;
            }
            let this = Arc::clone(self);
            let discord_id = account.discord_id.clone();
            let blockchain_id = account.blockchain_id.clone();
            tasks.spawn(async move { this.refresh_user(&discord_id, &blockchain_id).await });
        }

        let mut failed = 0;
        let mut unsettled_mutations = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(RefreshOutcome::Applied(report))) => unsettled_mutations += report.failed,
                Ok(Ok(RefreshOutcome::MemberNotFound)) => {}
                Ok(Err(_)) => failed += 1,
                Err(e) => {
                    failed += 1;
                    tracing::error!(error = %e, "Refresh task panicked");
                }
            }
        }

        let purged_rules = if empty_at_start.is_empty() {
            0
        } else if failed > 0 || unsettled_mutations > 0 {
            tracing::info!(
                failed,
                unsettled_mutations,
                pending = empty_at_start.len(),
                "Keeping empty role rules until a sweep completes cleanly"
            );
            0
        } else {
            self.purge_empty_rules(&empty_at_start).await
        };

        let summary = SweepSummary {
            users: accounts.len(),
            failed,
            purged_rules,
            elapsed: started.elapsed(),
        };
        tracing::info!(
            users = summary.users,
            failed = summary.failed,
            elapsed_secs = summary.elapsed.as_secs_f64(),
            "Refresh finished"
        );
        Some(summary)
    }

    async fn purge_empty_rules(&self, role_ids: &[String]) -> usize {
        match self.db.delete_empty_role_rules(role_ids).await {
            Ok(removed) => {
                for role_id in &removed {
                    tracing::info!(role_id = %role_id, "Deleted empty role rule");
                }
                removed.len()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to delete empty role rules");
                0
            }
        }
    }

    /// Run a sweep now and then every `interval` until `shutdown` flips.
    pub fn spawn_sweeper(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tracing::info!(interval_secs = self.config.interval.as_secs(), "User refresh scheduled");
        tokio::spawn(async move {
            let mut ticker = time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        // Sweeps run detached so a shutdown never cuts one short.
                        let this = Arc::clone(&self);
                        tokio::spawn(async move {
                            this.run_sweep().await;
                        });
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }
}
