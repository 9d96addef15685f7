//! Administrative edits to role rules.
//!
//! Every rule is exactly one kind (factory, tier threshold, or holder); the
//! checks here keep the store in that shape.

use std::sync::Arc;

use rust_decimal::Decimal;

use crate::chain::ChainGateway;
use crate::db::Database;
use crate::error::{DatabaseError, RoleAdminError};
use crate::roles::RoleRule;

pub struct RoleAdmin {
    db: Arc<dyn Database>,
    chain: Arc<ChainGateway>,
}

fn conflict_on_constraint(e: DatabaseError) -> RoleAdminError {
    match e {
        DatabaseError::Constraint(msg) => RoleAdminError::Conflict(msg),
        other => RoleAdminError::Database(other),
    }
}

fn require_positive(threshold: Decimal) -> Result<(), RoleAdminError> {
    if threshold <= Decimal::ZERO {
        return Err(RoleAdminError::InvalidInput(
            "UOS threshold must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

impl RoleAdmin {
    pub fn new(db: Arc<dyn Database>, chain: Arc<ChainGateway>) -> Self {
        Self { db, chain }
    }

    /// Bind an on-chain factory to `role_id`.
    pub async fn add_factory(&self, factory_id: u64, role_id: &str) -> Result<(), RoleAdminError> {
        let factory = self
            .chain
            .find_factory(factory_id)
            .await
            .map_err(RoleAdminError::Upstream)?;
        if factory.is_none() {
            return Err(RoleAdminError::NotFound(format!(
                "factory {factory_id} does not exist on chain"
            )));
        }

        if let Some(bound) = self.db.find_role_by_factory(factory_id).await? {
            return Err(RoleAdminError::Conflict(format!(
                "factory {factory_id} already has an entry for role {bound}"
            )));
        }

        if let Some(rule) = self.db.get_role_rule(role_id).await? {
            if rule.is_holder_role {
                return Err(RoleAdminError::Conflict(
                    "cannot use factory and UOS holder role requirement in the same role"
                        .to_string(),
                ));
            }
            if rule.uos_threshold.is_some() {
                return Err(RoleAdminError::Conflict(
                    "cannot use factory and UOS threshold requirement in the same role"
                        .to_string(),
                ));
            }
        }

        self.db
            .add_factory(role_id, factory_id)
            .await
            .map_err(conflict_on_constraint)?;
        tracing::info!(factory_id, role_id, "Added factory to role");
        Ok(())
    }

    /// Unbind a factory. Returns the role it belonged to.
    ///
    /// A rule left without factories stays until the next sweep revokes and
    /// deletes it.
    pub async fn remove_factory(&self, factory_id: u64) -> Result<String, RoleAdminError> {
        let role_id = self.db.remove_factory(factory_id).await?.ok_or_else(|| {
            RoleAdminError::NotFound("factory does not exist in the database".to_string())
        })?;
        tracing::info!(factory_id, role_id = %role_id, "Removed factory from role");
        Ok(role_id)
    }

    pub async fn add_uos_threshold(
        &self,
        threshold: Decimal,
        role_id: &str,
    ) -> Result<(), RoleAdminError> {
        require_positive(threshold)?;

        if let Some(existing) = self.db.find_role_by_threshold(threshold).await? {
            return Err(RoleAdminError::Conflict(format!(
                "UOS threshold {threshold} already has an entry for role {existing}"
            )));
        }

        if let Some(rule) = self.db.get_role_rule(role_id).await? {
            if !rule.factories.is_empty() {
                return Err(RoleAdminError::Conflict(
                    "cannot use factory and UOS threshold requirement in the same role"
                        .to_string(),
                ));
            }
            if rule.is_holder_role {
                return Err(RoleAdminError::Conflict(
                    "cannot add a UOS threshold to the UOS holder role".to_string(),
                ));
            }
            if let Some(current) = rule.uos_threshold {
                return Err(RoleAdminError::Conflict(format!(
                    "role already requires a UOS threshold of {current}"
                )));
            }
        }

        self.db.set_threshold(role_id, Some(threshold)).await?;
        tracing::info!(%threshold, role_id, "Added UOS threshold role");
        Ok(())
    }

    /// Remove a tier threshold. Returns the role that carried it.
    pub async fn remove_uos_threshold(&self, threshold: Decimal) -> Result<String, RoleAdminError> {
        let role_id = self
            .db
            .find_role_by_threshold(threshold)
            .await?
            .ok_or_else(|| {
                RoleAdminError::NotFound("UOS threshold does not exist in the database".to_string())
            })?;
        self.db.set_threshold(&role_id, None).await?;
        tracing::info!(%threshold, role_id = %role_id, "Removed UOS threshold role");
        Ok(role_id)
    }

    /// Make `role_id` the single holder role. Returns the previous holder
    /// role when a different one was replaced.
    pub async fn set_uos_holder_role(
        &self,
        threshold: Decimal,
        role_id: &str,
    ) -> Result<Option<String>, RoleAdminError> {
        require_positive(threshold)?;

        if let Some(rule) = self.db.get_role_rule(role_id).await?
            && !rule.factories.is_empty()
        {
            return Err(RoleAdminError::Conflict(
                "cannot use factory and UOS holder role requirement in the same role".to_string(),
            ));
        }

        let previous = self
            .db
            .get_holder_role()
            .await?
            .map(|rule| rule.role_id)
            .filter(|previous| previous != role_id);
        self.db.set_holder_role(role_id, threshold).await?;
        tracing::info!(%threshold, role_id, replaced = ?previous, "Set UOS holder role");
        Ok(previous)
    }

    /// Delete a rule immediately.
    pub async fn delete_role(&self, role_id: &str) -> Result<(), RoleAdminError> {
        if !self.db.delete_role_rule(role_id).await? {
            return Err(RoleAdminError::NotFound(
                "role does not exist in the database".to_string(),
            ));
        }
        tracing::info!(role_id, "Deleted role rule");
        Ok(())
    }

    pub async fn describe_role(&self, role_id: &str) -> Result<RoleRule, RoleAdminError> {
        self.db
            .get_role_rule(role_id)
            .await?
            .ok_or_else(|| RoleAdminError::NotFound("role document was not found".to_string()))
    }

    /// The platform deleted a role; drop its rule if one exists.
    pub async fn on_platform_role_deleted(&self, role_id: &str) -> Result<bool, RoleAdminError> {
        let removed = self.db.delete_role_rule(role_id).await?;
        if removed {
            tracing::info!(role_id, "Role deleted on platform, rule removed");
        }
        Ok(removed)
    }
}
