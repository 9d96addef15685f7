//! Role rules and the machinery that enforces them.
//!
//! A [`RoleRule`] ties one guild role to exactly one kind of on-chain fact:
//! ownership of a token from one of its factories, a UOS balance tier, or
//! the single holder threshold. Rules with none of these are "empty" and are
//! cleaned up by the sweep.

pub mod admin;
pub mod eligibility;
pub mod reconciler;

use std::collections::BTreeSet;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use self::admin::RoleAdmin;
pub use self::eligibility::{EligibilityInput, MutationReason, RoleMutation, RolePlan, plan_role_changes};
pub use self::reconciler::{RefreshOutcome, RefreshReport, RoleReconciler, SweepSummary};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRule {
    pub role_id: String,
    #[serde(default)]
    pub factories: BTreeSet<u64>,
    #[serde(default)]
    pub uos_threshold: Option<Decimal>,
    #[serde(default)]
    pub is_holder_role: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleKind {
    Empty,
    Factory,
    Threshold,
    Holder,
}

impl RoleRule {
    pub fn new(role_id: impl Into<String>) -> Self {
        Self {
            role_id: role_id.into(),
            factories: BTreeSet::new(),
            uos_threshold: None,
            is_holder_role: false,
        }
    }

    /// The holder flag wins over every other field. A holder rule without a
    /// threshold is still a holder rule; it simply never matches a balance.
    pub fn kind(&self) -> RoleKind {
        if self.is_holder_role {
            RoleKind::Holder
        } else if !self.factories.is_empty() {
            RoleKind::Factory
        } else if self.uos_threshold.is_some() {
            RoleKind::Threshold
        } else {
            RoleKind::Empty
        }
    }

    /// No factories, no threshold, and not the holder role.
    pub fn is_empty(&self) -> bool {
        self.kind() == RoleKind::Empty
    }

    /// Human-readable summary for the `printrole` command.
    pub fn describe(&self) -> String {
        match self.kind() {
            RoleKind::Empty => format!("<@&{}> has no requirements", self.role_id),
            RoleKind::Factory => format!(
                "<@&{}> requires a token from factories: {}",
                self.role_id,
                self.factories
                    .iter()
                    .map(u64::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
            RoleKind::Threshold => format!(
                "<@&{}> requires a balance of at least {} UOS",
                self.role_id,
                self.uos_threshold.unwrap_or_default()
            ),
            RoleKind::Holder => match self.uos_threshold {
                Some(threshold) => format!(
                    "<@&{}> is the UOS holder role (at least {} UOS)",
                    self.role_id, threshold
                ),
                None => format!("<@&{}> is the UOS holder role (no threshold set)", self.role_id),
            },
        }
    }
}
