//! Pure computation of role grants and revocations.
//!
//! Given what a user owns on chain, the stored rules, and the roles they
//! currently hold, [`plan_role_changes`] returns an ordered list of
//! mutations. The function does no I/O and is deterministic.

use std::collections::{BTreeMap, BTreeSet};

use rust_decimal::Decimal;

use crate::roles::{RoleKind, RoleRule};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationAction {
    Grant,
    Revoke,
}

/// Why a mutation was planned. Revocation reasons are written to the
/// platform audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationReason {
    RoleNoLongerManaged,
    NoLongerOwnsToken,
    OwnsToken,
    WithinUosThreshold,
    NoLongerWithinUosThreshold,
    MeetsUosHolderThreshold,
    NoLongerMeetsUosHolderThreshold,
}

impl MutationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RoleNoLongerManaged => "Role No Longer Managed",
            Self::NoLongerOwnsToken => "No Longer Owns Token",
            Self::OwnsToken => "Owns Token",
            Self::WithinUosThreshold => "Within the UOS Threshold",
            Self::NoLongerWithinUosThreshold => "No Longer Within the UOS Threshold",
            Self::MeetsUosHolderThreshold => "Meets UOS Holder Threshold",
            Self::NoLongerMeetsUosHolderThreshold => "No Longer Meets UOS Holder Threshold",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleMutation {
    pub role_id: String,
    pub action: MutationAction,
    pub reason: MutationReason,
}

#[derive(Debug, Clone, Copy)]
pub struct EligibilityInput<'a> {
    pub owned_factory_ids: &'a BTreeSet<u64>,
    /// `None` when the balance could not be determined.
    pub uos_balance: Option<Decimal>,
    pub rules: &'a [RoleRule],
    pub held_roles: &'a BTreeSet<String>,
}

/// Ordered, conflict-free set of role changes for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RolePlan {
    pub mutations: Vec<RoleMutation>,
}

impl RolePlan {
    pub fn grants(&self) -> BTreeSet<&str> {
        self.ids(MutationAction::Grant)
    }

    pub fn revokes(&self) -> BTreeSet<&str> {
        self.ids(MutationAction::Revoke)
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    fn ids(&self, action: MutationAction) -> BTreeSet<&str> {
        self.mutations
            .iter()
            .filter(|m| m.action == action)
            .map(|m| m.role_id.as_str())
            .collect()
    }

    // First decision for a role wins; later ones are dropped.
    fn push(&mut self, role_id: &str, action: MutationAction, reason: MutationReason) {
        if self.mutations.iter().any(|m| m.role_id == role_id) {
            return;
        }
        self.mutations.push(RoleMutation {
            role_id: role_id.to_string(),
            action,
            reason,
        });
    }
}

pub fn plan_role_changes(input: EligibilityInput<'_>) -> RolePlan {
    let rules_by_role: BTreeMap<&str, &RoleRule> = input
        .rules
        .iter()
        .map(|rule| (rule.role_id.as_str(), rule))
        .collect();
    let mut unmatched: BTreeSet<u64> = input.owned_factory_ids.clone();
    let mut plan = RolePlan::default();

    // 1. Currently held managed roles: stale cleanup and factory ownership.
    for role_id in input.held_roles {
        let Some(rule) = rules_by_role.get(role_id.as_str()) else {
            continue;
        };
        match rule.kind() {
            RoleKind::Empty => {
                plan.push(role_id, MutationAction::Revoke, MutationReason::RoleNoLongerManaged);
            }
            RoleKind::Factory => {
                // Each owned factory satisfies at most one role.
                let matched = rule.factories.iter().find(|id| unmatched.contains(id)).copied();
                match matched {
                    Some(id) => {
                        unmatched.remove(&id);
                    }
                    None => {
                        plan.push(role_id, MutationAction::Revoke, MutationReason::NoLongerOwnsToken)
                    }
                }
            }
            RoleKind::Threshold | RoleKind::Holder => {}
        }
    }

    // 2. Remaining owned factories grant their role if not already held.
    for factory_id in &unmatched {
        let Some(rule) = input
            .rules
            .iter()
            .find(|rule| rule.kind() == RoleKind::Factory && rule.factories.contains(factory_id))
        else {
            continue;
        };
        if !input.held_roles.contains(&rule.role_id) {
            plan.push(&rule.role_id, MutationAction::Grant, MutationReason::OwnsToken);
        }
    }

    let Some(balance) = input.uos_balance else {
        return plan;
    };

    // 3. Highest tier the balance reaches; every other held tier is revoked.
    let mut tiers: Vec<(&RoleRule, Decimal)> = input
        .rules
        .iter()
        .filter(|rule| rule.kind() == RoleKind::Threshold)
        .filter_map(|rule| rule.uos_threshold.map(|t| (rule, t)))
        .collect();
    tiers.sort_by(|a, b| b.1.cmp(&a.1));
    let selected = tiers
        .iter()
        .find(|(_, threshold)| balance >= *threshold)
        .map(|(rule, _)| rule.role_id.as_str());

    for (rule, _) in &tiers {
        let held = input.held_roles.contains(&rule.role_id);
        if Some(rule.role_id.as_str()) == selected {
            if !held {
                plan.push(&rule.role_id, MutationAction::Grant, MutationReason::WithinUosThreshold);
            }
        } else if held {
            plan.push(
                &rule.role_id,
                MutationAction::Revoke,
                MutationReason::NoLongerWithinUosThreshold,
            );
        }
    }

    // 4. Holder override, independent of the tier selection.
    if let Some(holder) = input.rules.iter().find(|rule| rule.kind() == RoleKind::Holder)
        && let Some(threshold) = holder.uos_threshold
    {
        let held = input.held_roles.contains(&holder.role_id);
        if balance >= threshold && !held {
            plan.push(
                &holder.role_id,
                MutationAction::Grant,
                MutationReason::MeetsUosHolderThreshold,
            );
        } else if balance < threshold && held {
            plan.push(
                &holder.role_id,
                MutationAction::Revoke,
                MutationReason::NoLongerMeetsUosHolderThreshold,
            );
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    use super::*;

    fn factory_rule(role: &str, factories: &[u64]) -> RoleRule {
        let mut rule = RoleRule::new(role);
        rule.factories = factories.iter().copied().collect();
        rule
    }

    fn tier_rule(role: &str, threshold: Decimal) -> RoleRule {
        let mut rule = RoleRule::new(role);
        rule.uos_threshold = Some(threshold);
        rule
    }

    fn holder_rule(role: &str, threshold: Decimal) -> RoleRule {
        let mut rule = tier_rule(role, threshold);
        rule.is_holder_role = true;
        rule
    }

    fn held(roles: &[&str]) -> BTreeSet<String> {
        roles.iter().map(|r| r.to_string()).collect()
    }

    fn plan(
        owned: &[u64],
        balance: Option<Decimal>,
        rules: &[RoleRule],
        held_roles: &[&str],
    ) -> RolePlan {
        let owned: BTreeSet<u64> = owned.iter().copied().collect();
        let held_roles = held(held_roles);
        plan_role_changes(EligibilityInput {
            owned_factory_ids: &owned,
            uos_balance: balance,
            rules,
            held_roles: &held_roles,
        })
    }

    fn ids<'a>(set: BTreeSet<&'a str>) -> Vec<&'a str> {
        set.into_iter().collect()
    }

    #[test]
    fn owned_factory_keeps_role() {
        let rules = [factory_rule("R", &[7])];
        assert!(plan(&[7], None, &rules, &["R"]).is_empty());
    }

    #[test]
    fn losing_all_factories_revokes_once() {
        let rules = [factory_rule("R", &[7, 8])];
        let result = plan(&[], None, &rules, &["R"]);
        assert_eq!(
            result.mutations,
            vec![RoleMutation {
                role_id: "R".into(),
                action: MutationAction::Revoke,
                reason: MutationReason::NoLongerOwnsToken,
            }]
        );
    }

    #[test]
    fn unmatched_factory_grants_missing_role() {
        let rules = [factory_rule("A", &[1]), factory_rule("B", &[2])];
        let result = plan(&[1, 2], None, &rules, &["A"]);
        assert_eq!(ids(result.grants()), vec!["B"]);
        assert!(result.revokes().is_empty());
    }

    #[test]
    fn each_asset_satisfies_at_most_one_held_role() {
        // Two held roles both listing factory 5; the single token keeps only one.
        let rules = [factory_rule("A", &[5]), factory_rule("B", &[5, 6])];
        let result = plan(&[5], None, &rules, &["A", "B"]);
        assert_eq!(ids(result.revokes()), vec!["B"]);
    }

    #[test]
    fn empty_rule_role_is_revoked() {
        let rules = [RoleRule::new("stale")];
        let result = plan(&[], Some(dec!(10)), &rules, &["stale", "unmanaged"]);
        assert_eq!(result.mutations[0].reason, MutationReason::RoleNoLongerManaged);
        assert_eq!(ids(result.revokes()), vec!["stale"]);
    }

    #[test]
    fn tiers_grant_only_the_highest_reached() {
        let rules = [tier_rule("T100", dec!(100)), tier_rule("T200", dec!(200))];

        let result = plan(&[], Some(dec!(150)), &rules, &[]);
        assert_eq!(ids(result.grants()), vec!["T100"]);
        assert!(result.revokes().is_empty());

        let result = plan(&[], Some(dec!(250)), &rules, &["T100"]);
        assert_eq!(ids(result.grants()), vec!["T200"]);
        assert_eq!(ids(result.revokes()), vec!["T100"]);
    }

    #[test]
    fn dropping_below_every_tier_revokes_held_tier() {
        let rules = [tier_rule("T100", dec!(100))];
        let result = plan(&[], Some(dec!(99.99)), &rules, &["T100"]);
        assert_eq!(result.mutations[0].reason, MutationReason::NoLongerWithinUosThreshold);
    }

    #[test]
    fn unknown_balance_leaves_tiers_alone() {
        let rules = [tier_rule("T100", dec!(100)), holder_rule("H", dec!(10))];
        assert!(plan(&[], None, &rules, &["T100", "H"]).is_empty());
    }

    #[test]
    fn zero_balance_is_known() {
        let rules = [tier_rule("T100", dec!(100))];
        let result = plan(&[], Some(Decimal::ZERO), &rules, &["T100"]);
        assert_eq!(ids(result.revokes()), vec!["T100"]);
    }

    #[test]
    fn holder_is_independent_of_tiers() {
        let rules = [
            tier_rule("T100", dec!(100)),
            tier_rule("T200", dec!(200)),
            holder_rule("H", dec!(1000)),
        ];

        let below = plan(&[], Some(dec!(150)), &rules, &["T100"]);
        assert!(below.is_empty());

        let above = plan(&[], Some(dec!(1500)), &rules, &["T100"]);
        assert_eq!(ids(above.grants()), vec!["H", "T200"]);
        assert_eq!(ids(above.revokes()), vec!["T100"]);

        let dropped = plan(&[], Some(dec!(500)), &rules, &["T200", "H"]);
        assert_eq!(ids(dropped.revokes()), vec!["H"]);
        assert!(dropped.grants().is_empty());
    }

    #[test]
    fn holder_without_threshold_is_left_alone() {
        let mut holder = RoleRule::new("H");
        holder.is_holder_role = true;
        let rules = [holder];
        assert!(plan(&[], Some(dec!(5000)), &rules, &[]).is_empty());
        assert!(plan(&[], Some(Decimal::ZERO), &rules, &["H"]).is_empty());
    }

    #[test]
    fn mutations_follow_fixed_phase_order() {
        let rules = [
            factory_rule("F_OLD", &[1]),
            factory_rule("F_NEW", &[2]),
            tier_rule("T", dec!(10)),
            holder_rule("H", dec!(20)),
        ];
        let result = plan(&[2], Some(dec!(30)), &rules, &["F_OLD"]);
        let order: Vec<&str> = result.mutations.iter().map(|m| m.role_id.as_str()).collect();
        assert_eq!(order, vec!["F_OLD", "F_NEW", "T", "H"]);
    }

    #[test]
    fn grants_and_revokes_never_overlap() {
        let rules = [
            factory_rule("A", &[1, 2]),
            factory_rule("B", &[3]),
            tier_rule("T1", dec!(1)),
            tier_rule("T2", dec!(2)),
            holder_rule("H", dec!(3)),
            RoleRule::new("E"),
        ];
        for balance in [None, Some(dec!(0)), Some(dec!(1.5)), Some(dec!(2)), Some(dec!(9))] {
            for owned in [&[][..], &[1], &[2, 3], &[1, 2, 3]] {
                let result = plan(owned, balance, &rules, &["A", "T1", "H", "E"]);
                assert!(result.grants().is_disjoint(&result.revokes()));
            }
        }
    }
}
