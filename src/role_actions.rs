//! Maps ARM role-definition permission strings onto coarse resource
//! actions.
//!
//! A role definition carries action patterns like
//! `Microsoft.Storage/storageAccounts/read`, `*/read` or `*`. The mapper
//! resolves those (and subtracts `notActions`) into the small fixed action
//! vocabulary a resource kind exposes as permission entitlements.

use std::collections::{BTreeSet, HashMap};

use crate::model::RolePermission;

/// Maps prefixed action patterns to a fixed action vocabulary.
#[derive(Debug, Clone)]
pub struct RoleActionMapper {
    prefix: &'static str,
    actions_by_pattern: HashMap<String, &'static str>,
    all_actions: Vec<&'static str>,
}

impl RoleActionMapper {
    pub fn new(prefix: &'static str, actions: &[&'static str]) -> Self {
        let actions_by_pattern = actions
            .iter()
            .map(|action| (format!("{prefix}{action}"), *action))
            .collect();
        Self {
            prefix,
            actions_by_pattern,
            all_actions: actions.to_vec(),
        }
    }

    /// Storage-account action mapper (`read`, `write`, `delete`).
    pub fn storage_accounts() -> Self {
        Self::new("Microsoft.Storage/storageAccounts/", &["read", "write", "delete"])
    }

    /// Blob-container action mapper (`read`, `write`, `delete`).
    pub fn containers() -> Self {
        Self::new(
            "Microsoft.Storage/storageAccounts/blobServices/containers/",
            &["read", "write", "delete"],
        )
    }

    /// Resolves one role definition's permission sets into the effective
    /// actions: everything matched by `actions`, minus everything matched
    /// by `notActions`. Output is sorted and deduplicated.
    pub fn effective_actions(&self, permissions: &[RolePermission]) -> Vec<&'static str> {
        let mut granted: BTreeSet<&'static str> = BTreeSet::new();
        let mut denied: BTreeSet<&'static str> = BTreeSet::new();

        for permission in permissions {
            for pattern in &permission.actions {
                granted.extend(self.match_pattern(pattern));
            }
            for pattern in &permission.not_actions {
                denied.extend(self.match_pattern(pattern));
            }
        }

        granted.difference(&denied).copied().collect()
    }

    /// Actions one pattern matches. `*` matches everything; `*/suffix`
    /// matches a vocabulary action by its suffix; `{prefix}*` matches
    /// everything under this mapper's prefix; an exact `{prefix}{action}`
    /// matches that action.
    fn match_pattern(&self, pattern: &str) -> Vec<&'static str> {
        if pattern == "*" {
            return self.all_actions.clone();
        }

        if let Some(suffix) = pattern.strip_prefix("*/") {
            return self
                .all_actions
                .iter()
                .copied()
                .filter(|action| *action == suffix)
                .collect();
        }

        let Some(rest) = pattern.strip_prefix(self.prefix) else {
            return Vec::new();
        };

        if rest == "*" {
            return self.all_actions.clone();
        }

        self.actions_by_pattern
            .get(pattern)
            .map(|action| vec![*action])
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn permission(actions: &[&str], not_actions: &[&str]) -> RolePermission {
        RolePermission {
            actions: actions.iter().map(ToString::to_string).collect(),
            not_actions: not_actions.iter().map(ToString::to_string).collect(),
        }
    }

    #[test]
    fn star_grants_everything() {
        let mapper = RoleActionMapper::storage_accounts();
        let actions = mapper.effective_actions(&[permission(&["*"], &[])]);
        assert_eq!(actions, vec!["delete", "read", "write"]);
    }

    #[test]
    fn prefixed_star_grants_everything_under_prefix() {
        let mapper = RoleActionMapper::storage_accounts();
        let actions =
            mapper.effective_actions(&[permission(&["Microsoft.Storage/storageAccounts/*"], &[])]);
        assert_eq!(actions, vec!["delete", "read", "write"]);
    }

    #[test]
    fn slash_suffix_wildcard_matches_by_suffix() {
        let mapper = RoleActionMapper::containers();
        let actions = mapper.effective_actions(&[permission(&["*/read", "*/unknown"], &[])]);
        assert_eq!(actions, vec!["read"]);
    }

    #[test]
    fn exact_action_and_foreign_prefix() {
        let mapper = RoleActionMapper::storage_accounts();
        let actions = mapper.effective_actions(&[permission(
            &[
                "Microsoft.Storage/storageAccounts/write",
                "Microsoft.Compute/virtualMachines/read",
            ],
            &[],
        )]);
        assert_eq!(actions, vec!["write"]);
    }

    #[test]
    fn not_actions_subtract_from_actions() {
        let mapper = RoleActionMapper::storage_accounts();
        let actions = mapper.effective_actions(&[permission(
            &["*"],
            &["Microsoft.Storage/storageAccounts/delete"],
        )]);
        assert_eq!(actions, vec!["read", "write"]);
    }

    #[test]
    fn multiple_permission_blocks_accumulate() {
        let mapper = RoleActionMapper::containers();
        let actions = mapper.effective_actions(&[
            permission(&["*/read"], &[]),
            permission(
                &["Microsoft.Storage/storageAccounts/blobServices/containers/write"],
                &["*/read"],
            ),
        ]);
        assert_eq!(actions, vec!["write"]);
    }
}
