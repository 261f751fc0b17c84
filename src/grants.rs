//! Grant materialization: one upstream membership or role-assignment
//! record in, zero-or-one typed [`GrantRecord`] out.
//!
//! Classification is priority-ordered on the `@odata.type` discriminator,
//! with `servicePrincipalType` as a secondary key. Unsupported records are
//! dropped with a single warning per sync per offending value, except on
//! ownership phases where unknown top-level types abort the page: owner
//! lists are small and expected to be fully classifiable, member lists
//! degrade gracefully.

use std::collections::HashSet;
use std::sync::Mutex;

use tracing::warn;

use crate::error::{AzureError, AzureResult};
use crate::model::{
    Membership, ResourceKind, RoleAssignment, ODATA_TYPE_GROUP, ODATA_TYPE_SERVICE_PRINCIPAL,
    ODATA_TYPE_USER, SP_TYPE_APPLICATION, SP_TYPE_MANAGED_IDENTITY,
};

/// What kind of principal a grant points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrincipalKind {
    User,
    Group,
    EnterpriseApplication,
    ManagedIdentity,
    /// Azure RBAC role composite (`{roleId}:{subscriptionId}`), used by
    /// role-assignment grants whose holders are resolved via expansion.
    Role,
}

impl PrincipalKind {
    pub fn resource_kind(self) -> ResourceKind {
        match self {
            PrincipalKind::User => ResourceKind::User,
            PrincipalKind::Group => ResourceKind::Group,
            PrincipalKind::EnterpriseApplication => ResourceKind::EnterpriseApplication,
            PrincipalKind::ManagedIdentity => ResourceKind::ManagedIdentity,
            PrincipalKind::Role => ResourceKind::Role,
        }
    }
}

/// Tells the caller which entitlements to expand to flatten this grant,
/// instead of this connector walking the nesting eagerly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpansionHint {
    pub entitlement_ids: Vec<String>,
    /// Kinds of the resources the hinted entitlements belong to.
    pub resource_kinds: Vec<ResourceKind>,
    pub shallow: bool,
}

/// One materialized grant: an entitlement held by a principal.
#[derive(Debug, Clone, PartialEq)]
pub struct GrantRecord {
    pub entitlement_id: String,
    pub principal_kind: PrincipalKind,
    pub principal_id: String,
    pub expansion: Option<ExpansionHint>,
}

impl GrantRecord {
    pub fn is_expandable(&self) -> bool {
        self.expansion.is_some()
    }
}

/// Per-sync classification policy. Owns the logged-once sets, so a fresh
/// policy per sync run keeps warning dedup from leaking across runs.
#[derive(Debug, Default)]
pub struct GrantPolicy {
    seen_sp_types: Mutex<HashSet<String>>,
    seen_membership_types: Mutex<HashSet<String>>,
}

impl GrantPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifies one Graph membership/ownership record against the given
    /// entitlement. Returns `Ok(None)` for records that are dropped.
    ///
    /// `strict_unknown` selects the ownership-phase policy: an unknown
    /// top-level `@odata.type` becomes a hard error instead of a logged
    /// drop. Unsupported service-principal sub-types are dropped on both
    /// policies.
    ///
    /// # Errors
    ///
    /// [`AzureError::MalformedRecord`] for an unknown top-level type when
    /// `strict_unknown` is set.
    pub fn membership_grant(
        &self,
        entitlement_id: &str,
        owning_resource_id: &str,
        record: &Membership,
        strict_unknown: bool,
    ) -> AzureResult<Option<GrantRecord>> {
        let principal_kind = match record.odata_type.as_str() {
            ODATA_TYPE_GROUP => {
                // Nested groups are flattened lazily by the caller through
                // the member entitlement of the inner group.
                return Ok(Some(GrantRecord {
                    entitlement_id: entitlement_id.to_string(),
                    principal_kind: PrincipalKind::Group,
                    principal_id: record.id.clone(),
                    expansion: Some(ExpansionHint {
                        entitlement_ids: vec![format!("group:{}:members", record.id)],
                        resource_kinds: vec![ResourceKind::Group],
                        shallow: false,
                    }),
                }));
            }
            ODATA_TYPE_USER => PrincipalKind::User,
            ODATA_TYPE_SERVICE_PRINCIPAL => {
                let sp_type = record.service_principal_type.as_deref().unwrap_or_default();
                match sp_type {
                    SP_TYPE_APPLICATION => PrincipalKind::EnterpriseApplication,
                    SP_TYPE_MANAGED_IDENTITY => PrincipalKind::ManagedIdentity,
                    // Legacy, SocialIdp, empty and anything unrecognized
                    // carry no governable identity; drop on every phase.
                    other => {
                        self.warn_once(
                            &self.seen_sp_types,
                            other,
                            "unsupported servicePrincipalType on membership",
                            owning_resource_id,
                        );
                        return Ok(None);
                    }
                }
            }
            unknown => {
                if strict_unknown {
                    return Err(AzureError::MalformedRecord(format!(
                        "unknown membership type {unknown:?} for owner of {owning_resource_id} (id={})",
                        record.id
                    )));
                }
                self.warn_once(
                    &self.seen_membership_types,
                    unknown,
                    "unsupported resource type on membership",
                    owning_resource_id,
                );
                return Ok(None);
            }
        };

        Ok(Some(GrantRecord {
            entitlement_id: entitlement_id.to_string(),
            principal_kind,
            principal_id: record.id.clone(),
            expansion: None,
        }))
    }

    /// Builds the grant for one Azure RBAC role assignment. The entitlement
    /// id is the literal `"assignment"`; the principal is the composite
    /// role resource `{roleId}:{subscriptionId}`, expandable toward that
    /// role's `owners` and `assigned` entitlements.
    ///
    /// # Errors
    ///
    /// [`AzureError::MalformedRecord`] when the role-definition URL does
    /// not have the expected shape. A bad role id would corrupt downstream
    /// authorization decisions, so the whole page aborts.
    pub fn role_assignment_grant(
        &self,
        subscription_id: &str,
        assignment: &RoleAssignment,
    ) -> AzureResult<GrantRecord> {
        let role_id = assignment.properties.role_id().ok_or_else(|| {
            AzureError::MalformedRecord(format!(
                "role assignment {}: cannot extract role id from roleDefinitionId {:?}",
                assignment.name, assignment.properties.role_definition_id
            ))
        })?;

        let principal_id = format!("{role_id}:{subscription_id}");
        Ok(GrantRecord {
            entitlement_id: "assignment".to_string(),
            principal_kind: PrincipalKind::Role,
            expansion: Some(ExpansionHint {
                entitlement_ids: vec![
                    format!("role:{principal_id}:owners"),
                    format!("role:{principal_id}:assigned"),
                ],
                resource_kinds: vec![ResourceKind::Role],
                shallow: true,
            }),
            principal_id,
        })
    }

    fn warn_once(&self, seen: &Mutex<HashSet<String>>, value: &str, message: &str, object_id: &str) {
        let mut seen = match seen.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if seen.insert(value.to_string()) {
            warn!(r#type = %value, object_id = %object_id, "{message}");
        }
    }

    #[cfg(test)]
    fn warned_sp_types(&self) -> usize {
        self.seen_sp_types.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RoleAssignmentProperties, SP_TYPE_SOCIAL_IDP};

    fn membership(odata_type: &str, sp_type: Option<&str>) -> Membership {
        Membership {
            id: "p1".into(),
            odata_type: odata_type.into(),
            service_principal_type: sp_type.map(Into::into),
            ..Membership::default()
        }
    }

    #[test]
    fn group_member_is_expandable_toward_inner_members() {
        let policy = GrantPolicy::new();
        let mut record = membership(ODATA_TYPE_GROUP, None);
        record.id = "g1".into();

        let grant = policy
            .membership_grant("group:outer:members", "outer", &record, false)
            .unwrap()
            .unwrap();

        assert_eq!(grant.principal_kind, PrincipalKind::Group);
        assert!(grant.is_expandable());
        let hint = grant.expansion.unwrap();
        assert_eq!(hint.entitlement_ids, vec!["group:g1:members".to_string()]);
        assert_eq!(hint.resource_kinds, vec![ResourceKind::Group]);
    }

    #[test]
    fn user_member_is_plain_grant() {
        let policy = GrantPolicy::new();
        let grant = policy
            .membership_grant("group:g:members", "g", &membership(ODATA_TYPE_USER, None), false)
            .unwrap()
            .unwrap();
        assert_eq!(grant.principal_kind, PrincipalKind::User);
        assert!(!grant.is_expandable());
    }

    #[test]
    fn service_principal_subtype_disambiguation() {
        let policy = GrantPolicy::new();
        let app = policy
            .membership_grant(
                "e",
                "g",
                &membership(ODATA_TYPE_SERVICE_PRINCIPAL, Some(SP_TYPE_APPLICATION)),
                false,
            )
            .unwrap()
            .unwrap();
        assert_eq!(app.principal_kind, PrincipalKind::EnterpriseApplication);

        let mi = policy
            .membership_grant(
                "e",
                "g",
                &membership(ODATA_TYPE_SERVICE_PRINCIPAL, Some(SP_TYPE_MANAGED_IDENTITY)),
                false,
            )
            .unwrap()
            .unwrap();
        assert_eq!(mi.principal_kind, PrincipalKind::ManagedIdentity);
    }

    #[test]
    fn social_idp_drops_with_one_warning_per_subtype() {
        let policy = GrantPolicy::new();
        let record = membership(ODATA_TYPE_SERVICE_PRINCIPAL, Some(SP_TYPE_SOCIAL_IDP));

        for _ in 0..5 {
            let out = policy.membership_grant("e", "g", &record, false).unwrap();
            assert!(out.is_none());
        }
        assert_eq!(policy.warned_sp_types(), 1);

        // A different unsupported sub-type warns separately.
        let legacy = membership(ODATA_TYPE_SERVICE_PRINCIPAL, Some("Legacy"));
        assert!(policy.membership_grant("e", "g", &legacy, false).unwrap().is_none());
        assert_eq!(policy.warned_sp_types(), 2);
    }

    #[test]
    fn unknown_subtype_drops_even_on_strict_phase() {
        let policy = GrantPolicy::new();
        let record = membership(ODATA_TYPE_SERVICE_PRINCIPAL, Some("SomethingNew"));
        let out = policy.membership_grant("e", "g", &record, true).unwrap();
        assert!(out.is_none());
    }

    #[test]
    fn unknown_type_strictness_depends_on_phase() {
        let policy = GrantPolicy::new();
        let record = membership("#microsoft.graph.device", None);

        // Member phase: silent drop.
        let soft = policy.membership_grant("e", "g", &record, false).unwrap();
        assert!(soft.is_none());

        // Owner phase: identical record is a hard error.
        let hard = policy.membership_grant("e", "g", &record, true);
        assert!(matches!(hard, Err(AzureError::MalformedRecord(_))));
    }

    #[test]
    fn role_assignment_grant_composes_principal_id() {
        let policy = GrantPolicy::new();
        let assignment = RoleAssignment {
            id: "/subscriptions/abc/providers/Microsoft.Authorization/roleAssignments/ra1".into(),
            name: "ra1".into(),
            properties: RoleAssignmentProperties {
                principal_id: "user-1".into(),
                role_definition_id:
                    "/subscriptions/abc/providers/Microsoft.Authorization/roleDefinitions/xyz"
                        .into(),
                ..RoleAssignmentProperties::default()
            },
        };

        let grant = policy.role_assignment_grant("abc", &assignment).unwrap();
        assert_eq!(grant.entitlement_id, "assignment");
        assert_eq!(grant.principal_kind, PrincipalKind::Role);
        assert_eq!(grant.principal_id, "xyz:abc");
        let hint = grant.expansion.unwrap();
        assert_eq!(
            hint.entitlement_ids,
            vec!["role:xyz:abc:owners".to_string(), "role:xyz:abc:assigned".to_string()]
        );
        assert_eq!(hint.resource_kinds, vec![ResourceKind::Role]);
    }

    #[test]
    fn malformed_role_definition_url_is_hard_error() {
        let policy = GrantPolicy::new();
        let assignment = RoleAssignment {
            properties: RoleAssignmentProperties {
                role_definition_id: "roleDefinitions/xyz".into(),
                ..RoleAssignmentProperties::default()
            },
            ..RoleAssignment::default()
        };

        let err = policy.role_assignment_grant("abc", &assignment).unwrap_err();
        assert!(matches!(err, AzureError::MalformedRecord(_)));
    }
}
