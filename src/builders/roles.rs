//! Azure RBAC role sync.
//!
//! A role resource is scoped to one subscription: its id is the composite
//! `{roleId}:{subscriptionId}`, because the same built-in role definition
//! carries different holders per subscription. Holder enumeration runs
//! off the per-subscription role-assignment index so one ARM drain serves
//! every role of that subscription within a sync.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::arm_client::ArmClient;
use crate::builders::{decode_list_token, encode_list_token, ResourcePage, ResourceSyncer};
use crate::cache::RoleAssignmentIndex;
use crate::error::{AzureError, AzureResult};
use crate::grants::GrantRecord;
use crate::graph_client::GraphClient;
use crate::model::{Entitlement, EntitlementPurpose, Resource, ResourceKind, RoleDefinition};
use crate::orchestrator::GrantsPage;
use crate::resolver::PrincipalTypeResolver;

const SLUG_OWNERS: &str = "owners";
const SLUG_ASSIGNED: &str = "assigned";

pub struct RolesBuilder {
    arm: Arc<ArmClient>,
    resolver: PrincipalTypeResolver<Arc<GraphClient>>,
    index: Arc<RoleAssignmentIndex>,
}

/// `{roleId}:{subscriptionId}` composite parts.
struct RoleResourceId<'a> {
    role_id: &'a str,
    subscription_id: &'a str,
}

impl<'a> RoleResourceId<'a> {
    fn parse(resource_id: &'a str) -> AzureResult<Self> {
        match resource_id.split_once(':') {
            Some((role_id, subscription_id))
                if !role_id.is_empty()
                    && !subscription_id.is_empty()
                    && !subscription_id.contains(':') =>
            {
                Ok(Self {
                    role_id,
                    subscription_id,
                })
            }
            _ => Err(AzureError::MalformedRecord(format!(
                "invalid role resource id {resource_id:?}, expected roleId:subscriptionId"
            ))),
        }
    }

    fn scope(&self) -> String {
        format!("/subscriptions/{}", self.subscription_id)
    }
}

impl RolesBuilder {
    pub fn new(
        arm: Arc<ArmClient>,
        graph: Arc<GraphClient>,
        index: Arc<RoleAssignmentIndex>,
    ) -> Self {
        Self {
            arm,
            resolver: PrincipalTypeResolver::new(graph),
            index,
        }
    }

    fn role_resource(definition: &RoleDefinition, subscription_id: &str) -> Resource {
        let display_name = definition
            .properties
            .role_name
            .clone()
            .unwrap_or_else(|| definition.name.clone());
        let mut resource = Resource::new(
            ResourceKind::Role,
            format!("{}:{}", definition.name, subscription_id),
            display_name,
        )
        .with_parent(ResourceKind::Subscription, subscription_id)
        .with_profile_field("role_definition_id", definition.id.clone());

        if let Some(role_type) = &definition.properties.role_type {
            resource = resource.with_profile_field("role_type", role_type.clone());
        }
        if let Some(description) = &definition.properties.description {
            resource = resource.with_profile_field("description", description.clone());
        }
        resource
    }

    async fn build_index(&self, id: &RoleResourceId<'_>) -> AzureResult<()> {
        let scope = id.scope();
        self.index
            .for_subscription(id.subscription_id, || async {
                self.arm.list_role_assignments(&scope).await
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ResourceSyncer for RolesBuilder {
    fn resource_kind(&self) -> ResourceKind {
        ResourceKind::Role
    }

    #[instrument(skip(self, parent))]
    async fn list(&self, parent: Option<&Resource>, cursor: &str) -> AzureResult<ResourcePage> {
        let Some(subscription) = parent.filter(|p| p.kind == ResourceKind::Subscription) else {
            return Ok(ResourcePage::default());
        };

        let next_link = decode_list_token(cursor)?;
        let page = self
            .arm
            .list_role_definitions_page(&subscription.id, next_link.as_deref())
            .await?;

        Ok(ResourcePage {
            resources: page
                .value
                .iter()
                .map(|definition| Self::role_resource(definition, &subscription.id))
                .collect(),
            next_cursor: encode_list_token(page.next_link)?,
        })
    }

    async fn entitlements(&self, resource: &Resource) -> AzureResult<Vec<Entitlement>> {
        Ok(vec![
            Entitlement::new(
                resource,
                SLUG_OWNERS,
                EntitlementPurpose::Permission,
                format!("{} Role Owner", resource.display_name),
            )
            .with_description(format!("Owner of the {} role", resource.display_name))
            .grantable_to(&[ResourceKind::User]),
            Entitlement::new(
                resource,
                SLUG_ASSIGNED,
                EntitlementPurpose::Assignment,
                format!("{} Role Member", resource.display_name),
            )
            .with_description(format!("Member of the {} role", resource.display_name))
            .grantable_to(&[ResourceKind::User, ResourceKind::Group]),
        ])
    }

    /// Holders of this role in its subscription. Single page: the index
    /// is already in memory once built.
    #[instrument(skip(self, resource), fields(role = %resource.id))]
    async fn grants(&self, resource: &Resource, cursor: &str) -> AzureResult<GrantsPage> {
        if !cursor.is_empty() {
            return Ok(GrantsPage {
                grants: Vec::new(),
                next_cursor: String::new(),
            });
        }

        let id = RoleResourceId::parse(&resource.id)?;
        self.build_index(&id).await?;

        let assignments = self
            .index
            .assignments_for_role(id.subscription_id, id.role_id)
            .await
            .unwrap_or_default();

        let entitlement_id = format!("role:{}:{}", resource.id, SLUG_ASSIGNED);
        let mut grants = Vec::new();
        for assignment in &assignments {
            let principal_id = &assignment.properties.principal_id;
            let resolved = match self.resolver.resolve(principal_id).await {
                Ok(resolved) => resolved,
                Err(err) => {
                    warn!(principal_id, %err, "could not resolve assignment principal, skipping");
                    continue;
                }
            };
            let Some(principal_kind) = resolved.principal_kind() else {
                debug!(principal_id, "assignment principal type is unknown, skipping");
                continue;
            };

            grants.push(GrantRecord {
                entitlement_id: entitlement_id.clone(),
                principal_kind,
                principal_id: principal_id.clone(),
                expansion: None,
            });
        }

        Ok(GrantsPage {
            grants,
            next_cursor: String::new(),
        })
    }

    async fn grant(
        &self,
        entitlement: &Entitlement,
        principal_kind: ResourceKind,
        principal_id: &str,
    ) -> AzureResult<()> {
        if principal_kind != ResourceKind::User {
            return Err(AzureError::Provisioning(
                "only users can be granted role membership".into(),
            ));
        }

        let id = RoleResourceId::parse(&entitlement.resource_id)?;
        self.arm
            .create_role_assignment(&id.scope(), id.subscription_id, id.role_id, principal_id)
            .await?;
        Ok(())
    }

    async fn revoke(
        &self,
        entitlement: &Entitlement,
        principal_kind: ResourceKind,
        principal_id: &str,
    ) -> AzureResult<()> {
        if principal_kind != ResourceKind::User {
            return Err(AzureError::Provisioning(
                "only users can be granted role membership".into(),
            ));
        }

        let id = RoleResourceId::parse(&entitlement.resource_id)?;
        self.build_index(&id).await?;

        let assignments = self
            .index
            .assignments_for_role(id.subscription_id, id.role_id)
            .await
            .unwrap_or_default();
        let Some(assignment) = assignments
            .iter()
            .find(|a| a.properties.principal_id == principal_id)
        else {
            return Err(AzureError::NotFound(format!(
                "no assignment of role {} to principal {principal_id}",
                id.role_id
            )));
        };

        self.arm
            .delete_role_assignment(&id.scope(), &assignment.name)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RoleDefinitionProperties;

    #[test]
    fn composite_role_id_round_trips() {
        let id = RoleResourceId::parse("xyz:abc").unwrap();
        assert_eq!(id.role_id, "xyz");
        assert_eq!(id.subscription_id, "abc");
        assert_eq!(id.scope(), "/subscriptions/abc");
    }

    #[test]
    fn malformed_role_id_is_rejected() {
        assert!(RoleResourceId::parse("xyz").is_err());
        assert!(RoleResourceId::parse(":abc").is_err());
        assert!(RoleResourceId::parse("a:b:c").is_err());
    }

    #[test]
    fn role_resource_is_subscription_scoped() {
        let definition = RoleDefinition {
            id: "/subscriptions/abc/providers/Microsoft.Authorization/roleDefinitions/xyz".into(),
            name: "xyz".into(),
            properties: RoleDefinitionProperties {
                role_name: Some("Reader".into()),
                ..RoleDefinitionProperties::default()
            },
        };
        let resource = RolesBuilder::role_resource(&definition, "abc");
        assert_eq!(resource.id, "xyz:abc");
        assert_eq!(resource.display_name, "Reader");
        assert_eq!(resource.parent, Some((ResourceKind::Subscription, "abc".to_string())));
    }
}
