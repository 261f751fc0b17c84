//! Resource-group sync. Resource groups nest under subscriptions.
//!
//! Grants mirror the subscription builder: role assignments at the
//! group's own ARM scope, expandable toward the assigned roles.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use crate::arm_client::ArmClient;
use crate::builders::arm_scope;
use crate::builders::{decode_list_token, encode_list_token, ResourcePage, ResourceSyncer};
use crate::error::AzureResult;
use crate::grants::GrantPolicy;
use crate::model::{Entitlement, Resource, ResourceGroup, ResourceKind};
use crate::orchestrator::GrantsPage;

pub struct ResourceGroupsBuilder {
    arm: Arc<ArmClient>,
    policy: Arc<GrantPolicy>,
    small_page_short_circuit: bool,
}

impl ResourceGroupsBuilder {
    pub fn new(arm: Arc<ArmClient>, policy: Arc<GrantPolicy>, small_page_short_circuit: bool) -> Self {
        Self {
            arm,
            policy,
            small_page_short_circuit,
        }
    }

    fn resource_group_resource(group: &ResourceGroup, subscription_id: &str) -> Resource {
        let mut resource = Resource::new(ResourceKind::ResourceGroup, &group.id, &group.name)
            .with_parent(ResourceKind::Subscription, subscription_id);
        if let Some(location) = &group.location {
            resource = resource.with_profile_field("location", location.clone());
        }
        resource
    }
}

#[async_trait]
impl ResourceSyncer for ResourceGroupsBuilder {
    fn resource_kind(&self) -> ResourceKind {
        ResourceKind::ResourceGroup
    }

    #[instrument(skip(self, parent))]
    async fn list(&self, parent: Option<&Resource>, cursor: &str) -> AzureResult<ResourcePage> {
        let Some(subscription) = parent.filter(|p| p.kind == ResourceKind::Subscription) else {
            return Ok(ResourcePage::default());
        };

        let next_link = decode_list_token(cursor)?;
        let page = self
            .arm
            .list_resource_groups_page(&subscription.id, next_link.as_deref())
            .await?;

        Ok(ResourcePage {
            resources: page
                .value
                .iter()
                .map(|group| Self::resource_group_resource(group, &subscription.id))
                .collect(),
            next_cursor: encode_list_token(page.next_link)?,
        })
    }

    async fn entitlements(&self, resource: &Resource) -> AzureResult<Vec<Entitlement>> {
        Ok(vec![arm_scope::assignment_entitlement(resource)])
    }

    #[instrument(skip(self, resource), fields(resource_group = %resource.id))]
    async fn grants(&self, resource: &Resource, cursor: &str) -> AzureResult<GrantsPage> {
        let subscription_id = arm_scope::subscription_id_from_arm_id(&resource.id)?;
        arm_scope::assignment_grants(
            &self.arm,
            &self.policy,
            &resource.id,
            subscription_id,
            cursor,
            self.small_page_short_circuit,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_group_carries_subscription_parent() {
        let group = ResourceGroup {
            id: "/subscriptions/abc/resourceGroups/rg1".into(),
            name: "rg1".into(),
            location: Some("westeurope".into()),
        };
        let resource = ResourceGroupsBuilder::resource_group_resource(&group, "abc");
        assert_eq!(resource.parent, Some((ResourceKind::Subscription, "abc".to_string())));
        assert_eq!(resource.profile["location"], "westeurope");
    }
}
