//! Subscription sync.
//!
//! A subscription's grants are the role assignments held at its own
//! scope, each one expandable toward the assigned role resource.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use crate::arm_client::ArmClient;
use crate::builders::arm_scope;
use crate::builders::{decode_list_token, encode_list_token, ResourcePage, ResourceSyncer};
use crate::error::AzureResult;
use crate::grants::GrantPolicy;
use crate::model::{Entitlement, Resource, ResourceKind, Subscription};
use crate::orchestrator::GrantsPage;

pub struct SubscriptionsBuilder {
    arm: Arc<ArmClient>,
    policy: Arc<GrantPolicy>,
    small_page_short_circuit: bool,
}

impl SubscriptionsBuilder {
    pub fn new(arm: Arc<ArmClient>, policy: Arc<GrantPolicy>, small_page_short_circuit: bool) -> Self {
        Self {
            arm,
            policy,
            small_page_short_circuit,
        }
    }

    fn subscription_resource(subscription: &Subscription) -> Resource {
        let display_name = subscription
            .display_name
            .clone()
            .unwrap_or_else(|| subscription.subscription_id.clone());
        let mut resource = Resource::new(
            ResourceKind::Subscription,
            &subscription.subscription_id,
            display_name,
        )
        .with_profile_field("arm_id", subscription.id.clone());
        if let Some(state) = &subscription.state {
            resource = resource.with_profile_field("state", state.clone());
        }
        resource
    }
}

#[async_trait]
impl ResourceSyncer for SubscriptionsBuilder {
    fn resource_kind(&self) -> ResourceKind {
        ResourceKind::Subscription
    }

    #[instrument(skip(self, _parent))]
    async fn list(&self, _parent: Option<&Resource>, cursor: &str) -> AzureResult<ResourcePage> {
        let next_link = decode_list_token(cursor)?;
        let page = self.arm.list_subscriptions_page(next_link.as_deref()).await?;

        Ok(ResourcePage {
            resources: page.value.iter().map(Self::subscription_resource).collect(),
            next_cursor: encode_list_token(page.next_link)?,
        })
    }

    async fn entitlements(&self, resource: &Resource) -> AzureResult<Vec<Entitlement>> {
        Ok(vec![arm_scope::assignment_entitlement(resource)])
    }

    #[instrument(skip(self, resource), fields(subscription = %resource.id))]
    async fn grants(&self, resource: &Resource, cursor: &str) -> AzureResult<GrantsPage> {
        let scope = format!("/subscriptions/{}", resource.id);
        arm_scope::assignment_grants(
            &self.arm,
            &self.policy,
            &scope,
            &resource.id,
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
    fn subscription_resource_uses_bare_id() {
        let subscription = Subscription {
            id: "/subscriptions/abc".into(),
            subscription_id: "abc".into(),
            display_name: Some("Production".into()),
            state: Some("Enabled".into()),
        };
        let resource = SubscriptionsBuilder::subscription_resource(&subscription);
        assert_eq!(resource.id, "abc");
        assert_eq!(resource.display_name, "Production");
        assert_eq!(resource.profile["arm_id"], "/subscriptions/abc");
    }
}
