//! Connector assembly: shared clients, tenant validation and the set of
//! per-kind syncers.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::arm_client::ArmClient;
use crate::auth::TokenCache;
use crate::builders::{
    ContainersBuilder, EnterpriseApplicationsBuilder, GroupsBuilder, ManagedIdentitiesBuilder,
    ResourceGroupsBuilder, ResourceSyncer, RolesBuilder, StorageAccountsBuilder,
    SubscriptionsBuilder, TenantBuilder, UsersBuilder,
};
use crate::cache::RoleAssignmentIndex;
use crate::config::{AzureConfig, AzureCredentials};
use crate::error::AzureResult;
use crate::grants::GrantPolicy;
use crate::graph_client::GraphClient;
use crate::model::OrganizationList;

/// Entra ID + Azure Resource Manager connector.
///
/// Holds the shared token cache, both API clients and the per-sync shared
/// state (grant policy, role-assignment index). Build one per sync run.
pub struct AzureConnector {
    config: AzureConfig,
    graph: Arc<GraphClient>,
    arm: Arc<ArmClient>,
    policy: Arc<GrantPolicy>,
    assignment_index: Arc<RoleAssignmentIndex>,
    organization_ids: Vec<String>,
}

impl AzureConnector {
    /// Builds the connector and resolves the tenant's organization ids,
    /// which the enterprise-application syncer needs to tell first-party
    /// applications apart from the tenant's own.
    ///
    /// # Errors
    ///
    /// Fails when a client cannot be constructed or the organization
    /// lookup is rejected by the tenant.
    #[instrument(skip(config, credentials), fields(tenant_id = %config.tenant_id))]
    pub async fn new(config: AzureConfig, credentials: AzureCredentials) -> AzureResult<Self> {
        let token_cache = Arc::new(TokenCache::new(
            credentials,
            &config.tenant_id,
            &config.login_endpoint,
        ));
        let graph = Arc::new(GraphClient::new(
            Arc::clone(&token_cache),
            &config.graph_endpoint,
            config.graph_scope(),
        )?);
        let arm = Arc::new(ArmClient::new(
            token_cache,
            &config.arm_endpoint,
            config.arm_scope(),
        )?);

        let organization_ids = Self::fetch_organization_ids(&graph).await?;
        info!(organizations = organization_ids.len(), "connector initialized");

        Ok(Self {
            config,
            graph,
            arm,
            policy: Arc::new(GrantPolicy::new()),
            assignment_index: Arc::new(RoleAssignmentIndex::new()),
            organization_ids,
        })
    }

    async fn fetch_organization_ids(graph: &GraphClient) -> AzureResult<Vec<String>> {
        let url = graph.query().build(&["organization"])?;
        let organizations: OrganizationList = graph.get(&url).await?;
        Ok(organizations.value.into_iter().map(|org| org.id).collect())
    }

    /// Verifies both API surfaces are reachable with the configured
    /// credentials: an organization read on Graph and a first
    /// subscriptions page on ARM.
    #[instrument(skip(self))]
    pub async fn validate(&self) -> AzureResult<()> {
        Self::fetch_organization_ids(&self.graph).await?;
        self.arm.list_subscriptions_page(None).await?;
        Ok(())
    }

    /// The syncers for every supported resource kind.
    pub fn syncers(&self) -> Vec<Box<dyn ResourceSyncer>> {
        vec![
            Box::new(TenantBuilder::new(Arc::clone(&self.graph))),
            Box::new(UsersBuilder::new(
                Arc::clone(&self.graph),
                self.config.clone(),
            )),
            Box::new(GroupsBuilder::new(
                Arc::clone(&self.graph),
                self.config.clone(),
                Arc::clone(&self.policy),
            )),
            Box::new(EnterpriseApplicationsBuilder::new(
                Arc::clone(&self.graph),
                self.config.clone(),
                Arc::clone(&self.policy),
                self.organization_ids.clone(),
            )),
            Box::new(ManagedIdentitiesBuilder::new(
                Arc::clone(&self.graph),
                self.config.clone(),
            )),
            Box::new(SubscriptionsBuilder::new(
                Arc::clone(&self.arm),
                Arc::clone(&self.policy),
                self.config.small_page_short_circuit,
            )),
            Box::new(ResourceGroupsBuilder::new(
                Arc::clone(&self.arm),
                Arc::clone(&self.policy),
                self.config.small_page_short_circuit,
            )),
            Box::new(RolesBuilder::new(
                Arc::clone(&self.arm),
                Arc::clone(&self.graph),
                Arc::clone(&self.assignment_index),
            )),
            Box::new(StorageAccountsBuilder::new(
                Arc::clone(&self.arm),
                Arc::clone(&self.policy),
                self.config.small_page_short_circuit,
            )),
            Box::new(ContainersBuilder::new(
                Arc::clone(&self.arm),
                Arc::clone(&self.policy),
                self.config.small_page_short_circuit,
            )),
        ]
    }
}
