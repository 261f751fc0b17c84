//! Tenant sync. The tenant's organizations are synced as top-level
//! resources so everything else can anchor under them; they carry no
//! entitlements or grants of their own.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use crate::builders::{ResourcePage, ResourceSyncer};
use crate::error::AzureResult;
use crate::graph_client::GraphClient;
use crate::model::{Entitlement, Organization, OrganizationList, Resource, ResourceKind};
use crate::orchestrator::GrantsPage;

pub struct TenantBuilder {
    graph: Arc<GraphClient>,
}

impl TenantBuilder {
    pub fn new(graph: Arc<GraphClient>) -> Self {
        Self { graph }
    }

    fn tenant_resource(organization: &Organization) -> Resource {
        let display_name = organization
            .display_name
            .clone()
            .unwrap_or_else(|| organization.id.clone());
        Resource::new(ResourceKind::Tenant, &organization.id, display_name)
    }
}

#[async_trait]
impl ResourceSyncer for TenantBuilder {
    fn resource_kind(&self) -> ResourceKind {
        ResourceKind::Tenant
    }

    /// The organization listing is one page; any non-empty cursor means
    /// the listing is already drained.
    #[instrument(skip(self, _parent))]
    async fn list(&self, _parent: Option<&Resource>, cursor: &str) -> AzureResult<ResourcePage> {
        if !cursor.is_empty() {
            return Ok(ResourcePage::default());
        }

        let url = self.graph.query().build(&["organization"])?;
        let organizations: OrganizationList = self.graph.get(&url).await?;

        Ok(ResourcePage {
            resources: organizations.value.iter().map(Self::tenant_resource).collect(),
            next_cursor: String::new(),
        })
    }

    async fn entitlements(&self, _resource: &Resource) -> AzureResult<Vec<Entitlement>> {
        Ok(Vec::new())
    }

    async fn grants(&self, _resource: &Resource, _cursor: &str) -> AzureResult<GrantsPage> {
        Ok(GrantsPage {
            grants: Vec::new(),
            next_cursor: String::new(),
        })
    }
}
