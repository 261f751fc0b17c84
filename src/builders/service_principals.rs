//! Enterprise-application and managed-identity sync.
//!
//! Both kinds are service principals upstream, split by
//! `servicePrincipalType`. Enterprise applications are limited to
//! principals owned by one of the tenant's organizations; Microsoft's
//! built-in first-party apps are synced but flagged hidden.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use crate::builders::{decode_list_token, encode_list_token, ResourcePage, ResourceSyncer};
use crate::config::AzureConfig;
use crate::cursor::PhaseState;
use crate::error::{AzureError, AzureResult};
use crate::grants::{ExpansionHint, GrantPolicy, GrantRecord, PrincipalKind};
use crate::graph_client::GraphClient;
use crate::model::{
    AppRoleAssignment, Entitlement, EntitlementPurpose, Membership, Resource, ResourceKind,
    ServicePrincipal, MICROSOFT_BUILTIN_APPS_ORG_ID,
};
use crate::orchestrator::{GrantsOrchestrator, GrantsPage, PhasePage, PhaseSource};
use crate::provisioning::{add_ref, remove_ref};
use crate::query::GraphVersion;

const SERVICE_PRINCIPAL_SELECT: [&str; 10] = [
    "id",
    "appId",
    "displayName",
    "appDisplayName",
    "description",
    "accountEnabled",
    "appOwnerOrganizationId",
    "servicePrincipalType",
    "tags",
    "appRoles",
];

/// App-role id used when a principal is assigned to the application
/// directly rather than to a specific role.
const DEFAULT_APP_ROLE_ID: &str = "00000000-0000-0000-0000-000000000000";

const PHASE_ASSIGNMENTS: &str = "assignment";
const PHASE_OWNERS: &str = "owners";

pub struct EnterpriseApplicationsBuilder {
    graph: Arc<GraphClient>,
    config: AzureConfig,
    policy: Arc<GrantPolicy>,
    organization_ids: Vec<String>,
}

impl EnterpriseApplicationsBuilder {
    pub fn new(
        graph: Arc<GraphClient>,
        config: AzureConfig,
        policy: Arc<GrantPolicy>,
        organization_ids: Vec<String>,
    ) -> Self {
        Self {
            graph,
            config,
            policy,
            organization_ids,
        }
    }

    fn application_resource(sp: &ServicePrincipal) -> Resource {
        let hidden = sp.app_owner_organization_id.as_deref() == Some(MICROSOFT_BUILTIN_APPS_ORG_ID);
        let mut resource = Resource::new(ResourceKind::EnterpriseApplication, &sp.id, sp.name())
            .with_hidden(hidden)
            .with_profile_field("account_enabled", sp.account_enabled)
            .with_profile_field("external_url", sp.external_url());

        if let Some(app_id) = &sp.app_id {
            resource = resource.with_profile_field("app_id", app_id.clone());
        }
        if let Some(description) = &sp.description {
            resource = resource.with_profile_field("description", description.clone());
        }
        resource
    }
}

/// Phase source for one enterprise application: `appRoleAssignedTo`
/// assignments first, then the owner list.
struct ApplicationPhaseSource<'a> {
    graph: &'a GraphClient,
    config: &'a AzureConfig,
    policy: &'a GrantPolicy,
    application_id: &'a str,
}

impl ApplicationPhaseSource<'_> {
    fn assignment_grant(&self, assignment: &AppRoleAssignment) -> GrantRecord {
        let app_role_id = if assignment.app_role_id.is_empty() {
            DEFAULT_APP_ROLE_ID
        } else {
            &assignment.app_role_id
        };
        let entitlement_id = format!(
            "enterprise_application:{}:assignment:{}",
            self.application_id, app_role_id
        );

        match assignment.principal_type.as_deref() {
            Some("Group") => GrantRecord {
                entitlement_id,
                principal_kind: PrincipalKind::Group,
                principal_id: assignment.principal_id.clone(),
                expansion: Some(ExpansionHint {
                    entitlement_ids: vec![format!("group:{}:members", assignment.principal_id)],
                    resource_kinds: vec![ResourceKind::Group],
                    shallow: true,
                }),
            },
            // TODO: appRoleAssignedTo does not say which service principal
            // sub-type the principal is; resolve it instead of assuming a
            // managed identity.
            Some("ServicePrincipal") => GrantRecord {
                entitlement_id,
                principal_kind: PrincipalKind::ManagedIdentity,
                principal_id: assignment.principal_id.clone(),
                expansion: None,
            },
            _ => GrantRecord {
                entitlement_id,
                principal_kind: PrincipalKind::User,
                principal_id: assignment.principal_id.clone(),
                expansion: None,
            },
        }
    }
}

#[async_trait]
impl PhaseSource for ApplicationPhaseSource<'_> {
    async fn fetch(&self, phase: &PhaseState) -> AzureResult<PhasePage> {
        match phase.phase.as_str() {
            PHASE_ASSIGNMENTS => {
                let url = self
                    .graph
                    .query()
                    .version(GraphVersion::Beta)
                    .top(self.config.page_size)
                    .build_with_pagination(
                        &["servicePrincipals", self.application_id, "appRoleAssignedTo"],
                        phase.token.as_deref(),
                    )?;

                let page = self.graph.get_list::<AppRoleAssignment>(&url).await?;
                Ok(PhasePage {
                    grants: page.value.iter().map(|a| self.assignment_grant(a)).collect(),
                    records_fetched: page.value.len(),
                    next_token: page.next_link,
                })
            }
            PHASE_OWNERS => {
                let mut query = self
                    .graph
                    .query()
                    .version(GraphVersion::Beta)
                    .select(&["id", "servicePrincipalType"])
                    .top(self.config.page_size);
                if self.config.skip_ad_groups {
                    // $count prevents Graph from answering 400 on this filter.
                    query = query.filter("(onPremisesSyncEnabled ne true)").count();
                }
                let url = query.build_with_pagination(
                    &["servicePrincipals", self.application_id, "owners"],
                    phase.token.as_deref(),
                )?;

                let page = self.graph.get_list::<Membership>(&url).await?;
                let entitlement_id =
                    format!("enterprise_application:{}:owners", self.application_id);

                let mut grants = Vec::new();
                for record in &page.value {
                    // Owner lists are small and expected to be fully
                    // classifiable; unknown types abort the page.
                    if let Some(grant) = self.policy.membership_grant(
                        &entitlement_id,
                        self.application_id,
                        record,
                        true,
                    )? {
                        grants.push(grant);
                    }
                }

                Ok(PhasePage {
                    grants,
                    records_fetched: page.value.len(),
                    next_token: page.next_link,
                })
            }
            other => Err(AzureError::MalformedCursor(format!(
                "unknown grants phase {other:?} for enterprise application"
            ))),
        }
    }
}

#[async_trait]
impl ResourceSyncer for EnterpriseApplicationsBuilder {
    fn resource_kind(&self) -> ResourceKind {
        ResourceKind::EnterpriseApplication
    }

    #[instrument(skip(self, _parent))]
    async fn list(&self, _parent: Option<&Resource>, cursor: &str) -> AzureResult<ResourcePage> {
        let next_link = decode_list_token(cursor)?;
        let url = self
            .graph
            .query()
            .version(GraphVersion::Beta)
            .select(&SERVICE_PRINCIPAL_SELECT)
            .filter("servicePrincipalType eq 'Application' AND accountEnabled eq true")
            .top(self.config.page_size)
            .build_with_pagination(&["servicePrincipals"], next_link.as_deref())?;

        let page = self.graph.get_list::<ServicePrincipal>(&url).await?;
        let resources = page
            .value
            .iter()
            .filter(|sp| {
                sp.app_owner_organization_id
                    .as_deref()
                    .is_some_and(|org| self.organization_ids.iter().any(|known| known == org))
            })
            .map(Self::application_resource)
            .collect();

        Ok(ResourcePage {
            resources,
            next_cursor: encode_list_token(page.next_link)?,
        })
    }

    async fn entitlements(&self, resource: &Resource) -> AzureResult<Vec<Entitlement>> {
        let mut entitlements = vec![
            Entitlement::new(
                resource,
                PHASE_OWNERS,
                EntitlementPurpose::Permission,
                format!("{} Owner", resource.display_name),
            )
            .with_description(format!("Owner of the {} application", resource.display_name))
            .grantable_to(&[ResourceKind::User, ResourceKind::EnterpriseApplication]),
            // Principals assigned to the app before it had roles hold the
            // default assignment rather than a named role.
            Entitlement::new(
                resource,
                format!("assignment:{DEFAULT_APP_ROLE_ID}"),
                EntitlementPurpose::Assignment,
                format!("{} Default Assignment", resource.display_name),
            )
            .grantable_to(&[ResourceKind::User, ResourceKind::Group]),
        ];

        // One assignment entitlement per app role, fetched fresh so newly
        // added roles appear without a full resync.
        let url = self
            .graph
            .query()
            .select(&["id", "appRoles"])
            .build(&["servicePrincipals", &resource.id])?;
        let sp: ServicePrincipal = self.graph.get(&url).await?;
        for role in sp.app_roles.iter().filter(|role| role.is_enabled) {
            let display_name = role.display_name.clone().unwrap_or_else(|| role.id.clone());
            entitlements.push(
                Entitlement::new(
                    resource,
                    format!("assignment:{}", role.id),
                    EntitlementPurpose::Assignment,
                    format!("{display_name} Role Assignment"),
                )
                .with_description(format!(
                    "Assigned to the {} application with the {display_name} role",
                    resource.display_name
                ))
                .grantable_to(&[ResourceKind::User, ResourceKind::Group]),
            );
        }

        Ok(entitlements)
    }

    #[instrument(skip(self, resource), fields(application_id = %resource.id))]
    async fn grants(&self, resource: &Resource, cursor: &str) -> AzureResult<GrantsPage> {
        let source = ApplicationPhaseSource {
            graph: &self.graph,
            config: &self.config,
            policy: &self.policy,
            application_id: &resource.id,
        };
        let orchestrator = GrantsOrchestrator::new(source)
            .with_small_page_short_circuit(self.config.small_page_short_circuit);

        let seed = [
            PhaseState::new(PHASE_ASSIGNMENTS),
            PhaseState::new(PHASE_OWNERS),
        ];
        orchestrator.next_page(cursor, &seed).await
    }

    async fn grant(
        &self,
        entitlement: &Entitlement,
        principal_kind: ResourceKind,
        principal_id: &str,
    ) -> AzureResult<()> {
        if entitlement.slug != PHASE_OWNERS {
            return Err(AzureError::Provisioning(
                "only the owners entitlement of an application can be provisioned directly".into(),
            ));
        }
        if principal_kind != ResourceKind::User {
            return Err(AzureError::Provisioning(
                "only users can be granted application ownership".into(),
            ));
        }
        add_ref(
            &self.graph,
            &["servicePrincipals", &entitlement.resource_id, "owners"],
            principal_id,
        )
        .await
    }

    async fn revoke(
        &self,
        entitlement: &Entitlement,
        principal_kind: ResourceKind,
        principal_id: &str,
    ) -> AzureResult<()> {
        if entitlement.slug != PHASE_OWNERS {
            return Err(AzureError::Provisioning(
                "only the owners entitlement of an application can be revoked directly".into(),
            ));
        }
        if principal_kind != ResourceKind::User {
            return Err(AzureError::Provisioning(
                "only users can be granted application ownership".into(),
            ));
        }
        remove_ref(
            &self.graph,
            &["servicePrincipals", &entitlement.resource_id, "owners"],
            principal_id,
        )
        .await
    }
}

/// Managed identities are synced as principals only; they expose no
/// entitlements of their own.
pub struct ManagedIdentitiesBuilder {
    graph: Arc<GraphClient>,
    config: AzureConfig,
}

impl ManagedIdentitiesBuilder {
    pub fn new(graph: Arc<GraphClient>, config: AzureConfig) -> Self {
        Self { graph, config }
    }
}

#[async_trait]
impl ResourceSyncer for ManagedIdentitiesBuilder {
    fn resource_kind(&self) -> ResourceKind {
        ResourceKind::ManagedIdentity
    }

    #[instrument(skip(self, _parent))]
    async fn list(&self, _parent: Option<&Resource>, cursor: &str) -> AzureResult<ResourcePage> {
        let next_link = decode_list_token(cursor)?;
        let url = self
            .graph
            .query()
            .version(GraphVersion::Beta)
            .select(&SERVICE_PRINCIPAL_SELECT)
            .filter("servicePrincipalType eq 'ManagedIdentity'")
            .top(self.config.page_size)
            .build_with_pagination(&["servicePrincipals"], next_link.as_deref())?;

        let page = self.graph.get_list::<ServicePrincipal>(&url).await?;
        let resources = page
            .value
            .iter()
            .map(|sp| {
                Resource::new(ResourceKind::ManagedIdentity, &sp.id, sp.name())
                    .with_profile_field("account_enabled", sp.account_enabled)
            })
            .collect();

        Ok(ResourcePage {
            resources,
            next_cursor: encode_list_token(page.next_link)?,
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
