//! Storage-account and blob-container sync.
//!
//! Both kinds derive their grants from ARM role assignments scoped to the
//! resource. Enumeration runs in two phases: `assignments` emits one
//! expandable grant per role assignment at the scope, `actions` resolves
//! each assigned role definition into the coarse `read`/`write`/`delete`
//! vocabulary and emits a permission grant per effective action.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::arm_client::ArmClient;
use crate::builders::arm_scope::{
    assignment_entitlement, assignment_grants_page, subscription_id_from_arm_id,
    PHASE_ASSIGNMENTS,
};
use crate::builders::{decode_list_token, encode_list_token, ResourcePage, ResourceSyncer};
use crate::cursor::PhaseState;
use crate::error::{AzureError, AzureResult};
use crate::grants::{GrantPolicy, GrantRecord, PrincipalKind};
use crate::model::{BlobContainer, Entitlement, EntitlementPurpose, Resource, ResourceKind, StorageAccount};
use crate::orchestrator::{GrantsOrchestrator, GrantsPage, PhasePage, PhaseSource};
use crate::role_actions::RoleActionMapper;

const PHASE_ACTIONS: &str = "actions";

const ACTION_SLUGS: [&str; 3] = ["read", "write", "delete"];

/// Role-assignment entitlements shared by both storage kinds: one
/// expandable `assignment` plus one permission per coarse action.
fn scope_entitlements(resource: &Resource) -> Vec<Entitlement> {
    let mut entitlements = vec![assignment_entitlement(resource)];

    for action in ACTION_SLUGS {
        entitlements.push(
            Entitlement::new(
                resource,
                action,
                EntitlementPurpose::Permission,
                format!("{} {action}", resource.display_name),
            )
            .with_description(format!("Can {action} {}", resource.display_name))
            .grantable_to(&[ResourceKind::Role]),
        );
    }
    entitlements
}

/// Pages role-assignment-derived grants for one ARM-scoped resource.
struct ScopePhaseSource<'a> {
    arm: &'a ArmClient,
    policy: &'a GrantPolicy,
    mapper: &'a RoleActionMapper,
    resource_kind: ResourceKind,
    resource_id: &'a str,
    subscription_id: &'a str,
}

impl ScopePhaseSource<'_> {
    async fn action_grants(&self) -> AzureResult<PhasePage> {
        let assignments = self.arm.list_role_assignments(self.resource_id).await?;
        let role_definition_ids: BTreeSet<&str> = assignments
            .iter()
            .map(|assignment| assignment.properties.role_definition_id.as_str())
            .filter(|id| !id.is_empty())
            .collect();
        let records_fetched = role_definition_ids.len();

        let mut grants = Vec::new();
        for role_definition_id in role_definition_ids {
            let definition = self.arm.get_role_definition(role_definition_id).await?;
            let actions = self.mapper.effective_actions(&definition.properties.permissions);
            if actions.is_empty() {
                debug!(role = %definition.name, "role grants no actions at this scope");
                continue;
            }

            let principal_id = format!("{}:{}", definition.name, self.subscription_id);
            for action in actions {
                grants.push(GrantRecord {
                    entitlement_id: format!(
                        "{}:{}:{action}",
                        self.resource_kind.id(),
                        self.resource_id
                    ),
                    principal_kind: PrincipalKind::Role,
                    principal_id: principal_id.clone(),
                    expansion: None,
                });
            }
        }

        Ok(PhasePage {
            grants,
            records_fetched,
            next_token: None,
        })
    }
}

#[async_trait]
impl PhaseSource for ScopePhaseSource<'_> {
    async fn fetch(&self, phase: &PhaseState) -> AzureResult<PhasePage> {
        match phase.phase.as_str() {
            PHASE_ASSIGNMENTS => {
                assignment_grants_page(self.arm, self.policy, self.resource_id, self.subscription_id)
                    .await
            }
            PHASE_ACTIONS => self.action_grants().await,
            other => Err(AzureError::MalformedCursor(format!(
                "unknown storage grants phase {other:?}"
            ))),
        }
    }
}

async fn scope_grants(
    arm: &ArmClient,
    policy: &GrantPolicy,
    mapper: &RoleActionMapper,
    resource: &Resource,
    cursor: &str,
    small_page_short_circuit: bool,
) -> AzureResult<GrantsPage> {
    let subscription_id = subscription_id_from_arm_id(&resource.id)?;
    let source = ScopePhaseSource {
        arm,
        policy,
        mapper,
        resource_kind: resource.kind,
        resource_id: &resource.id,
        subscription_id,
    };
    let orchestrator =
        GrantsOrchestrator::new(source).with_small_page_short_circuit(small_page_short_circuit);

    let seed = [PhaseState::new(PHASE_ASSIGNMENTS), PhaseState::new(PHASE_ACTIONS)];
    orchestrator.next_page(cursor, &seed).await
}

pub struct StorageAccountsBuilder {
    arm: Arc<ArmClient>,
    policy: Arc<GrantPolicy>,
    mapper: RoleActionMapper,
    small_page_short_circuit: bool,
}

impl StorageAccountsBuilder {
    pub fn new(arm: Arc<ArmClient>, policy: Arc<GrantPolicy>, small_page_short_circuit: bool) -> Self {
        Self {
            arm,
            policy,
            mapper: RoleActionMapper::storage_accounts(),
            small_page_short_circuit,
        }
    }

    fn account_resource(account: &StorageAccount, subscription_id: &str) -> Resource {
        let mut resource = Resource::new(ResourceKind::StorageAccount, &account.id, &account.name)
            .with_parent(ResourceKind::Subscription, subscription_id);
        if let Some(location) = &account.location {
            resource = resource.with_profile_field("location", location.clone());
        }
        if let Some(account_type) = &account.account_type {
            resource = resource.with_profile_field("type", account_type.clone());
        }
        resource
    }
}

#[async_trait]
impl ResourceSyncer for StorageAccountsBuilder {
    fn resource_kind(&self) -> ResourceKind {
        ResourceKind::StorageAccount
    }

    #[instrument(skip(self, parent))]
    async fn list(&self, parent: Option<&Resource>, cursor: &str) -> AzureResult<ResourcePage> {
        let Some(subscription) = parent.filter(|p| p.kind == ResourceKind::Subscription) else {
            return Ok(ResourcePage::default());
        };

        let next_link = decode_list_token(cursor)?;
        let page = self
            .arm
            .list_storage_accounts_page(&subscription.id, next_link.as_deref())
            .await?;

        Ok(ResourcePage {
            resources: page
                .value
                .iter()
                .map(|account| Self::account_resource(account, &subscription.id))
                .collect(),
            next_cursor: encode_list_token(page.next_link)?,
        })
    }

    async fn entitlements(&self, resource: &Resource) -> AzureResult<Vec<Entitlement>> {
        Ok(scope_entitlements(resource))
    }

    #[instrument(skip(self, resource), fields(account = %resource.id))]
    async fn grants(&self, resource: &Resource, cursor: &str) -> AzureResult<GrantsPage> {
        scope_grants(
            &self.arm,
            &self.policy,
            &self.mapper,
            resource,
            cursor,
            self.small_page_short_circuit,
        )
        .await
    }
}

pub struct ContainersBuilder {
    arm: Arc<ArmClient>,
    policy: Arc<GrantPolicy>,
    mapper: RoleActionMapper,
    small_page_short_circuit: bool,
}

impl ContainersBuilder {
    pub fn new(arm: Arc<ArmClient>, policy: Arc<GrantPolicy>, small_page_short_circuit: bool) -> Self {
        Self {
            arm,
            policy,
            mapper: RoleActionMapper::containers(),
            small_page_short_circuit,
        }
    }

    fn container_resource(container: &BlobContainer, account_id: &str) -> Resource {
        let mut resource = Resource::new(ResourceKind::Container, &container.id, &container.name)
            .with_parent(ResourceKind::StorageAccount, account_id);
        if let Some(public_access) = &container.properties.public_access {
            resource = resource.with_profile_field("public_access", public_access.clone());
        }
        resource
    }
}

#[async_trait]
impl ResourceSyncer for ContainersBuilder {
    fn resource_kind(&self) -> ResourceKind {
        ResourceKind::Container
    }

    #[instrument(skip(self, parent))]
    async fn list(&self, parent: Option<&Resource>, cursor: &str) -> AzureResult<ResourcePage> {
        let Some(account) = parent.filter(|p| p.kind == ResourceKind::StorageAccount) else {
            return Ok(ResourcePage::default());
        };

        let next_link = decode_list_token(cursor)?;
        let page = self
            .arm
            .list_containers_page(&account.id, next_link.as_deref())
            .await?;

        Ok(ResourcePage {
            resources: page
                .value
                .iter()
                .filter(|container| !container.properties.deleted)
                .map(|container| Self::container_resource(container, &account.id))
                .collect(),
            next_cursor: encode_list_token(page.next_link)?,
        })
    }

    async fn entitlements(&self, resource: &Resource) -> AzureResult<Vec<Entitlement>> {
        Ok(scope_entitlements(resource))
    }

    #[instrument(skip(self, resource), fields(container = %resource.id))]
    async fn grants(&self, resource: &Resource, cursor: &str) -> AzureResult<GrantsPage> {
        scope_grants(
            &self.arm,
            &self.policy,
            &self.mapper,
            resource,
            cursor,
            self.small_page_short_circuit,
        )
        .await
    }
}
