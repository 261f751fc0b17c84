//! Group sync: listing, member/owner entitlements, multi-phase grants
//! and `$ref` provisioning.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use crate::builders::{decode_list_token, encode_list_token, ResourcePage, ResourceSyncer};
use crate::config::AzureConfig;
use crate::cursor::PhaseState;
use crate::error::{AzureError, AzureResult};
use crate::grants::GrantPolicy;
use crate::graph_client::GraphClient;
use crate::model::{Entitlement, EntitlementPurpose, GraphGroup, Membership, Resource, ResourceKind};
use crate::orchestrator::{GrantsOrchestrator, GrantsPage, PhasePage, PhaseSource};
use crate::provisioning::{add_ref, remove_ref};
use crate::query::GraphVersion;

const GROUP_SELECT: [&str; 14] = [
    "classification",
    "description",
    "displayName",
    "groupTypes",
    "id",
    "mail",
    "mailEnabled",
    "onPremisesSecurityIdentifier",
    "onPremisesSyncEnabled",
    "securityEnabled",
    "securityIdentifier",
    "isAssignableToRole",
    "isManagementRestricted",
    "createdDateTime",
];

const MEMBERSHIP_SELECT: [&str; 3] = ["id", "servicePrincipalType", "onPremisesSyncEnabled"];

/// Filter excluding on-premises-synced groups; requires `$count` and the
/// eventual-consistency header.
const SKIP_AD_GROUPS_FILTER: &str = "(onPremisesSyncEnabled ne true)";

const PHASE_OWNERS: &str = "owners";
const PHASE_MEMBERS: &str = "members";

pub struct GroupsBuilder {
    graph: Arc<GraphClient>,
    config: AzureConfig,
    policy: Arc<GrantPolicy>,
}

impl GroupsBuilder {
    pub fn new(graph: Arc<GraphClient>, config: AzureConfig, policy: Arc<GrantPolicy>) -> Self {
        Self { graph, config, policy }
    }

    fn group_resource(group: &GraphGroup) -> Resource {
        let display_name = group.display_name.clone().unwrap_or_else(|| group.id.clone());
        let mut resource = Resource::new(ResourceKind::Group, &group.id, display_name)
            .with_profile_field("group_type", group.group_type())
            .with_profile_field("membership_type", group.membership_type())
            .with_profile_field("mail_enabled", group.mail_enabled)
            .with_profile_field("security_enabled", group.security_enabled);

        if let Some(mail) = &group.email {
            resource = resource.with_profile_field("mail", mail.clone());
        }
        if let Some(classification) = &group.classification {
            resource = resource.with_profile_field("classification", classification.clone());
        }
        if let Some(sid) = &group.security_identifier {
            resource = resource.with_profile_field("security_identifier", sid.clone());
        }
        resource
    }

    fn relation_from_entitlement(entitlement: &Entitlement) -> AzureResult<&'static str> {
        match entitlement.slug.as_str() {
            PHASE_MEMBERS => Ok("members"),
            PHASE_OWNERS => Ok("owners"),
            other => Err(AzureError::Provisioning(format!(
                "groups only provision members and owners, not {other:?}"
            ))),
        }
    }
}

/// Lists one page of a group's owners or members and classifies the
/// records into grants.
struct GroupPhaseSource<'a> {
    graph: &'a GraphClient,
    config: &'a AzureConfig,
    policy: &'a GrantPolicy,
    group_id: &'a str,
}

#[async_trait]
impl PhaseSource for GroupPhaseSource<'_> {
    async fn fetch(&self, phase: &PhaseState) -> AzureResult<PhasePage> {
        // The beta endpoint is deliberate: v1.0 member and owner lists
        // omit service principals.
        let url = self
            .graph
            .query()
            .version(GraphVersion::Beta)
            .select(&MEMBERSHIP_SELECT)
            .top(self.config.page_size)
            .build_with_pagination(
                &["groups", self.group_id, &phase.phase],
                phase.token.as_deref(),
            )?;

        let page = self.graph.get_list::<Membership>(&url).await?;
        let entitlement_id = format!("group:{}:{}", self.group_id, phase.phase);

        let mut grants = Vec::new();
        for record in &page.value {
            if let Some(grant) =
                self.policy
                    .membership_grant(&entitlement_id, self.group_id, record, false)?
            {
                grants.push(grant);
            }
        }

        Ok(PhasePage {
            grants,
            records_fetched: page.value.len(),
            next_token: page.next_link,
        })
    }
}

#[async_trait]
impl ResourceSyncer for GroupsBuilder {
    fn resource_kind(&self) -> ResourceKind {
        ResourceKind::Group
    }

    #[instrument(skip(self, _parent))]
    async fn list(&self, _parent: Option<&Resource>, cursor: &str) -> AzureResult<ResourcePage> {
        let next_link = decode_list_token(cursor)?;
        let mut query = self
            .graph
            .query()
            .select(&GROUP_SELECT)
            .top(self.config.page_size);
        if self.config.skip_ad_groups {
            query = query.filter(SKIP_AD_GROUPS_FILTER).count();
        }
        let url = query.build_with_pagination(&["groups"], next_link.as_deref())?;

        let page = self.graph.get_list::<GraphGroup>(&url).await?;
        Ok(ResourcePage {
            resources: page.value.iter().map(Self::group_resource).collect(),
            next_cursor: encode_list_token(page.next_link)?,
        })
    }

    async fn entitlements(&self, resource: &Resource) -> AzureResult<Vec<Entitlement>> {
        let member_kinds = [
            ResourceKind::User,
            ResourceKind::Group,
            ResourceKind::EnterpriseApplication,
            ResourceKind::ManagedIdentity,
        ];
        Ok(vec![
            Entitlement::new(
                resource,
                PHASE_MEMBERS,
                EntitlementPurpose::Assignment,
                format!("{} Member", resource.display_name),
            )
            .with_description(format!("Member of the {} group", resource.display_name))
            .grantable_to(&member_kinds),
            Entitlement::new(
                resource,
                PHASE_OWNERS,
                EntitlementPurpose::Assignment,
                format!("{} Owner", resource.display_name),
            )
            .with_description(format!("Owner of the {} group", resource.display_name))
            .grantable_to(&member_kinds),
        ])
    }

    #[instrument(skip(self, resource), fields(group_id = %resource.id))]
    async fn grants(&self, resource: &Resource, cursor: &str) -> AzureResult<GrantsPage> {
        let source = GroupPhaseSource {
            graph: &self.graph,
            config: &self.config,
            policy: &self.policy,
            group_id: &resource.id,
        };
        let orchestrator = GrantsOrchestrator::new(source)
            .with_small_page_short_circuit(self.config.small_page_short_circuit);

        let seed = [PhaseState::new(PHASE_OWNERS), PhaseState::new(PHASE_MEMBERS)];
        orchestrator.next_page(cursor, &seed).await
    }

    async fn grant(
        &self,
        entitlement: &Entitlement,
        principal_kind: ResourceKind,
        principal_id: &str,
    ) -> AzureResult<()> {
        if principal_kind != ResourceKind::User {
            return Err(AzureError::Provisioning(
                "only users can be granted group entitlements".into(),
            ));
        }
        let relation = Self::relation_from_entitlement(entitlement)?;
        add_ref(
            &self.graph,
            &["groups", &entitlement.resource_id, relation],
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
        if principal_kind != ResourceKind::User {
            return Err(AzureError::Provisioning(
                "only users can be granted group entitlements".into(),
            ));
        }
        let relation = Self::relation_from_entitlement(entitlement)?;
        remove_ref(
            &self.graph,
            &["groups", &entitlement.resource_id, relation],
            principal_id,
        )
        .await
    }
}
