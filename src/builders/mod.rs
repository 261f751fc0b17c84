//! Per-resource-kind sync builders.
//!
//! Each builder translates one upstream collection into normalized
//! resources, entitlements and grants, and provisions access back where
//! the kind supports it. All listing and grants calls are cursor-driven:
//! one upstream page per call, resumable via the opaque cursor.

mod arm_scope;
mod groups;
mod resource_groups;
mod roles;
mod service_principals;
mod storage;
mod subscriptions;
mod tenant;
mod users;

pub use groups::GroupsBuilder;
pub use resource_groups::ResourceGroupsBuilder;
pub use roles::RolesBuilder;
pub use service_principals::{EnterpriseApplicationsBuilder, ManagedIdentitiesBuilder};
pub use storage::{ContainersBuilder, StorageAccountsBuilder};
pub use subscriptions::SubscriptionsBuilder;
pub use tenant::TenantBuilder;
pub use users::UsersBuilder;

use async_trait::async_trait;

use crate::cursor::{PageCursor, PhaseState};
use crate::error::{AzureError, AzureResult};
use crate::model::{Entitlement, Resource, ResourceKind};
use crate::orchestrator::GrantsPage;

/// One page of listed resources. An empty `next_cursor` ends the listing.
#[derive(Debug, Default)]
pub struct ResourcePage {
    pub resources: Vec<Resource>,
    pub next_cursor: String,
}

/// Sync surface of one resource kind.
#[async_trait]
pub trait ResourceSyncer: Send + Sync {
    fn resource_kind(&self) -> ResourceKind;

    /// Lists one page of resources. Hierarchical kinds list under
    /// `parent` and return an empty page for parents they do not nest
    /// under.
    async fn list(&self, parent: Option<&Resource>, cursor: &str) -> AzureResult<ResourcePage>;

    /// Entitlements exposed by one resource.
    async fn entitlements(&self, resource: &Resource) -> AzureResult<Vec<Entitlement>>;

    /// One page of grants for one resource.
    async fn grants(&self, resource: &Resource, cursor: &str) -> AzureResult<GrantsPage>;

    /// Grants `entitlement` to a principal. Kinds without provisioning
    /// keep the default.
    async fn grant(
        &self,
        entitlement: &Entitlement,
        principal_kind: ResourceKind,
        principal_id: &str,
    ) -> AzureResult<()> {
        let _ = (principal_kind, principal_id);
        Err(AzureError::Provisioning(format!(
            "provisioning is not supported for {}",
            entitlement.resource_kind
        )))
    }

    /// Revokes a previously granted entitlement.
    async fn revoke(
        &self,
        entitlement: &Entitlement,
        principal_kind: ResourceKind,
        principal_id: &str,
    ) -> AzureResult<()> {
        let _ = (principal_kind, principal_id);
        Err(AzureError::Provisioning(format!(
            "provisioning is not supported for {}",
            entitlement.resource_kind
        )))
    }
}

/// Decodes a plain listing cursor into the upstream continuation, if any.
pub(crate) fn decode_list_token(opaque: &str) -> AzureResult<Option<String>> {
    let cursor = PageCursor::decode(opaque)?;
    Ok(cursor.current_phase().and_then(|phase| phase.token.clone()))
}

/// Encodes the next listing cursor: empty when the listing is done.
pub(crate) fn encode_list_token(next_link: Option<String>) -> AzureResult<String> {
    let mut cursor = PageCursor::new();
    match next_link {
        Some(link) if !link.is_empty() => {
            cursor.push_phase(PhaseState::new("list").with_token(link));
        }
        _ => {}
    }
    cursor.encode()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_token_round_trip() {
        let encoded = encode_list_token(Some("https://next".into())).unwrap();
        assert_eq!(decode_list_token(&encoded).unwrap().as_deref(), Some("https://next"));
    }

    #[test]
    fn exhausted_listing_encodes_empty() {
        assert_eq!(encode_list_token(None).unwrap(), "");
        assert!(decode_list_token("").unwrap().is_none());
    }
}
