//! Identity-governance connector for Microsoft Entra ID and Azure
//! Resource Manager.
//!
//! The connector enumerates directory and infrastructure resources over
//! Microsoft Graph and ARM, normalizes them into resources, entitlements
//! and grants, and provisions group membership and role assignments back.
//!
//! # Features
//!
//! - `OAuth2` client credentials authentication with per-scope token caching
//! - Cursor-driven paging across the tenant, users, groups, service
//!   principals, subscriptions, resource groups, RBAC roles, storage
//!   accounts and blob containers
//! - Multi-phase grant enumeration with a resumable phase-stack cursor
//! - Lazy nested-group flattening through expandable grants
//! - RBAC role assignments mapped onto coarse resource actions
//! - Provisioning of group members/owners, application owners and role
//!   assignments
//!
//! # Example
//!
//! ```no_run
//! use azure_infra_connector::{AzureConfig, AzureConnector, AzureCredentials};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AzureConfig::builder()
//!     .tenant_id("your-tenant-id")
//!     .build()?;
//!
//! let credentials = AzureCredentials {
//!     client_id: "your-client-id".to_string(),
//!     client_secret: "your-client-secret".to_string().into(),
//! };
//!
//! let connector = AzureConnector::new(config, credentials).await?;
//! connector.validate().await?;
//! for syncer in connector.syncers() {
//!     let page = syncer.list(None, "").await?;
//!     println!("{}: {} resources", syncer.resource_kind(), page.resources.len());
//! }
//! # Ok(())
//! # }
//! ```

mod arm_client;
mod auth;
mod builders;
mod cache;
mod config;
mod connector;
mod cursor;
mod error;
mod grants;
mod graph_client;
mod model;
mod orchestrator;
mod provisioning;
mod query;
mod resolver;
mod role_actions;

// Re-exports
pub use arm_client::{ArmClient, ArmResponse};
pub use auth::TokenCache;
pub use builders::{
    ContainersBuilder, EnterpriseApplicationsBuilder, GroupsBuilder, ManagedIdentitiesBuilder,
    ResourceGroupsBuilder, ResourcePage, ResourceSyncer, RolesBuilder, StorageAccountsBuilder,
    SubscriptionsBuilder, TenantBuilder, UsersBuilder,
};
pub use cache::{RoleAssignmentIndex, SyncCache};
pub use config::{AzureConfig, AzureConfigBuilder, AzureCredentials, DEFAULT_PAGE_SIZE};
pub use connector::AzureConnector;
pub use cursor::{PageCursor, PhaseState};
pub use error::{AzureError, AzureResult};
pub use grants::{ExpansionHint, GrantPolicy, GrantRecord, PrincipalKind};
pub use graph_client::{GraphClient, ODataResponse};
pub use model::{
    AppRole, AppRoleAssignment, BlobContainer, Entitlement, EntitlementPurpose, GraphGroup,
    GraphUser, Membership, Organization, OrganizationList, Resource, ResourceGroup, ResourceKind,
    RoleAssignment, RoleDefinition, RolePermission, ServicePrincipal, StorageAccount, Subscription,
    MICROSOFT_BUILTIN_APPS_ORG_ID,
};
pub use orchestrator::{
    GrantsOrchestrator, GrantsPage, PhasePage, PhaseSource, SMALL_PAGE_THRESHOLD,
};
pub use query::{GraphQuery, GraphVersion};
pub use resolver::{DirectoryLookup, PrincipalTypeResolver, ResolvedPrincipal};
pub use role_actions::RoleActionMapper;
