//! Normalized resource model and upstream wire records.
//!
//! The connector translates Microsoft Graph and Azure Resource Manager
//! payloads into a flat resource/entitlement/grant model. The wire structs
//! here mirror the exact field sets the connector `$select`s; anything else
//! the APIs return is ignored by serde.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `@odata.type` discriminator for directory users.
pub const ODATA_TYPE_USER: &str = "#microsoft.graph.user";
/// `@odata.type` discriminator for directory groups.
pub const ODATA_TYPE_GROUP: &str = "#microsoft.graph.group";
/// `@odata.type` discriminator for service principals.
pub const ODATA_TYPE_SERVICE_PRINCIPAL: &str = "#microsoft.graph.servicePrincipal";

/// `servicePrincipalType` values the connector distinguishes.
pub const SP_TYPE_APPLICATION: &str = "Application";
pub const SP_TYPE_MANAGED_IDENTITY: &str = "ManagedIdentity";
pub const SP_TYPE_LEGACY: &str = "Legacy";
pub const SP_TYPE_SOCIAL_IDP: &str = "SocialIdp";

/// Organization id owning Microsoft's built-in first-party applications.
/// Service principals from this organization are synced but flagged hidden.
pub const MICROSOFT_BUILTIN_APPS_ORG_ID: &str = "f8cdef31-a31e-4b4a-93e4-5f571e91255a";

/// Kinds of resources this connector emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Tenant,
    User,
    Group,
    EnterpriseApplication,
    ManagedIdentity,
    Subscription,
    ResourceGroup,
    Role,
    StorageAccount,
    Container,
}

impl ResourceKind {
    /// Stable identifier used in resource ids, entitlement ids and cursors.
    pub fn id(self) -> &'static str {
        match self {
            ResourceKind::Tenant => "tenant",
            ResourceKind::User => "user",
            ResourceKind::Group => "group",
            ResourceKind::EnterpriseApplication => "enterprise_application",
            ResourceKind::ManagedIdentity => "managed_identity",
            ResourceKind::Subscription => "subscription",
            ResourceKind::ResourceGroup => "resource_group",
            ResourceKind::Role => "role",
            ResourceKind::StorageAccount => "storage_account",
            ResourceKind::Container => "container",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// A normalized synced resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub kind: ResourceKind,
    pub id: String,
    pub display_name: String,
    /// Parent resource, when the kind is hierarchical (containers under
    /// storage accounts, resource groups under subscriptions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<(ResourceKind, String)>,
    /// Hidden resources are synced but not shown for access requests
    /// (Microsoft built-in applications).
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,
    /// Flat profile attributes; keys follow the upstream camelCase names.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub profile: BTreeMap<String, Value>,
}

impl Resource {
    pub fn new(kind: ResourceKind, id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            display_name: display_name.into(),
            parent: None,
            hidden: false,
            profile: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_parent(mut self, kind: ResourceKind, id: impl Into<String>) -> Self {
        self.parent = Some((kind, id.into()));
        self
    }

    #[must_use]
    pub fn with_hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    #[must_use]
    pub fn with_profile_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.profile.insert(key.to_string(), value.into());
        self
    }
}

/// Whether an entitlement represents standing access or a permission level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementPurpose {
    Assignment,
    Permission,
}

/// An entitlement exposed by one resource (e.g. group `member`, role
/// `assignment`, storage account `write`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entitlement {
    pub resource_kind: ResourceKind,
    pub resource_id: String,
    /// Slug unique within the resource (`member`, `owner`, `assignment`, …).
    pub slug: String,
    pub purpose: EntitlementPurpose,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Resource kinds whose principals may hold this entitlement.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub grantable_to: Vec<ResourceKind>,
}

impl Entitlement {
    pub fn new(
        resource: &Resource,
        slug: impl Into<String>,
        purpose: EntitlementPurpose,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            resource_kind: resource.kind,
            resource_id: resource.id.clone(),
            slug: slug.into(),
            purpose,
            display_name: display_name.into(),
            description: String::new(),
            grantable_to: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn grantable_to(mut self, kinds: &[ResourceKind]) -> Self {
        self.grantable_to = kinds.to_vec();
        self
    }

    /// Fully-qualified entitlement id: `{kind}:{resourceId}:{slug}`.
    pub fn id(&self) -> String {
        format!("{}:{}:{}", self.resource_kind, self.resource_id, self.slug)
    }
}

// ---------------------------------------------------------------------------
// Microsoft Graph wire records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphUser {
    #[serde(default)]
    pub id: String,
    #[serde(default, rename = "mail")]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub user_principal_name: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub account_enabled: bool,
    #[serde(default)]
    pub employee_type: Option<String>,
    #[serde(default)]
    pub employee_id: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub manager: Option<GraphManager>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphManager {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub employee_id: Option<String>,
    #[serde(default, rename = "mail")]
    pub email: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// `users/{id}/mailboxSettings` probe result. A non-empty `userPurpose`
/// other than `user` marks a shared/room/equipment mailbox.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphMailboxSettings {
    #[serde(default)]
    pub user_purpose: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphGroup {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub classification: Option<String>,
    #[serde(default)]
    pub group_types: Vec<String>,
    #[serde(default, rename = "mail")]
    pub email: Option<String>,
    #[serde(default)]
    pub mail_enabled: bool,
    #[serde(default)]
    pub security_enabled: bool,
    #[serde(default)]
    pub security_identifier: Option<String>,
    #[serde(default)]
    pub on_premises_security_identifier: Option<String>,
    #[serde(default)]
    pub on_premises_sync_enabled: bool,
    #[serde(default)]
    pub is_assignable_to_role: bool,
    #[serde(default)]
    pub is_management_restricted: bool,
    #[serde(default)]
    pub created_date_time: Option<String>,
}

impl GraphGroup {
    /// Upstream group category derived from `groupTypes` + mail/security
    /// flags: Microsoft 365, Security, Mail-enabled security, Distribution.
    pub fn group_type(&self) -> &'static str {
        if self.group_types.iter().any(|t| t == "Unified") {
            "Microsoft 365"
        } else if self.security_enabled && self.mail_enabled {
            "Mail-enabled security"
        } else if self.security_enabled {
            "Security"
        } else {
            "Distribution"
        }
    }

    /// Assigned vs dynamic membership.
    pub fn membership_type(&self) -> &'static str {
        if self.group_types.iter().any(|t| t == "DynamicMembership") {
            "Dynamic"
        } else {
            "Assigned"
        }
    }
}

/// One entry of a group membership/ownership listing. The `@odata.type`
/// discriminator drives grant classification; `servicePrincipalType` is
/// only present for service-principal members.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Membership {
    #[serde(default)]
    pub id: String,
    #[serde(default, rename = "@odata.type")]
    pub odata_type: String,
    #[serde(default)]
    pub service_principal_type: Option<String>,
    #[serde(default)]
    pub app_owner_organization_id: Option<String>,
    #[serde(default)]
    pub on_premises_sync_enabled: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePrincipal {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub app_display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub account_enabled: bool,
    #[serde(default)]
    pub app_owner_organization_id: Option<String>,
    #[serde(default)]
    pub service_principal_type: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub app_roles: Vec<AppRole>,
}

impl ServicePrincipal {
    /// `displayName` with `appDisplayName` fallback.
    pub fn name(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(self.app_display_name.as_deref())
            .unwrap_or_default()
    }

    /// Entra portal deep link for the application blade. Ids come from the
    /// directory, but they ride inside a URL fragment, so they are encoded.
    pub fn external_url(&self) -> String {
        format!(
            "https://entra.microsoft.com/#view/Microsoft_AAD_IAM/ManagedAppMenuBlade/~/Overview/objectId/{}/appId/{}",
            urlencoding::encode(&self.id),
            urlencoding::encode(self.app_id.as_deref().unwrap_or_default()),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRole {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub is_enabled: bool,
    /// "User" and/or "Application".
    #[serde(default)]
    pub allowed_member_types: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRoleAssignment {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub app_role_id: String,
    #[serde(default)]
    pub principal_id: String,
    /// "User", "Group" or "ServicePrincipal".
    #[serde(default)]
    pub principal_type: Option<String>,
    #[serde(default)]
    pub principal_display_name: Option<String>,
    #[serde(default)]
    pub resource_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrganizationList {
    #[serde(default)]
    pub value: Vec<Organization>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Organization {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Azure Resource Manager wire records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    /// Full ARM id: `/subscriptions/{subscriptionId}`.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub subscription_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceGroup {
    /// Full ARM id: `/subscriptions/{sub}/resourceGroups/{name}`.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleDefinition {
    /// Full ARM id ending in `/roleDefinitions/{roleId}`.
    #[serde(default)]
    pub id: String,
    /// The role id GUID alone.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub properties: RoleDefinitionProperties,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleDefinitionProperties {
    #[serde(default)]
    pub role_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "type")]
    pub role_type: Option<String>,
    #[serde(default)]
    pub permissions: Vec<RolePermission>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolePermission {
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub not_actions: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignment {
    /// Full ARM id of the assignment.
    #[serde(default)]
    pub id: String,
    /// The assignment name GUID; needed to delete the assignment.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub properties: RoleAssignmentProperties,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleAssignmentProperties {
    #[serde(default)]
    pub principal_id: String,
    /// Full ARM URL/id of the assigned role definition. Split on `/`, a
    /// well-formed value yields seven segments with the role id last.
    #[serde(default)]
    pub role_definition_id: String,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub principal_type: Option<String>,
}

impl RoleAssignmentProperties {
    /// Extracts the trailing role id GUID from `roleDefinitionId`.
    /// Returns `None` when the URL does not have the expected shape;
    /// callers treat that as a malformed record.
    pub fn role_id(&self) -> Option<&str> {
        let segments: Vec<&str> = self.role_definition_id.split('/').collect();
        if segments.len() != 7 {
            return None;
        }
        segments.last().copied().filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageAccount {
    /// Full ARM id of the account.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default, rename = "type")]
    pub account_type: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobContainer {
    /// Full ARM id of the container.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub properties: BlobContainerProperties,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobContainerProperties {
    #[serde(default)]
    pub public_access: Option<String>,
    #[serde(default)]
    pub deleted: bool,
}
