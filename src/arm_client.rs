//! Azure Resource Manager HTTP transport.
//!
//! Management-plane listings page with a `value` array and a `nextLink`
//! continuation. Like the Graph transport, every call is a single bounded
//! request; throttling surfaces as [`AzureError::RateLimited`].

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::auth::TokenCache;
use crate::error::{AzureError, AzureResult};
use crate::graph_client::{error_from_response, ApiSurface};
use crate::model::{
    BlobContainer, ResourceGroup, RoleAssignment, RoleDefinition, StorageAccount, Subscription,
};

const SUBSCRIPTIONS_API_VERSION: &str = "2022-12-01";
const RESOURCE_GROUPS_API_VERSION: &str = "2021-04-01";
const AUTHORIZATION_API_VERSION: &str = "2022-04-01";
const STORAGE_API_VERSION: &str = "2023-01-01";

/// Paginated ARM list envelope.
#[derive(Debug, Deserialize)]
pub struct ArmResponse<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    #[serde(rename = "nextLink")]
    pub next_link: Option<String>,
}

/// Azure Resource Manager client.
#[derive(Debug)]
pub struct ArmClient {
    http_client: reqwest::Client,
    token_cache: Arc<TokenCache>,
    endpoint: String,
    scope: String,
}

impl ArmClient {
    /// # Errors
    ///
    /// Returns [`AzureError::Config`] if the HTTP client cannot be built.
    pub fn new(
        token_cache: Arc<TokenCache>,
        endpoint: impl Into<String>,
        scope: impl Into<String>,
    ) -> AzureResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AzureError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            token_cache,
            endpoint: endpoint.into(),
            scope: scope.into(),
        })
    }

    fn list_url(&self, path: &str, api_version: &str) -> String {
        format!("{}{}?api-version={}", self.endpoint, path, api_version)
    }

    /// One page of an ARM listing. `next_link` resumes a prior page.
    pub async fn list_page<T: DeserializeOwned>(
        &self,
        first_page_url: &str,
        next_link: Option<&str>,
    ) -> AzureResult<ArmResponse<T>> {
        let url = match next_link {
            Some(link) if !link.is_empty() => link,
            _ => first_page_url,
        };
        let response = self.send(reqwest::Method::GET, url, None).await?;
        Ok(response.json().await?)
    }

    /// Drains every page of an ARM listing.
    async fn list_all<T: DeserializeOwned>(&self, first_page_url: &str) -> AzureResult<Vec<T>> {
        let mut items = Vec::new();
        let mut next_link: Option<String> = None;
        loop {
            let page: ArmResponse<T> = self.list_page(first_page_url, next_link.as_deref()).await?;
            items.extend(page.value);
            match page.next_link {
                Some(link) if !link.is_empty() => next_link = Some(link),
                _ => return Ok(items),
            }
        }
    }

    /// First-page URL for the tenant's subscriptions.
    pub fn subscriptions_url(&self) -> String {
        self.list_url("/subscriptions", SUBSCRIPTIONS_API_VERSION)
    }

    #[instrument(skip(self))]
    pub async fn list_subscriptions_page(
        &self,
        next_link: Option<&str>,
    ) -> AzureResult<ArmResponse<Subscription>> {
        self.list_page(&self.subscriptions_url(), next_link).await
    }

    /// First-page URL for one subscription's resource groups.
    pub fn resource_groups_url(&self, subscription_id: &str) -> String {
        self.list_url(
            &format!("/subscriptions/{subscription_id}/resourcegroups"),
            RESOURCE_GROUPS_API_VERSION,
        )
    }

    #[instrument(skip(self))]
    pub async fn list_resource_groups_page(
        &self,
        subscription_id: &str,
        next_link: Option<&str>,
    ) -> AzureResult<ArmResponse<ResourceGroup>> {
        self.list_page(&self.resource_groups_url(subscription_id), next_link)
            .await
    }

    /// First-page URL for one subscription's role definitions.
    pub fn role_definitions_url(&self, subscription_id: &str) -> String {
        self.list_url(
            &format!(
                "/subscriptions/{subscription_id}/providers/Microsoft.Authorization/roleDefinitions"
            ),
            AUTHORIZATION_API_VERSION,
        )
    }

    #[instrument(skip(self))]
    pub async fn list_role_definitions_page(
        &self,
        subscription_id: &str,
        next_link: Option<&str>,
    ) -> AzureResult<ArmResponse<RoleDefinition>> {
        self.list_page(&self.role_definitions_url(subscription_id), next_link)
            .await
    }

    /// One role definition by its full ARM id.
    #[instrument(skip(self))]
    pub async fn get_role_definition(&self, role_definition_id: &str) -> AzureResult<RoleDefinition> {
        let url = self.list_url(role_definition_id, AUTHORIZATION_API_VERSION);
        let response = self.send(reqwest::Method::GET, &url, None).await?;
        Ok(response.json().await?)
    }

    /// All role assignments visible at `scope` (a subscription, resource
    /// group or resource ARM id), across every page.
    #[instrument(skip(self))]
    pub async fn list_role_assignments(&self, scope: &str) -> AzureResult<Vec<RoleAssignment>> {
        let url = self.list_url(
            &format!("{scope}/providers/Microsoft.Authorization/roleAssignments"),
            AUTHORIZATION_API_VERSION,
        );
        self.list_all(&url).await
    }

    /// First-page URL for one subscription's storage accounts.
    pub fn storage_accounts_url(&self, subscription_id: &str) -> String {
        self.list_url(
            &format!(
                "/subscriptions/{subscription_id}/providers/Microsoft.Storage/storageAccounts"
            ),
            STORAGE_API_VERSION,
        )
    }

    #[instrument(skip(self))]
    pub async fn list_storage_accounts_page(
        &self,
        subscription_id: &str,
        next_link: Option<&str>,
    ) -> AzureResult<ArmResponse<StorageAccount>> {
        self.list_page(&self.storage_accounts_url(subscription_id), next_link)
            .await
    }

    /// First-page URL for one storage account's blob containers. The
    /// account is addressed by its full ARM id.
    pub fn containers_url(&self, storage_account_id: &str) -> String {
        self.list_url(
            &format!("{storage_account_id}/blobServices/default/containers"),
            STORAGE_API_VERSION,
        )
    }

    #[instrument(skip(self))]
    pub async fn list_containers_page(
        &self,
        storage_account_id: &str,
        next_link: Option<&str>,
    ) -> AzureResult<ArmResponse<BlobContainer>> {
        self.list_page(&self.containers_url(storage_account_id), next_link)
            .await
    }

    /// Creates a role assignment binding `principal_id` to `role_id` at
    /// `scope`. The assignment name must be unique; a fresh UUID is used.
    #[instrument(skip(self))]
    pub async fn create_role_assignment(
        &self,
        scope: &str,
        subscription_id: &str,
        role_id: &str,
        principal_id: &str,
    ) -> AzureResult<RoleAssignment> {
        let assignment_name = Uuid::new_v4();
        let url = self.list_url(
            &format!("{scope}/providers/Microsoft.Authorization/roleAssignments/{assignment_name}"),
            AUTHORIZATION_API_VERSION,
        );
        let role_definition_id = format!(
            "/subscriptions/{subscription_id}/providers/Microsoft.Authorization/roleDefinitions/{role_id}"
        );
        let body = json!({
            "properties": {
                "roleDefinitionId": role_definition_id,
                "principalId": principal_id,
            }
        });

        let response = self.send(reqwest::Method::PUT, &url, Some(&body)).await?;
        let assignment: RoleAssignment = response.json().await?;
        info!(scope, role_id, principal_id, assignment = %assignment.name, "role assignment created");
        Ok(assignment)
    }

    /// Deletes a role assignment by its name at `scope`.
    #[instrument(skip(self))]
    pub async fn delete_role_assignment(&self, scope: &str, assignment_name: &str) -> AzureResult<()> {
        let url = self.list_url(
            &format!("{scope}/providers/Microsoft.Authorization/roleAssignments/{assignment_name}"),
            AUTHORIZATION_API_VERSION,
        );
        self.send(reqwest::Method::DELETE, &url, None).await?;
        info!(scope, assignment_name, "role assignment deleted");
        Ok(())
    }

    async fn send(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> AzureResult<reqwest::Response> {
        let token = self.token_cache.get_token(&self.scope).await?;

        let mut request = self.http_client.request(method, url).bearer_auth(&token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            // A rejected token is stale; drop it so the next call
            // re-authenticates instead of replaying it.
            self.token_cache.invalidate().await;
        }

        Err(error_from_response(status, response, ApiSurface::Arm).await)
    }
}
