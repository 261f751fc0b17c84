//! Connector configuration.

use secrecy::SecretString;

use crate::error::{AzureError, AzureResult};

/// Default upstream page size requested via `$top`.
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Confidential-client credentials for the client-credentials flow.
#[derive(Debug, Clone)]
pub struct AzureCredentials {
    pub client_id: String,
    pub client_secret: SecretString,
}

/// Connector configuration. Built with [`AzureConfig::builder`].
#[derive(Debug, Clone)]
pub struct AzureConfig {
    /// Entra tenant (directory) id.
    pub tenant_id: String,
    /// Microsoft identity platform login endpoint.
    pub login_endpoint: String,
    /// Microsoft Graph base endpoint (no version segment).
    pub graph_endpoint: String,
    /// Azure Resource Manager base endpoint.
    pub arm_endpoint: String,
    /// Page size requested from upstream listings.
    pub page_size: u32,
    /// Excludes on-premises-synced groups from group listings.
    pub skip_ad_groups: bool,
    /// Probes each user's mailbox settings to reclassify shared, room and
    /// equipment mailboxes as service accounts. One extra request per user.
    pub mailbox_settings: bool,
    /// Treats a grants phase-page of 50 or fewer records as exhausted
    /// even when upstream offers a continuation. Lossy optimization; see
    /// the orchestrator docs.
    pub small_page_short_circuit: bool,
}

impl AzureConfig {
    pub fn builder() -> AzureConfigBuilder {
        AzureConfigBuilder::default()
    }

    /// OAuth2 scope for Microsoft Graph.
    pub fn graph_scope(&self) -> String {
        format!("{}/.default", self.graph_endpoint)
    }

    /// OAuth2 scope for Azure Resource Manager.
    pub fn arm_scope(&self) -> String {
        format!("{}/.default", self.arm_endpoint)
    }
}

#[derive(Debug, Default)]
pub struct AzureConfigBuilder {
    tenant_id: Option<String>,
    login_endpoint: Option<String>,
    graph_endpoint: Option<String>,
    arm_endpoint: Option<String>,
    page_size: Option<u32>,
    skip_ad_groups: bool,
    mailbox_settings: bool,
    small_page_short_circuit: Option<bool>,
}

impl AzureConfigBuilder {
    #[must_use]
    pub fn tenant_id(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    #[must_use]
    pub fn login_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.login_endpoint = Some(endpoint.into());
        self
    }

    #[must_use]
    pub fn graph_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.graph_endpoint = Some(endpoint.into());
        self
    }

    #[must_use]
    pub fn arm_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.arm_endpoint = Some(endpoint.into());
        self
    }

    #[must_use]
    pub fn page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    #[must_use]
    pub fn skip_ad_groups(mut self, skip: bool) -> Self {
        self.skip_ad_groups = skip;
        self
    }

    #[must_use]
    pub fn mailbox_settings(mut self, enabled: bool) -> Self {
        self.mailbox_settings = enabled;
        self
    }

    #[must_use]
    pub fn small_page_short_circuit(mut self, enabled: bool) -> Self {
        self.small_page_short_circuit = Some(enabled);
        self
    }

    /// # Errors
    ///
    /// Returns [`AzureError::Config`] when the tenant id is missing or the
    /// page size is zero.
    pub fn build(self) -> AzureResult<AzureConfig> {
        let tenant_id = self
            .tenant_id
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AzureError::Config("tenant_id is required".into()))?;

        let page_size = self.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page_size == 0 {
            return Err(AzureError::Config("page_size must be greater than zero".into()));
        }

        Ok(AzureConfig {
            tenant_id,
            login_endpoint: self
                .login_endpoint
                .unwrap_or_else(|| "https://login.microsoftonline.com".into()),
            graph_endpoint: self
                .graph_endpoint
                .unwrap_or_else(|| "https://graph.microsoft.com".into()),
            arm_endpoint: self
                .arm_endpoint
                .unwrap_or_else(|| "https://management.azure.com".into()),
            page_size,
            skip_ad_groups: self.skip_ad_groups,
            mailbox_settings: self.mailbox_settings,
            small_page_short_circuit: self.small_page_short_circuit.unwrap_or(true),
        })
    }
}
