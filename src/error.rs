//! Error types for the Azure infrastructure connector.

use thiserror::Error;

/// Result type alias using `AzureError`.
pub type AzureResult<T> = Result<T, AzureError>;

/// Errors that can occur when talking to Microsoft Graph or Azure Resource Manager.
#[derive(Debug, Error)]
pub enum AzureError {
    /// Configuration validation error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// `OAuth2` authentication error.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The caller supplied a page cursor this connector cannot parse.
    /// The resource's pagination must be restarted from an empty cursor.
    #[error("Malformed page cursor: {0}")]
    MalformedCursor(String),

    /// Upstream object does not exist (HTTP 404).
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Upstream throttled the request (HTTP 429/504). The connector never
    /// sleeps or retries itself; the hosting sync engine owns retry policy.
    #[error("Rate limited, retry after {retry_after_secs} seconds")]
    RateLimited { retry_after_secs: u64 },

    /// Credentials were rejected or lack permission (HTTP 401/403).
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Microsoft Graph `OData` error response.
    #[error("Graph API error: {code} - {message}")]
    GraphApi { code: String, message: String },

    /// Azure Resource Manager error response.
    #[error("ARM API error: {code} - {message}")]
    ArmApi { code: String, message: String },

    /// Upstream returned a record this connector cannot translate, where
    /// dropping it would corrupt downstream authorization decisions
    /// (for example an unsplittable role-definition id). Aborts the page.
    #[error("Malformed upstream record: {0}")]
    MalformedRecord(String),

    /// A cache producer failed partway; the partial value was discarded.
    #[error("Cache build failed for {key}: {message}")]
    CacheBuild { key: String, message: String },

    /// Provisioning operation error.
    #[error("Provisioning error: {0}")]
    Provisioning(String),

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error.
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

impl AzureError {
    /// True for errors caused by temporary upstream conditions; the hosting
    /// sync engine may retry these after the suggested delay.
    pub fn is_transient(&self) -> bool {
        matches!(self, AzureError::RateLimited { .. } | AzureError::Http(_))
    }
}
