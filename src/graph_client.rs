//! Microsoft Graph HTTP transport.
//!
//! One bounded request per call: rate-limit and transient upstream
//! failures surface as typed errors with the server-suggested delay, and
//! the hosting sync engine owns retry policy.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::auth::TokenCache;
use crate::error::{AzureError, AzureResult};
use crate::query::GraphQuery;
use crate::resolver::DirectoryLookup;

/// Fallback retry delay when a throttling response omits `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 30;

/// `OData` error response from Microsoft Graph.
#[derive(Debug, Deserialize)]
pub struct ODataError {
    pub error: ODataErrorBody,
}

#[derive(Debug, Deserialize)]
pub struct ODataErrorBody {
    pub code: String,
    pub message: String,
}

/// Paginated Graph list envelope.
#[derive(Debug, Deserialize)]
pub struct ODataResponse<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

/// Microsoft Graph API client.
#[derive(Debug)]
pub struct GraphClient {
    http_client: reqwest::Client,
    token_cache: Arc<TokenCache>,
    endpoint: String,
    scope: String,
}

impl GraphClient {
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

    /// Query builder rooted at this client's endpoint.
    pub fn query(&self) -> GraphQuery {
        GraphQuery::new(self.endpoint.clone())
    }

    /// GET returning a deserialized body.
    #[instrument(skip(self))]
    pub async fn get<T: DeserializeOwned>(&self, url: &str) -> AzureResult<T> {
        let response = self.send(reqwest::Method::GET, url, None).await?;
        Ok(response.json().await?)
    }

    /// GET a paginated listing.
    pub async fn get_list<T: DeserializeOwned>(&self, url: &str) -> AzureResult<ODataResponse<T>> {
        self.get(url).await
    }

    /// POST returning a deserialized body.
    #[instrument(skip(self, body))]
    pub async fn post<T: DeserializeOwned>(&self, url: &str, body: &Value) -> AzureResult<T> {
        let response = self.send(reqwest::Method::POST, url, Some(body)).await?;
        Ok(response.json().await?)
    }

    /// POST where the expected success response has no body (`$ref`
    /// additions answer 204).
    #[instrument(skip(self, body))]
    pub async fn post_no_content(&self, url: &str, body: &Value) -> AzureResult<()> {
        self.send(reqwest::Method::POST, url, Some(body)).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, url: &str) -> AzureResult<()> {
        self.send(reqwest::Method::DELETE, url, None).await?;
        Ok(())
    }

    async fn send(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<&Value>,
    ) -> AzureResult<reqwest::Response> {
        let token = self.token_cache.get_token(&self.scope).await?;

        let mut request = self
            .http_client
            .request(method, url)
            .bearer_auth(&token)
            // Required for advanced queries ($count, filtered membership).
            .header("ConsistencyLevel", "eventual");
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

        Err(error_from_response(status, response, ApiSurface::Graph).await)
    }
}

/// Which upstream API produced an error response.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ApiSurface {
    Graph,
    Arm,
}

/// Maps a non-success HTTP response onto the error taxonomy. Shared with
/// the ARM transport, whose error body has the same `{code, message}`
/// shape under `error`.
pub(crate) async fn error_from_response(
    status: reqwest::StatusCode,
    response: reqwest::Response,
    surface: ApiSurface,
) -> AzureError {
    use reqwest::StatusCode;

    let url = response.url().to_string();
    match status {
        StatusCode::NOT_FOUND => AzureError::NotFound(url),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => AzureError::Unauthorized(url),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::GATEWAY_TIMEOUT => {
            let retry_after_secs = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            AzureError::RateLimited { retry_after_secs }
        }
        _ => {
            let body = response.text().await.unwrap_or_default();
            let (code, message) = match serde_json::from_str::<ODataError>(&body) {
                Ok(odata) => (odata.error.code, odata.error.message),
                Err(_) => {
                    debug!(%status, %url, "unstructured error response");
                    (status.to_string(), body)
                }
            };
            match surface {
                ApiSurface::Graph => AzureError::GraphApi { code, message },
                ApiSurface::Arm => AzureError::ArmApi { code, message },
            }
        }
    }
}

#[async_trait]
impl DirectoryLookup for GraphClient {
    async fn fetch_object(&self, endpoint: &str, object_id: &str) -> AzureResult<Value> {
        let url = self.query().build(&[endpoint, object_id])?;
        self.get(&url).await
    }
}

#[async_trait]
impl DirectoryLookup for Arc<GraphClient> {
    async fn fetch_object(&self, endpoint: &str, object_id: &str) -> AzureResult<Value> {
        self.as_ref().fetch_object(endpoint, object_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn odata_list_envelope_parses_next_link() {
        let response: ODataResponse<Value> = serde_json::from_str(
            r#"{"value":[{"id":"1"}],"@odata.nextLink":"https://graph.microsoft.com/v1.0/groups?$skiptoken=x"}"#,
        )
        .unwrap();
        assert_eq!(response.value.len(), 1);
        assert!(response.next_link.is_some());
    }

    #[test]
    fn odata_error_body_parses() {
        let err: ODataError = serde_json::from_str(
            r#"{"error":{"code":"Request_ResourceNotFound","message":"Resource does not exist."}}"#,
        )
        .unwrap();
        assert_eq!(err.error.code, "Request_ResourceNotFound");
    }
}
