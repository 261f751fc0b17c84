//! OAuth2 client-credentials authentication.
//!
//! One confidential-client credential serves two audiences: Microsoft
//! Graph for directory data and Azure Resource Manager for the management
//! plane. Tokens are cached per scope and refreshed ahead of expiry.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use secrecy::ExposeSecret;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::config::AzureCredentials;
use crate::error::{AzureError, AzureResult};

/// OAuth2 token response from the Microsoft identity platform.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    /// True if the token is expired or will expire within the grace period.
    fn is_expired(&self, grace_period: Duration) -> bool {
        Utc::now() + grace_period >= self.expires_at
    }
}

/// Per-scope OAuth2 token cache.
#[derive(Debug)]
pub struct TokenCache {
    credentials: AzureCredentials,
    tenant_id: String,
    login_endpoint: String,
    http_client: reqwest::Client,
    tokens: Arc<RwLock<HashMap<String, CachedToken>>>,
    /// Grace period before expiry to trigger refresh (default: 5 minutes).
    grace_period: Duration,
}

impl TokenCache {
    pub fn new(
        credentials: AzureCredentials,
        tenant_id: impl Into<String>,
        login_endpoint: impl Into<String>,
    ) -> Self {
        Self {
            credentials,
            tenant_id: tenant_id.into(),
            login_endpoint: login_endpoint.into(),
            http_client: reqwest::Client::new(),
            tokens: Arc::new(RwLock::new(HashMap::new())),
            grace_period: Duration::minutes(5),
        }
    }

    /// Gets a valid access token for `scope` (e.g.
    /// `https://graph.microsoft.com/.default`), refreshing if necessary.
    #[instrument(skip(self), fields(tenant_id = %self.tenant_id))]
    pub async fn get_token(&self, scope: &str) -> AzureResult<String> {
        {
            let tokens = self.tokens.read().await;
            if let Some(token) = tokens.get(scope) {
                if !token.is_expired(self.grace_period) {
                    debug!("Using cached token");
                    return Ok(token.access_token.clone());
                }
            }
        }

        debug!("Refreshing access token");
        let new_token = self.acquire_token(scope).await?;
        let access_token = new_token.access_token.clone();

        {
            let mut tokens = self.tokens.write().await;
            tokens.insert(scope.to_string(), new_token);
        }

        Ok(access_token)
    }

    /// Acquires a new access token using the client-credentials flow.
    #[instrument(skip(self))]
    async fn acquire_token(&self, scope: &str) -> AzureResult<CachedToken> {
        let token_url = format!(
            "{}/{}/oauth2/v2.0/token",
            self.login_endpoint, self.tenant_id
        );

        let params = [
            ("grant_type", "client_credentials"),
            ("client_id", &self.credentials.client_id),
            (
                "client_secret",
                self.credentials.client_secret.expose_secret(),
            ),
            ("scope", scope),
        ];

        let response = self
            .http_client
            .post(&token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| AzureError::Auth(format!("Token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AzureError::Auth(format!(
                "Token request failed with status {status}: {body}"
            )));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| AzureError::Auth(format!("Failed to parse token response: {e}")))?;

        let expires_at = Utc::now() + Duration::seconds(token_response.expires_in);
        debug!(%expires_at, "Acquired new token");

        Ok(CachedToken {
            access_token: token_response.access_token,
            expires_at,
        })
    }

    /// Invalidates all cached tokens, forcing a refresh on next use.
    pub async fn invalidate(&self) {
        let mut tokens = self.tokens.write().await;
        tokens.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cached_token_expiry_respects_grace() {
        let token = CachedToken {
            access_token: "test".to_string(),
            expires_at: Utc::now() + Duration::minutes(10),
        };

        assert!(!token.is_expired(Duration::minutes(5)));
        assert!(token.is_expired(Duration::minutes(15)));
    }

    #[test]
    fn already_expired_token_is_expired_without_grace() {
        let token = CachedToken {
            access_token: "test".to_string(),
            expires_at: Utc::now() - Duration::minutes(1),
        };

        assert!(token.is_expired(Duration::minutes(0)));
    }
}
