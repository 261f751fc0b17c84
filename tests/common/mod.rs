//! Shared helpers for integration tests.

use std::sync::Arc;

use azure_infra_connector::{ArmClient, AzureConfig, AzureCredentials, GraphClient, TokenCache};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const TEST_TENANT: &str = "test-tenant";

pub fn test_credentials() -> AzureCredentials {
    AzureCredentials {
        client_id: "test-client".to_string(),
        client_secret: "test-secret".to_string().into(),
    }
}

/// Mounts the client-credentials token endpoint on the mock server.
pub async fn mount_token_endpoint(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path(format!("/{TEST_TENANT}/oauth2/v2.0/token")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "test-token",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .mount(server)
        .await;
}

pub fn test_config(server: &MockServer) -> AzureConfig {
    AzureConfig::builder()
        .tenant_id(TEST_TENANT)
        .login_endpoint(server.uri())
        .graph_endpoint(server.uri())
        .arm_endpoint(server.uri())
        .build()
        .unwrap()
}

pub fn graph_client(server: &MockServer) -> Arc<GraphClient> {
    let config = test_config(server);
    let token_cache = Arc::new(TokenCache::new(
        test_credentials(),
        TEST_TENANT,
        server.uri(),
    ));
    Arc::new(GraphClient::new(token_cache, server.uri(), config.graph_scope()).unwrap())
}

pub fn arm_client(server: &MockServer) -> Arc<ArmClient> {
    let config = test_config(server);
    let token_cache = Arc::new(TokenCache::new(
        test_credentials(),
        TEST_TENANT,
        server.uri(),
    ));
    Arc::new(ArmClient::new(token_cache, server.uri(), config.arm_scope()).unwrap())
}

/// OData list envelope with an optional continuation.
pub fn odata_page(value: Vec<Value>, next_link: Option<&str>) -> Value {
    match next_link {
        Some(link) => json!({ "value": value, "@odata.nextLink": link }),
        None => json!({ "value": value }),
    }
}

/// Raw Graph membership record as returned by `owners`/`members` listings.
pub fn member_json(id: &str, odata_type: &str, sp_type: Option<&str>) -> Value {
    match sp_type {
        Some(sp_type) => json!({
            "id": id,
            "@odata.type": odata_type,
            "servicePrincipalType": sp_type
        }),
        None => json!({ "id": id, "@odata.type": odata_type }),
    }
}
