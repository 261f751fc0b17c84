//! Transport-level integration tests against a mock Microsoft API.
//!
//! Covers token acquisition and reuse, the error taxonomy mapping for both
//! API surfaces, OData/ARM pagination envelopes and the multi-phase group
//! grants walk end to end over HTTP.

mod common;

use common::*;
use serde_json::{json, Value};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use azure_infra_connector::{
    AzureError, Entitlement, EntitlementPurpose, GrantPolicy, GroupsBuilder, PrincipalKind,
    Resource, ResourceGroupsBuilder, ResourceKind, ResourceSyncer, SubscriptionsBuilder,
    TenantBuilder,
};
use std::sync::Arc;

#[tokio::test]
async fn bearer_token_is_acquired_once_and_reused() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!("/{TEST_TENANT}/oauth2/v2.0/token")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "test-token",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v1.0/users"))
        .and(header("Authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(odata_page(vec![], None)))
        .expect(2)
        .mount(&server)
        .await;

    let graph = graph_client(&server);
    let url = graph.query().build(&["users"]).unwrap();
    graph.get_list::<Value>(&url).await.unwrap();
    graph.get_list::<Value>(&url).await.unwrap();
}

#[tokio::test]
async fn graph_requests_carry_eventual_consistency_header() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    Mock::given(method("GET"))
        .and(path("/v1.0/groups"))
        .and(header("ConsistencyLevel", "eventual"))
        .respond_with(ResponseTemplate::new(200).set_body_json(odata_page(vec![], None)))
        .mount(&server)
        .await;

    let graph = graph_client(&server);
    let url = graph.query().count().build(&["groups"]).unwrap();
    graph.get_list::<Value>(&url).await.unwrap();
}

#[tokio::test]
async fn status_codes_map_to_typed_errors() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    Mock::given(method("GET"))
        .and(path("/v1.0/users/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/users/forbidden"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let graph = graph_client(&server);

    let url = graph.query().build(&["users", "missing"]).unwrap();
    let err = graph.get::<Value>(&url).await.unwrap_err();
    assert!(matches!(err, AzureError::NotFound(_)));

    let url = graph.query().build(&["users", "forbidden"]).unwrap();
    let err = graph.get::<Value>(&url).await.unwrap_err();
    assert!(matches!(err, AzureError::Unauthorized(_)));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn throttling_surfaces_retry_after() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    Mock::given(method("GET"))
        .and(path("/v1.0/throttled"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/throttled-no-header"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let graph = graph_client(&server);

    let url = graph.query().build(&["throttled"]).unwrap();
    let err = graph.get::<Value>(&url).await.unwrap_err();
    assert!(matches!(err, AzureError::RateLimited { retry_after_secs: 7 }));
    assert!(err.is_transient());

    let url = graph.query().build(&["throttled-no-header"]).unwrap();
    let err = graph.get::<Value>(&url).await.unwrap_err();
    assert!(matches!(err, AzureError::RateLimited { retry_after_secs: 30 }));
}

#[tokio::test]
async fn structured_error_bodies_keep_their_api_surface() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    let error_body = json!({
        "error": { "code": "Request_BadRequest", "message": "Invalid filter clause." }
    });
    Mock::given(method("GET"))
        .and(path("/v1.0/users"))
        .respond_with(ResponseTemplate::new(400).set_body_json(error_body.clone()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/subscriptions"))
        .respond_with(ResponseTemplate::new(400).set_body_json(error_body))
        .mount(&server)
        .await;

    let graph = graph_client(&server);
    let url = graph.query().build(&["users"]).unwrap();
    match graph.get::<Value>(&url).await.unwrap_err() {
        AzureError::GraphApi { code, message } => {
            assert_eq!(code, "Request_BadRequest");
            assert_eq!(message, "Invalid filter clause.");
        }
        other => panic!("expected GraphApi error, got {other:?}"),
    }

    let arm = arm_client(&server);
    let err = arm.list_subscriptions_page(None).await.unwrap_err();
    assert!(matches!(err, AzureError::ArmApi { .. }));
}

#[tokio::test]
async fn arm_listing_resumes_from_next_link() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    let next_link = format!("{}/subscriptions?api-version=2022-12-01&page=2", server.uri());
    Mock::given(method("GET"))
        .and(path("/subscriptions"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{ "id": "/subscriptions/s2", "subscriptionId": "s2" }]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/subscriptions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{ "id": "/subscriptions/s1", "subscriptionId": "s1" }],
            "nextLink": next_link
        })))
        .mount(&server)
        .await;

    let arm = arm_client(&server);

    let first = arm.list_subscriptions_page(None).await.unwrap();
    assert_eq!(first.value[0].subscription_id, "s1");
    let link = first.next_link.unwrap();

    let second = arm.list_subscriptions_page(Some(&link)).await.unwrap();
    assert_eq!(second.value[0].subscription_id, "s2");
    assert!(second.next_link.is_none());
}

#[tokio::test]
async fn group_grants_walk_owners_then_members_over_http() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    Mock::given(method("GET"))
        .and(path("/beta/groups/g1/owners"))
        .respond_with(ResponseTemplate::new(200).set_body_json(odata_page(
            vec![member_json("owner-1", "#microsoft.graph.user", None)],
            None,
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/beta/groups/g1/members"))
        .respond_with(ResponseTemplate::new(200).set_body_json(odata_page(
            vec![
                member_json("user-1", "#microsoft.graph.user", None),
                member_json("nested-group", "#microsoft.graph.group", None),
                member_json("idp-1", "#microsoft.graph.servicePrincipal", Some("SocialIdp")),
            ],
            None,
        )))
        .mount(&server)
        .await;

    let builder = GroupsBuilder::new(
        graph_client(&server),
        test_config(&server),
        Arc::new(GrantPolicy::new()),
    );
    let group = Resource::new(ResourceKind::Group, "g1", "Engineering");

    // First call lands on the owners phase.
    let owners = builder.grants(&group, "").await.unwrap();
    assert_eq!(owners.grants.len(), 1);
    assert_eq!(owners.grants[0].entitlement_id, "group:g1:owners");
    assert_eq!(owners.grants[0].principal_id, "owner-1");
    assert!(!owners.next_cursor.is_empty());

    // Second call advances to members; the SocialIdp record is dropped and
    // the nested group becomes an expandable grant.
    let members = builder.grants(&group, &owners.next_cursor).await.unwrap();
    assert_eq!(members.grants.len(), 2);
    assert_eq!(members.grants[0].principal_kind, PrincipalKind::User);
    assert_eq!(members.grants[1].principal_kind, PrincipalKind::Group);
    let hint = members.grants[1].expansion.clone().unwrap();
    assert_eq!(hint.entitlement_ids, vec!["group:nested-group:members".to_string()]);
    assert!(members.next_cursor.is_empty());
}

#[tokio::test]
async fn deleted_group_mid_enumeration_skips_phase() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    Mock::given(method("GET"))
        .and(path("/beta/groups/gone/owners"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/beta/groups/gone/members"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let builder = GroupsBuilder::new(
        graph_client(&server),
        test_config(&server),
        Arc::new(GrantPolicy::new()),
    );
    let group = Resource::new(ResourceKind::Group, "gone", "Deleted");

    let mut cursor = String::new();
    for _ in 0..2 {
        let page = builder.grants(&group, &cursor).await.unwrap();
        assert!(page.grants.is_empty());
        cursor = page.next_cursor;
    }
    assert!(cursor.is_empty());
}

#[tokio::test]
async fn duplicate_member_add_and_missing_member_revoke_succeed() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    Mock::given(method("POST"))
        .and(path("/v1.0/groups/g1/members/$ref"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "code": "Request_BadRequest",
                "message": "One or more added object references already exist for the following modified properties: 'members'."
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1.0/groups/g1/members/u1/$ref"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let builder = GroupsBuilder::new(
        graph_client(&server),
        test_config(&server),
        Arc::new(GrantPolicy::new()),
    );
    let group = Resource::new(ResourceKind::Group, "g1", "Engineering");
    let members = Entitlement::new(&group, "members", EntitlementPurpose::Assignment, "Members");

    builder.grant(&members, ResourceKind::User, "u1").await.unwrap();
    builder.revoke(&members, ResourceKind::User, "u1").await.unwrap();
}

#[tokio::test]
async fn rejected_token_is_discarded_and_reacquired() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!("/{TEST_TENANT}/oauth2/v2.0/token")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "test-token",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .expect(2)
        .mount(&server)
        .await;

    // First request is rejected; the cached token must not be replayed.
    Mock::given(method("GET"))
        .and(path("/v1.0/users"))
        .respond_with(ResponseTemplate::new(401))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1.0/users"))
        .respond_with(ResponseTemplate::new(200).set_body_json(odata_page(vec![], None)))
        .mount(&server)
        .await;

    let graph = graph_client(&server);
    let url = graph.query().build(&["users"]).unwrap();

    let err = graph.get_list::<Value>(&url).await.unwrap_err();
    assert!(matches!(err, AzureError::Unauthorized(_)));

    graph.get_list::<Value>(&url).await.unwrap();
}

#[tokio::test]
async fn subscription_and_resource_group_grants_come_from_role_assignments() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    let assignment = json!({
        "id": "/subscriptions/abc/providers/Microsoft.Authorization/roleAssignments/ra1",
        "name": "ra1",
        "properties": {
            "principalId": "user-1",
            "roleDefinitionId": "/subscriptions/abc/providers/Microsoft.Authorization/roleDefinitions/xyz"
        }
    });
    Mock::given(method("GET"))
        .and(path("/subscriptions/abc/providers/Microsoft.Authorization/roleAssignments"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "value": [assignment.clone()] })),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(
            "/subscriptions/abc/resourceGroups/rg1/providers/Microsoft.Authorization/roleAssignments",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": [assignment] })))
        .mount(&server)
        .await;

    let arm = arm_client(&server);
    let policy = Arc::new(GrantPolicy::new());

    let subscriptions = SubscriptionsBuilder::new(Arc::clone(&arm), Arc::clone(&policy), true);
    let subscription = Resource::new(ResourceKind::Subscription, "abc", "Production");

    let entitlements = subscriptions.entitlements(&subscription).await.unwrap();
    assert_eq!(entitlements.len(), 1);
    assert_eq!(entitlements[0].slug, "assignment");

    let page = subscriptions.grants(&subscription, "").await.unwrap();
    assert_eq!(page.grants.len(), 1);
    assert_eq!(page.grants[0].entitlement_id, "assignment");
    assert_eq!(page.grants[0].principal_kind, PrincipalKind::Role);
    assert_eq!(page.grants[0].principal_id, "xyz:abc");
    assert!(page.next_cursor.is_empty());

    let resource_groups = ResourceGroupsBuilder::new(arm, policy, true);
    let group = Resource::new(
        ResourceKind::ResourceGroup,
        "/subscriptions/abc/resourceGroups/rg1",
        "rg1",
    )
    .with_parent(ResourceKind::Subscription, "abc");

    assert!(!resource_groups.entitlements(&group).await.unwrap().is_empty());
    let page = resource_groups.grants(&group, "").await.unwrap();
    assert_eq!(page.grants.len(), 1);
    assert_eq!(page.grants[0].principal_id, "xyz:abc");
    assert!(page.next_cursor.is_empty());
}

#[tokio::test]
async fn tenant_listing_maps_organizations() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    Mock::given(method("GET"))
        .and(path("/v1.0/organization"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{ "id": "org-1", "displayName": "Contoso" }]
        })))
        .mount(&server)
        .await;

    let builder = TenantBuilder::new(graph_client(&server));

    let page = builder.list(None, "").await.unwrap();
    assert_eq!(page.resources.len(), 1);
    assert_eq!(page.resources[0].kind, ResourceKind::Tenant);
    assert_eq!(page.resources[0].id, "org-1");
    assert_eq!(page.resources[0].display_name, "Contoso");
    assert!(page.next_cursor.is_empty());

    let tenant = page.resources.into_iter().next().unwrap();
    assert!(builder.entitlements(&tenant).await.unwrap().is_empty());
    assert!(builder.grants(&tenant, "").await.unwrap().grants.is_empty());
}

#[tokio::test]
async fn provisioning_rejects_non_user_principals() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server).await;

    let builder = GroupsBuilder::new(
        graph_client(&server),
        test_config(&server),
        Arc::new(GrantPolicy::new()),
    );
    let group = Resource::new(ResourceKind::Group, "g1", "Engineering");
    let members = Entitlement::new(&group, "members", EntitlementPurpose::Assignment, "Members");

    let err = builder
        .grant(&members, ResourceKind::Group, "g2")
        .await
        .unwrap_err();
    assert!(matches!(err, AzureError::Provisioning(_)));
}
