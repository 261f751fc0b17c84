//! End-to-end grants enumeration over an in-memory directory: the
//! phase-stack orchestrator driving classification across owner and
//! member phases, resumable at any page boundary.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use azure_infra_connector::{
    AzureError, AzureResult, GrantPolicy, GrantsOrchestrator, Membership, PageCursor, PhasePage,
    PhaseSource, PhaseState, PrincipalKind, ResourceKind, RoleAssignment,
};

fn member(id: &str, odata_type: &str, sp_type: Option<&str>) -> Membership {
    serde_json::from_value(match sp_type {
        Some(sp_type) => json!({
            "id": id,
            "@odata.type": odata_type,
            "servicePrincipalType": sp_type
        }),
        None => json!({ "id": id, "@odata.type": odata_type }),
    })
    .unwrap()
}

fn user(id: &str) -> Membership {
    member(id, "#microsoft.graph.user", None)
}

/// In-memory owners/members directory for one group, paged like Graph:
/// each page is keyed by phase and continuation token, owners classified
/// strictly.
struct FakeDirectory {
    policy: Arc<GrantPolicy>,
    pages: HashMap<(String, String), (Vec<Membership>, Option<String>)>,
    calls: Mutex<Vec<PhaseState>>,
}

impl FakeDirectory {
    fn new(policy: Arc<GrantPolicy>) -> Self {
        Self {
            policy,
            pages: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn page(
        mut self,
        phase: &str,
        token: &str,
        records: Vec<Membership>,
        next_token: Option<&str>,
    ) -> Self {
        self.pages.insert(
            (phase.to_string(), token.to_string()),
            (records, next_token.map(Into::into)),
        );
        self
    }

    fn phases_fetched(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|p| p.phase.clone()).collect()
    }
}

#[async_trait]
impl PhaseSource for &FakeDirectory {
    async fn fetch(&self, phase: &PhaseState) -> AzureResult<PhasePage> {
        self.calls.lock().unwrap().push(phase.clone());

        let key = (phase.phase.clone(), phase.token.clone().unwrap_or_default());
        let (records, next_token) = self
            .pages
            .get(&key)
            .cloned()
            .ok_or_else(|| AzureError::NotFound(format!("no page for {key:?}")))?;

        let strict = phase.phase == "owners";
        let entitlement_id = format!("group:g1:{}", phase.phase);
        let mut grants = Vec::new();
        for record in &records {
            if let Some(grant) = self.policy.membership_grant(&entitlement_id, "g1", record, strict)? {
                grants.push(grant);
            }
        }

        Ok(PhasePage {
            grants,
            records_fetched: records.len(),
            next_token,
        })
    }
}

fn seed() -> Vec<PhaseState> {
    vec![PhaseState::new("owners"), PhaseState::new("members")]
}

#[tokio::test]
async fn owners_complete_before_members_with_mid_phase_resume() {
    let directory = FakeDirectory::new(Arc::new(GrantPolicy::new()))
        .page("owners", "", vec![user("o1"), user("o2")], None)
        .page("members", "", (0..60).map(|i| user(&format!("m{i}"))).collect(), Some("page2"))
        .page("members", "page2", (60..90).map(|i| user(&format!("m{i}"))).collect(), None);
    let orchestrator = GrantsOrchestrator::new(&directory);

    let mut cursor = String::new();
    let mut grants = Vec::new();
    loop {
        let page = orchestrator.next_page(&cursor, &seed()).await.unwrap();
        grants.extend(page.grants);
        if page.next_cursor.is_empty() {
            break;
        }
        cursor = page.next_cursor;
    }

    assert_eq!(directory.phases_fetched(), vec!["owners", "members", "members"]);
    assert_eq!(grants.len(), 92);
    assert!(grants[..2].iter().all(|g| g.entitlement_id == "group:g1:owners"));
    assert!(grants[2..].iter().all(|g| g.entitlement_id == "group:g1:members"));
}

#[tokio::test]
async fn mid_phase_cursor_is_a_stable_envelope() {
    let directory = FakeDirectory::new(Arc::new(GrantPolicy::new()))
        .page("owners", "", (0..60).map(|i| user(&format!("o{i}"))).collect(), Some("ownersPage2"));
    let orchestrator = GrantsOrchestrator::new(&directory);

    let page = orchestrator.next_page("", &seed()).await.unwrap();

    // The cursor decodes to both pending phases, the active one on top
    // carrying the upstream continuation.
    let cursor = PageCursor::decode(&page.next_cursor).unwrap();
    assert_eq!(cursor.len(), 2);
    let top = cursor.current_phase().unwrap();
    assert_eq!(top.phase, "owners");
    assert_eq!(top.token.as_deref(), Some("ownersPage2"));

    // Decode/encode round-trips byte-identically for storage.
    assert_eq!(cursor.encode().unwrap(), page.next_cursor);
}

#[tokio::test]
async fn unknown_record_type_aborts_owner_phase_only() {
    let device = member("d1", "#microsoft.graph.device", None);

    let strict = FakeDirectory::new(Arc::new(GrantPolicy::new())).page(
        "owners",
        "",
        vec![user("o1"), device.clone()],
        None,
    );
    let err = GrantsOrchestrator::new(&strict)
        .next_page("", &seed())
        .await
        .unwrap_err();
    assert!(matches!(err, AzureError::MalformedRecord(_)));

    // The identical record on the member phase is dropped, not fatal.
    let lenient = FakeDirectory::new(Arc::new(GrantPolicy::new()))
        .page("members", "", vec![user("m1"), device], None);
    let page = GrantsOrchestrator::new(&lenient)
        .next_page("", &[PhaseState::new("members")])
        .await
        .unwrap();
    assert_eq!(page.grants.len(), 1);
    assert!(page.next_cursor.is_empty());
}

#[tokio::test]
async fn nested_group_and_service_principal_classification() {
    let directory = FakeDirectory::new(Arc::new(GrantPolicy::new())).page(
        "members",
        "",
        vec![
            member("inner", "#microsoft.graph.group", None),
            member("app1", "#microsoft.graph.servicePrincipal", Some("Application")),
            member("mi1", "#microsoft.graph.servicePrincipal", Some("ManagedIdentity")),
            member("idp1", "#microsoft.graph.servicePrincipal", Some("SocialIdp")),
            member("legacy1", "#microsoft.graph.servicePrincipal", Some("Legacy")),
        ],
        None,
    );
    let page = GrantsOrchestrator::new(&directory)
        .next_page("", &[PhaseState::new("members")])
        .await
        .unwrap();

    let kinds: Vec<PrincipalKind> = page.grants.iter().map(|g| g.principal_kind).collect();
    assert_eq!(
        kinds,
        vec![
            PrincipalKind::Group,
            PrincipalKind::EnterpriseApplication,
            PrincipalKind::ManagedIdentity,
        ]
    );

    let nested = &page.grants[0];
    let hint = nested.expansion.clone().unwrap();
    assert!(!hint.shallow);
    assert_eq!(hint.entitlement_ids, vec!["group:inner:members".to_string()]);
}

#[tokio::test]
async fn role_assignment_grants_expand_shallowly_toward_the_role() {
    let policy = GrantPolicy::new();
    let assignment: RoleAssignment = serde_json::from_value(json!({
        "id": "/subscriptions/abc/providers/Microsoft.Authorization/roleAssignments/ra1",
        "name": "ra1",
        "properties": {
            "principalId": "user-1",
            "roleDefinitionId":
                "/subscriptions/abc/providers/Microsoft.Authorization/roleDefinitions/xyz"
        }
    }))
    .unwrap();

    let grant = policy.role_assignment_grant("abc", &assignment).unwrap();
    assert_eq!(grant.entitlement_id, "assignment");
    assert_eq!(grant.principal_kind, PrincipalKind::Role);
    assert_eq!(grant.principal_id, "xyz:abc");

    let hint = grant.expansion.unwrap();
    assert!(hint.shallow);
    assert_eq!(
        hint.entitlement_ids,
        vec!["role:xyz:abc:owners".to_string(), "role:xyz:abc:assigned".to_string()]
    );
    assert_eq!(hint.resource_kinds, vec![ResourceKind::Role]);
}
