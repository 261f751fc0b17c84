//! Role-assignment access at an ARM scope.
//!
//! Subscriptions, resource groups and storage resources expose the same
//! `assignment` entitlement: holding any RBAC role assignment at that
//! scope. Each assignment becomes one expandable grant pointing at the
//! composite role resource, whose holders the caller resolves separately.

use async_trait::async_trait;

use crate::arm_client::ArmClient;
use crate::cursor::PhaseState;
use crate::error::{AzureError, AzureResult};
use crate::grants::GrantPolicy;
use crate::model::{Entitlement, EntitlementPurpose, Resource, ResourceKind};
use crate::orchestrator::{GrantsOrchestrator, GrantsPage, PhasePage, PhaseSource};

pub(crate) const PHASE_ASSIGNMENTS: &str = "assignments";

/// Extracts the owning subscription id from a full ARM resource id.
pub(crate) fn subscription_id_from_arm_id(arm_id: &str) -> AzureResult<&str> {
    let mut segments = arm_id.split('/');
    segments
        .by_ref()
        .find(|segment| *segment == "subscriptions")
        .and_then(|_| segments.next())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| {
            AzureError::MalformedRecord(format!(
                "cannot extract subscription id from ARM id {arm_id:?}"
            ))
        })
}

/// The expandable role-assignment entitlement every ARM scope exposes.
pub(crate) fn assignment_entitlement(resource: &Resource) -> Entitlement {
    Entitlement::new(
        resource,
        "assignment",
        EntitlementPurpose::Permission,
        format!("{} Role Assignment", resource.display_name),
    )
    .with_description(format!(
        "Holds an Azure RBAC role assignment on {}",
        resource.display_name
    ))
    .grantable_to(&[ResourceKind::Role])
}

/// One page of role-assignment grants at `scope`. The ARM listing is
/// drained in one pass, so there is never a continuation.
pub(crate) async fn assignment_grants_page(
    arm: &ArmClient,
    policy: &GrantPolicy,
    scope: &str,
    subscription_id: &str,
) -> AzureResult<PhasePage> {
    let assignments = arm.list_role_assignments(scope).await?;
    let records_fetched = assignments.len();

    let mut grants = Vec::with_capacity(records_fetched);
    for assignment in &assignments {
        grants.push(policy.role_assignment_grant(subscription_id, assignment)?);
    }

    Ok(PhasePage {
        grants,
        records_fetched,
        next_token: None,
    })
}

/// Single-phase source for kinds whose grants are exactly the scope's
/// role assignments.
struct AssignmentsSource<'a> {
    arm: &'a ArmClient,
    policy: &'a GrantPolicy,
    scope: &'a str,
    subscription_id: &'a str,
}

#[async_trait]
impl PhaseSource for AssignmentsSource<'_> {
    async fn fetch(&self, phase: &PhaseState) -> AzureResult<PhasePage> {
        match phase.phase.as_str() {
            PHASE_ASSIGNMENTS => {
                assignment_grants_page(self.arm, self.policy, self.scope, self.subscription_id)
                    .await
            }
            other => Err(AzureError::MalformedCursor(format!(
                "unknown scope grants phase {other:?}"
            ))),
        }
    }
}

pub(crate) async fn assignment_grants(
    arm: &ArmClient,
    policy: &GrantPolicy,
    scope: &str,
    subscription_id: &str,
    cursor: &str,
    small_page_short_circuit: bool,
) -> AzureResult<GrantsPage> {
    let source = AssignmentsSource {
        arm,
        policy,
        scope,
        subscription_id,
    };
    let orchestrator =
        GrantsOrchestrator::new(source).with_small_page_short_circuit(small_page_short_circuit);
    orchestrator
        .next_page(cursor, &[PhaseState::new(PHASE_ASSIGNMENTS)])
        .await
}
