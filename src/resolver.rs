//! Principal type resolution for bare object ids.
//!
//! ARM role assignments carry a principal id with no type information.
//! The resolver probes a fixed sequence of Graph endpoints, one request
//! each with no internal retry, and takes the first recognized
//! `@odata.type` discriminator. Service principals are further split on
//! `servicePrincipalType`. Ids that resolve nowhere yield
//! [`ResolvedPrincipal::Unknown`]; callers skip those grants rather than
//! fail the sync.

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};

use crate::error::{AzureError, AzureResult};
use crate::grants::PrincipalKind;
use crate::model::{
    ODATA_TYPE_GROUP, ODATA_TYPE_SERVICE_PRINCIPAL, ODATA_TYPE_USER, SP_TYPE_APPLICATION,
    SP_TYPE_MANAGED_IDENTITY,
};

/// Probe order. `directoryObjects` usually answers with the concrete
/// subtype directly; the typed endpoints are fallbacks for tenants where
/// the generic endpoint is restricted.
const PROBE_ENDPOINTS: [&str; 4] = ["directoryObjects", "users", "groups", "servicePrincipals"];

/// Single-object directory fetch, implemented by the Graph transport.
#[async_trait]
pub trait DirectoryLookup: Send + Sync {
    /// GET `{endpoint}/{object_id}` and return the raw JSON object.
    async fn fetch_object(&self, endpoint: &str, object_id: &str) -> AzureResult<Value>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedPrincipal {
    User,
    Group,
    EnterpriseApplication,
    ManagedIdentity,
    /// Nothing answered with a recognized discriminator, or the service
    /// principal's sub-type carries no governable identity.
    Unknown,
}

impl ResolvedPrincipal {
    pub fn principal_kind(self) -> Option<PrincipalKind> {
        match self {
            ResolvedPrincipal::User => Some(PrincipalKind::User),
            ResolvedPrincipal::Group => Some(PrincipalKind::Group),
            ResolvedPrincipal::EnterpriseApplication => Some(PrincipalKind::EnterpriseApplication),
            ResolvedPrincipal::ManagedIdentity => Some(PrincipalKind::ManagedIdentity),
            ResolvedPrincipal::Unknown => None,
        }
    }
}

pub struct PrincipalTypeResolver<L> {
    lookup: L,
}

impl<L: DirectoryLookup> PrincipalTypeResolver<L> {
    pub fn new(lookup: L) -> Self {
        Self { lookup }
    }

    /// Resolves one bare object id.
    ///
    /// `NotFound` from a probe moves on to the next endpoint; any other
    /// upstream error propagates unchanged so the hosting engine can
    /// apply its retry policy.
    #[instrument(skip(self))]
    pub async fn resolve(&self, object_id: &str) -> AzureResult<ResolvedPrincipal> {
        for endpoint in PROBE_ENDPOINTS {
            let object = match self.lookup.fetch_object(endpoint, object_id).await {
                Ok(object) => object,
                Err(AzureError::NotFound(_)) => continue,
                Err(err) => return Err(err),
            };

            let Some(odata_type) = object.get("@odata.type").and_then(Value::as_str) else {
                continue;
            };

            match odata_type {
                ODATA_TYPE_USER => return Ok(ResolvedPrincipal::User),
                ODATA_TYPE_GROUP => return Ok(ResolvedPrincipal::Group),
                ODATA_TYPE_SERVICE_PRINCIPAL => {
                    let sp_type = object
                        .get("servicePrincipalType")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    return Ok(match sp_type {
                        SP_TYPE_APPLICATION => ResolvedPrincipal::EnterpriseApplication,
                        SP_TYPE_MANAGED_IDENTITY => ResolvedPrincipal::ManagedIdentity,
                        other => {
                            debug!(object_id, sp_type = other, "unsupported service principal sub-type");
                            ResolvedPrincipal::Unknown
                        }
                    });
                }
                other => {
                    debug!(object_id, endpoint, odata_type = other, "unrecognized discriminator");
                }
            }
        }

        Ok(ResolvedPrincipal::Unknown)
    }
}
