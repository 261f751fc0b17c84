//! Shared provisioning helpers for Graph `$ref` membership management.
//!
//! Provisioning is idempotent toward the desired end state: adding a
//! member that already exists and revoking one that is already gone are
//! both treated as success.

use serde_json::{json, Value};
use tracing::info;

use crate::error::{AzureError, AzureResult};
use crate::graph_client::GraphClient;

/// Request body for `$ref` additions, pointing at the principal's
/// directory object.
pub fn directory_object_ref(client: &GraphClient, object_id: &str) -> AzureResult<Value> {
    let object_url = client.query().build(&["directoryObjects", object_id])?;
    Ok(json!({ "@odata.id": object_url }))
}

/// Adds `object_id` to a relation (`groups/{id}/members`,
/// `servicePrincipals/{id}/owners`, …) via `$ref`. Duplicate additions
/// succeed.
pub async fn add_ref(
    client: &GraphClient,
    relation_path: &[&str],
    object_id: &str,
) -> AzureResult<()> {
    let mut path = relation_path.to_vec();
    path.push("$ref");
    let url = client.query().build(&path)?;
    let body = directory_object_ref(client, object_id)?;

    match client.post_no_content(&url, &body).await {
        Ok(()) => Ok(()),
        Err(AzureError::GraphApi { message, .. })
            if message.contains("added object references already exist") =>
        {
            info!(object_id, "membership already exists, treating as successful");
            Ok(())
        }
        Err(err) => Err(err),
    }
}

/// Removes `object_id` from a relation via `$ref`. Removing an absent
/// member succeeds: the end state is already achieved.
pub async fn remove_ref(
    client: &GraphClient,
    relation_path: &[&str],
    object_id: &str,
) -> AzureResult<()> {
    let mut path = relation_path.to_vec();
    path.push(object_id);
    path.push("$ref");
    let url = client.query().build(&path)?;

    match client.delete(&url).await {
        Ok(()) => Ok(()),
        Err(AzureError::NotFound(_)) => {
            info!(object_id, "membership to revoke not found, treating as successful");
            Ok(())
        }
        Err(err) => Err(err),
    }
}
