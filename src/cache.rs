//! Per-sync memoization of expensive single-object lookups.
//!
//! Both caches commit only on producer success: a failed build leaves the
//! key absent so the next call retries the full build instead of trusting
//! a partial value.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{AzureError, AzureResult};
use crate::model::RoleAssignment;

/// Generic async memo cache keyed by object id. The lock is held across
/// the producer so concurrent callers for the same sync single-flight
/// instead of racing duplicate upstream calls.
#[derive(Debug)]
pub struct SyncCache<K, V> {
    entries: Mutex<HashMap<K, V>>,
}

impl<K, V> Default for SyncCache<K, V> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> SyncCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached value for `key`, running `producer` on a miss.
    /// A producer error propagates unchanged and nothing is stored.
    pub async fn get_or_set<F, Fut>(&self, key: K, producer: F) -> AzureResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AzureResult<V>>,
    {
        let mut entries = self.entries.lock().await;
        if let Some(value) = entries.get(&key) {
            return Ok(value.clone());
        }

        let value = producer().await?;
        entries.insert(key, value.clone());
        Ok(value)
    }

    /// Cached value for `key`, if already built.
    pub async fn get(&self, key: &K) -> Option<V> {
        self.entries.lock().await.get(key).cloned()
    }
}

/// All role assignments of one subscription, grouped by the trailing
/// role-definition id.
pub type AssignmentsByRole = Arc<HashMap<String, Vec<RoleAssignment>>>;

/// Per-subscription role-assignment index. Built by draining the full
/// upstream pager once per subscription per sync; a mid-drain failure
/// discards the partial map.
#[derive(Debug, Default)]
pub struct RoleAssignmentIndex {
    cache: SyncCache<String, AssignmentsByRole>,
}

impl RoleAssignmentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the index for `subscription_id`, building it with `drain`
    /// on first use. `drain` must produce the complete assignment list for
    /// the subscription, not one page.
    pub async fn for_subscription<F, Fut>(
        &self,
        subscription_id: &str,
        drain: F,
    ) -> AzureResult<AssignmentsByRole>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AzureResult<Vec<RoleAssignment>>>,
    {
        self.cache
            .get_or_set(subscription_id.to_string(), || async {
                let assignments = drain().await.map_err(|err| match err {
                    transient if transient.is_transient() => transient,
                    other => AzureError::CacheBuild {
                        key: subscription_id.to_string(),
                        message: other.to_string(),
                    },
                })?;

                let mut by_role: HashMap<String, Vec<RoleAssignment>> = HashMap::new();
                for assignment in assignments {
                    match assignment.properties.role_id() {
                        Some(role_id) => {
                            by_role.entry(role_id.to_string()).or_default().push(assignment);
                        }
                        None => {
                            debug!(
                                assignment = %assignment.name,
                                "skipping assignment with unparsable role definition id"
                            );
                        }
                    }
                }
                Ok(Arc::new(by_role))
            })
            .await
    }

    /// Assignments held against one role in the given subscription, after
    /// the index was built with [`RoleAssignmentIndex::for_subscription`].
    pub async fn assignments_for_role(
        &self,
        subscription_id: &str,
        role_id: &str,
    ) -> Option<Vec<RoleAssignment>> {
        let index = self.cache.get(&subscription_id.to_string()).await?;
        index.get(role_id).cloned()
    }
}
