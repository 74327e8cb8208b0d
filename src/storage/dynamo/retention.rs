//! Retained-snapshot purge.
//!
//! When a store keeps snapshot history, each versioned snapshot write adds a
//! retained item at the aggregate's sequence. After the write, the items
//! beyond the configured count (lowest sequences first) are deleted, or
//! stamped with a TTL for the backend's expiry sweep to remove later. The
//! latest-snapshot item is never touched.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use super::backend::{IndexQuery, SequenceBound, TableBackend};
use super::schema::HEAD_SEQUENCE;
use crate::storage::{Result, StorageError};

/// How many retained snapshots to keep and how to drop the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub keep_snapshot_count: usize,
    /// Expire excess items after this long instead of deleting them.
    pub delete_ttl: Option<Duration>,
}

/// Purges retained snapshots of one snapshot table.
pub struct SnapshotRetention<B> {
    backend: Arc<B>,
    table: String,
    index: String,
    policy: RetentionPolicy,
}

impl<B> Clone for SnapshotRetention<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            table: self.table.clone(),
            index: self.index.clone(),
            policy: self.policy,
        }
    }
}

impl<B: TableBackend> SnapshotRetention<B> {
    pub fn new(backend: Arc<B>, table: &str, index: &str, policy: RetentionPolicy) -> Self {
        Self {
            backend,
            table: table.to_string(),
            index: index.to_string(),
            policy,
        }
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// Drop retained snapshots of `aid` beyond the kept count.
    ///
    /// With a TTL policy, items already stamped are neither counted nor
    /// stamped again. Returns the number of items deleted or stamped.
    pub async fn purge(&self, aid: &str) -> Result<usize> {
        let ttl_policy = self.policy.delete_ttl.is_some();
        let retained = IndexQuery::new(
            &self.table,
            &self.index,
            aid,
            SequenceBound::After(HEAD_SEQUENCE),
        )
        .untimed_only(ttl_policy);

        let count = self.backend.count_snapshots(&retained).await?;
        if count <= self.policy.keep_snapshot_count {
            return Ok(0);
        }
        let excess = count - self.policy.keep_snapshot_count;

        let oldest = self
            .backend
            .query_snapshots(&retained.limit(excess))
            .await?;
        let keys: Vec<_> = oldest
            .iter()
            .filter(|record| record.seq_nr != HEAD_SEQUENCE)
            .map(|record| record.key())
            .collect();

        let purged = match self.policy.delete_ttl {
            Some(ttl) => {
                let expires_at = i64::try_from(ttl.as_secs())
                    .ok()
                    .and_then(|secs| Utc::now().timestamp().checked_add(secs))
                    .ok_or_else(|| {
                        StorageError::Validation(format!(
                            "delete ttl of {}s is out of range",
                            ttl.as_secs()
                        ))
                    })?;
                for key in &keys {
                    self.backend.set_ttl(&self.table, key, expires_at).await?;
                }
                debug!(aid = %aid, marked = keys.len(), expires_at, "Stamped TTL on excess snapshots");
                keys.len()
            }
            None => {
                let requested = keys.len();
                let deleted = self.backend.batch_delete(&self.table, keys).await?;
                if deleted < requested {
                    warn!(
                        aid = %aid,
                        requested,
                        deleted,
                        "Some excess snapshots were not deleted"
                    );
                }
                debug!(aid = %aid, deleted, "Deleted excess snapshots");
                deleted
            }
        };

        Ok(purged)
    }

    /// Run [`Self::purge`] to completion, logging instead of returning errors.
    pub async fn purge_logged(&self, aid: &str) {
        if let Err(e) = self.purge(aid).await {
            warn!(aid = %aid, error = %e, "Snapshot retention pass failed");
        }
    }

    /// Run [`Self::purge_logged`] on a spawned task.
    pub fn spawn_purge(&self, aid: String) {
        let retention = self.clone();
        tokio::spawn(async move {
            retention.purge_logged(&aid).await;
        });
    }
}
