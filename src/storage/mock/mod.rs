//! In-memory TableBackend for testing.
//!
//! Evaluates transaction conditions the way DynamoDB does: every condition
//! is checked against the current items before any write is applied, and
//! the index of the first failing item is reported.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::dynamo::{
    BackendError, BackendResult, IndexQuery, ItemKey, JournalRecord, SnapshotCondition,
    SnapshotRecord, TableBackend, TransactWrite,
};


#[derive(Default)]
struct Tables {
    journal: HashMap<String, HashMap<ItemKey, JournalRecord>>,
    snapshots: HashMap<String, HashMap<ItemKey, SnapshotRecord>>,
}

impl Tables {
    fn condition_holds(&self, write: &TransactWrite) -> bool {
        match write {
            TransactWrite::PutJournal { table, record } => !self
                .journal
                .get(table)
                .is_some_and(|items| items.contains_key(&record.key())),
            TransactWrite::PutSnapshot {
                table,
                record,
                condition,
            } => {
                let current = self
                    .snapshots
                    .get(table)
                    .and_then(|items| items.get(&record.key()));
                match condition {
                    SnapshotCondition::NotExists => current.is_none(),
                    SnapshotCondition::VersionEquals(expected) => {
                        current.is_some_and(|item| item.version == *expected)
                    }
                }
            }
            TransactWrite::BumpSnapshotVersion {
                table,
                key,
                expected,
                ..
            } => self
                .snapshots
                .get(table)
                .and_then(|items| items.get(key))
                .is_some_and(|item| item.version == *expected),
        }
    }

    fn apply(&mut self, write: TransactWrite) {
        match write {
            TransactWrite::PutJournal { table, record } => {
                self.journal
                    .entry(table)
                    .or_default()
                    .insert(record.key(), record);
            }
            TransactWrite::PutSnapshot { table, record, .. } => {
                self.snapshots
                    .entry(table)
                    .or_default()
                    .insert(record.key(), record);
            }
            TransactWrite::BumpSnapshotVersion {
                table, key, next, ..
            } => {
                if let Some(item) = self
                    .snapshots
                    .get_mut(&table)
                    .and_then(|items| items.get_mut(&key))
                {
                    item.version = next;
                }
            }
        }
    }

    fn matching_snapshots(&self, query: &IndexQuery) -> Vec<SnapshotRecord> {
        let mut records: Vec<_> = self
            .snapshots
            .get(&query.table)
            .map(|items| {
                items
                    .values()
                    .filter(|r| r.aid == query.aid && query.bound.matches(r.seq_nr))
                    .filter(|r| !query.untimed_only || r.ttl == 0)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        records.sort_by_key(|r| r.seq_nr);
        apply_limit(records, query)
    }

    fn matching_journal(&self, query: &IndexQuery) -> Vec<JournalRecord> {
        let mut records: Vec<_> = self
            .journal
            .get(&query.table)
            .map(|items| {
                items
                    .values()
                    .filter(|r| r.aid == query.aid && query.bound.matches(r.seq_nr))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        records.sort_by_key(|r| r.seq_nr);
        apply_limit(records, query)
    }
}

fn apply_limit<T>(mut records: Vec<T>, query: &IndexQuery) -> Vec<T> {
    if let Some(limit) = query.limit {
        records.truncate(limit);
    }
    records
}

fn injected_failure(operation: &'static str) -> BackendError {
    BackendError::request(operation, "injected failure")
}

/// Mock table backend that stores items in memory.
#[derive(Default)]
pub struct MockTableBackend {
    tables: RwLock<Tables>,
    fail_on_write: RwLock<bool>,
    fail_on_read: RwLock<bool>,
}

impl MockTableBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail transactions, deletes and TTL updates.
    pub async fn set_fail_on_write(&self, fail: bool) {
        *self.fail_on_write.write().await = fail;
    }

    /// Fail item reads, queries and counts.
    pub async fn set_fail_on_read(&self, fail: bool) {
        *self.fail_on_read.write().await = fail;
    }

    /// Remove snapshot items whose TTL is at or before `now_secs`, the way
    /// the DynamoDB expiry sweep would. Returns the number removed.
    pub async fn expire(&self, now_secs: i64) -> usize {
        let mut tables = self.tables.write().await;
        let mut removed = 0;
        for items in tables.snapshots.values_mut() {
            let before = items.len();
            items.retain(|_, record| record.ttl == 0 || record.ttl > now_secs);
            removed += before - items.len();
        }
        removed
    }

    /// All snapshot items of `aid` in `table`, by ascending `seq_nr`.
    pub async fn snapshot_records(&self, table: &str, aid: &str) -> Vec<SnapshotRecord> {
        let tables = self.tables.read().await;
        let mut records: Vec<_> = tables
            .snapshots
            .get(table)
            .map(|items| items.values().filter(|r| r.aid == aid).cloned().collect())
            .unwrap_or_default();
        records.sort_by_key(|r| r.seq_nr);
        records
    }

    /// All journal items of `aid` in `table`, by ascending `seq_nr`.
    pub async fn journal_records(&self, table: &str, aid: &str) -> Vec<JournalRecord> {
        let tables = self.tables.read().await;
        let mut records: Vec<_> = tables
            .journal
            .get(table)
            .map(|items| items.values().filter(|r| r.aid == aid).cloned().collect())
            .unwrap_or_default();
        records.sort_by_key(|r| r.seq_nr);
        records
    }

    /// Overwrite or insert a snapshot item directly, bypassing conditions.
    pub async fn put_snapshot_record(&self, table: &str, record: SnapshotRecord) {
        self.tables
            .write()
            .await
            .snapshots
            .entry(table.to_string())
            .or_default()
            .insert(record.key(), record);
    }

    async fn check_write(&self, operation: &'static str) -> BackendResult<()> {
        if *self.fail_on_write.read().await {
            return Err(injected_failure(operation));
        }
        Ok(())
    }

    async fn check_read(&self, operation: &'static str) -> BackendResult<()> {
        if *self.fail_on_read.read().await {
            return Err(injected_failure(operation));
        }
        Ok(())
    }
}

#[async_trait]
impl TableBackend for MockTableBackend {
    async fn transact_write(&self, writes: Vec<TransactWrite>) -> BackendResult<()> {
        self.check_write("TransactWriteItems").await?;

        let mut tables = self.tables.write().await;
        if let Some(item) = writes.iter().position(|w| !tables.condition_holds(w)) {
            return Err(BackendError::ConditionFailed { item });
        }
        for write in writes {
            tables.apply(write);
        }
        Ok(())
    }

    async fn get_snapshot(&self, table: &str, key: &ItemKey) -> BackendResult<Option<SnapshotRecord>> {
        self.check_read("GetItem").await?;
        let tables = self.tables.read().await;
        Ok(tables
            .snapshots
            .get(table)
            .and_then(|items| items.get(key))
            .cloned())
    }

    async fn query_journal(&self, query: &IndexQuery) -> BackendResult<Vec<JournalRecord>> {
        self.check_read("Query").await?;
        Ok(self.tables.read().await.matching_journal(query))
    }

    async fn query_snapshots(&self, query: &IndexQuery) -> BackendResult<Vec<SnapshotRecord>> {
        self.check_read("Query").await?;
        Ok(self.tables.read().await.matching_snapshots(query))
    }

    async fn count_snapshots(&self, query: &IndexQuery) -> BackendResult<usize> {
        self.check_read("Query").await?;
        let unlimited = IndexQuery {
            limit: None,
            ..query.clone()
        };
        Ok(self.tables.read().await.matching_snapshots(&unlimited).len())
    }

    async fn batch_delete(&self, table: &str, keys: Vec<ItemKey>) -> BackendResult<usize> {
        self.check_write("BatchWriteItem").await?;
        let mut tables = self.tables.write().await;
        let Some(items) = tables.snapshots.get_mut(table) else {
            return Ok(0);
        };
        Ok(keys.iter().filter(|key| items.remove(key).is_some()).count())
    }

    async fn set_ttl(&self, table: &str, key: &ItemKey, expires_at: i64) -> BackendResult<()> {
        self.check_write("UpdateItem").await?;
        let mut tables = self.tables.write().await;
        if let Some(item) = tables
            .snapshots
            .get_mut(table)
            .and_then(|items| items.get_mut(key))
        {
            item.ttl = expires_at;
        }
        Ok(())
    }
}
