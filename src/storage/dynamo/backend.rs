//! Key-value backend interface for the durable store.
//!
//! [`TableBackend`] is the slice of DynamoDB the store needs: conditional
//! multi-item transactions, a consistent single-item read, range and count
//! queries over the `(aid, seq_nr)` index, batch delete, and TTL stamping.
//! Expiry of TTL-stamped items is left to the backend.

use async_trait::async_trait;
use thiserror::Error;

/// Primary key of an item in either table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey {
    pub pkey: String,
    pub skey: String,
}

/// One journal item: a serialized event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalRecord {
    pub pkey: String,
    pub skey: String,
    pub aid: String,
    pub seq_nr: u64,
    pub payload: Vec<u8>,
    /// Epoch millis.
    pub occurred_at: i64,
}

impl JournalRecord {
    pub fn key(&self) -> ItemKey {
        ItemKey {
            pkey: self.pkey.clone(),
            skey: self.skey.clone(),
        }
    }
}

/// One snapshot item: the latest snapshot (`seq_nr` 0) or a retained one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotRecord {
    pub pkey: String,
    pub skey: String,
    pub aid: String,
    pub seq_nr: u64,
    pub payload: Vec<u8>,
    pub version: u64,
    /// Expiry in epoch seconds, 0 when unset.
    pub ttl: i64,
    /// Epoch millis.
    pub last_updated_at: i64,
}

impl SnapshotRecord {
    pub fn key(&self) -> ItemKey {
        ItemKey {
            pkey: self.pkey.clone(),
            skey: self.skey.clone(),
        }
    }
}

/// Condition on a snapshot put inside a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotCondition {
    /// Fail if an item with the same key exists.
    NotExists,
    /// Fail unless the item exists with this `version`.
    VersionEquals(u64),
}

/// One item of an atomic transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactWrite {
    /// Insert a journal item, failing if the key exists.
    PutJournal { table: String, record: JournalRecord },
    /// Insert or replace a snapshot item under `condition`.
    PutSnapshot {
        table: String,
        record: SnapshotRecord,
        condition: SnapshotCondition,
    },
    /// Set `version` to `next`, failing unless it equals `expected`.
    BumpSnapshotVersion {
        table: String,
        key: ItemKey,
        expected: u64,
        next: u64,
    },
}

/// Key condition on `seq_nr` in an index query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceBound {
    AtLeast(u64),
    After(u64),
}

impl SequenceBound {
    pub fn matches(&self, seq_nr: u64) -> bool {
        match *self {
            SequenceBound::AtLeast(n) => seq_nr >= n,
            SequenceBound::After(n) => seq_nr > n,
        }
    }
}

/// Query over an `(aid, seq_nr)` index, ascending by `seq_nr`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexQuery {
    pub table: String,
    pub index: String,
    pub aid: String,
    pub bound: SequenceBound,
    /// Maximum number of items returned, counted after filtering.
    pub limit: Option<usize>,
    /// Skip snapshot items that already carry a TTL.
    pub untimed_only: bool,
}

impl IndexQuery {
    pub fn new(table: &str, index: &str, aid: &str, bound: SequenceBound) -> Self {
        Self {
            table: table.to_string(),
            index: index.to_string(),
            aid: aid.to_string(),
            bound,
            limit: None,
            untimed_only: false,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn untimed_only(mut self, untimed_only: bool) -> Self {
        self.untimed_only = untimed_only;
        self
    }
}

/// Errors from a [`TableBackend`].
#[derive(Debug, Error)]
pub enum BackendError {
    /// A transaction was cancelled because the condition on item `item`
    /// (its index in the submitted list) failed, or because the item was
    /// being written by a concurrent transaction.
    #[error("Transaction cancelled: condition failed on item {item}")]
    ConditionFailed { item: usize },

    #[error("Malformed item: attribute {attribute}: {reason}")]
    MalformedItem {
        attribute: &'static str,
        reason: String,
    },

    #[error("{operation} failed: {source}")]
    Request {
        operation: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl BackendError {
    pub fn request(
        operation: &'static str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        BackendError::Request {
            operation,
            source: source.into(),
        }
    }
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Storage operations the durable store is built on.
///
/// Implementations:
/// - `DynamoBackend`: AWS DynamoDB (feature `dynamo`)
/// - `MockTableBackend`: in-memory tables (feature `test-utils`)
#[async_trait]
pub trait TableBackend: Send + Sync + 'static {
    /// Apply all writes atomically, or none of them.
    async fn transact_write(&self, writes: Vec<TransactWrite>) -> BackendResult<()>;

    /// Strongly consistent read of one snapshot item.
    async fn get_snapshot(&self, table: &str, key: &ItemKey) -> BackendResult<Option<SnapshotRecord>>;

    /// Journal items matching `query`, ordered by `seq_nr`.
    async fn query_journal(&self, query: &IndexQuery) -> BackendResult<Vec<JournalRecord>>;

    /// Snapshot items matching `query`, ordered by `seq_nr`.
    async fn query_snapshots(&self, query: &IndexQuery) -> BackendResult<Vec<SnapshotRecord>>;

    /// Number of snapshot items matching `query`, ignoring its limit.
    async fn count_snapshots(&self, query: &IndexQuery) -> BackendResult<usize>;

    /// Delete items without a transaction. Returns how many were deleted;
    /// items the backend left unprocessed are not retried.
    async fn batch_delete(&self, table: &str, keys: Vec<ItemKey>) -> BackendResult<usize>;

    /// Set the `ttl` attribute of an existing item.
    async fn set_ttl(&self, table: &str, key: &ItemKey, expires_at: i64) -> BackendResult<()>;
}
