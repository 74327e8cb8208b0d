//! Table layout for the journal and snapshot tables.
//!
//! Both tables share the same key attributes:
//! - `pkey` (S, partition key): `{type}-{shard}`
//! - `skey` (S, sort key): `{type}-{identity}-{sequence}`
//!
//! and the same secondary index, keyed by `aid` (S) and `seq_nr` (N), used
//! for every range read. Journal items add `payload` (B) and `occurred_at`
//! (N, epoch millis). Snapshot items add `payload` (B), `version` (N),
//! `ttl` (N, epoch seconds, 0 when unset) and `last_updated_at` (N, epoch
//! millis). The snapshot at `seq_nr = 0` is the latest one; items at the
//! aggregate's sequence are retained history.

pub const ATTR_PKEY: &str = "pkey";
pub const ATTR_SKEY: &str = "skey";
pub const ATTR_AID: &str = "aid";
pub const ATTR_SEQ_NR: &str = "seq_nr";
pub const ATTR_PAYLOAD: &str = "payload";
pub const ATTR_OCCURRED_AT: &str = "occurred_at";
pub const ATTR_VERSION: &str = "version";
pub const ATTR_TTL: &str = "ttl";
pub const ATTR_LAST_UPDATED_AT: &str = "last_updated_at";

/// Sequence number of the latest-snapshot item.
pub const HEAD_SEQUENCE: u64 = 0;

pub const DEFAULT_JOURNAL_TABLE: &str = "journal";
pub const DEFAULT_JOURNAL_INDEX: &str = "journal-aid-index";
pub const DEFAULT_SNAPSHOT_TABLE: &str = "snapshot";
pub const DEFAULT_SNAPSHOT_INDEX: &str = "snapshot-aid-index";
pub const DEFAULT_SHARD_COUNT: u64 = 64;

/// Names of the tables and indexes a store reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableNames {
    pub journal: String,
    pub journal_index: String,
    pub snapshot: String,
    pub snapshot_index: String,
}

impl Default for TableNames {
    fn default() -> Self {
        Self {
            journal: DEFAULT_JOURNAL_TABLE.to_string(),
            journal_index: DEFAULT_JOURNAL_INDEX.to_string(),
            snapshot: DEFAULT_SNAPSHOT_TABLE.to_string(),
            snapshot_index: DEFAULT_SNAPSHOT_INDEX.to_string(),
        }
    }
}
