//! Store configuration types.

use std::time::Duration;

use serde::Deserialize;

use super::ConfigError;
use crate::storage::dynamo::schema::{
    TableNames, DEFAULT_JOURNAL_INDEX, DEFAULT_JOURNAL_TABLE, DEFAULT_SHARD_COUNT,
    DEFAULT_SNAPSHOT_INDEX, DEFAULT_SNAPSHOT_TABLE,
};

/// Longest accepted `delete_ttl_secs`, 100 years.
pub const MAX_DELETE_TTL_SECS: u64 = 100 * 365 * 24 * 60 * 60;

/// Durable store configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Journal (event) table name.
    pub journal_table: String,
    /// Journal secondary index on `(aid, seq_nr)`.
    pub journal_index: String,
    /// Snapshot table name.
    pub snapshot_table: String,
    /// Snapshot secondary index on `(aid, seq_nr)`.
    pub snapshot_index: String,
    /// Number of logical partitions per aggregate kind. Must be at least 1.
    pub shard_count: u64,
    /// Retained snapshots per aggregate, besides the latest one.
    /// When unset, no retained snapshots are written and nothing is purged.
    pub keep_snapshot_count: Option<usize>,
    /// When set, excess retained snapshots are stamped to expire after this
    /// many seconds instead of being deleted.
    pub delete_ttl_secs: Option<u64>,
    /// Run the retention pass on a spawned task (true) or after the write
    /// returns from the backend, before the call completes (false).
    /// Either way its errors are only logged.
    pub background_purge: bool,
    /// DynamoDB client settings.
    pub dynamo: DynamoConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            journal_table: DEFAULT_JOURNAL_TABLE.to_string(),
            journal_index: DEFAULT_JOURNAL_INDEX.to_string(),
            snapshot_table: DEFAULT_SNAPSHOT_TABLE.to_string(),
            snapshot_index: DEFAULT_SNAPSHOT_INDEX.to_string(),
            shard_count: DEFAULT_SHARD_COUNT,
            keep_snapshot_count: None,
            delete_ttl_secs: None,
            background_purge: true,
            dynamo: DynamoConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Check values the store cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shard_count == 0 {
            return Err(ConfigError::Invalid(
                "shard_count must be at least 1".to_string(),
            ));
        }
        let names = [
            ("journal_table", &self.journal_table),
            ("journal_index", &self.journal_index),
            ("snapshot_table", &self.snapshot_table),
            ("snapshot_index", &self.snapshot_index),
        ];
        for (field, value) in names {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{field} must not be empty")));
            }
        }
        if let Some(secs) = self.delete_ttl_secs.filter(|secs| *secs > MAX_DELETE_TTL_SECS) {
            return Err(ConfigError::Invalid(format!(
                "delete_ttl_secs must be at most {MAX_DELETE_TTL_SECS}, got {secs}"
            )));
        }
        Ok(())
    }

    pub fn table_names(&self) -> TableNames {
        TableNames {
            journal: self.journal_table.clone(),
            journal_index: self.journal_index.clone(),
            snapshot: self.snapshot_table.clone(),
            snapshot_index: self.snapshot_index.clone(),
        }
    }

    pub fn delete_ttl(&self) -> Option<Duration> {
        self.delete_ttl_secs.map(Duration::from_secs)
    }
}

/// DynamoDB client configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct DynamoConfig {
    /// Endpoint override (DynamoDB Local, LocalStack).
    pub endpoint_url: Option<String>,
    /// Region override. Uses the SDK default chain when unset.
    pub region: Option<String>,
    /// Per-operation timeout in milliseconds.
    pub operation_timeout_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_config_default() {
        let config = StoreConfig::default();
        assert_eq!(config.journal_table, "journal");
        assert_eq!(config.journal_index, "journal-aid-index");
        assert_eq!(config.snapshot_table, "snapshot");
        assert_eq!(config.snapshot_index, "snapshot-aid-index");
        assert_eq!(config.shard_count, 64);
        assert!(config.keep_snapshot_count.is_none());
        assert!(config.delete_ttl().is_none());
        assert!(config.background_purge);
        assert!(config.dynamo.endpoint_url.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_shards() {
        let config = StoreConfig {
            shard_count: 0,
            ..StoreConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_empty_table_name() {
        let config = StoreConfig {
            snapshot_index: " ".to_string(),
            ..StoreConfig::default()
        };
        match config.validate() {
            Err(ConfigError::Invalid(msg)) => assert!(msg.contains("snapshot_index")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_validate_bounds_delete_ttl() {
        let with_ttl = |secs| StoreConfig {
            delete_ttl_secs: Some(secs),
            ..StoreConfig::default()
        };
        assert!(with_ttl(MAX_DELETE_TTL_SECS).validate().is_ok());

        for secs in [MAX_DELETE_TTL_SECS + 1, i64::MAX as u64, u64::MAX] {
            match with_ttl(secs).validate() {
                Err(ConfigError::Invalid(msg)) => assert!(msg.contains("delete_ttl_secs")),
                other => panic!("unexpected result for {secs}: {other:?}"),
            }
        }
    }

    #[test]
    fn test_delete_ttl_duration() {
        let config = StoreConfig {
            delete_ttl_secs: Some(3600),
            ..StoreConfig::default()
        };
        assert_eq!(config.delete_ttl(), Some(Duration::from_secs(3600)));
    }
}
