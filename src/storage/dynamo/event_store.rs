//! Durable EventStore over journal and snapshot tables.
//!
//! Write path, one transaction per call:
//! - event only: bump the latest snapshot's `version` (conditioned on the
//!   expected value) and insert the journal item
//! - event and snapshot: put the latest snapshot (conditioned on absence for
//!   creation, on the expected `version` otherwise), insert the journal item,
//!   and insert a retained snapshot when retention is configured
//!
//! Journal and retained-snapshot inserts are conditioned on absence, so an
//! existing `(aggregate, sequence)` pair is never overwritten.

use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use super::backend::{
    BackendError, IndexQuery, ItemKey, JournalRecord, SequenceBound, SnapshotCondition,
    SnapshotRecord, TableBackend, TransactWrite,
};
use super::retention::{RetentionPolicy, SnapshotRetention};
use super::schema::{TableNames, HEAD_SEQUENCE};
use crate::codec::{JsonSerializer, Serializer};
use crate::config::{ConfigError, StoreConfig};
use crate::domain::{Aggregate, AggregateId, DomainEvent};
use crate::keys::{DefaultKeyResolver, KeyResolver};
use crate::storage::helpers::{epoch_millis, reject_creation_event, validate_snapshot_write};
use crate::storage::{EventStore, Result, StorageError};

/// Position of the latest-snapshot write in every transaction.
const HEAD_ITEM: usize = 0;
/// Position of the retained-snapshot write, when present.
const RETAINED_ITEM: usize = 2;

/// Durable [`EventStore`] over a [`TableBackend`].
pub struct DynamoEventStore<A: Aggregate, E, B> {
    backend: Arc<B>,
    tables: TableNames,
    shard_count: u64,
    key_resolver: Arc<dyn KeyResolver<A::Id>>,
    event_serializer: Arc<dyn Serializer<E>>,
    snapshot_serializer: Arc<dyn Serializer<A>>,
    retention: Option<SnapshotRetention<B>>,
    background_purge: bool,
}

impl<A, E, B> DynamoEventStore<A, E, B>
where
    A: Aggregate + Serialize + DeserializeOwned,
    E: DomainEvent<Id = A::Id> + Serialize + DeserializeOwned,
    B: TableBackend,
{
    /// Create a store with the default key resolver and JSON payloads.
    pub fn new(backend: B, config: &StoreConfig) -> std::result::Result<Self, ConfigError> {
        config.validate()?;

        let backend = Arc::new(backend);
        let tables = config.table_names();
        let retention = config.keep_snapshot_count.map(|keep_snapshot_count| {
            SnapshotRetention::new(
                backend.clone(),
                &tables.snapshot,
                &tables.snapshot_index,
                RetentionPolicy {
                    keep_snapshot_count,
                    delete_ttl: config.delete_ttl(),
                },
            )
        });

        info!(
            aggregate = <A::Id as AggregateId>::TYPE_NAME,
            journal = %tables.journal,
            snapshot = %tables.snapshot,
            shard_count = config.shard_count,
            keep_snapshot_count = ?config.keep_snapshot_count,
            "Created durable event store"
        );

        Ok(Self {
            backend,
            tables,
            shard_count: config.shard_count,
            key_resolver: Arc::new(DefaultKeyResolver),
            event_serializer: Arc::new(JsonSerializer::new()),
            snapshot_serializer: Arc::new(JsonSerializer::new()),
            retention,
            background_purge: config.background_purge,
        })
    }
}

impl<A, E, B> DynamoEventStore<A, E, B>
where
    A: Aggregate,
    E: DomainEvent<Id = A::Id>,
    B: TableBackend,
{
    /// Replace the key derivation strategy.
    pub fn with_key_resolver(mut self, resolver: impl KeyResolver<A::Id> + 'static) -> Self {
        self.key_resolver = Arc::new(resolver);
        self
    }

    /// Replace the event payload encoding.
    pub fn with_event_serializer(mut self, serializer: impl Serializer<E> + 'static) -> Self {
        self.event_serializer = Arc::new(serializer);
        self
    }

    /// Replace the snapshot payload encoding.
    pub fn with_snapshot_serializer(mut self, serializer: impl Serializer<A> + 'static) -> Self {
        self.snapshot_serializer = Arc::new(serializer);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn tables(&self) -> &TableNames {
        &self.tables
    }

    /// Purge retained snapshots of `id` now.
    ///
    /// Returns the number of items deleted or TTL-stamped; 0 when no
    /// retention is configured.
    pub async fn purge_snapshots(&self, id: &A::Id) -> Result<usize> {
        match &self.retention {
            Some(retention) => retention.purge(&id.encode()).await,
            None => Ok(0),
        }
    }

    fn item_key(&self, id: &A::Id, sequence: u64) -> ItemKey {
        ItemKey {
            pkey: self.key_resolver.resolve_partition_key(id, self.shard_count),
            skey: self.key_resolver.resolve_sort_key(id, sequence),
        }
    }

    fn journal_record(&self, event: &E) -> Result<JournalRecord> {
        let id = event.aggregate_id();
        let key = self.item_key(id, event.sequence());
        Ok(JournalRecord {
            pkey: key.pkey,
            skey: key.skey,
            aid: id.encode(),
            seq_nr: event.sequence(),
            payload: self.event_serializer.serialize(event)?,
            occurred_at: epoch_millis(event.occurred_at()),
        })
    }

    fn snapshot_record(
        &self,
        aggregate: &A,
        seq_nr: u64,
        payload: Vec<u8>,
        version: u64,
    ) -> SnapshotRecord {
        let key = self.item_key(aggregate.id(), seq_nr);
        SnapshotRecord {
            pkey: key.pkey,
            skey: key.skey,
            aid: aggregate.id().encode(),
            seq_nr,
            payload,
            version,
            ttl: 0,
            last_updated_at: epoch_millis(aggregate.last_updated_at()),
        }
    }

    /// Turn a failed transaction condition into the caller-facing error.
    ///
    /// A failure on the latest-snapshot item is a version conflict, or a
    /// missing aggregate; the current item is read to tell which. A failure
    /// on any other item means the sequence was already written.
    async fn conflict_error(
        &self,
        id: &A::Id,
        sequence: u64,
        expected: Option<u64>,
        item: usize,
    ) -> StorageError {
        if item != HEAD_ITEM {
            return StorageError::DuplicateEvent {
                aggregate_id: id.encode(),
                sequence,
            };
        }

        let head = self
            .backend
            .get_snapshot(&self.tables.snapshot, &self.item_key(id, HEAD_SEQUENCE))
            .await;
        match head {
            Ok(None) if expected.is_some() => StorageError::NotFound {
                aggregate_id: id.encode(),
            },
            Ok(head) => StorageError::OptimisticLock {
                aggregate_id: id.encode(),
                expected,
                actual: head.map(|h| h.version),
            },
            Err(e) => e.into(),
        }
    }

    async fn run_retention(&self, id: &A::Id) {
        let Some(retention) = &self.retention else {
            return;
        };
        if self.background_purge {
            retention.spawn_purge(id.encode());
        } else {
            retention.purge_logged(&id.encode()).await;
        }
    }
}

#[async_trait]
impl<A, E, B> EventStore for DynamoEventStore<A, E, B>
where
    A: Aggregate,
    E: DomainEvent<Id = A::Id>,
    B: TableBackend,
{
    type Aggregate = A;
    type Event = E;

    #[tracing::instrument(
        name = "store.persist_event",
        skip_all,
        fields(aggregate_id = %event.aggregate_id().encode(), sequence = event.sequence())
    )]
    async fn persist_event(&self, event: &E, expected_version: u64) -> Result<()> {
        reject_creation_event(event)?;
        let id = event.aggregate_id();
        let Some(next) = expected_version.checked_add(1) else {
            return Err(self
                .conflict_error(id, event.sequence(), Some(expected_version), HEAD_ITEM)
                .await);
        };

        let writes = vec![
            TransactWrite::BumpSnapshotVersion {
                table: self.tables.snapshot.clone(),
                key: self.item_key(id, HEAD_SEQUENCE),
                expected: expected_version,
                next,
            },
            TransactWrite::PutJournal {
                table: self.tables.journal.clone(),
                record: self.journal_record(event)?,
            },
        ];

        match self.backend.transact_write(writes).await {
            Ok(()) => {
                debug!(version = next, "Stored event");
                Ok(())
            }
            Err(BackendError::ConditionFailed { item }) => Err(self
                .conflict_error(id, event.sequence(), Some(expected_version), item)
                .await),
            Err(e) => Err(e.into()),
        }
    }

    #[tracing::instrument(
        name = "store.persist_event_and_snapshot",
        skip_all,
        fields(aggregate_id = %event.aggregate_id().encode(), sequence = event.sequence())
    )]
    async fn persist_event_and_snapshot(&self, event: &E, aggregate: &A) -> Result<()> {
        validate_snapshot_write(event, aggregate)?;
        let id = aggregate.id();

        let (expected, version, condition) = if event.is_created() {
            (None, 1, SnapshotCondition::NotExists)
        } else {
            let current = aggregate.version();
            let Some(next) = current.checked_add(1) else {
                return Err(self
                    .conflict_error(id, event.sequence(), Some(current), HEAD_ITEM)
                    .await);
            };
            (Some(current), next, SnapshotCondition::VersionEquals(current))
        };

        let payload = self.snapshot_serializer.serialize(aggregate)?;
        let mut writes = vec![
            TransactWrite::PutSnapshot {
                table: self.tables.snapshot.clone(),
                record: self.snapshot_record(aggregate, HEAD_SEQUENCE, payload.clone(), version),
                condition,
            },
            TransactWrite::PutJournal {
                table: self.tables.journal.clone(),
                record: self.journal_record(event)?,
            },
        ];
        if self.retention.is_some() {
            writes.push(TransactWrite::PutSnapshot {
                table: self.tables.snapshot.clone(),
                record: self.snapshot_record(aggregate, aggregate.sequence(), payload, version),
                condition: SnapshotCondition::NotExists,
            });
        }

        match self.backend.transact_write(writes).await {
            Ok(()) => {
                debug!(version, "Stored event and snapshot");
            }
            Err(BackendError::ConditionFailed { item }) => {
                let sequence = if item == RETAINED_ITEM {
                    aggregate.sequence()
                } else {
                    event.sequence()
                };
                return Err(self.conflict_error(id, sequence, expected, item).await);
            }
            Err(e) => return Err(e.into()),
        }

        if expected.is_some() {
            self.run_retention(id).await;
        }
        Ok(())
    }

    async fn get_latest_snapshot(&self, id: &A::Id) -> Result<Option<A>> {
        let head = self
            .backend
            .get_snapshot(&self.tables.snapshot, &self.item_key(id, HEAD_SEQUENCE))
            .await?;

        match head {
            Some(record) => {
                let aggregate = self.snapshot_serializer.deserialize(&record.payload)?;
                Ok(Some(aggregate.with_version(record.version)))
            }
            None => Ok(None),
        }
    }

    async fn get_events_since(&self, id: &A::Id, sequence: u64) -> Result<Vec<E>> {
        let query = IndexQuery::new(
            &self.tables.journal,
            &self.tables.journal_index,
            &id.encode(),
            SequenceBound::AtLeast(sequence),
        );

        let records = self.backend.query_journal(&query).await?;
        debug!(aggregate_id = %id.encode(), from = sequence, count = records.len(), "Read events");

        records
            .iter()
            .map(|record| {
                self.event_serializer
                    .deserialize(&record.payload)
                    .map_err(StorageError::from)
            })
            .collect()
    }
}
