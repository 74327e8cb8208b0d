//! EventStore trait definition.

use async_trait::async_trait;

use super::Result;
use crate::domain::{Aggregate, DomainEvent};

/// Interface for event and snapshot persistence of one aggregate kind.
///
/// Each aggregate has an append-only event stream and one latest snapshot.
/// The snapshot's stored version is the optimistic-lock counter: every
/// successful write checks it and advances it by exactly 1, whether or not
/// the write replaces the snapshot body.
///
/// Per aggregate the lifecycle is:
/// - nonexistent -> `persist_event_and_snapshot` with the creation event ->
///   version 1
/// - version `v` -> any write carrying `v` -> version `v + 1`
/// - version `v` -> any write carrying another version -> unchanged,
///   [`StorageError::OptimisticLock`](super::StorageError::OptimisticLock)
///
/// The store never retries a failed write.
#[async_trait]
pub trait EventStore: Send + Sync {
    type Aggregate: Aggregate;
    type Event: DomainEvent<Id = <Self::Aggregate as Aggregate>::Id>;

    /// Append a non-creation event without writing a new snapshot body.
    ///
    /// Fails with `Validation` for a creation event, `NotFound` when the
    /// aggregate has no snapshot, and `OptimisticLock` when the stored
    /// version is not `expected_version`.
    async fn persist_event(&self, event: &Self::Event, expected_version: u64) -> Result<()>;

    /// Append an event and replace the snapshot in one atomic write.
    ///
    /// For a creation event the aggregate must not exist yet; it is created
    /// at version 1. Otherwise the stored version must equal
    /// `aggregate.version()`.
    async fn persist_event_and_snapshot(
        &self,
        event: &Self::Event,
        aggregate: &Self::Aggregate,
    ) -> Result<()>;

    /// Latest snapshot, carrying the stored version, or `None`.
    async fn get_latest_snapshot(
        &self,
        id: &<Self::Aggregate as Aggregate>::Id,
    ) -> Result<Option<Self::Aggregate>>;

    /// Events with sequence >= `sequence`, ascending.
    async fn get_events_since(
        &self,
        id: &<Self::Aggregate as Aggregate>::Id,
        sequence: u64,
    ) -> Result<Vec<Self::Event>>;
}

/// Shorthand for the identity type of a store.
pub type IdOf<S> = <<S as EventStore>::Aggregate as Aggregate>::Id;
