//! Shared storage helper functions.
//!
//! Argument checks applied by every store before a write, and timestamp
//! encoding for stored attributes.

use chrono::{DateTime, Utc};

use super::{Result, StorageError};
use crate::domain::{Aggregate, AggregateId, DomainEvent};

/// Reject a creation event on the event-only write path.
pub fn reject_creation_event<E: DomainEvent>(event: &E) -> Result<()> {
    if event.is_created() {
        return Err(StorageError::Validation(format!(
            "creation event {} for {} must be persisted with a snapshot",
            event.event_id(),
            event.aggregate_id().encode()
        )));
    }
    validate_event_sequence(event)
}

/// Check that an event and the snapshot written with it belong together.
///
/// The identities must match and both sequences must be at least 1;
/// sequence 0 is reserved for the latest-snapshot record.
pub fn validate_snapshot_write<A, E>(event: &E, aggregate: &A) -> Result<()>
where
    A: Aggregate,
    E: DomainEvent<Id = A::Id>,
{
    if event.aggregate_id() != aggregate.id() {
        return Err(StorageError::Validation(format!(
            "event {} belongs to {}, snapshot belongs to {}",
            event.event_id(),
            event.aggregate_id().encode(),
            aggregate.id().encode()
        )));
    }
    if aggregate.sequence() == 0 {
        return Err(StorageError::Validation(format!(
            "snapshot of {} has sequence 0",
            aggregate.id().encode()
        )));
    }
    validate_event_sequence(event)
}

fn validate_event_sequence<E: DomainEvent>(event: &E) -> Result<()> {
    if event.sequence() == 0 {
        return Err(StorageError::Validation(format!(
            "event {} for {} has sequence 0",
            event.event_id(),
            event.aggregate_id().encode()
        )));
    }
    Ok(())
}

/// Milliseconds since the Unix epoch.
pub fn epoch_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}
