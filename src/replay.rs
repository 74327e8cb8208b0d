//! Rebuild aggregate state from a snapshot plus trailing events.

use tracing::debug;

use crate::domain::{Aggregate, AggregateId};
use crate::storage::{EventStore, IdOf, Result};

/// Applies one event to an aggregate snapshot.
///
/// Implementations advance the sequence and domain state. The version is
/// left alone: the stored version returned with the snapshot already counts
/// every write, including event-only writes.
pub trait Replay<E>: Aggregate + Sized {
    fn apply(self, event: &E) -> Self;
}

/// Load the latest snapshot of `id` and fold the events written after it.
///
/// Returns `Ok(None)` when the aggregate has no snapshot.
pub async fn load_aggregate<S>(store: &S, id: &IdOf<S>) -> Result<Option<S::Aggregate>>
where
    S: EventStore,
    S::Aggregate: Replay<S::Event>,
{
    let Some(snapshot) = store.get_latest_snapshot(id).await? else {
        return Ok(None);
    };

    let events = match snapshot.sequence().checked_add(1) {
        Some(from) => store.get_events_since(id, from).await?,
        None => Vec::new(),
    };
    debug!(
        aggregate_id = %id.encode(),
        snapshot_sequence = snapshot.sequence(),
        replayed = events.len(),
        "Replaying events onto snapshot"
    );

    Ok(Some(events.iter().fold(snapshot, |state, event| state.apply(event))))
}
