//! In-memory EventStore implementation.
//!
//! Events and snapshots live in two maps keyed by aggregate identity, both
//! inside one state object behind a single async mutex. Every operation takes
//! the lock for its whole check-then-mutate step, so two writers racing on the
//! same version cannot both pass the version check.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::{Aggregate, AggregateId, DomainEvent};
use crate::storage::helpers::{reject_creation_event, validate_snapshot_write};
use crate::storage::{EventStore, Result, StorageError};

/// Latest snapshot with its stored version.
struct StoredSnapshot<A> {
    aggregate: A,
    version: u64,
}

struct State<A: Aggregate, E> {
    events: HashMap<A::Id, Vec<E>>,
    snapshots: HashMap<A::Id, StoredSnapshot<A>>,
}

impl<A: Aggregate, E: DomainEvent<Id = A::Id>> State<A, E> {
    /// Check the stored version of an existing aggregate.
    fn check_version(&self, id: &A::Id, expected: u64) -> Result<()> {
        let stored = self
            .snapshots
            .get(id)
            .ok_or_else(|| StorageError::NotFound {
                aggregate_id: id.encode(),
            })?;
        if stored.version != expected {
            return Err(StorageError::OptimisticLock {
                aggregate_id: id.encode(),
                expected: Some(expected),
                actual: Some(stored.version),
            });
        }
        Ok(())
    }

    /// Position at which `event` keeps the stream ordered, or an error if
    /// its sequence is already taken.
    fn insert_position(&self, event: &E) -> Result<usize> {
        let Some(stream) = self.events.get(event.aggregate_id()) else {
            return Ok(0);
        };
        let position = stream.partition_point(|e| e.sequence() < event.sequence());
        if stream
            .get(position)
            .is_some_and(|e| e.sequence() == event.sequence())
        {
            return Err(StorageError::DuplicateEvent {
                aggregate_id: event.aggregate_id().encode(),
                sequence: event.sequence(),
            });
        }
        Ok(position)
    }
}

/// Reference [`EventStore`] holding everything in process memory.
///
/// Creation is existence-checked like the durable store: creating an
/// aggregate that already has a snapshot or events fails with
/// [`StorageError::OptimisticLock`] and `expected: None`.
pub struct InMemoryEventStore<A: Aggregate, E> {
    state: Mutex<State<A, E>>,
}

impl<A: Aggregate, E> Default for InMemoryEventStore<A, E> {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                events: HashMap::new(),
                snapshots: HashMap::new(),
            }),
        }
    }
}

impl<A: Aggregate, E> InMemoryEventStore<A, E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of aggregates with a snapshot.
    pub async fn aggregate_count(&self) -> usize {
        self.state.lock().await.snapshots.len()
    }
}

/// Version after `current`; a head already at `u64::MAX` cannot advance.
fn next_version<I: AggregateId>(id: &I, current: u64) -> Result<u64> {
    current
        .checked_add(1)
        .ok_or_else(|| StorageError::OptimisticLock {
            aggregate_id: id.encode(),
            expected: Some(current),
            actual: Some(current),
        })
}

#[async_trait]
impl<A, E> EventStore for InMemoryEventStore<A, E>
where
    A: Aggregate + Clone,
    E: DomainEvent<Id = A::Id> + Clone,
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

        let mut state = self.state.lock().await;
        state.check_version(id, expected_version)?;
        let next = next_version(id, expected_version)?;
        let position = state.insert_position(event)?;

        state
            .events
            .entry(id.clone())
            .or_default()
            .insert(position, event.clone());
        if let Some(stored) = state.snapshots.get_mut(id) {
            stored.version = next;
        }

        debug!(version = next, "Stored event in memory");
        Ok(())
    }

    #[tracing::instrument(
        name = "store.persist_event_and_snapshot",
        skip_all,
        fields(aggregate_id = %event.aggregate_id().encode(), sequence = event.sequence())
    )]
    async fn persist_event_and_snapshot(&self, event: &E, aggregate: &A) -> Result<()> {
        validate_snapshot_write(event, aggregate)?;
        let id = aggregate.id();

        let mut state = self.state.lock().await;
        let version = if event.is_created() {
            let existing = state.snapshots.get(id).map(|s| s.version);
            let has_events = state.events.get(id).is_some_and(|e| !e.is_empty());
            if existing.is_some() || has_events {
                return Err(StorageError::OptimisticLock {
                    aggregate_id: id.encode(),
                    expected: None,
                    actual: existing,
                });
            }
            1
        } else {
            state.check_version(id, aggregate.version())?;
            next_version(id, aggregate.version())?
        };
        let position = state.insert_position(event)?;

        state
            .events
            .entry(id.clone())
            .or_default()
            .insert(position, event.clone());
        state.snapshots.insert(
            id.clone(),
            StoredSnapshot {
                aggregate: aggregate.clone(),
                version,
            },
        );

        debug!(version, "Stored event and snapshot in memory");
        Ok(())
    }

    async fn get_latest_snapshot(&self, id: &A::Id) -> Result<Option<A>> {
        let state = self.state.lock().await;
        Ok(state
            .snapshots
            .get(id)
            .map(|stored| stored.aggregate.clone().with_version(stored.version)))
    }

    async fn get_events_since(&self, id: &A::Id, sequence: u64) -> Result<Vec<E>> {
        let state = self.state.lock().await;
        Ok(state
            .events
            .get(id)
            .map(|events| {
                events
                    .iter()
                    .filter(|e| e.sequence() >= sequence)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::test_utils::{UserAccount, UserAccountEvent, UserAccountId};

    type Store = InMemoryEventStore<UserAccount, UserAccountEvent>;

    async fn created(store: &Store, id: &str, name: &str) -> UserAccount {
        let (account, event) = UserAccount::create(UserAccountId::new(id), name);
        store
            .persist_event_and_snapshot(&event, &account)
            .await
            .unwrap();
        account
    }

    #[tokio::test]
    async fn test_create_then_read_snapshot() {
        let store = Store::new();
        created(&store, "mem-1", "A").await;

        let snapshot = store
            .get_latest_snapshot(&UserAccountId::new("mem-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.sequence, 1);
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.name, "A");
        assert_eq!(store.aggregate_count().await, 1);
    }

    #[tokio::test]
    async fn test_create_twice_is_rejected() {
        let store = Store::new();
        created(&store, "mem-2", "A").await;

        let (account, event) = UserAccount::create(UserAccountId::new("mem-2"), "B");
        let result = store.persist_event_and_snapshot(&event, &account).await;
        assert!(matches!(
            result,
            Err(StorageError::OptimisticLock {
                expected: None,
                actual: Some(1),
                ..
            })
        ));

        let snapshot = store
            .get_latest_snapshot(account.id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.name, "A");
    }

    #[tokio::test]
    async fn test_persist_event_on_missing_aggregate() {
        let store = Store::new();
        let (account, _) = UserAccount::create(UserAccountId::new("mem-3"), "A");
        let (_, rename) = account.rename("B");

        let result = store.persist_event(&rename, 1).await;
        assert!(matches!(result, Err(StorageError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_version_at_max_is_rejected() {
        let store = Store::new();
        let account = created(&store, "mem-max", "A").await;
        let (next, rename) = account.rename("B");

        let result = store.persist_event(&rename, u64::MAX).await;
        assert!(matches!(
            result,
            Err(StorageError::OptimisticLock {
                expected: Some(u64::MAX),
                actual: Some(1),
                ..
            })
        ));

        let exhausted = UserAccount {
            version: u64::MAX,
            ..next
        };
        let result = store.persist_event_and_snapshot(&rename, &exhausted).await;
        assert!(matches!(result, Err(StorageError::OptimisticLock { .. })));
        assert!(matches!(
            next_version(account.id(), u64::MAX),
            Err(StorageError::OptimisticLock {
                expected: Some(u64::MAX),
                actual: Some(u64::MAX),
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_persist_event_keeps_snapshot_body() {
        let store = Store::new();
        let account = created(&store, "mem-4", "A").await;
        let (_, rename) = account.rename("B");
        store.persist_event(&rename, 1).await.unwrap();

        let snapshot = store
            .get_latest_snapshot(account.id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.name, "A");
        assert_eq!(snapshot.sequence, 1);
        assert_eq!(snapshot.version, 2);
    }

    #[tokio::test]
    async fn test_duplicate_sequence_is_rejected() {
        let store = Store::new();
        let account = created(&store, "mem-5", "A").await;
        let (_, rename) = account.rename("B");
        store.persist_event(&rename, 1).await.unwrap();

        let result = store.persist_event(&rename, 2).await;
        assert!(matches!(
            result,
            Err(StorageError::DuplicateEvent { sequence: 2, .. })
        ));

        let snapshot = store
            .get_latest_snapshot(account.id())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(snapshot.version, 2);
    }

    #[tokio::test]
    async fn test_events_returned_in_sequence_order() {
        let store = Store::new();
        let account = created(&store, "mem-6", "A").await;
        let (second, rename2) = account.rename("B");
        let (_, rename3) = second.rename("C");

        // Written out of order; read back ascending.
        store.persist_event(&rename3, 1).await.unwrap();
        store.persist_event(&rename2, 2).await.unwrap();

        let sequences: Vec<u64> = store
            .get_events_since(account.id(), 1)
            .await
            .unwrap()
            .iter()
            .map(|e| e.sequence)
            .collect();
        assert_eq!(sequences, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_racing_writers_one_winner() {
        let store = Arc::new(Store::new());
        let account = created(&store, "mem-7", "A").await;
        let (_, first) = account.rename("B");
        let mut second = first.clone();
        second.id = "mem-7-other".to_string();
        second.sequence = 3;

        let (a, b) = tokio::join!(
            {
                let store = store.clone();
                async move { store.persist_event(&first, 1).await }
            },
            {
                let store = store.clone();
                async move { store.persist_event(&second, 1).await }
            }
        );

        let outcomes = [a, b];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
        assert_eq!(
            outcomes
                .iter()
                .filter(|r| matches!(r, Err(StorageError::OptimisticLock { .. })))
                .count(),
            1
        );
    }
}
