//! EventStore contract tests.
//!
//! These tests verify the contract of the EventStore trait.
//! Each store implementation should run these tests. Aggregate ids are
//! random so the suite can run against a shared, non-empty backend.

use uuid::Uuid;

use eventide::replay::load_aggregate;
use eventide::storage::{EventStore, StorageError};
use eventide::test_utils::{UserAccount, UserAccountEvent, UserAccountId};

/// Stores of the test fixture aggregate.
pub trait AccountStore: EventStore<Aggregate = UserAccount, Event = UserAccountEvent> {}

impl<S> AccountStore for S where S: EventStore<Aggregate = UserAccount, Event = UserAccountEvent> {}

/// Fresh id, unique across runs.
pub fn unique_id(prefix: &str) -> UserAccountId {
    UserAccountId::new(format!("{}-{}", prefix, Uuid::new_v4()))
}

/// Create an account and return it as stored.
pub async fn create_account<S: AccountStore>(store: &S, prefix: &str, name: &str) -> UserAccount {
    let (account, event) = UserAccount::create(unique_id(prefix), name);
    store
        .persist_event_and_snapshot(&event, &account)
        .await
        .expect("create should succeed");
    account
}

// =============================================================================
// persist_event_and_snapshot tests
// =============================================================================

pub async fn test_create_then_read_snapshot<S: AccountStore>(store: &S) {
    let account = create_account(store, "test_create", "A").await;

    let snapshot = store
        .get_latest_snapshot(&account.id)
        .await
        .expect("read should succeed")
        .expect("snapshot should exist");
    assert_eq!(snapshot.sequence, 1);
    assert_eq!(snapshot.version, 1);
    assert_eq!(snapshot.name, "A");
}

pub async fn test_create_twice_is_rejected<S: AccountStore>(store: &S) {
    let account = create_account(store, "test_create_twice", "A").await;

    let (again, event) = UserAccount::create(account.id.clone(), "B");
    let err = store
        .persist_event_and_snapshot(&event, &again)
        .await
        .expect_err("second create should fail");
    assert!(
        matches!(err, StorageError::OptimisticLock { expected: None, .. }),
        "unexpected error: {err:?}"
    );

    let snapshot = store.get_latest_snapshot(&account.id).await.unwrap().unwrap();
    assert_eq!(snapshot.name, "A", "original snapshot should be kept");
}

pub async fn test_snapshot_write_with_stale_version<S: AccountStore>(store: &S) {
    let account = create_account(store, "test_stale_snapshot", "A").await;
    let (_, rename) = account.rename("B");
    store.persist_event(&rename, 1).await.unwrap();

    // Still at version 1; the store is at 2.
    let (_, stale) = account.rename("C");
    let stale_event = UserAccountEvent {
        sequence: 3,
        ..stale.clone()
    };
    let stale_state = UserAccount {
        sequence: 3,
        ..account.clone()
    };
    let err = store
        .persist_event_and_snapshot(&stale_event, &stale_state)
        .await
        .expect_err("stale snapshot write should fail");
    assert!(
        matches!(
            err,
            StorageError::OptimisticLock {
                expected: Some(1),
                actual: Some(2),
                ..
            }
        ),
        "unexpected error: {err:?}"
    );
}

// =============================================================================
// persist_event tests
// =============================================================================

pub async fn test_event_only_write_then_replay<S: AccountStore>(store: &S) {
    let account = create_account(store, "test_event_only", "A").await;
    let (_, rename) = account.rename("B");

    store
        .persist_event(&rename, 1)
        .await
        .expect("persist_event should succeed");

    let events = store.get_events_since(&account.id, 2).await.unwrap();
    assert_eq!(events, vec![rename]);

    let loaded = load_aggregate(store, &account.id).await.unwrap().unwrap();
    assert_eq!(loaded.sequence, 2);
    assert_eq!(loaded.version, 2);
    assert_eq!(loaded.name, "B");
}

pub async fn test_stale_expected_version_is_rejected<S: AccountStore>(store: &S) {
    let account = create_account(store, "test_stale_version", "A").await;
    let (next, first) = account.rename("B");
    store.persist_event(&first, 1).await.unwrap();

    let (_, second) = next.rename("C");
    let err = store
        .persist_event(&second, 1)
        .await
        .expect_err("stale version should fail");
    assert!(
        matches!(
            err,
            StorageError::OptimisticLock {
                expected: Some(1),
                actual: Some(2),
                ..
            }
        ),
        "unexpected error: {err:?}"
    );

    let events = store.get_events_since(&account.id, 1).await.unwrap();
    assert_eq!(events.len(), 2, "rejected event should not be stored");
}

pub async fn test_persist_event_rejects_creation_event<S: AccountStore>(store: &S) {
    let (_, event) = UserAccount::create(unique_id("test_creation_event"), "A");
    let err = store
        .persist_event(&event, 0)
        .await
        .expect_err("creation event should be rejected");
    assert!(matches!(err, StorageError::Validation(_)), "unexpected error: {err:?}");
}

pub async fn test_persist_event_on_missing_aggregate<S: AccountStore>(store: &S) {
    let (account, _) = UserAccount::create(unique_id("test_missing"), "A");
    let (_, rename) = account.rename("B");

    let err = store
        .persist_event(&rename, 1)
        .await
        .expect_err("write to missing aggregate should fail");
    assert!(matches!(err, StorageError::NotFound { .. }), "unexpected error: {err:?}");
}

pub async fn test_duplicate_sequence_is_rejected<S: AccountStore>(store: &S) {
    let account = create_account(store, "test_duplicate", "A").await;
    let (_, rename) = account.rename("B");
    store.persist_event(&rename, 1).await.unwrap();

    let err = store
        .persist_event(&rename, 2)
        .await
        .expect_err("duplicate sequence should fail");
    assert!(
        matches!(err, StorageError::DuplicateEvent { sequence: 2, .. }),
        "unexpected error: {err:?}"
    );

    let snapshot = store.get_latest_snapshot(&account.id).await.unwrap().unwrap();
    assert_eq!(snapshot.version, 2, "failed write should not bump version");
}

pub async fn test_concurrent_writers_one_wins<S: AccountStore>(store: &S) {
    let account = create_account(store, "test_concurrent", "A").await;
    let (_, left) = account.rename("left");
    let (_, right) = account.rename("right");

    let (left_result, right_result) =
        tokio::join!(store.persist_event(&left, 1), store.persist_event(&right, 1));

    let failures: Vec<_> = [left_result, right_result]
        .into_iter()
        .filter_map(Result::err)
        .collect();
    assert_eq!(failures.len(), 1, "exactly one writer should win");
    assert!(
        matches!(failures[0], StorageError::OptimisticLock { .. }),
        "unexpected error: {:?}",
        failures[0]
    );

    let snapshot = store.get_latest_snapshot(&account.id).await.unwrap().unwrap();
    assert_eq!(snapshot.version, 2);
}

// =============================================================================
// Read tests
// =============================================================================

pub async fn test_missing_snapshot_is_none<S: AccountStore>(store: &S) {
    let snapshot = store
        .get_latest_snapshot(&unique_id("test_no_snapshot"))
        .await
        .expect("read should succeed");
    assert!(snapshot.is_none());
}

pub async fn test_events_since_bounds<S: AccountStore>(store: &S) {
    let account = create_account(store, "test_since", "A").await;
    let (_, rename) = account.rename("B");
    store.persist_event(&rename, 1).await.unwrap();

    let all = store.get_events_since(&account.id, 0).await.unwrap();
    assert_eq!(all.len(), 2);

    let past_end = store.get_events_since(&account.id, 3).await.unwrap();
    assert!(past_end.is_empty());

    let unknown = store
        .get_events_since(&unique_id("test_since_unknown"), 1)
        .await
        .unwrap();
    assert!(unknown.is_empty());
}

pub async fn test_events_ordered_past_nine<S: AccountStore>(store: &S) {
    let mut state = create_account(store, "test_ordering", "name-1").await;
    for (version, seq) in (2..=12u64).enumerate() {
        let (next, event) = state.rename(&format!("name-{seq}"));
        store
            .persist_event(&event, version as u64 + 1)
            .await
            .expect("persist_event should succeed");
        state = next;
    }

    let seqs: Vec<_> = store
        .get_events_since(&state.id, 1)
        .await
        .unwrap()
        .iter()
        .map(|e| e.sequence)
        .collect();
    assert_eq!(seqs, (1..=12).collect::<Vec<_>>());

    let loaded = load_aggregate(store, &state.id).await.unwrap().unwrap();
    assert_eq!(loaded.sequence, 12);
    assert_eq!(loaded.version, 12);
    assert_eq!(loaded.name, "name-12");
}

pub async fn test_aggregates_are_isolated<S: AccountStore>(store: &S) {
    let first = create_account(store, "test_isolated", "first").await;
    let second = create_account(store, "test_isolated", "second").await;
    let (_, rename) = first.rename("renamed");
    store.persist_event(&rename, 1).await.unwrap();

    let events = store.get_events_since(&second.id, 1).await.unwrap();
    assert_eq!(events.len(), 1);
    let snapshot = store.get_latest_snapshot(&second.id).await.unwrap().unwrap();
    assert_eq!(snapshot.version, 1);
    assert_eq!(snapshot.name, "second");
}

// =============================================================================
// End-to-end
// =============================================================================

pub async fn test_three_step_scenario<S: AccountStore>(store: &S) {
    let account = create_account(store, "test_three_step", "test").await;
    let id = account.id.clone();

    let loaded = load_aggregate(store, &id).await.unwrap().unwrap();
    assert_eq!((loaded.sequence, loaded.version), (1, 1));
    assert_eq!(loaded.name, "test");

    let (_, rename) = loaded.rename("test2");
    store.persist_event(&rename, 1).await.unwrap();
    let loaded = load_aggregate(store, &id).await.unwrap().unwrap();
    assert_eq!((loaded.sequence, loaded.version), (2, 2));
    assert_eq!(loaded.name, "test2");

    let (next, rename) = loaded.rename("test3");
    store.persist_event_and_snapshot(&rename, &next).await.unwrap();
    let loaded = load_aggregate(store, &id).await.unwrap().unwrap();
    assert_eq!((loaded.sequence, loaded.version), (3, 3));
    assert_eq!(loaded.name, "test3");
}

// =============================================================================
// Test runner macro
// =============================================================================

/// Run all EventStore contract tests against a store implementation.
#[macro_export]
macro_rules! run_event_store_tests {
    ($store:expr) => {
        use $crate::storage::event_store_tests::*;

        // persist_event_and_snapshot tests
        test_create_then_read_snapshot($store).await;
        println!("  test_create_then_read_snapshot: PASSED");

        test_create_twice_is_rejected($store).await;
        println!("  test_create_twice_is_rejected: PASSED");

        test_snapshot_write_with_stale_version($store).await;
        println!("  test_snapshot_write_with_stale_version: PASSED");

        // persist_event tests
        test_event_only_write_then_replay($store).await;
        println!("  test_event_only_write_then_replay: PASSED");

        test_stale_expected_version_is_rejected($store).await;
        println!("  test_stale_expected_version_is_rejected: PASSED");

        test_persist_event_rejects_creation_event($store).await;
        println!("  test_persist_event_rejects_creation_event: PASSED");

        test_persist_event_on_missing_aggregate($store).await;
        println!("  test_persist_event_on_missing_aggregate: PASSED");

        test_duplicate_sequence_is_rejected($store).await;
        println!("  test_duplicate_sequence_is_rejected: PASSED");

        test_concurrent_writers_one_wins($store).await;
        println!("  test_concurrent_writers_one_wins: PASSED");

        // read tests
        test_missing_snapshot_is_none($store).await;
        println!("  test_missing_snapshot_is_none: PASSED");

        test_events_since_bounds($store).await;
        println!("  test_events_since_bounds: PASSED");

        test_events_ordered_past_nine($store).await;
        println!("  test_events_ordered_past_nine: PASSED");

        test_aggregates_are_isolated($store).await;
        println!("  test_aggregates_are_isolated: PASSED");

        // end-to-end
        test_three_step_scenario($store).await;
        println!("  test_three_step_scenario: PASSED");
    };
}
