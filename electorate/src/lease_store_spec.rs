//! Shared test specifications for LeaseStore implementations.
//!
//! These test functions can be called by any backend (in-memory, SQLite, etc.)
//! to ensure consistent compare-and-swap behavior across all implementations.

use std::time::Duration;

use chrono::{TimeZone, Utc};

use crate::lease::{LeaseAdmin, LeaseKey, LeaseRecord, LeaseStore};
use crate::DateTime;

/// Generate all lease store spec test wrappers for a backend.
///
/// # Usage
///
/// ```ignore
/// // In-memory example
/// electorate::generate_lease_store_spec_tests! {
///     backend = "memory",
///     test_attr = tokio::test,
///     setup = || InMemoryLeaseStore::new()
/// }
///
/// // SQLite example
/// electorate::generate_lease_store_spec_tests! {
///     backend = "sqlite",
///     test_attr = tokio::test,
///     setup = || {
///         let pool = make_pool().await;
///         SqliteLeaseStore::with_pool(pool)
///     }
/// }
/// ```
#[macro_export]
macro_rules! generate_lease_store_spec_tests {
    (
        backend = $backend:literal,
        test_attr = $test_attr:meta,
        setup = || $setup_expr:expr
    ) => {
        $crate::paste::paste! {
            #[$test_attr]
            async fn [<get_absent_ $backend>]() {
                let store = $setup_expr;
                $crate::lease_store_spec::test_get_absent(store).await;
            }

            #[$test_attr]
            async fn [<create_then_get_ $backend>]() {
                let store = $setup_expr;
                $crate::lease_store_spec::test_create_then_get(store).await;
            }

            #[$test_attr]
            async fn [<create_conflicts_when_present_ $backend>]() {
                let store = $setup_expr;
                $crate::lease_store_spec::test_create_conflicts_when_present(store).await;
            }

            #[$test_attr]
            async fn [<update_with_current_version_ $backend>]() {
                let store = $setup_expr;
                $crate::lease_store_spec::test_update_with_current_version(store).await;
            }

            #[$test_attr]
            async fn [<update_with_stale_version_conflicts_ $backend>]() {
                let store = $setup_expr;
                $crate::lease_store_spec::test_update_with_stale_version_conflicts(store).await;
            }

            #[$test_attr]
            async fn [<update_absent_conflicts_ $backend>]() {
                let store = $setup_expr;
                $crate::lease_store_spec::test_update_absent_conflicts(store).await;
            }

            #[$test_attr]
            async fn [<concurrent_creates_single_winner_ $backend>]() {
                let store = $setup_expr;
                $crate::lease_store_spec::test_concurrent_creates_single_winner(store).await;
            }

            #[$test_attr]
            async fn [<released_record_keeps_empty_holder_ $backend>]() {
                let store = $setup_expr;
                $crate::lease_store_spec::test_released_record_keeps_empty_holder(store).await;
            }

            #[$test_attr]
            async fn [<recreated_record_rejects_old_version_ $backend>]() {
                let store = $setup_expr;
                $crate::lease_store_spec::test_recreated_record_rejects_old_version(store).await;
            }

            #[$test_attr]
            async fn [<keys_are_independent_ $backend>]() {
                let store = $setup_expr;
                $crate::lease_store_spec::test_keys_are_independent(store).await;
            }
        }
    };
}

// Whole seconds, so backends storing coarser timestamps still round-trip.
fn at(secs: i64) -> DateTime {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn key() -> LeaseKey {
    LeaseKey::new("spec", "controller-lock")
}

fn record(holder: &str) -> LeaseRecord {
    LeaseRecord::acquired(holder, at(0), Duration::from_secs(15))
}

/// Reading a key that was never written returns `None`.
pub async fn test_get_absent<S: LeaseStore>(store: S) {
    assert!(store.get(&key()).await.unwrap().is_none());
}

/// A created record is returned with the version `try_create` reported.
pub async fn test_create_then_get<S: LeaseStore>(store: S) {
    let mut original = record("replica-a");
    original.leader_transitions = 3;

    let version = store.try_create(&key(), &original).await.unwrap();
    let stored = store.get(&key()).await.unwrap().unwrap();

    assert_eq!(stored.version, version);
    assert_eq!(stored.record, original);
}

/// A second create on the same key is a conflict and leaves the first record intact.
pub async fn test_create_conflicts_when_present<S: LeaseStore>(store: S) {
    store.try_create(&key(), &record("replica-a")).await.unwrap();

    let err = store
        .try_create(&key(), &record("replica-b"))
        .await
        .unwrap_err();
    assert!(err.is_conflict(), "expected conflict, got {err}");

    let stored = store.get(&key()).await.unwrap().unwrap();
    assert_eq!(stored.record.holder_identity, "replica-a");
}

/// Updating with the current version succeeds and produces a new version.
pub async fn test_update_with_current_version<S: LeaseStore>(store: S) {
    let original = record("replica-a");
    let v1 = store.try_create(&key(), &original).await.unwrap();

    let renewed = original.renewed(at(10));
    let v2 = store.try_update(&key(), &renewed, v1).await.unwrap();
    assert_ne!(v1, v2);

    let stored = store.get(&key()).await.unwrap().unwrap();
    assert_eq!(stored.version, v2);
    assert_eq!(stored.record.renew_time, at(10));
    assert_eq!(stored.record.acquire_time, at(0));
}

/// Updating with a version that was already superseded is a conflict.
pub async fn test_update_with_stale_version_conflicts<S: LeaseStore>(store: S) {
    let original = record("replica-a");
    let v1 = store.try_create(&key(), &original).await.unwrap();
    let v2 = store
        .try_update(&key(), &original.renewed(at(5)), v1)
        .await
        .unwrap();

    let takeover = original.taken_over_by("replica-b", at(6), Duration::from_secs(15));
    let err = store.try_update(&key(), &takeover, v1).await.unwrap_err();
    assert!(err.is_conflict(), "expected conflict, got {err}");

    let stored = store.get(&key()).await.unwrap().unwrap();
    assert_eq!(stored.version, v2);
    assert_eq!(stored.record.holder_identity, "replica-a");
}

/// Updating a record that does not exist is a conflict, not a create.
pub async fn test_update_absent_conflicts<S: LeaseStore>(store: S) {
    let original = record("replica-a");
    let version = store
        .try_create(&LeaseKey::new("spec", "other"), &original)
        .await
        .unwrap();

    let err = store.try_update(&key(), &original, version).await.unwrap_err();
    assert!(err.is_conflict(), "expected conflict, got {err}");
    assert!(store.get(&key()).await.unwrap().is_none());
}

/// Of two simultaneous creates exactly one wins.
pub async fn test_concurrent_creates_single_winner<S: LeaseStore>(store: S) {
    let key = key();
    let a = record("replica-a");
    let b = record("replica-b");

    let (ra, rb) = tokio::join!(store.try_create(&key, &a), store.try_create(&key, &b));

    let winner = match (ra, rb) {
        (Ok(_), Err(e)) => {
            assert!(e.is_conflict(), "expected conflict, got {e}");
            "replica-a"
        }
        (Err(e), Ok(_)) => {
            assert!(e.is_conflict(), "expected conflict, got {e}");
            "replica-b"
        }
        (ra, rb) => panic!("expected exactly one winner, got {ra:?} and {rb:?}"),
    };

    let stored = store.get(&key).await.unwrap().unwrap();
    assert_eq!(stored.record.holder_identity, winner);
}

/// Released records keep their empty holder and remain updatable.
pub async fn test_released_record_keeps_empty_holder<S: LeaseStore>(store: S) {
    let original = record("replica-a");
    let v1 = store.try_create(&key(), &original).await.unwrap();
    let v2 = store
        .try_update(&key(), &original.released(at(3)), v1)
        .await
        .unwrap();

    let stored = store.get(&key()).await.unwrap().unwrap();
    assert!(!stored.record.is_held());
    assert_eq!(stored.record.renew_time, at(3));

    let takeover = stored
        .record
        .taken_over_by("replica-b", at(4), Duration::from_secs(15));
    store.try_update(&key(), &takeover, v2).await.unwrap();
    let stored = store.get(&key()).await.unwrap().unwrap();
    assert_eq!(stored.record.holder_identity, "replica-b");
    assert_eq!(stored.record.leader_transitions, 1);
}

/// A record deleted and created again never reuses a version handed out
/// before the delete, so a holder renewing with its old version conflicts.
pub async fn test_recreated_record_rejects_old_version<S: LeaseAdmin>(store: S) {
    let old = record("replica-a");
    let old_version = store.try_create(&key(), &old).await.unwrap();

    let removed = store.delete(&key()).await.unwrap().unwrap();
    assert_eq!(removed.version, old_version);
    assert!(store.get(&key()).await.unwrap().is_none());
    assert!(store.delete(&key()).await.unwrap().is_none());

    let new_version = store.try_create(&key(), &record("replica-b")).await.unwrap();
    assert_ne!(new_version, old_version);

    let err = store
        .try_update(&key(), &old.renewed(at(5)), old_version)
        .await
        .unwrap_err();
    assert!(err.is_conflict(), "expected conflict, got {err}");

    let stored = store.get(&key()).await.unwrap().unwrap();
    assert_eq!(stored.version, new_version);
    assert_eq!(stored.record.holder_identity, "replica-b");
}

/// Records with the same name in different namespaces do not interfere.
pub async fn test_keys_are_independent<S: LeaseStore>(store: S) {
    let first = LeaseKey::new("ns-1", "lock");
    let second = LeaseKey::new("ns-2", "lock");

    store.try_create(&first, &record("replica-a")).await.unwrap();
    store.try_create(&second, &record("replica-b")).await.unwrap();

    let stored_first = store.get(&first).await.unwrap().unwrap();
    let stored_second = store.get(&second).await.unwrap().unwrap();
    assert_eq!(stored_first.record.holder_identity, "replica-a");
    assert_eq!(stored_second.record.holder_identity, "replica-b");
}
