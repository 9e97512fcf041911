//! In-process [`LeaseStore`].
//!
//! Suitable for replicas that share one process (share it through `Arc`) and
//! for tests of code built on the election loop.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::instrument;

use crate::lease::{
    LeaseAdmin, LeaseKey, LeaseRecord, LeaseStore, LeaseVersion, StoreError, VersionedLease,
};

/// A [`LeaseStore`] keeping records in memory with versioned compare-and-swap.
///
/// # Example
///
/// ```rust
/// use electorate::memory::InMemoryLeaseStore;
/// use electorate::lease::{LeaseKey, LeaseRecord, LeaseStore};
/// use chrono::Utc;
/// use std::time::Duration;
///
/// # async fn example() {
/// let store = InMemoryLeaseStore::new();
/// let key = LeaseKey::new("default", "controller");
/// let record = LeaseRecord::acquired("replica-0", Utc::now(), Duration::from_secs(15));
///
/// let version = store.try_create(&key, &record).await.unwrap();
/// assert!(store.try_create(&key, &record).await.unwrap_err().is_conflict());
/// assert_eq!(store.get(&key).await.unwrap().unwrap().version, version);
/// # }
/// ```
#[derive(Debug, Default)]
pub struct InMemoryLeaseStore {
    leases: Mutex<Leases>,
}

// Versions come from one store-wide counter so a deleted and recreated
// record never repeats a version an old holder may still carry.
#[derive(Debug, Default)]
struct Leases {
    records: HashMap<LeaseKey, VersionedLease>,
    last_version: u64,
}

impl Leases {
    fn next_version(&mut self) -> LeaseVersion {
        self.last_version += 1;
        LeaseVersion(self.last_version)
    }
}

impl InMemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn leases(&self) -> Result<MutexGuard<'_, Leases>, StoreError> {
        self.leases
            .lock()
            .map_err(|_| StoreError::Unavailable(anyhow::anyhow!("lease table lock poisoned")))
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    #[instrument(skip_all, fields(lease = %key))]
    async fn get(&self, key: &LeaseKey) -> Result<Option<VersionedLease>, StoreError> {
        Ok(self.leases()?.records.get(key).cloned())
    }

    #[instrument(skip_all, fields(lease = %key))]
    async fn try_create(
        &self,
        key: &LeaseKey,
        record: &LeaseRecord,
    ) -> Result<LeaseVersion, StoreError> {
        let mut leases = self.leases()?;
        if leases.records.contains_key(key) {
            return Err(StoreError::Conflict);
        }

        let version = leases.next_version();
        leases.records.insert(
            key.clone(),
            VersionedLease {
                record: record.clone(),
                version,
            },
        );
        Ok(version)
    }

    #[instrument(skip_all, fields(lease = %key, expected = %expected))]
    async fn try_update(
        &self,
        key: &LeaseKey,
        record: &LeaseRecord,
        expected: LeaseVersion,
    ) -> Result<LeaseVersion, StoreError> {
        let mut leases = self.leases()?;
        let current = leases.records.get(key).map(|stored| stored.version);
        if current != Some(expected) {
            return Err(StoreError::Conflict);
        }

        let version = leases.next_version();
        leases.records.insert(
            key.clone(),
            VersionedLease {
                record: record.clone(),
                version,
            },
        );
        Ok(version)
    }
}

#[async_trait]
impl LeaseAdmin for InMemoryLeaseStore {
    #[instrument(skip_all, fields(lease = %key))]
    async fn delete(&self, key: &LeaseKey) -> Result<Option<VersionedLease>, StoreError> {
        Ok(self.leases()?.records.remove(key))
    }
}
