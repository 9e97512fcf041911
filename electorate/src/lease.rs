//! The shared lease record and the interface of the store holding it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::DateTime;

/// Location of a lease record in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseKey {
    pub namespace: String,
    pub name: String,
}

impl LeaseKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for LeaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Contents of a lease record.
///
/// Serialized field names follow the Kubernetes `LeaseSpec`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseRecord {
    /// Identity of the holder. Empty means the lease was released.
    pub holder_identity: String,

    pub acquire_time: DateTime,

    pub renew_time: DateTime,

    /// Serialized in whole seconds. Sub-second durations fail to serialize.
    #[serde(rename = "leaseDurationSeconds", with = "duration_seconds")]
    pub lease_duration: Duration,

    /// Number of times the lease changed hands.
    #[serde(rename = "leaseTransitions", default)]
    pub leader_transitions: u32,
}

impl LeaseRecord {
    /// A fresh record held by `identity` since `now`.
    pub fn acquired(identity: impl Into<String>, now: DateTime, lease_duration: Duration) -> Self {
        Self {
            holder_identity: identity.into(),
            acquire_time: now,
            renew_time: now,
            lease_duration,
            leader_transitions: 0,
        }
    }

    /// Record replacing `self` when `identity` takes the lease over.
    pub fn taken_over_by(&self, identity: &str, now: DateTime, lease_duration: Duration) -> Self {
        let mut next = Self::acquired(identity, now, lease_duration);
        next.leader_transitions = if self.holder_identity == identity {
            self.leader_transitions
        } else {
            self.leader_transitions.saturating_add(1)
        };
        next
    }

    /// Same holder, renewed at `now`.
    pub fn renewed(&self, now: DateTime) -> Self {
        Self {
            renew_time: now,
            ..self.clone()
        }
    }

    /// Holder cleared. Timestamps are kept for inspection.
    pub fn released(&self, now: DateTime) -> Self {
        Self {
            holder_identity: String::new(),
            renew_time: now,
            ..self.clone()
        }
    }

    pub fn is_held(&self) -> bool {
        !self.holder_identity.is_empty()
    }

    pub fn is_held_by(&self, identity: &str) -> bool {
        self.is_held() && self.holder_identity == identity
    }

    /// `None` when the expiry does not fit in a timestamp, i.e. never expires.
    pub fn expires_at(&self) -> Option<DateTime> {
        let duration = TimeDelta::from_std(self.lease_duration).ok()?;
        self.renew_time.checked_add_signed(duration)
    }

    /// A record is valid while `now < renew_time + lease_duration`.
    pub fn is_valid_at(&self, now: DateTime) -> bool {
        match self.expires_at() {
            Some(expires_at) => now < expires_at,
            None => true,
        }
    }

    /// Expired or released records may be claimed by any candidate.
    pub fn is_acquirable_at(&self, now: DateTime) -> bool {
        !self.is_held() || !self.is_valid_at(now)
    }
}

mod duration_seconds {
    use serde::ser::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        if duration.subsec_nanos() != 0 {
            return Err(S::Error::custom(format!(
                "lease duration {duration:?} is not a whole number of seconds"
            )));
        }
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Opaque version of a stored record, used for compare-and-swap updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LeaseVersion(pub u64);

impl fmt::Display for LeaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A record together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedLease {
    pub record: LeaseRecord,
    pub version: LeaseVersion,
}

/// Errors returned by a [`LeaseStore`].
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum StoreError {
    /// The record exists (create) or changed since it was read (update).
    #[error("Lease was modified concurrently")]
    Conflict,

    /// The store could not be reached or failed to answer.
    #[error("Lease store unavailable: {0}")]
    Unavailable(#[source] anyhow::Error),

    #[error("Lease store operation timed out after {0:?}")]
    Timeout(Duration),
}

impl StoreError {
    /// Conflicts signal a lost race and are expected during normal operation.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict)
    }
}

impl From<anyhow::Error> for StoreError {
    fn from(error: anyhow::Error) -> Self {
        StoreError::Unavailable(error)
    }
}

/// An interface to the coordination store holding lease records.
///
/// Implementations must make each operation atomic on a single record. No
/// ordering between different records is assumed.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Read the record at `key`. Returns `None` if it does not exist.
    async fn get(&self, key: &LeaseKey) -> Result<Option<VersionedLease>, StoreError>;

    /// Create the record iff it is absent.
    ///
    /// Returns [`StoreError::Conflict`] if a record already exists at `key`.
    async fn try_create(
        &self,
        key: &LeaseKey,
        record: &LeaseRecord,
    ) -> Result<LeaseVersion, StoreError>;

    /// Replace the record iff its stored version equals `expected`.
    ///
    /// Returns [`StoreError::Conflict`] if the record changed or disappeared.
    async fn try_update(
        &self,
        key: &LeaseKey,
        record: &LeaseRecord,
        expected: LeaseVersion,
    ) -> Result<LeaseVersion, StoreError>;
}

#[async_trait]
impl<S> LeaseStore for Arc<S>
where
    S: LeaseStore + ?Sized,
{
    async fn get(&self, key: &LeaseKey) -> Result<Option<VersionedLease>, StoreError> {
        (**self).get(key).await
    }

    async fn try_create(
        &self,
        key: &LeaseKey,
        record: &LeaseRecord,
    ) -> Result<LeaseVersion, StoreError> {
        (**self).try_create(key, record).await
    }

    async fn try_update(
        &self,
        key: &LeaseKey,
        record: &LeaseRecord,
        expected: LeaseVersion,
    ) -> Result<LeaseVersion, StoreError> {
        (**self).try_update(key, record, expected).await
    }
}

/// Administrative operations on lease records, outside the election protocol.
///
/// Deleting a record is the only way one is destroyed. A record created
/// after a delete must get a version never handed out before it.
#[async_trait]
pub trait LeaseAdmin: LeaseStore {
    /// Remove the record at `key`. Returns the removed record, if any.
    async fn delete(&self, key: &LeaseKey) -> Result<Option<VersionedLease>, StoreError>;
}

#[async_trait]
impl<S> LeaseAdmin for Arc<S>
where
    S: LeaseAdmin + ?Sized,
{
    async fn delete(&self, key: &LeaseKey) -> Result<Option<VersionedLease>, StoreError> {
        (**self).delete(key).await
    }
}
