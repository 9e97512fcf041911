use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use electorate::{LeaseRecord, LeaseVersion, VersionedLease};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow)]
pub(crate) struct LeaseRow {
    pub(crate) holder_identity: String,
    pub(crate) acquire_time: i64,
    pub(crate) renew_time: i64,
    pub(crate) lease_duration_ms: i64,
    pub(crate) leader_transitions: i64,
    pub(crate) version: i64,
}

impl LeaseRow {
    /// Convert the stored columns back into a versioned record
    pub(crate) fn into_lease(self) -> anyhow::Result<VersionedLease> {
        let record = LeaseRecord {
            holder_identity: self.holder_identity,
            acquire_time: DateTime::<Utc>::from_timestamp_millis(self.acquire_time)
                .context("acquire_time out of range")?,
            renew_time: DateTime::<Utc>::from_timestamp_millis(self.renew_time)
                .context("renew_time out of range")?,
            lease_duration: Duration::from_millis(
                u64::try_from(self.lease_duration_ms).context("negative lease duration")?,
            ),
            leader_transitions: u32::try_from(self.leader_transitions)
                .context("leader_transitions out of range")?,
        };
        let version = u64::try_from(self.version).context("negative version")?;

        Ok(VersionedLease {
            record,
            version: LeaseVersion(version),
        })
    }
}

/// Columns of a record as bound into queries
pub(crate) struct LeaseColumns<'a> {
    pub(crate) holder_identity: &'a str,
    pub(crate) acquire_time: i64,
    pub(crate) renew_time: i64,
    pub(crate) lease_duration_ms: i64,
    pub(crate) leader_transitions: i64,
}

impl<'a> LeaseColumns<'a> {
    pub(crate) fn from_record(record: &'a LeaseRecord) -> anyhow::Result<Self> {
        Ok(Self {
            holder_identity: &record.holder_identity,
            acquire_time: record.acquire_time.timestamp_millis(),
            renew_time: record.renew_time.timestamp_millis(),
            lease_duration_ms: i64::try_from(record.lease_duration.as_millis())
                .context("lease duration too large to store")?,
            leader_transitions: i64::from(record.leader_transitions),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn row_converts_to_record() {
        let row = LeaseRow {
            holder_identity: "replica-0".to_string(),
            acquire_time: 1_700_000_000_000,
            renew_time: 1_700_000_010_500,
            lease_duration_ms: 15_000,
            leader_transitions: 2,
            version: 7,
        };

        let lease = row.into_lease().unwrap();
        assert_eq!(lease.version, LeaseVersion(7));
        assert_eq!(lease.record.holder_identity, "replica-0");
        assert_eq!(
            lease.record.acquire_time,
            Utc.timestamp_opt(1_700_000_000, 0).unwrap()
        );
        assert_eq!(lease.record.renew_time.timestamp_millis(), 1_700_000_010_500);
        assert_eq!(lease.record.lease_duration, Duration::from_secs(15));
        assert_eq!(lease.record.leader_transitions, 2);
    }

    #[test]
    fn negative_columns_are_rejected() {
        let row = LeaseRow {
            holder_identity: String::new(),
            acquire_time: 0,
            renew_time: 0,
            lease_duration_ms: -1,
            leader_transitions: 0,
            version: 1,
        };
        assert!(row.into_lease().is_err());
    }

    #[test]
    fn oversized_duration_is_rejected() {
        let record = LeaseRecord::acquired("a", Utc::now(), Duration::MAX);
        assert!(LeaseColumns::from_record(&record).is_err());
    }
}
