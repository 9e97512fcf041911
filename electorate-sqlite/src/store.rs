use crate::types::{LeaseColumns, LeaseRow};
use anyhow::Context;
use async_trait::async_trait;
use electorate::{
    LeaseAdmin, LeaseKey, LeaseRecord, LeaseStore, LeaseVersion, StoreError, VersionedLease,
};
use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::instrument;

/// An implementation of the LeaseStore backed by SQLite.
///
/// Creates rely on the `(namespace, name)` primary key, updates on a
/// `version` column compared inside the `UPDATE`. Every write takes its
/// version from the `electorate_lease_versions` counter in the same
/// transaction.
#[derive(Clone)]
pub struct SqliteLeaseStore {
    pub(crate) pool: SqlitePool,
}

impl SqliteLeaseStore {
    pub fn with_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

async fn next_version(tx: &mut Transaction<'_, Sqlite>) -> anyhow::Result<i64> {
    sqlx::query_scalar(
        "UPDATE electorate_lease_versions SET last_version = last_version + 1
         WHERE id = 1
         RETURNING last_version",
    )
    .fetch_one(&mut **tx)
    .await
    .context("Failed to allocate lease version")
}

fn to_lease_version(version: i64) -> anyhow::Result<LeaseVersion> {
    let version = u64::try_from(version).context("Lease version out of range")?;
    Ok(LeaseVersion(version))
}

#[async_trait]
impl LeaseStore for SqliteLeaseStore {
    #[instrument(skip_all, err, fields(lease = %key))]
    async fn get(&self, key: &LeaseKey) -> Result<Option<VersionedLease>, StoreError> {
        let row: Option<LeaseRow> = sqlx::query_as(
            "SELECT holder_identity, acquire_time, renew_time, lease_duration_ms,
                    leader_transitions, version
             FROM electorate_leases WHERE namespace = ?1 AND name = ?2",
        )
        .bind(&key.namespace)
        .bind(&key.name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to read lease")?;

        Ok(row
            .map(LeaseRow::into_lease)
            .transpose()
            .context("Stored lease is malformed")?)
    }

    // Conflicts are lost races, reported to the caller and not logged here.
    #[instrument(skip_all, fields(lease = %key, holder = %record.holder_identity))]
    async fn try_create(
        &self,
        key: &LeaseKey,
        record: &LeaseRecord,
    ) -> Result<LeaseVersion, StoreError> {
        let columns = LeaseColumns::from_record(record)?;
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;
        let version = next_version(&mut tx).await?;

        let result = sqlx::query(
            "INSERT INTO electorate_leases
                (namespace, name, holder_identity, acquire_time, renew_time,
                 lease_duration_ms, leader_transitions, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (namespace, name) DO NOTHING",
        )
        .bind(&key.namespace)
        .bind(&key.name)
        .bind(columns.holder_identity)
        .bind(columns.acquire_time)
        .bind(columns.renew_time)
        .bind(columns.lease_duration_ms)
        .bind(columns.leader_transitions)
        .bind(version)
        .execute(&mut *tx)
        .await
        .context("Failed to create lease")?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict);
        }
        tx.commit().await.context("Failed to commit lease")?;

        Ok(to_lease_version(version)?)
    }

    #[instrument(
        skip_all,
        fields(lease = %key, holder = %record.holder_identity, expected = %expected)
    )]
    async fn try_update(
        &self,
        key: &LeaseKey,
        record: &LeaseRecord,
        expected: LeaseVersion,
    ) -> Result<LeaseVersion, StoreError> {
        let columns = LeaseColumns::from_record(record)?;
        let expected_version = i64::try_from(expected.0).context("Lease version out of range")?;
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;
        let version = next_version(&mut tx).await?;

        let result = sqlx::query(
            "UPDATE electorate_leases
             SET holder_identity = ?3, acquire_time = ?4, renew_time = ?5,
                 lease_duration_ms = ?6, leader_transitions = ?7, version = ?8
             WHERE namespace = ?1 AND name = ?2 AND version = ?9",
        )
        .bind(&key.namespace)
        .bind(&key.name)
        .bind(columns.holder_identity)
        .bind(columns.acquire_time)
        .bind(columns.renew_time)
        .bind(columns.lease_duration_ms)
        .bind(columns.leader_transitions)
        .bind(version)
        .bind(expected_version)
        .execute(&mut *tx)
        .await
        .context("Failed to update lease")?;

        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict);
        }
        tx.commit().await.context("Failed to commit lease")?;

        Ok(to_lease_version(version)?)
    }
}

#[async_trait]
impl LeaseAdmin for SqliteLeaseStore {
    #[instrument(skip_all, err, fields(lease = %key))]
    async fn delete(&self, key: &LeaseKey) -> Result<Option<VersionedLease>, StoreError> {
        let row: Option<LeaseRow> = sqlx::query_as(
            "DELETE FROM electorate_leases WHERE namespace = ?1 AND name = ?2
             RETURNING holder_identity, acquire_time, renew_time, lease_duration_ms,
                       leader_transitions, version",
        )
        .bind(&key.namespace)
        .bind(&key.name)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to delete lease")?;

        Ok(row
            .map(LeaseRow::into_lease)
            .transpose()
            .context("Deleted lease is malformed")?)
    }
}
