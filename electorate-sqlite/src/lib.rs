//! SQLite implementation of the LeaseStore trait from electorate

pub mod store;
mod types;

pub use store::SqliteLeaseStore;
use sqlx::migrate::Migrator;
pub static MIGRATOR: Migrator = sqlx::migrate!();

#[cfg(test)]
mod test {
    use crate::store::SqliteLeaseStore;
    use crate::MIGRATOR;
    use electorate::config::{ElectionConfig, LeaseTimings};
    use electorate::prelude::CancellationToken;
    use electorate::{LeaderCallbacks, LeaderElector, LeaseKey, LeaseRecord, LeaseStore};
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;
    use std::io;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tracing_subscriber::fmt::format::FmtSpan;

    #[allow(dead_code)]
    pub fn setup_logger() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .try_init();
    }

    // A single connection, since every `:memory:` connection is its own database.
    async fn make_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        MIGRATOR.run(&pool).await.unwrap();
        pool
    }

    electorate::generate_lease_store_spec_tests! {
        backend = "sqlite",
        test_attr = tokio::test,
        setup = || {
            let pool = make_pool().await;
            SqliteLeaseStore::with_pool(pool)
        }
    }

    #[tokio::test]
    async fn millisecond_timestamps_survive() {
        let store = SqliteLeaseStore::with_pool(make_pool().await);
        let key = LeaseKey::new("ns", "lock");
        let now =
            chrono::DateTime::<chrono::Utc>::from_timestamp_millis(1_700_000_000_123).unwrap();
        let record = LeaseRecord::acquired("a", now, Duration::from_millis(15_500));

        store.try_create(&key, &record).await.unwrap();
        let stored = store.get(&key).await.unwrap().unwrap();
        assert_eq!(stored.record, record);
    }

    #[tokio::test]
    async fn versions_are_never_reused() {
        let store = SqliteLeaseStore::with_pool(make_pool().await);
        let first = LeaseKey::new("ns", "first");
        let second = LeaseKey::new("ns", "second");
        let record = LeaseRecord::acquired("a", chrono::Utc::now(), Duration::from_secs(15));

        let v1 = store.try_create(&first, &record).await.unwrap();
        let v2 = store.try_create(&second, &record).await.unwrap();
        assert!(store.try_create(&first, &record).await.is_err());
        let v3 = store.try_update(&first, &record, v1).await.unwrap();

        assert!(v1 < v2 && v2 < v3, "{v1} {v2} {v3}");
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn conflicts_are_not_logged_as_errors() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let store = SqliteLeaseStore::with_pool(make_pool().await);
        let key = LeaseKey::new("ns", "lock");
        let record = LeaseRecord::acquired("a", chrono::Utc::now(), Duration::from_secs(15));
        let version = store.try_create(&key, &record).await.unwrap();

        assert!(store.try_create(&key, &record).await.unwrap_err().is_conflict());
        store.try_update(&key, &record, version).await.unwrap();
        let err = store.try_update(&key, &record, version).await.unwrap_err();
        assert!(err.is_conflict());

        let output = String::from_utf8_lossy(&logs.0.lock().unwrap()).into_owned();
        assert!(output.contains("try_update"), "{output}");
        assert!(!output.contains("ERROR"), "{output}");
    }

    struct Leading(mpsc::UnboundedSender<&'static str>);

    impl LeaderCallbacks for Leading {
        fn on_started_leading(&self, _leadership: CancellationToken) {
            let _ = self.0.send("started");
        }

        fn on_stopped_leading(&self) {
            let _ = self.0.send("stopped");
        }
    }

    #[tokio::test]
    async fn elector_runs_against_sqlite() {
        setup_logger();
        let store = Arc::new(SqliteLeaseStore::with_pool(make_pool().await));
        let timings = LeaseTimings::new(
            Duration::from_secs(15),
            Duration::from_secs(10),
            Duration::from_secs(2),
        );
        let config = ElectionConfig::new("replica-a", "ns", "lock", timings)
            .unwrap()
            .with_release_on_cancel(true);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let elector = LeaderElector::new(config, store.clone(), Leading(tx));
        let token = CancellationToken::new();
        let handle = tokio::spawn(elector.run(token.clone()));

        assert_eq!(rx.recv().await, Some("started"));
        let key = LeaseKey::new("ns", "lock");
        let stored = store.get(&key).await.unwrap().unwrap();
        assert_eq!(stored.record.holder_identity, "replica-a");

        token.cancel();
        handle.await.unwrap();
        assert_eq!(rx.recv().await, Some("stopped"));

        let stored = store.get(&key).await.unwrap().unwrap();
        assert!(!stored.record.is_held());
    }
}
