//! Time source used to stamp and validate lease records.

use chrono::Utc;

use crate::DateTime;

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime;
}

/// [`Clock`] backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime {
        Utc::now()
    }
}

/// Wall clock that advances with the tokio runtime, so paused-time tests can
/// move lease expiry forward with `tokio::time::advance`.
#[cfg(test)]
#[derive(Debug, Clone)]
pub(crate) struct RuntimeClock {
    origin: DateTime,
    started: tokio::time::Instant,
}

#[cfg(test)]
impl RuntimeClock {
    pub(crate) fn new() -> Self {
        Self {
            origin: Utc::now(),
            started: tokio::time::Instant::now(),
        }
    }
}

#[cfg(test)]
impl Clock for RuntimeClock {
    fn now(&self) -> DateTime {
        let elapsed = chrono::TimeDelta::from_std(self.started.elapsed()).unwrap();
        self.origin + elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn system_clock_is_monotonic_enough() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }

    #[tokio::test(start_paused = true)]
    async fn runtime_clock_follows_paused_time() {
        let clock = RuntimeClock::new();
        let before = clock.now();
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(clock.now() - before, chrono::TimeDelta::seconds(30));
    }
}
