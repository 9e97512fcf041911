//! The lease election loop.
//!
//! A candidate reads the lease every retry period and claims it when it is
//! absent, expired or released. The leader renews the lease once the renew
//! deadline has passed since the last renewal; a single failed renewal ends
//! leadership. Ties between candidates are decided by the store's
//! compare-and-swap alone.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::callbacks::{CallbackDispatcher, LeaderCallbacks};
use crate::clock::{Clock, SystemClock};
use crate::config::{ElectionConfig, ElectionOptions};
use crate::elector::{ElectorError, LeaderStatus};
use crate::lease::{LeaseRecord, LeaseStore, StoreError, VersionedLease};

/// State of the loop. Only the loop reads or changes it.
#[derive(Debug)]
enum LeaderState {
    Candidate,
    Leading(VersionedLease),
    Stopped,
}

/// Runs leader election for one identity against one lease record.
///
/// # Example
///
/// ```rust,no_run
/// use electorate::config::{ElectionConfig, LeaseTimings};
/// use electorate::memory::InMemoryLeaseStore;
/// use electorate::LeaderElector;
/// use std::time::Duration;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = ElectionConfig::new(
///     "replica-0",
///     "default",
///     "controller-lock",
///     LeaseTimings::from_lease_duration(Duration::from_secs(15)),
/// )?
/// .with_release_on_cancel(true);
///
/// let elector = LeaderElector::new(config, InMemoryLeaseStore::new(), ());
/// let status = elector.status();
///
/// let shutdown = CancellationToken::new();
/// tokio::spawn(elector.run(shutdown.clone()));
///
/// // ..later
/// shutdown.cancel();
/// # let _ = status;
/// # Ok(())
/// # }
/// ```
pub struct LeaderElector<S> {
    config: ElectionConfig,
    store: S,
    clock: Arc<dyn Clock>,
    dispatcher: CallbackDispatcher,
    shutdown: CancellationToken,
}

impl<S> LeaderElector<S>
where
    S: LeaseStore,
{
    pub fn new<C>(config: ElectionConfig, store: S, callbacks: C) -> Self
    where
        C: LeaderCallbacks + 'static,
    {
        let shutdown = CancellationToken::new();
        let status = LeaderStatus::new(shutdown.clone());

        Self {
            config,
            store,
            clock: Arc::new(SystemClock),
            dispatcher: CallbackDispatcher::new(Box::new(callbacks), status),
            shutdown,
        }
    }

    pub fn with_clock<C>(mut self, clock: C) -> Self
    where
        C: Clock + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn config(&self) -> &ElectionConfig {
        &self.config
    }

    /// Handle reporting whether this elector currently leads.
    pub fn status(&self) -> LeaderStatus {
        self.dispatcher.status().clone()
    }

    /// Run the election until `cancellation_token` is cancelled or
    /// [`LeaderStatus::release_leadership`](crate::Elector::release_leadership) is called.
    ///
    /// Store failures never end the loop; they are logged and retried.
    #[instrument(skip_all, fields(identity = %self.config.identity(), lease = %self.config.key()))]
    pub async fn run(mut self, cancellation_token: CancellationToken) {
        let shutdown = self.shutdown.clone();
        let mut state = LeaderState::Candidate;

        info!("Starting leader election");

        loop {
            if cancellation_token.is_cancelled()
                || shutdown.is_cancelled()
                || matches!(state, LeaderState::Stopped)
            {
                break;
            }

            let wait;
            (state, wait) = self.step(state).await;

            tokio::select! {
                biased;
                _ = cancellation_token.cancelled() => break,
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        if let LeaderState::Leading(lease) = state {
            self.dispatcher.stopped_leading(self.config.identity());
            if self.config.release_on_cancel() {
                self.release(&lease).await;
            }
        }
        state = LeaderState::Stopped;
        info!(?state, "Leader election stopped");
    }

    /// Advance the state machine once. Returns the next state and how long to
    /// wait before the following step.
    async fn step(&mut self, state: LeaderState) -> (LeaderState, Duration) {
        let retry_period = self.config.retry_period();
        match state {
            LeaderState::Candidate => match self.try_acquire().await {
                Some(lease) => {
                    self.dispatcher.started_leading(self.config.identity());
                    let wait = self.renewal_delay(&lease.record);
                    (LeaderState::Leading(lease), wait)
                }
                None => (LeaderState::Candidate, retry_period),
            },
            LeaderState::Leading(lease) => match self.renew(&lease).await {
                Some(renewed) => {
                    let wait = self.renewal_delay(&renewed.record);
                    (LeaderState::Leading(renewed), wait)
                }
                None => {
                    self.dispatcher.stopped_leading(self.config.identity());
                    (LeaderState::Candidate, retry_period)
                }
            },
            LeaderState::Stopped => (LeaderState::Stopped, Duration::ZERO),
        }
    }

    /// One candidate step. Returns the lease if this identity holds it afterwards.
    #[instrument(skip_all)]
    async fn try_acquire(&mut self) -> Option<VersionedLease> {
        let now = self.clock.now();
        let current = match self.bounded(self.store.get(self.config.key())).await {
            Ok(current) => current,
            Err(e) => {
                warn!(error = %e, "Failed to read lease");
                return None;
            }
        };

        match current {
            Some(existing)
                if existing.record.is_held_by(self.config.identity())
                    && existing.record.is_valid_at(now) =>
            {
                info!(version = %existing.version, "Lease already held by this identity, resuming");
                Some(existing)
            }
            Some(existing) if !existing.record.is_acquirable_at(now) => {
                let holder = &existing.record.holder_identity;
                debug!(%holder, "Lease held by another candidate");
                self.dispatcher.observed_leader(&existing.record.holder_identity);
                None
            }
            current => self.claim(current, now).await,
        }
    }

    /// Create the lease if absent, otherwise take over the expired or released one.
    async fn claim(
        &mut self,
        current: Option<VersionedLease>,
        now: crate::DateTime,
    ) -> Option<VersionedLease> {
        let identity = self.config.identity();
        let duration = self.config.lease_duration();
        let key = self.config.key();

        let result = match &current {
            None => {
                let record = LeaseRecord::acquired(identity, now, duration);
                self.bounded(self.store.try_create(key, &record))
                    .await
                    .map(|version| VersionedLease { record, version })
            }
            Some(existing) => {
                let record = existing.record.taken_over_by(identity, now, duration);
                self.bounded(self.store.try_update(key, &record, existing.version))
                    .await
                    .map(|version| VersionedLease { record, version })
            }
        };

        match result {
            Ok(lease) => {
                debug!(version = %lease.version, "Acquired lease");
                Some(lease)
            }
            Err(StoreError::Conflict) => {
                debug!("Lost the race for the lease");
                self.observe_holder().await;
                None
            }
            Err(e) => {
                warn!(error = %e, "Failed to acquire lease");
                None
            }
        }
    }

    /// Re-read the lease after a lost race to learn who won.
    async fn observe_holder(&mut self) {
        match self.bounded(self.store.get(self.config.key())).await {
            Ok(Some(winner)) if winner.record.is_held() => {
                self.dispatcher.observed_leader(&winner.record.holder_identity);
            }
            Ok(_) => {}
            Err(e) => debug!(error = %e, "Failed to read lease after conflict"),
        }
    }

    /// One leader step. `None` means leadership is lost.
    #[instrument(skip_all, fields(version = %lease.version))]
    async fn renew(&self, lease: &VersionedLease) -> Option<VersionedLease> {
        let now = self.clock.now();
        if !lease.record.is_valid_at(now) {
            warn!("Lease expired before it could be renewed");
            return None;
        }

        let record = lease.record.renewed(now);
        let result = self
            .bounded(self.store.try_update(self.config.key(), &record, lease.version))
            .await;

        match result {
            Ok(version) => {
                debug!(%version, "Renewed lease");
                Some(VersionedLease { record, version })
            }
            Err(StoreError::Conflict) => {
                info!("Lease was modified by another candidate");
                None
            }
            Err(e) => {
                warn!(error = %e, "Failed to renew lease");
                None
            }
        }
    }

    /// Best-effort release on shutdown. Not retried.
    async fn release(&self, lease: &VersionedLease) {
        let record = lease.record.released(self.clock.now());
        match self
            .bounded(self.store.try_update(self.config.key(), &record, lease.version))
            .await
        {
            Ok(_) => info!("Released lease"),
            Err(e) => warn!(error = %e, "Failed to release lease"),
        }
    }

    /// Time until the renew deadline, measured from the last renewal.
    fn renewal_delay(&self, record: &LeaseRecord) -> Duration {
        let elapsed = (self.clock.now() - record.renew_time)
            .to_std()
            .unwrap_or(Duration::ZERO);
        self.config.renew_deadline().saturating_sub(elapsed)
    }

    async fn bounded<T, F>(&self, operation: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let timeout = self.config.timings().store_timeout();
        tokio::time::timeout(timeout, operation)
            .await
            .unwrap_or(Err(StoreError::Timeout(timeout)))
    }
}

/// Resolve identity and namespace, then run the election until cancelled.
///
/// Configuration errors are returned before any store access; they are fatal
/// for the caller's startup. Once the loop runs, the function returns `Ok(())`
/// only after cancellation.
pub async fn start_leader_election<S, C>(
    options: &ElectionOptions,
    store: S,
    callbacks: C,
    cancellation_token: CancellationToken,
) -> Result<(), ElectorError>
where
    S: LeaseStore,
    C: LeaderCallbacks + 'static,
{
    let config = options.resolve()?;
    debug!(
        lease = %config.key(),
        identity = %config.identity(),
        "Attempting to acquire leader lease"
    );

    LeaderElector::new(config, store, callbacks)
        .run(cancellation_token)
        .await;
    Ok(())
}
