use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::config::ConfigError;
use crate::lease::StoreError;

/// Trait for querying leadership of the local instance.
///
/// Implementations determine whether the current instance should act as the leader
/// for side-effecting work such as periodic reconciliation.
#[async_trait]
pub trait Elector: Send + Sync {
    /// Check if this instance is currently the leader.
    ///
    /// This method should be lightweight and idempotent, as it may be called frequently.
    ///
    /// # Returns
    /// - `Ok(true)` if this instance is the leader
    /// - `Ok(false)` if another instance is the leader or leadership is not yet known
    /// - `Err` if leadership status cannot be determined
    async fn is_leader(&self) -> Result<bool, ElectorError>;

    /// Optional: Release leadership explicitly (for graceful shutdown).
    /// Default implementation is a no-op.
    async fn release_leadership(&self) -> Result<(), ElectorError> {
        Ok(())
    }
}

/// Errors that can occur during leader election
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ElectorError {
    #[error("Leader election configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Lease store error: {0}")]
    Store(#[from] StoreError),
}

/// Cloneable view of a running election.
///
/// The flag is flipped by the election loop's callback dispatcher only, so a
/// `true` answer means a "became leader" callback has fired and no matching
/// "stopped being leader" has fired yet.
///
/// # Example
/// ```rust
/// use electorate::{Elector, LeaderStatus};
///
/// # async fn example() {
/// let status = LeaderStatus::default();
/// assert!(!status.is_leader().await.unwrap());
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct LeaderStatus {
    leading: Arc<AtomicBool>,
    shutdown: CancellationToken,
}

impl LeaderStatus {
    pub(crate) fn new(shutdown: CancellationToken) -> Self {
        Self {
            leading: Arc::new(AtomicBool::new(false)),
            shutdown,
        }
    }

    /// Synchronous variant of [`Elector::is_leader`].
    pub fn leading(&self) -> bool {
        self.leading.load(Ordering::Acquire)
    }

    pub(crate) fn set_leading(&self, leading: bool) {
        self.leading.store(leading, Ordering::Release);
    }
}

#[async_trait]
impl Elector for LeaderStatus {
    async fn is_leader(&self) -> Result<bool, ElectorError> {
        Ok(self.leading())
    }

    /// Cancels the election loop. The loop releases the lease on its way out
    /// when release-on-cancel is configured.
    async fn release_leadership(&self) -> Result<(), ElectorError> {
        self.shutdown.cancel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn status_reflects_flag() {
        let status = LeaderStatus::new(CancellationToken::new());
        assert!(!status.is_leader().await.unwrap());

        status.set_leading(true);
        assert!(status.is_leader().await.unwrap());

        let copy = status.clone();
        status.set_leading(false);
        assert!(!copy.is_leader().await.unwrap());
    }

    #[tokio::test]
    async fn release_cancels_loop_token() {
        let token = CancellationToken::new();
        let status = LeaderStatus::new(token.clone());
        assert!(!token.is_cancelled());
        status.release_leadership().await.unwrap();
        assert!(token.is_cancelled());
    }

    #[test]
    fn error_display() {
        let err = ElectorError::from(ConfigError::EmptyLockName);
        assert!(err.to_string().contains("configuration error"));

        let err = ElectorError::from(StoreError::Conflict);
        assert!(err.to_string().contains("Lease store error"));
    }
}
