//! Lease-based leader election for replicated control loops.
//!
//! Several identical instances contend for one lease record in a shared
//! store; the holder is the leader and performs side-effecting work, the
//! others wait as candidates and take over once the lease expires or is
//! released.
//!
//! # Overview
//!
//! - [`identity`] and [`namespace`] resolve who this process is and where the lease lives
//! - [`lease`] defines the record and the [`LeaseStore`] compare-and-swap interface
//! - [`LeaderElector`] runs the candidate/leader state machine
//! - [`LeaderCallbacks`] receive leadership transitions
//! - [`LeaderStatus`] implements [`Elector`] for code that only polls leadership
//!
//! # Examples
//!
//! ## Resolve configuration and run until shutdown
//!
//! ```rust,no_run
//! use electorate::prelude::*;
//! use std::time::Duration;
//!
//! struct Controller;
//!
//! impl LeaderCallbacks for Controller {
//!     fn on_started_leading(&self, leadership: CancellationToken) {
//!         tokio::spawn(async move { leadership.cancelled().await });
//!     }
//!
//!     fn on_new_leader(&self, identity: &str) {
//!         println!("{identity} is leading");
//!     }
//! }
//!
//! # async fn example() -> Result<(), ElectorError> {
//! let options = ElectionOptions::new(
//!     "controller-lock",
//!     LeaseTimings::from_lease_duration(Duration::from_secs(15)),
//! )
//! .with_release_on_cancel(true);
//!
//! let shutdown = CancellationToken::new();
//! start_leader_election(&options, InMemoryLeaseStore::new(), Controller, shutdown).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Polling leadership
//!
//! ```rust
//! use electorate::{Elector, LeaderStatus};
//!
//! # async fn example() {
//! let status = LeaderStatus::default();
//! if !status.is_leader().await.unwrap() {
//!     println!("standing by");
//! }
//! # }
//! ```

pub mod callbacks;
pub mod clock;
pub mod config;
pub mod election;
pub mod elector;
pub mod identity;
pub mod lease;
pub mod memory;
pub mod namespace;

/// Shared test specifications for LeaseStore implementations.
///
/// Backend tests invoke [`generate_lease_store_spec_tests!`] to run these
/// against their store.
#[doc(hidden)]
pub mod lease_store_spec;

#[doc(hidden)]
pub use paste;

/// An alias for `chrono::DateTime<chrono::Utc>`
pub type DateTime = chrono::DateTime<chrono::Utc>;

// Re-export main types
pub use callbacks::LeaderCallbacks;
pub use config::{ConfigError, ElectionConfig, ElectionOptions, LeaseTimings};
pub use election::{start_leader_election, LeaderElector};
pub use elector::{Elector, ElectorError, LeaderStatus};
pub use lease::{
    LeaseAdmin, LeaseKey, LeaseRecord, LeaseStore, LeaseVersion, StoreError, VersionedLease,
};

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use electorate::prelude::*;
/// ```
pub mod prelude {
    pub use crate::callbacks::LeaderCallbacks;
    pub use crate::config::{ConfigError, ElectionConfig, ElectionOptions, LeaseTimings};
    pub use crate::election::{start_leader_election, LeaderElector};
    pub use crate::elector::{Elector, ElectorError, LeaderStatus};
    pub use crate::lease::{LeaseKey, LeaseRecord, LeaseStore, StoreError};
    pub use crate::memory::InMemoryLeaseStore;
    pub use tokio_util::sync::CancellationToken;
}
