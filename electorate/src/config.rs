//! Election options supplied by the caller and the resolved, immutable configuration.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::identity::resolve_identity;
use crate::lease::LeaseKey;
use crate::namespace::NamespaceResolver;

/// Errors raised while building an [`ElectionConfig`]. All of them are fatal at startup.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    /// Neither `KUBECONFIG` nor a home directory could be determined.
    #[error("Cannot detect kubeconfig path")]
    KubeconfigPathUnknown,

    /// The kubeconfig exists but could not be read or parsed.
    #[error("Unable to load kubeconfig {path:?}: {source}")]
    KubeconfigLoad {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("No current context defined in kubeconfig {path:?}")]
    NoCurrentContext { path: PathBuf },

    #[error("Context '{context}' not found in kubeconfig {path:?}")]
    ContextNotFound { context: String, path: PathBuf },

    #[error("No namespace defined in context '{context}' of kubeconfig {path:?}")]
    NoNamespace { context: String, path: PathBuf },

    #[error("Lock name must not be empty")]
    EmptyLockName,

    #[error("Invalid lease timings: {0}")]
    InvalidTimings(String),
}

/// Timing parameters of the election.
///
/// * `lease_duration` - how long a lease stays valid after its last renewal
/// * `renew_deadline` - how long after the last renewal the leader renews again
/// * `retry_period` - how often a candidate re-reads the lease
///
/// Valid timings satisfy `lease_duration > renew_deadline > retry_period > 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseTimings {
    pub lease_duration: Duration,
    pub renew_deadline: Duration,
    pub retry_period: Duration,
}

impl LeaseTimings {
    pub fn new(lease_duration: Duration, renew_deadline: Duration, retry_period: Duration) -> Self {
        Self {
            lease_duration,
            renew_deadline,
            retry_period,
        }
    }

    /// Derive the renew deadline (2/3) and retry period (1/6) from a lease duration.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use electorate::config::LeaseTimings;
    /// use std::time::Duration;
    ///
    /// let timings = LeaseTimings::from_lease_duration(Duration::from_secs(15));
    /// assert_eq!(timings.renew_deadline, Duration::from_secs(10));
    /// assert_eq!(timings.retry_period, Duration::from_millis(2500));
    /// ```
    pub fn from_lease_duration(lease_duration: Duration) -> Self {
        Self {
            lease_duration,
            renew_deadline: lease_duration * 2 / 3,
            retry_period: lease_duration / 6,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry_period.is_zero() {
            return Err(ConfigError::InvalidTimings(
                "retry period must be greater than zero".to_string(),
            ));
        }
        if self.lease_duration <= self.renew_deadline {
            return Err(ConfigError::InvalidTimings(format!(
                "lease duration {:?} must be greater than renew deadline {:?}",
                self.lease_duration, self.renew_deadline
            )));
        }
        if self.renew_deadline <= self.retry_period {
            return Err(ConfigError::InvalidTimings(format!(
                "renew deadline {:?} must be greater than retry period {:?}",
                self.renew_deadline, self.retry_period
            )));
        }
        Ok(())
    }

    /// Upper bound of a single store call: the margin between the renew
    /// deadline and expiry of the lease.
    pub fn store_timeout(&self) -> Duration {
        self.lease_duration.saturating_sub(self.renew_deadline)
    }
}

/// Options for configuring leader election, as supplied by the caller.
///
/// Identity and namespace are optional overrides; when absent they are
/// resolved by [`ElectionOptions::resolve`].
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ElectionOptions {
    /// Identity override. Empty or `None` means "resolve from the host".
    pub identity: Option<String>,

    /// Namespace override. Empty or `None` means "resolve from the environment".
    pub namespace: Option<String>,

    /// Name of the lease record.
    pub lock_name: String,

    pub timings: LeaseTimings,

    /// Clear the holder field when the loop is cancelled while leading.
    pub release_on_cancel: bool,
}

impl ElectionOptions {
    pub fn new(lock_name: impl Into<String>, timings: LeaseTimings) -> Self {
        Self {
            identity: None,
            namespace: None,
            lock_name: lock_name.into(),
            timings,
            release_on_cancel: false,
        }
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_release_on_cancel(mut self, release_on_cancel: bool) -> Self {
        self.release_on_cancel = release_on_cancel;
        self
    }

    /// Resolve identity and namespace from the process environment.
    pub fn resolve(&self) -> Result<ElectionConfig, ConfigError> {
        self.resolve_with(&NamespaceResolver::from_env())
    }

    /// Resolve with an explicit namespace resolver.
    pub fn resolve_with(
        &self,
        resolver: &NamespaceResolver,
    ) -> Result<ElectionConfig, ConfigError> {
        let identity = resolve_identity(self.identity.as_deref());
        let namespace = resolver.resolve(self.namespace.as_deref())?;

        Ok(ElectionConfig::new(identity, namespace, &self.lock_name, self.timings)?
            .with_release_on_cancel(self.release_on_cancel))
    }
}

/// Validated, immutable configuration of one election.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElectionConfig {
    identity: String,
    key: LeaseKey,
    timings: LeaseTimings,
    release_on_cancel: bool,
}

impl ElectionConfig {
    /// Build a configuration from already-resolved values.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use electorate::config::{ElectionConfig, LeaseTimings};
    /// use std::time::Duration;
    ///
    /// let config = ElectionConfig::new(
    ///     "replica-0",
    ///     "default",
    ///     "controller-lock",
    ///     LeaseTimings::from_lease_duration(Duration::from_secs(15)),
    /// )
    /// .unwrap();
    /// assert_eq!(config.key().to_string(), "default/controller-lock");
    /// ```
    pub fn new(
        identity: impl Into<String>,
        namespace: impl Into<String>,
        lock_name: impl Into<String>,
        timings: LeaseTimings,
    ) -> Result<Self, ConfigError> {
        let lock_name = lock_name.into();
        if lock_name.is_empty() {
            return Err(ConfigError::EmptyLockName);
        }
        timings.validate()?;

        Ok(Self {
            identity: identity.into(),
            key: LeaseKey::new(namespace, lock_name),
            timings,
            release_on_cancel: false,
        })
    }

    pub fn with_release_on_cancel(mut self, release_on_cancel: bool) -> Self {
        self.release_on_cancel = release_on_cancel;
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn namespace(&self) -> &str {
        &self.key.namespace
    }

    pub fn lock_name(&self) -> &str {
        &self.key.name
    }

    pub fn key(&self) -> &LeaseKey {
        &self.key
    }

    pub fn timings(&self) -> &LeaseTimings {
        &self.timings
    }

    pub fn lease_duration(&self) -> Duration {
        self.timings.lease_duration
    }

    pub fn renew_deadline(&self) -> Duration {
        self.timings.renew_deadline
    }

    pub fn retry_period(&self) -> Duration {
        self.timings.retry_period
    }

    pub fn release_on_cancel(&self) -> bool {
        self.release_on_cancel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timings() -> LeaseTimings {
        LeaseTimings::new(
            Duration::from_secs(15),
            Duration::from_secs(10),
            Duration::from_secs(2),
        )
    }

    #[test]
    fn test_valid_timings() {
        assert!(timings().validate().is_ok());
        assert_eq!(timings().store_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_derived_timings_are_valid() {
        let derived = LeaseTimings::from_lease_duration(Duration::from_secs(60));
        assert_eq!(derived.renew_deadline, Duration::from_secs(40));
        assert_eq!(derived.retry_period, Duration::from_secs(10));
        assert!(derived.validate().is_ok());
    }

    #[test]
    fn test_invalid_timings() {
        let secs = Duration::from_secs;
        let cases = [
            LeaseTimings::new(secs(10), secs(10), secs(1)),
            LeaseTimings::new(secs(5), secs(10), secs(1)),
            LeaseTimings::new(secs(15), secs(2), secs(2)),
            LeaseTimings::new(secs(15), secs(10), Duration::ZERO),
            LeaseTimings::from_lease_duration(Duration::ZERO),
        ];
        for timings in cases {
            let err = timings.validate().unwrap_err();
            assert!(
                matches!(err, ConfigError::InvalidTimings(_)),
                "unexpected error for {timings:?}: {err}"
            );
        }
    }

    #[test]
    fn test_config_rejects_empty_lock_name() {
        let err = ElectionConfig::new("me", "ns", "", timings()).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyLockName));
    }

    #[test]
    fn test_config_accessors() {
        let config = ElectionConfig::new("me", "ns", "lock", timings())
            .unwrap()
            .with_release_on_cancel(true);
        assert_eq!(config.identity(), "me");
        assert_eq!(config.namespace(), "ns");
        assert_eq!(config.lock_name(), "lock");
        assert_eq!(config.lease_duration(), Duration::from_secs(15));
        assert_eq!(config.renew_deadline(), Duration::from_secs(10));
        assert_eq!(config.retry_period(), Duration::from_secs(2));
        assert!(config.release_on_cancel());
    }

    #[test]
    fn test_options_resolve_with_overrides() {
        let resolver = NamespaceResolver::new()
            .with_service_account_path("/nonexistent/namespace")
            .with_kubeconfig_path(None)
            .with_home_dir(None);

        let config = ElectionOptions::new("lock", timings())
            .with_identity("replica-7")
            .with_namespace("prod")
            .with_release_on_cancel(true)
            .resolve_with(&resolver)
            .unwrap();

        assert_eq!(config.identity(), "replica-7");
        assert_eq!(config.namespace(), "prod");
        assert!(config.release_on_cancel());
    }

    #[test]
    fn test_options_resolve_fails_without_namespace() {
        let resolver = NamespaceResolver::new()
            .with_service_account_path("/nonexistent/namespace")
            .with_kubeconfig_path(None)
            .with_home_dir(None);

        let err = ElectionOptions::new("lock", timings())
            .resolve_with(&resolver)
            .unwrap_err();
        assert!(matches!(err, ConfigError::KubeconfigPathUnknown));
    }
}
