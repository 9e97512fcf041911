//! Resolution of the identity this process contends with.
//!
//! The identity is written into the lease record's holder field, so it must be
//! stable for the lifetime of the process and distinct between replicas.

use chrono::Utc;
use tracing::debug;

/// Prefix of identities synthesized when neither an override nor a host name is available.
pub const FALLBACK_IDENTITY_PREFIX: &str = "electorate";

/// Resolve the identity of the local process.
///
/// Order: a non-empty `configured` value verbatim, then the host name, then
/// `electorate-<unix nanos>`. Never fails.
///
/// # Examples
///
/// ```rust
/// use electorate::identity::resolve_identity;
///
/// assert_eq!(resolve_identity(Some("replica-0")), "replica-0");
/// assert!(!resolve_identity(None).is_empty());
/// ```
pub fn resolve_identity(configured: Option<&str>) -> String {
    resolve_identity_with(configured, local_hostname)
}

/// Same as [`resolve_identity`] with an explicit host name source.
pub fn resolve_identity_with<F>(configured: Option<&str>, hostname: F) -> String
where
    F: FnOnce() -> Option<String>,
{
    if let Some(identity) = configured.filter(|s| !s.is_empty()) {
        return identity.to_string();
    }

    if let Some(host) = hostname().filter(|h| !h.is_empty()) {
        return host;
    }

    let identity = fallback_identity();
    debug!(%identity, "Host name unavailable, using synthesized identity");
    identity
}

fn local_hostname() -> Option<String> {
    gethostname::gethostname().into_string().ok()
}

fn fallback_identity() -> String {
    let now = Utc::now();
    // Nanoseconds overflow i64 after 2262; fall back to microseconds there.
    let stamp = now
        .timestamp_nanos_opt()
        .unwrap_or_else(|| now.timestamp_micros());
    format!("{FALLBACK_IDENTITY_PREFIX}-{stamp}")
}
