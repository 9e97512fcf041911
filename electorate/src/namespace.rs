//! Resolution of the namespace the lease record lives in.
//!
//! Lookup order:
//!
//! 1. explicit override
//! 2. the in-cluster service account namespace file
//! 3. the `current-context` namespace of the local kubeconfig (`$KUBECONFIG`,
//!    else `~/.kube/config`)
//!
//! Resolution performs file reads only and runs once before the election starts.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;
use tracing::debug;

use crate::config::ConfigError;

/// Namespace file mounted into every pod with a service account.
pub const SERVICE_ACCOUNT_NAMESPACE_PATH: &str =
    "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Environment variable overriding the kubeconfig location.
pub const KUBECONFIG_ENV: &str = "KUBECONFIG";

/// Resolve the namespace using the process environment.
pub fn resolve_namespace(configured: Option<&str>) -> Result<String, ConfigError> {
    NamespaceResolver::from_env().resolve(configured)
}

/// Namespace lookup with explicit inputs.
///
/// [`NamespaceResolver::from_env`] captures `$KUBECONFIG` and the home directory;
/// the `with_*` methods replace individual inputs.
///
/// # Examples
///
/// ```rust
/// use electorate::namespace::NamespaceResolver;
///
/// let namespace = NamespaceResolver::from_env().resolve(Some("controllers")).unwrap();
/// assert_eq!(namespace, "controllers");
/// ```
#[derive(Debug, Clone)]
pub struct NamespaceResolver {
    service_account_path: PathBuf,
    kubeconfig_path: Option<PathBuf>,
    home_dir: Option<PathBuf>,
}

impl Default for NamespaceResolver {
    fn default() -> Self {
        Self::from_env()
    }
}

impl NamespaceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_env() -> Self {
        let kubeconfig_path =
            std::env::var_os(KUBECONFIG_ENV).and_then(|value| first_path(&value));

        Self {
            service_account_path: PathBuf::from(SERVICE_ACCOUNT_NAMESPACE_PATH),
            kubeconfig_path,
            home_dir: dirs::home_dir(),
        }
    }

    pub fn with_service_account_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.service_account_path = path.into();
        self
    }

    /// Replace the `$KUBECONFIG` value. `None` behaves as if the variable is unset.
    pub fn with_kubeconfig_path(mut self, path: Option<PathBuf>) -> Self {
        self.kubeconfig_path = path;
        self
    }

    pub fn with_home_dir(mut self, home: Option<PathBuf>) -> Self {
        self.home_dir = home;
        self
    }

    /// Resolve the namespace, returning the first successful source.
    pub fn resolve(&self, configured: Option<&str>) -> Result<String, ConfigError> {
        if let Some(namespace) = configured.filter(|ns| !ns.is_empty()) {
            return Ok(namespace.to_string());
        }

        if let Some(namespace) = self.in_cluster_namespace() {
            debug!(%namespace, "Using service account namespace");
            return Ok(namespace);
        }

        let path = self.kubeconfig_path()?;
        let namespace = namespace_from_kubeconfig(&path)?;
        debug!(%namespace, path = %path.display(), "Using kubeconfig namespace");
        Ok(namespace)
    }

    fn in_cluster_namespace(&self) -> Option<String> {
        let contents = std::fs::read_to_string(&self.service_account_path).ok()?;
        let namespace = contents.trim();
        (!namespace.is_empty()).then(|| namespace.to_string())
    }

    fn kubeconfig_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(path) = &self.kubeconfig_path {
            return Ok(path.clone());
        }
        self.home_dir
            .as_ref()
            .map(|home| home.join(".kube").join("config"))
            .ok_or(ConfigError::KubeconfigPathUnknown)
    }
}

// `$KUBECONFIG` may hold a path list; only the first entry is consulted.
fn first_path(value: &OsStr) -> Option<PathBuf> {
    std::env::split_paths(value).find(|p| !p.as_os_str().is_empty())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Kubeconfig {
    current_context: Option<String>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: Option<ContextSpec>,
}

#[derive(Debug, Deserialize)]
struct ContextSpec {
    namespace: Option<String>,
}

fn load_kubeconfig(path: &Path) -> anyhow::Result<Kubeconfig> {
    let contents = std::fs::read_to_string(path).context("Failed to read kubeconfig")?;
    serde_yaml_ng::from_str(&contents).context("Failed to parse kubeconfig")
}

fn namespace_from_kubeconfig(path: &Path) -> Result<String, ConfigError> {
    let config = load_kubeconfig(path).map_err(|source| ConfigError::KubeconfigLoad {
        path: path.to_path_buf(),
        source,
    })?;

    let current = config
        .current_context
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ConfigError::NoCurrentContext {
            path: path.to_path_buf(),
        })?;

    let context = config
        .contexts
        .into_iter()
        .find(|c| c.name == current)
        .ok_or_else(|| ConfigError::ContextNotFound {
            context: current.clone(),
            path: path.to_path_buf(),
        })?;

    context
        .context
        .and_then(|spec| spec.namespace)
        .filter(|ns| !ns.is_empty())
        .ok_or_else(|| ConfigError::NoNamespace {
            context: current,
            path: path.to_path_buf(),
        })
}
