//! Deployment configuration.
//!
//! The config file is a loosely structured YAML document. Every recognised
//! key is optional and falls back to a hardcoded default, so values are read
//! through dotted-path lookups and then resolved into [`Settings`].

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use tracing::debug;

use crate::error::DeployError;

/// Default dashboard namespace.
pub const DEFAULT_DASHBOARD_NAMESPACE: &str = "kubernetes-dashboard";
/// Namespace used by older manifest-based Teleport installs.
pub const DEFAULT_LEGACY_NAMESPACE: &str = "teleport";
/// Default agent namespace.
pub const DEFAULT_AGENT_NAMESPACE: &str = "teleport-agent";
/// Default namespace for the self-hosted Teleport cluster.
pub const DEFAULT_CLUSTER_NAMESPACE: &str = "teleport-cluster";
/// Default Kubernetes cluster name registered with Teleport.
pub const DEFAULT_CLUSTER_NAME: &str = "minikube";
/// Teleport Helm chart version.
pub const DEFAULT_CHART_VERSION: &str = "18.6.0";

/// Look up a dotted `path` in `doc`, returning `default` when any segment is
/// missing or the value is empty.
///
/// Scalars are rendered as strings and trimmed. Null, `false`, zero, empty
/// strings and collections all count as empty.
#[must_use]
pub fn get_config_value(doc: &Value, path: &str, default: &str) -> String {
    let mut current = doc;
    for key in path.split('.') {
        match current.get(key) {
            Some(next) => current = next,
            None => return default.to_string(),
        }
    }

    match current {
        Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
        Value::Bool(true) => "true".to_string(),
        Value::Number(n) if n.as_f64().is_some_and(|f| f != 0.0) => n.to_string(),
        _ => default.to_string(),
    }
}

/// How the Teleport control plane is provided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployMode {
    /// Control plane is installed into the cluster by this tool.
    Local,
    /// Control plane is an existing Teleport Enterprise cluster.
    Enterprise {
        /// The configured `https://` proxy address.
        proxy: String,
    },
}

impl DeployMode {
    /// Classify a `proxy_addr` value.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::InvalidProxyAddr`] when the value is non-empty
    /// and does not start with `https://`.
    pub fn from_proxy_addr(proxy_addr: &str) -> Result<Self, DeployError> {
        let proxy = proxy_addr.trim();
        if proxy.is_empty() {
            Ok(Self::Local)
        } else if proxy.starts_with("https://") {
            Ok(Self::Enterprise {
                proxy: proxy.to_string(),
            })
        } else {
            Err(DeployError::InvalidProxyAddr(proxy.to_string()))
        }
    }
}

impl std::fmt::Display for DeployMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Enterprise { .. } => write!(f, "enterprise"),
        }
    }
}

/// Retry, poll and settle intervals, in seconds.
///
/// The defaults were tuned by hand against minikube; any of them can be
/// overridden under `timings:` in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timings {
    /// Sleep between pod existence polls.
    pub poll_interval_secs: u64,
    /// How long to wait for the Teleport auth pod to appear.
    pub auth_pod_timeout_secs: u64,
    /// Ready timeout before admin user setup.
    pub pod_ready_timeout_secs: u64,
    /// Ready timeout before token generation.
    pub token_ready_timeout_secs: u64,
    /// Number of join token attempts.
    pub token_attempts: u32,
    /// Sleep before retrying when no token could be extracted.
    pub token_retry_delay_secs: u64,
    /// Sleep before retrying when in-cluster `tctl` exited non-zero.
    pub token_failure_delay_secs: u64,
    /// Number of admin invite link attempts.
    pub invite_attempts: u32,
    /// Sleep before resetting the admin user again for a fresh invite link.
    pub invite_retry_delay_secs: u64,
    /// Wait after applying RBAC for service account tokens.
    pub rbac_settle_secs: u64,
    /// Wait after installing the Teleport cluster chart.
    pub cluster_settle_secs: u64,
    /// Wait after the auth pod reports ready.
    pub admin_settle_secs: u64,
    /// Wait before generating the join token.
    pub token_settle_secs: u64,
    /// Wait after installing the dashboard chart.
    pub dashboard_settle_secs: u64,
    /// Wait after restarting agent pods.
    pub restart_settle_secs: u64,
    /// Wait before checking the port-forward process.
    pub port_forward_settle_secs: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 2,
            auth_pod_timeout_secs: 60,
            pod_ready_timeout_secs: 120,
            token_ready_timeout_secs: 60,
            token_attempts: 2,
            token_retry_delay_secs: 5,
            token_failure_delay_secs: 10,
            invite_attempts: 2,
            invite_retry_delay_secs: 5,
            rbac_settle_secs: 5,
            cluster_settle_secs: 5,
            admin_settle_secs: 5,
            token_settle_secs: 3,
            dashboard_settle_secs: 10,
            restart_settle_secs: 3,
            port_forward_settle_secs: 2,
        }
    }
}

/// Resolved deployment settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Namespace of the Kubernetes Dashboard release.
    pub dashboard_namespace: String,
    /// Legacy Teleport namespace, still cleaned up and searched for logs.
    pub legacy_namespace: String,
    /// Namespace of the Teleport kube agent release.
    pub agent_namespace: String,
    /// Namespace of the self-hosted Teleport cluster release.
    pub cluster_namespace: String,
    /// Kubernetes cluster name registered with Teleport.
    pub cluster_name: String,
    /// Raw `proxy_addr` value.
    pub proxy_addr: String,
    /// Teleport chart version for both cluster and agent charts.
    pub chart_version: String,
    /// Directory holding `namespace.yaml` and `rbac.yaml`.
    pub manifests_dir: PathBuf,
    /// Retry and poll intervals.
    pub timings: Timings,
}

impl Settings {
    /// Deployment mode implied by `proxy_addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if `proxy_addr` is malformed.
    pub fn mode(&self) -> Result<DeployMode, DeployError> {
        DeployMode::from_proxy_addr(&self.proxy_addr)
    }

    /// In-cluster host name the Teleport proxy advertises.
    #[must_use]
    pub fn cluster_host(&self) -> String {
        let ns = &self.cluster_namespace;
        format!("{ns}.{ns}.svc.cluster.local")
    }

    /// Path of the namespace manifest.
    #[must_use]
    pub fn namespace_manifest(&self) -> PathBuf {
        self.manifests_dir.join("namespace.yaml")
    }

    /// Path of the RBAC manifest.
    #[must_use]
    pub fn rbac_manifest(&self) -> PathBuf {
        self.manifests_dir.join("rbac.yaml")
    }
}

/// A loaded config document.
#[derive(Debug, Clone)]
pub struct Config {
    base_dir: PathBuf,
    doc: Value,
}

impl Config {
    /// Read and parse the config file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::ConfigNotFound`] if the file is missing, or an
    /// error if it cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(DeployError::ConfigNotFound(path.to_path_buf()).into());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

        debug!(path = %path.display(), "Loaded config");
        Self::from_yaml_str(&content, base_dir)
    }

    /// Parse a config document; relative paths resolve against `base_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if `content` is not valid YAML.
    pub fn from_yaml_str(content: &str, base_dir: impl Into<PathBuf>) -> Result<Self> {
        let doc: Value = if content.trim().is_empty() {
            Value::Null
        } else {
            serde_yaml::from_str(content).context("Failed to parse config YAML")?
        };
        Ok(Self {
            base_dir: base_dir.into(),
            doc,
        })
    }

    /// Dotted-path lookup with default.
    #[must_use]
    pub fn get(&self, path: &str, default: &str) -> String {
        get_config_value(&self.doc, path, default)
    }

    /// Resolve all recognised keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the `timings` section has the wrong shape.
    pub fn settings(&self) -> Result<Settings> {
        let timings = match self.doc.get("timings") {
            Some(value) if !value.is_null() => serde_yaml::from_value(value.clone())
                .context("Invalid timings section in config")?,
            _ => Timings::default(),
        };

        let manifests_dir = PathBuf::from(self.get("manifests_dir", "k8s"));
        let manifests_dir = if manifests_dir.is_absolute() {
            manifests_dir
        } else {
            self.base_dir.join(manifests_dir)
        };

        Ok(Settings {
            dashboard_namespace: self.get("kubernetes.namespace", DEFAULT_DASHBOARD_NAMESPACE),
            legacy_namespace: self.get("teleport.namespace", DEFAULT_LEGACY_NAMESPACE),
            agent_namespace: self.get("teleport.agent_namespace", DEFAULT_AGENT_NAMESPACE),
            cluster_namespace: self.get("teleport.cluster_namespace", DEFAULT_CLUSTER_NAMESPACE),
            cluster_name: self.get("teleport.cluster_name", DEFAULT_CLUSTER_NAME),
            proxy_addr: self.get("teleport.proxy_addr", ""),
            chart_version: self.get("teleport.chart_version", DEFAULT_CHART_VERSION),
            manifests_dir,
            timings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(yaml: &str) -> Value {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_missing_keys_return_default() {
        let d = doc("teleport:\n  cluster_name: prod\n");
        assert_eq!(get_config_value(&d, "kubernetes.namespace", "kd"), "kd");
        assert_eq!(get_config_value(&d, "teleport.proxy_addr", ""), "");
        assert_eq!(get_config_value(&d, "teleport.cluster_name.extra", "x"), "x");
        assert_eq!(get_config_value(&Value::Null, "a.b.c", "fallback"), "fallback");
    }

    #[test]
    fn test_present_values_are_trimmed() {
        let d = doc("teleport:\n  cluster_name: '  prod  '\n  port: 443\n");
        assert_eq!(get_config_value(&d, "teleport.cluster_name", "x"), "prod");
        assert_eq!(get_config_value(&d, "teleport.port", "x"), "443");
    }

    #[test]
    fn test_empty_values_return_default() {
        let d = doc("teleport:\n  proxy_addr: ''\n  cluster_name: ~\n  agent_namespace: {}\n");
        assert_eq!(get_config_value(&d, "teleport.proxy_addr", "d"), "d");
        assert_eq!(get_config_value(&d, "teleport.cluster_name", "d"), "d");
        assert_eq!(get_config_value(&d, "teleport.agent_namespace", "d"), "d");
    }

    #[test]
    fn test_proxy_addr_validation() {
        assert_eq!(DeployMode::from_proxy_addr("").unwrap(), DeployMode::Local);
        assert_eq!(DeployMode::from_proxy_addr("   ").unwrap(), DeployMode::Local);
        assert_eq!(
            DeployMode::from_proxy_addr("https://example.teleport.com:443").unwrap(),
            DeployMode::Enterprise {
                proxy: "https://example.teleport.com:443".into()
            }
        );
        for bad in ["http://example.com", "example.com:443", "ftp://x", "HTTPS://x"] {
            assert!(matches!(
                DeployMode::from_proxy_addr(bad),
                Err(DeployError::InvalidProxyAddr(_))
            ));
        }
    }

    #[test]
    fn test_settings_defaults() {
        let config = Config::from_yaml_str("", "/opt/deploy").unwrap();
        let settings = config.settings().unwrap();
        assert_eq!(settings.dashboard_namespace, "kubernetes-dashboard");
        assert_eq!(settings.agent_namespace, "teleport-agent");
        assert_eq!(settings.cluster_namespace, "teleport-cluster");
        assert_eq!(settings.legacy_namespace, "teleport");
        assert_eq!(settings.cluster_name, "minikube");
        assert_eq!(settings.chart_version, "18.6.0");
        assert_eq!(settings.manifests_dir, PathBuf::from("/opt/deploy/k8s"));
        assert_eq!(settings.timings, Timings::default());
        assert_eq!(settings.mode().unwrap(), DeployMode::Local);
        assert_eq!(
            settings.cluster_host(),
            "teleport-cluster.teleport-cluster.svc.cluster.local"
        );
    }

    #[test]
    fn test_partial_timings_override() {
        let config = Config::from_yaml_str(
            "timings:\n  token_attempts: 3\n  poll_interval_secs: 1\n",
            ".",
        )
        .unwrap();
        let timings = config.settings().unwrap().timings;
        assert_eq!(timings.token_attempts, 3);
        assert_eq!(timings.poll_interval_secs, 1);
        assert_eq!(timings.dashboard_settle_secs, 10);
        assert_eq!(timings.invite_attempts, 2);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("config.yaml")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<DeployError>(),
            Some(DeployError::ConfigNotFound(_))
        ));
    }

    #[test]
    fn test_load_resolves_manifests_relative_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "manifests_dir: manifests\nkubernetes:\n  namespace: dash\n").unwrap();

        let settings = Config::load(&path).unwrap().settings().unwrap();
        assert_eq!(settings.dashboard_namespace, "dash");
        assert_eq!(settings.rbac_manifest(), dir.path().join("manifests/rbac.yaml"));
    }
}
