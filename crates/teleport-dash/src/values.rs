//! Helm values for the Teleport charts.
//!
//! Values are built as typed structs and rendered to a temporary YAML file
//! that lives only as long as the `helm` invocation.

use std::collections::BTreeMap;
use std::io::Write;

use anyhow::{Context, Result};
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::extract::FORWARDED_PORT;

/// Values for the `teleport/teleport-cluster` chart.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterValues {
    pub cluster_name: String,
    pub proxy_listener_mode: String,
    pub acme: bool,
    pub public_addr: Vec<String>,
    pub tunnel_public_addr: Vec<String>,
    pub extra_args: Vec<String>,
    pub auth: AuthValues,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthValues {
    pub service: AuthService,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthService {
    pub enabled: bool,
    #[serde(rename = "type")]
    pub service_type: String,
}

impl ClusterValues {
    /// Multiplexed, ACME-less cluster reachable at `host` inside the cluster.
    #[must_use]
    pub fn in_cluster(cluster_name: &str, host: &str) -> Self {
        Self {
            cluster_name: cluster_name.to_string(),
            proxy_listener_mode: "multiplex".into(),
            acme: false,
            public_addr: vec![format!("{host}:{FORWARDED_PORT}")],
            tunnel_public_addr: vec![format!("{host}:443")],
            extra_args: vec!["--insecure".into()],
            auth: AuthValues {
                service: AuthService {
                    enabled: true,
                    service_type: "ClusterIP".into(),
                },
            },
        }
    }
}

/// Values for the `teleport/teleport-kube-agent` chart.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentValues {
    pub auth_token: String,
    pub proxy_addr: String,
    pub kube_cluster_name: String,
    pub roles: String,
    #[serde(rename = "insecureSkipProxyTLSVerify", skip_serializing_if = "Option::is_none")]
    pub insecure_skip_proxy_tls_verify: Option<bool>,
    pub updater: Toggle,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<LogValues>,
    pub apps: Vec<StaticApp>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub app_resources: Vec<AppResource>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub kubernetes_discovery: Vec<DiscoveryRule>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Toggle {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogValues {
    pub level: String,
}

/// A statically registered Teleport application.
#[derive(Debug, Clone, Serialize)]
pub struct StaticApp {
    pub name: String,
    pub uri: String,
    pub insecure_skip_verify: bool,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppResource {
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryRule {
    pub types: Vec<String>,
    pub namespaces: Vec<String>,
}

/// Connection parameters shared by both agent flavours.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentJoin {
    pub token: String,
    pub proxy_addr: String,
    pub cluster_name: String,
}

impl AgentValues {
    /// Agent that discovers the dashboard through Service annotations.
    #[must_use]
    pub fn discovery(join: &AgentJoin, dashboard_namespace: &str) -> Self {
        let labels = BTreeMap::from([
            ("app.kubernetes.io/name".to_string(), "kong".to_string()),
            (
                "app.kubernetes.io/instance".to_string(),
                "kubernetes-dashboard".to_string(),
            ),
        ]);

        Self {
            auth_token: join.token.clone(),
            proxy_addr: join.proxy_addr.clone(),
            kube_cluster_name: join.cluster_name.clone(),
            roles: "kube,app,discovery".into(),
            insecure_skip_proxy_tls_verify: Some(true),
            updater: Toggle { enabled: false },
            log: Some(LogValues {
                level: "DEBUG".into(),
            }),
            apps: Vec::new(),
            app_resources: vec![AppResource { labels }],
            kubernetes_discovery: vec![DiscoveryRule {
                types: vec!["app".into()],
                namespaces: vec![dashboard_namespace.to_string()],
            }],
        }
    }

    /// Agent with the dashboard registered as a static app at `cluster_ip`.
    #[must_use]
    pub fn static_app(join: &AgentJoin, cluster_ip: &str) -> Self {
        Self {
            auth_token: join.token.clone(),
            proxy_addr: join.proxy_addr.clone(),
            kube_cluster_name: join.cluster_name.clone(),
            roles: "kube,app".into(),
            insecure_skip_proxy_tls_verify: None,
            updater: Toggle { enabled: false },
            log: None,
            apps: vec![StaticApp {
                name: "kube-dashboard".into(),
                uri: format!("https://{cluster_ip}"),
                insecure_skip_verify: true,
                labels: BTreeMap::from([("cluster".to_string(), join.cluster_name.clone())]),
            }],
            app_resources: Vec::new(),
            kubernetes_discovery: Vec::new(),
        }
    }
}

/// Render `values` to a temporary YAML file, removed on drop.
///
/// # Errors
///
/// Returns an error if serialization or the file write fails.
pub fn write_values<T: Serialize>(values: &T) -> Result<NamedTempFile> {
    let yaml = serde_yaml::to_string(values).context("Failed to serialize Helm values")?;
    let mut file = tempfile::Builder::new()
        .prefix("teleport-dash-values-")
        .suffix(".yaml")
        .tempfile()
        .context("Failed to create temporary values file")?;
    file.write_all(yaml.as_bytes())
        .context("Failed to write temporary values file")?;
    file.flush().context("Failed to flush temporary values file")?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_yaml::Value;

    fn join() -> AgentJoin {
        AgentJoin {
            token: "0123456789abcdef0123456789abcdef".into(),
            proxy_addr: "teleport.example.com:443".into(),
            cluster_name: "minikube".into(),
        }
    }

    fn render<T: Serialize>(values: &T) -> Value {
        serde_yaml::to_value(values).unwrap()
    }

    #[test]
    fn test_cluster_values_shape() {
        let v = render(&ClusterValues::in_cluster("minikube", "teleport-cluster.tc.svc.cluster.local"));
        assert_eq!(v["clusterName"], "minikube");
        assert_eq!(v["proxyListenerMode"], "multiplex");
        assert_eq!(v["acme"].as_bool(), Some(false));
        assert_eq!(v["publicAddr"][0], "teleport-cluster.tc.svc.cluster.local:8080");
        assert_eq!(v["tunnelPublicAddr"][0], "teleport-cluster.tc.svc.cluster.local:443");
        assert_eq!(v["extraArgs"][0], "--insecure");
        assert_eq!(v["auth"]["service"]["type"], "ClusterIP");
    }

    #[test]
    fn test_discovery_agent_values() {
        let v = render(&AgentValues::discovery(&join(), "kubernetes-dashboard"));
        assert_eq!(v["authToken"], "0123456789abcdef0123456789abcdef");
        assert_eq!(v["roles"], "kube,app,discovery");
        assert_eq!(v["insecureSkipProxyTLSVerify"].as_bool(), Some(true));
        assert_eq!(v["updater"]["enabled"].as_bool(), Some(false));
        assert_eq!(v["log"]["level"], "DEBUG");
        assert_eq!(v["apps"].as_sequence().unwrap().len(), 0);
        assert_eq!(v["appResources"][0]["labels"]["app.kubernetes.io/name"], "kong");
        assert_eq!(v["kubernetesDiscovery"][0]["types"][0], "app");
        assert_eq!(v["kubernetesDiscovery"][0]["namespaces"][0], "kubernetes-dashboard");
    }

    #[test]
    fn test_static_app_agent_values() {
        let v = render(&AgentValues::static_app(&join(), "10.96.12.7"));
        assert_eq!(v["roles"], "kube,app");
        assert_eq!(v["apps"][0]["name"], "kube-dashboard");
        assert_eq!(v["apps"][0]["uri"], "https://10.96.12.7");
        assert_eq!(v["apps"][0]["insecure_skip_verify"].as_bool(), Some(true));
        assert_eq!(v["apps"][0]["labels"]["cluster"], "minikube");
        assert!(v.get("kubernetesDiscovery").is_none());
        assert!(v.get("insecureSkipProxyTLSVerify").is_none());
        assert!(v.get("log").is_none());
    }

    #[test]
    fn test_values_file_removed_on_drop() {
        let file = write_values(&AgentValues::static_app(&join(), "10.0.0.1")).unwrap();
        let path = file.path().to_path_buf();
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("kube-dashboard"));
        drop(file);
        assert!(!path.exists());
    }
}
