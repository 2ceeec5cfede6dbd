//! Fatal error types for the deployment tool.

use std::path::PathBuf;

use thiserror::Error;

/// Conditions that abort an invocation with exit code 1.
#[derive(Debug, Error)]
pub enum DeployError {
    /// Config file does not exist.
    #[error("{} not found. Copy config.example.yaml to config.yaml first.", .0.display())]
    ConfigNotFound(PathBuf),

    /// `teleport.proxy_addr` is set but is not an https URL.
    #[error("Invalid proxy_addr in config: \"{0}\"")]
    InvalidProxyAddr(String),

    /// Enterprise mode was selected without a proxy address.
    #[error("proxy_addr is required for Enterprise mode. Please set it in config.yaml")]
    MissingProxyAddr,

    /// A required external command exited non-zero or could not be spawned.
    #[error("Command failed: {command}{}", fmt_stderr(.stderr))]
    CommandFailed { command: String, stderr: String },

    /// The Teleport auth pod never appeared.
    #[error("Teleport auth pod not found after waiting")]
    AuthPodMissing,

    /// The dashboard chart did not produce its proxy service.
    #[error("{0} service not found.")]
    DashboardServiceMissing(String),

    /// The dashboard proxy service has no cluster IP.
    #[error("Failed to get ClusterIP for {0} service")]
    ClusterIpMissing(String),

    /// `helm upgrade --install` of the agent chart failed.
    #[error("Failed to deploy Teleport agent: {0}")]
    AgentInstallFailed(String),

    /// Join token could not be produced after all attempts.
    #[error("Failed to generate join token after {attempts} attempts")]
    TokenGeneration { attempts: u32 },

    /// No admin invite link could be read from `tctl` output.
    #[error("Failed to obtain admin invite URL after {attempts} attempts")]
    InviteUrlMissing { attempts: u32 },

    /// `tctl status` failed against the enterprise proxy.
    #[error("tctl is not authenticated to Teleport Enterprise cluster at {0}")]
    TctlNotAuthenticated(String),

    /// `tctl` is not installed and could not be installed automatically.
    #[error("tctl is not installed")]
    TctlUnavailable,

    /// No pod matched any lookup strategy.
    #[error("No {component} pods found in namespace: {namespace}")]
    PodNotFound { component: String, namespace: String },

    /// The log viewer received an option outside the menu.
    #[error("Invalid option. Please select 1, 2, 3, or 4.")]
    InvalidChoice,
}

fn fmt_stderr(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!("\nError: {stderr}")
    }
}
