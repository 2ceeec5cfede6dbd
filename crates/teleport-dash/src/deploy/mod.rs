//! Deployment sequencing.
//!
//! The deployment mode is decided once from `teleport.proxy_addr` and then
//! one of two fixed step sequences runs:
//!
//! - [`local`]: RBAC, self-hosted Teleport cluster, admin user, join token,
//!   dashboard and discovery agent, port-forward (5 steps)
//! - [`enterprise`]: RBAC, `tctl` setup, join token, dashboard and static-app
//!   agent (4 steps)
//!
//! The building blocks both sequences share live here.

pub mod enterprise;
pub mod local;

use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use crate::config::{DeployMode, Settings};
use crate::error::DeployError;
use crate::extract;
use crate::runner::{self, Cmd, CommandRunner};
use crate::state::StateDir;
use crate::ui;
use crate::validator::PrerequisitesValidator;
use crate::values::{self, AgentJoin, AgentValues};

/// Helm release of the Teleport kube agent.
pub const AGENT_RELEASE: &str = "teleport-agent";
/// Helm release of the Kubernetes Dashboard.
pub const DASHBOARD_RELEASE: &str = "kubernetes-dashboard";
/// Helm release of the self-hosted Teleport cluster.
pub const CLUSTER_RELEASE: &str = "teleport-cluster";
/// Service fronting the dashboard.
pub const DASHBOARD_PROXY_SERVICE: &str = "kubernetes-dashboard-kong-proxy";

const TELEPORT_REPO: (&str, &str) = ("teleport", "https://charts.releases.teleport.dev");
const DASHBOARD_REPO: (&str, &str) = ("kubernetes-dashboard", "https://kubernetes.github.io/dashboard");

/// Deploy in the mode implied by `settings`.
///
/// # Errors
///
/// Returns an error on any fatal step failure, including a malformed
/// `proxy_addr`.
pub async fn deploy(runner: &dyn CommandRunner, settings: &Settings, state: &StateDir) -> Result<()> {
    let mode = match settings.mode() {
        Ok(mode) => mode,
        Err(e) => {
            ui::print_info("   proxy_addr must be either:");
            ui::print_info("   - Empty string \"\" for local mode");
            ui::print_info(
                "   - Start with \"https://\" for Enterprise mode (e.g., \"https://example.teleport.com:443\")",
            );
            return Err(e.into());
        }
    };
    info!(%mode, "Selected deployment mode");

    PrerequisitesValidator::new(&mode).validate(runner)?;

    match mode {
        DeployMode::Local => local::deploy(runner, settings, state).await,
        DeployMode::Enterprise { proxy } => enterprise::deploy(runner, settings, &proxy).await,
    }
}

/// Apply the namespace and RBAC manifests.
///
/// # Errors
///
/// Returns an error if either `kubectl apply` fails.
pub async fn deploy_rbac(runner: &dyn CommandRunner, settings: &Settings) -> Result<()> {
    for manifest in [settings.namespace_manifest(), settings.rbac_manifest()] {
        let cmd = Cmd::kubectl().args(["apply", "-f"]).arg(manifest.display().to_string());
        runner::required(runner, &cmd).await?;
    }

    ui::print_info("⏳ Waiting for tokens to be generated...");
    settle(settings.timings.rbac_settle_secs).await;
    ui::print_success("RBAC resources deployed!");
    Ok(())
}

/// Register a Helm chart repository and refresh the index.
async fn add_helm_repo(runner: &dyn CommandRunner, (name, url): (&str, &str)) -> Result<()> {
    runner::best_effort(runner, &Cmd::helm().args(["repo", "add", name, url])).await;
    runner::required(runner, &Cmd::helm().args(["repo", "update"])).await?;
    Ok(())
}

/// Install the Kubernetes Dashboard chart and confirm its proxy service.
///
/// # Errors
///
/// Returns [`DeployError::DashboardServiceMissing`] if the proxy service does
/// not exist after the install.
pub async fn deploy_dashboard(runner: &dyn CommandRunner, settings: &Settings) -> Result<()> {
    ui::print_info("🔧 Installing Kubernetes Dashboard...");
    let ns = settings.dashboard_namespace.as_str();

    add_helm_repo(runner, DASHBOARD_REPO).await?;

    // A slow rollout is tolerated; the service check below is what counts
    let install = Cmd::helm().args([
        "upgrade",
        "--install",
        DASHBOARD_RELEASE,
        "kubernetes-dashboard/kubernetes-dashboard",
        "--create-namespace",
        "--namespace",
        ns,
        "--wait",
        "--timeout=5m",
    ]);
    let output = runner::best_effort(runner, &install).await;
    if !output.success() {
        warn!(stderr = %output.stderr, "Dashboard install did not finish cleanly");
    }

    ui::print_info("⏳ Waiting for Dashboard service to be ready...");
    settle(settings.timings.dashboard_settle_secs).await;

    let service = Cmd::kubectl().args(["-n", ns, "get", "svc", DASHBOARD_PROXY_SERVICE]);
    if !runner::best_effort(runner, &service).await.success() {
        return Err(DeployError::DashboardServiceMissing(DASHBOARD_PROXY_SERVICE.to_string()).into());
    }

    ui::print_success("Kubernetes Dashboard deployed");
    Ok(())
}

/// Cluster IP of the dashboard proxy service.
///
/// # Errors
///
/// Returns [`DeployError::ClusterIpMissing`] if none is assigned.
pub async fn dashboard_cluster_ip(runner: &dyn CommandRunner, settings: &Settings) -> Result<String> {
    let cmd = Cmd::kubectl().args([
        "-n",
        settings.dashboard_namespace.as_str(),
        "get",
        "svc",
        DASHBOARD_PROXY_SERVICE,
        "-o",
        "jsonpath={.spec.clusterIP}",
    ]);
    runner::best_effort(runner, &cmd)
        .await
        .value()
        .map(str::to_string)
        .ok_or_else(|| DeployError::ClusterIpMissing(DASHBOARD_PROXY_SERVICE.to_string()).into())
}

/// Install or upgrade the Teleport kube agent with `agent` values.
///
/// # Errors
///
/// Returns [`DeployError::AgentInstallFailed`] if Helm exits non-zero.
pub async fn deploy_agent(
    runner: &dyn CommandRunner,
    settings: &Settings,
    agent: &AgentValues,
) -> Result<()> {
    ui::print_info("🔧 Installing Teleport Kube Agent...");
    add_helm_repo(runner, TELEPORT_REPO).await?;

    let values_file = values::write_values(agent)?;
    let install = Cmd::helm()
        .args([
            "upgrade",
            "--install",
            AGENT_RELEASE,
            "teleport/teleport-kube-agent",
            "--version",
            settings.chart_version.as_str(),
            "--create-namespace",
            "--namespace",
            settings.agent_namespace.as_str(),
            "-f",
        ])
        .arg(values_file.path().display().to_string());

    let output = runner::best_effort(runner, &install).await;
    drop(values_file);

    if !output.success() {
        return Err(DeployError::AgentInstallFailed(output.stderr).into());
    }

    ui::print_success("Teleport agent deployed");
    Ok(())
}

/// Print the parameters the agent will be installed with.
pub fn print_agent_parameters(join: &AgentJoin, settings: &Settings) {
    ui::print_kv("Using token", &join.token);
    ui::print_kv("Using proxy", &join.proxy_addr);
    ui::print_kv("Using cluster", &join.cluster_name);
    ui::print_kv("Using K8S namespace", &settings.dashboard_namespace);
    ui::print_kv("Using Teleport namespace", &settings.agent_namespace);
}

/// Sleeps between join token attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenRetry {
    pub attempts: u32,
    /// After `tctl` exited non-zero.
    pub failure_delay: Duration,
    /// After `tctl` succeeded but printed no token.
    pub no_match_delay: Duration,
}

/// Run `cmd` until its output contains a join token.
///
/// # Errors
///
/// Returns [`DeployError::TokenGeneration`] once every attempt has failed.
pub async fn generate_token(runner: &dyn CommandRunner, cmd: &Cmd, retry: TokenRetry) -> Result<String> {
    let attempts = retry.attempts.max(1);

    for attempt in 1..=attempts {
        let output = runner::best_effort(runner, cmd).await;
        let last = attempt == attempts;

        if !output.success() {
            warn!(attempt, code = output.code, "Token generation failed");
            ui::print_warning("Token generation failed. Output:");
            print_output(&output);
            if !last {
                ui::print_info("⏳ Waiting a bit longer and retrying...");
                tokio::time::sleep(retry.failure_delay).await;
            }
            continue;
        }

        if let Some(token) = extract::join_token(&output.stdout) {
            ui::print_success(&format!("Generated token: {token}"));
            return Ok(token.to_string());
        }

        warn!(attempt, "No join token in tctl output");
        ui::print_warning("Could not extract token from output. Full output:");
        print_output(&output);
        if !last {
            ui::print_info("⏳ Retrying token generation...");
            tokio::time::sleep(retry.no_match_delay).await;
        }
    }

    Err(DeployError::TokenGeneration { attempts }.into())
}

fn print_output(output: &runner::CmdOutput) {
    if output.stdout.is_empty() {
        println!("{}", output.stderr);
    } else {
        println!("{}", output.stdout);
    }
}

/// Fixed pause while the cluster converges.
pub(crate) async fn settle(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

pub(crate) fn print_rule() {
    println!("\n{}", "=".repeat(60));
}
