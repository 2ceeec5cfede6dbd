//! Enterprise mode: agent joins an existing Teleport Enterprise cluster,
//! using the operator's local `tctl` session.

use std::time::Duration;

use anyhow::Result;
use tracing::{info, warn};

use super::{
    dashboard_cluster_ip, deploy_agent, deploy_dashboard, deploy_rbac, generate_token,
    print_agent_parameters, print_rule, TokenRetry,
};
use crate::config::Settings;
use crate::error::DeployError;
use crate::runner::{self, Cmd, CommandRunner};
use crate::ui::{self, StepCounter};
use crate::values::{AgentJoin, AgentValues};

/// Run the enterprise-mode sequence against `proxy`.
///
/// # Errors
///
/// Returns an error on any fatal step failure. Nothing is installed with
/// Helm unless `tctl` is authenticated.
pub async fn deploy(runner: &dyn CommandRunner, settings: &Settings, proxy: &str) -> Result<()> {
    ui::print_info("🚀 Starting Enterprise deployment (RBAC + Dashboard + Agent)...");
    if proxy.trim().is_empty() {
        return Err(DeployError::MissingProxyAddr.into());
    }
    let mut steps = StepCounter::new(4);

    ui::print_next_step(&mut steps, "Deploying RBAC resources...");
    deploy_rbac(runner, settings).await?;

    ui::print_next_step(&mut steps, "Setting up tctl for Teleport Enterprise...");
    let proxy = setup_tctl(runner, proxy).await?;

    ui::print_next_step(&mut steps, "Generating Teleport join token...");
    let cmd = Cmd::tctl()
        .args(["tokens", "add", "--type=kube,app", "--ttl=24h"])
        .env("TELEPORT_PROXY", proxy.as_str());
    let delay = Duration::from_secs(settings.timings.token_retry_delay_secs);
    let retry = TokenRetry {
        attempts: settings.timings.token_attempts,
        failure_delay: delay,
        no_match_delay: delay,
    };
    let token = match generate_token(runner, &cmd, retry).await {
        Ok(token) => token,
        Err(e) => {
            ui::print_info("   This might be due to authentication. Please ensure:");
            ui::print_info(&format!("   1. You are logged in to Teleport: {}", login_hint(&proxy)));
            print_mfa_note();
            ui::print_info("   2. Or generate token via Teleport Web UI: Settings → Authentication → Tokens");
            return Err(e);
        }
    };

    ui::print_next_step(&mut steps, "Deploying Dashboard and Teleport Agent...");
    let join = AgentJoin {
        token,
        proxy_addr: proxy.clone(),
        cluster_name: settings.cluster_name.clone(),
    };
    print_agent_parameters(&join, settings);
    deploy_dashboard(runner, settings).await?;
    let cluster_ip = dashboard_cluster_ip(runner, settings).await?;
    deploy_agent(runner, settings, &AgentValues::static_app(&join, &cluster_ip)).await?;

    print_summary(&proxy);
    Ok(())
}

/// Strip the scheme from `proxy` and default the port to 443.
#[must_use]
pub fn normalize_proxy(proxy: &str) -> String {
    let host = proxy
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_end_matches('/');
    if host.contains(':') {
        host.to_string()
    } else {
        format!("{host}:443")
    }
}

fn login_hint(proxy: &str) -> String {
    format!("tsh login --user=TELEPORT_USER --proxy={proxy} --auth local")
}

fn print_mfa_note() {
    ui::print_warning("   Note: Use an authenticator app (TOTP) for MFA, not passkeys.");
    ui::print_info("      See: https://github.com/gravitational/teleport/issues/44600");
}

/// Make sure `tctl` is installed and authenticated against `proxy`.
/// Returns the normalised proxy address.
///
/// # Errors
///
/// Returns [`DeployError::TctlUnavailable`] if `tctl` cannot be installed and
/// [`DeployError::TctlNotAuthenticated`] if `tctl status` fails.
pub async fn setup_tctl(runner: &dyn CommandRunner, proxy: &str) -> Result<String> {
    if runner.locate("tctl").is_none() {
        ui::print_info("📦 tctl not found. Installing...");
        install_tctl(runner).await?;
    }

    let proxy = normalize_proxy(proxy);
    info!(%proxy, "Checking tctl authentication");

    let status = Cmd::tctl().arg("status").env("TELEPORT_PROXY", proxy.as_str());
    if !runner::best_effort(runner, &status).await.success() {
        ui::print_info("   Please run the following command to authenticate:");
        ui::print_info(&format!("   {}", login_hint(&proxy)));
        print_mfa_note();
        return Err(DeployError::TctlNotAuthenticated(proxy).into());
    }

    ui::print_success("tctl is configured and authenticated");
    Ok(proxy)
}

async fn install_tctl(runner: &dyn CommandRunner) -> Result<()> {
    let os = std::env::consts::OS;
    if os == "macos" && runner.locate("brew").is_some() {
        ui::print_info("Installing tctl via Homebrew...");
        runner::required(runner, &Cmd::new("brew").args(["install", "teleport"])).await?;
        return Ok(());
    }

    warn!(os, "No automatic tctl install available");
    ui::print_warning("Please install tctl manually:");
    if os == "macos" {
        ui::print_info("   brew install teleport");
    }
    ui::print_info("   Download from: https://goteleport.com/download/");
    Err(DeployError::TctlUnavailable.into())
}

fn print_summary(proxy: &str) {
    print_rule();
    println!("\n✅ Full deployment complete!");
    print_rule();
    println!("\n📋 Summary:");
    ui::print_check(true, "RBAC resources deployed");
    ui::print_check(true, "Kubernetes Dashboard deployed");
    ui::print_check(true, "Teleport agent deployed");
    println!();
    println!("📋 Next Steps:");
    println!();
    ui::print_numbered_step(1, "Access Teleport Web Console:");
    ui::print_list_item(&format!("URL: https://{proxy}"));
    println!();
    ui::print_numbered_step(2, "Get Dashboard Access Tokens:");
    ui::print_list_item("Run: teleport-dash get-tokens");
    ui::print_list_item("Copy the admin token for dashboard login");
    println!();
    ui::print_numbered_step(3, "Access Kubernetes Dashboard via Teleport:");
    ui::print_list_item("In Teleport Web UI, go to: Applications → kube-dashboard");
    ui::print_list_item("Paste the token from step 2 when prompted");
    println!();
    ui::print_numbered_step(4, "View Logs (if needed):");
    ui::print_list_item("Run: teleport-dash logs");
    print_rule();
    println!();
}
