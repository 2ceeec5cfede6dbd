//! Read-only status commands.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tracing::debug;

use crate::config::Settings;
use crate::deploy::{AGENT_RELEASE, DASHBOARD_RELEASE};
use crate::runner::{self, Cmd, CommandRunner};
use crate::state::StateDir;
use crate::ui;

/// Secret holding the admin service account token.
pub const ADMIN_TOKEN_SECRET: &str = "dashboard-token";
/// Secret holding the read-only service account token.
pub const READONLY_TOKEN_SECRET: &str = "dashboard-readonly-token";

/// Decoded `.data.token` of `secret`, if present and valid UTF-8 base64.
pub async fn secret_token(runner: &dyn CommandRunner, namespace: &str, secret: &str) -> Option<String> {
    let cmd = Cmd::kubectl().args([
        "get",
        "secret",
        secret,
        "-n",
        namespace,
        "-o",
        "jsonpath={.data.token}",
    ]);
    let output = runner::best_effort(runner, &cmd).await;
    let encoded = output.value()?;
    let decoded = STANDARD
        .decode(encoded)
        .inspect_err(|e| debug!(secret, error = %e, "Token is not valid base64"))
        .ok()?;
    String::from_utf8(decoded).ok()
}

/// Print the dashboard login tokens.
pub async fn get_tokens(runner: &dyn CommandRunner, settings: &Settings) {
    let ns = settings.dashboard_namespace.as_str();
    println!("🔑 Dashboard Access Tokens:");
    println!();
    ui::print_info(&format!("📋 Using namespace: {ns}"));
    println!();

    println!("Admin Token (for dashboard login):");
    match secret_token(runner, ns, ADMIN_TOKEN_SECRET).await {
        Some(token) => {
            println!("{token}");
            println!();
            ui::print_success("Copy the token above and paste it into the dashboard login page");
        }
        None => {
            ui::print_warning(&format!(
                "Secret '{ADMIN_TOKEN_SECRET}' not found. Waiting for token generation..."
            ));
            ui::print_info("  💡 Run 'teleport-dash deploy' to create the Secret, then wait a few seconds");
        }
    }
    println!();

    println!("Read-only Token:");
    match secret_token(runner, ns, READONLY_TOKEN_SECRET).await {
        Some(token) => println!("{token}"),
        None => ui::print_warning(&format!("Secret '{READONLY_TOKEN_SECRET}' not found")),
    }
    println!();
}

/// Print the cluster IP of the dashboard service.
pub async fn get_clusterip(runner: &dyn CommandRunner, settings: &Settings) {
    println!("🌐 Dashboard ClusterIP:");
    let cmd = Cmd::kubectl().args([
        "-n",
        settings.dashboard_namespace.as_str(),
        "get",
        "svc",
        DASHBOARD_RELEASE,
        "-o",
        "jsonpath={.spec.clusterIP}",
    ]);
    match runner::best_effort(runner, &cmd).await.value() {
        Some(ip) => println!("{ip}"),
        None => ui::print_warning("Service not found"),
    }
    println!();
}

/// Print namespaces, pods and services belonging to the deployment, and the
/// last admin invite link.
pub async fn show_status(runner: &dyn CommandRunner, settings: &Settings, state: &StateDir) {
    let dashboard_ns = settings.dashboard_namespace.as_str();
    let agent_ns = settings.agent_namespace.as_str();
    println!("📊 Overall Status:");
    println!();

    println!("Namespaces:");
    let namespaces = runner::best_effort(runner, &Cmd::kubectl().args(["get", "namespaces", "-o", "name"])).await;
    match namespaces.value() {
        Some(names) => names
            .lines()
            .filter(|ns| ns.contains(dashboard_ns) || ns.contains(agent_ns))
            .for_each(|ns| println!("  {ns}")),
        None => ui::print_warning("  No namespaces found"),
    }

    for ns in [dashboard_ns, agent_ns] {
        println!();
        println!("Pods in {ns}:");
        let pods = runner::best_effort(runner, &Cmd::kubectl().args(["get", "pods", "-n", ns])).await;
        match pods.value() {
            Some(table) => println!("{table}"),
            None => ui::print_warning("  No pods found"),
        }
    }

    println!();
    println!("Services:");
    let services = runner::best_effort(runner, &Cmd::kubectl().args(["get", "svc", "-n", dashboard_ns])).await;
    let matching: Vec<&str> = services
        .value()
        .map(|table| table.lines().filter(|l| l.contains(DASHBOARD_RELEASE)).collect())
        .unwrap_or_default();
    if matching.is_empty() {
        ui::print_warning("  No services found");
    } else {
        matching.iter().for_each(|line| println!("  {line}"));
    }

    if let Some(url) = state.read_invite_url() {
        println!();
        println!("Admin Invite URL (local mode):");
        println!("  {url}");
    }
}

/// Print `helm status` of the dashboard and agent releases.
pub async fn show_helm_status(runner: &dyn CommandRunner, settings: &Settings) {
    println!("📊 Helm Deployment Status:");
    let releases = [
        ("Kubernetes Dashboard", DASHBOARD_RELEASE, settings.dashboard_namespace.as_str()),
        ("Teleport Agent", AGENT_RELEASE, settings.agent_namespace.as_str()),
    ];
    for (label, release, ns) in releases {
        println!();
        println!("{label} (namespace: {ns}):");
        let cmd = Cmd::helm().args(["status", release, "--namespace", ns]);
        let output = runner::best_effort(runner, &cmd).await;
        if output.success() {
            println!("{}", output.stdout);
        } else {
            println!("  Not installed");
        }
    }
}
