//! Interactive log viewer.

use std::str::FromStr;

use anyhow::Result;
use dialoguer::{theme::ColorfulTheme, Select};
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::DeployError;
use crate::lookup::{self, PodLookup};
use crate::poll::AUTH_POD_SELECTOR;
use crate::runner::{self, Cmd, CommandRunner};
use crate::ui;

/// Which component's logs to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Server,
    Agent,
    Dashboard,
    /// Pod listing for every component instead of a log stream.
    All,
}

impl LogTarget {
    const MENU: [(Self, &'static str); 4] = [
        (Self::Server, "Teleport Server"),
        (Self::Agent, "Teleport Agent"),
        (Self::Dashboard, "Kubernetes Dashboard"),
        (Self::All, "All (show status of all components)"),
    ];

    /// Human-readable component name.
    #[must_use]
    pub const fn component(self) -> &'static str {
        match self {
            Self::Server => "Teleport server",
            Self::Agent => "Teleport agent",
            Self::Dashboard => "dashboard",
            Self::All => "all",
        }
    }

    /// Namespace searched when no pod is found.
    #[must_use]
    pub fn home_namespace(self, settings: &Settings) -> &str {
        match self {
            Self::Server => settings.cluster_namespace.as_str(),
            Self::Agent => settings.agent_namespace.as_str(),
            Self::Dashboard | Self::All => settings.dashboard_namespace.as_str(),
        }
    }

    /// Lookup strategies for this component, most specific first.
    #[must_use]
    pub fn strategies(self, settings: &Settings) -> Vec<PodLookup> {
        let agent_ns = settings.agent_namespace.as_str();
        let dashboard_ns = settings.dashboard_namespace.as_str();
        match self {
            Self::Server => vec![
                PodLookup::selector(&settings.cluster_namespace, AUTH_POD_SELECTOR),
                PodLookup::selector(&settings.legacy_namespace, "app=teleport,component=server"),
            ],
            Self::Agent => vec![
                PodLookup::selector(agent_ns, "app.kubernetes.io/name=teleport-kube-agent"),
                PodLookup::selector(agent_ns, "app=teleport-kube-agent"),
                PodLookup::name_contains(agent_ns, "teleport"),
            ],
            Self::Dashboard => vec![
                PodLookup::selector(dashboard_ns, "app.kubernetes.io/name=kubernetes-dashboard"),
                PodLookup::selector(dashboard_ns, "app=kubernetes-dashboard"),
                PodLookup::name_contains(dashboard_ns, "kubernetes-dashboard"),
            ],
            Self::All => Vec::new(),
        }
    }
}

impl FromStr for LogTarget {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "server" => Ok(Self::Server),
            "2" | "agent" => Ok(Self::Agent),
            "3" | "dashboard" => Ok(Self::Dashboard),
            "4" | "all" => Ok(Self::All),
            _ => Err(DeployError::InvalidChoice),
        }
    }
}

fn prompt() -> Option<LogTarget> {
    let items: Vec<&str> = LogTarget::MENU.iter().map(|(_, label)| *label).collect();
    match Select::with_theme(&ColorfulTheme::default())
        .with_prompt("📋 Which logs would you like to view?")
        .default(0)
        .items(&items)
        .interact()
    {
        Ok(idx) => LogTarget::MENU.get(idx).map(|(target, _)| *target),
        Err(e) => {
            debug!(error = %e, "Log menu aborted");
            None
        }
    }
}

/// Follow the logs of `target`, prompting when it is `None`.
///
/// # Errors
///
/// Returns [`DeployError::PodNotFound`] when no lookup strategy matches.
pub async fn show_logs(
    runner: &dyn CommandRunner,
    settings: &Settings,
    target: Option<LogTarget>,
) -> Result<()> {
    let Some(target) = target.or_else(prompt) else {
        println!();
        ui::print_warning("Interrupted");
        return Ok(());
    };

    if target == LogTarget::All {
        show_all(runner, settings).await;
        return Ok(());
    }

    println!();
    println!("📋 Following {} logs (Press Ctrl-C to exit):", target.component());
    println!();

    let Some(pod) = lookup::find_first(runner, &target.strategies(settings)).await else {
        let namespace = target.home_namespace(settings).to_string();
        ui::print_info("  Available pods:");
        let listing = runner::best_effort(runner, &Cmd::kubectl().args(["-n", namespace.as_str(), "get", "pods"])).await;
        if !listing.stdout.is_empty() {
            println!("{}", listing.stdout);
        }
        return Err(DeployError::PodNotFound {
            component: target.component().to_string(),
            namespace,
        }
        .into());
    };

    ui::print_info(&format!("📦 Pod: {}", pod.name));
    println!();

    let follow = Cmd::kubectl().args(["logs", "-n", pod.namespace.as_str(), pod.name.as_str(), "-f"]);
    match runner.stream(&follow).await {
        Ok(0) => {}
        Ok(code) => debug!(code, "Log stream ended"),
        Err(e) => warn!(error = %e, "Failed to follow logs"),
    }
    Ok(())
}

async fn show_all(runner: &dyn CommandRunner, settings: &Settings) {
    println!();
    println!("📊 All Components Status:");

    let sections = [
        ("Teleport Server (Helm)", settings.cluster_namespace.as_str(), "app.kubernetes.io/name=teleport-cluster"),
        ("Teleport Server (Legacy)", settings.legacy_namespace.as_str(), "app=teleport,component=server"),
        ("Teleport Agent", settings.agent_namespace.as_str(), "app.kubernetes.io/name=teleport-kube-agent"),
        ("Kubernetes Dashboard", settings.dashboard_namespace.as_str(), "app.kubernetes.io/name=kubernetes-dashboard"),
    ];
    for (title, ns, selector) in sections {
        println!();
        println!("=== {title} ===");
        let output = runner::best_effort(runner, &Cmd::kubectl().args(["get", "pods", "-n", ns, "-l", selector])).await;
        let text = if output.stdout.is_empty() { &output.stderr } else { &output.stdout };
        if !text.is_empty() {
            println!("{text}");
        }
    }
}
