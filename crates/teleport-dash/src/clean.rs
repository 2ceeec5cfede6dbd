//! Teardown of everything `deploy` creates, in either mode.
//!
//! Every step is best-effort: a resource that is already gone is not an
//! error, and a failing step never prevents the next one from running.

use tracing::{debug, warn};

use crate::config::Settings;
use crate::deploy::local::{is_port_forward, PORT_FORWARD_PATTERN};
use crate::deploy::{AGENT_RELEASE, CLUSTER_RELEASE, DASHBOARD_RELEASE};
use crate::runner::{self, Cmd, CommandRunner};
use crate::state::{self, PortForwardRecord, RecordState, StateDir};
use crate::ui::{self, StepCounter};

/// Leftover agent resources by kind, for both chart naming conventions.
const AGENT_LEFTOVERS: &[(&str, AgentRef)] = &[
    ("pod", AgentRef::Label("app.kubernetes.io/name=teleport-kube-agent")),
    ("pod", AgentRef::Label("app=teleport-kube-agent")),
    ("statefulset", AgentRef::Name("teleport-agent")),
    ("statefulset", AgentRef::Name("teleport-kube-agent")),
    ("secret", AgentRef::Label("app.kubernetes.io/name=teleport-kube-agent")),
    ("secret", AgentRef::Name("teleport-agent-join-token")),
    ("secret", AgentRef::Name("teleport-kube-agent-join-token")),
    ("secret", AgentRef::Name("teleport-agent-0-state")),
    ("secret", AgentRef::Name("teleport-kube-agent-0-state")),
    ("secret", AgentRef::Label("app.kubernetes.io/instance=teleport-agent")),
    ("secret", AgentRef::Label("app.kubernetes.io/instance=teleport-kube-agent")),
    ("configmap", AgentRef::Name("teleport-agent")),
    ("configmap", AgentRef::Name("teleport-kube-agent")),
    ("configmap", AgentRef::Label("app.kubernetes.io/name=teleport-kube-agent")),
];

#[derive(Debug, Clone, Copy)]
enum AgentRef {
    Name(&'static str),
    Label(&'static str),
}

/// Remove all deployed resources.
pub async fn clean(runner: &dyn CommandRunner, settings: &Settings, state: &StateDir) {
    println!("🧹 Cleaning up all resources...");
    let mut steps = StepCounter::new(6);

    ui::print_next_step(&mut steps, "Stopping Teleport port-forward...");
    stop_port_forward(runner, state);

    ui::print_next_step(&mut steps, "Uninstalling Helm releases...");
    uninstall_releases(runner, settings).await;

    ui::print_next_step(&mut steps, "Cleaning up remaining Teleport Kube Agent resources...");
    delete_agent_leftovers(runner, settings).await;

    ui::print_next_step(&mut steps, "Removing Teleport server...");
    uninstall(runner, CLUSTER_RELEASE, &settings.cluster_namespace).await;
    ui::print_success("Teleport server removed");

    ui::print_next_step(&mut steps, "Deleting namespaces...");
    delete_namespaces(runner, settings).await;

    ui::print_next_step(&mut steps, "Removing RBAC resources...");
    let rbac = Cmd::kubectl()
        .args(["delete", "-f"])
        .arg(settings.rbac_manifest().display().to_string());
    runner::best_effort(runner, &rbac).await;
    ui::print_success("RBAC resources removed");

    println!();
    println!("✅ Full cleanup complete!");
    println!();
    println!("📋 Cleaned up:");
    ui::print_check(true, "Teleport port-forward stopped");
    ui::print_check(true, "Helm releases uninstalled");
    ui::print_check(true, "Teleport server removed");
    ui::print_check(true, "All namespaces deleted");
    ui::print_check(true, "RBAC resources removed");
}

/// Stop the background port-forward and drop its state files.
///
/// A missing or unreadable record is not an error; the record is removed
/// either way. A recorded PID now owned by another program is left alone.
pub fn stop_port_forward(runner: &dyn CommandRunner, state: &StateDir) {
    match PortForwardRecord::load(state) {
        Ok(RecordState::Present(record)) => stop_pid(runner, record.pid, Some(&record.command)),
        Ok(RecordState::Corrupt(raw)) => debug!(raw = %raw.trim(), "Discarding unreadable port-forward record"),
        Ok(RecordState::Missing) => {}
        Err(e) => warn!(error = %e, "Failed to read port-forward record"),
    }
    if let Err(e) = PortForwardRecord::remove(state) {
        warn!(error = %e, "Failed to remove port-forward record");
    }

    match state::read_legacy_pid(state) {
        Some(Ok(pid)) => stop_pid(runner, pid, None),
        Some(Err(raw)) => debug!(%raw, "Ignoring non-numeric legacy PID file"),
        None => {}
    }
    if let Err(e) = state::remove_if_exists(&state.legacy_pid_file()) {
        warn!(error = %e, "Failed to remove legacy PID file");
    }

    for pid in runner.matching_processes(&PORT_FORWARD_PATTERN) {
        debug!(pid, "Terminating stray port-forward");
        runner.terminate(pid);
    }

    ui::print_success("Port-forward cleanup complete");
}

fn stop_pid(runner: &dyn CommandRunner, pid: u32, recorded: Option<&str>) {
    if !is_port_forward(runner, pid, recorded) {
        debug!(pid, "Recorded PID is gone or no longer a port-forward");
        return;
    }
    if runner.terminate(pid) {
        ui::print_success(&format!("Stopped port-forward (PID: {pid})"));
    }
}

async fn uninstall(runner: &dyn CommandRunner, release: &str, namespace: &str) {
    let cmd = Cmd::helm().args(["uninstall", release, "--namespace", namespace]);
    runner::best_effort(runner, &cmd).await;
}

async fn uninstall_releases(runner: &dyn CommandRunner, settings: &Settings) {
    let releases = [
        ("Teleport Agent", AGENT_RELEASE, &settings.agent_namespace),
        ("Kubernetes Dashboard", DASHBOARD_RELEASE, &settings.dashboard_namespace),
        ("Teleport Cluster", CLUSTER_RELEASE, &settings.cluster_namespace),
    ];
    for (label, release, namespace) in releases {
        ui::print_info(&format!("🗑️  Uninstalling {label} from namespace: {namespace}"));
        uninstall(runner, release, namespace).await;
    }
    ui::print_success("Helm releases uninstalled");
}

async fn delete_agent_leftovers(runner: &dyn CommandRunner, settings: &Settings) {
    let ns = settings.agent_namespace.as_str();
    for &(kind, target) in AGENT_LEFTOVERS {
        let cmd = Cmd::kubectl().args(["delete", kind, "-n", ns]);
        let cmd = match target {
            AgentRef::Name(name) => cmd.arg(name),
            AgentRef::Label(selector) => cmd.args(["-l", selector]),
        };
        runner::best_effort(runner, &cmd.arg("--ignore-not-found=true")).await;
    }
    ui::print_success("Teleport Kube Agent resources cleaned up");
}

async fn delete_namespaces(runner: &dyn CommandRunner, settings: &Settings) {
    for namespace in [
        &settings.agent_namespace,
        &settings.dashboard_namespace,
        &settings.cluster_namespace,
        &settings.legacy_namespace,
    ] {
        ui::print_info(&format!("🗑️  Deleting namespace: {namespace}"));
        runner::best_effort(runner, &Cmd::kubectl().args(["delete", "namespace", namespace.as_str()])).await;
    }
    ui::print_success("Namespaces deleted");
}
