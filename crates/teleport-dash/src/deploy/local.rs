//! Local mode: a self-hosted Teleport cluster inside the same Kubernetes
//! cluster as the dashboard.

use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Result;
use regex::Regex;
use tracing::{debug, info, warn};

use super::{
    deploy_agent, deploy_dashboard, deploy_rbac, generate_token, print_agent_parameters,
    print_rule, settle, TokenRetry, CLUSTER_RELEASE, DASHBOARD_PROXY_SERVICE, TELEPORT_REPO,
};
use crate::config::Settings;
use crate::error::DeployError;
use crate::extract::{InviteRewriter, FORWARDED_PORT};
use crate::poll::{self, AUTH_POD_SELECTOR};
use crate::runner::{self, Cmd, CommandRunner};
use crate::state::{PortForwardRecord, RecordState, StateDir};
use crate::ui::{self, StepCounter};
use crate::values::{self, AgentJoin, AgentValues, ClusterValues};

/// Matches the command line of a Teleport port-forward on 8080.
pub static PORT_FORWARD_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"kubectl port-forward.*teleport.*8080").expect("valid port-forward regex")
});

const ADMIN_USER: &str = "admin";

const K8S_ADMIN_ROLE: &str = r#"kind: role
version: v7
metadata:
  name: k8s-admin
spec:
  allow:
    kubernetes_labels:
      "*": "*"
    kubernetes_groups:
    - system:masters
"#;

/// `tctl` invoked inside the auth pod through `kubectl exec`.
struct PodTctl<'a> {
    namespace: &'a str,
    pod: &'a str,
}

impl PodTctl<'_> {
    fn cmd<const N: usize>(&self, args: [&str; N]) -> Cmd {
        Cmd::kubectl()
            .args(["exec", "-n", self.namespace, self.pod, "--", "tctl"])
            .args(args)
    }

    /// Same as [`Self::cmd`] with `input` piped to `tctl`.
    fn piped<const N: usize>(&self, args: [&str; N], input: &str) -> Cmd {
        Cmd::kubectl()
            .args(["exec", "-n", self.namespace, self.pod, "-i", "--", "tctl"])
            .args(args)
            .stdin(input)
    }
}

/// Run the local-mode sequence.
///
/// # Errors
///
/// Returns an error on any fatal step failure.
pub async fn deploy(runner: &dyn CommandRunner, settings: &Settings, state: &StateDir) -> Result<()> {
    ui::print_info("🚀 Starting local deployment (RBAC + Teleport + Dashboard + Agent)...");
    let mut steps = StepCounter::new(5);

    ui::print_next_step(&mut steps, "Deploying RBAC resources...");
    deploy_rbac(runner, settings).await?;

    let pod = deploy_teleport_cluster(runner, settings, &mut steps).await?;
    let (pod, invite_url) = setup_admin_user(runner, settings, state, pod, &mut steps).await?;

    ui::print_next_step(&mut steps, "Generating Teleport join token...");
    let token = generate_join_token(runner, settings, &pod).await?;
    let join = AgentJoin {
        token,
        proxy_addr: format!("{}:443", settings.cluster_host()),
        cluster_name: settings.cluster_name.clone(),
    };

    ui::print_next_step(&mut steps, "Deploying Dashboard and Teleport Agent...");
    print_agent_parameters(&join, settings);
    deploy_dashboard(runner, settings).await?;
    annotate_dashboard_service(runner, settings).await;
    deploy_agent(
        runner,
        settings,
        &AgentValues::discovery(&join, &settings.dashboard_namespace),
    )
    .await?;
    patch_service_and_restart_agents(runner, settings).await;
    start_port_forward(runner, settings, state).await;

    print_summary(runner, settings, state, &invite_url).await;
    Ok(())
}

async fn deploy_teleport_cluster(
    runner: &dyn CommandRunner,
    settings: &Settings,
    steps: &mut StepCounter,
) -> Result<Option<String>> {
    ui::print_next_step(steps, "Deploying Teleport server to Kubernetes...");
    ui::print_info(
        "⏳ Note: This step may take up to 5 minutes while the Helm chart deploys and pods become ready...",
    );
    let ns = settings.cluster_namespace.as_str();

    super::add_helm_repo(runner, TELEPORT_REPO).await?;

    runner::best_effort(runner, &Cmd::kubectl().args(["create", "namespace", ns])).await;
    runner::best_effort(
        runner,
        &Cmd::kubectl().args([
            "label",
            "namespace",
            ns,
            "pod-security.kubernetes.io/enforce=baseline",
        ]),
    )
    .await;

    let values_file = values::write_values(&ClusterValues::in_cluster(
        &settings.cluster_name,
        &settings.cluster_host(),
    ))?;
    let install = Cmd::helm()
        .args([
            "upgrade",
            "--install",
            CLUSTER_RELEASE,
            "teleport/teleport-cluster",
            "--version",
            settings.chart_version.as_str(),
            "--namespace",
            ns,
            "--values",
        ])
        .arg(values_file.path().display().to_string());
    let output = runner::best_effort(runner, &install).await;
    drop(values_file);
    if !output.success() {
        warn!(stderr = %output.stderr, "Teleport cluster install reported an error");
    }

    ui::print_info("⏳ Verifying Teleport cluster pods are running...");
    settle(settings.timings.cluster_settle_secs).await;

    let pod = wait_for_auth_pod(runner, settings).await;
    match &pod {
        Some(name) => ui::print_success(&format!("Found Teleport auth pod: {name}")),
        None => {
            ui::print_warning("Teleport auth pod not found yet. This may take a few minutes.");
            ui::print_info(&format!("   You can check status with: kubectl get pods -n {ns}"));
        }
    }

    ui::print_success("Teleport server deployed!");
    Ok(pod)
}

async fn wait_for_auth_pod(runner: &dyn CommandRunner, settings: &Settings) -> Option<String> {
    let timings = &settings.timings;
    poll::wait_for_pod(
        runner,
        &settings.cluster_namespace,
        AUTH_POD_SELECTOR,
        Duration::from_secs(timings.auth_pod_timeout_secs),
        Duration::from_secs(timings.poll_interval_secs),
    )
    .await
}

async fn setup_admin_user(
    runner: &dyn CommandRunner,
    settings: &Settings,
    state: &StateDir,
    pod: Option<String>,
    steps: &mut StepCounter,
) -> Result<(String, String)> {
    ui::print_next_step(steps, "Setting up Teleport admin user with Kubernetes access...");
    let ns = settings.cluster_namespace.as_str();

    let pod = match pod {
        Some(pod) => pod,
        None => wait_for_auth_pod(runner, settings)
            .await
            .ok_or(DeployError::AuthPodMissing)?,
    };

    poll::wait_for_pod_ready(
        runner,
        ns,
        &pod,
        Duration::from_secs(settings.timings.pod_ready_timeout_secs),
    )
    .await;
    settle(settings.timings.admin_settle_secs).await;

    let tctl = PodTctl { namespace: ns, pod: &pod };

    let created = runner::best_effort(runner, &tctl.piped(["create", "-f", "-"], K8S_ADMIN_ROLE)).await;
    if !created.success() {
        debug!("k8s-admin role exists, updating");
        runner::best_effort(runner, &tctl.piped(["update", "-f", "-"], K8S_ADMIN_ROLE)).await;
    }

    let users = runner::best_effort(runner, &tctl.cmd(["users", "ls"])).await;
    let admin_exists = users.success() && lists_user(&users.stdout, ADMIN_USER);

    let mut output = if admin_exists {
        ui::print_info("👤 Admin user already exists, ensuring roles are correct and resetting...");
        runner::best_effort(
            runner,
            &tctl.cmd(["users", "update", ADMIN_USER, "--set-roles=editor,access,k8s-admin"]),
        )
        .await;
        runner::best_effort(runner, &tctl.cmd(["users", "reset", ADMIN_USER])).await
    } else {
        ui::print_info("👤 Creating admin user...");
        runner::best_effort(
            runner,
            &tctl.cmd([
                "users",
                "add",
                ADMIN_USER,
                "--roles=editor,access,k8s-admin",
                "--logins=root,minikube",
            ]),
        )
        .await
    };

    let rewriter = InviteRewriter::new(&settings.cluster_host());
    let attempts = settings.timings.invite_attempts.max(1);
    let mut attempt = 1;
    let invite_url = loop {
        if !output.stdout.is_empty() {
            println!("{}", rewriter.rewrite(&output.stdout));
        }
        if let Some(url) = rewriter.extract(&output.stdout) {
            break url;
        }

        warn!(attempt, code = output.code, "No invite URL in tctl output");
        ui::print_warning("Could not extract invite URL from tctl output");
        if !output.stderr.is_empty() {
            println!("{}", output.stderr);
        }
        if attempt == attempts {
            return Err(DeployError::InviteUrlMissing { attempts }.into());
        }

        attempt += 1;
        ui::print_info("⏳ Resetting admin user for a new invite link...");
        settle(settings.timings.invite_retry_delay_secs).await;
        output = runner::best_effort(runner, &tctl.cmd(["users", "reset", ADMIN_USER])).await;
    };

    if let Err(e) = state.write_invite_url(&invite_url) {
        warn!(error = %e, "Failed to persist invite URL");
    }

    if admin_exists {
        ui::print_success("Admin user roles updated and reset");
    } else {
        ui::print_success("Admin user created");
    }
    Ok((pod, invite_url))
}

/// Whether `tctl users ls` output has a row for `user`.
fn lists_user(listing: &str, user: &str) -> bool {
    listing
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .any(|name| name == user)
}

async fn generate_join_token(runner: &dyn CommandRunner, settings: &Settings, pod: &str) -> Result<String> {
    let ns = settings.cluster_namespace.as_str();
    let timings = &settings.timings;

    poll::wait_for_pod_ready(runner, ns, pod, Duration::from_secs(timings.token_ready_timeout_secs)).await;
    settle(timings.token_settle_secs).await;

    let tctl = PodTctl { namespace: ns, pod };
    let cmd = tctl.cmd(["tokens", "add", "--type=kube,app,discovery", "--ttl=24h"]);
    generate_token(
        runner,
        &cmd,
        TokenRetry {
            attempts: timings.token_attempts,
            failure_delay: Duration::from_secs(timings.token_failure_delay_secs),
            no_match_delay: Duration::from_secs(timings.token_retry_delay_secs),
        },
    )
    .await
}

async fn annotate_dashboard_service(runner: &dyn CommandRunner, settings: &Settings) {
    ui::print_info("🔧 Adding Teleport annotations for dashboard service (Local mode)...");
    let cmd = Cmd::kubectl().args([
        "annotate",
        "service",
        "-n",
        settings.dashboard_namespace.as_str(),
        DASHBOARD_PROXY_SERVICE,
        "teleport.dev/name=dashboard",
        "teleport.dev/protocol=https",
        "teleport.dev/ignore-tls=true",
        "--overwrite",
    ]);
    runner::best_effort(runner, &cmd).await;
    ui::print_success("Added Teleport annotations to dashboard service");
}

async fn patch_service_and_restart_agents(runner: &dyn CommandRunner, settings: &Settings) {
    ui::print_info(&format!(
        "🔧 Patching {CLUSTER_RELEASE} service to add port {FORWARDED_PORT} (Local mode only)..."
    ));
    let patch = serde_json::json!([{
        "op": "add",
        "path": "/spec/ports/-",
        "value": {
            "name": "agent-fallback",
            "port": FORWARDED_PORT,
            "protocol": "TCP",
            "targetPort": 3080,
        },
    }]);
    let cmd = Cmd::kubectl()
        .args([
            "patch",
            "service",
            "-n",
            settings.cluster_namespace.as_str(),
            CLUSTER_RELEASE,
            "--type=json",
        ])
        .arg(format!("-p={patch}"));
    runner::best_effort(runner, &cmd).await;

    ui::print_info("🔄 Restarting teleport-agent pods...");
    runner::best_effort(
        runner,
        &Cmd::kubectl().args([
            "delete",
            "pods",
            "-n",
            settings.agent_namespace.as_str(),
            "--all",
            "--wait=false",
        ]),
    )
    .await;
    settle(settings.timings.restart_settle_secs).await;
}

/// The `kubectl port-forward` exposing the proxy on localhost.
#[must_use]
pub fn port_forward_cmd(namespace: &str) -> Cmd {
    Cmd::kubectl().args([
        "port-forward".to_string(),
        "-n".to_string(),
        namespace.to_string(),
        format!("svc/{CLUSTER_RELEASE}"),
        format!("{FORWARDED_PORT}:{FORWARDED_PORT}"),
    ])
}

/// Whether `pid` is alive and running a Teleport port-forward. A PID reused
/// by an unrelated process does not count. `recorded` is the command line
/// saved when the port-forward was started, if any.
pub fn is_port_forward(runner: &dyn CommandRunner, pid: u32, recorded: Option<&str>) -> bool {
    if !runner.is_alive(pid) {
        return false;
    }
    runner.command_line(pid).is_some_and(|line| {
        PORT_FORWARD_PATTERN.is_match(&line) || recorded.is_some_and(|cmd| line == cmd)
    })
}

/// Whether a Teleport port-forward is running, per the state record or the
/// process table. A record whose process is gone or now belongs to another
/// program is removed.
pub fn port_forward_running(runner: &dyn CommandRunner, state: &StateDir) -> bool {
    match PortForwardRecord::load(state) {
        Ok(RecordState::Present(record)) => {
            if is_port_forward(runner, record.pid, Some(&record.command)) {
                return true;
            }
            debug!(pid = record.pid, "Removing stale port-forward record");
            if let Err(e) = PortForwardRecord::remove(state) {
                warn!(error = %e, "Failed to remove stale port-forward record");
            }
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Failed to read port-forward record"),
    }

    !runner.matching_processes(&PORT_FORWARD_PATTERN).is_empty()
}

async fn start_port_forward(runner: &dyn CommandRunner, settings: &Settings, state: &StateDir) {
    ui::print_info(&format!("🔌 Starting port-forward to localhost:{FORWARDED_PORT}..."));

    if port_forward_running(runner, state) {
        ui::print_success("Port-forward already running");
        return;
    }

    let ns = settings.cluster_namespace.as_str();
    let cmd = port_forward_cmd(ns);
    let service = Cmd::kubectl().args(["get", "svc", CLUSTER_RELEASE, "-n", ns]);
    if !runner::best_effort(runner, &service).await.success() {
        ui::print_warning("Teleport service not found. Port-forward will need to be started manually.");
        ui::print_info(&format!("   Run: {cmd}"));
        return;
    }

    if let Err(e) = std::fs::create_dir_all(state.root()) {
        warn!(error = %e, dir = %state.root().display(), "Failed to create state directory");
        ui::print_warning("Could not prepare the port-forward log. Start it manually:");
        ui::print_info(&format!("   Run: {cmd}"));
        return;
    }
    let log_path = state.port_forward_log();
    let pid = match runner.spawn_detached(&cmd, &log_path).await {
        Ok(pid) => pid,
        Err(e) => {
            warn!(error = %e, "Failed to spawn port-forward");
            ui::print_warning(&format!(
                "Port-forward failed to start. Check logs: cat {}",
                log_path.display()
            ));
            return;
        }
    };
    info!(pid, "Port-forward spawned");

    let record = PortForwardRecord::new(pid, cmd.display(), ns.to_string(), log_path.clone());
    if let Err(e) = record.save(state) {
        warn!(pid, error = %e, "Failed to save port-forward record");
        ui::print_warning(&format!(
            "Port-forward state not saved. 'clean' will find it by command line (PID: {pid})"
        ));
    }

    settle(settings.timings.port_forward_settle_secs).await;

    if runner.is_alive(pid) {
        ui::print_success(&format!("Port-forward started (PID: {pid})"));
        ui::print_info(&format!(
            "   Access Teleport at: {}",
            InviteRewriter::new(&settings.cluster_host()).origin()
        ));
    } else {
        ui::print_warning(&format!(
            "Port-forward failed to start. Check logs: cat {}",
            log_path.display()
        ));
    }
}

async fn print_summary(
    runner: &dyn CommandRunner,
    settings: &Settings,
    state: &StateDir,
    invite_url: &str,
) {
    let origin = InviteRewriter::new(&settings.cluster_host()).origin();
    let forwarding = port_forward_running(runner, state);

    print_rule();
    println!("\n✅ Full deployment complete!");
    print_rule();
    println!("\n📋 Summary:");
    ui::print_check(true, "RBAC resources deployed");
    ui::print_check(true, "Teleport server deployed and running");
    ui::print_check(true, "Admin user created");
    ui::print_check(true, "Join token generated");
    if forwarding {
        ui::print_check(true, &format!("Port-forward active ({origin})"));
    } else {
        ui::print_check(false, "Port-forward NOT running (required for access)");
    }
    ui::print_check(true, "Kubernetes Dashboard deployed");
    ui::print_check(true, "Teleport agent deployed");
    println!();

    println!("🔗 Admin Invite URL:");
    println!("   {invite_url}");
    println!();
    println!("📋 Next Steps:");
    println!();

    if !forwarding {
        println!("  0️⃣  Start Port-Forward (REQUIRED):");
        ui::print_list_item("Run in a separate terminal:");
        println!("       {}", port_forward_cmd(&settings.cluster_namespace));
        ui::print_list_item("Keep this terminal open while using Teleport");
        println!();
    }

    ui::print_numbered_step(1, "Accept the Admin Invite:");
    ui::print_list_item("Open the URL above in your browser");
    ui::print_list_item("Set your admin password");
    println!();

    ui::print_numbered_step(2, "Access Teleport Web Console:");
    ui::print_list_item(&format!("URL: {origin}"));
    ui::print_list_item("Log in with username: admin");
    println!();

    ui::print_numbered_step(3, "Get Dashboard Access Tokens:");
    ui::print_list_item("Run: teleport-dash get-tokens");
    ui::print_list_item("Copy the admin token for dashboard login");
    println!();

    ui::print_numbered_step(4, "Access Kubernetes Dashboard via Teleport:");
    ui::print_list_item("In Teleport Web UI, go to: Applications → dashboard");
    ui::print_list_item("Paste the token from step 3 when prompted");
    println!();

    ui::print_numbered_step(5, "View Logs (if needed):");
    ui::print_list_item("Run: teleport-dash logs");
    print_rule();
    println!();
}
