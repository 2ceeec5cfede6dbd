//! Fixed-interval polling against `kubectl`.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::runner::{self, Cmd, CommandRunner};
use crate::ui;

/// Label selector of the self-hosted Teleport auth pod.
pub const AUTH_POD_SELECTOR: &str =
    "app.kubernetes.io/name=teleport-cluster,app.kubernetes.io/component=auth";

/// `kubectl get pods` returning the name of the first pod matching `selector`.
#[must_use]
pub fn first_pod_name(namespace: &str, selector: &str) -> Cmd {
    Cmd::kubectl().args([
        "-n",
        namespace,
        "get",
        "pods",
        "-l",
        selector,
        "-o",
        "jsonpath={.items[0].metadata.name}",
    ])
}

fn spinner(message: String) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("  {spinner:.cyan} {msg} ({elapsed})") {
        bar.set_style(style);
    }
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

/// Poll until a pod matching `selector` exists and return its name.
///
/// Returns `None` once `timeout` elapses; callers decide whether that is
/// fatal.
pub async fn wait_for_pod(
    runner: &dyn CommandRunner,
    namespace: &str,
    selector: &str,
    timeout: Duration,
    interval: Duration,
) -> Option<String> {
    ui::print_info(&format!("⏳ Waiting for pod with selector {selector}..."));
    let bar = spinner(format!("{namespace}: {selector}"));
    let start = Instant::now();
    let cmd = first_pod_name(namespace, selector);

    let found = loop {
        if start.elapsed() >= timeout {
            break None;
        }

        let output = runner::best_effort(runner, &cmd).await;
        if let Some(name) = output.value() {
            break Some(name.to_string());
        }

        debug!(namespace, selector, "Pod not found yet");
        tokio::time::sleep(interval).await;
    };

    bar.finish_and_clear();
    if let Some(ref name) = found {
        info!(namespace, pod = %name, "Pod found");
    }
    found
}

/// Wait for `pod` to report the Ready condition with a single bounded
/// `kubectl wait`. Failure is reported but never fatal.
pub async fn wait_for_pod_ready(
    runner: &dyn CommandRunner,
    namespace: &str,
    pod: &str,
    timeout: Duration,
) -> bool {
    ui::print_info(&format!("⏳ Waiting for pod {pod} to be ready..."));
    let cmd = Cmd::kubectl().args([
        "wait".to_string(),
        "--for=condition=ready".to_string(),
        format!("pod/{pod}"),
        "-n".to_string(),
        namespace.to_string(),
        format!("--timeout={}s", timeout.as_secs()),
    ]);

    if runner::best_effort(runner, &cmd).await.success() {
        ui::print_success(&format!("Pod {pod} is ready"));
        true
    } else {
        ui::print_warning(&format!(
            "Pod {pod} may not be fully ready, continuing anyway..."
        ));
        false
    }
}
