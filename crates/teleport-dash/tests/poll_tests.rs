//! Poll loop timing with a paused clock.

mod common;

use std::time::Duration;

use common::{fail, ok, ScriptedRunner};
use teleport_dash::poll;

const LOOKUP: &str = "kubectl -n teleport-cluster get pods -l app=teleport";

#[tokio::test(start_paused = true)]
async fn test_wait_for_pod_gives_up_after_timeout() {
    let runner = ScriptedRunner::new();
    let start = tokio::time::Instant::now();

    let pod = poll::wait_for_pod(
        &runner,
        "teleport-cluster",
        "app=teleport",
        Duration::from_secs(10),
        Duration::from_secs(2),
    )
    .await;

    assert_eq!(pod, None);
    assert!(start.elapsed() >= Duration::from_secs(10));
    assert_eq!(runner.count(LOOKUP), 5);
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_pod_returns_first_name() {
    let runner = ScriptedRunner::new().on_seq(
        LOOKUP,
        vec![fail("connection refused"), ok(""), ok("teleport-auth-0")],
    );

    let pod = poll::wait_for_pod(
        &runner,
        "teleport-cluster",
        "app=teleport",
        Duration::from_secs(120),
        Duration::from_secs(2),
    )
    .await;

    assert_eq!(pod.as_deref(), Some("teleport-auth-0"));
    assert_eq!(runner.count(LOOKUP), 3);
}

#[tokio::test]
async fn test_wait_for_pod_ready_is_never_fatal() {
    let runner = ScriptedRunner::new().on("kubectl wait", fail("timed out waiting for the condition"));

    let ready = poll::wait_for_pod_ready(&runner, "teleport-cluster", "auth-0", Duration::from_secs(60)).await;

    assert!(!ready);
    assert_eq!(
        runner.calls(),
        vec!["kubectl wait --for=condition=ready pod/auth-0 -n teleport-cluster --timeout=60s".to_string()]
    );
}
