//! Cleanup behaviour against a scripted runner.

mod common;

use common::{fail, settings, ScriptedRunner};
use teleport_dash::clean;
use teleport_dash::state::{PortForwardRecord, RecordState};
use teleport_dash::StateDir;

const PORT_FORWARD: &str = "kubectl port-forward -n teleport-cluster svc/teleport-cluster 8080:8080";

#[tokio::test]
async fn test_clean_runs_every_step_without_state() {
    let dir = tempfile::tempdir().unwrap();
    let state = StateDir::new(dir.path());
    let runner = ScriptedRunner::new();

    clean::clean(&runner, &settings(""), &state).await;

    assert_eq!(runner.count("helm uninstall teleport-agent --namespace teleport-agent"), 1);
    assert_eq!(
        runner.count("helm uninstall kubernetes-dashboard --namespace kubernetes-dashboard"),
        1
    );
    // Once with the releases, once as server removal
    assert_eq!(runner.count("helm uninstall teleport-cluster --namespace teleport-cluster"), 2);

    for ns in ["teleport-agent", "kubernetes-dashboard", "teleport-cluster", "teleport"] {
        assert!(
            runner.calls().contains(&format!("kubectl delete namespace {ns}")),
            "namespace {ns} not deleted"
        );
    }
    assert!(runner.position("kubectl delete -f /deploy/k8s/rbac.yaml").is_some());
    assert!(runner.terminated().is_empty());
}

#[tokio::test]
async fn test_clean_removes_both_agent_naming_conventions() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::new();

    clean::clean(&runner, &settings(""), &StateDir::new(dir.path())).await;

    for call in [
        "kubectl delete statefulset -n teleport-agent teleport-agent --ignore-not-found=true",
        "kubectl delete statefulset -n teleport-agent teleport-kube-agent --ignore-not-found=true",
        "kubectl delete secret -n teleport-agent teleport-kube-agent-0-state --ignore-not-found=true",
        "kubectl delete pod -n teleport-agent -l app=teleport-kube-agent --ignore-not-found=true",
        "kubectl delete configmap -n teleport-agent -l app.kubernetes.io/name=teleport-kube-agent --ignore-not-found=true",
    ] {
        assert!(runner.calls().contains(&call.to_string()), "missing: {call}");
    }
}

#[tokio::test]
async fn test_clean_continues_past_failures() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::new()
        .on("helm uninstall", fail("release: not found"))
        .on("kubectl delete namespace", fail("namespaces not found"));

    clean::clean(&runner, &settings(""), &StateDir::new(dir.path())).await;

    assert!(runner.position("kubectl delete -f /deploy/k8s/rbac.yaml").is_some());
}

#[test]
fn test_stop_port_forward_without_state_file() {
    let dir = tempfile::tempdir().unwrap();
    let state = StateDir::new(dir.path());
    let runner = ScriptedRunner::new();

    clean::stop_port_forward(&runner, &state);

    assert!(runner.terminated().is_empty());
    assert!(!state.port_forward_record().exists());
}

#[test]
fn test_stop_port_forward_discards_non_numeric_pid() {
    let dir = tempfile::tempdir().unwrap();
    let state = StateDir::new(dir.path());
    std::fs::write(state.port_forward_record(), r#"{"pid":"not-a-pid"}"#).unwrap();
    std::fs::write(state.legacy_pid_file(), "garbage\n").unwrap();
    let runner = ScriptedRunner::new();

    clean::stop_port_forward(&runner, &state);

    assert!(!state.port_forward_record().exists());
    assert!(!state.legacy_pid_file().exists());
    assert!(runner.terminated().is_empty());
}

#[test]
fn test_stop_port_forward_terminates_recorded_process() {
    let dir = tempfile::tempdir().unwrap();
    let state = StateDir::new(dir.path());
    PortForwardRecord::new(
        7001,
        PORT_FORWARD.into(),
        "teleport-cluster".into(),
        state.port_forward_log(),
    )
    .save(&state)
    .unwrap();
    std::fs::write(state.legacy_pid_file(), "7002").unwrap();
    let runner = ScriptedRunner::new()
        .with_process(7001, PORT_FORWARD)
        .with_process(7002, PORT_FORWARD)
        .with_strays(&[7003]);

    clean::stop_port_forward(&runner, &state);

    assert_eq!(runner.terminated(), vec![7001, 7002, 7003]);
    assert_eq!(PortForwardRecord::load(&state).unwrap(), RecordState::Missing);
    assert!(!state.legacy_pid_file().exists());
}

#[test]
fn test_stop_port_forward_skips_dead_process() {
    let dir = tempfile::tempdir().unwrap();
    let state = StateDir::new(dir.path());
    PortForwardRecord::new(
        7001,
        "kubectl port-forward".into(),
        "teleport-cluster".into(),
        state.port_forward_log(),
    )
    .save(&state)
    .unwrap();
    let runner = ScriptedRunner::new();

    clean::stop_port_forward(&runner, &state);

    assert!(runner.terminated().is_empty());
    assert!(!state.port_forward_record().exists());
}

#[test]
fn test_stop_port_forward_spares_recycled_pid() {
    let dir = tempfile::tempdir().unwrap();
    let state = StateDir::new(dir.path());
    PortForwardRecord::new(
        7001,
        PORT_FORWARD.into(),
        "teleport-cluster".into(),
        state.port_forward_log(),
    )
    .save(&state)
    .unwrap();
    std::fs::write(state.legacy_pid_file(), "7002").unwrap();
    let runner = ScriptedRunner::new()
        .with_process(7001, "vim notes.txt")
        .with_process(7002, "/usr/bin/python3 server.py");

    clean::stop_port_forward(&runner, &state);

    assert!(runner.terminated().is_empty());
    assert!(!state.port_forward_record().exists());
    assert!(!state.legacy_pid_file().exists());
}

#[test]
fn test_stop_port_forward_skips_live_pid_without_command_line() {
    let dir = tempfile::tempdir().unwrap();
    let state = StateDir::new(dir.path());
    std::fs::write(state.legacy_pid_file(), "7002").unwrap();
    let runner = ScriptedRunner::new().with_alive(7002);

    clean::stop_port_forward(&runner, &state);

    assert!(runner.terminated().is_empty());
}
