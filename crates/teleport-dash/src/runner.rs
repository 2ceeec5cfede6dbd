//! External process execution.
//!
//! Every interaction with the cluster goes through `kubectl`, `helm` or
//! `tctl`. The [`CommandRunner`] trait is the seam between the deployers and
//! the operating system so the sequencing can be driven by a scripted runner
//! in tests.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use sysinfo::{
    Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, Signal, System, UpdateKind,
};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::DeployError;

/// An external command line with optional stdin payload and environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cmd {
    program: String,
    args: Vec<String>,
    stdin: Option<String>,
    envs: Vec<(String, String)>,
}

impl Cmd {
    /// Start a command for `program`.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    /// Shorthand for `kubectl`.
    #[must_use]
    pub fn kubectl() -> Self {
        Self::new("kubectl")
    }

    /// Shorthand for `helm`.
    #[must_use]
    pub fn helm() -> Self {
        Self::new("helm")
    }

    /// Shorthand for `tctl`.
    #[must_use]
    pub fn tctl() -> Self {
        Self::new("tctl")
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Feed `input` to the process on stdin.
    #[must_use]
    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    #[must_use]
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    #[must_use]
    pub fn get_stdin(&self) -> Option<&str> {
        self.stdin.as_deref()
    }

    #[must_use]
    pub fn get_envs(&self) -> &[(String, String)] {
        &self.envs
    }

    /// The full command line, space separated.
    #[must_use]
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl std::fmt::Display for Cmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.display())
    }
}

/// Captured result of a finished command. Output is trimmed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmdOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Trimmed stdout when the command succeeded and printed something.
    #[must_use]
    pub fn value(&self) -> Option<&str> {
        (self.success() && !self.stdout.is_empty()).then_some(self.stdout.as_str())
    }
}

/// What a non-zero exit means to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Failure aborts the invocation.
    Fatal,
    /// Failure is logged and execution continues.
    BestEffort,
}

/// Executes external processes on behalf of the deployers.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `cmd` to completion, capturing stdout and stderr.
    async fn output(&self, cmd: &Cmd) -> Result<CmdOutput>;

    /// Start `cmd` in the background with stdout and stderr redirected to
    /// `log_path`. Returns the child's PID.
    async fn spawn_detached(&self, cmd: &Cmd, log_path: &Path) -> Result<u32>;

    /// Run `cmd` with inherited stdio and return its exit code.
    async fn stream(&self, cmd: &Cmd) -> Result<i32>;

    /// Resolve `program` on `PATH`.
    fn locate(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }

    /// Whether `pid` refers to a running (non-zombie) process.
    fn is_alive(&self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        sys.process(pid)
            .is_some_and(|p| p.status() != ProcessStatus::Zombie)
    }

    /// Command line of `pid`, space separated, if the process exists.
    fn command_line(&self, pid: u32) -> Option<String> {
        let pid = Pid::from_u32(pid);
        let mut sys = System::new();
        sys.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::OnlyIfNotSet),
        );
        sys.process(pid).map(|p| {
            p.cmd()
                .iter()
                .map(|s| s.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" ")
        })
    }

    /// Send SIGTERM to `pid`, falling back to SIGKILL where TERM is not
    /// supported. Returns whether a signal was delivered.
    fn terminate(&self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        sys.process(pid).is_some_and(|p| {
            p.kill_with(Signal::Term).unwrap_or_else(|| p.kill())
        })
    }

    /// PIDs of processes whose command line matches `pattern`, excluding
    /// the current process.
    fn matching_processes(&self, pattern: &Regex) -> Vec<u32> {
        let own = std::process::id();
        let mut sys = System::new();
        sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing().with_cmd(UpdateKind::OnlyIfNotSet),
        );
        sys.processes()
            .iter()
            .filter(|(pid, _)| pid.as_u32() != own)
            .filter(|(_, p)| p.status() != ProcessStatus::Zombie)
            .filter(|(_, p)| {
                let cmdline = p
                    .cmd()
                    .iter()
                    .map(|s| s.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join(" ");
                pattern.is_match(&cmdline)
            })
            .map(|(pid, _)| pid.as_u32())
            .collect()
    }
}

/// Run `cmd` under `policy`.
///
/// Best-effort failures, including spawn failures, come back as a
/// [`CmdOutput`] with a non-zero code.
///
/// # Errors
///
/// Under [`Policy::Fatal`], returns [`DeployError::CommandFailed`] when the
/// command cannot be spawned or exits non-zero.
pub async fn run(runner: &dyn CommandRunner, cmd: &Cmd, policy: Policy) -> Result<CmdOutput> {
    debug!(command = %cmd, ?policy, "Running command");

    let output = match runner.output(cmd).await {
        Ok(output) => output,
        Err(e) => {
            warn!(command = %cmd, error = %e, "Failed to run command");
            CmdOutput {
                code: 1,
                stdout: String::new(),
                stderr: e.to_string(),
            }
        }
    };

    if !output.success() {
        debug!(command = %cmd, code = output.code, stderr = %output.stderr, "Command exited non-zero");
        if policy == Policy::Fatal {
            return Err(DeployError::CommandFailed {
                command: cmd.display(),
                stderr: output.stderr,
            }
            .into());
        }
    }

    Ok(output)
}

/// Run `cmd`; non-zero exit aborts.
///
/// # Errors
///
/// See [`run`].
pub async fn required(runner: &dyn CommandRunner, cmd: &Cmd) -> Result<CmdOutput> {
    run(runner, cmd, Policy::Fatal).await
}

/// Run `cmd`; failures are tolerated.
pub async fn best_effort(runner: &dyn CommandRunner, cmd: &Cmd) -> CmdOutput {
    match run(runner, cmd, Policy::BestEffort).await {
        Ok(output) => output,
        // BestEffort never produces an error
        Err(e) => CmdOutput {
            code: 1,
            stdout: String::new(),
            stderr: e.to_string(),
        },
    }
}

/// Runner backed by real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn command(cmd: &Cmd) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(cmd.program());
        command.args(cmd.get_args());
        for (key, value) in cmd.get_envs() {
            command.env(key, value);
        }
        command
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn output(&self, cmd: &Cmd) -> Result<CmdOutput> {
        let mut command = Self::command(cmd);
        command
            .stdin(if cmd.get_stdin().is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to spawn {}", cmd.program()))?;

        if let Some(input) = cmd.get_stdin() {
            if let Some(mut stdin) = child.stdin.take() {
                stdin
                    .write_all(input.as_bytes())
                    .await
                    .with_context(|| format!("Failed to write stdin of {}", cmd.program()))?;
                // Close stdin so the child sees EOF
                drop(stdin);
            }
        }

        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("Failed to wait for {}", cmd.program()))?;

        Ok(CmdOutput {
            code: output.status.code().unwrap_or(1),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    async fn spawn_detached(&self, cmd: &Cmd, log_path: &Path) -> Result<u32> {
        let log = File::create(log_path)
            .with_context(|| format!("Failed to create log file {}", log_path.display()))?;
        let log_err = log.try_clone().context("Failed to duplicate log file handle")?;

        let mut command = std::process::Command::new(cmd.program());
        command
            .args(cmd.get_args())
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));
        for (key, value) in cmd.get_envs() {
            command.env(key, value);
        }

        // Own process group so a Ctrl-C in this terminal does not reach it
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let child = command
            .spawn()
            .with_context(|| format!("Failed to spawn {}", cmd.program()))?;
        Ok(child.id())
    }

    async fn stream(&self, cmd: &Cmd) -> Result<i32> {
        let status = Self::command(cmd)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .await
            .with_context(|| format!("Failed to run {}", cmd.program()))?;
        Ok(status.code().unwrap_or(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmd_display() {
        let cmd = Cmd::kubectl().args(["-n", "teleport-agent", "get", "pods"]);
        assert_eq!(cmd.display(), "kubectl -n teleport-agent get pods");
        assert_eq!(cmd.to_string(), cmd.display());
    }

    #[test]
    fn test_output_value() {
        let ok = CmdOutput {
            code: 0,
            stdout: "pod-0".into(),
            stderr: String::new(),
        };
        assert_eq!(ok.value(), Some("pod-0"));

        let empty = CmdOutput::default();
        assert_eq!(empty.value(), None);

        let failed = CmdOutput {
            code: 1,
            stdout: "pod-0".into(),
            stderr: String::new(),
        };
        assert_eq!(failed.value(), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_runner_captures_trimmed_output() {
        let runner = SystemRunner::new();
        let output = runner
            .output(&Cmd::new("sh").args(["-c", "echo '  hello  '; echo oops >&2; exit 3"]))
            .await
            .unwrap();
        assert_eq!(output.code, 3);
        assert_eq!(output.stdout, "hello");
        assert_eq!(output.stderr, "oops");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_runner_pipes_stdin() {
        let runner = SystemRunner::new();
        let output = runner
            .output(&Cmd::new("cat").stdin("kind: role\n"))
            .await
            .unwrap();
        assert!(output.success());
        assert_eq!(output.stdout, "kind: role");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fatal_policy_maps_exit_to_error() {
        let runner = SystemRunner::new();
        let err = required(&runner, &Cmd::new("sh").args(["-c", "echo bad >&2; exit 1"]))
            .await
            .unwrap_err();
        let err = err.downcast::<DeployError>().unwrap();
        assert!(matches!(err, DeployError::CommandFailed { ref stderr, .. } if stderr == "bad"));
    }

    #[tokio::test]
    async fn test_best_effort_tolerates_missing_binary() {
        let runner = SystemRunner::new();
        let output = best_effort(&runner, &Cmd::new("definitely-not-a-real-binary-xyz")).await;
        assert_eq!(output.code, 1);
        assert!(!output.stderr.is_empty());
    }

    #[test]
    fn test_current_process_is_alive() {
        let runner = SystemRunner::new();
        assert!(runner.is_alive(std::process::id()));
    }

    #[test]
    fn test_current_process_command_line() {
        let runner = SystemRunner::new();
        let line = runner.command_line(std::process::id()).unwrap();
        assert!(!line.contains("port-forward"));
    }
}
