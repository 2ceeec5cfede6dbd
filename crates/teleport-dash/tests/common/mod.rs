//! Scripted command runner for driving the deployers without a cluster.

#![allow(dead_code)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use teleport_dash::{Cmd, CmdOutput, CommandRunner, Config, Settings};

/// First PID handed out by [`ScriptedRunner::spawn_detached`].
pub const FIRST_PID: u32 = 4242;

pub const AUTH_POD: &str = "teleport-cluster-auth-0";
pub const TOKEN: &str = "0123456789abcdef0123456789abcdef";

pub fn ok(stdout: &str) -> CmdOutput {
    CmdOutput {
        code: 0,
        stdout: stdout.to_string(),
        stderr: String::new(),
    }
}

pub fn fail(stderr: &str) -> CmdOutput {
    CmdOutput {
        code: 1,
        stdout: String::new(),
        stderr: stderr.to_string(),
    }
}

struct Rule {
    prefix: String,
    responses: VecDeque<CmdOutput>,
}

/// A [`CommandRunner`] answering from prefix-matched rules.
///
/// The rule with the longest prefix of the command line wins. A rule with
/// several responses hands them out in order and keeps repeating the last.
/// Unmatched commands succeed with empty output.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Cmd>>,
    values: Mutex<Vec<String>>,
    missing: Mutex<HashSet<String>>,
    alive: Mutex<HashSet<u32>>,
    cmdlines: Mutex<HashMap<u32, String>>,
    strays: Mutex<Vec<u32>>,
    spawned: Mutex<Vec<(Cmd, PathBuf)>>,
    streamed: Mutex<Vec<Cmd>>,
    terminated: Mutex<Vec<u32>>,
    next_pid: AtomicU32,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(FIRST_PID),
            ..Self::default()
        }
    }

    pub fn on(self, prefix: &str, output: CmdOutput) -> Self {
        self.on_seq(prefix, vec![output])
    }

    pub fn on_seq(self, prefix: &str, outputs: Vec<CmdOutput>) -> Self {
        self.rules.lock().unwrap().push(Rule {
            prefix: prefix.to_string(),
            responses: outputs.into(),
        });
        self
    }

    /// Make `program` unresolvable on `PATH`.
    pub fn without(self, program: &str) -> Self {
        self.missing.lock().unwrap().insert(program.to_string());
        self
    }

    pub fn with_alive(self, pid: u32) -> Self {
        self.alive.lock().unwrap().insert(pid);
        self
    }

    /// A live process running `cmdline`.
    pub fn with_process(self, pid: u32, cmdline: &str) -> Self {
        self.cmdlines.lock().unwrap().insert(pid, cmdline.to_string());
        self.with_alive(pid)
    }

    /// Processes reported by the command line scan.
    pub fn with_strays(self, pids: &[u32]) -> Self {
        self.strays.lock().unwrap().extend_from_slice(pids);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(Cmd::display).collect()
    }

    pub fn commands(&self) -> Vec<Cmd> {
        self.calls.lock().unwrap().clone()
    }

    /// Index of the first call starting with `prefix`.
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.calls().iter().position(|c| c.starts_with(prefix))
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn ran_program(&self, program: &str) -> bool {
        self.calls.lock().unwrap().iter().any(|c| c.program() == program)
    }

    /// Contents of every Helm values file passed to a command, in call order.
    pub fn values_files(&self) -> Vec<String> {
        self.values.lock().unwrap().clone()
    }

    pub fn spawned(&self) -> Vec<(Cmd, PathBuf)> {
        self.spawned.lock().unwrap().clone()
    }

    pub fn streamed(&self) -> Vec<String> {
        self.streamed.lock().unwrap().iter().map(Cmd::display).collect()
    }

    pub fn terminated(&self) -> Vec<u32> {
        self.terminated.lock().unwrap().clone()
    }

    fn respond(&self, line: &str) -> CmdOutput {
        let mut rules = self.rules.lock().unwrap();
        let Some(rule) = rules
            .iter_mut()
            .filter(|r| line.starts_with(&r.prefix))
            .max_by_key(|r| r.prefix.len())
        else {
            return ok("");
        };
        if rule.responses.len() > 1 {
            rule.responses.pop_front().unwrap_or_default()
        } else {
            rule.responses.front().cloned().unwrap_or_default()
        }
    }

    fn capture_values(&self, cmd: &Cmd) {
        for arg in cmd.get_args() {
            let path = Path::new(arg);
            let is_values = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("teleport-dash-values-"));
            if is_values {
                if let Ok(content) = std::fs::read_to_string(path) {
                    self.values.lock().unwrap().push(content);
                }
            }
        }
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn output(&self, cmd: &Cmd) -> Result<CmdOutput> {
        self.calls.lock().unwrap().push(cmd.clone());
        self.capture_values(cmd);
        Ok(self.respond(&cmd.display()))
    }

    async fn spawn_detached(&self, cmd: &Cmd, log_path: &Path) -> Result<u32> {
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.spawned
            .lock()
            .unwrap()
            .push((cmd.clone(), log_path.to_path_buf()));
        self.alive.lock().unwrap().insert(pid);
        self.cmdlines.lock().unwrap().insert(pid, cmd.display());
        Ok(pid)
    }

    async fn stream(&self, cmd: &Cmd) -> Result<i32> {
        self.streamed.lock().unwrap().push(cmd.clone());
        Ok(0)
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        if self.missing.lock().unwrap().contains(program) {
            None
        } else {
            Some(PathBuf::from("/usr/local/bin").join(program))
        }
    }

    fn is_alive(&self, pid: u32) -> bool {
        self.alive.lock().unwrap().contains(&pid)
    }

    fn command_line(&self, pid: u32) -> Option<String> {
        if !self.is_alive(pid) {
            return None;
        }
        self.cmdlines.lock().unwrap().get(&pid).cloned()
    }

    fn terminate(&self, pid: u32) -> bool {
        self.terminated.lock().unwrap().push(pid);
        self.alive.lock().unwrap().remove(&pid)
    }

    fn matching_processes(&self, _pattern: &Regex) -> Vec<u32> {
        self.strays.lock().unwrap().clone()
    }
}

/// Settings parsed from `yaml` with manifests under `/deploy/k8s`.
pub fn settings(yaml: &str) -> Settings {
    Config::from_yaml_str(yaml, "/deploy")
        .unwrap()
        .settings()
        .unwrap()
}

/// Environment variables of the first call starting with `prefix`.
pub fn envs_of(runner: &ScriptedRunner, prefix: &str) -> HashMap<String, String> {
    runner
        .commands()
        .into_iter()
        .find(|c| c.display().starts_with(prefix))
        .map(|c| c.get_envs().iter().cloned().collect())
        .unwrap_or_default()
}
