//! Transient on-disk state shared between invocations.
//!
//! `deploy` leaves a port-forward running in the background and `clean`
//! has to find it again later. The handoff is a small JSON record in the
//! state directory (the OS temp dir unless overridden):
//!
//! | file | content |
//! |---|---|
//! | `teleport-port-forward.json` | [`PortForwardRecord`] |
//! | `teleport-port-forward.log` | port-forward stdout and stderr |
//! | `teleport-port-forward.pid` | legacy bare PID, read by cleanup only |
//! | `teleport-admin-invite-url.txt` | last admin invite link |

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Location of transient state files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateDir {
    root: PathBuf,
}

impl Default for StateDir {
    fn default() -> Self {
        Self::new(std::env::temp_dir())
    }
}

impl StateDir {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn port_forward_record(&self) -> PathBuf {
        self.root.join("teleport-port-forward.json")
    }

    #[must_use]
    pub fn port_forward_log(&self) -> PathBuf {
        self.root.join("teleport-port-forward.log")
    }

    #[must_use]
    pub fn legacy_pid_file(&self) -> PathBuf {
        self.root.join("teleport-port-forward.pid")
    }

    #[must_use]
    pub fn invite_url_file(&self) -> PathBuf {
        self.root.join("teleport-admin-invite-url.txt")
    }

    /// Persist the admin invite link.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_invite_url(&self, url: &str) -> Result<()> {
        std::fs::create_dir_all(&self.root).context("Failed to create state directory")?;
        let path = self.invite_url_file();
        std::fs::write(&path, url)
            .with_context(|| format!("Failed to write invite URL to {}", path.display()))
    }

    /// The last persisted admin invite link, if any.
    #[must_use]
    pub fn read_invite_url(&self) -> Option<String> {
        std::fs::read_to_string(self.invite_url_file())
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }
}

/// A background `kubectl port-forward` started by `deploy`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortForwardRecord {
    /// PID of the port-forward process.
    pub pid: u32,
    /// Command line that was started.
    pub command: String,
    /// Namespace of the forwarded service.
    pub namespace: String,
    /// Where the process writes its output.
    pub log_path: PathBuf,
    /// PID of the invocation that started it.
    pub owner_pid: u32,
    /// RFC 3339 creation time.
    pub created_at: String,
}

/// Result of reading the port-forward record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordState {
    /// No record on disk.
    Missing,
    /// A record exists but cannot be parsed.
    Corrupt(String),
    /// A well-formed record.
    Present(PortForwardRecord),
}

impl PortForwardRecord {
    /// Record for a process just spawned by this invocation.
    #[must_use]
    pub fn new(pid: u32, command: String, namespace: String, log_path: PathBuf) -> Self {
        Self {
            pid,
            command,
            namespace,
            log_path,
            owner_pid: std::process::id(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Read the record from `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read.
    pub fn load(dir: &StateDir) -> Result<RecordState> {
        let path = dir.port_forward_record();
        if !path.exists() {
            return Ok(RecordState::Missing);
        }

        let content = std::fs::read_to_string(&path).context("Failed to read port-forward record")?;
        match serde_json::from_str::<Self>(&content) {
            Ok(record) => {
                info!(pid = record.pid, created_at = %record.created_at, "Loaded port-forward record");
                Ok(RecordState::Present(record))
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unreadable port-forward record");
                Ok(RecordState::Corrupt(content))
            }
        }
    }

    /// Write the record into `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, dir: &StateDir) -> Result<()> {
        std::fs::create_dir_all(dir.root()).context("Failed to create state directory")?;
        let content = serde_json::to_string_pretty(self).context("Failed to serialize port-forward record")?;
        std::fs::write(dir.port_forward_record(), content).context("Failed to write port-forward record")?;
        Ok(())
    }

    /// Delete the record from `dir`; a missing record is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be removed.
    pub fn remove(dir: &StateDir) -> Result<()> {
        remove_if_exists(&dir.port_forward_record())
    }
}

/// Read the legacy bare PID file. `Some(Err(raw))` means it held garbage.
#[must_use]
pub fn read_legacy_pid(dir: &StateDir) -> Option<std::result::Result<u32, String>> {
    let raw = std::fs::read_to_string(dir.legacy_pid_file()).ok()?;
    let trimmed = raw.trim();
    Some(trimmed.parse::<u32>().map_err(|_| trimmed.to_string()))
}

/// Remove `path`, ignoring a missing file.
///
/// # Errors
///
/// Returns an error for any failure other than the file not existing.
pub fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateDir::new(dir.path());
        assert_eq!(PortForwardRecord::load(&state).unwrap(), RecordState::Missing);

        let record = PortForwardRecord::new(
            4242,
            "kubectl port-forward -n teleport-cluster svc/teleport-cluster 8080:8080".into(),
            "teleport-cluster".into(),
            state.port_forward_log(),
        );
        record.save(&state).unwrap();

        match PortForwardRecord::load(&state).unwrap() {
            RecordState::Present(loaded) => {
                assert_eq!(loaded.pid, 4242);
                assert_eq!(loaded.owner_pid, std::process::id());
                assert!(chrono::DateTime::parse_from_rfc3339(&loaded.created_at).is_ok());
            }
            other => panic!("unexpected record state: {other:?}"),
        }

        PortForwardRecord::remove(&state).unwrap();
        assert!(!state.port_forward_record().exists());
        // Second removal is a no-op
        PortForwardRecord::remove(&state).unwrap();
    }

    #[test]
    fn test_non_numeric_pid_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateDir::new(dir.path());
        std::fs::write(state.port_forward_record(), r#"{"pid":"abc"}"#).unwrap();
        assert!(matches!(
            PortForwardRecord::load(&state).unwrap(),
            RecordState::Corrupt(_)
        ));
    }

    #[test]
    fn test_legacy_pid_parsing() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateDir::new(dir.path());
        assert_eq!(read_legacy_pid(&state), None);

        std::fs::write(state.legacy_pid_file(), "1234\n").unwrap();
        assert_eq!(read_legacy_pid(&state), Some(Ok(1234)));

        std::fs::write(state.legacy_pid_file(), "not-a-pid").unwrap();
        assert_eq!(read_legacy_pid(&state), Some(Err("not-a-pid".into())));
    }

    #[test]
    fn test_invite_url_file() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateDir::new(dir.path().join("nested"));
        assert_eq!(state.read_invite_url(), None);
        state.write_invite_url("https://host:8080/web/invite/abc").unwrap();
        assert_eq!(
            state.read_invite_url().as_deref(),
            Some("https://host:8080/web/invite/abc")
        );
    }
}
