//! Kubernetes Dashboard behind a Teleport access proxy.
//!
//! This library sequences `kubectl`, `helm` and `tctl` invocations to deploy
//! the Kubernetes Dashboard together with a Teleport kube agent, either
//! against a self-hosted Teleport cluster installed into the same Kubernetes
//! cluster ("local" mode) or against an existing Teleport Enterprise cluster.
//!
//! # Example
//!
//! ```ignore
//! use teleport_dash::{deploy, Config, StateDir, SystemRunner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Config::load("config.yaml".as_ref())?.settings()?;
//!     deploy::deploy(&SystemRunner::new(), &settings, &StateDir::default()).await
//! }
//! ```

// Allow product names without backticks in doc comments
#![allow(clippy::doc_markdown)]

pub mod clean;
pub mod config;
pub mod deploy;
pub mod error;
pub mod extract;
pub mod inspect;
pub mod logs;
pub mod lookup;
pub mod poll;
pub mod runner;
pub mod state;
pub mod ui;
pub mod validator;
pub mod values;

// Re-export commonly used types at the crate root
pub use config::{Config, DeployMode, Settings, Timings};
pub use error::DeployError;
pub use logs::LogTarget;
pub use runner::{Cmd, CmdOutput, CommandRunner, SystemRunner};
pub use state::{PortForwardRecord, StateDir};
