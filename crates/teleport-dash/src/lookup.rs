//! Ordered pod lookup strategies.
//!
//! Charts have renamed their labels over time, so finding "the agent pod"
//! means trying several selectors in order and finally falling back to a
//! name match.

use tracing::debug;

use crate::poll::first_pod_name;
use crate::runner::{self, Cmd, CommandRunner};

/// One way of locating a pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodLookup {
    /// First pod matching a label selector.
    Selector { namespace: String, selector: String },
    /// First pod whose name contains `fragment`.
    NameContains { namespace: String, fragment: String },
}

impl PodLookup {
    #[must_use]
    pub fn selector(namespace: &str, selector: &str) -> Self {
        Self::Selector {
            namespace: namespace.to_string(),
            selector: selector.to_string(),
        }
    }

    #[must_use]
    pub fn name_contains(namespace: &str, fragment: &str) -> Self {
        Self::NameContains {
            namespace: namespace.to_string(),
            fragment: fragment.to_string(),
        }
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        match self {
            Self::Selector { namespace, .. } | Self::NameContains { namespace, .. } => namespace,
        }
    }

    /// Try this strategy once.
    pub async fn resolve(&self, runner: &dyn CommandRunner) -> Option<String> {
        match self {
            Self::Selector {
                namespace,
                selector,
            } => {
                let output = runner::best_effort(runner, &first_pod_name(namespace, selector)).await;
                output.value().map(str::to_string)
            }
            Self::NameContains {
                namespace,
                fragment,
            } => {
                let cmd = Cmd::kubectl().args(["-n", namespace.as_str(), "get", "pods", "-o", "name"]);
                let output = runner::best_effort(runner, &cmd).await;
                output
                    .value()?
                    .lines()
                    .map(|line| line.trim().trim_start_matches("pod/"))
                    .find(|name| name.contains(fragment.as_str()))
                    .map(str::to_string)
            }
        }
    }
}

/// A pod located by one of the strategies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundPod {
    pub namespace: String,
    pub name: String,
}

/// Evaluate `strategies` in order; the first hit wins.
pub async fn find_first(runner: &dyn CommandRunner, strategies: &[PodLookup]) -> Option<FoundPod> {
    for strategy in strategies {
        if let Some(name) = strategy.resolve(runner).await {
            debug!(?strategy, pod = %name, "Pod lookup matched");
            return Some(FoundPod {
                namespace: strategy.namespace().to_string(),
                name,
            });
        }
        debug!(?strategy, "Pod lookup missed");
    }
    None
}
