use anyhow::Result;
use colored::Colorize;
use tracing::debug;

use crate::config::DeployMode;
use crate::runner::CommandRunner;
use crate::ui;

/// Validates that the external tools a deployment shells out to are present.
pub struct PrerequisitesValidator {
    requirements: Vec<Requirement>,
}

struct Requirement {
    name: String,
    program: String,
    install_instructions: String,
    critical: bool,
}

impl PrerequisitesValidator {
    #[must_use]
    pub fn new(mode: &DeployMode) -> Self {
        let mut requirements = vec![
            Requirement {
                name: "kubectl".to_string(),
                program: "kubectl".to_string(),
                install_instructions: "Install kubectl from https://kubernetes.io/docs/tasks/tools/"
                    .to_string(),
                critical: true,
            },
            Requirement {
                name: "Helm".to_string(),
                program: "helm".to_string(),
                install_instructions: "Install Helm from https://helm.sh/docs/intro/install/"
                    .to_string(),
                critical: true,
            },
        ];

        // Enterprise setup tries to install tctl itself
        if matches!(mode, DeployMode::Enterprise { .. }) {
            requirements.push(Requirement {
                name: "tctl".to_string(),
                program: "tctl".to_string(),
                install_instructions: "Will be installed automatically where possible".to_string(),
                critical: false,
            });
        }

        Self { requirements }
    }

    #[cfg(test)]
    fn programs(&self) -> Vec<&str> {
        self.requirements.iter().map(|r| r.program.as_str()).collect()
    }

    /// Check every requirement and print the results.
    ///
    /// # Errors
    ///
    /// Returns an error when a critical tool is missing.
    pub fn validate(&self, runner: &dyn CommandRunner) -> Result<()> {
        let mut failures = Vec::new();

        for requirement in &self.requirements {
            let found = runner.locate(&requirement.program);
            debug!(program = %requirement.program, path = ?found, "Prerequisite lookup");
            ui::print_check(found.is_some(), &requirement.name);
            if found.is_none() {
                failures.push(requirement);
            }
        }

        if failures.is_empty() {
            return Ok(());
        }

        println!();
        for failure in &failures {
            if failure.critical {
                println!(
                    "  {} {} - {}",
                    "✗".red(),
                    failure.name.red(),
                    failure.install_instructions.bright_black()
                );
            } else {
                println!(
                    "  {} {} - {}",
                    "⚠".yellow(),
                    failure.name.yellow(),
                    failure.install_instructions.bright_black()
                );
            }
        }
        println!();

        if failures.iter().any(|f| f.critical) {
            return Err(anyhow::anyhow!(
                "Critical prerequisites not met. Please install the required tools and try again."
            ));
        }

        Ok(())
    }
}
