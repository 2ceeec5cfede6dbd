//! UI helpers for the deployment CLI.
//!
//! Provides consistent formatting for console output during deployment.

use colored::Colorize;

/// Step counter used only to label progress output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepCounter {
    current: u8,
    total: u8,
}

impl StepCounter {
    #[must_use]
    pub const fn new(total: u8) -> Self {
        Self { current: 0, total }
    }

    /// Advance and format the label for the next step.
    pub fn next(&mut self, name: &str) -> String {
        self.current += 1;
        format!("Step {}/{}: {name}", self.current, self.total)
    }
}

/// Print a step header.
pub fn print_step(message: &str) {
    println!();
    println!("{} {}", "▶".cyan(), message.bold());
}

/// Advance `steps` and print the resulting step header.
pub fn print_next_step(steps: &mut StepCounter, name: &str) {
    let label = steps.next(name);
    print_step(&label);
}

/// Print a success message.
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message.green());
}

/// Print a warning message.
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message.yellow());
}

/// Print an error message.
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message.red());
}

/// Print an info message.
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message.cyan());
}

/// Print a key-value pair.
pub fn print_kv(key: &str, value: &str) {
    println!("  {} {}", format!("{key}:").bright_black(), value.green());
}

/// Print a summary checklist item.
pub fn print_check(done: bool, message: &str) {
    let status = if done { "✓".green() } else { "⚠".yellow() };
    println!("  {status} {message}");
}

/// Print a list item.
pub fn print_list_item(item: &str) {
    println!("     {} {item}", "•".bright_black());
}

/// Print a numbered step.
pub fn print_numbered_step(num: usize, message: &str) {
    println!("  {}. {}", num.to_string().cyan(), message.bold());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_counter_labels() {
        let mut steps = StepCounter::new(5);
        assert_eq!(steps.next("Deploying RBAC resources..."), "Step 1/5: Deploying RBAC resources...");
        assert_eq!(steps.next("Generating token"), "Step 2/5: Generating token");
        assert_eq!(steps.next("Deploying agent"), "Step 3/5: Deploying agent");
    }
}
