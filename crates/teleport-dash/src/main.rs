//! Teleport Dashboard deployment CLI.
//!
//! Deploys the Kubernetes Dashboard behind Teleport, tears it down again,
//! and offers a few read-only helpers for day-to-day use.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use teleport_dash::{clean, deploy, inspect, logs, ui};
use teleport_dash::{CommandRunner, Config, LogTarget, StateDir, SystemRunner};

/// Kubernetes Dashboard + Teleport deployment tool.
#[derive(Parser)]
#[command(
    name = "teleport-dash",
    version,
    about = "Deploy the Kubernetes Dashboard behind Teleport",
    long_about = "Deploy the Kubernetes Dashboard behind a Teleport access proxy.\n\n\
                  With an empty teleport.proxy_addr a Teleport cluster is installed\n\
                  into the current Kubernetes cluster (local mode). With an https://\n\
                  proxy address the agent joins that Teleport Enterprise cluster.\n\n\
                  Without a subcommand, `deploy` is run."
)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the config file.
    #[arg(long, global = true, env = "TELEPORT_DASH_CONFIG", default_value = "config.yaml")]
    config: PathBuf,

    /// Directory for the port-forward record, its log and the invite URL.
    #[arg(long, global = true, env = "TELEPORT_DASH_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy Teleport, Dashboard, and Agent (default).
    Deploy,
    /// Clean up all deployed resources.
    Clean,
    /// Print the dashboard access tokens.
    GetTokens,
    /// Print the dashboard ClusterIP.
    GetClusterip,
    /// Show namespaces, pods and services.
    Status,
    /// Show Helm release status.
    HelmStatus,
    /// Follow component logs.
    Logs(LogsArgs),
}

#[derive(Args)]
struct LogsArgs {
    /// Component to show: server, agent, dashboard, all (or 1-4). Prompts
    /// when omitted.
    #[arg(long)]
    target: Option<LogTarget>,
}

async fn run(cli: Cli, runner: &dyn CommandRunner) -> Result<()> {
    let settings = Config::load(&cli.config)?.settings()?;
    let state = cli.state_dir.map_or_else(StateDir::default, StateDir::new);

    match cli.command.unwrap_or(Commands::Deploy) {
        Commands::Deploy => deploy::deploy(runner, &settings, &state).await,
        Commands::Clean => {
            clean::clean(runner, &settings, &state).await;
            Ok(())
        }
        Commands::GetTokens => {
            inspect::get_tokens(runner, &settings).await;
            Ok(())
        }
        Commands::GetClusterip => {
            inspect::get_clusterip(runner, &settings).await;
            Ok(())
        }
        Commands::Status => {
            inspect::show_status(runner, &settings, &state).await;
            Ok(())
        }
        Commands::HelmStatus => {
            inspect::show_helm_status(runner, &settings).await;
            Ok(())
        }
        Commands::Logs(args) => logs::show_logs(runner, &settings, args.target).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("info,teleport_dash=debug")
    } else {
        EnvFilter::new("warn,teleport_dash=info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let runner = SystemRunner::new();
    // Signal handler is registered before the command starts
    tokio::select! {
        biased;
        _ = tokio::signal::ctrl_c() => {
            println!();
            ui::print_warning("Interrupted by user");
            ExitCode::from(130)
        }
        result = run(cli, &runner) => match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                ui::print_error(&format!("{e:#}"));
                ExitCode::FAILURE
            }
        },
    }
}
