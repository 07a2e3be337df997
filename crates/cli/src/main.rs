//! devloop CLI, the main entry point.
//!
//! Commands:
//! - `run`     Run a task through an agent controller
//! - `events`  List the events of a persisted session
//! - `agents`  List the agents that can be run or delegated to
//! - `config`  Show, locate or validate the configuration

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "devloop",
    about = "devloop: an event-sourced runtime for autonomous coding agents",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a task, or resume a checkpointed session
    Run(commands::run::RunArgs),

    /// List the events of a session
    Events(commands::events::EventsArgs),

    /// List the registered agents
    Agents,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: Option<commands::config::ConfigAction>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(args) => commands::run::run(args).await?,
        Commands::Events(args) => commands::events::run(args)?,
        Commands::Agents => commands::agents::run()?,
        Commands::Config { action } => commands::config::run(action.unwrap_or_default())?,
    }

    Ok(())
}
