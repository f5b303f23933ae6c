//! DeepReact CLI, the main entry point.
//!
//! Commands:
//! - `run`     Run rollouts for one question or a JSONL dataset
//! - `tools`   List enabled tools and their schemas
//! - `config`  Print the effective (or default) configuration
//! - `doctor`  Check configuration and provider health

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "deepreact",
    about = "DeepReact: ReAct research agent rollouts",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.deepreact/config.toml)
    #[arg(short, long, global = true, env = "DEEPREACT_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run rollouts and write one JSON line per outcome
    Run(commands::run::RunArgs),

    /// List enabled tools
    Tools,

    /// Print configuration as TOML
    Config {
        /// Print the built-in defaults instead of the effective config
        #[arg(long)]
        default: bool,
    },

    /// Diagnose configuration and provider health
    Doctor,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing; logs go to stderr so stdout stays JSONL
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Run(args) => commands::run::run(config_path, args).await?,
        Commands::Tools => commands::tools::run(config_path)?,
        Commands::Config { default } => commands::config_cmd::show(config_path, default)?,
        Commands::Doctor => commands::doctor::run(config_path).await?,
    }

    Ok(())
}
