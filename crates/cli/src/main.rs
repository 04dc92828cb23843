//! SiteMirror CLI - Main Entry Point
//!
//! Discovers the routes of a live site, synchronizes local snapshots of
//! them and validates the snapshots in retrying rounds.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{config, discover, run, sync, validate};

/// SiteMirror - keep a static mirror equivalent to its live site
#[derive(Parser)]
#[command(name = "sitemirror")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = sitemirror_common::DEFAULT_CONFIG_FILE, global = true)]
    config: PathBuf,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the routes of the live site
    Discover(discover::DiscoverArgs),

    /// Synchronize local snapshots from the live site
    Sync(sync::SyncArgs),

    /// Run one validation round over existing snapshots
    Validate(validate::ValidateArgs),

    /// Synchronize and validate until clean or out of attempts
    Run(run::RunArgs),

    /// Show or initialize the configuration
    Config(config::ConfigArgs),
}

/// Exit code for fatal errors
const EXIT_FATAL: i32 = 2;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let result = match cli.command {
        Commands::Discover(args) => discover::execute(args, &cli.config, cli.format).await,
        Commands::Sync(args) => sync::execute(args, &cli.config, cli.format).await,
        Commands::Validate(args) => validate::execute(args, &cli.config, cli.format).await,
        Commands::Run(args) => run::execute(args, &cli.config, cli.format).await,
        Commands::Config(args) => config::execute(args, &cli.config),
    };

    let code = match result {
        Ok(code) => code,
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            EXIT_FATAL
        }
    };
    std::process::exit(code);
}
