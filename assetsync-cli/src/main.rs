//! assetsync CLI
//!
//! Keeps a local asset store in sync with a remote manifest.

mod commands;
mod error;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use commands::sync::SyncArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "assetsync", version, about = "Fetch, verify and cache application assets")]
struct Cli {
    /// Enable debug logging for assetsync
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write logs to this directory
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one synchronization session
    Sync(SyncArgs),

    /// Show cached assets and their recorded hashes
    Status {
        /// Store directory (defaults to the platform data directory)
        #[arg(long, value_name = "DIR")]
        store: Option<PathBuf>,
    },

    /// Remove every cached asset and recorded hash
    Clear {
        /// Store directory (defaults to the platform data directory)
        #[arg(long, value_name = "DIR")]
        store: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _log_guard = match assetsync::logging::init_logging(cli.log_dir.as_deref(), cli.verbose) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

async fn run(command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Sync(args) => commands::sync::run(args).await,
        Commands::Status { store } => commands::status::run(store).await,
        Commands::Clear { store } => commands::clear::run(store).await,
    }
}
