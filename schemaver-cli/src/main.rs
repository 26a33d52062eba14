//! Schemaver CLI - forward-only schema migrations from the terminal

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{doctor, hash, history, logs, migrate, pending, status};

/// Schemaver - bring a database up to the application's schema version
#[derive(Parser)]
#[command(name = "sv", version, about, long_about = None)]
struct Cli {
    /// Schemaver directory holding schemaver.json (default: ~/.schemaver)
    #[arg(long, global = true, env = "SCHEMAVER_DIR")]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply every pending catalog statement
    Migrate {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show database and application schema versions
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List applied statements from the ledger
    History {
        /// Show full statement text
        #[arg(long)]
        full: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List statements the next migration would apply
    Pending {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Verify the ledger against the catalog
    Doctor {
        /// Show verbose output
        #[arg(long, short)]
        verbose: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the fingerprint of a statement
    Hash {
        /// Statement text
        statement: Option<String>,
        /// Read the statement from a file
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// View and manage the run log
    Logs {
        #[command(subcommand)]
        command: logs::LogsCommands,
    },
}

fn init_tracing() {
    // Diagnostics go to stderr so --json output stays parseable
    let filter = EnvFilter::try_from_env("SCHEMAVER_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            output::error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let dir = commands::get_schemaver_dir(cli.dir)?;

    match cli.command {
        Commands::Migrate { json } => migrate::run(&dir, json),
        Commands::Status { json } => status::run(&dir, json),
        Commands::History { full, json } => history::run(&dir, full, json),
        Commands::Pending { json } => pending::run(&dir, json),
        Commands::Doctor { verbose, json } => doctor::run(&dir, verbose, json),
        Commands::Hash {
            statement,
            file,
            json,
        } => hash::run(statement.as_deref(), file.as_deref(), json),
        Commands::Logs { command } => logs::run(&dir, command),
    }
}
