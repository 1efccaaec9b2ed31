//! fsmlink - run JSON-defined state machines
//!
//! Provides both a REPL and one-shot command execution.

mod commands;
mod config;
mod repl;
mod session;

use clap::{Parser, Subcommand};
use colored::Colorize;
use config::Config;
use fsmlink_core::ErrorPolicy;
use session::Session;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fsmlink")]
#[command(about = "Run JSON-defined state machines, alone or bridged in pairs")]
#[command(version)]
struct Cli {
    /// Directory holding transition documents
    #[arg(short, long, env = "FSMLINK_DIR")]
    dir: Option<PathBuf>,

    /// YAML configuration file
    #[arg(short, long, env = "FSMLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Error handling mode: basic (stop on first failure) or robust
    #[arg(short, long)]
    mode: Option<ErrorPolicy>,

    /// Round bound for bridged runs
    #[arg(long)]
    max_rounds: Option<usize>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Start interactive REPL
    Repl,

    /// List transition documents in the directory
    List,

    /// Validate and summarize a document
    Show {
        /// Document file name
        file: String,

        /// Print the normalized document as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run events against one machine
    Run {
        /// Document file name
        file: String,

        /// Events to run, in order
        #[arg(short, long, value_delimiter = ',')]
        events: Vec<String>,

        /// Run the document's event sequence
        #[arg(short, long)]
        all: bool,
    },

    /// Write the effective configuration to a YAML file
    InitConfig {
        /// Destination path
        path: PathBuf,
    },

    /// Run two machines that trigger each other
    RunBoth {
        /// First document; also the machine bare seeds address
        first: String,

        /// Second document
        second: String,

        /// Seed events as machine:event
        #[arg(short, long, value_delimiter = ',')]
        seed: Vec<String>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    };
    if let Some(dir) = cli.dir {
        config.shell.directory = dir;
    }
    if let Some(mode) = cli.mode {
        config.execution.mode = mode;
    }
    if let Some(max_rounds) = cli.max_rounds {
        config.execution.max_rounds = max_rounds;
    }
    if let Err(e) = config.validate() {
        eprintln!("{}: {}", "Error".red(), e);
        std::process::exit(1);
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    if let Some(path) = &cli.config {
        tracing::info!("Loaded config from {}", path.display());
    }
    tracing::debug!(
        "mode={:?} max_rounds={} directory={}",
        config.execution.mode,
        config.execution.max_rounds,
        config.shell.directory.display()
    );

    // Handled locally, no machines involved
    if let Some(Commands::InitConfig { path }) = &cli.command {
        config.save(path)?;
        println!("{} {}", "Wrote".green(), path.display());
        return Ok(());
    }

    let mut session = Session::new(&config);

    match cli.command {
        Some(Commands::Repl) | None => {
            repl::run(&mut session, &config.shell.history_path())?;
        }
        Some(cmd) => match commands::execute(&mut session, cmd) {
            Ok(output) => println!("{}", output),
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                std::process::exit(1);
            }
        },
    }

    Ok(())
}
