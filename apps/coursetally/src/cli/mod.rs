//! # coursetally CLI Module
//!
//! This module implements the CLI interface for coursetally.
//!
//! ## Available Commands
//!
//! - `server` - Start the HTTP server
//! - `status` - Show engine status
//! - `ingest` - Replay rating submissions from a file
//! - `init` - Initialize a new database

mod commands;

use clap::{Parser, Subcommand};
use coursetally_core::TallyError;
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// coursetally - Course Rating Server
///
/// Aggregates per-user course ratings into per-class histograms,
/// keeping counters and rating facts transactionally in lockstep.
#[derive(Parser, Debug)]
#[command(name = "coursetally")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the rating database
    #[arg(short = 'D', long, global = true, default_value = "coursetally.redb")]
    pub database: PathBuf,

    /// Storage backend: "redb" (ACID database) or "memory" (volatile)
    #[arg(short = 'B', long, global = true, default_value = "redb")]
    pub backend: String,

    /// Path to the class roster JSON file
    #[arg(short = 'R', long, global = true, default_value = "roster.json")]
    pub roster: PathBuf,

    /// Optional TOML config file (metrics, ceilings, cache TTLs)
    #[arg(short = 'C', long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Server {
        /// Host to bind to
        #[arg(short = 'H', long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },

    /// Show engine status
    Status,

    /// Replay rating submissions from a JSON file
    Ingest {
        /// Path to the input file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Initialize a new empty database
    Init {
        /// Force initialization even if database exists
        #[arg(short, long)]
        force: bool,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), TallyError> {
    let backend = cli.backend.as_str();
    let json_mode = cli.json_mode;
    let setup = EngineSetup {
        database: &cli.database,
        backend,
        roster: &cli.roster,
        config: cli.config.as_deref(),
    };

    match cli.command {
        Some(Commands::Server { host, port }) => cmd_server(&setup, &host, port).await,
        Some(Commands::Status) => cmd_status(&setup, json_mode),
        Some(Commands::Ingest { file }) => cmd_ingest(&setup, json_mode, &file),
        Some(Commands::Init { force }) => cmd_init(&setup, force),
        None => {
            // No subcommand - show status by default
            cmd_status(&setup, json_mode)
        }
    }
}
