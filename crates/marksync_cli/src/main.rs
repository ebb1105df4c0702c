//! Marksync CLI
//!
//! Command-line tools for the Marksync sync engine.
//!
//! # Commands
//!
//! - `simulate` - Run several devices against an in-process shared log and
//!   check that they converge
//! - `inspect-log` - Dump the records of a client journal
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Marksync sync engine tools.
#[derive(Parser)]
#[command(name = "marksync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate devices editing bookmarks offline and syncing
    Simulate {
        /// Number of devices
        #[arg(short, long, default_value = "3")]
        devices: usize,

        /// Number of random edits across all devices
        #[arg(short, long, default_value = "200")]
        edits: usize,

        /// Random seed (random if omitted)
        #[arg(short, long)]
        seed: Option<u64>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Dump the records of a client journal
    InspectLog {
        /// Path to the journal file
        path: PathBuf,

        /// Maximum number of records to dump
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Simulate {
            devices,
            edits,
            seed,
            format,
        } => {
            let options = commands::simulate::Options {
                devices,
                edits,
                seed: seed.unwrap_or_else(rand::random),
            };
            commands::simulate::run(&options, &format)?;
        }
        Commands::InspectLog {
            path,
            limit,
            format,
        } => {
            commands::inspect_log::run(&path, limit, &format)?;
        }
        Commands::Version => {
            println!("Marksync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "Marksync protocol v{}",
                marksync_protocol::PROTOCOL_VERSION
            );
        }
    }

    Ok(())
}
