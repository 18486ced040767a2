//! Vigil CLI - operator tooling for the tamper-evident audit log.
//!
//! Every command reads the on-disk stores without taking the writer lock, so
//! it is safe to run against a live deployment.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

mod commands;
mod theme;

use commands::{config, export, keys, verify};

/// Vigil - tamper-evident audit log
#[derive(Parser)]
#[command(name = "vigil")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "VIGIL_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage signing keys
    Keys {
        #[command(subcommand)]
        command: KeyCommands,
    },

    /// Verify the stored chain across hot and cold storage
    Verify {
        /// First sequence to verify (default: oldest stored)
        #[arg(long)]
        from: Option<u64>,

        /// Last sequence to verify (default: newest stored)
        #[arg(long)]
        to: Option<u64>,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Verify the daily journal files in a directory
    VerifyJournal {
        /// Journal directory (default: configured journal directory)
        dir: Option<PathBuf>,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Export entries with a checksum
    Export {
        /// Output format: jsonl, json or csv
        #[arg(short, long, default_value = "jsonl")]
        format: String,

        /// Output file (default: stdout)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// First sequence, inclusive
        #[arg(long)]
        from: Option<u64>,

        /// Last sequence, inclusive
        #[arg(long)]
        to: Option<u64>,

        /// Earliest timestamp (RFC 3339), inclusive
        #[arg(long)]
        since: Option<String>,

        /// Latest timestamp (RFC 3339), exclusive
        #[arg(long)]
        until: Option<String>,

        /// Minimum level: info, warning, error, critical or security
        #[arg(long)]
        min_level: Option<String>,

        /// Category to include (repeatable)
        #[arg(long)]
        category: Vec<String>,

        /// Exact actor
        #[arg(long)]
        actor: Option<String>,
    },

    /// View configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum KeyCommands {
    /// Generate a new signing key file
    Generate {
        /// Where to write the key (default: configured key path)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
    /// Show the configured signing key and trusted keys
    Show {
        /// Read the key from this file instead of the configuration
        #[arg(short, long)]
        path: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the merged configuration (secrets are never printed)
    Show {
        /// Output format: toml or json
        #[arg(short, long, default_value = "toml")]
        format: String,
    },
    /// Show resolved storage paths
    Paths,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let cfg = vigil_config::Config::load(cli.config.as_deref()).context("failed to load configuration")?;

    let mut log_config = vigil_telemetry::LogConfig::from_section(&cfg.logging)?;
    if cli.verbose {
        "debug".clone_into(&mut log_config.level);
    }
    if let Err(e) = vigil_telemetry::setup_logging(&log_config) {
        eprintln!("Failed to initialize logging: {e}");
    }

    match cli.command {
        Commands::Keys { command } => match command {
            KeyCommands::Generate { out, force } => keys::generate_key(&cfg, out, force)?,
            KeyCommands::Show { path } => keys::show_key(&cfg, path.as_deref())?,
        },
        Commands::Verify { from, to, json } => {
            verify::verify_stores(&cfg, from, to, json).await?;
        },
        Commands::VerifyJournal { dir, json } => {
            let dir = dir.unwrap_or_else(|| cfg.paths().journal_dir);
            verify::verify_journal(&cfg, &dir, json)?;
        },
        Commands::Export {
            format,
            out,
            from,
            to,
            since,
            until,
            min_level,
            category,
            actor,
        } => {
            let filter = export::build_filter(export::FilterArgs {
                from,
                to,
                since,
                until,
                min_level,
                categories: category,
                actor,
            })?;
            export::run_export(&cfg, &filter, &format, out.as_deref()).await?;
        },
        Commands::Config { command } => match command {
            ConfigCommands::Show { format } => config::show_config(&cfg, &format)?,
            ConfigCommands::Paths => config::show_paths(&cfg),
        },
    }

    Ok(())
}
