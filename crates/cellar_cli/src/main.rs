//! CellarDB CLI
//!
//! Maintenance tools for CellarDB data files.
//!
//! # Commands
//!
//! - `inspect` - Display version, space usage and per-type counts
//! - `verify` - Read back every page and check the indexes
//! - `compact` - Rewrite the file without dead pages
//! - `dump` - List the frames in the file

mod commands;

use clap::{Parser, Subcommand};
use commands::Format;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// CellarDB command-line database tools.
#[derive(Parser)]
#[command(name = "cellar")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the database file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display database statistics and metadata
    Inspect {
        /// Print the stored schema as well
        #[arg(short, long)]
        schema: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value_t = Format::Text)]
        format: Format,
    },

    /// Verify database integrity
    Verify {
        /// Output format (text, json)
        #[arg(short, long, default_value_t = Format::Text)]
        format: Format,
    },

    /// Compact the file to reclaim space
    Compact {
        /// Dry run - show what would be done
        #[arg(short, long)]
        dry_run: bool,
    },

    /// List the frames in the data file
    Dump {
        /// Maximum number of frames to list
        #[arg(short, long)]
        limit: Option<usize>,

        /// Skip this many frames first
        #[arg(short, long, default_value = "0")]
        skip: usize,

        /// Only list frames of the current version
        #[arg(long)]
        live: bool,

        /// Output format (text, json)
        #[arg(short, long, default_value_t = Format::Text)]
        format: Format,
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
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Inspect { schema, format } => {
            let path = cli.path.ok_or("Database path required for inspect")?;
            commands::inspect::run(&path, schema, format)?;
        }
        Commands::Verify { format } => {
            let path = cli.path.ok_or("Database path required for verify")?;
            commands::verify::run(&path, format)?;
        }
        Commands::Compact { dry_run } => {
            let path = cli.path.ok_or("Database path required for compact")?;
            commands::compact::run(&path, dry_run)?;
        }
        Commands::Dump {
            limit,
            skip,
            live,
            format,
        } => {
            let path = cli.path.ok_or("Database path required for dump")?;
            commands::dump::run(&path, skip, limit, live, format)?;
        }
        Commands::Version => {
            println!("CellarDB CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
