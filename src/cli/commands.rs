//! CLI commands and argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Source integration and schema reconciliation CLI
#[derive(Parser, Debug)]
#[command(name = "source-unify")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Tenant configuration file (YAML)
    #[arg(short, long, global = true)]
    pub tenant: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, default_value = "json")]
    pub format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Test every source connection
    Check,

    /// Discover the streams of every source
    Discover {
        /// Overall timeout in seconds (defaults to the tenant setting)
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Discover and reconcile into a unified schema
    Reconcile {
        /// Overall timeout in seconds (defaults to the tenant setting)
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Validate records against a unified entity
    Validate {
        /// Unified entity name
        #[arg(short, long)]
        entity: String,

        /// Records file, one JSON document per line
        #[arg(short, long)]
        input: PathBuf,

        /// Store valid records
        #[arg(long)]
        ingest: bool,
    },

    /// Start HTTP server mode
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
}

/// Output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// JSON output (one document per line)
    Json,
    /// Indented JSON
    Pretty,
}
