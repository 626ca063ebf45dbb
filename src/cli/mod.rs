//! CLI module
//!
//! Command-line interface over a tenant configuration.
//!
//! # Commands
//!
//! - `check` - Test every source connection
//! - `discover` - Discover the streams of every source
//! - `reconcile` - Build the unified schema report
//! - `validate` - Validate (and optionally store) records for an entity
//! - `serve` - Start HTTP server mode

mod commands;
mod runner;
mod server;

pub use commands::{Cli, Commands, OutputFormat};
pub use runner::Runner;
pub use server::{router, serve, AppState};
