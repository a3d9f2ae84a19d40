//! CLI command definitions and handlers

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod args;
pub mod cache;
pub mod context;
pub mod entity;
pub mod search;
pub mod signal;
pub mod status;
pub mod sweep;

pub use args::{GlobalOptions, KindArg, OutputFormat, PageArgs};
pub use context::CommandContext;

use crate::cache::SearchSort;

/// podmirror - local TTL mirror of a podcast catalog
#[derive(Parser, Debug)]
#[command(name = "podmirror")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (pretty, table, json)
    #[arg(
        long,
        global = true,
        env = "PODMIRROR_FORMAT",
        default_value = "pretty",
        hide_env = true,
        hide_possible_values = true
    )]
    pub format: OutputFormat,

    /// Override config file location
    #[arg(long, global = true, env = "PODMIRROR_CONFIG", hide_env = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the mirror database
    #[arg(long, global = true, env = "PODMIRROR_DATA_DIR", hide_env = true)]
    pub data_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show mirror statistics and configuration
    Status,

    /// Look up a show or episode, refreshing it from upstream when expired
    Resolve {
        /// External id of the show or episode
        external_id: String,

        /// Entity kind, selects the TTL applied on fetch
        #[arg(long, value_enum, default_value = "show")]
        kind: KindArg,
    },

    /// Search the catalog through the query result cache
    Search {
        /// Search text
        query: String,

        /// Restrict to a genre id
        #[arg(long)]
        genre: Option<u32>,

        /// Result ordering
        #[arg(long, value_enum, default_value = "relevance")]
        sort: SearchSort,

        #[command(flatten)]
        page: PageArgs,
    },

    /// Ask for an entity to be refreshed by the next sweep
    Record {
        /// External id of the show or episode
        external_id: String,
    },

    /// Process pending refresh requests once
    Sweep,

    /// Run maintenance cycles (expiry, priority refresh, refresh-log sweep)
    Maintain {
        /// Repeat every N seconds until interrupted; runs once if omitted
        #[arg(long, value_name = "SECS")]
        every: Option<u64>,
    },

    /// Inspect or move the invalidation signal
    #[command(subcommand)]
    Signal(SignalCommands),

    /// Manage the query result cache
    #[command(subcommand)]
    Cache(CacheCommands),
}

/// Invalidation signal subcommands
#[derive(Subcommand, Debug)]
pub enum SignalCommands {
    /// Show the current token
    Show,
    /// Advance the token, forcing every derived view to recompute
    Bump,
}

/// Query cache subcommands
#[derive(Subcommand, Debug)]
pub enum CacheCommands {
    /// Remove every cached query result
    Clear,
    /// Remove expired query results only
    Purge,
    /// Print the mirror database path
    Path,
}
