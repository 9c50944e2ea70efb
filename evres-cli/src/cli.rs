use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

#[derive(Parser, Debug)]
#[command(
    name = "evres",
    version,
    about = "Resolve live event listings into playable stream URLs",
    long_about = None
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true, env = "EVRES_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Discover events, resolve the new ones and update the cache
    Run {
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Pretty)]
        output: OutputFormat,

        /// Write the report to a file instead of stdout
        #[arg(short = 'f', long)]
        output_file: Option<PathBuf>,

        /// Override the configured concurrency ceiling
        #[arg(short = 'j', long)]
        max_concurrent: Option<usize>,

        /// Override the cache file path
        #[arg(long)]
        cache: Option<PathBuf>,

        /// Read candidates from a JSON file instead of the configured listing
        #[arg(long)]
        listing_json: Option<PathBuf>,
    },

    /// Resolve a single event page
    Resolve {
        /// Event page URL
        url: String,

        #[arg(short, long, value_enum, default_value_t = OutputFormat::Pretty)]
        output: OutputFormat,

        /// Request timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },

    /// Inspect or maintain the cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Show or reset the configuration file
    Config {
        #[arg(long)]
        show: bool,

        #[arg(long)]
        reset: bool,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum CacheAction {
    /// List fresh records
    Show {
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Pretty)]
        output: OutputFormat,
    },
    /// Remove expired records from disk
    Prune,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable colored output
    Pretty,
    /// Pretty-printed JSON
    Json,
    /// Single-line JSON
    JsonCompact,
    /// Table
    Table,
}

impl OutputFormat {
    pub fn is_json(&self) -> bool {
        matches!(self, OutputFormat::Json | OutputFormat::JsonCompact)
    }
}

impl Commands {
    /// Output format selected by the command, if it has one.
    pub fn output_format(&self) -> Option<OutputFormat> {
        match self {
            Commands::Run { output, .. } | Commands::Resolve { output, .. } => Some(*output),
            Commands::Cache {
                action: CacheAction::Show { output },
            } => Some(*output),
            _ => None,
        }
    }
}
