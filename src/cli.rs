use clap::{Parser, Subcommand, ValueEnum};
use imagefetch_common::ItemId;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "imagefetch")]
#[command(author, version, about = "Catalog image acquisition with provider fallback")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Item selection for `run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum JobArg {
    /// Newly eligible items, bounded by the daily limit
    Daily,
    /// Every auto-fetch item still lacking an image
    Backfill,
}

/// Overrides shared by every batch command.
#[derive(Debug, Clone, clap::Args)]
pub struct BatchArgs {
    /// Worker pool size (overrides batch.concurrency)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Fetch without storing, capped at batch.test_item_limit items
    #[arg(long)]
    pub dry_run: bool,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run an acquisition batch
    Run {
        /// Which items to process
        #[arg(long, value_enum, default_value = "daily")]
        job: JobArg,

        /// Reprocess items that already have an image
        #[arg(long)]
        force: bool,

        /// Maximum items for a daily run (overrides batch.daily_limit)
        #[arg(long)]
        limit: Option<usize>,

        #[command(flatten)]
        batch: BatchArgs,
    },

    /// Retry items whose last outcome was a failure
    RetryFailed {
        #[command(flatten)]
        batch: BatchArgs,
    },

    /// Process specific items by id
    Fetch {
        /// Item ids
        #[arg(required = true)]
        ids: Vec<ItemId>,

        /// Reprocess items that already have an image
        #[arg(long)]
        force: bool,

        #[command(flatten)]
        batch: BatchArgs,
    },

    /// Load items from a JSON file into the catalog
    Import {
        /// JSON array of items
        #[arg(required = true)]
        file: PathBuf,
    },

    /// Show catalog and last-outcome counts
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete audit records older than the retention window
    PruneAudit {
        /// Retention in days (overrides audit.retention_days)
        #[arg(long)]
        days: Option<u32>,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
