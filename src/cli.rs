use clap::{Parser, Subcommand};

/// Tracks product prices and reports meaningful drops.
#[derive(Debug, Parser)]
#[command(name = "price-drop-watcher", version, about)]
pub struct Cli {
    /// Extra configuration file layered over config/default.toml
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start tracking a product URL
    Add {
        url: String,
        #[arg(short, long)]
        name: Option<String>,
        /// Drop trigger such as "10%" or "5.00"
        #[arg(short, long)]
        threshold: Option<String>,
        /// previous, initial or rolling:<n>
        #[arg(short, long)]
        baseline: Option<String>,
        /// Skip the initial price check
        #[arg(long)]
        no_check: bool,
    },
    /// Stop tracking a product, by id or URL
    Remove {
        product: String,
        /// Keep recorded observations
        #[arg(long)]
        keep_history: bool,
    },
    /// List tracked products
    List,
    /// Show a product's observations and price summary
    History {
        product: String,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Change when a product's price drop is reported
    SetThreshold {
        product: String,
        #[arg(short, long)]
        threshold: String,
        #[arg(short, long)]
        baseline: Option<String>,
    },
    /// Check a single URL, tracked or not
    Check { url: String },
    /// Check every tracked product
    CheckAll {
        /// Send drops and summaries to the configured notifier
        #[arg(long)]
        notify: bool,
    },
}
