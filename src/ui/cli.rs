use clap::{Parser, Subcommand};

/// tierdex - Privacy-tiered local file index
#[derive(Parser, Debug)]
#[command(name = "tierdex")]
#[command(about = "Index local files into privacy-tiered partitions and retrieve context from them", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Custom base directory (default: ~/.tierdex)
    #[arg(long, global = true)]
    pub base_dir: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the data directories and a default config.yaml
    Init,
    /// Index all watched directories
    Index {
        /// Re-read every file, ignoring recorded fingerprints
        #[arg(short, long)]
        force: bool,
    },
    /// Watch the configured directories and re-index files as they change
    Watch,
    /// Search indexed documents
    Search {
        query: String,
        /// Context hint deciding which tiers are readable
        #[arg(short, long, default_value = "")]
        context: String,
        /// Explicit comma-separated tiers, overriding the hint (e.g. "private,work")
        #[arg(short, long)]
        tiers: Option<String>,
        /// Maximum number of results to print
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Print the formatted context block for a query
    Context {
        query: String,
        /// Context hint deciding which tiers are readable
        #[arg(short, long, default_value = "")]
        context: String,
    },
    /// Show document counts per privacy tier
    Stats,
    /// List files with a recorded fingerprint
    Files,
    /// Remove indexed files that the exclusion rules now reject
    Purge,
    /// Delete every partition and fingerprint
    Reset {
        /// Confirm the reset
        #[arg(long)]
        yes: bool,
    },
}
