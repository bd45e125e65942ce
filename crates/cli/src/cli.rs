use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tally_core::{AppliesTo, MatchType};

/// Import bank CSV exports and keep them categorized
#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Import and categorize bank statements", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the database and give a user the starter categories
    Init {
        #[arg(long)]
        user: i64,
    },

    /// Show what importing a file would do, without writing anything
    Preview {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        year: i32,
        #[arg(long)]
        month: u32,
        /// CSV export to read
        #[arg(short, long)]
        file: PathBuf,
        /// Source profile from the config file
        #[arg(long)]
        source: Option<String>,
    },

    /// Import a file, or a reviewed preview
    Commit {
        #[arg(long)]
        user: i64,
        #[arg(long, required_unless_present = "candidates")]
        year: Option<i32>,
        #[arg(long, required_unless_present = "candidates")]
        month: Option<u32>,
        #[arg(short, long, required_unless_present = "candidates", conflicts_with = "candidates")]
        file: Option<PathBuf>,
        #[arg(long)]
        source: Option<String>,
        /// JSON preview output, possibly edited, to commit instead of a file
        #[arg(long)]
        candidates: Option<PathBuf>,
    },

    /// Manage categorization rules
    Rules {
        #[command(subcommand)]
        action: RulesAction,
    },

    /// Assign a transaction to a category or income source
    Categorize {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        transaction: i64,
        #[arg(long, conflicts_with = "income_source", required_unless_present = "income_source")]
        category: Option<i64>,
        #[arg(long)]
        income_source: Option<i64>,
    },

    /// Delete a transaction and its splits
    Delete {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        transaction: i64,
    },
}

#[derive(Subcommand)]
pub enum RulesAction {
    /// List rules in evaluation order
    List {
        #[arg(long)]
        user: i64,
    },

    /// Add a rule
    Add {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        pattern: String,
        /// exact, contains, or regex
        #[arg(long, default_value = "contains")]
        match_type: MatchType,
        /// expense, income, or both
        #[arg(long, default_value = "expense")]
        applies_to: AppliesTo,
        #[arg(long)]
        category: Option<i64>,
        #[arg(long)]
        income_source: Option<i64>,
    },

    /// Delete a rule
    Delete {
        #[arg(long)]
        user: i64,
        #[arg(long)]
        id: i64,
    },
}
