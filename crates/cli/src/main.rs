//! `tally`: import bank CSV exports into a categorized ledger.
//!
//! Usage:
//!   tally init --user 1
//!   tally preview --user 1 --year 2024 --month 1 --file jan.csv
//!   tally commit  --user 1 --year 2024 --month 1 --file jan.csv
//!   tally rules list --user 1

mod cli;
mod commands;
mod config;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tally_core::{Assignment, CategoryId, IncomeSourceId, RuleId, TransactionId, UserId};
use tally_storage::SqliteStore;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Commands, RulesAction};
use commands::CommitSource;
use config::{Settings, DATABASE_ENV};

async fn open_store(settings: &Settings) -> Result<SqliteStore> {
    let path = settings.database_path(std::env::var_os(DATABASE_ENV).map(PathBuf::from))?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let pool = tally_storage::create_db(&path)
        .await
        .with_context(|| format!("Failed to open database {}", path.display()))?;
    Ok(SqliteStore::new(pool))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr).compact())
        .init();

    let settings = Settings::load(cli.config.as_deref())?;
    let store = open_store(&settings).await?;

    match cli.command {
        Commands::Init { user } => commands::cmd_init(&store, UserId(user)).await,
        Commands::Preview {
            user,
            year,
            month,
            file,
            source,
        } => {
            let profile = settings.profile(source.as_deref())?;
            let period = commands::period(year, month)?;
            commands::cmd_preview(&store, UserId(user), period, &file, &profile).await
        }
        Commands::Commit {
            user,
            year,
            month,
            file,
            source,
            candidates,
        } => {
            let profile = settings.profile(source.as_deref())?;
            let source = match (candidates.as_deref(), file.as_deref(), year, month) {
                (Some(path), _, _, _) => CommitSource::Candidates(path),
                (None, Some(path), Some(year), Some(month)) => CommitSource::File {
                    period: commands::period(year, month)?,
                    path,
                    profile: &profile,
                },
                _ => return Err(anyhow!("commit needs --file, --year and --month, or --candidates")),
            };
            commands::cmd_commit(&store, UserId(user), source).await
        }
        Commands::Rules { action } => match action {
            RulesAction::List { user } => commands::cmd_rules_list(&store, UserId(user)).await,
            RulesAction::Add {
                user,
                pattern,
                match_type,
                applies_to,
                category,
                income_source,
            } => {
                let rule = commands::build_rule(
                    UserId(user),
                    &pattern,
                    match_type,
                    applies_to,
                    category,
                    income_source,
                );
                commands::cmd_rules_add(&store, rule).await
            }
            RulesAction::Delete { user, id } => {
                commands::cmd_rules_delete(&store, UserId(user), RuleId(id)).await
            }
        },
        Commands::Categorize {
            user,
            transaction,
            category,
            income_source,
        } => {
            let assignment = match (category, income_source) {
                (Some(id), _) => Assignment::Category(CategoryId(id)),
                (None, Some(id)) => Assignment::IncomeSource(IncomeSourceId(id)),
                (None, None) => return Err(anyhow!("pass --category or --income-source")),
            };
            commands::cmd_categorize(&store, UserId(user), TransactionId(transaction), assignment)
                .await
        }
        Commands::Delete { user, transaction } => {
            commands::cmd_delete(&store, UserId(user), TransactionId(transaction)).await
        }
    }
}
