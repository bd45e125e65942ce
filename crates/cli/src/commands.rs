use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use std::path::Path;
use tally_core::{
    AppliesTo, Assignment, CategorizationRule, CategoryId, IncomeSourceId, MatchType, RuleId,
    RuleStore, TransactionId, UserId, YearMonth,
};
use tally_import::{CommitInput, ImportPipeline, ImportRequest, PreviewReport, SourceProfile};
use tally_storage::SqliteStore;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn period(year: i32, month: u32) -> Result<YearMonth> {
    YearMonth::new(year, month).ok_or_else(|| anyhow!("Invalid period {year}-{month}"))
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

pub async fn cmd_init(store: &SqliteStore, user: UserId) -> Result<()> {
    tally_storage::seed_default_categories(store.pool(), user)
        .await
        .context("Failed to seed categories")?;
    tracing::info!(user = %user, "Database ready");
    Ok(())
}

pub async fn cmd_preview(
    store: &SqliteStore,
    user: UserId,
    period: YearMonth,
    file: &Path,
    profile: &SourceProfile,
) -> Result<()> {
    let text = read_text(file)?;
    let request = ImportRequest {
        user_id: user,
        period,
        text: &text,
        profile,
    };
    let report = ImportPipeline::new(store).preview(&request).await?;
    print_json(&report)
}

/// Where a commit's rows come from.
pub enum CommitSource<'a> {
    File {
        period: YearMonth,
        path: &'a Path,
        profile: &'a SourceProfile,
    },
    Candidates(&'a Path),
}

pub async fn cmd_commit(store: &SqliteStore, user: UserId, source: CommitSource<'_>) -> Result<()> {
    let pipeline = ImportPipeline::new(store);
    let report = match source {
        CommitSource::File {
            period,
            path,
            profile,
        } => {
            let text = read_text(path)?;
            let request = ImportRequest {
                user_id: user,
                period,
                text: &text,
                profile,
            };
            pipeline.commit(CommitInput::File(request)).await?
        }
        CommitSource::Candidates(path) => {
            let preview: PreviewReport = serde_json::from_str(&read_text(path)?)
                .with_context(|| format!("{} is not a preview report", path.display()))?;
            pipeline
                .commit(CommitInput::Candidates {
                    user_id: user,
                    rows: preview.rows,
                })
                .await?
        }
    };
    print_json(&report)
}

pub async fn cmd_rules_list(store: &SqliteStore, user: UserId) -> Result<()> {
    let rules = store.list_rules(user).await?;
    print_json(&rules)
}

pub fn build_rule(
    user: UserId,
    pattern: &str,
    match_type: MatchType,
    applies_to: AppliesTo,
    category: Option<i64>,
    income_source: Option<i64>,
) -> CategorizationRule {
    let mut rule = CategorizationRule::new(user, pattern, match_type, applies_to);
    rule.category_id = category.map(CategoryId);
    rule.income_source_id = income_source.map(IncomeSourceId);
    rule
}

pub async fn cmd_rules_add(store: &SqliteStore, rule: CategorizationRule) -> Result<()> {
    let stored = store.create_rule(&rule).await?;
    print_json(&stored)
}

pub async fn cmd_rules_delete(store: &SqliteStore, user: UserId, id: RuleId) -> Result<()> {
    if !store.delete_rule(user, id).await? {
        bail!("Rule {id} not found");
    }
    println!("Deleted rule {id}");
    Ok(())
}

pub async fn cmd_categorize(
    store: &SqliteStore,
    user: UserId,
    id: TransactionId,
    assignment: Assignment,
) -> Result<()> {
    let recorded = tally_import::recategorize_transaction(store, user, id, Some(assignment)).await?;
    print_json(&recorded)
}

pub async fn cmd_delete(store: &SqliteStore, user: UserId, id: TransactionId) -> Result<()> {
    tally_import::delete_transaction(store, user, id).await?;
    println!("Deleted transaction {id}");
    Ok(())
}
