//! Two-phase import: `preview` categorizes a statement without writing
//! anything, `commit` persists the (possibly edited) result.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tally_core::{
    is_sentinel_name, AccountInfo, Assignment, CategoryId, ExpenseCategory, IncomeSourceId,
    InsertOutcome, LedgerStore, Money, StoreError, Transaction, TransactionId, TransactionType,
    UserId, YearMonth,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::advisor::{advise, CategoryAdvisor, Suggestion, SuggestionRequest};
use crate::classifier::{CategoryProposal, HeuristicClassifier};
use crate::csv::{in_period, CsvError, NormalizedRow, ParsedStatement, SourceProfile};
use crate::fingerprint::fingerprint;
use crate::learner::learn_rule;
use crate::rules::RuleMatcher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportState {
    Uploaded,
    Parsed,
    DedupChecked,
    Categorized,
    Previewed,
    Committed,
}

/// Where a candidate's assignment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentSource {
    Rule,
    BankCategory,
    Heuristic,
}

#[derive(Error, Debug)]
pub enum ImportError {
    #[error("CSV error: {0}")]
    Csv(#[from] CsvError),
    #[error("No valid rows dated in {year}-{month:02}")]
    NoRowsInPeriod { year: i32, month: u32 },
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

/// One statement to import for one user and month.
#[derive(Debug, Clone, Copy)]
pub struct ImportRequest<'a> {
    pub user_id: UserId,
    pub period: YearMonth,
    pub text: &'a str,
    pub profile: &'a SourceProfile,
}

/// A row as shown in preview and accepted back by commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateRow {
    #[serde(default)]
    pub row_index: usize,
    pub date: NaiveDate,
    pub amount: Money,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub description: String,
    pub merchant: Option<String>,
    pub category_id: Option<CategoryId>,
    pub income_source_id: Option<IncomeSourceId>,
    /// A category to create on commit when no existing one fits.
    pub suggested_category: Option<String>,
    pub raw_category: Option<String>,
    #[serde(default)]
    pub account: AccountInfo,
    #[serde(default)]
    pub is_duplicate: bool,
    #[serde(default)]
    pub fingerprint: String,
    /// Pattern of the rule that produced the assignment.
    pub rule_used: Option<String>,
    pub source: Option<AssignmentSource>,
    /// Non-authoritative advisor output; never applied automatically.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advisory: Option<Suggestion>,
}

impl CandidateRow {
    fn from_row(row: NormalizedRow) -> Self {
        CandidateRow {
            row_index: row.row_index,
            date: row.date,
            amount: row.amount,
            transaction_type: row.transaction_type,
            description: row.description,
            merchant: row.merchant,
            category_id: None,
            income_source_id: None,
            suggested_category: None,
            raw_category: row.raw_category,
            account: row.account,
            is_duplicate: false,
            fingerprint: row.fingerprint,
            rule_used: None,
            source: None,
            advisory: None,
        }
    }

    pub fn match_text(&self) -> &str {
        self.merchant.as_deref().unwrap_or(&self.description)
    }

    fn is_unresolved(&self) -> bool {
        self.category_id.is_none() && self.income_source_id.is_none() && self.suggested_category.is_none()
    }

    fn assign(&mut self, assignment: Assignment, source: AssignmentSource) {
        match assignment {
            Assignment::Category(id) => self.category_id = Some(id),
            Assignment::IncomeSource(id) => self.income_source_id = Some(id),
        }
        self.source = Some(source);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewReport {
    pub state: ImportState,
    pub rows: Vec<CandidateRow>,
    pub duplicate_count: usize,
    /// Rows skipped because their date or amount could not be parsed.
    pub dropped_rows: usize,
}

#[derive(Debug)]
pub enum CommitInput<'a> {
    File(ImportRequest<'a>),
    Candidates {
        user_id: UserId,
        rows: Vec<CandidateRow>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowFailure {
    pub row_index: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitReport {
    pub imported_count: usize,
    pub skipped_duplicate_count: usize,
    pub total_candidates: usize,
    pub errors: Vec<RowFailure>,
}

enum RowOutcome {
    Imported(TransactionId),
    Duplicate,
}

pub struct ImportPipeline<'a, S: LedgerStore + ?Sized> {
    store: &'a S,
    advisor: Option<&'a dyn CategoryAdvisor>,
}

impl<'a, S: LedgerStore + ?Sized> ImportPipeline<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store, advisor: None }
    }

    /// Lets preview annotate unresolved expense rows with advisor suggestions.
    pub fn with_advisor(mut self, advisor: &'a dyn CategoryAdvisor) -> Self {
        self.advisor = Some(advisor);
        self
    }

    pub async fn preview(&self, request: &ImportRequest<'_>) -> Result<PreviewReport, ImportError> {
        let (mut rows, dropped_rows) = self.candidates(request).await?;
        self.annotate(request.user_id, &mut rows).await?;

        let duplicate_count = rows.iter().filter(|r| r.is_duplicate).count();
        debug!(state = ?ImportState::Previewed, rows = rows.len(), duplicate_count, "Preview ready");
        Ok(PreviewReport {
            state: ImportState::Previewed,
            rows,
            duplicate_count,
            dropped_rows,
        })
    }

    pub async fn commit(&self, input: CommitInput<'_>) -> Result<CommitReport, ImportError> {
        let (user_id, rows) = match input {
            CommitInput::File(request) => (request.user_id, self.candidates(&request).await?.0),
            CommitInput::Candidates { user_id, rows } => (user_id, rows),
        };

        let matcher = RuleMatcher::new(self.store.list_rules(user_id).await?);
        let mut categories = self.store.list_categories(user_id).await?;
        let mut report = CommitReport {
            total_candidates: rows.len(),
            ..CommitReport::default()
        };

        for row in rows {
            let row_index = row.row_index;
            match self.commit_row(user_id, row, &matcher, &mut categories).await {
                Ok(RowOutcome::Imported(id)) => {
                    debug!(row = row_index, transaction_id = %id, "Imported row");
                    report.imported_count += 1;
                }
                Ok(RowOutcome::Duplicate) => report.skipped_duplicate_count += 1,
                Err(e) => {
                    warn!(row = row_index, error = %e, "Failed to import row");
                    report.errors.push(RowFailure {
                        row_index,
                        message: e.to_string(),
                    });
                }
            }
        }

        info!(
            state = ?ImportState::Committed,
            user_id = %user_id,
            imported = report.imported_count,
            skipped_duplicates = report.skipped_duplicate_count,
            errors = report.errors.len(),
            "Import committed"
        );
        Ok(report)
    }

    // ── Shared preview/commit stages ─────────────────────────────────────────

    async fn candidates(&self, request: &ImportRequest<'_>) -> Result<(Vec<CandidateRow>, usize), ImportError> {
        let user_id = request.user_id;
        debug!(state = ?ImportState::Uploaded, user_id = %user_id, source = %request.profile.name, bytes = request.text.len(), "Import started");

        let statement = ParsedStatement::parse(request.text, request.profile, user_id)?;
        let mut parsed = statement.rows();
        let in_month: Vec<NormalizedRow> = in_period(parsed.by_ref(), request.period).collect();
        let dropped = parsed.dropped();
        debug!(state = ?ImportState::Parsed, rows = in_month.len(), dropped, period = %request.period, "Statement parsed");

        if in_month.is_empty() {
            return Err(ImportError::NoRowsInPeriod {
                year: request.period.year(),
                month: request.period.month(),
            });
        }

        let mut rows = Vec::with_capacity(in_month.len());
        let mut seen = HashSet::new();
        for row in in_month {
            let mut candidate = CandidateRow::from_row(row);
            candidate.is_duplicate = !seen.insert(candidate.fingerprint.clone())
                || self
                    .store
                    .fingerprint_exists(user_id, &candidate.fingerprint)
                    .await?;
            rows.push(candidate);
        }
        debug!(state = ?ImportState::DedupChecked, duplicates = rows.iter().filter(|r| r.is_duplicate).count(), "Dedup checked");

        let matcher = RuleMatcher::new(self.store.list_rules(user_id).await?);
        let categories = self.store.list_categories(user_id).await?;
        let classifier = HeuristicClassifier::new(&categories);
        for row in rows.iter_mut() {
            categorize(&matcher, &classifier, row);
        }
        debug!(state = ?ImportState::Categorized, rules = matcher.len(), "Rows categorized");

        Ok((rows, dropped))
    }

    async fn annotate(&self, user_id: UserId, rows: &mut [CandidateRow]) -> Result<(), ImportError> {
        if self.advisor.is_none() {
            return Ok(());
        }
        let known_categories: Vec<String> = self
            .store
            .list_categories(user_id)
            .await?
            .into_iter()
            .filter(|c| !c.is_sentinel())
            .map(|c| c.name)
            .collect();

        for row in rows
            .iter_mut()
            .filter(|r| r.transaction_type == TransactionType::Expense && r.is_unresolved())
        {
            let request = SuggestionRequest {
                merchant: row.merchant.clone(),
                description: row.description.clone(),
                amount: row.amount,
                known_categories: known_categories.clone(),
            };
            match advise(self.advisor, &request).await {
                Ok(suggestion) => row.advisory = Some(suggestion),
                Err(e) => warn!(row = row.row_index, error = %e, "Advisor suggestion ignored"),
            }
        }
        Ok(())
    }

    // ── Commit ───────────────────────────────────────────────────────────────

    async fn commit_row(
        &self,
        user_id: UserId,
        row: CandidateRow,
        matcher: &RuleMatcher,
        categories: &mut Vec<ExpenseCategory>,
    ) -> Result<RowOutcome, ImportError> {
        // Edited rows may no longer match the fingerprint they were previewed with.
        let fingerprint = fingerprint(
            user_id,
            row.date,
            row.amount,
            row.match_text(),
            row.account.account_number.as_deref(),
        );
        if self.store.fingerprint_exists(user_id, &fingerprint).await? {
            return Ok(RowOutcome::Duplicate);
        }

        let assignment = self.final_assignment(user_id, &row, categories).await?;
        let mut transaction = Transaction {
            id: None,
            user_id,
            date: row.date,
            amount: row.amount.abs(),
            transaction_type: row.transaction_type,
            description: row.description,
            merchant: row.merchant,
            category_id: None,
            income_source_id: None,
            fingerprint: Some(fingerprint),
            raw_category: row.raw_category,
            account: row.account,
        };
        transaction.set_assignment(assignment);

        let id = match self.store.insert_transaction(&transaction).await? {
            InsertOutcome::Inserted(id) => id,
            InsertOutcome::Duplicate => {
                debug!(row = row.row_index, "Lost insert race; treating as duplicate");
                return Ok(RowOutcome::Duplicate);
            }
        };

        if let Some(assignment) = assignment {
            // A rule that already yields this assignment needs no reinforcement.
            let covered = matcher
                .match_rule(transaction.match_text(), transaction.transaction_type)
                .is_some_and(|m| m.assignment == assignment);
            if !covered {
                if let Err(e) =
                    learn_rule(self.store, user_id, transaction.merchant.as_deref(), assignment).await
                {
                    warn!(transaction_id = %id, error = %e, "Rule learning failed");
                }
            }
        }

        Ok(RowOutcome::Imported(id))
    }

    /// The assignment to persist. Sentinel categories are stored as unassigned;
    /// a suggested category name is resolved or created here.
    async fn final_assignment(
        &self,
        user_id: UserId,
        row: &CandidateRow,
        categories: &mut Vec<ExpenseCategory>,
    ) -> Result<Option<Assignment>, ImportError> {
        match row.transaction_type {
            TransactionType::Expense => {
                if let Some(id) = row.category_id {
                    let category = match categories.iter().find(|c| c.id == Some(id)) {
                        Some(c) => c.clone(),
                        None => self
                            .store
                            .get_category(user_id, id)
                            .await?
                            .ok_or_else(|| StoreError::NotFound(format!("category {id}")))?,
                    };
                    return Ok((!category.is_sentinel()).then_some(Assignment::Category(id)));
                }
                match row.suggested_category.as_deref().map(str::trim) {
                    Some(name) if !name.is_empty() && !is_sentinel_name(name) => {
                        let id = self.get_or_create_category(user_id, name, categories).await?;
                        Ok(Some(Assignment::Category(id)))
                    }
                    _ => Ok(None),
                }
            }
            TransactionType::Income => match row.income_source_id {
                Some(id) => {
                    let source = self
                        .store
                        .get_income_source(user_id, id)
                        .await?
                        .ok_or_else(|| StoreError::NotFound(format!("income source {id}")))?;
                    Ok((!source.is_sentinel()).then_some(Assignment::IncomeSource(id)))
                }
                None => Ok(None),
            },
        }
    }

    async fn get_or_create_category(
        &self,
        user_id: UserId,
        name: &str,
        categories: &mut Vec<ExpenseCategory>,
    ) -> Result<CategoryId, ImportError> {
        let existing = match HeuristicClassifier::new(categories).find_equivalent(name, &[]) {
            Some(CategoryProposal::Existing { id, .. }) => Some(id),
            _ => None,
        };
        if let Some(id) = existing {
            return Ok(id);
        }

        let created = self.store.create_category(user_id, name).await?;
        let id = created
            .id
            .ok_or_else(|| StoreError::Backend("created category has no id".to_string()))?;
        info!(user_id = %user_id, category = %created.name, "Created category from import suggestion");
        categories.push(created);
        Ok(id)
    }
}

/// Rule first, then the bank's own category label, then keyword heuristics.
/// Income rows are only ever assigned by rules.
fn categorize(matcher: &RuleMatcher, classifier: &HeuristicClassifier<'_>, row: &mut CandidateRow) {
    if let Some(m) = matcher.match_rule(row.match_text(), row.transaction_type) {
        row.rule_used = Some(m.rule.pattern.clone());
        row.assign(m.assignment, AssignmentSource::Rule);
        return;
    }
    if row.transaction_type != TransactionType::Expense {
        return;
    }

    let hint = row
        .raw_category
        .as_deref()
        .and_then(|raw| classifier.resolve_hint(raw));
    if let Some(CategoryProposal::Existing { id, .. }) = hint {
        row.assign(Assignment::Category(id), AssignmentSource::BankCategory);
        return;
    }

    if let Some(c) = classifier.classify(row.merchant.as_deref(), &row.description, row.amount) {
        match c.proposal {
            CategoryProposal::Existing { id, .. } => {
                row.assign(Assignment::Category(id), AssignmentSource::Heuristic)
            }
            CategoryProposal::New { name } => {
                row.suggested_category = Some(name);
                row.source = Some(AssignmentSource::Heuristic);
            }
        }
    }
}
