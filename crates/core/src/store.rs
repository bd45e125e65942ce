//! Persistence seams for the import pipeline.
//!
//! Implementations must enforce per-user fingerprint uniqueness themselves and
//! report a violating insert as [`InsertOutcome::Duplicate`]; the pipeline's own
//! pre-check is only a fast path.

use async_trait::async_trait;
use thiserror::Error;

use crate::category::{ExpenseCategory, IncomeSource};
use crate::id::{CategoryId, IncomeSourceId, RuleId, TransactionId, UserId};
use crate::rule::{validate_rule, Assignment, CategorizationRule, MatchType, RuleError, TargetNames};
use crate::transaction::{LedgerError, Transaction, TransactionSplit};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Rule rejected: {0}")]
    Rule(#[from] RuleError),
    #[error("Invalid splits: {0}")]
    Ledger(#[from] LedgerError),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Storage error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted(TransactionId),
    /// Another row with the same (user, fingerprint) already exists.
    Duplicate,
}

#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn fingerprint_exists(&self, user_id: UserId, fingerprint: &str) -> Result<bool, StoreError>;
    async fn insert_transaction(&self, transaction: &Transaction) -> Result<InsertOutcome, StoreError>;
    async fn get_transaction(
        &self,
        user_id: UserId,
        id: TransactionId,
    ) -> Result<Option<Transaction>, StoreError>;
    async fn set_assignment(
        &self,
        user_id: UserId,
        id: TransactionId,
        assignment: Option<Assignment>,
    ) -> Result<(), StoreError>;
    /// Returns `false` when no such transaction exists for the user.
    async fn delete_transaction(&self, user_id: UserId, id: TransactionId) -> Result<bool, StoreError>;
    async fn list_splits(&self, user_id: UserId, id: TransactionId) -> Result<Vec<TransactionSplit>, StoreError>;
    /// Swaps the whole split set of a transaction; all-or-nothing.
    async fn replace_splits(
        &self,
        user_id: UserId,
        id: TransactionId,
        splits: &[TransactionSplit],
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait CategoryStore: Send + Sync {
    async fn list_categories(&self, user_id: UserId) -> Result<Vec<ExpenseCategory>, StoreError>;
    async fn list_income_sources(&self, user_id: UserId) -> Result<Vec<IncomeSource>, StoreError>;
    async fn get_category(
        &self,
        user_id: UserId,
        id: CategoryId,
    ) -> Result<Option<ExpenseCategory>, StoreError>;
    async fn get_income_source(
        &self,
        user_id: UserId,
        id: IncomeSourceId,
    ) -> Result<Option<IncomeSource>, StoreError>;
    /// Creates a category, assigning the next free palette colour.
    async fn create_category(&self, user_id: UserId, name: &str) -> Result<ExpenseCategory, StoreError>;
    async fn create_income_source(&self, user_id: UserId, name: &str) -> Result<IncomeSource, StoreError>;
}

#[async_trait]
pub trait RuleStore: Send + Sync {
    /// All rules for the user, exact rules first.
    async fn list_rules(&self, user_id: UserId) -> Result<Vec<CategorizationRule>, StoreError>;
    async fn get_rule(&self, user_id: UserId, id: RuleId) -> Result<Option<CategorizationRule>, StoreError>;
    /// Looks up a rule by its stored (normalized) pattern.
    async fn find_rule(
        &self,
        user_id: UserId,
        match_type: MatchType,
        pattern: &str,
    ) -> Result<Option<CategorizationRule>, StoreError>;
    /// Validates, then inserts. Returns the stored rule with id and timestamps.
    async fn create_rule(&self, rule: &CategorizationRule) -> Result<CategorizationRule, StoreError>;
    /// Validates, then overwrites the rule in place.
    async fn update_rule(&self, rule: &CategorizationRule) -> Result<CategorizationRule, StoreError>;
    async fn delete_rule(&self, user_id: UserId, id: RuleId) -> Result<bool, StoreError>;
}

/// Everything the import pipeline needs from one backend.
pub trait LedgerStore: TransactionStore + CategoryStore + RuleStore {}

impl<T: TransactionStore + CategoryStore + RuleStore + ?Sized> LedgerStore for T {}

/// Resolves a rule's target names and runs [`validate_rule`].
///
/// Store implementations call this from `create_rule` and `update_rule`.
pub async fn check_rule<S>(store: &S, rule: &CategorizationRule) -> Result<(), StoreError>
where
    S: CategoryStore + ?Sized,
{
    let category = match rule.category_id {
        Some(id) => Some(
            store
                .get_category(rule.user_id, id)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("category {id}")))?,
        ),
        None => None,
    };
    let income_source = match rule.income_source_id {
        Some(id) => Some(
            store
                .get_income_source(rule.user_id, id)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("income source {id}")))?,
        ),
        None => None,
    };

    validate_rule(
        rule,
        TargetNames {
            category: category.as_ref().map(|c| c.name.as_str()),
            income_source: income_source.as_ref().map(|s| s.name.as_str()),
        },
    )?;
    Ok(())
}
