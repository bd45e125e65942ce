//! Manual transaction entry and corrections. Every human-made assignment here
//! feeds the rule learner.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tally_core::{
    is_sentinel_name, AccountInfo, Assignment, CategoryStore, InsertOutcome, LedgerError,
    LedgerStore, Money, StoreError, Transaction, TransactionId, TransactionSplit,
    TransactionType, UserId, ValidatedSplits,
};
use thiserror::Error;
use tracing::{info, warn};

use crate::advisor::Suggestion;
use crate::classifier::{CategoryProposal, HeuristicClassifier};
use crate::fingerprint::fingerprint;
use crate::learner::{learn_rule, LearnOutcome};

#[derive(Debug, Error)]
pub enum EntryError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
    #[error("Cannot assign the reserved category '{0}'")]
    SentinelTarget(String),
    #[error("Transaction {0} not found")]
    NotFound(TransactionId),
    #[error("A {assignment} target cannot be used on a {transaction} transaction")]
    TypeMismatch {
        transaction: TransactionType,
        assignment: TransactionType,
    },
    #[error("An identical transaction already exists")]
    Duplicate,
    #[error("Invalid splits: {0}")]
    Ledger(#[from] LedgerError),
}

/// A transaction typed in by hand.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualEntry {
    pub date: NaiveDate,
    pub amount: Money,
    pub transaction_type: TransactionType,
    pub description: String,
    pub merchant: Option<String>,
    pub assignment: Option<Assignment>,
    #[serde(default)]
    pub account: AccountInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct Recorded {
    pub transaction: Transaction,
    /// `None` when there was nothing to learn or learning failed.
    pub learned: Option<LearnOutcome>,
}

pub async fn record_manual_transaction<S: LedgerStore + ?Sized>(
    store: &S,
    user_id: UserId,
    entry: ManualEntry,
) -> Result<Recorded, EntryError> {
    if let Some(assignment) = entry.assignment {
        ensure_assignable(store, user_id, entry.transaction_type, assignment).await?;
    }

    let amount = entry.amount.abs();
    let fingerprint = fingerprint(
        user_id,
        entry.date,
        amount,
        entry.merchant.as_deref().unwrap_or(&entry.description),
        entry.account.account_number.as_deref(),
    );
    let mut transaction = Transaction {
        id: None,
        user_id,
        date: entry.date,
        amount,
        transaction_type: entry.transaction_type,
        description: entry.description,
        merchant: entry.merchant,
        category_id: None,
        income_source_id: None,
        fingerprint: Some(fingerprint),
        raw_category: None,
        account: entry.account,
    };
    transaction.set_assignment(entry.assignment);

    match store.insert_transaction(&transaction).await? {
        InsertOutcome::Inserted(id) => transaction.id = Some(id),
        InsertOutcome::Duplicate => return Err(EntryError::Duplicate),
    }
    info!(user_id = %user_id, transaction_id = ?transaction.id, "Recorded manual transaction");

    let learned = learn_from(store, &transaction).await;
    Ok(Recorded { transaction, learned })
}

/// Reassigns a stored transaction. `None` clears the assignment.
pub async fn recategorize_transaction<S: LedgerStore + ?Sized>(
    store: &S,
    user_id: UserId,
    id: TransactionId,
    assignment: Option<Assignment>,
) -> Result<Recorded, EntryError> {
    let mut transaction = store
        .get_transaction(user_id, id)
        .await?
        .ok_or(EntryError::NotFound(id))?;
    if let Some(assignment) = assignment {
        ensure_assignable(store, user_id, transaction.transaction_type, assignment).await?;
    }

    store.set_assignment(user_id, id, assignment).await?;
    transaction.set_assignment(assignment);

    let learned = learn_from(store, &transaction).await;
    Ok(Recorded { transaction, learned })
}

pub async fn delete_transaction<S: LedgerStore + ?Sized>(
    store: &S,
    user_id: UserId,
    id: TransactionId,
) -> Result<(), EntryError> {
    if store.delete_transaction(user_id, id).await? {
        info!(user_id = %user_id, transaction_id = %id, "Deleted transaction");
        Ok(())
    } else {
        Err(EntryError::NotFound(id))
    }
}

/// Swaps the transaction's whole split set. An empty list removes all splits.
pub async fn replace_splits<S: LedgerStore + ?Sized>(
    store: &S,
    user_id: UserId,
    id: TransactionId,
    splits: Vec<TransactionSplit>,
) -> Result<ValidatedSplits, EntryError> {
    let transaction = store
        .get_transaction(user_id, id)
        .await?
        .ok_or(EntryError::NotFound(id))?;
    let validated = ValidatedSplits::validate(transaction.amount, splits)?;

    for category_id in validated.splits.iter().filter_map(|s| s.category_id) {
        let category = store
            .get_category(user_id, category_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("category {category_id}")))?;
        if category.is_sentinel() {
            return Err(EntryError::SentinelTarget(category.name));
        }
    }

    store.replace_splits(user_id, id, &validated.splits).await?;
    Ok(validated)
}

/// Applies an advisor suggestion the user accepted, creating the category if
/// needed. Goes through the same path as a manual correction.
pub async fn accept_suggestion<S: LedgerStore + ?Sized>(
    store: &S,
    user_id: UserId,
    id: TransactionId,
    suggestion: &Suggestion,
) -> Result<Recorded, EntryError> {
    let name = suggestion.category_name.trim();
    if is_sentinel_name(name) {
        return Err(EntryError::SentinelTarget(name.to_string()));
    }
    let transaction = store
        .get_transaction(user_id, id)
        .await?
        .ok_or(EntryError::NotFound(id))?;
    if transaction.transaction_type != TransactionType::Expense {
        return Err(EntryError::TypeMismatch {
            transaction: transaction.transaction_type,
            assignment: TransactionType::Expense,
        });
    }

    let categories = store.list_categories(user_id).await?;
    let existing = match HeuristicClassifier::new(&categories).find_equivalent(name, &[]) {
        Some(CategoryProposal::Existing { id, .. }) => Some(id),
        _ => None,
    };
    let category_id = match existing {
        Some(id) => id,
        None => store
            .create_category(user_id, name)
            .await?
            .id
            .ok_or_else(|| StoreError::Backend("created category has no id".to_string()))?,
    };

    recategorize_transaction(store, user_id, id, Some(Assignment::Category(category_id))).await
}

async fn ensure_assignable<S: CategoryStore + ?Sized>(
    store: &S,
    user_id: UserId,
    transaction_type: TransactionType,
    assignment: Assignment,
) -> Result<(), EntryError> {
    if assignment.transaction_type() != transaction_type {
        return Err(EntryError::TypeMismatch {
            transaction: transaction_type,
            assignment: assignment.transaction_type(),
        });
    }
    let name = match assignment {
        Assignment::Category(id) => store
            .get_category(user_id, id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("category {id}")))?
            .name,
        Assignment::IncomeSource(id) => store
            .get_income_source(user_id, id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("income source {id}")))?
            .name,
    };
    if is_sentinel_name(&name) {
        return Err(EntryError::SentinelTarget(name));
    }
    Ok(())
}

async fn learn_from<S: LedgerStore + ?Sized>(store: &S, transaction: &Transaction) -> Option<LearnOutcome> {
    let assignment = transaction.assignment()?;
    match learn_rule(store, transaction.user_id, transaction.merchant.as_deref(), assignment).await {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            warn!(transaction_id = ?transaction.id, error = %e, "Rule learning failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::learner::SkipReason;
    use crate::testing::MemoryStore;
    use tally_core::{CategoryId, MatchType, TransactionStore};

    const USER: UserId = UserId(1);

    fn entry(merchant: Option<&str>, assignment: Option<Assignment>) -> ManualEntry {
        ManualEntry {
            date: NaiveDate::from_ymd_opt(2024, 3, 2).unwrap(),
            amount: Money::from_cents(2500),
            transaction_type: TransactionType::Expense,
            description: "Lunch".to_string(),
            merchant: merchant.map(str::to_string),
            assignment,
            account: AccountInfo::default(),
        }
    }

    async fn stored(store: &MemoryStore, merchant: &str) -> TransactionId {
        record_manual_transaction(store, USER, entry(Some(merchant), None))
            .await
            .unwrap()
            .transaction
            .id
            .unwrap()
    }

    #[tokio::test]
    async fn manual_entry_persists_and_learns() {
        let store = MemoryStore::new();
        let dining = store.seed_category(USER, "Dining");

        let recorded = record_manual_transaction(
            &store,
            USER,
            entry(Some("Blue Bottle"), Some(Assignment::Category(dining))),
        )
        .await
        .unwrap();

        assert!(recorded.transaction.id.is_some());
        assert!(recorded.transaction.fingerprint.is_some());
        assert!(matches!(recorded.learned, Some(LearnOutcome::Created(_))));
        let rules = store.rules();
        assert_eq!(rules[0].pattern, "BLUE BOTTLE");
        assert_eq!(rules[0].match_type, MatchType::Contains);
    }

    #[tokio::test]
    async fn manual_entry_rejects_sentinel_and_duplicates() {
        let store = MemoryStore::new();
        let na = store.seed_category(USER, "N/A");
        let result = record_manual_transaction(&store, USER, entry(Some("CAFE"), Some(Assignment::Category(na)))).await;
        assert!(matches!(result, Err(EntryError::SentinelTarget(_))));
        assert!(store.transactions().is_empty());

        record_manual_transaction(&store, USER, entry(Some("CAFE"), None)).await.unwrap();
        let again = record_manual_transaction(&store, USER, entry(Some("cafe"), None)).await;
        assert!(matches!(again, Err(EntryError::Duplicate)));
    }

    #[tokio::test]
    async fn income_target_on_expense_is_rejected() {
        let store = MemoryStore::new();
        let salary = store.seed_income_source(USER, "Salary");
        let result = record_manual_transaction(
            &store,
            USER,
            entry(Some("CAFE"), Some(Assignment::IncomeSource(salary))),
        )
        .await;
        assert!(matches!(result, Err(EntryError::TypeMismatch { .. })));
    }

    #[tokio::test]
    async fn correction_updates_transaction_and_learned_rule() {
        let store = MemoryStore::new();
        let transport = store.seed_category(USER, "Transportation");
        let dining = store.seed_category(USER, "Dining");
        let id = stored(&store, "UBER EATS #4522").await;

        recategorize_transaction(&store, USER, id, Some(Assignment::Category(transport)))
            .await
            .unwrap();
        let recorded = recategorize_transaction(&store, USER, id, Some(Assignment::Category(dining)))
            .await
            .unwrap();

        assert!(matches!(recorded.learned, Some(LearnOutcome::Updated(_))));
        assert_eq!(
            store.get_transaction(USER, id).await.unwrap().unwrap().category_id,
            Some(dining)
        );
        let rules = store.rules();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].category_id, Some(dining));
    }

    #[tokio::test]
    async fn correction_to_sentinel_is_rejected() {
        let store = MemoryStore::new();
        let uncategorized = store.seed_category(USER, "Uncategorized");
        let id = stored(&store, "CAFE").await;
        let result = recategorize_transaction(&store, USER, id, Some(Assignment::Category(uncategorized))).await;
        assert!(matches!(result, Err(EntryError::SentinelTarget(_))));
    }

    #[tokio::test]
    async fn clearing_assignment_learns_nothing() {
        let store = MemoryStore::new();
        let id = stored(&store, "CAFE").await;
        let recorded = recategorize_transaction(&store, USER, id, None).await.unwrap();
        assert_eq!(recorded.learned, None);
        assert!(store.rules().is_empty());
    }

    #[tokio::test]
    async fn correction_without_merchant_skips_learning() {
        let store = MemoryStore::new();
        let dining = store.seed_category(USER, "Dining");
        let id = record_manual_transaction(&store, USER, entry(None, None))
            .await
            .unwrap()
            .transaction
            .id
            .unwrap();
        let recorded = recategorize_transaction(&store, USER, id, Some(Assignment::Category(dining)))
            .await
            .unwrap();
        assert_eq!(recorded.learned, Some(LearnOutcome::Skipped(SkipReason::NoMerchant)));
    }

    #[tokio::test]
    async fn delete_missing_is_not_found() {
        let store = MemoryStore::new();
        let id = stored(&store, "CAFE").await;
        delete_transaction(&store, USER, id).await.unwrap();
        assert!(matches!(
            delete_transaction(&store, USER, id).await,
            Err(EntryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn splits_must_balance() {
        let store = MemoryStore::new();
        let dining = store.seed_category(USER, "Dining");
        let id = stored(&store, "COSTCO").await;
        let split = |cents, category| TransactionSplit {
            amount: Money::from_cents(cents),
            category_id: category,
            memo: None,
        };

        let bad = replace_splits(&store, USER, id, vec![split(1000, None), split(1000, None)]).await;
        assert!(matches!(bad, Err(EntryError::Ledger(LedgerError::Unbalanced { .. }))));

        replace_splits(&store, USER, id, vec![split(1500, Some(dining)), split(1000, None)])
            .await
            .unwrap();
        assert_eq!(store.list_splits(USER, id).await.unwrap().len(), 2);

        replace_splits(&store, USER, id, vec![]).await.unwrap();
        assert!(store.list_splits(USER, id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn splits_cannot_target_sentinel() {
        let store = MemoryStore::new();
        let na = store.seed_category(USER, "N/A");
        let id = stored(&store, "COSTCO").await;
        let result = replace_splits(
            &store,
            USER,
            id,
            vec![TransactionSplit {
                amount: Money::from_cents(2500),
                category_id: Some(na),
                memo: None,
            }],
        )
        .await;
        assert!(matches!(result, Err(EntryError::SentinelTarget(_))));
    }

    #[tokio::test]
    async fn accepted_suggestion_creates_category_and_rule() {
        let store = MemoryStore::new();
        let id = stored(&store, "BLUE BOTTLE").await;
        let suggestion = Suggestion {
            category_name: "Coffee Shops".to_string(),
            confidence: 0.8,
            rationale: None,
        };

        let recorded = accept_suggestion(&store, USER, id, &suggestion).await.unwrap();
        let category_id = recorded.transaction.category_id.unwrap();
        let created = store.get_category(USER, category_id).await.unwrap().unwrap();
        assert_eq!(created.name, "Coffee Shops");
        assert!(matches!(recorded.learned, Some(LearnOutcome::Created(_))));

        // A second acceptance reuses the category.
        let other = stored(&store, "BLUE BOTTLE OAKLAND").await;
        let again = accept_suggestion(&store, USER, other, &suggestion).await.unwrap();
        assert_eq!(again.transaction.category_id, Some(category_id));
        assert_ne!(category_id, CategoryId(0));
    }

    #[tokio::test]
    async fn sentinel_suggestion_cannot_be_accepted() {
        let store = MemoryStore::new();
        let id = stored(&store, "CAFE").await;
        let suggestion = Suggestion {
            category_name: "Uncategorized".to_string(),
            confidence: 1.0,
            rationale: None,
        };
        assert!(matches!(
            accept_suggestion(&store, USER, id, &suggestion).await,
            Err(EntryError::SentinelTarget(_))
        ));
    }
}
