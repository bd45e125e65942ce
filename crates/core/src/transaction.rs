use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::id::{CategoryId, IncomeSourceId, TransactionId, UserId};
use crate::money::Money;
use crate::rule::Assignment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Income,
    Expense,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionType::Income => write!(f, "income"),
            TransactionType::Expense => write!(f, "expense"),
        }
    }
}

impl std::str::FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "income" => Ok(TransactionType::Income),
            "expense" => Ok(TransactionType::Expense),
            other => Err(format!("Unknown transaction type: '{other}'")),
        }
    }
}

/// Account and institution details carried over from a bank export.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub account_name: Option<String>,
    pub account_number: Option<String>,
    pub institution_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Option<TransactionId>,
    pub user_id: UserId,
    pub date: NaiveDate,
    /// Always non-negative; direction lives in `transaction_type`.
    pub amount: Money,
    pub transaction_type: TransactionType,
    pub description: String,
    pub merchant: Option<String>,
    pub category_id: Option<CategoryId>,
    pub income_source_id: Option<IncomeSourceId>,
    pub fingerprint: Option<String>,
    pub raw_category: Option<String>,
    pub account: AccountInfo,
}

impl Transaction {
    /// The assignment relevant to this transaction's type, if any.
    pub fn assignment(&self) -> Option<Assignment> {
        match self.transaction_type {
            TransactionType::Expense => self.category_id.map(Assignment::Category),
            TransactionType::Income => self.income_source_id.map(Assignment::IncomeSource),
        }
    }

    /// Replaces both targets; the field that does not match `assignment` is cleared.
    pub fn set_assignment(&mut self, assignment: Option<Assignment>) {
        self.category_id = None;
        self.income_source_id = None;
        match assignment {
            Some(Assignment::Category(id)) => self.category_id = Some(id),
            Some(Assignment::IncomeSource(id)) => self.income_source_id = Some(id),
            None => {}
        }
    }

    /// Merchant when present, otherwise the description.
    pub fn match_text(&self) -> &str {
        self.merchant.as_deref().unwrap_or(&self.description)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionSplit {
    pub amount: Money,
    pub category_id: Option<CategoryId>,
    pub memo: Option<String>,
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum LedgerError {
    #[error("Splits do not add up: expected {expected}, got {actual}")]
    Unbalanced { expected: Money, actual: Money },
    #[error("Split amounts must be positive")]
    NonPositiveSplit,
}

/// A split set whose amounts are known to add up to the parent transaction.
#[derive(Debug, Clone)]
pub struct ValidatedSplits {
    pub splits: Vec<TransactionSplit>,
    pub total: Money,
}

impl ValidatedSplits {
    /// An empty set is valid and clears any existing splits.
    pub fn validate(
        parent_amount: Money,
        splits: Vec<TransactionSplit>,
    ) -> Result<ValidatedSplits, LedgerError> {
        if splits.is_empty() {
            return Ok(ValidatedSplits {
                splits,
                total: Money::zero(),
            });
        }

        if splits.iter().any(|s| s.amount.is_negative() || s.amount.is_zero()) {
            return Err(LedgerError::NonPositiveSplit);
        }

        let total: Money = splits.iter().map(|s| s.amount).sum();
        if total != parent_amount.abs() {
            return Err(LedgerError::Unbalanced {
                expected: parent_amount.abs(),
                actual: total,
            });
        }

        Ok(ValidatedSplits { splits, total })
    }
}
