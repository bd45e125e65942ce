pub mod category;
pub mod id;
pub mod money;
pub mod period;
pub mod rule;
pub mod store;
pub mod text;
pub mod transaction;

pub use category::{
    is_sentinel_name, next_category_color, ExpenseCategory, IncomeSource, DEFAULT_CATEGORIES,
    SENTINEL_CATEGORY_NAMES,
};
pub use id::{CategoryId, IncomeSourceId, RuleId, TransactionId, UserId};
pub use money::Money;
pub use period::YearMonth;
pub use rule::{
    validate_rule, AppliesTo, Assignment, CategorizationRule, MatchType, RuleError, TargetNames,
};
pub use store::{
    check_rule, CategoryStore, InsertOutcome, LedgerStore, RuleStore, StoreError, TransactionStore,
};
pub use text::normalize;
pub use transaction::{
    AccountInfo, LedgerError, Transaction, TransactionSplit, TransactionType, ValidatedSplits,
};
