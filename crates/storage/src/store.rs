//! SQLite implementation of the ledger store traits.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, SubsecRound, Utc};
use tally_core::rule::normalize_pattern;
use tally_core::{
    check_rule, next_category_color, AccountInfo, Assignment, CategorizationRule, CategoryId,
    CategoryStore, ExpenseCategory, IncomeSource, IncomeSourceId, InsertOutcome, Money, MatchType,
    RuleId, RuleStore, StoreError, Transaction, TransactionId, TransactionSplit, TransactionStore,
    UserId,
};
use tracing::debug;

use crate::db::DbPool;

type TransactionRow = (
    i64,
    i64,
    NaiveDate,
    i64,
    String,
    String,
    Option<String>,
    Option<i64>,
    Option<i64>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
);

type RuleRow = (
    i64,
    i64,
    String,
    String,
    String,
    Option<i64>,
    Option<i64>,
    String,
    String,
);

const TRANSACTION_COLUMNS: &str = "id, user_id, date, amount_cents, transaction_type, description, \
     merchant, category_id, income_source_id, fingerprint, raw_category, account_name, \
     account_number, institution_name";

const RULE_COLUMNS: &str =
    "id, user_id, pattern, match_type, applies_to, category_id, income_source_id, created_at, updated_at";

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Current time at the precision rules are stored with.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Backend(format!("bad timestamp '{raw}': {e}")))
}

fn transaction_from_row(row: TransactionRow) -> Result<Transaction, StoreError> {
    let (
        id,
        user_id,
        date,
        amount_cents,
        transaction_type,
        description,
        merchant,
        category_id,
        income_source_id,
        fingerprint,
        raw_category,
        account_name,
        account_number,
        institution_name,
    ) = row;

    Ok(Transaction {
        id: Some(TransactionId(id)),
        user_id: UserId(user_id),
        date,
        amount: Money::from_cents(amount_cents),
        transaction_type: transaction_type.parse().map_err(StoreError::Backend)?,
        description,
        merchant,
        category_id: category_id.map(CategoryId),
        income_source_id: income_source_id.map(IncomeSourceId),
        fingerprint,
        raw_category,
        account: AccountInfo {
            account_name,
            account_number,
            institution_name,
        },
    })
}

fn rule_from_row(row: RuleRow) -> Result<CategorizationRule, StoreError> {
    let (id, user_id, pattern, match_type, applies_to, category_id, income_source_id, created, updated) =
        row;

    Ok(CategorizationRule {
        id: Some(RuleId(id)),
        user_id: UserId(user_id),
        pattern,
        match_type: match_type.parse().map_err(StoreError::Backend)?,
        applies_to: applies_to.parse().map_err(StoreError::Backend)?,
        category_id: category_id.map(CategoryId),
        income_source_id: income_source_id.map(IncomeSourceId),
        created_at: Some(parse_timestamp(&created)?),
        updated_at: Some(parse_timestamp(&updated)?),
    })
}

fn category_from_row((id, user_id, name, color): (i64, i64, String, Option<String>)) -> ExpenseCategory {
    ExpenseCategory {
        id: Some(CategoryId(id)),
        user_id: UserId(user_id),
        name,
        color,
    }
}

fn income_source_from_row((id, user_id, name): (i64, i64, String)) -> IncomeSource {
    IncomeSource {
        id: Some(IncomeSourceId(id)),
        user_id: UserId(user_id),
        name,
    }
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    /// All transactions for a user, oldest first.
    pub async fn list_transactions(&self, user_id: UserId) -> Result<Vec<Transaction>, StoreError> {
        let rows: Vec<TransactionRow> = sqlx::query_as(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE user_id = ? ORDER BY date, id"
        ))
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(transaction_from_row).collect()
    }
}

// ── Transactions ──────────────────────────────────────────────────────────────

#[async_trait]
impl TransactionStore for SqliteStore {
    async fn fingerprint_exists(&self, user_id: UserId, fingerprint: &str) -> Result<bool, StoreError> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM transactions WHERE user_id = ? AND fingerprint = ?)",
        )
        .bind(user_id.0)
        .bind(fingerprint)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)
    }

    async fn insert_transaction(&self, transaction: &Transaction) -> Result<InsertOutcome, StoreError> {
        let result = sqlx::query(
            "INSERT INTO transactions (user_id, date, amount_cents, transaction_type, description, \
             merchant, category_id, income_source_id, fingerprint, raw_category, account_name, \
             account_number, institution_name) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(transaction.user_id.0)
        .bind(transaction.date)
        .bind(transaction.amount.to_cents())
        .bind(transaction.transaction_type.to_string())
        .bind(&transaction.description)
        .bind(&transaction.merchant)
        .bind(transaction.category_id.map(|c| c.0))
        .bind(transaction.income_source_id.map(|s| s.0))
        .bind(&transaction.fingerprint)
        .bind(&transaction.raw_category)
        .bind(&transaction.account.account_name)
        .bind(&transaction.account.account_number)
        .bind(&transaction.account.institution_name)
        .execute(&self.pool)
        .await;

        match result {
            Ok(done) => Ok(InsertOutcome::Inserted(TransactionId(done.last_insert_rowid()))),
            Err(e) if is_unique_violation(&e) => {
                debug!(user = %transaction.user_id, "Fingerprint already stored");
                Ok(InsertOutcome::Duplicate)
            }
            Err(e) => Err(backend(e)),
        }
    }

    async fn get_transaction(
        &self,
        user_id: UserId,
        id: TransactionId,
    ) -> Result<Option<Transaction>, StoreError> {
        let row: Option<TransactionRow> = sqlx::query_as(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE user_id = ? AND id = ?"
        ))
        .bind(user_id.0)
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(transaction_from_row).transpose()
    }

    async fn set_assignment(
        &self,
        user_id: UserId,
        id: TransactionId,
        assignment: Option<Assignment>,
    ) -> Result<(), StoreError> {
        let (category_id, income_source_id) = match assignment {
            Some(Assignment::Category(c)) => (Some(c.0), None),
            Some(Assignment::IncomeSource(s)) => (None, Some(s.0)),
            None => (None, None),
        };

        let done = sqlx::query(
            "UPDATE transactions SET category_id = ?, income_source_id = ? WHERE user_id = ? AND id = ?",
        )
        .bind(category_id)
        .bind(income_source_id)
        .bind(user_id.0)
        .bind(id.0)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("transaction {id}")));
        }
        Ok(())
    }

    async fn delete_transaction(&self, user_id: UserId, id: TransactionId) -> Result<bool, StoreError> {
        let done = sqlx::query("DELETE FROM transactions WHERE user_id = ? AND id = ?")
            .bind(user_id.0)
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(done.rows_affected() > 0)
    }

    async fn list_splits(&self, user_id: UserId, id: TransactionId) -> Result<Vec<TransactionSplit>, StoreError> {
        let rows: Vec<(i64, Option<i64>, Option<String>)> = sqlx::query_as(
            "SELECT s.amount_cents, s.category_id, s.memo FROM transaction_splits s \
             JOIN transactions t ON t.id = s.transaction_id \
             WHERE t.user_id = ? AND s.transaction_id = ? ORDER BY s.id",
        )
        .bind(user_id.0)
        .bind(id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(rows
            .into_iter()
            .map(|(cents, category_id, memo)| TransactionSplit {
                amount: Money::from_cents(cents),
                category_id: category_id.map(CategoryId),
                memo,
            })
            .collect())
    }

    async fn replace_splits(
        &self,
        user_id: UserId,
        id: TransactionId,
        splits: &[TransactionSplit],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let owned = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM transactions WHERE user_id = ? AND id = ?)",
        )
        .bind(user_id.0)
        .bind(id.0)
        .fetch_one(&mut *tx)
        .await
        .map_err(backend)?;
        if !owned {
            return Err(StoreError::NotFound(format!("transaction {id}")));
        }

        sqlx::query("DELETE FROM transaction_splits WHERE transaction_id = ?")
            .bind(id.0)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        for split in splits {
            sqlx::query(
                "INSERT INTO transaction_splits (transaction_id, amount_cents, category_id, memo) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(id.0)
            .bind(split.amount.to_cents())
            .bind(split.category_id.map(|c| c.0))
            .bind(&split.memo)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)?;
        Ok(())
    }
}

// ── Categories and income sources ─────────────────────────────────────────────

#[async_trait]
impl CategoryStore for SqliteStore {
    async fn list_categories(&self, user_id: UserId) -> Result<Vec<ExpenseCategory>, StoreError> {
        let rows: Vec<(i64, i64, String, Option<String>)> = sqlx::query_as(
            "SELECT id, user_id, name, color FROM expense_categories WHERE user_id = ? ORDER BY id",
        )
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        Ok(rows.into_iter().map(category_from_row).collect())
    }

    async fn list_income_sources(&self, user_id: UserId) -> Result<Vec<IncomeSource>, StoreError> {
        let rows: Vec<(i64, i64, String)> = sqlx::query_as(
            "SELECT id, user_id, name FROM income_sources WHERE user_id = ? ORDER BY id",
        )
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        Ok(rows.into_iter().map(income_source_from_row).collect())
    }

    async fn get_category(
        &self,
        user_id: UserId,
        id: CategoryId,
    ) -> Result<Option<ExpenseCategory>, StoreError> {
        let row: Option<(i64, i64, String, Option<String>)> = sqlx::query_as(
            "SELECT id, user_id, name, color FROM expense_categories WHERE user_id = ? AND id = ?",
        )
        .bind(user_id.0)
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(row.map(category_from_row))
    }

    async fn get_income_source(
        &self,
        user_id: UserId,
        id: IncomeSourceId,
    ) -> Result<Option<IncomeSource>, StoreError> {
        let row: Option<(i64, i64, String)> = sqlx::query_as(
            "SELECT id, user_id, name FROM income_sources WHERE user_id = ? AND id = ?",
        )
        .bind(user_id.0)
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        Ok(row.map(income_source_from_row))
    }

    async fn create_category(&self, user_id: UserId, name: &str) -> Result<ExpenseCategory, StoreError> {
        let mut category = ExpenseCategory::new(user_id, name);
        let used: Vec<String> = sqlx::query_scalar(
            "SELECT color FROM expense_categories WHERE user_id = ? AND color IS NOT NULL",
        )
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        let color = next_category_color(used.iter().map(String::as_str));

        let result = sqlx::query("INSERT INTO expense_categories (user_id, name, color) VALUES (?, ?, ?)")
            .bind(user_id.0)
            .bind(&category.name)
            .bind(color)
            .execute(&self.pool)
            .await;

        match result {
            Ok(done) => {
                category.id = Some(CategoryId(done.last_insert_rowid()));
                category.color = Some(color.to_string());
                debug!(user = %user_id, name = %category.name, color, "Created category");
                Ok(category)
            }
            Err(e) if is_unique_violation(&e) => Err(StoreError::Backend(format!(
                "category '{}' already exists",
                category.name
            ))),
            Err(e) => Err(backend(e)),
        }
    }

    async fn create_income_source(&self, user_id: UserId, name: &str) -> Result<IncomeSource, StoreError> {
        let mut source = IncomeSource::new(user_id, name);
        let result = sqlx::query("INSERT INTO income_sources (user_id, name) VALUES (?, ?)")
            .bind(user_id.0)
            .bind(&source.name)
            .execute(&self.pool)
            .await;

        match result {
            Ok(done) => {
                source.id = Some(IncomeSourceId(done.last_insert_rowid()));
                Ok(source)
            }
            Err(e) if is_unique_violation(&e) => Err(StoreError::Backend(format!(
                "income source '{}' already exists",
                source.name
            ))),
            Err(e) => Err(backend(e)),
        }
    }
}

// ── Rules ─────────────────────────────────────────────────────────────────────

#[async_trait]
impl RuleStore for SqliteStore {
    async fn list_rules(&self, user_id: UserId) -> Result<Vec<CategorizationRule>, StoreError> {
        let rows: Vec<RuleRow> = sqlx::query_as(&format!(
            "SELECT {RULE_COLUMNS} FROM categorization_rules WHERE user_id = ? \
             ORDER BY CASE match_type WHEN 'exact' THEN 0 ELSE 1 END, updated_at DESC, id DESC"
        ))
        .bind(user_id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter().map(rule_from_row).collect()
    }

    async fn get_rule(&self, user_id: UserId, id: RuleId) -> Result<Option<CategorizationRule>, StoreError> {
        let row: Option<RuleRow> = sqlx::query_as(&format!(
            "SELECT {RULE_COLUMNS} FROM categorization_rules WHERE user_id = ? AND id = ?"
        ))
        .bind(user_id.0)
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(rule_from_row).transpose()
    }

    async fn find_rule(
        &self,
        user_id: UserId,
        match_type: MatchType,
        pattern: &str,
    ) -> Result<Option<CategorizationRule>, StoreError> {
        let row: Option<RuleRow> = sqlx::query_as(&format!(
            "SELECT {RULE_COLUMNS} FROM categorization_rules \
             WHERE user_id = ? AND match_type = ? AND pattern = ? \
             ORDER BY updated_at DESC, id DESC LIMIT 1"
        ))
        .bind(user_id.0)
        .bind(match_type.to_string())
        .bind(normalize_pattern(pattern, match_type))
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(rule_from_row).transpose()
    }

    async fn create_rule(&self, rule: &CategorizationRule) -> Result<CategorizationRule, StoreError> {
        check_rule(self, rule).await?;

        let mut stored = rule.clone();
        stored.pattern = normalize_pattern(&rule.pattern, rule.match_type);
        let now = now();
        let done = sqlx::query(
            "INSERT INTO categorization_rules (user_id, pattern, match_type, applies_to, \
             category_id, income_source_id, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(stored.user_id.0)
        .bind(&stored.pattern)
        .bind(stored.match_type.to_string())
        .bind(stored.applies_to.to_string())
        .bind(stored.category_id.map(|c| c.0))
        .bind(stored.income_source_id.map(|s| s.0))
        .bind(timestamp(now))
        .bind(timestamp(now))
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        stored.id = Some(RuleId(done.last_insert_rowid()));
        stored.created_at = Some(now);
        stored.updated_at = Some(now);
        debug!(user = %stored.user_id, pattern = %stored.pattern, match_type = %stored.match_type, "Created rule");
        Ok(stored)
    }

    async fn update_rule(&self, rule: &CategorizationRule) -> Result<CategorizationRule, StoreError> {
        let id = rule
            .id
            .ok_or_else(|| StoreError::NotFound("rule without id".to_string()))?;
        let existing = self
            .get_rule(rule.user_id, id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("rule {id}")))?;
        check_rule(self, rule).await?;

        let mut stored = rule.clone();
        stored.pattern = normalize_pattern(&rule.pattern, rule.match_type);
        let now = now();
        let done = sqlx::query(
            "UPDATE categorization_rules SET pattern = ?, match_type = ?, applies_to = ?, \
             category_id = ?, income_source_id = ?, updated_at = ? WHERE user_id = ? AND id = ?",
        )
        .bind(&stored.pattern)
        .bind(stored.match_type.to_string())
        .bind(stored.applies_to.to_string())
        .bind(stored.category_id.map(|c| c.0))
        .bind(stored.income_source_id.map(|s| s.0))
        .bind(timestamp(now))
        .bind(stored.user_id.0)
        .bind(id.0)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if done.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("rule {id}")));
        }
        stored.created_at = existing.created_at;
        stored.updated_at = Some(now);
        Ok(stored)
    }

    async fn delete_rule(&self, user_id: UserId, id: RuleId) -> Result<bool, StoreError> {
        let done = sqlx::query("DELETE FROM categorization_rules WHERE user_id = ? AND id = ?")
            .bind(user_id.0)
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(done.rows_affected() > 0)
    }
}
