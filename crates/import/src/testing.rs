//! In-memory `LedgerStore` for unit tests.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tally_core::rule::{normalize_pattern, sort_for_matching};
use tally_core::{
    check_rule, next_category_color, Assignment, CategorizationRule, CategoryId, CategoryStore,
    ExpenseCategory, IncomeSource, IncomeSourceId, InsertOutcome, MatchType, RuleId, RuleStore,
    StoreError, Transaction, TransactionId, TransactionSplit, TransactionStore, UserId,
};

#[derive(Default)]
struct State {
    next_id: i64,
    clock: i64,
    blind_dedup: bool,
    transactions: Vec<Transaction>,
    splits: HashMap<TransactionId, Vec<TransactionSplit>>,
    categories: Vec<ExpenseCategory>,
    income_sources: Vec<IncomeSource>,
    rules: Vec<CategorizationRule>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn tick(&mut self) -> DateTime<Utc> {
        self.clock += 1;
        Utc.timestamp_opt(1_700_000_000 + self.clock, 0).unwrap()
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Makes `fingerprint_exists` always answer `false`, as if another writer
    /// inserted between the check and the insert.
    pub fn blind_dedup(&self) {
        self.state().blind_dedup = true;
    }

    pub fn seed_category(&self, user_id: UserId, name: &str) -> CategoryId {
        let mut state = self.state();
        let id = CategoryId(state.next_id());
        let mut category = ExpenseCategory::new(user_id, name);
        category.id = Some(id);
        state.categories.push(category);
        id
    }

    pub fn seed_income_source(&self, user_id: UserId, name: &str) -> IncomeSourceId {
        let mut state = self.state();
        let id = IncomeSourceId(state.next_id());
        let mut source = IncomeSource::new(user_id, name);
        source.id = Some(id);
        state.income_sources.push(source);
        id
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        self.state().transactions.clone()
    }

    pub fn rules(&self) -> Vec<CategorizationRule> {
        self.state().rules.clone()
    }

    pub fn categories(&self) -> Vec<ExpenseCategory> {
        self.state().categories.clone()
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn fingerprint_exists(&self, user_id: UserId, fingerprint: &str) -> Result<bool, StoreError> {
        let state = self.state();
        Ok(!state.blind_dedup
            && state
                .transactions
                .iter()
                .any(|t| t.user_id == user_id && t.fingerprint.as_deref() == Some(fingerprint)))
    }

    async fn insert_transaction(&self, transaction: &Transaction) -> Result<InsertOutcome, StoreError> {
        let mut state = self.state();
        if let Some(fp) = transaction.fingerprint.as_deref() {
            if state
                .transactions
                .iter()
                .any(|t| t.user_id == transaction.user_id && t.fingerprint.as_deref() == Some(fp))
            {
                return Ok(InsertOutcome::Duplicate);
            }
        }
        let id = TransactionId(state.next_id());
        let mut stored = transaction.clone();
        stored.id = Some(id);
        state.transactions.push(stored);
        Ok(InsertOutcome::Inserted(id))
    }

    async fn get_transaction(
        &self,
        user_id: UserId,
        id: TransactionId,
    ) -> Result<Option<Transaction>, StoreError> {
        Ok(self
            .state()
            .transactions
            .iter()
            .find(|t| t.user_id == user_id && t.id == Some(id))
            .cloned())
    }

    async fn set_assignment(
        &self,
        user_id: UserId,
        id: TransactionId,
        assignment: Option<Assignment>,
    ) -> Result<(), StoreError> {
        let mut state = self.state();
        let tx = state
            .transactions
            .iter_mut()
            .find(|t| t.user_id == user_id && t.id == Some(id))
            .ok_or_else(|| StoreError::NotFound(format!("transaction {id}")))?;
        tx.set_assignment(assignment);
        Ok(())
    }

    async fn delete_transaction(&self, user_id: UserId, id: TransactionId) -> Result<bool, StoreError> {
        let mut state = self.state();
        let before = state.transactions.len();
        state
            .transactions
            .retain(|t| !(t.user_id == user_id && t.id == Some(id)));
        let deleted = state.transactions.len() != before;
        if deleted {
            state.splits.remove(&id);
        }
        Ok(deleted)
    }

    async fn list_splits(&self, _user_id: UserId, id: TransactionId) -> Result<Vec<TransactionSplit>, StoreError> {
        Ok(self.state().splits.get(&id).cloned().unwrap_or_default())
    }

    async fn replace_splits(
        &self,
        user_id: UserId,
        id: TransactionId,
        splits: &[TransactionSplit],
    ) -> Result<(), StoreError> {
        let mut state = self.state();
        if !state
            .transactions
            .iter()
            .any(|t| t.user_id == user_id && t.id == Some(id))
        {
            return Err(StoreError::NotFound(format!("transaction {id}")));
        }
        state.splits.insert(id, splits.to_vec());
        Ok(())
    }
}

#[async_trait]
impl CategoryStore for MemoryStore {
    async fn list_categories(&self, user_id: UserId) -> Result<Vec<ExpenseCategory>, StoreError> {
        Ok(self
            .state()
            .categories
            .iter()
            .filter(|c| c.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_income_sources(&self, user_id: UserId) -> Result<Vec<IncomeSource>, StoreError> {
        Ok(self
            .state()
            .income_sources
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn get_category(
        &self,
        user_id: UserId,
        id: CategoryId,
    ) -> Result<Option<ExpenseCategory>, StoreError> {
        Ok(self
            .state()
            .categories
            .iter()
            .find(|c| c.user_id == user_id && c.id == Some(id))
            .cloned())
    }

    async fn get_income_source(
        &self,
        user_id: UserId,
        id: IncomeSourceId,
    ) -> Result<Option<IncomeSource>, StoreError> {
        Ok(self
            .state()
            .income_sources
            .iter()
            .find(|s| s.user_id == user_id && s.id == Some(id))
            .cloned())
    }

    async fn create_category(&self, user_id: UserId, name: &str) -> Result<ExpenseCategory, StoreError> {
        let mut state = self.state();
        let name = name.trim();
        if state
            .categories
            .iter()
            .any(|c| c.user_id == user_id && c.name == name)
        {
            return Err(StoreError::Backend(format!("category '{name}' already exists")));
        }
        let color = next_category_color(
            state
                .categories
                .iter()
                .filter(|c| c.user_id == user_id)
                .filter_map(|c| c.color.as_deref()),
        );
        let mut category = ExpenseCategory::new(user_id, name);
        category.id = Some(CategoryId(state.next_id()));
        category.color = Some(color.to_string());
        state.categories.push(category.clone());
        Ok(category)
    }

    async fn create_income_source(&self, user_id: UserId, name: &str) -> Result<IncomeSource, StoreError> {
        let mut state = self.state();
        let mut source = IncomeSource::new(user_id, name);
        source.id = Some(IncomeSourceId(state.next_id()));
        state.income_sources.push(source.clone());
        Ok(source)
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn list_rules(&self, user_id: UserId) -> Result<Vec<CategorizationRule>, StoreError> {
        let mut rules: Vec<_> = self
            .state()
            .rules
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        sort_for_matching(&mut rules);
        Ok(rules)
    }

    async fn get_rule(&self, user_id: UserId, id: RuleId) -> Result<Option<CategorizationRule>, StoreError> {
        Ok(self
            .state()
            .rules
            .iter()
            .find(|r| r.user_id == user_id && r.id == Some(id))
            .cloned())
    }

    async fn find_rule(
        &self,
        user_id: UserId,
        match_type: MatchType,
        pattern: &str,
    ) -> Result<Option<CategorizationRule>, StoreError> {
        let pattern = normalize_pattern(pattern, match_type);
        Ok(self
            .state()
            .rules
            .iter()
            .find(|r| r.user_id == user_id && r.match_type == match_type && r.pattern == pattern)
            .cloned())
    }

    async fn create_rule(&self, rule: &CategorizationRule) -> Result<CategorizationRule, StoreError> {
        check_rule(self, rule).await?;
        let mut state = self.state();
        let now = state.tick();
        let mut stored = rule.clone();
        stored.id = Some(RuleId(state.next_id()));
        stored.created_at = Some(now);
        stored.updated_at = Some(now);
        state.rules.push(stored.clone());
        Ok(stored)
    }

    async fn update_rule(&self, rule: &CategorizationRule) -> Result<CategorizationRule, StoreError> {
        check_rule(self, rule).await?;
        let mut state = self.state();
        let now = state.tick();
        let existing = state
            .rules
            .iter_mut()
            .find(|r| r.user_id == rule.user_id && r.id.is_some() && r.id == rule.id)
            .ok_or_else(|| StoreError::NotFound("rule".to_string()))?;
        let created_at = existing.created_at;
        *existing = rule.clone();
        existing.created_at = created_at;
        existing.updated_at = Some(now);
        Ok(existing.clone())
    }

    async fn delete_rule(&self, user_id: UserId, id: RuleId) -> Result<bool, StoreError> {
        let mut state = self.state();
        let before = state.rules.len();
        state
            .rules
            .retain(|r| !(r.user_id == user_id && r.id == Some(id)));
        Ok(state.rules.len() != before)
    }
}
