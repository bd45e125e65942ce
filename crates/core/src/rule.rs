use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::fmt;
use thiserror::Error;

use crate::category::is_sentinel_name;
use crate::id::{CategoryId, IncomeSourceId, RuleId, UserId};
use crate::text::normalize;
use crate::transaction::TransactionType;

/// Longest regex pattern accepted for a rule.
pub const MAX_REGEX_PATTERN_LEN: usize = 256;
/// Compiled program and lazy DFA budget for a single rule regex.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    #[default]
    Contains,
    Regex,
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchType::Exact => write!(f, "exact"),
            MatchType::Contains => write!(f, "contains"),
            MatchType::Regex => write!(f, "regex"),
        }
    }
}

impl std::str::FromStr for MatchType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "exact" => Ok(MatchType::Exact),
            "contains" => Ok(MatchType::Contains),
            "regex" => Ok(MatchType::Regex),
            other => Err(format!("Unknown match type: '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppliesTo {
    Expense,
    Income,
    Both,
}

impl AppliesTo {
    pub fn covers(self, transaction_type: TransactionType) -> bool {
        matches!(
            (self, transaction_type),
            (AppliesTo::Both, _)
                | (AppliesTo::Expense, TransactionType::Expense)
                | (AppliesTo::Income, TransactionType::Income)
        )
    }
}

impl fmt::Display for AppliesTo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppliesTo::Expense => write!(f, "expense"),
            AppliesTo::Income => write!(f, "income"),
            AppliesTo::Both => write!(f, "both"),
        }
    }
}

impl std::str::FromStr for AppliesTo {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "expense" => Ok(AppliesTo::Expense),
            "income" => Ok(AppliesTo::Income),
            "both" => Ok(AppliesTo::Both),
            other => Err(format!("Unknown applies-to value: '{other}'")),
        }
    }
}

/// What a transaction is filed under: a category for expenses, an income source for income.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum Assignment {
    Category(CategoryId),
    IncomeSource(IncomeSourceId),
}

impl Assignment {
    pub fn transaction_type(self) -> TransactionType {
        match self {
            Assignment::Category(_) => TransactionType::Expense,
            Assignment::IncomeSource(_) => TransactionType::Income,
        }
    }

    pub fn applies_to(self) -> AppliesTo {
        match self {
            Assignment::Category(_) => AppliesTo::Expense,
            Assignment::IncomeSource(_) => AppliesTo::Income,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorizationRule {
    pub id: Option<RuleId>,
    pub user_id: UserId,
    pub pattern: String,
    pub match_type: MatchType,
    pub applies_to: AppliesTo,
    pub category_id: Option<CategoryId>,
    pub income_source_id: Option<IncomeSourceId>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl CategorizationRule {
    pub fn new(user_id: UserId, pattern: &str, match_type: MatchType, applies_to: AppliesTo) -> Self {
        CategorizationRule {
            id: None,
            user_id,
            pattern: normalize_pattern(pattern, match_type),
            match_type,
            applies_to,
            category_id: None,
            income_source_id: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// A `contains` rule pointing at a single assignment, as the learner creates them.
    pub fn learned(user_id: UserId, pattern: &str, assignment: Assignment) -> Self {
        let mut rule = Self::new(user_id, pattern, MatchType::Contains, assignment.applies_to());
        rule.set_target(assignment);
        rule
    }

    /// Points the rule at `assignment`, clearing the other target.
    pub fn set_target(&mut self, assignment: Assignment) {
        self.applies_to = assignment.applies_to();
        match assignment {
            Assignment::Category(id) => {
                self.category_id = Some(id);
                self.income_source_id = None;
            }
            Assignment::IncomeSource(id) => {
                self.income_source_id = Some(id);
                self.category_id = None;
            }
        }
    }

    /// The target this rule resolves to for a transaction of the given type.
    pub fn target_for(&self, transaction_type: TransactionType) -> Option<Assignment> {
        if !self.applies_to.covers(transaction_type) {
            return None;
        }
        match transaction_type {
            TransactionType::Expense => self.category_id.map(Assignment::Category),
            TransactionType::Income => self.income_source_id.map(Assignment::IncomeSource),
        }
    }

    pub fn has_target(&self, assignment: Assignment) -> bool {
        self.applies_to == assignment.applies_to()
            && self.target_for(assignment.transaction_type()) == Some(assignment)
    }
}

/// Stored form of a pattern. Literal patterns are normalized; regex patterns are
/// only trimmed, since case-folding would change escapes like `\d`.
pub fn normalize_pattern(pattern: &str, match_type: MatchType) -> String {
    match match_type {
        MatchType::Exact | MatchType::Contains => normalize(pattern),
        MatchType::Regex => pattern.trim().to_string(),
    }
}

/// Evaluation order: exact rules first, then the most recently updated rule.
pub fn sort_for_matching(rules: &mut [CategorizationRule]) {
    rules.sort_by_key(|r| {
        (
            r.match_type != MatchType::Exact,
            Reverse(r.updated_at),
            Reverse(r.id),
        )
    });
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("Rule pattern is empty")]
    EmptyPattern,
    #[error("Pattern '{0}' looks like a transaction identifier, not a merchant name")]
    IdentifierLikePattern(String),
    #[error("Rules may not target the reserved category '{0}'")]
    SentinelTarget(String),
    #[error("Invalid regex: {0}")]
    InvalidRegex(String),
    #[error("Regex pattern exceeds {} characters", MAX_REGEX_PATTERN_LEN)]
    PatternTooLong,
    #[error("Regex is too complex to compile within limits")]
    RegexTooComplex,
    #[error("Rule has no target category or income source")]
    MissingTarget,
    #[error("Rule applying to {0} transactions carries a target of the wrong kind")]
    TargetMismatch(AppliesTo),
}

macro_rules! re {
    ($name:ident, $pat:expr) => {
        fn $name() -> &'static Regex {
            static R: OnceLock<Regex> = OnceLock::new();
            R.get_or_init(|| Regex::new($pat).expect("invalid regex"))
        }
    };
}

re!(re_digit_run, r"\d{6,}");
re!(re_uuid,
    r"(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}");

/// True for patterns carrying a reference number or UUID, which would pin a
/// rule to one transaction instead of a merchant.
pub fn looks_like_identifier(pattern: &str) -> bool {
    re_digit_run().is_match(pattern) || re_uuid().is_match(pattern)
}

/// Compiles a rule regex case-insensitively under fixed size limits.
pub fn compile_rule_regex(pattern: &str) -> Result<Regex, RuleError> {
    if pattern.chars().count() > MAX_REGEX_PATTERN_LEN {
        return Err(RuleError::PatternTooLong);
    }
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .size_limit(REGEX_SIZE_LIMIT)
        .dfa_size_limit(REGEX_SIZE_LIMIT)
        .build()
        .map_err(|e| match e {
            regex::Error::CompiledTooBig(_) => RuleError::RegexTooComplex,
            other => RuleError::InvalidRegex(other.to_string()),
        })
}

/// Names of the rule's targets, resolved by the caller from its category store.
#[derive(Debug, Clone, Copy, Default)]
pub struct TargetNames<'a> {
    pub category: Option<&'a str>,
    pub income_source: Option<&'a str>,
}

/// Checks run on every rule create and update.
pub fn validate_rule(rule: &CategorizationRule, targets: TargetNames<'_>) -> Result<(), RuleError> {
    if rule.pattern.trim().is_empty() {
        return Err(RuleError::EmptyPattern);
    }
    if looks_like_identifier(&rule.pattern) {
        return Err(RuleError::IdentifierLikePattern(rule.pattern.clone()));
    }

    match (rule.applies_to, rule.category_id, rule.income_source_id) {
        (_, None, None) => return Err(RuleError::MissingTarget),
        (AppliesTo::Expense, _, Some(_)) => {
            return Err(RuleError::TargetMismatch(AppliesTo::Expense))
        }
        (AppliesTo::Income, Some(_), _) => {
            return Err(RuleError::TargetMismatch(AppliesTo::Income))
        }
        _ => {}
    }

    for name in [targets.category, targets.income_source].into_iter().flatten() {
        if is_sentinel_name(name) {
            return Err(RuleError::SentinelTarget(name.trim().to_string()));
        }
    }

    if rule.match_type == MatchType::Regex {
        compile_rule_regex(&rule.pattern)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn expense_rule(pattern: &str, match_type: MatchType) -> CategorizationRule {
        let mut rule = CategorizationRule::new(UserId(1), pattern, match_type, AppliesTo::Expense);
        rule.category_id = Some(CategoryId(10));
        rule
    }

    fn names(category: &str) -> TargetNames<'_> {
        TargetNames {
            category: Some(category),
            income_source: None,
        }
    }

    #[test]
    fn literal_patterns_are_normalized() {
        let rule = expense_rule("  uber   eats ", MatchType::Contains);
        assert_eq!(rule.pattern, "UBER EATS");
    }

    #[test]
    fn regex_patterns_keep_case() {
        let rule = expense_rule(r" ^amzn\d ", MatchType::Regex);
        assert_eq!(rule.pattern, r"^amzn\d");
    }

    #[test]
    fn valid_rule_passes() {
        assert_eq!(validate_rule(&expense_rule("uber", MatchType::Contains), names("Transport")), Ok(()));
    }

    #[test]
    fn rejects_empty_pattern() {
        assert_eq!(
            validate_rule(&expense_rule("   ", MatchType::Contains), names("Transport")),
            Err(RuleError::EmptyPattern)
        );
    }

    #[test]
    fn rejects_long_digit_runs() {
        let err = validate_rule(&expense_rule("ACH 1234567", MatchType::Contains), names("Bills"))
            .unwrap_err();
        assert!(matches!(err, RuleError::IdentifierLikePattern(_)));
        // Five digits is still a plausible store number.
        assert!(validate_rule(&expense_rule("STORE 12345", MatchType::Contains), names("Bills")).is_ok());
    }

    #[test]
    fn rejects_uuid_patterns() {
        let rule = expense_rule(
            "PAYMENT 3f2504e0-4f89-11d3-9a0c-0305e82c3301",
            MatchType::Contains,
        );
        assert!(matches!(
            validate_rule(&rule, names("Bills")),
            Err(RuleError::IdentifierLikePattern(_))
        ));
    }

    #[test]
    fn rejects_sentinel_targets() {
        let rule = expense_rule("uber", MatchType::Contains);
        assert_eq!(
            validate_rule(&rule, names("Uncategorized")),
            Err(RuleError::SentinelTarget("Uncategorized".into()))
        );
        assert_eq!(
            validate_rule(&rule, names(" n/a ")),
            Err(RuleError::SentinelTarget("n/a".into()))
        );
    }

    #[test]
    fn rejects_bad_regex_at_validation_time() {
        let rule = expense_rule("(unclosed", MatchType::Regex);
        assert!(matches!(
            validate_rule(&rule, names("Shopping")),
            Err(RuleError::InvalidRegex(_))
        ));
    }

    #[test]
    fn rejects_overlong_regex() {
        let rule = expense_rule(&"a".repeat(MAX_REGEX_PATTERN_LEN + 1), MatchType::Regex);
        assert_eq!(validate_rule(&rule, names("Shopping")), Err(RuleError::PatternTooLong));
    }

    #[test]
    fn rejects_regex_over_size_limit() {
        assert_eq!(
            compile_rule_regex(r"\w{500}").unwrap_err(),
            RuleError::RegexTooComplex
        );
    }

    #[test]
    fn target_shape_must_match_applies_to() {
        let mut rule = expense_rule("acme", MatchType::Contains);
        rule.income_source_id = Some(IncomeSourceId(2));
        assert_eq!(
            validate_rule(&rule, names("Dining")),
            Err(RuleError::TargetMismatch(AppliesTo::Expense))
        );

        let mut income = CategorizationRule::new(UserId(1), "acme", MatchType::Contains, AppliesTo::Income);
        income.category_id = Some(CategoryId(1));
        assert_eq!(
            validate_rule(&income, TargetNames::default()),
            Err(RuleError::TargetMismatch(AppliesTo::Income))
        );

        let bare = CategorizationRule::new(UserId(1), "acme", MatchType::Contains, AppliesTo::Both);
        assert_eq!(validate_rule(&bare, TargetNames::default()), Err(RuleError::MissingTarget));
    }

    #[test]
    fn both_may_carry_either_target() {
        let mut rule = CategorizationRule::new(UserId(1), "venmo", MatchType::Contains, AppliesTo::Both);
        rule.income_source_id = Some(IncomeSourceId(4));
        assert!(validate_rule(&rule, TargetNames { category: None, income_source: Some("Side gig") }).is_ok());
        assert_eq!(rule.target_for(TransactionType::Expense), None);
        assert_eq!(
            rule.target_for(TransactionType::Income),
            Some(Assignment::IncomeSource(IncomeSourceId(4)))
        );
    }

    #[test]
    fn learned_rule_shape() {
        let rule = CategorizationRule::learned(UserId(1), "acme payroll", Assignment::IncomeSource(IncomeSourceId(9)));
        assert_eq!(rule.match_type, MatchType::Contains);
        assert_eq!(rule.applies_to, AppliesTo::Income);
        assert_eq!(rule.pattern, "ACME PAYROLL");
        assert!(rule.has_target(Assignment::IncomeSource(IncomeSourceId(9))));
        assert!(!rule.has_target(Assignment::Category(CategoryId(9))));
    }

    #[test]
    fn set_target_clears_other_side() {
        let mut rule = expense_rule("acme", MatchType::Contains);
        rule.set_target(Assignment::IncomeSource(IncomeSourceId(3)));
        assert_eq!(rule.applies_to, AppliesTo::Income);
        assert_eq!(rule.category_id, None);
    }

    #[test]
    fn exact_rules_sort_first_then_newest() {
        let at = |secs| Some(Utc.timestamp_opt(secs, 0).unwrap());
        let mut old = expense_rule("a", MatchType::Contains);
        old.id = Some(RuleId(1));
        old.updated_at = at(100);
        let mut new = expense_rule("b", MatchType::Regex);
        new.id = Some(RuleId(2));
        new.updated_at = at(200);
        let mut exact = expense_rule("c", MatchType::Exact);
        exact.id = Some(RuleId(3));
        exact.updated_at = at(50);

        let mut rules = vec![old, new, exact];
        sort_for_matching(&mut rules);
        let ids: Vec<_> = rules.iter().map(|r| r.id.unwrap().0).collect();
        assert_eq!(ids, vec![3, 2, 1]);
    }

    #[test]
    fn match_type_from_str() {
        use std::str::FromStr;
        assert_eq!(MatchType::from_str("REGEX").unwrap(), MatchType::Regex);
        assert!(MatchType::from_str("fuzzy").is_err());
        assert_eq!(AppliesTo::from_str("both").unwrap(), AppliesTo::Both);
    }
}
