use regex::Regex;
use tally_core::rule::{compile_rule_regex, sort_for_matching};
use tally_core::{normalize, Assignment, CategorizationRule, MatchType, TransactionType};
use tracing::warn;

/// Internal pairing of a rule with its precompiled regex (if applicable).
struct CompiledRule {
    rule: CategorizationRule,
    compiled_regex: Option<Regex>,
}

/// The rule that fired and the assignment it produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuleMatch<'a> {
    pub rule: &'a CategorizationRule,
    pub assignment: Assignment,
}

/// A user's rules, compiled once and held in evaluation order.
pub struct RuleMatcher {
    rules: Vec<CompiledRule>,
}

impl RuleMatcher {
    pub fn new(mut rules: Vec<CategorizationRule>) -> Self {
        sort_for_matching(&mut rules);
        let compiled = rules
            .into_iter()
            .filter_map(|rule| {
                let compiled_regex = if rule.match_type == MatchType::Regex {
                    match compile_rule_regex(&rule.pattern) {
                        Ok(re) => Some(re),
                        Err(e) => {
                            warn!(rule_id = ?rule.id, pattern = %rule.pattern, error = %e, "Skipping rule with unusable regex");
                            return None;
                        }
                    }
                } else {
                    None
                };
                Some(CompiledRule { rule, compiled_regex })
            })
            .collect();
        Self { rules: compiled }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// First rule, in evaluation order, that matches `text` and carries a
    /// target for `transaction_type`.
    pub fn match_rule(&self, text: &str, transaction_type: TransactionType) -> Option<RuleMatch<'_>> {
        let text = normalize(text);
        if text.is_empty() {
            return None;
        }
        self.rules.iter().find_map(|cr| {
            let assignment = cr.rule.target_for(transaction_type)?;
            rule_matches(cr, &text).then_some(RuleMatch {
                rule: &cr.rule,
                assignment,
            })
        })
    }
}

fn rule_matches(cr: &CompiledRule, text: &str) -> bool {
    match cr.rule.match_type {
        MatchType::Exact => text == cr.rule.pattern,
        MatchType::Contains => text.contains(cr.rule.pattern.as_str()),
        MatchType::Regex => cr
            .compiled_regex
            .as_ref()
            .is_some_and(|re| re.is_match(text)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use tally_core::{AppliesTo, CategoryId, IncomeSourceId, RuleId, UserId};

    fn make_rule(id: i64, pattern: &str, match_type: MatchType, category: i64) -> CategorizationRule {
        let mut rule = CategorizationRule::new(UserId(1), pattern, match_type, AppliesTo::Expense);
        rule.id = Some(RuleId(id));
        rule.category_id = Some(CategoryId(category));
        rule.updated_at = Some(Utc.timestamp_opt(1_700_000_000 + id, 0).unwrap());
        rule
    }

    fn category_of(m: Option<RuleMatch<'_>>) -> Option<i64> {
        m.and_then(|m| match m.assignment {
            Assignment::Category(id) => Some(id.0),
            Assignment::IncomeSource(_) => None,
        })
    }

    #[test]
    fn contains_match_case_insensitive() {
        let matcher = RuleMatcher::new(vec![make_rule(1, "whole foods", MatchType::Contains, 5)]);
        let m = matcher.match_rule("Whole  Foods Market 123", TransactionType::Expense);
        assert_eq!(category_of(m), Some(5));
        assert!(matcher.match_rule("STARBUCKS", TransactionType::Expense).is_none());
    }

    #[test]
    fn exact_match() {
        let matcher = RuleMatcher::new(vec![make_rule(1, "starbucks", MatchType::Exact, 2)]);
        assert!(matcher.match_rule(" starbucks ", TransactionType::Expense).is_some());
        assert!(matcher.match_rule("STARBUCKS RESERVE", TransactionType::Expense).is_none());
    }

    #[test]
    fn regex_match() {
        let matcher = RuleMatcher::new(vec![make_rule(1, r"^amzn|amazon", MatchType::Regex, 3)]);
        assert!(matcher.match_rule("AMAZON MARKETPLACE", TransactionType::Expense).is_some());
        assert!(matcher.match_rule("Amzn*Prime", TransactionType::Expense).is_some());
        assert!(matcher.match_rule("WHOLE FOODS", TransactionType::Expense).is_none());
    }

    #[test]
    fn broken_regex_is_skipped() {
        let matcher = RuleMatcher::new(vec![
            make_rule(1, "(unclosed", MatchType::Regex, 3),
            make_rule(2, "unclosed", MatchType::Contains, 4),
        ]);
        assert_eq!(matcher.len(), 1);
        assert_eq!(
            category_of(matcher.match_rule("(UNCLOSED", TransactionType::Expense)),
            Some(4)
        );
    }

    #[test]
    fn exact_beats_newer_contains() {
        let matcher = RuleMatcher::new(vec![
            make_rule(9, "uber", MatchType::Contains, 1),
            make_rule(1, "uber eats", MatchType::Exact, 2),
        ]);
        assert_eq!(
            category_of(matcher.match_rule("UBER EATS", TransactionType::Expense)),
            Some(2)
        );
    }

    #[test]
    fn newest_contains_wins() {
        let matcher = RuleMatcher::new(vec![
            make_rule(1, "uber", MatchType::Contains, 1),
            make_rule(2, "uber eats", MatchType::Contains, 2),
        ]);
        assert_eq!(
            category_of(matcher.match_rule("UBER EATS SF", TransactionType::Expense)),
            Some(2)
        );
        assert_eq!(
            category_of(matcher.match_rule("UBER TRIP", TransactionType::Expense)),
            Some(1)
        );
    }

    #[test]
    fn rule_without_target_for_type_is_passed_over() {
        let mut income = CategorizationRule::new(UserId(1), "acme", MatchType::Contains, AppliesTo::Income);
        income.id = Some(RuleId(5));
        income.income_source_id = Some(IncomeSourceId(8));
        let matcher = RuleMatcher::new(vec![income, make_rule(1, "acme", MatchType::Contains, 6)]);

        assert_eq!(
            category_of(matcher.match_rule("ACME PAYROLL", TransactionType::Expense)),
            Some(6)
        );
        let m = matcher.match_rule("ACME PAYROLL", TransactionType::Income).unwrap();
        assert_eq!(m.assignment, Assignment::IncomeSource(IncomeSourceId(8)));
        assert_eq!(m.rule.id, Some(RuleId(5)));
    }

    #[test]
    fn empty_text_never_matches() {
        let matcher = RuleMatcher::new(vec![make_rule(1, ".*", MatchType::Regex, 1)]);
        assert!(matcher.match_rule("   ", TransactionType::Expense).is_none());
    }
}
