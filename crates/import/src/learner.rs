use serde::Serialize;
use tally_core::rule::looks_like_identifier;
use tally_core::{
    normalize, Assignment, CategorizationRule, CategoryStore, MatchType, RuleId, RuleStore,
    StoreError, UserId,
};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NoMerchant,
    SentinelTarget,
    IdentifierLikePattern,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "detail")]
pub enum LearnOutcome {
    Created(RuleId),
    Updated(RuleId),
    /// A rule with this pattern already pointed at the same target.
    Unchanged(RuleId),
    Skipped(SkipReason),
}

/// Records a user's (or an accepted suggestion's) assignment for `merchant` as
/// a `contains` rule, so the next import categorizes it the same way.
///
/// An existing rule with the same normalized pattern is retargeted rather than
/// duplicated. Running this twice with the same input is a no-op the second time.
pub async fn learn_rule<S>(
    store: &S,
    user_id: UserId,
    merchant: Option<&str>,
    assignment: Assignment,
) -> Result<LearnOutcome, StoreError>
where
    S: RuleStore + CategoryStore + ?Sized,
{
    let pattern = normalize(merchant.unwrap_or_default());
    if pattern.is_empty() {
        return Ok(LearnOutcome::Skipped(SkipReason::NoMerchant));
    }

    if targets_sentinel(store, user_id, assignment).await? {
        return Ok(LearnOutcome::Skipped(SkipReason::SentinelTarget));
    }

    if looks_like_identifier(&pattern) {
        return Ok(LearnOutcome::Skipped(SkipReason::IdentifierLikePattern));
    }

    match store.find_rule(user_id, MatchType::Contains, &pattern).await? {
        Some(rule) if rule.has_target(assignment) => Ok(LearnOutcome::Unchanged(stored_id(&rule)?)),
        Some(mut rule) => {
            rule.set_target(assignment);
            let updated = store.update_rule(&rule).await?;
            debug!(pattern = %pattern, ?assignment, "Retargeted learned rule");
            Ok(LearnOutcome::Updated(stored_id(&updated)?))
        }
        None => {
            let created = store
                .create_rule(&CategorizationRule::learned(user_id, &pattern, assignment))
                .await?;
            debug!(pattern = %pattern, ?assignment, "Learned new rule");
            Ok(LearnOutcome::Created(stored_id(&created)?))
        }
    }
}

async fn targets_sentinel<S>(store: &S, user_id: UserId, assignment: Assignment) -> Result<bool, StoreError>
where
    S: CategoryStore + ?Sized,
{
    match assignment {
        Assignment::Category(id) => store
            .get_category(user_id, id)
            .await?
            .map(|c| c.is_sentinel())
            .ok_or_else(|| StoreError::NotFound(format!("category {id}"))),
        Assignment::IncomeSource(id) => store
            .get_income_source(user_id, id)
            .await?
            .map(|s| s.is_sentinel())
            .ok_or_else(|| StoreError::NotFound(format!("income source {id}"))),
    }
}

fn stored_id(rule: &CategorizationRule) -> Result<RuleId, StoreError> {
    rule.id
        .ok_or_else(|| StoreError::Backend("stored rule has no id".to_string()))
}
