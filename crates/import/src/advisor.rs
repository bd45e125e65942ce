use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tally_core::{is_sentinel_name, Money};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error("No category advisor is configured")]
    Unavailable,
    #[error("Advisor misconfigured: {0}")]
    Misconfigured(String),
    #[error("Advisor failed: {0}")]
    Failed(String),
}

/// What an advisor sees about one unresolved expense.
#[derive(Debug, Clone, Serialize)]
pub struct SuggestionRequest {
    pub merchant: Option<String>,
    pub description: String,
    pub amount: Money,
    /// Names of the user's existing, non-sentinel categories.
    pub known_categories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub category_name: String,
    pub confidence: f32,
    pub rationale: Option<String>,
}

/// Abstraction over an external category suggester.
/// Suggestions are advisory; nothing is assigned until a user accepts one.
#[async_trait]
pub trait CategoryAdvisor: Send + Sync {
    async fn suggest(&self, request: &SuggestionRequest) -> Result<Suggestion, AdvisorError>;
}

// ── Mock backend (always available, used for tests) ───────────────────────────

/// Returns a pre-set suggestion, or fails when built with [`MockAdvisor::failing`].
pub struct MockAdvisor {
    pub suggestion: Option<Suggestion>,
}

impl MockAdvisor {
    pub fn new(category_name: impl Into<String>, confidence: f32) -> Self {
        Self {
            suggestion: Some(Suggestion {
                category_name: category_name.into(),
                confidence,
                rationale: None,
            }),
        }
    }

    pub fn failing() -> Self {
        Self { suggestion: None }
    }
}

#[async_trait]
impl CategoryAdvisor for MockAdvisor {
    async fn suggest(&self, _request: &SuggestionRequest) -> Result<Suggestion, AdvisorError> {
        self.suggestion
            .clone()
            .ok_or_else(|| AdvisorError::Failed("mock advisor set to fail".to_string()))
    }
}

// ──────────────────────────────────────────────────────────────────────────────

/// Asks `advisor` for a suggestion.
///
/// `None` means the caller asked for advice with no advisor configured, which
/// is [`AdvisorError::Unavailable`]. Suggestions naming a sentinel category are
/// rejected and confidence is clamped to `0.0..=1.0`.
pub async fn advise(
    advisor: Option<&dyn CategoryAdvisor>,
    request: &SuggestionRequest,
) -> Result<Suggestion, AdvisorError> {
    let advisor = advisor.ok_or(AdvisorError::Unavailable)?;
    let mut suggestion = advisor.suggest(request).await?;

    let name = suggestion.category_name.trim();
    if name.is_empty() {
        return Err(AdvisorError::Failed("empty category name".to_string()));
    }
    if is_sentinel_name(name) {
        return Err(AdvisorError::Failed(format!("suggested reserved category '{name}'")));
    }
    suggestion.category_name = name.to_string();
    suggestion.confidence = suggestion.confidence.clamp(0.0, 1.0);
    Ok(suggestion)
}
