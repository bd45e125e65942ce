pub mod advisor;
pub mod classifier;
pub mod csv;
pub mod entry;
pub mod fingerprint;
pub mod learner;
pub mod pipeline;
pub mod rules;
pub(crate) mod util;

#[cfg(test)]
pub(crate) mod testing;

pub use advisor::{advise, AdvisorError, CategoryAdvisor, MockAdvisor, Suggestion, SuggestionRequest};
pub use classifier::{CategoryProposal, Classification, HeuristicClassifier};
pub use csv::{in_period, CsvError, NormalizedRow, ParsedStatement, SignConvention, SourceProfile};
pub use entry::{
    accept_suggestion, delete_transaction, record_manual_transaction, recategorize_transaction,
    replace_splits, EntryError, ManualEntry, Recorded,
};
pub use fingerprint::fingerprint;
pub use learner::{learn_rule, LearnOutcome, SkipReason};
pub use pipeline::{
    AssignmentSource, CandidateRow, CommitInput, CommitReport, ImportError, ImportPipeline,
    ImportRequest, ImportState, PreviewReport, RowFailure,
};
pub use rules::{RuleMatch, RuleMatcher};
