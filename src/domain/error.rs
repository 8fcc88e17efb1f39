use thiserror::Error;

/// Violations of the feed model's own rules.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("post id must be positive, got {0}")]
    NonPositiveId(i64),
    #[error("content type selector `{0}` names no type")]
    EmptySelector(String),
    #[error("plan does not fit the window: {0}")]
    PlanWindow(String),
    #[error("window at offset {offset} with limit {limit} runs past the end of the index range")]
    WindowOverflow { offset: usize, limit: usize },
}
