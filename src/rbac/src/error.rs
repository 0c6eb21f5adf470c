//! Error types for role resolution and decision caching

use thiserror::Error;

/// Role resolver and decision cache errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RbacError {
    /// Malformed grouping tuple or policy rule. Always fatal: a dropped rule
    /// turns into a false-negative authorization decision.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Unknown role or domain. Queries recover from this locally and answer
    /// `false` / empty.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Decision cache configured without room for a single entry
    #[error("Invalid cache capacity {0}: capacity must be greater than zero")]
    Capacity(usize),

    /// A matcher could not compile a pattern
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    /// A deadline-bounded query was abandoned
    #[error("Deadline exceeded while resolving role links")]
    DeadlineExceeded,

    /// Rule evaluation failed
    #[error("Evaluation failed: {0}")]
    Evaluation(String),
}

/// Result type for role resolution and caching operations
pub type Result<T> = std::result::Result<T, RbacError>;
