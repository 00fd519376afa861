//! Shared error taxonomy for the grading core.
//!
//! One enum per `spec.md` §7's error kinds, reused by every downstream crate
//! instead of each crate growing its own ad-hoc error type.

use thiserror::Error;

/// Semantic error kinds for the grading pipeline.
///
/// These map 1:1 onto `spec.md` §7: `ValidationError`, `NotFoundError`,
/// `ConflictError`, `DependencyError`, `IntegrityError`, `Cancelled`.
#[derive(Error, Debug)]
pub enum GradingError {
    /// Malformed input: bad id, missing required field, rubric authoring
    /// mistake. Surfaced directly to the caller, never logged as a system
    /// failure.
    #[error("validation error: {0}")]
    Validation(String),

    /// Referenced entity absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate key or concurrent update. Upsert paths absorb these
    /// silently; anything else surfaces them.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The LLM adapter or a storage dependency failed.
    #[error("dependency error: {0}")]
    Dependency(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Audit hash mismatch, unexpected unique-constraint violation. Fatal to
    /// the current operation; never silently swallowed.
    #[error("integrity error: {0}")]
    Integrity(String),

    /// Pool shutdown or caller cancellation. Not a user-visible error — the
    /// operation simply did not complete.
    #[error("operation cancelled")]
    Cancelled,
}

impl GradingError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::Integrity(msg.into())
    }

    pub fn dependency<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Dependency(Box::new(err))
    }

    /// True for errors that should never be logged as a system failure
    /// (`spec.md` §7's "surfaced directly to the caller" kinds).
    pub fn is_caller_fault(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, GradingError>;
