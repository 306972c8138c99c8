//! Errors raised by models and by identifier parsing.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Why a command or an identifier was refused.
///
/// A model returns one of these from `Model::validate`; the engine reports it
/// to the caller and journals nothing. Identifier and partition parsing use
/// `InvalidId`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The command's own data is malformed.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The command is well formed but the current state forbids it.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
