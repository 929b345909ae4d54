//! Error types for invigil

use thiserror::Error;

/// Core error type for invigil operations
#[derive(Debug, Error)]
pub enum InvigilError {
    /// Malformed or incomplete input, rejected before any write
    #[error("Validation error: {0}")]
    Validation(String),

    /// State-machine or single-active violation, or a duplicate key that
    /// survived every retry
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Read/write failure against the shared store. Callers recover on their
    /// next scheduled tick rather than retrying inline.
    #[error("Store unavailable: {0}")]
    TransientStore(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl InvigilError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientStore(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientStore(_))
    }
}

pub type Result<T> = std::result::Result<T, InvigilError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_reason() {
        let err = InvigilError::conflict("exam MATH-20261017-001 is already active");
        assert_eq!(
            err.to_string(),
            "Conflict: exam MATH-20261017-001 is already active"
        );
        assert!(err.is_conflict());
        assert!(!err.is_transient());
    }
}
