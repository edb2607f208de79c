//! Error types shared across the crate

use crate::parser::ParseError;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum SuperoptError {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A size, counterexample or iteration budget ran out
    #[error("search exhausted: {0}")]
    SearchExhausted(String),

    /// The solver timed out or answered neither sat nor unsat
    #[error("solver returned unknown: {0}")]
    SolverUnknown(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl SuperoptError {
    pub fn exhausted(message: impl Into<String>) -> Self {
        SuperoptError::SearchExhausted(message.into())
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        SuperoptError::SolverUnknown(message.into())
    }

    /// True for failures that simply mean "no result", as opposed to bugs or I/O
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SuperoptError::SearchExhausted(_) | SuperoptError::SolverUnknown(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SuperoptError>;

/// Log and abort. Reached only when an internal consistency check fails.
pub fn invariant_violation(message: impl AsRef<str>) -> ! {
    error!("{}", SuperoptError::InvariantViolation(message.as_ref().to_string()));
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(SuperoptError::exhausted("size").is_recoverable());
        assert!(SuperoptError::unknown("timeout").is_recoverable());
        assert!(!SuperoptError::InvariantViolation("bad".into()).is_recoverable());
    }

    #[test]
    fn test_display() {
        let e = SuperoptError::exhausted("more than 100 counterexamples");
        assert_eq!(
            e.to_string(),
            "search exhausted: more than 100 counterexamples"
        );
    }
}
