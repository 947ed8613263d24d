//! Relabel configuration errors.

use thiserror::Error;

use crate::Action;

/// Errors raised while parsing or validating a relabel rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelabelError {
    #[error("invalid regex {pattern:?}: {message}")]
    InvalidRegex { pattern: String, message: String },

    #[error("unknown relabel action {0:?}")]
    UnknownAction(String),

    #[error("relabel configuration for {0} action requires 'target_label' value")]
    MissingTargetLabel(Action),

    #[error("{label:?} is invalid 'target_label' for {action} action")]
    InvalidTargetLabel { action: Action, label: String },

    #[error("relabel configuration for hashmod requires non-zero modulus")]
    ZeroModulus,

    #[error("{field} is not allowed for {action} action")]
    UnexpectedField { action: Action, field: &'static str },
}
