//! Error types for Rategate.

use thiserror::Error;

use crate::engine::ExceededLimit;
use crate::expression::ExpressionError;

/// Main error type for Rategate operations.
#[derive(Error, Debug)]
pub enum RateGateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A rule or element used a name reserved for a tree root
    #[error("Configuration error: '{name}' is a reserved root name and may not name a rate limit")]
    ReservedName { name: String },

    /// A node was given the same name as its parent
    #[error("Configuration error: '{name}' has the same name as its parent")]
    SelfReference { name: String },

    /// A name appeared twice within one source tree
    #[error("Configuration error: duplicate name '{name}' in tree '{tree}'")]
    DuplicateNode { name: String, tree: String },

    /// Runtime registration of an id that is already present
    #[error("Element '{id}' is already registered")]
    AlreadyRegistered { id: String },

    /// Lookup of an element id that is not in the live tree
    #[error("Element '{id}' is not registered")]
    UnknownElement { id: String },

    /// Condition expression errors, always raised while building
    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),

    /// Errors raised by a limiter implementation
    #[error("Limiter error: {0}")]
    Limiter(String),

    /// One or more limits were exceeded for a request
    #[error("Rate limit exceeded: {}", format_causes(.0))]
    LimitExceeded(Vec<ExceededLimit>),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

fn format_causes(causes: &[ExceededLimit]) -> String {
    causes
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result type alias for Rategate operations.
pub type Result<T> = std::result::Result<T, RateGateError>;
