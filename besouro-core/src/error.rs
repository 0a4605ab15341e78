//! Error types for besouro-core

use crate::types::ActionId;
use thiserror::Error;

/// Main error type for the besouro-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A rule source is missing or malformed
    #[error("rule set error in {source_name}: {message}")]
    RuleSet {
        source_name: String,
        message: String,
    },

    /// Rule evaluation or query execution failed
    #[error("inference error: {0}")]
    Inference(String),

    /// An action was linked a second time
    #[error("action {0} is already linked")]
    AlreadyLinked(ActionId),

    /// Malformed action log record
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn rule_set(source_name: &str, message: impl Into<String>) -> Self {
        Error::RuleSet {
            source_name: source_name.to_string(),
            message: message.into(),
        }
    }
}

/// Result type alias for besouro-core
pub type Result<T> = std::result::Result<T, Error>;
