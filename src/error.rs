//! Error types for query planning

use thiserror::Error;

/// Main error type for scheduling operations
#[derive(Error, Debug)]
pub enum PlanError {
    /// The query document could not be parsed, a required field is missing,
    /// or the manifest is not a supported format-version
    #[error("bad document: {0}")]
    BadDocument(String),

    /// The `function` field names a query shape without a handler
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    /// A violated precondition, e.g. a non-positive task size. Indicates a
    /// caller bug rather than a malformed document
    #[error("logic error: {0}")]
    Logic(String),

    /// Packing a task bundle or header failed
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Specialized Result type for planning operations
pub type Result<T> = std::result::Result<T, PlanError>;

impl From<serde_json::Error> for PlanError {
    fn from(err: serde_json::Error) -> Self {
        PlanError::BadDocument(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for PlanError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        PlanError::Serialization(err.to_string())
    }
}

impl From<rmp::encode::ValueWriteError> for PlanError {
    fn from(err: rmp::encode::ValueWriteError) -> Self {
        PlanError::Serialization(err.to_string())
    }
}
