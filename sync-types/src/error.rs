//! Error types for record boundary validation.

use thiserror::Error;

/// Errors raised while mapping store records onto typed values.
#[derive(Debug, Error)]
pub enum TypesError {
    /// A required field is absent, null, or empty.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// A field is present but has the wrong shape.
    #[error("invalid field {field}: {reason}")]
    InvalidField {
        /// Name of the offending field.
        field: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// A timestamp could not be parsed.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// JSON (de)serialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
