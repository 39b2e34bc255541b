//! Error types for shared tracktally types

use thiserror::Error;

/// Result type alias for shared-type operations
pub type Result<T> = std::result::Result<T, TallyError>;

/// Errors raised while validating or decoding the shared tables
#[derive(Error, Debug)]
pub enum TallyError {
    #[error("Invalid playlist status: {0} (expected 'fetched' or 'skipped')")]
    InvalidStatus(String),

    #[error("Invalid record for '{id}': {reason}")]
    InvalidRecord { id: String, reason: String },

    #[error("Track table inconsistent with playlist table: {0}")]
    Inconsistent(String),
}

impl TallyError {
    /// Create an invalid record error
    pub fn invalid_record(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            id: id.into(),
            reason: reason.into(),
        }
    }
}
