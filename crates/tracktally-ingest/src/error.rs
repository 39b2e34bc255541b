//! Error types for the ingestion pipeline
//!
//! [`FetchError`] covers everything that can go wrong while fetching one page
//! of a playlist. Those errors never leave the fetcher: the retry loop absorbs
//! them and a playlist that exhausts its attempts is reported as skipped.
//! [`IngestError`] covers run-level failures, of which persistence failures
//! are fatal.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Failure of a single page request
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Network failure, timeout or proxy relay failure
    #[error("transport error: {0}")]
    Transport(String),

    /// The catalog reported an unauthorized or expired token
    #[error("authorization error: {0}")]
    Auth(String),

    /// The catalog returned a well-formed error payload
    #[error("catalog API error: {0}")]
    Api(String),

    /// The response body was not a valid page
    #[error("malformed response: {0}")]
    Decode(String),

    /// The token endpoint could not supply a credential
    #[error("credentials unavailable: {0}")]
    AuthUnavailable(String),
}

impl FetchError {
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    pub fn decode(err: impl std::fmt::Display) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Failure reported by a token source
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Endpoint unreachable or answered with a server error; may recover
    #[error("token endpoint unreachable: {0}")]
    Unreachable(String),

    /// Endpoint refused the client credentials; will not recover
    #[error("token endpoint rejected client credentials: {0}")]
    Rejected(String),
}

/// Result type alias for run-level operations
pub type Result<T> = std::result::Result<T, IngestError>;

/// Run-level errors
#[derive(Error, Debug)]
pub enum IngestError {
    /// Checkpoint read or write failed; the previous checkpoint is left intact
    #[error("Checkpoint persistence failed for '{path}': {message}")]
    Persistence { path: PathBuf, message: String },

    /// Input playlist file could not be read
    #[error("Failed to read playlist IDs from '{path}': {message}")]
    Input { path: PathBuf, message: String },

    /// Configuration is missing or invalid
    #[error("Configuration error: {0}. Check your TRACKTALLY_* environment variables or flags.")]
    Config(String),

    /// The token endpoint is permanently unusable
    #[error("Credentials exhausted after {batches_flushed} flushed batches; fix the client credentials and rerun to resume")]
    CredentialsExhausted { batches_flushed: usize },
}

impl IngestError {
    pub fn persistence(path: impl AsRef<Path>, err: impl std::fmt::Display) -> Self {
        Self::Persistence {
            path: path.as_ref().to_path_buf(),
            message: err.to_string(),
        }
    }

    pub fn input(path: impl AsRef<Path>, err: impl std::fmt::Display) -> Self {
        Self::Input {
            path: path.as_ref().to_path_buf(),
            message: err.to_string(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
