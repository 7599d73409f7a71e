//! Error types for the classification pipeline
//!
//! Only manifest-level problems are errors. Everything that goes wrong with
//! a single series is recorded on that series as an exclusion rationale.

use thiserror::Error;

/// Pipeline-level errors
#[derive(Error, Debug)]
pub enum IngestError {
    /// Manifest lists no series at all
    #[error("Manifest is empty: {0}")]
    EmptyManifest(String),

    /// Manifest cannot be parsed, or none of its entries is readable
    #[error("Malformed manifest: {0}")]
    MalformedManifest(String),

    /// Reference document cannot be used
    #[error("Reference document error: {0}")]
    Reference(String),

    /// Task vocabulary fetch or parse failure
    #[error("Task vocabulary error: {0}")]
    Vocabulary(String),

    /// Common errors (config, IO, JSON)
    #[error(transparent)]
    Common(#[from] bidsmith_common::Error),
}

impl From<std::io::Error> for IngestError {
    fn from(err: std::io::Error) -> Self {
        IngestError::Common(bidsmith_common::Error::Io(err))
    }
}

/// Result type for pipeline operations
pub type IngestResult<T> = std::result::Result<T, IngestError>;
