//! Error types for the archivist core.
//!
//! Every error maps to a structured [`ErrorCode`] so that problems found
//! during a scan pass can be recorded on catalog rows and surfaced to
//! operators instead of only being logged.

use crate::types::Tier;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the archivist.
#[derive(Debug, Error)]
pub enum ArchivistError {
    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Duplicate archive location: {0}")]
    DuplicateArchive(PathBuf),

    #[error("Cannot resolve root for {category}: {path}")]
    UnresolvableRoot { category: String, path: PathBuf },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Inaccessible {tier} location {path}: {message}")]
    Inaccessible {
        tier: Tier,
        path: PathBuf,
        message: String,
    },

    // Sidecar errors
    #[error("Metadata unavailable for {path}: {message}")]
    Metadata { path: PathBuf, message: String },

    // Database errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Identity errors
    #[error("Duplicate model hash {hash} in rows {model_ids:?}")]
    DuplicateHash { hash: String, model_ids: Vec<i64> },

    #[error("Model files have different names for hash {hash}: {paths:?}")]
    InconsistentFilename { hash: String, paths: Vec<PathBuf> },

    #[error("Hash {hash} already reconciled in scan {scan_id}")]
    ReconciledTwice { hash: String, scan_id: String },

    #[error("Model not found: {model_id}")]
    ModelNotFound { model_id: i64 },

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for archivist operations.
pub type Result<T> = std::result::Result<T, ArchivistError>;

/// Structured error code recorded on catalog rows and in scan reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Inaccessible,
    MetadataUnavailable,
    ModelMissing,
    DuplicateHash,
    DuplicateArchive,
    InconsistentFilename,
    ReconciledTwice,
    Configuration,
    Database,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Inaccessible => "INACCESSIBLE",
            ErrorCode::MetadataUnavailable => "METADATA_UNAVAILABLE",
            ErrorCode::ModelMissing => "MODEL_MISSING",
            ErrorCode::DuplicateHash => "DUPLICATE_HASH",
            ErrorCode::DuplicateArchive => "DUPLICATE_ARCHIVE",
            ErrorCode::InconsistentFilename => "INCONSISTENT_FILENAME",
            ErrorCode::ReconciledTwice => "RECONCILED_TWICE",
            ErrorCode::Configuration => "CONFIGURATION",
            ErrorCode::Database => "DATABASE",
            ErrorCode::Internal => "INTERNAL",
        }
    }

    /// Identity errors freeze a row until an operator clears them.
    pub fn blocks_mutation(&self) -> bool {
        matches!(
            self,
            ErrorCode::DuplicateHash | ErrorCode::InconsistentFilename | ErrorCode::ReconciledTwice
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Conversion implementations for common error types

impl From<std::io::Error> for ArchivistError {
    fn from(err: std::io::Error) -> Self {
        ArchivistError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for ArchivistError {
    fn from(err: serde_json::Error) -> Self {
        ArchivistError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for ArchivistError {
    fn from(err: rusqlite::Error) -> Self {
        ArchivistError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl ArchivistError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        ArchivistError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        ArchivistError::Config {
            message: message.into(),
        }
    }

    /// Structured code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            ArchivistError::Config { .. } | ArchivistError::UnresolvableRoot { .. } => {
                ErrorCode::Configuration
            }
            ArchivistError::DuplicateArchive(_) => ErrorCode::DuplicateArchive,
            ArchivistError::Io { .. } | ArchivistError::Inaccessible { .. } => {
                ErrorCode::Inaccessible
            }
            ArchivistError::Metadata { .. } | ArchivistError::Json { .. } => {
                ErrorCode::MetadataUnavailable
            }
            ArchivistError::Database { .. } => ErrorCode::Database,
            ArchivistError::DuplicateHash { .. } => ErrorCode::DuplicateHash,
            ArchivistError::InconsistentFilename { .. } => ErrorCode::InconsistentFilename,
            ArchivistError::ReconciledTwice { .. } => ErrorCode::ReconciledTwice,
            ArchivistError::ModelNotFound { .. } | ArchivistError::Other(_) => {
                ErrorCode::Internal
            }
        }
    }

    /// Whether this error aborts the pass that hit it.
    ///
    /// Everything else is recorded and the pass continues.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ArchivistError::Config { .. }
                | ArchivistError::DuplicateArchive(_)
                | ArchivistError::UnresolvableRoot { .. }
                | ArchivistError::Database { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ArchivistError::DuplicateArchive(PathBuf::from("/archive"));
        assert_eq!(err.to_string(), "Duplicate archive location: /archive");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ArchivistError::DuplicateHash {
                hash: "abc".into(),
                model_ids: vec![1, 2],
            }
            .code(),
            ErrorCode::DuplicateHash
        );
        assert_eq!(
            ArchivistError::config("missing archive root").code(),
            ErrorCode::Configuration
        );
    }

    #[test]
    fn test_fatal_errors() {
        assert!(ArchivistError::DuplicateArchive(PathBuf::from("/a")).is_fatal());
        assert!(!ArchivistError::Metadata {
            path: PathBuf::from("/a.metadata.json"),
            message: "bad json".into(),
        }
        .is_fatal());
    }

    #[test]
    fn test_error_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::InconsistentFilename).unwrap();
        assert_eq!(json, "\"INCONSISTENT_FILENAME\"");
        assert!(ErrorCode::DuplicateHash.blocks_mutation());
        assert!(ErrorCode::ReconciledTwice.blocks_mutation());
        assert!(!ErrorCode::ModelMissing.blocks_mutation());
    }
}
