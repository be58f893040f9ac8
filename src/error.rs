//! Error types for the table log

use thiserror::Error;

/// Result type for table log operations
pub type Result<T> = std::result::Result<T, TableError>;

/// Table log errors
#[derive(Error, Debug)]
pub enum TableError {
    #[error("Commit conflict on table {table_id}: read version {read_version:?}, current version {current_version:?}")]
    Conflict {
        table_id: String,
        read_version: Option<i64>,
        current_version: Option<i64>,
    },

    #[error("Schema change is not backward compatible: {}", issues.join("; "))]
    SchemaIncompatible { issues: Vec<String> },

    #[error("Retention of {requested_hours}h is below the minimum of {minimum_hours}h; pass force to override")]
    RetentionViolation { requested_hours: i64, minimum_hours: i64 },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Table already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid schema or request: {0}")]
    Validation(String),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Gave up after {attempts} conflicting attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TableError {
    /// Whether the caller may re-read the table and retry the whole operation
    pub fn is_conflict(&self) -> bool {
        matches!(self, TableError::Conflict { .. })
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        TableError::Validation(msg.into())
    }
}
