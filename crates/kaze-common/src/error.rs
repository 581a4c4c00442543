//! Error types for KazeDB.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::types::PageId;

/// Result type alias using KazeError.
pub type Result<T> = std::result::Result<T, KazeError>;

/// Stable status codes carried by every error.
///
/// The textual messages may change between releases; the codes are the
/// contract consumed by callers (the REPL maps them to user-facing text).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusCode {
    // Storage
    PageFull,
    InvalidPageType,
    InvalidRecordFormat,
    RecordTooLarge,
    NoFreeFrames,
    IoRead,
    IoWrite,

    // Index
    DuplicateKey,
    IndexNotFound,

    // Query
    SyntaxError,
    TableNotFound,
    TableExists,
    ColumnNotFound,
    DuplicateColumn,
    AmbiguousColumn,
    TypeError,
    InvalidConstraint,
    UnsupportedType,
    NotImplemented,

    // Record
    SchemaMismatch,

    // Internal
    InternalError,
    InvalidArgument,
}

/// Errors that can occur in KazeDB operations.
#[derive(Debug, Error)]
pub enum KazeError {
    // Storage errors
    #[error("Page full: {page_id}")]
    PageFull { page_id: PageId },

    #[error("Invalid page type on page {page_id}: found {found}")]
    InvalidPageType { page_id: PageId, found: u8 },

    #[error("Invalid record format: {0}")]
    InvalidRecordFormat(String),

    #[error("Record too large: {size} bytes")]
    RecordTooLarge { size: usize },

    #[error("No free frames in buffer pool")]
    NoFreeFrames,

    #[error("Read failed on {} page {page_id}: {source}", path.display())]
    IoRead {
        path: PathBuf,
        page_id: PageId,
        source: std::io::Error,
    },

    #[error("Write failed on {} page {page_id}: {source}", path.display())]
    IoWrite {
        path: PathBuf,
        page_id: PageId,
        source: std::io::Error,
    },

    // Index errors
    #[error("Duplicate key in index{}", fmt_context(.0))]
    DuplicateKey(String),

    #[error("Index not found: {0}")]
    IndexNotFound(String),

    // Query errors
    #[error("Syntax error: {0}")]
    SyntaxError(String),

    #[error("Table not found: {name}{}", fmt_context(.clause))]
    TableNotFound { name: String, clause: String },

    #[error("Table already exists: {0}")]
    TableExists(String),

    #[error("Column not found: {name}{}", fmt_context(.clause))]
    ColumnNotFound { name: String, clause: String },

    #[error("Duplicate column: {0}")]
    DuplicateColumn(String),

    #[error("Ambiguous column reference: {name}{}", fmt_context(.clause))]
    AmbiguousColumn { name: String, clause: String },

    #[error("Type error in {clause}: expected {expected}, got {value}")]
    TypeError {
        clause: String,
        expected: String,
        value: String,
    },

    #[error("Invalid constraint: {0}")]
    InvalidConstraint(String),

    #[error("Unsupported type: {0}")]
    UnsupportedType(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    // Record errors
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

fn fmt_context(context: &str) -> String {
    if context.is_empty() {
        String::new()
    } else {
        format!(" ({context})")
    }
}

impl KazeError {
    /// Returns the stable status code for this error.
    pub fn code(&self) -> StatusCode {
        match self {
            KazeError::PageFull { .. } => StatusCode::PageFull,
            KazeError::InvalidPageType { .. } => StatusCode::InvalidPageType,
            KazeError::InvalidRecordFormat(_) => StatusCode::InvalidRecordFormat,
            KazeError::RecordTooLarge { .. } => StatusCode::RecordTooLarge,
            KazeError::NoFreeFrames => StatusCode::NoFreeFrames,
            KazeError::IoRead { .. } => StatusCode::IoRead,
            KazeError::IoWrite { .. } => StatusCode::IoWrite,
            KazeError::DuplicateKey(_) => StatusCode::DuplicateKey,
            KazeError::IndexNotFound(_) => StatusCode::IndexNotFound,
            KazeError::SyntaxError(_) => StatusCode::SyntaxError,
            KazeError::TableNotFound { .. } => StatusCode::TableNotFound,
            KazeError::TableExists(_) => StatusCode::TableExists,
            KazeError::ColumnNotFound { .. } => StatusCode::ColumnNotFound,
            KazeError::DuplicateColumn(_) => StatusCode::DuplicateColumn,
            KazeError::AmbiguousColumn { .. } => StatusCode::AmbiguousColumn,
            KazeError::TypeError { .. } => StatusCode::TypeError,
            KazeError::InvalidConstraint(_) => StatusCode::InvalidConstraint,
            KazeError::UnsupportedType(_) => StatusCode::UnsupportedType,
            KazeError::NotImplemented(_) => StatusCode::NotImplemented,
            KazeError::SchemaMismatch(_) => StatusCode::SchemaMismatch,
            KazeError::Internal(_) => StatusCode::InternalError,
            KazeError::InvalidArgument(_) => StatusCode::InvalidArgument,
        }
    }

    /// Builds a `TableNotFound` error without clause context.
    pub fn table_not_found(name: impl Into<String>) -> Self {
        KazeError::TableNotFound {
            name: name.into(),
            clause: String::new(),
        }
    }

    /// Builds a `TableNotFound` error annotated with the clause being bound.
    pub fn table_not_found_in(name: impl Into<String>, clause: impl Into<String>) -> Self {
        KazeError::TableNotFound {
            name: name.into(),
            clause: clause.into(),
        }
    }

    /// Builds a `ColumnNotFound` error without clause context.
    pub fn column_not_found(name: impl Into<String>) -> Self {
        KazeError::ColumnNotFound {
            name: name.into(),
            clause: String::new(),
        }
    }

    /// Builds a `ColumnNotFound` error annotated with the clause being bound.
    pub fn column_not_found_in(name: impl Into<String>, clause: impl Into<String>) -> Self {
        KazeError::ColumnNotFound {
            name: name.into(),
            clause: clause.into(),
        }
    }

    /// Builds a `TypeError` with the clause, expected type, and offending value.
    pub fn type_error(
        clause: impl Into<String>,
        expected: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        KazeError::TypeError {
            clause: clause.into(),
            expected: expected.into(),
            value: value.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            KazeError::PageFull { page_id: 7 }.code(),
            StatusCode::PageFull
        );
        assert_eq!(KazeError::NoFreeFrames.code(), StatusCode::NoFreeFrames);
        assert_eq!(
            KazeError::DuplicateKey(String::new()).code(),
            StatusCode::DuplicateKey
        );
        assert_eq!(
            KazeError::table_not_found("users").code(),
            StatusCode::TableNotFound
        );
        assert_eq!(
            KazeError::type_error("WHERE clause", "INTEGER", "abc").code(),
            StatusCode::TypeError
        );
    }

    #[test]
    fn test_display_messages() {
        let err = KazeError::PageFull { page_id: 42 };
        assert_eq!(err.to_string(), "Page full: 42");

        let err = KazeError::table_not_found_in("users", "FROM clause");
        assert_eq!(err.to_string(), "Table not found: users (FROM clause)");

        let err = KazeError::table_not_found("users");
        assert_eq!(err.to_string(), "Table not found: users");

        let err = KazeError::type_error("INSERT", "INTEGER", "xyz");
        assert_eq!(
            err.to_string(),
            "Type error in INSERT: expected INTEGER, got xyz"
        );
    }

    #[test]
    fn test_io_error_context() {
        let source = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let err = KazeError::IoRead {
            path: PathBuf::from("/tmp/kaze.db"),
            page_id: 3,
            source,
        };
        let text = err.to_string();
        assert!(text.contains("/tmp/kaze.db"));
        assert!(text.contains("page 3"));
        assert_eq!(err.code(), StatusCode::IoRead);
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<KazeError>();
    }
}
