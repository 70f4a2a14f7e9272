//! Error types for HearthDB
//!
//! This module defines all error types used throughout the database engine.

use thiserror::Error;

/// The main error type for HearthDB
#[derive(Error, Debug)]
pub enum Error {
    // ========== Lexer Errors ==========
    #[error("Lexer error: unexpected character '{0}' at position {1}")]
    UnexpectedCharacter(char, usize),

    #[error("Lexer error: unterminated string literal starting at position {0}")]
    UnterminatedString(usize),

    #[error("Lexer error: invalid number format at position {0}")]
    InvalidNumber(usize),

    // ========== Parser Errors ==========
    #[error("Parse error: unexpected token '{found}', expected {expected}")]
    UnexpectedToken { expected: String, found: String },

    #[error("Parse error: unexpected end of input, expected {0}")]
    UnexpectedEof(String),

    #[error("Parse error: missing close bracket in set-operation query")]
    MissingCloseBracket,

    // ========== Catalog Errors ==========
    #[error("Catalog error: table '{0}' not found")]
    TableNotFound(String),

    #[error("Catalog error: table '{0}' already exists")]
    TableAlreadyExists(String),

    #[error("Catalog error: column '{0}' not found")]
    ColumnNotFound(String),

    #[error("Catalog error: column reference '{0}' is ambiguous")]
    AmbiguousColumn(String),

    #[error("Catalog error: index '{0}' not found")]
    IndexNotFound(String),

    #[error("Catalog error: index '{0}' already exists")]
    IndexAlreadyExists(String),

    // ========== Query Compilation Errors ==========
    #[error("Query error: expression not in aggregate or GROUP BY columns: {0}")]
    InvalidGroupBy(String),

    #[error("Query error: invalid HAVING expression: {0}")]
    InvalidHaving(String),

    #[error("Query error: invalid ORDER BY expression: {0}")]
    InvalidOrderBy(String),

    #[error("Query error: ORDER BY item must appear in the DISTINCT select list: {0}")]
    InvalidOrderByInDistinctSelect(String),

    #[error("Query error: set operation requires matching column counts ({0} vs {1})")]
    ColumnCountMismatch(usize, usize),

    // ========== Type Errors ==========
    #[error("Type error: cannot convert {from} to {to}")]
    TypeMismatch { from: String, to: String },

    #[error("Type error: null value not allowed for column '{0}'")]
    NullNotAllowed(String),

    // ========== Execution Errors ==========
    #[error("Execution error: division by zero")]
    DivisionByZero,

    #[error("Execution error: constraint violation - {0}")]
    ConstraintViolation(String),

    #[error("Execution error: column count does not match value count")]
    ValueCountMismatch,

    // ========== Statement Errors ==========
    #[error("Statement error: invalid prepared statement")]
    InvalidPreparedStatement,

    #[error("Statement error: operation not supported: {0}")]
    OperationNotSupported(String),

    // ========== Session Errors ==========
    #[error("Session error: access is denied, session is closed")]
    SessionClosed,

    #[error("Session error: savepoint '{0}' not found")]
    SavepointNotFound(String),

    // ========== I/O Errors ==========
    #[error("I/O error during {op} on '{path}': {source}")]
    FileIo {
        op: &'static str,
        path: String,
        source: std::io::Error,
    },

    #[error("Storage error: corrupted row at position {0}")]
    CorruptedRow(i64),

    #[error("Database error: database is read-only")]
    ReadOnly,

    // ========== Internal Errors ==========
    #[error("Internal error: assertion failed: {0}")]
    Internal(String),
}

/// Result type alias for HearthDB operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Stable short code used when reporting an error across the
    /// session boundary.
    pub fn code(&self) -> &'static str {
        match self {
            Error::UnexpectedCharacter(..)
            | Error::UnterminatedString(..)
            | Error::InvalidNumber(..)
            | Error::UnexpectedToken { .. }
            | Error::UnexpectedEof(..)
            | Error::MissingCloseBracket => "syntax",
            Error::TableNotFound(..)
            | Error::TableAlreadyExists(..)
            | Error::ColumnNotFound(..)
            | Error::AmbiguousColumn(..)
            | Error::IndexNotFound(..)
            | Error::IndexAlreadyExists(..)
            | Error::InvalidGroupBy(..)
            | Error::InvalidHaving(..)
            | Error::InvalidOrderBy(..)
            | Error::InvalidOrderByInDistinctSelect(..)
            | Error::ColumnCountMismatch(..)
            | Error::TypeMismatch { .. }
            | Error::ValueCountMismatch => "semantic",
            Error::NullNotAllowed(..) | Error::ConstraintViolation(..) => "constraint",
            Error::DivisionByZero => "execution",
            Error::InvalidPreparedStatement => "invalid_statement",
            Error::OperationNotSupported(..) => "not_supported",
            Error::SessionClosed => "access_denied",
            Error::SavepointNotFound(..) => "savepoint",
            Error::FileIo { .. } | Error::CorruptedRow(..) | Error::ReadOnly => "io",
            Error::Internal(..) => "internal",
        }
    }
}
