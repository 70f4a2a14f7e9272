//! Session command surface
//!
//! Every interaction with a session goes through a `Command` and comes
//! back as a `Response`. Failures are carried in `Response::Error`, so
//! callers never see a raw `Err` across this boundary.

use crate::error::Error;
use crate::executor::{ColumnMeta, ResultSet};
use crate::storage::Value;

/// How a transaction is ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndTransactionKind {
    Commit,
    Rollback,
    CommitAndChain,
    RollbackAndChain,
}

/// Session attribute assignments.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionAttribute {
    Autocommit(bool),
    MaxRows(usize),
}

/// A request issued against a session.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Parse and run one SQL statement
    Execute { sql: String },
    /// Compile a statement for later execution
    Prepare { sql: String },
    /// Run a previously prepared statement with bound parameters
    ExecutePrepared { id: u64, params: Vec<Value> },
    /// Run a prepared statement once per parameter row
    ExecuteBatch { id: u64, rows: Vec<Vec<Value>> },
    /// Release a prepared statement handle
    FreeStatement { id: u64 },
    EndTransaction(EndTransactionKind),
    SetAttribute(SessionAttribute),
    Disconnect,
}

/// What a command produced.
#[derive(Debug, PartialEq)]
pub enum Response {
    RowSet(ResultSet),
    UpdateCount(usize),
    /// `columns` describes the result set a query will produce; it is
    /// empty for statements that return an update count.
    PreparedAck {
        id: u64,
        param_count: usize,
        columns: Vec<ColumnMeta>,
    },
    /// Per-row update counts; -2 marks a row that produced a result set.
    /// `error` is set when the batch stopped early.
    Batch {
        counts: Vec<i32>,
        error: Option<String>,
    },
    Ok,
    Error { message: String, code: &'static str },
}

impl Response {
    pub fn from_error(e: Error) -> Self {
        Response::Error {
            code: e.code(),
            message: e.to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error { .. })
    }
}
