//! Query execution
//!
//! This module compiles parsed statements against the catalog and runs
//! them: expression resolution and evaluation, the SELECT engine, the
//! statement interpreter, and the shared prepared statement registry.

pub mod expr;
pub mod interpreter;
pub mod select;
pub mod statement;

pub use expr::{DateTimeValues, EvalContext, RangeVar};
pub use interpreter::{Interpreter, StatementResult, UndoEntry};
pub use select::{ColumnMeta, ResultSet, Select, SortSpec};
pub use statement::{CompiledStatement, StatementManager};
