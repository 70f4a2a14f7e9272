//! Storage engine module
//!
//! This module contains the storage engine components:
//! - Row and value representation
//! - Disk-backed row cache with free-space management
//! - Position-keyed table storage
//! - Append-only redo log

pub mod cache;
pub mod log;
pub mod row;
pub mod table;

pub use cache::{FreeBlock, RowCache, INITIAL_FREE_POS, MAX_FREE_COUNT, MIN_FREE_BLOCK};
pub use log::ScriptLog;
pub use row::{Row, Value};
pub use table::Table;
