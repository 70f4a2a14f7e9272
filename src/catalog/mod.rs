//! Catalog module
//!
//! This module contains the database instance, schema definitions, and
//! data types.

pub mod database;
pub mod schema;
pub mod types;

pub use database::Database;
pub use schema::{Column, IndexDef, Schema};
pub use types::DataType;
