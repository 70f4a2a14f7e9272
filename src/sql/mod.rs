//! SQL processing module
//!
//! This module handles SQL lexing, parsing, and AST representation.

pub mod ast;
pub mod lexer;
pub mod parser;

pub use ast::{Expr, SelectStatement, Statement};
pub use lexer::{Lexer, Token};
pub use parser::Parser;
