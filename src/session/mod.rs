//! Session module
//!
//! This module contains the per-connection session, its command surface,
//! and the transaction machinery behind it.

pub mod command;
pub mod session;

pub use command::{Command, EndTransactionKind, Response, SessionAttribute};
pub use session::Session;
