//! HearthDB - An embedded relational database engine written in Rust
//!
//! This library provides the core components of a small SQL database:
//! - SQL parsing (lexer, parser, AST)
//! - Storage engine (row codec, page cache, redo log)
//! - Query execution (expression evaluation, SELECT engine, interpreter)
//! - Catalog and persistence
//! - Client sessions with transactions and prepared statements

pub mod catalog;
pub mod error;
pub mod executor;
pub mod session;
pub mod sql;
pub mod storage;

use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use catalog::Database;
use executor::StatementManager;
use session::Session;

pub use error::{Error, Result};

/// An open database instance. Sessions connected to it share the catalog
/// and the prepared statement registry.
pub struct HearthDb {
    db: Arc<Mutex<Database>>,
    statements: Arc<Mutex<StatementManager>>,
    next_session_id: u64,
}

impl HearthDb {
    /// Open (or create) a file-backed database. The redo log is replayed
    /// before the first session connects.
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let (db, replay) = Database::open(path)?;
        let mut instance = Self::wrap(db);
        instance.replay(replay)?;
        Ok(instance)
    }

    /// Open a database that lives only in memory.
    pub fn open_in_memory(name: impl Into<String>) -> Self {
        Self::wrap(Database::in_memory(name))
    }

    fn wrap(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            statements: Arc::new(Mutex::new(StatementManager::new())),
            next_session_id: 0,
        }
    }

    /// Feed logged statements back through a session. Work the log never
    /// saw committed is rolled back at the end.
    fn replay(&mut self, statements: Vec<String>) -> Result<()> {
        if statements.is_empty() {
            return Ok(());
        }
        info!(count = statements.len(), "replaying redo log");
        self.lock_db()?.set_log_enabled(false);
        let mut session = self.connect()?;
        for sql in &statements {
            let response = session.execute(sql);
            if let session::Response::Error { message, .. } = response {
                warn!(sql, message, "replay statement failed");
            }
        }
        session.rollback()?;
        session.disconnect()?;
        self.lock_db()?.set_log_enabled(true);
        Ok(())
    }

    /// Open a new session.
    pub fn connect(&mut self) -> Result<Session> {
        self.next_session_id += 1;
        Ok(Session::new(
            self.next_session_id,
            Arc::clone(&self.db),
            Arc::clone(&self.statements),
        ))
    }

    /// Whether the underlying database is still open. SHUTDOWN from any
    /// session closes it for all of them.
    pub fn is_open(&self) -> bool {
        self.lock_db().map(|db| db.is_open()).unwrap_or(false)
    }

    /// Checkpoint without shutting down.
    pub fn checkpoint(&self, compact: bool) -> Result<()> {
        self.lock_db()?.checkpoint(compact)
    }

    pub fn table_names(&self) -> Result<Vec<String>> {
        Ok(self.lock_db()?.table_names())
    }

    /// Human-readable description of a table: columns, constraints, indexes.
    pub fn table_info(&self, name: &str) -> Result<String> {
        let db = self.lock_db()?;
        let table = db.get_table(name)?;
        let mut out = format!(
            "{} TABLE {}\n",
            if table.is_cached() { "CACHED" } else { "MEMORY" },
            table.name()
        );
        for column in table.schema().columns() {
            out.push_str(&format!("  {} {}", column.name, column.data_type));
            if column.primary_key {
                out.push_str(" PRIMARY KEY");
            } else if !column.nullable {
                out.push_str(" NOT NULL");
            }
            out.push('\n');
        }
        for index in table.indexes() {
            if index.primary {
                continue;
            }
            out.push_str(&format!(
                "  {}INDEX {} ({})\n",
                if index.unique { "UNIQUE " } else { "" },
                index.name,
                index
                    .columns
                    .iter()
                    .filter_map(|&i| table.schema().get_column_by_index(i))
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
        }
        out.push_str(&format!("  {} row(s)\n", table.row_count()));
        Ok(out)
    }

    fn lock_db(&self) -> Result<std::sync::MutexGuard<'_, Database>> {
        self.db
            .lock()
            .map_err(|_| Error::Internal("database lock poisoned".to_string()))
    }
}
