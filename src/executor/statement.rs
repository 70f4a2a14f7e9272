//! Prepared statement management
//!
//! Compiled statements are shared across sessions and keyed by their SQL
//! text. Each statement carries the schema version it was parsed under;
//! execution recompiles a stale statement once before giving up on it.

use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::debug;

use crate::error::{Error, Result};
use crate::sql::{Parser, Statement};

/// A parsed statement registered with the manager.
#[derive(Debug)]
pub struct CompiledStatement {
    pub id: u64,
    pub sql: String,
    pub statement: Statement,
    pub param_count: usize,
    /// Schema version the statement was last parsed under
    pub schema_version: u64,
    link_count: usize,
}

/// Registry of prepared statements, shared by all sessions.
#[derive(Debug, Default)]
pub struct StatementManager {
    statements: IndexMap<u64, CompiledStatement>,
    by_sql: HashMap<String, u64>,
    next_id: u64,
}

impl StatementManager {
    pub fn new() -> Self {
        Self {
            statements: IndexMap::new(),
            by_sql: HashMap::new(),
            next_id: 0,
        }
    }

    /// Register a statement, reusing the existing compilation when the
    /// same SQL text is already prepared. Returns (id, parameter count).
    pub fn prepare(&mut self, sql: &str, schema_version: u64) -> Result<(u64, usize)> {
        if let Some(&id) = self.by_sql.get(sql) {
            let stmt = &mut self.statements[&id];
            stmt.link_count += 1;
            return Ok((id, stmt.param_count));
        }

        let mut parser = Parser::new(sql)?;
        let statement = parser.parse()?;
        let param_count = parser.param_count();

        self.next_id += 1;
        let id = self.next_id;
        debug!(id, sql, "statement prepared");
        self.statements.insert(
            id,
            CompiledStatement {
                id,
                sql: sql.to_string(),
                statement,
                param_count,
                schema_version,
                link_count: 1,
            },
        );
        self.by_sql.insert(sql.to_string(), id);
        Ok((id, param_count))
    }

    pub fn get(&self, id: u64) -> Result<&CompiledStatement> {
        self.statements
            .get(&id)
            .ok_or(Error::InvalidPreparedStatement)
    }

    /// Reparse a statement whose schema version is stale. A statement
    /// that no longer parses is dropped.
    pub fn refresh(&mut self, id: u64, schema_version: u64) -> Result<()> {
        let sql = self.get(id)?.sql.clone();
        let parsed = Parser::new(&sql).and_then(|mut p| {
            let stmt = p.parse()?;
            Ok((stmt, p.param_count()))
        });
        match parsed {
            Ok((statement, param_count)) => {
                let entry = &mut self.statements[&id];
                entry.statement = statement;
                entry.param_count = param_count;
                entry.schema_version = schema_version;
                debug!(id, "statement recompiled");
                Ok(())
            }
            Err(_) => {
                self.remove(id);
                Err(Error::InvalidPreparedStatement)
            }
        }
    }

    /// Drop one link to the statement; the compilation is freed when the
    /// last session releases it.
    pub fn release(&mut self, id: u64) {
        if let Some(stmt) = self.statements.get_mut(&id) {
            stmt.link_count -= 1;
            if stmt.link_count == 0 {
                self.remove(id);
            }
        }
    }

    fn remove(&mut self, id: u64) {
        if let Some(stmt) = self.statements.shift_remove(&id) {
            self.by_sql.remove(&stmt.sql);
            debug!(id, "statement freed");
        }
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_reuses_same_sql() {
        let mut mgr = StatementManager::new();
        let (id1, params1) = mgr.prepare("SELECT * FROM t WHERE id = ?", 1).unwrap();
        let (id2, params2) = mgr.prepare("SELECT * FROM t WHERE id = ?", 1).unwrap();
        assert_eq!(id1, id2);
        assert_eq!(params1, 1);
        assert_eq!(params2, 1);
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn test_release_frees_at_zero_links() {
        let mut mgr = StatementManager::new();
        let (id, _) = mgr.prepare("SELECT 1", 1).unwrap();
        let (_, _) = mgr.prepare("SELECT 1", 1).unwrap();

        mgr.release(id);
        assert_eq!(mgr.len(), 1);
        mgr.release(id);
        assert!(mgr.is_empty());
        assert!(matches!(mgr.get(id), Err(Error::InvalidPreparedStatement)));
    }

    #[test]
    fn test_refresh_updates_schema_version() {
        let mut mgr = StatementManager::new();
        let (id, _) = mgr.prepare("INSERT INTO t VALUES (?)", 1).unwrap();
        assert_eq!(mgr.get(id).unwrap().schema_version, 1);
        mgr.refresh(id, 5).unwrap();
        assert_eq!(mgr.get(id).unwrap().schema_version, 5);
    }

    #[test]
    fn test_prepare_rejects_bad_sql() {
        let mut mgr = StatementManager::new();
        assert!(mgr.prepare("SELEKT", 1).is_err());
        assert!(mgr.is_empty());
    }
}
