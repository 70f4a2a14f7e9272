//! Database instance for HearthDB
//!
//! A `Database` owns the table registry, the shared row cache, and the
//! redo log. Sessions execute statements against it; the database itself
//! provides DDL, row storage plumbing, checkpointing, and the global
//! change counter that stamps every executed statement.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::catalog::schema::IndexDef;
use crate::error::{Error, Result};
use crate::storage::{RowCache, ScriptLog, Table, Value};

/// A database: table registry plus the storage layer behind it.
///
/// Persistent databases keep three files next to each other: `<name>.data`
/// (cached table rows), `<name>.script` (the redo log), and
/// `<name>.properties` (cache metadata). The script is authoritative; the
/// data file is rebuilt from it on open.
#[derive(Debug)]
pub struct Database {
    name: String,
    path: Option<PathBuf>,
    tables: IndexMap<String, Table>,
    cache: Option<RowCache>,
    log: Option<ScriptLog>,
    log_enabled: bool,
    scn: u64,
    schema_version: u64,
    closed: bool,
}

impl Database {
    /// Open a persistent database rooted at `path` (extensions are added
    /// per file). Returns the database and the logged statements that must
    /// be replayed through a session to restore state.
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, Vec<String>)> {
        let base = path.as_ref().to_path_buf();
        let script_path = base.with_extension("script");
        let data_path = base.with_extension("data");

        let replay = ScriptLog::read_statements(&script_path)?;

        // Cached rows are rebuilt by replay, so start from a fresh data
        // file.
        if data_path.exists() {
            std::fs::remove_file(&data_path).map_err(|e| Error::FileIo {
                op: "remove",
                path: data_path.display().to_string(),
                source: e,
            })?;
        }
        let cache = RowCache::open(&data_path, false)?;
        let log = ScriptLog::open(&script_path)?;

        let name = base
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "db".to_string());
        info!(name = %name, pending = replay.len(), "database opened");

        Ok((
            Self {
                name,
                path: Some(base),
                tables: IndexMap::new(),
                cache: Some(cache),
                log: Some(log),
                log_enabled: true,
                scn: 0,
                schema_version: 0,
                closed: false,
            },
            replay,
        ))
    }

    /// Create a transient in-memory database with no files behind it.
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
            tables: IndexMap::new(),
            cache: None,
            log: None,
            log_enabled: false,
            scn: 0,
            schema_version: 0,
            closed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        !self.closed
    }

    /// Bump and return the global change counter.
    pub fn next_scn(&mut self) -> u64 {
        self.scn += 1;
        self.scn
    }

    /// Version bumped by every DDL statement; compiled statements check it
    /// to detect stale plans.
    pub fn schema_version(&self) -> u64 {
        self.schema_version
    }

    pub fn cache(&self) -> Option<&RowCache> {
        self.cache.as_ref()
    }

    // ========== DDL ==========

    pub fn create_table(&mut self, table: Table) -> Result<()> {
        if self.tables.contains_key(table.name()) {
            return Err(Error::TableAlreadyExists(table.name().to_string()));
        }
        debug!(table = table.name(), cached = table.is_cached(), "create table");
        self.tables.insert(table.name().to_string(), table);
        self.schema_version += 1;
        Ok(())
    }

    pub fn drop_table(&mut self, name: &str) -> Result<()> {
        let mut table = self
            .tables
            .shift_remove(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))?;
        if table.is_cached() {
            for pos in table.positions() {
                table.delete(pos, self.cache.as_mut())?;
            }
        }
        self.schema_version += 1;
        Ok(())
    }

    pub fn get_table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    pub fn get_table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| Error::TableNotFound(name.to_string()))
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.tables.contains_key(name)
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    /// Add an index. Cached rows carry per-index node slots on disk, so
    /// existing rows are re-persisted under the new layout.
    pub fn create_index(&mut self, table_name: &str, index: IndexDef) -> Result<()> {
        for other in self.tables.values() {
            if other.indexes().iter().any(|i| i.name == index.name) {
                return Err(Error::IndexAlreadyExists(index.name.clone()));
            }
        }
        let Self { tables, cache, .. } = self;
        let table = tables
            .get_mut(table_name)
            .ok_or_else(|| Error::TableNotFound(table_name.to_string()))?;
        table.add_index(index)?;
        if table.is_cached() {
            for pos in table.positions() {
                let values = table.delete(pos, cache.as_mut())?;
                table.insert_unchecked(values, cache.as_mut())?;
            }
        }
        self.schema_version += 1;
        Ok(())
    }

    pub fn drop_index(&mut self, table_name: &str, index_name: &str) -> Result<()> {
        let Self { tables, cache, .. } = self;
        let table = tables
            .get_mut(table_name)
            .ok_or_else(|| Error::TableNotFound(table_name.to_string()))?;
        table.drop_index(index_name)?;
        if table.is_cached() {
            for pos in table.positions() {
                let values = table.delete(pos, cache.as_mut())?;
                table.insert_unchecked(values, cache.as_mut())?;
            }
        }
        self.schema_version += 1;
        Ok(())
    }

    // ========== Row storage ==========

    /// Insert with full constraint checking. Returns the row position.
    pub fn insert_into(&mut self, table_name: &str, values: Vec<Value>) -> Result<i64> {
        let Self { tables, cache, .. } = self;
        let table = tables
            .get_mut(table_name)
            .ok_or_else(|| Error::TableNotFound(table_name.to_string()))?;
        table.insert(values, cache.as_mut())
    }

    /// Re-insert previously removed values, skipping constraint checks.
    /// Used when rolling a delete back.
    pub fn restore_row(&mut self, table_name: &str, values: Vec<Value>) -> Result<i64> {
        let Self { tables, cache, .. } = self;
        let table = tables
            .get_mut(table_name)
            .ok_or_else(|| Error::TableNotFound(table_name.to_string()))?;
        table.insert_unchecked(values, cache.as_mut())
    }

    /// Remove a row by position, returning its values.
    pub fn delete_from(&mut self, table_name: &str, pos: i64) -> Result<Vec<Value>> {
        let Self { tables, cache, .. } = self;
        let table = tables
            .get_mut(table_name)
            .ok_or_else(|| Error::TableNotFound(table_name.to_string()))?;
        table.delete(pos, cache.as_mut())
    }

    // ========== Redo log ==========

    /// Append a statement to the redo log. No-op for in-memory databases
    /// and while replaying.
    pub fn log_statement(&mut self, sql: &str) -> Result<()> {
        if !self.log_enabled {
            return Ok(());
        }
        if let Some(log) = self.log.as_mut() {
            log.write_statement(sql)?;
            log.flush()?;
        }
        Ok(())
    }

    /// Replayed statements must not be appended back to the log.
    pub fn set_log_enabled(&mut self, enabled: bool) {
        self.log_enabled = enabled && self.log.is_some();
    }

    // ========== Checkpoint and shutdown ==========

    /// Flush dirty rows, optionally defragment the data file, and rewrite
    /// the script from current state.
    pub fn checkpoint(&mut self, compact: bool) -> Result<()> {
        let counts = self.index_counts();
        if let Some(cache) = self.cache.as_mut() {
            cache.flush(&counts)?;
        }
        if compact {
            self.compact()?;
        }
        self.rewrite_script()?;
        info!(name = %self.name, compact, "checkpoint");
        Ok(())
    }

    /// Checkpoint and release the storage files. The database rejects
    /// further work once closed.
    pub fn close(&mut self, compact: bool) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.checkpoint(compact)?;
        let counts = self.index_counts();
        if let Some(mut cache) = self.cache.take() {
            cache.close(&counts)?;
        }
        if let Some(mut log) = self.log.take() {
            log.flush()?;
        }
        self.closed = true;
        info!(name = %self.name, "database closed");
        Ok(())
    }

    fn compact(&mut self) -> Result<()> {
        let live: Vec<(String, usize, Vec<i64>)> = self
            .tables
            .values()
            .filter(|t| t.is_cached())
            .map(|t| (t.name().to_string(), t.index_count(), t.positions()))
            .collect();
        if let Some(cache) = self.cache.as_mut() {
            let moved = cache.defrag(&live)?;
            for table in self.tables.values_mut() {
                if table.is_cached() {
                    table.remap_positions(&moved);
                }
            }
        }
        Ok(())
    }

    fn rewrite_script(&mut self) -> Result<()> {
        let log = match self.log.as_mut() {
            Some(log) => log,
            None => return Ok(()),
        };
        log.truncate()?;
        for table in self.tables.values() {
            log.write_statement(&table_ddl(table))?;
            for index in table.indexes() {
                if !index.primary {
                    log.write_statement(&index_ddl(table, index))?;
                }
            }
            for (_, values) in table.rows() {
                log.write_statement(&insert_sql(table.name(), values))?;
            }
        }
        log.flush()?;
        Ok(())
    }

    fn index_counts(&self) -> HashMap<String, usize> {
        self.tables
            .values()
            .filter(|t| t.is_cached())
            .map(|t| (t.name().to_string(), t.index_count()))
            .collect()
    }
}

fn table_ddl(table: &Table) -> String {
    let schema = table.schema();
    let pk = schema.primary_key_positions();
    let mut parts: Vec<String> = Vec::new();
    for col in schema.columns() {
        let mut def = format!("{} {}", col.name, col.data_type);
        if col.primary_key && pk.len() == 1 {
            def.push_str(" PRIMARY KEY");
        } else if !col.nullable {
            def.push_str(" NOT NULL");
        }
        parts.push(def);
    }
    if pk.len() > 1 {
        let names: Vec<&str> = pk
            .iter()
            .map(|&i| schema.columns()[i].name.as_str())
            .collect();
        parts.push(format!("PRIMARY KEY ({})", names.join(", ")));
    }
    format!(
        "CREATE {}TABLE {} ({})",
        if table.is_cached() { "CACHED " } else { "" },
        table.name(),
        parts.join(", ")
    )
}

fn index_ddl(table: &Table, index: &IndexDef) -> String {
    let schema = table.schema();
    let names: Vec<&str> = index
        .columns
        .iter()
        .map(|&i| schema.columns()[i].name.as_str())
        .collect();
    format!(
        "CREATE {}INDEX {} ON {} ({})",
        if index.unique { "UNIQUE " } else { "" },
        index.name,
        table.name(),
        names.join(", ")
    )
}

fn insert_sql(table: &str, values: &[Value]) -> String {
    let literals: Vec<String> = values.iter().map(|v| v.to_sql_literal()).collect();
    format!("INSERT INTO {} VALUES ({})", table, literals.join(", "))
}
