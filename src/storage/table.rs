//! Table storage for HearthDB
//!
//! A table is a position-keyed arena of rows. Memory tables allocate
//! positions from a private counter; cached tables take their positions
//! from the shared row cache and write rows through it.

use indexmap::IndexMap;

use super::cache::RowCache;
use super::row::{Row, Value};
use crate::catalog::{IndexDef, Schema};
use crate::error::{Error, Result};

/// A table: schema, indexes, and the row arena.
#[derive(Debug)]
pub struct Table {
    name: String,
    schema: Schema,
    indexes: Vec<IndexDef>,
    /// Rows live in the shared row cache's backing file.
    cached: bool,
    /// Rows keyed by position, in insertion order.
    rows: IndexMap<i64, Vec<Value>>,
    /// Position counter for memory tables.
    next_pos: i64,
}

impl Table {
    /// Create a new table. A primary key in the schema gets a system
    /// index backing its uniqueness check.
    pub fn new(name: impl Into<String>, schema: Schema, cached: bool) -> Self {
        let name = name.into();
        let mut indexes = Vec::new();
        let pk = schema.primary_key_positions();
        if !pk.is_empty() {
            indexes.push(IndexDef::new(format!("SYS_PK_{}", name), pk).primary(true));
        }
        Self {
            name,
            schema,
            indexes,
            cached,
            rows: IndexMap::new(),
            next_pos: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn is_cached(&self) -> bool {
        self.cached
    }

    pub fn indexes(&self) -> &[IndexDef] {
        &self.indexes
    }

    /// Number of indexes; fixes the on-disk row footprint.
    pub fn index_count(&self) -> usize {
        self.indexes.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Add a secondary index. A unique index is verified against the
    /// existing rows first.
    pub fn add_index(&mut self, index: IndexDef) -> Result<()> {
        if self.indexes.iter().any(|i| i.name == index.name) {
            return Err(Error::IndexAlreadyExists(index.name));
        }
        if index.unique {
            // each row is checked against the others, never against itself
            for (pos, values) in self.rows.iter() {
                if self.duplicate_exists(&index, values, Some(*pos)) {
                    return Err(Error::ConstraintViolation(format!(
                        "unique index {} on existing rows",
                        index.name
                    )));
                }
            }
        }
        self.indexes.push(index);
        Ok(())
    }

    pub fn drop_index(&mut self, name: &str) -> Result<()> {
        let before = self.indexes.len();
        self.indexes.retain(|i| i.name != name || i.primary);
        if self.indexes.len() == before {
            return Err(Error::IndexNotFound(name.to_string()));
        }
        Ok(())
    }

    /// Insert a row after constraint checks, returning its position.
    pub fn insert(&mut self, values: Vec<Value>, cache: Option<&mut RowCache>) -> Result<i64> {
        self.check_columns(&values)?;
        self.check_unique(&values)?;
        self.insert_unchecked(values, cache)
    }

    /// Insert without constraint checks. Used when replaying undo entries
    /// and the redo log, where the row was already valid.
    pub fn insert_unchecked(
        &mut self,
        values: Vec<Value>,
        cache: Option<&mut RowCache>,
    ) -> Result<i64> {
        let pos = if self.cached {
            match cache {
                Some(cache) => {
                    let mut row = Row::new(&self.name, values.clone(), self.index_count());
                    cache.add(&mut row)?;
                    row.pos
                }
                None => {
                    return Err(Error::Internal(format!(
                        "cached table {} has no row cache",
                        self.name
                    )))
                }
            }
        } else {
            self.next_pos += 1;
            self.next_pos
        };
        self.rows.insert(pos, values);
        Ok(pos)
    }

    /// Delete the row at `pos`, releasing its extent for cached tables.
    /// Returns the removed values.
    pub fn delete(&mut self, pos: i64, cache: Option<&mut RowCache>) -> Result<Vec<Value>> {
        let values = self
            .rows
            .shift_remove(&pos)
            .ok_or_else(|| Error::Internal(format!("no row at position {}", pos)))?;
        if self.cached {
            if let Some(cache) = cache {
                let size = super::row::storage_size(&values, self.index_count());
                cache.free(pos, size);
            }
        }
        Ok(values)
    }

    /// Row values at a position.
    pub fn row(&self, pos: i64) -> Option<&[Value]> {
        self.rows.get(&pos).map(|v| v.as_slice())
    }

    /// Iterate (position, values) in insertion order.
    pub fn rows(&self) -> impl Iterator<Item = (i64, &[Value])> {
        self.rows.iter().map(|(p, v)| (*p, v.as_slice()))
    }

    /// All row positions, for defrag planning.
    pub fn positions(&self) -> Vec<i64> {
        self.rows.keys().copied().collect()
    }

    /// Rewrite row positions after a defrag moved the backing extents.
    pub fn remap_positions(&mut self, moved: &std::collections::HashMap<i64, i64>) {
        if moved.is_empty() {
            return;
        }
        let old = std::mem::take(&mut self.rows);
        for (pos, values) in old {
            let new_pos = moved.get(&pos).copied().unwrap_or(pos);
            self.rows.insert(new_pos, values);
        }
    }

    fn check_columns(&self, values: &[Value]) -> Result<()> {
        if values.len() != self.schema.column_count() {
            return Err(Error::ValueCountMismatch);
        }
        for (value, col) in values.iter().zip(self.schema.columns()) {
            if value.is_null() && !col.nullable {
                return Err(Error::NullNotAllowed(col.name.clone()));
            }
        }
        Ok(())
    }

    fn check_unique(&self, values: &[Value]) -> Result<()> {
        for index in &self.indexes {
            if !index.unique {
                continue;
            }
            if self.duplicate_exists(index, values, None) {
                return Err(Error::ConstraintViolation(format!(
                    "unique constraint {} violated in table {}",
                    index.name, self.name
                )));
            }
        }
        Ok(())
    }

    /// SQL uniqueness: a key containing NULL never collides.
    fn duplicate_exists(&self, index: &IndexDef, candidate: &[Value], skip: Option<i64>) -> bool {
        let key: Vec<&Value> = index.columns.iter().map(|&c| &candidate[c]).collect();
        if key.iter().any(|v| v.is_null()) {
            return false;
        }
        self.rows.iter().any(|(pos, row)| {
            if Some(*pos) == skip {
                return false;
            }
            index.columns.iter().enumerate().all(|(k, &c)| row[c] == *key[k])
        })
    }
}
