//! Statement execution
//!
//! The interpreter runs one parsed statement against the database. DML
//! records undo entries so the owning session can roll work back;
//! transaction control and session attributes never reach this layer.

use tracing::debug;

use super::expr::{
    eval, resolve, CompiledExpr, DateTimeValues, EvalContext, EvalError, RangeVar,
};
use super::select::{ResultSet, Select};
use crate::catalog::{Column, Database, IndexDef, Schema};
use crate::error::{Error, Result};
use crate::sql::ast::{
    CreateIndexStatement, CreateTableStatement, DeleteStatement, InsertStatement, Statement,
    TableConstraint, UpdateStatement,
};
use crate::storage::{Table, Value};

/// One reversible change. Rolling back an `Insert` deletes the row;
/// rolling back a `Delete` restores the removed values.
#[derive(Debug)]
pub enum UndoEntry {
    Insert { table: String, pos: i64, scn: u64 },
    Delete {
        table: String,
        values: Vec<Value>,
        scn: u64,
    },
}

/// What a statement produced.
#[derive(Debug)]
pub enum StatementResult {
    Rows(ResultSet),
    Count(usize),
}

/// Executes one statement. Built fresh per statement by the session.
pub struct Interpreter<'a> {
    pub db: &'a mut Database,
    pub params: &'a [Value],
    pub now: DateTimeValues,
    pub scn: u64,
    pub max_rows: usize,
    /// Undo sink; absent when the session commits the change immediately
    pub undo: Option<&'a mut Vec<UndoEntry>>,
}

impl Interpreter<'_> {
    pub fn execute(&mut self, stmt: &Statement) -> Result<StatementResult> {
        match stmt {
            Statement::Select(s) => {
                let select = Select::compile(self.db, s)?;
                let rs = select.get_result(self.db, self.params, self.now, self.max_rows)?;
                Ok(StatementResult::Rows(rs))
            }
            Statement::Insert(s) => self.execute_insert(s).map(StatementResult::Count),
            Statement::Update(s) => self.execute_update(s).map(StatementResult::Count),
            Statement::Delete(s) => self.execute_delete(s).map(StatementResult::Count),
            Statement::CreateTable(s) => {
                self.execute_create_table(s)?;
                Ok(StatementResult::Count(0))
            }
            Statement::DropTable { name } => {
                self.db.drop_table(name)?;
                Ok(StatementResult::Count(0))
            }
            Statement::CreateIndex(s) => {
                self.execute_create_index(s)?;
                Ok(StatementResult::Count(0))
            }
            Statement::DropIndex { name, table } => {
                self.db.drop_index(table, name)?;
                Ok(StatementResult::Count(0))
            }
            other => Err(Error::Internal(format!(
                "statement is session scoped: {:?}",
                other
            ))),
        }
    }

    fn record(&mut self, entry: UndoEntry) {
        if let Some(undo) = self.undo.as_deref_mut() {
            undo.push(entry);
        }
    }

    fn execute_insert(&mut self, stmt: &InsertStatement) -> Result<usize> {
        let schema = self.db.get_table(&stmt.table)?.schema().clone();

        let targets: Vec<usize> = if stmt.columns.is_empty() {
            if stmt.values.len() != schema.column_count() {
                return Err(Error::ValueCountMismatch);
            }
            (0..schema.column_count()).collect()
        } else {
            if stmt.values.len() != stmt.columns.len() {
                return Err(Error::ValueCountMismatch);
            }
            stmt.columns
                .iter()
                .map(|name| {
                    schema
                        .get_column_index(name)
                        .ok_or_else(|| Error::ColumnNotFound(name.clone()))
                })
                .collect::<Result<_>>()?
        };

        let ctx = EvalContext::new(&[], self.params, self.now);
        let mut row = vec![Value::Null; schema.column_count()];
        for (expr, &target) in stmt.values.iter().zip(&targets) {
            let mut none = Vec::new();
            let compiled = resolve(expr, &[], &mut none)?;
            let value = eval(&compiled, &ctx).map_err(EvalError::into_error)?;
            let column = &schema.columns()[target];
            row[target] = value.coerce_to(&column.data_type)?;
        }

        let pos = self.db.insert_into(&stmt.table, row)?;
        self.record(UndoEntry::Insert {
            table: stmt.table.clone(),
            pos,
            scn: self.scn,
        });
        Ok(1)
    }

    fn execute_delete(&mut self, stmt: &DeleteStatement) -> Result<usize> {
        let matched = self.matching_rows(&stmt.table, stmt.where_clause.as_ref())?;

        let count = matched.len();
        for pos in matched {
            let values = self.db.delete_from(&stmt.table, pos)?;
            self.record(UndoEntry::Delete {
                table: stmt.table.clone(),
                values,
                scn: self.scn,
            });
        }
        debug!(table = %stmt.table, count, "rows deleted");
        Ok(count)
    }

    fn execute_update(&mut self, stmt: &UpdateStatement) -> Result<usize> {
        let range = RangeVar::new(self.db, &stmt.table, None, false)?;
        let schema = self.db.get_table(&stmt.table)?.schema().clone();

        let mut assignments = Vec::with_capacity(stmt.assignments.len());
        for (name, expr) in &stmt.assignments {
            let target = schema
                .get_column_index(name)
                .ok_or_else(|| Error::ColumnNotFound(name.clone()))?;
            let mut none = Vec::new();
            let compiled = resolve(expr, std::slice::from_ref(&range), &mut none)?;
            if !none.is_empty() {
                return Err(Error::OperationNotSupported(
                    "aggregate function in UPDATE assignment".to_string(),
                ));
            }
            assignments.push((target, compiled));
        }

        let matched = self.matching_rows(&stmt.table, stmt.where_clause.as_ref())?;

        // Compute the replacement rows before touching the table.
        let mut replacements = Vec::with_capacity(matched.len());
        for &pos in &matched {
            let table = self.db.get_table(&stmt.table)?;
            let old = table
                .row(pos)
                .ok_or_else(|| Error::Internal(format!("row {} vanished mid update", pos)))?;
            let rows: Vec<Option<&[Value]>> = vec![Some(old)];
            let ctx = EvalContext::new(&rows, self.params, self.now);

            let mut new_row = old.to_vec();
            let mut skip = false;
            for (target, compiled) in &assignments {
                match eval(compiled, &ctx) {
                    Ok(v) => {
                        let column = &schema.columns()[*target];
                        new_row[*target] = v.coerce_to(&column.data_type)?;
                    }
                    Err(EvalError::Skip) => {
                        skip = true;
                        break;
                    }
                    Err(EvalError::Fail(e)) => return Err(e),
                }
            }
            if !skip {
                replacements.push((pos, new_row));
            }
        }

        // Delete every old row first so key swaps between updated rows
        // do not trip the uniqueness check.
        for (pos, _) in &replacements {
            let values = self.db.delete_from(&stmt.table, *pos)?;
            self.record(UndoEntry::Delete {
                table: stmt.table.clone(),
                values,
                scn: self.scn,
            });
        }
        let count = replacements.len();
        for (_, new_row) in replacements {
            let pos = self.db.insert_into(&stmt.table, new_row)?;
            self.record(UndoEntry::Insert {
                table: stmt.table.clone(),
                pos,
                scn: self.scn,
            });
        }
        debug!(table = %stmt.table, count, "rows updated");
        Ok(count)
    }

    /// Positions of rows matching the WHERE clause, in scan order. A row
    /// the condition cannot be evaluated for is not matched.
    fn matching_rows(
        &mut self,
        table_name: &str,
        where_clause: Option<&crate::sql::ast::Expr>,
    ) -> Result<Vec<i64>> {
        let range = RangeVar::new(self.db, table_name, None, false)?;
        let condition: Option<CompiledExpr> = match where_clause {
            Some(w) => {
                let mut none = Vec::new();
                let compiled = resolve(w, std::slice::from_ref(&range), &mut none)?;
                if !none.is_empty() {
                    return Err(Error::OperationNotSupported(
                        "aggregate function in WHERE clause".to_string(),
                    ));
                }
                Some(compiled)
            }
            None => None,
        };

        let table = self.db.get_table(table_name)?;
        let mut matched = Vec::new();
        for (pos, values) in table.rows() {
            let is_match = match &condition {
                None => true,
                Some(cond) => {
                    let rows: Vec<Option<&[Value]>> = vec![Some(values)];
                    let ctx = EvalContext::new(&rows, self.params, self.now);
                    match super::expr::holds(cond, &ctx) {
                        Ok(b) => b,
                        Err(EvalError::Skip) => false,
                        Err(EvalError::Fail(e)) => return Err(e),
                    }
                }
            };
            if is_match {
                matched.push(pos);
            }
        }
        Ok(matched)
    }

    fn execute_create_table(&mut self, stmt: &CreateTableStatement) -> Result<()> {
        let mut pk_names: Vec<&str> = Vec::new();
        let mut unique_sets: Vec<&[String]> = Vec::new();
        for constraint in &stmt.constraints {
            match constraint {
                TableConstraint::PrimaryKey(names) => {
                    pk_names.extend(names.iter().map(|s| s.as_str()))
                }
                TableConstraint::Unique(names) => unique_sets.push(names),
            }
        }

        let mut schema = Schema::new();
        for (i, def) in stmt.columns.iter().enumerate() {
            let in_pk = def.primary_key || pk_names.contains(&def.name.as_str());
            schema.add_column(
                Column::new(def.name.clone(), def.data_type.clone(), i)
                    .nullable(def.nullable && !in_pk)
                    .primary_key(in_pk),
            );
        }
        for name in &pk_names {
            if !schema.has_column(name) {
                return Err(Error::ColumnNotFound(name.to_string()));
            }
        }

        let mut table = Table::new(stmt.name.clone(), schema, stmt.cached);
        for (i, names) in unique_sets.iter().enumerate() {
            let positions = names
                .iter()
                .map(|name| {
                    table
                        .schema()
                        .get_column_index(name)
                        .ok_or_else(|| Error::ColumnNotFound(name.clone()))
                })
                .collect::<Result<Vec<_>>>()?;
            let index_name = format!("SYS_CT_{}_{}", stmt.name, i + 1);
            table.add_index(IndexDef::new(index_name, positions).unique(true))?;
        }

        self.db.create_table(table)
    }

    fn execute_create_index(&mut self, stmt: &CreateIndexStatement) -> Result<()> {
        let schema = self.db.get_table(&stmt.table)?.schema().clone();
        let positions = stmt
            .columns
            .iter()
            .map(|name| {
                schema
                    .get_column_index(name)
                    .ok_or_else(|| Error::ColumnNotFound(name.clone()))
            })
            .collect::<Result<Vec<_>>>()?;
        let index = IndexDef::new(stmt.name.clone(), positions).unique(stmt.unique);
        self.db.create_index(&stmt.table, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::Parser;

    fn run(
        db: &mut Database,
        undo: Option<&mut Vec<UndoEntry>>,
        sql: &str,
    ) -> Result<StatementResult> {
        let stmt = Parser::new(sql)?.parse()?;
        let mut interp = Interpreter {
            db,
            params: &[],
            now: DateTimeValues::from_millis(0),
            scn: 1,
            max_rows: 0,
            undo,
        };
        interp.execute(&stmt)
    }

    fn count(result: StatementResult) -> usize {
        match result {
            StatementResult::Count(n) => n,
            other => panic!("expected count, got {:?}", other),
        }
    }

    fn setup(db: &mut Database) {
        run(
            db,
            None,
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name VARCHAR(50) NOT NULL, age INTEGER)",
        )
        .unwrap();
        for sql in [
            "INSERT INTO users VALUES (1, 'ann', 30)",
            "INSERT INTO users VALUES (2, 'bob', 25)",
        ] {
            run(db, None, sql).unwrap();
        }
    }

    #[test]
    fn test_insert_and_select() {
        let mut db = Database::in_memory("t");
        setup(&mut db);
        let result = run(&mut db, None, "SELECT name FROM users WHERE age >= 30").unwrap();
        match result {
            StatementResult::Rows(rs) => {
                assert_eq!(rs.row_count(), 1);
                assert_eq!(rs.rows[0][0], Value::String("ann".to_string()));
            }
            other => panic!("expected rows, got {:?}", other),
        }
    }

    #[test]
    fn test_insert_with_column_list_defaults_null() {
        let mut db = Database::in_memory("t");
        setup(&mut db);
        run(&mut db, None, "INSERT INTO users (id, name) VALUES (3, 'cid')").unwrap();
        let table = db.get_table("users").unwrap();
        assert_eq!(table.row_count(), 3);
    }

    #[test]
    fn test_insert_value_count_mismatch() {
        let mut db = Database::in_memory("t");
        setup(&mut db);
        assert!(matches!(
            run(&mut db, None, "INSERT INTO users VALUES (3, 'cid')"),
            Err(Error::ValueCountMismatch)
        ));
    }

    #[test]
    fn test_insert_null_into_not_null() {
        let mut db = Database::in_memory("t");
        setup(&mut db);
        assert!(matches!(
            run(&mut db, None, "INSERT INTO users VALUES (3, NULL, 40)"),
            Err(Error::NullNotAllowed(_))
        ));
    }

    #[test]
    fn test_update_records_undo_pairs() {
        let mut db = Database::in_memory("t");
        setup(&mut db);
        let mut undo = Vec::new();
        let n = count(
            run(
                &mut db,
                Some(&mut undo),
                "UPDATE users SET age = age + 1 WHERE id = 1",
            )
            .unwrap(),
        );
        assert_eq!(n, 1);
        assert_eq!(undo.len(), 2);
        assert!(matches!(undo[0], UndoEntry::Delete { .. }));
        assert!(matches!(undo[1], UndoEntry::Insert { .. }));
    }

    #[test]
    fn test_unique_key_swap_update() {
        let mut db = Database::in_memory("t");
        setup(&mut db);
        let n = count(run(&mut db, None, "UPDATE users SET id = id + 10").unwrap());
        assert_eq!(n, 2);
    }

    #[test]
    fn test_delete_with_where() {
        let mut db = Database::in_memory("t");
        setup(&mut db);
        let mut undo = Vec::new();
        let n = count(
            run(&mut db, Some(&mut undo), "DELETE FROM users WHERE age < 30").unwrap(),
        );
        assert_eq!(n, 1);
        assert_eq!(undo.len(), 1);
        assert_eq!(db.get_table("users").unwrap().row_count(), 1);
    }

    #[test]
    fn test_create_table_with_constraints() {
        let mut db = Database::in_memory("t");
        run(
            &mut db,
            None,
            "CREATE TABLE pairs (a INTEGER, b INTEGER, PRIMARY KEY (a, b), UNIQUE (b))",
        )
        .unwrap();
        let table = db.get_table("pairs").unwrap();
        assert_eq!(table.schema().primary_key_positions(), vec![0, 1]);
        // primary key index plus the unique constraint index
        assert_eq!(table.index_count(), 2);
    }

    #[test]
    fn test_create_and_drop_index() {
        let mut db = Database::in_memory("t");
        setup(&mut db);
        run(&mut db, None, "CREATE UNIQUE INDEX idx_name ON users (name)").unwrap();
        assert!(matches!(
            run(&mut db, None, "INSERT INTO users VALUES (5, 'ann', 50)"),
            Err(Error::ConstraintViolation(_))
        ));
        run(&mut db, None, "DROP INDEX idx_name ON users").unwrap();
        run(&mut db, None, "INSERT INTO users VALUES (5, 'ann', 50)").unwrap();
    }

    #[test]
    fn test_duplicate_primary_key_rejected() {
        let mut db = Database::in_memory("t");
        setup(&mut db);
        assert!(matches!(
            run(&mut db, None, "INSERT INTO users VALUES (1, 'dup', 1)"),
            Err(Error::ConstraintViolation(_))
        ));
    }
}
