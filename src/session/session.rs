//! Client session
//!
//! A session owns the transaction state for one connection: the undo
//! list, savepoints, autocommit flag, and links to shared prepared
//! statements. Every state change goes through here so the redo log
//! sees a faithful, replayable statement stream.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use indexmap::IndexMap;
use tracing::{debug, info};

use super::command::{Command, EndTransactionKind, Response, SessionAttribute};
use crate::catalog::Database;
use crate::error::{Error, Result};
use crate::executor::expr::DateTimeValues;
use crate::executor::{
    ColumnMeta, Interpreter, Select, StatementManager, StatementResult, UndoEntry,
};
use crate::sql::{Parser, Statement};
use crate::storage::Value;

pub struct Session {
    id: u64,
    db: Arc<Mutex<Database>>,
    statements: Arc<Mutex<StatementManager>>,
    autocommit: bool,
    /// Undo length at the start of the nested transaction, when one is open
    nested: Option<usize>,
    closed: bool,
    max_rows: usize,
    undo: Vec<UndoEntry>,
    /// Statements held back from the redo log while a nested transaction
    /// is open under autocommit
    pending_log: Vec<String>,
    /// Savepoint name to undo length, in declaration order
    savepoints: IndexMap<String, usize>,
    /// Prepared statement ids this session holds, with link counts
    links: HashMap<u64, usize>,
}

impl Session {
    pub fn new(id: u64, db: Arc<Mutex<Database>>, statements: Arc<Mutex<StatementManager>>) -> Self {
        debug!(session = id, "session opened");
        Self {
            id,
            db,
            statements,
            autocommit: true,
            nested: None,
            closed: false,
            max_rows: 0,
            undo: Vec::new(),
            pending_log: Vec::new(),
            savepoints: IndexMap::new(),
            links: HashMap::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_autocommit(&self) -> bool {
        self.autocommit
    }

    /// Run one command, folding any failure into `Response::Error`.
    pub fn handle(&mut self, command: Command) -> Response {
        match command {
            Command::Execute { sql } => self.execute(&sql),
            Command::Prepare { sql } => match self.prepare(&sql) {
                Ok((id, param_count)) => match self.result_columns(id) {
                    Ok(columns) => Response::PreparedAck {
                        id,
                        param_count,
                        columns,
                    },
                    Err(e) => Response::from_error(e),
                },
                Err(e) => Response::from_error(e),
            },
            Command::ExecutePrepared { id, params } => {
                match self.execute_prepared(id, &params) {
                    Ok(result) => result.into(),
                    Err(e) => Response::from_error(e),
                }
            }
            Command::ExecuteBatch { id, rows } => {
                let (counts, error) = self.execute_batch(id, &rows);
                Response::Batch {
                    counts,
                    error: error.map(|e| e.to_string()),
                }
            }
            Command::FreeStatement { id } => {
                self.free_statement(id);
                Response::Ok
            }
            Command::EndTransaction(kind) => {
                let result = match kind {
                    EndTransactionKind::Commit => self.commit(),
                    EndTransactionKind::Rollback => self.rollback(),
                    EndTransactionKind::CommitAndChain | EndTransactionKind::RollbackAndChain => {
                        Err(Error::OperationNotSupported(
                            "transaction chaining".to_string(),
                        ))
                    }
                };
                match result {
                    Ok(()) => Response::Ok,
                    Err(e) => Response::from_error(e),
                }
            }
            Command::SetAttribute(attr) => {
                let result = match attr {
                    SessionAttribute::Autocommit(on) => self.set_autocommit(on),
                    SessionAttribute::MaxRows(n) => {
                        self.max_rows = n;
                        Ok(())
                    }
                };
                match result {
                    Ok(()) => Response::Ok,
                    Err(e) => Response::from_error(e),
                }
            }
            Command::Disconnect => match self.disconnect() {
                Ok(()) => Response::Ok,
                Err(e) => Response::from_error(e),
            },
        }
    }

    /// Parse and run one SQL string.
    pub fn execute(&mut self, sql: &str) -> Response {
        match self.execute_sql(sql, &[]) {
            Ok(result) => result.into(),
            Err(e) => Response::from_error(e),
        }
    }

    fn execute_sql(&mut self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.check_open()?;
        let statement = Parser::new(sql)?.parse()?;
        self.dispatch(&statement, params, sql)
    }

    // ========== Prepared statements ==========

    pub fn prepare(&mut self, sql: &str) -> Result<(u64, usize)> {
        self.check_open()?;
        let schema_version = self.db()?.schema_version();
        let (id, param_count) = self.statements()?.prepare(sql, schema_version)?;
        *self.links.entry(id).or_insert(0) += 1;
        Ok((id, param_count))
    }

    /// Result-column metadata for a prepared statement: populated for
    /// queries, empty for statements returning an update count.
    pub fn result_columns(&self, id: u64) -> Result<Vec<ColumnMeta>> {
        let statement = self.statements()?.get(id)?.statement.clone();
        match statement {
            Statement::Select(select) => {
                let db = self.db()?;
                let compiled = Select::compile(&db, &select)?;
                Ok(compiled.result_metadata(&db))
            }
            _ => Ok(Vec::new()),
        }
    }

    pub fn execute_prepared(&mut self, id: u64, params: &[Value]) -> Result<StatementResult> {
        self.check_open()?;
        if !self.links.contains_key(&id) {
            return Err(Error::InvalidPreparedStatement);
        }
        let schema_version = self.db()?.schema_version();
        let (statement, sql, param_count) = {
            let mut manager = self.statements()?;
            if manager.get(id)?.schema_version != schema_version {
                manager.refresh(id, schema_version)?;
            }
            let compiled = manager.get(id)?;
            (
                compiled.statement.clone(),
                compiled.sql.clone(),
                compiled.param_count,
            )
        };
        if params.len() != param_count {
            return Err(Error::ValueCountMismatch);
        }
        self.dispatch(&statement, params, &sql)
    }

    /// Run a prepared statement once per parameter row. Items apply
    /// independently; execution stops at the first failure, returning the
    /// counts collected so far with it. Already-applied items stand.
    /// A row producing a result set counts as -2.
    pub fn execute_batch(&mut self, id: u64, rows: &[Vec<Value>]) -> (Vec<i32>, Option<Error>) {
        let mut counts = Vec::with_capacity(rows.len());
        for params in rows {
            match self.execute_prepared(id, params) {
                Ok(StatementResult::Count(n)) => counts.push(n as i32),
                Ok(StatementResult::Rows(_)) => counts.push(-2),
                Err(e) => return (counts, Some(e)),
            }
        }
        (counts, None)
    }

    pub fn free_statement(&mut self, id: u64) {
        if let Some(count) = self.links.get_mut(&id) {
            *count -= 1;
            if *count == 0 {
                self.links.remove(&id);
            }
            if let Ok(mut manager) = self.statements() {
                manager.release(id);
            }
        }
    }

    // ========== Statement dispatch ==========

    fn dispatch(
        &mut self,
        statement: &Statement,
        params: &[Value],
        sql: &str,
    ) -> Result<StatementResult> {
        match statement {
            Statement::Commit => {
                self.commit()?;
                Ok(StatementResult::Count(0))
            }
            Statement::Rollback => {
                self.rollback()?;
                Ok(StatementResult::Count(0))
            }
            Statement::Savepoint(name) => {
                self.savepoint(name)?;
                Ok(StatementResult::Count(0))
            }
            Statement::ReleaseSavepoint(name) => {
                self.release_savepoint(name)?;
                Ok(StatementResult::Count(0))
            }
            Statement::RollbackToSavepoint(name) => {
                self.rollback_to_savepoint(name)?;
                Ok(StatementResult::Count(0))
            }
            Statement::SetAutocommit(on) => {
                self.set_autocommit(*on)?;
                Ok(StatementResult::Count(0))
            }
            Statement::SetMaxRows(n) => {
                self.max_rows = *n;
                Ok(StatementResult::Count(0))
            }
            Statement::Shutdown { compact } => {
                self.shutdown(*compact)?;
                Ok(StatementResult::Count(0))
            }
            other => self.run_statement(other, params, sql),
        }
    }

    fn run_statement(
        &mut self,
        statement: &Statement,
        params: &[Value],
        sql: &str,
    ) -> Result<StatementResult> {
        // Lock through a clone so the guard does not pin all of `self`;
        // the undo list is borrowed separately below.
        let db = Arc::clone(&self.db);
        let mut db = lock_db(&db)?;
        let scn = db.next_scn();
        let now = DateTimeValues::now();
        let snapshot = self.undo.len();

        let mut interpreter = Interpreter {
            db: &mut db,
            params,
            now,
            scn,
            max_rows: self.max_rows,
            undo: Some(&mut self.undo),
        };
        match interpreter.execute(statement) {
            Ok(result) => {
                if changes_state(statement) {
                    if self.autocommit && self.nested.is_some() {
                        // held back until the nested transaction commits
                        self.pending_log.push(bind_sql(sql, params));
                    } else {
                        db.log_statement(&bind_sql(sql, params))?;
                        if self.autocommit {
                            if self.undo.len() > snapshot {
                                db.log_statement("COMMIT")?;
                            }
                            self.undo.truncate(snapshot);
                        }
                    }
                }
                Ok(result)
            }
            // Leave the statement without a trace, then surface the failure.
            Err(e) => {
                undo_to(&mut db, &mut self.undo, snapshot)?;
                Err(e)
            }
        }
    }

    // ========== Transactions ==========

    /// Make pending work permanent. A commit with nothing pending, or on
    /// a closed session, is a no-op.
    pub fn commit(&mut self) -> Result<()> {
        if self.closed || self.undo.is_empty() {
            return Ok(());
        }
        self.db()?.log_statement("COMMIT")?;
        self.undo.clear();
        self.savepoints.clear();
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<()> {
        self.check_open()?;
        if !self.undo.is_empty() {
            let db = Arc::clone(&self.db);
            let mut db = lock_db(&db)?;
            undo_to(&mut db, &mut self.undo, 0)?;
            db.log_statement("ROLLBACK")?;
        }
        self.savepoints.clear();
        Ok(())
    }

    /// Declare a savepoint. Redeclaring a name moves it to the current
    /// position.
    pub fn savepoint(&mut self, name: &str) -> Result<()> {
        self.check_open()?;
        self.savepoints.shift_remove(name);
        self.savepoints.insert(name.to_string(), self.undo.len());
        self.db()?.log_statement(&format!("SAVEPOINT {}", name))
    }

    /// Forget a savepoint and every savepoint declared after it.
    pub fn release_savepoint(&mut self, name: &str) -> Result<()> {
        self.check_open()?;
        let index = self
            .savepoints
            .get_index_of(name)
            .ok_or_else(|| Error::SavepointNotFound(name.to_string()))?;
        self.savepoints.truncate(index);
        self.db()?
            .log_statement(&format!("RELEASE SAVEPOINT {}", name))
    }

    /// Undo work back to a savepoint. The savepoint stays valid; the ones
    /// declared after it are dropped.
    pub fn rollback_to_savepoint(&mut self, name: &str) -> Result<()> {
        self.check_open()?;
        let index = self
            .savepoints
            .get_index_of(name)
            .ok_or_else(|| Error::SavepointNotFound(name.to_string()))?;
        let target = self.savepoints[index];
        self.savepoints.truncate(index + 1);
        let db = Arc::clone(&self.db);
        let mut db = lock_db(&db)?;
        undo_to(&mut db, &mut self.undo, target)?;
        db.log_statement(&format!("ROLLBACK TO SAVEPOINT {}", name))
    }

    /// Turning autocommit on or off commits pending work first.
    pub fn set_autocommit(&mut self, on: bool) -> Result<()> {
        self.check_open()?;
        if on == self.autocommit {
            return Ok(());
        }
        self.commit()?;
        self.autocommit = on;
        self.db()?.log_statement(if on {
            "SET AUTOCOMMIT TRUE"
        } else {
            "SET AUTOCOMMIT FALSE"
        })
    }

    /// Open a nested transaction; only one level is supported. Double
    /// entry is a fault in the caller, not a user error.
    pub fn begin_nested(&mut self) -> Result<()> {
        self.check_open()?;
        if self.nested.is_some() {
            return Err(Error::Internal(
                "nested transaction already active".to_string(),
            ));
        }
        self.nested = Some(self.undo.len());
        Ok(())
    }

    /// Close the nested transaction: keep its work or unwind back to the
    /// snapshot. Under autocommit a kept unit is logged and committed here.
    pub fn end_nested(&mut self, commit: bool) -> Result<()> {
        let start = self
            .nested
            .take()
            .ok_or_else(|| Error::Internal("no nested transaction".to_string()))?;
        let db = Arc::clone(&self.db);
        let mut db = lock_db(&db)?;
        if commit {
            if self.autocommit {
                for sql in self.pending_log.drain(..) {
                    db.log_statement(&sql)?;
                }
                if self.undo.len() > start {
                    db.log_statement("COMMIT")?;
                }
                self.undo.truncate(start);
            }
            return Ok(());
        }
        self.pending_log.clear();
        undo_to(&mut db, &mut self.undo, start)?;
        Ok(())
    }

    // ========== Lifecycle ==========

    /// Roll pending work back, checkpoint, and close the database. The
    /// session is unusable afterwards.
    pub fn shutdown(&mut self, compact: bool) -> Result<()> {
        self.check_open()?;
        self.rollback()?;
        self.db()?.close(compact)?;
        self.closed = true;
        info!(session = self.id, "shutdown");
        Ok(())
    }

    /// Roll back and release this session's resources. The database stays
    /// open for other sessions.
    pub fn disconnect(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.rollback()?;
        let ids: Vec<u64> = self.links.keys().copied().collect();
        for id in ids {
            while self.links.contains_key(&id) {
                self.free_statement(id);
            }
        }
        self.closed = true;
        debug!(session = self.id, "session closed");
        Ok(())
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::SessionClosed);
        }
        let db = self.db()?;
        if !db.is_open() {
            return Err(Error::SessionClosed);
        }
        Ok(())
    }

    fn db(&self) -> Result<MutexGuard<'_, Database>> {
        self.db
            .lock()
            .map_err(|_| Error::Internal("database lock poisoned".to_string()))
    }

    fn statements(&self) -> Result<MutexGuard<'_, StatementManager>> {
        self.statements
            .lock()
            .map_err(|_| Error::Internal("statement registry lock poisoned".to_string()))
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}

impl From<StatementResult> for Response {
    fn from(result: StatementResult) -> Self {
        match result {
            StatementResult::Rows(rs) => Response::RowSet(rs),
            StatementResult::Count(n) => Response::UpdateCount(n),
        }
    }
}

fn changes_state(statement: &Statement) -> bool {
    matches!(
        statement,
        Statement::Insert(_)
            | Statement::Update(_)
            | Statement::Delete(_)
            | Statement::CreateTable(_)
            | Statement::DropTable { .. }
            | Statement::CreateIndex(_)
            | Statement::DropIndex { .. }
    )
}

fn lock_db(db: &Mutex<Database>) -> Result<MutexGuard<'_, Database>> {
    db.lock()
        .map_err(|_| Error::Internal("database lock poisoned".to_string()))
}

/// Reverse-apply undo entries down to `target` length.
fn undo_to(db: &mut Database, undo: &mut Vec<UndoEntry>, target: usize) -> Result<()> {
    while undo.len() > target {
        match undo.pop() {
            Some(UndoEntry::Insert { table, pos, .. }) => {
                db.delete_from(&table, pos)?;
            }
            Some(UndoEntry::Delete { table, values, .. }) => {
                db.restore_row(&table, values)?;
            }
            None => break,
        }
    }
    Ok(())
}

/// Substitute parameter markers with literals for the redo log. Markers
/// inside quoted strings are left alone.
fn bind_sql(sql: &str, params: &[Value]) -> String {
    if params.is_empty() {
        return sql.to_string();
    }
    let mut out = String::with_capacity(sql.len() + params.len() * 8);
    let mut next = 0;
    let mut in_string = false;
    for ch in sql.chars() {
        match ch {
            '\'' => {
                in_string = !in_string;
                out.push(ch);
            }
            '?' if !in_string => {
                match params.get(next) {
                    Some(v) => out.push_str(&v.to_sql_literal()),
                    None => out.push(ch),
                }
                next += 1;
            }
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ResultSet;

    fn open_session() -> Session {
        let db = Arc::new(Mutex::new(Database::in_memory("t")));
        let statements = Arc::new(Mutex::new(StatementManager::new()));
        let mut session = Session::new(1, db, statements);
        let r = session
            .execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name VARCHAR(50))");
        assert_eq!(r, Response::UpdateCount(0));
        session
    }

    fn rows(session: &mut Session, sql: &str) -> ResultSet {
        match session.execute(sql) {
            Response::RowSet(rs) => rs,
            other => panic!("expected rows, got {:?}", other),
        }
    }

    fn row_count(session: &mut Session) -> usize {
        rows(session, "SELECT * FROM users").row_count()
    }

    #[test]
    fn test_autocommit_insert_is_permanent() {
        let mut session = open_session();
        session.execute("INSERT INTO users VALUES (1, 'ann')");
        assert_eq!(session.handle(Command::EndTransaction(EndTransactionKind::Rollback)), Response::Ok);
        assert_eq!(row_count(&mut session), 1);
    }

    #[test]
    fn test_rollback_undoes_transaction() {
        let mut session = open_session();
        session.set_autocommit(false).unwrap();
        session.execute("INSERT INTO users VALUES (1, 'ann')");
        session.execute("INSERT INTO users VALUES (2, 'bob')");
        assert_eq!(row_count(&mut session), 2);
        session.rollback().unwrap();
        assert_eq!(row_count(&mut session), 0);
    }

    #[test]
    fn test_commit_is_idempotent() {
        let mut session = open_session();
        session.set_autocommit(false).unwrap();
        session.execute("INSERT INTO users VALUES (1, 'ann')");
        session.commit().unwrap();
        session.commit().unwrap();
        session.rollback().unwrap();
        assert_eq!(row_count(&mut session), 1);
    }

    #[test]
    fn test_failed_statement_leaves_no_partial_update() {
        let mut session = open_session();
        session.execute("INSERT INTO users VALUES (1, 'ann')");
        session.execute("INSERT INTO users VALUES (2, 'bob')");
        // setting every id to 1 must fail on the second row and undo the first
        let r = session.execute("UPDATE users SET id = 1");
        assert!(r.is_error());
        let rs = rows(&mut session, "SELECT id FROM users ORDER BY id");
        assert_eq!(rs.rows[0][0], Value::Integer(1));
        assert_eq!(rs.rows[1][0], Value::Integer(2));
    }

    #[test]
    fn test_savepoint_partial_rollback() {
        let mut session = open_session();
        session.set_autocommit(false).unwrap();
        session.execute("INSERT INTO users VALUES (1, 'ann')");
        session.savepoint("sp1").unwrap();
        session.execute("INSERT INTO users VALUES (2, 'bob')");
        session.rollback_to_savepoint("sp1").unwrap();
        assert_eq!(row_count(&mut session), 1);
        // savepoint survives a partial rollback
        session.rollback_to_savepoint("sp1").unwrap();
        session.commit().unwrap();
        assert_eq!(row_count(&mut session), 1);
    }

    #[test]
    fn test_release_cascades_later_savepoints() {
        let mut session = open_session();
        session.set_autocommit(false).unwrap();
        session.savepoint("a").unwrap();
        session.savepoint("b").unwrap();
        session.release_savepoint("a").unwrap();
        assert!(matches!(
            session.rollback_to_savepoint("b"),
            Err(Error::SavepointNotFound(_))
        ));
    }

    #[test]
    fn test_savepoint_redeclare_moves_it() {
        let mut session = open_session();
        session.set_autocommit(false).unwrap();
        session.savepoint("sp").unwrap();
        session.execute("INSERT INTO users VALUES (1, 'ann')");
        session.savepoint("sp").unwrap();
        session.execute("INSERT INTO users VALUES (2, 'bob')");
        session.rollback_to_savepoint("sp").unwrap();
        assert_eq!(row_count(&mut session), 1);
    }

    #[test]
    fn test_set_autocommit_commits_pending_work() {
        let mut session = open_session();
        session.set_autocommit(false).unwrap();
        session.execute("INSERT INTO users VALUES (1, 'ann')");
        session.set_autocommit(true).unwrap();
        session.execute("ROLLBACK");
        assert_eq!(row_count(&mut session), 1);
    }

    #[test]
    fn test_prepare_reports_result_columns() {
        use crate::catalog::DataType;

        let mut session = open_session();
        let r = session.handle(Command::Prepare {
            sql: "SELECT id, name FROM users".to_string(),
        });
        match r {
            Response::PreparedAck {
                param_count,
                columns,
                ..
            } => {
                assert_eq!(param_count, 0);
                let names: Vec<&str> = columns.iter().map(|c| c.name.as_str()).collect();
                assert_eq!(names, vec!["id", "name"]);
                assert_eq!(columns[0].data_type, Some(DataType::Integer));
            }
            other => panic!("expected prepared ack, got {:?}", other),
        }

        let r = session.handle(Command::Prepare {
            sql: "INSERT INTO users VALUES (?, ?)".to_string(),
        });
        match r {
            Response::PreparedAck {
                param_count,
                columns,
                ..
            } => {
                assert_eq!(param_count, 2);
                assert!(columns.is_empty());
            }
            other => panic!("expected prepared ack, got {:?}", other),
        }
    }

    #[test]
    fn test_prepared_statement_round_trip() {
        let mut session = open_session();
        let (id, param_count) = session.prepare("INSERT INTO users VALUES (?, ?)").unwrap();
        assert_eq!(param_count, 2);
        session
            .execute_prepared(id, &[Value::Integer(1), Value::String("ann".to_string())])
            .unwrap();
        assert_eq!(row_count(&mut session), 1);
        session.free_statement(id);
        assert!(matches!(
            session.execute_prepared(id, &[Value::Integer(2), Value::Null]),
            Err(Error::InvalidPreparedStatement)
        ));
    }

    #[test]
    fn test_prepared_survives_schema_change() {
        let mut session = open_session();
        let (id, _) = session.prepare("SELECT * FROM users").unwrap();
        session.execute("CREATE INDEX idx_name ON users (name)");
        // schema version changed; the statement recompiles transparently
        let result = session.execute_prepared(id, &[]).unwrap();
        assert!(matches!(result, StatementResult::Rows(_)));
    }

    #[test]
    fn test_wrong_parameter_count() {
        let mut session = open_session();
        let (id, _) = session.prepare("INSERT INTO users VALUES (?, ?)").unwrap();
        assert!(matches!(
            session.execute_prepared(id, &[Value::Integer(1)]),
            Err(Error::ValueCountMismatch)
        ));
    }

    #[test]
    fn test_batch_stops_at_first_failure() {
        let mut session = open_session();
        let (id, _) = session.prepare("INSERT INTO users VALUES (?, ?)").unwrap();
        let rows_in = vec![
            vec![Value::Integer(1), Value::String("ann".to_string())],
            vec![Value::Integer(1), Value::String("dup".to_string())],
            vec![Value::Integer(3), Value::String("cid".to_string())],
        ];
        let (counts, error) = session.execute_batch(id, &rows_in);
        assert_eq!(counts, vec![1]);
        assert!(error.is_some());
        // the item applied before the failure stays applied
        let rs = rows(&mut session, "SELECT id FROM users");
        assert_eq!(rs.row_count(), 1);
        assert_eq!(rs.rows[0][0], Value::Integer(1));
    }

    #[test]
    fn test_batch_select_counts_minus_two() {
        let mut session = open_session();
        let (id, _) = session.prepare("SELECT * FROM users WHERE id = ?").unwrap();
        let (counts, error) =
            session.execute_batch(id, &[vec![Value::Integer(1)], vec![Value::Integer(2)]]);
        assert_eq!(counts, vec![-2, -2]);
        assert!(error.is_none());
    }

    #[test]
    fn test_nested_transaction_unwinds_on_abort() {
        let mut session = open_session();
        session.begin_nested().unwrap();
        assert!(matches!(session.begin_nested(), Err(Error::Internal(_))));
        session.execute("INSERT INTO users VALUES (1, 'ann')");
        session.end_nested(false).unwrap();
        assert_eq!(row_count(&mut session), 0);
    }

    #[test]
    fn test_nested_transaction_keeps_work_on_commit() {
        let mut session = open_session();
        session.begin_nested().unwrap();
        session.execute("INSERT INTO users VALUES (1, 'ann')");
        session.end_nested(true).unwrap();
        assert_eq!(row_count(&mut session), 1);
    }

    #[test]
    fn test_commit_without_work_is_a_no_op() {
        let mut session = open_session();
        session.set_autocommit(false).unwrap();
        session.savepoint("sp").unwrap();
        session.commit().unwrap();
        // an empty commit leaves savepoints in place
        session.execute("INSERT INTO users VALUES (1, 'ann')");
        session.rollback_to_savepoint("sp").unwrap();
        assert_eq!(row_count(&mut session), 0);
        session.disconnect().unwrap();
        assert!(session.commit().is_ok());
    }

    #[test]
    fn test_closed_session_rejects_work() {
        let mut session = open_session();
        session.disconnect().unwrap();
        let r = session.execute("SELECT * FROM users");
        match r {
            Response::Error { code, .. } => assert_eq!(code, "access_denied"),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_max_rows_limits_results() {
        let mut session = open_session();
        for i in 1..=5 {
            session.execute(&format!("INSERT INTO users VALUES ({}, 'u{}')", i, i));
        }
        session.execute("SET MAXROWS 2");
        assert_eq!(row_count(&mut session), 2);
        session.execute("SET MAXROWS 0");
        assert_eq!(row_count(&mut session), 5);
    }
}
