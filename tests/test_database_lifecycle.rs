//! End-to-end tests: SQL execution, transactions, persistence, shutdown.

use hearthdb::executor::ResultSet;
use hearthdb::session::{Command, EndTransactionKind, Response, Session};
use hearthdb::storage::Value;
use hearthdb::HearthDb;

fn exec(session: &mut Session, sql: &str) {
    match session.execute(sql) {
        Response::Error { message, .. } => panic!("{} failed: {}", sql, message),
        _ => {}
    }
}

fn query(session: &mut Session, sql: &str) -> ResultSet {
    match session.execute(sql) {
        Response::RowSet(rs) => rs,
        other => panic!("{} did not return rows: {:?}", sql, other),
    }
}

fn seed(session: &mut Session, cached: bool) {
    let kind = if cached { "CACHED " } else { "" };
    exec(
        session,
        &format!(
            "CREATE {}TABLE accounts (id INTEGER PRIMARY KEY, owner VARCHAR(50) NOT NULL, balance INTEGER)",
            kind
        ),
    );
    exec(session, "INSERT INTO accounts VALUES (1, 'ann', 100)");
    exec(session, "INSERT INTO accounts VALUES (2, 'bob', 250)");
}

#[test]
fn test_basic_sql_round_trip() {
    let mut instance = HearthDb::open_in_memory("t");
    let mut session = instance.connect().unwrap();
    seed(&mut session, false);

    let rs = query(
        &mut session,
        "SELECT owner, balance FROM accounts WHERE balance > 150",
    );
    assert_eq!(rs.row_count(), 1);
    assert_eq!(rs.rows[0][0], Value::String("bob".to_string()));

    assert_eq!(
        session.execute("UPDATE accounts SET balance = balance - 50 WHERE id = 2"),
        Response::UpdateCount(1)
    );
    let rs = query(&mut session, "SELECT SUM(balance) FROM accounts");
    assert_eq!(rs.rows[0][0], Value::Integer(300));

    assert_eq!(
        session.execute("DELETE FROM accounts WHERE id = 1"),
        Response::UpdateCount(1)
    );
    let rs = query(&mut session, "SELECT COUNT(*) FROM accounts");
    assert_eq!(rs.rows[0][0], Value::Integer(1));
}

#[test]
fn test_joins_grouping_and_set_operations() {
    let mut instance = HearthDb::open_in_memory("t");
    let mut session = instance.connect().unwrap();
    exec(
        &mut session,
        "CREATE TABLE depts (id INTEGER PRIMARY KEY, name VARCHAR(30))",
    );
    exec(
        &mut session,
        "CREATE TABLE staff (id INTEGER PRIMARY KEY, dept INTEGER, pay INTEGER)",
    );
    exec(&mut session, "INSERT INTO depts VALUES (1, 'eng')");
    exec(&mut session, "INSERT INTO depts VALUES (2, 'ops')");
    exec(&mut session, "INSERT INTO staff VALUES (10, 1, 70)");
    exec(&mut session, "INSERT INTO staff VALUES (11, 1, 90)");
    exec(&mut session, "INSERT INTO staff VALUES (12, 2, 60)");

    let rs = query(
        &mut session,
        "SELECT d.name, AVG(s.pay) FROM depts d INNER JOIN staff s ON d.id = s.dept \
         GROUP BY d.name ORDER BY d.name",
    );
    assert_eq!(rs.row_count(), 2);
    assert_eq!(rs.rows[0][0], Value::String("eng".to_string()));
    assert_eq!(rs.rows[0][1], Value::BigInt(80));

    let rs = query(
        &mut session,
        "SELECT id FROM staff WHERE pay > 80 UNION SELECT id FROM staff WHERE dept = 2 ORDER BY 1",
    );
    let ids: Vec<&Value> = rs.rows.iter().map(|r| &r[0]).collect();
    assert_eq!(ids, vec![&Value::Integer(11), &Value::Integer(12)]);
}

#[test]
fn test_transaction_commit_and_rollback() {
    let mut instance = HearthDb::open_in_memory("t");
    let mut session = instance.connect().unwrap();
    seed(&mut session, false);

    exec(&mut session, "SET AUTOCOMMIT FALSE");
    exec(
        &mut session,
        "UPDATE accounts SET balance = balance - 100 WHERE id = 1",
    );
    exec(
        &mut session,
        "UPDATE accounts SET balance = balance + 100 WHERE id = 2",
    );
    assert_eq!(
        session.handle(Command::EndTransaction(EndTransactionKind::Rollback)),
        Response::Ok
    );
    let rs = query(&mut session, "SELECT balance FROM accounts WHERE id = 1");
    assert_eq!(rs.rows[0][0], Value::Integer(100));

    exec(&mut session, "INSERT INTO accounts VALUES (3, 'cid', 10)");
    exec(&mut session, "COMMIT");
    exec(&mut session, "ROLLBACK");
    let rs = query(&mut session, "SELECT COUNT(*) FROM accounts");
    assert_eq!(rs.rows[0][0], Value::Integer(3));
}

#[test]
fn test_savepoints_within_transaction() {
    let mut instance = HearthDb::open_in_memory("t");
    let mut session = instance.connect().unwrap();
    seed(&mut session, false);

    exec(&mut session, "SET AUTOCOMMIT FALSE");
    exec(&mut session, "INSERT INTO accounts VALUES (3, 'cid', 10)");
    exec(&mut session, "SAVEPOINT after_cid");
    exec(&mut session, "DELETE FROM accounts");
    exec(&mut session, "ROLLBACK TO SAVEPOINT after_cid");
    exec(&mut session, "COMMIT");

    let rs = query(&mut session, "SELECT COUNT(*) FROM accounts");
    assert_eq!(rs.rows[0][0], Value::Integer(3));
}

#[test]
fn test_persistence_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("testdb");

    {
        let mut instance = HearthDb::open(&base).unwrap();
        let mut session = instance.connect().unwrap();
        seed(&mut session, true);
        exec(&mut session, "CREATE INDEX idx_owner ON accounts (owner)");
        exec(&mut session, "SHUTDOWN");
    }

    let mut instance = HearthDb::open(&base).unwrap();
    let mut session = instance.connect().unwrap();
    let rs = query(&mut session, "SELECT owner FROM accounts ORDER BY id");
    assert_eq!(rs.row_count(), 2);
    assert_eq!(rs.rows[0][0], Value::String("ann".to_string()));

    // the index came back too
    let err = session.execute("CREATE INDEX idx_owner ON accounts (owner)");
    assert!(err.is_error());
}

#[test]
fn test_uncommitted_work_is_lost_on_crash() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("crashdb");

    {
        let mut instance = HearthDb::open(&base).unwrap();
        let mut session = instance.connect().unwrap();
        seed(&mut session, false);
        exec(&mut session, "SET AUTOCOMMIT FALSE");
        exec(&mut session, "INSERT INTO accounts VALUES (3, 'cid', 10)");
        // no commit, no shutdown: simulates a crash
    }

    let mut instance = HearthDb::open(&base).unwrap();
    let mut session = instance.connect().unwrap();
    let rs = query(&mut session, "SELECT COUNT(*) FROM accounts");
    assert_eq!(rs.rows[0][0], Value::Integer(2));
}

#[test]
fn test_shutdown_compact_preserves_data() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("compactdb");

    {
        let mut instance = HearthDb::open(&base).unwrap();
        let mut session = instance.connect().unwrap();
        seed(&mut session, true);
        for i in 3..20 {
            exec(
                &mut session,
                &format!("INSERT INTO accounts VALUES ({}, 'u{}', {})", i, i, i * 10),
            );
        }
        exec(&mut session, "DELETE FROM accounts WHERE id >= 10");
        exec(&mut session, "SHUTDOWN COMPACT");
    }

    let mut instance = HearthDb::open(&base).unwrap();
    let mut session = instance.connect().unwrap();
    let rs = query(&mut session, "SELECT COUNT(*) FROM accounts");
    assert_eq!(rs.rows[0][0], Value::Integer(9));
}

#[test]
fn test_shutdown_closes_all_sessions() {
    let mut instance = HearthDb::open_in_memory("t");
    let mut first = instance.connect().unwrap();
    let mut second = instance.connect().unwrap();
    seed(&mut first, false);

    exec(&mut first, "SHUTDOWN");
    assert!(!instance.is_open());
    let r = second.execute("SELECT * FROM accounts");
    assert!(r.is_error());
}

#[test]
fn test_prepared_statement_through_command_surface() {
    let mut instance = HearthDb::open_in_memory("t");
    let mut session = instance.connect().unwrap();
    seed(&mut session, false);

    let id = match session.handle(Command::Prepare {
        sql: "INSERT INTO accounts VALUES (?, ?, ?)".to_string(),
    }) {
        Response::PreparedAck {
            id,
            param_count,
            columns,
        } => {
            assert_eq!(param_count, 3);
            assert!(columns.is_empty());
            id
        }
        other => panic!("prepare failed: {:?}", other),
    };

    let response = session.handle(Command::ExecuteBatch {
        id,
        rows: vec![
            vec![
                Value::Integer(3),
                Value::String("cid".to_string()),
                Value::Integer(5),
            ],
            vec![
                Value::Integer(4),
                Value::String("dee".to_string()),
                Value::Integer(7),
            ],
        ],
    });
    match response {
        Response::Batch { counts, error } => {
            assert_eq!(counts, vec![1, 1]);
            assert!(error.is_none());
        }
        other => panic!("batch failed: {:?}", other),
    }

    // a schema change in between does not invalidate the handle
    exec(&mut session, "CREATE INDEX idx_owner ON accounts (owner)");
    let response = session.handle(Command::ExecutePrepared {
        id,
        params: vec![
            Value::Integer(5),
            Value::String("eve".to_string()),
            Value::Null,
        ],
    });
    assert_eq!(response, Response::UpdateCount(1));

    assert_eq!(session.handle(Command::FreeStatement { id }), Response::Ok);
    let response = session.handle(Command::ExecutePrepared {
        id,
        params: vec![Value::Integer(6), Value::String("fay".to_string()), Value::Null],
    });
    assert!(response.is_error());
}

#[test]
fn test_prepared_dml_is_durable() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("preps");

    {
        let mut instance = HearthDb::open(&base).unwrap();
        let mut session = instance.connect().unwrap();
        seed(&mut session, false);
        let (id, _) = session
            .prepare("UPDATE accounts SET owner = ? WHERE id = ?")
            .unwrap();
        session
            .execute_prepared(
                id,
                &[Value::String("o'brien".to_string()), Value::Integer(1)],
            )
            .unwrap();
        exec(&mut session, "SHUTDOWN");
    }

    let mut instance = HearthDb::open(&base).unwrap();
    let mut session = instance.connect().unwrap();
    let rs = query(&mut session, "SELECT owner FROM accounts WHERE id = 1");
    assert_eq!(rs.rows[0][0], Value::String("o'brien".to_string()));
}
