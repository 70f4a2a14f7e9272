//! HearthDB - interactive SQL shell

use anyhow::Result;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing_subscriber::EnvFilter;

use hearthdb::executor::ResultSet;
use hearthdb::session::{Response, Session};
use hearthdb::HearthDb;

/// Print welcome banner
fn print_banner(name: &str) {
    println!(
        r#"
 _   _                _   _     ____  ____
| | | | ___  __ _ _ _| |_| |__ |  _ \| __ )
| |_| |/ _ \/ _` | '_|  _| '_ \| | | |  _ \
|  _  |  __/ (_| | | | |_| | | | |_| | |_) |
|_| |_|\___|\__,_|_|  \__|_| |_|____/|____/

 An embedded relational database engine in Rust
 Connected to: {}
 Type '.help' for help, '.quit' to exit
"#,
        name
    );
}

/// Print help message
fn print_help() {
    println!(
        r#"
Commands:
  .help              Show this help message
  .quit              Exit HearthDB
  .tables            List all tables
  .schema <table>    Show table schema
  .clear             Clear screen

SQL Commands:
  CREATE TABLE ...   Create a new table
  INSERT INTO ...    Insert rows
  SELECT ...         Query data
  UPDATE ...         Update rows
  DELETE FROM ...    Delete rows
  COMMIT / ROLLBACK  End the current transaction
  SET AUTOCOMMIT     Toggle autocommit
  SHUTDOWN [COMPACT] Checkpoint and close the database

Examples:
  CREATE TABLE users (id INTEGER PRIMARY KEY, name VARCHAR(100));
  INSERT INTO users VALUES (1, 'Alice');
  SELECT * FROM users WHERE id = 1;
"#
    );
}

/// Format a result set as a bordered table
fn format_results(rs: &ResultSet) -> String {
    let columns = &rs.column_names;
    if columns.is_empty() && rs.rows.is_empty() {
        return String::new();
    }

    // Calculate column widths
    let mut widths: Vec<usize> = columns.iter().map(|c| c.len()).collect();
    for row in &rs.rows {
        for (i, value) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(format!("{}", value).len());
            }
        }
    }

    let mut output = String::new();

    let separator: String = widths
        .iter()
        .map(|w| "-".repeat(*w + 2))
        .collect::<Vec<_>>()
        .join("+");
    let separator = format!("+{}+\n", separator);

    output.push_str(&separator);
    let header: String = columns
        .iter()
        .zip(&widths)
        .map(|(c, w)| format!(" {:^width$} ", c, width = *w))
        .collect::<Vec<_>>()
        .join("|");
    output.push_str(&format!("|{}|\n", header));
    output.push_str(&separator);

    for row in &rs.rows {
        let row_str: String = row
            .iter()
            .zip(&widths)
            .map(|(v, w)| format!(" {:>width$} ", v, width = *w))
            .collect::<Vec<_>>()
            .join("|");
        output.push_str(&format!("|{}|\n", row_str));
    }

    if !rs.rows.is_empty() {
        output.push_str(&separator);
    }
    output.push_str(&format!("{} row(s) returned\n", rs.row_count()));
    output
}

/// Execute one SQL statement through the session
fn execute_sql(sql: &str, session: &mut Session) {
    let sql = sql.trim().trim_end_matches(';');
    if sql.is_empty() {
        return;
    }

    match session.execute(sql) {
        Response::RowSet(rs) => print!("{}", format_results(&rs)),
        Response::UpdateCount(n) => println!("{} row(s) affected", n),
        Response::Ok => println!("OK"),
        Response::Error { message, code } => eprintln!("Error ({}): {}", code, message),
        other => println!("{:?}", other),
    }
}

/// Handle special dot commands. Returns false when the shell should exit.
fn handle_special_command(cmd: &str, instance: &HearthDb) -> bool {
    let parts: Vec<&str> = cmd.split_whitespace().collect();

    match parts.first().copied() {
        Some(".help") => print_help(),
        Some(".quit") | Some(".exit") => return false,
        Some(".tables") => match instance.table_names() {
            Ok(tables) if tables.is_empty() => println!("No tables found."),
            Ok(tables) => {
                println!("Tables:");
                for table in tables {
                    println!("  {}", table);
                }
            }
            Err(e) => eprintln!("Error: {}", e),
        },
        Some(".schema") => {
            let names = match parts.get(1) {
                Some(name) => vec![name.to_string()],
                None => instance.table_names().unwrap_or_default(),
            };
            for name in names {
                match instance.table_info(&name) {
                    Ok(info) => println!("{}", info),
                    Err(e) => eprintln!("Error: {}", e),
                }
            }
        }
        Some(".clear") => {
            // ANSI escape code
            print!("\x1B[2J\x1B[1;1H");
        }
        Some(cmd) => {
            eprintln!("Unknown command: {}", cmd);
            eprintln!("Type '.help' for available commands.");
        }
        None => {}
    }
    true
}

fn run_repl(mut instance: HearthDb, name: &str) -> Result<()> {
    let mut session = instance.connect()?;
    print_banner(name);

    let mut editor = DefaultEditor::new()?;
    let mut input_buffer = String::new();

    loop {
        let prompt = if input_buffer.is_empty() {
            "hearthdb> "
        } else {
            "     ...> "
        };
        let line = match editor.readline(prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                input_buffer.clear();
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("Error reading input: {}", e);
                continue;
            }
        };

        let trimmed = line.trim();

        if input_buffer.is_empty() && trimmed.starts_with('.') {
            editor.add_history_entry(trimmed)?;
            if !handle_special_command(trimmed, &instance) {
                break;
            }
            continue;
        }

        if trimmed.is_empty() {
            continue;
        }

        if !input_buffer.is_empty() {
            input_buffer.push(' ');
        }
        input_buffer.push_str(trimmed);

        // A statement runs once its terminating semicolon arrives
        if trimmed.ends_with(';') {
            let sql = std::mem::take(&mut input_buffer);
            editor.add_history_entry(&sql)?;
            execute_sql(&sql, &mut session);
            if session.is_closed() {
                break;
            }
        }
    }

    if !session.is_closed() && instance.is_open() {
        session.execute("SHUTDOWN");
    }
    println!("Goodbye!");
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let path = std::env::args().nth(1);
    match path {
        Some(path) => {
            let instance = HearthDb::open(&path)?;
            run_repl(instance, &path)
        }
        None => {
            let instance = HearthDb::open_in_memory("mem");
            run_repl(instance, "mem (in-memory)")
        }
    }
}
