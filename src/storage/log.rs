//! Append-only redo log for HearthDB
//!
//! Every statement that changes schema or data is appended as plain text,
//! including transaction markers (COMMIT, ROLLBACK, savepoints, autocommit
//! changes). On reopen the lines are replayed through an internal session,
//! which restores exactly the committed state. A clean shutdown truncates
//! the log after checkpointing.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Error, Result};

/// The append-only statement log.
#[derive(Debug)]
pub struct ScriptLog {
    path: PathBuf,
    file: Option<File>,
}

impl ScriptLog {
    /// Open the log for appending, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Self::io_err(&path, "open", e))?;
        Ok(Self {
            path,
            file: Some(file),
        })
    }

    /// Read all logged statements for replay. Missing file means an empty
    /// history.
    pub fn read_statements(path: impl AsRef<Path>) -> Result<Vec<String>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let file = File::open(path).map_err(|e| Self::io_err(path, "open", e))?;
        let reader = BufReader::new(file);
        let mut statements = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(|e| Self::io_err(path, "read", e))?;
            if !line.trim().is_empty() {
                statements.push(line);
            }
        }
        debug!(count = statements.len(), "redo log read");
        Ok(statements)
    }

    /// Append one statement. Embedded newlines are collapsed so each line
    /// stays one replayable statement.
    pub fn write_statement(&mut self, sql: &str) -> Result<()> {
        let path = self.path.clone();
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::Internal("redo log is closed".to_string()))?;
        let line = sql.replace(['\n', '\r'], " ");
        writeln!(file, "{}", line).map_err(|e| Self::io_err(&path, "write", e))?;
        Ok(())
    }

    /// Sync appended statements to disk.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush()
                .map_err(|e| Self::io_err(&self.path, "write", e))?;
        }
        Ok(())
    }

    /// Drop all history after a checkpoint wrote the state elsewhere.
    pub fn truncate(&mut self) -> Result<()> {
        self.file = None;
        let file = File::create(&self.path).map_err(|e| Self::io_err(&self.path, "write", e))?;
        drop(file);
        self.file = Some(
            OpenOptions::new()
                .append(true)
                .open(&self.path)
                .map_err(|e| Self::io_err(&self.path, "open", e))?,
        );
        info!(path = %self.path.display(), "redo log truncated");
        Ok(())
    }

    fn io_err(path: &Path, op: &'static str, source: std::io::Error) -> Error {
        Error::FileIo {
            op,
            path: path.display().to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_append_and_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.script");

        let mut log = ScriptLog::open(&path).unwrap();
        log.write_statement("INSERT INTO t VALUES (1)").unwrap();
        log.write_statement("COMMIT").unwrap();
        log.flush().unwrap();

        let statements = ScriptLog::read_statements(&path).unwrap();
        assert_eq!(
            statements,
            vec!["INSERT INTO t VALUES (1)".to_string(), "COMMIT".to_string()]
        );
    }

    #[test]
    fn test_missing_log_is_empty() {
        let dir = tempdir().unwrap();
        let statements = ScriptLog::read_statements(dir.path().join("none.script")).unwrap();
        assert!(statements.is_empty());
    }

    #[test]
    fn test_truncate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db.script");
        let mut log = ScriptLog::open(&path).unwrap();
        log.write_statement("CREATE TABLE t (a INTEGER)").unwrap();
        log.truncate().unwrap();
        log.write_statement("COMMIT").unwrap();
        log.flush().unwrap();
        assert_eq!(
            ScriptLog::read_statements(&path).unwrap(),
            vec!["COMMIT".to_string()]
        );
    }
}
