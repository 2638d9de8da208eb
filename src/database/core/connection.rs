//! Database connection management
//!
//! This module provides the SQLite connection wrapper that backs every collection.

use std::time::Duration;

use rusqlite::Connection;
use tracing::debug;

use crate::error::{StoreError, StoreResult};

/// How long SQLite waits on a locked database file before reporting `SQLITE_BUSY`
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Core database connection wrapper
///
/// `DatabaseConn` provides a thin wrapper around SQLite connections,
/// handling both file-based and in-memory databases with consistent
/// configuration and error handling.
pub struct DatabaseConn {
    pub conn: Connection,
}

impl DatabaseConn {
    /// Open a database at the specified path
    ///
    /// If the path is `None`, an in-memory database is created.
    pub fn open(path: Option<&str>) -> StoreResult<Self> {
        let conn = match path {
            Some(p) => Connection::open(p).map_err(|e| {
                StoreError::Connection(format!("failed to open database at '{}': {}", p, e))
            })?,
            None => Connection::open_in_memory().map_err(|e| {
                StoreError::Connection(format!("failed to create in-memory database: {}", e))
            })?,
        };

        let db = DatabaseConn { conn };
        db.configure()?;
        debug!("database connection configured ({})", path.unwrap_or(":memory:"));
        Ok(db)
    }

    /// Open a database at the specified path (convenience method)
    pub fn open_path(path: &str) -> StoreResult<Self> {
        Self::open(Some(path))
    }

    /// Create an in-memory database
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::open(None)
    }

    fn configure(&self) -> StoreResult<()> {
        let pragma_err = |what: &str, e: rusqlite::Error| {
            StoreError::Connection(format!("failed to set {}: {}", what, e))
        };

        // In-memory databases answer "memory" here, which is fine
        let _: String = self
            .conn
            .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
            .map_err(|e| pragma_err("journal mode", e))?;

        self.conn
            .execute("PRAGMA synchronous=NORMAL", [])
            .map_err(|e| pragma_err("synchronous mode", e))?;

        self.conn
            .execute("PRAGMA foreign_keys=ON", [])
            .map_err(|e| pragma_err("foreign keys", e))?;

        self.conn
            .busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| pragma_err("busy timeout", e))?;

        Ok(())
    }

    /// Check if a table exists in the database
    pub fn table_exists(&self, table_name: &str) -> StoreResult<bool> {
        table_exists(&self.conn, table_name)
    }
}

/// Check if a table exists on any connection or open transaction
pub(crate) fn table_exists(conn: &Connection, table_name: &str) -> StoreResult<bool> {
    let count: i32 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            [table_name],
            |row| row.get(0),
        )
        .map_err(|e| StoreError::transaction(table_name, e))?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let db = DatabaseConn::open_in_memory();
        assert!(db.is_ok());
    }

    #[test]
    fn test_open_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("HR_db.sqlite3");
        let db = DatabaseConn::open_path(path.to_str().unwrap()).unwrap();
        db.conn
            .execute("CREATE TABLE sample (id INTEGER PRIMARY KEY)", [])
            .unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_open_bad_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("nested").join("db.sqlite3");
        let result = DatabaseConn::open_path(path.to_str().unwrap());
        assert!(matches!(result, Err(StoreError::Connection(_))));
    }

    #[test]
    fn test_table_exists() {
        let db = DatabaseConn::open_in_memory().unwrap();
        db.conn
            .execute("CREATE TABLE test_table (id INTEGER PRIMARY KEY)", [])
            .unwrap();

        assert!(db.table_exists("test_table").unwrap());
        assert!(!db.table_exists("nonexistent_table").unwrap());
    }
}
