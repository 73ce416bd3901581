use std::path::Path;

use rusqlite::Connection;

use crate::errors::{KgError, Result};

/// Schema for the resolver lookup table.
const LOOKUP_SCHEMA_SQL: &str = include_str!("lookup_schema.sql");

/// Schema for the document store output.
const STORE_SCHEMA_SQL: &str = include_str!("store_schema.sql");

/// SQLite database backing a lookup table or a document store.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens (or creates) the database at `db_path`, creating parent
    /// directories if needed, and applies performance pragmas.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| KgError::Database {
                    message: format!("failed to create database directory: {e}"),
                    operation: "open".to_string(),
                })?;
            }
        }

        let conn = Connection::open(db_path).map_err(|e| KgError::Database {
            message: format!("failed to open database: {e}"),
            operation: "open".to_string(),
        })?;

        Self::apply_pragmas(&conn)?;

        Ok(Self { conn })
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| KgError::Database {
            message: format!("failed to open in-memory database: {e}"),
            operation: "open_in_memory".to_string(),
        })?;
        Ok(Self { conn })
    }

    /// Returns a reference to the underlying SQLite connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Creates the lookup tables if they are missing.
    pub fn ensure_lookup_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(LOOKUP_SCHEMA_SQL)
            .map_err(|e| KgError::Database {
                message: format!("failed to apply lookup schema: {e}"),
                operation: "ensure_lookup_schema".to_string(),
            })
    }

    /// Creates the document store tables if they are missing.
    pub fn ensure_store_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(STORE_SCHEMA_SQL)
            .map_err(|e| KgError::Database {
                message: format!("failed to apply store schema: {e}"),
                operation: "ensure_store_schema".to_string(),
            })
    }

    /// Returns `true` if a table named `name` exists.
    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                [name],
                |row| row.get(0),
            )
            .map_err(|e| KgError::Database {
                message: format!("failed to check table existence: {e}"),
                operation: "table_exists".to_string(),
            })?;
        Ok(count > 0)
    }

    /// Applies performance-oriented SQLite pragmas.
    fn apply_pragmas(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 120000;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -65536;
             PRAGMA temp_store = MEMORY;",
        )
        .map_err(|e| KgError::Database {
            message: format!("failed to apply pragmas: {e}"),
            operation: "apply_pragmas".to_string(),
        })
    }
}
