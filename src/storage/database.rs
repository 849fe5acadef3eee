//! Database connection wrapper and initialization.
//!
//! Provides a thread-safe wrapper around rusqlite for async operations.
//! All access goes through `spawn_blocking` so SQLite work never blocks the
//! async runtime; a single mutex-guarded connection serializes writers,
//! which also makes multi-statement operations (like job claims) atomic.

use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;
use thiserror::Error;
use tokio::sync::Mutex;

use super::schema;

/// Errors that can occur during database operations.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("migration failed: {0}")]
    MigrationFailed(String),

    #[error("blocking task failed: {0}")]
    TaskFailed(String),
}

/// Result type for database operations.
pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Thread-safe database handle.
///
/// Cloning is cheap; all clones share the same underlying connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// Enables WAL and foreign keys, then runs migrations so the schema is
    /// up to date before the handle is returned.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open(&path)?;
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            Ok(conn)
        })
        .await
        .map_err(|e| DatabaseError::TaskFailed(e.to_string()))??;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.run_migrations().await?;

        Ok(db)
    }

    /// Opens an in-memory database for testing.
    pub async fn open_in_memory() -> Result<Self> {
        let conn = tokio::task::spawn_blocking(|| -> Result<Connection> {
            let conn = Connection::open_in_memory()?;
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            Ok(conn)
        })
        .await
        .map_err(|e| DatabaseError::TaskFailed(e.to_string()))??;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.run_migrations().await?;

        Ok(db)
    }

    /// Runs all schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = conn.blocking_lock();

            for migration in schema::all_migrations() {
                conn.execute_batch(migration)
                    .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
            }

            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::TaskFailed(e.to_string()))?
    }

    /// Executes a function with access to the database connection.
    ///
    /// The function runs in a blocking task; while it holds the lock no
    /// other operation can interleave with it.
    pub async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            f(&conn)
        })
        .await
        .map_err(|e| DatabaseError::TaskFailed(e.to_string()))?
    }

    /// Executes a transaction with the given function.
    ///
    /// The transaction is committed on success or rolled back on error.
    pub async fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            let tx = conn.transaction()?;
            let result = f(&tx)?;
            tx.commit()?;
            Ok(result)
        })
        .await
        .map_err(|e| DatabaseError::TaskFailed(e.to_string()))?
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}
