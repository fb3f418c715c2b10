//! Database connection pool management.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

use crate::error::DbError;

/// Database connection pool wrapper.
///
/// Cheap to clone; every clone talks to the same SQLite database.
#[derive(Clone)]
pub struct DbPool {
    pool: SqlitePool,
}

impl DbPool {
    /// Open (creating if needed) the SQLite database at `db_path`.
    ///
    /// `":memory:"` yields a private in-memory database held by a single
    /// connection, which is what the tests use.
    pub async fn new(db_path: &str) -> Result<Self, DbError> {
        let in_memory = db_path == ":memory:";
        let mut options = SqliteConnectOptions::from_str(db_path)?.create_if_missing(true);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new()
                .max_connections(10)
                .connect_with(options)
                .await?
        };

        info!("Connected to database at {}", db_path);

        Ok(Self { pool })
    }

    /// Get a reference to the underlying SQLite pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the event log and checkpoint tables.
    pub async fn migrate(&self) -> Result<(), DbError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations completed");
        Ok(())
    }
}
