//! Lantern Database Layer
//!
//! Provides durable storage for scan checkpoints and the scan event log.
//! Uses `SQLx` with `SQLite` and embedded migrations; in-memory
//! implementations of the same store traits are available for embedding.
//!
//! # Architecture
//!
//! - **Checkpoints**: one row per (scan, space); acquisition is a single
//!   guarded UPSERT so two processes can never both hold RUNNING, and a
//!   holder's later writes only land while the row is still its own
//! - **Events**: append-only, keyed by (scan, sequence); an UPDATE trigger
//!   rejects mutation of recorded events
//! - **Replay**: events stream lazily in sequence order with keyset paging
//! - **Migrations**: SQL migrations are embedded and versioned using `SQLx`
//!
//! # Example
//!
//! ```ignore
//! use lantern_db::{CheckpointStore, Database};
//!
//! let db = Database::new("lantern.db").await?;
//! db.run_migrations().await?;
//! let checkpoints = db.checkpoint_store();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod checkpoints;
mod codec;
pub mod connection;
pub mod error;
pub mod events;
pub mod memory;
pub mod migrations;

// Re-export commonly used types
pub use checkpoints::{Acquisition, CheckpointStore, SqliteCheckpointStore};
pub use error::{DatabaseError, Result};
pub use events::{EventStore, EventStream, SqliteEventStore};
pub use memory::{InMemoryCheckpointStore, InMemoryEventStore};

use sqlx::{Pool, Sqlite};
use std::path::Path;

/// High-level database handle owning the connection pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Open (creating if missing) the database at `path`.
    ///
    /// # Errors
    /// Returns `DatabaseError::Open` if the database cannot be opened.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let pool = connection::connect(path).await?;
        Ok(Self { pool })
    }

    /// Open a private in-memory database.
    pub async fn in_memory() -> Result<Self> {
        Self::new(":memory:").await
    }

    /// Run all pending database migrations.
    ///
    /// # Errors
    /// Returns `DatabaseError::Migration` if any migration fails.
    pub async fn run_migrations(&self) -> Result<()> {
        migrations::run_migrations(&self.pool).await
    }

    /// Get the current schema version.
    pub async fn get_schema_version(&self) -> Result<i64> {
        migrations::get_schema_version(&self.pool).await
    }

    /// Get a reference to the underlying connection pool.
    #[must_use]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Checkpoint store sharing this database's pool.
    #[must_use]
    pub fn checkpoint_store(&self) -> SqliteCheckpointStore {
        SqliteCheckpointStore::new(self.pool.clone())
    }

    /// Event store sharing this database's pool.
    #[must_use]
    pub fn event_store(&self) -> SqliteEventStore {
        SqliteEventStore::new(self.pool.clone())
    }

    /// Close the database connection gracefully.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_database_migrations() {
        let db = Database::in_memory().await.expect("create database");

        let version_before = db.get_schema_version().await.expect("get version");
        assert_eq!(version_before, 0);

        db.run_migrations().await.expect("run migrations");

        let version_after = db.get_schema_version().await.expect("get version");
        assert_eq!(version_after, 2);
    }

    #[tokio::test]
    async fn test_event_columns() {
        let db = Database::in_memory().await.expect("create database");
        db.run_migrations().await.expect("run migrations");

        let columns: Vec<String> =
            sqlx::query_scalar("SELECT name FROM pragma_table_info('scan_events') ORDER BY cid")
                .fetch_all(db.pool())
                .await
                .expect("query columns");

        assert_eq!(
            columns,
            vec![
                "scan_id",
                "sequence",
                "space_key",
                "event_type",
                "occurred_at",
                "page_id",
                "page_title",
                "attachment_name",
                "detected_entities",
                "summary_by_category",
                "progress_percentage",
                "error_message"
            ]
        );
    }

    #[tokio::test]
    async fn test_database_close() {
        let db = Database::in_memory().await.expect("create database");
        db.close().await;
    }
}
