//! Schema setup for the checkpoint and event tables.
//!
//! `001_scan_checkpoints.sql` creates one row per (scan, space) plus the
//! indexes behind the staleness and status queries. `002_scan_events.sql`
//! creates the event log keyed by (scan, sequence) and the trigger that
//! keeps it append-only. Both files are compiled into the binary.

use crate::error::{DatabaseError, Result};
use sqlx::migrate::Migrator;
use sqlx::{Pool, Sqlite};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Newest schema version embedded in this build.
#[must_use]
pub fn latest_version() -> i64 {
    MIGRATOR.iter().map(|m| m.version).max().unwrap_or(0)
}

/// Bring the checkpoint and event tables up to [`latest_version`].
///
/// Versions already recorded in `_sqlx_migrations` are skipped, so every
/// process start calls this.
///
/// # Errors
/// Returns `DatabaseError::Migration` if a schema file fails to apply or an
/// applied file no longer matches its embedded checksum.
pub async fn run_migrations(pool: &Pool<Sqlite>) -> Result<()> {
    let target = latest_version();
    tracing::debug!(target, "Applying scan schema");

    MIGRATOR
        .run(pool)
        .await
        .map_err(|e| DatabaseError::Migration(format!("could not apply scan schema: {e}")))?;

    tracing::info!(version = target, "Scan schema ready");
    Ok(())
}

/// Highest successfully applied schema version; 0 for a fresh database.
pub async fn get_schema_version(pool: &Pool<Sqlite>) -> Result<i64> {
    let tracked: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = '_sqlx_migrations'",
    )
    .fetch_one(pool)
    .await?;
    if tracked == 0 {
        return Ok(0);
    }

    let version: Option<i64> =
        sqlx::query_scalar("SELECT MAX(version) FROM _sqlx_migrations WHERE success = 1")
            .fetch_one(pool)
            .await?;
    Ok(version.unwrap_or(0))
}
