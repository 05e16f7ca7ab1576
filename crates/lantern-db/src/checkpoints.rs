//! Checkpoint storage.
//!
//! The checkpoint row is the single point of mutual exclusion between scan
//! processes. [`CheckpointStore::acquire_running`] is an atomic
//! compare-and-set on its status. While a process holds RUNNING it writes
//! through [`CheckpointStore::save_held`], which only lands while the row is
//! still RUNNING under that owner, so a holder whose lease was taken over
//! cannot overwrite the new holder's cursor.

use crate::codec::{
    decode_count, decode_scan_id, decode_space_key, decode_timestamp, encode_count,
    encode_timestamp,
};
use crate::error::{DatabaseError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lantern_core::{CheckpointStatus, ScanCheckpoint, ScanCursor, ScanId, SpaceKey};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};

/// Result of trying to move a checkpoint into RUNNING.
#[derive(Debug, Clone, PartialEq)]
pub enum Acquisition {
    /// The caller now holds RUNNING.
    Acquired {
        /// The checkpoint as stored after acquisition
        checkpoint: ScanCheckpoint,
        /// Whether a previous run already advanced the cursor
        resumed: bool,
    },
    /// The space already finished in this scan; nothing to do.
    AlreadyCompleted(ScanCheckpoint),
    /// The space already failed in this scan; FAILED rows are history and
    /// a retry needs a new scan.
    AlreadyFailed(ScanCheckpoint),
}

/// Durable owner of scan checkpoints.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Insert or replace the checkpoint for its (scan, space).
    async fn save(&self, checkpoint: &ScanCheckpoint) -> Result<()>;

    /// Write a checkpoint the caller holds.
    ///
    /// Lands only while the stored row is RUNNING and owned by
    /// `checkpoint.owner`. Progress, pause and terminal writes of a holder all
    /// go through here.
    ///
    /// # Errors
    /// Returns `DatabaseError::CheckpointConflict` when the row is gone, no
    /// longer RUNNING, or was taken over by another owner.
    async fn save_held(&self, checkpoint: &ScanCheckpoint) -> Result<()>;

    /// Atomically move the checkpoint for (scan, space) into RUNNING.
    ///
    /// Succeeds when no checkpoint exists, or it is PAUSED, or it is a
    /// RUNNING checkpoint last written before `stale_before`. COMPLETED and
    /// FAILED rows are terminal and are reported as they are.
    ///
    /// # Errors
    /// Returns `DatabaseError::CheckpointConflict` when another holder's
    /// RUNNING checkpoint is still fresh.
    async fn acquire_running(
        &self,
        scan_id: &ScanId,
        space_key: &SpaceKey,
        owner: &str,
        stale_before: DateTime<Utc>,
    ) -> Result<Acquisition>;

    /// Find the checkpoint of one (scan, space).
    async fn find_by_scan_and_space(
        &self,
        scan_id: &ScanId,
        space_key: &SpaceKey,
    ) -> Result<Option<ScanCheckpoint>>;

    /// All checkpoints of a scan, ordered by space key.
    async fn find_by_scan(&self, scan_id: &ScanId) -> Result<Vec<ScanCheckpoint>>;

    /// All checkpoints of a space across scans, most recent first.
    async fn find_by_space(&self, space_key: &SpaceKey) -> Result<Vec<ScanCheckpoint>>;

    /// The most recently written checkpoint of a space across all scans.
    async fn find_latest_by_space(&self, space_key: &SpaceKey) -> Result<Option<ScanCheckpoint>>;

    /// Delete every checkpoint of a scan.
    async fn delete_by_scan(&self, scan_id: &ScanId) -> Result<u64>;

    /// Delete RUNNING and PAUSED checkpoints, keeping COMPLETED and FAILED history.
    async fn delete_active_scan_checkpoints(&self) -> Result<u64>;

    /// Delete every checkpoint.
    async fn delete_all(&self) -> Result<u64>;
}

const SELECT_COLUMNS: &str = "SELECT scan_id, space_key, status, cursor_page_id, cursor_attachment, \
     pages_processed, total_pages, owner, error_message, started_at, updated_at \
     FROM scan_checkpoints";

/// `SQLite`-backed checkpoint store.
#[derive(Debug, Clone)]
pub struct SqliteCheckpointStore {
    pool: Pool<Sqlite>,
}

impl SqliteCheckpointStore {
    /// Create a store over an already migrated pool.
    #[must_use]
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    fn decode_row(row: &SqliteRow) -> Result<ScanCheckpoint> {
        let status: String = row.try_get("status")?;
        let started_at: String = row.try_get("started_at")?;
        let updated_at: String = row.try_get("updated_at")?;

        Ok(ScanCheckpoint {
            scan_id: decode_scan_id(row.try_get("scan_id")?)?,
            space_key: decode_space_key(row.try_get("space_key")?)?,
            status: status
                .parse()
                .map_err(|e: lantern_core::LanternError| DatabaseError::Decode(e.to_string()))?,
            cursor: ScanCursor {
                page_id: row.try_get("cursor_page_id")?,
                attachment_name: row.try_get("cursor_attachment")?,
            },
            pages_processed: decode_count("pages_processed", row.try_get("pages_processed")?)?,
            total_pages: decode_count("total_pages", row.try_get("total_pages")?)?,
            owner: row.try_get("owner")?,
            error_message: row.try_get("error_message")?,
            started_at: decode_timestamp(&started_at)?,
            updated_at: decode_timestamp(&updated_at)?,
        })
    }

    async fn fetch_many(&self, sql: &str, bind: &str) -> Result<Vec<ScanCheckpoint>> {
        let rows = sqlx::query(sql).bind(bind).fetch_all(&self.pool).await?;
        rows.iter().map(Self::decode_row).collect()
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn save(&self, checkpoint: &ScanCheckpoint) -> Result<()> {
        sqlx::query(
            "INSERT INTO scan_checkpoints (scan_id, space_key, status, cursor_page_id, cursor_attachment,
                 pages_processed, total_pages, owner, error_message, started_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (scan_id, space_key) DO UPDATE SET
                 status = excluded.status,
                 cursor_page_id = excluded.cursor_page_id,
                 cursor_attachment = excluded.cursor_attachment,
                 pages_processed = excluded.pages_processed,
                 total_pages = excluded.total_pages,
                 owner = excluded.owner,
                 error_message = excluded.error_message,
                 started_at = excluded.started_at,
                 updated_at = excluded.updated_at",
        )
        .bind(checkpoint.scan_id.as_str())
        .bind(checkpoint.space_key.as_str())
        .bind(checkpoint.status.as_str())
        .bind(checkpoint.cursor.page_id.as_deref())
        .bind(checkpoint.cursor.attachment_name.as_deref())
        .bind(encode_count(checkpoint.pages_processed))
        .bind(encode_count(checkpoint.total_pages))
        .bind(&checkpoint.owner)
        .bind(checkpoint.error_message.as_deref())
        .bind(encode_timestamp(&checkpoint.started_at))
        .bind(encode_timestamp(&checkpoint.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_held(&self, checkpoint: &ScanCheckpoint) -> Result<()> {
        let result = sqlx::query(
            "UPDATE scan_checkpoints SET
                 status = ?,
                 cursor_page_id = ?,
                 cursor_attachment = ?,
                 pages_processed = ?,
                 total_pages = ?,
                 error_message = ?,
                 updated_at = ?
             WHERE scan_id = ? AND space_key = ? AND owner = ? AND status = 'RUNNING'",
        )
        .bind(checkpoint.status.as_str())
        .bind(checkpoint.cursor.page_id.as_deref())
        .bind(checkpoint.cursor.attachment_name.as_deref())
        .bind(encode_count(checkpoint.pages_processed))
        .bind(encode_count(checkpoint.total_pages))
        .bind(checkpoint.error_message.as_deref())
        .bind(encode_timestamp(&checkpoint.updated_at))
        .bind(checkpoint.scan_id.as_str())
        .bind(checkpoint.space_key.as_str())
        .bind(&checkpoint.owner)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::warn!(
                scan_id = %checkpoint.scan_id,
                space = %checkpoint.space_key,
                owner = %checkpoint.owner,
                "Checkpoint is no longer held"
            );
            return Err(DatabaseError::CheckpointConflict {
                scan_id: checkpoint.scan_id.clone(),
                space_key: checkpoint.space_key.clone(),
            });
        }
        Ok(())
    }

    async fn acquire_running(
        &self,
        scan_id: &ScanId,
        space_key: &SpaceKey,
        owner: &str,
        stale_before: DateTime<Utc>,
    ) -> Result<Acquisition> {
        let now = encode_timestamp(&Utc::now());

        // Single statement: the guarded DO UPDATE is the compare-and-set.
        let result = sqlx::query(
            "INSERT INTO scan_checkpoints (scan_id, space_key, status, pages_processed, total_pages,
                 owner, started_at, updated_at)
             VALUES (?1, ?2, 'RUNNING', 0, 0, ?3, ?4, ?4)
             ON CONFLICT (scan_id, space_key) DO UPDATE SET
                 status = 'RUNNING',
                 owner = excluded.owner,
                 error_message = NULL,
                 updated_at = excluded.updated_at
             WHERE scan_checkpoints.status = 'PAUSED'
                OR (scan_checkpoints.status = 'RUNNING' AND scan_checkpoints.updated_at < ?5)",
        )
        .bind(scan_id.as_str())
        .bind(space_key.as_str())
        .bind(owner)
        .bind(&now)
        .bind(encode_timestamp(&stale_before))
        .execute(&self.pool)
        .await?;

        let checkpoint = self
            .find_by_scan_and_space(scan_id, space_key)
            .await?
            .ok_or_else(|| {
                DatabaseError::Decode(format!(
                    "checkpoint for {scan_id}/{space_key} vanished after acquisition"
                ))
            })?;

        if result.rows_affected() == 1 {
            let resumed = !checkpoint.cursor.is_initial();
            return Ok(Acquisition::Acquired {
                checkpoint,
                resumed,
            });
        }

        match checkpoint.status {
            CheckpointStatus::Completed => Ok(Acquisition::AlreadyCompleted(checkpoint)),
            CheckpointStatus::Failed => Ok(Acquisition::AlreadyFailed(checkpoint)),
            CheckpointStatus::Running | CheckpointStatus::Paused => Err(DatabaseError::CheckpointConflict {
                scan_id: scan_id.clone(),
                space_key: space_key.clone(),
            }),
        }
    }

    async fn find_by_scan_and_space(
        &self,
        scan_id: &ScanId,
        space_key: &SpaceKey,
    ) -> Result<Option<ScanCheckpoint>> {
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE scan_id = ? AND space_key = ?"
        ))
        .bind(scan_id.as_str())
        .bind(space_key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::decode_row).transpose()
    }

    async fn find_by_scan(&self, scan_id: &ScanId) -> Result<Vec<ScanCheckpoint>> {
        self.fetch_many(
            &format!("{SELECT_COLUMNS} WHERE scan_id = ? ORDER BY space_key"),
            scan_id.as_str(),
        )
        .await
    }

    async fn find_by_space(&self, space_key: &SpaceKey) -> Result<Vec<ScanCheckpoint>> {
        self.fetch_many(
            &format!("{SELECT_COLUMNS} WHERE space_key = ? ORDER BY updated_at DESC, scan_id"),
            space_key.as_str(),
        )
        .await
    }

    async fn find_latest_by_space(&self, space_key: &SpaceKey) -> Result<Option<ScanCheckpoint>> {
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE space_key = ? ORDER BY updated_at DESC, scan_id LIMIT 1"
        ))
        .bind(space_key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::decode_row).transpose()
    }

    async fn delete_by_scan(&self, scan_id: &ScanId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM scan_checkpoints WHERE scan_id = ?")
            .bind(scan_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_active_scan_checkpoints(&self) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM scan_checkpoints WHERE status IN ('RUNNING', 'PAUSED')")
                .execute(&self.pool)
                .await?;
        tracing::info!(
            removed = result.rows_affected(),
            "Deleted active scan checkpoints"
        );
        Ok(result.rows_affected())
    }

    async fn delete_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM scan_checkpoints")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
