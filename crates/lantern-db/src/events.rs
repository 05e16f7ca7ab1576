//! Append-only scan event log.
//!
//! Events are keyed by `(scan_id, sequence)`. Reads for replay come back as a
//! lazy, finite [`EventStream`] that pages through the log in sequence order,
//! so a long scan is never materialized in memory at once.

use crate::codec::{
    decode_count, decode_scan_id, decode_space_key, decode_timestamp, encode_count,
    encode_timestamp,
};
use crate::error::{DatabaseError, Result};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use lantern_core::{CategorySummary, PiiEntity, ScanEvent, ScanId, SpaceKey};
use sqlx::sqlite::SqliteRow;
use sqlx::{Pool, Row, Sqlite};
use std::collections::VecDeque;

/// Rows fetched per round trip when streaming the log.
const PAGE_SIZE: i64 = 256;

/// Lazy, finite stream of stored events in ascending sequence order.
pub type EventStream = BoxStream<'static, Result<ScanEvent>>;

/// Durable owner of the scan event log.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append one event. Events are never updated afterwards.
    ///
    /// # Errors
    /// Returns `DatabaseError::DuplicateSequence` if the scan already has an
    /// event with the same sequence.
    async fn append(&self, event: &ScanEvent) -> Result<()>;

    /// Stream the events of one space in a scan with a sequence strictly
    /// greater than `after_sequence`, in ascending sequence order.
    fn stream_by_scan_and_space(
        &self,
        scan_id: &ScanId,
        space_key: &SpaceKey,
        after_sequence: u64,
    ) -> EventStream;

    /// Every event of a scan in ascending sequence order.
    async fn find_by_scan(&self, scan_id: &ScanId) -> Result<Vec<ScanEvent>>;

    /// Highest sequence recorded for a scan, or 0 when it has no events.
    async fn max_sequence(&self, scan_id: &ScanId) -> Result<u64>;

    /// Delete every event of a scan.
    async fn delete_by_scan(&self, scan_id: &ScanId) -> Result<u64>;

    /// Delete every event.
    async fn delete_all(&self) -> Result<u64>;
}

const SELECT_COLUMNS: &str = "SELECT scan_id, sequence, space_key, event_type, occurred_at, page_id, \
     page_title, attachment_name, detected_entities, summary_by_category, progress_percentage, \
     error_message FROM scan_events";

/// `SQLite`-backed event store.
#[derive(Debug, Clone)]
pub struct SqliteEventStore {
    pool: Pool<Sqlite>,
}

impl SqliteEventStore {
    /// Create a store over an already migrated pool.
    #[must_use]
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }
}

fn decode_event(row: &SqliteRow) -> Result<ScanEvent> {
    let event_type: String = row.try_get("event_type")?;
    let occurred_at: String = row.try_get("occurred_at")?;
    let entities: String = row.try_get("detected_entities")?;
    let summary: String = row.try_get("summary_by_category")?;

    Ok(ScanEvent {
        scan_id: decode_scan_id(row.try_get("scan_id")?)?,
        space_key: decode_space_key(row.try_get("space_key")?)?,
        event_type: event_type
            .parse()
            .map_err(|e: lantern_core::LanternError| DatabaseError::Decode(e.to_string()))?,
        sequence: decode_count("sequence", row.try_get("sequence")?)?,
        timestamp: decode_timestamp(&occurred_at)?,
        page_id: row.try_get("page_id")?,
        page_title: row.try_get("page_title")?,
        attachment_name: row.try_get("attachment_name")?,
        detected_entities: serde_json::from_str::<Vec<PiiEntity>>(&entities)?,
        summary_by_category: serde_json::from_str::<CategorySummary>(&summary)?,
        progress_percentage: row.try_get("progress_percentage")?,
        error_message: row.try_get("error_message")?,
    })
}

/// Keyset position of an in-flight replay.
struct ReplayCursor {
    pool: Pool<Sqlite>,
    scan_id: ScanId,
    space_key: SpaceKey,
    after: u64,
    buffer: VecDeque<ScanEvent>,
    exhausted: bool,
}

impl ReplayCursor {
    async fn fill(&mut self) -> Result<()> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE scan_id = ? AND space_key = ? AND sequence > ? \
             ORDER BY sequence LIMIT ?"
        ))
        .bind(self.scan_id.as_str())
        .bind(self.space_key.as_str())
        .bind(encode_count(self.after))
        .bind(PAGE_SIZE)
        .fetch_all(&self.pool)
        .await?;

        self.exhausted = rows.len() < usize::try_from(PAGE_SIZE).unwrap_or(usize::MAX);
        for row in &rows {
            self.buffer.push_back(decode_event(row)?);
        }
        Ok(())
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn append(&self, event: &ScanEvent) -> Result<()> {
        let entities = serde_json::to_string(&event.detected_entities)?;
        let summary = serde_json::to_string(&event.summary_by_category)?;

        sqlx::query(
            "INSERT INTO scan_events (scan_id, sequence, space_key, event_type, occurred_at, page_id,
                 page_title, attachment_name, detected_entities, summary_by_category,
                 progress_percentage, error_message)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(event.scan_id.as_str())
        .bind(encode_count(event.sequence))
        .bind(event.space_key.as_str())
        .bind(event.event_type.as_str())
        .bind(encode_timestamp(&event.timestamp))
        .bind(event.page_id.as_deref())
        .bind(event.page_title.as_deref())
        .bind(event.attachment_name.as_deref())
        .bind(entities)
        .bind(summary)
        .bind(event.progress_percentage)
        .bind(event.error_message.as_deref())
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                DatabaseError::DuplicateSequence {
                    scan_id: event.scan_id.clone(),
                    sequence: event.sequence,
                }
            }
            other => DatabaseError::Sqlx(other),
        })?;

        Ok(())
    }

    fn stream_by_scan_and_space(
        &self,
        scan_id: &ScanId,
        space_key: &SpaceKey,
        after_sequence: u64,
    ) -> EventStream {
        let cursor = ReplayCursor {
            pool: self.pool.clone(),
            scan_id: scan_id.clone(),
            space_key: space_key.clone(),
            after: after_sequence,
            buffer: VecDeque::new(),
            exhausted: false,
        };

        stream::try_unfold(cursor, |mut cursor| async move {
            if cursor.buffer.is_empty() && !cursor.exhausted {
                cursor.fill().await?;
            }
            match cursor.buffer.pop_front() {
                Some(event) => {
                    cursor.after = event.sequence;
                    Ok(Some((event, cursor)))
                }
                None => Ok(None),
            }
        })
        .boxed()
    }

    async fn find_by_scan(&self, scan_id: &ScanId) -> Result<Vec<ScanEvent>> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE scan_id = ? ORDER BY sequence"
        ))
        .bind(scan_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_event).collect()
    }

    async fn max_sequence(&self, scan_id: &ScanId) -> Result<u64> {
        let max: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(sequence), 0) FROM scan_events WHERE scan_id = ?",
        )
        .bind(scan_id.as_str())
        .fetch_one(&self.pool)
        .await?;

        decode_count("sequence", max)
    }

    async fn delete_by_scan(&self, scan_id: &ScanId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM scan_events WHERE scan_id = ?")
            .bind(scan_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM scan_events")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
