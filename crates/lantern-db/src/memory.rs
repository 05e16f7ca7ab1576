//! In-memory store implementations.
//!
//! Same contracts as the `SQLite` stores, for embedding and tests. Nothing
//! survives the process.

use crate::checkpoints::{Acquisition, CheckpointStore};
use crate::error::{DatabaseError, Result};
use crate::events::{EventStore, EventStream};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use lantern_core::{CheckpointStatus, ScanCheckpoint, ScanEvent, ScanId, SpaceKey};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound::{Excluded, Unbounded};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Checkpoint store backed by a map behind a mutex.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Mutex<HashMap<(ScanId, SpaceKey), ScanCheckpoint>>,
}

impl InMemoryCheckpointStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: &ScanCheckpoint) -> Result<()> {
        self.checkpoints.lock().await.insert(
            (checkpoint.scan_id.clone(), checkpoint.space_key.clone()),
            checkpoint.clone(),
        );
        Ok(())
    }

    async fn save_held(&self, checkpoint: &ScanCheckpoint) -> Result<()> {
        let mut checkpoints = self.checkpoints.lock().await;
        let key = (checkpoint.scan_id.clone(), checkpoint.space_key.clone());

        match checkpoints.get_mut(&key) {
            Some(stored)
                if stored.status == CheckpointStatus::Running
                    && stored.owner == checkpoint.owner =>
            {
                *stored = ScanCheckpoint {
                    started_at: stored.started_at,
                    ..checkpoint.clone()
                };
                Ok(())
            }
            _ => Err(DatabaseError::CheckpointConflict {
                scan_id: checkpoint.scan_id.clone(),
                space_key: checkpoint.space_key.clone(),
            }),
        }
    }

    async fn acquire_running(
        &self,
        scan_id: &ScanId,
        space_key: &SpaceKey,
        owner: &str,
        stale_before: DateTime<Utc>,
    ) -> Result<Acquisition> {
        let mut checkpoints = self.checkpoints.lock().await;
        let key = (scan_id.clone(), space_key.clone());

        let Some(existing) = checkpoints.get_mut(&key) else {
            let checkpoint = ScanCheckpoint::new(scan_id.clone(), space_key.clone(), owner);
            checkpoints.insert(key, checkpoint.clone());
            return Ok(Acquisition::Acquired {
                checkpoint,
                resumed: false,
            });
        };

        let acquirable =
            existing.status == CheckpointStatus::Paused || existing.is_abandoned(stale_before);

        if acquirable {
            existing.owner = owner.to_string();
            existing.transition(CheckpointStatus::Running, None);
            return Ok(Acquisition::Acquired {
                resumed: !existing.cursor.is_initial(),
                checkpoint: existing.clone(),
            });
        }

        match existing.status {
            CheckpointStatus::Completed => Ok(Acquisition::AlreadyCompleted(existing.clone())),
            CheckpointStatus::Failed => Ok(Acquisition::AlreadyFailed(existing.clone())),
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
        Ok(self
            .checkpoints
            .lock()
            .await
            .get(&(scan_id.clone(), space_key.clone()))
            .cloned())
    }

    async fn find_by_scan(&self, scan_id: &ScanId) -> Result<Vec<ScanCheckpoint>> {
        let mut found: Vec<ScanCheckpoint> = self
            .checkpoints
            .lock()
            .await
            .values()
            .filter(|c| &c.scan_id == scan_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| a.space_key.cmp(&b.space_key));
        Ok(found)
    }

    async fn find_by_space(&self, space_key: &SpaceKey) -> Result<Vec<ScanCheckpoint>> {
        let mut found: Vec<ScanCheckpoint> = self
            .checkpoints
            .lock()
            .await
            .values()
            .filter(|c| &c.space_key == space_key)
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.scan_id.cmp(&b.scan_id))
        });
        Ok(found)
    }

    async fn find_latest_by_space(&self, space_key: &SpaceKey) -> Result<Option<ScanCheckpoint>> {
        Ok(self.find_by_space(space_key).await?.into_iter().next())
    }

    async fn delete_by_scan(&self, scan_id: &ScanId) -> Result<u64> {
        let mut checkpoints = self.checkpoints.lock().await;
        let before = checkpoints.len();
        checkpoints.retain(|(scan, _), _| scan != scan_id);
        Ok((before - checkpoints.len()) as u64)
    }

    async fn delete_active_scan_checkpoints(&self) -> Result<u64> {
        let mut checkpoints = self.checkpoints.lock().await;
        let before = checkpoints.len();
        checkpoints.retain(|_, c| !c.is_active());
        Ok((before - checkpoints.len()) as u64)
    }

    async fn delete_all(&self) -> Result<u64> {
        let mut checkpoints = self.checkpoints.lock().await;
        let removed = checkpoints.len() as u64;
        checkpoints.clear();
        Ok(removed)
    }
}

type EventLog = HashMap<ScanId, BTreeMap<u64, ScanEvent>>;

/// Event store backed by per-scan ordered maps.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    events: Arc<RwLock<EventLog>>,
}

impl InMemoryEventStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, event: &ScanEvent) -> Result<()> {
        let mut events = self.events.write().await;
        let log = events.entry(event.scan_id.clone()).or_default();
        if log.contains_key(&event.sequence) {
            return Err(DatabaseError::DuplicateSequence {
                scan_id: event.scan_id.clone(),
                sequence: event.sequence,
            });
        }
        log.insert(event.sequence, event.clone());
        Ok(())
    }

    fn stream_by_scan_and_space(
        &self,
        scan_id: &ScanId,
        space_key: &SpaceKey,
        after_sequence: u64,
    ) -> EventStream {
        let events = Arc::clone(&self.events);
        let scan_id = scan_id.clone();
        let space_key = space_key.clone();

        // Snapshot is taken when the stream is first polled.
        stream::once(async move {
            let events = events.read().await;
            let matching: Vec<Result<ScanEvent>> = events
                .get(&scan_id)
                .map(|log| {
                    log.range((Excluded(after_sequence), Unbounded))
                        .filter(|(_, e)| e.space_key == space_key)
                        .map(|(_, e)| Ok(e.clone()))
                        .collect()
                })
                .unwrap_or_default();
            stream::iter(matching)
        })
        .flatten()
        .boxed()
    }

    async fn find_by_scan(&self, scan_id: &ScanId) -> Result<Vec<ScanEvent>> {
        Ok(self
            .events
            .read()
            .await
            .get(scan_id)
            .map(|log| log.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn max_sequence(&self, scan_id: &ScanId) -> Result<u64> {
        Ok(self
            .events
            .read()
            .await
            .get(scan_id)
            .and_then(|log| log.keys().next_back().copied())
            .unwrap_or(0))
    }

    async fn delete_by_scan(&self, scan_id: &ScanId) -> Result<u64> {
        Ok(self
            .events
            .write()
            .await
            .remove(scan_id)
            .map_or(0, |log| log.len() as u64))
    }

    async fn delete_all(&self) -> Result<u64> {
        let mut events = self.events.write().await;
        let removed = events.values().map(|log| log.len() as u64).sum();
        events.clear();
        Ok(removed)
    }
}
