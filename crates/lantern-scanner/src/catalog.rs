//! Cached view of which spaces need scanning.
//!
//! The catalog owns no timer. An outside scheduler calls
//! [`SpaceCatalog::refresh`] as often as it likes; the call is idempotent and
//! a failed refresh leaves the previous snapshot in place.

use crate::error::Result;
use crate::source::{ContentAccessor, Space};
use chrono::{DateTime, Duration, Utc};
use lantern_core::{CheckpointStatus, ScanCheckpoint, SpaceKey};
use lantern_db::CheckpointStore;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Scan freshness of one space.
#[derive(Debug, Clone, PartialEq)]
pub struct SpaceScanStatus {
    /// The space as reported by the content source
    pub space: Space,
    /// Most recent checkpoint of the space across all scans
    pub latest: Option<ScanCheckpoint>,
    /// Whether the space should be scanned again
    pub stale: bool,
}

/// A space is stale when it was never scanned, its last scan failed, or its
/// last completed scan is older than `max_age`.
#[must_use]
pub fn is_stale(latest: Option<&ScanCheckpoint>, now: DateTime<Utc>, max_age: Duration) -> bool {
    match latest {
        None => true,
        Some(checkpoint) => match checkpoint.status {
            CheckpointStatus::Failed => true,
            CheckpointStatus::Completed => checkpoint.updated_at < now - max_age,
            CheckpointStatus::Running | CheckpointStatus::Paused => false,
        },
    }
}

/// Snapshot of every space with its latest checkpoint.
pub struct SpaceCatalog {
    content: Arc<dyn ContentAccessor>,
    checkpoints: Arc<dyn CheckpointStore>,
    max_age: Duration,
    snapshot: RwLock<Arc<Vec<SpaceScanStatus>>>,
}

impl SpaceCatalog {
    /// Create an empty catalog; call [`refresh`](Self::refresh) to populate it.
    #[must_use]
    pub fn new(
        content: Arc<dyn ContentAccessor>,
        checkpoints: Arc<dyn CheckpointStore>,
        staleness_days: u32,
    ) -> Self {
        Self {
            content,
            checkpoints,
            max_age: Duration::days(i64::from(staleness_days)),
            snapshot: RwLock::new(Arc::new(Vec::new())),
        }
    }

    /// Re-read every space and its latest checkpoint, then swap the snapshot.
    ///
    /// Returns the number of spaces in the new snapshot.
    pub async fn refresh(&self) -> Result<usize> {
        let spaces = match self.content.get_all_spaces().await {
            Ok(spaces) => spaces,
            Err(e) => {
                tracing::warn!("Space catalog refresh failed, keeping previous snapshot: {}", e);
                return Err(e.into());
            }
        };

        let now = Utc::now();
        let mut statuses = Vec::with_capacity(spaces.len());
        for space in spaces {
            let latest = self.checkpoints.find_latest_by_space(&space.key).await?;
            let stale = is_stale(latest.as_ref(), now, self.max_age);
            statuses.push(SpaceScanStatus {
                space,
                latest,
                stale,
            });
        }

        let count = statuses.len();
        *self.snapshot.write().await = Arc::new(statuses);
        tracing::debug!(spaces = count, "Space catalog refreshed");
        Ok(count)
    }

    /// The current snapshot.
    pub async fn snapshot(&self) -> Arc<Vec<SpaceScanStatus>> {
        Arc::clone(&*self.snapshot.read().await)
    }

    /// Keys of stale spaces in the current snapshot, for a targeted re-scan.
    pub async fn stale_spaces(&self) -> Vec<SpaceKey> {
        self.snapshot
            .read()
            .await
            .iter()
            .filter(|status| status.stale)
            .map(|status| status.space.key.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ContentAccessError;
    use crate::source::{Attachment, Page};
    use async_trait::async_trait;
    use lantern_core::ScanId;
    use lantern_db::InMemoryCheckpointStore;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Spaces {
        keys: Vec<&'static str>,
        failing: AtomicBool,
    }

    #[async_trait]
    impl ContentAccessor for Spaces {
        async fn get_space(&self, key: &SpaceKey) -> std::result::Result<Option<Space>, ContentAccessError> {
            Ok(self
                .keys
                .iter()
                .find(|k| **k == key.as_str())
                .map(|k| space(k)))
        }

        async fn get_all_spaces(&self) -> std::result::Result<Vec<Space>, ContentAccessError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(ContentAccessError::Transport("connection reset".to_string()));
            }
            Ok(self.keys.iter().map(|k| space(k)).collect())
        }

        async fn get_all_pages_in_space(
            &self,
            _key: &SpaceKey,
        ) -> std::result::Result<Vec<Page>, ContentAccessError> {
            Ok(Vec::new())
        }

        async fn get_page_attachments(
            &self,
            _page_id: &str,
        ) -> std::result::Result<Vec<Attachment>, ContentAccessError> {
            Ok(Vec::new())
        }
    }

    fn space(key: &str) -> Space {
        Space {
            key: SpaceKey::new(key).expect("valid space key"),
            name: key.to_string(),
        }
    }

    fn checkpoint(key: &str, status: CheckpointStatus, age_days: i64) -> ScanCheckpoint {
        let mut checkpoint = ScanCheckpoint::new(
            ScanId::new("scan-1").expect("valid scan id"),
            SpaceKey::new(key).expect("valid space key"),
            "worker-a",
        );
        checkpoint.transition(status, None);
        checkpoint.updated_at = Utc::now() - Duration::days(age_days);
        checkpoint
    }

    #[test]
    fn test_staleness_rules() {
        let now = Utc::now();
        let week = Duration::days(7);
        assert!(is_stale(None, now, week));
        assert!(is_stale(
            Some(&checkpoint("A", CheckpointStatus::Failed, 0)),
            now,
            week
        ));
        assert!(is_stale(
            Some(&checkpoint("A", CheckpointStatus::Completed, 8)),
            now,
            week
        ));
        assert!(!is_stale(
            Some(&checkpoint("A", CheckpointStatus::Completed, 1)),
            now,
            week
        ));
        assert!(!is_stale(
            Some(&checkpoint("A", CheckpointStatus::Paused, 30)),
            now,
            week
        ));
    }

    #[tokio::test]
    async fn test_refresh_marks_stale_spaces_and_survives_failure() {
        let content = Arc::new(Spaces {
            keys: vec!["DOCS", "HR", "OPS"],
            failing: AtomicBool::new(false),
        });
        let checkpoints = Arc::new(InMemoryCheckpointStore::new());
        checkpoints
            .save(&checkpoint("DOCS", CheckpointStatus::Completed, 1))
            .await
            .expect("save");
        checkpoints
            .save(&checkpoint("HR", CheckpointStatus::Completed, 30))
            .await
            .expect("save");

        let catalog = SpaceCatalog::new(content.clone(), checkpoints, 7);
        assert_eq!(catalog.refresh().await.expect("refresh"), 3);

        let stale: Vec<String> = catalog
            .stale_spaces()
            .await
            .iter()
            .map(|k| k.to_string())
            .collect();
        assert_eq!(stale, vec!["HR", "OPS"]);

        content.failing.store(true, Ordering::SeqCst);
        assert!(catalog.refresh().await.is_err());
        assert_eq!(catalog.snapshot().await.len(), 3);
    }
}
