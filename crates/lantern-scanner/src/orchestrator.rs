//! Scan orchestrator for resumable, multi-space PII scans.
//!
//! This module provides the `ScanOrchestrator`, which drives every space of a
//! scan through its checkpoint lifecycle, runs each page and attachment
//! through the detector with bounded retries, and records the outcome of every
//! item as an event before advancing the checkpoint.
//!
//! Per item the order is fixed: sequence, append, save checkpoint, publish.
//! A crash between append and checkpoint save can only repeat an item on
//! resume, never skip one.

use crate::detector::{Detection, Detector};
use crate::error::{ContentAccessError, DetectionError, Result, ScanError};
use crate::progress::progress_of;
use crate::retry::RetryPolicy;
use crate::sequencer::EventSequencer;
use crate::source::{Attachment, ContentAccessor, Page};
use crate::stream::{EventHub, EventSubscription, DEFAULT_BROADCAST_CAPACITY};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::TryStreamExt;
use lantern_core::{
    AppConfig, CheckpointStatus, DetectionConfig, ScanCheckpoint, ScanEvent, ScanEventType, ScanId,
    ScanTotals, SpaceKey,
};
use lantern_db::{Acquisition, CheckpointStore, DatabaseError, EventStore, EventStream};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Appends retried after a sequence collision with another writer.
const MAX_SEQUENCE_COLLISIONS: u32 = 5;

/// Which spaces a scan request covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpaceSelection {
    /// Every space the content source reports
    All,
    /// The listed spaces, in order, duplicates ignored
    Keys(Vec<SpaceKey>),
}

/// How one space ended within a scan request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceOutcome {
    /// Every item was processed
    Completed,
    /// The space stopped on a non-recoverable failure
    Failed,
    /// An earlier run already completed the space
    AlreadyCompleted,
    /// An earlier run already failed the space; retrying needs a new scan
    AlreadyFailed,
    /// The content source has no such space
    NotFound,
    /// The space was paused and can be resumed
    Paused,
    /// Another holder is scanning the space
    Conflict,
}

impl SpaceOutcome {
    /// Terminal outcomes count towards completing the scan.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Paused | Self::Conflict)
    }
}

/// Result of scanning a single space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceScanResult {
    /// Space that was scanned
    pub space_key: SpaceKey,
    /// How the space ended
    pub outcome: SpaceOutcome,
    /// Items analysed during this request
    pub items_scanned: u64,
    /// Items given up on during this request
    pub item_errors: u64,
    /// Error message if the space did not complete
    pub error: Option<String>,
}

impl SpaceScanResult {
    fn new(space_key: SpaceKey, outcome: SpaceOutcome) -> Self {
        Self {
            space_key,
            outcome,
            items_scanned: 0,
            item_errors: 0,
            error: None,
        }
    }

    fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Result of one scan request.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanReport {
    /// Scan that was run
    pub scan_id: ScanId,
    /// Per-space results in completion order
    pub spaces: Vec<SpaceScanResult>,
    /// Totals reconstructed from the event log for the requested spaces
    pub totals: ScanTotals,
    /// Whether `SCAN_COMPLETED` is recorded for the scan
    pub completed: bool,
}

impl ScanReport {
    /// Result for one space, if it was part of the request.
    #[must_use]
    pub fn space(&self, key: &SpaceKey) -> Option<&SpaceScanResult> {
        self.spaces.iter().find(|result| &result.space_key == key)
    }
}

/// Why a space pipeline stopped early.
enum SpaceFailure {
    Detection {
        error: DetectionError,
        page: Page,
        attachment: Option<String>,
    },
    Content(ContentAccessError),
    Store(DatabaseError),
    /// Another holder took the checkpoint over; this pipeline must not write.
    LeaseLost,
}

impl SpaceFailure {
    /// A held checkpoint write that found the row no longer ours.
    fn from_held_write(error: DatabaseError) -> Self {
        match error {
            DatabaseError::CheckpointConflict { .. } => Self::LeaseLost,
            other => Self::Store(other),
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Detection { error, .. } => error.to_string(),
            Self::Content(error) => error.to_string(),
            Self::Store(error) => error.to_string(),
            Self::LeaseLost => "space was taken over by another holder".to_string(),
        }
    }
}

/// How a space pipeline finished.
enum PipelineEnd {
    Exhausted,
    Paused,
}

/// One page or attachment in enumeration order.
#[derive(Clone, Copy)]
struct Item<'a> {
    page: &'a Page,
    attachment: Option<&'a Attachment>,
}

impl Item<'_> {
    fn content(&self) -> &str {
        self.attachment.map_or(self.page.body.as_str(), |a| a.content.as_str())
    }

    fn event_type(&self) -> ScanEventType {
        if self.attachment.is_some() {
            ScanEventType::AttachmentScanned
        } else {
            ScanEventType::PageScanned
        }
    }

    fn event(&self, scan_id: &ScanId, space_key: &SpaceKey, event_type: ScanEventType) -> ScanEvent {
        let event = ScanEvent::new(scan_id.clone(), space_key.clone(), event_type)
            .with_page(&self.page.id, &self.page.title);
        match self.attachment {
            Some(attachment) => event.with_attachment(&attachment.name),
            None => event,
        }
    }

    /// The checkpoint after this item was consumed.
    fn advance(&self, checkpoint: &ScanCheckpoint) -> ScanCheckpoint {
        let mut next = checkpoint.clone();
        match self.attachment {
            Some(attachment) => next.advance_to_attachment(&self.page.id, &attachment.name),
            None => next.advance_to_page(&self.page.id),
        }
        next
    }

    fn describe(&self) -> String {
        match self.attachment {
            Some(attachment) => format!("{}/{}", self.page.id, attachment.name),
            None => self.page.id.clone(),
        }
    }
}

/// Where a resumed space picks up.
#[derive(Debug, PartialEq, Eq)]
struct ResumePoint {
    page_index: usize,
    page_done: bool,
    after_attachment: Option<String>,
}

impl ResumePoint {
    fn locate(pages: &[Page], checkpoint: &ScanCheckpoint) -> Self {
        let Some(page_id) = checkpoint.cursor.page_id.as_deref() else {
            return Self {
                page_index: 0,
                page_done: false,
                after_attachment: None,
            };
        };

        if let Some(index) = pages.iter().position(|page| page.id == page_id) {
            return Self {
                page_index: index,
                page_done: true,
                after_attachment: checkpoint.cursor.attachment_name.clone(),
            };
        }

        // Cursor page is gone. Its successors moved up one slot, so the page
        // now at the cursor's old index was never processed.
        let index = usize::try_from(checkpoint.pages_processed.saturating_sub(1))
            .unwrap_or(usize::MAX)
            .min(pages.len().saturating_sub(1));
        Self {
            page_index: index,
            page_done: false,
            after_attachment: None,
        }
    }

    /// Pages of the fresh enumeration consumed before this point.
    fn pages_consumed(&self) -> u64 {
        self.page_index as u64 + u64::from(self.page_done)
    }
}

/// Mutable state of one space pipeline.
struct SpaceRun {
    scan_id: ScanId,
    space_key: SpaceKey,
    checkpoint: ScanCheckpoint,
    items_scanned: u64,
    item_errors: u64,
    token: CancellationToken,
}

impl SpaceRun {
    fn result(&self, outcome: SpaceOutcome) -> SpaceScanResult {
        SpaceScanResult {
            space_key: self.space_key.clone(),
            outcome,
            items_scanned: self.items_scanned,
            item_errors: self.item_errors,
            error: self.checkpoint.error_message.clone(),
        }
    }
}

/// Orchestrates resumable scans across spaces.
pub struct ScanOrchestrator {
    /// Source of spaces, pages and attachments
    content: Arc<dyn ContentAccessor>,
    /// PII detection service
    detector: Arc<dyn Detector>,
    /// Durable checkpoints
    checkpoints: Arc<dyn CheckpointStore>,
    /// Durable event log
    events: Arc<dyn EventStore>,
    /// Per-scan sequence counters
    sequencer: Arc<EventSequencer>,
    /// Live subscriber fan-out
    hub: Arc<EventHub>,
    /// Which entities surface in events
    detection: DetectionConfig,
    /// Enabled per-type thresholds passed to the detector
    thresholds: BTreeMap<String, f64>,
    retry: RetryPolicy,
    max_concurrent_spaces: usize,
    detector_timeout: Duration,
    content_timeout: Duration,
    lease_timeout: chrono::Duration,
    /// Identity written into checkpoints this instance holds
    owner: String,
    /// Cancellation handles of running space pipelines
    active: DashMap<(ScanId, SpaceKey), CancellationToken>,
}

impl std::fmt::Debug for ScanOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanOrchestrator")
            .field("owner", &self.owner)
            .field("max_concurrent_spaces", &self.max_concurrent_spaces)
            .field("retry", &self.retry)
            .field("active_spaces", &self.active.len())
            .finish_non_exhaustive()
    }
}

impl ScanOrchestrator {
    /// Create a new scan orchestrator from application settings.
    #[must_use]
    pub fn new(
        content: Arc<dyn ContentAccessor>,
        detector: Arc<dyn Detector>,
        checkpoints: Arc<dyn CheckpointStore>,
        events: Arc<dyn EventStore>,
        config: &AppConfig,
    ) -> Self {
        let scanning = &config.scanning;
        let hub = Arc::new(EventHub::new(
            Arc::clone(&events),
            DEFAULT_BROADCAST_CAPACITY,
            scanning.subscriber_buffer,
        ));

        Self {
            content,
            detector,
            checkpoints,
            events,
            sequencer: Arc::new(EventSequencer::new()),
            hub,
            thresholds: config.detector.detection.thresholds(),
            detection: config.detector.detection.clone(),
            retry: RetryPolicy::from_config(scanning),
            max_concurrent_spaces: scanning.max_concurrent_spaces.max(1),
            detector_timeout: Duration::from_millis(scanning.detector_timeout_ms),
            content_timeout: Duration::from_millis(scanning.content_timeout_ms),
            lease_timeout: chrono::Duration::seconds(
                i64::try_from(scanning.lease_timeout_secs)
                    .unwrap_or(i64::MAX)
                    .min(i64::MAX / 1_000),
            ),
            owner: format!("lantern-{}", uuid::Uuid::new_v4()),
            active: DashMap::new(),
        }
    }

    /// Set the maximum number of spaces scanned concurrently.
    #[must_use]
    pub fn with_max_concurrent_spaces(mut self, max: usize) -> Self {
        self.max_concurrent_spaces = max.max(1);
        self
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the owner identity written into checkpoints.
    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    /// Owner identity of this instance.
    #[must_use]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// The live event hub.
    #[must_use]
    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    /// The sequence counters.
    #[must_use]
    pub fn sequencer(&self) -> &Arc<EventSequencer> {
        &self.sequencer
    }

    /// Run a scan in a background task and return immediately.
    ///
    /// The scan is not tied to any subscriber; dropping the handle does not
    /// stop it.
    pub fn spawn_scan(
        self: &Arc<Self>,
        scan_id: ScanId,
        selection: SpaceSelection,
    ) -> JoinHandle<Result<ScanReport>> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let result = orchestrator.scan(&scan_id, selection).await;
            if let Err(e) = &result {
                tracing::error!("Scan {} failed: {}", scan_id, e);
            }
            result
        })
    }

    /// Scan the selected spaces of a scan, resuming where earlier runs stopped.
    ///
    /// Space-level problems (conflicts, failures, unknown keys) are reported
    /// per space in the returned report and never abort sibling spaces.
    ///
    /// # Errors
    /// Returns an error only when the request as a whole cannot run: the
    /// space list cannot be read, or the event log is unreadable.
    pub async fn scan(&self, scan_id: &ScanId, selection: SpaceSelection) -> Result<ScanReport> {
        let persisted = self.events.max_sequence(scan_id).await?;
        self.sequencer.seed(scan_id, persisted);

        let keys = self.resolve_selection(selection).await?;
        tracing::info!(
            scan_id = %scan_id,
            spaces = keys.len(),
            "Starting scan"
        );

        let mut futures = FuturesUnordered::new();
        let mut results = Vec::with_capacity(keys.len());

        for key in &keys {
            futures.push(self.run_space(scan_id, key));

            // Respect concurrency limit
            while futures.len() >= self.max_concurrent_spaces {
                if let Some(result) = futures.next().await {
                    results.push(result);
                }
            }
        }

        // Collect remaining results
        while let Some(result) = futures.next().await {
            results.push(result);
        }
        drop(futures);

        let mut totals = ScanTotals::default();
        for key in &keys {
            totals.merge(&self.space_summary(scan_id, key).await?);
        }

        let completed = self.complete_scan(scan_id, &results, &totals).await?;

        tracing::info!(
            scan_id = %scan_id,
            completed,
            pages = totals.pages_scanned,
            attachments = totals.attachments_scanned,
            entities = totals.entity_count(),
            "Scan request finished"
        );

        Ok(ScanReport {
            scan_id: scan_id.clone(),
            spaces: results,
            totals,
            completed,
        })
    }

    /// Scan a single space.
    ///
    /// # Errors
    /// Returns `ScanError::CheckpointConflict` when the space is already being
    /// scanned and `ScanError::SpaceNotFound` for an unknown key.
    pub async fn scan_space(&self, scan_id: &ScanId, space_key: &SpaceKey) -> Result<SpaceScanResult> {
        let report = self
            .scan(scan_id, SpaceSelection::Keys(vec![space_key.clone()]))
            .await?;
        let result = report
            .spaces
            .into_iter()
            .next()
            .unwrap_or_else(|| SpaceScanResult::new(space_key.clone(), SpaceOutcome::NotFound));

        match result.outcome {
            SpaceOutcome::Conflict => Err(ScanError::CheckpointConflict {
                scan_id: scan_id.clone(),
                space_key: space_key.clone(),
            }),
            SpaceOutcome::NotFound => Err(ScanError::SpaceNotFound {
                space_key: space_key.clone(),
            }),
            _ => Ok(result),
        }
    }

    /// Ask a running space pipeline to stop before its next item.
    ///
    /// Returns whether a running pipeline was signalled.
    pub fn pause_space(&self, scan_id: &ScanId, space_key: &SpaceKey) -> bool {
        match self.active.get(&(scan_id.clone(), space_key.clone())) {
            Some(token) => {
                tracing::info!(scan_id = %scan_id, space = %space_key, "Pause requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Delete every checkpoint and event across all scans.
    pub async fn purge_all(&self) -> Result<()> {
        let checkpoints = self.checkpoints.delete_all().await?;
        let events = self.events.delete_all().await?;
        self.sequencer.clear();
        tracing::info!(checkpoints, events, "Purged all scan state");
        Ok(())
    }

    /// Delete the checkpoints and events of one scan.
    pub async fn purge_scan(&self, scan_id: &ScanId) -> Result<()> {
        let checkpoints = self.checkpoints.delete_by_scan(scan_id).await?;
        let events = self.events.delete_by_scan(scan_id).await?;
        self.sequencer.reset_sequence(scan_id);
        tracing::info!(scan_id = %scan_id, checkpoints, events, "Purged scan");
        Ok(())
    }

    /// Purge everything, then scan every space under a new scan ID.
    pub async fn start_fresh_full_scan(&self) -> Result<ScanReport> {
        self.purge_all().await?;
        let scan_id = ScanId::generate();
        self.scan(&scan_id, SpaceSelection::All).await
    }

    /// Remove RUNNING and PAUSED checkpoints, keeping terminal history.
    pub async fn delete_active_scan_checkpoints(&self) -> Result<u64> {
        Ok(self.checkpoints.delete_active_scan_checkpoints().await?)
    }

    /// Checkpoints of a scan, ordered by space key.
    pub async fn checkpoints_for_scan(&self, scan_id: &ScanId) -> Result<Vec<ScanCheckpoint>> {
        Ok(self.checkpoints.find_by_scan(scan_id).await?)
    }

    /// Persisted events of one space after `after_sequence`, in order.
    #[must_use]
    pub fn events_for_space(
        &self,
        scan_id: &ScanId,
        space_key: &SpaceKey,
        after_sequence: u64,
    ) -> EventStream {
        self.events
            .stream_by_scan_and_space(scan_id, space_key, after_sequence)
    }

    /// Live stream of one space, replaying everything after `last_seen`.
    #[must_use]
    pub fn subscribe(&self, scan_id: &ScanId, space_key: &SpaceKey, last_seen: u64) -> EventSubscription {
        self.hub.subscribe(scan_id, space_key, last_seen)
    }

    /// Aggregate counts of a space reconstructed from its event log.
    pub async fn space_summary(&self, scan_id: &ScanId, space_key: &SpaceKey) -> Result<ScanTotals> {
        Ok(self.fold_space(scan_id, space_key).await?)
    }

    async fn fold_space(
        &self,
        scan_id: &ScanId,
        space_key: &SpaceKey,
    ) -> lantern_db::Result<ScanTotals> {
        self.events
            .stream_by_scan_and_space(scan_id, space_key, 0)
            .try_fold(ScanTotals::default(), |mut totals, event| async move {
                totals.absorb(&event);
                Ok::<_, DatabaseError>(totals)
            })
            .await
    }

    async fn resolve_selection(&self, selection: SpaceSelection) -> Result<Vec<SpaceKey>> {
        let keys = match selection {
            SpaceSelection::All => self
                .with_content_retry("list spaces", || self.content.get_all_spaces())
                .await?
                .into_iter()
                .map(|space| space.key)
                .collect(),
            SpaceSelection::Keys(keys) => keys,
        };

        let mut seen = HashSet::new();
        Ok(keys.into_iter().filter(|key| seen.insert(key.clone())).collect())
    }

    /// Run one space to a terminal or paused outcome. Never fails the request.
    async fn run_space(&self, scan_id: &ScanId, space_key: &SpaceKey) -> SpaceScanResult {
        let span = tracing::info_span!("space", scan_id = %scan_id, space = %space_key);
        self.run_space_inner(scan_id, space_key).instrument(span).await
    }

    async fn run_space_inner(&self, scan_id: &ScanId, space_key: &SpaceKey) -> SpaceScanResult {
        let lookup = self
            .with_content_retry("look up space", || self.content.get_space(space_key))
            .await;
        if matches!(lookup, Ok(None)) {
            tracing::warn!("Space not found in content source");
            let message = format!("space {space_key} not found");
            self.record_space_error(scan_id, space_key, &message).await;
            return SpaceScanResult::new(space_key.clone(), SpaceOutcome::NotFound)
                .with_error(message);
        }

        let (checkpoint, resumed) = match self.acquire(scan_id, space_key).await {
            Ok(held) => held,
            Err(skipped) => return skipped,
        };

        let mut run = SpaceRun {
            scan_id: scan_id.clone(),
            space_key: space_key.clone(),
            checkpoint,
            items_scanned: 0,
            item_errors: 0,
            token: CancellationToken::new(),
        };

        if let Err(e) = lookup {
            tracing::error!("Could not look up space: {}", e);
            return self.fail_space(&mut run, SpaceFailure::Content(e)).await;
        }

        let active_key = (scan_id.clone(), space_key.clone());
        self.active.insert(active_key.clone(), run.token.clone());
        let result = self.drive_space(&mut run, resumed).await;
        self.active.remove(&active_key);
        result
    }

    /// Move the space into RUNNING, or report why it is left alone.
    async fn acquire(
        &self,
        scan_id: &ScanId,
        space_key: &SpaceKey,
    ) -> std::result::Result<(ScanCheckpoint, bool), SpaceScanResult> {
        let stale_before = Utc::now()
            .checked_sub_signed(self.lease_timeout)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        match self
            .checkpoints
            .acquire_running(scan_id, space_key, &self.owner, stale_before)
            .await
        {
            Ok(Acquisition::Acquired {
                checkpoint,
                resumed,
            }) => Ok((checkpoint, resumed)),
            Ok(Acquisition::AlreadyCompleted(_)) => {
                tracing::info!("Space already completed in this scan, skipping");
                Err(SpaceScanResult::new(space_key.clone(), SpaceOutcome::AlreadyCompleted))
            }
            Ok(Acquisition::AlreadyFailed(checkpoint)) => {
                tracing::info!("Space already failed in this scan, skipping");
                let result = SpaceScanResult::new(space_key.clone(), SpaceOutcome::AlreadyFailed);
                Err(match checkpoint.error_message {
                    Some(message) => result.with_error(message),
                    None => result,
                })
            }
            Err(DatabaseError::CheckpointConflict { .. }) => {
                tracing::warn!("Space is already being scanned by another holder");
                Err(SpaceScanResult::new(space_key.clone(), SpaceOutcome::Conflict)
                    .with_error(format!("space {space_key} is already being scanned")))
            }
            Err(e) => {
                tracing::error!("Could not acquire checkpoint: {}", e);
                Err(SpaceScanResult::new(space_key.clone(), SpaceOutcome::Failed)
                    .with_error(e.to_string()))
            }
        }
    }

    async fn drive_space(&self, run: &mut SpaceRun, resumed: bool) -> SpaceScanResult {
        tracing::info!(
            resumed,
            cursor = ?run.checkpoint.cursor.page_id,
            "Space scan started"
        );

        let started =
            ScanEvent::new(run.scan_id.clone(), run.space_key.clone(), ScanEventType::Started);
        if let Err(e) = self.record(started).await {
            return self.fail_space(run, SpaceFailure::Store(e)).await;
        }

        match self.scan_items(run).await {
            Ok(PipelineEnd::Exhausted) => self.finish_space(run).await,
            Ok(PipelineEnd::Paused) => self.pause(run).await,
            Err(failure) => self.fail_space(run, failure).await,
        }
    }

    async fn scan_items(&self, run: &mut SpaceRun) -> std::result::Result<PipelineEnd, SpaceFailure> {
        let space_key = run.space_key.clone();
        let pages = self
            .with_content_retry("list pages", || self.content.get_all_pages_in_space(&space_key))
            .await
            .map_err(SpaceFailure::Content)?;

        run.checkpoint.total_pages = pages.len() as u64;
        let resume = ResumePoint::locate(&pages, &run.checkpoint);
        run.checkpoint.pages_processed = resume.pages_consumed();
        tracing::debug!(
            pages = pages.len(),
            start = resume.page_index,
            "Enumerated space"
        );

        for (index, page) in pages.iter().enumerate().skip(resume.page_index) {
            let first = index == resume.page_index;

            if !(first && resume.page_done) {
                if run.token.is_cancelled() {
                    return Ok(PipelineEnd::Paused);
                }
                self.process_item(run, Item { page, attachment: None })
                    .await?;
            }

            let page_id = page.id.clone();
            let attachments = self
                .with_content_retry("list attachments", || {
                    self.content.get_page_attachments(&page_id)
                })
                .await
                .map_err(SpaceFailure::Content)?;

            let skip = match (first, resume.after_attachment.as_deref()) {
                (true, Some(name)) => attachments
                    .iter()
                    .position(|a| a.name == name)
                    .map_or(0, |position| position + 1),
                _ => 0,
            };

            for attachment in attachments.iter().skip(skip) {
                if run.token.is_cancelled() {
                    return Ok(PipelineEnd::Paused);
                }
                self.process_item(
                    run,
                    Item {
                        page,
                        attachment: Some(attachment),
                    },
                )
                .await?;
            }
        }

        Ok(PipelineEnd::Exhausted)
    }

    /// Analyse one item with retries and record its outcome.
    async fn process_item(
        &self,
        run: &mut SpaceRun,
        item: Item<'_>,
    ) -> std::result::Result<(), SpaceFailure> {
        let max = self.retry.max_attempts;
        let mut attempt = 1;

        loop {
            match self.detect(item.content()).await {
                Ok(detection) => {
                    let next = item.advance(&run.checkpoint);
                    let entities = self.detection.filter(detection.entities);
                    tracing::debug!(
                        item = %item.describe(),
                        entities = entities.len(),
                        "Item analysed"
                    );
                    let event = item
                        .event(&run.scan_id, &run.space_key, item.event_type())
                        .with_entities(entities)
                        .with_progress(progress_of(next.pages_processed, next.total_pages));
                    self.commit(run, event, next).await?;
                    run.items_scanned += 1;
                    return Ok(());
                }
                Err(error) if !error.is_retryable() => {
                    tracing::error!(item = %item.describe(), "Detector rejected item: {}", error);
                    return Err(SpaceFailure::Detection {
                        error,
                        page: item.page.clone(),
                        attachment: item.attachment.map(|a| a.name.clone()),
                    });
                }
                Err(error) if self.retry.is_final(attempt) => {
                    tracing::warn!(
                        item = %item.describe(),
                        "Giving up on item after {} attempts: {}",
                        attempt,
                        error
                    );
                    let next = item.advance(&run.checkpoint);
                    let event = item
                        .event(&run.scan_id, &run.space_key, ScanEventType::Error)
                        .with_error(format!("{error} (attempt {attempt}/{max}, giving up)"))
                        .with_progress(progress_of(next.pages_processed, next.total_pages));
                    self.commit(run, event, next).await?;
                    run.item_errors += 1;
                    return Ok(());
                }
                Err(error) => {
                    let delay = self.retry.backoff_after(attempt);
                    tracing::warn!(
                        item = %item.describe(),
                        "Detection failed (attempt {}/{}), retrying in {:?}: {}",
                        attempt,
                        max,
                        delay,
                        error
                    );
                    if !self.retry.is_quiet(attempt) {
                        let event = item
                            .event(&run.scan_id, &run.space_key, ScanEventType::Error)
                            .with_error(format!("{error} (attempt {attempt}/{max})"));
                        self.record(event).await.map_err(SpaceFailure::Store)?;
                    }
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// Call the detector under the configured deadline.
    async fn detect(&self, content: &str) -> std::result::Result<Detection, DetectionError> {
        match tokio::time::timeout(
            self.detector_timeout,
            self.detector
                .detect(content, &self.thresholds, self.detector_timeout),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(DetectionError::Timeout {
                timeout: self.detector_timeout,
            }),
        }
    }

    /// Append an item event, then persist the advanced checkpoint.
    ///
    /// The checkpoint write also renews the lease; it fails once another
    /// holder took the space over.
    async fn commit(
        &self,
        run: &mut SpaceRun,
        event: ScanEvent,
        next: ScanCheckpoint,
    ) -> std::result::Result<(), SpaceFailure> {
        let event = self.append(event).await.map_err(SpaceFailure::Store)?;
        self.checkpoints
            .save_held(&next)
            .await
            .map_err(SpaceFailure::from_held_write)?;
        run.checkpoint = next;
        self.hub.publish(event);
        Ok(())
    }

    /// Append and publish an event that does not move the cursor.
    async fn record(&self, event: ScanEvent) -> lantern_db::Result<ScanEvent> {
        let event = self.append(event).await?;
        self.hub.publish(event.clone());
        Ok(event)
    }

    /// Assign the next sequence and append.
    ///
    /// Another process appending to the same scan can take a sequence first;
    /// the counter is then re-seeded from the log and the append retried.
    async fn append(&self, mut event: ScanEvent) -> lantern_db::Result<ScanEvent> {
        let mut collisions = 0;
        loop {
            event.sequence = self.sequencer.next_sequence(&event.scan_id);
            match self.events.append(&event).await {
                Ok(()) => return Ok(event),
                Err(DatabaseError::DuplicateSequence { sequence, .. })
                    if collisions < MAX_SEQUENCE_COLLISIONS =>
                {
                    collisions += 1;
                    tracing::warn!(sequence, "Sequence already taken, re-seeding from the event log");
                    let persisted = self.events.max_sequence(&event.scan_id).await?;
                    self.sequencer.seed(&event.scan_id, persisted);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn finish_space(&self, run: &mut SpaceRun) -> SpaceScanResult {
        // Confirm the lease before announcing completion.
        let mut held = run.checkpoint.clone();
        held.updated_at = Utc::now();
        if let Err(e) = self.checkpoints.save_held(&held).await {
            return self.fail_space(run, SpaceFailure::from_held_write(e)).await;
        }
        run.checkpoint = held;

        let summary = match self.fold_space(&run.scan_id, &run.space_key).await {
            Ok(summary) => summary,
            Err(e) => return self.fail_space(run, SpaceFailure::Store(e)).await,
        };

        let event = ScanEvent::new(
            run.scan_id.clone(),
            run.space_key.clone(),
            ScanEventType::SpaceCompleted,
        )
        .with_summary(summary.entities.clone())
        .with_progress(100.0);

        let event = match self.append(event).await {
            Ok(event) => event,
            Err(e) => return self.fail_space(run, SpaceFailure::Store(e)).await,
        };

        let mut completed = run.checkpoint.clone();
        completed.transition(CheckpointStatus::Completed, None);
        if let Err(e) = self.checkpoints.save_held(&completed).await {
            return self.fail_space(run, SpaceFailure::from_held_write(e)).await;
        }
        run.checkpoint = completed;
        self.hub.publish(event);

        tracing::info!(
            items = run.items_scanned,
            item_errors = run.item_errors,
            entities = summary.entity_count(),
            "Space scan completed"
        );
        run.result(SpaceOutcome::Completed)
    }

    async fn pause(&self, run: &mut SpaceRun) -> SpaceScanResult {
        let mut paused = run.checkpoint.clone();
        paused.transition(CheckpointStatus::Paused, None);
        match self.checkpoints.save_held(&paused).await {
            Ok(()) => {
                run.checkpoint = paused;
                tracing::info!(cursor = ?run.checkpoint.cursor.page_id, "Space scan paused");
                run.result(SpaceOutcome::Paused)
            }
            Err(e) => self.fail_space(run, SpaceFailure::from_held_write(e)).await,
        }
    }

    /// Mark the space FAILED and emit its ERROR event.
    ///
    /// Store failures emit no event: the log is what just failed. A lost
    /// lease writes nothing at all, the row belongs to the new holder.
    async fn fail_space(&self, run: &mut SpaceRun, failure: SpaceFailure) -> SpaceScanResult {
        let message = failure.message();
        if matches!(failure, SpaceFailure::LeaseLost) {
            return self.abandon_space(run, message);
        }
        tracing::error!("Space scan failed: {}", message);

        let event = match &failure {
            SpaceFailure::Store(_) | SpaceFailure::LeaseLost => None,
            SpaceFailure::Detection {
                page, attachment, ..
            } => {
                let event = ScanEvent::new(run.scan_id.clone(), run.space_key.clone(), ScanEventType::Error)
                    .with_page(&page.id, &page.title)
                    .with_error(&message);
                Some(match attachment {
                    Some(name) => event.with_attachment(name),
                    None => event,
                })
            }
            SpaceFailure::Content(_) => Some(
                ScanEvent::new(run.scan_id.clone(), run.space_key.clone(), ScanEventType::Error)
                    .with_error(&message),
            ),
        };
        if let Some(event) = event {
            if let Err(e) = self.record(event).await {
                tracing::error!("Could not record space failure: {}", e);
            }
        }

        let mut failed = run.checkpoint.clone();
        failed.transition(CheckpointStatus::Failed, Some(message.clone()));
        match self.checkpoints.save_held(&failed).await {
            Ok(()) => {}
            Err(DatabaseError::CheckpointConflict { .. }) => return self.abandon_space(run, message),
            Err(e) => tracing::error!("Could not persist FAILED checkpoint: {}", e),
        }
        run.checkpoint = failed;
        run.result(SpaceOutcome::Failed)
    }

    /// Stop a pipeline whose checkpoint now belongs to another holder.
    fn abandon_space(&self, run: &SpaceRun, message: String) -> SpaceScanResult {
        tracing::warn!(
            owner = %self.owner,
            cursor = ?run.checkpoint.cursor.page_id,
            "Lost the space to another holder, stopping"
        );
        run.result(SpaceOutcome::Conflict).with_error(message)
    }

    /// ERROR event for a space that never got a checkpoint.
    async fn record_space_error(&self, scan_id: &ScanId, space_key: &SpaceKey, message: &str) {
        let event = ScanEvent::new(scan_id.clone(), space_key.clone(), ScanEventType::Error)
            .with_error(message);
        if let Err(e) = self.record(event).await {
            tracing::error!("Could not record space error: {}", e);
        }
    }

    /// Emit `SCAN_COMPLETED` once every requested space is terminal.
    async fn complete_scan(
        &self,
        scan_id: &ScanId,
        results: &[SpaceScanResult],
        totals: &ScanTotals,
    ) -> Result<bool> {
        if results.is_empty() {
            return Ok(false);
        }
        if !results.iter().all(|r| r.outcome.is_terminal()) {
            return Ok(false);
        }

        let did_work = results.iter().any(|r| {
            !matches!(
                r.outcome,
                SpaceOutcome::AlreadyCompleted | SpaceOutcome::AlreadyFailed
            )
        });
        if !did_work && self.has_completion_event(scan_id).await? {
            return Ok(true);
        }

        let terminal = results.len() as u64;
        let event = ScanEvent::new(scan_id.clone(), SpaceKey::scan_level(), ScanEventType::ScanCompleted)
            .with_summary(totals.entities.clone())
            .with_progress(progress_of(terminal, terminal));
        self.record(event).await?;
        self.sequencer.reset_sequence(scan_id);
        Ok(true)
    }

    async fn has_completion_event(&self, scan_id: &ScanId) -> Result<bool> {
        let mut scan_level = self
            .events
            .stream_by_scan_and_space(scan_id, &SpaceKey::scan_level(), 0);
        while let Some(event) = scan_level.try_next().await? {
            if event.event_type == ScanEventType::ScanCompleted {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Call the content source with the item retry policy, without events.
    async fn with_content_retry<T, F, Fut>(
        &self,
        operation: &str,
        mut call: F,
    ) -> std::result::Result<T, ContentAccessError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, ContentAccessError>>,
    {
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(self.content_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(ContentAccessError::Timeout(self.content_timeout)),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if self.retry.is_final(attempt) => return Err(e),
                Err(e) => {
                    let delay = self.retry.backoff_after(attempt);
                    tracing::warn!(
                        "Content source failed to {} (attempt {}/{}), retrying in {:?}: {}",
                        operation,
                        attempt,
                        self.retry.max_attempts,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
