//! End-to-end orchestrator behaviour against scripted collaborators.

use async_trait::async_trait;
use futures::StreamExt;
use lantern_core::{
    AppConfig, CheckpointStatus, PiiEntity, ScanCheckpoint, ScanEvent, ScanEventType, ScanId,
    SpaceKey,
};
use lantern_db::{CheckpointStore, Database, EventStore, InMemoryCheckpointStore, InMemoryEventStore};
use lantern_scanner::{
    Attachment, ContentAccessError, ContentAccessor, Detection, DetectionError, Detector, Page,
    RetryPolicy, ScanError, ScanOrchestrator, SpaceOutcome, SpaceSelection, Space,
};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};

// ---------------------------------------------------------------------------
// Scripted collaborators
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemorySource {
    spaces: BTreeMap<String, Vec<(Page, Vec<Attachment>)>>,
    unreachable: HashSet<String>,
}

impl MemorySource {
    fn with_space(mut self, key: &str, pages: &[(&str, &str)]) -> Self {
        let pages = pages
            .iter()
            .map(|(id, body)| (page(id, body), Vec::new()))
            .collect();
        self.spaces.insert(key.to_string(), pages);
        self
    }

    fn with_attachment(mut self, key: &str, page_id: &str, name: &str, content: &str) -> Self {
        if let Some(pages) = self.spaces.get_mut(key) {
            if let Some((_, attachments)) = pages.iter_mut().find(|(p, _)| p.id == page_id) {
                attachments.push(Attachment {
                    name: name.to_string(),
                    media_type: Some("text/plain".to_string()),
                    content: content.to_string(),
                });
            }
        }
        self
    }

    /// Lookups of this space always fail.
    fn with_unreachable_space(mut self, key: &str) -> Self {
        self.unreachable.insert(key.to_string());
        self
    }
}

#[async_trait]
impl ContentAccessor for MemorySource {
    async fn get_space(&self, key: &SpaceKey) -> Result<Option<Space>, ContentAccessError> {
        if self.unreachable.contains(key.as_str()) {
            return Err(ContentAccessError::Transport("wiki unreachable".to_string()));
        }
        Ok(self.spaces.contains_key(key.as_str()).then(|| Space {
            key: key.clone(),
            name: key.to_string(),
        }))
    }

    async fn get_all_spaces(&self) -> Result<Vec<Space>, ContentAccessError> {
        Ok(self
            .spaces
            .keys()
            .map(|k| Space {
                key: SpaceKey::new(k.as_str()).expect("valid space key"),
                name: k.clone(),
            })
            .collect())
    }

    async fn get_all_pages_in_space(&self, key: &SpaceKey) -> Result<Vec<Page>, ContentAccessError> {
        Ok(self
            .spaces
            .get(key.as_str())
            .map(|pages| pages.iter().map(|(p, _)| p.clone()).collect())
            .unwrap_or_default())
    }

    async fn get_page_attachments(&self, page_id: &str) -> Result<Vec<Attachment>, ContentAccessError> {
        Ok(self
            .spaces
            .values()
            .flatten()
            .find(|(p, _)| p.id == page_id)
            .map(|(_, attachments)| attachments.clone())
            .unwrap_or_default())
    }
}

/// Finds `email`, `weak-email` and `ssn` words; scripted failures per content
/// are consumed first. Content containing `slow` waits for the gate.
struct ScriptedDetector {
    failures: Mutex<HashMap<String, VecDeque<DetectionError>>>,
    calls: AtomicUsize,
    entered: Notify,
    gate: Semaphore,
}

impl ScriptedDetector {
    fn new() -> Self {
        Self {
            failures: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            entered: Notify::new(),
            gate: Semaphore::new(0),
        }
    }

    fn fail(self, content: &str, errors: Vec<DetectionError>) -> Self {
        self.failures
            .lock()
            .expect("failures lock")
            .insert(content.to_string(), errors.into());
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Detector for ScriptedDetector {
    async fn detect(
        &self,
        content: &str,
        _thresholds: &BTreeMap<String, f64>,
        _timeout: Duration,
    ) -> Result<Detection, DetectionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if content.contains("slow") {
            self.entered.notify_one();
            self.gate.acquire().await.expect("gate open").forget();
        }

        let scripted = self
            .failures
            .lock()
            .expect("failures lock")
            .get_mut(content)
            .and_then(VecDeque::pop_front);
        if let Some(error) = scripted {
            return Err(error);
        }

        let entities: Vec<PiiEntity> = content
            .split_whitespace()
            .filter_map(|word| match word {
                "email" => Some(entity("EMAIL", 0.9)),
                "weak-email" => Some(entity("EMAIL", 0.3)),
                "ssn" => Some(entity("SSN", 0.95)),
                _ => None,
            })
            .collect();
        Ok(Detection {
            summary: lantern_core::summarize_entities(&entities),
            entities,
        })
    }
}

fn entity(entity_type: &str, confidence: f64) -> PiiEntity {
    PiiEntity {
        entity_type: entity_type.to_string(),
        label: entity_type.to_lowercase(),
        confidence,
        masked_context: "value ********".to_string(),
    }
}

fn page(id: &str, body: &str) -> Page {
    Page {
        id: id.to_string(),
        title: format!("Title of {id}"),
        body: body.to_string(),
    }
}

fn timeout() -> DetectionError {
    DetectionError::Timeout {
        timeout: Duration::from_millis(8_000),
    }
}

fn scan_id(id: &str) -> ScanId {
    ScanId::new(id).expect("valid scan id")
}

fn key(k: &str) -> SpaceKey {
    SpaceKey::new(k).expect("valid space key")
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        quiet_attempts: 1,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
    }
}

struct Harness {
    orchestrator: Arc<ScanOrchestrator>,
    detector: Arc<ScriptedDetector>,
    checkpoints: Arc<dyn CheckpointStore>,
    events: Arc<dyn EventStore>,
}

fn harness_with(
    source: MemorySource,
    detector: ScriptedDetector,
    checkpoints: Arc<dyn CheckpointStore>,
    events: Arc<dyn EventStore>,
) -> Harness {
    build_harness(
        source,
        detector,
        checkpoints,
        events,
        "worker-a",
        &AppConfig::default(),
    )
}

fn build_harness(
    source: MemorySource,
    detector: ScriptedDetector,
    checkpoints: Arc<dyn CheckpointStore>,
    events: Arc<dyn EventStore>,
    owner: &str,
    config: &AppConfig,
) -> Harness {
    let detector = Arc::new(detector);
    let orchestrator = ScanOrchestrator::new(
        Arc::new(source),
        detector.clone(),
        checkpoints.clone(),
        events.clone(),
        config,
    )
    .with_retry_policy(fast_retry())
    .with_owner(owner);

    Harness {
        orchestrator: Arc::new(orchestrator),
        detector,
        checkpoints,
        events,
    }
}

fn harness(source: MemorySource, detector: ScriptedDetector) -> Harness {
    harness_with(
        source,
        detector,
        Arc::new(InMemoryCheckpointStore::new()),
        Arc::new(InMemoryEventStore::new()),
    )
}

fn docs_source() -> MemorySource {
    MemorySource::default().with_space(
        "DOCS",
        &[
            ("p1", "contact email please"),
            ("p2", "payroll ssn record"),
            ("p3", "nothing to see"),
        ],
    )
}

fn shape(events: &[ScanEvent]) -> Vec<(u64, ScanEventType, Option<String>)> {
    events
        .iter()
        .map(|e| (e.sequence, e.event_type, e.page_id.clone()))
        .collect()
}

fn p(id: &str) -> Option<String> {
    Some(id.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_transient_timeouts_are_retried_and_reported() {
    let h = harness(
        docs_source(),
        ScriptedDetector::new().fail("payroll ssn record", vec![timeout(), timeout()]),
    );
    let scan = scan_id("scan-docs");

    let report = h
        .orchestrator
        .scan(&scan, SpaceSelection::Keys(vec![key("DOCS")]))
        .await
        .expect("scan runs");

    assert!(report.completed);
    let docs = report.space(&key("DOCS")).expect("DOCS result");
    assert_eq!(docs.outcome, SpaceOutcome::Completed);
    assert_eq!(docs.items_scanned, 3);
    assert_eq!(docs.item_errors, 0);

    let events = h.events.find_by_scan(&scan).await.expect("events");
    assert_eq!(
        shape(&events),
        vec![
            (1, ScanEventType::Started, None),
            (2, ScanEventType::PageScanned, p("p1")),
            (3, ScanEventType::Error, p("p2")),
            (4, ScanEventType::PageScanned, p("p2")),
            (5, ScanEventType::PageScanned, p("p3")),
            (6, ScanEventType::SpaceCompleted, None),
            (7, ScanEventType::ScanCompleted, None),
        ]
    );
    assert!(events[2]
        .error_message
        .as_deref()
        .expect("error message")
        .contains("attempt 2/3"));
    assert!(events[6].space_key.is_scan_level());
    assert_eq!(events[5].summary_by_category.get("EMAIL"), Some(&1));
    assert_eq!(events[5].summary_by_category.get("SSN"), Some(&1));
    assert_eq!(events[5].progress_percentage, Some(100.0));

    let checkpoint = h
        .checkpoints
        .find_by_scan_and_space(&scan, &key("DOCS"))
        .await
        .expect("find checkpoint")
        .expect("checkpoint exists");
    assert_eq!(checkpoint.status, CheckpointStatus::Completed);
    assert_eq!(checkpoint.cursor.page_id.as_deref(), Some("p3"));
    assert_eq!(checkpoint.pages_processed, 3);

    // Counter is released once the scan completed.
    assert_eq!(h.orchestrator.sequencer().current(&scan), 0);
}

#[tokio::test]
async fn test_exhausted_retries_emit_terminal_error_and_move_on() {
    let h = harness(
        docs_source(),
        ScriptedDetector::new().fail("payroll ssn record", vec![timeout(), timeout(), timeout()]),
    );
    let scan = scan_id("scan-docs");

    let report = h
        .orchestrator
        .scan(&scan, SpaceSelection::Keys(vec![key("DOCS")]))
        .await
        .expect("scan runs");

    let docs = report.space(&key("DOCS")).expect("DOCS result");
    assert_eq!(docs.outcome, SpaceOutcome::Completed);
    assert_eq!(docs.item_errors, 1);

    let events = h.events.find_by_scan(&scan).await.expect("events");
    assert_eq!(
        shape(&events),
        vec![
            (1, ScanEventType::Started, None),
            (2, ScanEventType::PageScanned, p("p1")),
            (3, ScanEventType::Error, p("p2")),
            (4, ScanEventType::Error, p("p2")),
            (5, ScanEventType::PageScanned, p("p3")),
            (6, ScanEventType::SpaceCompleted, None),
            (7, ScanEventType::ScanCompleted, None),
        ]
    );
    assert!(events[3]
        .error_message
        .as_deref()
        .expect("error message")
        .contains("giving up"));
    assert_eq!(h.detector.calls(), 5);
}

#[tokio::test]
async fn test_resume_never_reemits_processed_pages() {
    let h = harness(docs_source(), ScriptedDetector::new());
    let scan = scan_id("scan-resume");

    // A previous process analysed p1 and p2, then stopped.
    let mut checkpoint = ScanCheckpoint::new(scan.clone(), key("DOCS"), "worker-dead");
    checkpoint.total_pages = 3;
    checkpoint.advance_to_page("p1");
    checkpoint.advance_to_page("p2");
    checkpoint.transition(CheckpointStatus::Paused, None);
    h.checkpoints.save(&checkpoint).await.expect("save checkpoint");

    let previous = [
        ScanEvent::new(scan.clone(), key("DOCS"), ScanEventType::Started),
        ScanEvent::new(scan.clone(), key("DOCS"), ScanEventType::PageScanned)
            .with_page("p1", "Title of p1")
            .with_entities(vec![entity("EMAIL", 0.9)]),
        ScanEvent::new(scan.clone(), key("DOCS"), ScanEventType::PageScanned)
            .with_page("p2", "Title of p2")
            .with_entities(vec![entity("SSN", 0.95)]),
    ];
    for (index, mut event) in previous.into_iter().enumerate() {
        event.sequence = index as u64 + 1;
        h.events.append(&event).await.expect("append");
    }

    let report = h
        .orchestrator
        .scan(&scan, SpaceSelection::Keys(vec![key("DOCS")]))
        .await
        .expect("scan runs");
    assert!(report.completed);
    assert_eq!(h.detector.calls(), 1);

    let events = h.events.find_by_scan(&scan).await.expect("events");
    assert_eq!(
        shape(&events[3..]),
        vec![
            (4, ScanEventType::Started, None),
            (5, ScanEventType::PageScanned, p("p3")),
            (6, ScanEventType::SpaceCompleted, None),
            (7, ScanEventType::ScanCompleted, None),
        ]
    );

    // Totals include the work of the earlier run.
    let completed = &events[5];
    assert_eq!(completed.summary_by_category.get("EMAIL"), Some(&1));
    assert_eq!(completed.summary_by_category.get("SSN"), Some(&1));
    assert_eq!(report.totals.pages_scanned, 3);
}

#[tokio::test]
async fn test_resume_continues_after_recorded_attachment() {
    let source = docs_source()
        .with_attachment("DOCS", "p1", "a.txt", "email")
        .with_attachment("DOCS", "p1", "b.txt", "ssn");
    let h = harness(source, ScriptedDetector::new());
    let scan = scan_id("scan-attachments");

    let mut checkpoint = ScanCheckpoint::new(scan.clone(), key("DOCS"), "worker-dead");
    checkpoint.advance_to_page("p1");
    checkpoint.advance_to_attachment("p1", "a.txt");
    checkpoint.transition(CheckpointStatus::Paused, None);
    h.checkpoints.save(&checkpoint).await.expect("save checkpoint");

    h.orchestrator
        .scan(&scan, SpaceSelection::Keys(vec![key("DOCS")]))
        .await
        .expect("scan runs");

    let events = h.events.find_by_scan(&scan).await.expect("events");
    let items: Vec<(Option<String>, Option<String>)> = events
        .iter()
        .filter(|e| e.is_item_event())
        .map(|e| (e.page_id.clone(), e.attachment_name.clone()))
        .collect();
    assert_eq!(
        items,
        vec![
            (p("p1"), Some("b.txt".to_string())),
            (p("p2"), None),
            (p("p3"), None),
        ]
    );
}

#[tokio::test]
async fn test_resume_after_cursor_page_removed() {
    let source = MemorySource::default().with_space(
        "DOCS",
        &[("p1", "email"), ("p3", "ssn"), ("p4", "nothing")],
    );
    let h = harness(source, ScriptedDetector::new());
    let scan = scan_id("scan-shrunk");

    // p2 was the last page processed and has since been deleted.
    let mut checkpoint = ScanCheckpoint::new(scan.clone(), key("DOCS"), "worker-dead");
    checkpoint.total_pages = 4;
    checkpoint.advance_to_page("p1");
    checkpoint.advance_to_page("p2");
    checkpoint.transition(CheckpointStatus::Paused, None);
    h.checkpoints.save(&checkpoint).await.expect("save checkpoint");

    let report = h
        .orchestrator
        .scan(&scan, SpaceSelection::Keys(vec![key("DOCS")]))
        .await
        .expect("scan runs");
    assert!(report.completed);
    assert_eq!(h.detector.calls(), 2);

    let events = h.events.find_by_scan(&scan).await.expect("events");
    let pages: Vec<Option<String>> = events
        .iter()
        .filter(|e| e.is_item_event())
        .map(|e| e.page_id.clone())
        .collect();
    assert_eq!(pages, vec![p("p3"), p("p4")]);

    let finished = h
        .checkpoints
        .find_by_scan_and_space(&scan, &key("DOCS"))
        .await
        .expect("find")
        .expect("exists");
    assert_eq!(finished.status, CheckpointStatus::Completed);
    assert_eq!(finished.cursor.page_id.as_deref(), Some("p4"));
    assert_eq!((finished.pages_processed, finished.total_pages), (3, 3));
}

#[tokio::test]
async fn test_attachments_follow_their_page() {
    let source = docs_source().with_attachment("DOCS", "p2", "scan.pdf", "email ssn");
    let h = harness(source, ScriptedDetector::new());
    let scan = scan_id("scan-attachments");

    h.orchestrator
        .scan(&scan, SpaceSelection::Keys(vec![key("DOCS")]))
        .await
        .expect("scan runs");

    let events = h.events.find_by_scan(&scan).await.expect("events");
    let attachment = events
        .iter()
        .find(|e| e.event_type == ScanEventType::AttachmentScanned)
        .expect("attachment event");
    assert_eq!(attachment.sequence, 4);
    assert_eq!(attachment.page_id.as_deref(), Some("p2"));
    assert_eq!(attachment.attachment_name.as_deref(), Some("scan.pdf"));
    assert_eq!(attachment.detected_entities.len(), 2);
}

#[tokio::test]
async fn test_entities_below_threshold_do_not_surface() {
    let source = MemorySource::default().with_space("HR", &[("h1", "weak-email ssn")]);
    let h = harness(source, ScriptedDetector::new());
    let scan = scan_id("scan-thresholds");

    h.orchestrator
        .scan(&scan, SpaceSelection::Keys(vec![key("HR")]))
        .await
        .expect("scan runs");

    let events = h.events.find_by_scan(&scan).await.expect("events");
    let page_event = events
        .iter()
        .find(|e| e.event_type == ScanEventType::PageScanned)
        .expect("page event");
    assert_eq!(page_event.detected_entities.len(), 1);
    assert_eq!(page_event.detected_entities[0].entity_type, "SSN");
    assert_eq!(
        page_event.summary_by_category,
        BTreeMap::from([("SSN".to_string(), 1)])
    );
}

#[tokio::test]
async fn test_service_failure_fails_only_its_space() {
    let source = docs_source().with_space("OPS", &[("o1", "fine"), ("o2", "poison"), ("o3", "never")]);
    let detector = ScriptedDetector::new().fail(
        "poison",
        vec![DetectionError::Service {
            status: Some(422),
            message: "unsupported encoding".to_string(),
        }],
    );
    let h = harness(source, detector);
    let scan = scan_id("scan-all");

    let report = h
        .orchestrator
        .scan(&scan, SpaceSelection::All)
        .await
        .expect("scan runs");

    assert_eq!(
        report.space(&key("DOCS")).expect("DOCS").outcome,
        SpaceOutcome::Completed
    );
    let ops = report.space(&key("OPS")).expect("OPS");
    assert_eq!(ops.outcome, SpaceOutcome::Failed);
    assert!(ops.error.as_deref().expect("error").contains("unsupported encoding"));
    assert!(report.completed);

    let ops_checkpoint = h
        .checkpoints
        .find_by_scan_and_space(&scan, &key("OPS"))
        .await
        .expect("find")
        .expect("exists");
    assert_eq!(ops_checkpoint.status, CheckpointStatus::Failed);
    assert_eq!(ops_checkpoint.cursor.page_id.as_deref(), Some("o1"));

    let ops_events: Vec<ScanEvent> = h
        .orchestrator
        .events_for_space(&scan, &key("OPS"), 0)
        .map(|e| e.expect("event"))
        .collect()
        .await;
    let last = ops_events.last().expect("OPS events");
    assert_eq!(last.event_type, ScanEventType::Error);
    assert_eq!(last.page_id.as_deref(), Some("o2"));
    assert!(!ops_events
        .iter()
        .any(|e| e.event_type == ScanEventType::SpaceCompleted));
}

#[tokio::test]
async fn test_failed_space_stays_failed_within_its_scan() {
    let source = MemorySource::default().with_space("OPS", &[("o1", "fine"), ("o2", "poison"), ("o3", "ssn")]);
    let detector = ScriptedDetector::new().fail(
        "poison",
        vec![DetectionError::Service {
            status: Some(422),
            message: "unsupported encoding".to_string(),
        }],
    );
    let h = harness(source, detector);
    let scan = scan_id("scan-failing");
    let ops = || SpaceSelection::Keys(vec![key("OPS")]);

    let first = h.orchestrator.scan(&scan, ops()).await.expect("scan runs");
    assert_eq!(first.space(&key("OPS")).expect("OPS").outcome, SpaceOutcome::Failed);
    let recorded = h.events.find_by_scan(&scan).await.expect("events").len();
    assert_eq!(h.detector.calls(), 2);

    let again = h.orchestrator.scan(&scan, ops()).await.expect("scan runs");
    let result = again.space(&key("OPS")).expect("OPS");
    assert_eq!(result.outcome, SpaceOutcome::AlreadyFailed);
    assert!(result.error.as_deref().expect("error").contains("unsupported encoding"));
    assert!(again.completed);
    assert_eq!(h.detector.calls(), 2);
    assert_eq!(h.events.find_by_scan(&scan).await.expect("events").len(), recorded);

    let history = h
        .checkpoints
        .find_by_scan_and_space(&scan, &key("OPS"))
        .await
        .expect("find")
        .expect("exists");
    assert_eq!(history.status, CheckpointStatus::Failed);
    assert_eq!(history.cursor.page_id.as_deref(), Some("o1"));

    // A new scan starts the space over.
    let retry = h
        .orchestrator
        .scan(&scan_id("scan-retry"), ops())
        .await
        .expect("scan runs");
    assert_eq!(retry.space(&key("OPS")).expect("OPS").outcome, SpaceOutcome::Completed);
}

#[tokio::test]
async fn test_unreachable_space_records_failed_checkpoint() {
    let source = docs_source()
        .with_space("HR", &[("h1", "email")])
        .with_unreachable_space("HR");
    let h = harness(source, ScriptedDetector::new());
    let scan = scan_id("scan-unreachable");

    let report = h
        .orchestrator
        .scan(&scan, SpaceSelection::Keys(vec![key("DOCS"), key("HR")]))
        .await
        .expect("scan runs");
    assert!(report.completed);
    assert_eq!(
        report.space(&key("DOCS")).expect("DOCS").outcome,
        SpaceOutcome::Completed
    );
    let hr = report.space(&key("HR")).expect("HR");
    assert_eq!(hr.outcome, SpaceOutcome::Failed);
    assert!(hr.error.as_deref().expect("error").contains("wiki unreachable"));

    let checkpoint = h
        .checkpoints
        .find_by_scan_and_space(&scan, &key("HR"))
        .await
        .expect("find")
        .expect("FAILED checkpoint recorded");
    assert_eq!(checkpoint.status, CheckpointStatus::Failed);
    assert!(checkpoint
        .error_message
        .as_deref()
        .expect("error message")
        .contains("wiki unreachable"));
    assert!(checkpoint.cursor.is_initial());

    let hr_events: Vec<ScanEvent> = h
        .orchestrator
        .events_for_space(&scan, &key("HR"), 0)
        .map(|e| e.expect("event"))
        .collect()
        .await;
    assert_eq!(hr_events.len(), 1);
    assert_eq!(hr_events[0].event_type, ScanEventType::Error);
    assert_eq!(hr_events[0].error_message, checkpoint.error_message);
    assert_eq!(h.detector.calls(), 3);
}

#[tokio::test]
async fn test_unknown_space_emits_error_without_checkpoint() {
    let h = harness(docs_source(), ScriptedDetector::new());
    let scan = scan_id("scan-ghost");

    let result = h.orchestrator.scan_space(&scan, &key("GHOST")).await;
    assert!(matches!(result, Err(ScanError::SpaceNotFound { .. })));

    assert!(h
        .checkpoints
        .find_by_scan(&scan)
        .await
        .expect("find")
        .is_empty());
    let events = h.events.find_by_scan(&scan).await.expect("events");
    assert_eq!(events[0].event_type, ScanEventType::Error);
    assert_eq!(events[0].space_key, key("GHOST"));
}

#[tokio::test]
async fn test_concurrent_holder_gets_conflict_and_siblings_continue() {
    let source = || {
        MemorySource::default()
            .with_space("DOCS", &[("d1", "slow email"), ("d2", "ssn")])
            .with_space("HR", &[("h1", "email")])
    };
    let checkpoints: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
    let events: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
    let first = harness_with(source(), ScriptedDetector::new(), checkpoints.clone(), events.clone());
    let second = build_harness(
        source(),
        ScriptedDetector::new(),
        checkpoints.clone(),
        events.clone(),
        "worker-b",
        &AppConfig::default(),
    );
    let scan = scan_id("scan-shared");

    let running = first
        .orchestrator
        .spawn_scan(scan.clone(), SpaceSelection::Keys(vec![key("DOCS")]));
    first.detector.entered.notified().await;

    let conflict = second.orchestrator.scan_space(&scan, &key("DOCS")).await;
    assert!(matches!(conflict, Err(ScanError::CheckpointConflict { .. })));

    let report = second
        .orchestrator
        .scan(&scan, SpaceSelection::Keys(vec![key("DOCS"), key("HR")]))
        .await
        .expect("scan runs");
    assert_eq!(
        report.space(&key("DOCS")).expect("DOCS").outcome,
        SpaceOutcome::Conflict
    );
    assert_eq!(
        report.space(&key("HR")).expect("HR").outcome,
        SpaceOutcome::Completed
    );
    assert!(!report.completed);

    first.detector.gate.add_permits(1);
    let first_report = running.await.expect("task joins").expect("scan runs");
    assert_eq!(
        first_report.space(&key("DOCS")).expect("DOCS").outcome,
        SpaceOutcome::Completed
    );

    // Both writers shared one sequence space without collisions.
    let all = events.find_by_scan(&scan).await.expect("events");
    let sequences: Vec<u64> = all.iter().map(|e| e.sequence).collect();
    let mut sorted = sequences.clone();
    sorted.dedup();
    assert_eq!(sequences, sorted);
    assert_eq!(
        all.iter()
            .filter(|e| e.event_type == ScanEventType::SpaceCompleted)
            .count(),
        2
    );
}

#[tokio::test]
async fn test_taken_over_holder_stops_writing() {
    let checkpoints: Arc<dyn CheckpointStore> = Arc::new(InMemoryCheckpointStore::new());
    let events: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
    let first = harness_with(
        MemorySource::default().with_space("DOCS", &[("d1", "slow email"), ("d2", "ssn")]),
        ScriptedDetector::new(),
        checkpoints.clone(),
        events.clone(),
    );
    // With a zero lease every RUNNING row it finds looks abandoned.
    let mut impatient = AppConfig::default();
    impatient.scanning.lease_timeout_secs = 0;
    let second = build_harness(
        MemorySource::default().with_space("DOCS", &[("d1", "email"), ("d2", "ssn")]),
        ScriptedDetector::new(),
        checkpoints.clone(),
        events.clone(),
        "worker-b",
        &impatient,
    );
    let scan = scan_id("scan-lease");

    let running = first
        .orchestrator
        .spawn_scan(scan.clone(), SpaceSelection::Keys(vec![key("DOCS")]));
    first.detector.entered.notified().await;

    let takeover = second
        .orchestrator
        .scan(&scan, SpaceSelection::Keys(vec![key("DOCS")]))
        .await
        .expect("scan runs");
    assert_eq!(
        takeover.space(&key("DOCS")).expect("DOCS").outcome,
        SpaceOutcome::Completed
    );

    first.detector.gate.add_permits(1);
    let stale = running.await.expect("task joins").expect("scan runs");
    assert_eq!(
        stale.space(&key("DOCS")).expect("DOCS").outcome,
        SpaceOutcome::Conflict
    );
    assert!(!stale.completed);
    assert_eq!(first.detector.calls(), 1);

    let checkpoint = checkpoints
        .find_by_scan_and_space(&scan, &key("DOCS"))
        .await
        .expect("find")
        .expect("exists");
    assert_eq!(checkpoint.status, CheckpointStatus::Completed);
    assert_eq!(checkpoint.owner, "worker-b");
    assert_eq!(checkpoint.cursor.page_id.as_deref(), Some("d2"));
    assert_eq!(checkpoint.pages_processed, 2);

    let all = events.find_by_scan(&scan).await.expect("events");
    assert_eq!(
        all.iter()
            .filter(|e| e.event_type == ScanEventType::SpaceCompleted)
            .count(),
        1
    );
}

#[tokio::test]
async fn test_paused_space_resumes_from_cursor() {
    let h = harness(
        MemorySource::default().with_space("DOCS", &[("p1", "slow email"), ("p2", "ssn"), ("p3", "x")]),
        ScriptedDetector::new(),
    );
    let scan = scan_id("scan-pause");

    let running = h
        .orchestrator
        .spawn_scan(scan.clone(), SpaceSelection::Keys(vec![key("DOCS")]));
    h.detector.entered.notified().await;
    assert!(h.orchestrator.pause_space(&scan, &key("DOCS")));
    h.detector.gate.add_permits(1);

    let report = running.await.expect("task joins").expect("scan runs");
    assert_eq!(
        report.space(&key("DOCS")).expect("DOCS").outcome,
        SpaceOutcome::Paused
    );
    assert!(!report.completed);

    let paused = h
        .checkpoints
        .find_by_scan_and_space(&scan, &key("DOCS"))
        .await
        .expect("find")
        .expect("exists");
    assert_eq!(paused.status, CheckpointStatus::Paused);
    assert_eq!(paused.cursor.page_id.as_deref(), Some("p1"));
    assert!(!h.orchestrator.pause_space(&scan, &key("DOCS")));

    let report = h
        .orchestrator
        .scan(&scan, SpaceSelection::Keys(vec![key("DOCS")]))
        .await
        .expect("resume runs");
    assert!(report.completed);

    let events = h.events.find_by_scan(&scan).await.expect("events");
    let pages: Vec<Option<String>> = events
        .iter()
        .filter(|e| e.event_type == ScanEventType::PageScanned)
        .map(|e| e.page_id.clone())
        .collect();
    assert_eq!(pages, vec![p("p1"), p("p2"), p("p3")]);
    let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, (1..=sequences.len() as u64).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_rescanning_a_completed_scan_is_a_no_op() {
    let h = harness(docs_source(), ScriptedDetector::new());
    let scan = scan_id("scan-twice");

    h.orchestrator
        .scan(&scan, SpaceSelection::All)
        .await
        .expect("first scan");
    let before = h.events.find_by_scan(&scan).await.expect("events").len();

    let report = h
        .orchestrator
        .scan(&scan, SpaceSelection::All)
        .await
        .expect("second scan");
    assert!(report.completed);
    assert_eq!(
        report.space(&key("DOCS")).expect("DOCS").outcome,
        SpaceOutcome::AlreadyCompleted
    );
    assert_eq!(
        h.events.find_by_scan(&scan).await.expect("events").len(),
        before
    );
}

#[tokio::test]
async fn test_live_subscriber_sees_every_event_once() {
    let h = harness(docs_source(), ScriptedDetector::new());
    let scan = scan_id("scan-live");

    let live = h.orchestrator.subscribe(&scan, &key("DOCS"), 0);
    h.orchestrator
        .scan(&scan, SpaceSelection::Keys(vec![key("DOCS")]))
        .await
        .expect("scan runs");

    let received: Vec<u64> = tokio::time::timeout(
        Duration::from_secs(5),
        live.map(|e| e.expect("event").sequence).collect::<Vec<_>>(),
    )
    .await
    .expect("subscription ends");
    assert_eq!(received, vec![1, 2, 3, 4, 5, 6]);

    let reconnect = h.orchestrator.subscribe(&scan, &key("DOCS"), 3);
    let replayed: Vec<u64> = tokio::time::timeout(
        Duration::from_secs(5),
        reconnect.map(|e| e.expect("event").sequence).collect::<Vec<_>>(),
    )
    .await
    .expect("subscription ends");
    assert_eq!(replayed, vec![4, 5, 6]);
}

#[tokio::test]
async fn test_purge_and_fresh_full_scan() {
    let h = harness(docs_source(), ScriptedDetector::new());
    let scan = scan_id("scan-old");
    h.orchestrator
        .scan(&scan, SpaceSelection::All)
        .await
        .expect("scan runs");

    let report = h
        .orchestrator
        .start_fresh_full_scan()
        .await
        .expect("fresh scan");
    assert_ne!(report.scan_id, scan);
    assert!(report.completed);

    assert!(h
        .orchestrator
        .checkpoints_for_scan(&scan)
        .await
        .expect("find")
        .is_empty());
    assert!(h.events.find_by_scan(&scan).await.expect("events").is_empty());

    h.orchestrator
        .purge_scan(&report.scan_id)
        .await
        .expect("purge scan");
    assert!(h
        .events
        .find_by_scan(&report.scan_id)
        .await
        .expect("events")
        .is_empty());
}

#[tokio::test]
async fn test_delete_active_keeps_completed_history() {
    let h = harness(docs_source(), ScriptedDetector::new());
    let scan = scan_id("scan-history");
    h.orchestrator
        .scan(&scan, SpaceSelection::Keys(vec![key("DOCS")]))
        .await
        .expect("scan runs");
    h.checkpoints
        .save(&ScanCheckpoint::new(scan.clone(), key("HR"), "worker-a"))
        .await
        .expect("save running");

    assert_eq!(
        h.orchestrator
            .delete_active_scan_checkpoints()
            .await
            .expect("delete active"),
        1
    );
    let remaining = h.orchestrator.checkpoints_for_scan(&scan).await.expect("find");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].status, CheckpointStatus::Completed);
}

#[tokio::test]
async fn test_sqlite_stores_drive_the_same_pipeline() {
    let db = Database::in_memory().await.expect("open database");
    db.run_migrations().await.expect("run migrations");
    let h = harness_with(
        docs_source(),
        ScriptedDetector::new().fail("payroll ssn record", vec![timeout(), timeout()]),
        Arc::new(db.checkpoint_store()),
        Arc::new(db.event_store()),
    );
    let scan = scan_id("scan-sqlite");

    let report = h
        .orchestrator
        .scan(&scan, SpaceSelection::Keys(vec![key("DOCS")]))
        .await
        .expect("scan runs");
    assert!(report.completed);

    let events = h.events.find_by_scan(&scan).await.expect("events");
    let sequences: Vec<u64> = events.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, (1..=7).collect::<Vec<_>>());

    let summary = h
        .orchestrator
        .space_summary(&scan, &key("DOCS"))
        .await
        .expect("summary");
    assert_eq!(summary.pages_scanned, 3);
    assert_eq!(summary.error_events, 1);
    assert_eq!(summary.entity_count(), 2);
}
