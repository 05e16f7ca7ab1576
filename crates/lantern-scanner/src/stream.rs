//! Live event fan-out with replay from the event log.
//!
//! Each subscriber gets its own producer task. The task subscribes to the
//! broadcast channel first, then replays persisted events newer than the
//! subscriber's last-seen sequence, then forwards live events. A high-water
//! mark drops anything already delivered, so the concatenation has no gaps
//! and no duplicates. A lagging receiver re-replays from the store instead of
//! losing events.

use futures::stream::StreamExt;
use lantern_core::{ScanEvent, ScanEventType, ScanId, SpaceKey};
use lantern_db::EventStore;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::ReceiverStream;

/// Stream handed to one subscriber. Ends after the scan's `SCAN_COMPLETED`.
pub type EventSubscription = ReceiverStream<lantern_db::Result<ScanEvent>>;

/// Default capacity of the shared broadcast channel.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 1024;

/// Publishes freshly recorded events to live subscribers.
pub struct EventHub {
    sender: broadcast::Sender<Arc<ScanEvent>>,
    events: Arc<dyn EventStore>,
    subscriber_buffer: usize,
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("receivers", &self.sender.receiver_count())
            .field("subscriber_buffer", &self.subscriber_buffer)
            .finish_non_exhaustive()
    }
}

impl EventHub {
    /// Create a hub replaying from `events`.
    #[must_use]
    pub fn new(
        events: Arc<dyn EventStore>,
        broadcast_capacity: usize,
        subscriber_buffer: usize,
    ) -> Self {
        let (sender, _rx) = broadcast::channel(broadcast_capacity.max(1));
        Self {
            sender,
            events,
            subscriber_buffer: subscriber_buffer.max(1),
        }
    }

    /// Publish an event that is already persisted.
    pub fn publish(&self, event: ScanEvent) {
        // No receivers is normal when nobody is watching.
        let _ = self.sender.send(Arc::new(event));
    }

    /// Number of live producer tasks.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Subscribe to one space of a scan, starting after `last_seen`.
    ///
    /// Scan-level events (`SCAN_COMPLETED`) are delivered to every space
    /// subscriber of the scan. Must be called inside a Tokio runtime.
    #[must_use]
    pub fn subscribe(&self, scan_id: &ScanId, space_key: &SpaceKey, last_seen: u64) -> EventSubscription {
        let live = self.sender.subscribe();
        let (tx, rx) = mpsc::channel(self.subscriber_buffer);
        let forwarder = Forwarder {
            tx,
            events: Arc::clone(&self.events),
            scan_id: scan_id.clone(),
            space_key: space_key.clone(),
            high_water: last_seen,
        };

        tokio::spawn(forwarder.run(live));
        ReceiverStream::new(rx)
    }
}

/// Per-subscriber producer state.
struct Forwarder {
    tx: mpsc::Sender<lantern_db::Result<ScanEvent>>,
    events: Arc<dyn EventStore>,
    scan_id: ScanId,
    space_key: SpaceKey,
    high_water: u64,
}

impl Forwarder {
    async fn run(mut self, mut live: broadcast::Receiver<Arc<ScanEvent>>) {
        if self.replay().await.is_break() {
            return;
        }

        loop {
            let received = tokio::select! {
                () = self.tx.closed() => return,
                received = live.recv() => received,
            };

            let flow = match received {
                Ok(event) => self.forward(&event).await,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        scan_id = %self.scan_id,
                        space = %self.space_key,
                        skipped,
                        "Live subscriber lagged, replaying from the event log"
                    );
                    self.replay().await
                }
                Err(RecvError::Closed) => return,
            };

            if flow.is_break() {
                return;
            }
        }
    }

    fn relevant(&self, event: &ScanEvent) -> bool {
        event.scan_id == self.scan_id
            && (event.space_key == self.space_key
                || (event.event_type == ScanEventType::ScanCompleted
                    && event.space_key.is_scan_level()))
    }

    async fn forward(&mut self, event: &ScanEvent) -> ControlFlow<()> {
        if event.sequence <= self.high_water || !self.relevant(event) {
            return ControlFlow::Continue(());
        }
        if self.tx.send(Ok(event.clone())).await.is_err() {
            return ControlFlow::Break(());
        }
        self.high_water = event.sequence;

        if event.event_type == ScanEventType::ScanCompleted {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }

    /// Deliver persisted space and scan-level events above the high-water
    /// mark, merged in sequence order.
    async fn replay(&mut self) -> ControlFlow<()> {
        let mut space = self
            .events
            .stream_by_scan_and_space(&self.scan_id, &self.space_key, self.high_water)
            .peekable();
        let mut scan_level = self
            .events
            .stream_by_scan_and_space(&self.scan_id, &SpaceKey::scan_level(), self.high_water)
            .peekable();

        loop {
            let from_space = match (
                Pin::new(&mut space).peek().await,
                Pin::new(&mut scan_level).peek().await,
            ) {
                (None, None) => return ControlFlow::Continue(()),
                (Some(Ok(a)), Some(Ok(b))) => a.sequence <= b.sequence,
                (Some(_), None) | (Some(Err(_)), Some(_)) => true,
                (None, Some(_)) | (Some(Ok(_)), Some(Err(_))) => false,
            };

            let next = if from_space {
                space.next().await
            } else {
                scan_level.next().await
            };

            match next {
                Some(Ok(event)) => {
                    let flow = self.forward(&event).await;
                    if flow.is_break() {
                        return flow;
                    }
                }
                Some(Err(err)) => {
                    tracing::error!(
                        scan_id = %self.scan_id,
                        space = %self.space_key,
                        "Event replay failed: {}",
                        err
                    );
                    let _ = self.tx.send(Err(err)).await;
                    return ControlFlow::Break(());
                }
                None => return ControlFlow::Continue(()),
            }
        }
    }
}
