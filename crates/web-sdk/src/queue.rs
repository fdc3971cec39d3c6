//! Event queue and batcher: buffers normalised events and hands them to
//! delivery on size threshold, timer tick, or page lifecycle signals.

use tracing::{debug, trace};
use trackline_core::{Event, Session};

use crate::delivery::Delivery;

/// Why a flush was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// Queue reached the batch-size threshold.
    Size,
    /// Periodic timer.
    Timer,
    /// Page-visibility changed to hidden.
    Hidden,
    /// The UI source went away (navigation or tab close).
    Unload,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::Size => "size",
            FlushTrigger::Timer => "timer",
            FlushTrigger::Hidden => "hidden",
            FlushTrigger::Unload => "unload",
        }
    }
}

/// Ordered buffer of captured events. Bounded by the flush cadence, not by a
/// capacity cap.
#[derive(Debug)]
pub struct EventQueue {
    events: Vec<Event>,
    batch_size: usize,
    last_timestamp: i64,
}

impl EventQueue {
    pub fn new(batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            events: Vec::with_capacity(batch_size),
            batch_size,
            last_timestamp: i64::MIN,
        }
    }

    /// Append to the tail. Returns true when the batch-size threshold is
    /// reached and a flush is due.
    ///
    /// Timestamps are clamped so they never run backwards within the
    /// session, even if the wall clock does.
    pub fn push(&mut self, mut event: Event) -> bool {
        if event.occurred_at < self.last_timestamp {
            event.occurred_at = self.last_timestamp;
        }
        self.last_timestamp = event.occurred_at;
        self.events.push(event);
        self.events.len() >= self.batch_size
    }

    /// Snapshot and clear in one step. `None` when there is nothing queued.
    pub fn take(&mut self) -> Option<Vec<Event>> {
        if self.events.is_empty() {
            return None;
        }
        Some(std::mem::replace(
            &mut self.events,
            Vec::with_capacity(self.batch_size),
        ))
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Drop queued events and the timestamp floor.
    pub fn clear(&mut self) {
        self.events.clear();
        self.last_timestamp = i64::MIN;
    }
}

/// Couples the queue to delivery.
pub struct Batcher {
    queue: EventQueue,
    delivery: Delivery,
    page_url: String,
    page_hidden: bool,
    flushes: u64,
}

impl Batcher {
    pub fn new(batch_size: usize, delivery: Delivery) -> Self {
        Self {
            queue: EventQueue::new(batch_size),
            delivery,
            page_url: String::new(),
            page_hidden: false,
            flushes: 0,
        }
    }

    /// Queue an event; flushes immediately once the batch is full.
    pub fn enqueue(&mut self, session: &Session, event: Event) {
        trace!(kind = %event.kind, queued = self.queue.len() + 1, "event enqueued");
        metrics::counter!("tracker.events.enqueued").increment(1);
        if self.queue.push(event) {
            self.flush(session, FlushTrigger::Size);
        }
    }

    /// Hand the queued events to delivery. Empty queues are a no-op.
    ///
    /// The queue is cleared before the send resolves: a slow or failed send
    /// never re-transmits these events.
    pub fn flush(&mut self, session: &Session, trigger: FlushTrigger) -> bool {
        let Some(batch) = self.queue.take() else {
            trace!(trigger = trigger.as_str(), "flush skipped, queue empty");
            return false;
        };

        self.flushes += 1;
        metrics::counter!("tracker.flushes", "trigger" => trigger.as_str()).increment(1);
        debug!(
            session_id = %session.session_id,
            count = batch.len(),
            trigger = trigger.as_str(),
            format = self.delivery.format_name(),
            "flushing event batch"
        );

        let unloading = self.page_hidden
            || matches!(trigger, FlushTrigger::Hidden | FlushTrigger::Unload);
        self.delivery.send(session, &self.page_url, batch, unloading);
        true
    }

    /// Page reported in the envelope of subsequent batches.
    pub fn set_page_url(&mut self, url: &str) {
        if self.page_url != url {
            self.page_url = url.to_string();
        }
    }

    pub fn set_page_hidden(&mut self, hidden: bool) {
        self.page_hidden = hidden;
    }

    pub fn page_hidden(&self) -> bool {
        self.page_hidden
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    /// Number of non-empty flushes performed so far.
    pub fn flush_count(&self) -> u64 {
        self.flushes
    }

    pub fn reset(&mut self) {
        self.queue.clear();
        self.page_hidden = false;
        self.flushes = 0;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::format::GenericFormat;
    use crate::transport::{CaptureTransport, DeliveryMode, Transport};
    use std::sync::Arc;
    use trackline_core::EventKind;

    fn session() -> Session {
        Session {
            session_id: "sess_test".into(),
            identity: Some("user@test.com".into()),
        }
    }

    fn click(at: i64) -> Event {
        Event::new(EventKind::Click, at, "https://example.com/").with_attr("seq", at)
    }

    fn batcher(batch_size: usize) -> (Batcher, Arc<CaptureTransport>) {
        let transport = Arc::new(CaptureTransport::new().with_beacon(true));
        let delivery = Delivery::new(
            Box::new(GenericFormat),
            transport.clone() as Arc<dyn Transport>,
            true,
        );
        (Batcher::new(batch_size, delivery), transport)
    }

    fn seqs(payload: &serde_json::Value) -> Vec<i64> {
        payload["events"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["seq"].as_i64().unwrap())
            .collect()
    }

    #[test]
    fn test_empty_flush_sends_nothing() {
        let (mut batcher, transport) = batcher(5);
        assert!(!batcher.flush(&session(), FlushTrigger::Timer));
        assert_eq!(transport.count(), 0);
        assert_eq!(batcher.flush_count(), 0);
    }

    #[test]
    fn test_batch_size_triggers_one_flush() {
        let (mut batcher, transport) = batcher(5);
        for at in 1..=5 {
            batcher.enqueue(&session(), click(at));
        }
        assert_eq!(transport.count(), 1);
        assert!(batcher.queue().is_empty());
        assert_eq!(seqs(&transport.payloads()[0]), vec![1, 2, 3, 4, 5]);

        batcher.enqueue(&session(), click(6));
        assert_eq!(batcher.queue().len(), 1);
        assert_eq!(transport.count(), 1);
    }

    #[test]
    fn test_flush_preserves_order_and_does_not_duplicate() {
        let (mut batcher, transport) = batcher(100);
        for at in [10, 20, 30] {
            batcher.enqueue(&session(), click(at));
        }
        assert!(batcher.flush(&session(), FlushTrigger::Timer));
        batcher.enqueue(&session(), click(40));
        assert!(batcher.flush(&session(), FlushTrigger::Timer));

        let payloads = transport.payloads();
        assert_eq!(payloads.len(), 2);
        assert_eq!(seqs(&payloads[0]), vec![10, 20, 30]);
        assert_eq!(seqs(&payloads[1]), vec![40]);
    }

    #[test]
    fn test_hidden_flush_prefers_beacon() {
        let (mut batcher, transport) = batcher(100);
        batcher.enqueue(&session(), click(1));
        batcher.flush(&session(), FlushTrigger::Timer);
        batcher.enqueue(&session(), click(2));
        batcher.flush(&session(), FlushTrigger::Hidden);

        assert_eq!(
            transport.modes(),
            vec![DeliveryMode::KeepAlive, DeliveryMode::Beacon]
        );
    }

    #[test]
    fn test_envelope_carries_current_page() {
        let (mut batcher, transport) = batcher(100);
        batcher.set_page_url("https://example.com/a");
        batcher.enqueue(&session(), click(1));
        batcher.flush(&session(), FlushTrigger::Timer);
        batcher.set_page_url("https://example.com/b");
        batcher.enqueue(&session(), click(2));
        batcher.flush(&session(), FlushTrigger::Timer);

        let urls: Vec<_> = transport
            .payloads()
            .iter()
            .map(|p| p["url"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(urls, vec!["https://example.com/a", "https://example.com/b"]);
    }

    #[test]
    fn test_timestamps_never_run_backwards() {
        let mut queue = EventQueue::new(10);
        queue.push(click(100));
        queue.push(click(90));
        queue.push(click(120));
        let times: Vec<i64> = queue.events().iter().map(|e| e.occurred_at).collect();
        assert_eq!(times, vec![100, 100, 120]);
    }
}
