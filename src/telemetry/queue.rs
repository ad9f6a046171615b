//! Buffered analytics delivery
//!
//! Events are appended to an in-memory buffer that is mirrored to the store
//! after every change. Delivery happens in batches through the gateway; a
//! failed batch goes back in front of anything recorded meanwhile, so the
//! service always sees events in recording order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};
use serde_json::{Value, json};
use tokio::task::JoinHandle;

use super::event::QueuedEvent;
use super::session::{Session, SessionManager};
use crate::config::TelemetryConfig;
use crate::gateway::{CallOptions, Gateway};
use crate::host::{Connectivity, IdentityProvider};
use crate::store::{PersistentStore, StoreExt, keys};

/// Result of a flush attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// The batch was acknowledged
    Delivered(usize),
    /// Nothing buffered
    Empty,
    /// Another flush holds the guard
    AlreadyRunning,
    /// Known offline; nothing was attempted
    Offline,
    /// Delivery failed and the batch was put back
    Requeued { events: usize, error: String },
    Disabled,
}

/// Clears the single-flight flag when the flush ends, however it ends
struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct TelemetryQueue {
    gateway: Gateway,
    store: Arc<dyn PersistentStore>,
    connectivity: Connectivity,
    config: TelemetryConfig,
    session: SessionManager,
    /// Events not yet handed to a flush
    buffer: Mutex<Vec<QueuedEvent>>,
    /// Batch currently being delivered; still persisted until acknowledged
    in_flight: Mutex<Vec<QueuedEvent>>,
    /// Events found in the store at startup that are not loaded yet. Held
    /// across every store write so writes never interleave.
    unrestored: Mutex<Option<Vec<QueuedEvent>>>,
    flushing: AtomicBool,
}

impl TelemetryQueue {
    pub fn new(
        gateway: Gateway,
        connectivity: Connectivity,
        identity: Arc<dyn IdentityProvider>,
        config: TelemetryConfig,
    ) -> Self {
        let store = gateway.store().clone();
        let session = SessionManager::establish(store.clone(), identity, config.session_timeout());
        let unrestored = match store.get_json::<Vec<QueuedEvent>>(keys::EVENT_QUEUE) {
            Ok(events) => events,
            Err(e) => {
                warn!("Discarding unreadable telemetry queue: {}", e);
                None
            }
        };
        Self {
            gateway,
            store,
            connectivity,
            config,
            session,
            buffer: Mutex::new(Vec::new()),
            in_flight: Mutex::new(Vec::new()),
            unrestored: Mutex::new(unrestored),
            flushing: AtomicBool::new(false),
        }
    }

    /// Rebuild the buffer from what the store held at startup.
    ///
    /// Persisted events are older than anything recorded since startup, so
    /// they go in front. Until this runs they are kept in the store alongside
    /// new events. Returns how many were restored; later calls restore none.
    pub fn load_persisted(&self) -> usize {
        let restored = {
            let mut unrestored = lock(&self.unrestored);
            let Some(persisted) = unrestored.take() else {
                return 0;
            };
            let restored = persisted.len();
            let mut buffer = lock(&self.buffer);
            let newer = std::mem::take(&mut *buffer);
            *buffer = persisted;
            buffer.extend(newer);
            restored
        };
        self.persist();
        debug!("Restored {} persisted telemetry events", restored);
        restored
    }

    /// Buffer an event. Resolves once any flush it triggered has settled.
    pub async fn record(&self, mut event: QueuedEvent) {
        if !self.config.enabled {
            return;
        }

        let session = self.session.touch();
        event.session_id = Some(session.session_id);
        let critical = event.is_critical();

        let len = {
            let mut buffer = lock(&self.buffer);
            buffer.push(event);
            buffer.len()
        };
        self.persist();

        if critical || len >= self.config.batch_size {
            debug!(
                "Immediate telemetry flush ({})",
                if critical { "critical event" } else { "batch full" }
            );
            self.flush().await;
        }
    }

    pub async fn track_event(
        &self,
        category: &str,
        action: &str,
        label: Option<&str>,
        data: Value,
    ) {
        let mut event = QueuedEvent::new(category, action).with_data(data);
        if let Some(label) = label {
            event = event.with_label(label);
        }
        self.record(event).await;
    }

    pub async fn track_page_view(&self, page: &str) {
        if !self.config.enabled {
            return;
        }
        let session = self.session.record_page_view();
        self.record(
            QueuedEvent::page_view(page).with_data(json!({ "pageViews": session.page_view_count })),
        )
        .await;
    }

    pub async fn track_error(&self, message: &str, context: Value) {
        self.record(QueuedEvent::error(message).with_data(context))
            .await;
    }

    /// Deliver everything buffered as one batch.
    ///
    /// At most one flush runs at a time; a concurrent call returns
    /// [`FlushOutcome::AlreadyRunning`] immediately.
    pub async fn flush(&self) -> FlushOutcome {
        if !self.config.enabled {
            return FlushOutcome::Disabled;
        }

        if self
            .flushing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return FlushOutcome::AlreadyRunning;
        }
        let _guard = FlushGuard(&self.flushing);

        if !self.connectivity.is_online() {
            debug!("Offline, deferring telemetry flush");
            return FlushOutcome::Offline;
        }

        let batch = {
            let mut in_flight = lock(&self.in_flight);
            let mut buffer = lock(&self.buffer);
            // Left over from a flush that was cancelled before it settled
            let mut batch = std::mem::take(&mut *in_flight);
            batch.append(&mut *buffer);
            if batch.is_empty() {
                return FlushOutcome::Empty;
            }
            *in_flight = batch.clone();
            batch
        };
        let count = batch.len();

        let payload = self.batch_payload(&batch);
        let result = self
            .gateway
            .call(&self.config.endpoint, CallOptions::post(payload).no_cache())
            .await;

        match result {
            Ok(_) => {
                lock(&self.in_flight).clear();
                self.persist();
                info!("Delivered {} telemetry events", count);
                FlushOutcome::Delivered(count)
            }
            Err(e) => {
                self.requeue_in_flight();
                warn!("Telemetry flush failed, {} events requeued: {}", count, e);
                FlushOutcome::Requeued {
                    events: count,
                    error: e.to_string(),
                }
            }
        }
    }

    /// Best-effort delivery at shutdown. Nothing is removed from the buffer,
    /// so events may be delivered again by the next session's flush.
    pub fn page_exit(&self) -> Option<JoinHandle<()>> {
        if !self.config.enabled || !self.connectivity.is_online() {
            return None;
        }

        let events: Vec<QueuedEvent> = {
            let in_flight = lock(&self.in_flight);
            let buffer = lock(&self.buffer);
            in_flight.iter().chain(buffer.iter()).cloned().collect()
        };
        if events.is_empty() {
            return None;
        }

        let payload = self.batch_payload(&events);
        Some(self.gateway.beacon(&self.config.endpoint, payload))
    }

    /// Flush on a fixed schedule while online
    pub fn spawn_flush_timer(self: Arc<Self>) -> JoinHandle<()> {
        let period = self.config.flush_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                if self.connectivity.is_online() {
                    self.flush().await;
                }
            }
        })
    }

    /// Events waiting for delivery, in delivery order
    pub fn pending(&self) -> Vec<QueuedEvent> {
        let in_flight = lock(&self.in_flight);
        let buffer = lock(&self.buffer);
        in_flight.iter().chain(buffer.iter()).cloned().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.in_flight).len() + lock(&self.buffer).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn session(&self) -> Session {
        self.session.current()
    }

    fn batch_payload(&self, events: &[QueuedEvent]) -> Value {
        let session = self.session.current();
        let (user_id, anonymous_id) = if session.anonymous {
            (None, Some(session.user_id))
        } else {
            (Some(session.user_id), None)
        };
        json!({
            "sessionId": session.session_id,
            "userId": user_id,
            "anonymousId": anonymous_id,
            "events": events,
        })
    }

    /// Put the failed batch back in front of anything recorded meanwhile
    fn requeue_in_flight(&self) {
        {
            let mut in_flight = lock(&self.in_flight);
            let mut buffer = lock(&self.buffer);
            let mut restored = std::mem::take(&mut *in_flight);
            restored.append(&mut *buffer);
            *buffer = restored;
        }
        self.persist();
    }

    /// Mirror pending events to the store. A failed write is logged and the
    /// in-memory buffer stays authoritative.
    fn persist(&self) {
        let unrestored = lock(&self.unrestored);
        let events: Vec<QueuedEvent> = match unrestored.as_ref() {
            Some(older) => older.iter().cloned().chain(self.pending()).collect(),
            None => self.pending(),
        };
        let result = if events.is_empty() {
            self.store.remove(keys::EVENT_QUEUE).map(|_| ())
        } else {
            self.store.put_json(keys::EVENT_QUEUE, &events)
        };
        if let Err(e) = result {
            warn!("Failed to persist telemetry queue ({} events): {}", events.len(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::gateway::mock::{MockReply, MockTransport};
    use crate::host::StoredIdentity;
    use crate::store::MemoryStore;
    use std::time::Duration;

    const ENDPOINT: &str = "/analytics/events";

    fn queue_with(
        transport: Arc<MockTransport>,
        store: Arc<MemoryStore>,
        online: bool,
    ) -> (TelemetryQueue, Connectivity) {
        let config = Config::default();
        let gateway = Gateway::new(&config, transport, store.clone());
        let connectivity = Connectivity::new(online);
        let identity = Arc::new(StoredIdentity::new(store));
        let queue = TelemetryQueue::new(
            gateway,
            connectivity.clone(),
            identity,
            config.telemetry.clone(),
        );
        (queue, connectivity)
    }

    fn labels(events: &[QueuedEvent]) -> Vec<String> {
        events.iter().filter_map(|e| e.label.clone()).collect()
    }

    fn delivered_labels(transport: &MockTransport) -> Vec<Vec<String>> {
        transport
            .requests()
            .iter()
            .filter(|r| r.url.contains(ENDPOINT))
            .map(|r| {
                let events: Vec<QueuedEvent> =
                    serde_json::from_value(r.body.as_ref().unwrap()["events"].clone()).unwrap();
                labels(&events)
            })
            .collect()
    }

    fn ui_event(label: &str) -> QueuedEvent {
        QueuedEvent::new("ui", "click").with_label(label)
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_flush_requeues_in_order() {
        let transport = Arc::new(MockTransport::new());
        transport
            .reply(ENDPOINT, MockReply::offline())
            .reply(ENDPOINT, MockReply::offline())
            .reply(ENDPOINT, MockReply::offline())
            .reply(ENDPOINT, MockReply::ok(json!({"accepted": 4})));
        let store = Arc::new(MemoryStore::new());
        let (queue, _conn) = queue_with(transport.clone(), store, true);

        for label in ["A", "B", "C"] {
            queue.record(ui_event(label)).await;
        }

        let outcome = queue.flush().await;
        assert!(matches!(outcome, FlushOutcome::Requeued { events: 3, .. }));

        queue.record(ui_event("D")).await;
        assert_eq!(queue.flush().await, FlushOutcome::Delivered(4));

        let batches = delivered_labels(&transport);
        assert_eq!(batches.last().unwrap(), &vec!["A", "B", "C", "D"]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_record_persists_buffer() {
        let transport = Arc::new(MockTransport::new());
        let store = Arc::new(MemoryStore::new());
        let (queue, _conn) = queue_with(transport.clone(), store.clone(), true);

        queue.record(ui_event("A")).await;
        queue.record(ui_event("B")).await;

        let persisted: Vec<QueuedEvent> = store.get_json(keys::EVENT_QUEUE).unwrap().unwrap();
        assert_eq!(labels(&persisted), vec!["A", "B"]);
        assert!(persisted.iter().all(|e| e.session_id.is_some()));
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn test_successful_flush_clears_persisted_copy() {
        let transport = Arc::new(MockTransport::new());
        let store = Arc::new(MemoryStore::new());
        let (queue, _conn) = queue_with(transport.clone(), store.clone(), true);

        queue.record(ui_event("A")).await;
        assert_eq!(queue.flush().await, FlushOutcome::Delivered(1));

        assert!(store.get(keys::EVENT_QUEUE).unwrap().is_none());
        assert_eq!(queue.flush().await, FlushOutcome::Empty);
    }

    #[tokio::test]
    async fn test_critical_event_flushes_immediately() {
        let transport = Arc::new(MockTransport::new());
        let store = Arc::new(MemoryStore::new());
        let (queue, _conn) = queue_with(transport.clone(), store, true);

        queue.record(ui_event("A")).await;
        queue
            .record(QueuedEvent::new("survey", "submit").with_label("s-1"))
            .await;

        assert_eq!(delivered_labels(&transport), vec![vec!["A", "s-1"]]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_full_batch_flushes() {
        let transport = Arc::new(MockTransport::new());
        let store = Arc::new(MemoryStore::new());
        let (queue, _conn) = queue_with(transport.clone(), store, true);

        for i in 0..99 {
            queue.record(ui_event(&i.to_string())).await;
        }
        assert_eq!(transport.count(ENDPOINT), 0);

        queue.record(ui_event("99")).await;
        assert_eq!(transport.count(ENDPOINT), 1);
        assert_eq!(delivered_labels(&transport)[0].len(), 100);
    }

    #[tokio::test]
    async fn test_offline_flush_keeps_events() {
        let transport = Arc::new(MockTransport::new());
        let store = Arc::new(MemoryStore::new());
        let (queue, connectivity) = queue_with(transport.clone(), store, false);

        queue.record(QueuedEvent::error("boom")).await;
        assert_eq!(queue.flush().await, FlushOutcome::Offline);
        assert_eq!(queue.len(), 1);
        assert!(transport.requests().is_empty());

        connectivity.set_online(true);
        assert_eq!(queue.flush().await, FlushOutcome::Delivered(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_flush_is_single_flight() {
        let transport = Arc::new(MockTransport::new());
        transport.set_delay(Duration::from_millis(100));
        let store = Arc::new(MemoryStore::new());
        let (queue, _conn) = queue_with(transport.clone(), store, true);

        queue.record(ui_event("A")).await;
        let (first, second) = tokio::join!(queue.flush(), queue.flush());

        assert_eq!(first, FlushOutcome::Delivered(1));
        assert_eq!(second, FlushOutcome::AlreadyRunning);
        assert_eq!(transport.count(ENDPOINT), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_recorded_during_flush_are_persisted_with_batch() {
        let transport = Arc::new(MockTransport::new());
        transport.set_delay(Duration::from_millis(100));
        transport.reply(ENDPOINT, MockReply::Json(503, json!({"message": "down"})));
        let store = Arc::new(MemoryStore::new());
        let (queue, _conn) = queue_with(transport.clone(), store.clone(), true);

        queue.record(ui_event("A")).await;
        let (outcome, _) = tokio::join!(queue.flush(), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            queue.record(ui_event("B")).await;
            let persisted: Vec<QueuedEvent> = store.get_json(keys::EVENT_QUEUE).unwrap().unwrap();
            assert_eq!(labels(&persisted), vec!["A", "B"]);
        });

        assert!(matches!(outcome, FlushOutcome::Requeued { events: 1, .. }));
        assert_eq!(labels(&queue.pending()), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_load_persisted_restores_older_events_first() {
        let transport = Arc::new(MockTransport::new());
        let store = Arc::new(MemoryStore::new());
        store
            .put_json(keys::EVENT_QUEUE, &vec![ui_event("old-1"), ui_event("old-2")])
            .unwrap();
        let (queue, _conn) = queue_with(transport, store.clone(), true);

        queue.record(ui_event("new")).await;
        let persisted: Vec<QueuedEvent> = store.get_json(keys::EVENT_QUEUE).unwrap().unwrap();
        assert_eq!(labels(&persisted), vec!["old-1", "old-2", "new"]);

        assert_eq!(queue.load_persisted(), 2);
        assert_eq!(labels(&queue.pending()), vec!["old-1", "old-2", "new"]);

        assert_eq!(queue.load_persisted(), 0);
        assert_eq!(labels(&queue.pending()), vec!["old-1", "old-2", "new"]);
        let persisted: Vec<QueuedEvent> = store.get_json(keys::EVENT_QUEUE).unwrap().unwrap();
        assert_eq!(labels(&persisted), vec!["old-1", "old-2", "new"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_flush_keeps_its_batch() {
        let transport = Arc::new(MockTransport::new());
        transport.set_delay(Duration::from_millis(100));
        let store = Arc::new(MemoryStore::new());
        let (queue, _conn) = queue_with(transport.clone(), store.clone(), true);
        let queue = Arc::new(queue);

        queue.record(ui_event("A")).await;
        let pending_flush = tokio::spawn({
            let queue = queue.clone();
            async move { queue.flush().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        pending_flush.abort();
        assert!(pending_flush.await.unwrap_err().is_cancelled());

        transport.set_delay(Duration::ZERO);
        queue.record(ui_event("B")).await;
        assert_eq!(queue.flush().await, FlushOutcome::Delivered(2));

        assert_eq!(delivered_labels(&transport).last().unwrap(), &vec!["A", "B"]);
        assert!(queue.is_empty());
        assert!(store.get(keys::EVENT_QUEUE).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_storage_failure_does_not_lose_events() {
        let transport = Arc::new(MockTransport::new());
        let store = Arc::new(MemoryStore::new());
        let (queue, _conn) = queue_with(transport.clone(), store.clone(), true);
        store.set_quota(Some(0));

        queue.record(ui_event("A")).await;
        assert_eq!(queue.len(), 1);

        store.set_quota(None);
        assert_eq!(queue.flush().await, FlushOutcome::Delivered(1));
    }

    #[tokio::test]
    async fn test_page_exit_sends_beacon_without_clearing() {
        let transport = Arc::new(MockTransport::new());
        let store = Arc::new(MemoryStore::new());
        let (queue, _conn) = queue_with(transport.clone(), store, true);

        queue.record(ui_event("A")).await;
        queue.page_exit().unwrap().await.unwrap();

        assert_eq!(transport.count(ENDPOINT), 1);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_queue_ignores_events() {
        let transport = Arc::new(MockTransport::new());
        let store = Arc::new(MemoryStore::new());
        let mut config = Config::default();
        config.telemetry.enabled = false;
        let gateway = Gateway::new(&config, transport.clone(), store.clone());
        let queue = TelemetryQueue::new(
            gateway,
            Connectivity::new(true),
            Arc::new(StoredIdentity::new(store)),
            config.telemetry,
        );

        queue.record(QueuedEvent::error("boom")).await;
        assert!(queue.is_empty());
        assert_eq!(queue.flush().await, FlushOutcome::Disabled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_timer_delivers_periodically() {
        let transport = Arc::new(MockTransport::new());
        let store = Arc::new(MemoryStore::new());
        let (queue, _conn) = queue_with(transport.clone(), store, true);
        let queue = Arc::new(queue);

        queue.record(ui_event("A")).await;
        let timer = queue.clone().spawn_flush_timer();

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(transport.count(ENDPOINT), 1);
        assert!(queue.is_empty());
        timer.abort();
    }
}
