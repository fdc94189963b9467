//! Batching and delivery of user events and experience summaries.
//!
//! Events and summaries live in separate bounded queues. A background task
//! flushes each queue when it is full or its oldest record is stale, and a
//! full queue hands its contents to that task immediately on the next
//! enqueue. Every event flush is preceded by a complete summary flush, and
//! flushes never run concurrently.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use uuid::Uuid;

use super::queue::{BoundedQueue, PushResult, Queued};
use super::session_manager::SessionManager;
use crate::error::{CFError, ErrorCode, Result};
use crate::http::{
    EventPayload, NetworkGuard, SummaryPayload, Transport, EVENT_SEND_KEY, SUMMARY_SEND_KEY,
};
use crate::platform::Clock;
use crate::storage::{Storage, PENDING_EVENTS_STORAGE_KEY};
use crate::types::{CFUser, EventRecord, SummaryRecord};

/// Longest accepted event name.
pub const MAX_EVENT_NAME_LENGTH: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub events_queue_size: usize,
    pub events_flush_time_threshold: Duration,
    pub events_flush_interval: Duration,
    pub summaries_queue_size: usize,
    pub summaries_flush_time_threshold: Duration,
    pub summaries_flush_interval: Duration,
    pub max_stored_events: usize,
}

type Batch<T> = Vec<Queued<T>>;

struct PipelineInner {
    config: PipelineConfig,
    transport: Arc<dyn Transport>,
    guard: Arc<NetworkGuard>,
    clock: Arc<dyn Clock>,
    storage: Arc<dyn Storage>,
    user: Arc<RwLock<CFUser>>,
    sessions: Arc<SessionManager>,
    events: BoundedQueue<EventRecord>,
    summaries: BoundedQueue<SummaryRecord>,
    /// Batches drained from a full queue, waiting for the flusher. They stay
    /// here until sent, so stopping the flusher never loses them.
    event_batches: Mutex<VecDeque<Batch<EventRecord>>>,
    summary_batches: Mutex<VecDeque<Batch<SummaryRecord>>>,
    batch_ready: Notify,
    seen_experiences: Mutex<HashSet<String>>,
    flush_lock: tokio::sync::Mutex<()>,
    is_running: AtomicBool,
}

pub struct EventPipeline {
    inner: Arc<PipelineInner>,
    shutdown_tx: Mutex<Option<mpsc::Sender<()>>>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

impl EventPipeline {
    pub fn new(
        config: PipelineConfig,
        transport: Arc<dyn Transport>,
        guard: Arc<NetworkGuard>,
        clock: Arc<dyn Clock>,
        storage: Arc<dyn Storage>,
        user: Arc<RwLock<CFUser>>,
        sessions: Arc<SessionManager>,
    ) -> Self {
        let events = BoundedQueue::new("event", config.events_queue_size);
        let summaries = BoundedQueue::new("summary", config.summaries_queue_size);
        Self {
            inner: Arc::new(PipelineInner {
                config,
                transport,
                guard,
                clock,
                storage,
                user,
                sessions,
                events,
                summaries,
                event_batches: Mutex::new(VecDeque::new()),
                summary_batches: Mutex::new(VecDeque::new()),
                batch_ready: Notify::new(),
                seen_experiences: Mutex::new(HashSet::new()),
                flush_lock: tokio::sync::Mutex::new(()),
                is_running: AtomicBool::new(false),
            }),
            shutdown_tx: Mutex::new(None),
            flusher: Mutex::new(None),
        }
    }

    /// Start the background flusher.
    pub fn start(&self) {
        if self.inner.is_running.swap(true, Ordering::SeqCst) {
            return;
        }

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        *self.shutdown_tx.lock() = Some(shutdown_tx);

        let inner = Arc::clone(&self.inner);

        let handle = tokio::spawn(async move {
            let mut events_tick = interval(inner.config.events_flush_interval);
            events_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut summaries_tick = interval(inner.config.summaries_flush_interval);
            summaries_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("Event pipeline flusher shutting down");
                        break;
                    }
                    _ = inner.batch_ready.notified() => {
                        inner.flush_batches().await;
                    }
                    _ = summaries_tick.tick() => {
                        let now = inner.clock.now();
                        if inner.summaries.should_flush(now, inner.config.summaries_flush_time_threshold) {
                            let _ = inner.flush_summaries().await;
                        }
                    }
                    _ = events_tick.tick() => {
                        let now = inner.clock.now();
                        if inner.events.should_flush(now, inner.config.events_flush_time_threshold) {
                            let _ = inner.flush().await;
                        }
                    }
                }
            }

            inner.is_running.store(false, Ordering::SeqCst);
        });
        *self.flusher.lock() = Some(handle);
    }

    /// Stop the background flusher. Queued records and handed-off batches
    /// stay in place for the next flush.
    pub fn stop(&self) {
        self.inner.is_running.store(false, Ordering::SeqCst);
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.try_send(());
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.is_running.load(Ordering::SeqCst)
    }

    /// Record a user event stamped with the current session.
    pub fn track_event(
        &self,
        name: &str,
        properties: HashMap<String, serde_json::Value>,
    ) -> Result<EventRecord> {
        let name = name.trim();
        if name.is_empty() || name.len() > MAX_EVENT_NAME_LENGTH {
            return Err(CFError::validation(
                ErrorCode::EventInvalidName,
                format!("Event name must be 1..={} characters", MAX_EVENT_NAME_LENGTH),
            ));
        }

        let record = EventRecord {
            event_customer_id: name.to_string(),
            properties,
            event_timestamp: self.inner.clock.now(),
            session_id: self.inner.sessions.update_activity(),
            insert_id: Uuid::new_v4().to_string(),
        };

        self.inner.enqueue_event(record.clone());
        Ok(record)
    }

    /// Queue a summary unless one for the same experience was already queued.
    ///
    /// Returns `Ok(None)` for a duplicate. Deduplication lasts for the
    /// lifetime of the pipeline.
    pub fn track_summary(&self, record: SummaryRecord) -> Result<Option<SummaryRecord>> {
        if record.experience_id.is_empty() || record.config_id.is_empty() || record.variation_id.is_empty() {
            return Err(CFError::validation(
                ErrorCode::SummaryInvalid,
                "Summary needs experience, config and variation ids",
            ));
        }

        if !self
            .inner
            .seen_experiences
            .lock()
            .insert(record.experience_id.clone())
        {
            return Ok(None);
        }

        self.inner.enqueue_summary(record.clone());
        Ok(Some(record))
    }

    /// Flush summaries, then events. Returns the number of records sent.
    pub async fn flush(&self) -> Result<usize> {
        self.inner.flush().await
    }

    pub fn pending_events(&self) -> usize {
        let handed_off: usize = self.inner.event_batches.lock().iter().map(Vec::len).sum();
        self.inner.events.len() + handed_off
    }

    pub fn pending_summaries(&self) -> usize {
        let handed_off: usize = self.inner.summary_batches.lock().iter().map(Vec::len).sum();
        self.inner.summaries.len() + handed_off
    }

    /// Load events persisted by a previous run into the event queue.
    ///
    /// The stored copy is removed only after it decoded successfully.
    pub fn restore_pending(&self) -> Result<usize> {
        let inner = &self.inner;
        let Some(bytes) = inner.storage.get(PENDING_EVENTS_STORAGE_KEY)? else {
            return Ok(0);
        };

        let records: Vec<EventRecord> = serde_json::from_slice(&bytes)
            .map_err(|e| CFError::serialization("Failed to decode pending events", e))?;
        inner.storage.remove(PENDING_EVENTS_STORAGE_KEY)?;

        let restored = records.len();
        for record in records {
            let enqueued_at = record.event_timestamp;
            if let Some(evicted) = inner.events.push_evicting(record, enqueued_at) {
                tracing::warn!("Dropped restored event '{}': queue full", evicted.event_customer_id);
            }
        }
        tracing::info!("Restored {} pending events from storage", restored);
        Ok(restored)
    }

    /// Write unsent events to storage, newest `max_stored_events` kept.
    pub fn persist_pending(&self) -> Result<usize> {
        let inner = &self.inner;
        let mut records: Vec<EventRecord> = Vec::new();
        while let Some(batch) = inner.next_event_batch() {
            records.extend(batch.into_iter().map(|q| q.item));
        }
        records.extend(inner.events.drain().into_iter().map(|q| q.item));
        if records.is_empty() {
            return Ok(0);
        }

        let excess = records.len().saturating_sub(inner.config.max_stored_events);
        if excess > 0 {
            tracing::warn!("Dropping {} oldest events beyond storage limit", excess);
            records.drain(..excess);
        }

        let bytes = serde_json::to_vec(&records)
            .map_err(|e| CFError::serialization("Failed to encode pending events", e))?;
        inner.storage.set(PENDING_EVENTS_STORAGE_KEY, &bytes)?;
        tracing::info!("Persisted {} pending events", records.len());
        Ok(records.len())
    }

    /// Stop the flusher, attempt one final flush, then persist whatever
    /// events remain. The whole sequence is bounded by `timeout`; a send cut
    /// off by the deadline puts its batch back before persisting.
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        self.stop();

        let flusher = self.flusher.lock().take();
        if let Some(mut handle) = flusher {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                handle.abort();
                // Waiting for the cancelled task drops its in-flight batch,
                // which returns the records to their queue.
                let _ = handle.await;
            }
        }

        let flushed = match tokio::time::timeout_at(deadline, self.inner.flush()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => {
                tracing::warn!("Final flush failed: {}", e.sanitized_message());
                Ok(())
            }
            Err(_) => Err(CFError::new(
                ErrorCode::ShutdownTimeout,
                format!("Final flush did not finish within {:?}", timeout),
            )),
        };

        let unsent_summaries = self.pending_summaries();
        if unsent_summaries > 0 {
            tracing::warn!("Discarding {} unsent summaries at shutdown", unsent_summaries);
        }
        if let Err(e) = self.persist_pending() {
            tracing::warn!("Failed to persist pending events: {}", e);
        }
        flushed
    }
}

impl Drop for EventPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A drained batch on its way to the server. Unless marked delivered, it
/// goes back to the front of its queue when dropped, which covers both a
/// failed send and a flush cancelled mid-send.
struct InFlight<'a, T> {
    queue: &'a BoundedQueue<T>,
    label: &'static str,
    batch: Option<Batch<T>>,
}

impl<'a, T: Clone> InFlight<'a, T> {
    fn new(queue: &'a BoundedQueue<T>, label: &'static str, batch: Batch<T>) -> Self {
        Self {
            queue,
            label,
            batch: Some(batch),
        }
    }

    fn items(&self) -> Vec<T> {
        self.batch
            .iter()
            .flatten()
            .map(|queued| queued.item.clone())
            .collect()
    }

    fn delivered(mut self) -> usize {
        self.batch.take().map_or(0, |batch| batch.len())
    }
}

impl<T> Drop for InFlight<'_, T> {
    fn drop(&mut self) {
        if let Some(batch) = self.batch.take() {
            let count = batch.len();
            let dropped = self.queue.requeue_front(batch);
            tracing::warn!(
                "{} {} not delivered; {} requeued",
                count,
                self.label,
                count - dropped
            );
        }
    }
}

impl PipelineInner {
    fn is_offline(&self) -> bool {
        self.guard.monitor().is_offline_mode()
    }

    fn has_pending(&self) -> bool {
        !self.events.is_empty()
            || !self.summaries.is_empty()
            || !self.event_batches.lock().is_empty()
            || !self.summary_batches.lock().is_empty()
    }

    fn next_event_batch(&self) -> Option<Batch<EventRecord>> {
        self.event_batches.lock().pop_front()
    }

    fn next_summary_batch(&self) -> Option<Batch<SummaryRecord>> {
        self.summary_batches.lock().pop_front()
    }

    fn enqueue_event(&self, record: EventRecord) {
        let now = self.clock.now();
        if self.is_offline() {
            if let Some(evicted) = self.events.push_evicting(record, now) {
                tracing::warn!(
                    "Event queue full while offline; dropped event '{}'",
                    evicted.event_customer_id
                );
            }
            return;
        }

        if let PushResult::Drained(batch) = self.events.push_or_drain(record, now) {
            tracing::debug!("Event queue full; flushing {} events", batch.len());
            if self.is_running.load(Ordering::SeqCst) {
                self.event_batches.lock().push_back(batch);
                self.batch_ready.notify_one();
            } else {
                self.events.requeue_front(batch);
            }
        }
    }

    fn enqueue_summary(&self, record: SummaryRecord) {
        let now = self.clock.now();
        if self.is_offline() {
            if let Some(evicted) = self.summaries.push_evicting(record, now) {
                tracing::warn!(
                    "Summary queue full while offline; dropped summary for experience '{}'",
                    evicted.experience_id
                );
            }
            return;
        }

        if let PushResult::Drained(batch) = self.summaries.push_or_drain(record, now) {
            tracing::debug!("Summary queue full; flushing {} summaries", batch.len());
            if self.is_running.load(Ordering::SeqCst) {
                self.summary_batches.lock().push_back(batch);
                self.batch_ready.notify_one();
            } else {
                self.summaries.requeue_front(batch);
            }
        }
    }

    /// Send handed-off batches only. Records still sitting in the queues
    /// wait for their timer.
    async fn flush_batches(&self) {
        let _flush = self.flush_lock.lock().await;
        let has_events = !self.event_batches.lock().is_empty();
        if has_events {
            let _ = self.flush_summaries_locked().await;
        } else {
            let _ = self.send_summary_batches().await;
        }
        let _ = self.send_event_batches().await;
    }

    async fn flush(&self) -> Result<usize> {
        if !self.has_pending() {
            return Ok(0);
        }
        if self.is_offline() {
            return Err(CFError::offline("Event flush"));
        }

        let _flush = self.flush_lock.lock().await;
        let summaries = self.flush_summaries_locked().await;
        let events = match self.send_event_batches().await {
            Ok(sent) => self
                .send_events(self.events.drain())
                .await
                .map(|queued| sent + queued),
            Err(e) => Err(e),
        };

        match (summaries, events) {
            (Ok(s), Ok(e)) => Ok(s + e),
            (Err(e), _) | (_, Err(e)) => Err(e),
        }
    }

    async fn flush_summaries(&self) -> Result<usize> {
        let _flush = self.flush_lock.lock().await;
        self.flush_summaries_locked().await
    }

    async fn flush_summaries_locked(&self) -> Result<usize> {
        let sent = self.send_summary_batches().await?;
        Ok(sent + self.send_summaries(self.summaries.drain()).await?)
    }

    async fn send_summary_batches(&self) -> Result<usize> {
        let mut sent = 0;
        while let Some(batch) = self.next_summary_batch() {
            sent += self.send_summaries(batch).await?;
        }
        Ok(sent)
    }

    async fn send_event_batches(&self) -> Result<usize> {
        let mut sent = 0;
        while let Some(batch) = self.next_event_batch() {
            sent += self.send_events(batch).await?;
        }
        Ok(sent)
    }

    async fn send_summaries(&self, batch: Batch<SummaryRecord>) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }

        let in_flight = InFlight::new(&self.summaries, "summaries", batch);
        let payload = SummaryPayload::new(
            self.user.read().clone(),
            self.sessions.current_session_id(),
            in_flight.items(),
        );
        let transport = &self.transport;
        let result = self
            .guard
            .call(SUMMARY_SEND_KEY, "Summary send", || transport.send_summaries(&payload))
            .await;

        settle(result, in_flight)
    }

    async fn send_events(&self, batch: Batch<EventRecord>) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }

        let in_flight = InFlight::new(&self.events, "events", batch);
        let payload = EventPayload::new(
            self.user.read().clone(),
            self.sessions.current_session_id(),
            in_flight.items(),
        );
        let transport = &self.transport;
        let result = self
            .guard
            .call(EVENT_SEND_KEY, "Event send", || transport.send_events(&payload))
            .await;

        settle(result, in_flight)
    }
}

fn settle<T: Clone>(result: Result<()>, in_flight: InFlight<'_, T>) -> Result<usize> {
    match result {
        Ok(()) => {
            let label = in_flight.label;
            let count = in_flight.delivered();
            tracing::debug!("Flushed {} {}", count, label);
            Ok(count)
        }
        Err(e) => {
            tracing::warn!("Failed to send {}: {}", in_flight.label, e.sanitized_message());
            Err(e)
        }
    }
}
