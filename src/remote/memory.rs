//! In-process event directory with cursor paging and fault injection.

use std::{
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use hashbrown::HashMap;
use tokio::sync::Semaphore;

use crate::{
    core::key::QueryKey,
    event::{AcknowledgeReceipt, Event, HealthStatus, IngestReceipt, NewEvent, Page},
    types::{Cursor, EventId, EventStatus},
};

use super::{EventDirectory, RemoteError, RemoteResult};

#[derive(Debug, Default)]
struct State {
    events: Vec<Event>,
    next_id: u64,
    list_failures: Vec<RemoteError>,
    mutation_failures: HashMap<EventId, RemoteError>,
    health_failure: Option<RemoteError>,
    list_log: Vec<QueryKey>,
}

/// A [`crate::remote::EventDirectory`] backed by a vector in memory.
///
/// Cursors are issued by this directory and only parsed by it.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    state: Mutex<State>,
    list_gate: Mutex<Option<Arc<Semaphore>>>,
    latency: Mutex<Option<Duration>>,
    list_calls: AtomicUsize,
    acknowledge_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: Vec<Event>) -> Self {
        let dir = Self::default();
        dir.lock().events = events;
        dir
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds an event with a generated id and returns it.
    pub fn push(&self, event_type: &str, source: &str, status: EventStatus) -> EventId {
        let mut state = self.lock();
        state.next_id += 1;
        let event_id = format!("evt-{:04}", state.next_id);
        state.events.push(Event {
            event_id: event_id.clone(),
            event_type: event_type.to_string(),
            source: source.to_string(),
            payload: serde_json::json!({}),
            ingested_at: Utc::now(),
            status,
        });
        event_id
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().events.is_empty()
    }

    pub fn status_of(&self, event_id: &str) -> Option<EventStatus> {
        self.lock()
            .events
            .iter()
            .find(|e| e.event_id == event_id)
            .map(|e| e.status)
    }

    /// The next list call fails with `err` (queued, first in first out).
    pub fn fail_next_list(&self, err: RemoteError) {
        self.lock().list_failures.push(err);
    }

    /// The next acknowledge or delete of `event_id` fails with `err`.
    pub fn fail_mutation(&self, event_id: &str, err: RemoteError) {
        self.lock().mutation_failures.insert(event_id.to_string(), err);
    }

    pub fn fail_health(&self, err: Option<RemoteError>) {
        self.lock().health_failure = err;
    }

    /// Holds every subsequent list call until [`MemoryDirectory::release_lists`].
    pub fn hold_lists(&self) {
        *self.list_gate.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(Arc::new(Semaphore::new(0)));
    }

    /// Lets `n` held list calls through.
    pub fn release_lists(&self, n: usize) {
        if let Some(gate) = self.list_gate.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            gate.add_permits(n);
        }
    }

    /// Delay applied to every acknowledge and delete.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = latency;
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn acknowledge_calls(&self) -> usize {
        self.acknowledge_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    /// Highest number of acknowledge/delete calls observed running at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Keys of every list call received, in arrival order.
    pub fn list_log(&self) -> Vec<QueryKey> {
        self.lock().list_log.clone()
    }

    async fn mutation_delay(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        match latency {
            Some(d) => tokio::time::sleep(d).await,
            None => tokio::task::yield_now().await,
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn take_mutation_failure(&self, event_id: &str) -> Option<RemoteError> {
        self.lock().mutation_failures.remove(event_id)
    }
}

fn encode_cursor(offset: usize) -> Cursor {
    Cursor::new(format!("mem:{offset}"))
}

fn decode_cursor(cursor: &Cursor) -> RemoteResult<usize> {
    cursor
        .as_str()
        .strip_prefix("mem:")
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| RemoteError::Rejected {
            status: 400,
            detail: "Invalid cursor".to_string(),
        })
}

#[async_trait]
impl EventDirectory for MemoryDirectory {
    async fn list(&self, key: &QueryKey) -> RemoteResult<Page> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.lock().list_log.push(key.clone());

        let gate = self
            .list_gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(gate) = gate {
            gate.acquire()
                .await
                .map_err(|_| RemoteError::Network("directory closed".to_string()))?
                .forget();
        }

        let mut state = self.lock();
        if !state.list_failures.is_empty() {
            return Err(state.list_failures.remove(0));
        }

        let offset = key.cursor.as_ref().map(decode_cursor).transpose()?.unwrap_or(0);
        let matching: Vec<&Event> = state
            .events
            .iter()
            .filter(|e| key.status.is_none_or(|s| e.status == s))
            .collect();
        let size = key.page_size as usize;
        let events: Vec<Event> = matching.iter().skip(offset).take(size).map(|e| (*e).clone()).collect();
        let end = offset + events.len();
        let next_cursor = (end < matching.len()).then(|| encode_cursor(end));

        Ok(Page {
            total_count: matching.len() as u64,
            events,
            next_cursor,
        })
    }

    async fn acknowledge(&self, event_id: &str) -> RemoteResult<AcknowledgeReceipt> {
        self.acknowledge_calls.fetch_add(1, Ordering::SeqCst);
        self.mutation_delay().await;
        if let Some(err) = self.take_mutation_failure(event_id) {
            return Err(err);
        }

        let mut state = self.lock();
        let event = state
            .events
            .iter_mut()
            .find(|e| e.event_id == event_id)
            .ok_or(RemoteError::NotFound)?;
        event.status = EventStatus::Acknowledged;
        Ok(AcknowledgeReceipt {
            event_id: event_id.to_string(),
            status: EventStatus::Acknowledged.to_string(),
            acknowledged_at: Utc::now(),
        })
    }

    async fn delete(&self, event_id: &str) -> RemoteResult<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        self.mutation_delay().await;
        if let Some(err) = self.take_mutation_failure(event_id) {
            return Err(err);
        }

        let mut state = self.lock();
        let pos = state
            .events
            .iter()
            .position(|e| e.event_id == event_id)
            .ok_or(RemoteError::NotFound)?;
        state.events.remove(pos);
        Ok(())
    }

    async fn health(&self) -> RemoteResult<HealthStatus> {
        if let Some(err) = self.lock().health_failure.clone() {
            return Err(err);
        }
        Ok(HealthStatus {
            status: "healthy".to_string(),
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    async fn ingest(&self, event: &NewEvent) -> RemoteResult<IngestReceipt> {
        let mut state = self.lock();
        state.next_id += 1;
        let event_id = format!("evt-{:04}", state.next_id);
        let now = Utc::now();
        state.events.push(Event {
            event_id: event_id.clone(),
            event_type: event.event_type.clone(),
            source: event.source.clone(),
            payload: event.payload.clone(),
            ingested_at: now,
            status: EventStatus::Pending,
        });
        Ok(IngestReceipt {
            event_id,
            status: "accepted".to_string(),
            timestamp: now,
            message: "Event ingested".to_string(),
        })
    }
}
