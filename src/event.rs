//! Inbox event records, pages, and remote receipts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Cursor, EventId, EventStatus};

/// One event as listed by the remote inbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Server-assigned identifier.
    pub event_id: EventId,
    /// Free-form type tag, e.g. `order.created`.
    pub event_type: String,
    /// Producer identifier.
    pub source: String,
    /// Arbitrary structured payload.
    pub payload: serde_json::Value,
    /// Server ingestion time.
    pub ingested_at: DateTime<Utc>,
    /// Current lifecycle status.
    pub status: EventStatus,
}

/// One page of events as returned by a single list call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Page {
    /// Events in server order.
    pub events: Vec<Event>,
    /// Cursor for the following page, absent on the last page.
    #[serde(default)]
    pub next_cursor: Option<Cursor>,
    /// Total matching events, across all pages.
    pub total_count: u64,
}

impl Page {
    /// Identifiers on this page in display order.
    pub fn event_ids(&self) -> impl Iterator<Item = &EventId> {
        self.events.iter().map(|e| &e.event_id)
    }

    /// True when the page contains `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.events.iter().any(|e| e.event_id == id)
    }

    /// True when a following page exists.
    pub fn has_next(&self) -> bool {
        self.next_cursor.is_some()
    }
}

/// Response to `POST /inbox/{id}/acknowledge`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcknowledgeReceipt {
    /// Acknowledged event.
    pub event_id: EventId,
    /// Status reported after the transition.
    pub status: String,
    /// Server acknowledgement time.
    pub acknowledged_at: DateTime<Utc>,
}

/// Response to `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Service status string, usually `healthy`.
    pub status: String,
    /// Server time of the probe.
    pub timestamp: DateTime<Utc>,
    /// Deployed service version.
    pub version: String,
}

/// Body of `POST /events`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    /// Type tag for the new event.
    pub event_type: String,
    /// Producer identifier.
    pub source: String,
    /// Event payload.
    pub payload: serde_json::Value,
    /// Optional correlation metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Response to `POST /events`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReceipt {
    /// Identifier assigned to the new event.
    pub event_id: EventId,
    /// Initial status.
    pub status: String,
    /// Ingestion time.
    pub timestamp: DateTime<Utc>,
    /// Human-readable confirmation.
    pub message: String,
}
