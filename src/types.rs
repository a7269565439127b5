//! Shared primitive IDs, cursors, and the event status enum.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Server-assigned event identifier.
pub type EventId = String;
/// Number of events requested per page.
pub type PageSize = u32;

/// Lifecycle status of an inbox event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    /// Ingested but not yet delivered.
    Pending,
    /// Delivered to a consumer.
    Delivered,
    /// Acknowledged by a consumer.
    Acknowledged,
    /// Delivery failed.
    Failed,
}

impl EventStatus {
    /// All statuses in display order.
    pub const ALL: [EventStatus; 4] = [
        EventStatus::Pending,
        EventStatus::Delivered,
        EventStatus::Acknowledged,
        EventStatus::Failed,
    ];

    /// Wire representation used in query strings.
    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Delivered => "delivered",
            EventStatus::Acknowledged => "acknowledged",
            EventStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown event status: {s}"))
    }
}

/// Opaque, server-issued pagination token.
///
/// The client only stores and echoes it back; it never inspects the content.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    /// Wraps a token received from the server.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The token exactly as the server issued it.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cursor({:?})", self.0)
    }
}

impl From<&str> for Cursor {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}
