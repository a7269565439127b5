//! Runtime event stream payloads.

use crate::{
    core::key::{KeyFamily, QueryKey},
    op::BulkOperation,
    types::EventId,
};

/// Events emitted from the inbox runtime loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboxEvent {
    /// A list call completed and its page was stored.
    PageLoaded {
        /// Key the page belongs to.
        key: QueryKey,
        /// Events on the page.
        events: usize,
        /// Total matching events reported by the server.
        total_count: u64,
    },
    /// A list call failed.
    FetchFailed {
        /// Key that was being fetched.
        key: QueryKey,
        /// Error message.
        message: String,
    },
    /// Cached entries were marked stale.
    Invalidated {
        /// Family that was invalidated.
        family: KeyFamily,
        /// Number of entries affected.
        entries: usize,
    },
    /// The active key changed (filter or page navigation).
    ViewChanged {
        /// New active key.
        key: QueryKey,
    },
    /// Selection membership changed.
    SelectionChanged {
        /// Number of selected ids.
        selected: usize,
    },
    /// A polling tick started a background read.
    PollTick {
        /// Key being refreshed.
        key: QueryKey,
    },
    /// A single event was acknowledged.
    Acknowledged {
        /// Acknowledged event.
        event_id: EventId,
    },
    /// A single event was deleted.
    Deleted {
        /// Deleted event.
        event_id: EventId,
    },
    /// A bulk operation settled.
    BulkCompleted {
        /// Operation that ran.
        operation: BulkOperation,
        /// Ids that succeeded.
        succeeded: usize,
        /// Ids that failed.
        failed: usize,
    },
}
