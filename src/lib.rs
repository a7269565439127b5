//! Client-side synchronization for a remote event inbox.
//!
//! The remote inbox is the source of truth. This crate keeps a cached,
//! paginated, filterable view of it, refreshes that view on a timer, tracks a
//! multi-select set over the visible page, and applies acknowledge/delete to
//! one or many events with per-id outcomes.
//!
//! # Examples
//!
//! Pure cache usage with [`core::cache::QueryCache`]:
//! ```
//! use inboxsync::{
//!     core::{
//!         cache::{Lookup, QueryCache},
//!         key::{KeyFamily, QueryKey},
//!     },
//!     event::Page,
//! };
//!
//! let mut cache = QueryCache::new();
//! let key = QueryKey::first_page(None, 100);
//! let Lookup::Fetch(ticket) = cache.lookup(&key) else { unreachable!() };
//! let page = Page { events: vec![], next_cursor: None, total_count: 0 };
//! cache.complete(ticket, Ok(page)).expect("fresh page");
//! assert!(matches!(cache.lookup(&key), Lookup::Hit(_)));
//!
//! assert_eq!(cache.invalidate(&KeyFamily::All), 1);
//! assert!(matches!(cache.lookup(&key), Lookup::Fetch(_)));
//! ```
//!
//! Runtime usage against an in-memory directory:
//! ```
//! use std::sync::Arc;
//!
//! use inboxsync::{
//!     config::InboxConfig,
//!     op::BulkOperation,
//!     remote::memory::MemoryDirectory,
//!     runtime::handle::spawn_inbox,
//!     types::EventStatus,
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let directory = Arc::new(MemoryDirectory::new());
//! directory.push("user.created", "auth", EventStatus::Pending);
//! directory.push("user.deleted", "auth", EventStatus::Pending);
//!
//! let config = InboxConfig { polling_enabled: false, ..InboxConfig::default() };
//! let inbox = spawn_inbox(directory.clone(), &config);
//! let page = inbox.read().await.expect("read");
//! assert_eq!(page.events.len(), 2);
//!
//! inbox.select_all().await.expect("select");
//! let result = inbox.bulk(BulkOperation::Acknowledge).await.expect("bulk");
//! assert!(result.is_complete());
//! inbox.shutdown().await.expect("shutdown");
//! # }
//! ```

/// Environment-driven configuration.
pub mod config;
/// Pure cache, cursor, key, and selection state.
pub mod core;
/// API credential holder and persistence.
pub mod credential;
/// Inbox records as served by the remote API.
pub mod event;
/// Bulk operation model and outcomes.
pub mod op;
/// Remote event directory abstraction and implementations.
pub mod remote;
/// Single-writer runtime handle and events.
pub mod runtime;
/// Shared scalar types.
pub mod types;
