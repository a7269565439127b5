//! Synchronous view-state components owned by the inbox runtime.

/// Query cache with stale-while-revalidate reads and invalidation.
pub mod cache;
/// Pagination cursor bookkeeping.
pub mod cursor;
/// Query keys and key families.
pub mod key;
/// Multi-select state.
pub mod selection;
