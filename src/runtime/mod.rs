//! Single-writer async runtime and event stream APIs.

/// Bulk operation executor.
pub mod bulk;
/// Event stream types emitted by the runtime.
pub mod events;
/// Handle and command loop implementation.
pub mod handle;
/// Interval trigger for background refreshes.
pub mod poll;
