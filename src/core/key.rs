use std::fmt;

use crate::types::{Cursor, EventStatus, PageSize};

/// Identity of one cacheable page: filter, cursor, and page size.
///
/// Absent filter or cursor is a distinct value from every concrete one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub status: Option<EventStatus>,
    pub cursor: Option<Cursor>,
    pub page_size: PageSize,
}

impl QueryKey {
    pub fn first_page(status: Option<EventStatus>, page_size: PageSize) -> Self {
        Self {
            status,
            cursor: None,
            page_size,
        }
    }

    pub fn with_cursor(&self, cursor: Option<Cursor>) -> Self {
        Self {
            cursor,
            ..self.clone()
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = self.status.map(EventStatus::as_str).unwrap_or("all");
        let cursor = self.cursor.as_ref().map(Cursor::as_str).unwrap_or("-");
        write!(f, "inbox[{status}, {cursor}, {}]", self.page_size)
    }
}

/// A set of query keys addressed together by invalidation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyFamily {
    /// Every inbox key.
    All,
    /// Every cursor and page size for one filter.
    Status(Option<EventStatus>),
    /// A single key.
    Exact(QueryKey),
}

impl KeyFamily {
    pub fn matches(&self, key: &QueryKey) -> bool {
        match self {
            KeyFamily::All => true,
            KeyFamily::Status(status) => key.status == *status,
            KeyFamily::Exact(exact) => exact == key,
        }
    }
}
