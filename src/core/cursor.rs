use crate::{
    event::Page,
    types::{Cursor, EventStatus, PageSize},
};

use super::key::QueryKey;

/// How "previous page" behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetreatMode {
    /// The server only hands out forward cursors, so retreat returns to page one.
    #[default]
    FirstPage,
    /// Keep every visited cursor and pop back one page at a time.
    History,
}

/// Maps page navigation onto opaque server cursors.
#[derive(Debug, Clone)]
pub struct CursorManager {
    status: Option<EventStatus>,
    cursor: Option<Cursor>,
    page_size: PageSize,
    mode: RetreatMode,
    /// Cursors of pages before the current one; only kept in `History` mode.
    history: Vec<Option<Cursor>>,
}

impl CursorManager {
    pub fn new(status: Option<EventStatus>, page_size: PageSize, mode: RetreatMode) -> Self {
        Self {
            status,
            cursor: None,
            page_size,
            mode,
            history: Vec::new(),
        }
    }

    pub fn key(&self) -> QueryKey {
        QueryKey {
            status: self.status,
            cursor: self.cursor.clone(),
            page_size: self.page_size,
        }
    }

    pub fn status(&self) -> Option<EventStatus> {
        self.status
    }

    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    /// Moves to the page identified by `next_cursor`, which must come verbatim
    /// from the last page read.
    pub fn advance(&mut self, next_cursor: Cursor) {
        let prev = self.cursor.replace(next_cursor);
        if self.mode == RetreatMode::History {
            self.history.push(prev);
        }
    }

    pub fn retreat(&mut self) {
        self.cursor = match self.mode {
            RetreatMode::FirstPage => None,
            RetreatMode::History => self.history.pop().flatten(),
        };
    }

    /// Switches the status filter and returns to the first page.
    pub fn set_filter(&mut self, status: Option<EventStatus>) {
        self.status = status;
        self.cursor = None;
        self.history.clear();
    }

    pub fn has_next(&self, page: &Page) -> bool {
        page.has_next()
    }

    pub fn has_previous(&self) -> bool {
        self.cursor.is_some()
    }

    pub fn page_label(&self) -> String {
        match (self.mode, self.cursor.is_some()) {
            (_, false) => "1".to_string(),
            (RetreatMode::FirstPage, true) => "2+".to_string(),
            (RetreatMode::History, true) => (self.history.len() + 1).to_string(),
        }
    }
}
