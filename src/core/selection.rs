use hashbrown::HashSet;

use crate::{event::Page, types::EventId};

/// Event ids currently selected in the displayed page.
#[derive(Debug, Clone, Default)]
pub struct SelectionSet {
    ids: HashSet<EventId>,
}

impl SelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Flips membership of `id`; returns whether it is now selected.
    pub fn toggle(&mut self, id: &str) -> bool {
        if self.ids.remove(id) {
            false
        } else {
            self.ids.insert(id.to_string());
            true
        }
    }

    pub fn set(&mut self, id: &str, checked: bool) {
        if checked {
            self.ids.insert(id.to_string());
        } else {
            self.ids.remove(id);
        }
    }

    /// Replaces the selection with exactly `ids`.
    pub fn select_all<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<EventId>,
    {
        self.ids = ids.into_iter().map(Into::into).collect();
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    /// Drops every id in `ids`; returns how many were selected.
    pub fn remove_all<'a, I>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = &'a EventId>,
    {
        ids.into_iter().filter(|id| self.ids.remove(id.as_str())).count()
    }

    /// Drops ids that are not on `page`; returns how many were pruned.
    pub fn retain_visible(&mut self, page: &Page) -> usize {
        let before = self.ids.len();
        let visible: HashSet<&str> = page.event_ids().map(String::as_str).collect();
        self.ids.retain(|id| visible.contains(id.as_str()));
        before - self.ids.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Selected ids, sorted.
    pub fn ids(&self) -> Vec<EventId> {
        let mut out: Vec<EventId> = self.ids.iter().cloned().collect();
        out.sort();
        out
    }

    /// True when every event on a non-empty `page` is selected.
    pub fn all_selected(&self, page: &Page) -> bool {
        !page.events.is_empty() && page.event_ids().all(|id| self.ids.contains(id.as_str()))
    }
}
