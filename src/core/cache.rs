use std::sync::Arc;

use hashbrown::HashMap;

use crate::{
    event::Page,
    remote::RemoteError,
};

use super::key::{KeyFamily, QueryKey};

/// A read that failed with nothing cached to fall back on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to fetch {key}: {cause}")]
pub struct FetchError {
    pub key: QueryKey,
    pub cause: RemoteError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
    InFlight,
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: QueryKey,
    pub page: Option<Arc<Page>>,
    pub freshness: Freshness,
    pub last_error: Option<RemoteError>,
    /// Bumped on every invalidation; a fetch that started under an older
    /// generation cannot mark the entry fresh.
    generation: u64,
    /// Generation the outstanding fetch was issued under.
    fetch_generation: Option<u64>,
}

impl CacheEntry {
    fn new(key: QueryKey) -> Self {
        Self {
            key,
            page: None,
            freshness: Freshness::Stale,
            last_error: None,
            generation: 0,
            fetch_generation: None,
        }
    }

    fn issue(&mut self) -> FetchTicket {
        self.freshness = Freshness::InFlight;
        self.fetch_generation = Some(self.generation);
        FetchTicket {
            key: self.key.clone(),
            generation: self.generation,
        }
    }
}

/// Proof that the holder owns the single outstanding fetch for `key`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    pub key: QueryKey,
    generation: u64,
}

/// Outcome of looking a key up before a read.
#[derive(Debug, Clone)]
pub enum Lookup {
    /// Fresh page, no network call needed.
    Hit(Arc<Page>),
    /// A refresh is running; serve the cached page now.
    Revalidating(Arc<Page>),
    /// A fetch is running and nothing is cached; wait for it.
    Pending,
    /// Caller must issue the network call and report back via [`QueryCache::complete`].
    Fetch(FetchTicket),
}

/// Last-fetched pages keyed by [`QueryKey`], with stale-while-revalidate
/// reads and per-key request coalescing.
#[derive(Debug, Default)]
pub struct QueryCache {
    entries: HashMap<QueryKey, CacheEntry>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&mut self, key: &QueryKey) -> Lookup {
        let entry = self.entry_mut(key);

        let cached = entry.page.clone();
        match (entry.freshness, cached) {
            (Freshness::Fresh, Some(page)) => Lookup::Hit(page),
            (Freshness::InFlight, Some(page)) => Lookup::Revalidating(page),
            (Freshness::InFlight, None) => Lookup::Pending,
            (Freshness::Fresh | Freshness::Stale, _) => Lookup::Fetch(entry.issue()),
        }
    }

    /// Forces a network read for `key` regardless of freshness.
    ///
    /// Returns `None` when a fetch for `key` is already outstanding.
    pub fn begin_refresh(&mut self, key: &QueryKey) -> Option<FetchTicket> {
        let entry = self.entry_mut(key);

        if entry.freshness == Freshness::InFlight {
            return None;
        }
        Some(entry.issue())
    }

    /// True when the outstanding fetch for `key` was issued before the
    /// latest invalidation, so its result will land stale.
    pub fn is_superseded(&self, key: &QueryKey) -> bool {
        self.entries.get(key).is_some_and(|e| {
            e.freshness == Freshness::InFlight && e.fetch_generation != Some(e.generation)
        })
    }

    /// Applies the result of the fetch identified by `ticket`.
    ///
    /// The returned value is what every reader waiting on this fetch sees.
    pub fn complete(
        &mut self,
        ticket: FetchTicket,
        result: Result<Page, RemoteError>,
    ) -> Result<Arc<Page>, FetchError> {
        let entry = self.entry_mut(&ticket.key);
        let superseded = entry.generation != ticket.generation;
        entry.fetch_generation = None;

        match result {
            Ok(page) => {
                let page = Arc::new(page);
                entry.page = Some(Arc::clone(&page));
                entry.last_error = None;
                entry.freshness = if superseded {
                    Freshness::Stale
                } else {
                    Freshness::Fresh
                };
                Ok(page)
            }
            Err(cause) => {
                entry.last_error = Some(cause.clone());
                entry.freshness = Freshness::Stale;
                match entry.page.as_ref() {
                    Some(page) => Ok(Arc::clone(page)),
                    None => Err(FetchError {
                        key: ticket.key,
                        cause,
                    }),
                }
            }
        }
    }

    /// Marks every entry in `family` stale; returns how many matched.
    pub fn invalidate(&mut self, family: &KeyFamily) -> usize {
        let mut count = 0;
        for entry in self.entries.values_mut().filter(|e| family.matches(&e.key)) {
            entry.generation += 1;
            if entry.freshness == Freshness::Fresh {
                entry.freshness = Freshness::Stale;
            }
            count += 1;
        }
        count
    }

    pub fn entry(&self, key: &QueryKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn page(&self, key: &QueryKey) -> Option<Arc<Page>> {
        self.entries.get(key).and_then(|e| e.page.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }

    fn entry_mut(&mut self, key: &QueryKey) -> &mut CacheEntry {
        self.entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::new(key.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Cursor, EventStatus};

    fn key() -> QueryKey {
        QueryKey::first_page(Some(EventStatus::Pending), 100)
    }

    fn page(total: u64) -> Page {
        Page {
            events: vec![],
            next_cursor: Some(Cursor::new("c1")),
            total_count: total,
        }
    }

    fn fetch(cache: &mut QueryCache, key: &QueryKey) -> FetchTicket {
        match cache.lookup(key) {
            Lookup::Fetch(ticket) => ticket,
            other => panic!("expected fetch, got {other:?}"),
        }
    }

    #[test]
    fn second_lookup_while_empty_fetch_runs_is_pending() {
        let mut cache = QueryCache::new();
        let k = key();
        let ticket = fetch(&mut cache, &k);
        assert!(matches!(cache.lookup(&k), Lookup::Pending));
        assert!(cache.begin_refresh(&k).is_none());

        let got = cache.complete(ticket, Ok(page(3))).unwrap();
        assert_eq!(got.total_count, 3);
        assert!(matches!(cache.lookup(&k), Lookup::Hit(p) if p.total_count == 3));
    }

    #[test]
    fn refresh_serves_cached_page_while_in_flight() {
        let mut cache = QueryCache::new();
        let k = key();
        let ticket = fetch(&mut cache, &k);
        cache.complete(ticket, Ok(page(1))).unwrap();

        let refresh = cache.begin_refresh(&k).expect("refresh ticket");
        assert!(matches!(cache.lookup(&k), Lookup::Revalidating(p) if p.total_count == 1));

        cache.complete(refresh, Ok(page(2))).unwrap();
        assert!(matches!(cache.lookup(&k), Lookup::Hit(p) if p.total_count == 2));
    }

    #[test]
    fn invalidated_entry_refetches_even_with_page() {
        let mut cache = QueryCache::new();
        let k = key();
        let other = QueryKey::first_page(None, 100);
        let t1 = fetch(&mut cache, &k);
        cache.complete(t1, Ok(page(1))).unwrap();
        let t2 = fetch(&mut cache, &other);
        cache.complete(t2, Ok(page(9))).unwrap();

        assert_eq!(cache.invalidate(&KeyFamily::Status(Some(EventStatus::Pending))), 1);
        assert!(matches!(cache.lookup(&k), Lookup::Fetch(_)));
        assert!(matches!(cache.lookup(&other), Lookup::Hit(_)));
    }

    #[test]
    fn invalidation_during_fetch_keeps_result_stale() {
        let mut cache = QueryCache::new();
        let k = key();
        let ticket = fetch(&mut cache, &k);
        cache.invalidate(&KeyFamily::All);

        let got = cache.complete(ticket, Ok(page(4))).unwrap();
        assert_eq!(got.total_count, 4);
        let entry = cache.entry(&k).unwrap();
        assert_eq!(entry.freshness, Freshness::Stale);
        assert!(matches!(cache.lookup(&k), Lookup::Fetch(_)));
    }

    #[test]
    fn failure_falls_back_to_cached_page_only_when_present() {
        let mut cache = QueryCache::new();
        let k = key();
        let ticket = fetch(&mut cache, &k);
        let err = cache.complete(ticket, Err(RemoteError::NotFound)).unwrap_err();
        assert_eq!(err.cause, RemoteError::NotFound);
        assert_eq!(err.key, k);

        let ticket = fetch(&mut cache, &k);
        cache.complete(ticket, Ok(page(5))).unwrap();
        let ticket = cache.begin_refresh(&k).unwrap();
        let got = cache
            .complete(ticket, Err(RemoteError::Network("timed out".into())))
            .unwrap();
        assert_eq!(got.total_count, 5);
        let entry = cache.entry(&k).unwrap();
        assert_eq!(entry.freshness, Freshness::Stale);
        assert!(entry.last_error.is_some());
    }

    #[test]
    fn invalidation_marks_outstanding_fetch_superseded() {
        let mut cache = QueryCache::new();
        let k = key();
        let ticket = fetch(&mut cache, &k);
        assert!(!cache.is_superseded(&k));

        cache.invalidate(&KeyFamily::All);
        assert!(cache.is_superseded(&k));
        assert!(cache.begin_refresh(&k).is_none());

        cache.complete(ticket, Ok(page(1))).unwrap();
        assert!(!cache.is_superseded(&k));
        let followup = cache.begin_refresh(&k).expect("follow-up ticket");
        cache.complete(followup, Ok(page(2))).unwrap();
        assert_eq!(cache.entry(&k).unwrap().freshness, Freshness::Fresh);
    }

    #[test]
    fn reset_drops_every_entry() {
        let mut cache = QueryCache::new();
        let k = key();
        let ticket = fetch(&mut cache, &k);
        cache.complete(ticket, Ok(page(1))).unwrap();
        assert_eq!(cache.len(), 1);

        cache.reset();
        assert!(cache.is_empty());
        assert!(cache.page(&k).is_none());
        assert!(matches!(cache.lookup(&k), Lookup::Fetch(_)));
    }
}
