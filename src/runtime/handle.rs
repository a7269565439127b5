use std::sync::Arc;

use hashbrown::HashMap;
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    time::Duration,
};

use crate::{
    config::InboxConfig,
    core::{
        cache::{FetchError, FetchTicket, Freshness, Lookup, QueryCache},
        cursor::CursorManager,
        key::{KeyFamily, QueryKey},
        selection::SelectionSet,
    },
    event::{AcknowledgeReceipt, Page},
    op::{BulkOperation, BulkResult},
    remote::{EventDirectory, RemoteError, RemoteResult},
    types::{EventId, EventStatus},
};

use super::{
    bulk::{self, BulkError},
    events::InboxEvent,
    poll::PollScheduler,
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InboxError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Bulk(#[from] BulkError),
    #[error("a bulk operation is already running")]
    BulkInProgress,
    #[error("there is no next page")]
    NoNextPage,
    #[error("inbox runtime is not running")]
    ChannelClosed,
}

/// Point-in-time snapshot of the active view.
#[derive(Debug, Clone)]
pub struct InboxView {
    pub key: QueryKey,
    pub page: Option<Arc<Page>>,
    pub freshness: Option<Freshness>,
    pub last_error: Option<RemoteError>,
    pub selected: Vec<EventId>,
    pub all_selected: bool,
    pub has_next: bool,
    pub has_previous: bool,
    pub page_label: String,
    pub bulk_in_flight: bool,
    pub poll_interval: Option<Duration>,
}

#[derive(Clone)]
pub struct InboxHandle {
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<InboxEvent>,
}

type PageReply = oneshot::Sender<Result<Arc<Page>, InboxError>>;

enum Command {
    Read {
        key: Option<QueryKey>,
        resp: PageReply,
    },
    Refresh {
        resp: PageReply,
    },
    Invalidate {
        family: KeyFamily,
        resp: oneshot::Sender<usize>,
    },
    SetFilter {
        status: Option<EventStatus>,
        resp: oneshot::Sender<QueryKey>,
    },
    NextPage {
        resp: oneshot::Sender<Result<QueryKey, InboxError>>,
    },
    PreviousPage {
        resp: oneshot::Sender<QueryKey>,
    },
    Toggle {
        id: EventId,
        resp: oneshot::Sender<bool>,
    },
    SetSelected {
        id: EventId,
        checked: bool,
        resp: oneshot::Sender<()>,
    },
    SelectAll {
        resp: oneshot::Sender<usize>,
    },
    ClearSelection {
        resp: oneshot::Sender<()>,
    },
    Selection {
        resp: oneshot::Sender<Vec<EventId>>,
    },
    Acknowledge {
        id: EventId,
        resp: oneshot::Sender<Result<AcknowledgeReceipt, InboxError>>,
    },
    Delete {
        id: EventId,
        resp: oneshot::Sender<Result<(), InboxError>>,
    },
    Bulk {
        operation: BulkOperation,
        ids: Option<Vec<EventId>>,
        resp: oneshot::Sender<Result<BulkResult, InboxError>>,
    },
    View {
        resp: oneshot::Sender<InboxView>,
    },
    Shutdown {
        resp: oneshot::Sender<()>,
    },
}

/// Results of remote calls made off the runtime loop.
enum Completion {
    Fetched {
        ticket: FetchTicket,
        result: RemoteResult<Page>,
    },
    Acknowledged {
        id: EventId,
        result: RemoteResult<AcknowledgeReceipt>,
        resp: oneshot::Sender<Result<AcknowledgeReceipt, InboxError>>,
    },
    Deleted {
        id: EventId,
        result: RemoteResult<()>,
        resp: oneshot::Sender<Result<(), InboxError>>,
    },
    BulkSettled {
        result: Result<BulkResult, BulkError>,
        resp: oneshot::Sender<Result<BulkResult, InboxError>>,
    },
}

/// Starts the single-writer inbox runtime on the current tokio runtime.
///
/// The runtime owns the cache, cursor, and selection; every handle clone talks
/// to it over one command channel. It stops on [`InboxHandle::shutdown`] or
/// when the last handle is dropped, taking its poll timer with it.
pub fn spawn_inbox(directory: Arc<dyn EventDirectory>, config: &InboxConfig) -> InboxHandle {
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(config.command_channel_capacity);
    let (events_tx, _) = broadcast::channel::<InboxEvent>(config.event_channel_capacity);
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion>();

    let mut poll = PollScheduler::new(config.effective_poll_interval());
    let mut state = InboxState {
        directory,
        cache: QueryCache::new(),
        cursor: CursorManager::new(None, config.page_size, config.retreat_mode),
        selection: SelectionSet::new(),
        waiters: HashMap::new(),
        followups: HashMap::new(),
        bulk_in_flight: false,
        bulk_concurrency: config.bulk_concurrency,
        poll_interval: poll.period(),
        events_tx: events_tx.clone(),
        done_tx,
    };

    tokio::spawn(async move {
        tracing::debug!(polling = ?state.poll_interval, "inbox runtime started");
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    let Some(cmd) = cmd else { break; };
                    if state.handle_command(cmd) {
                        break;
                    }
                }
                done = done_rx.recv() => {
                    if let Some(done) = done {
                        state.handle_completion(done);
                    }
                }
                _ = poll.tick() => {
                    state.on_poll_tick();
                }
            }
        }
        tracing::debug!("inbox runtime stopped");
    });

    InboxHandle { cmd_tx, events_tx }
}

impl InboxHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<InboxEvent> {
        self.events_tx.subscribe()
    }

    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, InboxError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| InboxError::ChannelClosed)?;
        rx.await.map_err(|_| InboxError::ChannelClosed)
    }

    /// Reads the active page.
    pub async fn read(&self) -> Result<Arc<Page>, InboxError> {
        self.call(|resp| Command::Read { key: None, resp }).await?
    }

    /// Reads an arbitrary key through the cache.
    pub async fn read_key(&self, key: QueryKey) -> Result<Arc<Page>, InboxError> {
        self.call(|resp| Command::Read { key: Some(key), resp }).await?
    }

    /// Forces a network read of the active page and waits for it.
    pub async fn refresh(&self) -> Result<Arc<Page>, InboxError> {
        self.call(|resp| Command::Refresh { resp }).await?
    }

    pub async fn invalidate(&self, family: KeyFamily) -> Result<usize, InboxError> {
        self.call(|resp| Command::Invalidate { family, resp }).await
    }

    pub async fn set_filter(&self, status: Option<EventStatus>) -> Result<QueryKey, InboxError> {
        self.call(|resp| Command::SetFilter { status, resp }).await
    }

    pub async fn next_page(&self) -> Result<QueryKey, InboxError> {
        self.call(|resp| Command::NextPage { resp }).await?
    }

    pub async fn previous_page(&self) -> Result<QueryKey, InboxError> {
        self.call(|resp| Command::PreviousPage { resp }).await
    }

    pub async fn toggle(&self, id: impl Into<EventId>) -> Result<bool, InboxError> {
        let id = id.into();
        self.call(|resp| Command::Toggle { id, resp }).await
    }

    pub async fn set_selected(&self, id: impl Into<EventId>, checked: bool) -> Result<(), InboxError> {
        let id = id.into();
        self.call(|resp| Command::SetSelected { id, checked, resp }).await
    }

    /// Selects every event on the active page; returns how many.
    pub async fn select_all(&self) -> Result<usize, InboxError> {
        self.call(|resp| Command::SelectAll { resp }).await
    }

    pub async fn clear_selection(&self) -> Result<(), InboxError> {
        self.call(|resp| Command::ClearSelection { resp }).await
    }

    pub async fn selection(&self) -> Result<Vec<EventId>, InboxError> {
        self.call(|resp| Command::Selection { resp }).await
    }

    pub async fn acknowledge(&self, id: impl Into<EventId>) -> Result<AcknowledgeReceipt, InboxError> {
        let id = id.into();
        self.call(|resp| Command::Acknowledge { id, resp }).await?
    }

    pub async fn delete(&self, id: impl Into<EventId>) -> Result<(), InboxError> {
        let id = id.into();
        self.call(|resp| Command::Delete { id, resp }).await?
    }

    /// Applies `operation` to the current selection.
    pub async fn bulk(&self, operation: BulkOperation) -> Result<BulkResult, InboxError> {
        self.call(|resp| Command::Bulk {
            operation,
            ids: None,
            resp,
        })
        .await?
    }

    /// Applies `operation` to explicit ids.
    pub async fn bulk_ids<I>(&self, operation: BulkOperation, ids: I) -> Result<BulkResult, InboxError>
    where
        I: IntoIterator,
        I::Item: Into<EventId>,
    {
        let ids: Vec<EventId> = ids.into_iter().map(Into::into).collect();
        self.call(|resp| Command::Bulk {
            operation,
            ids: Some(ids),
            resp,
        })
        .await?
    }

    pub async fn view(&self) -> Result<InboxView, InboxError> {
        self.call(|resp| Command::View { resp }).await
    }

    pub async fn shutdown(&self) -> Result<(), InboxError> {
        self.call(|resp| Command::Shutdown { resp }).await
    }
}

struct InboxState {
    directory: Arc<dyn EventDirectory>,
    cache: QueryCache,
    cursor: CursorManager,
    selection: SelectionSet,
    waiters: HashMap<QueryKey, Vec<PageReply>>,
    /// Refreshes parked behind a superseded fetch; served by the next one.
    followups: HashMap<QueryKey, Vec<PageReply>>,
    bulk_in_flight: bool,
    bulk_concurrency: Option<usize>,
    poll_interval: Option<Duration>,
    events_tx: broadcast::Sender<InboxEvent>,
    done_tx: mpsc::UnboundedSender<Completion>,
}

impl InboxState {
    fn emit(&self, event: InboxEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Returns true when the loop should stop.
    fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Read { key, resp } => {
                let key = key.unwrap_or_else(|| self.cursor.key());
                self.read(key, resp);
            }
            Command::Refresh { resp } => {
                let key = self.cursor.key();
                if self.cache.is_superseded(&key) {
                    self.followups.entry(key).or_default().push(resp);
                } else {
                    self.waiters.entry(key.clone()).or_default().push(resp);
                    if let Some(ticket) = self.cache.begin_refresh(&key) {
                        self.spawn_fetch(ticket);
                    }
                }
            }
            Command::Invalidate { family, resp } => {
                let _ = resp.send(self.invalidate(family));
            }
            Command::SetFilter { status, resp } => {
                let before = self.cursor.key();
                self.cursor.set_filter(status);
                self.on_view_moved(before);
                let _ = resp.send(self.cursor.key());
            }
            Command::NextPage { resp } => {
                let next = self
                    .cache
                    .page(&self.cursor.key())
                    .and_then(|page| page.next_cursor.clone());
                let out = match next {
                    Some(next) => {
                        let before = self.cursor.key();
                        self.cursor.advance(next);
                        self.on_view_moved(before);
                        Ok(self.cursor.key())
                    }
                    None => Err(InboxError::NoNextPage),
                };
                let _ = resp.send(out);
            }
            Command::PreviousPage { resp } => {
                let before = self.cursor.key();
                self.cursor.retreat();
                self.on_view_moved(before);
                let _ = resp.send(self.cursor.key());
            }
            Command::Toggle { id, resp } => {
                let now = self.selection.toggle(&id);
                self.emit_selection();
                let _ = resp.send(now);
            }
            Command::SetSelected { id, checked, resp } => {
                if self.selection.contains(&id) != checked {
                    self.selection.set(&id, checked);
                    self.emit_selection();
                }
                let _ = resp.send(());
            }
            Command::SelectAll { resp } => {
                match self.cache.page(&self.cursor.key()) {
                    Some(page) => self.selection.select_all(page.event_ids().cloned()),
                    None => self.selection.clear(),
                }
                self.emit_selection();
                let _ = resp.send(self.selection.len());
            }
            Command::ClearSelection { resp } => {
                if !self.selection.is_empty() {
                    self.selection.clear();
                    self.emit_selection();
                }
                let _ = resp.send(());
            }
            Command::Selection { resp } => {
                let _ = resp.send(self.selection.ids());
            }
            Command::Acknowledge { id, resp } => {
                let directory = Arc::clone(&self.directory);
                let done_tx = self.done_tx.clone();
                tokio::spawn(async move {
                    let result = directory.acknowledge(&id).await;
                    let _ = done_tx.send(Completion::Acknowledged { id, result, resp });
                });
            }
            Command::Delete { id, resp } => {
                let directory = Arc::clone(&self.directory);
                let done_tx = self.done_tx.clone();
                tokio::spawn(async move {
                    let result = directory.delete(&id).await;
                    let _ = done_tx.send(Completion::Deleted { id, result, resp });
                });
            }
            Command::Bulk { operation, ids, resp } => {
                self.start_bulk(operation, ids, resp);
            }
            Command::View { resp } => {
                let _ = resp.send(self.view());
            }
            Command::Shutdown { resp } => {
                let _ = resp.send(());
                return true;
            }
        }

        false
    }

    fn handle_completion(&mut self, done: Completion) {
        match done {
            Completion::Fetched { ticket, result } => self.on_fetched(ticket, result),
            Completion::Acknowledged { id, result, resp } => {
                let out = result.map_err(InboxError::from).inspect(|_| {
                    self.on_mutated(std::slice::from_ref(&id));
                    self.emit(InboxEvent::Acknowledged { event_id: id.clone() });
                });
                let _ = resp.send(out);
            }
            Completion::Deleted { id, result, resp } => {
                let out = result.map_err(InboxError::from).inspect(|_| {
                    self.on_mutated(std::slice::from_ref(&id));
                    self.emit(InboxEvent::Deleted { event_id: id.clone() });
                });
                let _ = resp.send(out);
            }
            Completion::BulkSettled { result, resp } => {
                self.bulk_in_flight = false;
                let out = result.map_err(InboxError::from).inspect(|res| {
                    let succeeded: Vec<EventId> = res.succeeded.iter().cloned().collect();
                    self.on_mutated(&succeeded);
                    self.emit(InboxEvent::BulkCompleted {
                        operation: res.operation,
                        succeeded: res.succeeded.len(),
                        failed: res.failed.len(),
                    });
                });
                let _ = resp.send(out);
            }
        }
    }

    fn read(&mut self, key: QueryKey, resp: PageReply) {
        match self.cache.lookup(&key) {
            Lookup::Hit(page) | Lookup::Revalidating(page) => {
                let _ = resp.send(Ok(page));
            }
            Lookup::Pending => {
                self.waiters.entry(key).or_default().push(resp);
            }
            Lookup::Fetch(ticket) => {
                self.waiters.entry(key).or_default().push(resp);
                self.spawn_fetch(ticket);
            }
        }
    }

    fn spawn_fetch(&self, ticket: FetchTicket) {
        tracing::debug!(key = %ticket.key, "fetching page");
        let directory = Arc::clone(&self.directory);
        let done_tx = self.done_tx.clone();
        tokio::spawn(async move {
            let result = directory.list(&ticket.key).await;
            let _ = done_tx.send(Completion::Fetched { ticket, result });
        });
    }

    fn on_fetched(&mut self, ticket: FetchTicket, result: RemoteResult<Page>) {
        let key = ticket.key.clone();
        let failure = result.as_ref().err().map(ToString::to_string);
        let outcome = self.cache.complete(ticket, result);

        match (&failure, &outcome) {
            (Some(message), _) => {
                tracing::warn!(key = %key, error = %message, "page fetch failed");
                self.emit(InboxEvent::FetchFailed {
                    key: key.clone(),
                    message: message.clone(),
                });
            }
            (None, Ok(page)) => {
                tracing::debug!(key = %key, events = page.events.len(), "page loaded");
                self.emit(InboxEvent::PageLoaded {
                    key: key.clone(),
                    events: page.events.len(),
                    total_count: page.total_count,
                });
                if key == self.cursor.key() && self.selection.retain_visible(page) > 0 {
                    self.emit_selection();
                }
            }
            (None, Err(_)) => {}
        }

        for waiter in self.waiters.remove(&key).unwrap_or_default() {
            let _ = waiter.send(outcome.clone().map_err(InboxError::from));
        }

        if let Some(parked) = self.followups.remove(&key) {
            tracing::debug!(key = %key, waiting = parked.len(), "refetching after stale result");
            self.waiters.entry(key.clone()).or_default().extend(parked);
            if let Some(ticket) = self.cache.begin_refresh(&key) {
                self.spawn_fetch(ticket);
            }
        }
    }

    fn on_poll_tick(&mut self) {
        let key = self.cursor.key();
        tracing::debug!(key = %key, "poll tick");
        self.emit(InboxEvent::PollTick { key: key.clone() });
        if self.cache.is_superseded(&key) {
            self.followups.entry(key).or_default();
        } else if let Some(ticket) = self.cache.begin_refresh(&key) {
            self.spawn_fetch(ticket);
        }
    }

    fn invalidate(&mut self, family: KeyFamily) -> usize {
        let entries = self.cache.invalidate(&family);
        tracing::debug!(?family, entries, "invalidated");
        self.emit(InboxEvent::Invalidated { family, entries });
        entries
    }

    /// Clears the selection when navigation moved the active key.
    fn on_view_moved(&mut self, before: QueryKey) {
        let after = self.cursor.key();
        if before == after {
            return;
        }
        if !self.selection.is_empty() {
            self.selection.clear();
            self.emit_selection();
        }
        self.emit(InboxEvent::ViewChanged { key: after });
    }

    /// Bookkeeping after server state changed for `ids`.
    fn on_mutated(&mut self, ids: &[EventId]) {
        if ids.is_empty() {
            return;
        }
        if self.selection.remove_all(ids) > 0 {
            self.emit_selection();
        }
        self.invalidate(KeyFamily::All);
    }

    fn emit_selection(&self) {
        self.emit(InboxEvent::SelectionChanged {
            selected: self.selection.len(),
        });
    }

    fn start_bulk(
        &mut self,
        operation: BulkOperation,
        ids: Option<Vec<EventId>>,
        resp: oneshot::Sender<Result<BulkResult, InboxError>>,
    ) {
        if self.bulk_in_flight {
            let _ = resp.send(Err(InboxError::BulkInProgress));
            return;
        }
        let ids = ids.unwrap_or_else(|| self.selection.ids());
        if ids.is_empty() {
            let _ = resp.send(Err(BulkError::EmptySelection.into()));
            return;
        }

        tracing::info!(%operation, count = ids.len(), "bulk operation started");
        self.bulk_in_flight = true;
        let directory = Arc::clone(&self.directory);
        let done_tx = self.done_tx.clone();
        let limit = self.bulk_concurrency;
        tokio::spawn(async move {
            let result = bulk::execute(directory, operation, ids, limit).await;
            let _ = done_tx.send(Completion::BulkSettled { result, resp });
        });
    }

    fn view(&self) -> InboxView {
        let key = self.cursor.key();
        let entry = self.cache.entry(&key);
        let page = entry.and_then(|e| e.page.clone());
        InboxView {
            freshness: entry.map(|e| e.freshness),
            last_error: entry.and_then(|e| e.last_error.clone()),
            selected: self.selection.ids(),
            all_selected: page.as_deref().is_some_and(|p| self.selection.all_selected(p)),
            has_next: page.as_deref().is_some_and(|p| self.cursor.has_next(p)),
            has_previous: self.cursor.has_previous(),
            page_label: self.cursor.page_label(),
            bulk_in_flight: self.bulk_in_flight,
            poll_interval: self.poll_interval,
            page,
            key,
        }
    }
}
