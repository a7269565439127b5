use std::{sync::Arc, time::Duration};

use inboxsync::{
    config::InboxConfig,
    core::{
        cache::Freshness,
        cursor::RetreatMode,
        key::{KeyFamily, QueryKey},
    },
    op::BulkOperation,
    remote::{EventDirectory, RemoteError, memory::MemoryDirectory},
    runtime::{
        bulk::BulkError,
        events::InboxEvent,
        handle::{InboxError, InboxHandle, spawn_inbox},
    },
    types::{Cursor, EventId, EventStatus},
};

fn quiet_config() -> InboxConfig {
    InboxConfig {
        polling_enabled: false,
        ..InboxConfig::default()
    }
}

fn seeded(n: usize) -> (Arc<MemoryDirectory>, Vec<EventId>) {
    let mem = Arc::new(MemoryDirectory::new());
    let ids = (0..n)
        .map(|i| mem.push("order.created", &format!("shop-{i}"), EventStatus::Pending))
        .collect();
    (mem, ids)
}

fn spawn(mem: &Arc<MemoryDirectory>, config: &InboxConfig) -> InboxHandle {
    let directory: Arc<dyn EventDirectory> = mem.clone();
    spawn_inbox(directory, config)
}

async fn wait_for_list_calls(mem: &MemoryDirectory, n: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while mem.list_calls() < n {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("list call never arrived");
}

#[tokio::test]
async fn repeated_reads_hit_cache_until_invalidated() {
    let (mem, _) = seeded(3);
    let inbox = spawn(&mem, &quiet_config());

    let first = inbox.read().await.expect("read");
    let second = inbox.read().await.expect("read");
    assert!(Arc::ptr_eq(&first, &second));
    let by_key = inbox
        .read_key(QueryKey::first_page(None, 100))
        .await
        .expect("read key");
    assert!(Arc::ptr_eq(&first, &by_key));
    assert_eq!(mem.list_calls(), 1);

    assert_eq!(inbox.invalidate(KeyFamily::All).await.expect("invalidate"), 1);
    let third = inbox.read().await.expect("read");
    assert_eq!(mem.list_calls(), 2);
    assert_eq!(third.events.len(), 3);

    inbox.read().await.expect("read");
    assert_eq!(mem.list_calls(), 2);
    inbox.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn concurrent_reads_share_one_list_call() {
    let (mem, _) = seeded(2);
    mem.hold_lists();
    let inbox = spawn(&mem, &quiet_config());

    let (a, b, ()) = tokio::join!(inbox.read(), inbox.read(), async {
        wait_for_list_calls(&mem, 1).await;
        mem.release_lists(1);
    });

    let (a, b) = (a.expect("read a"), b.expect("read b"));
    assert_eq!(a, b);
    assert_eq!(mem.list_calls(), 1);
}

#[tokio::test]
async fn concurrent_readers_share_one_failure() {
    let mem = Arc::new(MemoryDirectory::new());
    mem.hold_lists();
    mem.fail_next_list(RemoteError::Server {
        status: 503,
        detail: "maintenance".into(),
    });
    let inbox = spawn(&mem, &quiet_config());

    let (a, b, ()) = tokio::join!(inbox.read(), inbox.read(), async {
        wait_for_list_calls(&mem, 1).await;
        mem.release_lists(1);
    });

    let expected_key = QueryKey::first_page(None, 100);
    for res in [a, b] {
        match res {
            Err(InboxError::Fetch(err)) => {
                assert_eq!(err.key, expected_key);
                assert_eq!(err.cause.to_string(), "Server error: maintenance");
            }
            other => panic!("expected fetch error, got {other:?}"),
        }
    }
    assert_eq!(mem.list_calls(), 1);
}

#[tokio::test]
async fn invalidation_during_fetch_leaves_the_result_stale() {
    let (mem, _) = seeded(1);
    mem.hold_lists();
    let inbox = spawn(&mem, &quiet_config());

    let (page, ()) = tokio::join!(inbox.read(), async {
        wait_for_list_calls(&mem, 1).await;
        inbox.invalidate(KeyFamily::All).await.expect("invalidate");
        mem.release_lists(1);
    });
    assert_eq!(page.expect("read").events.len(), 1);

    let view = inbox.view().await.expect("view");
    assert_eq!(view.freshness, Some(Freshness::Stale));

    mem.release_lists(1);
    inbox.read().await.expect("read");
    assert_eq!(mem.list_calls(), 2);
}

#[tokio::test]
async fn refresh_behind_a_stale_fetch_waits_for_a_new_one() {
    let (mem, _) = seeded(1);
    mem.hold_lists();
    let inbox = spawn(&mem, &quiet_config());

    let (first, refreshed) = tokio::join!(inbox.read(), async {
        wait_for_list_calls(&mem, 1).await;
        inbox.invalidate(KeyFamily::All).await.expect("invalidate");
        let (refreshed, ()) = tokio::join!(inbox.refresh(), async {
            // Refresh is queued ahead of this view, so it has been handled.
            inbox.view().await.expect("view");
            mem.release_lists(2);
        });
        refreshed
    });
    assert_eq!(first.expect("read").events.len(), 1);
    assert_eq!(refreshed.expect("refresh").events.len(), 1);

    assert_eq!(mem.list_calls(), 2);
    let view = inbox.view().await.expect("view");
    assert_eq!(view.freshness, Some(Freshness::Fresh));
    inbox.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn failed_refresh_keeps_serving_the_cached_page() {
    let (mem, _) = seeded(2);
    let inbox = spawn(&mem, &quiet_config());
    let mut events = inbox.subscribe();

    let cached = inbox.read().await.expect("read");
    mem.fail_next_list(RemoteError::Network("Unable to connect to the API".into()));
    let after = inbox.refresh().await.expect("refresh falls back");
    assert!(Arc::ptr_eq(&cached, &after));

    let view = inbox.view().await.expect("view");
    assert_eq!(
        view.last_error,
        Some(RemoteError::Network("Unable to connect to the API".into()))
    );
    assert_eq!(view.freshness, Some(Freshness::Stale));

    let mut saw_failure = false;
    while let Ok(event) = events.try_recv() {
        if let InboxEvent::FetchFailed { message, .. } = event {
            assert_eq!(message, "Network error: Unable to connect to the API");
            saw_failure = true;
        }
    }
    assert!(saw_failure);
}

#[tokio::test]
async fn bulk_acknowledge_reports_partial_success() {
    let (mem, ids) = seeded(3);
    let (a, b, c) = (ids[0].clone(), ids[1].clone(), ids[2].clone());
    let inbox = spawn(&mem, &quiet_config());

    inbox.read().await.expect("read");
    assert_eq!(inbox.select_all().await.expect("select all"), 3);
    assert!(inbox.view().await.expect("view").all_selected);

    mem.fail_mutation(&b, RemoteError::Server {
        status: 500,
        detail: "Internal server error".into(),
    });
    let result = inbox.bulk(BulkOperation::Acknowledge).await.expect("bulk");

    assert_eq!(result.succeeded.iter().cloned().collect::<Vec<_>>(), vec![a.clone(), c.clone()]);
    assert_eq!(
        result.failed.get(&b).map(String::as_str),
        Some("Server error: Internal server error")
    );
    assert_eq!(inbox.selection().await.expect("selection"), vec![b.clone()]);

    let view = inbox.view().await.expect("view");
    assert_eq!(view.freshness, Some(Freshness::Stale));

    inbox.read().await.expect("read");
    assert_eq!(mem.list_calls(), 2);
    assert_eq!(mem.status_of(&a), Some(EventStatus::Acknowledged));
    assert_eq!(mem.status_of(&b), Some(EventStatus::Pending));
}

#[tokio::test]
async fn bulk_delete_of_pending_page_with_a_vanished_event() {
    let (mem, ids) = seeded(3);
    let mut config = quiet_config();
    config.page_size = 2;
    let inbox = spawn(&mem, &config);

    inbox
        .set_filter(Some(EventStatus::Pending))
        .await
        .expect("filter");
    let page = inbox.read().await.expect("read");
    assert_eq!(page.events.len(), 2);
    assert!(page.has_next());

    inbox.select_all().await.expect("select all");
    let (id1, id2) = (ids[0].clone(), ids[1].clone());
    mem.delete(&id2).await.expect("deleted elsewhere");

    let result = inbox.bulk(BulkOperation::Delete).await.expect("bulk");
    assert_eq!(result.succeeded.iter().collect::<Vec<_>>(), vec![&id1]);
    assert_eq!(
        result.failure_lines(),
        vec![format!("{id2}: Not found: The requested resource was not found")]
    );

    let key = QueryKey::first_page(Some(EventStatus::Pending), 2);
    let view = inbox.view().await.expect("view");
    assert_eq!(view.key, key);
    assert_eq!(view.freshness, Some(Freshness::Stale));

    let page = inbox.read().await.expect("read");
    assert!(!page.contains(&id1) && !page.contains(&id2));
    assert!(inbox.selection().await.expect("selection").is_empty());
}

#[tokio::test]
async fn bulk_rejects_empty_selection_and_overlap() {
    let (mem, ids) = seeded(2);
    let inbox = spawn(&mem, &quiet_config());

    let err = inbox.bulk(BulkOperation::Delete).await.unwrap_err();
    assert_eq!(err, InboxError::Bulk(BulkError::EmptySelection));
    assert_eq!(mem.delete_calls(), 0);

    mem.set_latency(Some(Duration::from_millis(50)));
    let (first, second) = tokio::join!(
        inbox.bulk_ids(BulkOperation::Acknowledge, [ids[0].clone()]),
        inbox.bulk_ids(BulkOperation::Acknowledge, [ids[1].clone()]),
    );
    assert!(first.expect("first bulk").is_complete());
    assert_eq!(second.unwrap_err(), InboxError::BulkInProgress);
    assert_eq!(mem.acknowledge_calls(), 1);
}

#[tokio::test]
async fn single_acknowledge_deselects_and_invalidates() {
    let (mem, ids) = seeded(2);
    let inbox = spawn(&mem, &quiet_config());

    inbox.read().await.expect("read");
    assert!(inbox.toggle(ids[0].as_str()).await.expect("toggle"));
    let receipt = inbox.acknowledge(ids[0].as_str()).await.expect("ack");
    assert_eq!(receipt.event_id, ids[0]);
    assert!(inbox.selection().await.expect("selection").is_empty());

    inbox.read().await.expect("read");
    assert_eq!(mem.list_calls(), 2);

    let err = inbox.delete("evt-missing").await.unwrap_err();
    assert_eq!(err, InboxError::Remote(RemoteError::NotFound));
}

#[tokio::test]
async fn failed_single_mutation_keeps_cache_fresh() {
    let (mem, ids) = seeded(1);
    let inbox = spawn(&mem, &quiet_config());

    inbox.read().await.expect("read");
    inbox.set_selected(ids[0].as_str(), true).await.expect("select");
    mem.fail_mutation(&ids[0], RemoteError::RateLimited { retry_after: None });

    let err = inbox.acknowledge(ids[0].as_str()).await.unwrap_err();
    assert_eq!(err.to_string(), "Rate limit exceeded: Please try again later");
    assert_eq!(inbox.selection().await.expect("selection"), vec![ids[0].clone()]);

    inbox.read().await.expect("read");
    assert_eq!(mem.list_calls(), 1);
}

#[tokio::test]
async fn next_then_previous_walks_cursor_keys() {
    let (mem, _) = seeded(5);
    let mut config = quiet_config();
    config.page_size = 2;
    let inbox = spawn(&mem, &config);

    assert_eq!(inbox.next_page().await.unwrap_err(), InboxError::NoNextPage);

    let page = inbox.read().await.expect("read");
    let next = page.next_cursor.clone().expect("more pages");
    let key = inbox.next_page().await.expect("next");
    assert_eq!(key, QueryKey::first_page(None, 2).with_cursor(Some(next)));

    let page = inbox.read().await.expect("read second");
    assert_eq!(page.events.len(), 2);
    assert_eq!(mem.list_log().last(), Some(&key));

    let view = inbox.view().await.expect("view");
    assert!(view.has_previous);
    assert_eq!(view.page_label, "2+");

    inbox.next_page().await.expect("third");
    let key = inbox.previous_page().await.expect("previous");
    assert_eq!(key, QueryKey::first_page(None, 2));
    assert_eq!(inbox.view().await.expect("view").page_label, "1");
}

#[tokio::test]
async fn history_mode_steps_back_one_page() {
    let (mem, _) = seeded(6);
    let mut config = quiet_config();
    config.page_size = 2;
    config.retreat_mode = RetreatMode::History;
    let inbox = spawn(&mem, &config);

    inbox.read().await.expect("read");
    let second = inbox.next_page().await.expect("next");
    inbox.read().await.expect("read second");
    inbox.next_page().await.expect("next again");
    assert_eq!(inbox.view().await.expect("view").page_label, "3");

    let back = inbox.previous_page().await.expect("previous");
    assert_eq!(back, second);
    assert_eq!(back.cursor, Some(Cursor::new("mem:2")));
}

#[tokio::test]
async fn filter_change_resets_cursor_and_selection() {
    let (mem, ids) = seeded(4);
    let mut config = quiet_config();
    config.page_size = 2;
    let inbox = spawn(&mem, &config);
    let mut events = inbox.subscribe();

    inbox.read().await.expect("read");
    inbox.next_page().await.expect("next");
    inbox.read().await.expect("read");
    inbox.toggle(ids[2].as_str()).await.expect("toggle");

    let key = inbox
        .set_filter(Some(EventStatus::Failed))
        .await
        .expect("filter");
    assert_eq!(key, QueryKey::first_page(Some(EventStatus::Failed), 2));
    assert!(inbox.selection().await.expect("selection").is_empty());

    let mut changed = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let InboxEvent::ViewChanged { key } = event {
            changed.push(key);
        }
    }
    assert_eq!(changed.last(), Some(&key));
}

#[tokio::test]
async fn reading_after_invalidation_reloads_the_active_page() {
    let (mem, _) = seeded(1);
    let inbox = spawn(&mem, &quiet_config());
    inbox.read().await.expect("read");
    let mut events = inbox.subscribe();

    mem.push("order.created", "late", EventStatus::Pending);
    inbox.invalidate(KeyFamily::All).await.expect("invalidate");
    assert!(matches!(
        events.try_recv(),
        Ok(InboxEvent::Invalidated { family: KeyFamily::All, entries: 1 })
    ));

    let page = inbox.read().await.expect("read");
    assert_eq!(page.events.len(), 2);
    assert!(matches!(
        events.try_recv(),
        Ok(InboxEvent::PageLoaded { events: 2, total_count: 2, .. })
    ));
}

#[tokio::test]
async fn page_load_prunes_invisible_selection() {
    let (mem, ids) = seeded(2);
    let inbox = spawn(&mem, &quiet_config());

    inbox.toggle("evt-elsewhere").await.expect("toggle");
    inbox.toggle(ids[1].as_str()).await.expect("toggle");
    inbox.read().await.expect("read");

    assert_eq!(inbox.selection().await.expect("selection"), vec![ids[1].clone()]);
}

#[tokio::test(start_paused = true)]
async fn polling_refreshes_active_page() {
    let (mem, _) = seeded(1);
    let config = InboxConfig {
        poll_interval: Duration::from_millis(1000),
        ..InboxConfig::default()
    };
    let inbox = spawn(&mem, &config);
    let mut events = inbox.subscribe();

    inbox.read().await.expect("read");
    assert_eq!(mem.list_calls(), 1);

    mem.push("order.created", "late", EventStatus::Pending);
    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(mem.list_calls(), 2);

    let page = inbox.read().await.expect("read");
    assert_eq!(page.events.len(), 2);
    assert_eq!(mem.list_calls(), 2);

    let mut ticks = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, InboxEvent::PollTick { .. }) {
            ticks += 1;
        }
    }
    assert_eq!(ticks, 1);
    assert_eq!(
        inbox.view().await.expect("view").poll_interval,
        Some(Duration::from_millis(1000))
    );
}

#[tokio::test(start_paused = true)]
async fn disabled_polling_never_fetches_on_its_own() {
    let (mem, _) = seeded(1);
    let inbox = spawn(&mem, &quiet_config());

    inbox.read().await.expect("read");
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(mem.list_calls(), 1);
    assert_eq!(inbox.view().await.expect("view").poll_interval, None);
}

#[tokio::test]
async fn handle_reports_closed_runtime() {
    let (mem, _) = seeded(0);
    let inbox = spawn(&mem, &quiet_config());
    inbox.shutdown().await.expect("shutdown");
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(inbox.read().await.unwrap_err(), InboxError::ChannelClosed);
}
