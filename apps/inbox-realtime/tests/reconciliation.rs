mod common;

use std::time::Duration;

use change_feed::{ChangeKind, RawChange};
use common::{delete, insert, update, wait_until, Harness};
use inbox_realtime::{Container, RealtimeConfig, ViewSurface};
use serde_json::json;

#[test_timeout::tokio_timeout_test(10, paused)]
async fn insert_for_open_thread_appends_then_scrolls() {
    let harness = Harness::subscribed().await;
    harness.handle.switch_thread("T1").await.expect("switch");

    let raw = RawChange::insert(json!({"id": "m1", "thread_id": "T1", "content": "hi"}));
    assert_eq!(harness.feed.emit_change("thread_T1", raw), 1);
    harness.handle.snapshot().await.expect("snapshot");

    assert_eq!(harness.surface.mutations(), vec!["append m1", "scroll"]);
    assert_eq!(harness.fragments.calls(), vec!["message-bubble:m1"]);
    assert_eq!(harness.surface.document.message_order(), vec!["m1"]);
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn insert_for_another_thread_touches_nothing() {
    let harness = Harness::subscribed().await;
    harness.handle.switch_thread("T2").await.expect("switch");

    let raw = RawChange::insert(json!({"id": "m1", "thread_id": "T1", "content": "hi"}));
    harness.feed.emit_change("thread_T2", raw);
    harness.handle.snapshot().await.expect("snapshot");

    assert!(harness.surface.mutations().is_empty());
    assert_eq!(harness.surface.lookups(), 0);
    assert!(harness.fragments.calls().is_empty());
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn global_update_refreshes_one_preview() {
    let harness = Harness::subscribed().await;
    harness.handle.switch_thread("T1").await.expect("switch");

    harness
        .feed
        .emit_change("messages", update("m5", "T9"));
    harness.handle.snapshot().await.expect("snapshot");

    assert_eq!(harness.surface.mutations(), vec!["preview T9"]);
    assert_eq!(harness.fragments.calls(), vec!["thread-preview:T9"]);
    assert_eq!(harness.surface.document.preview_order(), vec!["T9"]);
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn appends_commit_in_arrival_order() {
    let harness = Harness::subscribed().await;
    harness.handle.switch_thread("T1").await.expect("switch");
    harness
        .fragments
        .delay("message-bubble:m1", Duration::from_millis(300));
    harness
        .fragments
        .delay("message-bubble:m2", Duration::from_millis(100));

    for id in ["m1", "m2", "m3"] {
        harness.feed.emit_change("thread_T1", insert(id, "T1"));
    }
    let snapshot = harness.handle.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.thread_fetches, 3);

    let surface = harness.surface.clone();
    wait_until(|| surface.mutations().len() == 6).await;
    assert_eq!(
        harness.surface.mutations(),
        vec!["append m1", "scroll", "append m2", "scroll", "append m3", "scroll"]
    );
    assert_eq!(
        harness.surface.document.message_order(),
        vec!["m1", "m2", "m3"]
    );
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn update_replaces_rendered_message_without_scrolling() {
    let harness = Harness::subscribed().await;
    harness.handle.switch_thread("T1").await.expect("switch");
    harness.feed.emit_change("thread_T1", insert("m1", "T1"));
    harness.handle.snapshot().await.expect("snapshot");

    harness.feed.emit_change("thread_T1", update("m1", "T1"));
    harness.feed.emit_change("thread_T1", update("m404", "T1"));
    harness.handle.snapshot().await.expect("snapshot");

    assert_eq!(
        harness.surface.mutations(),
        vec!["append m1", "scroll", "replace m1"]
    );
    assert_eq!(harness.fragments.count("message-bubble:m404"), 0);
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn delete_removes_the_prior_message() {
    let harness = Harness::subscribed().await;
    harness.handle.switch_thread("T1").await.expect("switch");
    harness.feed.emit_change("thread_T1", insert("m1", "T1"));
    harness.feed.emit_change("thread_T1", insert("m2", "T1"));
    harness.feed.emit_change("thread_T1", delete("m1", "T1"));
    harness.handle.snapshot().await.expect("snapshot");

    assert_eq!(
        harness.surface.mutations(),
        vec!["append m1", "scroll", "append m2", "scroll", "remove m1"]
    );
    assert_eq!(harness.surface.document.message_order(), vec!["m2"]);
    assert_eq!(harness.fragments.count("message-bubble"), 2);
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn delete_waits_for_an_in_flight_append() {
    let harness = Harness::subscribed().await;
    harness.handle.switch_thread("T1").await.expect("switch");
    harness
        .fragments
        .delay("message-bubble:m1", Duration::from_millis(200));

    harness.feed.emit_change("thread_T1", insert("m1", "T1"));
    harness.feed.emit_change("thread_T1", delete("m1", "T1"));

    let surface = harness.surface.clone();
    wait_until(|| surface.mutations().len() == 3).await;
    assert_eq!(
        harness.surface.mutations(),
        vec!["append m1", "scroll", "remove m1"]
    );
    assert!(harness.surface.document.message_order().is_empty());
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn global_delete_is_ignored_by_default() {
    let harness = Harness::subscribed().await;
    harness.feed.emit_change("messages", delete("m1", "T1"));
    harness.handle.snapshot().await.expect("snapshot");

    assert!(harness.surface.mutations().is_empty());
    assert!(harness.fragments.calls().is_empty());
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn global_delete_refreshes_preview_when_enabled() {
    let config = RealtimeConfig {
        refresh_preview_on_delete: true,
        ..RealtimeConfig::default()
    };
    let harness = Harness::start(config);
    harness.handle.init_global().await.expect("init");
    harness.feed.emit_change("messages", delete("m1", "T3"));
    harness.handle.snapshot().await.expect("snapshot");

    assert_eq!(harness.surface.mutations(), vec!["preview T3"]);
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn malformed_changes_are_dropped() {
    let harness = Harness::subscribed().await;
    harness.handle.switch_thread("T1").await.expect("switch");

    let no_thread = RawChange::insert(json!({"id": "m1", "content": "hi"}));
    let empty = RawChange {
        kind: ChangeKind::Insert,
        new: Some(json!({})),
        old: None,
    };
    let wrong_type = RawChange::insert(json!({"id": "m2", "thread_id": ["T1"]}));
    for raw in [no_thread, empty, wrong_type] {
        harness.feed.emit_change("messages", raw.clone());
        harness.feed.emit_change("thread_T1", raw);
    }
    harness.feed.emit_change("thread_T1", insert("m3", "T1"));
    harness.handle.snapshot().await.expect("snapshot");

    assert_eq!(harness.surface.mutations(), vec!["append m3", "scroll"]);
    assert_eq!(harness.fragments.calls(), vec!["message-bubble:m3"]);
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn unmounted_targets_issue_no_requests() {
    let harness = Harness::subscribed().await;
    harness.surface.document.unmount(Container::MessageList);
    harness.surface.document.unmount(Container::ThreadView);
    harness.handle.switch_thread("T1").await.expect("switch");

    harness.feed.emit_change("messages", insert("m1", "T1"));
    harness.feed.emit_change("thread_T1", insert("m1", "T1"));
    harness.handle.snapshot().await.expect("snapshot");

    assert!(harness.fragments.calls().is_empty());
    assert!(harness.surface.mutations().is_empty());
    assert!(!harness.surface.is_mounted(Container::ThreadView));
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn stale_thread_fetch_never_commits() {
    let harness = Harness::subscribed().await;
    harness.handle.switch_thread("T1").await.expect("switch");
    harness
        .fragments
        .delay("message-bubble:m1", Duration::from_secs(1));

    harness.feed.emit_change("thread_T1", insert("m1", "T1"));
    let snapshot = harness.handle.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.thread_fetches, 1);

    harness.handle.switch_thread("T2").await.expect("switch");
    let snapshot = harness.handle.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.thread_fetches, 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    harness.handle.snapshot().await.expect("snapshot");
    assert_eq!(harness.fragments.count("message-bubble:m1"), 1);
    assert!(harness.surface.mutations().is_empty());
}

#[test_timeout::tokio_timeout_test(10, paused)]
async fn events_after_leaving_are_not_delivered() {
    let harness = Harness::subscribed().await;
    harness.handle.switch_thread("T1").await.expect("switch");
    harness.handle.leave_thread().await.expect("leave");

    assert_eq!(harness.feed.emit_change("thread_T1", insert("m1", "T1")), 0);
    harness.feed.emit_change("messages", insert("m1", "T1"));
    harness.handle.snapshot().await.expect("snapshot");

    assert_eq!(harness.surface.mutations(), vec!["preview T1"]);
}
