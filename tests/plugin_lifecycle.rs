//! Lifecycle controller integration tests
//!
//! Drives the plugin against the mock storage engine and checks:
//! - lazy engine construction and reuse across stop/start
//! - strict FIFO ordering of lifecycle calls and their completions
//! - automatic stop on terminal sync events
//! - reset and shutdown

mod common;

use common::{configured, harness, within, Post, WAIT};
use datastore_plugin::{
    DataStoreConfig, DataStoreError, EngineError, EngineOperation, LifecycleState, Pagination,
    QueryPredicate,
};
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;

use EngineOperation::{Clear, Query, StartSync, StopSync};

// =============================================================================
// Configure
// =============================================================================

#[tokio::test]
async fn test_configure_does_not_build_engine() {
    let h = configured();

    assert_eq!(h.plugin.state(), LifecycleState::Configured);
    assert!(!h.plugin.has_engine());
    assert_eq!(h.factory.construction_count(), 0);
    assert!(h.engine.calls().is_empty());
}

#[tokio::test]
async fn test_configure_twice_fails() {
    let h = configured();

    let result = h.plugin.configure(DataStoreConfig::default());
    assert!(matches!(result, Err(DataStoreError::Configuration(_))));
    assert_eq!(h.plugin.state(), LifecycleState::Configured);
}

#[test]
fn test_configure_outside_runtime_fails() {
    let h = harness();

    let result = h.plugin.configure(DataStoreConfig::default());
    assert!(matches!(result, Err(DataStoreError::Configuration(_))));
    assert!(!h.plugin.is_configured());
}

#[tokio::test]
async fn test_configure_json_reaches_factory() {
    let h = harness();
    h.plugin
        .configure_json(Some(&json!({ "sync_page_size": 50, "sync_max_records": 500 })))
        .unwrap();

    within(h.plugin.start()).await.unwrap();

    let context = h.factory.last_context().expect("engine should have been built");
    assert_eq!(context.config.sync_page_size, 50);
    assert_eq!(context.config.sync_max_records, 500);
    assert_eq!(context.collaborators.api_plugin_key, "awsAPIPlugin");
    assert!(context.registry.schema("Post").is_some());
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let h = harness();

    let result = h.plugin.configure_json(Some(&json!({ "sync_page_size": 0 })));
    assert!(matches!(result, Err(DataStoreError::Configuration(_))));
    assert!(!h.plugin.is_configured());
}

#[tokio::test]
async fn test_operations_before_configure_fail() {
    let h = harness();

    assert_eq!(within(h.plugin.start()).await, Err(DataStoreError::NotConfigured));
    assert_eq!(within(h.plugin.stop()).await, Err(DataStoreError::NotConfigured));
    assert_eq!(within(h.plugin.clear()).await, Err(DataStoreError::NotConfigured));
    assert_eq!(
        within(h.plugin.query::<Post>(None)).await,
        Err(DataStoreError::NotConfigured)
    );

    assert_eq!(h.plugin.state(), LifecycleState::NotConfigured);
    assert_eq!(h.factory.construction_count(), 0);
}

// =============================================================================
// Start / Stop
// =============================================================================

#[tokio::test]
async fn test_start_dispatches_start_sync_once() {
    let h = configured();

    within(h.plugin.start()).await.unwrap();
    within(h.plugin.start()).await.unwrap();

    assert_eq!(h.engine.calls(), vec![StartSync]);
    assert_eq!(h.factory.construction_count(), 1);
    assert_eq!(h.plugin.state(), LifecycleState::Started);
}

#[tokio::test]
async fn test_stop_then_start_reuses_engine() {
    let h = configured();

    within(h.plugin.start()).await.unwrap();
    within(h.plugin.stop()).await.unwrap();
    assert_eq!(h.plugin.state(), LifecycleState::Stopped);
    assert!(h.plugin.has_engine());

    within(h.plugin.start()).await.unwrap();

    assert_eq!(h.engine.calls(), vec![StartSync, StopSync, StartSync]);
    assert_eq!(h.factory.construction_count(), 1);
}

#[tokio::test]
async fn test_stop_without_engine_is_noop() {
    let h = configured();

    within(h.plugin.stop()).await.unwrap();

    assert!(h.engine.calls().is_empty());
    assert_eq!(h.factory.construction_count(), 0);
    assert_eq!(h.plugin.state(), LifecycleState::Configured);
}

#[tokio::test]
async fn test_start_failure_keeps_engine_stopped() {
    let h = configured();
    h.engine.fail(StartSync, EngineError::Network("offline".into()));

    let result = within(h.plugin.start()).await;
    assert!(matches!(
        result,
        Err(DataStoreError::EngineOperation { operation: EngineOperation::StartSync, .. })
    ));
    assert_eq!(h.plugin.state(), LifecycleState::Stopped);

    h.engine.reset_responder(StartSync);
    within(h.plugin.start()).await.unwrap();

    assert_eq!(h.plugin.state(), LifecycleState::Started);
    assert_eq!(h.factory.construction_count(), 1);
}

#[tokio::test]
async fn test_stop_failure_keeps_sync_started() {
    let h = configured();
    within(h.plugin.start()).await.unwrap();
    h.engine.fail(StopSync, EngineError::Sync("busy".into()));

    let result = within(h.plugin.stop()).await;
    assert!(matches!(
        result,
        Err(DataStoreError::EngineOperation { operation: EngineOperation::StopSync, .. })
    ));
    assert_eq!(h.plugin.state(), LifecycleState::Started);
}

#[tokio::test]
async fn test_engine_construction_failure() {
    let h = configured();
    h.factory.set_failure(Some(EngineError::Storage("cannot open database".into())));

    let result = within(h.plugin.start()).await;
    assert_eq!(
        result,
        Err(DataStoreError::EngineConstruction(EngineError::Storage(
            "cannot open database".into()
        )))
    );
    assert_eq!(h.plugin.state(), LifecycleState::Configured);

    h.factory.set_failure(None);
    within(h.plugin.start()).await.unwrap();
    assert_eq!(h.plugin.state(), LifecycleState::Started);
}

// =============================================================================
// Clear
// =============================================================================

#[tokio::test]
async fn test_clear_releases_engine() {
    let h = configured();

    within(h.plugin.start()).await.unwrap();
    within(h.plugin.clear()).await.unwrap();

    assert_eq!(h.plugin.state(), LifecycleState::Configured);
    assert!(!h.plugin.has_engine());

    within(h.plugin.start()).await.unwrap();

    assert_eq!(h.engine.calls(), vec![StartSync, Clear, StartSync]);
    assert_eq!(h.factory.construction_count(), 2);
    assert!(h.plugin.has_engine());
}

#[tokio::test]
async fn test_clear_without_engine_uses_transient_engine() {
    let h = configured();

    within(h.plugin.clear()).await.unwrap();

    assert_eq!(h.engine.calls(), vec![Clear]);
    assert_eq!(h.factory.construction_count(), 1);
    assert_eq!(h.plugin.state(), LifecycleState::Configured);
}

#[tokio::test]
async fn test_clear_failure_still_releases_engine() {
    let h = configured();
    within(h.plugin.start()).await.unwrap();
    h.engine.fail(Clear, EngineError::Storage("locked".into()));

    let result = within(h.plugin.clear()).await;
    assert!(matches!(
        result,
        Err(DataStoreError::EngineOperation { operation: EngineOperation::Clear, .. })
    ));
    assert_eq!(h.plugin.state(), LifecycleState::Configured);
}

// =============================================================================
// Query
// =============================================================================

#[tokio::test]
async fn test_query_starts_sync_once() {
    let h = configured();
    h.engine.insert_model("Post", json!({ "id": "1", "title": "Hello", "status": "draft" }));
    h.engine.insert_model("Post", json!({ "id": "2", "title": "World", "status": "published" }));

    let drafts: Vec<Post> = within(h.plugin.query(Some(QueryPredicate::eq("status", "draft"))))
        .await
        .unwrap();
    assert_eq!(drafts, vec![Post::new("1", "Hello", "draft")]);

    let all: Vec<Post> = within(h.plugin.query(None)).await.unwrap();
    assert_eq!(all.len(), 2);

    assert_eq!(h.engine.calls(), vec![StartSync, Query, Query]);
    assert_eq!(h.plugin.state(), LifecycleState::Started);
}

#[tokio::test]
async fn test_query_clear_query() {
    let h = configured();

    within(h.plugin.query::<Post>(None)).await.unwrap();
    within(h.plugin.clear()).await.unwrap();
    within(h.plugin.query::<Post>(None)).await.unwrap();

    assert_eq!(h.engine.calls(), vec![StartSync, Query, Clear, StartSync, Query]);
    assert_eq!(h.factory.construction_count(), 2);
}

#[tokio::test]
async fn test_query_while_stopped_does_not_restart() {
    let h = configured();

    within(h.plugin.start()).await.unwrap();
    within(h.plugin.stop()).await.unwrap();
    within(h.plugin.query::<Post>(None)).await.unwrap();

    assert_eq!(h.engine.calls(), vec![StartSync, StopSync, Query]);
    assert_eq!(h.plugin.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_query_pagination() {
    let h = configured();
    for i in 0..5 {
        h.engine.insert_model(
            "Post",
            json!({ "id": i.to_string(), "title": format!("Post {}", i), "status": "draft" }),
        );
    }

    let second_page: Vec<Post> = within(
        h.plugin
            .query_page(None, Some(Pagination { page: 1, limit: 2 })),
    )
    .await
    .unwrap();

    let ids: Vec<_> = second_page.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["2", "3"]);
}

#[tokio::test]
async fn test_query_unknown_model() {
    let h = configured();

    let result = within(h.plugin.query_raw("Comment", None, None)).await;

    assert_eq!(result, Err(DataStoreError::UnknownModel("Comment".into())));
    assert!(h.engine.calls().is_empty());
}

#[tokio::test]
async fn test_query_failure_is_reported() {
    let h = configured();
    h.engine.fail(Query, EngineError::Storage("corrupt page".into()));

    let result = within(h.plugin.query::<Post>(None)).await;

    assert!(matches!(
        result,
        Err(DataStoreError::EngineOperation { operation: EngineOperation::Query, .. })
    ));
    // The implicit start still happened
    assert_eq!(h.plugin.state(), LifecycleState::Started);
}

// =============================================================================
// Terminal Sync Events
// =============================================================================

#[tokio::test]
async fn test_sync_completion_stops_sync_once() {
    let h = configured();
    within(h.plugin.start()).await.unwrap();

    h.engine.finish_sync();
    assert!(h.engine.wait_for_calls(StopSync, 1, WAIT).await);

    // Queued behind the terminal event, so it sees the settled state
    within(h.plugin.stop()).await.unwrap();

    assert_eq!(h.engine.calls(), vec![StartSync, StopSync]);
    assert_eq!(h.plugin.state(), LifecycleState::Stopped);
    assert!(h.plugin.has_engine());
    assert_eq!(h.factory.construction_count(), 1);
    assert!(!h.publisher.is_finished());
}

#[tokio::test]
async fn test_sync_failure_stops_sync_once() {
    let h = configured();
    within(h.plugin.start()).await.unwrap();

    h.engine.fail_sync(EngineError::Network("connection reset".into()));
    assert!(h.engine.wait_for_calls(StopSync, 1, WAIT).await);
    within(h.plugin.stop()).await.unwrap();

    assert_eq!(h.engine.call_count(StopSync), 1);
    assert_eq!(h.plugin.state(), LifecycleState::Stopped);
    assert!(!h.publisher.is_finished());

    // Restart reuses the same engine
    within(h.plugin.start()).await.unwrap();
    assert_eq!(h.factory.construction_count(), 1);
}

#[tokio::test]
async fn test_terminal_event_while_stopped_is_ignored() {
    let h = configured();
    within(h.plugin.start()).await.unwrap();
    within(h.plugin.stop()).await.unwrap();

    h.engine.finish_sync();
    tokio::time::sleep(Duration::from_millis(50)).await;
    within(h.plugin.stop()).await.unwrap();

    assert_eq!(h.engine.call_count(StopSync), 1);
    assert_eq!(h.plugin.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_terminal_event_from_restarted_session_is_ignored() {
    let h = configured();
    within(h.plugin.start()).await.unwrap();

    // The first session ends while a stop/start pair is already queued
    let stop = h.plugin.stop();
    let restart = h.plugin.start();
    h.engine.fail_sync(EngineError::Network("connection reset".into()));

    within(stop).await.unwrap();
    within(restart).await.unwrap();
    // Queued behind the forwarded terminal event
    within(h.plugin.start()).await.unwrap();

    assert_eq!(h.engine.calls(), vec![StartSync, StopSync, StartSync]);
    assert_eq!(h.plugin.state(), LifecycleState::Started);
}

#[tokio::test]
async fn test_terminal_event_after_restart_stops_new_session() {
    let h = configured();
    within(h.plugin.start()).await.unwrap();
    within(h.plugin.stop()).await.unwrap();
    within(h.plugin.start()).await.unwrap();

    h.engine.finish_sync();
    assert!(h.engine.wait_for_calls(StopSync, 2, WAIT).await);
    within(h.plugin.stop()).await.unwrap();

    assert_eq!(h.engine.calls(), vec![StartSync, StopSync, StartSync, StopSync]);
    assert_eq!(h.plugin.state(), LifecycleState::Stopped);
}

// =============================================================================
// Operation Ordering
// =============================================================================

#[tokio::test]
async fn test_back_to_back_operations_run_in_call_order() {
    let h = configured();
    h.engine.with_latency(StartSync, Duration::from_millis(50));

    let start = h.plugin.start();
    let stop = h.plugin.stop();
    let clear = h.plugin.clear();
    let restart = h.plugin.start();

    // Awaited out of order; execution order is fixed at call time
    within(restart).await.unwrap();
    within(clear).await.unwrap();
    within(stop).await.unwrap();
    within(start).await.unwrap();

    assert_eq!(h.engine.calls(), vec![StartSync, StopSync, Clear, StartSync]);
    assert_eq!(h.factory.construction_count(), 2);
}

#[tokio::test]
async fn test_callbacks_fire_in_acceptance_order() {
    let h = configured();
    h.engine.with_latency(StopSync, Duration::from_millis(30));
    let (tx, mut rx) = mpsc::unbounded_channel();

    let sender = tx.clone();
    h.plugin.start_then(move |r| sender.send(("start", r.is_ok())).unwrap());
    let sender = tx.clone();
    h.plugin.stop_then(move |r| sender.send(("stop", r.is_ok())).unwrap());
    let sender = tx.clone();
    h.plugin
        .query_then("Post", None, move |r| sender.send(("query", r.is_ok())).unwrap());
    let sender = tx;
    h.plugin.clear_then(move |r| sender.send(("clear", r.is_ok())).unwrap());

    let mut order = Vec::new();
    for _ in 0..4 {
        order.push(within(rx.recv()).await.unwrap());
    }

    assert_eq!(
        order,
        vec![("start", true), ("stop", true), ("query", true), ("clear", true)]
    );
    assert_eq!(h.engine.calls(), vec![StartSync, StopSync, Query, Clear]);
}

#[tokio::test]
async fn test_operation_from_callback_is_queued_not_reentrant() {
    let h = configured();
    within(h.plugin.start()).await.unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();

    let plugin = h.plugin.clone();
    let sender = tx.clone();
    h.plugin.stop_then(move |r| {
        sender.send(("stop", r.is_ok())).unwrap();
        let sender = sender.clone();
        plugin.start_then(move |r| sender.send(("start", r.is_ok())).unwrap());
    });
    let sender = tx;
    h.plugin.clear_then(move |r| sender.send(("clear", r.is_ok())).unwrap());

    let mut order = Vec::new();
    for _ in 0..3 {
        order.push(within(rx.recv()).await.unwrap().0);
    }

    // The nested start was requested after clear was already queued
    assert_eq!(order, vec!["stop", "clear", "start"]);
    assert_eq!(h.engine.calls(), vec![StartSync, StopSync, Clear, StartSync]);
    assert_eq!(h.plugin.state(), LifecycleState::Started);
    assert_eq!(h.factory.construction_count(), 2);
}

#[tokio::test]
async fn test_watch_state_follows_transitions() {
    let h = configured();
    let mut state = h.plugin.watch_state().expect("configured plugin has a state");
    assert_eq!(*state.borrow(), LifecycleState::Configured);

    let _ = h.plugin.start();
    within(state.wait_for(|s| *s == LifecycleState::Started))
        .await
        .unwrap();

    let _ = h.plugin.clear();
    within(state.wait_for(|s| *s == LifecycleState::Configured))
        .await
        .unwrap();
}

// =============================================================================
// Reset / Shutdown
// =============================================================================

#[tokio::test]
async fn test_reset_returns_to_not_configured() {
    let h = configured();
    within(h.plugin.start()).await.unwrap();

    within(h.plugin.reset()).await.unwrap();

    // Teardown stopped the running session
    assert_eq!(h.engine.calls(), vec![StartSync, StopSync]);
    assert_eq!(h.plugin.state(), LifecycleState::NotConfigured);
    assert!(!h.plugin.is_configured());
    assert!(!h.publisher.is_finished());
    assert_eq!(within(h.plugin.stop()).await, Err(DataStoreError::NotConfigured));

    h.plugin.configure(DataStoreConfig::default()).unwrap();
    within(h.plugin.start()).await.unwrap();
    assert_eq!(h.factory.construction_count(), 2);
    assert_eq!(h.plugin.state(), LifecycleState::Started);
}

#[tokio::test]
async fn test_reset_fails_queued_operations() {
    let h = configured();
    h.engine.with_latency(StartSync, Duration::from_millis(50));

    let start = h.plugin.start();
    assert!(h.engine.wait_for_calls(StartSync, 1, WAIT).await);
    let queued_stop = h.plugin.stop();
    let queued_query = h.plugin.query::<Post>(None);
    let reset = h.plugin.reset();

    // The start in flight finishes; everything behind it is dropped
    within(start).await.unwrap();
    assert_eq!(within(queued_stop).await, Err(DataStoreError::NotConfigured));
    assert_eq!(within(queued_query).await, Err(DataStoreError::NotConfigured));
    within(reset).await.unwrap();

    // Only the teardown stopped sync
    assert_eq!(h.engine.calls(), vec![StartSync, StopSync]);
}

#[tokio::test]
async fn test_reset_fails_queued_callbacks() {
    let h = configured();
    h.engine.with_latency(StartSync, Duration::from_millis(30));
    let (tx, mut rx) = mpsc::unbounded_channel();

    h.plugin.start_then(|_| {});
    assert!(h.engine.wait_for_calls(StartSync, 1, WAIT).await);
    h.plugin.clear_then(move |r| tx.send(r).unwrap());
    let _ = h.plugin.reset();

    assert_eq!(within(rx.recv()).await, Some(Err(DataStoreError::NotConfigured)));
    assert_eq!(h.engine.call_count(Clear), 0);
}

#[tokio::test]
async fn test_reconfigure_waits_for_reset_teardown() {
    let h = configured();
    h.engine.with_latency(StartSync, Duration::from_millis(100));

    let start = h.plugin.start();
    assert!(h.engine.wait_for_calls(StartSync, 1, WAIT).await);

    let reset = h.plugin.reset();
    h.plugin.configure(DataStoreConfig::default()).unwrap();
    assert_eq!(h.plugin.state(), LifecycleState::Configured);
    let restart = h.plugin.start();

    within(start).await.unwrap();
    within(reset).await.unwrap();
    within(restart).await.unwrap();

    assert_eq!(h.engine.max_concurrent_calls(), 1);
    assert_eq!(h.engine.calls(), vec![StartSync, StopSync, StartSync]);
    assert_eq!(h.factory.construction_count(), 2);
    assert_eq!(h.plugin.state(), LifecycleState::Started);
}

#[tokio::test]
async fn test_reset_unconfigured_is_noop() {
    let h = harness();

    within(h.plugin.reset()).await.unwrap();
    assert_eq!(h.plugin.state(), LifecycleState::NotConfigured);
}

#[tokio::test]
async fn test_shutdown_finishes_publisher() {
    let h = configured();
    let mut events = h.plugin.subscribe();
    within(h.plugin.start()).await.unwrap();

    within(h.plugin.shutdown()).await.unwrap();

    assert!(h.publisher.is_finished());
    assert!(within(events.recv()).await.is_none());
    assert_eq!(h.plugin.state(), LifecycleState::NotConfigured);
}
