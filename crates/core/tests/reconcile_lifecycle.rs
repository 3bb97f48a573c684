// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! End-to-end lifecycle tests: watch events in, controller calls and
//! replace calls out, driven through the full executor loop.

use kopr_core::adapters::{FakeReplaceClient, FakeWatchSource, RecordingController, WatchSource};
use kopr_core::{
    ControllerConfig, CustomResource, ObjectMeta, Operator, OperatorError, RetryConfig, WatchAction,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

const FINALIZER: &str = "customservices.example.io/finalizer";

struct Harness {
    operator: Arc<Operator>,
    controller: RecordingController,
    client: FakeReplaceClient,
    runner: JoinHandle<Result<(), OperatorError>>,
}

fn start(retry: RetryConfig) -> Harness {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let controller = RecordingController::new();
    let client = FakeReplaceClient::new();
    let operator = Arc::new(Operator::new(
        ControllerConfig::new("customservices.example.io"),
        retry,
        Arc::new(controller.clone()),
        Arc::new(client.clone()),
    ));
    let runner = tokio::spawn({
        let operator = operator.clone();
        async move { operator.run().await }
    });
    Harness {
        operator,
        controller,
        client,
        runner,
    }
}

fn retry() -> RetryConfig {
    RetryConfig::default()
        .with_initial_interval(Duration::from_millis(50))
        .with_interval_multiplier(2.0)
}

fn resource(generation: i64, version: &str, finalizers: &[&str], deletion: bool) -> CustomResource {
    CustomResource {
        api_version: "example.io/v1".to_string(),
        kind: "CustomService".to_string(),
        metadata: ObjectMeta {
            uid: Some("uid-1".to_string()),
            name: "svc".to_string(),
            namespace: Some("default".to_string()),
            generation: Some(generation),
            resource_version: Some(version.to_string()),
            deletion_timestamp: deletion.then(Utc::now),
            finalizers: finalizers.iter().map(|f| f.to_string()).collect(),
            ..ObjectMeta::default()
        },
        ..CustomResource::default()
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition not met within the test window");
}

async fn settle() {
    tokio::time::sleep(Duration::from_secs(2)).await;
}

#[tokio::test(start_paused = true)]
async fn create_adds_finalizer_and_persists_exactly_once() {
    let h = start(retry());
    let sink = h.operator.watch_sink();

    sink.event_received(WatchAction::Added, resource(1, "1", &[], false));

    wait_until(|| h.controller.create_or_update_count() == 1).await;
    assert_eq!(h.client.replace_count(), 1);
    assert!(h.client.calls()[0].has_finalizer(FINALIZER));
    assert_eq!(h.operator.stats().under_processing, 0);

    h.runner.abort();
}

#[tokio::test(start_paused = true)]
async fn metadata_only_modify_is_not_dispatched() {
    let h = start(retry());
    let sink = h.operator.watch_sink();

    sink.event_received(WatchAction::Added, resource(1, "1", &[], false));
    wait_until(|| h.controller.create_or_update_count() == 1).await;

    // Same generation, new resource version: an annotation-style change
    sink.event_received(WatchAction::Modified, resource(1, "3", &[FINALIZER], false));
    settle().await;

    assert_eq!(h.controller.create_or_update_count(), 1);

    h.runner.abort();
}

#[tokio::test(start_paused = true)]
async fn rapid_burst_reconciles_first_and_last_payload_only() {
    let h = start(retry());
    let sink = h.operator.watch_sink();

    // All five arrive before the first dispatch completes; the finalizer is
    // already in place so no persistence muddies the picture.
    sink.event_received(WatchAction::Added, resource(1, "1", &[FINALIZER], false));
    for (generation, version) in [(2, "2"), (3, "3"), (4, "4"), (5, "5")] {
        sink.event_received(
            WatchAction::Modified,
            resource(generation, version, &[FINALIZER], false),
        );
    }

    wait_until(|| h.controller.create_or_update_count() == 2).await;
    settle().await;

    assert_eq!(h.controller.create_or_update_count(), 2);
    let last = h.controller.last_seen().unwrap();
    assert_eq!(last.metadata.resource_version.as_deref(), Some("5"));
    assert_eq!(h.client.replace_count(), 0);

    h.runner.abort();
}

#[tokio::test(start_paused = true)]
async fn conflict_retries_with_the_refreshed_payload() {
    let h = start(retry());
    h.controller.mutate_status(true);
    let sink = h.operator.watch_sink();

    // The server already moved to version 2; the version-1 payload is stale.
    h.client.put(resource(1, "2", &[FINALIZER], false));
    sink.event_received(WatchAction::Added, resource(1, "1", &[FINALIZER], false));
    sink.event_received(WatchAction::Modified, resource(1, "2", &[FINALIZER], false));

    wait_until(|| h.client.replace_count() == 2).await;

    // First replace conflicts, the retry carries the refreshed payload
    assert_eq!(h.client.calls()[0].metadata.resource_version.as_deref(), Some("1"));
    assert_eq!(h.client.calls()[1].metadata.resource_version.as_deref(), Some("2"));
    let stored = h.client.get("uid-1").unwrap();
    assert!(stored.status.is_some());
    assert_eq!(stored.metadata.resource_version.as_deref(), Some("3"));

    h.runner.abort();
}

#[tokio::test(start_paused = true)]
async fn delete_with_finalizer_releases_once_and_honored_delete_is_silent() {
    let h = start(retry());
    let sink = h.operator.watch_sink();

    h.client.put(resource(1, "3", &[FINALIZER], true));
    sink.event_received(WatchAction::Modified, resource(1, "3", &[FINALIZER], true));

    wait_until(|| h.controller.delete_count() == 1).await;
    assert_eq!(h.client.replace_count(), 1);
    assert!(!h.client.calls()[0].has_finalizer(FINALIZER));

    // The server finishes the deletion once the finalizer is gone
    sink.event_received(WatchAction::Deleted, resource(1, "4", &[], true));
    settle().await;

    assert_eq!(h.controller.delete_count(), 1);
    assert_eq!(h.controller.create_or_update_count(), 0);
    let stats = h.operator.stats();
    assert_eq!(stats.under_processing, 0);
    assert_eq!(stats.not_scheduled, 0);

    h.runner.abort();
}

#[tokio::test(start_paused = true)]
async fn vetoed_delete_keeps_finalizer_until_released() {
    let h = start(retry());
    h.controller.set_delete_ready(false);
    let sink = h.operator.watch_sink();

    h.client.put(resource(1, "3", &[FINALIZER], true));
    sink.event_received(WatchAction::Modified, resource(1, "3", &[FINALIZER], true));

    wait_until(|| h.controller.delete_count() == 1).await;
    assert_eq!(h.client.replace_count(), 0);

    // External cleanup finished; the next event retriggers the delete path
    h.controller.set_delete_ready(true);
    h.client.put(resource(1, "4", &[FINALIZER], true));
    sink.event_received(WatchAction::Modified, resource(1, "4", &[FINALIZER], true));

    wait_until(|| h.controller.delete_count() == 2).await;
    assert_eq!(h.client.replace_count(), 1);
    assert!(!h.client.calls()[0].has_finalizer(FINALIZER));

    h.runner.abort();
}

#[tokio::test(start_paused = true)]
async fn retry_exhaustion_stops_dispatching_until_a_new_event() {
    let h = start(retry().with_max_attempts(2));
    h.controller.fail_next_create_or_update(10);
    let sink = h.operator.watch_sink();

    sink.event_received(WatchAction::Added, resource(1, "1", &[FINALIZER], false));

    wait_until(|| h.controller.create_or_update_count() == 2).await;
    settle().await;
    assert_eq!(h.controller.create_or_update_count(), 2);

    // A fresh watch event resets the retry clock
    sink.event_received(WatchAction::Modified, resource(2, "2", &[FINALIZER], false));
    wait_until(|| h.controller.create_or_update_count() >= 3).await;

    h.runner.abort();
}

#[tokio::test(start_paused = true)]
async fn watch_closure_stops_the_operator_with_an_error() {
    let h = start(retry());
    let sink = h.operator.watch_sink();

    let source = FakeWatchSource::new();
    source.queue(WatchAction::Added, resource(1, "1", &[], false));
    source.queue_close("watch stream terminated");
    source.deliver(sink.as_ref());

    let result = tokio::time::timeout(Duration::from_secs(5), h.runner)
        .await
        .expect("operator should stop")
        .expect("runner task should not panic");

    assert!(matches!(
        result,
        Err(OperatorError::WatchClosed(reason)) if reason == "watch stream terminated"
    ));
}
