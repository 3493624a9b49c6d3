//! Subscription controller lifecycle tests.

mod common;

use common::{context, init_tracing, order, ScriptedClient};
use ledger_stream::{
    ConnectionStatus, ContractId, ErrorKind, Generation, LedgerContext, LedgerError, Party,
    StreamDescriptor, StreamStatus, SubscriptionController,
};
use serde_json::json;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const BACKOFF: Duration = Duration::from_secs(5);

fn started(client: &ScriptedClient) -> SubscriptionController {
    let ctx = context(client);
    let mut controller = SubscriptionController::new(&ctx);
    controller.start(StreamDescriptor::new("Order")).unwrap();
    controller
}

fn after_backoff() -> Instant {
    Instant::now() + BACKOFF + Duration::from_millis(10)
}

// --- Scenario ---

#[test]
fn test_order_subscription_scenario() {
    init_tracing();
    let client = ScriptedClient::new();
    let mut controller = started(&client);

    // Initial view empty, connecting
    assert_eq!(controller.status(), ConnectionStatus::Connecting);
    assert!(controller.is_loading());
    assert!(controller.view().is_empty());
    assert!(client.is_started(0));

    // Live
    let sink = client.sink(0);
    sink.live();
    controller.drain();
    assert_eq!(controller.status(), ConnectionStatus::Live);
    assert!(!controller.is_loading());
    assert!(controller.is_connected());
    assert!(controller.view().is_empty());

    // Addition
    sink.created(order("o1", 7));
    controller.drain();
    assert_eq!(controller.view().len(), 1);
    assert_eq!(
        controller.view().get(&ContractId::new("o1")).unwrap().payload,
        json!({ "qty": 7 })
    );

    // Removal
    sink.archived(ContractId::new("o1"));
    controller.drain();
    assert!(controller.view().is_empty());
    assert_eq!(controller.status(), ConnectionStatus::Live);
}

#[test]
fn test_default_descriptor_uses_session_parties() {
    let client = ScriptedClient::new();
    let _controller = started(&client);

    let descriptor = client.descriptor(0);
    assert_eq!(descriptor.acting_parties, Some(vec![Party::new("alice")]));
    assert!(!descriptor.include_created_event_blob);
}

#[test]
fn test_events_apply_in_arrival_order() {
    let client = ScriptedClient::new();
    let mut controller = started(&client);
    let sink = client.sink(0);

    // Snapshot arrives before live
    sink.created(order("o1", 1));
    sink.created(order("o2", 2));
    sink.live();
    sink.created(order("o1", 10));
    sink.archived(ContractId::new("o2"));
    sink.created(order("o3", 3));
    sink.archived(ContractId::new("o2"));
    controller.drain();

    let ids: Vec<_> = controller.view().ids().map(|id| id.as_str().to_string()).collect();
    assert_eq!(ids, vec!["o1", "o3"]);
    assert_eq!(
        controller.view().get(&ContractId::new("o1")).unwrap().payload,
        json!({ "qty": 10 })
    );
}

// --- Failures and Reconnect ---

#[test]
fn test_setup_failure_schedules_one_reconnect() {
    init_tracing();
    let client = ScriptedClient::new();
    client.fail_next_opens(1);
    let mut controller = started(&client);

    assert_eq!(controller.status(), ConnectionStatus::Error);
    assert!(!controller.is_loading());
    assert_eq!(controller.error().unwrap().kind, ErrorKind::Setup);
    assert_eq!(client.attempts(), 1);

    // Not yet due
    controller.drain();
    assert!(!controller.tick(Instant::now() + Duration::from_secs(4)));
    assert_eq!(client.attempts(), 1);

    // Due: exactly one new handle
    assert!(controller.tick(after_backoff()));
    assert!(!controller.tick(after_backoff()));
    assert_eq!(client.attempts(), 2);
    assert_eq!(client.opened(), 1);
    assert_eq!(controller.status(), ConnectionStatus::Connecting);
    assert!(controller.is_loading());

    client.sink(0).live();
    controller.drain();
    assert_eq!(controller.status(), ConnectionStatus::Live);
    assert!(controller.error().is_none());
}

#[test]
fn test_repeated_setup_failures_retry_serially() {
    let client = ScriptedClient::new();
    client.fail_next_opens(3);
    let mut controller = started(&client);

    for attempt in 2..=4 {
        assert_eq!(controller.status(), ConnectionStatus::Error);
        let deadline = controller.next_deadline().unwrap();
        assert!(controller.tick(deadline));
        assert_eq!(client.attempts(), attempt);
    }

    assert_eq!(controller.status(), ConnectionStatus::Connecting);
    assert!(controller.next_deadline().is_none());
    assert_eq!(client.opened(), 1);
}

#[test]
fn test_start_failure_closes_handle() {
    let client = ScriptedClient::new();
    client.fail_next_starts(1);
    let mut controller = started(&client);

    assert_eq!(controller.status(), ConnectionStatus::Error);
    assert_eq!(controller.error().unwrap().kind, ErrorKind::Setup);
    assert!(client.is_closed(0));

    controller.tick(after_backoff());
    assert_eq!(client.opened(), 2);
    assert!(client.is_started(1));
    assert!(client.never_overlapped());
}

#[test]
fn test_failure_before_live_is_setup_error() {
    let client = ScriptedClient::new();
    let mut controller = started(&client);

    client.sink(0).failed("permission denied");
    controller.drain();

    let error = controller.error().unwrap();
    assert_eq!(error.kind, ErrorKind::Setup);
    assert_eq!(error.message, "permission denied");
    assert!(client.is_closed(0));
}

#[test]
fn test_stream_failure_reconnects_with_fresh_view() {
    init_tracing();
    let client = ScriptedClient::new();
    let mut controller = started(&client);
    let first = client.sink(0);
    first.created(order("o1", 1));
    first.live();
    controller.drain();
    assert_eq!(controller.view().len(), 1);

    first.failed("connection reset");
    controller.drain();
    assert_eq!(controller.status(), ConnectionStatus::Error);
    assert_eq!(controller.error().unwrap().kind, ErrorKind::Stream);
    assert!(client.is_closed(0));

    // Old handle is closed before the new one opens
    controller.tick(after_backoff());
    assert_eq!(client.opened(), 2);
    assert!(client.never_overlapped());
    assert_eq!(controller.generation(), Generation(2));
    assert!(controller.view().is_empty());
    assert!(controller.is_loading());

    let second = client.sink(1);
    second.created(order("o2", 2));
    second.live();
    controller.drain();
    let ids: Vec<_> = controller.view().ids().map(|id| id.as_str().to_string()).collect();
    assert_eq!(ids, vec!["o2"]);
}

#[test]
fn test_unexpected_close_is_error() {
    let client = ScriptedClient::new();
    let mut controller = started(&client);
    client.sink(0).live();
    client.sink(0).closed();
    controller.drain();

    assert_eq!(controller.status(), ConnectionStatus::Error);
    assert_eq!(controller.error().unwrap().kind, ErrorKind::Closed);
    assert!(controller.next_deadline().is_some());
}

#[test]
fn test_connecting_signal_keeps_view() {
    let client = ScriptedClient::new();
    let mut controller = started(&client);
    let sink = client.sink(0);
    sink.created(order("o1", 1));
    sink.live();
    sink.status(StreamStatus::Connecting);
    controller.drain();

    assert_eq!(controller.status(), ConnectionStatus::Connecting);
    assert!(!controller.is_connected());
    assert_eq!(controller.view().len(), 1);
}

#[test]
fn test_failure_on_failed_handle_is_ignored() {
    let client = ScriptedClient::new();
    let mut controller = started(&client);
    let sink = client.sink(0);
    sink.failed("first");
    sink.failed("second");
    sink.closed();
    controller.drain();

    assert_eq!(controller.error().unwrap().message, "first");
    assert!(controller.tick(after_backoff()));
    assert_eq!(client.opened(), 2);
}

// --- Stale Events ---

#[test]
fn test_stale_events_never_mutate_view() {
    init_tracing();
    let client = ScriptedClient::new();
    let mut controller = started(&client);
    let old = client.sink(0);
    old.created(order("o1", 1));
    old.live();
    controller.drain();

    controller.reload().unwrap();
    assert_eq!(controller.generation(), Generation(2));
    assert!(controller.view().is_empty());
    assert!(client.is_closed(0));

    // New handle delivers first, old in-flight events arrive afterwards
    let new = client.sink(1);
    new.created(order("o2", 2));
    new.live();
    old.created(order("stale", 99));
    old.archived(ContractId::new("o2"));
    old.failed("late failure");
    controller.drain();

    assert_eq!(controller.status(), ConnectionStatus::Live);
    let ids: Vec<_> = controller.view().ids().map(|id| id.as_str().to_string()).collect();
    assert_eq!(ids, vec!["o2"]);
    assert!(controller.error().is_none());
}

#[test]
fn test_events_after_stop_are_discarded() {
    let client = ScriptedClient::new();
    let mut controller = started(&client);
    let sink = client.sink(0);
    sink.live();
    controller.drain();

    // In flight at the moment of stop
    sink.created(order("o1", 1));
    controller.stop();
    controller.drain();

    assert_eq!(controller.status(), ConnectionStatus::Closed);
    assert!(controller.view().is_empty());
    assert!(client.is_closed(0));
}

// --- Stop / Reload / Descriptor ---

#[test]
fn test_stop_is_idempotent() {
    let client = ScriptedClient::new();
    let ctx = context(&client);
    let mut controller = SubscriptionController::new(&ctx);

    // Before start
    controller.stop();
    assert_eq!(controller.status(), ConnectionStatus::Closed);
    controller.stop();

    controller.start(StreamDescriptor::new("Order")).unwrap();
    controller.stop();
    controller.stop();
    assert_eq!(controller.status(), ConnectionStatus::Closed);
    assert_eq!(client.open_handles(), 0);

    // Restartable
    controller.start(StreamDescriptor::new("Order")).unwrap();
    assert_eq!(controller.status(), ConnectionStatus::Connecting);
    assert_eq!(client.open_handles(), 1);
}

#[test]
fn test_reload_queued_before_stop_is_discarded() {
    let client = ScriptedClient::new();
    let mut controller = started(&client);

    assert!(controller.reload_handle().reload());
    controller.stop();
    controller.drain();

    assert_eq!(controller.status(), ConnectionStatus::Closed);
    assert_eq!(client.open_handles(), 0);
    assert_eq!(client.opened(), 1);
}

#[test]
fn test_reload_request_after_stop_is_ignored() {
    let client = ScriptedClient::new();
    let mut controller = started(&client);
    let reload = controller.reload_handle();
    controller.stop();

    assert!(reload.reload());
    controller.drain();
    assert_eq!(controller.status(), ConnectionStatus::Closed);
    assert_eq!(client.open_handles(), 0);

    // A direct call still restarts
    controller.reload().unwrap();
    assert_eq!(controller.status(), ConnectionStatus::Connecting);
    assert_eq!(client.open_handles(), 1);
}

#[test]
fn test_stop_cancels_pending_reconnect() {
    let client = ScriptedClient::new();
    client.fail_next_opens(1);
    let mut controller = started(&client);
    assert!(controller.next_deadline().is_some());

    controller.stop();
    assert!(controller.next_deadline().is_none());
    assert!(!controller.tick(after_backoff()));
    assert_eq!(client.attempts(), 1);
}

#[test]
fn test_reload_before_start_is_misuse() {
    let client = ScriptedClient::new();
    let ctx = context(&client);
    let mut controller = SubscriptionController::new(&ctx);

    let result = controller.reload();
    assert!(matches!(result, Err(LedgerError::NotStarted)));
    assert_eq!(client.attempts(), 0);
}

#[test]
fn test_reload_resets_view_and_sets_loading() {
    let client = ScriptedClient::new();
    let mut controller = started(&client);
    client.sink(0).created(order("o1", 1));
    client.sink(0).live();
    controller.drain();

    controller.reload().unwrap();
    assert!(controller.view().is_empty());
    assert!(controller.is_loading());
    assert_eq!(controller.status(), ConnectionStatus::Connecting);
    assert_eq!(client.descriptor(1), client.descriptor(0));
}

#[test]
fn test_set_descriptor_restarts_only_on_change() {
    let client = ScriptedClient::new();
    let mut controller = started(&client);

    // Same descriptor after resolution
    controller
        .set_descriptor(StreamDescriptor::new("Order").acting_as(vec![Party::new("alice")]))
        .unwrap();
    assert_eq!(client.opened(), 1);

    controller
        .set_descriptor(StreamDescriptor::new("Order").with_created_event_blob())
        .unwrap();
    assert_eq!(client.opened(), 2);
    assert!(client.is_closed(0));
    assert!(client.descriptor(1).include_created_event_blob);
    assert_eq!(controller.generation(), Generation(2));
}

#[test]
fn test_misuse_errors_are_synchronous() {
    let client = ScriptedClient::new();
    let ctx = LedgerContext::new(Arc::new(client.clone()), Vec::new());
    let mut controller = SubscriptionController::new(&ctx);

    let result = controller.start(StreamDescriptor::new("Order"));
    assert!(matches!(result, Err(LedgerError::NoActingParties(_))));
    assert_eq!(controller.status(), ConnectionStatus::Initializing);
    assert_eq!(client.attempts(), 0);
}

#[test]
fn test_drop_closes_handle() {
    let client = ScriptedClient::new();
    {
        let _controller = started(&client);
        assert_eq!(client.open_handles(), 1);
    }
    assert_eq!(client.open_handles(), 0);
}

// --- Notifications ---

#[test]
fn test_watch_publishes_once_per_drain() {
    let client = ScriptedClient::new();
    let mut controller = started(&client);
    let updates = controller.watch();

    let sink = client.sink(0);
    sink.live();
    sink.created(order("o1", 1));
    sink.created(order("o2", 2));
    controller.drain();

    sink.archived(ContractId::new("o1"));
    controller.drain();

    // Nothing queued, nothing published
    controller.drain();

    let seen: Vec<_> = updates
        .try_iter()
        .map(|u| (u.status, u.loading, u.connected, u.view.len()))
        .collect();
    assert_eq!(
        seen,
        vec![
            (ConnectionStatus::Connecting, true, false, 0),
            (ConnectionStatus::Live, false, true, 2),
            (ConnectionStatus::Live, false, true, 1),
        ]
    );
}

#[test]
fn test_large_snapshot_is_published_once() {
    let client = ScriptedClient::new();
    let mut controller = started(&client);
    let updates = controller.watch();
    assert_eq!(updates.try_iter().count(), 1);

    let sink = client.sink(0);
    for i in 0..2_000 {
        sink.created(order(&format!("o{}", i), i));
    }
    sink.live();
    controller.drain();

    let seen: Vec<_> = updates.try_iter().collect();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].view.len(), 2_000);
    assert!(seen[0].connected);
}

#[test]
fn test_failed_start_publishes_final_state() {
    let client = ScriptedClient::new();
    client.fail_next_opens(1);
    let ctx = context(&client);
    let mut controller = SubscriptionController::new(&ctx);
    let updates = controller.watch();

    controller.start(StreamDescriptor::new("Order")).unwrap();

    let statuses: Vec<_> = updates.try_iter().map(|u| u.status).collect();
    assert_eq!(
        statuses,
        vec![ConnectionStatus::Initializing, ConnectionStatus::Error]
    );
}

#[test]
fn test_stale_events_do_not_notify() {
    let client = ScriptedClient::new();
    let mut controller = started(&client);
    controller.reload().unwrap();
    let updates = controller.watch();
    // Drain the primed state
    assert_eq!(updates.try_iter().count(), 1);

    client.sink(0).created(order("o1", 1));
    controller.drain();
    assert_eq!(updates.try_iter().count(), 0);
}

#[test]
fn test_reload_handle_from_another_thread() {
    let client = ScriptedClient::new();
    let mut controller = started(&client);
    let reload = controller.snapshot().reload;

    thread::spawn(move || {
        assert!(reload.reload());
    })
    .join()
    .unwrap();

    assert_eq!(client.opened(), 1);
    controller.drain();
    assert_eq!(client.opened(), 2);
    assert_eq!(controller.generation(), Generation(2));
    assert!(client.is_closed(0));
}

#[test]
fn test_poll_waits_for_events() {
    let client = ScriptedClient::new();
    let mut controller = started(&client);
    let sink = client.sink(0);

    let pusher = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        sink.live();
    });

    let deadline = Instant::now() + Duration::from_secs(2);
    while controller.status() != ConnectionStatus::Live && Instant::now() < deadline {
        controller.poll(Duration::from_millis(50));
    }
    pusher.join().unwrap();

    assert_eq!(controller.status(), ConnectionStatus::Live);
}
