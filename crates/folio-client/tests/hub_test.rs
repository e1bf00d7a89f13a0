//! Hub driver tests on a paused clock.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use folio_client::{ClientConfig, HubError, HubHandle, InvalidateHook, NotificationHub};
use folio_core::{
    ChannelStatus, ConnectionState, ListenerId, Notification, PayloadKind, SupervisorError, UserId,
};
use folio_harness::{SimEnv, SimStore, SimTransport};

/// Listener the hooks are registered under when a test needs only one.
const CONSUMER: ListenerId = ListenerId(0);

fn spawn_hub(transport: &SimTransport, store: &SimStore) -> HubHandle {
    NotificationHub::spawn(
        SimEnv::with_seed(1),
        Arc::new(transport.clone()),
        Arc::new(store.clone()),
        &ClientConfig::default(),
    )
}

fn noop_hook() -> InvalidateHook {
    Arc::new(|_: &UserId| true)
}

fn counting_hook(calls: &Arc<AtomicUsize>, alive: bool) -> InvalidateHook {
    let calls = Arc::clone(calls);
    Arc::new(move |_: &UserId| {
        calls.fetch_add(1, Ordering::SeqCst);
        alive
    })
}

/// Let spawned tasks run without moving the clock meaningfully.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

fn user(name: &str) -> UserId {
    UserId::new(name)
}

#[tokio::test(start_paused = true)]
async fn ensure_opens_one_channel_and_is_idempotent() {
    let transport = SimTransport::new();
    let hub = spawn_hub(&transport, &SimStore::new());

    hub.ensure_subscription(user("u1"), CONSUMER, noop_hook()).await.unwrap();
    hub.ensure_subscription(user("u1"), CONSUMER, noop_hook()).await.unwrap();

    let status = hub.status().await.unwrap();
    assert_eq!(status.state, ConnectionState::Connected);
    assert_eq!(status.user_id, Some(user("u1")));
    assert_eq!(transport.opened_total(), 1);

    let open = transport.open_channels();
    let (_, spec) = &open[0];
    assert!(spec.name.starts_with("notifications:u1:"));
    assert_eq!(spec.table, "notifications");
    assert_eq!(spec.filter(), "user_id=eq.u1");
}

#[tokio::test(start_paused = true)]
async fn switching_user_closes_the_previous_channel() {
    let transport = SimTransport::new();
    let hub = spawn_hub(&transport, &SimStore::new());

    hub.ensure_subscription(user("u1"), CONSUMER, noop_hook()).await.unwrap();
    let first = transport.current().unwrap();
    hub.ensure_subscription(user("u2"), CONSUMER, noop_hook()).await.unwrap();

    let open = transport.open_channels();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].1.user_id, user("u2"));
    assert_eq!(transport.closed(), vec![first]);
}

#[tokio::test(start_paused = true)]
async fn channel_error_reconnects_after_delay() {
    let transport = SimTransport::new();
    let hub = spawn_hub(&transport, &SimStore::new());

    hub.ensure_subscription(user("u1"), CONSUMER, noop_hook()).await.unwrap();
    transport.emit_status(transport.current().unwrap(), ChannelStatus::ChannelError);

    let status = hub.status().await.unwrap();
    assert_eq!(status.state, ConnectionState::Error);
    assert_eq!(status.reconnect_attempts, 1);
    assert!(status.reconnect_pending);
    assert!(transport.open_channels().is_empty());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(transport.opened_total(), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(transport.opened_total(), 2);

    let status = hub.status().await.unwrap();
    assert_eq!(status.state, ConnectionState::Connected);
    assert_eq!(status.reconnect_attempts, 0);
}

#[tokio::test(start_paused = true)]
async fn refused_open_schedules_reconnect() {
    let transport = SimTransport::new();
    let hub = spawn_hub(&transport, &SimStore::new());
    transport.refuse_next_opens(1);

    hub.ensure_subscription(user("u1"), CONSUMER, noop_hook()).await.unwrap();

    let status = hub.status().await.unwrap();
    assert_eq!(status.state, ConnectionState::Error);
    assert!(status.reconnect_pending);

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(hub.status().await.unwrap().state, ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn exhausted_budget_refuses_same_user_until_switch() {
    let transport = SimTransport::new();
    let hub = spawn_hub(&transport, &SimStore::new());

    hub.ensure_subscription(user("u1"), CONSUMER, noop_hook()).await.unwrap();
    transport.refuse_next_opens(10);
    transport.emit_status(transport.current().unwrap(), ChannelStatus::TimedOut);

    // 3s then 6s, both refused
    tokio::time::sleep(Duration::from_secs(20)).await;

    let status = hub.status().await.unwrap();
    assert_eq!(status.state, ConnectionState::Error);
    assert_eq!(status.reconnect_attempts, 2);
    assert!(!status.reconnect_pending);
    assert!(status.channel.is_none());

    let refused = hub.ensure_subscription(user("u1"), CONSUMER, noop_hook()).await;
    assert_eq!(
        refused,
        Err(HubError::Refused(SupervisorError::ReconnectExhausted { attempts: 2 }))
    );

    transport.refuse_next_opens(0);
    hub.ensure_subscription(user("u2"), CONSUMER, noop_hook()).await.unwrap();
    let status = hub.status().await.unwrap();
    assert_eq!(status.state, ConnectionState::Connected);
    assert_eq!(status.user_id, Some(user("u2")));
}

#[tokio::test(start_paused = true)]
async fn teardown_cancels_pending_reconnect() {
    let transport = SimTransport::new();
    let hub = spawn_hub(&transport, &SimStore::new());

    hub.ensure_subscription(user("u1"), CONSUMER, noop_hook()).await.unwrap();
    transport.emit_status(transport.current().unwrap(), ChannelStatus::Closed);
    hub.teardown().unwrap();

    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(transport.opened_total(), 1);
    let status = hub.status().await.unwrap();
    assert!(status.circuit_open);
    assert!(!status.reconnect_pending);
    assert_eq!(
        hub.ensure_subscription(user("u1"), CONSUMER, noop_hook()).await,
        Err(HubError::Refused(SupervisorError::CircuitOpen))
    );
}

#[tokio::test(start_paused = true)]
async fn removing_last_listener_installs_fresh_supervisor() {
    let transport = SimTransport::new();
    let hub = spawn_hub(&transport, &SimStore::new());

    let first = hub.add_listener(Arc::new(|_: &[Notification]| {})).await.unwrap();
    let second = hub.add_listener(Arc::new(|_: &[Notification]| {})).await.unwrap();
    hub.ensure_subscription(user("u1"), CONSUMER, noop_hook()).await.unwrap();
    hub.teardown().unwrap();

    hub.remove_listener(first).unwrap();
    let status = hub.status().await.unwrap();
    assert!(status.circuit_open);
    assert_eq!(status.listener_count, 1);

    hub.remove_listener(second).unwrap();
    let status = hub.status().await.unwrap();
    assert!(!status.circuit_open);
    assert_eq!(status.generation, 1);
    assert_eq!(status.listener_count, 0);

    hub.ensure_subscription(user("u1"), CONSUMER, noop_hook()).await.unwrap();
    assert_eq!(transport.opened_total(), 2);
    assert_eq!(transport.open_channels().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn retiring_closes_the_live_channel() {
    let transport = SimTransport::new();
    let hub = spawn_hub(&transport, &SimStore::new());

    let id = hub.add_listener(Arc::new(|_: &[Notification]| {})).await.unwrap();
    hub.ensure_subscription(user("u1"), CONSUMER, noop_hook()).await.unwrap();
    hub.update_notifications(vec![Notification::new("n1", 1)]).unwrap();

    hub.remove_listener(id).unwrap();

    let status = hub.status().await.unwrap();
    assert!(transport.open_channels().is_empty());
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert_eq!(status.cached, 0);
}

#[tokio::test(start_paused = true)]
async fn payload_invalidates_cache_then_calls_hook() {
    let transport = SimTransport::new();
    let store = SimStore::new();
    let hub = spawn_hub(&transport, &store);
    let calls = Arc::new(AtomicUsize::new(0));

    hub.ensure_subscription(user("u1"), CONSUMER, counting_hook(&calls, true)).await.unwrap();
    transport.emit_payload(transport.current().unwrap(), PayloadKind::Insert);
    settle().await;

    assert_eq!(store.invalidations(), vec![user("u1")]);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn payload_runs_every_registered_hook() {
    let transport = SimTransport::new();
    let hub = spawn_hub(&transport, &SimStore::new());
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));

    hub.ensure_subscription(user("u1"), ListenerId(0), counting_hook(&first, true)).await.unwrap();
    hub.ensure_subscription(user("u1"), ListenerId(1), counting_hook(&second, true)).await.unwrap();
    assert_eq!(transport.opened_total(), 1);

    transport.emit_payload(transport.current().unwrap(), PayloadKind::Update);
    settle().await;

    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 1);
    assert_eq!(hub.status().await.unwrap().hook_count, 2);
}

#[tokio::test(start_paused = true)]
async fn gone_hook_is_dropped_while_others_keep_firing() {
    let transport = SimTransport::new();
    let hub = spawn_hub(&transport, &SimStore::new());
    let gone = Arc::new(AtomicUsize::new(0));
    let alive = Arc::new(AtomicUsize::new(0));

    hub.ensure_subscription(user("u1"), ListenerId(0), counting_hook(&gone, false)).await.unwrap();
    hub.ensure_subscription(user("u1"), ListenerId(1), counting_hook(&alive, true)).await.unwrap();
    let channel = transport.current().unwrap();

    transport.emit_payload(channel, PayloadKind::Insert);
    settle().await;
    assert_eq!(hub.status().await.unwrap().hook_count, 1);

    transport.emit_payload(channel, PayloadKind::Delete);
    settle().await;
    assert_eq!(gone.load(Ordering::SeqCst), 1);
    assert_eq!(alive.load(Ordering::SeqCst), 2);
    assert_eq!(transport.open_channels().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn last_hook_gone_releases_subscription() {
    let transport = SimTransport::new();
    let hub = spawn_hub(&transport, &SimStore::new());
    let calls = Arc::new(AtomicUsize::new(0));

    hub.ensure_subscription(user("u1"), CONSUMER, counting_hook(&calls, false)).await.unwrap();
    transport.emit_payload(transport.current().unwrap(), PayloadKind::Insert);
    settle().await;

    let status = hub.status().await.unwrap();
    assert!(transport.open_channels().is_empty());
    assert_eq!(status.user_id, None);
    assert!(!status.circuit_open);
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_releases_after_last_hook_without_latching() {
    let transport = SimTransport::new();
    let hub = spawn_hub(&transport, &SimStore::new());

    hub.ensure_subscription(user("u1"), ListenerId(0), noop_hook()).await.unwrap();
    hub.ensure_subscription(user("u1"), ListenerId(1), noop_hook()).await.unwrap();
    hub.update_notifications(vec![Notification::new("n1", 1)]).unwrap();

    hub.unsubscribe(ListenerId(0)).unwrap();
    assert_eq!(hub.status().await.unwrap().user_id, Some(user("u1")));
    assert_eq!(transport.open_channels().len(), 1);

    hub.unsubscribe(ListenerId(1)).unwrap();
    let status = hub.status().await.unwrap();
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert_eq!(status.user_id, None);
    assert_eq!(status.cached, 0);
    assert!(!status.circuit_open);
    assert!(transport.open_channels().is_empty());

    hub.ensure_subscription(user("u1"), ListenerId(0), noop_hook()).await.unwrap();
    assert_eq!(transport.opened_total(), 2);
}

#[tokio::test(start_paused = true)]
async fn late_listener_receives_cached_list() {
    let hub = spawn_hub(&SimTransport::new(), &SimStore::new());
    hub.update_notifications(vec![Notification::new("n1", 2), Notification::new("n1", 1)])
        .unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    hub.add_listener(Arc::new(move |list: &[Notification]| {
        sink.lock().unwrap().push(list.len());
    }))
    .await
    .unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![1]);
    assert_eq!(hub.listener_count().await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn steward_trims_cache_on_interval() {
    let hub = spawn_hub(&SimTransport::new(), &SimStore::new());
    let lengths = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&lengths);
    hub.add_listener(Arc::new(move |list: &[Notification]| {
        sink.lock().unwrap().push(list.len());
    }))
    .await
    .unwrap();

    let rows = (0..250u64).map(|i| Notification::new(format!("n{i}"), i)).collect();
    hub.update_notifications(rows).unwrap();
    assert_eq!(hub.status().await.unwrap().cached, 250);

    tokio::time::sleep(Duration::from_secs(61)).await;

    assert_eq!(hub.status().await.unwrap().cached, 100);
    assert_eq!(*lengths.lock().unwrap(), vec![250, 100]);
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_channel_and_handle() {
    let transport = SimTransport::new();
    let hub = spawn_hub(&transport, &SimStore::new());

    hub.ensure_subscription(user("u1"), CONSUMER, noop_hook()).await.unwrap();
    hub.shutdown().unwrap();
    settle().await;

    assert!(transport.open_channels().is_empty());
    assert_eq!(hub.status().await, Err(HubError::Closed));
    assert!(hub.is_closed());
}
