//! Integration tests for the bridge engine over mock transports.
//!
//! Covers:
//! - Full-duplex forwarding and per-direction ordering
//! - Error surfacing without bridge termination
//! - Both server-shutdown policies
//! - Client auto-reconnection
//! - Shutdown/initialize idempotence

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Map;

use common::{wait_for, EventLog, MockFactory};
use mcp_bridge::{Bridge, BridgeConfig, ShutdownPolicy, TransportKind, TransportSource};

fn test_config(policy: ShutdownPolicy) -> BridgeConfig {
    // Kind tags are irrelevant under the mock factory; `sse` keeps the
    // requested policy from being forced.
    BridgeConfig::new(
        TransportKind::Sse,
        TransportKind::Sse,
        Map::new(),
        Map::new(),
        policy,
    )
}

fn test_bridge(policy: ShutdownPolicy) -> (Bridge, Arc<MockFactory>) {
    let factory = MockFactory::new();
    let bridge = Bridge::with_factory(test_config(policy), factory.clone());
    (bridge, factory)
}

fn record_events(bridge: &Bridge) -> EventLog {
    let log = EventLog::new();

    let errors = log.clone();
    bridge.on_transport_error(move |source, _error| errors.push(format!("error:{source}")));
    let closed = log.clone();
    bridge.on_transport_closed(move |source| closed.push(format!("closed:{source}")));
    let reconnected = log.clone();
    bridge.on_transport_reconnected(move |source| reconnected.push(format!("reconnected:{source}")));

    log
}

#[tokio::test]
async fn test_basic_forwarding() {
    let (bridge, factory) = test_bridge(ShutdownPolicy::ShutdownBridge);
    bridge.initialize().await.unwrap();

    let server = factory.latest_server();
    let client = factory.latest_client();

    server.inject("hello");
    assert!(
        wait_for(Duration::from_secs(1), || client.sent() == vec!["hello"]).await,
        "server frame not forwarded to client: {:?}",
        client.sent()
    );

    client.inject("world");
    assert!(
        wait_for(Duration::from_secs(1), || server.sent() == vec!["world"]).await,
        "client frame not forwarded to server: {:?}",
        server.sent()
    );

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_forwarding_preserves_source_order() {
    let (bridge, factory) = test_bridge(ShutdownPolicy::ShutdownBridge);
    bridge.initialize().await.unwrap();

    let server = factory.latest_server();
    let client = factory.latest_client();

    for i in 0..50 {
        server.inject(&format!("frame-{i}"));
    }

    assert!(
        wait_for(Duration::from_secs(2), || client.sent().len() == 50).await,
        "expected 50 frames, got {}",
        client.sent().len()
    );
    let expected: Vec<String> = (0..50).map(|i| format!("frame-{i}")).collect();
    assert_eq!(client.sent(), expected);

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_server_stream_error_surfaces() {
    let (bridge, factory) = test_bridge(ShutdownPolicy::ShutdownBridge);
    let log = record_events(&bridge);
    bridge.initialize().await.unwrap();

    factory.latest_server().inject_error("boom");

    assert!(
        wait_for(Duration::from_secs(1), || log.count_of("error:server") == 1).await,
        "expected one server error event: {:?}",
        log.snapshot()
    );
    // The error alone must not terminate the bridge.
    assert!(bridge.is_initialized());
    assert!(bridge.server_active());

    // Forwarding still works after the error.
    factory.latest_server().inject("still-alive");
    let client = factory.latest_client();
    assert!(wait_for(Duration::from_secs(1), || client.sent() == vec!["still-alive"]).await);

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_failed_send_drops_frame_and_reports_sink_side() {
    let (bridge, factory) = test_bridge(ShutdownPolicy::ShutdownBridge);
    let log = record_events(&bridge);
    bridge.initialize().await.unwrap();

    let server = factory.latest_server();
    let client = factory.latest_client();

    client.set_fail_sends(true);
    server.inject("lost");

    assert!(
        wait_for(Duration::from_secs(1), || log.count_of("error:client") == 1).await,
        "expected one client error event: {:?}",
        log.snapshot()
    );
    assert!(client.sent().is_empty());

    // The next frame goes through once sends recover; the lost one is
    // not retried.
    client.set_fail_sends(false);
    server.inject("after");
    assert!(wait_for(Duration::from_secs(1), || client.sent() == vec!["after"]).await);

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_server_close_shuts_bridge_down_by_default() {
    let (bridge, factory) = test_bridge(ShutdownPolicy::ShutdownBridge);
    let log = record_events(&bridge);
    bridge.initialize().await.unwrap();

    let server = factory.latest_server();
    let client = factory.latest_client();

    server.close();

    assert!(
        wait_for(Duration::from_secs(1), || !bridge.is_initialized()).await,
        "bridge did not shut down after server close"
    );
    assert!(!bridge.server_active());
    assert!(server.is_closed());
    assert!(client.is_closed());
    assert_eq!(log.count_of("closed:server"), 1);
    assert_eq!(log.count_of("reconnected:server"), 0);
}

#[tokio::test]
async fn test_wait_for_reconnection_recovers() {
    let (bridge, factory) = test_bridge(ShutdownPolicy::WaitForReconnection);
    let log = record_events(&bridge);

    let hook_log = log.clone();
    bridge.on_server_reconnect_requested(move || {
        hook_log.push("hook");
        async { Ok(true) }
    });
    bridge.set_server_reconnection_options(1, Duration::from_millis(100));

    bridge.initialize().await.unwrap();
    let old_client = factory.latest_client();

    factory.latest_server().close();

    assert!(
        wait_for(Duration::from_millis(300), || {
            log.count_of("hook") >= 1 && !bridge.waiting_for_server_reconnection()
        })
        .await,
        "wait loop did not settle: {:?}",
        log.snapshot()
    );

    // The mock factory succeeds, so the loop reconnected on the first try.
    assert!(bridge.is_initialized());
    assert!(bridge.server_active());
    assert_eq!(factory.server_creates(), 2);
    assert_eq!(factory.client_creates(), 2);
    assert!(old_client.is_closed());

    // closed precedes reconnected for the server side.
    let events: Vec<String> = log
        .snapshot()
        .into_iter()
        .filter(|e| e.ends_with(":server"))
        .collect();
    assert_eq!(events, vec!["closed:server", "reconnected:server"]);

    // The fresh pair forwards traffic.
    factory.latest_server().inject("post-reconnect");
    let new_client = factory.latest_client();
    assert!(wait_for(Duration::from_secs(1), || new_client.sent() == vec!["post-reconnect"]).await);

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_wait_for_reconnection_exhausts_and_shuts_down() {
    let (bridge, factory) = test_bridge(ShutdownPolicy::WaitForReconnection);
    let log = record_events(&bridge);
    bridge.set_server_reconnection_options(1, Duration::from_millis(50));
    bridge.initialize().await.unwrap();

    factory
        .fail_server_creates
        .store(true, std::sync::atomic::Ordering::SeqCst);
    factory.latest_server().close();

    assert!(
        wait_for(Duration::from_secs(1), || !bridge.is_initialized()).await,
        "bridge did not shut down after exhausting reconnect attempts"
    );
    assert!(!bridge.waiting_for_server_reconnection());
    assert!(log.count_of("error:server") >= 1, "{:?}", log.snapshot());
}

#[tokio::test]
async fn test_reconnect_hook_veto_shuts_down() {
    let (bridge, factory) = test_bridge(ShutdownPolicy::WaitForReconnection);
    bridge.on_server_reconnect_requested(|| async { Ok(false) });
    bridge.initialize().await.unwrap();

    let creates_before = factory.server_creates();
    factory.latest_server().close();

    assert!(
        wait_for(Duration::from_secs(1), || !bridge.is_initialized()).await,
        "veto did not shut the bridge down"
    );
    assert_eq!(factory.server_creates(), creates_before);
}

#[tokio::test]
async fn test_reconnect_hook_error_counts_as_veto() {
    let (bridge, factory) = test_bridge(ShutdownPolicy::WaitForReconnection);
    bridge.on_server_reconnect_requested(|| async { anyhow::bail!("hook exploded") });
    bridge.initialize().await.unwrap();

    factory.latest_server().close();

    assert!(
        wait_for(Duration::from_secs(1), || !bridge.is_initialized()).await,
        "failing hook did not shut the bridge down"
    );
}

#[tokio::test]
async fn test_atomic_server_client_pair_on_reconnect() {
    let (bridge, factory) = test_bridge(ShutdownPolicy::WaitForReconnection);
    bridge.set_server_reconnection_options(0, Duration::from_millis(50));
    bridge.initialize().await.unwrap();

    // First reconnect attempt: server create succeeds, client re-create
    // fails. The fresh server must be rolled back and the loop retried.
    factory
        .client_create_script
        .lock()
        .unwrap()
        .push_back(false);

    factory.latest_server().close();

    assert!(
        wait_for(Duration::from_secs(2), || {
            bridge.server_active() && !bridge.waiting_for_server_reconnection()
        })
        .await,
        "wait loop did not recover after client create failure"
    );

    // Attempt 1 made server #2 (rolled back), attempt 2 made server #3.
    assert_eq!(factory.server_creates(), 3);
    let handles = factory.server_handles.lock().unwrap().clone();
    assert!(handles[1].is_closed(), "rolled-back server was not closed");
    assert!(!handles[2].is_closed());
    assert!(bridge.is_initialized());

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_client_auto_reconnect() {
    let (bridge, factory) = test_bridge(ShutdownPolicy::ShutdownBridge);
    let log = record_events(&bridge);
    bridge.set_auto_reconnect(true, 2, Duration::from_millis(50));
    bridge.initialize().await.unwrap();

    factory.latest_client().close();

    assert!(
        wait_for(Duration::from_millis(500), || {
            factory.client_creates() == 2 && log.count_of("reconnected:client") == 1
        })
        .await,
        "client did not reconnect: {:?}",
        log.snapshot()
    );

    // closed precedes reconnected for the client side.
    let events: Vec<String> = log
        .snapshot()
        .into_iter()
        .filter(|e| e.ends_with(":client"))
        .collect();
    assert_eq!(events, vec!["closed:client", "reconnected:client"]);

    // The server stayed up throughout and traffic reaches the new client.
    assert!(bridge.server_active());
    factory.latest_server().inject("to-new-client");
    let new_client = factory.latest_client();
    assert!(wait_for(Duration::from_secs(1), || new_client.sent() == vec!["to-new-client"]).await);

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_client_reconnect_disabled() {
    let (bridge, factory) = test_bridge(ShutdownPolicy::ShutdownBridge);
    let log = record_events(&bridge);
    bridge.set_auto_reconnect(false, 3, Duration::from_millis(50));
    bridge.initialize().await.unwrap();

    factory.latest_client().close();

    assert!(wait_for(Duration::from_secs(1), || log.count_of("closed:client") == 1).await);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(factory.client_creates(), 1);
    assert_eq!(log.count_of("reconnected:client"), 0);
    // The bridge itself stays up; only the client is gone.
    assert!(bridge.is_initialized());

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_client_reconnect_attempts_bounded() {
    let (bridge, factory) = test_bridge(ShutdownPolicy::ShutdownBridge);
    let log = record_events(&bridge);
    bridge.set_auto_reconnect(true, 2, Duration::from_millis(30));
    bridge.initialize().await.unwrap();

    factory
        .fail_client_creates
        .store(true, std::sync::atomic::Ordering::SeqCst);
    factory.latest_client().close();

    // Attempts 1 and 2 fail; attempt 3 exceeds the bound and stops.
    assert!(
        wait_for(Duration::from_secs(1), || log.count_of("error:client") == 2).await,
        "{:?}",
        log.snapshot()
    );
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(factory.client_creates(), 3);

    // Exhaustion leaves the bridge running.
    assert!(bridge.is_initialized());
    assert!(bridge.server_active());

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let (bridge, factory) = test_bridge(ShutdownPolicy::ShutdownBridge);
    bridge.initialize().await.unwrap();

    let server = factory.latest_server();
    let client = factory.latest_client();

    bridge.shutdown().await;
    bridge.shutdown().await;
    bridge.shutdown().await;

    assert!(!bridge.is_initialized());
    assert!(!bridge.server_active());
    assert!(!bridge.waiting_for_server_reconnection());
    assert!(server.is_closed());
    assert!(client.is_closed());
}

#[tokio::test]
async fn test_shutdown_from_idle_is_a_no_op() {
    let (bridge, _factory) = test_bridge(ShutdownPolicy::ShutdownBridge);
    bridge.shutdown().await;
    assert!(!bridge.is_initialized());
}

#[tokio::test]
async fn test_initialize_twice_is_a_no_op() {
    let (bridge, factory) = test_bridge(ShutdownPolicy::ShutdownBridge);
    bridge.initialize().await.unwrap();
    bridge.initialize().await.unwrap();

    assert_eq!(factory.server_creates(), 1);
    assert_eq!(factory.client_creates(), 1);

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_reinitialize_after_shutdown() {
    let (bridge, factory) = test_bridge(ShutdownPolicy::ShutdownBridge);
    bridge.initialize().await.unwrap();
    bridge.shutdown().await;
    bridge.initialize().await.unwrap();

    assert!(bridge.is_initialized());
    assert_eq!(factory.server_creates(), 2);

    // The fresh pair forwards traffic.
    factory.latest_server().inject("second-life");
    let client = factory.latest_client();
    assert!(wait_for(Duration::from_secs(1), || client.sent() == vec!["second-life"]).await);

    bridge.shutdown().await;
}

#[tokio::test]
async fn test_initialize_rolls_back_on_server_create_failure() {
    let (bridge, factory) = test_bridge(ShutdownPolicy::ShutdownBridge);
    let log = record_events(&bridge);
    factory
        .fail_server_creates
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let result = bridge.initialize().await;
    assert!(result.is_err());
    assert!(!bridge.is_initialized());

    // The client that was created first must have been closed again.
    assert_eq!(factory.client_creates(), 1);
    assert!(factory.latest_client().is_closed());
    assert_eq!(log.count_of("error:server"), 1);
}

#[tokio::test]
async fn test_initialize_fails_fast_on_client_create_failure() {
    let (bridge, factory) = test_bridge(ShutdownPolicy::ShutdownBridge);
    let log = record_events(&bridge);
    factory
        .fail_client_creates
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let result = bridge.initialize().await;
    assert!(result.is_err());
    assert!(!bridge.is_initialized());

    // The client comes up first, so no server was ever created.
    assert_eq!(factory.server_creates(), 0);
    assert_eq!(log.count_of("error:client"), 1);
}

#[tokio::test]
async fn test_wait_until_idle_resolves_on_policy_shutdown() {
    let (bridge, factory) = test_bridge(ShutdownPolicy::ShutdownBridge);
    bridge.initialize().await.unwrap();

    let waiter = {
        let bridge = bridge.clone();
        tokio::spawn(async move { bridge.wait_until_idle().await })
    };

    factory.latest_server().close();

    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("wait_until_idle did not resolve")
        .unwrap();
}

#[tokio::test]
async fn test_status_getters_reflect_config() {
    let (bridge, _factory) = test_bridge(ShutdownPolicy::WaitForReconnection);
    assert_eq!(bridge.server_transport_kind(), TransportKind::Sse);
    assert_eq!(bridge.client_transport_kind(), TransportKind::Sse);
    assert_eq!(
        bridge.server_shutdown_policy(),
        ShutdownPolicy::WaitForReconnection
    );
    assert!(!bridge.is_initialized());
    assert!(!bridge.server_active());
}

#[tokio::test]
async fn test_callbacks_are_late_bound() {
    let (bridge, factory) = test_bridge(ShutdownPolicy::ShutdownBridge);
    bridge.initialize().await.unwrap();

    // Handler assigned after initialize still sees events.
    let log = EventLog::new();
    let errors = log.clone();
    bridge.on_transport_error(move |source: TransportSource, _| {
        errors.push(format!("error:{source}"))
    });

    factory.latest_server().inject_error("late");
    assert!(wait_for(Duration::from_secs(1), || log.count_of("error:server") == 1).await);

    bridge.shutdown().await;
}
