//! Connection lifecycle: connect, reconnect with backoff, recovery, destroy

mod helper;

use std::time::Duration;

use serde_json::json;

use helper::{
    connected_client, create_client, create_client_with, settle, test_config, wait_until, FakeServer,
    Reply,
};
use lsp_bridge::editor::{Document, EditorPosition};
use lsp_bridge::lsp::LspError;

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// Timer firings land on the paused clock's millisecond ticks
fn assert_about(actual: Duration, expected: Duration) {
    assert!(
        actual >= expected && actual <= expected + ms(5),
        "expected ~{:?}, got {:?}",
        expected,
        actual
    );
}

#[tokio::test(start_paused = true)]
async fn unreachable_endpoint_retries_at_base_delay_then_connects() {
    let server = FakeServer::new();
    server.fail_next(1);
    let (client, _registry) = create_client(&server);

    client.connect("localhost:2087");
    settle().await;
    assert_eq!(server.attempts(), 1);
    assert!(client.has_pending_retry());
    assert_eq!(client.attempt_count(), 1);
    assert!(!client.is_connected());

    tokio::time::sleep(ms(990)).await;
    assert_eq!(server.attempts(), 1);

    assert!(wait_until(ms(100), || client.is_connected()).await);
    assert_eq!(server.attempts(), 2);
    assert_eq!(client.attempt_count(), 0);
    assert!(!client.has_pending_retry());

    let times = server.connect_times();
    assert_about(times[1] - times[0], ms(1000));
    assert_eq!(server.endpoints(), vec!["localhost:2087", "localhost:2087"]);
}

#[tokio::test(start_paused = true)]
async fn backoff_grows_with_each_failure() {
    let server = FakeServer::new();
    server.fail_next(4);
    let (client, _registry) = create_client(&server);

    client.connect("fake:2087");
    assert!(wait_until(Duration::from_secs(30), || client.is_connected()).await);

    let times = server.connect_times();
    assert_eq!(times.len(), 5);
    let expected = [ms(1000), ms(1500), ms(2250), ms(3375)];
    for (pair, expected) in times.windows(2).zip(expected) {
        assert_about(pair[1] - pair[0], expected);
    }
}

#[tokio::test(start_paused = true)]
async fn successful_handshake_resets_the_backoff() {
    let server = FakeServer::new();
    server.fail_next(2);
    let (client, _registry) = create_client(&server);

    client.connect("fake:2087");
    assert!(wait_until(Duration::from_secs(10), || client.is_connected()).await);
    assert_eq!(server.attempts(), 3);

    server.kill_connections();
    settle().await;
    assert!(!client.is_connected());
    assert!(client.has_pending_retry());
    assert_eq!(client.attempt_count(), 1);

    assert!(wait_until(Duration::from_secs(10), || client.is_connected()).await);
    let times = server.connect_times();
    assert_eq!(times.len(), 4);
    // attempt 0 delay again, not the 2250ms that would follow two failures
    assert!(times[3] - times[2] < ms(1100));
}

#[tokio::test(start_paused = true)]
async fn destroy_cancels_pending_retry() {
    let server = FakeServer::new();
    server.fail_next(1);
    let (client, registry) = create_client(&server);

    client.connect("fake:2087");
    settle().await;
    assert!(client.has_pending_retry());

    client.destroy();
    assert!(!client.has_pending_retry());
    assert!(client.is_destroyed());

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(server.attempts(), 1);
    assert_eq!(registry.registration_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn nothing_runs_after_destroy() {
    let server = FakeServer::new();
    let (client, registry) = connected_client(&server).await;
    assert_eq!(registry.registration_count(), 3);

    client.destroy();
    client.destroy();

    assert!(!client.is_connected());
    assert!(client.current_session().is_none());
    assert_eq!(registry.registration_count(), 0);

    client.connect("fake:2087");
    client.set_endpoint("fake:9999");
    server.kill_connections();
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(server.attempts(), 1);
    assert!(!client.has_pending_retry());
    assert!(matches!(
        client.update_server_settings(json!({})),
        Err(LspError::Destroyed)
    ));
}

#[tokio::test(start_paused = true)]
async fn close_and_forced_recovery_share_one_pending_retry() {
    let server = FakeServer::new();
    let (client, registry) = connected_client(&server).await;

    // Half-close first so a request sees the stale session and forces a
    // reconnect, then let the close event land on top of it.
    server.half_close_connections();
    settle().await;
    let document = Document::new("x");
    let list = registry
        .provide_completion("python", &document, EditorPosition::new(1, 2))
        .await;
    assert!(list.suggestions.is_empty());
    assert!(client.has_pending_retry());

    server.kill_connections();
    settle().await;
    assert!(client.has_pending_retry());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(client.is_connected());
    assert_eq!(server.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn health_monitor_recovers_half_closed_socket() {
    let server = FakeServer::new();
    let (client, _registry) = connected_client(&server).await;
    let first = client.current_session().unwrap();

    server.half_close_connections();
    settle().await;
    // Nothing notices until the next health tick
    assert_eq!(server.attempts(), 1);

    tokio::time::sleep(ms(5_100)).await;
    assert!(client.has_pending_retry());
    assert_eq!(client.attempt_count(), 0);

    assert!(wait_until(Duration::from_secs(1), || client.is_connected()).await);
    assert_eq!(server.attempts(), 2);
    let second = client.current_session().unwrap();
    assert_ne!(first.id(), second.id());
    assert!(first.is_disposed());
}

#[tokio::test(start_paused = true)]
async fn set_endpoint_replaces_the_connection() {
    let server = FakeServer::new();
    let (client, registry) = connected_client(&server).await;
    let first = client.current_session().unwrap();

    client.set_endpoint("other:3000");
    assert!(first.is_disposed());
    assert!(wait_until(Duration::from_secs(1), || client.is_connected()).await);

    assert_eq!(server.endpoints(), vec!["fake:2087", "other:3000"]);
    assert_eq!(client.endpoint().as_deref(), Some("other:3000"));
    assert_eq!(client.attempt_count(), 0);
    assert_eq!(registry.registration_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn stale_failure_from_replaced_session_leaves_new_session_alone() {
    let server = FakeServer::new();
    server.reply("textDocument/hover", Reply::Silent);
    let (client, registry) = connected_client(&server).await;
    let first = client.current_session().unwrap();

    let in_flight = {
        let registry = registry.clone();
        tokio::spawn(async move {
            let document = Document::new("import os\nos.path");
            registry
                .provide_hover("python", &document, EditorPosition::new(2, 4))
                .await
        })
    };
    assert!(wait_until(ms(100), || !server.received("textDocument/hover").is_empty()).await);

    // Replacing the endpoint disposes the first session under the request
    client.set_endpoint("fake:2088");
    assert!(in_flight.await.unwrap().is_none());
    assert!(wait_until(Duration::from_secs(1), || client.is_connected()).await);
    let second = client.current_session().unwrap();
    assert_ne!(first.id(), second.id());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(server.attempts(), 2);
    assert!(!client.has_pending_retry());
    assert_eq!(client.current_session().unwrap().id(), second.id());
}

#[tokio::test(start_paused = true)]
async fn failed_handshake_is_treated_like_a_close() {
    let server = FakeServer::new();
    server.reply(
        "initialize",
        Reply::Error {
            code: -32603,
            message: "not ready".to_string(),
        },
    );
    let (client, _registry) = create_client(&server);

    client.connect("fake:2087");
    settle().await;
    assert!(!client.is_connected());
    assert!(client.has_pending_retry());
    assert_eq!(client.attempt_count(), 1);

    tokio::time::sleep(ms(1_100)).await;
    assert_eq!(server.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn settings_push_requires_a_session() {
    let server = FakeServer::new();
    let (client, _registry) = create_client(&server);
    assert!(matches!(
        client.update_server_settings(json!({"pylsp": {}})),
        Err(LspError::NotConnected)
    ));

    client.connect("fake:2087");
    assert!(wait_until(Duration::from_secs(1), || client.is_connected()).await);

    client
        .update_server_settings(json!({"pylsp": {"plugins": {"pycodestyle": {"enabled": false}}}}))
        .unwrap();
    assert!(
        wait_until(ms(100), || {
            !server.received("workspace/didChangeConfiguration").is_empty()
        })
        .await
    );
    let pushed = &server.received("workspace/didChangeConfiguration")[0];
    assert_eq!(
        pushed["params"]["settings"]["pylsp"]["plugins"]["pycodestyle"]["enabled"],
        false
    );
}

#[tokio::test(start_paused = true)]
async fn server_capabilities_are_exposed() {
    let server = FakeServer::new();
    server.set_capabilities(json!({"hoverProvider": true}));
    let (client, _registry) = connected_client(&server).await;

    let caps = client.server_capabilities().unwrap();
    assert!(caps.hover);
    assert!(!caps.completion);
    settle().await;
    assert_eq!(server.received("initialized").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn explicit_connect_supersedes_pending_retry() {
    let server = FakeServer::new();
    server.fail_next(1);
    let (client, _registry) = create_client(&server);

    client.connect("fake:2087");
    settle().await;
    assert!(client.has_pending_retry());

    client.connect("fake:2087");
    assert!(wait_until(ms(100), || client.is_connected()).await);
    assert!(!client.has_pending_retry());
    let session = client.current_session().unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(server.attempts(), 2);
    assert!(!session.is_disposed());
    assert_eq!(client.current_session().unwrap().id(), session.id());
}

#[tokio::test(start_paused = true)]
async fn zero_health_interval_still_recovers() {
    let server = FakeServer::new();
    let mut config = test_config();
    config.health_check_interval = Duration::ZERO;
    let (client, _registry) = create_client_with(&server, config);

    client.connect("fake:2087");
    assert!(wait_until(Duration::from_secs(1), || client.is_connected()).await);
    let first = client.current_session().unwrap();

    server.half_close_connections();
    settle().await;
    assert!(
        wait_until(Duration::from_secs(5), || {
            client
                .current_session()
                .map_or(false, |s| s.id() != first.id())
        })
        .await
    );
    assert_eq!(server.attempts(), 2);
}
