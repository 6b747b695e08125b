//! Auto-reconnect behavior across a server restart

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::broadcast;

use convoy_core::KeyPair;
use convoy_events::{EventFilter, EventStream};
use convoy_fleet::InMemoryDirectory;
use convoy_rpc::{ClientEvent, RpcClient, RpcClientConfig, RpcServer, RpcServerConfig};

fn echo_server() -> RpcServer {
    let server = RpcServer::new(RpcServerConfig::default());
    server.register("echo", |params, _from| async move {
        Ok(params.unwrap_or(Value::Null))
    });
    server
}

fn reconnecting_client(subscriptions: Vec<EventFilter>) -> RpcClient {
    RpcClient::new(
        KeyPair::generate(),
        Arc::new(InMemoryDirectory::new()),
        RpcClientConfig {
            auto_reconnect: true,
            reconnect_initial_ms: 100,
            reconnect_factor: 2,
            reconnect_max_ms: 1_000,
            reconnect_max_attempts: 8,
            subscriptions,
            ..Default::default()
        },
    )
}

async fn wait_for(
    events: &mut broadcast::Receiver<ClientEvent>,
    description: &str,
    predicate: impl Fn(&ClientEvent) -> bool,
) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(15), async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event channel closed while waiting for {description}: {e}"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {description}"))
}

/// Rebind the same address, retrying while the old listener drains.
async fn serve_on(server: &RpcServer, addr: SocketAddr) {
    for _ in 0..50 {
        if server.serve(&addr.to_string()).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("could not rebind {addr}");
}

#[tokio::test]
async fn client_reconnects_after_server_restart() {
    let first = echo_server();
    let addr = first.serve("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{addr}");

    let client = reconnecting_client(Vec::new());
    let mut events = client.events();

    client.request(&url, "echo", None).await.unwrap();
    wait_for(&mut events, "initial connect", |e| {
        matches!(e, ClientEvent::Connected { .. })
    })
    .await;

    first.shutdown();
    wait_for(&mut events, "disconnect", |e| {
        matches!(e, ClientEvent::Disconnected { .. })
    })
    .await;

    // The client starts probing with backoff while the endpoint is down.
    wait_for(&mut events, "reconnect attempt", |e| {
        matches!(e, ClientEvent::Reconnecting { .. })
    })
    .await;

    let second = echo_server();
    serve_on(&second, addr).await;

    wait_for(&mut events, "reconnect", |e| {
        matches!(e, ClientEvent::Connected { .. })
    })
    .await;

    // The reopened link carries requests again.
    let result = client
        .request(&url, "echo", Some(serde_json::json!("back")))
        .await
        .unwrap();
    assert_eq!(result, serde_json::json!("back"));

    client.close().await;
    second.shutdown();
}

#[tokio::test]
async fn reconnect_gives_up_after_max_attempts() {
    let server = echo_server();
    let addr = server.serve("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{addr}");

    let client = RpcClient::new(
        KeyPair::generate(),
        Arc::new(InMemoryDirectory::new()),
        RpcClientConfig {
            auto_reconnect: true,
            reconnect_initial_ms: 50,
            reconnect_factor: 2,
            reconnect_max_ms: 100,
            reconnect_max_attempts: 2,
            ..Default::default()
        },
    );
    let mut events = client.events();

    client.request(&url, "echo", None).await.unwrap();
    server.shutdown();

    let mut attempts = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Ok(ClientEvent::Reconnecting { attempt, .. })) => attempts = attempt,
            Ok(Ok(_)) => continue,
            Ok(Err(_)) | Err(_) => break,
        }
        if attempts == 2 {
            break;
        }
    }
    assert_eq!(attempts, 2);

    // Exhausted: no link, so a request opens a fresh one and fails fast.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(client.request(&url, "echo", None).await.is_err());

    client.close().await;
}

#[tokio::test]
async fn subscriptions_are_resent_after_reconnect() {
    let stream = EventStream::new(100).unwrap();
    let first = RpcServer::new(RpcServerConfig::default());
    first.attach_events(&stream);
    let addr = first.serve("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{addr}");

    let client = reconnecting_client(vec![EventFilter::for_types(["error"])]);
    let mut events = client.events();
    let mut remote = client.remote_events();

    client.connect(&url).await.unwrap();
    wait_for(&mut events, "initial connect", |e| {
        matches!(e, ClientEvent::Connected { .. })
    })
    .await;

    first.shutdown();
    wait_for(&mut events, "disconnect", |e| {
        matches!(e, ClientEvent::Disconnected { .. })
    })
    .await;

    // Restart with a fresh stream on the same address.
    let replacement_stream = EventStream::new(100).unwrap();
    let second = RpcServer::new(RpcServerConfig::default());
    second.attach_events(&replacement_stream);
    serve_on(&second, addr).await;

    wait_for(&mut events, "reconnect", |e| {
        matches!(e, ClientEvent::Connected { .. })
    })
    .await;
    // Let the re-sent subscribe frame land server-side.
    tokio::time::sleep(Duration::from_millis(300)).await;
    while remote.try_recv().is_ok() {}

    // The filter survived the reconnect: status is dropped, error arrives.
    replacement_stream.emit("status", serde_json::json!("skip"), None);
    replacement_stream.emit("error", serde_json::json!("keep"), None);

    let event = tokio::time::timeout(Duration::from_secs(5), remote.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.event_type.as_str(), "error");
    assert_eq!(event.data, serde_json::json!("keep"));

    client.close().await;
    second.shutdown();
}
