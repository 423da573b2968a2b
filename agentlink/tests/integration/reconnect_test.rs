//! Reconnect behaviour against a real WebSocket proxy

use super::{request_frame, start_local_server, FakeProxy, API_KEY};
use agentlink::{AgentTunnel, BackoffConfig, TunnelError, TunnelState};
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;

#[tokio::test]
async fn test_reconnects_after_proxy_hangup() {
    let local_port = start_local_server("text/plain", b"pong").await;
    let mut proxy = FakeProxy::start().await;
    let (connected_tx, mut connected) = mpsc::unbounded_channel();
    let tunnel = AgentTunnel::builder()
        .server_url(proxy.url())
        .api_key(API_KEY)
        .local_host("127.0.0.1")
        .on_connected(move |is_reconnect| {
            let _ = connected_tx.send(is_reconnect);
        })
        .build()
        .unwrap();

    let starter = tunnel.clone();
    let start = tokio::spawn(async move { starter.start(local_port).await });
    let first = {
        let mut conn = proxy.accept().await;
        conn.register("tun-1").await;
        conn
    };
    start.await.unwrap().unwrap();
    assert_eq!(connected.recv().await, Some(false));

    first.hangup();

    // First retry is immediate.
    let mut second = proxy.accept().await;
    let auth = second.register("tun-1").await;
    assert_eq!(auth["localPort"], local_port);
    assert_eq!(connected.recv().await, Some(true));
    assert!(tunnel.is_connected().await);

    second.send(&request_frame("after-reconnect", "GET", "/ping"));
    let frame = second.expect_frame().await;
    assert_eq!(frame["data"]["id"], "after-reconnect");
    assert_eq!(frame["data"]["body"], "pong");

    tunnel.stop().await.unwrap();
}

#[tokio::test]
async fn test_graceful_reconnect_with_ack() {
    let mut proxy = FakeProxy::start().await;
    let tunnel = AgentTunnel::builder()
        .server_url(proxy.url())
        .api_key(API_KEY)
        .build()
        .unwrap();

    let starter = tunnel.clone();
    let start = tokio::spawn(async move { starter.start(7378).await });
    let mut first = proxy.accept().await;
    first.register("tun-1").await;
    start.await.unwrap().unwrap();

    let reconnector = tunnel.clone();
    let graceful = tokio::spawn(async move { reconnector.graceful_reconnect().await });

    let announce = first.expect_frame().await;
    assert_eq!(announce, json!({ "type": "will-reconnect" }));
    assert!(!graceful.is_finished());
    first.send(&json!({ "type": "will-reconnect-ack", "data": { "bufferTimeout": 30000 } }));

    assert!(first.recv().await.is_none(), "old connection should be dropped");
    let mut second = proxy.accept().await;
    second.register("tun-1").await;

    tokio::time::timeout(Duration::from_secs(5), graceful)
        .await
        .expect("graceful reconnect did not settle")
        .unwrap()
        .unwrap();
    assert_eq!(tunnel.state(), TunnelState::Connected);

    tunnel.stop().await.unwrap();
}

#[tokio::test]
async fn test_retries_exhausted_when_proxy_is_gone() {
    let mut proxy = FakeProxy::start().await;
    let tunnel = AgentTunnel::builder()
        .server_url(proxy.url())
        .api_key(API_KEY)
        .max_reconnect_attempts(2)
        .backoff(BackoffConfig {
            base: Duration::from_millis(10),
            max: Duration::from_millis(20),
        })
        .build()
        .unwrap();

    let starter = tunnel.clone();
    let start = tokio::spawn(async move { starter.start(7378).await });

    // Accept the socket but never authenticate, then hang up each time.
    for _ in 0..3 {
        let mut conn = proxy.accept().await;
        let _auth = conn.expect_frame().await;
        conn.hangup();
    }

    let result = tokio::time::timeout(Duration::from_secs(5), start)
        .await
        .expect("start did not settle")
        .unwrap();
    assert!(matches!(result, Err(TunnelError::MaxRetries { attempts: 2 })));
    assert_eq!(tunnel.state(), TunnelState::Failed);
}
