//! End-to-end tunnel tests: registration, request forwarding, shutdown

use super::{request_frame, start_local_server, FakeProxy, API_KEY};
use agentlink::{AgentTunnel, AuthErrorCode, TunnelError, TunnelState};
use serde_json::json;
use std::sync::{Arc, Mutex};

fn tunnel_for(proxy: &FakeProxy) -> AgentTunnel {
    AgentTunnel::builder()
        .server_url(proxy.url())
        .api_key(API_KEY)
        .local_host("127.0.0.1")
        .build()
        .expect("Failed to build tunnel")
}

#[tokio::test]
async fn test_start_registers_tunnel() {
    let mut proxy = FakeProxy::start().await;
    let tunnel = tunnel_for(&proxy);

    let starter = tunnel.clone();
    let start = tokio::spawn(async move { starter.start(7378).await });

    let mut conn = proxy.accept().await;
    let auth = conn.register("tun-42").await;
    assert_eq!(auth, json!({ "type": "auth", "apiKey": API_KEY, "localPort": 7378 }));

    let registration = start.await.unwrap().expect("start failed");
    assert_eq!(registration.tunnel_id, "tun-42");
    assert_eq!(registration.public_url, "https://tun-42.agents.test");
    assert!(tunnel.is_connected().await);
    assert_eq!(tunnel.state(), TunnelState::Connected);

    tunnel.stop().await.unwrap();
    assert_eq!(tunnel.state(), TunnelState::Stopped);
    assert!(conn.recv().await.is_none(), "tunnel should disconnect");
}

#[tokio::test]
async fn test_json_request_is_forwarded() {
    let local_port = start_local_server("application/json", br#"{"ok":true}"#).await;
    let mut proxy = FakeProxy::start().await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let tunnel = {
        let seen = seen.clone();
        AgentTunnel::builder()
            .server_url(proxy.url())
            .api_key(API_KEY)
            .local_host("127.0.0.1")
            .on_request(move |request| {
                seen.lock()
                    .unwrap()
                    .push(format!("{} {}", request.method, request.path));
            })
            .build()
            .unwrap()
    };

    let starter = tunnel.clone();
    let start = tokio::spawn(async move { starter.start(local_port).await });
    let mut conn = proxy.accept().await;
    conn.register("tun-1").await;
    start.await.unwrap().unwrap();

    conn.send(&request_frame("req-1", "GET", "/status"));
    let frame = conn.expect_frame().await;
    assert_eq!(frame["type"], "response");
    let data = &frame["data"];
    assert_eq!(data["id"], "req-1");
    assert_eq!(data["status"], 200);
    assert_eq!(data["body"], r#"{"ok":true}"#);
    assert_eq!(data["headers"]["content-length"], "11");
    assert_eq!(data["headers"]["content-type"], "application/json");
    assert!(data["headers"].get("x-openserv-encoding").is_none());
    assert!(data["headers"].get("connection").is_none());
    assert_eq!(*seen.lock().unwrap(), vec!["GET /status".to_string()]);

    tunnel.stop().await.unwrap();
}

#[tokio::test]
async fn test_binary_response_is_base64() {
    static PNG: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];
    let local_port = start_local_server("image/png", &PNG).await;
    let mut proxy = FakeProxy::start().await;
    let tunnel = tunnel_for(&proxy);

    let starter = tunnel.clone();
    let start = tokio::spawn(async move { starter.start(local_port).await });
    let mut conn = proxy.accept().await;
    conn.register("tun-1").await;
    start.await.unwrap().unwrap();

    conn.send(&request_frame("req-png", "GET", "/logo.png"));
    let frame = conn.expect_frame().await;
    let data = &frame["data"];
    assert_eq!(data["body"], "iVBORw0KGgo=");
    assert_eq!(data["headers"]["x-openserv-encoding"], "base64");
    assert_eq!(data["headers"]["content-length"], "12");

    tunnel.stop().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_local_server_gets_502() {
    let local_port = super::get_free_port();
    let mut proxy = FakeProxy::start().await;
    let tunnel = tunnel_for(&proxy);

    let starter = tunnel.clone();
    let start = tokio::spawn(async move { starter.start(local_port).await });
    let mut conn = proxy.accept().await;
    conn.register("tun-1").await;
    start.await.unwrap().unwrap();

    conn.send(&request_frame("req-down", "POST", "/run"));
    let frame = conn.expect_frame().await;
    let data = &frame["data"];
    assert_eq!(data["id"], "req-down");
    assert_eq!(data["status"], 502);
    let body: serde_json::Value = serde_json::from_str(data["body"].as_str().unwrap()).unwrap();
    assert_eq!(body["error"], "Bad Gateway");
    assert!(tunnel.is_connected().await, "forward errors must not drop the tunnel");

    tunnel.stop().await.unwrap();
}

#[tokio::test]
async fn test_invalid_request_gets_400() {
    let mut proxy = FakeProxy::start().await;
    let tunnel = tunnel_for(&proxy);

    let starter = tunnel.clone();
    let start = tokio::spawn(async move { starter.start(7378).await });
    let mut conn = proxy.accept().await;
    conn.register("tun-1").await;
    start.await.unwrap().unwrap();

    conn.send(&request_frame("req-bad", "GET", "no-slash"));
    let frame = conn.expect_frame().await;
    assert_eq!(frame["data"]["status"], 400);

    tunnel.stop().await.unwrap();
}

#[tokio::test]
async fn test_auth_error_rejects_start() {
    let mut proxy = FakeProxy::start().await;
    let errors = Arc::new(Mutex::new(Vec::new()));
    let tunnel = {
        let errors = errors.clone();
        AgentTunnel::builder()
            .server_url(proxy.url())
            .api_key("wrong-key")
            .on_error(move |err| errors.lock().unwrap().push(err.to_string()))
            .build()
            .unwrap()
    };

    let starter = tunnel.clone();
    let start = tokio::spawn(async move { starter.start(7378).await });
    let mut conn = proxy.accept().await;
    let auth = conn.expect_frame().await;
    assert_eq!(auth["apiKey"], "wrong-key");
    conn.send(&json!({ "type": "error", "error": "AUTH_FAILED", "message": "Invalid API key" }));

    match start.await.unwrap() {
        Err(TunnelError::Authentication { code, message }) => {
            assert_eq!(code, AuthErrorCode::Failed);
            assert_eq!(message, "Invalid API key");
        }
        other => panic!("expected auth failure, got {other:?}"),
    }
    assert_eq!(tunnel.state(), TunnelState::Failed);
    assert_eq!(errors.lock().unwrap().len(), 1);
    assert!(conn.recv().await.is_none(), "failed tunnel should disconnect");
}

#[tokio::test]
async fn test_missing_api_key_fails_without_connecting() {
    let mut proxy = FakeProxy::start().await;
    let tunnel = AgentTunnel::builder()
        .server_url(proxy.url())
        .build()
        .unwrap();

    let err = tunnel.start(7378).await.unwrap_err();
    assert!(matches!(err, TunnelError::Config(_)));
    assert_eq!(tunnel.state(), TunnelState::Failed);

    let attempt =
        tokio::time::timeout(std::time::Duration::from_millis(200), proxy.accept()).await;
    assert!(attempt.is_err(), "no connection should be attempted");
}

#[tokio::test]
async fn test_concurrent_stops_share_shutdown() {
    let mut proxy = FakeProxy::start().await;
    let tunnel = tunnel_for(&proxy);

    let starter = tunnel.clone();
    let start = tokio::spawn(async move { starter.start(7378).await });
    let mut conn = proxy.accept().await;
    conn.register("tun-1").await;
    start.await.unwrap().unwrap();

    let (a, b) = tokio::join!(tunnel.stop(), tunnel.stop());
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(tunnel.state(), TunnelState::Stopped);
    tunnel.stop().await.unwrap();
}
