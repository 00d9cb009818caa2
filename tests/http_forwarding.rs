//! Plain HTTP forwarding through the proxy: capture, rewriting and errors.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use debug_proxy::capture::CLIENT_CLOSED;
use debug_proxy::rewrite::RewriteRule;

mod common;

use common::TestProxy;

#[tokio::test]
async fn forwards_and_records_exchange() {
    let (backend, mut received) = common::start_recording_backend(200, "hello").await;
    let mut proxy = TestProxy::start(vec![]).await;

    let response = proxy
        .client()
        .get(format!("http://{backend}/api/users?page=2"))
        .header("X-Trace", "abc")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "hello");

    let request = received.recv().await.unwrap();
    assert_eq!(request.request_line(), "GET /api/users?page=2 HTTP/1.1");
    assert_eq!(request.header("host"), Some(backend.to_string().as_str()));
    assert_eq!(request.header("x-trace"), Some("abc"));

    let emitted = proxy.drain();
    assert_eq!(emitted.len(), 3);
    assert!(emitted.iter().all(|t| t.id() == emitted[0].id()));
    assert_eq!(emitted[0].status_code(), 0);

    let tx = emitted.last().unwrap();
    assert_eq!(tx.method(), "GET");
    assert_eq!(tx.url(), format!("http://{backend}/api/users?page=2"));
    assert_eq!(tx.status_code(), 200);
    assert!(!tx.is_modified());
    assert!(!tx.is_intercepted());
    assert_eq!(tx.response_body(), "hello");
    assert!(tx.request_headers().contains("x-trace: abc"));
    assert!(tx.duration_ms().is_some());

    assert_eq!(proxy.history.len(), 1);
    proxy.running.stop().await;
}

#[tokio::test]
async fn request_body_is_forwarded_and_captured() {
    let (backend, mut received) = common::start_recording_backend(201, "created").await;
    let mut proxy = TestProxy::start(vec![]).await;

    let response = proxy
        .client()
        .post(format!("http://{backend}/orders"))
        .body("{\"item\":42}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);

    let request = received.recv().await.unwrap();
    assert_eq!(request.body, b"{\"item\":42}");

    let tx = proxy.drain().pop().unwrap();
    assert_eq!(tx.method(), "POST");
    assert_eq!(tx.request_body(), "{\"item\":42}");
    proxy.running.stop().await;
}

#[tokio::test]
async fn matching_rule_rewrites_status() {
    let backend = common::start_mock_backend(404, "not here").await;
    let mut proxy = TestProxy::start(vec![RewriteRule::new("404", "200", "/api/users")]).await;

    let response = proxy
        .client()
        .get(format!("http://{backend}/api/users/7"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "not here");

    let tx = proxy.drain().pop().unwrap();
    assert_eq!(tx.original_status_code(), 404);
    assert_eq!(tx.status_code(), 200);
    assert!(tx.is_modified());
    assert!(tx.render_response().starts_with("Status: 404 → 200 (MODIFIED)"));
    proxy.running.stop().await;
}

#[tokio::test]
async fn non_matching_endpoint_passes_through() {
    let backend = common::start_mock_backend(404, "not here").await;
    let mut proxy = TestProxy::start(vec![RewriteRule::new("404", "200", "/api/users")]).await;

    let response = proxy
        .client()
        .get(format!("http://{backend}/api/orders"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    let tx = proxy.drain().pop().unwrap();
    assert_eq!(tx.status_code(), 404);
    assert!(!tx.is_modified());
    proxy.running.stop().await;
}

#[tokio::test]
async fn class_wildcard_and_first_match_wins() {
    let backend = common::start_mock_backend(502, "upstream down").await;
    let proxy = TestProxy::start(vec![
        RewriteRule::new("5xx", "503", ""),
        RewriteRule::new("502", "200", ""),
    ])
    .await;

    let response = proxy
        .client()
        .get(format!("http://{backend}/"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 503);
    proxy.running.stop().await;
}

#[tokio::test]
async fn rule_changes_apply_to_next_response() {
    let backend = common::start_mock_backend(500, "boom").await;
    let proxy = TestProxy::start(vec![]).await;
    let client = proxy.client();
    let url = format!("http://{backend}/health");

    assert_eq!(client.get(&url).send().await.unwrap().status(), 500);

    proxy
        .rewrite
        .add_rule(RewriteRule::new("500", "200", "/health"))
        .unwrap();
    assert_eq!(client.get(&url).send().await.unwrap().status(), 200);

    proxy.rewrite.set_all_enabled(false);
    assert_eq!(client.get(&url).send().await.unwrap().status(), 500);
    proxy.running.stop().await;
}

#[tokio::test]
async fn unreachable_backend_is_bad_gateway() {
    let backend = common::closed_port().await;
    let mut proxy = TestProxy::start(vec![]).await;

    let response = proxy
        .client()
        .get(format!("http://{backend}/"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 502);
    assert_eq!(
        response
            .headers()
            .get("connection")
            .and_then(|v| v.to_str().ok()),
        Some("close")
    );

    let tx = proxy.drain().pop().unwrap();
    assert_eq!(tx.status_code(), 502);
    assert_eq!(tx.original_status_code(), 502);
    assert!(!tx.is_modified());
    assert!(tx.response_body().starts_with("Bad Gateway: "));
    proxy.running.stop().await;
}

#[tokio::test]
async fn history_filter_finds_exchanges() {
    let backend = common::start_mock_backend(200, "ok").await;
    let proxy = TestProxy::start(vec![]).await;
    let client = proxy.client();

    for path in ["/users", "/orders", "/users/1"] {
        client
            .get(format!("http://{backend}{path}"))
            .send()
            .await
            .unwrap();
    }

    assert!(common::eventually(|| proxy.history.len() == 3).await);
    assert_eq!(proxy.history.filter("USERS").len(), 2);
    assert_eq!(proxy.history.filter("200").len(), 3);
    assert_eq!(proxy.history.filter("").len(), 3);
    proxy.running.stop().await;
}

#[tokio::test]
async fn concurrent_clients_are_independent() {
    let backend = common::start_programmable_backend(|request| async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        (200, request.request_line().to_string())
    })
    .await;
    let proxy = TestProxy::start(vec![]).await;
    let client = proxy.client();

    let requests = (0..10).map(|i| {
        let client = client.clone();
        async move {
            client
                .get(format!("http://{backend}/item/{i}"))
                .send()
                .await
                .unwrap()
                .text()
                .await
                .unwrap()
        }
    });
    let bodies = futures_util::future::join_all(requests).await;
    for (i, body) in bodies.iter().enumerate() {
        assert_eq!(body, &format!("GET /item/{i} HTTP/1.1"));
    }
    assert!(common::eventually(|| proxy.history.len() == 10).await);
    proxy.running.stop().await;
}

#[tokio::test]
async fn client_disconnect_mid_exchange_is_recorded_as_500() {
    let backend = common::start_programmable_backend(|_| async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        (200, "too late".to_string())
    })
    .await;
    let proxy = TestProxy::start(vec![]).await;

    let mut client = TcpStream::connect(proxy.addr()).await.unwrap();
    let request = format!("GET http://{backend}/slow HTTP/1.1\r\nHost: {backend}\r\n\r\n");
    client.write_all(request.as_bytes()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(client);

    assert!(common::eventually(|| proxy.history.list().iter().any(|t| !t.is_pending())).await);
    let tx = proxy.history.list().pop().unwrap();
    assert_eq!(tx.status_code(), 500);
    assert_eq!(tx.response_body(), CLIENT_CLOSED);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(proxy.history.list()[0].status_code(), 500);
    proxy.running.stop().await;
}

#[tokio::test]
async fn truncated_backend_body_is_bad_gateway() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let backend = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        common::read_request(&mut socket).await;
        let _ = socket
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nhello")
            .await;
    });
    let mut proxy = TestProxy::start(vec![]).await;

    let response = proxy
        .client()
        .get(format!("http://{backend}/partial"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 502);

    let tx = proxy.drain().pop().unwrap();
    assert_eq!(tx.status_code(), 502);
    assert!(tx.response_body().starts_with("Bad Gateway: "));
    proxy.running.stop().await;
}
