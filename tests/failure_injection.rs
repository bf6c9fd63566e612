//! Failure injection tests for the reverse proxy.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

mod common;

use common::{app_config, client, proxy_config, start_origin, start_proxy};

fn origin_header(res: &reqwest::Response) -> Option<String> {
    res.headers()
        .get("x-origin-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[tokio::test]
async fn unreachable_origin_falls_over_to_next() {
    let dead = common::refused_addr().await;
    let alive = common::start_mock_backend("alive").await;
    let mut app = app_config("web", "/", &[("dead", dead), ("alive", alive)]);
    app.max_attempts = 2;
    let proxy = start_proxy(proxy_config(vec![app])).await;

    let client = client();
    for _ in 0..4 {
        let res = client.get(proxy.url("/")).send().await.expect("Proxy unreachable");
        assert_eq!(res.status(), 200);
        assert_eq!(origin_header(&res).as_deref(), Some("alive"));
    }

    proxy.stop().await;
}

#[tokio::test]
async fn all_origins_unreachable_is_bad_gateway() {
    let dead = common::refused_addr().await;
    let proxy = start_proxy(proxy_config(vec![app_config("web", "/", &[("dead", dead)])])).await;

    let res = client().get(proxy.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 502);
    assert_eq!(origin_header(&res).as_deref(), Some("dead"));
    assert_eq!(res.text().await.unwrap(), "Site temporarily unavailable.");

    proxy.stop().await;
}

#[tokio::test]
async fn slow_origin_times_out() {
    let silent = common::start_silent_origin().await;
    let mut config = proxy_config(vec![app_config("web", "/", &[("slow", silent)])]);
    config.timeouts.response_ms = 200;
    let proxy = start_proxy(config).await;

    let started = std::time::Instant::now();
    let res = client().get(proxy.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 504);
    assert!(started.elapsed() < Duration::from_secs(5));

    proxy.stop().await;
}

#[tokio::test]
async fn garbage_response_is_bad_gateway() {
    let garbage = common::start_raw_origin(b"this is not http\r\n\r\n").await;
    let proxy = start_proxy(proxy_config(vec![app_config("web", "/", &[("junk", garbage)])])).await;

    let res = client().get(proxy.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 502);
    assert_eq!(origin_header(&res).as_deref(), Some("junk"));

    proxy.stop().await;
}

#[tokio::test]
async fn connection_closed_without_response_is_bad_gateway() {
    let closing = common::start_raw_origin(b"").await;
    let proxy = start_proxy(proxy_config(vec![app_config("web", "/", &[("c", closing)])])).await;

    let res = client().get(proxy.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 502);

    proxy.stop().await;
}

#[tokio::test]
async fn origin_server_error_passed_through() {
    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    let origin = start_origin(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        (503, "origin says no".into())
    })
    .await;
    let proxy = start_proxy(proxy_config(vec![app_config("web", "/", &[("o1", origin)])])).await;

    let res = client().get(proxy.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 503);
    assert_eq!(origin_header(&res).as_deref(), Some("o1"));
    assert_eq!(res.text().await.unwrap(), "origin says no");
    // Responses from an origin are never retried elsewhere
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    proxy.stop().await;
}

#[tokio::test]
async fn failing_health_checks_remove_origin() {
    let sick = start_origin(|head| {
        if head.starts_with("GET /health") {
            (500, "sick".into())
        } else {
            (200, "sick".into())
        }
    })
    .await;
    let well = common::start_mock_backend("well").await;

    let mut config = proxy_config(vec![app_config("web", "/", &[("sick", sick), ("well", well)])]);
    config.health_check.enabled = true;
    config.health_check.interval_ms = 50;
    config.health_check.unhealthy_threshold = 1;
    let proxy = start_proxy(config).await;

    tokio::time::sleep(Duration::from_millis(400)).await;

    let client = client();
    for _ in 0..4 {
        let res = client.get(proxy.url("/")).send().await.unwrap();
        assert_eq!(origin_header(&res).as_deref(), Some("well"));
    }

    proxy.stop().await;
}

/// Send raw bytes to the proxy and read until it closes the connection.
async fn raw_exchange(proxy: &common::RunningProxy, request: Vec<u8>) -> String {
    let mut socket = TcpStream::connect(proxy.addr).await.unwrap();
    // The proxy stops reading once it rejects the head
    let _ = socket.write_all(&request).await;

    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), socket.read_to_end(&mut response))
        .await
        .expect("proxy did not close the connection")
        .ok();
    String::from_utf8_lossy(&response).into_owned()
}

fn assert_rejected(response: &str, status_line: &str, body: &str) {
    assert!(response.starts_with(status_line), "unexpected response: {response:?}");
    let (head, rest) = response.split_once("\r\n\r\n").unwrap();
    assert_eq!(common::header_value(head, "connection").as_deref(), Some("close"));
    assert_eq!(
        common::header_value(head, "content-length"),
        Some(body.len().to_string())
    );
    assert_eq!(rest, body);
}

#[tokio::test]
async fn too_many_headers_is_payload_too_large() {
    let origin = common::start_mock_backend("unused").await;
    let proxy = start_proxy(proxy_config(vec![app_config("web", "/", &[("o1", origin)])])).await;

    let mut request = String::from("GET / HTTP/1.1\r\nHost: proxy\r\n");
    for i in 0..200 {
        request.push_str(&format!("x-filler-{i}: {i}\r\n"));
    }
    request.push_str("\r\n");

    let response = raw_exchange(&proxy, request.into_bytes()).await;
    assert_rejected(&response, "HTTP/1.1 413", "Payload Too Large");

    proxy.stop().await;
}

#[tokio::test]
async fn oversized_header_is_payload_too_large() {
    let origin = common::start_mock_backend("unused").await;
    let proxy = start_proxy(proxy_config(vec![app_config("web", "/", &[("o1", origin)])])).await;

    let request = format!(
        "GET / HTTP/1.1\r\nHost: proxy\r\nx-big: {}\r\n\r\n",
        "v".repeat(500 * 1024)
    );

    let response = raw_exchange(&proxy, request.into_bytes()).await;
    assert_rejected(&response, "HTTP/1.1 413", "Payload Too Large");

    // The listener keeps serving
    let res = client().get(proxy.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 200);

    proxy.stop().await;
}

#[tokio::test]
async fn slow_request_head_is_request_timeout() {
    let origin = common::start_mock_backend("unused").await;
    let mut config = proxy_config(vec![app_config("web", "/", &[("o1", origin)])]);
    config.timeouts.header_read_secs = 1;
    let proxy = start_proxy(config).await;

    let started = std::time::Instant::now();
    let response = raw_exchange(&proxy, b"GET / HTTP/1.1\r\nHost: proxy\r\n".to_vec()).await;
    assert_rejected(&response, "HTTP/1.1 408", "Request Timeout");
    assert!(started.elapsed() >= Duration::from_millis(900));

    proxy.stop().await;
}

#[tokio::test]
async fn idle_connection_closed_without_response() {
    let origin = common::start_mock_backend("unused").await;
    let mut config = proxy_config(vec![app_config("web", "/", &[("o1", origin)])]);
    config.timeouts.header_read_secs = 1;
    let proxy = start_proxy(config).await;

    let response = raw_exchange(&proxy, Vec::new()).await;
    assert_eq!(response, "");

    proxy.stop().await;
}
