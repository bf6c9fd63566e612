//! End-to-end dispatch through the proxy.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::http::StatusCode;
use uuid::Uuid;

use dispatch_proxy::http::pipeline::RequestProgressListener;
use dispatch_proxy::http::{RequestId, RequestInfo};
use dispatch_proxy::ProxyServer;

mod common;

use common::{app_config, client, header_value, proxy_config, start_origin, start_proxy};

#[derive(Default)]
struct RecordingProgress {
    started: Mutex<Vec<RequestId>>,
    completed: Mutex<Vec<(RequestId, StatusCode)>>,
}

impl RequestProgressListener for RecordingProgress {
    fn on_request(&self, request: &RequestInfo) {
        self.started.lock().unwrap().push(request.id);
    }

    fn on_complete(&self, request_id: RequestId, status: StatusCode) {
        self.completed.lock().unwrap().push((request_id, status));
    }

    fn on_terminate(&self, _request_id: RequestId) {}
}

async fn origin_of(client: &reqwest::Client, url: &str) -> String {
    let res = client.get(url).send().await.expect("Proxy unreachable");
    assert_eq!(res.status(), 200);
    res.headers()
        .get("x-origin-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

#[tokio::test]
async fn round_robin_spreads_requests() {
    let a = common::start_mock_backend("from a").await;
    let b = common::start_mock_backend("from b").await;
    let proxy = start_proxy(proxy_config(vec![app_config("web", "/", &[("a", a), ("b", b)])])).await;

    let client = client();
    let mut seen = Vec::new();
    for _ in 0..4 {
        seen.push(origin_of(&client, &proxy.url("/")).await);
    }
    seen.sort();
    assert_eq!(seen, ["a", "a", "b", "b"]);

    proxy.stop().await;
}

#[tokio::test]
async fn body_and_status_come_from_origin() {
    let origin = start_origin(|head| {
        if head.starts_with("GET /missing") {
            (404, "nothing here".into())
        } else {
            (200, "hello".into())
        }
    })
    .await;
    let proxy = start_proxy(proxy_config(vec![app_config("web", "/", &[("o1", origin)])])).await;
    let client = client();

    let res = client.get(proxy.url("/hello")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.text().await.unwrap(), "hello");

    let res = client.get(proxy.url("/missing")).send().await.unwrap();
    assert_eq!(res.status(), 404);
    assert_eq!(res.text().await.unwrap(), "nothing here");

    proxy.stop().await;
}

#[tokio::test]
async fn request_id_kept_and_forwarded() {
    let origin = start_origin(|head| {
        (200, header_value(head, "x-request-id").unwrap_or_default())
    })
    .await;
    let proxy = start_proxy(proxy_config(vec![app_config("web", "/", &[("o1", origin)])])).await;
    let client = client();

    let id = Uuid::new_v4().to_string();
    let res = client
        .get(proxy.url("/"))
        .header("x-request-id", &id)
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["x-request-id"].to_str().unwrap(), id);
    assert_eq!(res.text().await.unwrap(), id);

    let res = client
        .get(proxy.url("/"))
        .header("x-request-id", "not-a-uuid")
        .send()
        .await
        .unwrap();
    let generated = res.headers()["x-request-id"].to_str().unwrap().to_string();
    assert!(Uuid::parse_str(&generated).is_ok());
    assert_eq!(res.text().await.unwrap(), generated);

    proxy.stop().await;
}

#[tokio::test]
async fn hop_by_hop_headers_not_forwarded() {
    let origin = start_origin(|head| {
        let leaked = header_value(head, "x-secret-hop").is_some()
            || header_value(head, "proxy-authorization").is_some();
        (200, if leaked { "leaked" } else { "clean" }.into())
    })
    .await;
    let proxy = start_proxy(proxy_config(vec![app_config("web", "/", &[("o1", origin)])])).await;

    let res = client()
        .get(proxy.url("/"))
        .header("connection", "x-secret-hop")
        .header("x-secret-hop", "1")
        .header("proxy-authorization", "Basic Zm9vOmJhcg==")
        .send()
        .await
        .unwrap();
    assert_eq!(res.text().await.unwrap(), "clean");

    proxy.stop().await;
}

#[tokio::test]
async fn unmatched_path_is_bad_gateway() {
    let origin = common::start_mock_backend("api").await;
    let proxy = start_proxy(proxy_config(vec![app_config("api", "/api", &[("o1", origin)])])).await;

    let res = client().get(proxy.url("/other")).send().await.unwrap();
    assert_eq!(res.status(), 502);
    assert!(res.headers().contains_key("x-request-id"));
    assert_eq!(res.text().await.unwrap(), "Site temporarily unavailable.");

    proxy.stop().await;
}

#[tokio::test]
async fn longest_prefix_and_host_select_application() {
    let root = common::start_mock_backend("root").await;
    let api = common::start_mock_backend("api").await;
    let shop = common::start_mock_backend("shop").await;

    let mut shop_app = app_config("shop", "/", &[("shop1", shop)]);
    shop_app.host = Some("shop.test".into());
    let proxy = start_proxy(proxy_config(vec![
        app_config("root", "/", &[("root1", root)]),
        app_config("api", "/api", &[("api1", api)]),
        shop_app,
    ]))
    .await;
    let client = client();

    let body = |res: reqwest::Response| async move { res.text().await.unwrap() };
    assert_eq!(body(client.get(proxy.url("/api/users")).send().await.unwrap()).await, "api");
    assert_eq!(body(client.get(proxy.url("/index")).send().await.unwrap()).await, "root");
    assert_eq!(
        body(
            client
                .get(proxy.url("/api/users"))
                .header("host", "shop.test")
                .send()
                .await
                .unwrap()
        )
        .await,
        "shop"
    );

    proxy.stop().await;
}

#[tokio::test]
async fn keep_alive_connection_serves_many_requests() {
    let origin = common::start_mock_backend("ok").await;
    let proxy = start_proxy(proxy_config(vec![app_config("web", "/", &[("o1", origin)])])).await;

    let client = reqwest::Client::builder()
        .no_proxy()
        .pool_max_idle_per_host(1)
        .build()
        .unwrap();
    for _ in 0..10 {
        let res = client.get(proxy.url("/")).send().await.unwrap();
        assert_eq!(res.text().await.unwrap(), "ok");
    }

    proxy.stop().await;
}

#[tokio::test]
async fn reloaded_origins_take_effect() {
    let a = common::start_mock_backend("a").await;
    let b = common::start_mock_backend("b").await;
    let proxy = start_proxy(proxy_config(vec![app_config("web", "/", &[("a", a), ("b", b)])])).await;

    proxy
        .updates
        .send(proxy_config(vec![app_config("web", "/", &[("b", b)])]))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let client = client();
    for _ in 0..4 {
        assert_eq!(origin_of(&client, &proxy.url("/")).await, "b");
    }

    proxy.stop().await;
}

#[tokio::test]
async fn progress_listener_sees_every_request() {
    let origin = start_origin(|head| {
        if head.starts_with("GET /missing") {
            (404, String::new())
        } else {
            (200, "ok".into())
        }
    })
    .await;
    let progress = Arc::new(RecordingProgress::default());
    let server = ProxyServer::new(proxy_config(vec![app_config("web", "/", &[("o1", origin)])]))
        .unwrap()
        .with_progress_listener(progress.clone());
    let proxy = common::start_server(server).await;
    let client = client();

    let ok = client.get(proxy.url("/")).send().await.unwrap();
    let ok_id = ok.headers()["x-request-id"].to_str().unwrap().to_string();
    ok.text().await.unwrap();
    let missing = client.get(proxy.url("/missing")).send().await.unwrap();
    missing.text().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(progress.started.lock().unwrap().len(), 2);
    let completed = progress.completed.lock().unwrap().clone();
    let statuses: Vec<StatusCode> = completed.iter().map(|(_, status)| *status).collect();
    assert_eq!(statuses, [StatusCode::OK, StatusCode::NOT_FOUND]);
    assert_eq!(completed[0].0.to_string(), ok_id);

    proxy.stop().await;
}

#[tokio::test]
async fn shutdown_stops_accepting() {
    let origin = common::start_mock_backend("ok").await;
    let proxy = start_proxy(proxy_config(vec![app_config("web", "/", &[("o1", origin)])])).await;
    let url = proxy.url("/");

    assert_eq!(client().get(&url).send().await.unwrap().status(), 200);
    proxy.stop().await;

    assert!(client().get(&url).send().await.is_err());
}
