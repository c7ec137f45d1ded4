use axum::body::{to_bytes, Body};
use axum::extract::ConnectInfo;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use proxy_checker::config::HttpServerConfig;
use proxy_checker::server::{self, AppState, RateLimitConfig, RateLimiter};
use proxy_checker::{
    CancelToken, Check, CheckerConfig, LineSink, LineSource, ProxyAddress, VerificationEngine,
};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower::ServiceExt;

/// Local HTTP server standing in for a forward proxy: every request it
/// receives is answered with `body`, as if the echo endpoint replied.
async fn spawn_stub_proxy(body: &'static str) -> ProxyAddress {
    let app = Router::new().fallback(move || async move { (StatusCode::OK, body) });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    ProxyAddress::new(Ipv4Addr::LOCALHOST, port).unwrap()
}

fn checker_config() -> CheckerConfig {
    CheckerConfig::new()
        .with_target("http://probe.test/")
        .with_timeout(Duration::from_secs(2))
        .with_concurrency(4)
}

#[tokio::test]
async fn test_only_the_echoing_proxy_is_live() {
    let proxy = spawn_stub_proxy("127.0.0.1").await;
    let engine = VerificationEngine::with_config(checker_config());

    let result = engine
        .await_lines(
            &CancelToken::new(),
            vec![proxy.to_string(), "not-a-proxy".to_string(), "10.0.0.5:8080".to_string()],
        )
        .await
        .unwrap();

    assert_eq!(result.into_vec(), vec![proxy]);
}

#[tokio::test]
async fn test_proxy_echoing_another_ip_is_rejected() {
    let proxy = spawn_stub_proxy("203.0.113.1").await;
    let engine = VerificationEngine::with_config(checker_config());

    let result = engine
        .await_lines(&CancelToken::new(), vec![proxy.to_string()])
        .await
        .unwrap();

    assert!(result.is_empty());
}

#[tokio::test]
async fn test_file_pipeline_writes_live_proxies() {
    let proxy = spawn_stub_proxy("127.0.0.1").await;
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("candidates.txt");
    let output = dir.path().join("live.txt");
    std::fs::write(&input, format!("# list\n{proxy}\ngarbage\n")).unwrap();

    let engine = VerificationEngine::with_config(checker_config());
    let cancel = CancelToken::new();
    let (tx, rx) = mpsc::channel(engine.concurrency());
    let Check { confirmed, finished } = engine.check(&cancel, rx);

    let source = LineSource::File(input);
    let sink = LineSink::File(output.clone());
    let (read, write) = tokio::join!(
        source.read(&cancel, tx),
        sink.write(&cancel, confirmed),
    );
    read.unwrap();
    write.unwrap();
    assert_eq!(finished.await.unwrap(), Ok(()));

    assert_eq!(std::fs::read_to_string(output).unwrap(), format!("{proxy}\n"));
}

#[tokio::test]
async fn test_api_checks_through_router() {
    let proxy = spawn_stub_proxy("127.0.0.1").await;
    let engine = Arc::new(VerificationEngine::with_config(checker_config()));
    let config = HttpServerConfig::default();
    let state = AppState::new(engine, &config, CancelToken::new());
    let limiter = Arc::new(RateLimiter::new(RateLimitConfig::default()));
    let app = server::router(state, limiter, config.max_request_size);

    let mut request = Request::builder()
        .method("POST")
        .uri("/api/v1/check")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_string(&[proxy.to_string(), "nope".to_string()]).unwrap()))
        .unwrap();
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))));

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let live: Vec<String> = serde_json::from_slice(&body).unwrap();
    assert_eq!(live, vec![proxy.to_string()]);
}
