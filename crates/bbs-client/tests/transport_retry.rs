use bbs_client::{AnonymousAuthenticator, ApiError, AuthenticatedTransport, ConnectionPool};
use bbs_core::{BackendKind, TransportConfig};
use bbs_infra::{RetryConfig, RetryPolicy, TransportErrorKind};
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

fn transport(retry: RetryConfig) -> AuthenticatedTransport {
    let pool = ConnectionPool::new(BackendKind::Cloud, &TransportConfig::default()).unwrap();
    AuthenticatedTransport::new(
        Arc::new(pool),
        Arc::new(AnonymousAuthenticator),
        RetryPolicy::new(retry),
    )
}

fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig::default()
        .with_max_retries(max_retries)
        .with_initial_delay(Duration::from_millis(10))
        .with_max_delay(Duration::from_millis(50))
}

fn url(server: &MockServer, path: &str) -> Url {
    Url::parse(&format!("{}{}", server.uri(), path)).unwrap()
}

#[tokio::test]
async fn service_unavailable_is_retried_until_success() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .with_priority(1)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let body = transport(fast_retry(5))
        .get(&url(&server, "/flaky"))
        .await
        .unwrap();
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn retries_stop_at_the_configured_maximum() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&server)
        .await;

    let err = transport(fast_retry(2))
        .get(&url(&server, "/down"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), Some(429));
}

#[tokio::test]
async fn server_errors_other_than_503_are_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&server)
        .await;

    let err = transport(fast_retry(5))
        .get(&url(&server, "/broken"))
        .await
        .unwrap_err();
    match err {
        ApiError::Request { status, body, .. } => {
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn non_idempotent_post_is_not_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/statuses"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let err = transport(fast_retry(5))
        .post_json(&url(&server, "/statuses"), &serde_json::json!({"k": 1}), false)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), Some(503));
}

#[tokio::test]
async fn not_found_maps_to_not_found() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let err = transport(fast_retry(5))
        .get(&url(&server, "/missing"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn connection_refused_is_not_retried() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let retry = RetryConfig::default()
        .with_max_retries(5)
        .with_initial_delay(Duration::from_secs(5));
    let started = Instant::now();
    let err = transport(retry)
        .get(&Url::parse(&format!("http://127.0.0.1:{}/x", port)).unwrap())
        .await
        .unwrap_err();

    match err {
        ApiError::Transport { kind, url, .. } => {
            assert_eq!(kind, TransportErrorKind::ConnectionRefused);
            assert!(url.contains(&port.to_string()));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn cancellation_interrupts_retry_wait() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let retry = RetryConfig::default()
        .with_max_retries(5)
        .with_initial_delay(Duration::from_secs(30));
    let transport = transport(retry);
    let token = transport.cancellation().clone();
    let target = url(&server, "/slow");

    let started = Instant::now();
    let (result, _) = tokio::join!(transport.get(&target), async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });

    assert_eq!(result.unwrap_err(), ApiError::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(30));
}
