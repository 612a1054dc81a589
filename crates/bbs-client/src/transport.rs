//! Authenticated HTTP transport
//!
//! Every request runs through the retry loop, is bounded by the pool's
//! per-route and total limits, and aborts promptly when the caller's
//! cancellation token fires.

use crate::auth::Authenticator;
use crate::error::{ApiError, Result};
use bbs_core::{BackendKind, TransportConfig};
use bbs_infra::{
    parse_retry_after, Failure, RetryContext, RetryPolicy, RetryState, TransportErrorKind,
};
use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use reqwest::{header, Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

static CLOUD_POOL: OnceCell<Arc<ConnectionPool>> = OnceCell::new();
static SERVER_POOL: OnceCell<Arc<ConnectionPool>> = OnceCell::new();

/// HTTP client plus concurrency limits, shared per backend kind.
pub struct ConnectionPool {
    kind: BackendKind,
    client: Client,
    total: Arc<Semaphore>,
    per_route: DashMap<String, Arc<Semaphore>>,
    max_per_route: usize,
}

struct PoolPermit {
    _route: OwnedSemaphorePermit,
    _total: OwnedSemaphorePermit,
}

impl ConnectionPool {
    pub fn new(kind: BackendKind, config: &TransportConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.socket_timeout())
            .pool_idle_timeout(config.idle_reclaim())
            .pool_max_idle_per_host(config.max_connections_per_route)
            .user_agent(format!("bbs-client/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            kind,
            client,
            total: Arc::new(Semaphore::new(config.max_connections_total.max(1))),
            per_route: DashMap::new(),
            max_per_route: config.max_connections_per_route.max(1),
        })
    }

    /// Process-wide pool for a backend kind, built from the first caller's
    /// configuration.
    pub fn shared(kind: BackendKind, config: &TransportConfig) -> Result<Arc<Self>> {
        let cell = match kind {
            BackendKind::Cloud => &CLOUD_POOL,
            BackendKind::Server => &SERVER_POOL,
        };
        cell.get_or_try_init(|| Self::new(kind, config).map(Arc::new))
            .cloned()
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    /// Free slots in the total budget.
    pub fn available_permits(&self) -> usize {
        self.total.available_permits()
    }

    async fn acquire(&self, route: &str) -> Result<PoolPermit> {
        let route_limit = Arc::clone(
            self.per_route
                .entry(route.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.max_per_route)))
                .value(),
        );
        let closed = |_| ApiError::Configuration("connection pool closed".to_string());

        let route_permit = route_limit.acquire_owned().await.map_err(closed)?;
        let total_permit = Arc::clone(&self.total)
            .acquire_owned()
            .await
            .map_err(closed)?;

        Ok(PoolPermit {
            _route: route_permit,
            _total: total_permit,
        })
    }
}

struct RawResponse {
    status: StatusCode,
    retry_after: Option<Duration>,
    body: Bytes,
}

enum SendFailure {
    Cancelled,
    Transport {
        kind: TransportErrorKind,
        message: String,
    },
    Fatal(ApiError),
}

/// Verb-level request primitives decorated by an [`Authenticator`].
#[derive(Clone)]
pub struct AuthenticatedTransport {
    pool: Arc<ConnectionPool>,
    authenticator: Arc<dyn Authenticator>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl std::fmt::Debug for AuthenticatedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticatedTransport")
            .field("kind", &self.pool.kind)
            .field("authenticator", &self.authenticator)
            .finish()
    }
}

impl AuthenticatedTransport {
    pub fn new(
        pool: Arc<ConnectionPool>,
        authenticator: Arc<dyn Authenticator>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            pool,
            authenticator,
            retry,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn authenticator(&self) -> &Arc<dyn Authenticator> {
        &self.authenticator
    }

    /// GET returning the body as text.
    pub async fn get(&self, url: &Url) -> Result<String> {
        let body = self.get_bytes(url).await?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T> {
        let body = self.get_bytes(url).await?;
        decode(url, &body)
    }

    /// GET collecting the raw body.
    pub async fn get_bytes(&self, url: &Url) -> Result<Bytes> {
        let response = self.execute(Method::GET, url, None, false).await?;
        into_body(url, response)
    }

    /// GET returning only the final status code.
    pub async fn get_status(&self, url: &Url) -> Result<u16> {
        let response = self.execute(Method::GET, url, None, false).await?;
        Ok(response.status.as_u16())
    }

    /// POST a JSON body. Only retried when `idempotent` is set.
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: &Url,
        body: &B,
        idempotent: bool,
    ) -> Result<Bytes> {
        let payload = encode(url, body)?;
        let response = self
            .execute(Method::POST, url, Some(payload), idempotent)
            .await?;
        into_body(url, response)
    }

    pub async fn put_json<B: Serialize + ?Sized>(&self, url: &Url, body: &B) -> Result<Bytes> {
        let payload = encode(url, body)?;
        let response = self.execute(Method::PUT, url, Some(payload), true).await?;
        into_body(url, response)
    }

    pub async fn delete(&self, url: &Url) -> Result<()> {
        let response = self.execute(Method::DELETE, url, None, true).await?;
        into_body(url, response).map(|_| ())
    }

    async fn execute(
        &self,
        method: Method,
        url: &Url,
        body: Option<Bytes>,
        idempotent: bool,
    ) -> Result<RawResponse> {
        let mut state = RetryState::new();

        loop {
            if self.cancel.is_cancelled() {
                return Err(ApiError::Cancelled);
            }

            let (failure, retry_after, error) =
                match self.send_once(&method, url, body.clone()).await {
                    Ok(response) if RetryPolicy::is_retryable_status(response.status.as_u16()) => {
                        let status = response.status.as_u16();
                        let retry_after = response.retry_after;
                        let error = status_error(url, response);
                        (Failure::Status(status), retry_after, error)
                    }
                    Ok(response) => return Ok(response),
                    Err(SendFailure::Cancelled) => return Err(ApiError::Cancelled),
                    Err(SendFailure::Fatal(error)) => return Err(error),
                    Err(SendFailure::Transport { kind, message }) => (
                        Failure::Transport(kind),
                        None,
                        ApiError::Transport {
                            url: url.to_string(),
                            kind,
                            message,
                        },
                    ),
                };

            let context = RetryContext {
                method: method.as_str(),
                idempotent,
                failure,
                cancelled: self.cancel.is_cancelled(),
                state: &state,
            };
            if !self.retry.should_retry(&context) {
                debug!(method = %method, url = %url, attempt = state.attempt(), "Request failed without retry");
                return Err(error);
            }

            state.record_failure();
            let delay = self.retry.next_delay(&state, retry_after);
            warn!(
                method = %method,
                url = %url,
                attempt = state.attempt(),
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Retrying request"
            );

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(ApiError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn send_once(
        &self,
        method: &Method,
        url: &Url,
        body: Option<Bytes>,
    ) -> std::result::Result<RawResponse, SendFailure> {
        let route = format!(
            "{}:{}",
            url.host_str().unwrap_or_default(),
            url.port_or_known_default().unwrap_or_default()
        );
        let _permit = tokio::select! {
            _ = self.cancel.cancelled() => return Err(SendFailure::Cancelled),
            permit = self.pool.acquire(&route) => permit.map_err(SendFailure::Fatal)?,
        };

        let mut request = self
            .pool
            .client
            .request(method.clone(), url.clone())
            .header(header::ACCEPT, "application/json");
        if let Some(body) = body {
            request = request
                .header(header::CONTENT_TYPE, "application/json")
                .body(body);
        }
        let request = self.authenticator.decorate(request);

        debug!(method = %method, url = %url, "Sending request");
        let exchange = async {
            let response = request.send().await?;
            let status = response.status();
            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| parse_retry_after(value, Utc::now()));
            let body = response.bytes().await?;
            Ok::<_, reqwest::Error>(RawResponse {
                status,
                retry_after,
                body,
            })
        };

        tokio::select! {
            _ = self.cancel.cancelled() => Err(SendFailure::Cancelled),
            result = exchange => result.map_err(|e| SendFailure::Transport {
                kind: classify(&e),
                message: e.to_string(),
            }),
        }
    }
}

fn encode<B: Serialize + ?Sized>(url: &Url, body: &B) -> Result<Bytes> {
    serde_json::to_vec(body)
        .map(Bytes::from)
        .map_err(|e| ApiError::Json {
            url: url.to_string(),
            message: e.to_string(),
        })
}

pub(crate) fn decode<T: DeserializeOwned>(url: &Url, body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| ApiError::Json {
        url: url.to_string(),
        message: e.to_string(),
    })
}

fn into_body(url: &Url, response: RawResponse) -> Result<Bytes> {
    if response.status.is_success() {
        Ok(response.body)
    } else {
        Err(status_error(url, response))
    }
}

fn status_error(url: &Url, response: RawResponse) -> ApiError {
    if response.status == StatusCode::NOT_FOUND {
        return ApiError::NotFound {
            url: url.to_string(),
        };
    }
    ApiError::Request {
        url: url.to_string(),
        status: response.status.as_u16(),
        body: String::from_utf8_lossy(&response.body).into_owned(),
    }
}

/// Classify a client error by walking its source chain.
pub(crate) fn classify(error: &reqwest::Error) -> TransportErrorKind {
    if error.is_timeout() {
        return TransportErrorKind::Interrupted;
    }

    // The top-level message embeds the URL, so only causes are inspected.
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            if let Some(kind) = classify_io(io.kind()) {
                return kind;
            }
        }
        if let Some(kind) = classify_message(&cause.to_string()) {
            return kind;
        }
        source = cause.source();
    }
    TransportErrorKind::Other
}

fn classify_io(kind: std::io::ErrorKind) -> Option<TransportErrorKind> {
    use std::io::ErrorKind;

    match kind {
        ErrorKind::ConnectionRefused => Some(TransportErrorKind::ConnectionRefused),
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe
        | ErrorKind::NotConnected
        | ErrorKind::UnexpectedEof => Some(TransportErrorKind::ConnectionClosed),
        ErrorKind::TimedOut | ErrorKind::Interrupted => Some(TransportErrorKind::Interrupted),
        _ => None,
    }
}

fn classify_message(message: &str) -> Option<TransportErrorKind> {
    let message = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|needle| message.contains(needle));

    if has(&["dns error", "failed to lookup address", "name or service not known", "no such host"]) {
        Some(TransportErrorKind::UnknownHost)
    } else if has(&["no route to host", "host is unreachable", "network is unreachable"]) {
        Some(TransportErrorKind::NoRouteToHost)
    } else if has(&["connection refused"]) {
        Some(TransportErrorKind::ConnectionRefused)
    } else if has(&["certificate", "tls", "ssl", "handshake"]) {
        Some(TransportErrorKind::Tls)
    } else if has(&["connection closed", "connection reset"]) {
        Some(TransportErrorKind::ConnectionClosed)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    #[test]
    fn test_classify_io_kinds() {
        assert_eq!(
            classify_io(ErrorKind::ConnectionRefused),
            Some(TransportErrorKind::ConnectionRefused)
        );
        assert_eq!(
            classify_io(ErrorKind::ConnectionReset),
            Some(TransportErrorKind::ConnectionClosed)
        );
        assert_eq!(
            classify_io(ErrorKind::TimedOut),
            Some(TransportErrorKind::Interrupted)
        );
        assert_eq!(classify_io(ErrorKind::PermissionDenied), None);
    }

    #[test]
    fn test_classify_messages() {
        assert_eq!(
            classify_message("dns error: failed to lookup address information"),
            Some(TransportErrorKind::UnknownHost)
        );
        assert_eq!(
            classify_message("No route to host (os error 113)"),
            Some(TransportErrorKind::NoRouteToHost)
        );
        assert_eq!(
            classify_message("invalid peer certificate: UnknownIssuer"),
            Some(TransportErrorKind::Tls)
        );
        assert_eq!(
            classify_message("connection closed before message completed"),
            Some(TransportErrorKind::ConnectionClosed)
        );
        assert_eq!(classify_message("body decode failed"), None);
    }

    #[test]
    fn test_pool_limits_respected() {
        let config = TransportConfig::default().with_pool_limits(2, 3);
        let pool = ConnectionPool::new(BackendKind::Server, &config).unwrap();

        assert_eq!(pool.available_permits(), 3);
        assert_eq!(pool.max_per_route, 2);
        assert_eq!(pool.kind(), BackendKind::Server);
    }

    #[tokio::test]
    async fn test_permits_released_on_drop() {
        let config = TransportConfig::default().with_pool_limits(1, 2);
        let pool = ConnectionPool::new(BackendKind::Cloud, &config).unwrap();

        let permit = pool.acquire("a:443").await.unwrap();
        assert_eq!(pool.available_permits(), 1);
        drop(permit);
        assert_eq!(pool.available_permits(), 2);
    }

    #[test]
    fn test_status_error_mapping() {
        let url = Url::parse("https://api.bitbucket.org/2.0/x").unwrap();
        let missing = status_error(
            &url,
            RawResponse {
                status: StatusCode::NOT_FOUND,
                retry_after: None,
                body: Bytes::new(),
            },
        );
        assert!(missing.is_not_found());

        let denied = status_error(
            &url,
            RawResponse {
                status: StatusCode::FORBIDDEN,
                retry_after: None,
                body: Bytes::from_static(b"nope"),
            },
        );
        assert_eq!(denied.status_code(), Some(403));
        assert!(denied.to_string().contains("nope"));
    }
}
