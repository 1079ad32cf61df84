//! Request adapter between axum and the decision engine.

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderName, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, instrument};

use crate::ratelimit::RateLimiter;

/// Header carrying the caller's credential token.
pub const API_KEY_HEADER: HeaderName = HeaderName::from_static("api_key");

/// Body returned with `429 Too Many Requests`.
pub const TOO_MANY_REQUESTS_BODY: &str =
    "you have reached the maximum number of requests or actions allowed within a certain time frame";

/// Gate a request through the rate limiter.
///
/// Allowed requests reach the wrapped handler unchanged. Denied requests get
/// a 429, and any engine error gets a 500 carrying the error text: an error
/// is never treated as permission to proceed.
#[instrument(skip_all, fields(method = %req.method(), uri = %req.uri()))]
pub async fn rate_limit(
    State(limiter): State<Arc<RateLimiter>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(address) = peer_address(&req) else {
        error!("Request has no peer address");
        return internal_error("remote address unavailable".to_string());
    };
    let token = api_key(&req);

    match limiter.allow(&address, &token).await {
        Ok(true) => next.run(req).await,
        Ok(false) => {
            debug!(address = %address, "Request rejected by rate limiter");
            (StatusCode::TOO_MANY_REQUESTS, TOO_MANY_REQUESTS_BODY).into_response()
        }
        Err(e) => {
            error!(address = %address, error = %e, "Rate limit decision failed");
            internal_error(e.to_string())
        }
    }
}

/// The IP portion of the connection's remote endpoint.
fn peer_address(req: &Request<Body>) -> Option<String> {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
}

/// The `API_KEY` header, or an empty string when absent or not valid text.
fn api_key(req: &Request<Body>) -> String {
    req.headers()
        .get(&API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn internal_error(message: String) -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, message).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FloodgateError, Result};
    use crate::ratelimit::OverrideRecord;
    use crate::store::{CounterStore, MemoryStore};
    use async_trait::async_trait;
    use axum::middleware::from_fn_with_state;
    use axum::routing::get;
    use axum::Router;
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(store: Arc<dyn CounterStore>, limit: u64) -> Router {
        let limiter = Arc::new(RateLimiter::new(store, limit, Duration::from_secs(20)));
        Router::new()
            .route("/", get(|| async { "Hello, World!" }))
            .route_layer(from_fn_with_state(limiter, rate_limit))
    }

    fn request(ip: [u8; 4], token: Option<&str>) -> Request {
        let mut builder = axum::http::Request::builder()
            .uri("/")
            .extension(ConnectInfo(SocketAddr::from((ip, 40000))));
        if let Some(token) = token {
            builder = builder.header("API_KEY", token);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_api_key_header_lookup() {
        let req = request([127, 0, 0, 1], Some("abc123"));
        assert_eq!(api_key(&req), "abc123");
        assert_eq!(peer_address(&req).as_deref(), Some("127.0.0.1"));

        let req = request([127, 0, 0, 1], None);
        assert_eq!(api_key(&req), "");
    }

    #[tokio::test]
    async fn test_allowed_request_reaches_handler() {
        let app = app(Arc::new(MemoryStore::new()), 1);

        let response = app.oneshot(request([10, 0, 0, 1], None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "Hello, World!");
    }

    #[tokio::test]
    async fn test_denied_request_gets_429() {
        let app = app(Arc::new(MemoryStore::new()), 1);

        let first = app.clone().oneshot(request([10, 0, 0, 1], None)).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = app.oneshot(request([10, 0, 0, 1], None)).await.unwrap();
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body_text(second).await, TOO_MANY_REQUESTS_BODY);
    }

    #[tokio::test]
    async fn test_token_override_is_used() {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_override("rate_limit:abc123", &OverrideRecord::new(2, Duration::from_secs(5)))
            .await
            .unwrap();
        let app = app(store.clone(), 1);

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(request([10, 0, 0, 1], Some("abc123")))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
        let response = app
            .oneshot(request([10, 0, 0, 1], Some("abc123")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        assert_eq!(store.exists("block:abc123").await.unwrap(), 1);
        assert_eq!(store.exists("block:10.0.0.1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_peer_address_fails_closed() {
        let app = app(Arc::new(MemoryStore::new()), 10);
        let req = axum::http::Request::builder()
            .uri("/")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(req).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    struct UnavailableStore;

    #[async_trait]
    impl CounterStore for UnavailableStore {
        async fn set_flag(&self, _key: &str, _ttl: Duration) -> Result<()> {
            Err(unavailable())
        }

        async fn exists(&self, _key: &str) -> Result<u64> {
            Err(unavailable())
        }

        async fn increment(&self, _key: &str) -> Result<i64> {
            Err(unavailable())
        }

        async fn set_expiry(&self, _key: &str, _ttl: Duration) -> Result<bool> {
            Err(unavailable())
        }

        async fn delete(&self, _key: &str) -> Result<()> {
            Err(unavailable())
        }

        async fn upsert_override(&self, _key: &str, _record: &OverrideRecord) -> Result<bool> {
            Err(unavailable())
        }

        async fn read_override(&self, _key: &str) -> Result<Option<OverrideRecord>> {
            Err(unavailable())
        }
    }

    fn unavailable() -> FloodgateError {
        FloodgateError::StoreUnavailable("connection refused".to_string())
    }

    #[tokio::test]
    async fn test_store_failure_gets_500_with_error_text() {
        let app = app(Arc::new(UnavailableStore), 10);

        let response = app.oneshot(request([10, 0, 0, 1], None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_text(response).await, "Store unavailable: connection refused");
    }
}
