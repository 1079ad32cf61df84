//! HTTP server implementation.

use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::rate_limit;
use crate::error::{FloodgateError, Result};
use crate::ratelimit::RateLimiter;

/// Build the router: a single route guarded by the rate limiter.
pub fn router(rate_limiter: Arc<RateLimiter>) -> Router {
    Router::new()
        .route("/", get(hello))
        .route_layer(from_fn_with_state(rate_limiter, rate_limit))
}

async fn hello() -> &'static str {
    "Hello, World!"
}

/// HTTP server for the rate limited service.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The rate limiter instance
    rate_limiter: Arc<RateLimiter>,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, rate_limiter: Arc<RateLimiter>) -> Self {
        Self { addr, rate_limiter }
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            FloodgateError::Io(e)
        })?;

        info!(addr = %self.addr, "Starting HTTP server with graceful shutdown");

        let app = router(self.rate_limiter).into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                FloodgateError::Io(e)
            })
    }
}
