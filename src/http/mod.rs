//! HTTP adapter: routing and the rate limiting middleware.

mod middleware;
mod server;

pub use middleware::{rate_limit, API_KEY_HEADER, TOO_MANY_REQUESTS_BODY};
pub use server::{router, HttpServer};
