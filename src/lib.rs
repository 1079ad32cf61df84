//! Floodgate - Fixed-Window Rate Limiting Service
//!
//! This crate grants or denies requests based on how many requests a caller
//! made within the current one-second window. Counters, cooldown flags and
//! per-caller overrides live in a shared store, so any number of instances
//! observe one consistent count.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;
