//! Counter store abstraction and its realizations.

mod memory_store;
mod redis_store;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::ratelimit::OverrideRecord;

pub use memory_store::MemoryStore;
pub use redis_store::RedisStore;

/// Atomic primitives the decision engine needs from a shared key-value store.
///
/// Implementations must make `increment` a single atomic read-modify-write:
/// the returned value is the caller's global rank within the window, even
/// under concurrent calls for the same key from many processes.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Set a sentinel value with the given expiry. A second call resets the
    /// expiry.
    async fn set_flag(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Number of keys matching `key` (0 or 1).
    async fn exists(&self, key: &str) -> Result<u64>;

    /// Atomically increment `key`, creating it at 1 if absent.
    async fn increment(&self, key: &str) -> Result<i64>;

    /// Attach or overwrite the expiry of an existing key.
    ///
    /// Returns `false` when the key does not exist.
    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<bool>;

    /// Remove `key`; absent keys are not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Write an override record only if `key` does not already exist.
    ///
    /// Returns `true` when this call created the record.
    async fn upsert_override(&self, key: &str, record: &OverrideRecord) -> Result<bool>;

    /// Point read of an override record.
    async fn read_override(&self, key: &str) -> Result<Option<OverrideRecord>>;
}

/// Store expiries are whole seconds; round sub-second remainders up so a
/// non-zero duration never becomes a zero expiry.
pub(crate) fn ttl_secs(ttl: Duration) -> u64 {
    let secs = ttl.as_secs();
    if ttl.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_secs() {
        assert_eq!(ttl_secs(Duration::from_secs(1)), 1);
        assert_eq!(ttl_secs(Duration::from_secs(20)), 20);
        assert_eq!(ttl_secs(Duration::from_millis(1500)), 2);
        assert_eq!(ttl_secs(Duration::ZERO), 1);
    }
}
