//! The rate limit decision engine.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::identifier::Identifier;
use super::policy::{LimitPolicy, PolicySource};
use crate::config::RateLimitingConfig;
use crate::error::Result;
use crate::store::CounterStore;

/// Length of a count window. Only the increment that creates the counter
/// attaches it, so later increments never extend the window.
pub const COUNT_WINDOW: Duration = Duration::from_secs(1);

/// Decides whether a caller may proceed.
///
/// The limiter keeps no state of its own: counters, block flags and override
/// records all live in the counter store, so any number of instances sharing
/// one store reach consistent decisions. It is safe to share behind an `Arc`
/// across request tasks.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    default_limit: u64,
    default_cooldown: Duration,
}

impl RateLimiter {
    /// Create a limiter with explicit process-wide defaults.
    pub fn new(store: Arc<dyn CounterStore>, default_limit: u64, default_cooldown: Duration) -> Self {
        Self {
            store,
            default_limit,
            default_cooldown,
        }
    }

    /// Create a limiter from the rate limiting configuration section.
    pub fn from_config(store: Arc<dyn CounterStore>, config: &RateLimitingConfig) -> Self {
        Self::new(store, config.default_limit, config.default_cooldown())
    }

    /// The underlying counter store.
    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    /// Decide whether a request from `address`, optionally carrying `token`,
    /// is allowed.
    ///
    /// Any store failure is returned as an error and must be treated as a
    /// denial by the caller. Nothing is retried.
    pub async fn allow(&self, address: &str, token: &str) -> Result<bool> {
        let policy = self.resolve(address, token).await?;

        trace!(
            identifier = %policy.identifier,
            source = %policy.source,
            limit = policy.limit,
            "Checking rate limit"
        );

        if self.is_blocked(&policy.identifier).await? {
            debug!(identifier = %policy.identifier, "Caller is blocked");
            return Ok(false);
        }

        let count = self.increment_count(&policy.identifier).await?;
        if within_limit(count, policy.limit) {
            return Ok(true);
        }

        warn!(
            identifier = %policy.identifier,
            source = %policy.source,
            count = count,
            limit = policy.limit,
            cooldown_secs = policy.cooldown.as_secs(),
            "Rate limit exceeded, blocking caller"
        );
        self.block(&policy).await?;
        Ok(false)
    }

    /// Resolve the identifier, limit and cooldown for a request.
    ///
    /// A non-empty token with an override record wins; then the address's
    /// override record; otherwise the address with the process defaults.
    /// Limit and cooldown are never mixed from different sources.
    pub async fn resolve(&self, address: &str, token: &str) -> Result<LimitPolicy> {
        if !token.is_empty() {
            let identifier = Identifier::new(token);
            if let Some(record) = self.store.read_override(&identifier.override_key()).await? {
                return Ok(LimitPolicy::from_override(identifier, record, PolicySource::Token));
            }
        }

        let identifier = Identifier::new(address);
        if let Some(record) = self.store.read_override(&identifier.override_key()).await? {
            return Ok(LimitPolicy::from_override(identifier, record, PolicySource::Address));
        }

        Ok(LimitPolicy {
            identifier,
            limit: self.default_limit,
            cooldown: self.default_cooldown,
            source: PolicySource::Default,
        })
    }

    async fn is_blocked(&self, identifier: &Identifier) -> Result<bool> {
        Ok(self.store.exists(&identifier.block_key()).await? > 0)
    }

    /// Increment the window counter, opening a new window on first use.
    ///
    /// A crash between the increment and the expiry leaves the counter
    /// without an expiry; this is not detected here.
    async fn increment_count(&self, identifier: &Identifier) -> Result<i64> {
        let key = identifier.count_key();
        let count = self.store.increment(&key).await?;

        if count == 1 {
            let attached = self.store.set_expiry(&key, COUNT_WINDOW).await?;
            if !attached {
                debug!(key = %key, "Counter vanished before its expiry was set");
            }
        }

        Ok(count)
    }

    async fn block(&self, policy: &LimitPolicy) -> Result<()> {
        self.store
            .set_flag(&policy.identifier.block_key(), policy.cooldown)
            .await
    }
}

fn within_limit(count: i64, limit: u64) -> bool {
    u64::try_from(count).map_or(true, |count| count <= limit)
}
