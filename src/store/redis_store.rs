//! Redis-backed counter store shared by every Floodgate instance.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, AsyncConnectionConfig, Client, Script};
use std::time::Duration;
use tracing::{debug, info};

use super::{ttl_secs, CounterStore};
use crate::config::StoreConfig;
use crate::error::{FloodgateError, Result};
use crate::ratelimit::{OverrideRecord, COOLDOWN_FIELD, LIMIT_FIELD};

/// Writes the override hash only when the key is absent, in one round-trip.
const UPSERT_OVERRIDE_SCRIPT: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 1 then
    return 0
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2], ARGV[3], ARGV[4])
return 1
"#;

/// Counter store backed by a multiplexed Redis connection.
///
/// The multiplexed connection pipelines concurrent commands, so a single
/// store is shared by all request tasks.
pub struct RedisStore {
    conn: MultiplexedConnection,
    upsert_script: Script,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to Redis using the configured URL and timeouts.
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let client = Client::open(config.redis_url.as_str())
            .map_err(|e| FloodgateError::Config(format!("invalid redis_url: {}", e)))?;

        let connection_config = AsyncConnectionConfig::new()
            .set_connection_timeout(config.connect_timeout())
            .set_response_timeout(config.response_timeout());

        let conn = client
            .get_multiplexed_async_connection_with_config(&connection_config)
            .await?;

        info!(
            connect_timeout_ms = config.connect_timeout_ms,
            response_timeout_ms = config.response_timeout_ms,
            "Connected to Redis counter store"
        );

        Ok(Self::from_connection(conn))
    }

    /// Wrap an already established connection.
    pub fn from_connection(conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            upsert_script: Script::new(UPSERT_OVERRIDE_SCRIPT),
        }
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn set_flag(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(key, 1, ttl_secs(ttl)).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<u64> {
        let mut conn = self.conn.clone();
        Ok(conn.exists(key).await?)
    }

    async fn increment(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.incr(key, 1).await?)
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.conn.clone();
        let secs = i64::try_from(ttl_secs(ttl)).unwrap_or(i64::MAX);
        Ok(conn.expire(key, secs).await?)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    async fn upsert_override(&self, key: &str, record: &OverrideRecord) -> Result<bool> {
        let mut conn = self.conn.clone();
        let [(limit_field, limit), (cooldown_field, cooldown)] = record.to_fields();

        let created: bool = self
            .upsert_script
            .key(key)
            .arg(limit_field)
            .arg(limit)
            .arg(cooldown_field)
            .arg(cooldown)
            .invoke_async(&mut conn)
            .await?;

        debug!(key = %key, created = created, "Upserted override record");
        Ok(created)
    }

    async fn read_override(&self, key: &str) -> Result<Option<OverrideRecord>> {
        let mut conn = self.conn.clone();
        // HMGET alone cannot tell an absent key from a hash with neither field
        let ((limit, cooldown), exists): ((Option<String>, Option<String>), bool) = redis::pipe()
            .atomic()
            .cmd("HMGET")
            .arg(key)
            .arg(LIMIT_FIELD)
            .arg(COOLDOWN_FIELD)
            .exists(key)
            .query_async(&mut conn)
            .await?;

        if !exists {
            return Ok(None);
        }
        OverrideRecord::from_present_fields(key, limit.as_deref(), cooldown.as_deref()).map(Some)
    }
}
