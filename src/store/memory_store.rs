//! Process-local counter store.
//!
//! Mirrors the Redis semantics the decision engine relies on, but only
//! within a single process. Expired entries are removed on access, and a
//! full sweep runs from the write path at most once per `SWEEP_INTERVAL`, so
//! callers that never return do not leave their keys behind. Time is read from `tokio::time::Instant`, so a paused test runtime
//! controls expiry.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::CounterStore;
use crate::error::{FloodgateError, Result};
use crate::ratelimit::{OverrideRecord, COOLDOWN_FIELD, LIMIT_FIELD};

/// Minimum time between full sweeps of expired entries.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug)]
enum Value {
    Counter(i64),
    Flag,
    Hash(HashMap<String, String>),
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn persistent(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    /// Like Redis, a key is still present at its exact expiry instant and
    /// gone strictly after it.
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at < now)
    }
}

/// A counter store held in a concurrent map.
#[derive(Debug)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
    next_sweep: Mutex<Instant>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
            next_sweep: Mutex::new(Instant::now() + SWEEP_INTERVAL),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys held, including expired keys not yet swept.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every expired key and return how many were dropped.
    pub fn purge_expired_entries(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Set a single field of a hash, creating the hash if needed.
    ///
    /// Unlike `upsert_override` this writes unconditionally and performs no
    /// validation, which makes it possible to seed malformed records.
    pub fn set_hash_field(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.purge_expired(key);
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::persistent(Value::Hash(HashMap::new())));

        match &mut entry.value {
            Value::Hash(fields) => {
                fields.insert(field.to_string(), value.to_string());
                Ok(())
            }
            _ => Err(wrong_type(key)),
        }
    }

    /// Current value of a counter, if present.
    pub fn counter_value(&self, key: &str) -> Result<Option<i64>> {
        self.purge_expired(key);
        match self.entries.get(key).as_deref() {
            None => Ok(None),
            Some(Entry {
                value: Value::Counter(n),
                ..
            }) => Ok(Some(*n)),
            Some(_) => Err(wrong_type(key)),
        }
    }

    /// Remaining time to live of a key; `None` if absent or persistent.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        self.purge_expired(key);
        let now = Instant::now();
        self.entries
            .get(key)
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    /// Sweep the whole map if the interval has elapsed. Must not be called
    /// while holding a reference into `entries`.
    fn sweep_if_due(&self) {
        let now = Instant::now();
        {
            // Another task already sweeping is as good as sweeping here
            let Ok(mut next_sweep) = self.next_sweep.try_lock() else {
                return;
            };
            if now < *next_sweep {
                return;
            }
            *next_sweep = now + SWEEP_INTERVAL;
        }

        let removed = self.purge_expired_entries();
        if removed > 0 {
            debug!(removed = removed, remaining = self.entries.len(), "Swept expired keys");
        }
    }

    fn purge_expired(&self, key: &str) {
        let now = Instant::now();
        if self
            .entries
            .remove_if(key, |_, entry| entry.is_expired(now))
            .is_some()
        {
            trace!(key = %key, "Expired key removed");
        }
    }
}

fn wrong_type(key: &str) -> FloodgateError {
    FloodgateError::StoreUnavailable(format!(
        "WRONGTYPE operation against key {} holding the wrong kind of value",
        key
    ))
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn set_flag(&self, key: &str, ttl: Duration) -> Result<()> {
        self.sweep_if_due();
        self.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Flag,
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<u64> {
        self.purge_expired(key);
        Ok(u64::from(self.entries.contains_key(key)))
    }

    async fn increment(&self, key: &str) -> Result<i64> {
        self.sweep_if_due();
        self.purge_expired(key);
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::persistent(Value::Counter(0)));

        match &mut entry.value {
            Value::Counter(n) => {
                *n += 1;
                Ok(*n)
            }
            _ => Err(wrong_type(key)),
        }
    }

    async fn set_expiry(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.purge_expired(key);
        match self.entries.get_mut(key) {
            Some(mut entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn upsert_override(&self, key: &str, record: &OverrideRecord) -> Result<bool> {
        self.purge_expired(key);
        match self.entries.entry(key.to_string()) {
            MapEntry::Occupied(_) => Ok(false),
            MapEntry::Vacant(vacant) => {
                let fields = record
                    .to_fields()
                    .into_iter()
                    .map(|(field, value)| (field.to_string(), value))
                    .collect();
                vacant.insert(Entry::persistent(Value::Hash(fields)));
                Ok(true)
            }
        }
    }

    async fn read_override(&self, key: &str) -> Result<Option<OverrideRecord>> {
        self.purge_expired(key);
        match self.entries.get(key).as_deref() {
            None => Ok(None),
            Some(Entry {
                value: Value::Hash(fields),
                ..
            }) => OverrideRecord::from_present_fields(
                key,
                fields.get(LIMIT_FIELD).map(String::as_str),
                fields.get(COOLDOWN_FIELD).map(String::as_str),
            )
            .map(Some),
            Some(_) => Err(wrong_type(key)),
        }
    }
}
