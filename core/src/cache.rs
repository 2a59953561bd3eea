use crate::clock::Clock;
use crate::error::Result;
use crate::store::{keys, OptionStore};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_TTL: Duration = Duration::from_secs(12 * 60 * 60);

#[derive(Debug, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    pub timestamp: i64,
    pub ttl_seconds: u64,
}

impl<T> CacheEntry<T> {
    pub fn new(data: T, now: i64, ttl_seconds: u64) -> Self {
        Self {
            data,
            timestamp: now,
            ttl_seconds,
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        if self.ttl_seconds == 0 {
            return true;
        }

        now > self.timestamp + self.ttl_seconds as i64
    }

    pub fn data(&self) -> &T {
        &self.data
    }
}

/// Expiring values kept in the option store, in the manner of WordPress
/// transients.
#[derive(Clone)]
pub struct TransientCache {
    store: OptionStore,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
}

impl TransientCache {
    pub fn new(store: OptionStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            default_ttl: DEFAULT_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    fn key_for(&self, key: &str) -> String {
        format!("{}{}", keys::TRANSIENT_PREFIX, sanitize_cache_key(key))
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let full_key = self.key_for(key);
        let Some(entry) = self.store.get::<CacheEntry<T>>(&full_key)? else {
            return Ok(None);
        };

        if entry.is_expired(self.clock.now()) {
            self.store.delete(&full_key)?;
            return Ok(None);
        }

        Ok(Some(entry.data))
    }

    pub fn set<T: Serialize>(&self, key: &str, data: &T) -> Result<()> {
        self.set_with_ttl(key, data, self.default_ttl)
    }

    pub fn set_with_ttl<T: Serialize>(&self, key: &str, data: &T, ttl: Duration) -> Result<()> {
        let entry = CacheEntry::new(data, self.clock.now(), ttl.as_secs());
        self.store.set(&self.key_for(key), &entry)
    }

    pub fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get::<serde_json::Value>(key)?.is_some())
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        self.store.delete(&self.key_for(key))
    }
}

pub fn sanitize_cache_key(key: &str) -> String {
    key.replace('/', "-")
        .replace(':', "_")
        .replace(' ', "_")
        .to_lowercase()
}
