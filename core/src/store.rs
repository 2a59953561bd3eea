//! Key-value option storage.
//!
//! Everything the watchdog persists goes through [`OptionStore`]. The store
//! offers no transactions: each `set` replaces a whole value, and callers
//! doing read-modify-write across calls accept lost updates under true
//! concurrency.

use crate::error::{Result, WatchdogError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

pub mod keys {
    pub const SETTINGS: &str = "watchdog_settings";
    pub const RISKS: &str = "watchdog_risks";
    pub const IGNORED: &str = "watchdog_ignored_plugins";
    pub const HISTORY: &str = "watchdog_history";
    pub const LAST_NOTIFICATION: &str = "watchdog_last_notification";
    pub const QUEUE: &str = "watchdog_notification_queue";
    pub const DEAD_LETTER: &str = "watchdog_notification_failed";
    pub const CRON_STATUS: &str = "watchdog_cron_status";
    pub const CRON_EVENTS: &str = "watchdog_cron_events";
    pub const TRANSIENT_PREFIX: &str = "watchdog_transient_";
}

/// New key -> key used by earlier releases.
pub const LEGACY_KEYS: &[(&str, &str)] = &[
    (keys::SETTINGS, "wp_watchdog_settings"),
    (keys::RISKS, "wp_watchdog_risks"),
    (keys::IGNORED, "wp_watchdog_ignore"),
    (keys::HISTORY, "wp_watchdog_history"),
    (keys::LAST_NOTIFICATION, "wp_watchdog_last_notification"),
    (keys::QUEUE, "wp_watchdog_queue"),
    (keys::DEAD_LETTER, "wp_watchdog_failed_notification"),
];

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> Result<()>;
    fn delete(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> WatchdogError {
    WatchdogError::Store {
        message: "store lock poisoned".to_string(),
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let values = self.values.lock().map_err(|_| poisoned())?;
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut values = self.values.lock().map_err(|_| poisoned())?;
        values.insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut values = self.values.lock().map_err(|_| poisoned())?;
        values.remove(key);
        Ok(())
    }
}

/// All options kept in a single JSON document on disk.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn read_all(&self) -> Result<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }

        let content = fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Map::new());
        }

        match serde_json::from_str::<Value>(&content)? {
            Value::Object(map) => Ok(map),
            _ => Err(WatchdogError::Store {
                message: format!("{} does not contain a JSON object", self.path.display()),
            }),
        }
    }

    fn write_all(&self, map: Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let content = serde_json::to_string_pretty(&Value::Object(map))?;
        fs::write(&self.path, content)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        let _guard = self.lock.lock().map_err(|_| poisoned())?;
        Ok(self.read_all()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self.lock.lock().map_err(|_| poisoned())?;
        let mut map = self.read_all()?;
        map.insert(key.to_string(), value);
        self.write_all(map)
    }

    fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().map_err(|_| poisoned())?;
        let mut map = self.read_all()?;
        if map.remove(key).is_some() {
            self.write_all(map)?;
        }
        Ok(())
    }
}

/// Typed access to a [`KeyValueStore`], with legacy key migration on read.
#[derive(Clone)]
pub struct OptionStore {
    inner: Arc<dyn KeyValueStore>,
    legacy: &'static [(&'static str, &'static str)],
}

impl OptionStore {
    pub fn new(inner: Arc<dyn KeyValueStore>) -> Self {
        Self {
            inner,
            legacy: LEGACY_KEYS,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn with_legacy_keys(mut self, legacy: &'static [(&'static str, &'static str)]) -> Self {
        self.legacy = legacy;
        self
    }

    pub fn get_raw(&self, key: &str) -> Result<Option<Value>> {
        if let Some(value) = self.inner.get(key)? {
            return Ok(Some(value));
        }

        let Some(old_key) = self
            .legacy
            .iter()
            .find(|(new, _)| *new == key)
            .map(|(_, old)| *old)
        else {
            return Ok(None);
        };

        match self.inner.get(old_key)? {
            Some(value) => {
                tracing::info!(from = old_key, to = key, "Migrating legacy option");
                self.inner.set(key, value.clone())?;
                self.inner.delete(old_key)?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Reads and deserializes a value. A stored value that no longer matches
    /// the expected shape is treated as missing.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(value) = self.get_raw(key)? else {
            return Ok(None);
        };

        match serde_json::from_value(value) {
            Ok(parsed) => Ok(Some(parsed)),
            Err(e) => {
                tracing::warn!(key, error = %e, "Ignoring malformed option value");
                Ok(None)
            }
        }
    }

    pub fn get_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T> {
        Ok(self.get(key)?.unwrap_or_default())
    }

    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        self.inner.set(key, serde_json::to_value(value)?)
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key)
    }
}

impl std::fmt::Debug for OptionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptionStore").finish_non_exhaustive()
    }
}
