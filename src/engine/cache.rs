//! Read-through cache collaborator
//!
//! Document reads consult a `Cache` when their condition model opens a cache
//! directive. `LocalCache` is an in-process TTL map.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(String),
    #[error("cache lock poisoned")]
    Poisoned,
}

pub trait Cache: Send + Sync {
    /// Cached value for `key`, if present and unexpired.
    fn get(&self, key: &str) -> Result<Option<Value>, CacheError>;

    /// Store `value`; `expire_secs <= 0` uses the backend default.
    fn put(&self, key: &str, value: Value, expire_secs: i64) -> Result<(), CacheError>;

    fn del(&self, keys: &[&str]) -> Result<(), CacheError>;
}

struct Entry {
    value: Value,
    expires_at: Instant,
}

pub struct LocalCache {
    default_ttl: Duration,
    entries: Mutex<HashMap<String, Entry>>,
}

impl LocalCache {
    pub const DEFAULT_EXPIRE_SECS: u64 = 300;

    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LocalCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(Self::DEFAULT_EXPIRE_SECS))
    }
}

impl Cache for LocalCache {
    fn get(&self, key: &str) -> Result<Option<Value>, CacheError> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, value: Value, expire_secs: i64) -> Result<(), CacheError> {
        let ttl = if expire_secs > 0 {
            Duration::from_secs(expire_secs as u64)
        } else {
            self.default_ttl
        };
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        let now = Instant::now();
        entries.retain(|_, e| e.expires_at > now);
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    fn del(&self, keys: &[&str]) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().map_err(|_| CacheError::Poisoned)?;
        for key in keys {
            entries.remove(*key);
        }
        Ok(())
    }
}
