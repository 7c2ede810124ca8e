//! In-process cache backend
//!
//! Entries live in a `DashMap` with an optional expiry instant. Expired
//! entries are dropped lazily on read and periodically by a sweeper task.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::{compile_pattern, CacheBackend, CacheError, CacheLock, CacheResult};

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// DashMap-backed cache shared by every handler of one process
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove expired entries, returns how many were dropped
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Spawn a background task purging expired entries every `interval`
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let cache = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let purged = cache.purge_expired();
                if purged > 0 {
                    tracing::debug!("Cache sweeper purged {} expired entries", purged);
                }
            }
        })
    }

    fn live(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
        }
        None
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        Ok(self.live(key))
    }

    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> CacheResult<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.clone(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired(now)))
    }

    async fn delete_pattern(&self, pattern: &str) -> CacheResult<usize> {
        let matcher = compile_pattern(pattern)?;
        let now = Instant::now();
        let mut deleted = 0;
        self.entries.retain(|key, entry| {
            if matcher.is_match(key.as_str()) {
                if !entry.is_expired(now) {
                    deleted += 1;
                }
                false
            } else {
                true
            }
        });
        Ok(deleted)
    }

    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let matcher = compile_pattern(pattern)?;
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|e| !e.is_expired(now) && matcher.is_match(e.key().as_str()))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn incr(&self, key: &str, delta: i64) -> CacheResult<i64> {
        let now = Instant::now();
        let mut entry = self.entries.entry(key.to_string()).or_insert(Entry {
            value: Value::from(0),
            expires_at: None,
        });
        if entry.is_expired(now) {
            *entry = Entry {
                value: Value::from(0),
                expires_at: None,
            };
        }
        let current = entry
            .value
            .as_i64()
            .ok_or_else(|| CacheError::Backend(format!("value of {} is not an integer", key)))?;
        let next = current + delta;
        entry.value = Value::from(next);
        Ok(next)
    }

    async fn lock(&self, key: &str, _ttl: Duration, wait: Duration) -> CacheResult<Option<CacheLock>> {
        // Guards are dropped with their holder, so the ttl never has to fire
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        match tokio::time::timeout(wait, mutex.lock_owned()).await {
            Ok(guard) => {
                let mut lock = CacheLock::new(key, uuid::Uuid::new_v4().to_string());
                lock.local = Some(guard);
                Ok(Some(lock))
            }
            Err(_) => Ok(None),
        }
    }

    async fn unlock(&self, mut lock: CacheLock) -> CacheResult<()> {
        drop(lock.local.take());
        self.locks
            .remove_if(&lock.key, |_, mutex| Arc::strong_count(mutex) == 1);
        Ok(())
    }
}
