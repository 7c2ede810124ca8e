//! Shared cache layer
//!
//! `CacheBackend` abstracts the key/value store used for memoized permission
//! data, rendered responses and configuration values. Two backends exist:
//! an in-process `MemoryCache` and a `RedisCache` shared across processes.
//! Values are JSON documents; pattern operations use Redis glob syntax.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OwnedMutexGuard;

pub mod keys;
pub mod magic;
pub mod memory;
pub mod redis;
pub mod response;

pub use magic::{CacheSpec, MagicCacheData, MagicEngine};
pub use memory::MemoryCache;
pub use response::{MagicCacheResponse, ResponseCacheSpec};

pub use self::redis::RedisCache;

/// Cache backend errors
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Invalid key pattern: {0}")]
    Pattern(#[from] globset::Error),

    #[error("Cache backend error: {0}")]
    Backend(String),
}

pub type CacheResult<T> = Result<T, CacheError>;

/// A held cache lock, released with `CacheBackend::unlock`
#[derive(Debug)]
pub struct CacheLock {
    pub key: String,
    pub token: String,
    /// Process-local guard used by the memory backend
    pub(crate) local: Option<OwnedMutexGuard<()>>,
}

impl CacheLock {
    pub fn new(key: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            token: token.into(),
            local: None,
        }
    }
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get a value, `None` when missing or expired
    async fn get(&self, key: &str) -> CacheResult<Option<serde_json::Value>>;

    /// Store a value, `ttl = None` keeps it until deleted
    async fn set(&self, key: &str, value: &serde_json::Value, ttl: Option<Duration>)
        -> CacheResult<()>;

    /// Delete one key, returns whether it existed
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Delete every key matching a glob pattern, returns the number deleted
    async fn delete_pattern(&self, pattern: &str) -> CacheResult<usize>;

    /// List keys matching a glob pattern
    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>>;

    /// Atomically add `delta` to an integer value, creating it at 0
    async fn incr(&self, key: &str, delta: i64) -> CacheResult<i64>;

    /// Acquire an exclusive lock, waiting at most `wait`.
    ///
    /// Returns `None` when the lock could not be acquired in time. The lock
    /// expires on its own after `ttl` if the holder never releases it.
    async fn lock(&self, key: &str, ttl: Duration, wait: Duration)
        -> CacheResult<Option<CacheLock>>;

    /// Release a lock previously returned by `lock`
    async fn unlock(&self, lock: CacheLock) -> CacheResult<()>;
}

pub type SharedCache = Arc<dyn CacheBackend>;

/// Delete a key or, when it contains glob characters, every matching key
pub async fn invalidate(cache: &dyn CacheBackend, pattern: &str) -> CacheResult<usize> {
    if is_pattern(pattern) {
        cache.delete_pattern(pattern).await
    } else {
        Ok(usize::from(cache.delete(pattern).await?))
    }
}

pub fn is_pattern(key: &str) -> bool {
    key.contains(['*', '?', '['])
}

/// Compile a Redis-style glob pattern
pub(crate) fn compile_pattern(pattern: &str) -> CacheResult<globset::GlobMatcher> {
    let glob = globset::GlobBuilder::new(pattern)
        .literal_separator(false)
        .backslash_escape(true)
        .build()?;
    Ok(glob.compile_matcher())
}
