//! Redis cache backend
//!
//! Values are stored as JSON strings. Locks follow the usual single-instance
//! Redis recipe: `SET key token NX PX ttl` to acquire and a compare-and-delete
//! script to release.

use async_trait::async_trait;
use redis::{aio::MultiplexedConnection, AsyncCommands, Client as RedisClient};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{CacheBackend, CacheLock, CacheResult};

/// Keys fetched per SCAN round trip
const SCAN_COUNT: usize = 500;

/// Delay between lock acquisition attempts
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(50);

const UNLOCK_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// Redis-backed cache shared between processes
#[derive(Clone)]
pub struct RedisCache {
    client: Arc<RedisClient>,
}

impl RedisCache {
    pub fn new(client: Arc<RedisClient>) -> Self {
        Self { client }
    }

    /// Open a client for `url` (e.g. `redis://127.0.0.1:6379/0`)
    pub fn open(url: &str) -> CacheResult<Self> {
        let client = RedisClient::open(url)?;
        Ok(Self::new(Arc::new(client)))
    }

    async fn conn(&self) -> CacheResult<MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    async fn scan(&self, conn: &mut MultiplexedConnection, pattern: &str) -> CacheResult<Vec<String>> {
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(conn)
                .await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

#[async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        let mut conn = self.conn().await?;
        let raw: Option<String> = conn.get(key).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &Value, ttl: Option<Duration>) -> CacheResult<()> {
        let mut conn = self.conn().await?;
        let json = serde_json::to_string(value)?;
        match ttl {
            Some(ttl) => {
                let millis = ttl.as_millis().max(1) as u64;
                let _: () = redis::cmd("SET")
                    .arg(key)
                    .arg(json)
                    .arg("PX")
                    .arg(millis)
                    .query_async(&mut conn)
                    .await?;
            }
            None => {
                let _: () = conn.set(key, json).await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.conn().await?;
        let removed: usize = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn delete_pattern(&self, pattern: &str) -> CacheResult<usize> {
        let mut conn = self.conn().await?;
        let keys = self.scan(&mut conn, pattern).await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let mut deleted = 0;
        for chunk in keys.chunks(SCAN_COUNT) {
            let removed: usize = conn.del(chunk.to_vec()).await?;
            deleted += removed;
        }
        Ok(deleted)
    }

    async fn keys(&self, pattern: &str) -> CacheResult<Vec<String>> {
        let mut conn = self.conn().await?;
        self.scan(&mut conn, pattern).await
    }

    async fn incr(&self, key: &str, delta: i64) -> CacheResult<i64> {
        let mut conn = self.conn().await?;
        let value: i64 = conn.incr(key, delta).await?;
        Ok(value)
    }

    async fn lock(&self, key: &str, ttl: Duration, wait: Duration) -> CacheResult<Option<CacheLock>> {
        let mut conn = self.conn().await?;
        let token = uuid::Uuid::new_v4().to_string();
        let millis = ttl.as_millis().max(1) as u64;
        let deadline = Instant::now() + wait;
        loop {
            let acquired: Option<String> = redis::cmd("SET")
                .arg(key)
                .arg(&token)
                .arg("NX")
                .arg("PX")
                .arg(millis)
                .query_async(&mut conn)
                .await?;
            if acquired.is_some() {
                return Ok(Some(CacheLock::new(key, token)));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(LOCK_RETRY_INTERVAL).await;
        }
    }

    async fn unlock(&self, lock: CacheLock) -> CacheResult<()> {
        let mut conn = self.conn().await?;
        let _: i64 = redis::Script::new(UNLOCK_SCRIPT)
            .key(&lock.key)
            .arg(&lock.token)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }
}
