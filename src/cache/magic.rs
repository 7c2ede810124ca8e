//! Memoization with single-flight computation
//!
//! A cached entry is the JSON document `{c_time, data, status}`. `status` is
//! `"ready"` while a computation is in progress and `"ok"` once `data` holds
//! a result. An entry is fresh while `now - c_time < timeout - invalid_time`.
//!
//! Concurrent callers for the same key are coalesced at two levels:
//! * inside one process, the first caller becomes the leader and the others
//!   await a `watch` channel that receives the computed value;
//! * across processes, the leader holds the backend lock `<key>_lock` while
//!   computing and re-reads the entry once it owns the lock, so a value
//!   stored by another process in the meantime is reused.
//!
//! The `"ready"` marker carries the leader's token. A leader stores its result
//! only while its marker is still in place and no invalidation retired its
//! flight; otherwise the result goes back to its own caller and nowhere else.

use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{watch, RwLock};

use super::{compile_pattern, is_pattern, keys, CacheBackend, CacheResult, SharedCache};

/// Shortest lock lifetime handed to the backend
const MIN_LOCK_TTL: Duration = Duration::from_secs(1);

/// Definition of one memoized function
#[derive(Clone, Copy)]
pub struct CacheSpec {
    /// Function name, part of the cache key
    pub name: &'static str,
    /// Lifetime of the stored entry
    pub timeout: Duration,
    /// Entries are recomputed this long before `timeout` runs out
    pub invalid_time: Duration,
    /// Derives the entry lifetime from the computed data
    pub timeout_func: Option<fn(&Value) -> Duration>,
}

impl CacheSpec {
    pub const fn new(name: &'static str, timeout: Duration) -> Self {
        Self {
            name,
            timeout,
            invalid_time: Duration::ZERO,
            timeout_func: None,
        }
    }

    pub const fn with_invalid_time(mut self, invalid_time: Duration) -> Self {
        self.invalid_time = invalid_time;
        self
    }

    pub const fn with_timeout_func(mut self, timeout_func: fn(&Value) -> Duration) -> Self {
        self.timeout_func = Some(timeout_func);
        self
    }

    pub(crate) fn policy(&self) -> Policy {
        Policy {
            timeout: self.timeout,
            invalid_time: self.invalid_time,
            timeout_func: self.timeout_func,
        }
    }
}

/// Timing rules shared by data and response caching
#[derive(Clone, Copy)]
pub(crate) struct Policy {
    pub timeout: Duration,
    pub invalid_time: Duration,
    pub timeout_func: Option<fn(&Value) -> Duration>,
}

impl Policy {
    fn fresh_for(&self) -> f64 {
        self.timeout.saturating_sub(self.invalid_time).as_secs_f64()
    }

    fn lock_ttl(&self) -> Duration {
        self.timeout.saturating_sub(self.invalid_time).max(MIN_LOCK_TTL)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum EntryStatus {
    Ready,
    Ok,
}

/// Stored form of a memoized value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CacheEntry {
    pub c_time: f64,
    #[serde(default)]
    pub data: Value,
    pub status: EntryStatus,
    /// Owner of a `ready` marker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl CacheEntry {
    fn is_fresh(&self, policy: &Policy, now: f64) -> bool {
        self.status == EntryStatus::Ok && now - self.c_time < policy.fresh_for()
    }
}

/// Output of a leader's computation
pub(crate) struct Computed<T> {
    /// Returned to the leader
    pub value: T,
    /// Stored and shared with followers; `None` keeps the result uncached
    pub cached: Option<Value>,
}

fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

/// An in-process computation that followers can wait on
struct FlightSlot {
    rx: watch::Receiver<Option<Value>>,
    retired: Arc<AtomicBool>,
}

type FlightMap = DashMap<String, FlightSlot>;

enum Flight {
    Leader(LeaderGuard),
    Follower(watch::Receiver<Option<Value>>),
}

/// Owns an in-process flight; removes it when dropped
struct LeaderGuard {
    key: String,
    tx: watch::Sender<Option<Value>>,
    retired: Arc<AtomicBool>,
    flights: Arc<FlightMap>,
}

impl LeaderGuard {
    fn publish(&self, value: Value) {
        self.tx.send_replace(Some(value));
    }

    fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        // A retired flight may already have a successor under the same key
        self.flights
            .remove_if(&self.key, |_, slot| Arc::ptr_eq(&slot.retired, &self.retired));
    }
}

/// Memoization core shared by data and response caching.
///
/// Everything that invalidates memoized entries in this process has to go
/// through the same engine as the readers, so that computations already in
/// flight for the deleted keys are retired with them.
#[derive(Clone)]
pub struct MagicEngine {
    cache: SharedCache,
    flights: Arc<FlightMap>,
    /// Leaders store under the read side, invalidation holds the write side
    gate: Arc<RwLock<()>>,
}

impl MagicEngine {
    pub fn new(cache: SharedCache) -> Self {
        Self {
            cache,
            flights: Arc::new(DashMap::new()),
            gate: Arc::new(RwLock::new(())),
        }
    }

    /// Delete a key or pattern and retire the flights computing matching keys.
    ///
    /// A retired leader still answers its own caller but neither stores nor
    /// shares its result, so every read after this returns recomputes.
    pub async fn invalidate(&self, pattern: &str) -> CacheResult<usize> {
        let _gate = self.gate.write().await;
        self.retire(pattern)?;
        super::invalidate(self.cache.as_ref(), pattern).await
    }

    fn retire(&self, pattern: &str) -> CacheResult<()> {
        if !is_pattern(pattern) {
            if let Some((_, slot)) = self.flights.remove(pattern) {
                slot.retired.store(true, Ordering::Release);
            }
            return Ok(());
        }
        let matcher = compile_pattern(pattern)?;
        self.flights.retain(|key, slot| {
            if matcher.is_match(key) {
                slot.retired.store(true, Ordering::Release);
                false
            } else {
                true
            }
        });
        Ok(())
    }

    fn join(&self, key: &str) -> Flight {
        match self.flights.entry(key.to_string()) {
            MapEntry::Occupied(entry) => Flight::Follower(entry.get().rx.clone()),
            MapEntry::Vacant(entry) => {
                let (tx, rx) = watch::channel(None);
                let retired = Arc::new(AtomicBool::new(false));
                entry.insert(FlightSlot {
                    rx,
                    retired: retired.clone(),
                });
                Flight::Leader(LeaderGuard {
                    key: key.to_string(),
                    tx,
                    retired,
                    flights: self.flights.clone(),
                })
            }
        }
    }

    /// Whether `leader` may still write under `key`
    async fn owns_marker(&self, key: &str, leader: &LeaderGuard, token: &str) -> bool {
        if leader.is_retired() {
            return false;
        }
        matches!(
            self.read_entry(key).await,
            Some(CacheEntry { status: EntryStatus::Ready, token: Some(ref t), .. }) if t == token
        )
    }

    async fn read_entry(&self, key: &str) -> Option<CacheEntry> {
        match self.cache.get(key).await {
            Ok(Some(raw)) => match serde_json::from_value::<CacheEntry>(raw) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!("Discarding malformed cache entry {}: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Cache read failed for {}: {}", key, e);
                None
            }
        }
    }

    async fn fresh<T>(&self, key: &str, policy: &Policy, decode: &impl Fn(Value) -> Option<T>) -> Option<T> {
        let entry = self.read_entry(key).await?;
        if !entry.is_fresh(policy, now_secs()) {
            return None;
        }
        decode(entry.data)
    }

    async fn write_entry(&self, key: &str, entry: &CacheEntry, ttl: Duration) {
        let result = match serde_json::to_value(entry) {
            Ok(raw) => self.cache.set(key, &raw, Some(ttl)).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            tracing::warn!("Cache write failed for {}: {}", key, e);
        }
    }

    async fn discard(&self, key: &str) {
        if let Err(e) = self.cache.delete(key).await {
            tracing::warn!("Cache delete failed for {}: {}", key, e);
        }
    }

    /// Return the cached value for `key` or compute it once.
    ///
    /// `decode` turns stored data back into `T`; a value it rejects counts as
    /// a miss. With `refresh` the stored value is ignored and recomputed.
    pub async fn resolve<T, E, D, F, Fut>(
        &self,
        key: &str,
        policy: &Policy,
        refresh: bool,
        decode: D,
        compute: F,
    ) -> Result<T, E>
    where
        D: Fn(Value) -> Option<T>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Computed<T>, E>>,
    {
        let leader = loop {
            if !refresh {
                if let Some(value) = self.fresh(key, policy, &decode).await {
                    return Ok(value);
                }
            }
            match self.join(key) {
                Flight::Leader(guard) => break guard,
                Flight::Follower(mut rx) => {
                    let shared = rx.wait_for(|v| v.is_some()).await.ok().and_then(|v| v.clone());
                    if let Some(value) = shared.and_then(&decode) {
                        return Ok(value);
                    }
                    // Leader failed or produced an uncacheable result
                    tracing::debug!("Flight for {} ended without a shared value", key);
                }
            }
        };

        // A leader that finished between our read and join has already stored its value
        if !refresh {
            if let Some(value) = self.fresh(key, policy, &decode).await {
                return Ok(value);
            }
        }

        let n_time = now_secs();
        let previous = self.read_entry(key).await;
        // A leader in another process keeps its token, so both may store
        let token = match &previous {
            Some(CacheEntry { status: EntryStatus::Ready, token: Some(token), .. }) => token.clone(),
            _ => uuid::Uuid::new_v4().to_string(),
        };
        let marker = CacheEntry {
            c_time: previous.as_ref().map(|e| e.c_time).unwrap_or(n_time),
            data: previous.map(|e| e.data).unwrap_or(Value::Null),
            status: EntryStatus::Ready,
            token: Some(token.clone()),
        };
        self.write_entry(key, &marker, policy.timeout).await;

        let lock_key = format!("{}_lock", key);
        let lock_ttl = policy.lock_ttl();
        let lock = match self.cache.lock(&lock_key, lock_ttl, lock_ttl).await {
            Ok(Some(lock)) => Some(lock),
            Ok(None) => {
                tracing::warn!("Timed out waiting for {}, computing without it", lock_key);
                None
            }
            Err(e) => {
                tracing::warn!("Cache lock failed for {}: {}", lock_key, e);
                None
            }
        };

        // Another process may have stored the value while we waited for the lock
        if !refresh && lock.is_some() {
            if let Some(entry) = self.read_entry(key).await {
                if entry.is_fresh(policy, now_secs()) {
                    let shared = entry.data.clone();
                    if let Some(value) = decode(entry.data) {
                        leader.publish(shared);
                        self.release(lock).await;
                        return Ok(value);
                    }
                }
            }
        }

        let outcome = compute().await;
        let gate = self.gate.read().await;
        let owned = self.owns_marker(key, &leader, &token).await;
        if !owned {
            tracing::debug!("{} was invalidated while computing, result not stored", key);
        }
        let result = match outcome {
            Ok(Computed { value, cached }) => {
                match cached {
                    Some(data) if owned => {
                        let ttl = policy.timeout_func.map(|f| f(&data)).unwrap_or(policy.timeout);
                        let entry = CacheEntry {
                            c_time: n_time,
                            data: data.clone(),
                            status: EntryStatus::Ok,
                            token: None,
                        };
                        self.write_entry(key, &entry, ttl).await;
                        leader.publish(data);
                    }
                    Some(_) => {}
                    None if owned => self.discard(key).await,
                    None => {}
                }
                Ok(value)
            }
            Err(e) => {
                if owned {
                    self.discard(key).await;
                }
                Err(e)
            }
        };
        drop(gate);
        self.release(lock).await;
        drop(leader);
        result
    }

    async fn release(&self, lock: Option<super::CacheLock>) {
        if let Some(lock) = lock {
            let key = lock.key.clone();
            if let Err(e) = self.cache.unlock(lock).await {
                tracing::warn!("Cache unlock failed for {}: {}", key, e);
            }
        }
    }
}

/// Function-level memoization
///
/// ```ignore
/// const STATS: CacheSpec = CacheSpec::new("site_stats", Duration::from_secs(600));
/// let stats: Stats = magic.cached(&STATS, None, || load_stats(&db)).await?;
/// ```
#[derive(Clone)]
pub struct MagicCacheData {
    engine: MagicEngine,
}

impl MagicCacheData {
    /// Memoize through an engine shared with other caches and the invalidator
    pub fn with_engine(engine: MagicEngine) -> Self {
        Self { engine }
    }

    /// Cached result of `compute`, stored under `magic_cache_data_<name>[_<key>]`
    pub async fn cached<T, E, F, Fut>(
        &self,
        spec: &CacheSpec,
        key: Option<&str>,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(spec, key, false, compute).await
    }

    /// Recompute and store the value even when a fresh one is cached
    pub async fn refresh<T, E, F, Fut>(
        &self,
        spec: &CacheSpec,
        key: Option<&str>,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run(spec, key, true, compute).await
    }

    async fn run<T, E, F, Fut>(
        &self,
        spec: &CacheSpec,
        key: Option<&str>,
        refresh: bool,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let cache_key = keys::magic_data_key(spec.name, key);
        let decode = |raw: Value| match serde_json::from_value::<T>(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Cached data of {} no longer decodes: {}", spec.name, e);
                None
            }
        };
        self.engine
            .resolve(&cache_key, &spec.policy(), refresh, decode, || async {
                let value = compute().await?;
                let cached = match serde_json::to_value(&value) {
                    Ok(data) => Some(data),
                    Err(e) => {
                        tracing::warn!("Result of {} is not cacheable: {}", spec.name, e);
                        None
                    }
                };
                Ok(Computed { value, cached })
            })
            .await
    }

    /// Delete entries by key part or pattern, relative to `magic_cache_data_`
    pub async fn invalid_cache(&self, pattern: &str) -> usize {
        let full = format!("{}_{}", keys::MAGIC_DATA_PREFIX, pattern);
        match self.engine.invalidate(&full).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!("Failed to invalidate {}: {}", full, e);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SPEC: CacheSpec = CacheSpec::new("expensive", Duration::from_secs(60));

    fn magic() -> (MagicCacheData, Arc<MemoryCache>) {
        let cache = Arc::new(MemoryCache::new());
        (MagicCacheData::with_engine(MagicEngine::new(cache.clone())), cache)
    }

    #[tokio::test]
    async fn test_second_call_hits_cache() {
        let (magic, cache) = magic();
        let calls = AtomicUsize::new(0);
        for _ in 0..2 {
            let value: Result<Vec<i32>, String> = magic
                .cached(&SPEC, Some("1"), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![1, 2, 3])
                })
                .await;
            assert_eq!(value.unwrap(), vec![1, 2, 3]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let raw = cache.get("magic_cache_data_expensive_1").await.unwrap().unwrap();
        assert_eq!(raw["status"], "ok");
        assert_eq!(raw["data"], serde_json::json!([1, 2, 3]));
    }

    #[tokio::test]
    async fn test_concurrent_callers_compute_once() {
        let (magic, _) = magic();
        let calls = Arc::new(AtomicUsize::new(0));
        let call = |magic: MagicCacheData, calls: Arc<AtomicUsize>| async move {
            magic
                .cached(&SPEC, Some("slow"), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, String>(42u64)
                })
                .await
        };
        let (a, b) = tokio::join!(
            tokio::spawn(call(magic.clone(), calls.clone())),
            tokio::spawn(call(magic.clone(), calls.clone())),
        );
        assert_eq!(a.unwrap().unwrap(), 42);
        assert_eq!(b.unwrap().unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_error_is_not_cached() {
        let (magic, cache) = magic();
        let failed: Result<u32, String> = magic
            .cached(&SPEC, Some("err"), || async { Err("boom".to_string()) })
            .await;
        assert_eq!(failed.unwrap_err(), "boom");
        assert_eq!(cache.get("magic_cache_data_expensive_err").await.unwrap(), None);

        let ok: Result<u32, String> = magic.cached(&SPEC, Some("err"), || async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_refresh_and_invalidate() {
        let (magic, _) = magic();
        let first: Result<u32, String> = magic.cached(&SPEC, Some("r"), || async { Ok(1) }).await;
        assert_eq!(first.unwrap(), 1);
        let refreshed: Result<u32, String> = magic.refresh(&SPEC, Some("r"), || async { Ok(2) }).await;
        assert_eq!(refreshed.unwrap(), 2);
        let cached: Result<u32, String> = magic.cached(&SPEC, Some("r"), || async { Ok(3) }).await;
        assert_eq!(cached.unwrap(), 2);

        assert_eq!(magic.invalid_cache("expensive_*").await, 1);
        let recomputed: Result<u32, String> = magic.cached(&SPEC, Some("r"), || async { Ok(4) }).await;
        assert_eq!(recomputed.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_invalid_time_shortens_freshness() {
        let (magic, _) = magic();
        let spec = CacheSpec::new("stale", Duration::from_secs(60))
            .with_invalid_time(Duration::from_secs(60));
        let calls = AtomicUsize::new(0);
        for _ in 0..2 {
            let _: Result<u8, String> = magic
                .cached(&spec, None, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                })
                .await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_func_sets_ttl() {
        fn short(_: &Value) -> Duration {
            Duration::from_millis(20)
        }
        let (magic, cache) = magic();
        let spec = CacheSpec::new("ttl", Duration::from_secs(60)).with_timeout_func(short);
        let _: Result<u8, String> = magic.cached(&spec, None, || async { Ok(1) }).await;
        assert!(cache.get("magic_cache_data_ttl").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get("magic_cache_data_ttl").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalidation_retires_running_computation() {
        let (magic, _) = magic();
        let first = {
            let magic = magic.clone();
            tokio::spawn(async move {
                magic
                    .cached(&SPEC, Some("inflight"), || async {
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Ok::<_, String>("old".to_string())
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        // Only the ready marker exists so far
        assert_eq!(magic.invalid_cache("expensive_*").await, 1);

        let after: Result<String, String> = magic
            .cached(&SPEC, Some("inflight"), || async { Ok("new".to_string()) })
            .await;
        assert_eq!(after.unwrap(), "new");
        assert_eq!(first.await.unwrap().unwrap(), "old");

        let later: Result<String, String> = magic
            .cached(&SPEC, Some("inflight"), || async { Ok("newer".to_string()) })
            .await;
        assert_eq!(later.unwrap(), "new");
    }

    #[tokio::test]
    async fn test_result_is_dropped_when_marker_disappears() {
        let (magic, cache) = magic();
        let first = {
            let magic = magic.clone();
            tokio::spawn(async move {
                magic
                    .cached(&SPEC, Some("gone"), || async {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok::<_, String>(1u32)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        // Deleted behind the engine's back, as another process would
        assert!(cache.delete("magic_cache_data_expensive_gone").await.unwrap());
        assert_eq!(first.await.unwrap().unwrap(), 1);
        assert_eq!(cache.get("magic_cache_data_expensive_gone").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_shared_engine_retires_across_caches() {
        let cache: SharedCache = Arc::new(MemoryCache::new());
        let engine = MagicEngine::new(cache);
        let reader = MagicCacheData::with_engine(engine.clone());
        let first = {
            let reader = reader.clone();
            tokio::spawn(async move {
                reader
                    .cached(&SPEC, Some("7_GET"), || async {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok::<_, String>(vec!["stale".to_string()])
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        engine.invalidate("magic_cache_data_expensive_7_*").await.unwrap();
        let fresh: Result<Vec<String>, String> = reader
            .cached(&SPEC, Some("7_GET"), || async { Ok(vec!["fresh".to_string()]) })
            .await;
        assert_eq!(fresh.unwrap(), vec!["fresh"]);
        first.await.unwrap().unwrap();

        let cached: Result<Vec<String>, String> = reader
            .cached(&SPEC, Some("7_GET"), || async { Ok(vec!["later".to_string()]) })
            .await;
        assert_eq!(cached.unwrap(), vec!["fresh"]);
    }
}
