use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use sqlx::{Pool, Sqlite};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use crate::api::RequestKey;
use crate::error::{CacheError, Error};
use crate::models::{CacheEntry, RawPayload};

/// Backing storage for cached payloads.
///
/// `put` must be atomic: after an error nothing is stored for the key.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Store an entry unless the key is already present
    async fn put(&self, entry: &CacheEntry) -> Result<(), CacheError>;

    async fn remove(&self, key: &str) -> Result<bool, CacheError>;

    async fn clear(&self) -> Result<u64, CacheError>;

    async fn len(&self) -> Result<u64, CacheError>;
}

/// Process-lifetime store
#[derive(Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn put(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        self.entries
            .write()
            .entry(entry.request_key.clone())
            .or_insert_with(|| entry.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.write().remove(key).is_some())
    }

    async fn clear(&self) -> Result<u64, CacheError> {
        let mut entries = self.entries.write();
        let count = entries.len() as u64;
        entries.clear();
        Ok(count)
    }

    async fn len(&self) -> Result<u64, CacheError> {
        Ok(self.entries.read().len() as u64)
    }
}

/// SQLite store, so payloads survive across runs
pub struct SqliteCacheStore {
    pool: Pool<Sqlite>,
}

impl SqliteCacheStore {
    /// Open the store and initialize the schema
    pub async fn new(database_url: &str) -> Result<Self, CacheError> {
        let pool = super::connect(database_url).await?;
        Self::with_pool(pool).await
    }

    pub async fn with_pool(pool: Pool<Sqlite>) -> Result<Self, CacheError> {
        let store = Self { pool };
        store.init_schema().await?;

        info!("Response cache store initialized");
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), CacheError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS response_cache (
                request_key TEXT PRIMARY KEY NOT NULL,
                payload TEXT NOT NULL,
                fetched_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let row: Option<(String, String)> = sqlx::query_as(
            "SELECT payload, fetched_at FROM response_cache WHERE request_key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        let (payload, fetched_at) = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let payload = RawPayload::from_json(&payload).map_err(|e| CacheError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        let fetched_at = DateTime::parse_from_rfc3339(&fetched_at)
            .map_err(|e| CacheError::Corrupt {
                key: key.to_string(),
                reason: format!("bad fetched_at: {}", e),
            })?
            .with_timezone(&Utc);

        Ok(Some(CacheEntry {
            request_key: key.to_string(),
            payload,
            fetched_at,
        }))
    }

    async fn put(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        // Serialize first so a bad payload never reaches the table
        let payload = entry
            .payload
            .to_json_string()
            .map_err(|source| CacheError::Encode {
                key: entry.request_key.clone(),
                source,
            })?;

        sqlx::query(
            r#"
            INSERT INTO response_cache (request_key, payload, fetched_at)
            VALUES (?, ?, ?)
            ON CONFLICT(request_key) DO NOTHING
            "#,
        )
        .bind(&entry.request_key)
        .bind(payload)
        .bind(entry.fetched_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        let result = sqlx::query("DELETE FROM response_cache WHERE request_key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn clear(&self) -> Result<u64, CacheError> {
        let result = sqlx::query("DELETE FROM response_cache")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn len(&self) -> Result<u64, CacheError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM response_cache")
            .fetch_one(&self.pool)
            .await?;

        Ok(row.0.max(0) as u64)
    }
}

/// Hit/miss counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Per-key lock shared by concurrent misses. The map entry is removed when
/// the last holder lets go, including when its future is dropped mid-fetch.
struct InFlightSlot<'a> {
    slots: &'a DashMap<RequestKey, Arc<AsyncMutex<()>>>,
    key: &'a RequestKey,
    lock: Arc<AsyncMutex<()>>,
}

impl<'a> InFlightSlot<'a> {
    fn claim(slots: &'a DashMap<RequestKey, Arc<AsyncMutex<()>>>, key: &'a RequestKey) -> Self {
        let lock = slots
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone();
        Self { slots, key, lock }
    }
}

impl Drop for InFlightSlot<'_> {
    fn drop(&mut self) {
        // Only the map and this slot hold the lock
        self.slots
            .remove_if(self.key, |_, lock| Arc::strong_count(lock) <= 2);
    }
}

/// Read-through, write-through cache in front of the API client.
///
/// Concurrent requests for the same key share one fetch: later callers wait
/// on a per-key lock and then read what the first caller stored. Unrelated
/// keys never wait on each other.
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    in_flight: DashMap<RequestKey, Arc<AsyncMutex<()>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            in_flight: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCacheStore::new()))
    }

    /// Return the cached payload for `key`, or run `fetch` and store its result.
    ///
    /// A failed fetch stores nothing and its error is returned to this caller.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: &RequestKey, fetch: F) -> Result<RawPayload, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<RawPayload, E>>,
        Error: From<E>,
    {
        if let Some(entry) = self.store.get(key.as_str()).await? {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("Cache hit for {}", key);
            return Ok(entry.payload);
        }

        let slot = InFlightSlot::claim(&self.in_flight, key);
        let _guard = slot.lock.lock().await;
        self.fetch_locked(key, fetch).await
    }

    async fn fetch_locked<F, Fut, E>(&self, key: &RequestKey, fetch: F) -> Result<RawPayload, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<RawPayload, E>>,
        Error: From<E>,
    {
        // Another caller may have filled the entry while we waited
        if let Some(entry) = self.store.get(key.as_str()).await? {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("Cache hit for {} after waiting on in-flight fetch", key);
            return Ok(entry.payload);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!("Cache miss for {}", key);

        let payload = fetch().await?;

        let entry = CacheEntry {
            request_key: key.as_str().to_string(),
            payload: payload.clone(),
            fetched_at: Utc::now(),
        };
        self.store.put(&entry).await?;

        Ok(payload)
    }

    /// Look up without fetching
    pub async fn peek(&self, key: &RequestKey) -> Result<Option<CacheEntry>, CacheError> {
        self.store.get(key.as_str()).await
    }

    /// Forget one entry so the next request refetches it
    pub async fn invalidate(&self, key: &RequestKey) -> Result<bool, CacheError> {
        let removed = self.store.remove(key.as_str()).await?;
        if removed {
            debug!("Invalidated cache entry {}", key);
        }
        Ok(removed)
    }

    /// Forget everything, e.g. after a patch update
    pub async fn clear(&self) -> Result<u64, CacheError> {
        let removed = self.store.clear().await?;
        info!("Cleared {} cache entries", removed);
        Ok(removed)
    }

    pub async fn len(&self) -> Result<u64, CacheError> {
        self.store.len().await
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::api::endpoints::{match_detail, Region};
    use crate::error::{ApiError, ApiErrorKind};

    fn key(id: &str) -> RequestKey {
        match_detail(&Region::new("americas"), id).key()
    }

    #[tokio::test]
    async fn test_second_call_is_a_hit() {
        let cache = ResponseCache::in_memory();
        let calls = AtomicUsize::new(0);
        let calls = &calls;
        let k = key("LA1_1");

        let fetch = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ApiError>(RawPayload::new(json!({ "n": 1 })))
        };

        let first = cache.get_or_fetch(&k, fetch).await.unwrap();
        let second = cache.get_or_fetch(&k, fetch).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first, second);
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });
    }

    #[tokio::test]
    async fn test_failed_fetch_stores_nothing() {
        let cache = ResponseCache::in_memory();
        let k = key("LA1_2");

        let err = cache
            .get_or_fetch(&k, || async {
                Err::<RawPayload, _>(ApiError::new(ApiErrorKind::ServerError, "boom"))
            })
            .await
            .unwrap_err();

        assert_eq!(err.api_kind(), Some(ApiErrorKind::ServerError));
        assert!(cache.peek(&k).await.unwrap().is_none());
        assert_eq!(cache.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let cache = ResponseCache::in_memory();
        let k = key("LA1_3");
        let calls = AtomicUsize::new(0);
        let calls = &calls;
        let fetch = move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ApiError>(RawPayload::new(json!({ "n": n })))
        };

        cache.get_or_fetch(&k, fetch).await.unwrap();
        assert!(cache.invalidate(&k).await.unwrap());
        let refreshed = cache.get_or_fetch(&k, fetch).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(refreshed.get_path("n"), Some(&json!(1)));

        assert_eq!(cache.clear().await.unwrap(), 1);
        assert_eq!(cache.len().await.unwrap(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_requests_share_one_fetch() {
        let cache = Arc::new(ResponseCache::in_memory());
        let calls = Arc::new(AtomicUsize::new(0));
        let k = key("LA1_4");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            let k = k.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_fetch(&k, || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, ApiError>(RawPayload::new(json!({ "shared": true })))
                    })
                    .await
                    .unwrap()
            }));
        }

        for handle in handles {
            let payload = handle.await.unwrap();
            assert_eq!(payload.get_path("shared"), Some(&json!(true)));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.in_flight.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_fetch_releases_slot() {
        let cache = ResponseCache::in_memory();
        let k = key("LA1_ABANDONED");

        let abandoned = tokio::time::timeout(
            Duration::from_secs(1),
            cache.get_or_fetch(&k, std::future::pending::<Result<RawPayload, ApiError>>),
        )
        .await;
        assert!(abandoned.is_err());
        assert!(cache.in_flight.is_empty());

        let payload = cache
            .get_or_fetch(&k, || async { Ok::<_, ApiError>(RawPayload::new(json!({ "n": 1 }))) })
            .await
            .unwrap();
        assert_eq!(payload.get_path("n"), Some(&json!(1)));
        assert!(cache.in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_store_round_trip() {
        let store = SqliteCacheStore::new("sqlite::memory:").await.unwrap();
        let entry = CacheEntry {
            request_key: "americas:/x".to_string(),
            payload: RawPayload::new(json!({ "metadata": { "matchId": "LA1_9" } })),
            fetched_at: Utc::now(),
        };

        store.put(&entry).await.unwrap();
        // Second put for the same key keeps the original payload
        store
            .put(&CacheEntry {
                payload: RawPayload::new(json!({})),
                ..entry.clone()
            })
            .await
            .unwrap();

        let loaded = store.get("americas:/x").await.unwrap().unwrap();
        assert_eq!(loaded.payload, entry.payload);
        assert_eq!(store.len().await.unwrap(), 1);

        assert!(store.remove("americas:/x").await.unwrap());
        assert!(store.get("americas:/x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cache_survives_reopen() {
        let dir = std::env::temp_dir().join(format!("champion-trends-cache-{}", std::process::id()));
        let url = format!("sqlite:{}", dir.join("cache.db").display());

        {
            let cache = ResponseCache::new(Arc::new(SqliteCacheStore::new(&url).await.unwrap()));
            cache
                .get_or_fetch(&key("LA1_5"), || async {
                    Ok::<_, ApiError>(RawPayload::new(json!({ "persisted": 1 })))
                })
                .await
                .unwrap();
        }

        let reopened = ResponseCache::new(Arc::new(SqliteCacheStore::new(&url).await.unwrap()));
        let payload = reopened
            .get_or_fetch(&key("LA1_5"), || async {
                Err::<RawPayload, _>(ApiError::network("should not be called"))
            })
            .await
            .unwrap();

        assert_eq!(payload.get_path("persisted"), Some(&json!(1)));
        let _ = std::fs::remove_dir_all(dir);
    }
}
