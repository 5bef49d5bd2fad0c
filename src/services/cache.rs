use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;

use crate::db::{CacheRow, CacheStore};
use crate::error::AppResult;
use crate::services::single_flight::KeyedLocks;

/// Bumped whenever the cached payload shape changes. Keys derived from older
/// versions stop matching and their rows age out through the TTL.
pub const CACHE_VERSION: &str = "v2";

/// Read-only introspection of one user's cache rows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheDebugReport {
    pub total: usize,
    pub fresh: usize,
    pub expired: usize,
    pub entries: Vec<CacheReportEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheReportEntry {
    pub cache_key: String,
    pub cache_version: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub payload_size: usize,
}

/// Wraps strategy calls with a per-user, content-addressed, fixed-TTL cache
/// in the relational store, coalescing concurrent regeneration of the same
/// key through an in-process lock map.
///
/// The lock map only serializes callers within this process; across
/// processes the unique-key upsert keeps concurrent writers convergent (they
/// waste provider quota, they never duplicate rows).
pub struct CacheCoordinator {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
    locks: KeyedLocks,
}

impl CacheCoordinator {
    pub fn new(store: Arc<dyn CacheStore>, ttl_minutes: i64) -> Self {
        Self {
            store,
            ttl: Duration::minutes(ttl_minutes),
            locks: KeyedLocks::new(),
        }
    }

    /// Deterministic key for one logical request: identical endpoint and
    /// params always address the same row.
    pub fn cache_key(endpoint: &str, params: &[(&str, String)]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(endpoint.as_bytes());
        for (name, value) in params {
            hasher.update(b"|");
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
        }
        hasher.update(b"|");
        hasher.update(CACHE_VERSION.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Return the cached payload for this request, or run `generate` to
    /// produce, persist, and return a fresh one.
    ///
    /// Read path: a fresh, decodable row short-circuits without locking.
    /// Miss path: acquire the per-key lock, re-check (a concurrent caller may
    /// have refreshed the row while we waited), then generate and upsert.
    /// A failed generator falls back to any payload read along the way,
    /// stale included; the error only propagates when no payload exists.
    pub async fn get_cached<T, F, Fut>(
        &self,
        user_id: i64,
        endpoint: &str,
        params: &[(&str, String)],
        generate: F,
    ) -> AppResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let key = Self::cache_key(endpoint, params);

        let initial = self.store.fetch(user_id, &key).await?;
        if let Some(row) = &initial {
            if row.is_fresh(Utc::now()) {
                match serde_json::from_str::<T>(&row.payload) {
                    Ok(value) => {
                        tracing::debug!(user_id, endpoint, "Cache hit");
                        return Ok(value);
                    }
                    // An undecodable payload is a miss, not a hard error.
                    Err(e) => {
                        tracing::warn!(user_id, endpoint, error = %e, "Discarding undecodable cache payload")
                    }
                }
            }
        }

        let lock_key = format!("{}:{}", user_id, key);
        let guard = self.locks.acquire(&lock_key).await;

        let recheck = match self.store.fetch(user_id, &key).await {
            Ok(row) => row,
            Err(e) => {
                drop(guard);
                self.locks.release(&lock_key).await;
                return Err(e);
            }
        };
        if let Some(row) = &recheck {
            if row.is_fresh(Utc::now()) {
                if let Ok(value) = serde_json::from_str::<T>(&row.payload) {
                    tracing::debug!(user_id, endpoint, "Cache refreshed by concurrent caller");
                    drop(guard);
                    self.locks.release(&lock_key).await;
                    return Ok(value);
                }
            }
        }

        tracing::debug!(user_id, endpoint, "Cache miss, generating");
        let outcome = match generate().await {
            Ok(value) => self.persist(user_id, &key, value).await,
            Err(e) => {
                // Serve stale on generator failure whenever any payload exists.
                let fallback = recheck
                    .as_ref()
                    .or(initial.as_ref())
                    .and_then(|row| serde_json::from_str::<T>(&row.payload).ok());
                match fallback {
                    Some(value) => {
                        tracing::warn!(
                            user_id,
                            endpoint,
                            error = %e,
                            "Generator failed, serving stale cached payload"
                        );
                        Ok(value)
                    }
                    None => Err(e),
                }
            }
        };

        drop(guard);
        self.locks.release(&lock_key).await;
        outcome
    }

    async fn persist<T: Serialize>(&self, user_id: i64, key: &str, value: T) -> AppResult<T> {
        let payload = serde_json::to_string(&value)?;
        let now = Utc::now();
        let row = CacheRow {
            user_id,
            cache_key: key.to_string(),
            payload,
            cache_version: CACHE_VERSION.to_string(),
            // Fixed window from generation time, never extended by reads.
            expires_at: now + self.ttl,
            created_at: now,
            updated_at: now,
        };
        self.store.upsert(row).await?;
        Ok(value)
    }

    /// Drop every cached result for one user (preference or membership change).
    pub async fn invalidate_user(&self, user_id: i64) -> AppResult<u64> {
        self.store.delete_for_user(user_id).await
    }

    /// Drop cached results for every user sourcing a deleted collection.
    pub async fn invalidate_collection(&self, collection_id: i64) -> AppResult<u64> {
        self.store.delete_for_collection(collection_id).await
    }

    pub async fn debug_report(&self, user_id: i64) -> AppResult<CacheDebugReport> {
        let rows = self.store.rows_for_user(user_id).await?;
        let now = Utc::now();
        let fresh = rows.iter().filter(|row| row.is_fresh(now)).count();

        Ok(CacheDebugReport {
            total: rows.len(),
            fresh,
            expired: rows.len() - fresh,
            entries: rows
                .into_iter()
                .map(|row| CacheReportEntry {
                    cache_key: row.cache_key,
                    cache_version: row.cache_version,
                    expires_at: row.expires_at,
                    created_at: row.created_at,
                    updated_at: row.updated_at,
                    payload_size: row.payload.len(),
                })
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::services::test_support::MemoryCacheStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Payload {
        results: Vec<String>,
    }

    fn payload(values: &[&str]) -> Payload {
        Payload {
            results: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    fn coordinator(store: Arc<MemoryCacheStore>) -> CacheCoordinator {
        CacheCoordinator::new(store, 30)
    }

    #[test]
    fn test_cache_key_is_deterministic() {
        let params = [("limit", "20".to_string()), ("page", "1".to_string())];
        let a = CacheCoordinator::cache_key("recommendations/for-you", &params);
        let b = CacheCoordinator::cache_key("recommendations/for-you", &params);
        assert_eq!(a, b);
    }

    #[test]
    fn test_cache_key_varies_with_inputs() {
        let base = CacheCoordinator::cache_key("a", &[("p", "1".to_string())]);
        assert_ne!(base, CacheCoordinator::cache_key("b", &[("p", "1".to_string())]));
        assert_ne!(base, CacheCoordinator::cache_key("a", &[("p", "2".to_string())]));
        assert_ne!(base, CacheCoordinator::cache_key("a", &[("q", "1".to_string())]));
    }

    #[tokio::test]
    async fn test_miss_then_hit_invokes_generator_once() {
        let store = Arc::new(MemoryCacheStore::default());
        let cache = coordinator(Arc::clone(&store));
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let result: Payload = cache
                .get_cached(1, "recommendations/for-you", &[], || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(payload(&["A"]))
                })
                .await
                .unwrap();
            assert_eq!(result, payload(&["A"]));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_row_regenerates() {
        let store = Arc::new(MemoryCacheStore::default());
        let now = Utc::now();
        store
            .seed(CacheRow {
                user_id: 1,
                cache_key: CacheCoordinator::cache_key("e", &[]),
                payload: serde_json::to_string(&payload(&["old"])).unwrap(),
                cache_version: CACHE_VERSION.to_string(),
                expires_at: now - Duration::minutes(1),
                created_at: now - Duration::minutes(31),
                updated_at: now - Duration::minutes(31),
            })
            .await;

        let cache = coordinator(Arc::clone(&store));
        let calls = AtomicUsize::new(0);
        let result: Payload = cache
            .get_cached(1, "e", &[], || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(payload(&["new"]))
            })
            .await
            .unwrap();

        assert_eq!(result, payload(&["new"]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // The refreshed row must now serve without regeneration.
        let again: Payload = cache
            .get_cached(1, "e", &[], || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(payload(&["newer"]))
            })
            .await
            .unwrap();
        assert_eq!(again, payload(&["new"]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_callers_coalesce_to_one_generation() {
        let store = Arc::new(MemoryCacheStore::default());
        let cache = Arc::new(coordinator(Arc::clone(&store)));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..6 {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            tasks.push(tokio::spawn(async move {
                cache
                    .get_cached(7, "coalesce", &[], move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok(payload(&["shared"]))
                    })
                    .await
                    .unwrap()
            }));
        }

        for task in tasks {
            assert_eq!(task.await.unwrap(), payload(&["shared"]));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_generator_failure_serves_stale_payload() {
        let store = Arc::new(MemoryCacheStore::default());
        let now = Utc::now();
        store
            .seed(CacheRow {
                user_id: 2,
                cache_key: CacheCoordinator::cache_key("stale", &[]),
                payload: serde_json::to_string(&payload(&["stale"])).unwrap(),
                cache_version: CACHE_VERSION.to_string(),
                expires_at: now - Duration::minutes(5),
                created_at: now - Duration::minutes(35),
                updated_at: now - Duration::minutes(35),
            })
            .await;

        let cache = coordinator(Arc::clone(&store));
        let result: Payload = cache
            .get_cached(2, "stale", &[], || async {
                Err(AppError::Internal("provider exploded".to_string()))
            })
            .await
            .unwrap();

        assert_eq!(result, payload(&["stale"]));
    }

    #[tokio::test]
    async fn test_generator_failure_without_payload_propagates() {
        let store = Arc::new(MemoryCacheStore::default());
        let cache = coordinator(Arc::clone(&store));

        let result: AppResult<Payload> = cache
            .get_cached(3, "nothing", &[], || async {
                Err(AppError::Internal("provider exploded".to_string()))
            })
            .await;

        assert!(matches!(result, Err(AppError::Internal(_))));
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_a_miss() {
        let store = Arc::new(MemoryCacheStore::default());
        let now = Utc::now();
        store
            .seed(CacheRow {
                user_id: 4,
                cache_key: CacheCoordinator::cache_key("corrupt", &[]),
                payload: "{not valid json".to_string(),
                cache_version: CACHE_VERSION.to_string(),
                expires_at: now + Duration::minutes(10),
                created_at: now,
                updated_at: now,
            })
            .await;

        let cache = coordinator(Arc::clone(&store));
        let calls = AtomicUsize::new(0);
        let result: Payload = cache
            .get_cached(4, "corrupt", &[], || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(payload(&["regenerated"]))
            })
            .await
            .unwrap();

        assert_eq!(result, payload(&["regenerated"]));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_upsert_overwrites_single_row() {
        let store = Arc::new(MemoryCacheStore::default());
        let cache = coordinator(Arc::clone(&store));

        let _: Payload = cache
            .get_cached(5, "row", &[], || async { Ok(payload(&["v1"])) })
            .await
            .unwrap();
        store.expire_all().await;
        let _: Payload = cache
            .get_cached(5, "row", &[], || async { Ok(payload(&["v2"])) })
            .await
            .unwrap();

        let report = cache.debug_report(5).await.unwrap();
        assert_eq!(report.total, 1);
        assert_eq!(report.fresh, 1);
        assert_eq!(report.expired, 0);
    }

    #[tokio::test]
    async fn test_debug_report_counts() {
        let store = Arc::new(MemoryCacheStore::default());
        let cache = coordinator(Arc::clone(&store));

        let _: Payload = cache
            .get_cached(6, "a", &[], || async { Ok(payload(&["a"])) })
            .await
            .unwrap();
        let _: Payload = cache
            .get_cached(6, "b", &[], || async { Ok(payload(&["b"])) })
            .await
            .unwrap();
        store.expire_key(6, &CacheCoordinator::cache_key("a", &[])).await;

        let report = cache.debug_report(6).await.unwrap();
        assert_eq!(report.total, 2);
        assert_eq!(report.fresh, 1);
        assert_eq!(report.expired, 1);
        assert!(report.entries.iter().all(|e| e.payload_size > 0));
        assert!(report.entries.iter().all(|e| e.cache_version == CACHE_VERSION));
    }
}
