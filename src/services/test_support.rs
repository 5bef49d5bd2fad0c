//! Shared in-memory collaborators for unit tests.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::db::{CacheRow, CacheStore};
use crate::error::AppResult;

/// Map-backed stand-in for the relational cache table, mirroring its upsert
/// semantics: one row per (user, key), `created_at` preserved on overwrite.
#[derive(Default)]
pub struct MemoryCacheStore {
    rows: Mutex<HashMap<(i64, String), CacheRow>>,
}

impl MemoryCacheStore {
    pub async fn seed(&self, row: CacheRow) {
        self.rows
            .lock()
            .await
            .insert((row.user_id, row.cache_key.clone()), row);
    }

    pub async fn expire_all(&self) {
        let past = Utc::now() - Duration::minutes(1);
        for row in self.rows.lock().await.values_mut() {
            row.expires_at = past;
        }
    }

    pub async fn expire_key(&self, user_id: i64, cache_key: &str) {
        if let Some(row) = self
            .rows
            .lock()
            .await
            .get_mut(&(user_id, cache_key.to_string()))
        {
            row.expires_at = Utc::now() - Duration::minutes(1);
        }
    }

    pub async fn row_count(&self) -> usize {
        self.rows.lock().await.len()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn fetch(&self, user_id: i64, cache_key: &str) -> AppResult<Option<CacheRow>> {
        Ok(self
            .rows
            .lock()
            .await
            .get(&(user_id, cache_key.to_string()))
            .cloned())
    }

    async fn upsert(&self, mut row: CacheRow) -> AppResult<()> {
        let mut rows = self.rows.lock().await;
        let key = (row.user_id, row.cache_key.clone());
        if let Some(existing) = rows.get(&key) {
            row.created_at = existing.created_at;
        }
        rows.insert(key, row);
        Ok(())
    }

    async fn delete_for_user(&self, user_id: i64) -> AppResult<u64> {
        let mut rows = self.rows.lock().await;
        let before = rows.len();
        rows.retain(|(owner, _), _| *owner != user_id);
        Ok((before - rows.len()) as u64)
    }

    async fn delete_for_collection(&self, _collection_id: i64) -> AppResult<u64> {
        // The collection-to-user join lives in the relational store; the
        // in-memory stand-in has no mapping to consult.
        Ok(0)
    }

    async fn rows_for_user(&self, user_id: i64) -> AppResult<Vec<CacheRow>> {
        Ok(self
            .rows
            .lock()
            .await
            .values()
            .filter(|row| row.user_id == user_id)
            .cloned()
            .collect())
    }
}
