use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::error::AppResult;

/// One cached strategy result, unique per `(user_id, cache_key)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CacheRow {
    pub user_id: i64,
    pub cache_key: String,
    pub payload: String,
    pub cache_version: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CacheRow {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Persistence seam for the recommendation cache table.
///
/// The table itself is the only cross-process shared mutable resource in the
/// subsystem; correctness under uncoordinated concurrent writers relies on
/// `upsert` being an atomic insert-or-update on the unique key pair.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Fetch the row for `(user_id, cache_key)`, fresh or stale.
    async fn fetch(&self, user_id: i64, cache_key: &str) -> AppResult<Option<CacheRow>>;

    /// Insert or overwrite the row for the row's `(user_id, cache_key)`.
    async fn upsert(&self, row: CacheRow) -> AppResult<()>;

    /// Drop every row for one user. Returns the number of rows removed.
    async fn delete_for_user(&self, user_id: i64) -> AppResult<u64>;

    /// Drop the rows of every user that sources the given collection.
    async fn delete_for_collection(&self, collection_id: i64) -> AppResult<u64>;

    /// All rows for one user, for cache introspection.
    async fn rows_for_user(&self, user_id: i64) -> AppResult<Vec<CacheRow>>;
}

/// PostgreSQL-backed cache store.
#[derive(Clone)]
pub struct PgCacheStore {
    pool: PgPool,
}

impl PgCacheStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CacheStore for PgCacheStore {
    async fn fetch(&self, user_id: i64, cache_key: &str) -> AppResult<Option<CacheRow>> {
        let row = sqlx::query_as::<_, CacheRow>(
            r#"
            SELECT user_id, cache_key, payload, cache_version, expires_at, created_at, updated_at
            FROM recommendation_cache
            WHERE user_id = $1 AND cache_key = $2
            "#,
        )
        .bind(user_id)
        .bind(cache_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn upsert(&self, row: CacheRow) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO recommendation_cache
                (user_id, cache_key, payload, cache_version, expires_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id, cache_key) DO UPDATE SET
                payload = excluded.payload,
                cache_version = excluded.cache_version,
                expires_at = excluded.expires_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(row.user_id)
        .bind(&row.cache_key)
        .bind(&row.payload)
        .bind(&row.cache_version)
        .bind(row.expires_at)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;

        tracing::debug!(
            user_id = row.user_id,
            cache_key = %row.cache_key,
            expires_at = %row.expires_at,
            "Cache row upserted"
        );

        Ok(())
    }

    async fn delete_for_user(&self, user_id: i64) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM recommendation_cache WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        let count = result.rows_affected();
        if count > 0 {
            tracing::info!(user_id, rows = count, "Invalidated recommendation cache for user");
        }
        Ok(count)
    }

    async fn delete_for_collection(&self, collection_id: i64) -> AppResult<u64> {
        // A collection deletion affects every user sourcing it, so the delete
        // joins through the user-collection-source mapping rather than a
        // single user id.
        let result = sqlx::query(
            r#"
            DELETE FROM recommendation_cache
            WHERE user_id IN (
                SELECT user_id FROM collection_sources WHERE collection_id = $1
            )
            "#,
        )
        .bind(collection_id)
        .execute(&self.pool)
        .await?;

        let count = result.rows_affected();
        if count > 0 {
            tracing::info!(
                collection_id,
                rows = count,
                "Invalidated recommendation cache for collection sources"
            );
        }
        Ok(count)
    }

    async fn rows_for_user(&self, user_id: i64) -> AppResult<Vec<CacheRow>> {
        let rows = sqlx::query_as::<_, CacheRow>(
            r#"
            SELECT user_id, cache_key, payload, cache_version, expires_at, created_at, updated_at
            FROM recommendation_cache
            WHERE user_id = $1
            ORDER BY updated_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_freshness() {
        let now = Utc::now();
        let row = CacheRow {
            user_id: 1,
            cache_key: "k".into(),
            payload: "{}".into(),
            cache_version: "v2".into(),
            expires_at: now + chrono::Duration::minutes(5),
            created_at: now,
            updated_at: now,
        };
        assert!(row.is_fresh(now));
        assert!(!row.is_fresh(now + chrono::Duration::minutes(6)));
    }
}
