use async_trait::async_trait;
use sqlx::PgPool;
use std::collections::HashSet;

use crate::error::AppResult;
use crate::models::{MediaId, SourceCollection, UserFlags};

/// Read-only seam to the tables owned by the collection/preferences layer.
///
/// Recommendation generation never writes through this trait; collection CRUD
/// lives elsewhere and notifies this crate through the invalidation hooks.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// The user's designated source collections, most recently associated first.
    async fn source_collections(&self, user_id: i64) -> AppResult<Vec<SourceCollection>>;

    /// All items across the user's source collections, deduplicated.
    async fn source_items(&self, user_id: i64) -> AppResult<Vec<MediaId>>;

    /// Identifiers the user has collected or marked through any system
    /// collection (watched / not-interested), plus active source members.
    async fn exclusion_ids(
        &self,
        user_id: i64,
        source_collection_ids: &[i64],
    ) -> AppResult<HashSet<MediaId>>;

    async fn user_flags(&self, user_id: i64) -> AppResult<UserFlags>;
}

/// PostgreSQL-backed catalog reads.
#[derive(Clone)]
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Decode boundary-encoded identifiers, dropping rows that fail to parse.
/// A malformed row is a data bug in the owning layer, not a reason to fail
/// the whole recommendation pass.
fn decode_ids<I: IntoIterator<Item = String>>(raw: I) -> Vec<MediaId> {
    raw.into_iter()
        .filter_map(|s| match s.parse::<MediaId>() {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed media identifier in store");
                None
            }
        })
        .collect()
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn source_collections(&self, user_id: i64) -> AppResult<Vec<SourceCollection>> {
        let rows = sqlx::query_as::<_, SourceCollection>(
            r#"
            SELECT c.id, c.name
            FROM collections c
            JOIN collection_sources cs ON cs.collection_id = c.id
            WHERE cs.user_id = $1
            ORDER BY cs.added_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn source_items(&self, user_id: i64) -> AppResult<Vec<MediaId>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT ci.media_id
            FROM collection_items ci
            JOIN collection_sources cs ON cs.collection_id = ci.collection_id
            WHERE cs.user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(decode_ids(rows.into_iter().map(|(id,)| id)))
    }

    async fn exclusion_ids(
        &self,
        user_id: i64,
        source_collection_ids: &[i64],
    ) -> AppResult<HashSet<MediaId>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT ci.media_id
            FROM collection_items ci
            JOIN collections c ON c.id = ci.collection_id
            WHERE c.id = ANY($2)
               OR (c.owner_id = $1 AND c.system_kind IN ('watched', 'not_interested'))
            "#,
        )
        .bind(user_id)
        .bind(source_collection_ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(decode_ids(rows.into_iter().map(|(id,)| id)).into_iter().collect())
    }

    async fn user_flags(&self, user_id: i64) -> AppResult<UserFlags> {
        let flags = sqlx::query_as::<_, UserFlags>(
            r#"
            SELECT recommendations_enabled, category_recommendations_enabled
            FROM user_settings
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        // Users without a settings row have never opted out.
        Ok(flags.unwrap_or(UserFlags {
            recommendations_enabled: true,
            category_recommendations_enabled: true,
        }))
    }
}
