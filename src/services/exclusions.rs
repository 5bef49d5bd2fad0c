use std::sync::Arc;

use crate::db::CatalogStore;
use crate::error::AppResult;
use crate::models::{ExclusionSnapshot, SourceCollection};
use crate::services::cache::CacheCoordinator;

/// Compute (or read back) the set of identifiers the user must never be
/// recommended: everything collected in a source collection plus system
/// watched / not-interested memberships.
///
/// The snapshot is cached with the same TTL and locking discipline as
/// strategy results, keyed by the sorted source-collection-id list so a
/// membership-equivalent request always addresses the same row.
pub async fn exclusion_snapshot(
    catalog: &Arc<dyn CatalogStore>,
    cache: &CacheCoordinator,
    user_id: i64,
    source_collections: &[SourceCollection],
) -> AppResult<ExclusionSnapshot> {
    let mut collection_ids: Vec<i64> = source_collections.iter().map(|c| c.id).collect();
    collection_ids.sort_unstable();

    let joined = collection_ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let params = [("collections", joined)];

    let catalog = Arc::clone(catalog);
    cache
        .get_cached(user_id, "exclusions", &params, move || async move {
            let ids = catalog.exclusion_ids(user_id, &collection_ids).await?;
            tracing::debug!(user_id, excluded = ids.len(), "Computed exclusion snapshot");
            Ok(ExclusionSnapshot::new(ids))
        })
        .await
}
