use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::config::Config;
use crate::db::{create_pool, CatalogStore, PgCacheStore, PgCatalogStore};
use crate::error::AppResult;
use crate::models::{
    Candidate, CategoryBlock, CategoryResponse, ExclusionSnapshot, Genre, MediaKind, MediaSummary,
    Paged, RecommendationPage, SourceCollection,
};
use crate::services::aggregator::{CandidateSet, Discovery};
use crate::services::cache::{CacheCoordinator, CacheDebugReport};
use crate::services::exclusions::exclusion_snapshot;
use crate::services::gateway::{
    MetadataGateway, MetadataSource, DISCOVER_MIN_RATING, DISCOVER_MIN_VOTES,
};
use crate::services::profile::{sample_items, AffinityProfile, ProfileBuilder, SourceSignals, TOP_BILLED};
use crate::services::top_k::{paginate, select_top_k};

// Sample sizes per strategy: more seeds where the pool is narrowed further
// downstream (genre filter discards most primary hits).
const GENERAL_SAMPLE: usize = 10;
const CATEGORY_SAMPLE: usize = 15;
const GENRE_SAMPLE: usize = 20;
const THEATRICAL_SAMPLE: usize = 10;

const PRIMARY_POPULARITY_CAP: f64 = 50.0;
const PERSON_POPULARITY_CAP: f64 = 20.0;
const DISCOVER_POPULARITY_CAP: f64 = 30.0;
const NOW_PLAYING_POPULARITY_CAP: f64 = 30.0;
const TRENDING_POPULARITY_CAP: f64 = 50.0;

/// Flat boost ranking source-derived candidates above discover filler in the
/// genre strategy.
const GENRE_PRIMARY_BOOST: f64 = 100.0;
/// Person-affinity multiplier where primary evidence also exists.
const GENERAL_PERSON_MULTIPLIER: f64 = 3.0;
/// Larger multipliers for now-playing, which has no primary evidence to lean on.
const THEATRICAL_DIRECTOR_MULTIPLIER: f64 = 10.0;
const THEATRICAL_ACTOR_MULTIPLIER: f64 = 5.0;

/// Works taken per top person in supplementary discovery.
const PERSON_DISCOVERY_WORKS: usize = 3;
/// Page fan-out ceilings for paged provider listings.
const DISCOVER_PAGE_BOUND: u32 = 10;
const TRENDING_PAGE_BOUND: u32 = 5;
/// The provider returns twenty results per page.
const PROVIDER_PAGE_SIZE: usize = 20;

const REASON_RECOMMENDED: &str = "recommended_for_library_item";
const REASON_SIMILAR: &str = "similar_to_library_item";
const REASON_DIRECTOR: &str = "directed_by_favorite";
const REASON_ACTOR: &str = "features_favorite_actor";
const REASON_GENRE_DISCOVER: &str = "genre_discover";
const REASON_NOW_PLAYING: &str = "now_playing";
const REASON_TRENDING: &str = "trending";

#[derive(Debug, Clone, Copy)]
enum PersonRole {
    Director,
    Actor,
}

/// Entry point facade for the recommendation subsystem.
///
/// Every public operation is wrapped by the cache coordinator; generation
/// only runs on a miss, serialized per user and cache key.
pub struct Recommender {
    metadata: Arc<dyn MetadataSource>,
    catalog: Arc<dyn CatalogStore>,
    cache: Arc<CacheCoordinator>,
}

impl Recommender {
    pub fn new(
        metadata: Arc<dyn MetadataSource>,
        catalog: Arc<dyn CatalogStore>,
        cache: Arc<CacheCoordinator>,
    ) -> Self {
        Self {
            metadata,
            catalog,
            cache,
        }
    }

    /// Wire up the production collaborators from configuration.
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let pool = create_pool(&config.database_url).await?;
        let metadata: Arc<dyn MetadataSource> = Arc::new(MetadataGateway::from_config(config));
        let catalog: Arc<dyn CatalogStore> = Arc::new(PgCatalogStore::new(pool.clone()));
        let cache = Arc::new(CacheCoordinator::new(
            Arc::new(PgCacheStore::new(pool)),
            config.cache_ttl_minutes,
        ));
        Ok(Self::new(metadata, catalog, cache))
    }

    /// Personalized "for you" feed.
    pub async fn for_you(&self, user_id: i64, limit: u32, page: u32) -> AppResult<RecommendationPage> {
        let params = [("limit", limit.to_string()), ("page", page.to_string())];
        self.cache
            .get_cached(user_id, "recommendations/for-you", &params, || {
                self.generate_for_you(user_id, limit, page)
            })
            .await
    }

    /// Recommendations grouped into genre sections ordered by affinity.
    pub async fn by_category(
        &self,
        user_id: i64,
        kind: MediaKind,
        limit: u32,
    ) -> AppResult<CategoryResponse> {
        let params = [
            ("media_type", kind.as_str().to_string()),
            ("limit", limit.to_string()),
        ];
        self.cache
            .get_cached(user_id, "recommendations/by-category", &params, || {
                self.generate_by_category(user_id, kind, limit)
            })
            .await
    }

    /// Recommendations constrained to a single genre, topped up from the
    /// provider's discover listing.
    pub async fn by_genre(
        &self,
        user_id: i64,
        genre_id: i64,
        kind: MediaKind,
        limit: u32,
        page: u32,
    ) -> AppResult<RecommendationPage> {
        let params = [
            ("genre", genre_id.to_string()),
            ("media_type", kind.as_str().to_string()),
            ("limit", limit.to_string()),
            ("page", page.to_string()),
        ];
        self.cache
            .get_cached(user_id, "recommendations/by-genre", &params, || {
                self.generate_by_genre(user_id, genre_id, kind, limit, page)
            })
            .await
    }

    /// Movies currently in theaters, ranked by the user's taste profile.
    pub async fn in_theaters(&self, user_id: i64, limit: u32, page: u32) -> AppResult<RecommendationPage> {
        let params = [("limit", limit.to_string()), ("page", page.to_string())];
        self.cache
            .get_cached(user_id, "recommendations/in-theaters", &params, || {
                self.generate_in_theaters(user_id, limit, page)
            })
            .await
    }

    // ------------------------------------------------------------------
    // Invalidation hooks, called by the collection/preferences layer.
    // ------------------------------------------------------------------

    pub async fn on_preferences_changed(&self, user_id: i64) -> AppResult<u64> {
        self.cache.invalidate_user(user_id).await
    }

    pub async fn on_membership_changed(&self, user_id: i64) -> AppResult<u64> {
        self.cache.invalidate_user(user_id).await
    }

    /// Watched / not-interested toggles change the exclusion set.
    pub async fn on_feedback_marked(&self, user_id: i64) -> AppResult<u64> {
        self.cache.invalidate_user(user_id).await
    }

    pub async fn on_collection_deleted(&self, collection_id: i64) -> AppResult<u64> {
        self.cache.invalidate_collection(collection_id).await
    }

    /// Read-only view of one user's cache rows.
    pub async fn cache_report(&self, user_id: i64) -> AppResult<CacheDebugReport> {
        self.cache.debug_report(user_id).await
    }

    // ------------------------------------------------------------------
    // Generators
    // ------------------------------------------------------------------

    async fn generate_for_you(&self, user_id: i64, limit: u32, page: u32) -> AppResult<RecommendationPage> {
        let flags = self.catalog.user_flags(user_id).await?;
        if !flags.recommendations_enabled {
            return Ok(RecommendationPage::empty(Vec::new(), 0, page));
        }

        let collections = self.catalog.source_collections(user_id).await?;
        if collections.is_empty() {
            return self.cold_start(collections, 0, limit, page).await;
        }
        let items = self.catalog.source_items(user_id).await?;
        if items.is_empty() {
            return self.cold_start(collections, 0, limit, page).await;
        }

        let exclusions = exclusion_snapshot(&self.catalog, &self.cache, user_id, &collections).await?;
        let sample = sample_items(&items, GENERAL_SAMPLE);
        let signals = ProfileBuilder::new(Arc::clone(&self.metadata))
            .build_signals(&sample)
            .await;

        let mut candidates = CandidateSet::new(exclusions);
        aggregate_primary(&mut candidates, &signals, None, None, 0.0);
        self.person_discovery(&mut candidates, &signals.profile).await;

        let total = candidates.len();
        tracing::info!(user_id, candidates = total, page, "Personalized feed generated");
        let selected = paginate(candidates.into_candidates(), page, limit);
        Ok(build_page(selected, collections, items.len(), page, limit, total))
    }

    async fn generate_by_category(
        &self,
        user_id: i64,
        kind: MediaKind,
        limit: u32,
    ) -> AppResult<CategoryResponse> {
        let flags = self.catalog.user_flags(user_id).await?;
        if !flags.category_recommendations_enabled {
            return Ok(CategoryResponse::empty(kind, Vec::new(), 0));
        }

        let collections = self.catalog.source_collections(user_id).await?;
        if collections.is_empty() {
            return Ok(CategoryResponse::empty(kind, collections, 0));
        }
        let items = self.catalog.source_items(user_id).await?;
        if items.is_empty() {
            return Ok(CategoryResponse::empty(kind, collections, 0));
        }

        let exclusions = exclusion_snapshot(&self.catalog, &self.cache, user_id, &collections).await?;
        let sample = sample_items(&items, CATEGORY_SAMPLE);
        let signals = ProfileBuilder::new(Arc::clone(&self.metadata))
            .build_signals(&sample)
            .await;

        let mut candidates = CandidateSet::new(exclusions);
        aggregate_primary(&mut candidates, &signals, Some(kind), None, 0.0);

        let genre_names: HashMap<i64, String> = self
            .metadata
            .genre_list(kind)
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|g| (g.id, g.name))
            .collect();

        let all = candidates.into_candidates();
        let mut categories = Vec::new();
        for (genre_id, _) in signals.profile.genres_by_affinity() {
            let pool: Vec<Candidate> = all
                .iter()
                .filter(|c| c.item.genre_ids.contains(&genre_id))
                .cloned()
                .collect();
            if pool.is_empty() {
                continue;
            }
            let total = pool.len();
            let top = select_top_k(pool, limit as usize);
            let name = genre_names
                .get(&genre_id)
                .cloned()
                .unwrap_or_else(|| format!("Genre {}", genre_id));
            categories.push(CategoryBlock {
                genre: Genre { id: genre_id, name },
                results: top.into_iter().map(|c| c.item).collect(),
                total_results: total,
            });
        }

        tracing::info!(
            user_id,
            media_type = kind.as_str(),
            sections = categories.len(),
            "Category recommendations generated"
        );

        Ok(CategoryResponse {
            categories,
            media_type: kind,
            source_collections: collections,
            total_source_items: items.len(),
        })
    }

    async fn generate_by_genre(
        &self,
        user_id: i64,
        genre_id: i64,
        kind: MediaKind,
        limit: u32,
        page: u32,
    ) -> AppResult<RecommendationPage> {
        let flags = self.catalog.user_flags(user_id).await?;
        if !flags.recommendations_enabled {
            return Ok(RecommendationPage::empty(Vec::new(), 0, page));
        }

        let collections = self.catalog.source_collections(user_id).await?;
        if collections.is_empty() {
            return Ok(RecommendationPage::empty(collections, 0, page));
        }
        let items = self.catalog.source_items(user_id).await?;
        if items.is_empty() {
            return Ok(RecommendationPage::empty(collections, 0, page));
        }

        let exclusions = exclusion_snapshot(&self.catalog, &self.cache, user_id, &collections).await?;
        let sample = sample_items(&items, GENRE_SAMPLE);
        let signals = ProfileBuilder::new(Arc::clone(&self.metadata))
            .build_signals(&sample)
            .await;

        let mut candidates = CandidateSet::new(exclusions);
        aggregate_primary(&mut candidates, &signals, Some(kind), Some(genre_id), GENRE_PRIMARY_BOOST);

        // Work out how many discover pages the requested window needs before
        // fetching any of them.
        let pages = pages_for_depth(page, limit, DISCOVER_PAGE_BOUND);
        let metadata = Arc::clone(&self.metadata);
        let filler = fetch_pages(pages, move |p| {
            let metadata = Arc::clone(&metadata);
            async move { metadata.discover_by_genre(kind, genre_id, p).await }
        })
        .await;

        for summary in &filler {
            // The floor is requested provider-side too; re-assert it locally
            // rather than trust the provider's filtering.
            if summary.vote_count < DISCOVER_MIN_VOTES || summary.vote_average < DISCOVER_MIN_RATING {
                continue;
            }
            candidates.add_if_absent(
                &signals.profile,
                Discovery::new(summary, kind, REASON_GENRE_DISCOVER, DISCOVER_POPULARITY_CAP),
            );
        }

        let total = candidates.len();
        tracing::info!(user_id, genre_id, candidates = total, page, "Genre recommendations generated");
        let selected = paginate(candidates.into_candidates(), page, limit);
        Ok(build_page(selected, collections, items.len(), page, limit, total))
    }

    async fn generate_in_theaters(&self, user_id: i64, limit: u32, page: u32) -> AppResult<RecommendationPage> {
        let flags = self.catalog.user_flags(user_id).await?;
        if !flags.recommendations_enabled {
            return Ok(RecommendationPage::empty(Vec::new(), 0, page));
        }

        let collections = self.catalog.source_collections(user_id).await?;
        if collections.is_empty() {
            return Ok(RecommendationPage::empty(collections, 0, page));
        }
        let items = self.catalog.source_items(user_id).await?;
        if items.is_empty() {
            return Ok(RecommendationPage::empty(collections, 0, page));
        }

        let exclusions = exclusion_snapshot(&self.catalog, &self.cache, user_id, &collections).await?;
        let sample = sample_items(&items, THEATRICAL_SAMPLE);
        let signals = ProfileBuilder::new(Arc::clone(&self.metadata))
            .build_signals(&sample)
            .await;

        let pages = pages_for_depth(page, limit, DISCOVER_PAGE_BOUND);
        let metadata = Arc::clone(&self.metadata);
        let listings = fetch_pages(pages, move |p| {
            let metadata = Arc::clone(&metadata);
            async move { metadata.now_playing(p).await }
        })
        .await;

        let mut candidates = CandidateSet::new(exclusions);
        for summary in &listings {
            candidates.add_if_absent(
                &signals.profile,
                Discovery::new(summary, MediaKind::Movie, REASON_NOW_PLAYING, NOW_PLAYING_POPULARITY_CAP),
            );
        }

        // Credits are only worth fetching when somebody significant could
        // match; empty profiles skip the whole per-candidate fan-out.
        if signals.profile.has_person_signal() {
            self.boost_theatrical_credits(&mut candidates, &signals.profile).await;
        }

        let total = candidates.len();
        tracing::info!(user_id, candidates = total, page, "Theatrical recommendations generated");
        let selected = paginate(candidates.into_candidates(), page, limit);
        Ok(build_page(selected, collections, items.len(), page, limit, total))
    }

    /// Trending-based fallback when the user has no usable source signal.
    /// Rating and popularity only; no profile, no exclusions.
    async fn cold_start(
        &self,
        source_collections: Vec<SourceCollection>,
        total_source_items: usize,
        limit: u32,
        page: u32,
    ) -> AppResult<RecommendationPage> {
        let pages = pages_for_depth(page, limit, TRENDING_PAGE_BOUND);
        let metadata = Arc::clone(&self.metadata);
        let listings = fetch_pages(pages, move |p| {
            let metadata = Arc::clone(&metadata);
            async move { metadata.trending(p).await }
        })
        .await;

        let profile = AffinityProfile::default();
        let mut candidates = CandidateSet::new(ExclusionSnapshot::default());
        for summary in &listings {
            let kind = match summary.media_type.as_deref() {
                Some("tv") => MediaKind::Series,
                Some("movie") | None => MediaKind::Movie,
                // Mixed trending feeds also list people; skip them.
                Some(_) => continue,
            };
            candidates.add_if_absent(
                &profile,
                Discovery::new(summary, kind, REASON_TRENDING, TRENDING_POPULARITY_CAP),
            );
        }

        let total = candidates.len();
        tracing::info!(candidates = total, page, "Cold-start recommendations generated");
        let selected = paginate(candidates.into_candidates(), page, limit);
        Ok(build_page(selected, source_collections, total_source_items, page, limit, total))
    }

    /// Supplementary discovery through the user's top directors and actors
    /// (movies only), constrained to their top affinity genres.
    async fn person_discovery(&self, candidates: &mut CandidateSet, profile: &AffinityProfile) {
        let genre_filter = profile.top_genres(3);

        let mut people = Vec::new();
        for (person_id, affinity) in profile.top_directors() {
            people.push((person_id, affinity.count, PersonRole::Director));
        }
        for (person_id, affinity) in profile.top_actors() {
            people.push((person_id, affinity.count, PersonRole::Actor));
        }

        let mut tasks = Vec::new();
        for (person_id, count, role) in people {
            let metadata = Arc::clone(&self.metadata);
            let genres = genre_filter.clone();
            tasks.push(tokio::spawn(async move {
                (role, count, metadata.discover_movies_by_person(person_id, genres).await)
            }));
        }

        for task in tasks {
            let Ok((role, count, paged)) = task.await else {
                tracing::error!("Person discovery task failed");
                continue;
            };
            let Some(paged) = paged else { continue };

            for summary in paged.results.iter().take(PERSON_DISCOVERY_WORKS) {
                let (reason, director_boost, actor_boost) = match role {
                    PersonRole::Director => {
                        (REASON_DIRECTOR, count as f64 * GENERAL_PERSON_MULTIPLIER, 0.0)
                    }
                    PersonRole::Actor => {
                        (REASON_ACTOR, 0.0, count as f64 * GENERAL_PERSON_MULTIPLIER)
                    }
                };
                candidates.add_supplementary(
                    profile,
                    Discovery::new(summary, MediaKind::Movie, reason, PERSON_POPULARITY_CAP)
                        .with_person_boosts(director_boost, actor_boost),
                );
            }
        }
    }

    /// Per-candidate credits fan-out for the theatrical strategy, boosting
    /// titles whose directors or top-billed cast match the user's affinities.
    async fn boost_theatrical_credits(&self, candidates: &mut CandidateSet, profile: &AffinityProfile) {
        let top_directors: HashMap<i64, u32> = profile
            .top_directors()
            .into_iter()
            .map(|(id, p)| (id, p.count))
            .collect();
        let top_actors: HashMap<i64, u32> = profile
            .top_actors()
            .into_iter()
            .map(|(id, p)| (id, p.count))
            .collect();

        let mut tasks = Vec::new();
        for id in candidates.ids() {
            let metadata = Arc::clone(&self.metadata);
            tasks.push(tokio::spawn(async move { (id, metadata.credits(id).await) }));
        }

        for task in tasks {
            let Ok((id, credits)) = task.await else {
                tracing::error!("Theatrical credits task failed");
                continue;
            };
            let Some(credits) = credits else { continue };

            let director_boost: f64 = credits
                .crew
                .iter()
                .filter(|m| m.job == "Director")
                .filter_map(|m| top_directors.get(&m.id))
                .map(|count| *count as f64 * THEATRICAL_DIRECTOR_MULTIPLIER)
                .sum();
            let actor_boost: f64 = credits
                .cast
                .iter()
                .filter(|m| m.order < TOP_BILLED)
                .filter_map(|m| top_actors.get(&m.id))
                .map(|count| *count as f64 * THEATRICAL_ACTOR_MULTIPLIER)
                .sum();

            candidates.boost_person_affinity(&id, director_boost, actor_boost);
        }
    }
}

/// Fold every seed's captured recommendation/similar pages into the
/// candidate set. The media kind of a discovery follows its seed: a series'
/// recommendations are series.
fn aggregate_primary(
    candidates: &mut CandidateSet,
    signals: &SourceSignals,
    kind_filter: Option<MediaKind>,
    genre_filter: Option<i64>,
    primary_boost: f64,
) {
    for seed in &signals.seeds {
        let kind = seed.seed.kind();
        if kind_filter.is_some_and(|k| k != kind) {
            continue;
        }
        for (summaries, reason) in [
            (&seed.recommendations, REASON_RECOMMENDED),
            (&seed.similar, REASON_SIMILAR),
        ] {
            for summary in summaries {
                if genre_filter.is_some_and(|g| !summary.genre_ids.contains(&g)) {
                    continue;
                }
                candidates.add_primary(
                    &signals.profile,
                    Discovery::new(summary, kind, reason, PRIMARY_POPULARITY_CAP)
                        .seeded(&seed.title)
                        .with_primary_boost(primary_boost),
                );
            }
        }
    }
}

/// Concurrently fetch provider pages `1..=pages` and join their results.
async fn fetch_pages<F, Fut>(pages: u32, fetch: F) -> Vec<MediaSummary>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Option<Paged<MediaSummary>>> + Send + 'static,
{
    let mut tasks = Vec::new();
    for page in 1..=pages {
        tasks.push(tokio::spawn(fetch(page)));
    }

    let mut results = Vec::new();
    for task in tasks {
        match task.await {
            Ok(Some(paged)) => results.extend(paged.results),
            Ok(None) => {}
            Err(e) => tracing::error!(error = %e, "Page fetch task failed"),
        }
    }
    results
}

/// How many provider pages are needed to cover the requested window.
fn pages_for_depth(page: u32, limit: u32, bound: u32) -> u32 {
    let depth = (page as usize) * (limit as usize);
    let pages = depth.div_ceil(PROVIDER_PAGE_SIZE).max(1) as u32;
    pages.min(bound)
}

fn build_page(
    selected: Vec<Candidate>,
    source_collections: Vec<SourceCollection>,
    total_source_items: usize,
    page: u32,
    limit: u32,
    total: usize,
) -> RecommendationPage {
    let total_pages = if limit == 0 { 0 } else { (total as u32).div_ceil(limit) };
    RecommendationPage {
        results: selected.into_iter().map(|c| c.item).collect(),
        source_collections,
        total_source_items,
        page,
        total_pages,
        total_results: total,
    }
}
