//! End-to-end tests of the recommendation facade over stub collaborators:
//! a canned metadata provider, a scripted catalog, and an in-memory cache
//! table.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use cinefeed::db::{CacheRow, CacheStore, CatalogStore};
use cinefeed::models::metadata::{CastMember, Credits, CrewMember, Genre, MediaDetails, MediaSummary, Paged};
use cinefeed::models::{MediaId, MediaKind, SourceCollection, UserFlags};
use cinefeed::services::cache::CacheCoordinator;
use cinefeed::services::gateway::MetadataSource;
use cinefeed::{AppResult, Recommender};

// ---------------------------------------------------------------------------
// Stub collaborators
// ---------------------------------------------------------------------------

/// Map-backed cache table with the same upsert semantics as the relational
/// store: one row per (user, key), created_at preserved on overwrite.
#[derive(Default)]
struct MemoryStore {
    rows: Mutex<HashMap<(i64, String), CacheRow>>,
}

impl MemoryStore {
    async fn expire_all(&self) {
        let past = Utc::now() - Duration::minutes(1);
        for row in self.rows.lock().await.values_mut() {
            row.expires_at = past;
        }
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn fetch(&self, user_id: i64, cache_key: &str) -> AppResult<Option<CacheRow>> {
        Ok(self.rows.lock().await.get(&(user_id, cache_key.to_string())).cloned())
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

/// Scripted catalog: fixed flags, collections, items, and exclusions.
struct StubCatalog {
    flags: UserFlags,
    collections: Vec<SourceCollection>,
    items: Vec<MediaId>,
    exclusions: HashSet<MediaId>,
}

impl StubCatalog {
    fn with_library() -> Self {
        Self {
            flags: UserFlags {
                recommendations_enabled: true,
                category_recommendations_enabled: true,
            },
            collections: vec![SourceCollection { id: 1, name: "Favorites".to_string() }],
            items: vec![MediaId::Movie(11), MediaId::Movie(22)],
            exclusions: [MediaId::Movie(11), MediaId::Movie(22), MediaId::Movie(4000)]
                .into_iter()
                .collect(),
        }
    }

    fn empty() -> Self {
        Self {
            flags: UserFlags {
                recommendations_enabled: true,
                category_recommendations_enabled: true,
            },
            collections: Vec::new(),
            items: Vec::new(),
            exclusions: HashSet::new(),
        }
    }

    fn disabled() -> Self {
        Self {
            flags: UserFlags {
                recommendations_enabled: false,
                category_recommendations_enabled: false,
            },
            ..Self::with_library()
        }
    }
}

#[async_trait]
impl CatalogStore for StubCatalog {
    async fn source_collections(&self, _user_id: i64) -> AppResult<Vec<SourceCollection>> {
        Ok(self.collections.clone())
    }

    async fn source_items(&self, _user_id: i64) -> AppResult<Vec<MediaId>> {
        Ok(self.items.clone())
    }

    async fn exclusion_ids(
        &self,
        _user_id: i64,
        _source_collection_ids: &[i64],
    ) -> AppResult<HashSet<MediaId>> {
        Ok(self.exclusions.clone())
    }

    async fn user_flags(&self, _user_id: i64) -> AppResult<UserFlags> {
        Ok(self.flags)
    }
}

/// Canned metadata provider that counts every call it receives.
#[derive(Default)]
struct StubMetadata {
    calls: AtomicUsize,
    trending_calls: AtomicUsize,
}

fn summary(id: i64, vote_average: f64, popularity: f64, genre_ids: Vec<i64>) -> MediaSummary {
    MediaSummary {
        id,
        title: format!("Title {}", id),
        overview: None,
        poster_path: None,
        backdrop_path: None,
        vote_average,
        vote_count: 500,
        popularity,
        genre_ids,
        release_date: None,
        media_type: None,
    }
}

fn paged(results: Vec<MediaSummary>) -> Paged<MediaSummary> {
    Paged {
        page: 1,
        total_pages: 1,
        total_results: results.len() as i64,
        results,
    }
}

#[async_trait]
impl MetadataSource for StubMetadata {
    async fn details(&self, media: MediaId) -> Option<MediaDetails> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Some(MediaDetails {
            id: media.provider_id(),
            title: format!("Seed {}", media.provider_id()),
            genres: vec![Genre { id: 18, name: "Drama".to_string() }],
            vote_average: 7.5,
            popularity: 12.0,
        })
    }

    async fn credits(&self, _media: MediaId) -> Option<Credits> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // Every seed shares a director and a lead, so both cross the
        // two-appearance significance bar.
        Some(Credits {
            cast: vec![CastMember { id: 9, name: "Recurring Lead".to_string(), order: 0 }],
            crew: vec![CrewMember {
                id: 7,
                name: "Recurring Director".to_string(),
                job: "Director".to_string(),
            }],
        })
    }

    async fn recommendations(&self, media: MediaId) -> Option<Paged<MediaSummary>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Some(paged(vec![
            summary(1000 + media.provider_id(), 7.0, 30.0, vec![18]),
            summary(2000, 8.0, 60.0, vec![18]),
            summary(4000, 9.0, 90.0, vec![18]),
        ]))
    }

    async fn similar(&self, media: MediaId) -> Option<Paged<MediaSummary>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Some(paged(vec![
            summary(2000, 8.0, 60.0, vec![18]),
            summary(3000 + media.provider_id(), 6.5, 20.0, vec![35]),
            summary(4000, 9.0, 90.0, vec![18]),
        ]))
    }

    async fn discover_movies_by_person(
        &self,
        person_id: i64,
        _genre_ids: Vec<i64>,
    ) -> Option<Paged<MediaSummary>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Some(paged(vec![
            summary(5000 + person_id, 7.2, 25.0, vec![18]),
            summary(5100 + person_id, 6.8, 15.0, vec![18]),
        ]))
    }

    async fn discover_by_genre(
        &self,
        _kind: MediaKind,
        genre_id: i64,
        page: u32,
    ) -> Option<Paged<MediaSummary>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Some(paged(vec![summary(
            6000 + genre_id + page as i64,
            7.1,
            40.0,
            vec![genre_id],
        )]))
    }

    async fn now_playing(&self, page: u32) -> Option<Paged<MediaSummary>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Some(paged(vec![summary(7000 + page as i64, 7.0, 35.0, vec![18])]))
    }

    async fn trending(&self, page: u32) -> Option<Paged<MediaSummary>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.trending_calls.fetch_add(1, Ordering::SeqCst);
        Some(paged(vec![
            summary(8000 + page as i64, 8.2, 120.0, vec![18]),
            summary(8100 + page as i64, 7.9, 80.0, vec![35]),
        ]))
    }

    async fn genre_list(&self, _kind: MediaKind) -> Option<Vec<Genre>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Some(vec![
            Genre { id: 18, name: "Drama".to_string() },
            Genre { id: 35, name: "Comedy".to_string() },
        ])
    }
}

struct Harness {
    recommender: Arc<Recommender>,
    metadata: Arc<StubMetadata>,
    store: Arc<MemoryStore>,
}

fn harness(catalog: StubCatalog) -> Harness {
    let metadata = Arc::new(StubMetadata::default());
    let store = Arc::new(MemoryStore::default());
    let recommender = Arc::new(Recommender::new(
        Arc::clone(&metadata) as Arc<dyn MetadataSource>,
        Arc::new(catalog),
        Arc::new(CacheCoordinator::new(
            Arc::clone(&store) as Arc<dyn CacheStore>,
            30,
        )),
    ));
    Harness {
        recommender,
        metadata,
        store,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_for_you_end_to_end() {
    let h = harness(StubCatalog::with_library());
    let page = h.recommender.for_you(1, 20, 1).await.unwrap();

    assert!(!page.results.is_empty());
    assert_eq!(page.total_source_items, 2);
    assert_eq!(page.source_collections.len(), 1);
    assert_eq!(page.page, 1);
    assert_eq!(page.total_results, page.results.len());

    // No candidate may come from the exclusion set (which includes the
    // source items themselves).
    for item in &page.results {
        assert_ne!(item.id, MediaId::Movie(4000));
        assert_ne!(item.id, MediaId::Movie(11));
        assert_ne!(item.id, MediaId::Movie(22));
    }

    // No identity appears twice.
    let ids: HashSet<MediaId> = page.results.iter().map(|r| r.id).collect();
    assert_eq!(ids.len(), page.results.len());

    // Ordered by final score, descending.
    for pair in page.results.windows(2) {
        assert!(
            pair[0].explainability.score_breakdown.total
                >= pair[1].explainability.score_breakdown.total
        );
    }

    // The title recommended by and similar to both seeds carries convergent
    // evidence from four primary paths.
    let shared = page.results.iter().find(|r| r.id == MediaId::Movie(2000)).unwrap();
    assert_eq!(shared.explainability.source_appearances, 4);
    assert_eq!(shared.explainability.score_breakdown.source_boost, 80.0);
    assert!(!shared.explainability.because_you_liked.is_empty());
    // Shared across every path, it lands on top.
    assert_eq!(page.results[0].id, MediaId::Movie(2000));
}

#[tokio::test]
async fn test_second_call_is_served_from_cache() {
    let h = harness(StubCatalog::with_library());

    let first = h.recommender.for_you(1, 20, 1).await.unwrap();
    let calls_after_first = h.metadata.calls.load(Ordering::SeqCst);
    assert!(calls_after_first > 0);

    let second = h.recommender.for_you(1, 20, 1).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(h.metadata.calls.load(Ordering::SeqCst), calls_after_first);

    // A different page is a different cache key and regenerates.
    let _ = h.recommender.for_you(1, 20, 2).await.unwrap();
    assert!(h.metadata.calls.load(Ordering::SeqCst) > calls_after_first);
}

#[tokio::test]
async fn test_expired_rows_regenerate() {
    let h = harness(StubCatalog::with_library());

    let _ = h.recommender.for_you(1, 20, 1).await.unwrap();
    let calls_after_first = h.metadata.calls.load(Ordering::SeqCst);

    h.store.expire_all().await;
    let _ = h.recommender.for_you(1, 20, 1).await.unwrap();
    assert!(h.metadata.calls.load(Ordering::SeqCst) > calls_after_first);
}

#[tokio::test]
async fn test_concurrent_requests_generate_once() {
    // Cold-start path: one generation fetches trending exactly once.
    let h = harness(StubCatalog::empty());

    let mut tasks = Vec::new();
    for _ in 0..6 {
        let recommender = Arc::clone(&h.recommender);
        tasks.push(tokio::spawn(async move { recommender.for_you(3, 20, 1).await.unwrap() }));
    }

    let mut pages = Vec::new();
    for task in tasks {
        pages.push(task.await.unwrap());
    }

    assert_eq!(h.metadata.trending_calls.load(Ordering::SeqCst), 1);
    for page in &pages[1..] {
        assert_eq!(page, &pages[0]);
    }
}

#[tokio::test]
async fn test_cold_start_shape_for_empty_collections() {
    let h = harness(StubCatalog::empty());
    let page = h.recommender.for_you(5, 20, 1).await.unwrap();

    assert!(!page.results.is_empty());
    assert!(page.source_collections.is_empty());
    assert_eq!(page.total_source_items, 0);
    assert!(page
        .results
        .iter()
        .all(|item| item.explainability.reason_codes == vec!["trending".to_string()]));
}

#[tokio::test]
async fn test_disabled_user_sees_empty_results_and_no_provider_traffic() {
    let h = harness(StubCatalog::disabled());

    let page = h.recommender.for_you(9, 20, 1).await.unwrap();
    assert!(page.results.is_empty());
    assert_eq!(page.total_results, 0);

    let categories = h.recommender.by_category(9, MediaKind::Movie, 10).await.unwrap();
    assert!(categories.categories.is_empty());

    assert_eq!(h.metadata.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_invalidation_forces_regeneration() {
    let h = harness(StubCatalog::with_library());

    let _ = h.recommender.for_you(1, 20, 1).await.unwrap();
    let calls_after_first = h.metadata.calls.load(Ordering::SeqCst);

    let removed = h.recommender.on_membership_changed(1).await.unwrap();
    assert!(removed > 0);

    let _ = h.recommender.for_you(1, 20, 1).await.unwrap();
    assert!(h.metadata.calls.load(Ordering::SeqCst) > calls_after_first);
}

#[tokio::test]
async fn test_cache_report_reflects_stored_rows() {
    let h = harness(StubCatalog::with_library());

    let _ = h.recommender.for_you(1, 20, 1).await.unwrap();
    let _ = h.recommender.in_theaters(1, 20, 1).await.unwrap();

    let report = h.recommender.cache_report(1).await.unwrap();
    // Strategy rows plus the cached exclusion snapshot.
    assert!(report.total >= 3);
    assert_eq!(report.fresh, report.total);
    assert_eq!(report.expired, 0);
    assert!(report.entries.iter().all(|e| e.payload_size > 0));
}

#[tokio::test]
async fn test_by_genre_and_theatrical_end_to_end() {
    let h = harness(StubCatalog::with_library());

    let genre_page = h.recommender.by_genre(1, 18, MediaKind::Movie, 20, 1).await.unwrap();
    assert!(!genre_page.results.is_empty());
    assert!(genre_page.results.iter().all(|item| item.genre_ids.contains(&18)));

    let theatrical = h.recommender.in_theaters(1, 20, 1).await.unwrap();
    assert!(!theatrical.results.is_empty());
    // The stub's now-playing title is directed by the user's recurring
    // director, so the affinity boost must land.
    assert!(theatrical.results[0].explainability.score_breakdown.director_boost > 0.0);
}
