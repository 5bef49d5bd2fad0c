use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::{Genre, MediaId, MediaKind, MediaSummary, SourceCollection};

/// Additive components of a candidate's score. `total` always mirrors the
/// final score after the last merge.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ScoreBreakdown {
    pub base: f64,
    pub popularity: f64,
    pub genre: f64,
    pub source_boost: f64,
    pub director_boost: f64,
    pub actor_boost: f64,
    pub primary_boost: f64,
    pub total: f64,
}

/// Evidence trail attached to every recommendation.
///
/// Replaced as a whole value on each merge rather than mutated through a
/// shared reference, so concurrent readers never observe a half-updated block.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Explainability {
    /// Ordered, deduplicated discovery-path codes.
    pub reason_codes: Vec<String>,
    /// How many distinct discovery paths produced this candidate.
    pub source_appearances: u32,
    /// Candidate genres that intersect the user's affinity histogram,
    /// overwritten with the latest match list on merge.
    pub matched_genres: Vec<i64>,
    /// Seed titles that led here, capped at two.
    pub because_you_liked: Vec<String>,
    pub score_breakdown: ScoreBreakdown,
}

impl Explainability {
    /// Append a reason code unless already present; repeated merges through
    /// the same path stay idempotent.
    pub fn with_reason(mut self, code: &str) -> Self {
        if !self.reason_codes.iter().any(|c| c == code) {
            self.reason_codes.push(code.to_string());
        }
        self
    }

    pub fn with_liked(mut self, seed_title: &str) -> Self {
        if self.because_you_liked.len() < 2
            && !self.because_you_liked.iter().any(|t| t == seed_title)
        {
            self.because_you_liked.push(seed_title.to_string());
        }
        self
    }
}

/// A recommendation as surfaced to the caller: the provider record plus the
/// evidence that produced it. The `id` field carries the boundary encoding
/// (`"550"` / `"1399tv"`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendedItem {
    pub id: MediaId,
    pub title: String,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub backdrop_path: Option<String>,
    pub vote_average: f64,
    pub vote_count: i64,
    pub popularity: f64,
    #[serde(default)]
    pub genre_ids: Vec<i64>,
    #[serde(default)]
    pub release_date: Option<String>,
    pub media_type: MediaKind,
    pub explainability: Explainability,
}

impl RecommendedItem {
    pub fn from_summary(summary: &MediaSummary, kind: MediaKind) -> Self {
        Self {
            id: kind.media_id(summary.id),
            title: summary.title.clone(),
            overview: summary.overview.clone(),
            poster_path: summary.poster_path.clone(),
            backdrop_path: summary.backdrop_path.clone(),
            vote_average: summary.vote_average,
            vote_count: summary.vote_count,
            popularity: summary.popularity,
            genre_ids: summary.genre_ids.clone(),
            release_date: summary.release_date.clone(),
            media_type: kind,
            explainability: Explainability::default(),
        }
    }
}

/// A scored recommendation in progress, before final top-K selection.
/// `score` and `sources` are re-derived on every merge; the map holding
/// candidates guarantees at most one entry per identity.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub item: RecommendedItem,
    pub score: f64,
    pub sources: u32,
}

/// Paged strategy result. Field names preserve the established wire shape,
/// camel-cased envelope metadata included.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecommendationPage {
    pub results: Vec<RecommendedItem>,
    #[serde(rename = "sourceCollections")]
    pub source_collections: Vec<SourceCollection>,
    #[serde(rename = "totalSourceItems")]
    pub total_source_items: usize,
    pub page: u32,
    pub total_pages: u32,
    pub total_results: usize,
}

impl RecommendationPage {
    /// Well-formed empty result for disabled flags or missing source signal.
    pub fn empty(source_collections: Vec<SourceCollection>, total_source_items: usize, page: u32) -> Self {
        Self {
            results: Vec::new(),
            source_collections,
            total_source_items,
            page,
            total_pages: 0,
            total_results: 0,
        }
    }
}

/// One genre section of the category strategy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryBlock {
    pub genre: Genre,
    pub results: Vec<RecommendedItem>,
    pub total_results: usize,
}

/// Category strategy result: genre sections ordered by affinity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryResponse {
    pub categories: Vec<CategoryBlock>,
    #[serde(rename = "mediaType")]
    pub media_type: MediaKind,
    #[serde(rename = "sourceCollections")]
    pub source_collections: Vec<SourceCollection>,
    #[serde(rename = "totalSourceItems")]
    pub total_source_items: usize,
}

impl CategoryResponse {
    pub fn empty(media_type: MediaKind, source_collections: Vec<SourceCollection>, total_source_items: usize) -> Self {
        Self {
            categories: Vec::new(),
            media_type,
            source_collections,
            total_source_items,
        }
    }
}

/// Identifiers the user has already collected, watched, or rejected; nothing
/// in this set may ever be recommended.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExclusionSnapshot {
    #[serde(rename = "movieIds")]
    pub media_ids: HashSet<MediaId>,
}

impl ExclusionSnapshot {
    pub fn new(media_ids: HashSet<MediaId>) -> Self {
        Self { media_ids }
    }

    pub fn contains(&self, id: &MediaId) -> bool {
        self.media_ids.contains(id)
    }
}
