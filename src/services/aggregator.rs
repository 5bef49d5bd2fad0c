use std::collections::HashMap;

use crate::models::{
    Candidate, ExclusionSnapshot, Explainability, MediaId, MediaKind, MediaSummary, RecommendedItem,
    ScoreBreakdown,
};
use crate::services::profile::AffinityProfile;

/// Each additional discovery path for the same identity is worth this much.
pub const SOURCE_BOOST_STEP: f64 = 20.0;
/// Secondary confirmation bonus when a supplementary path re-finds a candidate.
pub const SUPPLEMENTARY_MERGE_BONUS: f64 = 10.0;
/// Weight of one affinity-histogram occurrence per matching genre.
pub const GENRE_WEIGHT: f64 = 5.0;

/// One discovered title on its way into the candidate map.
pub struct Discovery<'a> {
    pub summary: &'a MediaSummary,
    pub kind: MediaKind,
    pub reason: &'a str,
    pub seed_title: Option<&'a str>,
    /// Context-dependent ceiling on the popularity component (20-50).
    pub popularity_cap: f64,
    /// Flat boost ranking source-derived results above discover filler.
    pub primary_boost: f64,
    pub director_boost: f64,
    pub actor_boost: f64,
}

impl<'a> Discovery<'a> {
    pub fn new(summary: &'a MediaSummary, kind: MediaKind, reason: &'a str, popularity_cap: f64) -> Self {
        Self {
            summary,
            kind,
            reason,
            seed_title: None,
            popularity_cap,
            primary_boost: 0.0,
            director_boost: 0.0,
            actor_boost: 0.0,
        }
    }

    pub fn seeded(mut self, seed_title: &'a str) -> Self {
        if !seed_title.is_empty() {
            self.seed_title = Some(seed_title);
        }
        self
    }

    pub fn with_primary_boost(mut self, boost: f64) -> Self {
        self.primary_boost = boost;
        self
    }

    pub fn with_person_boosts(mut self, director: f64, actor: f64) -> Self {
        self.director_boost = director;
        self.actor_boost = actor;
        self
    }
}

/// Deduplicating accumulator for scored candidates.
///
/// Identity is the tagged `MediaId`, so a movie and a series sharing a
/// provider id stay distinct. Excluded identities are rejected before
/// scoring on every insertion path; they must never enter the map because
/// the map's size later feeds pagination totals.
pub struct CandidateSet {
    entries: HashMap<MediaId, Candidate>,
    exclusions: ExclusionSnapshot,
}

impl CandidateSet {
    pub fn new(exclusions: ExclusionSnapshot) -> Self {
        Self {
            entries: HashMap::new(),
            exclusions,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &MediaId) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &MediaId) -> Option<&Candidate> {
        self.entries.get(id)
    }

    pub fn ids(&self) -> Vec<MediaId> {
        self.entries.keys().copied().collect()
    }

    pub fn into_candidates(self) -> Vec<Candidate> {
        self.entries.into_values().collect()
    }

    /// Insert or merge a candidate found through a primary path
    /// (recommendations/similar of a source item). Re-discovery through
    /// another primary path is expected convergence and compounds:
    /// the score is recomputed fresh and the full source boost applied.
    pub fn add_primary(&mut self, profile: &AffinityProfile, discovery: Discovery<'_>) {
        let id = discovery.kind.media_id(discovery.summary.id);
        if self.exclusions.contains(&id) {
            return;
        }

        let (combined, breakdown, matched) = score(profile, &discovery);
        match self.entries.get_mut(&id) {
            None => {
                self.entries.insert(id, fresh_candidate(&discovery, combined, breakdown, matched));
            }
            Some(existing) => {
                existing.sources += 1;
                let source_boost = existing.sources as f64 * SOURCE_BOOST_STEP;
                let total = combined + source_boost;
                existing.score = total;
                existing.item.explainability = merged_explainability(
                    existing,
                    &discovery,
                    matched,
                    ScoreBreakdown { source_boost, total, ..breakdown },
                );
            }
        }
    }

    /// Insert or merge a candidate found through a supplementary path
    /// (person-based or generic discover). Re-discovery here is a secondary
    /// confirmation only: keep the better of the two scores plus a small
    /// bonus rather than compounding.
    pub fn add_supplementary(&mut self, profile: &AffinityProfile, discovery: Discovery<'_>) {
        let id = discovery.kind.media_id(discovery.summary.id);
        if self.exclusions.contains(&id) {
            return;
        }

        let (combined, breakdown, matched) = score(profile, &discovery);
        match self.entries.get_mut(&id) {
            None => {
                self.entries.insert(id, fresh_candidate(&discovery, combined, breakdown, matched));
            }
            Some(existing) => {
                existing.sources += 1;
                let total = existing.score.max(combined) + SUPPLEMENTARY_MERGE_BONUS;
                existing.score = total;
                existing.item.explainability = merged_explainability(
                    existing,
                    &discovery,
                    matched,
                    ScoreBreakdown { total, ..breakdown },
                );
            }
        }
    }

    /// Insert only when the identity is not already present. Discover filler
    /// never overwrites or re-scores a source-derived entry.
    pub fn add_if_absent(&mut self, profile: &AffinityProfile, discovery: Discovery<'_>) {
        let id = discovery.kind.media_id(discovery.summary.id);
        if self.exclusions.contains(&id) || self.entries.contains_key(&id) {
            return;
        }

        let (combined, breakdown, matched) = score(profile, &discovery);
        self.entries.insert(id, fresh_candidate(&discovery, combined, breakdown, matched));
    }

    /// Late person-affinity boost for an already-present candidate, used when
    /// credits only become known after insertion (now-playing listings carry
    /// no crew data).
    pub fn boost_person_affinity(
        &mut self,
        id: &MediaId,
        director_boost: f64,
        actor_boost: f64,
    ) {
        if director_boost <= 0.0 && actor_boost <= 0.0 {
            return;
        }
        let Some(candidate) = self.entries.get_mut(id) else {
            return;
        };

        candidate.score += director_boost + actor_boost;
        let mut explainability = candidate.item.explainability.clone();
        if director_boost > 0.0 {
            explainability = explainability.with_reason("directed_by_favorite");
        }
        if actor_boost > 0.0 {
            explainability = explainability.with_reason("features_favorite_actor");
        }
        explainability.score_breakdown.director_boost += director_boost;
        explainability.score_breakdown.actor_boost += actor_boost;
        explainability.score_breakdown.total = candidate.score;
        candidate.item.explainability = explainability;
    }
}

/// The shared scoring formula family: rating base, capped popularity, genre
/// affinity, plus whatever extra boosts the discovery path carries.
fn score(profile: &AffinityProfile, discovery: &Discovery<'_>) -> (f64, ScoreBreakdown, Vec<i64>) {
    let summary = discovery.summary;
    let base = summary.vote_average * 10.0;
    let popularity = (summary.popularity / 10.0).min(discovery.popularity_cap);
    let matched = profile.matched_genres(&summary.genre_ids);
    let genre = profile.genre_count(&summary.genre_ids) as f64 * GENRE_WEIGHT;

    let total = base
        + popularity
        + genre
        + discovery.primary_boost
        + discovery.director_boost
        + discovery.actor_boost;

    let breakdown = ScoreBreakdown {
        base,
        popularity,
        genre,
        source_boost: 0.0,
        director_boost: discovery.director_boost,
        actor_boost: discovery.actor_boost,
        primary_boost: discovery.primary_boost,
        total,
    };

    (total, breakdown, matched)
}

fn fresh_candidate(
    discovery: &Discovery<'_>,
    combined: f64,
    breakdown: ScoreBreakdown,
    matched: Vec<i64>,
) -> Candidate {
    let mut item = RecommendedItem::from_summary(discovery.summary, discovery.kind);
    let mut explainability = Explainability::default().with_reason(discovery.reason);
    if let Some(seed_title) = discovery.seed_title {
        explainability = explainability.with_liked(seed_title);
    }
    explainability.source_appearances = 1;
    explainability.matched_genres = matched;
    explainability.score_breakdown = breakdown;
    item.explainability = explainability;

    Candidate { item, score: combined, sources: 1 }
}

/// Next explainability value for a merged candidate: append the new reason,
/// overwrite the match list with the latest, keep the liked list capped.
fn merged_explainability(
    existing: &Candidate,
    discovery: &Discovery<'_>,
    matched: Vec<i64>,
    breakdown: ScoreBreakdown,
) -> Explainability {
    let mut explainability = existing.item.explainability.clone().with_reason(discovery.reason);
    if let Some(seed_title) = discovery.seed_title {
        explainability = explainability.with_liked(seed_title);
    }
    explainability.source_appearances = existing.sources;
    explainability.matched_genres = matched;
    explainability.score_breakdown = breakdown;
    explainability
}
