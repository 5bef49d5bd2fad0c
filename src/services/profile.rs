use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{Credits, MediaId, MediaSummary};
use crate::services::gateway::MetadataSource;

/// A person only counts as a real affinity after appearing at least twice in
/// the sample; single appearances are noise.
const PERSON_SIGNIFICANCE_MIN: u32 = 2;
/// How many top people are carried forward per role.
const TOP_PEOPLE: usize = 2;
/// Cast members counted toward actor affinity: top-3-billed only.
pub(crate) const TOP_BILLED: i64 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonAffinity {
    pub name: String,
    pub count: u32,
}

/// Genre/director/actor occurrence histograms over a sampled slice of the
/// user's source items. Ephemeral: rebuilt on every strategy call, never
/// persisted; result-level caching happens one layer up.
#[derive(Debug, Clone, Default)]
pub struct AffinityProfile {
    pub genres: HashMap<i64, u32>,
    pub directors: HashMap<i64, PersonAffinity>,
    pub actors: HashMap<i64, PersonAffinity>,
}

impl AffinityProfile {
    /// Sum of histogram counts over the given genre ids.
    pub fn genre_count(&self, genre_ids: &[i64]) -> u32 {
        genre_ids.iter().filter_map(|g| self.genres.get(g)).sum()
    }

    /// Genre ids that intersect the histogram, in input order.
    pub fn matched_genres(&self, genre_ids: &[i64]) -> Vec<i64> {
        genre_ids
            .iter()
            .copied()
            .filter(|g| self.genres.contains_key(g))
            .collect()
    }

    /// Top `n` genres by count, ties broken by id for determinism.
    pub fn top_genres(&self, n: usize) -> Vec<i64> {
        let mut ranked: Vec<(i64, u32)> = self.genres.iter().map(|(id, c)| (*id, *c)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.into_iter().take(n).map(|(id, _)| id).collect()
    }

    /// All affinity genres ordered by count descending.
    pub fn genres_by_affinity(&self) -> Vec<(i64, u32)> {
        let mut ranked: Vec<(i64, u32)> = self.genres.iter().map(|(id, c)| (*id, *c)).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked
    }

    pub fn top_directors(&self) -> Vec<(i64, PersonAffinity)> {
        Self::top_people(&self.directors)
    }

    pub fn top_actors(&self) -> Vec<(i64, PersonAffinity)> {
        Self::top_people(&self.actors)
    }

    /// Whether any director or actor cleared the significance bar.
    pub fn has_person_signal(&self) -> bool {
        !self.top_directors().is_empty() || !self.top_actors().is_empty()
    }

    fn top_people(people: &HashMap<i64, PersonAffinity>) -> Vec<(i64, PersonAffinity)> {
        let mut ranked: Vec<(i64, PersonAffinity)> = people
            .iter()
            .filter(|(_, p)| p.count >= PERSON_SIGNIFICANCE_MIN)
            .map(|(id, p)| (*id, p.clone()))
            .collect();
        ranked.sort_by(|a, b| b.1.count.cmp(&a.1.count).then(a.0.cmp(&b.0)));
        ranked.truncate(TOP_PEOPLE);
        ranked
    }
}

/// Everything one sampled seed contributed: its title plus the primary
/// discovery pages pulled alongside the profile fetches, so aggregation does
/// not repeat those calls.
#[derive(Debug, Clone)]
pub struct SeedFetch {
    pub seed: MediaId,
    pub title: String,
    pub recommendations: Vec<MediaSummary>,
    pub similar: Vec<MediaSummary>,
}

/// Profile plus captured primary pages for one strategy invocation.
#[derive(Debug, Clone, Default)]
pub struct SourceSignals {
    pub profile: AffinityProfile,
    pub seeds: Vec<SeedFetch>,
}

/// Uniform random sample of at most `size` items. Shuffle-then-truncate
/// bounds downstream provider calls regardless of collection size, at the
/// cost of run-to-run variance.
pub fn sample_items(items: &[MediaId], size: usize) -> Vec<MediaId> {
    let mut pool = items.to_vec();
    pool.shuffle(&mut rand::rng());
    pool.truncate(size);
    pool
}

/// Builds affinity histograms from a sampled slice of source items.
pub struct ProfileBuilder {
    metadata: Arc<dyn MetadataSource>,
}

impl ProfileBuilder {
    pub fn new(metadata: Arc<dyn MetadataSource>) -> Self {
        Self { metadata }
    }

    /// Fan out one task per sampled seed, each fetching details, credits,
    /// recommendations, and similar concurrently, then fold the joined
    /// results into histograms. Merge order follows join order; the counts
    /// are commutative so completion order never matters.
    pub async fn build_signals(&self, sample: &[MediaId]) -> SourceSignals {
        let mut tasks = Vec::new();
        for &seed in sample {
            let metadata = Arc::clone(&self.metadata);
            tasks.push(tokio::spawn(async move {
                let (details, credits, recommendations, similar) = tokio::join!(
                    metadata.details(seed),
                    metadata.credits(seed),
                    metadata.recommendations(seed),
                    metadata.similar(seed),
                );
                (seed, details, credits, recommendations, similar)
            }));
        }

        let mut signals = SourceSignals::default();
        for task in tasks {
            let (seed, details, credits, recommendations, similar) = match task.await {
                Ok(joined) => joined,
                Err(e) => {
                    tracing::error!(error = %e, "Profile fetch task failed");
                    continue;
                }
            };

            let mut title = String::new();
            if let Some(details) = details {
                title = details.title;
                for genre in &details.genres {
                    *signals.profile.genres.entry(genre.id).or_insert(0) += 1;
                }
            }
            if let Some(credits) = credits {
                fold_credits(&mut signals.profile, &credits);
            }

            signals.seeds.push(SeedFetch {
                seed,
                title,
                recommendations: recommendations.map(|p| p.results).unwrap_or_default(),
                similar: similar.map(|p| p.results).unwrap_or_default(),
            });
        }

        tracing::debug!(
            sampled = sample.len(),
            genres = signals.profile.genres.len(),
            directors = signals.profile.directors.len(),
            actors = signals.profile.actors.len(),
            "Built affinity profile"
        );

        signals
    }
}

fn fold_credits(profile: &mut AffinityProfile, credits: &Credits) {
    for member in credits.crew.iter().filter(|m| m.job == "Director") {
        let entry = profile
            .directors
            .entry(member.id)
            .or_insert_with(|| PersonAffinity { name: member.name.clone(), count: 0 });
        entry.count += 1;
    }
    for member in credits.cast.iter().filter(|m| m.order < TOP_BILLED) {
        let entry = profile
            .actors
            .entry(member.id)
            .or_insert_with(|| PersonAffinity { name: member.name.clone(), count: 0 });
        entry.count += 1;
    }
}
