use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::de::DeserializeOwned;

use crate::config::Config;
use crate::models::metadata::{Credits, Genre, GenreList, MediaDetails, MediaSummary, Paged};
use crate::models::{MediaId, MediaKind};

/// Quality floor applied to discover queries: enough votes to trust the
/// rating, and a rating worth recommending.
pub const DISCOVER_MIN_VOTES: i64 = 100;
pub const DISCOVER_MIN_RATING: f64 = 6.0;

/// Typed operations the recommendation pipeline needs from the metadata
/// provider.
///
/// Every operation degrades to `None` on provider failure; callers treat that
/// as "no data" and continue with whatever the other concurrent calls
/// returned. There is no retry at this layer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataSource: Send + Sync {
    async fn details(&self, media: MediaId) -> Option<MediaDetails>;

    async fn credits(&self, media: MediaId) -> Option<Credits>;

    async fn recommendations(&self, media: MediaId) -> Option<Paged<MediaSummary>>;

    async fn similar(&self, media: MediaId) -> Option<Paged<MediaSummary>>;

    /// Popular movies featuring one person, optionally constrained to a
    /// genre list (OR-combined).
    async fn discover_movies_by_person(
        &self,
        person_id: i64,
        genre_ids: Vec<i64>,
    ) -> Option<Paged<MediaSummary>>;

    /// One page of discover results for a genre, with the quality floor applied.
    async fn discover_by_genre(
        &self,
        kind: MediaKind,
        genre_id: i64,
        page: u32,
    ) -> Option<Paged<MediaSummary>>;

    /// One page of movies currently in theaters.
    async fn now_playing(&self, page: u32) -> Option<Paged<MediaSummary>>;

    /// One page of this week's trending titles, movies and series mixed.
    async fn trending(&self, page: u32) -> Option<Paged<MediaSummary>>;

    async fn genre_list(&self, kind: MediaKind) -> Option<Vec<Genre>>;
}

/// OR-combined genre filter in the provider's list syntax.
fn genre_filter(genre_ids: &[i64]) -> String {
    genre_ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join("|")
}

fn media_path(media: MediaId) -> String {
    format!("/{}/{}", media.kind().as_str(), media.provider_id())
}

/// Thin fetch wrapper around the external metadata API.
#[derive(Clone)]
pub struct MetadataGateway {
    http_client: HttpClient,
    api_key: String,
    api_url: String,
}

impl MetadataGateway {
    pub fn new(api_key: String, api_url: String) -> Self {
        Self {
            http_client: HttpClient::new(),
            api_key,
            api_url,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.metadata_api_key.clone(), config.metadata_api_url.clone())
    }

    /// Fetch and decode one endpoint. Non-2xx statuses, network errors, and
    /// malformed payloads all log and return `None`; a single failed call
    /// contributes nothing to the aggregate instead of aborting the pass.
    async fn fetch<T: DeserializeOwned>(&self, path: &str, params: &[(&str, String)]) -> Option<T> {
        let url = format!("{}{}", self.api_url, path);

        let response = match self
            .http_client
            .get(&url)
            .query(&[("api_key", self.api_key.as_str())])
            .query(params)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(path, error = %e, "Metadata request failed");
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::warn!(path, status = %response.status(), "Metadata API returned error status");
            return None;
        }

        match response.json::<T>().await {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(path, error = %e, "Failed to decode metadata response");
                None
            }
        }
    }
}

#[async_trait]
impl MetadataSource for MetadataGateway {
    async fn details(&self, media: MediaId) -> Option<MediaDetails> {
        self.fetch(&media_path(media), &[]).await
    }

    async fn credits(&self, media: MediaId) -> Option<Credits> {
        self.fetch(&format!("{}/credits", media_path(media)), &[]).await
    }

    async fn recommendations(&self, media: MediaId) -> Option<Paged<MediaSummary>> {
        self.fetch(&format!("{}/recommendations", media_path(media)), &[]).await
    }

    async fn similar(&self, media: MediaId) -> Option<Paged<MediaSummary>> {
        self.fetch(&format!("{}/similar", media_path(media)), &[]).await
    }

    async fn discover_movies_by_person(
        &self,
        person_id: i64,
        genre_ids: Vec<i64>,
    ) -> Option<Paged<MediaSummary>> {
        let mut params = vec![
            ("with_people", person_id.to_string()),
            ("sort_by", "popularity.desc".to_string()),
        ];
        if !genre_ids.is_empty() {
            params.push(("with_genres", genre_filter(&genre_ids)));
        }
        self.fetch("/discover/movie", &params).await
    }

    async fn discover_by_genre(
        &self,
        kind: MediaKind,
        genre_id: i64,
        page: u32,
    ) -> Option<Paged<MediaSummary>> {
        let params = [
            ("with_genres", genre_id.to_string()),
            ("page", page.to_string()),
            ("vote_count.gte", DISCOVER_MIN_VOTES.to_string()),
            ("vote_average.gte", DISCOVER_MIN_RATING.to_string()),
            ("sort_by", "popularity.desc".to_string()),
        ];
        self.fetch(&format!("/discover/{}", kind.as_str()), &params).await
    }

    async fn now_playing(&self, page: u32) -> Option<Paged<MediaSummary>> {
        self.fetch("/movie/now_playing", &[("page", page.to_string())]).await
    }

    async fn trending(&self, page: u32) -> Option<Paged<MediaSummary>> {
        self.fetch("/trending/all/week", &[("page", page.to_string())]).await
    }

    async fn genre_list(&self, kind: MediaKind) -> Option<Vec<Genre>> {
        let list: GenreList = self.fetch(&format!("/genre/{}/list", kind.as_str()), &[]).await?;
        Some(list.genres)
    }
}
