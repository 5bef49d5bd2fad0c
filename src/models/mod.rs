use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::Display;
use std::str::FromStr;

pub mod metadata;
pub mod recommend;

pub use metadata::{CastMember, Credits, CrewMember, Genre, MediaDetails, MediaSummary, Paged};
pub use recommend::{
    Candidate, CategoryBlock, CategoryResponse, ExclusionSnapshot, Explainability,
    RecommendationPage, RecommendedItem, ScoreBreakdown,
};

/// Suffix the store and API boundary append to series identifiers
/// (e.g. `"12345"` is a movie, `"12345tv"` a series).
const SERIES_SUFFIX: &str = "tv";

/// Identifier for a movie or series in the metadata provider's ID space.
///
/// Internally the media kind is an explicit tag; the legacy string encoding
/// with the `tv` suffix only exists at the store/API boundary, produced by
/// `Display` and consumed by `FromStr`. Every map or set in the pipeline keys
/// on this type, so movie `550` and series `550` can never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MediaId {
    Movie(i64),
    Series(i64),
}

impl MediaId {
    /// The provider-side numeric identifier, without the kind tag.
    pub fn provider_id(&self) -> i64 {
        match self {
            MediaId::Movie(id) | MediaId::Series(id) => *id,
        }
    }

    pub fn kind(&self) -> MediaKind {
        match self {
            MediaId::Movie(_) => MediaKind::Movie,
            MediaId::Series(_) => MediaKind::Series,
        }
    }

    pub fn is_movie(&self) -> bool {
        matches!(self, MediaId::Movie(_))
    }
}

impl Display for MediaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaId::Movie(id) => write!(f, "{}", id),
            MediaId::Series(id) => write!(f, "{}{}", id, SERIES_SUFFIX),
        }
    }
}

/// Error returned when a boundary identifier string cannot be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseMediaIdError(pub String);

impl Display for ParseMediaIdError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid media identifier: {:?}", self.0)
    }
}

impl std::error::Error for ParseMediaIdError {}

impl FromStr for MediaId {
    type Err = ParseMediaIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let make_err = || ParseMediaIdError(s.to_string());
        if let Some(raw) = s.strip_suffix(SERIES_SUFFIX) {
            raw.parse::<i64>().map(MediaId::Series).map_err(|_| make_err())
        } else {
            s.parse::<i64>().map(MediaId::Movie).map_err(|_| make_err())
        }
    }
}

impl Serialize for MediaId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MediaId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Media type requested by the caller (`"movie"` / `"tv"` on the wire).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaKind {
    #[serde(rename = "movie")]
    Movie,
    #[serde(rename = "tv")]
    Series,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Movie => "movie",
            MediaKind::Series => "tv",
        }
    }

    /// Tag a bare provider id with this kind.
    pub fn media_id(&self, provider_id: i64) -> MediaId {
        match self {
            MediaKind::Movie => MediaId::Movie(provider_id),
            MediaKind::Series => MediaId::Series(provider_id),
        }
    }
}

/// A user-curated collection designated as recommendation input signal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
pub struct SourceCollection {
    pub id: i64,
    pub name: String,
}

/// Per-user recommendation preference flags.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::FromRow)]
pub struct UserFlags {
    pub recommendations_enabled: bool,
    pub category_recommendations_enabled: bool,
}
