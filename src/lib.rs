//! Recommendation core for a personal media tracker: builds taste profiles
//! from a user's curated collections, aggregates and scores candidates from
//! an external metadata provider, and caches strategy results per user in
//! the relational store with single-flight regeneration.
//!
//! The embedding application owns routing, auth, and collection CRUD; it
//! constructs a [`Recommender`] and calls its entry points, and notifies the
//! cache through the invalidation hooks when collections or preferences
//! change.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use services::cache::{CacheCoordinator, CacheDebugReport};
pub use services::gateway::{MetadataGateway, MetadataSource};
pub use services::recommendations::Recommender;

/// Install a global tracing subscriber honoring `RUST_LOG`, for embedders
/// that have not set one up themselves. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}
