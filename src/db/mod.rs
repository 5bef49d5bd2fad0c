pub mod cache_store;
pub mod catalog;
pub mod postgres;

pub use cache_store::CacheRow;
pub use cache_store::CacheStore;
pub use cache_store::PgCacheStore;
pub use catalog::CatalogStore;
pub use catalog::PgCatalogStore;
pub use postgres::create_pool;
