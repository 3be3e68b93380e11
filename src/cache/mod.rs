//! # Cache Module
//!
//! Memoizes expensive query lookups (free text → canonical track reference).
//!
//! ## Stores
//!
//! - **[`MemoryStore`]**: in-memory map, persisted as one JSON file that is
//!   loaded on start and flushed on exit. A lost file only costs lookups.
//! - **[`SqlStore`]**: SQLite table with a max age and a `last_fetched`
//!   stamp that decides which entries are worth refreshing in the background.
//!
//! ## Read path
//!
//! A hit never calls the resolver. A miss calls it once, even under
//! concurrent requests for the same query, and stores the answer.
//!
//! ```rust,no_run
//! use open_music_lavalink::cache::{MemoryStore, QueryCache, YouTubeSearchResolver};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let store = Arc::new(MemoryStore::load("data/audio.cache").await?);
//! let resolver = Arc::new(YouTubeSearchResolver::new("API_KEY".into())?);
//! let cache = QueryCache::new(store, resolver);
//!
//! let url = cache.resolve("never gonna give you up").await?;
//! # Ok(())
//! # }
//! ```

pub mod query_cache;
pub mod resolver;
pub mod store;

pub use query_cache::QueryCache;
pub use resolver::{QueryResolver, YouTubeSearchResolver};
pub use store::{CacheEntry, MemoryStore, QueryStore, SqlStore};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Cache file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cache worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
