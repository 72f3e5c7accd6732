//! Application state shared across handlers.

use crate::cache::{CacheManager, CacheStore, MemoryStore, SqliteStore};
use crate::config::{CacheBackend, Config};
use crate::db::Database;
use crate::error::Result;
use crate::validate::Validator;
use std::sync::Arc;
use std::time::Duration;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,
    /// Catalog database.
    pub db: Database,
    /// Rendered feed cache. `None` when caching is disabled.
    pub cache: Option<Arc<CacheManager>>,
    /// Request parameter validator.
    pub validator: Validator,
}

impl AppState {
    /// Create application state, opening the configured cache backend.
    pub fn new(config: Config, db: Database) -> Result<Self> {
        let cache = if config.cache.enabled {
            let store = open_cache_store(&config)?;
            Some(Arc::new(feed_cache(store, &config, db.clone())))
        } else {
            None
        };

        Ok(Self::with_cache(config, db, cache))
    }

    /// Create application state around an existing cache.
    pub fn with_cache(config: Config, db: Database, cache: Option<Arc<CacheManager>>) -> Self {
        let validator = Validator::new(config.limits.clone());
        Self {
            config: Arc::new(config),
            db,
            cache,
            validator,
        }
    }

    /// Get the base URL for generating links.
    pub fn base_url(&self) -> &str {
        self.config.server.base_url.trim_end_matches('/')
    }
}

/// Open the store selected by `cache.backend`.
pub fn open_cache_store(config: &Config) -> Result<Arc<dyn CacheStore>> {
    Ok(match config.cache.backend {
        CacheBackend::Memory => Arc::new(MemoryStore::new()),
        CacheBackend::Sqlite => Arc::new(SqliteStore::open(&config.cache.path)?),
    })
}

/// Feed cache whose freshness token is the catalog watermark.
///
/// If the watermark cannot be read, every call yields a fresh token so
/// nothing cached is served until the database recovers.
pub fn feed_cache(store: Arc<dyn CacheStore>, config: &Config, db: Database) -> CacheManager {
    let ttl = Duration::from_secs(config.cache.ttl_seconds);
    CacheManager::new(store, ttl, move || match db.watermark() {
        Ok(token) => token,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read catalog watermark");
            format!("unavailable:{}", uuid::Uuid::new_v4())
        }
    })
}
