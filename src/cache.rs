//! Rendered feed cache.
//!
//! Entries are rendered bytes keyed by a request fingerprint. Each entry
//! records the data freshness token current when it was written; an entry is
//! served only while it is younger than the TTL and the token still matches.
//! A token mismatch means the catalog data changed, so the whole store is
//! dropped rather than just the key that noticed.
//!
//! Writers are not serialized. Two requests missing the same key both render
//! and both write; rendering is deterministic for the same data, so the last
//! write wins with identical bytes. An invalidation racing a write can at
//! worst cost one extra miss.

mod store;

pub use store::{MemoryStore, SqliteStore};

use crate::error::Result;
use crate::opds::Variant;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// One cached response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedValue {
    /// Rendered document.
    pub body: Vec<u8>,
    /// Freshness token at write time.
    pub token: String,
    /// Write time, unix milliseconds.
    pub written_at: i64,
}

/// Backing storage for [`CacheManager`].
pub trait CacheStore: Send + Sync {
    /// Fetch a value.
    fn get(&self, key: &str) -> Result<Option<CachedValue>>;

    /// Insert or replace a value.
    fn set(&self, key: &str, value: CachedValue) -> Result<()>;

    /// Remove a value. Returns whether it existed.
    fn delete(&self, key: &str) -> Result<bool>;

    /// Remove everything.
    fn clear(&self) -> Result<()>;

    /// All stored keys.
    fn keys(&self) -> Result<Vec<String>>;
}

/// Supplies the current data freshness token.
pub type TokenSupplier = Arc<dyn Fn() -> String + Send + Sync>;

/// Cache of rendered documents, validated against data freshness.
///
/// Storage failures are logged and treated as misses; the cache never fails
/// a request.
pub struct CacheManager {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
    token: TokenSupplier,
    /// Token seen by the last write or validation.
    recorded_token: Mutex<Option<String>>,
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("ttl", &self.ttl)
            .field("recorded_token", &*self.recorded_token.lock())
            .finish_non_exhaustive()
    }
}

impl CacheManager {
    /// Create a cache over a store with a TTL and a freshness token supplier.
    pub fn new(
        store: Arc<dyn CacheStore>,
        ttl: Duration,
        token: impl Fn() -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            store,
            ttl,
            token: Arc::new(token),
            recorded_token: Mutex::new(None),
        }
    }

    /// Time to live of cached entries.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached bytes for `key`, if still valid.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.get_entry(key).map(|entry| entry.body)
    }

    /// Cached entry for `key`, if still valid.
    pub fn get_entry(&self, key: &str) -> Option<CachedValue> {
        let current = (self.token)();

        let stale = {
            let mut recorded = self.recorded_token.lock();
            let stale = recorded.as_ref().is_some_and(|t| *t != current);
            *recorded = Some(current.clone());
            stale
        };
        if stale {
            tracing::info!("Catalog data changed, invalidating feed cache");
            self.invalidate_all();
            return None;
        }

        let entry = match self.store.get(key) {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                tracing::debug!(key, "Feed cache miss");
                return None;
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "Feed cache read failed");
                return None;
            }
        };

        if entry.token != current {
            tracing::info!(key, "Cached feed predates data change, invalidating feed cache");
            self.invalidate_all();
            return None;
        }

        if !self.is_fresh(&entry) {
            tracing::debug!(key, "Cached feed expired");
            if let Err(e) = self.store.delete(key) {
                tracing::warn!(key, error = %e, "Failed to drop expired feed");
            }
            return None;
        }

        tracing::debug!(key, "Feed cache hit");
        Some(entry)
    }

    /// Current data freshness token.
    ///
    /// Read it before loading the data a document is rendered from and pass
    /// it to [`CacheManager::set_with_token`], so a change that lands while
    /// rendering leaves the entry tagged as stale.
    pub fn current_token(&self) -> String {
        (self.token)()
    }

    /// Store rendered bytes under `key` with the current freshness token.
    pub fn set(&self, key: &str, body: &[u8]) -> CachedValue {
        self.set_with_token(key, body, self.current_token())
    }

    /// Store rendered bytes under `key` tagged with `token`.
    pub fn set_with_token(&self, key: &str, body: &[u8], token: String) -> CachedValue {
        let value = CachedValue {
            body: body.to_vec(),
            token: token.clone(),
            written_at: now_millis(),
        };

        *self.recorded_token.lock() = Some(token);

        if let Err(e) = self.store.set(key, value.clone()) {
            tracing::warn!(key, error = %e, "Feed cache write failed");
        }

        value
    }

    /// Drop every cached entry.
    pub fn invalidate_all(&self) {
        match self.store.clear() {
            Ok(()) => tracing::debug!("Feed cache cleared"),
            Err(e) => tracing::warn!(error = %e, "Failed to clear feed cache"),
        }
    }

    /// Drop entries whose key matches a glob pattern. Returns how many were
    /// removed. An invalid pattern removes nothing.
    pub fn invalidate_by_pattern(&self, pattern: &str) -> usize {
        let matcher = match glob::Pattern::new(pattern) {
            Ok(matcher) => matcher,
            Err(e) => {
                tracing::warn!(pattern, error = %e, "Invalid cache key pattern");
                return 0;
            }
        };

        let keys = match self.store.keys() {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to list feed cache keys");
                return 0;
            }
        };

        let removed = keys
            .iter()
            .filter(|key| matcher.matches(key))
            .filter(|key| self.store.delete(key).unwrap_or(false))
            .count();

        tracing::debug!(pattern, removed, "Feed cache entries invalidated");
        removed
    }

    fn is_fresh(&self, entry: &CachedValue) -> bool {
        let age = now_millis().saturating_sub(entry.written_at);
        i128::from(age) < self.ttl.as_millis() as i128
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Request fingerprint: scope, sorted parameters and protocol variant.
///
/// Renders as `"{scope}:{digest}"`, so keys of one scope can be dropped with
/// a pattern such as `"books:*"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKey {
    scope: String,
    variant: Variant,
    params: BTreeMap<String, String>,
}

impl CacheKey {
    /// Start a key for a scope (usually the route name).
    pub fn new(scope: impl Into<String>, variant: Variant) -> Self {
        Self {
            scope: scope.into(),
            variant,
            params: BTreeMap::new(),
        }
    }

    /// Add a distinguishing parameter.
    pub fn param(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(name.into(), value.to_string());
        self
    }

    /// Add a parameter only when present.
    pub fn param_opt(self, name: impl Into<String>, value: Option<impl ToString>) -> Self {
        match value {
            Some(value) => self.param(name, value),
            None => self,
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut hasher = Sha256::new();
        hasher.update(self.variant.as_str().as_bytes());
        for (name, value) in &self.params {
            // Length prefixes keep ("a", "bc") and ("ab", "c") apart.
            hasher.update((name.len() as u64).to_le_bytes());
            hasher.update(name.as_bytes());
            hasher.update((value.len() as u64).to_le_bytes());
            hasher.update(value.as_bytes());
        }
        let digest = hasher.finalize();

        write!(f, "{}:{}", self.scope, hex::encode(&digest[..16]))
    }
}

/// Strong ETag of a response body.
pub fn compute_etag(body: &[u8]) -> String {
    format!("\"{}\"", hex::encode(Sha256::digest(body)))
}

/// Whether an `If-None-Match` header value matches `etag`, meaning the
/// client copy is current and a 304 can be sent without a body.
pub fn is_not_modified(if_none_match: Option<&str>, etag: &str) -> bool {
    let Some(header) = if_none_match else {
        return false;
    };

    let etag = etag.trim_start_matches("W/");
    header
        .split(',')
        .map(str::trim)
        .any(|candidate| candidate == "*" || candidate.trim_start_matches("W/") == etag)
}
