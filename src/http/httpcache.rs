//! Revalidation cache.
//!
//! Chromium mapping: net/http/http_cache.h (simplified in-memory version)
//!
//! Entries are never served without asking the server: a cached entry only
//! supplies the `If-None-Match` validator for a conditional GET, and its
//! body stands in for the response when the server answers `304 Not
//! Modified`. Storage is bounded by entry count (LRU eviction) and by a
//! per-entry body size limit.

use bytes::Bytes;
use http::{HeaderMap, HeaderValue, StatusCode};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::time::Instant;
use url::Url;

/// Default number of cached URLs.
pub const DEFAULT_MAX_ENTRIES: usize = 75;

/// Default largest body kept in the cache, in bytes.
pub const DEFAULT_MAX_CACHEABLE_SIZE: usize = 8192;

/// Storage bounds for [`HttpCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheLimits {
    /// Entries kept before the least recently used is evicted. `0` disables
    /// the cache.
    pub max_entries: usize,
    /// Largest body stored, in bytes.
    pub max_cacheable_size: usize,
}

impl Default for CacheLimits {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            max_cacheable_size: DEFAULT_MAX_CACHEABLE_SIZE,
        }
    }
}

/// Cached response entry.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Response status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body, `None` for bodiless responses
    pub body: Option<Bytes>,
    /// When this entry was cached or last revalidated
    pub cached_at: Instant,
}

impl Default for CacheEntry {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: None,
            cached_at: Instant::now(),
        }
    }
}

impl CacheEntry {
    pub fn from_response(status: StatusCode, headers: HeaderMap, body: Option<Bytes>) -> Self {
        Self { status, headers, body, cached_at: Instant::now() }
    }

    /// The entity tag used to revalidate this entry.
    pub fn etag(&self) -> Option<&HeaderValue> {
        self.headers.get(http::header::ETAG)
    }

    pub fn body_len(&self) -> usize {
        self.body.as_ref().map_or(0, Bytes::len)
    }
}

/// In-memory revalidation cache keyed by request URL.
pub struct HttpCache {
    entries: LruCache<String, CacheEntry>,
    limits: CacheLimits,
}

impl std::fmt::Debug for HttpCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCache")
            .field("len", &self.entries.len())
            .field("limits", &self.limits)
            .finish()
    }
}

impl Default for HttpCache {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpCache {
    /// Create a new cache with default limits.
    pub fn new() -> Self {
        Self::with_limits(CacheLimits::default())
    }

    /// Create a cache with custom limits.
    pub fn with_limits(limits: CacheLimits) -> Self {
        let capacity = NonZeroUsize::new(limits.max_entries).unwrap_or(NonZeroUsize::MIN);
        Self { entries: LruCache::new(capacity), limits }
    }

    pub fn limits(&self) -> CacheLimits {
        self.limits
    }

    /// Insert or replace the entry for `url`.
    ///
    /// Returns `false` when the entry was not stored: the cache is disabled
    /// or the body exceeds `max_cacheable_size`. A rejected entry also drops
    /// whatever was cached for the URL before.
    pub fn put(&mut self, url: &str, entry: CacheEntry) -> bool {
        let key = cache_key(url);
        if self.limits.max_entries == 0 || entry.body_len() > self.limits.max_cacheable_size {
            tracing::trace!(url = %key, size = entry.body_len(), "entry not cacheable");
            self.entries.pop(&key);
            return false;
        }

        if let Some((evicted, _)) = self.entries.push(key.clone(), entry) {
            if evicted != key {
                tracing::trace!(url = %evicted, "evicted least recently used entry");
            }
        }
        true
    }

    /// Look up a cached entry, marking it most recently used.
    pub fn get(&mut self, url: &str) -> Option<CacheEntry> {
        self.entries.get(&cache_key(url)).cloned()
    }

    /// Look up a cached entry without touching recency.
    pub fn peek(&self, url: &str) -> Option<&CacheEntry> {
        self.entries.peek(&cache_key(url))
    }

    pub fn contains(&self, url: &str) -> bool {
        self.entries.contains(&cache_key(url))
    }

    /// Remove an entry from the cache. Absent keys are ignored.
    pub fn remove(&mut self, url: &str) -> Option<CacheEntry> {
        self.entries.pop(&cache_key(url))
    }

    /// Update an entry after the server confirmed it with `304 Not Modified`.
    ///
    /// Validator and freshness headers sent with the 304 replace the cached
    /// ones. Returns the refreshed entry.
    pub fn refresh(&mut self, url: &str, not_modified: &HeaderMap) -> Option<CacheEntry> {
        let entry = self.entries.get_mut(&cache_key(url))?;
        for name in [
            http::header::ETAG,
            http::header::CACHE_CONTROL,
            http::header::EXPIRES,
            http::header::DATE,
        ] {
            if let Some(value) = not_modified.get(&name) {
                entry.headers.insert(name, value.clone());
            }
        }
        entry.cached_at = Instant::now();
        Some(entry.clone())
    }

    /// Clear all cached entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Get the number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Whether a response may be stored: successful, carrying an entity tag,
/// and not marked `no-store`.
pub fn is_cacheable(status: StatusCode, headers: &HeaderMap) -> bool {
    status.is_success()
        && headers.contains_key(http::header::ETAG)
        && !parse_cache_control(headers).no_store
}

/// Normalize a request URL into a cache key. The fragment never reaches the
/// server, so it is not part of the key.
pub fn cache_key(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_fragment(None);
            parsed.into()
        }
        Err(_) => match url.find('#') {
            Some(pos) => url[..pos].to_string(),
            None => url.to_string(),
        },
    }
}

/// Parsed Cache-Control directive.
#[derive(Debug, Default)]
struct CacheControl {
    no_store: bool,
}

/// Parse Cache-Control header.
fn parse_cache_control(headers: &HeaderMap) -> CacheControl {
    let mut cc = CacheControl::default();

    for value in headers.get_all(http::header::CACHE_CONTROL) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        for directive in value.split(',') {
            let directive = directive.trim();
            if directive.eq_ignore_ascii_case("no-store") {
                cc.no_store = true;
            }
        }
    }

    cc
}
