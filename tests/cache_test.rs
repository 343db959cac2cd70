//! Tests for the revalidation cache through the public API.

use bytes::Bytes;
use couchnet::http::httpcache::{is_cacheable, CacheEntry, CacheLimits, HttpCache};
use http::header::{HeaderMap, HeaderValue, CACHE_CONTROL, ETAG};
use http::StatusCode;

fn entry(etag: &'static str, body: &'static str) -> CacheEntry {
    let mut headers = HeaderMap::new();
    headers.insert(ETAG, HeaderValue::from_static(etag));
    CacheEntry::from_response(StatusCode::OK, headers, Some(Bytes::from_static(body.as_bytes())))
}

#[test]
fn test_remove_miss() {
    let url = "http://localhost:5984/foo";
    let mut cache = HttpCache::new();
    cache.put(url, CacheEntry::default());
    assert!(cache.remove(url).is_some());
    assert!(cache.remove(url).is_none());
    assert!(cache.is_empty());
}

#[test]
fn test_eviction_keeps_recently_read() {
    let mut cache =
        HttpCache::with_limits(CacheLimits { max_entries: 3, ..CacheLimits::default() });
    for i in 0..3 {
        cache.put(&format!("http://localhost:5984/db/{i}"), entry("\"1\"", "{}"));
    }

    // Reading /0 makes /1 the least recently used.
    assert!(cache.get("http://localhost:5984/db/0").is_some());
    cache.put("http://localhost:5984/db/3", entry("\"1\"", "{}"));

    assert_eq!(cache.len(), 3);
    assert!(cache.contains("http://localhost:5984/db/0"));
    assert!(!cache.contains("http://localhost:5984/db/1"));
    assert!(cache.contains("http://localhost:5984/db/3"));
}

#[test]
fn test_put_replaces_existing() {
    let url = "http://localhost:5984/db/doc";
    let mut cache = HttpCache::new();
    cache.put(url, entry("\"1-a\"", "old"));
    cache.put(url, entry("\"2-b\"", "new"));

    let cached = cache.get(url).unwrap();
    assert_eq!(cached.etag().unwrap(), "\"2-b\"");
    assert_eq!(cached.body.unwrap(), "new");
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_oversized_body_never_stored() {
    let mut cache = HttpCache::with_limits(CacheLimits { max_entries: 10, max_cacheable_size: 4 });
    assert!(!cache.put("http://h/db/big", entry("\"1\"", "too large")));
    assert!(cache.put("http://h/db/small", entry("\"1\"", "tiny")));
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_refresh_keeps_body() {
    let url = "http://h/db/doc";
    let mut cache = HttpCache::new();
    cache.put(url, entry("\"1-a\"", "body"));

    let mut not_modified = HeaderMap::new();
    not_modified.insert(CACHE_CONTROL, HeaderValue::from_static("must-revalidate"));
    let refreshed = cache.refresh(url, &not_modified).unwrap();

    assert_eq!(refreshed.body.as_ref().unwrap(), "body");
    assert_eq!(refreshed.headers[CACHE_CONTROL], "must-revalidate");
    assert_eq!(refreshed.etag().unwrap(), "\"1-a\"");
    assert!(cache.refresh("http://h/db/other", &not_modified).is_none());
}

#[test]
fn test_cacheability_rules() {
    let mut headers = HeaderMap::new();
    assert!(!is_cacheable(StatusCode::OK, &headers));

    headers.insert(ETAG, HeaderValue::from_static("\"1\""));
    assert!(is_cacheable(StatusCode::OK, &headers));
    assert!(!is_cacheable(StatusCode::MOVED_PERMANENTLY, &headers));

    headers.insert(CACHE_CONTROL, HeaderValue::from_static("private, no-store"));
    assert!(!is_cacheable(StatusCode::OK, &headers));
}
