//! HTTP session with revalidation cache.
//!
//! A [`Session`] turns one call into one logical exchange: it resolves the
//! URL, adds default and conditional headers, runs the transaction (with
//! retries), follows redirects, serves `304 Not Modified` from its cache and
//! maps error statuses to typed errors.
//!
//! # Example
//!
//! ```rust,ignore
//! use couchnet::session::Session;
//! use std::time::Duration;
//!
//! let mut session = Session::builder()
//!     .base_url("http://localhost:5984/")
//!     .timeout(Duration::from_secs(30))
//!     .build()?;
//!
//! let (status, headers, mut body) = session.get("db/doc", Default::default()).await?.into_parts();
//! let doc = body.read(None).await?;
//! ```

use crate::base::neterror::{ErrorDetail, NetError};
use crate::config::SessionConfig;
use crate::http::auth::{extract_credentials, Credentials};
use crate::http::h1::ResponseHead;
use crate::http::httpcache::{cache_key, is_cacheable, CacheEntry, CacheLimits, HttpCache};
use crate::http::requestbody::RequestBody;
use crate::http::response::HttpResponse;
use crate::http::responsebody::{Framing, Release, ResponseBody};
use crate::http::retry::RetryConfig;
use crate::http::streamfactory::HttpStreamFactory;
use crate::http::transaction::HttpNetworkTransaction;
use crate::socket::client::Connection;
use crate::socket::pool::ConnectionPool;
use bytes::{Bytes, BytesMut};
use http::header::{self, HeaderMap, HeaderValue};
use http::{Method, StatusCode};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// Permanent redirects remembered per session, least recently used first out.
const MAX_REMEMBERED_REDIRECTS: NonZeroUsize = match NonZeroUsize::new(128) {
    Some(n) => n,
    None => NonZeroUsize::MIN,
};

/// Error bodies are read up to this size for their `error`/`reason` detail.
const MAX_ERROR_BODY: usize = 64 * 1024;

/// HTTP session for talking to one or more database servers.
///
/// Use [`Session::builder()`] to configure and create a session.
pub struct Session {
    config: SessionConfig,
    base_url: Option<Url>,
    cache: HttpCache,
    pool: Arc<ConnectionPool>,
    factory: Arc<HttpStreamFactory>,
    /// Targets of `301 Moved Permanently`, keyed by cache key.
    perm_redirects: LruCache<String, String>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("base_url", &self.base_url.as_ref().map(Url::as_str))
            .field("timeout", &self.config.timeout())
            .field("cache", &self.cache)
            .field("pool", &self.pool)
            .finish()
    }
}

impl Session {
    /// Create a new session with default settings.
    pub fn new() -> Self {
        let config = SessionConfig::default();
        let pool = Arc::new(ConnectionPool::with_max_idle_per_host(config.max_idle_per_host));
        Self::from_parts(config, None, pool)
    }

    /// Create a session from a config.
    pub fn with_config(config: SessionConfig) -> Result<Self, NetError> {
        Self::builder().config(config).build()
    }

    /// Create a new session builder.
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    fn from_parts(config: SessionConfig, base_url: Option<Url>, pool: Arc<ConnectionPool>) -> Self {
        let factory = Arc::new(HttpStreamFactory::new(Arc::clone(&pool), config.timeout()));
        Self {
            cache: HttpCache::with_limits(config.cache),
            base_url,
            pool,
            factory,
            perm_redirects: LruCache::new(MAX_REMEMBERED_REDIRECTS),
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.config.timeout()
    }

    pub fn cache(&self) -> &HttpCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut HttpCache {
        &mut self.cache
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Resolve `url` against the base URL, if any.
    pub fn resolve_url(&self, url: &str) -> Result<Url, NetError> {
        let parsed = match &self.base_url {
            Some(base) => base.join(url),
            None => Url::parse(url),
        }
        .map_err(|_| NetError::InvalidUrl)?;

        match parsed.scheme() {
            "http" | "https" => Ok(parsed),
            _ => Err(NetError::DisallowedUrlScheme),
        }
    }

    pub async fn get(&mut self, url: &str, headers: HeaderMap) -> Result<HttpResponse, NetError> {
        self.request(Method::GET, url, RequestBody::Empty, headers, None).await
    }

    pub async fn head(&mut self, url: &str, headers: HeaderMap) -> Result<HttpResponse, NetError> {
        self.request(Method::HEAD, url, RequestBody::Empty, headers, None).await
    }

    pub async fn delete(
        &mut self,
        url: &str,
        headers: HeaderMap,
    ) -> Result<HttpResponse, NetError> {
        self.request(Method::DELETE, url, RequestBody::Empty, headers, None).await
    }

    pub async fn put(
        &mut self,
        url: &str,
        body: impl Into<RequestBody>,
        headers: HeaderMap,
    ) -> Result<HttpResponse, NetError> {
        self.request(Method::PUT, url, body.into(), headers, None).await
    }

    pub async fn post(
        &mut self,
        url: &str,
        body: impl Into<RequestBody>,
        headers: HeaderMap,
    ) -> Result<HttpResponse, NetError> {
        self.request(Method::POST, url, body.into(), headers, None).await
    }

    /// Perform one logical request.
    ///
    /// Follows redirects, revalidates cached GET/HEAD responses and turns
    /// error statuses into typed errors. Small bodies come back buffered;
    /// everything else is a live stream that owns its connection until read
    /// to the end or closed.
    pub async fn request(
        &mut self,
        method: Method,
        url: &str,
        body: RequestBody,
        headers: HeaderMap,
        credentials: Option<Credentials>,
    ) -> Result<HttpResponse, NetError> {
        let started = Instant::now();
        let (mut url, url_credentials) = extract_credentials(&self.resolve_url(url)?);
        let credentials = credentials.or(url_credentials);

        let mut method = method;
        let mut body = body;
        let mut headers = headers;
        let mut redirects = 0;

        loop {
            if let Some(target) = self.perm_redirects.get(&cache_key(url.as_str())) {
                if let Ok(target) = Url::parse(target) {
                    tracing::trace!(
                        from = %url,
                        to = %target,
                        "using remembered permanent redirect"
                    );
                    url = target;
                }
            }
            let key = cache_key(url.as_str());
            let safe = method == Method::GET || method == Method::HEAD;

            let cached = if safe { self.cache.get(&key) } else { None };
            if !safe && self.cache.remove(&key).is_some() {
                tracing::trace!(url = %key, %method, "invalidated cached entry");
            }

            let request_headers =
                self.request_headers(&headers, &body, credentials.as_ref(), cached.as_ref());
            let mut transaction = HttpNetworkTransaction::new(
                Arc::clone(&self.factory),
                method.clone(),
                url.clone(),
                request_headers,
                std::mem::take(&mut body),
            );
            transaction.set_retry_config(self.config.retry.clone());
            transaction.start().await?;

            let (head, stream) = transaction.take_response().ok_or(NetError::EmptyResponse)?;
            let framing = head.framing(&method)?;
            let mut response_body = self.wrap_body(stream.into_connection(), &url, &head, framing);

            tracing::debug!(
                %method,
                url = %url,
                status = head.status.as_u16(),
                ?framing,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "response received"
            );

            // Redirects
            if let Some(target) = self.redirect_target(&method, &url, &head)? {
                drain(&mut response_body, self.config.buffer_threshold).await;

                if head.status == StatusCode::MOVED_PERMANENTLY {
                    self.perm_redirects.put(key, target.to_string());
                }
                redirects += 1;
                if redirects > self.config.max_redirects {
                    return Err(NetError::TooManyRedirects);
                }
                if head.status == StatusCode::SEE_OTHER && method != Method::HEAD {
                    method = Method::GET;
                    body = RequestBody::Empty;
                    headers.remove(header::CONTENT_TYPE);
                }
                tracing::debug!(
                    from = %url,
                    to = %target,
                    status = head.status.as_u16(),
                    "following redirect"
                );
                url = target;
                continue;
            }

            // Revalidation outcome
            if let Some(cached) = cached {
                if head.status == StatusCode::NOT_MODIFIED {
                    response_body.read(None).await?;
                    let entry = self.cache.refresh(&key, &head.headers).unwrap_or(cached);
                    tracing::debug!(url = %key, "serving revalidated entry from cache");

                    let body = match entry.body {
                        Some(bytes) if method == Method::GET => ResponseBody::buffered(bytes),
                        _ => ResponseBody::empty(),
                    };
                    let response =
                        HttpResponse::new(entry.status, head.version, entry.headers, url, body);
                    return Ok(response.with_from_cache(true));
                }
                self.cache.remove(&key);
            }
            if head.status == StatusCode::NOT_FOUND || head.status == StatusCode::GONE {
                self.cache.remove(&key);
            }

            if head.status.is_client_error() || head.status.is_server_error() {
                let bytes = read_error_body(&mut response_body).await.map_err(|e| {
                    tracing::warn!(
                        status = head.status.as_u16(),
                        error = %e,
                        url = %url,
                        "failed to read error body"
                    );
                    e
                })?;
                let detail = ErrorDetail::from_body(&bytes, head.is_json());
                tracing::debug!(status = head.status.as_u16(), %detail, url = %url, "error status");
                return Err(NetError::from_status(head.status, detail));
            }

            let response_body =
                self.maybe_buffer(&method, &key, &head, framing, response_body).await?;
            return Ok(HttpResponse::new(
                head.status,
                head.version,
                head.headers,
                url,
                response_body,
            ));
        }
    }

    /// Caller headers plus defaults, credentials and the cache validator.
    fn request_headers(
        &self,
        headers: &HeaderMap,
        body: &RequestBody,
        credentials: Option<&Credentials>,
        cached: Option<&CacheEntry>,
    ) -> HeaderMap {
        let mut out = headers.clone();

        if !out.contains_key(header::ACCEPT) {
            out.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        }
        if !out.contains_key(header::USER_AGENT) {
            if let Ok(ua) = HeaderValue::from_str(&self.config.user_agent) {
                out.insert(header::USER_AGENT, ua);
            }
        }
        if let Some(content_type) = body.content_type() {
            if !out.contains_key(header::CONTENT_TYPE) {
                out.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
            }
        }
        if let Some(creds) = credentials {
            if !out.contains_key(header::AUTHORIZATION) {
                out.insert(header::AUTHORIZATION, creds.to_header_value());
            }
        }
        if let Some(etag) = cached.and_then(CacheEntry::etag) {
            if !out.contains_key(header::IF_NONE_MATCH) {
                out.insert(header::IF_NONE_MATCH, etag.clone());
            }
        }
        out
    }

    /// Wrap the connection in a body that returns it to the pool once the
    /// body has been read to its end.
    fn wrap_body(
        &self,
        conn: Connection,
        url: &Url,
        head: &ResponseHead,
        framing: Framing,
    ) -> ResponseBody {
        let pool = Arc::clone(&self.pool);
        let origin = url.clone();
        let keep_alive = head.keep_alive();

        ResponseBody::new(
            conn,
            framing,
            Box::new(move |release| match release {
                Release::Reusable(conn) if keep_alive => pool.release_connection(&origin, conn),
                _ => tracing::trace!(url = %origin, "connection closed after response"),
            }),
        )
    }

    fn redirect_target(
        &self,
        method: &Method,
        url: &Url,
        head: &ResponseHead,
    ) -> Result<Option<Url>, NetError> {
        let follow = match head.status {
            StatusCode::SEE_OTHER => true,
            StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT => *method == Method::GET || *method == Method::HEAD,
            _ => false,
        };
        if !follow {
            return Ok(None);
        }

        let Some(location) = head.headers.get(header::LOCATION) else {
            return Ok(None);
        };
        let location = location.to_str().map_err(|_| NetError::InvalidRedirect)?;
        let target = url.join(location).map_err(|_| NetError::InvalidRedirect)?;
        match target.scheme() {
            "http" | "https" => Ok(Some(target)),
            _ => Err(NetError::InvalidRedirect),
        }
    }

    /// Read small and cacheable bodies eagerly so the connection goes back to
    /// the pool at once. Cacheable GET responses are stored.
    async fn maybe_buffer(
        &mut self,
        method: &Method,
        key: &str,
        head: &ResponseHead,
        framing: Framing,
        mut body: ResponseBody,
    ) -> Result<ResponseBody, NetError> {
        let limits: CacheLimits = self.cache.limits();
        let cacheable = *method == Method::GET
            && limits.max_entries > 0
            && is_cacheable(head.status, &head.headers);

        let buffer = match framing {
            Framing::Empty => true,
            Framing::Length(len) => {
                len < self.config.buffer_threshold as u64
                    || (cacheable && len <= limits.max_cacheable_size as u64)
            }
            Framing::Chunked | Framing::UntilClose => false,
        };
        if !buffer {
            return Ok(body);
        }

        let bytes: Bytes = body.read(None).await?;
        if cacheable {
            let entry =
                CacheEntry::from_response(head.status, head.headers.clone(), Some(bytes.clone()));
            if self.cache.put(key, entry) {
                tracing::trace!(url = %key, size = bytes.len(), "stored response in cache");
            }
        }
        Ok(ResponseBody::buffered(bytes))
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Read an error body, keeping at most `MAX_ERROR_BODY` bytes. A longer body
/// is cut off and its connection dropped.
async fn read_error_body(body: &mut ResponseBody) -> Result<Bytes, NetError> {
    let mut buf = BytesMut::new();
    while buf.len() < MAX_ERROR_BODY {
        let chunk = body.read(Some(MAX_ERROR_BODY - buf.len())).await?;
        if chunk.is_empty() {
            return Ok(buf.freeze());
        }
        buf.extend_from_slice(&chunk);
    }
    if !body.is_exhausted() {
        tracing::debug!(limit = MAX_ERROR_BODY, "error body truncated");
        body.close();
    }
    Ok(buf.freeze())
}

/// Read a redirect body if it is small enough to keep the connection,
/// otherwise drop the connection.
async fn drain(body: &mut ResponseBody, limit: usize) {
    match body.framing() {
        Framing::Length(len) if len <= limit as u64 => {
            if let Err(e) = body.read(None).await {
                tracing::trace!(error = %e, "failed to drain redirect body");
            }
        }
        _ => body.close(),
    }
}

/// Builder for creating a [`Session`].
#[derive(Default)]
pub struct SessionBuilder {
    config: SessionConfig,
    pool: Option<Arc<ConnectionPool>>,
}

impl SessionBuilder {
    /// Start from an existing config.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the bound on connect and on every socket read and write.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout_secs = Some(timeout.as_secs_f64());
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = Some(base_url.into());
        self
    }

    pub fn cache_limits(mut self, limits: CacheLimits) -> Self {
        self.config.cache = limits;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn max_redirects(mut self, max_redirects: usize) -> Self {
        self.config.max_redirects = max_redirects;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn buffer_threshold(mut self, threshold: usize) -> Self {
        self.config.buffer_threshold = threshold;
        self
    }

    /// Share a connection pool with other sessions.
    pub fn pool(mut self, pool: Arc<ConnectionPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Build the session.
    pub fn build(self) -> Result<Session, NetError> {
        let base_url = match &self.config.base_url {
            Some(base) => Some(Url::parse(base).map_err(|_| NetError::InvalidUrl)?),
            None => None,
        };
        let pool = self.pool.unwrap_or_else(|| {
            Arc::new(ConnectionPool::with_max_idle_per_host(self.config.max_idle_per_host))
        });
        Ok(Session::from_parts(self.config, base_url, pool))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_relative() {
        let session = Session::builder().base_url("http://localhost:5984/").build().unwrap();
        assert_eq!(session.resolve_url("db/doc").unwrap().as_str(), "http://localhost:5984/db/doc");
        assert_eq!(
            session.resolve_url("http://other:5984/x").unwrap().as_str(),
            "http://other:5984/x"
        );
    }

    #[test]
    fn test_resolve_rejects_scheme() {
        let session = Session::new();
        assert_eq!(session.resolve_url("ftp://host/x").unwrap_err(), NetError::DisallowedUrlScheme);
        assert_eq!(session.resolve_url("relative/path").unwrap_err(), NetError::InvalidUrl);
    }

    #[test]
    fn test_invalid_base_url() {
        assert_eq!(Session::builder().base_url("::").build().unwrap_err(), NetError::InvalidUrl);
    }

    #[test]
    fn test_default_headers() {
        let session = Session::new();
        let creds = Credentials::new("joe", "secret");
        let mut cached = CacheEntry::default();
        cached.headers.insert(header::ETAG, HeaderValue::from_static("\"1-a\""));

        let headers = session.request_headers(
            &HeaderMap::new(),
            &RequestBody::Json(serde_json::json!({})),
            Some(&creds),
            Some(&cached),
        );
        assert_eq!(headers[header::ACCEPT], "application/json");
        assert_eq!(headers[header::CONTENT_TYPE], "application/json");
        assert_eq!(headers[header::IF_NONE_MATCH], "\"1-a\"");
        assert!(headers[header::AUTHORIZATION].to_str().unwrap().starts_with("Basic "));
        assert!(headers[header::USER_AGENT].to_str().unwrap().starts_with("couchnet/"));
    }

    #[test]
    fn test_permanent_redirects_bounded() {
        let mut session = Session::new();
        for i in 0..300 {
            session
                .perm_redirects
                .put(format!("http://h/old/{i}"), format!("http://h/new/{i}"));
        }
        assert_eq!(session.perm_redirects.len(), MAX_REMEMBERED_REDIRECTS.get());
        assert!(session.perm_redirects.contains("http://h/old/299"));
        assert!(!session.perm_redirects.contains("http://h/old/0"));
    }

    #[test]
    fn test_caller_headers_win() {
        let session = Session::new();
        let mut caller = HeaderMap::new();
        caller.insert(header::ACCEPT, HeaderValue::from_static("text/plain"));

        let headers = session.request_headers(&caller, &RequestBody::Empty, None, None);
        assert_eq!(headers[header::ACCEPT], "text/plain");
        assert!(!headers.contains_key(header::AUTHORIZATION));
    }
}
