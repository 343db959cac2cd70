//! HTTP Response with body access.

use crate::base::neterror::NetError;
use crate::http::responsebody::ResponseBody;
use bytes::Bytes;
use http::{HeaderMap, StatusCode, Version};
use url::Url;

/// HTTP Response with accessible body.
/// This is the user-facing response type that owns the body.
#[derive(Debug)]
pub struct HttpResponse {
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    url: Url,
    from_cache: bool,
    body: ResponseBody,
}

impl HttpResponse {
    pub fn new(
        status: StatusCode,
        version: Version,
        headers: HeaderMap,
        url: Url,
        body: ResponseBody,
    ) -> Self {
        Self { status, version, headers, url, from_cache: false, body }
    }

    /// Mark the response as synthesized from a revalidated cache entry.
    pub(crate) fn with_from_cache(mut self, from_cache: bool) -> Self {
        self.from_cache = from_cache;
        self
    }

    /// Get the status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Get the HTTP version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Get a reference to the headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The URL that produced this response, after redirects.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// True when the body came from the cache after a `304 Not Modified`.
    pub fn from_cache(&self) -> bool {
        self.from_cache
    }

    pub fn body_mut(&mut self) -> &mut ResponseBody {
        &mut self.body
    }

    /// Split into `(status, headers, body)`.
    pub fn into_parts(self) -> (StatusCode, HeaderMap, ResponseBody) {
        (self.status, self.headers, self.body)
    }

    /// Convenience method to consume body as bytes.
    pub async fn bytes(self) -> Result<Bytes, NetError> {
        self.body.bytes().await
    }

    /// Convenience method to consume body as text.
    pub async fn text(self) -> Result<String, NetError> {
        self.body.text().await
    }

    /// Convenience method to consume body as JSON.
    pub async fn json<T: serde::de::DeserializeOwned>(self) -> Result<T, NetError> {
        self.body.json().await
    }
}
