//! Path-addressed view of a database server.
//!
//! A [`Resource`] is a URL plus the credentials and headers sent with every
//! request below it. Requests go through a shared [`Session`], so children
//! of one resource reuse its cache and connection pool.

use crate::base::neterror::NetError;
use crate::http::auth::Credentials;
use crate::http::requestbody::RequestBody;
use crate::http::response::HttpResponse;
use crate::session::Session;
use http::header::{HeaderMap, HeaderName, HeaderValue};
use http::Method;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use url::form_urlencoded;
use url::Url;

#[cfg(feature = "json")]
use http::StatusCode;

pub use crate::http::auth::extract_credentials;

/// Characters kept as-is in a path segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

/// Query parameters. `Null` values are skipped, arrays repeat the key.
pub type Query<'a> = &'a [(&'a str, Value)];

#[derive(Clone)]
pub struct Resource {
    url: String,
    credentials: Option<Credentials>,
    headers: HeaderMap,
    session: Arc<Mutex<Session>>,
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("url", &self.url)
            .field("credentials", &self.credentials)
            .finish()
    }
}

impl Resource {
    /// Create a resource for `url`. Userinfo in the URL becomes the
    /// resource's credentials. Without a session a new default one is used.
    pub fn new(url: &str, session: Option<Arc<Mutex<Session>>>) -> Result<Self, NetError> {
        let parsed = Url::parse(url).map_err(|_| NetError::InvalidUrl)?;
        let (stripped, credentials) = extract_credentials(&parsed);
        Ok(Self {
            url: stripped.into(),
            credentials,
            headers: HeaderMap::new(),
            session: session.unwrap_or_else(|| Arc::new(Mutex::new(Session::new()))),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn session(&self) -> &Arc<Mutex<Session>> {
        &self.session
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Add a header sent with every request on this resource and its children.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// A resource below this one. Each segment is quoted on its own.
    pub fn child(&self, segments: &[&str]) -> Self {
        Self {
            url: urljoin(&self.url, segments, &[]),
            credentials: self.credentials.clone(),
            headers: self.headers.clone(),
            session: Arc::clone(&self.session),
        }
    }

    pub async fn get(
        &self,
        path: &[&str],
        headers: HeaderMap,
        query: Query<'_>,
    ) -> Result<HttpResponse, NetError> {
        self.request(Method::GET, path, RequestBody::Empty, headers, query).await
    }

    pub async fn head(
        &self,
        path: &[&str],
        headers: HeaderMap,
        query: Query<'_>,
    ) -> Result<HttpResponse, NetError> {
        self.request(Method::HEAD, path, RequestBody::Empty, headers, query).await
    }

    pub async fn delete(
        &self,
        path: &[&str],
        headers: HeaderMap,
        query: Query<'_>,
    ) -> Result<HttpResponse, NetError> {
        self.request(Method::DELETE, path, RequestBody::Empty, headers, query).await
    }

    pub async fn put(
        &self,
        path: &[&str],
        body: impl Into<RequestBody>,
        headers: HeaderMap,
        query: Query<'_>,
    ) -> Result<HttpResponse, NetError> {
        self.request(Method::PUT, path, body.into(), headers, query).await
    }

    pub async fn post(
        &self,
        path: &[&str],
        body: impl Into<RequestBody>,
        headers: HeaderMap,
        query: Query<'_>,
    ) -> Result<HttpResponse, NetError> {
        self.request(Method::POST, path, body.into(), headers, query).await
    }

    pub async fn request(
        &self,
        method: Method,
        path: &[&str],
        body: RequestBody,
        headers: HeaderMap,
        query: Query<'_>,
    ) -> Result<HttpResponse, NetError> {
        let url = urljoin(&self.url, path, query);
        let mut all_headers = self.headers.clone();
        all_headers.extend(headers);

        let mut session = self.session.lock().await;
        session.request(method, &url, body, all_headers, self.credentials.clone()).await
    }
}

#[cfg(feature = "json")]
impl Resource {
    pub async fn get_json(
        &self,
        path: &[&str],
        headers: HeaderMap,
        query: Query<'_>,
    ) -> Result<(StatusCode, HeaderMap, Value), NetError> {
        self.request_json(Method::GET, path, RequestBody::Empty, headers, query).await
    }

    pub async fn head_json(
        &self,
        path: &[&str],
        headers: HeaderMap,
        query: Query<'_>,
    ) -> Result<(StatusCode, HeaderMap, Value), NetError> {
        self.request_json(Method::HEAD, path, RequestBody::Empty, headers, query).await
    }

    pub async fn delete_json(
        &self,
        path: &[&str],
        headers: HeaderMap,
        query: Query<'_>,
    ) -> Result<(StatusCode, HeaderMap, Value), NetError> {
        self.request_json(Method::DELETE, path, RequestBody::Empty, headers, query).await
    }

    pub async fn put_json(
        &self,
        path: &[&str],
        body: impl Into<RequestBody>,
        headers: HeaderMap,
        query: Query<'_>,
    ) -> Result<(StatusCode, HeaderMap, Value), NetError> {
        self.request_json(Method::PUT, path, body.into(), headers, query).await
    }

    pub async fn post_json(
        &self,
        path: &[&str],
        body: impl Into<RequestBody>,
        headers: HeaderMap,
        query: Query<'_>,
    ) -> Result<(StatusCode, HeaderMap, Value), NetError> {
        self.request_json(Method::POST, path, body.into(), headers, query).await
    }

    /// Like [`Resource::request`], decoding an `application/json` body.
    /// Other bodies come back as a JSON string, or `Null` when empty.
    pub async fn request_json(
        &self,
        method: Method,
        path: &[&str],
        body: RequestBody,
        headers: HeaderMap,
        query: Query<'_>,
    ) -> Result<(StatusCode, HeaderMap, Value), NetError> {
        let (status, headers, body) =
            self.request(method, path, body, headers, query).await?.into_parts();
        let is_json = headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));

        let text = body.text().await?;
        let value = if text.is_empty() {
            Value::Null
        } else if is_json {
            serde_json::from_str(&text).map_err(|_| NetError::JsonParseError)?
        } else {
            Value::String(text)
        };
        Ok((status, headers, value))
    }
}

/// Join path segments and a query onto `base`.
///
/// ```rust,ignore
/// use serde_json::json;
///
/// let url = urljoin("http://localhost:5984/", &["foo/bar"], &[("descending", json!(true))]);
/// assert_eq!(url, "http://localhost:5984/foo%2Fbar?descending=true");
/// ```
pub fn urljoin(base: &str, path: &[&str], query: Query<'_>) -> String {
    let mut url = base.strip_suffix('/').unwrap_or(base).to_string();
    for segment in path {
        url.push('/');
        url.extend(utf8_percent_encode(segment, SEGMENT));
    }

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    let mut has_params = false;
    for (key, value) in query {
        let values: Vec<&Value> = match value {
            Value::Array(items) => items.iter().collect(),
            single => vec![single],
        };
        for v in values {
            if let Some(encoded) = query_value(v) {
                serializer.append_pair(key, &encoded);
                has_params = true;
            }
        }
    }
    if has_params {
        url.push('?');
        url.push_str(&serializer.finish());
    }
    url
}

fn query_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Bool(b) => Some(if *b { "true" } else { "false" }.to_string()),
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
