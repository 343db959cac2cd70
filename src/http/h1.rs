//! HTTP/1.1 message framing over a raw connection.
//!
//! Requests are written in origin-form with explicit body framing; response
//! heads are read line by line and parsed with `httparse`, leaving the
//! connection positioned at the first body byte so that
//! [`ResponseBody`](crate::http::responsebody::ResponseBody) can take over.

use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use crate::http::requestbody::RequestBody;
use crate::http::responsebody::Framing;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Method, StatusCode, Version};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use url::Url;

/// Limit on the size of a response head.
pub const MAX_HEADERS_SIZE: usize = 64 * 1024;

/// Limit on the number of response header fields.
pub const MAX_HEADERS_COUNT: usize = 100;

/// Chunk size for streamed uploads.
pub const UPLOAD_CHUNK_SIZE: usize = 8192;

/// Interim (1xx) responses skipped before the final head.
pub const MAX_INTERIM_RESPONSES: usize = 16;

/// Status line and headers of a response.
#[derive(Debug, Clone)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub version: Version,
    pub headers: HeaderMap,
}

impl ResponseHead {
    /// Decide how the body that follows this head is delimited.
    pub fn framing(&self, method: &Method) -> Result<Framing, NetError> {
        if *method == Method::HEAD
            || self.status.is_informational()
            || self.status == StatusCode::NO_CONTENT
            || self.status == StatusCode::NOT_MODIFIED
        {
            return Ok(Framing::Empty);
        }

        // Transfer-Encoding overrides Content-Length.
        if let Some(te) = self.header_str(&header::TRANSFER_ENCODING) {
            let chunked = te
                .split(',')
                .next_back()
                .is_some_and(|coding| coding.trim().eq_ignore_ascii_case("chunked"));
            return Ok(if chunked { Framing::Chunked } else { Framing::UntilClose });
        }

        match self.content_length()? {
            Some(0) => Ok(Framing::Empty),
            Some(len) => Ok(Framing::Length(len)),
            None => Ok(Framing::UntilClose),
        }
    }

    /// `Content-Length`, requiring every occurrence to agree.
    pub fn content_length(&self) -> Result<Option<u64>, NetError> {
        let mut length = None;
        for value in self.headers.get_all(header::CONTENT_LENGTH) {
            let value = value.to_str().map_err(|_| NetError::InvalidHttpResponse)?;
            for part in value.split(',') {
                let parsed: u64 = part.trim().parse().map_err(|_| NetError::InvalidHttpResponse)?;
                match length {
                    Some(existing) if existing != parsed => {
                        return Err(NetError::ResponseHeadersMultipleContentLength);
                    }
                    _ => length = Some(parsed),
                }
            }
        }
        Ok(length)
    }

    /// Whether the server lets the connection carry another request.
    pub fn keep_alive(&self) -> bool {
        let has_token = |token: &str| {
            self.headers.get_all(header::CONNECTION).iter().any(|value| {
                value
                    .to_str()
                    .map(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
                    .unwrap_or(false)
            })
        };

        if has_token("close") {
            return false;
        }
        match self.version {
            Version::HTTP_10 | Version::HTTP_09 => has_token("keep-alive"),
            _ => true,
        }
    }

    pub fn is_json(&self) -> bool {
        self.header_str(&header::CONTENT_TYPE)
            .is_some_and(|ct| ct.trim_start().to_ascii_lowercase().starts_with("application/json"))
    }

    fn header_str(&self, name: &HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Write a request line, headers and body.
///
/// `Host` and the body framing headers are added unless the caller supplied
/// them. Stream bodies are sent chunked.
pub async fn write_request<W>(
    writer: &mut W,
    method: &Method,
    url: &Url,
    headers: &HeaderMap,
    body: RequestBody,
) -> Result<(), NetError>
where
    W: AsyncWrite + Unpin,
{
    let payload = body.to_bytes();
    let mut head = Vec::with_capacity(512);

    // Request line: METHOD origin-form HTTP/1.1
    head.extend_from_slice(method.as_str().as_bytes());
    head.push(b' ');
    head.extend_from_slice(url.path().as_bytes());
    if let Some(query) = url.query() {
        head.push(b'?');
        head.extend_from_slice(query.as_bytes());
    }
    head.extend_from_slice(b" HTTP/1.1\r\n");

    if !headers.contains_key(header::HOST) {
        let host = url.host_str().ok_or(NetError::InvalidUrl)?;
        head.extend_from_slice(b"Host: ");
        head.extend_from_slice(host.as_bytes());
        if let Some(port) = url.port() {
            head.extend_from_slice(format!(":{}", port).as_bytes());
        }
        head.extend_from_slice(b"\r\n");
    }

    for (name, value) in headers {
        if name == header::CONTENT_LENGTH || name == header::TRANSFER_ENCODING {
            continue;
        }
        head.extend_from_slice(name.as_str().as_bytes());
        head.extend_from_slice(b": ");
        head.extend_from_slice(value.as_bytes());
        head.extend_from_slice(b"\r\n");
    }

    match &payload {
        Some(bytes) if bytes.is_empty() && !method_expects_body(method) => {}
        Some(bytes) => {
            head.extend_from_slice(format!("Content-Length: {}\r\n", bytes.len()).as_bytes());
        }
        None => head.extend_from_slice(b"Transfer-Encoding: chunked\r\n"),
    }
    head.extend_from_slice(b"\r\n");

    match (payload, body) {
        (Some(bytes), _) => {
            head.extend_from_slice(&bytes);
            writer.write_all(&head).await.net_context()?;
        }
        (None, RequestBody::Stream(mut reader)) => {
            writer.write_all(&head).await.net_context()?;
            let mut buf = vec![0u8; UPLOAD_CHUNK_SIZE];
            loop {
                let n = reader.read(&mut buf).await.net_context()?;
                if n == 0 {
                    break;
                }
                writer.write_all(format!("{:x}\r\n", n).as_bytes()).await.net_context()?;
                writer.write_all(&buf[..n]).await.net_context()?;
                writer.write_all(b"\r\n").await.net_context()?;
            }
            writer.write_all(b"0\r\n\r\n").await.net_context()?;
        }
        (None, _) => {
            writer.write_all(&head).await.net_context()?;
        }
    }

    writer.flush().await.net_context()
}

/// Methods where an empty body is still announced with `Content-Length: 0`.
fn method_expects_body(method: &Method) -> bool {
    *method == Method::POST || *method == Method::PUT || *method == Method::PATCH
}

/// Read the next final response head, skipping interim 1xx responses.
pub async fn read_response_head<R>(reader: &mut R) -> Result<ResponseHead, NetError>
where
    R: AsyncBufRead + Unpin,
{
    let mut interim = 0;
    loop {
        let raw = read_head_bytes(reader, interim == 0).await?;
        let head = parse_head(&raw)?;

        if head.status.is_informational() && head.status != StatusCode::SWITCHING_PROTOCOLS {
            interim += 1;
            if interim > MAX_INTERIM_RESPONSES {
                tracing::debug!(count = interim, "too many interim responses");
                return Err(NetError::InvalidHttpResponse);
            }
            tracing::trace!(status = head.status.as_u16(), "skipping interim response");
            continue;
        }
        return Ok(head);
    }
}

/// Read raw head bytes up to and including the blank line.
async fn read_head_bytes<R>(reader: &mut R, first: bool) -> Result<Vec<u8>, NetError>
where
    R: AsyncBufRead + Unpin,
{
    let mut raw = Vec::with_capacity(1024);
    loop {
        let budget = (MAX_HEADERS_SIZE + 1).saturating_sub(raw.len()) as u64;
        let start = raw.len();
        let n = (&mut *reader).take(budget).read_until(b'\n', &mut raw).await.net_context()?;

        if n == 0 {
            return Err(if raw.is_empty() && first {
                NetError::EmptyResponse
            } else {
                NetError::InvalidHttpResponse
            });
        }
        if raw.len() > MAX_HEADERS_SIZE {
            return Err(NetError::ResponseHeadersTooBig);
        }
        if raw[start..].last() != Some(&b'\n') {
            return Err(NetError::InvalidHttpResponse);
        }

        let line = &raw[start..];
        if line == b"\r\n" || line == b"\n" {
            if start == 0 {
                // Stray blank line before the status line.
                raw.clear();
                continue;
            }
            return Ok(raw);
        }
    }
}

fn parse_head(raw: &[u8]) -> Result<ResponseHead, NetError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS_COUNT];
    let mut response = httparse::Response::new(&mut headers);

    match response.parse(raw) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => return Err(NetError::InvalidHttpResponse),
        Err(httparse::Error::TooManyHeaders) => return Err(NetError::ResponseHeadersTooBig),
        Err(e) => {
            tracing::debug!(error = %e, "malformed response head");
            return Err(NetError::InvalidHttpResponse);
        }
    }

    let code = response.code.ok_or(NetError::InvalidHttpResponse)?;
    let status = StatusCode::from_u16(code).map_err(|_| NetError::InvalidHttpResponse)?;
    let version = match response.version {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    };

    let mut map = HeaderMap::with_capacity(response.headers.len());
    for h in response.headers.iter() {
        let name =
            HeaderName::from_bytes(h.name.as_bytes()).map_err(|_| NetError::InvalidHttpResponse)?;
        let value = HeaderValue::from_bytes(h.value).map_err(|_| NetError::InvalidHttpResponse)?;
        map.append(name, value);
    }

    Ok(ResponseHead { status, version, headers: map })
}
