//! Response body streaming.
//! Mirrors Chromium's HttpStream::ReadResponseBody.
//!
//! A [`ResponseBody`] owns the connection it reads from until the body is
//! exhausted or closed, then hands it to a one-shot release callback. The
//! callback is taken out of its `Option` on first use, so it fires once no
//! matter how many reads, closes, or drops follow.

use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use crate::http::chunked::ChunkedDecoder;
use crate::socket::client::Connection;
use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, StreamExt};
use std::fmt;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Read size used when draining a body of unknown length.
const DRAIN_CHUNK_SIZE: usize = 16 * 1024;

/// Upper bound on the buffer reserved up front from `Content-Length`.
const MAX_PREALLOCATE: usize = 4 * DRAIN_CHUNK_SIZE;

/// How the end of a response body is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// No body (HEAD, 1xx, 204, 304).
    Empty,
    /// `Content-Length` bytes.
    Length(u64),
    /// `Transfer-Encoding: chunked`.
    Chunked,
    /// Everything until the peer closes the connection.
    UntilClose,
}

impl Framing {
    /// Whether the connection is positioned at the next response once the
    /// body has been read to its end.
    pub fn allows_reuse(&self) -> bool {
        !matches!(self, Framing::UntilClose)
    }
}

/// What happens to the connection when a body is released.
pub enum Release<S> {
    /// Body read to its end; the stream sits at a message boundary.
    Reusable(S),
    /// Closed early, failed, or unframed; the connection must not carry
    /// another request.
    Discard,
}

impl<S> fmt::Debug for Release<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Release::Reusable(_) => f.write_str("Reusable"),
            Release::Discard => f.write_str("Discard"),
        }
    }
}

pub type ReleaseCallback<S> = Box<dyn FnOnce(Release<S>) + Send>;

/// Response body wrapper for streaming.
pub struct ResponseBody<S = Connection> {
    stream: Option<S>,
    framing: Framing,
    /// Bytes left for `Framing::Length`.
    remaining: u64,
    decoder: ChunkedDecoder,
    /// Decoded bytes not yet handed out.
    pending: Bytes,
    release: Option<ReleaseCallback<S>>,
    closed: bool,
}

impl<S> fmt::Debug for ResponseBody<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBody")
            .field("framing", &self.framing)
            .field("remaining", &self.remaining)
            .field("pending", &self.pending.len())
            .field("closed", &self.closed)
            .finish()
    }
}

impl<S> ResponseBody<S> {
    /// Wrap a live stream positioned at the start of the body.
    ///
    /// Empty bodies release the stream as reusable right away.
    pub fn new(stream: S, framing: Framing, release: ReleaseCallback<S>) -> Self {
        let remaining = match framing {
            Framing::Length(len) => len,
            _ => 0,
        };
        let mut body = Self {
            stream: Some(stream),
            framing,
            remaining,
            decoder: ChunkedDecoder::new(),
            pending: Bytes::new(),
            release: Some(release),
            closed: false,
        };
        if matches!(framing, Framing::Empty | Framing::Length(0)) {
            body.finish(true);
        }
        body
    }

    /// A body that was read ahead of time (small bodies, cache hits).
    pub fn buffered(bytes: Bytes) -> Self {
        Self {
            stream: None,
            framing: Framing::Length(bytes.len() as u64),
            remaining: 0,
            decoder: ChunkedDecoder::new(),
            pending: bytes,
            release: None,
            closed: true,
        }
    }

    pub fn empty() -> Self {
        Self::buffered(Bytes::new())
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn is_chunked(&self) -> bool {
        self.framing == Framing::Chunked
    }

    /// True once the connection has been released. Bytes already decoded may
    /// still be readable.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// True when nothing more can be read.
    pub fn is_exhausted(&self) -> bool {
        self.closed && self.pending.is_empty()
    }

    /// Release the connection without reading the rest of the body.
    ///
    /// Idempotent and infallible. A body closed before its end discards the
    /// connection.
    pub fn close(&mut self) {
        self.pending = Bytes::new();
        if !self.closed {
            tracing::trace!(framing = ?self.framing, "response body closed early");
            self.finish(false);
        }
    }

    fn finish(&mut self, reusable: bool) {
        self.closed = true;
        let stream = self.stream.take();
        if let Some(release) = self.release.take() {
            let outcome = match stream {
                Some(s) if reusable && self.framing.allows_reuse() => Release::Reusable(s),
                _ => Release::Discard,
            };
            release(outcome);
        }
    }
}

impl<S> ResponseBody<S>
where
    S: AsyncBufRead + Unpin + Send,
{
    /// Read up to `limit` bytes, or the rest of the body when `None`.
    ///
    /// The read that reaches the end of the body releases the connection
    /// before returning. Reads after that return empty bytes.
    pub async fn read(&mut self, limit: Option<usize>) -> Result<Bytes, NetError> {
        match limit {
            Some(limit) => self.read_some(limit).await,
            None => self.read_to_end().await,
        }
    }

    /// Read the remaining body into one buffer.
    pub async fn bytes(mut self) -> Result<Bytes, NetError> {
        self.read(None).await
    }

    /// Read body as UTF-8 string.
    pub async fn text(self) -> Result<String, NetError> {
        let bytes = self.bytes().await?;
        String::from_utf8(bytes.to_vec()).map_err(|_| NetError::InvalidUtf8)
    }

    /// Read body as JSON, deserializing to type T.
    pub async fn json<T: serde::de::DeserializeOwned>(self) -> Result<T, NetError> {
        let bytes = self.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|_| NetError::JsonParseError)
    }

    /// Iterate the body one wire chunk at a time.
    ///
    /// Bytes already decoded by an earlier partial `read` come first. The
    /// stream ends after the terminal chunk, at which point the connection
    /// is released. Iterating an exhausted body yields nothing.
    pub fn iter_chunks(&mut self) -> Result<BoxStream<'_, Result<Bytes, NetError>>, NetError> {
        if !self.is_chunked() {
            return Err(NetError::BodyNotChunked);
        }

        Ok(stream::unfold(self, |body| async move {
            if !body.pending.is_empty() {
                let chunk = std::mem::take(&mut body.pending);
                return Some((Ok(chunk), body));
            }
            match body.next_decoded_chunk().await {
                Ok(Some(chunk)) => Some((Ok(chunk), body)),
                Ok(None) => None,
                Err(e) => Some((Err(e), body)),
            }
        })
        .boxed())
    }

    async fn read_to_end(&mut self) -> Result<Bytes, NetError> {
        // Common case: a single decoded piece.
        let first = self.read_some(usize::MAX).await?;
        if self.is_exhausted() || first.is_empty() {
            return Ok(first);
        }

        // The declared length is only a hint; the peer may lie about it.
        let hint = match self.framing {
            Framing::Length(_) => usize::try_from(self.remaining.min(MAX_PREALLOCATE as u64))
                .unwrap_or(MAX_PREALLOCATE),
            _ => DRAIN_CHUNK_SIZE,
        };
        let mut buf = BytesMut::with_capacity(first.len().saturating_add(hint));
        buf.extend_from_slice(&first);
        loop {
            let next = self.read_some(usize::MAX).await?;
            if next.is_empty() {
                break;
            }
            buf.extend_from_slice(&next);
        }
        Ok(buf.freeze())
    }

    async fn read_some(&mut self, limit: usize) -> Result<Bytes, NetError> {
        if limit == 0 {
            return Ok(Bytes::new());
        }
        if !self.pending.is_empty() {
            let n = limit.min(self.pending.len());
            return Ok(self.pending.split_to(n));
        }
        if self.closed {
            return Ok(Bytes::new());
        }

        let result = self.fill(limit).await;
        if result.is_err() {
            self.finish(false);
        }
        result
    }

    /// Pull the next piece from the wire. Called only while open with no
    /// pending bytes.
    async fn fill(&mut self, limit: usize) -> Result<Bytes, NetError> {
        match self.framing {
            Framing::Empty => {
                self.finish(true);
                Ok(Bytes::new())
            }
            Framing::Length(total) => {
                let want = limit.min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
                let data = self.read_raw(want).await?;
                if data.is_empty() {
                    tracing::debug!(
                        expected = total,
                        missing = self.remaining,
                        "connection closed before end of body"
                    );
                    return Err(NetError::ContentLengthMismatch);
                }
                self.remaining -= data.len() as u64;
                if self.remaining == 0 {
                    self.finish(true);
                }
                Ok(data)
            }
            Framing::Chunked => match self.next_decoded_chunk().await? {
                Some(mut chunk) => {
                    if chunk.len() > limit {
                        self.pending = chunk.split_off(limit);
                    }
                    Ok(chunk)
                }
                None => Ok(Bytes::new()),
            },
            Framing::UntilClose => {
                let data = self.read_raw(limit).await?;
                if data.is_empty() {
                    self.finish(false);
                }
                Ok(data)
            }
        }
    }

    /// Copy up to `limit` bytes out of the stream's buffer. Empty on EOF.
    async fn read_raw(&mut self, limit: usize) -> Result<Bytes, NetError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(Bytes::new());
        };
        let available = stream.fill_buf().await.net_context()?;
        let n = limit.min(available.len());
        let data = Bytes::copy_from_slice(&available[..n]);
        stream.consume(n);
        Ok(data)
    }

    async fn next_decoded_chunk(&mut self) -> Result<Option<Bytes>, NetError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(None);
        };
        match self.decoder.next_chunk(stream).await {
            Ok(Some(chunk)) => Ok(Some(chunk)),
            Ok(None) => {
                self.finish(true);
                Ok(None)
            }
            Err(e) => {
                tracing::debug!(
                    error = %e,
                    chunks = self.decoder.chunks_decoded(),
                    "chunked body failed"
                );
                self.finish(false);
                Err(e)
            }
        }
    }
}

impl<S> Drop for ResponseBody<S> {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    type Wire = &'static [u8];

    #[derive(Default, Clone)]
    struct ReleaseCounter {
        calls: Arc<AtomicUsize>,
        reused: Arc<Mutex<Option<Wire>>>,
    }

    impl ReleaseCounter {
        fn callback(&self) -> ReleaseCallback<Wire> {
            let calls = Arc::clone(&self.calls);
            let reused = Arc::clone(&self.reused);
            Box::new(move |release| {
                calls.fetch_add(1, Ordering::SeqCst);
                if let Release::Reusable(rest) = release {
                    *reused.lock().unwrap() = Some(rest);
                }
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn reused(&self) -> Option<Wire> {
            *self.reused.lock().unwrap()
        }
    }

    fn body(wire: Wire, framing: Framing, release: &ReleaseCounter) -> ResponseBody<Wire> {
        ResponseBody::new(wire, framing, release.callback())
    }

    #[tokio::test]
    async fn test_release_once_on_exhaustion() {
        let release = ReleaseCounter::default();
        let mut body = body(b"foobar", Framing::Length(6), &release);

        let data = body.read(Some(10)).await.unwrap();
        assert_eq!(&data[..], b"foobar");
        assert_eq!(release.calls(), 1);

        for _ in 0..3 {
            assert!(body.read(None).await.unwrap().is_empty());
            assert!(body.read(Some(4)).await.unwrap().is_empty());
        }
        body.close();
        drop(body);
        assert_eq!(release.calls(), 1);
    }

    #[tokio::test]
    async fn test_partial_reads_release_at_end() {
        let release = ReleaseCounter::default();
        let mut body = body(b"foobarNEXT", Framing::Length(6), &release);

        assert_eq!(&body.read(Some(4)).await.unwrap()[..], b"foob");
        assert_eq!(release.calls(), 0);
        assert_eq!(&body.read(Some(4)).await.unwrap()[..], b"ar");
        assert_eq!(release.calls(), 1);
        // The stream comes back positioned at the next message.
        assert_eq!(release.reused(), Some(&b"NEXT"[..]));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let release = ReleaseCounter::default();
        let mut body = body(b"foobar", Framing::Length(6), &release);

        body.close();
        body.close();
        assert!(body.is_closed());
        assert!(body.read(None).await.unwrap().is_empty());
        drop(body);

        assert_eq!(release.calls(), 1);
        // Closed before the end: not reusable.
        assert_eq!(release.reused(), None);
    }

    #[tokio::test]
    async fn test_drop_releases() {
        let release = ReleaseCounter::default();
        drop(body(b"foobar", Framing::Length(6), &release));
        assert_eq!(release.calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_body_released_immediately() {
        let release = ReleaseCounter::default();
        let mut body = body(b"", Framing::Empty, &release);
        assert!(body.is_closed());
        assert_eq!(release.calls(), 1);
        assert!(release.reused().is_some());

        assert!(body.read(None).await.unwrap().is_empty());
        drop(body);
        assert_eq!(release.calls(), 1);
    }

    #[tokio::test]
    async fn test_short_body_is_mismatch() {
        let release = ReleaseCounter::default();
        let mut body = body(b"foo", Framing::Length(6), &release);

        let err = body.read(None).await.unwrap_err();
        assert_eq!(err, NetError::ContentLengthMismatch);
        assert!(body.is_closed());
        assert_eq!(release.calls(), 1);
        assert_eq!(release.reused(), None);
    }

    #[tokio::test]
    async fn test_huge_declared_length_does_not_preallocate() {
        let release = ReleaseCounter::default();
        let mut body = body(b"partial body bytes", Framing::Length(1 << 62), &release);

        let err = body.read(None).await.unwrap_err();
        assert_eq!(err, NetError::ContentLengthMismatch);
        assert!(body.is_closed());
        assert_eq!(release.reused(), None);
    }

    #[tokio::test]
    async fn test_until_close_never_reused() {
        let release = ReleaseCounter::default();
        let mut body = body(b"all of it", Framing::UntilClose, &release);

        assert_eq!(&body.read(None).await.unwrap()[..], b"all of it");
        assert_eq!(release.calls(), 1);
        assert_eq!(release.reused(), None);
    }

    #[tokio::test]
    async fn test_iter_chunks_single_pass() {
        let release = ReleaseCounter::default();
        let wire = b"3\r\nfoo\r\n3\r\nbar\r\n3\r\nbaz\r\n0\r\n\r\n";
        let mut body = body(wire, Framing::Chunked, &release);

        let first: Vec<Bytes> = body.iter_chunks().unwrap().try_collect().await.unwrap();
        assert_eq!(first, vec![Bytes::from("foo"), Bytes::from("bar"), Bytes::from("baz")]);
        assert_eq!(release.calls(), 1);

        let second: Vec<Bytes> = body.iter_chunks().unwrap().try_collect().await.unwrap();
        assert!(second.is_empty());
        assert_eq!(release.calls(), 1);
    }

    #[tokio::test]
    async fn test_partial_read_then_iter_chunks() {
        let release = ReleaseCounter::default();
        let mut body = body(b"6\r\nfoobar\r\n3\r\nbaz\r\n0\r\n\r\n", Framing::Chunked, &release);

        assert_eq!(&body.read(Some(2)).await.unwrap()[..], b"fo");
        let rest: Vec<Bytes> = body.iter_chunks().unwrap().try_collect().await.unwrap();
        assert_eq!(rest, vec![Bytes::from("obar"), Bytes::from("baz")]);
        assert_eq!(release.calls(), 1);
        assert_eq!(release.reused(), Some(&b""[..]));
    }

    #[tokio::test]
    async fn test_chunked_read_to_end() {
        let release = ReleaseCounter::default();
        let mut body = body(b"3\r\nfoo\r\n3\r\nbar\r\n0\r\n\r\n", Framing::Chunked, &release);

        assert_eq!(&body.read(None).await.unwrap()[..], b"foobar");
        assert_eq!(release.calls(), 1);
        assert!(body.read(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chunked_error_discards() {
        let release = ReleaseCounter::default();
        let mut body = body(b"3\r\nfoo\r\nzz\r\n", Framing::Chunked, &release);

        let items: Vec<_> = body.iter_chunks().unwrap().collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], Ok(Bytes::from("foo")));
        assert_eq!(items[1], Err(NetError::InvalidChunkedEncoding));
        assert_eq!(release.calls(), 1);
        assert_eq!(release.reused(), None);
    }

    #[tokio::test]
    async fn test_not_chunked() {
        let release = ReleaseCounter::default();
        let mut body = body(b"foobar", Framing::Length(6), &release);
        assert!(matches!(body.iter_chunks(), Err(NetError::BodyNotChunked)));
    }

    #[tokio::test]
    async fn test_buffered_body() {
        let mut body: ResponseBody<Wire> = ResponseBody::buffered(Bytes::from("cached"));
        assert!(body.is_closed());
        assert!(!body.is_exhausted());
        assert_eq!(&body.read(Some(3)).await.unwrap()[..], b"cac");
        assert_eq!(&body.read(None).await.unwrap()[..], b"hed");
        assert!(body.is_exhausted());
    }

    #[tokio::test]
    async fn test_json_body() {
        let release = ReleaseCounter::default();
        let body = body(br#"{"ok":true}"#, Framing::Length(11), &release);
        let value: serde_json::Value = body.json().await.unwrap();
        assert_eq!(value["ok"], serde_json::Value::Bool(true));
        assert_eq!(release.calls(), 1);
    }

    #[tokio::test]
    async fn test_invalid_utf8() {
        let release = ReleaseCounter::default();
        let body = body(b"\xff\xfe", Framing::Length(2), &release);
        assert_eq!(body.text().await.unwrap_err(), NetError::InvalidUtf8);
    }
}
