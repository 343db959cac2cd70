//! HTTP/1.1 chunked transfer-encoding decoder.
//!
//! Chromium mapping: net/http/http_chunked_decoder.h
//!
//! Wire format (RFC 9112 Section 7.1):
//!
//! ```text
//! chunked-body = *chunk last-chunk trailer-section CRLF
//! chunk        = chunk-size [ chunk-ext ] CRLF chunk-data CRLF
//! last-chunk   = 1*("0") [ chunk-ext ] CRLF
//! ```
//!
//! The decoder is an explicit state machine driven against any
//! [`AsyncBufRead`]. It yields one payload per wire chunk and, once the
//! terminal chunk (or an error) has been seen, stays in
//! [`DecoderState::Finished`] and yields nothing more.

use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tracing::{trace, warn};

/// Longest accepted size or trailer line, terminator included.
const MAX_LINE_LENGTH: u64 = 4096;

/// Upper bound on the up-front allocation for a single chunk.
const MAX_PREALLOC: usize = 64 * 1024;

/// Decoder progress through a chunked body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    /// Expecting a `<hex-size>[;ext]` line.
    SizeLine,
    /// Expecting `remaining` payload bytes followed by a line terminator.
    Data { remaining: usize },
    /// After the zero-size chunk: discarding trailer fields up to the blank line.
    Trailer,
    /// Terminal chunk consumed, or decoding failed.
    Finished,
}

#[derive(Debug)]
pub struct ChunkedDecoder {
    state: DecoderState,
    line: Vec<u8>,
    chunks: usize,
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::SizeLine,
            line: Vec::new(),
            chunks: 0,
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.state == DecoderState::Finished
    }

    /// Number of payload chunks emitted so far.
    pub fn chunks_decoded(&self) -> usize {
        self.chunks
    }

    /// Decode the next chunk from `reader`.
    ///
    /// Returns `Ok(None)` once the body is complete. Errors are terminal: the
    /// decoder moves to `Finished` and later calls return `Ok(None)`.
    pub async fn next_chunk<R>(&mut self, reader: &mut R) -> Result<Option<Bytes>, NetError>
    where
        R: AsyncBufRead + Unpin,
    {
        let result = self.advance(reader).await;
        if result.is_err() {
            self.state = DecoderState::Finished;
        }
        result
    }

    async fn advance<R>(&mut self, reader: &mut R) -> Result<Option<Bytes>, NetError>
    where
        R: AsyncBufRead + Unpin,
    {
        loop {
            match self.state {
                DecoderState::Finished => return Ok(None),
                DecoderState::SizeLine => {
                    if !self.read_line(reader).await? {
                        // Peer closed the connection at a chunk boundary.
                        warn!(chunks = self.chunks, "chunked body ended without terminal chunk");
                        self.state = DecoderState::Finished;
                        return Ok(None);
                    }
                    let size = parse_chunk_size(&self.line)?;
                    self.state = if size == 0 {
                        DecoderState::Trailer
                    } else {
                        DecoderState::Data { remaining: size }
                    };
                }
                DecoderState::Data { remaining } => {
                    let payload = read_payload(reader, remaining).await?;
                    self.chunks += 1;

                    if !self.read_line(reader).await? {
                        // Peer closed right after the payload.
                        warn!(chunks = self.chunks, "chunked body ended without terminal chunk");
                        self.state = DecoderState::Finished;
                        return Ok(Some(payload));
                    }
                    if !self.line.is_empty() {
                        return Err(NetError::InvalidChunkedEncoding);
                    }

                    self.state = DecoderState::SizeLine;
                    return Ok(Some(payload));
                }
                DecoderState::Trailer => {
                    if !self.read_line(reader).await? || self.line.is_empty() {
                        self.state = DecoderState::Finished;
                        return Ok(None);
                    }
                    trace!(
                        trailer = %String::from_utf8_lossy(&self.line),
                        "discarding chunked trailer"
                    );
                }
            }
        }
    }

    /// Read one line into `self.line` without its terminator.
    /// Returns `false` on EOF before any byte was read.
    async fn read_line<R>(&mut self, reader: &mut R) -> Result<bool, NetError>
    where
        R: AsyncBufRead + Unpin,
    {
        self.line.clear();
        let n = (&mut *reader)
            .take(MAX_LINE_LENGTH)
            .read_until(b'\n', &mut self.line)
            .await
            .net_context()?;

        if n == 0 {
            return Ok(false);
        }
        if self.line.last() != Some(&b'\n') {
            return Err(if n as u64 >= MAX_LINE_LENGTH {
                NetError::InvalidChunkedEncoding
            } else {
                NetError::IncompleteChunkedEncoding
            });
        }

        self.line.pop();
        if self.line.last() == Some(&b'\r') {
            self.line.pop();
        }
        Ok(true)
    }
}

/// Parse `<hex-size>[;chunk-ext]`.
fn parse_chunk_size(line: &[u8]) -> Result<usize, NetError> {
    let digits = line
        .split(|&b| b == b';')
        .next()
        .unwrap_or_default()
        .trim_ascii();

    if digits.is_empty() || !digits.iter().all(u8::is_ascii_hexdigit) {
        return Err(NetError::InvalidChunkedEncoding);
    }

    let digits = std::str::from_utf8(digits).map_err(|_| NetError::InvalidChunkedEncoding)?;
    usize::from_str_radix(digits, 16).map_err(|_| NetError::InvalidChunkedEncoding)
}

async fn read_payload<R>(reader: &mut R, size: usize) -> Result<Bytes, NetError>
where
    R: AsyncBufRead + Unpin,
{
    let mut payload = BytesMut::with_capacity(size.min(MAX_PREALLOC));

    while payload.len() < size {
        let taken = {
            let available = reader.fill_buf().await.net_context()?;
            if available.is_empty() {
                return Err(NetError::IncompleteChunkedEncoding);
            }
            let take = available.len().min(size - payload.len());
            payload.extend_from_slice(&available[..take]);
            take
        };
        reader.consume(taken);
    }

    Ok(payload.freeze())
}
