use http::StatusCode;
use std::fmt;
use thiserror::Error;

/// Broad classification of a [`NetError`], for callers that only need to
/// branch on the failure class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection-level failure (refused, reset, DNS, bad URL, redirects).
    Transport,
    /// A bounded wait was exceeded.
    Timeout,
    /// Malformed status line, headers, or body framing.
    Protocol,
    /// The body could not be consumed the way the caller asked.
    Body,
    /// The server answered with an error status.
    Status,
}

/// `error` / `reason` pair returned by the database in error bodies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorDetail {
    pub error: Option<String>,
    pub reason: Option<String>,
}

impl ErrorDetail {
    /// Parse an error body. JSON bodies contribute their `error` and `reason`
    /// members; anything else becomes the reason verbatim.
    pub fn from_body(body: &[u8], is_json: bool) -> Self {
        if is_json {
            if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
                let field = |name: &str| {
                    value.get(name).map(|v| match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                };
                return Self {
                    error: field("error"),
                    reason: field("reason"),
                };
            }
        }

        let text = String::from_utf8_lossy(body).trim().to_string();
        Self {
            error: None,
            reason: (!text.is_empty()).then_some(text),
        }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.error, &self.reason) {
            (Some(error), Some(reason)) => write!(f, "{}: {}", error, reason),
            (Some(error), None) => f.write_str(error),
            (None, Some(reason)) => f.write_str(reason),
            (None, None) => f.write_str("no details"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum NetError {
    // Connection Errors
    #[error("Connection closed (TCP FIN)")]
    ConnectionClosed,
    #[error("Connection reset (TCP RST)")]
    ConnectionReset,
    #[error("Connection refused")]
    ConnectionRefused,
    #[error("Connection aborted")]
    ConnectionAborted,
    #[error("Connection failed")]
    ConnectionFailed,
    #[error("Connection to {host}:{port} failed: {reason}")]
    ConnectionFailedTo {
        host: String,
        port: u16,
        reason: String,
    },
    #[error("Name not resolved")]
    NameNotResolved,
    #[error("Could not resolve {domain}: {reason}")]
    NameNotResolvedFor { domain: String, reason: String },
    #[error("Socket not connected")]
    SocketNotConnected,
    #[error("SSL protocol error")]
    SslProtocolError,

    // Timeouts
    #[error("Operation timed out")]
    TimedOut,
    #[error("Connection timed out")]
    ConnectionTimedOut,

    // URL / redirect Errors
    #[error("Invalid URL")]
    InvalidUrl,
    #[error("Disallowed URL scheme")]
    DisallowedUrlScheme,
    #[error("Invalid redirect")]
    InvalidRedirect,
    #[error("Too many redirects")]
    TooManyRedirects,

    // Framing Errors
    #[error("Invalid HTTP response")]
    InvalidHttpResponse,
    #[error("Empty response")]
    EmptyResponse,
    #[error("Response headers too big")]
    ResponseHeadersTooBig,
    #[error("Response headers multiple Content-Length")]
    ResponseHeadersMultipleContentLength,
    #[error("Content-Length mismatch")]
    ContentLengthMismatch,
    #[error("Invalid chunked encoding")]
    InvalidChunkedEncoding,
    #[error("Incomplete chunked encoding")]
    IncompleteChunkedEncoding,

    // Body consumption
    #[error("Response body is not chunked")]
    BodyNotChunked,
    #[error("Response body is not valid UTF-8")]
    InvalidUtf8,
    #[error("Response body is not valid JSON")]
    JsonParseError,

    // Status-derived Errors
    #[error("Unauthorized: {0}")]
    Unauthorized(ErrorDetail),
    #[error("Resource not found: {0}")]
    ResourceNotFound(ErrorDetail),
    #[error("Resource conflict: {0}")]
    ResourceConflict(ErrorDetail),
    #[error("Precondition failed: {0}")]
    PreconditionFailed(ErrorDetail),
    #[error("Requested range not satisfiable: {0}")]
    RequestedRangeNotSatisfiable(ErrorDetail),
    #[error("Server error {status}: {detail}")]
    ServerError {
        status: StatusCode,
        detail: ErrorDetail,
    },

    #[error("Unknown error: {0}")]
    Unknown(i32),
}

impl NetError {
    /// Map an error status to its typed variant. Callers only pass codes >= 400.
    pub fn from_status(status: StatusCode, detail: ErrorDetail) -> Self {
        match status {
            StatusCode::UNAUTHORIZED => NetError::Unauthorized(detail),
            StatusCode::NOT_FOUND => NetError::ResourceNotFound(detail),
            StatusCode::CONFLICT => NetError::ResourceConflict(detail),
            StatusCode::PRECONDITION_FAILED => NetError::PreconditionFailed(detail),
            StatusCode::RANGE_NOT_SATISFIABLE => NetError::RequestedRangeNotSatisfiable(detail),
            _ => NetError::ServerError { status, detail },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            NetError::TimedOut | NetError::ConnectionTimedOut => ErrorKind::Timeout,

            NetError::InvalidHttpResponse
            | NetError::EmptyResponse
            | NetError::ResponseHeadersTooBig
            | NetError::ResponseHeadersMultipleContentLength
            | NetError::ContentLengthMismatch
            | NetError::InvalidChunkedEncoding
            | NetError::IncompleteChunkedEncoding => ErrorKind::Protocol,

            NetError::BodyNotChunked | NetError::InvalidUtf8 | NetError::JsonParseError => {
                ErrorKind::Body
            }

            NetError::Unauthorized(_)
            | NetError::ResourceNotFound(_)
            | NetError::ResourceConflict(_)
            | NetError::PreconditionFailed(_)
            | NetError::RequestedRangeNotSatisfiable(_)
            | NetError::ServerError { .. } => ErrorKind::Status,

            _ => ErrorKind::Transport,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }

    /// The HTTP status behind a status-derived error.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            NetError::Unauthorized(_) => Some(StatusCode::UNAUTHORIZED),
            NetError::ResourceNotFound(_) => Some(StatusCode::NOT_FOUND),
            NetError::ResourceConflict(_) => Some(StatusCode::CONFLICT),
            NetError::PreconditionFailed(_) => Some(StatusCode::PRECONDITION_FAILED),
            NetError::RequestedRangeNotSatisfiable(_) => Some(StatusCode::RANGE_NOT_SATISFIABLE),
            NetError::ServerError { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The server-provided detail behind a status-derived error.
    pub fn detail(&self) -> Option<&ErrorDetail> {
        match self {
            NetError::Unauthorized(d)
            | NetError::ResourceNotFound(d)
            | NetError::ResourceConflict(d)
            | NetError::PreconditionFailed(d)
            | NetError::RequestedRangeNotSatisfiable(d)
            | NetError::ServerError { detail: d, .. } => Some(d),
            _ => None,
        }
    }

    /// Chromium-style numeric code, used in log fields.
    pub fn as_i32(&self) -> i32 {
        match self {
            NetError::TimedOut => -7,
            NetError::ConnectionClosed => -100,
            NetError::ConnectionReset => -101,
            NetError::ConnectionRefused => -102,
            NetError::ConnectionAborted => -103,
            NetError::ConnectionFailed | NetError::ConnectionFailedTo { .. } => -104,
            NetError::NameNotResolved | NetError::NameNotResolvedFor { .. } => -105,
            NetError::SslProtocolError => -107,
            NetError::SocketNotConnected => -112,
            NetError::ConnectionTimedOut => -118,

            NetError::InvalidUrl => -300,
            NetError::DisallowedUrlScheme => -301,
            NetError::InvalidRedirect => -303,
            NetError::TooManyRedirects => -310,
            NetError::InvalidChunkedEncoding => -321,
            NetError::EmptyResponse => -324,
            NetError::ResponseHeadersTooBig => -325,
            NetError::ResponseHeadersMultipleContentLength => -346,
            NetError::ContentLengthMismatch => -354,
            NetError::IncompleteChunkedEncoding => -355,
            NetError::InvalidHttpResponse => -370,
            NetError::Unauthorized(_)
            | NetError::ResourceNotFound(_)
            | NetError::ResourceConflict(_)
            | NetError::PreconditionFailed(_)
            | NetError::RequestedRangeNotSatisfiable(_)
            | NetError::ServerError { .. } => -379,

            // Codes outside Chromium's list
            NetError::BodyNotChunked => -910,
            NetError::InvalidUtf8 => -911,
            NetError::JsonParseError => -912,
            NetError::Unknown(code) => *code,
        }
    }
}

impl From<i32> for NetError {
    fn from(code: i32) -> Self {
        match code {
            -7 => NetError::TimedOut,
            -100 => NetError::ConnectionClosed,
            -101 => NetError::ConnectionReset,
            -102 => NetError::ConnectionRefused,
            -103 => NetError::ConnectionAborted,
            -104 => NetError::ConnectionFailed,
            -105 => NetError::NameNotResolved,
            -107 => NetError::SslProtocolError,
            -112 => NetError::SocketNotConnected,
            -118 => NetError::ConnectionTimedOut,
            -300 => NetError::InvalidUrl,
            -301 => NetError::DisallowedUrlScheme,
            -303 => NetError::InvalidRedirect,
            -310 => NetError::TooManyRedirects,
            -321 => NetError::InvalidChunkedEncoding,
            -324 => NetError::EmptyResponse,
            -325 => NetError::ResponseHeadersTooBig,
            -346 => NetError::ResponseHeadersMultipleContentLength,
            -354 => NetError::ContentLengthMismatch,
            -355 => NetError::IncompleteChunkedEncoding,
            -370 => NetError::InvalidHttpResponse,
            -910 => NetError::BodyNotChunked,
            -911 => NetError::InvalidUtf8,
            -912 => NetError::JsonParseError,
            _ => NetError::Unknown(code),
        }
    }
}
