use crate::base::loadstate::LoadState;
use crate::base::neterror::NetError;
use crate::http::h1::ResponseHead;
use crate::http::requestbody::RequestBody;
use crate::http::retry::{calculate_backoff, should_retry, RetryConfig, RetryReason};
use crate::http::streamfactory::{HttpStream, HttpStreamFactory};
use http::{HeaderMap, Method};
use std::sync::Arc;
use url::Url;

/// Internal state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    CreateStream,
    SendRequest,
    ReadHeaders,
    Done,
}

impl State {
    /// Map internal state to public LoadState.
    fn to_load_state(self) -> LoadState {
        match self {
            State::Idle => LoadState::Idle,
            State::CreateStream => LoadState::Connecting,
            State::SendRequest => LoadState::SendingRequest,
            State::ReadHeaders => LoadState::WaitingForResponse,
            State::Done => LoadState::ReadingResponse,
        }
    }
}

/// A single request/response exchange: connect, send, read the head.
///
/// Redirects and caching are the session's business; the transaction only
/// retries failures that happened before a response arrived.
pub struct HttpNetworkTransaction {
    factory: Arc<HttpStreamFactory>,
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: RequestBody,
    replayable: bool,
    state: State,
    stream: Option<HttpStream>,
    head: Option<ResponseHead>,
    retry_config: RetryConfig,
    retry_attempts: usize,
    force_fresh: bool,
}

impl HttpNetworkTransaction {
    pub fn new(
        factory: Arc<HttpStreamFactory>,
        method: Method,
        url: Url,
        headers: HeaderMap,
        body: RequestBody,
    ) -> Self {
        let replayable = body.is_replayable();
        Self {
            factory,
            method,
            url,
            headers,
            body,
            replayable,
            state: State::Idle,
            stream: None,
            head: None,
            retry_config: RetryConfig::default(),
            retry_attempts: 0,
            force_fresh: false,
        }
    }

    /// Set custom retry configuration.
    pub fn set_retry_config(&mut self, config: RetryConfig) {
        self.retry_config = config;
    }

    /// Get the current load state (for progress reporting).
    pub fn get_load_state(&self) -> LoadState {
        self.state.to_load_state()
    }

    pub fn retry_attempts(&self) -> usize {
        self.retry_attempts
    }

    /// Start the transaction with automatic retry on connection failures.
    pub async fn start(&mut self) -> Result<(), NetError> {
        self.state = State::CreateStream;
        self.retry_attempts = 0;

        loop {
            let err = match self.do_loop().await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            let reused = self.stream.take().is_some_and(|s| s.is_reused());
            self.head = None;

            let Some(reason) = RetryReason::from_error(&err) else {
                return Err(err);
            };
            if !self.replayable {
                tracing::debug!(?reason, url = %self.url, "body not replayable, not retrying");
                return Err(err);
            }

            // A keep-alive connection the server already closed: try once more
            // on a new connection without counting it as a retry.
            if reused && !self.force_fresh {
                tracing::debug!(?reason, url = %self.url, "reused connection failed, reconnecting");
                self.force_fresh = true;
                self.state = State::CreateStream;
                continue;
            }

            if !should_retry(self.retry_attempts, &self.retry_config) {
                return Err(err);
            }
            self.retry_attempts += 1;
            let delay = calculate_backoff(self.retry_attempts, &self.retry_config);
            tracing::warn!(
                ?reason,
                attempt = self.retry_attempts,
                delay_ms = delay.as_millis() as u64,
                url = %self.url,
                "retrying request"
            );

            // Reset state for retry
            self.state = State::CreateStream;
            tokio::time::sleep(delay).await;
        }
    }

    async fn do_loop(&mut self) -> Result<(), NetError> {
        loop {
            match self.state {
                State::Idle | State::Done => {
                    return Ok(());
                }
                State::CreateStream => {
                    let stream = if self.force_fresh {
                        self.factory.request_fresh_stream(&self.url).await?
                    } else {
                        self.factory.request_stream(&self.url).await?
                    };
                    self.stream = Some(stream);
                    self.state = State::SendRequest;
                }
                State::SendRequest => {
                    let stream = self.stream.as_mut().ok_or(NetError::SocketNotConnected)?;
                    let body = self.body.take_for_send();
                    tracing::trace!(
                        method = %self.method,
                        url = %self.url,
                        reused = stream.is_reused(),
                        "sending request"
                    );
                    stream.send_request(&self.method, &self.url, &self.headers, body).await?;
                    self.state = State::ReadHeaders;
                }
                State::ReadHeaders => {
                    let stream = self.stream.as_mut().ok_or(NetError::SocketNotConnected)?;
                    self.head = Some(stream.read_response_head().await?);
                    self.state = State::Done;
                }
            }
        }
    }

    pub fn response_head(&self) -> Option<&ResponseHead> {
        self.head.as_ref()
    }

    /// Take the response head and the stream positioned at its body.
    /// Can only be called once, after `start` succeeded.
    pub fn take_response(&mut self) -> Option<(ResponseHead, HttpStream)> {
        let head = self.head.take()?;
        let stream = self.stream.take()?;
        self.state = State::Idle;
        Some((head, stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::socket::pool::ConnectionPool;
    use http::StatusCode;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn factory() -> Arc<HttpStreamFactory> {
        Arc::new(HttpStreamFactory::new(Arc::new(ConnectionPool::new()), None))
    }

    #[tokio::test]
    async fn test_exchange() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("http://{}/db", listener.local_addr().unwrap())).unwrap();

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = sock.read(&mut buf).await.unwrap();
            sock.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\n{}").await.unwrap();
        });

        let mut trans = HttpNetworkTransaction::new(
            factory(),
            Method::GET,
            url,
            HeaderMap::new(),
            RequestBody::Empty,
        );
        assert_eq!(trans.get_load_state(), LoadState::Idle);
        trans.start().await.unwrap();

        let (head, stream) = trans.take_response().unwrap();
        assert_eq!(head.status, StatusCode::OK);
        assert!(!stream.is_reused());
        assert!(trans.take_response().is_none());
    }

    #[tokio::test]
    async fn test_empty_response_retried() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("http://{}/db", listener.local_addr().unwrap())).unwrap();

        tokio::spawn(async move {
            // First connection: hang up without answering.
            let (sock, _) = listener.accept().await.unwrap();
            drop(sock);

            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = sock.read(&mut buf).await.unwrap();
            sock.write_all(b"HTTP/1.1 204 No Content\r\n\r\n").await.unwrap();
        });

        let mut trans = HttpNetworkTransaction::new(
            factory(),
            Method::GET,
            url,
            HeaderMap::new(),
            RequestBody::Empty,
        );
        trans.set_retry_config(RetryConfig { base_delay_ms: 1, ..RetryConfig::default() });
        trans.start().await.unwrap();

        assert_eq!(trans.retry_attempts(), 1);
        assert_eq!(trans.response_head().unwrap().status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_stream_body_not_retried() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("http://{}/db", listener.local_addr().unwrap())).unwrap();

        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = sock.read(&mut buf).await;
            drop(sock);
        });

        let body = RequestBody::stream(&b"upload"[..]);
        let mut trans =
            HttpNetworkTransaction::new(factory(), Method::PUT, url, HeaderMap::new(), body);
        let err = trans.start().await.unwrap_err();
        assert_eq!(trans.retry_attempts(), 0);
        assert!(RetryReason::from_error(&err).is_some());
    }
}
