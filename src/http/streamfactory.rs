use crate::base::neterror::NetError;
use crate::http::h1::{self, ResponseHead};
use crate::http::requestbody::RequestBody;
use crate::socket::client::Connection;
use crate::socket::pool::ConnectionPool;
use http::{HeaderMap, Method};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// One HTTP/1.1 exchange on a checked-out connection.
/// Equivalent to net::HttpStream.
pub struct HttpStream {
    conn: Connection,
    reused: bool,
}

impl std::fmt::Debug for HttpStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpStream").field("reused", &self.reused).finish()
    }
}

impl HttpStream {
    /// Whether the connection came from the idle pool.
    pub fn is_reused(&self) -> bool {
        self.reused
    }

    pub async fn send_request(
        &mut self,
        method: &Method,
        url: &Url,
        headers: &HeaderMap,
        body: RequestBody,
    ) -> Result<(), NetError> {
        h1::write_request(&mut self.conn, method, url, headers, body).await
    }

    pub async fn read_response_head(&mut self) -> Result<ResponseHead, NetError> {
        h1::read_response_head(&mut self.conn).await
    }

    /// Hand the connection, positioned at the body, to the caller.
    pub fn into_connection(self) -> Connection {
        self.conn
    }
}

pub struct HttpStreamFactory {
    pool: Arc<ConnectionPool>,
    timeout: Option<Duration>,
}

impl HttpStreamFactory {
    pub fn new(pool: Arc<ConnectionPool>, timeout: Option<Duration>) -> Self {
        Self { pool, timeout }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Get a stream for `url`, reusing an idle connection when one is available.
    pub async fn request_stream(&self, url: &Url) -> Result<HttpStream, NetError> {
        let (conn, reused) = self.pool.request_connection(url, self.timeout).await?;
        Ok(HttpStream { conn, reused })
    }

    /// Get a stream on a new connection.
    pub async fn request_fresh_stream(&self, url: &Url) -> Result<HttpStream, NetError> {
        let conn = self.pool.request_fresh_connection(url, self.timeout).await?;
        Ok(HttpStream { conn, reused: false })
    }
}
