use crate::base::neterror::NetError;
use crate::socket::client::{Connection, ConnectionExt};
use crate::socket::connectjob::ConnectJob;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// Idle keep-alive connections older than this are closed instead of reused.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Default cap on idle connections kept per origin.
pub const DEFAULT_MAX_IDLE_PER_HOST: usize = 6;

/// Identifies a connection group (scheme, host, port).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct GroupId {
    scheme: String,
    host: String,
    port: u16,
}

impl GroupId {
    fn from_url(url: &Url) -> Option<Self> {
        Some(GroupId {
            scheme: url.scheme().to_string(),
            host: url.host_str()?.to_string(),
            port: url.port_or_known_default()?,
        })
    }
}

/// Idle connection with metadata for timeout tracking.
struct IdleConnection {
    conn: Connection,
    /// When this connection was returned to the pool
    start_time: Instant,
}

impl IdleConnection {
    fn is_usable(&self, now: Instant) -> bool {
        now.duration_since(self.start_time) < IDLE_TIMEOUT && self.conn.is_reusable()
    }
}

/// Keep-alive connections per origin.
///
/// Connections are checked out exclusively; a response body hands its
/// connection back through [`release_connection`](Self::release_connection)
/// once fully consumed. Cloning shares the same idle set.
#[derive(Clone)]
pub struct ConnectionPool {
    max_idle_per_host: usize,
    groups: Arc<DashMap<GroupId, VecDeque<IdleConnection>>>,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("max_idle_per_host", &self.max_idle_per_host)
            .field("idle", &self.idle_connection_count())
            .finish()
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionPool {
    pub fn new() -> Self {
        Self::with_max_idle_per_host(DEFAULT_MAX_IDLE_PER_HOST)
    }

    pub fn with_max_idle_per_host(max_idle_per_host: usize) -> Self {
        Self { max_idle_per_host, groups: Arc::new(DashMap::new()) }
    }

    /// Check out a connection for `url`'s origin.
    ///
    /// Returns the connection and whether it was reused from the idle set.
    /// Stale or dead idle connections are closed on the way.
    pub async fn request_connection(
        &self,
        url: &Url,
        timeout: Option<Duration>,
    ) -> Result<(Connection, bool), NetError> {
        if let Some(conn) = self.take_idle(url, timeout) {
            return Ok((conn, true));
        }
        let conn = ConnectJob::connect(url, timeout).await?;
        Ok((conn, false))
    }

    /// Check out a fresh connection, skipping the idle set.
    pub async fn request_fresh_connection(
        &self,
        url: &Url,
        timeout: Option<Duration>,
    ) -> Result<Connection, NetError> {
        ConnectJob::connect(url, timeout).await
    }

    fn take_idle(&self, url: &Url, timeout: Option<Duration>) -> Option<Connection> {
        let group_id = GroupId::from_url(url)?;
        let mut group = self.groups.get_mut(&group_id)?;
        let now = Instant::now();

        // Most recently returned first.
        while let Some(mut idle) = group.pop_back() {
            if idle.is_usable(now) {
                let stream = idle.conn.get_mut();
                stream.set_read_timeout(timeout);
                stream.set_write_timeout(timeout);
                tracing::trace!(host = %group_id.host, port = group_id.port, "reusing connection");
                return Some(idle.conn);
            }
            tracing::trace!(
                host = %group_id.host,
                port = group_id.port,
                "dropping stale connection"
            );
        }
        None
    }

    /// Return a connection whose last response was fully consumed.
    ///
    /// Connections with unread bytes, closed peers, or a full group are dropped.
    pub fn release_connection(&self, url: &Url, conn: Connection) {
        let Some(group_id) = GroupId::from_url(url) else {
            return;
        };
        if self.max_idle_per_host == 0 || !conn.is_reusable() {
            tracing::trace!(host = %group_id.host, "connection not reusable, closing");
            return;
        }

        let mut group = self.groups.entry(group_id).or_default();
        if group.len() >= self.max_idle_per_host {
            // Oldest goes first.
            group.pop_front();
        }
        group.push_back(IdleConnection { conn, start_time: Instant::now() });
    }

    /// Get total idle connection count across all origins.
    pub fn idle_connection_count(&self) -> usize {
        self.groups.iter().map(|g| g.len()).sum()
    }

    /// Close idle connections that expired or were closed by the peer.
    pub fn cleanup_idle_connections(&self) {
        let now = Instant::now();
        self.groups.retain(|_, group| {
            group.retain(|idle| idle.is_usable(now));
            !group.is_empty()
        });
    }

    /// Close every idle connection.
    pub fn clear(&self) {
        self.groups.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    async fn server() -> (TcpListener, Url) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = Url::parse(&format!("http://{}/db", listener.local_addr().unwrap())).unwrap();
        (listener, url)
    }

    #[tokio::test]
    async fn test_release_and_reuse() {
        let (listener, url) = server().await;
        let pool = ConnectionPool::new();

        let (conn, reused) = pool.request_connection(&url, None).await.unwrap();
        let (_peer, _) = listener.accept().await.unwrap();
        assert!(!reused);

        pool.release_connection(&url, conn);
        assert_eq!(pool.idle_connection_count(), 1);

        let (_conn, reused) = pool.request_connection(&url, None).await.unwrap();
        assert!(reused);
        assert_eq!(pool.idle_connection_count(), 0);
    }

    #[tokio::test]
    async fn test_dirty_connection_not_pooled() {
        let (listener, url) = server().await;
        let pool = ConnectionPool::new();

        let (conn, _) = pool.request_connection(&url, None).await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();
        peer.write_all(b"HTTP/1.1 200 OK\r\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        pool.release_connection(&url, conn);
        assert_eq!(pool.idle_connection_count(), 0);
    }

    #[tokio::test]
    async fn test_closed_peer_dropped_on_cleanup() {
        let (listener, url) = server().await;
        let pool = ConnectionPool::new();

        let (conn, _) = pool.request_connection(&url, None).await.unwrap();
        let (peer, _) = listener.accept().await.unwrap();
        pool.release_connection(&url, conn);
        assert_eq!(pool.idle_connection_count(), 1);

        drop(peer);
        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.cleanup_idle_connections();
        assert_eq!(pool.idle_connection_count(), 0);
    }

    #[tokio::test]
    async fn test_max_idle_per_host() {
        let (listener, url) = server().await;
        let pool = ConnectionPool::with_max_idle_per_host(2);

        let mut conns = Vec::new();
        let mut peers = Vec::new();
        for _ in 0..3 {
            let (conn, _) = pool.request_connection(&url, None).await.unwrap();
            peers.push(listener.accept().await.unwrap().0);
            conns.push(conn);
        }
        for conn in conns {
            pool.release_connection(&url, conn);
        }
        assert_eq!(pool.idle_connection_count(), 2);
    }

    #[tokio::test]
    async fn test_pooling_disabled() {
        let (listener, url) = server().await;
        let pool = ConnectionPool::with_max_idle_per_host(0);

        let (conn, _) = pool.request_connection(&url, None).await.unwrap();
        let _peer = listener.accept().await.unwrap();
        pool.release_connection(&url, conn);
        assert_eq!(pool.idle_connection_count(), 0);
    }
}
