use crate::base::context::IoResultExt;
use crate::base::neterror::NetError;
use crate::socket::client::{Connection, SocketType};
use crate::socket::timeout::TimeoutStream;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use url::{Host, Url};

/// Read buffer size for new connections.
const READ_BUFFER_SIZE: usize = 16 * 1024;

/// Manages the connection process: DNS -> TCP -> SSL.
/// Roughly equivalent to net::ConnectJob.
pub struct ConnectJob;

impl ConnectJob {
    /// Open a connection to the origin of `url`.
    ///
    /// `timeout` bounds the whole connect (resolution, TCP and handshake) and
    /// then becomes the per-read/per-write timeout of the returned connection.
    pub async fn connect(url: &Url, timeout: Option<Duration>) -> Result<Connection, NetError> {
        let host = url.host_str().ok_or(NetError::InvalidUrl)?;
        let port = url.port_or_known_default().ok_or(NetError::InvalidUrl)?;

        match url.scheme() {
            "http" => {}
            "https" if cfg!(feature = "tls") => {}
            _ => return Err(NetError::DisallowedUrlScheme),
        }

        let socket = match timeout {
            Some(limit) => tokio::time::timeout(limit, Self::establish(url, host, port))
                .await
                .map_err(|_| {
                    tracing::debug!(host, port, ?limit, "connect timed out");
                    NetError::ConnectionTimedOut
                })??,
            None => Self::establish(url, host, port).await?,
        };

        tracing::debug!(host, port, scheme = url.scheme(), "connected");
        Ok(BufReader::with_capacity(READ_BUFFER_SIZE, TimeoutStream::with_timeout(socket, timeout)))
    }

    async fn establish(url: &Url, host: &str, port: u16) -> Result<SocketType, NetError> {
        // 1. DNS Resolution. IP literals skip it; `host_str` keeps IPv6 brackets.
        let addrs: Vec<SocketAddr> = match url.host() {
            Some(Host::Ipv4(ip)) => vec![SocketAddr::from((ip, port))],
            Some(Host::Ipv6(ip)) => vec![SocketAddr::from((ip, port))],
            _ => tokio::net::lookup_host((host, port)).await.dns_context(host)?.collect(),
        };
        if addrs.is_empty() {
            return Err(NetError::NameNotResolved);
        }

        // 2. TCP Connect, first address that answers
        let mut last_err = None;
        let mut stream = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => {
                    tracing::trace!(%addr, error = %e, "address failed");
                    last_err = Some(e);
                }
            }
        }
        let stream = match (stream, last_err) {
            (Some(s), _) => s,
            (None, Some(e)) => return Err(e).connection_context(host, port),
            (None, None) => return Err(NetError::ConnectionFailed),
        };
        stream.set_nodelay(true).connection_context(host, port)?;

        // 3. SSL Handshake (if https)
        if url.scheme() == "https" {
            return Self::handshake(host, stream).await;
        }
        Ok(SocketType::Tcp(stream))
    }

    #[cfg(feature = "tls")]
    async fn handshake(host: &str, stream: TcpStream) -> Result<SocketType, NetError> {
        use boring::ssl::{SslConnector, SslMethod};

        let mut builder =
            SslConnector::builder(SslMethod::tls()).map_err(|_| NetError::SslProtocolError)?;
        builder.set_alpn_protos(b"\x08http/1.1").map_err(|_| NetError::SslProtocolError)?;

        let config = builder.build().configure().map_err(|_| NetError::SslProtocolError)?;
        let tls_stream = tokio_boring::connect(config, host, stream).await.map_err(|e| {
            tracing::warn!(host, error = ?e, "SSL handshake failed");
            NetError::SslProtocolError
        })?;

        Ok(SocketType::Ssl(tls_stream))
    }

    #[cfg(not(feature = "tls"))]
    async fn handshake(_host: &str, _stream: TcpStream) -> Result<SocketType, NetError> {
        Err(NetError::DisallowedUrlScheme)
    }
}
