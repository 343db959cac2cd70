//! Ergonomic error context helpers.
//!
//! Provides extension traits for adding context to `Result` types,
//! converting IO errors into context-rich `NetError` variants.

use crate::base::neterror::NetError;
use std::io::{self, ErrorKind};

impl NetError {
    /// Classify an IO error raised while talking to a peer.
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => NetError::TimedOut,
            ErrorKind::ConnectionRefused => NetError::ConnectionRefused,
            ErrorKind::ConnectionReset | ErrorKind::BrokenPipe => NetError::ConnectionReset,
            ErrorKind::ConnectionAborted => NetError::ConnectionAborted,
            ErrorKind::NotConnected => NetError::SocketNotConnected,
            ErrorKind::UnexpectedEof => NetError::ConnectionClosed,
            _ => NetError::ConnectionFailed,
        }
    }

    pub fn connection_failed_to(host: &str, port: u16, err: io::Error) -> Self {
        match err.kind() {
            ErrorKind::ConnectionRefused => NetError::ConnectionRefused,
            ErrorKind::TimedOut => NetError::ConnectionTimedOut,
            _ => NetError::ConnectionFailedTo {
                host: host.to_string(),
                port,
                reason: err.to_string(),
            },
        }
    }

    pub fn dns_failed(domain: &str, err: io::Error) -> Self {
        NetError::NameNotResolvedFor {
            domain: domain.to_string(),
            reason: err.to_string(),
        }
    }
}

/// Extension trait for adding context to IO Results.
pub trait IoResultExt<T> {
    /// Add connection context to an IO error.
    ///
    /// # Example
    /// ```ignore
    /// use couchnet::base::context::IoResultExt;
    ///
    /// let stream = TcpStream::connect(addr).await
    ///     .connection_context("localhost", 5984)?;
    /// // Error: "Connection to localhost:5984 failed: ..."
    /// ```
    fn connection_context(self, host: &str, port: u16) -> Result<T, NetError>;

    /// Add DNS resolution context to an IO error.
    fn dns_context(self, domain: &str) -> Result<T, NetError>;

    /// Map an IO error from an established connection.
    fn net_context(self) -> Result<T, NetError>;
}

impl<T> IoResultExt<T> for Result<T, io::Error> {
    fn connection_context(self, host: &str, port: u16) -> Result<T, NetError> {
        self.map_err(|e| NetError::connection_failed_to(host, port, e))
    }

    fn dns_context(self, domain: &str) -> Result<T, NetError> {
        self.map_err(|e| NetError::dns_failed(domain, e))
    }

    fn net_context(self) -> Result<T, NetError> {
        self.map_err(|e| NetError::from_io(&e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Error;

    #[test]
    fn test_connection_context() {
        let result: Result<(), io::Error> = Err(Error::new(ErrorKind::AddrNotAvailable, "nope"));
        let err = result.connection_context("localhost", 5984).unwrap_err();

        match err {
            NetError::ConnectionFailedTo { host, port, .. } => {
                assert_eq!(host, "localhost");
                assert_eq!(port, 5984);
            }
            _ => panic!("Expected ConnectionFailedTo"),
        }
    }

    #[test]
    fn test_connection_refused_stays_distinct() {
        let result: Result<(), io::Error> =
            Err(Error::new(ErrorKind::ConnectionRefused, "refused"));
        let err = result.connection_context("localhost", 5984).unwrap_err();
        assert_eq!(err, NetError::ConnectionRefused);
    }

    #[test]
    fn test_dns_context() {
        let result: Result<(), io::Error> = Err(Error::new(ErrorKind::NotFound, "no such host"));
        let err = result.dns_context("couch.invalid").unwrap_err();

        match err {
            NetError::NameNotResolvedFor { domain, .. } => {
                assert_eq!(domain, "couch.invalid");
            }
            _ => panic!("Expected NameNotResolvedFor"),
        }
    }

    #[test]
    fn test_net_context_timeout() {
        let result: Result<(), io::Error> = Err(Error::new(ErrorKind::TimedOut, "read timed out"));
        let err = result.net_context().unwrap_err();
        assert_eq!(err, NetError::TimedOut);
        assert!(err.is_timeout());
    }
}
