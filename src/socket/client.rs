use crate::socket::timeout::TimeoutStream;
use futures::task::noop_waker_ref;
use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, BufReader, ReadBuf};
use tokio::net::TcpStream;

/// Represents a connected socket (TCP or SSL).
pub trait StreamSocket: AsyncRead + AsyncWrite + Unpin + Send + fmt::Debug {
    /// Returns true if the peer has not closed or reset the socket.
    fn is_connected(&self) -> bool;

    /// Returns true if the socket is connected and has no unread data.
    /// A pooled socket that fails this check cannot carry a new request.
    fn is_connected_and_idle(&self) -> bool;
}

/// What a non-blocking peek says about a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeekState {
    Idle,
    HasData,
    Closed,
}

#[derive(Debug)]
pub enum SocketType {
    Tcp(TcpStream),
    #[cfg(feature = "tls")]
    Ssl(tokio_boring::SslStream<TcpStream>),
}

impl SocketType {
    fn tcp(&self) -> &TcpStream {
        match self {
            SocketType::Tcp(s) => s,
            #[cfg(feature = "tls")]
            SocketType::Ssl(s) => s.get_ref(),
        }
    }

    /// Peek without consuming anything. Never blocks: a socket with nothing
    /// to read reports `Idle`.
    fn peek_state(stream: &TcpStream) -> PeekState {
        if stream.peer_addr().is_err() {
            return PeekState::Closed;
        }

        let mut cx = Context::from_waker(noop_waker_ref());
        let mut byte = [0u8; 1];
        let mut buf = ReadBuf::new(&mut byte);
        match stream.poll_peek(&mut cx, &mut buf) {
            Poll::Pending => PeekState::Idle,
            Poll::Ready(Ok(0)) => PeekState::Closed,
            Poll::Ready(Ok(_)) => PeekState::HasData,
            Poll::Ready(Err(_)) => PeekState::Closed,
        }
    }
}

impl AsyncRead for SocketType {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SocketType::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(feature = "tls")]
            SocketType::Ssl(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for SocketType {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            SocketType::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(feature = "tls")]
            SocketType::Ssl(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SocketType::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(feature = "tls")]
            SocketType::Ssl(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            SocketType::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(feature = "tls")]
            SocketType::Ssl(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

impl StreamSocket for SocketType {
    fn is_connected(&self) -> bool {
        Self::peek_state(self.tcp()) != PeekState::Closed
    }

    fn is_connected_and_idle(&self) -> bool {
        Self::peek_state(self.tcp()) == PeekState::Idle
    }
}

/// A buffered, timeout-bounded connection to one origin.
///
/// The buffer belongs to the connection rather than to a single response, so
/// bytes read past the end of one body are never lost. A connection whose
/// buffer still holds data is not idle and is never pooled.
pub type Connection = BufReader<TimeoutStream<SocketType>>;

/// Liveness checks through the read buffer.
pub trait ConnectionExt {
    fn is_reusable(&self) -> bool;
}

impl ConnectionExt for Connection {
    fn is_reusable(&self) -> bool {
        self.buffer().is_empty() && self.get_ref().get_ref().is_connected_and_idle()
    }
}
