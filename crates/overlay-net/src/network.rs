//! Underlying network contract: a byte stream plus the link type it was
//! established over, and the dialer that produces one.
//!
//! The managed transport stays link-agnostic: it only ever sees a
//! `Box<dyn Conn>` and a `Box<dyn Dialer>`, never a concrete socket
//! type. A generic [`tokio::time::timeout`], applied by the handshake
//! and settlement modules themselves, stands in for a socket-level read
//! deadline, since a `Conn` trait object has no natural way to expose
//! one the way `net.Conn.SetDeadline` does.

use async_trait::async_trait;
use overlay_core::PublicKey;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, BufStream, ReadBuf};

#[derive(Debug, thiserror::Error)]
pub enum DialError {
    #[error("link-layer io error: {0}")]
    Io(String),
}

/// An established byte stream over some underlying link type.
pub trait Conn: AsyncRead + AsyncWrite + Unpin + Send {
    /// The link type name this conn was established over.
    fn network(&self) -> &str;
}

/// Raw connection establishment for one link type. No handshake of any
/// kind happens here; the managed transport runs the peer and
/// settlement handshakes itself once it has a raw `Conn`.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, remote_pk: PublicKey, port: u16) -> Result<Box<dyn Conn>, DialError>;
}

/// Wraps a raw [`Conn`] in a buffered reader/writer so the peer
/// handshake, settlement handshake, and subsequent packet I/O can all
/// share one buffer — no bytes a peer pipelines across phase boundaries
/// are ever stranded in a buffer that gets dropped between phases.
pub struct BufferedConn {
    inner: BufStream<Box<dyn Conn>>,
    link_type: String,
}

impl BufferedConn {
    pub fn new(conn: Box<dyn Conn>) -> Self {
        let link_type = conn.network().to_string();
        Self {
            inner: BufStream::new(conn),
            link_type,
        }
    }
}

impl Conn for BufferedConn {
    fn network(&self) -> &str {
        &self.link_type
    }
}

impl AsyncRead for BufferedConn {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for BufferedConn {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

impl AsyncBufRead for BufferedConn {
    fn poll_fill_buf(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<&[u8]>> {
        Pin::new(&mut self.get_mut().inner).poll_fill_buf(cx)
    }

    fn consume(self: Pin<&mut Self>, amt: usize) {
        Pin::new(&mut self.get_mut().inner).consume(amt)
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tokio::io::DuplexStream;

    /// A [`Conn`] over an in-memory duplex stream, for tests.
    pub struct DuplexConn {
        pub stream: DuplexStream,
        pub link_type: String,
    }

    impl DuplexConn {
        pub fn new(stream: DuplexStream, link_type: impl Into<String>) -> Self {
            Self {
                stream,
                link_type: link_type.into(),
            }
        }
    }

    impl Conn for DuplexConn {
        fn network(&self) -> &str {
            &self.link_type
        }
    }

    impl AsyncRead for DuplexConn {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<std::io::Result<()>> {
            Pin::new(&mut self.stream).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for DuplexConn {
        fn poll_write(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<std::io::Result<usize>> {
            Pin::new(&mut self.stream).poll_write(cx, buf)
        }

        fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Pin::new(&mut self.stream).poll_flush(cx)
        }

        fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
            Pin::new(&mut self.stream).poll_shutdown(cx)
        }
    }

    /// In-memory [`Dialer`] that hands out one pre-wired duplex conn per
    /// `(remote_pk, port)`, the other half retrievable by the test via
    /// [`MockDialer::take_accept_side`].
    #[derive(Default)]
    pub struct MockDialer {
        link_type: String,
        pending: Mutex<HashMap<(PublicKey, u16), DuplexStream>>,
        fail_next: Mutex<usize>,
    }

    impl MockDialer {
        pub fn new(link_type: impl Into<String>) -> Self {
            Self {
                link_type: link_type.into(),
                pending: Mutex::new(HashMap::new()),
                fail_next: Mutex::new(0),
            }
        }

        /// Register the server-side half a future `dial` call should hand
        /// the client side of.
        pub fn prime(&self, remote_pk: PublicKey, port: u16, client_side: DuplexStream) {
            self.pending.lock().unwrap().insert((remote_pk, port), client_side);
        }

        pub fn fail_next_dials(&self, n: usize) {
            *self.fail_next.lock().unwrap() = n;
        }
    }

    #[async_trait]
    impl Dialer for MockDialer {
        async fn dial(&self, remote_pk: PublicKey, port: u16) -> Result<Box<dyn Conn>, DialError> {
            {
                let mut fail_next = self.fail_next.lock().unwrap();
                if *fail_next > 0 {
                    *fail_next -= 1;
                    return Err(DialError::Io("simulated dial failure".to_string()));
                }
            }
            let stream = self
                .pending
                .lock()
                .unwrap()
                .remove(&(remote_pk, port))
                .ok_or_else(|| DialError::Io("no primed conn for this address".to_string()))?;
            Ok(Box::new(DuplexConn::new(stream, self.link_type.clone())))
        }
    }
}
