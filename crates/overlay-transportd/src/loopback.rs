//! In-process discovery and link layer for the demonstration daemon.
//!
//! Stands in for a real discovery service and a real dialer the way
//! `snettest.Env` stood in for `dmsg`/`stcp` in integration tests: one
//! process wires both ends of a transport pair and drives them directly,
//! no sockets involved.

use async_trait::async_trait;
use overlay_core::{PublicKey, TransportEntry, TransportId};
use overlay_net::{Conn, DialError, Dialer, DiscoveryClient, DiscoveryError, StatusUpdate};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Mutex;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadBuf};

/// A [`Conn`] over an in-memory duplex half, tagged with the link type
/// both demonstration transports are configured to use.
pub struct LoopbackConn {
    stream: DuplexStream,
    link_type: String,
}

impl LoopbackConn {
    pub fn new(stream: DuplexStream, link_type: impl Into<String>) -> Self {
        Self {
            stream,
            link_type: link_type.into(),
        }
    }
}

impl Conn for LoopbackConn {
    fn network(&self) -> &str {
        &self.link_type
    }
}

impl AsyncRead for LoopbackConn {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for LoopbackConn {
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

/// Hands out one pre-wired duplex half per `(remote_pk, port)`; the other
/// half is registered separately and fetched by whoever calls `accept`.
pub struct LoopbackDialer {
    link_type: String,
    pending: Mutex<HashMap<(PublicKey, u16), DuplexStream>>,
}

impl LoopbackDialer {
    pub fn new(link_type: impl Into<String>) -> Self {
        Self {
            link_type: link_type.into(),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, remote_pk: PublicKey, port: u16, client_side: DuplexStream) {
        self.pending.lock().unwrap().insert((remote_pk, port), client_side);
    }
}

#[async_trait]
impl Dialer for LoopbackDialer {
    async fn dial(&self, remote_pk: PublicKey, port: u16) -> Result<Box<dyn Conn>, DialError> {
        let stream = self
            .pending
            .lock()
            .unwrap()
            .remove(&(remote_pk, port))
            .ok_or_else(|| DialError::Io("no wired conn for this peer".to_string()))?;
        Ok(Box::new(LoopbackConn::new(stream, self.link_type.clone())))
    }
}

/// Single-process discovery registry shared by both ends of the
/// demonstration pair.
#[derive(Default)]
pub struct LoopbackDiscovery {
    entries: Mutex<HashMap<TransportId, TransportEntry>>,
}

impl LoopbackDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, entry: TransportEntry) {
        self.entries.lock().unwrap().insert(entry.id, entry);
    }

    pub fn snapshot(&self, id: TransportId) -> Option<TransportEntry> {
        self.entries.lock().unwrap().get(&id).cloned()
    }
}

#[async_trait]
impl DiscoveryClient for LoopbackDiscovery {
    async fn get_transport_by_id(&self, id: TransportId) -> Result<TransportEntry, DiscoveryError> {
        self.entries
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(DiscoveryError::NotFound(id))
    }

    async fn update_statuses(&self, updates: &[StatusUpdate]) -> Result<(), DiscoveryError> {
        let mut entries = self.entries.lock().unwrap();
        for u in updates {
            if let Some(entry) = entries.get_mut(&u.id) {
                entry.is_up = u.is_up;
            }
        }
        Ok(())
    }
}
