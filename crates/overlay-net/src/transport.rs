//! Managed transport: owns one underlying connection at a time, exposes
//! packet read/write, and runs the redial and log-flush loops.
//!
//! Exactly one [`ManagedTransport::serve`] runs per transport. It spawns
//! a read task and then itself becomes the redial/log-flush loop, owning
//! the redial ticker until `close()` fires `done`.

use crate::discovery::{update_status_with_retry, DiscoveryClient, DiscoveryError};
use crate::handshake::{self, HandshakeError};
use crate::logstore::{LogStore, LogStoreError};
use crate::network::{Conn, DialError, Dialer};
use crate::packet::RoutingPacket;
use crate::settlement::{self, SettlementError};
use overlay_core::crypto::transport_id;
use overlay_core::{Address, Crypto, Edges, LogEntry, PublicKey, SecretKey, TransportEntry, TransportId};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch, Mutex, Notify, OnceCell};
use tokio_util::sync::CancellationToken;

/// Default inbound listening port used when a transport dials its peer.
pub const DMSG_TRANSPORT_PORT: u16 = 45;

/// How often the serve loop ticks to flush counters or attempt a redial.
pub const DEFAULT_REDIAL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport is not serving")]
    NotServing,
    #[error("a connection is already held")]
    ConnAlreadyExists,
    #[error("wrong network: expected {expected}, got {actual}")]
    WrongNetwork { expected: String, actual: String },
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("dial failed: {0}")]
    Dial(#[from] DialError),
    #[error("packet io error: {0}")]
    Io(String),
    #[error("discovery error: {0}")]
    Discovery(#[from] DiscoveryError),
}

impl From<HandshakeError> for TransportError {
    fn from(e: HandshakeError) -> Self {
        TransportError::HandshakeFailed(e.to_string())
    }
}

impl From<SettlementError> for TransportError {
    fn from(e: SettlementError) -> Self {
        TransportError::HandshakeFailed(e.to_string())
    }
}

struct ConnState {
    conn: Option<Box<dyn Conn>>,
    is_up: bool,
}

/// A read-only snapshot of a transport's health, for logging/monitoring.
#[derive(Debug, Clone, Copy)]
pub struct TransportStats {
    pub is_up: bool,
    pub has_conn: bool,
    pub log_entry: LogEntry,
}

struct Inner {
    remote_pk: PublicKey,
    local_pk: PublicKey,
    local_sk: SecretKey,
    local_port: u16,
    link_type: String,
    entry_id: TransportId,
    edges: Edges,

    crypto: Box<dyn Crypto>,
    dialer: Box<dyn Dialer>,
    discovery: Box<dyn DiscoveryClient>,
    log_store: Box<dyn LogStore>,

    conn_state: Mutex<ConnState>,
    conn_ready: Notify,
    done: CancellationToken,

    sent_bytes: AtomicU64,
    recv_bytes: AtomicU64,
    log_updates: AtomicU32,

    serve_started: AtomicBool,
    close_once: OnceCell<()>,
    serve_exited_tx: watch::Sender<bool>,
    serve_exited_rx: watch::Receiver<bool>,

    redial_interval: Duration,
    span: tracing::Span,
}

impl Inner {
    fn entry_id(&self) -> TransportId {
        self.entry_id
    }

    async fn entry_snapshot(&self) -> TransportEntry {
        let is_up = self.conn_state.lock().await.is_up;
        TransportEntry::new(self.entry_id, self.edges, self.link_type.clone(), is_up)
    }

    /// Shared by `accept` and `dial`: adopt `new_conn` iff none is held.
    async fn set_if_conn_nil(&self, new_conn: Box<dyn Conn>) -> Result<(), TransportError> {
        let mut state = self.conn_state.lock().await;
        if state.conn.is_some() {
            return Err(TransportError::ConnAlreadyExists);
        }
        update_status_with_retry(self.discovery.as_ref(), self.entry_id, true).await?;
        state.conn = Some(new_conn);
        state.is_up = true;
        drop(state);
        self.conn_ready.notify_one();
        Ok(())
    }

    /// Under the conn mutex: close and drop the conn, emit `is_up:false`.
    async fn clear_conn(&self) {
        let mut state = self.conn_state.lock().await;
        if state.conn.take().is_some() {
            state.is_up = false;
            drop(state);
            if let Err(e) = update_status_with_retry(self.discovery.as_ref(), self.entry_id, false).await {
                tracing::debug!(error = %e, "failed to mark transport down");
            }
        }
    }

    async fn dial(&self) -> Result<(), TransportError> {
        if self.done.is_cancelled() {
            return Err(TransportError::NotServing);
        }
        {
            let state = self.conn_state.lock().await;
            if state.conn.is_some() {
                return Ok(());
            }
        }

        let raw = self.dialer.dial(self.remote_pk, DMSG_TRANSPORT_PORT).await?;
        let mut buffered = crate::network::BufferedConn::new(raw);

        let local = Address {
            pk: self.local_pk,
            port: self.local_port,
        };
        let remote = Address {
            pk: self.remote_pk,
            port: DMSG_TRANSPORT_PORT,
        };
        handshake::initiate(&mut buffered, self.crypto.as_ref(), &self.local_sk, local, remote).await?;

        let entry = self.entry_snapshot().await;
        settlement::initiate(&mut buffered, &entry).await?;

        match self.set_if_conn_nil(Box::new(buffered)).await {
            Ok(()) => Ok(()),
            Err(TransportError::ConnAlreadyExists) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn accept(&self, conn: Box<dyn Conn>) -> Result<(), TransportError> {
        if self.done.is_cancelled() {
            return Err(TransportError::NotServing);
        }
        if conn.network() != self.link_type {
            return Err(TransportError::WrongNetwork {
                expected: self.link_type.clone(),
                actual: conn.network().to_string(),
            });
        }

        let mut buffered = crate::network::BufferedConn::new(conn);
        let expected_pk = self.remote_pk;
        handshake::respond(&mut buffered, self.crypto.as_ref(), move |f2| {
            if f2.src.pk == expected_pk {
                Ok(())
            } else {
                Err("unexpected initiator public key".to_string())
            }
        })
        .await?;

        let entry = self.entry_snapshot().await;
        settlement::respond(&mut buffered, &entry, self.discovery.as_ref()).await?;

        self.set_if_conn_nil(Box::new(buffered)).await
    }

    async fn write_packet(&self, pkt: RoutingPacket) -> Result<(), TransportError> {
        loop {
            if self.done.is_cancelled() {
                return Err(TransportError::NotServing);
            }
            self.dial().await?;

            let mut state = self.conn_state.lock().await;
            let conn = match state.conn.as_mut() {
                Some(conn) => conn,
                // A concurrent clear_conn() beat us to the lock after our
                // dial() just succeeded; redial and try again.
                None => continue,
            };
            match pkt.write(conn).await {
                Ok(()) => {
                    drop(state);
                    self.sent_bytes.fetch_add(pkt.len() as u64, Ordering::Relaxed);
                    self.log_updates.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Err(e) => {
                    state.conn = None;
                    state.is_up = false;
                    drop(state);
                    if let Err(de) =
                        update_status_with_retry(self.discovery.as_ref(), self.entry_id, false).await
                    {
                        tracing::debug!(error = %de, "failed to mark transport down after write error");
                    }
                    return Err(TransportError::Io(e.to_string()));
                }
            }
        }
    }

    /// `redial(ctx)`: succeeds iff still serving and the discovery probe
    /// succeeds; on a non-temporary probe error, self-closes.
    async fn redial(&self) {
        if self.done.is_cancelled() {
            return;
        }
        match self.discovery.get_transport_by_id(self.entry_id).await {
            Ok(_entry) => {
                if let Err(e) = self.dial().await {
                    tracing::debug!(error = %e, "redial attempt failed, will retry next tick");
                }
            }
            Err(e) if e.is_temporary() => {
                tracing::debug!(error = %e, "discovery probe temporarily failed, will retry");
            }
            Err(e) => {
                tracing::warn!(error = %e, "discovery probe failed permanently, self-closing");
                self.trigger_close().await;
            }
        }
    }

    async fn tick(&self) {
        let updates = self.log_updates.swap(0, Ordering::AcqRel);
        if updates > 0 {
            let entry = LogEntry {
                sent_bytes: self.sent_bytes.load(Ordering::Relaxed),
                recv_bytes: self.recv_bytes.load(Ordering::Relaxed),
            };
            if let Err(e) = self.log_store.record(self.entry_id, entry).await {
                tracing::warn!(error = %e, "failed to record transport log entry");
            }
            return;
        }
        let has_conn = self.conn_state.lock().await.conn.is_some();
        if !has_conn {
            self.redial().await;
        }
    }

    /// Cancel `done`, shut down any held conn so the peer also observes
    /// EOF, and emit the final `is_up:false` update — exactly once
    /// regardless of how many callers race to trigger it.
    async fn trigger_close(&self) {
        self.close_once
            .get_or_init(|| async {
                self.done.cancel();

                let conn = {
                    let mut state = self.conn_state.lock().await;
                    state.is_up = false;
                    state.conn.take()
                };
                if let Some(mut conn) = conn {
                    if let Err(e) = conn.shutdown().await {
                        tracing::debug!(error = %e, "error shutting down conn during close");
                    }
                }

                if let Err(e) =
                    update_status_with_retry(self.discovery.as_ref(), self.entry_id, false).await
                {
                    tracing::debug!(error = %e, "final is_up:false update failed");
                }
            })
            .await;
    }
}

async fn read_loop(inner: Arc<Inner>, queue: mpsc::Sender<RoutingPacket>) {
    loop {
        if inner.done.is_cancelled() {
            return;
        }

        loop {
            if inner.done.is_cancelled() {
                return;
            }
            if inner.conn_state.lock().await.conn.is_some() {
                break;
            }
            let notified = inner.conn_ready.notified();
            tokio::pin!(notified);
            tokio::select! {
                _ = &mut notified => {}
                _ = inner.done.cancelled() => return,
            }
        }

        let outcome = {
            let mut state = inner.conn_state.lock().await;
            match state.conn.as_mut() {
                Some(conn) => {
                    tokio::select! {
                        r = RoutingPacket::read(conn) => Some(r),
                        _ = inner.done.cancelled() => None,
                    }
                }
                None => continue,
            }
        };
        let result = match outcome {
            Some(r) => r,
            // `done` fired while parked on a read with no packet in
            // flight; the peer may never send again, so don't wait for it.
            None => return,
        };

        match result {
            Ok(pkt) => {
                inner.recv_bytes.fetch_add(pkt.len() as u64, Ordering::Relaxed);
                inner.log_updates.fetch_add(1, Ordering::Relaxed);
                if inner.done.is_cancelled() {
                    return;
                }
                if queue.send(pkt).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "read failed, clearing conn");
                inner.clear_conn().await;
            }
        }
    }
}

/// A long-lived, authenticated, redialing channel to one peer over one
/// link type.
#[derive(Clone)]
pub struct ManagedTransport {
    inner: Arc<Inner>,
}

impl ManagedTransport {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dialer: Box<dyn Dialer>,
        discovery: Box<dyn DiscoveryClient>,
        log_store: Box<dyn LogStore>,
        crypto: Box<dyn Crypto>,
        local_pk: PublicKey,
        local_sk: SecretKey,
        local_port: u16,
        remote_pk: PublicKey,
        link_type: impl Into<String>,
    ) -> Self {
        let link_type = link_type.into();
        let edges = Edges::canonical(local_pk, remote_pk);
        let entry_id = transport_id::derive(&edges, &link_type);
        let span = tracing::info_span!("transport", peer = %hex::encode(&remote_pk.as_bytes()[..8]), link_type = %link_type);
        let (serve_exited_tx, serve_exited_rx) = watch::channel(false);

        let inner = Arc::new(Inner {
            remote_pk,
            local_pk,
            local_sk,
            local_port,
            link_type,
            entry_id,
            edges,
            crypto,
            dialer,
            discovery,
            log_store,
            conn_state: Mutex::new(ConnState {
                conn: None,
                is_up: false,
            }),
            conn_ready: Notify::new(),
            done: CancellationToken::new(),
            sent_bytes: AtomicU64::new(0),
            recv_bytes: AtomicU64::new(0),
            log_updates: AtomicU32::new(0),
            serve_started: AtomicBool::new(false),
            close_once: OnceCell::new(),
            serve_exited_tx,
            serve_exited_rx,
            redial_interval: DEFAULT_REDIAL_INTERVAL,
            span,
        });

        Self { inner }
    }

    pub fn remote(&self) -> PublicKey {
        self.inner.remote_pk
    }

    pub fn link_type(&self) -> &str {
        &self.inner.link_type
    }

    pub fn id(&self) -> TransportId {
        self.inner.entry_id
    }

    pub async fn stats(&self) -> TransportStats {
        let state = self.inner.conn_state.lock().await;
        TransportStats {
            is_up: state.is_up,
            has_conn: state.conn.is_some(),
            log_entry: LogEntry {
                sent_bytes: self.inner.sent_bytes.load(Ordering::Relaxed),
                recv_bytes: self.inner.recv_bytes.load(Ordering::Relaxed),
            },
        }
    }

    /// Runs until `close()` or `stop` fires. Spawns the read task and
    /// then becomes the redial/log-flush loop itself. Blocks the caller.
    pub async fn serve(&self, router_queue: mpsc::Sender<RoutingPacket>, stop: CancellationToken) {
        if self.inner.serve_started.swap(true, Ordering::SeqCst) {
            tracing::warn!(parent: &self.inner.span, "serve() called more than once; ignoring");
            return;
        }
        let _entered = self.inner.span.clone().entered();

        let read_inner = Arc::clone(&self.inner);
        let read_task = tokio::spawn(async move { read_loop(read_inner, router_queue).await });

        let mut ticker = tokio::time::interval(self.inner.redial_interval);
        loop {
            tokio::select! {
                _ = self.inner.done.cancelled() => break,
                _ = stop.cancelled() => {
                    self.inner.trigger_close().await;
                    break;
                }
                _ = ticker.tick() => {
                    self.inner.tick().await;
                }
            }
        }

        let _ = read_task.await;
        let _ = self.inner.serve_exited_tx.send(true);
    }

    pub async fn accept(&self, conn: Box<dyn Conn>) -> Result<(), TransportError> {
        self.inner.accept(conn).await
    }

    pub async fn dial(&self) -> Result<(), TransportError> {
        self.inner.dial().await
    }

    pub async fn write_packet(&self, pkt: RoutingPacket) -> Result<(), TransportError> {
        self.inner.write_packet(pkt).await
    }

    /// Idempotent. Waits for `serve()` (if it ever ran) to exit, then
    /// returns; the final `is_up:false` update has already been emitted.
    pub async fn close(&self) {
        self.inner.trigger_close().await;
        if self.inner.serve_started.load(Ordering::SeqCst) {
            let mut rx = self.inner.serve_exited_rx.clone();
            let _ = rx.wait_for(|done| *done).await;
        }
    }
}
