//! Demonstration server: wires up a managed transport pair in-process,
//! exchanges a packet, and tears both ends down cleanly.

use crate::config::Config;
use crate::loopback::{LoopbackConn, LoopbackDialer, LoopbackDiscovery};
use overlay_core::crypto::transport_id;
use overlay_core::{Edges, Ed25519Crypto, TransportEntry};
use overlay_net::{ManagedTransport, RoutingPacket, SledLogStore, DMSG_TRANSPORT_PORT};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("transport error: {0}")]
    Transport(String),
}

/// Runs the full demonstration: generates two keypairs, registers a
/// transport entry for their canonical edge pair, dials and accepts
/// concurrently, exchanges one packet each way, then closes both ends.
pub struct Server {
    config: Config,
}

impl Server {
    pub fn new(config: Config) -> Result<Self, ServerError> {
        Ok(Self { config })
    }

    pub async fn run(&self) -> Result<(), ServerError> {
        let db = sled::open(&self.config.data_dir).map_err(|e| ServerError::Storage(e.to_string()))?;
        let log_store = Arc::new(SledLogStore::new(&db).map_err(|e| ServerError::Storage(e.to_string()))?);

        let (a_pk, a_sk) = Ed25519Crypto::generate();
        let (b_pk, b_sk) = Ed25519Crypto::generate();
        let edges = Edges::canonical(a_pk, b_pk);
        let id = transport_id::derive(&edges, &self.config.link_type);
        let entry = TransportEntry::new(id, edges, self.config.link_type.clone(), false);

        info!(%id, link_type = %self.config.link_type, "registering transport entry");

        let discovery = Arc::new(LoopbackDiscovery::new());
        discovery.register(entry);

        let dialer_a = Arc::new(LoopbackDialer::new(self.config.link_type.clone()));
        let (client_side, server_side) = tokio::io::duplex(64 * 1024);
        dialer_a.register(b_pk, DMSG_TRANSPORT_PORT, client_side);

        let transport_a = ManagedTransport::new(
            Box::new(ArcDialer(dialer_a)),
            Box::new(ArcDiscovery(discovery.clone())),
            Box::new(ArcLogStore(log_store.clone())),
            Box::new(Ed25519Crypto::new()),
            a_pk,
            a_sk,
            DMSG_TRANSPORT_PORT,
            b_pk,
            self.config.link_type.clone(),
        );
        let transport_b = ManagedTransport::new(
            Box::new(NoDialer),
            Box::new(ArcDiscovery(discovery.clone())),
            Box::new(ArcLogStore(log_store.clone())),
            Box::new(Ed25519Crypto::new()),
            b_pk,
            b_sk,
            DMSG_TRANSPORT_PORT,
            a_pk,
            self.config.link_type.clone(),
        );

        let inbound: Box<dyn overlay_net::Conn> =
            Box::new(LoopbackConn::new(server_side, self.config.link_type.clone()));

        let (dial_result, accept_result) =
            tokio::join!(transport_a.dial(), transport_b.accept(inbound));
        dial_result.map_err(|e| ServerError::Transport(e.to_string()))?;
        accept_result.map_err(|e| ServerError::Transport(e.to_string()))?;
        info!("peer and settlement handshakes complete on both ends");

        let (queue_a_tx, mut queue_a_rx) = mpsc::channel(16);
        let (queue_b_tx, mut queue_b_rx) = mpsc::channel(16);
        let stop_a = CancellationToken::new();
        let stop_b = CancellationToken::new();

        let serve_a = {
            let transport_a = transport_a.clone();
            let stop_a = stop_a.clone();
            tokio::spawn(async move { transport_a.serve(queue_a_tx, stop_a).await })
        };
        let serve_b = {
            let transport_b = transport_b.clone();
            let stop_b = stop_b.clone();
            tokio::spawn(async move { transport_b.serve(queue_b_tx, stop_b).await })
        };

        transport_a
            .write_packet(RoutingPacket::new(b"hello from a".to_vec()))
            .await
            .map_err(|e| ServerError::Transport(e.to_string()))?;
        transport_b
            .write_packet(RoutingPacket::new(b"hello from b".to_vec()))
            .await
            .map_err(|e| ServerError::Transport(e.to_string()))?;

        if let Some(pkt) = queue_b_rx.recv().await {
            info!(payload = %String::from_utf8_lossy(&pkt.payload), "b received packet");
        }
        if let Some(pkt) = queue_a_rx.recv().await {
            info!(payload = %String::from_utf8_lossy(&pkt.payload), "a received packet");
        }

        transport_a.close().await;
        transport_b.close().await;
        stop_a.cancel();
        stop_b.cancel();
        let _ = serve_a.await;
        let _ = serve_b.await;

        info!("demonstration transport pair closed");
        Ok(())
    }
}

/// A dialer that never succeeds: `transport_b` only ever receives its
/// conn via `accept`, so it never needs to dial out in this demo.
struct NoDialer;

#[async_trait::async_trait]
impl overlay_net::Dialer for NoDialer {
    async fn dial(
        &self,
        _remote_pk: overlay_core::PublicKey,
        _port: u16,
    ) -> Result<Box<dyn overlay_net::Conn>, overlay_net::DialError> {
        Err(overlay_net::DialError::Io("dialing disabled for this end of the demo".to_string()))
    }
}

struct ArcDialer(Arc<LoopbackDialer>);

#[async_trait::async_trait]
impl overlay_net::Dialer for ArcDialer {
    async fn dial(
        &self,
        remote_pk: overlay_core::PublicKey,
        port: u16,
    ) -> Result<Box<dyn overlay_net::Conn>, overlay_net::DialError> {
        self.0.dial(remote_pk, port).await
    }
}

struct ArcDiscovery(Arc<LoopbackDiscovery>);

#[async_trait::async_trait]
impl overlay_net::DiscoveryClient for ArcDiscovery {
    async fn get_transport_by_id(
        &self,
        id: overlay_core::TransportId,
    ) -> Result<TransportEntry, overlay_net::DiscoveryError> {
        self.0.get_transport_by_id(id).await
    }

    async fn update_statuses(
        &self,
        updates: &[overlay_net::StatusUpdate],
    ) -> Result<(), overlay_net::DiscoveryError> {
        self.0.update_statuses(updates).await
    }
}

struct ArcLogStore(Arc<SledLogStore>);

#[async_trait::async_trait]
impl overlay_net::LogStore for ArcLogStore {
    async fn record(
        &self,
        id: overlay_core::TransportId,
        entry: overlay_core::LogEntry,
    ) -> Result<(), overlay_net::LogStoreError> {
        self.0.record(id, entry).await
    }
}
