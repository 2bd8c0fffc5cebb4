//! Settlement handshake: the post-link exchange that confirms both
//! peers agree on the transport's identity and registers it as up with
//! discovery.
//!
//! Frame shapes are this implementation's own choice — the retained
//! source only kept the two call sites, not the frame bodies — but the
//! contract matches exactly: both edges, the link type, agreement on
//! `TransportID`, and a final accept/reject signal, with the accepting
//! side updating discovery before replying ok.

use crate::discovery::{update_status_with_retry, DiscoveryClient, DiscoveryError};
use crate::framing::{read_json_frame, write_json_frame, FramingError};
use overlay_core::TransportEntry;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite};
use tokio::time::timeout;

/// Bounds the whole settlement exchange.
pub const SETTLEMENT_DEADLINE: Duration = Duration::from_secs(20);

#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),
    #[error("transport entry mismatch: {0}")]
    EntryMismatch(String),
    #[error("rejected by peer: {0}")]
    RejectedByPeer(String),
    #[error("discovery update failed: {0}")]
    Discovery(#[from] DiscoveryError),
    #[error("settlement handshake timed out")]
    Timeout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SettlementRequest {
    entry: TransportEntry,
    initiator: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SettlementResponse {
    ok: bool,
    err_msg: String,
}

impl SettlementResponse {
    fn ok() -> Self {
        Self {
            ok: true,
            err_msg: String::new(),
        }
    }

    fn err(msg: impl Into<String>) -> Self {
        Self {
            ok: false,
            err_msg: msg.into(),
        }
    }
}

/// Dialer side: propose `entry` and wait for the acceptor's decision.
///
/// Takes `&mut S` over an already-buffered stream for the same reason
/// as the peer handshake: packet data the peer sends right after its
/// `SettlementResponse` must not be lost in a buffer we then drop.
pub async fn initiate<S>(stream: &mut S, entry: &TransportEntry) -> Result<(), SettlementError>
where
    S: AsyncRead + AsyncBufRead + AsyncWrite + Unpin + Send,
{
    match timeout(SETTLEMENT_DEADLINE, initiate_inner(stream, entry)).await {
        Ok(result) => result,
        Err(_) => Err(SettlementError::Timeout),
    }
}

async fn initiate_inner<S>(stream: &mut S, entry: &TransportEntry) -> Result<(), SettlementError>
where
    S: AsyncRead + AsyncBufRead + AsyncWrite + Unpin + Send,
{
    let req = SettlementRequest {
        entry: entry.clone(),
        initiator: true,
    };
    write_json_frame(stream, &req).await?;
    let resp: SettlementResponse = read_json_frame(stream).await?;
    if !resp.ok {
        return Err(SettlementError::RejectedByPeer(resp.err_msg));
    }
    Ok(())
}

/// Acceptor side: validate the proposed entry against `expected`, and
/// if it matches, register `is_up:true` with discovery before replying.
pub async fn respond<S>(
    stream: &mut S,
    expected: &TransportEntry,
    discovery: &dyn DiscoveryClient,
) -> Result<(), SettlementError>
where
    S: AsyncRead + AsyncBufRead + AsyncWrite + Unpin + Send,
{
    match timeout(SETTLEMENT_DEADLINE, respond_inner(stream, expected, discovery)).await {
        Ok(result) => result,
        Err(_) => Err(SettlementError::Timeout),
    }
}

async fn respond_inner<S>(
    stream: &mut S,
    expected: &TransportEntry,
    discovery: &dyn DiscoveryClient,
) -> Result<(), SettlementError>
where
    S: AsyncRead + AsyncBufRead + AsyncWrite + Unpin + Send,
{
    let req: SettlementRequest = read_json_frame(stream).await?;

    if req.entry.id != expected.id
        || req.entry.edges != expected.edges
        || req.entry.link_type != expected.link_type
    {
        let msg = "transport entry mismatch".to_string();
        let _ = write_json_frame(stream, &SettlementResponse::err(msg.clone())).await;
        return Err(SettlementError::EntryMismatch(msg));
    }

    if let Err(e) = update_status_with_retry(discovery, expected.id, true).await {
        let _ = write_json_frame(stream, &SettlementResponse::err(e.to_string())).await;
        return Err(SettlementError::Discovery(e));
    }

    write_json_frame(stream, &SettlementResponse::ok()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::test_support::MockDiscovery;
    use overlay_core::{crypto::transport_id, Edges, PublicKey};
    use tokio::io::BufStream;

    fn entry() -> TransportEntry {
        let edges = Edges::canonical(PublicKey([1u8; 32]), PublicKey([2u8; 32]));
        let id = transport_id::derive(&edges, "stcp");
        TransportEntry::new(id, edges, "stcp", false)
    }

    #[tokio::test]
    async fn agreeing_entries_settle_and_mark_up() {
        let e = entry();
        let discovery = MockDiscovery::new(e.clone());
        let (client, server) = tokio::io::duplex(4096);

        let e1 = e.clone();
        let dialer = tokio::spawn(async move {
            let mut client = BufStream::new(client);
            initiate(&mut client, &e1).await
        });
        let e2 = e.clone();
        let acceptor = tokio::spawn(async move {
            let mut server = BufStream::new(server);
            respond(&mut server, &e2, &discovery).await
        });

        let (d, a) = tokio::join!(dialer, acceptor);
        d.unwrap().unwrap();
        a.unwrap().unwrap();
    }

    #[tokio::test]
    async fn mismatched_entry_is_rejected() {
        let e = entry();
        let mut other = e.clone();
        other.link_type = "stcpr".to_string();
        let discovery = MockDiscovery::new(e.clone());
        let (client, server) = tokio::io::duplex(4096);

        let dialer = tokio::spawn(async move {
            let mut client = BufStream::new(client);
            initiate(&mut client, &other).await
        });
        let acceptor = tokio::spawn(async move {
            let mut server = BufStream::new(server);
            respond(&mut server, &e, &discovery).await
        });

        let (d, a) = tokio::join!(dialer, acceptor);
        assert!(matches!(d.unwrap(), Err(SettlementError::RejectedByPeer(_))));
        assert!(matches!(a.unwrap(), Err(SettlementError::EntryMismatch(_))));
    }
}
