//! Peer handshake: the four-frame nonce-challenge exchange that
//! authenticates both ends of an underlying connection by public key.
//!
//! No retries at this layer; callers that want another attempt re-dial.

use crate::framing::{
    read_frame0, read_json_frame, write_frame0, write_json_frame, Frame1, Frame2, Frame3,
    FramingError,
};
use overlay_core::canonical::canonical_bytes;
use overlay_core::{Address, Crypto, SecretKey, Signature};
use rand::RngCore;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite};
use tokio::time::timeout;

/// Bounds the whole four-frame exchange, both roles.
pub const HANDSHAKE_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),
    #[error("crypto error: {0}")]
    Crypto(#[from] overlay_core::Error),
    #[error("bad opening token")]
    BadToken,
    #[error("unexpected nonce")]
    UnexpectedNonce,
    #[error("signature verification failed")]
    BadSignature,
    #[error("rejected by peer: {0}")]
    RejectedByPeer(String),
    #[error("rejected by local check: {0}")]
    RejectedByCheck(String),
    #[error("handshake timed out")]
    Timeout,
}

/// Run the initiator side of the handshake over an already-buffered
/// stream. `local`/`remote` name the two endpoints; `sk` must correspond
/// to `local.pk`.
///
/// Takes `&mut S` rather than an owned stream: the caller's buffered
/// reader must survive past the handshake so bytes the peer pipelines
/// right after `Frame3` (the start of settlement, or packet data) aren't
/// stranded in a buffer that gets dropped.
pub async fn initiate<S>(
    stream: &mut S,
    crypto: &dyn Crypto,
    sk: &SecretKey,
    local: Address,
    remote: Address,
) -> Result<(Address, Address), HandshakeError>
where
    S: AsyncRead + AsyncBufRead + AsyncWrite + Unpin + Send,
{
    match timeout(HANDSHAKE_DEADLINE, initiate_inner(stream, crypto, sk, local, remote)).await {
        Ok(result) => result,
        Err(_) => Err(HandshakeError::Timeout),
    }
}

async fn initiate_inner<S>(
    stream: &mut S,
    crypto: &dyn Crypto,
    sk: &SecretKey,
    local: Address,
    remote: Address,
) -> Result<(Address, Address), HandshakeError>
where
    S: AsyncRead + AsyncBufRead + AsyncWrite + Unpin + Send,
{
    write_frame0(stream).await?;
    let frame1: Frame1 = read_json_frame(stream).await?;

    let mut frame2 = Frame2 {
        src: local,
        dst: remote,
        nonce: frame1.nonce,
        sig: Signature::ZERO,
    };
    let signed_bytes = canonical_bytes(&frame2.with_zero_sig())?;
    frame2.sig = crypto.sign(sk, &signed_bytes)?;
    write_json_frame(stream, &frame2).await?;

    let frame3: Frame3 = read_json_frame(stream).await?;
    if !frame3.ok {
        return Err(HandshakeError::RejectedByPeer(frame3.err_msg));
    }
    Ok((local, remote))
}

/// Run the responder side of the handshake. `check` validates the
/// initiator's claimed addresses/identity beyond signature verification
/// (e.g. that `src.pk` is an expected or allow-listed peer).
pub async fn respond<S, F>(
    stream: &mut S,
    crypto: &dyn Crypto,
    mut check: F,
) -> Result<(Address, Address), HandshakeError>
where
    S: AsyncRead + AsyncBufRead + AsyncWrite + Unpin + Send,
    F: FnMut(&Frame2) -> Result<(), String> + Send,
{
    match timeout(HANDSHAKE_DEADLINE, respond_inner(stream, crypto, &mut check)).await {
        Ok(result) => result,
        Err(_) => Err(HandshakeError::Timeout),
    }
}

async fn respond_inner<S, F>(
    stream: &mut S,
    crypto: &dyn Crypto,
    check: &mut F,
) -> Result<(Address, Address), HandshakeError>
where
    S: AsyncRead + AsyncBufRead + AsyncWrite + Unpin + Send,
    F: FnMut(&Frame2) -> Result<(), String>,
{
    if !read_frame0(stream).await? {
        return Err(HandshakeError::BadToken);
    }

    let mut nonce = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    write_json_frame(stream, &Frame1 { nonce }).await?;

    let frame2: Frame2 = read_json_frame(stream).await?;

    if let Err(err) = verify_frame2(crypto, &frame2, nonce) {
        let _ = write_json_frame(stream, &Frame3::err(err.to_string())).await;
        return Err(err);
    }

    if let Err(msg) = check(&frame2) {
        let _ = write_json_frame(stream, &Frame3::err(msg.clone())).await;
        return Err(HandshakeError::RejectedByCheck(msg));
    }

    write_json_frame(stream, &Frame3::ok()).await?;
    Ok((frame2.dst, frame2.src))
}

fn verify_frame2(crypto: &dyn Crypto, frame2: &Frame2, expected_nonce: [u8; 16]) -> Result<(), HandshakeError> {
    if frame2.nonce != expected_nonce {
        return Err(HandshakeError::UnexpectedNonce);
    }
    let signed_bytes = canonical_bytes(&frame2.with_zero_sig())?;
    crypto
        .verify(&frame2.src.pk, &signed_bytes, &frame2.sig)
        .map_err(|_| HandshakeError::BadSignature)
}

#[cfg(test)]
mod tests {
    use super::*;
    use overlay_core::{Ed25519Crypto, PublicKey};
    use tokio::io::BufStream;

    fn addr(pk: PublicKey, port: u16) -> Address {
        Address { pk, port }
    }

    #[tokio::test]
    async fn happy_path_authenticates_both_sides() {
        let crypto = Ed25519Crypto::new();
        let (a_pk, a_sk) = Ed25519Crypto::generate();
        let (b_pk, _b_sk) = Ed25519Crypto::generate();
        let (client, server) = tokio::io::duplex(4096);

        let local = addr(a_pk, 1);
        let remote = addr(b_pk, 2);

        let initiator = tokio::spawn(async move {
            let mut client = BufStream::new(client);
            initiate(&mut client, &Ed25519Crypto::new(), &a_sk, local, remote).await
        });
        let responder = tokio::spawn(async move {
            let mut server = BufStream::new(server);
            respond(&mut server, &crypto, |f2| {
                if f2.src.pk == a_pk {
                    Ok(())
                } else {
                    Err("unexpected initiator".to_string())
                }
            })
            .await
        });

        let (client_result, server_result) = tokio::join!(initiator, responder);
        assert!(client_result.unwrap().is_ok());
        let (dst, src) = server_result.unwrap().unwrap();
        assert_eq!(dst, local);
        assert_eq!(src, remote);
    }

    #[tokio::test]
    async fn tampered_nonce_is_rejected() {
        let crypto = Ed25519Crypto::new();
        let (a_pk, a_sk) = Ed25519Crypto::generate();
        let (b_pk, _b_sk) = Ed25519Crypto::generate();
        let (client, server) = tokio::io::duplex(4096);

        let local = addr(a_pk, 1);
        let remote = addr(b_pk, 2);

        let initiator = tokio::spawn(async move {
            let mut stream = BufStream::new(client);
            write_frame0(&mut stream).await.unwrap();
            let frame1: Frame1 = read_json_frame(&mut stream).await.unwrap();
            let mut tampered = frame1.nonce;
            tampered[0] ^= 0xFF;
            let mut frame2 = Frame2 {
                src: local,
                dst: remote,
                nonce: tampered,
                sig: Signature::ZERO,
            };
            let bytes = canonical_bytes(&frame2.with_zero_sig()).unwrap();
            frame2.sig = Ed25519Crypto::new().sign(&a_sk, &bytes).unwrap();
            write_json_frame(&mut stream, &frame2).await.unwrap();
            let frame3: Frame3 = read_json_frame(&mut stream).await.unwrap();
            frame3
        });
        let responder = tokio::spawn(async move {
            let mut server = BufStream::new(server);
            respond(&mut server, &crypto, |_| Ok(())).await
        });

        let (frame3, responder_result) = tokio::join!(initiator, responder);
        assert!(!frame3.unwrap().ok);
        assert!(matches!(
            responder_result.unwrap(),
            Err(HandshakeError::UnexpectedNonce)
        ));
    }

    #[tokio::test]
    async fn bad_opening_token_is_rejected() {
        let crypto = Ed25519Crypto::new();
        let (mut client, server) = tokio::io::duplex(64);
        use tokio::io::AsyncWriteExt;
        tokio::spawn(async move {
            client.write_all(b"hello").await.unwrap();
        });
        let mut server = BufStream::new(server);
        let result = respond(&mut server, &crypto, |_| Ok(())).await;
        assert!(matches!(result, Err(HandshakeError::BadToken) | Err(HandshakeError::Framing(_))));
    }
}
