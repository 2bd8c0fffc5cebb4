//! Opaque signing contract used by the handshake and settlement layers.
//!
//! Neither layer touches a concrete signature scheme directly; they go
//! through [`Crypto`], the same seam `terrain-gossip-net::crypto::KeyPair`
//! draws around ed25519-dalek in the teacher crate.

use crate::error::{Error, Result};
use crate::types::{PublicKey, SecretKey, Signature};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;

/// Sign/verify operations over the protocol's opaque key types.
pub trait Crypto: Send + Sync {
    /// Sign `msg` with `sk`.
    fn sign(&self, sk: &SecretKey, msg: &[u8]) -> Result<Signature>;

    /// Verify `sig` over `msg` was produced by `pk`.
    fn verify(&self, pk: &PublicKey, msg: &[u8], sig: &Signature) -> Result<()>;

    /// Recover the public key a signature was produced with, without
    /// being told it up front.
    ///
    /// Not every scheme supports this (ed25519 doesn't); implementations
    /// that can't must return [`Error::Unsupported`] rather than guess.
    fn pk_from_sig(&self, msg: &[u8], sig: &Signature) -> Result<PublicKey>;

    /// Derive the public key matching a secret key.
    fn derive_pk(&self, sk: &SecretKey) -> PublicKey;
}

/// [`Crypto`] backed by ed25519-dalek, the teacher crate's own choice.
#[derive(Debug, Default, Clone, Copy)]
pub struct Ed25519Crypto;

impl Ed25519Crypto {
    pub fn new() -> Self {
        Self
    }

    /// Generate a fresh keypair, for tests and the demonstration binary.
    pub fn generate() -> (PublicKey, SecretKey) {
        let signing_key = SigningKey::generate(&mut OsRng);
        let sk = SecretKey(signing_key.to_bytes());
        let pk = PublicKey(signing_key.verifying_key().to_bytes());
        (pk, sk)
    }
}

impl Crypto for Ed25519Crypto {
    fn sign(&self, sk: &SecretKey, msg: &[u8]) -> Result<Signature> {
        let signing_key = SigningKey::from_bytes(&sk.0);
        let sig = signing_key.sign(msg);
        Ok(Signature(sig.to_bytes()))
    }

    fn verify(&self, pk: &PublicKey, msg: &[u8], sig: &Signature) -> Result<()> {
        let verifying_key = VerifyingKey::from_bytes(&pk.0)
            .map_err(|e| Error::InvalidPublicKey(e.to_string()))?;
        let signature = ed25519_dalek::Signature::from_bytes(&sig.0);
        verifying_key
            .verify(msg, &signature)
            .map_err(|_| Error::VerificationFailed)
    }

    fn pk_from_sig(&self, _msg: &[u8], _sig: &Signature) -> Result<PublicKey> {
        // ed25519 signatures aren't recoverable the way the original
        // source's secp256k1 scheme was; that recovery was only ever
        // used there for debug logging, never to gate a handshake
        // outcome, so callers must already know the expected PK.
        Err(Error::Unsupported("pk_from_sig"))
    }

    fn derive_pk(&self, sk: &SecretKey) -> PublicKey {
        let signing_key = SigningKey::from_bytes(&sk.0);
        PublicKey(signing_key.verifying_key().to_bytes())
    }
}

/// Domain-separated BLAKE3 derivation of a [`crate::types::TransportId`]
/// from a canonical edge pair and link type.
pub mod transport_id {
    use crate::types::{Edges, TransportId};

    const DOMAIN_TRANSPORT_ID: &[u8] = b"overlay.transport_id.v1";

    pub fn derive(edges: &Edges, link_type: &str) -> TransportId {
        let mut hasher = blake3::Hasher::new();
        hasher.update(DOMAIN_TRANSPORT_ID);
        hasher.update(edges.pk_low.as_bytes());
        hasher.update(edges.pk_high.as_bytes());
        hasher.update(link_type.as_bytes());
        TransportId(*hasher.finalize().as_bytes())
    }
}
