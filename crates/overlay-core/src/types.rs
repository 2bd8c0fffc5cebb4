//! Core data model for the managed transport protocol.
//!
//! Field order matters: these types are JSON-encoded for handshake
//! signing, so declaration order is the canonical wire order (see
//! [`crate::canonical`]).

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A node's long-lived public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(pub [u8; 32]);

impl PublicKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(&self.0[..8]))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl PartialOrd for PublicKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PublicKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

/// A node's long-lived secret key. Never (de)serialized onto the wire.
#[derive(Clone)]
pub struct SecretKey(pub [u8; 32]);

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey(..)")
    }
}

/// A 64-byte signature, opaque to everything but the [`crate::crypto::Crypto`] impl.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(#[serde(with = "hex_sig")] pub [u8; 64]);

impl Signature {
    pub const ZERO: Signature = Signature([0u8; 64]);

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 64]
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({})", hex::encode(&self.0[..8]))
    }
}

mod hex_sig {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 64], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[u8; 64], D::Error> {
        let s = String::deserialize(d)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("signature must be 64 bytes"))
    }
}

/// A node endpoint: public key plus the port it listens on for a given link type.
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    #[serde(rename = "PK")]
    pub pk: PublicKey,
    #[serde(rename = "Port")]
    pub port: u16,
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.pk, self.port)
    }
}

/// The canonicalised unordered pair of peer public keys identifying a transport.
///
/// `pk_low <= pk_high` by byte comparison, regardless of dial direction.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct Edges {
    pub pk_low: PublicKey,
    pub pk_high: PublicKey,
}

impl Edges {
    /// Build the canonical edge pair from two endpoints, in either order.
    pub fn canonical(a: PublicKey, b: PublicKey) -> Self {
        if a <= b {
            Edges { pk_low: a, pk_high: b }
        } else {
            Edges { pk_low: b, pk_high: a }
        }
    }

    pub fn contains(&self, pk: PublicKey) -> bool {
        self.pk_low == pk || self.pk_high == pk
    }
}

/// Deterministic transport identifier, derived from [`Edges`] + link type.
///
/// Same unordered edge pair + same link type ⇒ same id, regardless of
/// which peer dialed.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransportId(pub [u8; 32]);

impl fmt::Debug for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransportId({})", hex::encode(&self.0[..8]))
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// A transport's registration record, as held by the discovery service
/// and locally cached by the managed transport.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportEntry {
    pub id: TransportId,
    pub edges: Edges,
    pub link_type: String,
    pub is_up: bool,
}

impl TransportEntry {
    pub fn new(id: TransportId, edges: Edges, link_type: impl Into<String>, is_up: bool) -> Self {
        Self {
            id,
            edges,
            link_type: link_type.into(),
            is_up,
        }
    }
}

/// Monotonic per-transport byte counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub sent_bytes: u64,
    pub recv_bytes: u64,
}

impl LogEntry {
    pub fn add_sent(&mut self, n: u64) {
        self.sent_bytes += n;
    }

    pub fn add_recv(&mut self, n: u64) {
        self.recv_bytes += n;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pk(b: u8) -> PublicKey {
        PublicKey([b; 32])
    }

    #[test]
    fn edges_canonical_is_order_independent() {
        let a = pk(1);
        let b = pk(2);
        assert_eq!(Edges::canonical(a, b), Edges::canonical(b, a));
        assert_eq!(Edges::canonical(a, b).pk_low, a);
        assert_eq!(Edges::canonical(a, b).pk_high, b);
    }

    #[test]
    fn log_entry_accumulates() {
        let mut log = LogEntry::default();
        log.add_sent(10);
        log.add_sent(5);
        log.add_recv(3);
        assert_eq!(log.sent_bytes, 15);
        assert_eq!(log.recv_bytes, 3);
    }
}
