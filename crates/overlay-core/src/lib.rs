//! Identity, entry, and canonical-encoding primitives shared by the
//! overlay managed-transport protocol.

pub mod canonical;
pub mod crypto;
pub mod error;
pub mod types;

pub use crypto::{Crypto, Ed25519Crypto};
pub use error::{Error, Result};
pub use types::{Address, Edges, LogEntry, PublicKey, SecretKey, Signature, TransportEntry, TransportId};
