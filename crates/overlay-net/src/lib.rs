//! Frame codec, handshakes, and the managed transport built on top of them.

pub mod discovery;
pub mod framing;
pub mod handshake;
pub mod logstore;
pub mod network;
pub mod packet;
pub mod settlement;
pub mod transport;

pub use discovery::{DiscoveryClient, DiscoveryError, StatusUpdate};
pub use logstore::{LogStore, LogStoreError, SledLogStore};
pub use network::{Conn, DialError, Dialer};
pub use packet::RoutingPacket;
pub use transport::{ManagedTransport, TransportError, TransportStats, DMSG_TRANSPORT_PORT};
