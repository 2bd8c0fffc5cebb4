//! Routing packet wire layout, consumed by the managed transport without
//! modification: a fixed header whose last field is a payload length,
//! followed by exactly that many payload bytes.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size in bytes of a packet header: a 2-byte big-endian payload length.
pub const PACKET_HEADER_SIZE: usize = 2;

/// Largest payload a single packet may carry.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// A single routed packet, fed to/from the upstream router queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutingPacket {
    pub payload: Vec<u8>,
}

impl RoutingPacket {
    pub fn new(payload: Vec<u8>) -> Self {
        Self { payload }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Read one header + payload from `conn`.
    pub async fn read<R: AsyncRead + Unpin>(conn: &mut R) -> std::io::Result<Self> {
        let mut header = [0u8; PACKET_HEADER_SIZE];
        conn.read_exact(&mut header).await?;
        let len = u16::from_be_bytes(header) as usize;
        let mut payload = vec![0u8; len];
        conn.read_exact(&mut payload).await?;
        Ok(Self { payload })
    }

    /// Write header + payload to `conn` as a single logical write.
    pub async fn write<W: AsyncWrite + Unpin>(&self, conn: &mut W) -> std::io::Result<()> {
        if self.payload.len() > MAX_PAYLOAD_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "packet payload exceeds u16 length field",
            ));
        }
        let header = (self.payload.len() as u16).to_be_bytes();
        conn.write_all(&header).await?;
        conn.write_all(&self.payload).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_through_duplex() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let pkt = RoutingPacket::new(b"hello world".to_vec());
        pkt.write(&mut a).await.unwrap();
        let got = RoutingPacket::read(&mut b).await.unwrap();
        assert_eq!(got, pkt);
    }

    #[tokio::test]
    async fn rejects_oversized_payload() {
        let (mut a, _b) = tokio::io::duplex(64);
        let pkt = RoutingPacket::new(vec![0u8; MAX_PAYLOAD_LEN + 1]);
        assert!(pkt.write(&mut a).await.is_err());
    }
}
