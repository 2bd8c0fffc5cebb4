//! Byte-counter persistence, consumed by the managed transport's
//! periodic flush tick.

use async_trait::async_trait;
use overlay_core::{LogEntry, TransportId};

#[derive(Debug, thiserror::Error)]
pub enum LogStoreError {
    #[error("log store io error: {0}")]
    Io(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Byte-counter persistence, consumed by the managed transport.
#[async_trait]
pub trait LogStore: Send + Sync {
    async fn record(&self, id: TransportId, entry: LogEntry) -> Result<(), LogStoreError>;
}

/// `sled`-backed [`LogStore`], one key per transport id.
pub struct SledLogStore {
    tree: sled::Tree,
}

impl SledLogStore {
    pub fn new(db: &sled::Db) -> Result<Self, LogStoreError> {
        let tree = db
            .open_tree("transport_log")
            .map_err(|e| LogStoreError::Io(e.to_string()))?;
        Ok(Self { tree })
    }

    pub fn get(&self, id: TransportId) -> Result<Option<LogEntry>, LogStoreError> {
        let raw = self
            .tree
            .get(id.0)
            .map_err(|e| LogStoreError::Io(e.to_string()))?;
        match raw {
            Some(bytes) => {
                let entry = serde_json::from_slice(&bytes)
                    .map_err(|e| LogStoreError::Serialization(e.to_string()))?;
                Ok(Some(entry))
            }
            None => Ok(None),
        }
    }
}

#[async_trait]
impl LogStore for SledLogStore {
    async fn record(&self, id: TransportId, entry: LogEntry) -> Result<(), LogStoreError> {
        let bytes =
            serde_json::to_vec(&entry).map_err(|e| LogStoreError::Serialization(e.to_string()))?;
        self.tree
            .insert(id.0, bytes)
            .map_err(|e| LogStoreError::Io(e.to_string()))?;
        self.tree.flush_async().await.map_err(|e| LogStoreError::Io(e.to_string()))?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use overlay_core::{Edges, PublicKey};

    #[tokio::test]
    async fn sled_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let store = SledLogStore::new(&db).unwrap();
        let edges = Edges::canonical(PublicKey([1u8; 32]), PublicKey([2u8; 32]));
        let id = overlay_core::crypto::transport_id::derive(&edges, "stcp");
        let entry = LogEntry {
            sent_bytes: 10,
            recv_bytes: 20,
        };
        store.record(id, entry).await.unwrap();
        assert_eq!(store.get(id).unwrap(), entry);
    }
}
