//! Discovery service client contract, consumed by the managed transport
//! to look up and update transport registration status.
//!
//! No discovery-service implementation lives here — only the client
//! trait and the retry helper shared by settlement and the transport's
//! own `set_if_conn_nil`/`clear_conn`.

use async_trait::async_trait;
use overlay_core::{TransportEntry, TransportId};

/// Number of attempts `update_statuses` is retried before its error is
/// surfaced to the caller.
pub const STATUS_UPDATE_RETRIES: u32 = 3;

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("transport entry not found: {0:?}")]
    NotFound(TransportId),
    #[error("temporary discovery error: {0}")]
    Temporary(String),
    #[error("permanent discovery error: {0}")]
    Permanent(String),
}

impl DiscoveryError {
    /// Temporary errors are retriable; permanent ones mean the caller
    /// should treat this as deregistration.
    pub fn is_temporary(&self) -> bool {
        matches!(self, DiscoveryError::Temporary(_))
    }
}

/// A single status update, as sent to `update_statuses`.
#[derive(Debug, Clone, Copy)]
pub struct StatusUpdate {
    pub id: TransportId,
    pub is_up: bool,
}

/// Discovery service client, consumed by the managed transport.
#[async_trait]
pub trait DiscoveryClient: Send + Sync {
    async fn get_transport_by_id(&self, id: TransportId) -> Result<TransportEntry, DiscoveryError>;
    async fn update_statuses(&self, updates: &[StatusUpdate]) -> Result<(), DiscoveryError>;
}

/// Call `update_statuses` for a single `(id, is_up)` pair, retrying up
/// to [`STATUS_UPDATE_RETRIES`] times before surfacing the last error.
pub async fn update_status_with_retry(
    discovery: &dyn DiscoveryClient,
    id: TransportId,
    is_up: bool,
) -> Result<(), DiscoveryError> {
    let update = StatusUpdate { id, is_up };
    let mut last_err = None;
    for attempt in 0..STATUS_UPDATE_RETRIES {
        match discovery.update_statuses(&[update]).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::debug!(attempt, %id, is_up, error = %e, "discovery status update failed");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.expect("loop runs at least once"))
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// In-memory [`DiscoveryClient`] for tests: holds one entry, and can
    /// be told to fail the next N calls (temporarily or permanently).
    #[derive(Default)]
    pub struct MockDiscovery {
        state: Mutex<MockState>,
    }

    #[derive(Default)]
    struct MockState {
        entry: Option<TransportEntry>,
        fail_get_temporary: usize,
        fail_get_permanent: bool,
        updates: Vec<StatusUpdate>,
    }

    impl MockDiscovery {
        pub fn new(entry: TransportEntry) -> Self {
            Self {
                state: Mutex::new(MockState {
                    entry: Some(entry),
                    ..Default::default()
                }),
            }
        }

        pub fn fail_next_gets_temporarily(&self, n: usize) {
            self.state.lock().unwrap().fail_get_temporary = n;
        }

        pub fn fail_gets_permanently(&self) {
            self.state.lock().unwrap().fail_get_permanent = true;
        }

        pub fn recorded_updates(&self) -> Vec<StatusUpdate> {
            self.state.lock().unwrap().updates.clone()
        }
    }

    #[async_trait]
    impl DiscoveryClient for MockDiscovery {
        async fn get_transport_by_id(&self, id: TransportId) -> Result<TransportEntry, DiscoveryError> {
            let mut state = self.state.lock().unwrap();
            if state.fail_get_permanent {
                return Err(DiscoveryError::Permanent("deregistered".to_string()));
            }
            if state.fail_get_temporary > 0 {
                state.fail_get_temporary -= 1;
                return Err(DiscoveryError::Temporary("probe timed out".to_string()));
            }
            state
                .entry
                .clone()
                .filter(|e| e.id == id)
                .ok_or(DiscoveryError::NotFound(id))
        }

        async fn update_statuses(&self, updates: &[StatusUpdate]) -> Result<(), DiscoveryError> {
            let mut state = self.state.lock().unwrap();
            for u in updates {
                state.updates.push(*u);
                if let Some(entry) = state.entry.as_mut() {
                    if entry.id == u.id {
                        entry.is_up = u.is_up;
                    }
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::MockDiscovery;
    use super::*;
    use overlay_core::{Edges, PublicKey};

    fn entry() -> TransportEntry {
        let edges = Edges::canonical(PublicKey([1u8; 32]), PublicKey([2u8; 32]));
        let id = overlay_core::crypto::transport_id::derive(&edges, "stcp");
        TransportEntry::new(id, edges, "stcp", false)
    }

    #[tokio::test]
    async fn retry_succeeds_after_transient_failures() {
        let e = entry();
        let mock = MockDiscovery::new(e.clone());
        mock.fail_next_gets_temporarily(0);
        update_status_with_retry(&mock, e.id, true).await.unwrap();
        assert_eq!(mock.recorded_updates().len(), 1);
    }

    #[tokio::test]
    async fn get_classifies_permanent_errors() {
        let e = entry();
        let mock = MockDiscovery::new(e.clone());
        mock.fail_gets_permanently();
        let err = mock.get_transport_by_id(e.id).await.unwrap_err();
        assert!(!err.is_temporary());
    }
}
