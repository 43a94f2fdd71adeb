//! In-process reservations.
//!
//! Two workers in the same process can find the same running grid before
//! either remote lock write lands. The ledger closes that window with an
//! atomic claim-if-absent keyed by instance id. It means nothing across
//! processes and is never the source of truth for ownership — the remote
//! lock label is.

use std::collections::HashMap;
use std::sync::Mutex;

use gridpool_compute::types::CorrelationId;

/// Atomic claim/release over instance ids. Injectable so tests can
/// substitute a deterministic or fault-injecting implementation.
pub trait ReservationLedger: Send + Sync {
    /// Claim `instance_id` for `holder`. Returns false when someone else
    /// already holds it.
    fn claim(&self, instance_id: u64, holder: &CorrelationId) -> bool;

    /// Release `instance_id` if (and only if) `holder` holds it.
    fn release_if_held(&self, instance_id: u64, holder: &CorrelationId);
}

/// Production ledger: a mutex-guarded map.
#[derive(Default)]
pub struct InMemoryReservations {
    inner: Mutex<HashMap<u64, CorrelationId>>,
}

impl InMemoryReservations {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReservationLedger for InMemoryReservations {
    fn claim(&self, instance_id: u64, holder: &CorrelationId) -> bool {
        let mut map = self.inner.lock().expect("reservation ledger poisoned");
        match map.get(&instance_id) {
            Some(existing) => existing == holder,
            None => {
                map.insert(instance_id, holder.clone());
                true
            }
        }
    }

    fn release_if_held(&self, instance_id: u64, holder: &CorrelationId) {
        let mut map = self.inner.lock().expect("reservation ledger poisoned");
        if map.get(&instance_id) == Some(holder) {
            map.remove(&instance_id);
        }
    }
}
