use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use crate::domain::outbox::DedupKey;

/// Dedup keys currently being delivered.
///
/// A key is held by at most one [`InFlightClaim`]; dropping the claim
/// releases it, including when the delivery future is cancelled.
#[derive(Debug, Default)]
pub struct InFlight {
    keys: Mutex<HashSet<DedupKey>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `None` when another delivery already owns `key`.
    pub fn claim(&self, key: &DedupKey) -> Option<InFlightClaim<'_>> {
        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        keys.insert(key.clone()).then(|| InFlightClaim { owner: self, key: key.clone() })
    }

    pub fn contains(&self, key: &DedupKey) -> bool {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner).contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug)]
pub struct InFlightClaim<'a> {
    owner: &'a InFlight,
    key: DedupKey,
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        self.owner.keys.lock().unwrap_or_else(PoisonError::into_inner).remove(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_waits_for_release() {
        let in_flight = InFlight::new();
        let key = DedupKey("session:abc".to_string());

        let claim = in_flight.claim(&key).expect("first claim");
        assert!(in_flight.claim(&key).is_none());
        assert!(in_flight.claim(&DedupKey("session:other".to_string())).is_some());

        drop(claim);
        assert!(!in_flight.contains(&key));
        assert!(in_flight.claim(&key).is_some());
    }
}
