//! Two-tier dedup ledger.
//!
//! `queued` entries guard against double submission while a lead is still
//! in flight; `sent` entries guard against resubmitting a lead that already
//! reached the CRM. Both expire so the maps stay bounded.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::domain::outbox::DedupKey;
use crate::store::{load_snapshot, save_snapshot, SnapshotStore, StoreError, DEDUP_KEY};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LedgerTtl {
    pub queued: Duration,
    pub sent: Duration,
}

impl Default for LedgerTtl {
    fn default() -> Self {
        Self { queued: Duration::hours(6), sent: Duration::hours(72) }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    #[serde(default)]
    pub queued: BTreeMap<DedupKey, DateTime<Utc>>,
    #[serde(default)]
    pub sent: BTreeMap<DedupKey, DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub queued: usize,
    pub sent: usize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub queued_removed: usize,
    pub sent_removed: usize,
}

pub struct DedupLedger {
    store: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
    ttl: LedgerTtl,
    state: Mutex<LedgerSnapshot>,
}

impl DedupLedger {
    pub async fn load(store: Arc<dyn SnapshotStore>, clock: Arc<dyn Clock>, ttl: LedgerTtl) -> Self {
        let state = load_snapshot(store.as_ref(), DEDUP_KEY, LedgerSnapshot::default()).await;
        Self { store, clock, ttl, state: Mutex::new(state) }
    }

    pub async fn is_duplicate(&self, key: &DedupKey) -> bool {
        let now = self.clock.now();
        let state = self.state.lock().await;
        within(state.sent.get(key), now, self.ttl.sent)
            || within(state.queued.get(key), now, self.ttl.queued)
    }

    pub async fn is_sent(&self, key: &DedupKey) -> bool {
        let now = self.clock.now();
        let state = self.state.lock().await;
        within(state.sent.get(key), now, self.ttl.sent)
    }

    pub async fn mark_queued(&self, key: &DedupKey) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.queued.insert(key.clone(), now);
        debug!(event_name = "ledger.key.queued", dedup_key = %key, "dedup key marked queued");
        save_snapshot(self.store.as_ref(), DEDUP_KEY, &*state).await
    }

    pub async fn mark_sent(&self, key: &DedupKey) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        state.sent.insert(key.clone(), now);
        state.queued.remove(key);
        debug!(event_name = "ledger.key.sent", dedup_key = %key, "dedup key marked sent");
        save_snapshot(self.store.as_ref(), DEDUP_KEY, &*state).await
    }

    /// Drops expired entries from both tiers and persists the result.
    pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;

        let queued_before = state.queued.len();
        let sent_before = state.sent.len();
        state.queued.retain(|_, marked_at| within(Some(&*marked_at), now, self.ttl.queued));
        state.sent.retain(|_, marked_at| within(Some(&*marked_at), now, self.ttl.sent));

        let report = SweepReport {
            queued_removed: queued_before - state.queued.len(),
            sent_removed: sent_before - state.sent.len(),
        };
        save_snapshot(self.store.as_ref(), DEDUP_KEY, &*state).await?;

        info!(
            event_name = "ledger.sweep.completed",
            queued_removed = report.queued_removed,
            sent_removed = report.sent_removed,
            "dedup ledger swept"
        );
        Ok(report)
    }

    pub async fn stats(&self) -> LedgerStats {
        let state = self.state.lock().await;
        LedgerStats { queued: state.queued.len(), sent: state.sent.len() }
    }

    pub async fn snapshot(&self) -> LedgerSnapshot {
        self.state.lock().await.clone()
    }
}

fn within(marked_at: Option<&DateTime<Utc>>, now: DateTime<Utc>, ttl: Duration) -> bool {
    marked_at.is_some_and(|marked_at| now - *marked_at < ttl)
}
