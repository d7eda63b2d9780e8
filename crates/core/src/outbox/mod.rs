//! Durable outbox of CRM deliveries.
//!
//! Chat handlers only ever [`Outbox::enqueue`]; the [`worker::DeliveryWorker`]
//! drains due jobs on a timer.

pub mod backoff;
pub mod in_flight;
pub mod recovery;
pub mod worker;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::domain::lead::{LeadPayload, ResponsibleId};
use crate::domain::outbox::{DeadLetter, DedupKey, JobId, JobKind, OutboxJob};
use crate::idempotency::derive_dedup_key;
use crate::ledger::DedupLedger;
use crate::store::{
    load_snapshot, save_snapshot, SnapshotStore, StoreError, DEAD_LETTER_KEY, OUTBOX_KEY,
};

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("outbox state could not be persisted: {0}")]
    Persistence(#[from] StoreError),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EnqueueOutcome {
    Queued { job_id: JobId, dedup_key: DedupKey },
    Duplicate { dedup_key: DedupKey },
}

impl EnqueueOutcome {
    pub fn dedup_key(&self) -> &DedupKey {
        match self {
            Self::Queued { dedup_key, .. } | Self::Duplicate { dedup_key } => dedup_key,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }
}

pub struct Outbox {
    store: Arc<dyn SnapshotStore>,
    clock: Arc<dyn Clock>,
    ledger: Arc<DedupLedger>,
    jobs: Mutex<Vec<OutboxJob>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
}

impl Outbox {
    pub async fn load(
        store: Arc<dyn SnapshotStore>,
        clock: Arc<dyn Clock>,
        ledger: Arc<DedupLedger>,
    ) -> Self {
        let jobs: Vec<OutboxJob> = load_snapshot(store.as_ref(), OUTBOX_KEY, Vec::new()).await;
        let dead_letters: Vec<DeadLetter> =
            load_snapshot(store.as_ref(), DEAD_LETTER_KEY, Vec::new()).await;

        if !jobs.is_empty() || !dead_letters.is_empty() {
            info!(
                event_name = "outbox.state.restored",
                pending = jobs.len(),
                dead_letters = dead_letters.len(),
                "outbox restored from snapshot"
            );
        }

        Self {
            store,
            clock,
            ledger,
            jobs: Mutex::new(jobs),
            dead_letters: Mutex::new(dead_letters),
        }
    }

    pub fn ledger(&self) -> &Arc<DedupLedger> {
        &self.ledger
    }

    /// Queues `payload` for delivery unless its dedup key was seen recently.
    ///
    /// The duplicate check and the ledger mark happen under the queue lock,
    /// so concurrent submissions of one lead produce a single job. On a
    /// persistence error the job stays queued in memory.
    pub async fn enqueue(
        &self,
        payload: LeadPayload,
        responsible_id: Option<ResponsibleId>,
    ) -> Result<EnqueueOutcome, OutboxError> {
        let dedup_key = derive_dedup_key(&payload);
        let mut jobs = self.jobs.lock().await;

        let pending = jobs.iter().any(|job| job.dedup_key == dedup_key);
        if pending || self.ledger.is_duplicate(&dedup_key).await {
            info!(
                event_name = "outbox.enqueue.duplicate",
                dedup_key = %dedup_key,
                "duplicate lead ignored"
            );
            return Ok(EnqueueOutcome::Duplicate { dedup_key });
        }

        let now = self.clock.now();
        let job = OutboxJob {
            id: JobId(Uuid::new_v4().to_string()),
            kind: JobKind::CrmLead,
            payload,
            dedup_key: dedup_key.clone(),
            responsible_id,
            attempts: 0,
            next_eligible_at: now,
            enqueued_at: now,
            last_error: None,
        };
        let job_id = job.id.clone();
        jobs.push(job);

        let marked = self.ledger.mark_queued(&dedup_key).await;
        let saved = save_snapshot(self.store.as_ref(), OUTBOX_KEY, &*jobs).await;
        marked?;
        saved?;

        info!(
            event_name = "outbox.enqueue.accepted",
            job_id = %job_id,
            dedup_key = %dedup_key,
            depth = jobs.len(),
            "lead queued for crm delivery"
        );
        Ok(EnqueueOutcome::Queued { job_id, dedup_key })
    }

    pub async fn pending(&self) -> Vec<OutboxJob> {
        self.jobs.lock().await.clone()
    }

    pub async fn get(&self, job_id: &JobId) -> Option<OutboxJob> {
        self.jobs.lock().await.iter().find(|job| &job.id == job_id).cloned()
    }

    pub async fn depth(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters.lock().await.clone()
    }

    /// Removes a delivered job. Returns `false` when it was already gone.
    pub async fn complete(&self, job_id: &JobId) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let before = jobs.len();
        jobs.retain(|job| &job.id != job_id);
        if jobs.len() == before {
            return Ok(false);
        }
        save_snapshot(self.store.as_ref(), OUTBOX_KEY, &*jobs).await?;
        Ok(true)
    }

    /// Records a failed attempt and pushes the job's next eligible time out.
    pub async fn reschedule(
        &self,
        job_id: &JobId,
        attempts: u32,
        next_eligible_at: DateTime<Utc>,
        error: String,
    ) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().await;
        let Some(job) = jobs.iter_mut().find(|job| &job.id == job_id) else {
            warn!(event_name = "outbox.job.missing", job_id = %job_id, "rescheduled job is no longer queued");
            return Ok(());
        };
        job.attempts = attempts;
        job.next_eligible_at = next_eligible_at;
        job.last_error = Some(error);
        save_snapshot(self.store.as_ref(), OUTBOX_KEY, &*jobs).await
    }

    /// Moves a job to the dead-letter list.
    pub async fn dead_letter(
        &self,
        job_id: &JobId,
        attempts: u32,
        reason: String,
    ) -> Result<Option<DeadLetter>, StoreError> {
        let mut jobs = self.jobs.lock().await;
        let Some(index) = jobs.iter().position(|job| &job.id == job_id) else {
            return Ok(None);
        };
        let mut job = jobs.remove(index);
        job.attempts = attempts;
        job.last_error = Some(reason.clone());
        let letter = DeadLetter { job, abandoned_at: self.clock.now(), reason };

        let mut dead_letters = self.dead_letters.lock().await;
        dead_letters.push(letter.clone());
        save_snapshot(self.store.as_ref(), DEAD_LETTER_KEY, &*dead_letters).await?;
        save_snapshot(self.store.as_ref(), OUTBOX_KEY, &*jobs).await?;
        Ok(Some(letter))
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::lead::{Contact, ContactMethod, LeadDetails, LeadSource, ManagerRequest};
    use crate::ledger::LedgerTtl;
    use crate::store::InMemorySnapshotStore;

    fn payload(session: &str) -> LeadPayload {
        LeadPayload {
            session_id: Some(session.to_string()),
            lead_id: None,
            created_at: Utc.with_ymd_and_hms(2025, 9, 1, 9, 0, 0).unwrap(),
            source: LeadSource::default(),
            contact: Contact { handle: Some("anna".to_string()), ..Contact::default() },
            contact_method: ContactMethod::Telegram,
            consent: None,
            details: LeadDetails::Manager(ManagerRequest::default()),
        }
    }

    async fn outbox(store: Arc<InMemorySnapshotStore>) -> Outbox {
        let clock: Arc<ManualClock> =
            Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2025, 9, 1, 9, 0, 0).unwrap()));
        let ledger =
            Arc::new(DedupLedger::load(store.clone(), clock.clone(), LedgerTtl::default()).await);
        Outbox::load(store, clock, ledger).await
    }

    #[tokio::test]
    async fn second_enqueue_of_same_session_is_duplicate() {
        let outbox = outbox(Arc::new(InMemorySnapshotStore::new())).await;

        let first = outbox.enqueue(payload("abc"), None).await.expect("first enqueue");
        let second = outbox.enqueue(payload("abc"), None).await.expect("second enqueue");

        assert!(matches!(first, EnqueueOutcome::Queued { .. }));
        assert_eq!(second, EnqueueOutcome::Duplicate { dedup_key: DedupKey("session:abc".to_string()) });
        assert_eq!(outbox.depth().await, 1);
    }

    #[tokio::test]
    async fn concurrent_enqueues_produce_one_job() {
        let outbox = Arc::new(outbox(Arc::new(InMemorySnapshotStore::new())).await);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let outbox = outbox.clone();
                tokio::spawn(async move { outbox.enqueue(payload("race"), None).await })
            })
            .collect();

        let mut queued = 0;
        for handle in handles {
            if !handle.await.expect("join").expect("enqueue").is_duplicate() {
                queued += 1;
            }
        }
        assert_eq!(queued, 1);
        assert_eq!(outbox.depth().await, 1);
    }

    #[tokio::test]
    async fn queue_and_ledger_survive_restart() {
        let store = Arc::new(InMemorySnapshotStore::new());
        let first = outbox(store.clone()).await;
        first.enqueue(payload("persist"), Some(ResponsibleId(22))).await.expect("enqueue");

        let restarted = outbox(store).await;

        let jobs = restarted.pending().await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].responsible_id, Some(ResponsibleId(22)));
        assert_eq!(jobs[0].attempts, 0);
        assert!(restarted.ledger().is_duplicate(&jobs[0].dedup_key).await);
    }

    #[tokio::test]
    async fn dead_letter_moves_job_out_of_queue() {
        let outbox = outbox(Arc::new(InMemorySnapshotStore::new())).await;
        let EnqueueOutcome::Queued { job_id, .. } =
            outbox.enqueue(payload("doomed"), None).await.expect("enqueue")
        else {
            panic!("first enqueue should queue");
        };

        let letter = outbox
            .dead_letter(&job_id, 5, "crm returned http 400".to_string())
            .await
            .expect("dead letter")
            .expect("job present");

        assert_eq!(letter.job.attempts, 5);
        assert_eq!(outbox.depth().await, 0);
        assert_eq!(outbox.dead_letters().await.len(), 1);
    }
}
