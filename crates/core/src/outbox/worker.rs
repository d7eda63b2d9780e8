use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::crm::{deliver_lead, CrmError, CrmGateway, DeliveryPlan, NoteComposer};
use crate::domain::lead::LeadPayload;
use crate::domain::outbox::OutboxJob;
use crate::notify::{OperatorAlert, OperatorNotifier};
use crate::outbox::backoff::retry_delay;
use crate::outbox::in_flight::InFlight;
use crate::outbox::recovery::{default_rules, find_repair, RecoveryRule};
use crate::outbox::Outbox;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryPolicy {
    /// Attempt count at which one operator alert is raised.
    pub alert_after_attempts: u32,
    /// Jobs are dead-lettered once this many attempts failed. `None` retries forever.
    pub max_attempts: Option<u32>,
    pub recovery_rules: Vec<RecoveryRule>,
    pub plan: DeliveryPlan,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            alert_after_attempts: 3,
            max_attempts: None,
            recovery_rules: default_rules(),
            plan: DeliveryPlan::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub delivered: usize,
    pub failed: usize,
    pub skipped_in_flight: usize,
    pub dropped_already_sent: usize,
    pub dead_lettered: usize,
    pub not_due: usize,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.delivered == 0
            && self.failed == 0
            && self.dropped_already_sent == 0
            && self.dead_lettered == 0
    }
}

enum Outcome {
    Delivered,
    Failed,
    DeadLettered,
}

pub struct DeliveryWorker {
    outbox: Arc<Outbox>,
    gateway: Arc<dyn CrmGateway>,
    composer: Arc<dyn NoteComposer>,
    notifier: Arc<dyn OperatorNotifier>,
    clock: Arc<dyn Clock>,
    policy: DeliveryPolicy,
    in_flight: InFlight,
}

impl DeliveryWorker {
    pub fn new(
        outbox: Arc<Outbox>,
        gateway: Arc<dyn CrmGateway>,
        composer: Arc<dyn NoteComposer>,
        notifier: Arc<dyn OperatorNotifier>,
        clock: Arc<dyn Clock>,
        policy: DeliveryPolicy,
    ) -> Self {
        Self { outbox, gateway, composer, notifier, clock, policy, in_flight: InFlight::new() }
    }

    pub fn outbox(&self) -> &Arc<Outbox> {
        &self.outbox
    }

    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    /// One pass over the queue. Safe to run concurrently with other ticks.
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();

        for snapshot in self.outbox.pending().await {
            if !snapshot.is_due(self.clock.now()) {
                report.not_due += 1;
                continue;
            }
            let Some(_claim) = self.in_flight.claim(&snapshot.dedup_key) else {
                report.skipped_in_flight += 1;
                continue;
            };
            // A concurrent tick may have finished or rescheduled the job since the snapshot.
            let Some(job) = self.outbox.get(&snapshot.id).await else {
                continue;
            };
            if !job.is_due(self.clock.now()) {
                report.not_due += 1;
                continue;
            }

            if self.outbox.ledger().is_sent(&job.dedup_key).await {
                self.drop_already_sent(&job).await;
                report.dropped_already_sent += 1;
                continue;
            }

            match self.attempt(&job).await {
                Outcome::Delivered => report.delivered += 1,
                Outcome::Failed => report.failed += 1,
                Outcome::DeadLettered => report.dead_lettered += 1,
            }
        }

        report
    }

    async fn attempt(&self, job: &OutboxJob) -> Outcome {
        match self.deliver(job).await {
            Ok(()) => {
                self.finish(job).await;
                Outcome::Delivered
            }
            Err(failure) => self.record_failure(job, failure).await,
        }
    }

    async fn deliver(&self, job: &OutboxJob) -> Result<(), CrmError> {
        let first = self.run_sequence(job, &job.payload).await;
        let Err(failure) = first else {
            return Ok(());
        };

        let Some((rule, repaired)) = find_repair(&self.policy.recovery_rules, &failure, &job.payload)
        else {
            return Err(failure);
        };
        info!(
            event_name = "outbox.delivery.recovering",
            job_id = %job.id,
            dedup_key = %job.dedup_key,
            stripped_field = rule.strip.as_str(),
            error = %failure,
            "replaying delivery without rejected field"
        );
        self.run_sequence(job, &repaired).await
    }

    async fn run_sequence(
        &self,
        job: &OutboxJob,
        payload: &LeadPayload,
    ) -> Result<(), CrmError> {
        deliver_lead(
            self.gateway.as_ref(),
            self.composer.as_ref(),
            self.policy.plan,
            payload,
            job.responsible_id,
            self.clock.now(),
        )
        .await
        .map(|_| ())
    }

    async fn finish(&self, job: &OutboxJob) {
        // Ledger before queue; a restart in between drops the job on the next tick.
        if let Err(failure) = self.outbox.ledger().mark_sent(&job.dedup_key).await {
            error!(
                event_name = "outbox.ledger.persist_failed",
                job_id = %job.id,
                dedup_key = %job.dedup_key,
                error = %failure,
                "delivered lead could not be marked sent"
            );
        }
        if let Err(failure) = self.outbox.complete(&job.id).await {
            error!(
                event_name = "outbox.queue.persist_failed",
                job_id = %job.id,
                error = %failure,
                "delivered job could not be removed from persisted queue"
            );
        }
        info!(
            event_name = "outbox.delivery.succeeded",
            job_id = %job.id,
            dedup_key = %job.dedup_key,
            attempts = job.attempts,
            "lead delivered"
        );
    }

    async fn drop_already_sent(&self, job: &OutboxJob) {
        info!(
            event_name = "outbox.delivery.already_sent",
            job_id = %job.id,
            dedup_key = %job.dedup_key,
            "dropping job whose lead was already delivered"
        );
        if let Err(failure) = self.outbox.complete(&job.id).await {
            error!(
                event_name = "outbox.queue.persist_failed",
                job_id = %job.id,
                error = %failure,
                "already-sent job could not be removed from persisted queue"
            );
        }
    }

    async fn record_failure(&self, job: &OutboxJob, failure: CrmError) -> Outcome {
        let attempts = job.attempts.saturating_add(1);
        let reason = failure.to_string();

        if self.policy.max_attempts.is_some_and(|max| attempts >= max) {
            match self.outbox.dead_letter(&job.id, attempts, reason.clone()).await {
                Ok(_) => warn!(
                    event_name = "outbox.delivery.dead_lettered",
                    job_id = %job.id,
                    dedup_key = %job.dedup_key,
                    attempts,
                    error = %reason,
                    "delivery abandoned after attempt ceiling"
                ),
                Err(persist) => error!(
                    event_name = "outbox.queue.persist_failed",
                    job_id = %job.id,
                    error = %persist,
                    "dead letter could not be persisted"
                ),
            }
            self.notifier
                .notify(OperatorAlert::DeadLettered {
                    job_id: job.id.clone(),
                    dedup_key: job.dedup_key.clone(),
                    attempts,
                    error: reason,
                })
                .await;
            return Outcome::DeadLettered;
        }

        let retry_in: Duration = retry_delay(attempts);
        let next_eligible_at = self.clock.now() + retry_in;
        if let Err(persist) =
            self.outbox.reschedule(&job.id, attempts, next_eligible_at, reason.clone()).await
        {
            error!(
                event_name = "outbox.queue.persist_failed",
                job_id = %job.id,
                error = %persist,
                "failed attempt could not be persisted"
            );
        }
        warn!(
            event_name = "outbox.delivery.failed",
            job_id = %job.id,
            dedup_key = %job.dedup_key,
            attempts,
            retry_in_secs = retry_in.num_seconds(),
            error = %reason,
            "crm delivery failed; retry scheduled"
        );

        if attempts == self.policy.alert_after_attempts {
            self.notifier
                .notify(OperatorAlert::DeliveryDelayed {
                    job_id: job.id.clone(),
                    dedup_key: job.dedup_key.clone(),
                    attempts,
                    retry_in,
                    error: reason,
                })
                .await;
        }
        Outcome::Failed
    }
}
