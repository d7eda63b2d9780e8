use std::sync::Arc;

use leadbot_core::clock::Clock;
use leadbot_core::domain::lead::{LeadPayload, ResponsibleId};
use leadbot_core::domain::outbox::{DedupKey, JobId};
use leadbot_core::idempotency::derive_dedup_key;
use leadbot_core::outbox::{EnqueueOutcome, Outbox};
use leadbot_core::routing::RoundRobin;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::payload::{build_payload, check_contact, limit_comment, IntakeError, UserProfile};
use crate::session::{SessionStore, UserId};

/// Shown to the user after every submission, whatever happens downstream.
pub const SUBMITTED_MESSAGE: &str =
    "Спасибо! Заявка отправлена ✅ Менеджер свяжется с вами в ближайшее время.";

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Submission {
    Queued { job_id: JobId, dedup_key: DedupKey },
    Duplicate { dedup_key: DedupKey },
    /// Accepted in memory but not yet persisted.
    Deferred { dedup_key: DedupKey, reason: String },
}

impl Submission {
    pub fn dedup_key(&self) -> &DedupKey {
        match self {
            Self::Queued { dedup_key, .. }
            | Self::Duplicate { dedup_key }
            | Self::Deferred { dedup_key, .. } => dedup_key,
        }
    }

    pub fn confirmation(&self) -> &'static str {
        SUBMITTED_MESSAGE
    }
}

impl From<EnqueueOutcome> for Submission {
    fn from(value: EnqueueOutcome) -> Self {
        match value {
            EnqueueOutcome::Queued { job_id, dedup_key } => Self::Queued { job_id, dedup_key },
            EnqueueOutcome::Duplicate { dedup_key } => Self::Duplicate { dedup_key },
        }
    }
}

pub struct LeadIntake {
    sessions: Arc<dyn SessionStore>,
    outbox: Arc<Outbox>,
    routing: Arc<RoundRobin>,
    clock: Arc<dyn Clock>,
}

impl LeadIntake {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        outbox: Arc<Outbox>,
        routing: Arc<RoundRobin>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { sessions, outbox, routing, clock }
    }

    pub fn outbox(&self) -> &Arc<Outbox> {
        &self.outbox
    }

    /// Finishes the user's current intake and hands it to the outbox.
    ///
    /// Validation errors leave the session untouched so the bot can ask for
    /// the missing answer. Once the payload is built the session is reset,
    /// even when persisting the job failed.
    pub async fn submit(&self, user_id: UserId, profile: &UserProfile) -> Result<Submission, IntakeError> {
        let mut session = self.sessions.get(user_id).await.ok_or(IntakeError::NoSession)?;
        let payload = build_payload(&session, profile, self.clock.now())?;
        let submission = self.accept_payload(payload, None).await?;

        session.reset();
        self.sessions.put(user_id, session).await;
        Ok(submission)
    }

    /// Like [`LeadIntake::submit_payload`], but a payload that could not be
    /// persisted is still reported as accepted.
    pub async fn accept_payload(
        &self,
        payload: LeadPayload,
        responsible_id: Option<ResponsibleId>,
    ) -> Result<Submission, IntakeError> {
        let payload = limit_comment(payload);
        let dedup_key = derive_dedup_key(&payload);

        match self.submit_payload(payload, responsible_id).await {
            Ok(outcome) => Ok(Submission::from(outcome)),
            Err(IntakeError::Outbox(failure)) => {
                error!(
                    event_name = "intake.submit.deferred",
                    dedup_key = %dedup_key,
                    error = %failure,
                    "lead accepted but outbox could not be persisted"
                );
                Ok(Submission::Deferred { dedup_key, reason: failure.to_string() })
            }
            Err(other) => Err(other),
        }
    }

    /// Enqueues an already built payload, picking a responsible when none is given.
    pub async fn submit_payload(
        &self,
        payload: LeadPayload,
        responsible_id: Option<ResponsibleId>,
    ) -> Result<EnqueueOutcome, IntakeError> {
        check_contact(&payload)?;
        let payload = limit_comment(payload);
        let responsible_id = match responsible_id {
            Some(responsible_id) => Some(responsible_id),
            None => self.next_responsible().await,
        };

        let outcome = self.outbox.enqueue(payload, responsible_id).await?;
        info!(
            event_name = "intake.submit.accepted",
            dedup_key = %outcome.dedup_key(),
            duplicate = outcome.is_duplicate(),
            "lead submitted"
        );
        Ok(outcome)
    }

    async fn next_responsible(&self) -> Option<ResponsibleId> {
        match self.routing.next().await {
            Ok(responsible_id) => responsible_id,
            Err(failure) => {
                warn!(
                    event_name = "intake.routing.persist_failed",
                    error = %failure,
                    "round-robin cursor could not be saved; lead left unassigned"
                );
                None
            }
        }
    }
}
