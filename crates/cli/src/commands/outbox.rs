//! `leadbot outbox`: what is waiting for the CRM and what was given up on.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use leadbot_core::ledger::{DedupLedger, LedgerStats};
use leadbot_core::outbox::Outbox;
use leadbot_core::{Clock, DeadLetter, OutboxJob, SystemClock};
use serde::Serialize;

use crate::commands::{open_store, prepare, CommandResult};

#[derive(Debug, Serialize)]
pub struct OutboxReport {
    pub depth: usize,
    pub pending: Vec<JobSummary>,
    pub dead_letters: Vec<DeadLetterSummary>,
    pub ledger: LedgerStats,
}

/// Job metadata without the lead's contact data.
#[derive(Debug, Serialize)]
pub struct JobSummary {
    pub job_id: String,
    pub dedup_key: String,
    pub flow: &'static str,
    pub attempts: u32,
    pub next_eligible_at: DateTime<Utc>,
    pub responsible_id: Option<u64>,
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeadLetterSummary {
    pub job_id: String,
    pub dedup_key: String,
    pub attempts: u32,
    pub abandoned_at: DateTime<Utc>,
    pub reason: String,
}

impl From<&OutboxJob> for JobSummary {
    fn from(job: &OutboxJob) -> Self {
        Self {
            job_id: job.id.0.clone(),
            dedup_key: job.dedup_key.as_str().to_string(),
            flow: job.payload.flow().as_str(),
            attempts: job.attempts,
            next_eligible_at: job.next_eligible_at,
            responsible_id: job.responsible_id.map(|id| id.0),
            last_error: job.last_error.clone(),
        }
    }
}

impl From<&DeadLetter> for DeadLetterSummary {
    fn from(letter: &DeadLetter) -> Self {
        Self {
            job_id: letter.job.id.0.clone(),
            dedup_key: letter.job.dedup_key.as_str().to_string(),
            attempts: letter.job.attempts,
            abandoned_at: letter.abandoned_at,
            reason: letter.reason.clone(),
        }
    }
}

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("outbox") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let (store, pool) = open_store(&config.storage).await?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let ledger =
            Arc::new(DedupLedger::load(store.clone(), clock.clone(), config.outbox.ledger_ttl()).await);
        let outbox = Outbox::load(store, clock, ledger.clone()).await;

        let report = OutboxReport {
            depth: outbox.depth().await,
            pending: outbox.pending().await.iter().map(JobSummary::from).collect(),
            dead_letters: outbox.dead_letters().await.iter().map(DeadLetterSummary::from).collect(),
            ledger: ledger.stats().await,
        };
        if let Some(pool) = pool {
            pool.close().await;
        }
        Ok::<OutboxReport, anyhow::Error>(report)
    });

    match result {
        Ok(report) => CommandResult::success_with(
            "outbox",
            format!(
                "{} pending job(s), {} dead letter(s)",
                report.depth,
                report.dead_letters.len()
            ),
            &report,
        ),
        Err(error) => CommandResult::failure("outbox", "storage", format!("{error:#}"), 4),
    }
}
