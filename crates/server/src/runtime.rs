use std::sync::Arc;
use std::time::Duration;

use leadbot_core::ledger::DedupLedger;
use leadbot_core::DeliveryWorker;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Drives the delivery worker. Every tick runs as its own task, so a slow
/// CRM call never delays the next tick; the worker's in-flight guard keeps
/// overlapping ticks from delivering one key twice.
pub fn spawn_delivery_loop(worker: Arc<DeliveryWorker>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let worker = worker.clone();
            tokio::spawn(async move {
                let report = worker.tick().await;
                if report.is_idle() {
                    debug!(event_name = "outbox.tick.idle", not_due = report.not_due, "outbox tick idle");
                } else {
                    info!(
                        event_name = "outbox.tick.completed",
                        delivered = report.delivered,
                        failed = report.failed,
                        dead_lettered = report.dead_lettered,
                        dropped_already_sent = report.dropped_already_sent,
                        skipped_in_flight = report.skipped_in_flight,
                        "outbox tick completed"
                    );
                }
            });
        }
    })
}

pub fn spawn_sweep_loop(ledger: Arc<DedupLedger>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match ledger.sweep().await {
                Ok(report) => debug!(
                    event_name = "ledger.sweep.completed",
                    queued_removed = report.queued_removed,
                    sent_removed = report.sent_removed,
                    "dedup ledger swept"
                ),
                Err(error) => warn!(
                    event_name = "ledger.sweep.failed",
                    error = %error,
                    "dedup ledger sweep could not be persisted"
                ),
            }
        }
    })
}
