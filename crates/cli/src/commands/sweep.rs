use std::sync::Arc;

use leadbot_core::ledger::DedupLedger;
use leadbot_core::SystemClock;

use crate::commands::{open_store, prepare, CommandResult};

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("sweep") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let (store, pool) = open_store(&config.storage).await?;
        let ledger =
            DedupLedger::load(store, Arc::new(SystemClock), config.outbox.ledger_ttl()).await;
        let report = ledger.sweep().await?;
        if let Some(pool) = pool {
            pool.close().await;
        }
        Ok::<_, anyhow::Error>(report)
    });

    match result {
        Ok(report) => CommandResult::success_with(
            "sweep",
            format!(
                "removed {} queued and {} sent dedup entries",
                report.queued_removed, report.sent_removed
            ),
            &report,
        ),
        Err(error) => CommandResult::failure("sweep", "storage", format!("{error:#}"), 4),
    }
}
