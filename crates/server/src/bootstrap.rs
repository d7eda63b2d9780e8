use std::sync::Arc;

use leadbot_chat::{InMemorySessionStore, LeadIntake};
use leadbot_core::config::{AppConfig, StorageBackend, StorageConfig};
use leadbot_core::crm::{CrmError, CrmGateway, NoteComposer};
use leadbot_core::ledger::DedupLedger;
use leadbot_core::notify::{OperatorNotifier, TracingNotifier};
use leadbot_core::outbox::Outbox;
use leadbot_core::routing::RoundRobin;
use leadbot_core::store::{JsonFileStore, SnapshotStore, StoreError};
use leadbot_core::{Clock, DeliveryWorker, SystemClock};
use leadbot_db::{connect_with_settings, migrations, DbPool, SqliteSnapshotStore};
use thiserror::Error;
use tracing::info;

use crate::amocrm::AmoCrmClient;
use crate::notifier::TelegramNotifier;
use crate::summary::TeraNoteComposer;

pub struct Application {
    pub config: AppConfig,
    pub store: Arc<dyn SnapshotStore>,
    pub db_pool: Option<DbPool>,
    pub outbox: Arc<Outbox>,
    pub worker: Arc<DeliveryWorker>,
    pub intake: Arc<LeadIntake>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("amocrm is not configured: set amocrm.base_url and credentials")]
    CrmNotConfigured,
    #[error("amocrm client could not be built: {0}")]
    Crm(#[source] CrmError),
    #[error("note template failed to compile: {0}")]
    Template(#[source] tera::Error),
    #[error("snapshot store could not be opened: {0}")]
    Store(#[source] StoreError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    if !config.amocrm.is_configured() {
        return Err(BootstrapError::CrmNotConfigured);
    }
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let gateway = AmoCrmClient::new(config.amocrm.clone(), clock.clone()).map_err(BootstrapError::Crm)?;
    assemble(config, Arc::new(gateway), clock).await
}

/// Wires the outbox pipeline around an already built CRM gateway.
pub async fn assemble(
    config: AppConfig,
    gateway: Arc<dyn CrmGateway>,
    clock: Arc<dyn Clock>,
) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        storage_backend = config.storage.backend.as_str(),
        "starting application bootstrap"
    );

    let (store, db_pool) = open_store(&config.storage).await?;

    let ledger = Arc::new(DedupLedger::load(store.clone(), clock.clone(), config.outbox.ledger_ttl()).await);
    let outbox = Arc::new(Outbox::load(store.clone(), clock.clone(), ledger).await);
    let routing = Arc::new(RoundRobin::load(config.routing.responsibles.clone(), store.clone()).await);

    let composer: Arc<dyn NoteComposer> =
        Arc::new(TeraNoteComposer::new().map_err(BootstrapError::Template)?);
    let notifier: Arc<dyn OperatorNotifier> = match TelegramNotifier::from_config(&config.telegram) {
        Some(telegram) => Arc::new(telegram),
        None => Arc::new(TracingNotifier),
    };
    let worker = Arc::new(DeliveryWorker::new(
        outbox.clone(),
        gateway,
        composer,
        notifier,
        clock.clone(),
        config.outbox.delivery_policy(),
    ));
    let intake = Arc::new(LeadIntake::new(
        Arc::new(InMemorySessionStore::new()),
        outbox.clone(),
        routing,
        clock,
    ));

    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        pending = outbox.depth().await,
        responsibles = config.routing.responsibles.len(),
        alerts = if config.telegram.alerts_enabled() { "telegram" } else { "log" },
        "application bootstrap complete"
    );

    Ok(Application { config, store, db_pool, outbox, worker, intake })
}

async fn open_store(
    storage: &StorageConfig,
) -> Result<(Arc<dyn SnapshotStore>, Option<DbPool>), BootstrapError> {
    match storage.backend {
        StorageBackend::Json => {
            let store = JsonFileStore::open(&storage.data_dir).await.map_err(BootstrapError::Store)?;
            info!(
                event_name = "system.bootstrap.store_opened",
                correlation_id = "bootstrap",
                data_dir = %storage.data_dir.display(),
                "json snapshot store opened"
            );
            Ok((Arc::new(store), None))
        }
        StorageBackend::Sqlite => {
            let pool = connect_with_settings(
                &storage.database_url,
                storage.max_connections,
                storage.timeout_secs,
            )
            .await
            .map_err(BootstrapError::DatabaseConnect)?;
            info!(
                event_name = "system.bootstrap.database_connected",
                correlation_id = "bootstrap",
                "database connection established"
            );

            migrations::run_pending(&pool).await.map_err(BootstrapError::Migration)?;
            info!(
                event_name = "system.bootstrap.migrations_applied",
                correlation_id = "bootstrap",
                "database migrations applied"
            );
            Ok((Arc::new(SqliteSnapshotStore::new(pool.clone())), Some(pool)))
        }
    }
}
