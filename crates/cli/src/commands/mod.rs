pub mod config;
pub mod doctor;
pub mod migrate;
pub mod outbox;
pub mod sweep;

use std::sync::Arc;

use anyhow::Context;
use leadbot_core::config::{AppConfig, LoadOptions, StorageBackend, StorageConfig};
use leadbot_core::store::{JsonFileStore, SnapshotStore};
use leadbot_db::{connect_with_settings, migrations, DbPool, SqliteSnapshotStore};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            details: None,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    /// Success carrying a structured report next to the message.
    pub fn success_with<T: Serialize>(command: &str, message: impl Into<String>, details: &T) -> Self {
        let details = match serde_json::to_value(details) {
            Ok(details) => details,
            Err(error) => {
                return Self::failure(command, "serialization", error.to_string(), 1);
            }
        };
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            details: Some(details),
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            details: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// Config plus a current-thread runtime, or the failure every command reports
/// the same way.
pub(crate) fn prepare(command: &str) -> Result<(AppConfig, tokio::runtime::Runtime), CommandResult> {
    let config = AppConfig::load(LoadOptions::default()).map_err(|error| {
        CommandResult::failure(command, "config_validation", format!("configuration issue: {error}"), 2)
    })?;
    let runtime =
        tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
            CommandResult::failure(
                command,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            )
        })?;
    Ok((config, runtime))
}

/// Opens the configured snapshot backend. Sqlite pools are migrated first so
/// the snapshot table exists.
pub(crate) async fn open_store(
    storage: &StorageConfig,
) -> anyhow::Result<(Arc<dyn SnapshotStore>, Option<DbPool>)> {
    match storage.backend {
        StorageBackend::Json => {
            let store = JsonFileStore::open(&storage.data_dir).await.with_context(|| {
                format!("json data dir `{}` is not usable", storage.data_dir.display())
            })?;
            Ok((Arc::new(store), None))
        }
        StorageBackend::Sqlite => {
            let pool = connect_with_settings(
                &storage.database_url,
                storage.max_connections,
                storage.timeout_secs,
            )
            .await
            .context("sqlite connection failed")?;
            migrations::run_pending(&pool).await.context("sqlite migration failed")?;
            Ok((Arc::new(SqliteSnapshotStore::new(pool.clone())), Some(pool)))
        }
    }
}
