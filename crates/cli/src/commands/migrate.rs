use crate::commands::{prepare, CommandResult};
use leadbot_core::config::StorageBackend;
use leadbot_db::{connect_with_settings, migrations};

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("migrate") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    if config.storage.backend == StorageBackend::Json {
        return CommandResult::success(
            "migrate",
            format!(
                "json backend keeps snapshots in `{}`; nothing to migrate",
                config.storage.data_dir.display()
            ),
        );
    }

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.storage.database_url,
            config.storage.max_connections,
            config.storage.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        pool.close().await;
        Ok::<(), (&'static str, String, u8)>(())
    });

    match result {
        Ok(()) => CommandResult::success("migrate", "applied pending migrations"),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("migrate", error_class, message, exit_code)
        }
    }
}
