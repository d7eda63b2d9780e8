mod amocrm;
mod bootstrap;
mod health;
mod intake;
mod notifier;
mod runtime;
mod summary;
#[cfg(test)]
mod test_support;

use anyhow::Result;
use axum::Router;
use leadbot_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use leadbot_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    let router = Router::new()
        .merge(health::router(health::HealthState::new(app.outbox.clone(), app.store.clone())))
        .merge(intake::router(app.intake.clone()));
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(
        event_name = "system.http.start",
        correlation_id = "bootstrap",
        bind_address = %address,
        "http endpoint started"
    );
    let http = tokio::spawn(async move {
        if let Err(error) = axum::serve(listener, router).await {
            tracing::error!(
                event_name = "system.http.error",
                correlation_id = "bootstrap",
                error = %error,
                "http endpoint terminated unexpectedly"
            );
        }
    });

    let delivery = runtime::spawn_delivery_loop(app.worker.clone(), app.config.outbox.tick_interval());
    let sweep =
        runtime::spawn_sweep_loop(app.outbox.ledger().clone(), app.config.outbox.sweep_interval());

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        tick_interval_ms = app.config.outbox.tick_interval_ms,
        "leadbot-server started"
    );
    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        pending = app.outbox.depth().await,
        "leadbot-server stopping"
    );

    delivery.abort();
    sweep.abort();
    http.abort();
    if let Some(pool) = &app.db_pool {
        pool.close().await;
    }
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
