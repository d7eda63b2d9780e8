use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use leadbot_core::ledger::LedgerStats;
use leadbot_core::outbox::Outbox;
use leadbot_core::store::SnapshotStore;
use serde::Serialize;

const PROBE_KEY: &str = "health_probe";

#[derive(Clone)]
pub struct HealthState {
    outbox: Arc<Outbox>,
    store: Arc<dyn SnapshotStore>,
}

impl HealthState {
    pub fn new(outbox: Arc<Outbox>, store: Arc<dyn SnapshotStore>) -> Self {
        Self { outbox, store }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OutboxHealth {
    pub depth: usize,
    pub dead_letters: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub store: HealthCheck,
    pub outbox: OutboxHealth,
    pub ledger: LedgerStats,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new().route("/health", get(health)).with_state(state)
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let store = store_check(state.store.as_ref()).await;
    let ready = store.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "leadbot-server runtime initialized".to_string(),
        },
        store,
        outbox: OutboxHealth {
            depth: state.outbox.depth().await,
            dead_letters: state.outbox.dead_letters().await.len(),
        },
        ledger: state.outbox.ledger().stats().await,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn store_check(store: &dyn SnapshotStore) -> HealthCheck {
    match store.read(PROBE_KEY).await {
        Ok(_) => HealthCheck { status: "ready", detail: "snapshot store readable".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("snapshot store read failed: {error}") }
        }
    }
}
