//! `POST /v1/leads`: hands a complete payload to the outbox.
//!
//! A lead the outbox holds in memory but could not persist is still answered
//! with `202` and `"status": "deferred"`.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use leadbot_chat::{IntakeError, LeadIntake, Submission};
use leadbot_core::domain::lead::{LeadPayload, ResponsibleId};
use leadbot_core::errors::{ApplicationError, InterfaceError};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct LeadRequest {
    pub payload: LeadPayload,
    #[serde(default)]
    pub responsible_id: Option<ResponsibleId>,
}

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub correlation_id: String,
}

pub fn router(intake: Arc<LeadIntake>) -> Router {
    Router::new().route("/v1/leads", post(submit_lead)).with_state(intake)
}

pub async fn submit_lead(
    State(intake): State<Arc<LeadIntake>>,
    Json(request): Json<LeadRequest>,
) -> Result<(StatusCode, Json<Submission>), (StatusCode, Json<ErrorBody>)> {
    intake
        .accept_payload(request.payload, request.responsible_id)
        .await
        .map(|submission| (StatusCode::ACCEPTED, Json(submission)))
        .map_err(reject)
}

fn reject(error: IntakeError) -> (StatusCode, Json<ErrorBody>) {
    let correlation_id = Uuid::new_v4().to_string();
    warn!(
        event_name = "http.intake.rejected",
        correlation_id = %correlation_id,
        error = %error,
        "lead submission rejected"
    );

    let interface = ApplicationError::from(error).into_interface(correlation_id);
    let status = match interface {
        InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
        InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        InterfaceError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = ErrorBody {
        error: interface.user_message(),
        correlation_id: interface.correlation_id().to_string(),
    };
    (status, Json(body))
}
