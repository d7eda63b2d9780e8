use async_trait::async_trait;
use chrono::Duration;
use serde::Serialize;
use tracing::warn;

use crate::domain::outbox::{DedupKey, JobId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperatorAlert {
    /// Raised once, when a job reaches the alert threshold. Retries continue.
    DeliveryDelayed {
        job_id: JobId,
        dedup_key: DedupKey,
        attempts: u32,
        #[serde(serialize_with = "serialize_seconds")]
        retry_in: Duration,
        error: String,
    },
    DeadLettered {
        job_id: JobId,
        dedup_key: DedupKey,
        attempts: u32,
        error: String,
    },
}

impl OperatorAlert {
    pub fn job_id(&self) -> &JobId {
        match self {
            Self::DeliveryDelayed { job_id, .. } | Self::DeadLettered { job_id, .. } => job_id,
        }
    }

    /// Short text suitable for an operator chat.
    pub fn message(&self) -> String {
        match self {
            Self::DeliveryDelayed { attempts, retry_in, .. } => format!(
                "⚠️ amoCRM недоступна, попытка {attempts}, повторная попытка через {}с",
                retry_in.num_seconds()
            ),
            Self::DeadLettered { dedup_key, attempts, error, .. } => format!(
                "⛔ Заявка {dedup_key} не доставлена после {attempts} попыток: {error}"
            ),
        }
    }
}

fn serialize_seconds<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_i64(value.num_seconds())
}

/// Best-effort alert sink. Implementations log their own failures.
#[async_trait]
pub trait OperatorNotifier: Send + Sync {
    async fn notify(&self, alert: OperatorAlert);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl OperatorNotifier for TracingNotifier {
    async fn notify(&self, alert: OperatorAlert) {
        warn!(
            event_name = "outbox.operator.alert",
            job_id = %alert.job_id(),
            alert = %alert.message(),
            "operator alert raised"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delayed_alert_reports_retry_in_seconds() {
        let alert = OperatorAlert::DeliveryDelayed {
            job_id: JobId("j-1".to_string()),
            dedup_key: DedupKey("session:abc".to_string()),
            attempts: 3,
            retry_in: Duration::minutes(15),
            error: "timeout".to_string(),
        };

        assert!(alert.message().contains("через 900с"));
        let json = serde_json::to_value(&alert).expect("serialize alert");
        assert_eq!(json["kind"], "delivery_delayed");
        assert_eq!(json["retry_in"], 900);
    }
}
