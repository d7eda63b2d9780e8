use std::time::Duration;

use async_trait::async_trait;
use leadbot_core::config::TelegramConfig;
use leadbot_core::notify::{OperatorAlert, OperatorNotifier};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use tracing::{info, warn};

/// Posts operator alerts to the admin chat through the Bot API.
pub struct TelegramNotifier {
    http: Client,
    api_base_url: String,
    bot_token: SecretString,
    chat_id: i64,
}

impl TelegramNotifier {
    /// `None` when alerts are not configured.
    pub fn from_config(config: &TelegramConfig) -> Option<Self> {
        if !config.alerts_enabled() {
            return None;
        }
        let chat_id = config.admin_chat_id?;
        let http = Client::builder().timeout(Duration::from_secs(10)).build().ok()?;
        Some(Self {
            http,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            bot_token: config.bot_token.clone(),
            chat_id,
        })
    }

    async fn send_message(&self, text: &str) -> Result<(), String> {
        let url = format!("{}/bot{}/sendMessage", self.api_base_url, self.bot_token.expose_secret());
        let response = self
            .http
            .post(url)
            .json(&json!({ "chat_id": self.chat_id, "text": text }))
            .send()
            .await
            .map_err(|error| error.without_url().to_string())?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(format!("sendMessage returned {status}"))
        }
    }
}

#[async_trait]
impl OperatorNotifier for TelegramNotifier {
    async fn notify(&self, alert: OperatorAlert) {
        match self.send_message(&alert.message()).await {
            Ok(()) => info!(
                event_name = "notify.telegram.sent",
                job_id = %alert.job_id(),
                "operator alert delivered"
            ),
            Err(error) => warn!(
                event_name = "notify.telegram.failed",
                job_id = %alert.job_id(),
                error = %error,
                "operator alert could not be delivered"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::extract::{Path, State};
    use axum::routing::post;
    use axum::{Json, Router};
    use chrono::Duration as ChronoDuration;
    use leadbot_core::domain::outbox::{DedupKey, JobId};
    use serde_json::Value;

    use super::*;

    type Sent = Arc<Mutex<Vec<(String, Value)>>>;

    async fn send_message(
        State(sent): State<Sent>,
        Path(bot): Path<String>,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        sent.lock().expect("sent lock").push((bot, body));
        Json(json!({ "ok": true }))
    }

    fn config(api_base_url: String) -> TelegramConfig {
        TelegramConfig {
            bot_token: "123:abc".to_string().into(),
            admin_chat_id: Some(-100500),
            api_base_url,
        }
    }

    #[test]
    fn notifier_is_disabled_without_admin_chat() {
        let mut config = config("https://api.telegram.org".to_string());
        config.admin_chat_id = None;

        assert!(TelegramNotifier::from_config(&config).is_none());
    }

    #[tokio::test]
    async fn alert_is_posted_to_admin_chat() {
        let sent: Sent = Arc::default();
        let app = Router::new()
            .route("/{bot}/sendMessage", post(send_message))
            .with_state(sent.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("local addr");
        tokio::spawn(async move { axum::serve(listener, app).await });

        let notifier =
            TelegramNotifier::from_config(&config(format!("http://{address}/"))).expect("enabled");
        notifier
            .notify(OperatorAlert::DeliveryDelayed {
                job_id: JobId("job-1".to_string()),
                dedup_key: DedupKey("session:abc".to_string()),
                attempts: 3,
                retry_in: ChronoDuration::minutes(15),
                error: "crm returned http 502: bad gateway".to_string(),
            })
            .await;

        let sent = sent.lock().expect("sent lock").clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "bot123:abc");
        assert_eq!(sent[0].1["chat_id"], -100500);
        assert_eq!(sent[0].1["text"], "⚠️ amoCRM недоступна, попытка 3, повторная попытка через 900с");
    }
}
