use std::env;
use std::fs;
use std::path::Path;

use leadbot_core::config::{resolve_config_path, AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = resolve_config_path(None);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let responsibles = config
        .routing
        .responsibles
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");

    // (key path, rendered value, env keys in precedence order)
    let entries: Vec<(&str, String, &[&str])> = vec![
        ("storage.backend", config.storage.backend.as_str().to_string(), &["LEADBOT_STORAGE_BACKEND"]),
        (
            "storage.data_dir",
            config.storage.data_dir.display().to_string(),
            &["LEADBOT_STORAGE_DATA_DIR"],
        ),
        (
            "storage.database_url",
            config.storage.database_url.clone(),
            &["LEADBOT_STORAGE_DATABASE_URL", "LEADBOT_DATABASE_URL"],
        ),
        (
            "storage.max_connections",
            config.storage.max_connections.to_string(),
            &["LEADBOT_STORAGE_MAX_CONNECTIONS"],
        ),
        (
            "telegram.bot_token",
            redact_bot_token(config.telegram.bot_token.expose_secret()),
            &["LEADBOT_TELEGRAM_BOT_TOKEN"],
        ),
        (
            "telegram.admin_chat_id",
            optional(config.telegram.admin_chat_id),
            &["LEADBOT_TELEGRAM_ADMIN_CHAT_ID"],
        ),
        ("amocrm.base_url", unset_if_empty(&config.amocrm.base_url), &["LEADBOT_AMOCRM_BASE_URL"]),
        ("amocrm.client_id", unset_if_empty(&config.amocrm.client_id), &["LEADBOT_AMOCRM_CLIENT_ID"]),
        (
            "amocrm.client_secret",
            redact_secret(&config.amocrm.client_secret),
            &["LEADBOT_AMOCRM_CLIENT_SECRET"],
        ),
        (
            "amocrm.refresh_token",
            redact_secret(&config.amocrm.refresh_token),
            &["LEADBOT_AMOCRM_REFRESH_TOKEN"],
        ),
        ("amocrm.pipeline_id", optional(config.amocrm.pipeline_id), &["LEADBOT_AMOCRM_PIPELINE_ID"]),
        ("amocrm.status_id", optional(config.amocrm.status_id), &["LEADBOT_AMOCRM_STATUS_ID"]),
        (
            "outbox.tick_interval_ms",
            config.outbox.tick_interval_ms.to_string(),
            &["LEADBOT_OUTBOX_TICK_INTERVAL_MS"],
        ),
        (
            "outbox.alert_after_attempts",
            config.outbox.alert_after_attempts.to_string(),
            &["LEADBOT_OUTBOX_ALERT_AFTER_ATTEMPTS"],
        ),
        (
            "outbox.max_attempts",
            config.outbox.max_attempts.map_or_else(|| "<unbounded>".to_string(), |n| n.to_string()),
            &["LEADBOT_OUTBOX_MAX_ATTEMPTS"],
        ),
        (
            "outbox.queued_ttl_secs",
            config.outbox.queued_ttl_secs.to_string(),
            &["LEADBOT_OUTBOX_QUEUED_TTL_SECS"],
        ),
        (
            "outbox.sent_ttl_secs",
            config.outbox.sent_ttl_secs.to_string(),
            &["LEADBOT_OUTBOX_SENT_TTL_SECS"],
        ),
        (
            "routing.responsibles",
            if responsibles.is_empty() { "<none>".to_string() } else { responsibles },
            &["LEADBOT_ROUTING_RESPONSIBLES"],
        ),
        ("server.bind_address", config.server.bind_address.clone(), &["LEADBOT_SERVER_BIND_ADDRESS"]),
        ("server.port", config.server.port.to_string(), &["LEADBOT_SERVER_PORT"]),
        (
            "logging.level",
            config.logging.level.clone(),
            &["LEADBOT_LOGGING_LEVEL", "LEADBOT_LOG_LEVEL"],
        ),
        (
            "logging.format",
            format!("{:?}", config.logging.format),
            &["LEADBOT_LOGGING_FORMAT", "LEADBOT_LOG_FORMAT"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key_path, value, env_keys) in entries {
        lines.push(render_line(
            key_path,
            &value,
            field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref()),
        ));
    }

    lines.join("\n")
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "<unset>".to_string(), |value| value.to_string())
}

fn unset_if_empty(value: &str) -> String {
    if value.trim().is_empty() {
        "<unset>".to_string()
    } else {
        value.to_string()
    }
}

fn redact_secret(secret: &SecretString) -> String {
    if secret.expose_secret().trim().is_empty() {
        "<empty>".to_string()
    } else {
        "<redacted>".to_string()
    }
}

/// Bot tokens look like `<bot id>:<secret>`; the id is safe to show.
fn redact_bot_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((bot_id, _)) = trimmed.split_once(':') {
        return format!("{bot_id}:***");
    }

    "<redacted>".to_string()
}
