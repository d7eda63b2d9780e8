use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Duration;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crm::DeliveryPlan;
use crate::domain::lead::ResponsibleId;
use crate::ledger::LedgerTtl;
use crate::outbox::recovery::{default_rules, RecoveryRule};
use crate::outbox::worker::DeliveryPolicy;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub telegram: TelegramConfig,
    pub amocrm: AmoCrmConfig,
    pub outbox: OutboxConfig,
    pub routing: RoutingConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub data_dir: PathBuf,
    pub database_url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
    pub admin_chat_id: Option<i64>,
    pub api_base_url: String,
}

#[derive(Clone, Debug)]
pub struct AmoCrmConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_uri: String,
    pub refresh_token: SecretString,
    pub pipeline_id: Option<u64>,
    pub status_id: Option<u64>,
    pub fields: AmoFieldIds,
    pub contact_telegram_field_id: Option<u64>,
    pub timeout_secs: u64,
}

/// Custom field ids of the lead card. Unset ids are simply not sent.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct AmoFieldIds {
    pub direction: Option<u64>,
    pub country: Option<u64>,
    pub delivery_city: Option<u64>,
    pub city: Option<u64>,
    pub start_param: Option<u64>,
    pub utm_source: Option<u64>,
    pub utm_medium: Option<u64>,
    pub utm_campaign: Option<u64>,
    pub utm_content: Option<u64>,
    pub consent_version: Option<u64>,
    pub consent_at: Option<u64>,
}

#[derive(Clone, Debug)]
pub struct OutboxConfig {
    pub tick_interval_ms: u64,
    pub alert_after_attempts: u32,
    pub max_attempts: Option<u32>,
    pub queued_ttl_secs: u64,
    pub sent_ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub task_due_minutes: u32,
    /// Extra rules tried after the built-in rejected-field rules.
    pub recovery_rules: Vec<RecoveryRule>,
}

#[derive(Clone, Debug, Default)]
pub struct RoutingConfig {
    pub responsibles: Vec<ResponsibleId>,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    Json,
    Sqlite,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub storage_backend: Option<StorageBackend>,
    pub data_dir: Option<PathBuf>,
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub server_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

pub const CONFIG_FILE_CANDIDATES: [&str; 2] = ["leadbot.toml", "config/leadbot.toml"];

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                backend: StorageBackend::Json,
                data_dir: PathBuf::from("data"),
                database_url: "sqlite://leadbot.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            telegram: TelegramConfig {
                bot_token: String::new().into(),
                admin_chat_id: None,
                api_base_url: "https://api.telegram.org".to_string(),
            },
            amocrm: AmoCrmConfig {
                base_url: String::new(),
                client_id: String::new(),
                client_secret: String::new().into(),
                redirect_uri: String::new(),
                refresh_token: String::new().into(),
                pipeline_id: None,
                status_id: None,
                fields: AmoFieldIds::default(),
                contact_telegram_field_id: None,
                timeout_secs: 20,
            },
            outbox: OutboxConfig {
                tick_interval_ms: 2_000,
                alert_after_attempts: 3,
                max_attempts: None,
                queued_ttl_secs: 6 * 60 * 60,
                sent_ttl_secs: 72 * 60 * 60,
                sweep_interval_secs: 60 * 60,
                task_due_minutes: 15,
                recovery_rules: Vec::new(),
            },
            routing: RoutingConfig::default(),
            server: ServerConfig { bind_address: "127.0.0.1".to_string(), port: 8080 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(ConfigError::Validation(format!(
                "unsupported storage backend `{other}` (expected json|sqlite)"
            ))),
        }
    }
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Sqlite => "sqlite",
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AmoCrmConfig {
    pub fn is_configured(&self) -> bool {
        !self.base_url.trim().is_empty()
    }
}

impl TelegramConfig {
    /// Operator alerts go to Telegram only when both token and chat are set.
    pub fn alerts_enabled(&self) -> bool {
        self.admin_chat_id.is_some() && !self.bot_token.expose_secret().trim().is_empty()
    }
}

impl OutboxConfig {
    pub fn ledger_ttl(&self) -> LedgerTtl {
        LedgerTtl {
            queued: ttl_duration(self.queued_ttl_secs).unwrap_or_else(Duration::max_value),
            sent: ttl_duration(self.sent_ttl_secs).unwrap_or_else(Duration::max_value),
        }
    }

    pub fn delivery_policy(&self) -> DeliveryPolicy {
        let mut recovery_rules = default_rules();
        recovery_rules.extend(self.recovery_rules.iter().cloned());
        DeliveryPolicy {
            alert_after_attempts: self.alert_after_attempts,
            max_attempts: self.max_attempts,
            recovery_rules,
            plan: DeliveryPlan { task_due_in: Duration::minutes(i64::from(self.task_due_minutes)) },
        }
    }

    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_interval_ms)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }
}

/// `None` when `secs` does not fit a chrono duration.
fn ttl_duration(secs: u64) -> Option<Duration> {
    i64::try_from(secs).ok().and_then(Duration::try_seconds)
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("leadbot.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(storage) = patch.storage {
            if let Some(backend) = storage.backend {
                self.storage.backend = backend;
            }
            if let Some(data_dir) = storage.data_dir {
                self.storage.data_dir = data_dir;
            }
            if let Some(database_url) = storage.database_url {
                self.storage.database_url = database_url;
            }
            if let Some(max_connections) = storage.max_connections {
                self.storage.max_connections = max_connections;
            }
            if let Some(timeout_secs) = storage.timeout_secs {
                self.storage.timeout_secs = timeout_secs;
            }
        }

        if let Some(telegram) = patch.telegram {
            if let Some(bot_token) = telegram.bot_token {
                self.telegram.bot_token = secret_value(bot_token);
            }
            if let Some(admin_chat_id) = telegram.admin_chat_id {
                self.telegram.admin_chat_id = Some(admin_chat_id);
            }
            if let Some(api_base_url) = telegram.api_base_url {
                self.telegram.api_base_url = api_base_url;
            }
        }

        if let Some(amocrm) = patch.amocrm {
            if let Some(base_url) = amocrm.base_url {
                self.amocrm.base_url = base_url;
            }
            if let Some(client_id) = amocrm.client_id {
                self.amocrm.client_id = client_id;
            }
            if let Some(client_secret) = amocrm.client_secret {
                self.amocrm.client_secret = secret_value(client_secret);
            }
            if let Some(redirect_uri) = amocrm.redirect_uri {
                self.amocrm.redirect_uri = redirect_uri;
            }
            if let Some(refresh_token) = amocrm.refresh_token {
                self.amocrm.refresh_token = secret_value(refresh_token);
            }
            if let Some(pipeline_id) = amocrm.pipeline_id {
                self.amocrm.pipeline_id = Some(pipeline_id);
            }
            if let Some(status_id) = amocrm.status_id {
                self.amocrm.status_id = Some(status_id);
            }
            if let Some(fields) = amocrm.fields {
                self.amocrm.fields = fields;
            }
            if let Some(field_id) = amocrm.contact_telegram_field_id {
                self.amocrm.contact_telegram_field_id = Some(field_id);
            }
            if let Some(timeout_secs) = amocrm.timeout_secs {
                self.amocrm.timeout_secs = timeout_secs;
            }
        }

        if let Some(outbox) = patch.outbox {
            if let Some(tick_interval_ms) = outbox.tick_interval_ms {
                self.outbox.tick_interval_ms = tick_interval_ms;
            }
            if let Some(alert_after_attempts) = outbox.alert_after_attempts {
                self.outbox.alert_after_attempts = alert_after_attempts;
            }
            if let Some(max_attempts) = outbox.max_attempts {
                self.outbox.max_attempts = Some(max_attempts);
            }
            if let Some(queued_ttl_secs) = outbox.queued_ttl_secs {
                self.outbox.queued_ttl_secs = queued_ttl_secs;
            }
            if let Some(sent_ttl_secs) = outbox.sent_ttl_secs {
                self.outbox.sent_ttl_secs = sent_ttl_secs;
            }
            if let Some(sweep_interval_secs) = outbox.sweep_interval_secs {
                self.outbox.sweep_interval_secs = sweep_interval_secs;
            }
            if let Some(task_due_minutes) = outbox.task_due_minutes {
                self.outbox.task_due_minutes = task_due_minutes;
            }
            if let Some(recovery_rules) = outbox.recovery_rules {
                self.outbox.recovery_rules = recovery_rules;
            }
        }

        if let Some(routing) = patch.routing {
            if let Some(responsibles) = routing.responsibles {
                self.routing.responsibles = responsibles.into_iter().map(ResponsibleId).collect();
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("LEADBOT_STORAGE_BACKEND") {
            self.storage.backend = value.parse()?;
        }
        if let Some(value) = read_env("LEADBOT_STORAGE_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(value);
        }
        let database_url =
            read_env("LEADBOT_STORAGE_DATABASE_URL").or_else(|| read_env("LEADBOT_DATABASE_URL"));
        if let Some(value) = database_url {
            self.storage.database_url = value;
        }
        if let Some(value) = read_env("LEADBOT_STORAGE_MAX_CONNECTIONS") {
            self.storage.max_connections = parse_u32("LEADBOT_STORAGE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("LEADBOT_STORAGE_TIMEOUT_SECS") {
            self.storage.timeout_secs = parse_u64("LEADBOT_STORAGE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LEADBOT_TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = secret_value(value);
        }
        if let Some(value) = read_env("LEADBOT_TELEGRAM_ADMIN_CHAT_ID") {
            self.telegram.admin_chat_id = Some(parse_i64("LEADBOT_TELEGRAM_ADMIN_CHAT_ID", &value)?);
        }
        if let Some(value) = read_env("LEADBOT_TELEGRAM_API_BASE_URL") {
            self.telegram.api_base_url = value;
        }

        if let Some(value) = read_env("LEADBOT_AMOCRM_BASE_URL") {
            self.amocrm.base_url = value;
        }
        if let Some(value) = read_env("LEADBOT_AMOCRM_CLIENT_ID") {
            self.amocrm.client_id = value;
        }
        if let Some(value) = read_env("LEADBOT_AMOCRM_CLIENT_SECRET") {
            self.amocrm.client_secret = secret_value(value);
        }
        if let Some(value) = read_env("LEADBOT_AMOCRM_REDIRECT_URI") {
            self.amocrm.redirect_uri = value;
        }
        if let Some(value) = read_env("LEADBOT_AMOCRM_REFRESH_TOKEN") {
            self.amocrm.refresh_token = secret_value(value);
        }
        if let Some(value) = read_env("LEADBOT_AMOCRM_PIPELINE_ID") {
            self.amocrm.pipeline_id = Some(parse_u64("LEADBOT_AMOCRM_PIPELINE_ID", &value)?);
        }
        if let Some(value) = read_env("LEADBOT_AMOCRM_STATUS_ID") {
            self.amocrm.status_id = Some(parse_u64("LEADBOT_AMOCRM_STATUS_ID", &value)?);
        }
        if let Some(value) = read_env("LEADBOT_AMOCRM_TIMEOUT_SECS") {
            self.amocrm.timeout_secs = parse_u64("LEADBOT_AMOCRM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LEADBOT_OUTBOX_TICK_INTERVAL_MS") {
            self.outbox.tick_interval_ms = parse_u64("LEADBOT_OUTBOX_TICK_INTERVAL_MS", &value)?;
        }
        if let Some(value) = read_env("LEADBOT_OUTBOX_ALERT_AFTER_ATTEMPTS") {
            self.outbox.alert_after_attempts =
                parse_u32("LEADBOT_OUTBOX_ALERT_AFTER_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("LEADBOT_OUTBOX_MAX_ATTEMPTS") {
            self.outbox.max_attempts = Some(parse_u32("LEADBOT_OUTBOX_MAX_ATTEMPTS", &value)?);
        }
        if let Some(value) = read_env("LEADBOT_OUTBOX_QUEUED_TTL_SECS") {
            self.outbox.queued_ttl_secs = parse_u64("LEADBOT_OUTBOX_QUEUED_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("LEADBOT_OUTBOX_SENT_TTL_SECS") {
            self.outbox.sent_ttl_secs = parse_u64("LEADBOT_OUTBOX_SENT_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("LEADBOT_OUTBOX_SWEEP_INTERVAL_SECS") {
            self.outbox.sweep_interval_secs =
                parse_u64("LEADBOT_OUTBOX_SWEEP_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("LEADBOT_OUTBOX_TASK_DUE_MINUTES") {
            self.outbox.task_due_minutes = parse_u32("LEADBOT_OUTBOX_TASK_DUE_MINUTES", &value)?;
        }

        if let Some(value) = read_env("LEADBOT_ROUTING_RESPONSIBLES") {
            self.routing.responsibles = parse_id_list("LEADBOT_ROUTING_RESPONSIBLES", &value)?;
        }

        if let Some(value) = read_env("LEADBOT_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("LEADBOT_SERVER_PORT") {
            self.server.port = parse_u16("LEADBOT_SERVER_PORT", &value)?;
        }

        let log_level = read_env("LEADBOT_LOGGING_LEVEL").or_else(|| read_env("LEADBOT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("LEADBOT_LOGGING_FORMAT").or_else(|| read_env("LEADBOT_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(backend) = overrides.storage_backend {
            self.storage.backend = backend;
        }
        if let Some(data_dir) = overrides.data_dir {
            self.storage.data_dir = data_dir;
        }
        if let Some(database_url) = overrides.database_url {
            self.storage.database_url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_storage(&self.storage)?;
        validate_telegram(&self.telegram)?;
        validate_amocrm(&self.amocrm)?;
        validate_outbox(&self.outbox)?;
        validate_routing(&self.routing)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    CONFIG_FILE_CANDIDATES.into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn is_sqlite_url(url: &str) -> bool {
    let url = url.trim();
    url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:"
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn validate_storage(storage: &StorageConfig) -> Result<(), ConfigError> {
    match storage.backend {
        StorageBackend::Json => {
            if storage.data_dir.as_os_str().is_empty() {
                return Err(ConfigError::Validation(
                    "storage.data_dir is required for the json backend".to_string(),
                ));
            }
        }
        StorageBackend::Sqlite => {
            if !is_sqlite_url(&storage.database_url) {
                return Err(ConfigError::Validation(
                    "storage.database_url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                        .to_string(),
                ));
            }
        }
    }

    if storage.max_connections == 0 {
        return Err(ConfigError::Validation(
            "storage.max_connections must be greater than zero".to_string(),
        ));
    }

    if storage.timeout_secs == 0 || storage.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "storage.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_telegram(telegram: &TelegramConfig) -> Result<(), ConfigError> {
    if telegram.admin_chat_id.is_some() && telegram.bot_token.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "telegram.bot_token is required when telegram.admin_chat_id is set. Get it from @BotFather"
                .to_string(),
        ));
    }

    if !is_http_url(&telegram.api_base_url) {
        return Err(ConfigError::Validation(
            "telegram.api_base_url must start with http:// or https://".to_string(),
        ));
    }

    Ok(())
}

fn validate_amocrm(amocrm: &AmoCrmConfig) -> Result<(), ConfigError> {
    if amocrm.timeout_secs == 0 || amocrm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "amocrm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if !amocrm.is_configured() {
        return Ok(());
    }

    if !is_http_url(&amocrm.base_url) {
        return Err(ConfigError::Validation(
            "amocrm.base_url must start with http:// or https://".to_string(),
        ));
    }

    let missing = [
        ("amocrm.client_id", amocrm.client_id.trim().is_empty()),
        ("amocrm.client_secret", amocrm.client_secret.expose_secret().trim().is_empty()),
        ("amocrm.redirect_uri", amocrm.redirect_uri.trim().is_empty()),
        ("amocrm.refresh_token", amocrm.refresh_token.expose_secret().trim().is_empty()),
    ];
    if let Some((name, _)) = missing.iter().find(|(_, missing)| *missing) {
        return Err(ConfigError::Validation(format!(
            "{name} is required when amocrm.base_url is set. Get it from the amoCRM integration settings"
        )));
    }

    Ok(())
}

fn validate_outbox(outbox: &OutboxConfig) -> Result<(), ConfigError> {
    if outbox.tick_interval_ms < 100 {
        return Err(ConfigError::Validation(
            "outbox.tick_interval_ms must be at least 100".to_string(),
        ));
    }
    if outbox.alert_after_attempts == 0 {
        return Err(ConfigError::Validation(
            "outbox.alert_after_attempts must be greater than zero".to_string(),
        ));
    }
    if outbox.max_attempts == Some(0) {
        return Err(ConfigError::Validation(
            "outbox.max_attempts must be greater than zero when set".to_string(),
        ));
    }
    if outbox.queued_ttl_secs == 0 || outbox.sent_ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "outbox.queued_ttl_secs and outbox.sent_ttl_secs must be greater than zero".to_string(),
        ));
    }
    for (key, secs) in
        [("queued_ttl_secs", outbox.queued_ttl_secs), ("sent_ttl_secs", outbox.sent_ttl_secs)]
    {
        if ttl_duration(secs).is_none() {
            return Err(ConfigError::Validation(format!(
                "outbox.{key} is out of range: {secs}"
            )));
        }
    }
    if outbox.sweep_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "outbox.sweep_interval_secs must be greater than zero".to_string(),
        ));
    }
    if outbox.task_due_minutes == 0 {
        return Err(ConfigError::Validation(
            "outbox.task_due_minutes must be greater than zero".to_string(),
        ));
    }
    if outbox.recovery_rules.iter().any(|rule| rule.pattern.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "outbox.recovery_rules entries need a non-empty pattern".to_string(),
        ));
    }

    Ok(())
}

fn validate_routing(routing: &RoutingConfig) -> Result<(), ConfigError> {
    if routing.responsibles.iter().any(|id| id.0 == 0) {
        return Err(ConfigError::Validation(
            "routing.responsibles must contain only non-zero amoCRM user ids".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse::<u64>().map_err(|_| invalid_override(key, value))
}

fn parse_i64(key: &str, value: &str) -> Result<i64, ConfigError> {
    value.trim().parse::<i64>().map_err(|_| invalid_override(key, value))
}

/// Comma-separated ids; blank entries are ignored.
fn parse_id_list(key: &str, value: &str) -> Result<Vec<ResponsibleId>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| item.parse::<u64>().map(ResponsibleId).map_err(|_| invalid_override(key, value)))
        .collect()
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    storage: Option<StoragePatch>,
    telegram: Option<TelegramPatch>,
    amocrm: Option<AmoCrmPatch>,
    outbox: Option<OutboxPatch>,
    routing: Option<RoutingPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct StoragePatch {
    backend: Option<StorageBackend>,
    data_dir: Option<PathBuf>,
    database_url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TelegramPatch {
    bot_token: Option<String>,
    admin_chat_id: Option<i64>,
    api_base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AmoCrmPatch {
    base_url: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    redirect_uri: Option<String>,
    refresh_token: Option<String>,
    pipeline_id: Option<u64>,
    status_id: Option<u64>,
    fields: Option<AmoFieldIds>,
    contact_telegram_field_id: Option<u64>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct OutboxPatch {
    tick_interval_ms: Option<u64>,
    alert_after_attempts: Option<u32>,
    max_attempts: Option<u32>,
    queued_ttl_secs: Option<u64>,
    sent_ttl_secs: Option<u64>,
    sweep_interval_secs: Option<u64>,
    task_due_minutes: Option<u32>,
    recovery_rules: Option<Vec<RecoveryRule>>,
}

#[derive(Debug, Default, Deserialize)]
struct RoutingPatch {
    responsibles: Option<Vec<u64>>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
