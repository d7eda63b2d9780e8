use leadbot_core::config::{AppConfig, LoadOptions, StorageBackend};
use serde::Serialize;

use crate::commands::open_store;

const STORAGE_PROBE_KEY: &str = "health_probe";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_storage(&config));
            checks.push(check_amocrm(&config));
            checks.push(check_alerts(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["storage_readiness", "amocrm_settings", "operator_alerts"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    // Skipped checks are informational; only failures fail the report.
    let any_failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let overall_status = if any_failed { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if any_failed {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: all readiness checks passed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_storage(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "storage_readiness",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let result = runtime.block_on(async {
        let (store, pool) = open_store(&config.storage).await.map_err(|error| format!("{error:#}"))?;
        let probe = store.read(STORAGE_PROBE_KEY).await.map_err(|error| error.to_string());
        if let Some(pool) = pool {
            pool.close().await;
        }
        probe.map(|_| ())
    });

    let target = match config.storage.backend {
        StorageBackend::Json => format!("json snapshots in `{}`", config.storage.data_dir.display()),
        StorageBackend::Sqlite => format!("sqlite at `{}`", config.storage.database_url),
    };
    match result {
        Ok(()) => DoctorCheck {
            name: "storage_readiness",
            status: CheckStatus::Pass,
            details: format!("{target} readable"),
        },
        Err(error) => DoctorCheck {
            name: "storage_readiness",
            status: CheckStatus::Fail,
            details: format!("{target}: {error}"),
        },
    }
}

fn check_amocrm(config: &AppConfig) -> DoctorCheck {
    if !config.amocrm.is_configured() {
        return DoctorCheck {
            name: "amocrm_settings",
            status: CheckStatus::Fail,
            details: "amocrm.base_url is empty; the server refuses to start without it".to_string(),
        };
    }

    let fields = &config.amocrm.fields;
    let mapped = [
        fields.direction,
        fields.country,
        fields.delivery_city,
        fields.city,
        fields.start_param,
        fields.utm_source,
        fields.utm_medium,
        fields.utm_campaign,
        fields.utm_content,
        fields.consent_version,
        fields.consent_at,
    ]
    .iter()
    .filter(|id| id.is_some())
    .count();

    DoctorCheck {
        name: "amocrm_settings",
        status: CheckStatus::Pass,
        details: format!(
            "account `{}`, pipeline {}, {mapped} lead custom field(s) mapped",
            config.amocrm.base_url,
            config.amocrm.pipeline_id.map_or_else(|| "<default>".to_string(), |id| id.to_string()),
        ),
    }
}

fn check_alerts(config: &AppConfig) -> DoctorCheck {
    if config.telegram.alerts_enabled() {
        return DoctorCheck {
            name: "operator_alerts",
            status: CheckStatus::Pass,
            details: "operator alerts are sent to the Telegram admin chat".to_string(),
        };
    }

    DoctorCheck {
        name: "operator_alerts",
        status: CheckStatus::Skipped,
        details: "telegram bot token or admin chat missing; alerts go to the log only".to_string(),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
