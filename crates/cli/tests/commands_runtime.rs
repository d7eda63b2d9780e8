use std::collections::BTreeMap;
use std::env;
use std::sync::{Arc, Mutex, OnceLock};

use chrono::{TimeZone, Utc};
use leadbot_cli::commands::{migrate, outbox, sweep};
use leadbot_core::domain::lead::{
    Contact, ContactMethod, LeadDetails, LeadPayload, LeadSource, ManagerRequest,
};
use leadbot_core::ledger::{DedupLedger, LedgerSnapshot, LedgerTtl};
use leadbot_core::store::{save_snapshot, JsonFileStore, DEDUP_KEY};
use leadbot_core::{DedupKey, Outbox, SystemClock};
use serde_json::Value;
use tempfile::TempDir;

#[test]
fn migrate_returns_success_for_sqlite_backend() {
    with_env(
        &[("LEADBOT_STORAGE_BACKEND", "sqlite"), ("LEADBOT_STORAGE_DATABASE_URL", "sqlite::memory:")],
        || {
            let result = migrate::run();
            assert_eq!(result.exit_code, 0, "expected successful migrate run");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "migrate");
            assert_eq!(payload["status"], "ok");
            assert_eq!(payload["message"], "applied pending migrations");
        },
    );
}

#[test]
fn migrate_is_a_no_op_for_json_backend() {
    let dir = TempDir::new().expect("temp dir");
    let data_dir = dir.path().display().to_string();
    with_env(&[("LEADBOT_STORAGE_DATA_DIR", &data_dir)], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["status"], "ok");
        assert!(payload["message"].as_str().unwrap_or_default().contains("nothing to migrate"));
    });
}

#[test]
fn commands_report_config_failure_for_unknown_backend() {
    with_env(&[("LEADBOT_STORAGE_BACKEND", "redis")], || {
        for result in [migrate::run(), outbox::run(), sweep::run()] {
            assert_eq!(result.exit_code, 2, "expected config validation failure code");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["status"], "error");
            assert_eq!(payload["error_class"], "config_validation");
        }
    });
}

#[test]
fn outbox_lists_pending_jobs_without_contact_data() {
    let dir = TempDir::new().expect("temp dir");
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().expect("runtime");
    runtime.block_on(async {
        let store = Arc::new(JsonFileStore::open(dir.path()).await.expect("store"));
        let clock = Arc::new(SystemClock);
        let ledger = Arc::new(DedupLedger::load(store.clone(), clock.clone(), LedgerTtl::default()).await);
        let outbox = Outbox::load(store, clock, ledger).await;
        outbox.enqueue(manager_payload("abc"), None).await.expect("enqueue");
    });

    let data_dir = dir.path().display().to_string();
    with_env(&[("LEADBOT_STORAGE_DATA_DIR", &data_dir)], || {
        let result = outbox::run();
        assert_eq!(result.exit_code, 0, "expected outbox report");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "outbox");
        assert_eq!(payload["details"]["depth"], 1);
        assert_eq!(payload["details"]["pending"][0]["dedup_key"], "session:abc");
        assert_eq!(payload["details"]["pending"][0]["flow"], "manager");
        assert_eq!(payload["details"]["ledger"]["queued"], 1);
        assert!(!result.output.contains("+79990001122"));
    });
}

#[test]
fn sweep_drops_expired_ledger_entries() {
    let dir = TempDir::new().expect("temp dir");
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().expect("runtime");
    runtime.block_on(async {
        let store = JsonFileStore::open(dir.path()).await.expect("store");
        let long_ago = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        let snapshot = LedgerSnapshot {
            queued: BTreeMap::from([(DedupKey("session:old".to_string()), long_ago)]),
            sent: BTreeMap::from([(DedupKey("session:older".to_string()), long_ago)]),
        };
        save_snapshot(&store, DEDUP_KEY, &snapshot).await.expect("seed ledger");
    });

    let data_dir = dir.path().display().to_string();
    with_env(&[("LEADBOT_STORAGE_DATA_DIR", &data_dir)], || {
        let result = sweep::run();
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["details"]["queued_removed"], 1);
        assert_eq!(payload["details"]["sent_removed"], 1);

        let second = parse_payload(&sweep::run().output);
        assert_eq!(second["details"]["queued_removed"], 0);
    });
}

fn manager_payload(session_id: &str) -> LeadPayload {
    LeadPayload {
        session_id: Some(session_id.to_string()),
        lead_id: None,
        created_at: Utc::now(),
        source: LeadSource { start_param: "organic".to_string(), ..LeadSource::default() },
        contact: Contact {
            phone_e164: Some("+79990001122".to_string()),
            handle: None,
            name: "Иван".to_string(),
        },
        contact_method: ContactMethod::Phone,
        consent: None,
        details: LeadDetails::Manager(ManagerRequest { comment: "перезвоните".to_string() }),
    }
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "LEADBOT_STORAGE_BACKEND",
        "LEADBOT_STORAGE_DATA_DIR",
        "LEADBOT_STORAGE_DATABASE_URL",
        "LEADBOT_DATABASE_URL",
        "LEADBOT_STORAGE_MAX_CONNECTIONS",
        "LEADBOT_STORAGE_TIMEOUT_SECS",
        "LEADBOT_TELEGRAM_BOT_TOKEN",
        "LEADBOT_TELEGRAM_ADMIN_CHAT_ID",
        "LEADBOT_AMOCRM_BASE_URL",
        "LEADBOT_AMOCRM_CLIENT_SECRET",
        "LEADBOT_AMOCRM_REFRESH_TOKEN",
        "LEADBOT_OUTBOX_QUEUED_TTL_SECS",
        "LEADBOT_OUTBOX_SENT_TTL_SECS",
        "LEADBOT_ROUTING_RESPONSIBLES",
        "LEADBOT_LOGGING_LEVEL",
        "LEADBOT_LOGGING_FORMAT",
        "LEADBOT_LOG_LEVEL",
        "LEADBOT_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
