use std::env;
use std::sync::{Mutex, OnceLock};

use serde_json::Value;
use slotline_cli::commands::{config, doctor, migrate, seed};
use tempfile::TempDir;

fn sqlite_url(dir: &TempDir) -> String {
    format!("sqlite://{}?mode=rwc", dir.path().join("slotline.db").display())
}

#[test]
fn migrate_returns_success_for_sqlite_file() {
    let dir = TempDir::new().expect("tempdir");
    let url = sqlite_url(&dir);
    with_env(&[("SLOTLINE_DATABASE_URL", &url)], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_is_a_noop_for_memory_backend() {
    with_env(&[("SLOTLINE_DATABASE_BACKEND", "memory")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0);

        let payload = parse_payload(&result.output);
        assert!(payload["message"].as_str().unwrap_or_default().contains("memory backend"));
    });
}

#[test]
fn migrate_returns_config_failure_for_non_sqlite_url() {
    with_env(&[("SLOTLINE_DATABASE_URL", "postgres://localhost/slotline")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn seed_loads_demo_tenant_and_is_idempotent() {
    let dir = TempDir::new().expect("tempdir");
    let url = sqlite_url(&dir);
    with_env(&[("SLOTLINE_DATABASE_URL", &url)], || {
        let first = seed::run();
        assert_eq!(first.exit_code, 0, "expected first seed success: {}", first.output);
        let first_payload = parse_payload(&first.output);
        assert_eq!(first_payload["command"], "seed");
        assert_eq!(first_payload["status"], "ok");

        let message = first_payload["message"].as_str().unwrap_or_default();
        assert!(message.contains("demo-salon"));
        assert!(message.contains("  - demo-haircut"));
        assert!(message.contains("  - demo-massage"));
        assert!(message.contains("  - demo-manicure"));

        let second = seed::run();
        assert_eq!(second.exit_code, 0, "expected second seed success: {}", second.output);
        assert_eq!(first_payload["message"], parse_payload(&second.output)["message"]);
    });
}

#[test]
fn seed_refuses_memory_backend() {
    with_env(&[("SLOTLINE_DATABASE_BACKEND", "memory")], || {
        let result = seed::run();
        assert_eq!(result.exit_code, 2);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["error_class"], "unsupported_backend");
    });
}

#[test]
fn doctor_passes_with_reachable_storage() {
    let dir = TempDir::new().expect("tempdir");
    let url = sqlite_url(&dir);
    with_env(&[("SLOTLINE_DATABASE_URL", &url)], || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 0, "expected passing doctor: {}", result.output);

        let report = parse_payload(&result.output);
        assert_eq!(report["overall_status"], "pass");
        let names = report["checks"]
            .as_array()
            .map(|checks| checks.iter().filter_map(|check| check["name"].as_str()).collect::<Vec<_>>())
            .unwrap_or_default();
        assert_eq!(names, vec!["config_validation", "channel_transport", "storage_readiness"]);
    });
}

#[test]
fn doctor_skips_checks_when_config_is_invalid() {
    with_env(&[("SLOTLINE_LOGGING_FORMAT", "xml")], || {
        let result = doctor::run(false);
        assert_eq!(result.exit_code, 1);
        assert!(result.output.contains("- [fail] config_validation"));
        assert!(result.output.contains("- [skip] storage_readiness"));
    });
}

#[test]
fn config_reports_env_sources() {
    with_env(&[("SLOTLINE_SERVER_PORT", "9191")], || {
        let output = config::run();
        assert!(output.contains("- server.port = 9191 (source: env (SLOTLINE_SERVER_PORT))"));
        assert!(output.contains("- delivery.credential_ttl_secs = 300 (source: default)"));
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard = match ENV_LOCK.get_or_init(|| Mutex::new(())).lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };

    let keys = [
        "SLOTLINE_DATABASE_BACKEND",
        "SLOTLINE_DATABASE_URL",
        "SLOTLINE_DATABASE_MAX_CONNECTIONS",
        "SLOTLINE_DATABASE_TIMEOUT_SECS",
        "SLOTLINE_CHANNEL_TRANSPORT",
        "SLOTLINE_CHANNEL_API_BASE_URL",
        "SLOTLINE_DELIVERY_MAX_ATTEMPTS",
        "SLOTLINE_DELIVERY_BASE_DELAY_MS",
        "SLOTLINE_DELIVERY_MAX_DELAY_MS",
        "SLOTLINE_DELIVERY_CREDENTIAL_TTL_SECS",
        "SLOTLINE_DELIVERY_SEND_TIMEOUT_MS",
        "SLOTLINE_DELIVERY_FAILED_BUCKET_CAPACITY",
        "SLOTLINE_ENGINE_CALL_TIMEOUT_MS",
        "SLOTLINE_SERVER_BIND_ADDRESS",
        "SLOTLINE_SERVER_PORT",
        "SLOTLINE_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "SLOTLINE_LOGGING_LEVEL",
        "SLOTLINE_LOGGING_FORMAT",
        "SLOTLINE_LOG_LEVEL",
        "SLOTLINE_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(test_fn));

    for (key, value) in previous_values {
        match value {
            Some(value) => env::set_var(key, value),
            None => env::remove_var(key),
        }
    }

    if let Err(panic) = outcome {
        std::panic::resume_unwind(panic);
    }
}
