use std::env;
use std::sync::{Mutex, OnceLock};

use nearbux_cli::commands::{config, doctor, migrate, smoke};
use serde_json::Value;

const VALID_ENV: &[(&str, &str)] = &[
    ("NEARBUX_PAYMENT_KEY_ID", "rzp_test_cli"),
    ("NEARBUX_PAYMENT_KEY_SECRET", "rzp_secret_cli"),
    ("NEARBUX_DATABASE_URL", "sqlite::memory:"),
];

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(VALID_ENV, || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_returns_config_failure_without_payment_secret() {
    with_env(&[("NEARBUX_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn smoke_drives_every_flow_with_valid_env() {
    with_env(VALID_ENV, || {
        let result = smoke::run();
        assert_eq!(result.exit_code, 0, "expected successful smoke report: {}", result.output);

        let payload = parse_payload(last_line(&result.output));
        assert_eq!(payload["command"], "smoke");
        assert_eq!(payload["status"], "pass");

        let checks = payload["checks"].as_array().expect("checks array");
        let names: Vec<&str> = checks.iter().filter_map(|check| check["name"].as_str()).collect();
        for expected in [
            "config_validation",
            "db_connectivity",
            "migration_visibility",
            "snapshot_persistence",
            "flow_business_signup",
            "flow_customer_signup",
            "flow_password_reset",
            "flow_promotion",
        ] {
            assert!(names.contains(&expected), "missing smoke check {expected}");
        }
        assert!(checks.iter().all(|check| check["status"] == "pass"));

        let promotion = checks
            .iter()
            .find(|check| check["name"] == "flow_promotion")
            .and_then(|check| check["message"].as_str())
            .unwrap_or_default();
        assert!(promotion.contains("/Businessman_Home"), "unexpected message: {promotion}");
    });
}

#[test]
fn smoke_returns_failure_when_config_invalid() {
    with_env(&[], || {
        let result = smoke::run();
        assert_eq!(result.exit_code, 6, "expected smoke failure code");

        let payload = parse_payload(last_line(&result.output));
        assert_eq!(payload["command"], "smoke");
        assert_eq!(payload["status"], "fail");

        let checks = payload["checks"].as_array().expect("checks array");
        assert_eq!(checks[0]["status"], "fail");
        assert!(checks[1..].iter().all(|check| check["status"] == "skipped"));
    });
}

#[test]
fn config_redacts_payment_secret_and_names_sources() {
    with_env(VALID_ENV, || {
        let output = config::run();
        assert!(output.starts_with("effective config"));
        assert!(output.contains(
            "- payment.key_secret = rzp_*** (source: env (NEARBUX_PAYMENT_KEY_SECRET))"
        ));
        assert!(!output.contains("rzp_secret_cli"));
        assert!(output.contains("- verification.api_key = <unset> (source: default)"));
        assert!(output.contains("- flow.step_timeout_secs = 15 (source: default)"));
    });
}

#[test]
fn doctor_json_reports_every_check() {
    with_env(VALID_ENV, || {
        let payload = parse_payload(&doctor::run(true));
        assert_eq!(payload["overall_status"], "pass");

        let names: Vec<&str> = payload["checks"]
            .as_array()
            .expect("checks array")
            .iter()
            .filter_map(|check| check["name"].as_str())
            .collect();
        assert_eq!(
            names,
            [
                "config_validation",
                "verification_readiness",
                "backend_readiness",
                "database_connectivity"
            ]
        );
    });
}

#[test]
fn doctor_skips_dependent_checks_when_config_fails() {
    with_env(&[], || {
        let output = doctor::run(false);
        assert!(output.starts_with("doctor: one or more readiness checks failed"));
        assert!(output.contains("- [fail] config_validation"));
        assert!(output.contains("- [skip] database_connectivity"));
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn last_line(output: &str) -> &str {
    output.lines().last().unwrap_or_default()
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "NEARBUX_DATABASE_URL",
        "NEARBUX_DATABASE_MAX_CONNECTIONS",
        "NEARBUX_DATABASE_TIMEOUT_SECS",
        "NEARBUX_BACKEND_PROVIDER",
        "NEARBUX_BACKEND_BASE_URL",
        "NEARBUX_BACKEND_TIMEOUT_SECS",
        "NEARBUX_VERIFICATION_PROVIDER",
        "NEARBUX_VERIFICATION_API_KEY",
        "NEARBUX_VERIFICATION_BASE_URL",
        "NEARBUX_VERIFICATION_WIDGET_CONTAINER",
        "NEARBUX_PAYMENT_KEY_ID",
        "NEARBUX_PAYMENT_KEY_SECRET",
        "NEARBUX_PAYMENT_PROMOTION_FEE",
        "NEARBUX_PAYMENT_CURRENCY",
        "NEARBUX_FLOW_STEP_TIMEOUT_SECS",
        "NEARBUX_FLOW_SNAPSHOT_TTL_SECS",
        "NEARBUX_FLOW_SESSION_IDLE_SECS",
        "NEARBUX_SERVER_BIND_ADDRESS",
        "NEARBUX_SERVER_PORT",
        "NEARBUX_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "NEARBUX_LOGGING_LEVEL",
        "NEARBUX_LOGGING_FORMAT",
        "NEARBUX_LOG_LEVEL",
        "NEARBUX_LOG_FORMAT",
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
