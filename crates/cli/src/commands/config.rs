use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use nearbux_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

struct Entry {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

impl Entry {
    fn new(key: &'static str, value: impl Into<String>, env_keys: &'static [&'static str]) -> Self {
        Self { key, value: value.into(), env_keys }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for entry in entries(&config) {
        let source = field_source(
            entry.key,
            entry.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(entry.key, &entry.value, source));
    }

    lines.join("\n")
}

fn entries(config: &AppConfig) -> Vec<Entry> {
    let api_key = match &config.verification.api_key {
        Some(key) => redact_secret(key.expose_secret()),
        None => "<unset>".to_string(),
    };

    vec![
        Entry::new("database.url", &config.database.url, &["NEARBUX_DATABASE_URL"]),
        Entry::new(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["NEARBUX_DATABASE_MAX_CONNECTIONS"],
        ),
        Entry::new(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["NEARBUX_DATABASE_TIMEOUT_SECS"],
        ),
        Entry::new(
            "backend.provider",
            format!("{:?}", config.backend.provider),
            &["NEARBUX_BACKEND_PROVIDER"],
        ),
        Entry::new("backend.base_url", &config.backend.base_url, &["NEARBUX_BACKEND_BASE_URL"]),
        Entry::new(
            "backend.timeout_secs",
            config.backend.timeout_secs.to_string(),
            &["NEARBUX_BACKEND_TIMEOUT_SECS"],
        ),
        Entry::new(
            "verification.provider",
            format!("{:?}", config.verification.provider),
            &["NEARBUX_VERIFICATION_PROVIDER"],
        ),
        Entry::new("verification.api_key", api_key, &["NEARBUX_VERIFICATION_API_KEY"]),
        Entry::new(
            "verification.base_url",
            &config.verification.base_url,
            &["NEARBUX_VERIFICATION_BASE_URL"],
        ),
        Entry::new(
            "verification.widget_container",
            &config.verification.widget_container,
            &["NEARBUX_VERIFICATION_WIDGET_CONTAINER"],
        ),
        Entry::new("payment.key_id", &config.payment.key_id, &["NEARBUX_PAYMENT_KEY_ID"]),
        Entry::new(
            "payment.key_secret",
            redact_secret(config.payment.key_secret.expose_secret()),
            &["NEARBUX_PAYMENT_KEY_SECRET"],
        ),
        Entry::new(
            "payment.promotion_fee",
            config.payment.promotion_fee.to_string(),
            &["NEARBUX_PAYMENT_PROMOTION_FEE"],
        ),
        Entry::new("payment.currency", &config.payment.currency, &["NEARBUX_PAYMENT_CURRENCY"]),
        Entry::new(
            "flow.step_timeout_secs",
            config.flow.step_timeout_secs.to_string(),
            &["NEARBUX_FLOW_STEP_TIMEOUT_SECS"],
        ),
        Entry::new(
            "flow.snapshot_ttl_secs",
            config.flow.snapshot_ttl_secs.to_string(),
            &["NEARBUX_FLOW_SNAPSHOT_TTL_SECS"],
        ),
        Entry::new(
            "flow.session_idle_secs",
            config.flow.session_idle_secs.to_string(),
            &["NEARBUX_FLOW_SESSION_IDLE_SECS"],
        ),
        Entry::new(
            "server.bind_address",
            &config.server.bind_address,
            &["NEARBUX_SERVER_BIND_ADDRESS"],
        ),
        Entry::new("server.port", config.server.port.to_string(), &["NEARBUX_SERVER_PORT"]),
        Entry::new(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["NEARBUX_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        Entry::new(
            "logging.level",
            &config.logging.level,
            &["NEARBUX_LOGGING_LEVEL", "NEARBUX_LOG_LEVEL"],
        ),
        Entry::new(
            "logging.format",
            format!("{:?}", config.logging.format),
            &["NEARBUX_LOGGING_FORMAT", "NEARBUX_LOG_FORMAT"],
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    ["nearbux.toml", "config/nearbux.toml"]
        .into_iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
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

/// Keeps a short prefix so operators can tell test and live keys apart.
fn redact_secret(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('_') {
        if prefix.len() <= 8 {
            return format!("{prefix}_***");
        }
    }

    "<redacted>".to_string()
}

#[cfg(test)]
mod tests {
    use super::redact_secret;

    #[test]
    fn secrets_never_render_past_their_prefix() {
        assert_eq!(redact_secret("rzp_test_abcdef"), "rzp_***");
        assert_eq!(redact_secret("plainsecret"), "<redacted>");
        assert_eq!(redact_secret("   "), "<empty>");
    }
}
