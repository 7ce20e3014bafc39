use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::payment::PromotionFee;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub backend: BackendConfig,
    pub verification: VerificationConfig,
    pub payment: PaymentConfig,
    pub flow: FlowConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct BackendConfig {
    pub provider: BackendProvider,
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct VerificationConfig {
    pub provider: VerificationProviderKind,
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub widget_container: String,
}

#[derive(Clone, Debug)]
pub struct PaymentConfig {
    pub key_id: String,
    pub key_secret: SecretString,
    pub promotion_fee: Decimal,
    pub currency: String,
}

impl PaymentConfig {
    pub fn fee(&self) -> PromotionFee {
        PromotionFee { amount: self.promotion_fee, currency: self.currency.clone() }
    }
}

#[derive(Clone, Debug)]
pub struct FlowConfig {
    pub step_timeout_secs: u64,
    /// Age after which a stored resume point is ignored and purged.
    pub snapshot_ttl_secs: u64,
    /// Untouched sessions are dropped from the host after this long.
    pub session_idle_secs: u64,
}

impl FlowConfig {
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.snapshot_ttl_secs)
    }

    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.session_idle_secs)
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendProvider {
    Http,
    InMemory,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationProviderKind {
    Console,
    IdentityToolkit,
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
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub backend_provider: Option<BackendProvider>,
    pub backend_base_url: Option<String>,
    pub verification_provider: Option<VerificationProviderKind>,
    pub payment_key_secret: Option<String>,
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

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://nearbux.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            backend: BackendConfig {
                provider: BackendProvider::Http,
                base_url: "http://localhost:3000".to_string(),
                timeout_secs: 5,
            },
            verification: VerificationConfig {
                provider: VerificationProviderKind::Console,
                api_key: None,
                base_url: "https://identitytoolkit.googleapis.com".to_string(),
                widget_container: "recaptcha-container".to_string(),
            },
            payment: PaymentConfig {
                key_id: String::new(),
                key_secret: String::new().into(),
                promotion_fee: Decimal::new(4900, 2),
                currency: "INR".to_string(),
            },
            flow: FlowConfig {
                step_timeout_secs: 15,
                snapshot_ttl_secs: 3_600,
                session_idle_secs: 1_800,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl FromStr for BackendProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "in_memory" | "memory" => Ok(Self::InMemory),
            other => Err(ConfigError::Validation(format!(
                "unsupported backend provider `{other}` (expected http|in_memory)"
            ))),
        }
    }
}

impl FromStr for VerificationProviderKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "console" => Ok(Self::Console),
            "identity_toolkit" | "firebase" => Ok(Self::IdentityToolkit),
            other => Err(ConfigError::Validation(format!(
                "unsupported verification provider `{other}` (expected console|identity_toolkit)"
            ))),
        }
    }
}

impl FromStr for LogFormat {
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

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("nearbux.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(backend) = patch.backend {
            if let Some(provider) = backend.provider {
                self.backend.provider = provider;
            }
            if let Some(base_url) = backend.base_url {
                self.backend.base_url = base_url;
            }
            if let Some(timeout_secs) = backend.timeout_secs {
                self.backend.timeout_secs = timeout_secs;
            }
        }

        if let Some(verification) = patch.verification {
            if let Some(provider) = verification.provider {
                self.verification.provider = provider;
            }
            if let Some(api_key) = verification.api_key {
                self.verification.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = verification.base_url {
                self.verification.base_url = base_url;
            }
            if let Some(widget_container) = verification.widget_container {
                self.verification.widget_container = widget_container;
            }
        }

        if let Some(payment) = patch.payment {
            if let Some(key_id) = payment.key_id {
                self.payment.key_id = key_id;
            }
            if let Some(key_secret) = payment.key_secret {
                self.payment.key_secret = secret_value(key_secret);
            }
            if let Some(promotion_fee) = payment.promotion_fee {
                self.payment.promotion_fee = promotion_fee;
            }
            if let Some(currency) = payment.currency {
                self.payment.currency = currency;
            }
        }

        if let Some(flow) = patch.flow {
            if let Some(step_timeout_secs) = flow.step_timeout_secs {
                self.flow.step_timeout_secs = step_timeout_secs;
            }
            if let Some(snapshot_ttl_secs) = flow.snapshot_ttl_secs {
                self.flow.snapshot_ttl_secs = snapshot_ttl_secs;
            }
            if let Some(session_idle_secs) = flow.session_idle_secs {
                self.flow.session_idle_secs = session_idle_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
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
        if let Some(value) = read_env("NEARBUX_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("NEARBUX_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("NEARBUX_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("NEARBUX_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("NEARBUX_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("NEARBUX_BACKEND_PROVIDER") {
            self.backend.provider = value.parse()?;
        }
        if let Some(value) = read_env("NEARBUX_BACKEND_BASE_URL") {
            self.backend.base_url = value;
        }
        if let Some(value) = read_env("NEARBUX_BACKEND_TIMEOUT_SECS") {
            self.backend.timeout_secs = parse_u64("NEARBUX_BACKEND_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("NEARBUX_VERIFICATION_PROVIDER") {
            self.verification.provider = value.parse()?;
        }
        if let Some(value) = read_env("NEARBUX_VERIFICATION_API_KEY") {
            self.verification.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("NEARBUX_VERIFICATION_BASE_URL") {
            self.verification.base_url = value;
        }
        if let Some(value) = read_env("NEARBUX_VERIFICATION_WIDGET_CONTAINER") {
            self.verification.widget_container = value;
        }

        if let Some(value) = read_env("NEARBUX_PAYMENT_KEY_ID") {
            self.payment.key_id = value;
        }
        if let Some(value) = read_env("NEARBUX_PAYMENT_KEY_SECRET") {
            self.payment.key_secret = secret_value(value);
        }
        if let Some(value) = read_env("NEARBUX_PAYMENT_PROMOTION_FEE") {
            self.payment.promotion_fee = parse_decimal("NEARBUX_PAYMENT_PROMOTION_FEE", &value)?;
        }
        if let Some(value) = read_env("NEARBUX_PAYMENT_CURRENCY") {
            self.payment.currency = value;
        }

        if let Some(value) = read_env("NEARBUX_FLOW_STEP_TIMEOUT_SECS") {
            self.flow.step_timeout_secs = parse_u64("NEARBUX_FLOW_STEP_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("NEARBUX_FLOW_SNAPSHOT_TTL_SECS") {
            self.flow.snapshot_ttl_secs = parse_u64("NEARBUX_FLOW_SNAPSHOT_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("NEARBUX_FLOW_SESSION_IDLE_SECS") {
            self.flow.session_idle_secs = parse_u64("NEARBUX_FLOW_SESSION_IDLE_SECS", &value)?;
        }

        if let Some(value) = read_env("NEARBUX_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("NEARBUX_SERVER_PORT") {
            self.server.port = parse_u16("NEARBUX_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("NEARBUX_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("NEARBUX_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level = read_env("NEARBUX_LOGGING_LEVEL").or_else(|| read_env("NEARBUX_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("NEARBUX_LOGGING_FORMAT").or_else(|| read_env("NEARBUX_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(backend_provider) = overrides.backend_provider {
            self.backend.provider = backend_provider;
        }
        if let Some(backend_base_url) = overrides.backend_base_url {
            self.backend.base_url = backend_base_url;
        }
        if let Some(verification_provider) = overrides.verification_provider {
            self.verification.provider = verification_provider;
        }
        if let Some(payment_key_secret) = overrides.payment_key_secret {
            self.payment.key_secret = secret_value(payment_key_secret);
        }
        if let Some(server_port) = overrides.server_port {
            self.server.port = server_port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_backend(&self.backend)?;
        validate_verification(&self.verification)?;
        validate_payment(&self.payment)?;
        validate_flow(&self.flow)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("nearbux.toml"), PathBuf::from("config/nearbux.toml")]
        .into_iter()
        .find(|path| path.exists())
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

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_backend(backend: &BackendConfig) -> Result<(), ConfigError> {
    if backend.provider == BackendProvider::Http && !is_http_url(&backend.base_url) {
        return Err(ConfigError::Validation(
            "backend.base_url must start with http:// or https://".to_string(),
        ));
    }

    if backend.timeout_secs == 0 || backend.timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "backend.timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    Ok(())
}

fn validate_verification(verification: &VerificationConfig) -> Result<(), ConfigError> {
    if verification.widget_container.trim().is_empty() {
        return Err(ConfigError::Validation(
            "verification.widget_container must not be empty".to_string(),
        ));
    }

    if verification.provider == VerificationProviderKind::IdentityToolkit {
        let missing = verification
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing {
            return Err(ConfigError::Validation(
                "verification.api_key is required for the identity_toolkit provider".to_string(),
            ));
        }
        if !is_http_url(&verification.base_url) {
            return Err(ConfigError::Validation(
                "verification.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_payment(payment: &PaymentConfig) -> Result<(), ConfigError> {
    if payment.key_secret.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "payment.key_secret is required. Copy it from the payment gateway dashboard > API Keys"
                .to_string(),
        ));
    }

    if payment.promotion_fee <= Decimal::ZERO {
        return Err(ConfigError::Validation(
            "payment.promotion_fee must be greater than zero".to_string(),
        ));
    }

    let currency = payment.currency.trim();
    if currency.len() != 3 || !currency.chars().all(|ch| ch.is_ascii_uppercase()) {
        return Err(ConfigError::Validation(
            "payment.currency must be a three-letter ISO code such as INR".to_string(),
        ));
    }

    Ok(())
}

fn validate_flow(flow: &FlowConfig) -> Result<(), ConfigError> {
    if flow.step_timeout_secs == 0 || flow.step_timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "flow.step_timeout_secs must be in range 1..=120".to_string(),
        ));
    }
    if flow.snapshot_ttl_secs == 0 || flow.snapshot_ttl_secs > 86_400 {
        return Err(ConfigError::Validation(
            "flow.snapshot_ttl_secs must be in range 1..=86400".to_string(),
        ));
    }
    if flow.session_idle_secs < flow.step_timeout_secs {
        return Err(ConfigError::Validation(
            "flow.session_idle_secs must be at least flow.step_timeout_secs".to_string(),
        ));
    }
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
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

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_decimal(key: &str, value: &str) -> Result<Decimal, ConfigError> {
    value.trim().parse::<Decimal>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    backend: Option<BackendPatch>,
    verification: Option<VerificationPatch>,
    payment: Option<PaymentPatch>,
    flow: Option<FlowPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct BackendPatch {
    provider: Option<BackendProvider>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct VerificationPatch {
    provider: Option<VerificationProviderKind>,
    api_key: Option<String>,
    base_url: Option<String>,
    widget_container: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PaymentPatch {
    key_id: Option<String>,
    key_secret: Option<String>,
    promotion_fee: Option<Decimal>,
    currency: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FlowPatch {
    step_timeout_secs: Option<u64>,
    snapshot_ttl_secs: Option<u64>,
    session_idle_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
