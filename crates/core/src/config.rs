use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::tenant::RateLimitPolicy;

#[derive(Clone, Debug, Default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub channel: ChannelConfig,
    pub delivery: DeliveryConfig,
    pub engine: EngineConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub backend: StorageBackend,
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ChannelConfig {
    pub transport: TransportKind,
    pub api_base_url: String,
}

#[derive(Clone, Debug)]
pub struct DeliveryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ratio: f64,
    pub credential_ttl_secs: u64,
    pub send_timeout_ms: u64,
    /// Permanently failed messages kept per tenant for inspection; the oldest
    /// is evicted once full.
    pub failed_bucket_capacity: usize,
    pub default_rate_limit: RateLimitPolicy,
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub call_timeout_ms: u64,
    pub confirm_keywords: Vec<String>,
    pub cancel_keywords: Vec<String>,
    pub booking_intent_keywords: Vec<String>,
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
pub enum StorageBackend {
    Sqlite,
    Memory,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    Http,
    Log,
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
    pub storage_backend: Option<StorageBackend>,
    pub log_level: Option<String>,
    pub channel_transport: Option<TransportKind>,
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

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Sqlite,
            url: "sqlite://slotline.db".to_string(),
            max_connections: 5,
            timeout_secs: 30,
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self { transport: TransportKind::Http, api_base_url: "http://127.0.0.1:8081".to_string() }
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 60_000,
            jitter_ratio: 0.2,
            credential_ttl_secs: 300,
            send_timeout_ms: 10_000,
            failed_bucket_capacity: 1_000,
            default_rate_limit: RateLimitPolicy::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        let words = |list: &[&str]| list.iter().map(|word| word.to_string()).collect();
        Self {
            call_timeout_ms: 3_000,
            confirm_keywords: words(&["confirm", "yes", "y", "ok", "pay"]),
            cancel_keywords: words(&["cancel", "no", "stop"]),
            booking_intent_keywords: words(&["book", "booking", "appointment", "reserve", "schedule"]),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind_address: "127.0.0.1".to_string(), port: 8080, graceful_shutdown_secs: 15 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Compact }
    }
}

impl std::str::FromStr for StorageBackend {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "memory" => Ok(Self::Memory),
            other => Err(ConfigError::Validation(format!(
                "unsupported storage backend `{other}` (expected sqlite|memory)"
            ))),
        }
    }
}

impl std::str::FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "http" => Ok(Self::Http),
            "log" => Ok(Self::Log),
            other => Err(ConfigError::Validation(format!(
                "unsupported channel transport `{other}` (expected http|log)"
            ))),
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

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Memory => "memory",
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("slotline.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(backend) = database.backend {
                self.database.backend = backend;
            }
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

        if let Some(channel) = patch.channel {
            if let Some(transport) = channel.transport {
                self.channel.transport = transport;
            }
            if let Some(api_base_url) = channel.api_base_url {
                self.channel.api_base_url = api_base_url;
            }
        }

        if let Some(delivery) = patch.delivery {
            if let Some(max_attempts) = delivery.max_attempts {
                self.delivery.max_attempts = max_attempts;
            }
            if let Some(base_delay_ms) = delivery.base_delay_ms {
                self.delivery.base_delay_ms = base_delay_ms;
            }
            if let Some(max_delay_ms) = delivery.max_delay_ms {
                self.delivery.max_delay_ms = max_delay_ms;
            }
            if let Some(jitter_ratio) = delivery.jitter_ratio {
                self.delivery.jitter_ratio = jitter_ratio;
            }
            if let Some(credential_ttl_secs) = delivery.credential_ttl_secs {
                self.delivery.credential_ttl_secs = credential_ttl_secs;
            }
            if let Some(send_timeout_ms) = delivery.send_timeout_ms {
                self.delivery.send_timeout_ms = send_timeout_ms;
            }
            if let Some(failed_bucket_capacity) = delivery.failed_bucket_capacity {
                self.delivery.failed_bucket_capacity = failed_bucket_capacity;
            }
            if let Some(per_second) = delivery.per_second {
                self.delivery.default_rate_limit.per_second = per_second;
            }
            if let Some(per_minute) = delivery.per_minute {
                self.delivery.default_rate_limit.per_minute = per_minute;
            }
            if let Some(per_hour) = delivery.per_hour {
                self.delivery.default_rate_limit.per_hour = per_hour;
            }
        }

        if let Some(engine) = patch.engine {
            if let Some(call_timeout_ms) = engine.call_timeout_ms {
                self.engine.call_timeout_ms = call_timeout_ms;
            }
            if let Some(confirm_keywords) = engine.confirm_keywords {
                self.engine.confirm_keywords = confirm_keywords;
            }
            if let Some(cancel_keywords) = engine.cancel_keywords {
                self.engine.cancel_keywords = cancel_keywords;
            }
            if let Some(booking_intent_keywords) = engine.booking_intent_keywords {
                self.engine.booking_intent_keywords = booking_intent_keywords;
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
        if let Some(value) = read_env("SLOTLINE_DATABASE_BACKEND") {
            self.database.backend = value.parse()?;
        }
        if let Some(value) = read_env("SLOTLINE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("SLOTLINE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_number("SLOTLINE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("SLOTLINE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_number("SLOTLINE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("SLOTLINE_CHANNEL_TRANSPORT") {
            self.channel.transport = value.parse()?;
        }
        if let Some(value) = read_env("SLOTLINE_CHANNEL_API_BASE_URL") {
            self.channel.api_base_url = value;
        }

        if let Some(value) = read_env("SLOTLINE_DELIVERY_MAX_ATTEMPTS") {
            self.delivery.max_attempts = parse_number("SLOTLINE_DELIVERY_MAX_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("SLOTLINE_DELIVERY_BASE_DELAY_MS") {
            self.delivery.base_delay_ms = parse_number("SLOTLINE_DELIVERY_BASE_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("SLOTLINE_DELIVERY_MAX_DELAY_MS") {
            self.delivery.max_delay_ms = parse_number("SLOTLINE_DELIVERY_MAX_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("SLOTLINE_DELIVERY_CREDENTIAL_TTL_SECS") {
            self.delivery.credential_ttl_secs =
                parse_number("SLOTLINE_DELIVERY_CREDENTIAL_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("SLOTLINE_DELIVERY_SEND_TIMEOUT_MS") {
            self.delivery.send_timeout_ms =
                parse_number("SLOTLINE_DELIVERY_SEND_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("SLOTLINE_DELIVERY_FAILED_BUCKET_CAPACITY") {
            self.delivery.failed_bucket_capacity =
                parse_number("SLOTLINE_DELIVERY_FAILED_BUCKET_CAPACITY", &value)?;
        }

        if let Some(value) = read_env("SLOTLINE_ENGINE_CALL_TIMEOUT_MS") {
            self.engine.call_timeout_ms = parse_number("SLOTLINE_ENGINE_CALL_TIMEOUT_MS", &value)?;
        }

        if let Some(value) = read_env("SLOTLINE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("SLOTLINE_SERVER_PORT") {
            self.server.port = parse_number("SLOTLINE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("SLOTLINE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_number("SLOTLINE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("SLOTLINE_LOGGING_LEVEL").or_else(|| read_env("SLOTLINE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("SLOTLINE_LOGGING_FORMAT").or_else(|| read_env("SLOTLINE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(backend) = overrides.storage_backend {
            self.database.backend = backend;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(transport) = overrides.channel_transport {
            self.channel.transport = transport;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_channel(&self.channel)?;
        validate_delivery(&self.delivery)?;
        validate_engine(&self.engine)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("slotline.toml"), PathBuf::from("config/slotline.toml")]
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
    if database.backend == StorageBackend::Memory {
        return Ok(());
    }

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

fn validate_channel(channel: &ChannelConfig) -> Result<(), ConfigError> {
    if channel.transport == TransportKind::Http {
        let url = channel.api_base_url.trim();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "channel.api_base_url must start with http:// or https:// when channel.transport is `http`"
                    .to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_delivery(delivery: &DeliveryConfig) -> Result<(), ConfigError> {
    if delivery.max_attempts == 0 {
        return Err(ConfigError::Validation(
            "delivery.max_attempts must be greater than zero".to_string(),
        ));
    }

    if delivery.base_delay_ms == 0 || delivery.base_delay_ms > delivery.max_delay_ms {
        return Err(ConfigError::Validation(
            "delivery.base_delay_ms must be non-zero and not exceed delivery.max_delay_ms"
                .to_string(),
        ));
    }

    if !(0.0..=1.0).contains(&delivery.jitter_ratio) {
        return Err(ConfigError::Validation(
            "delivery.jitter_ratio must be in range 0.0..=1.0".to_string(),
        ));
    }

    if delivery.send_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "delivery.send_timeout_ms must be greater than zero".to_string(),
        ));
    }

    if delivery.failed_bucket_capacity == 0 {
        return Err(ConfigError::Validation(
            "delivery.failed_bucket_capacity must be greater than zero".to_string(),
        ));
    }

    let limit = delivery.default_rate_limit;
    if limit.per_second == 0 || limit.per_minute == 0 || limit.per_hour == 0 {
        return Err(ConfigError::Validation(
            "delivery rate ceilings (per_second, per_minute, per_hour) must all be greater than zero"
                .to_string(),
        ));
    }

    Ok(())
}

fn validate_engine(engine: &EngineConfig) -> Result<(), ConfigError> {
    if engine.call_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "engine.call_timeout_ms must be greater than zero".to_string(),
        ));
    }

    if engine.confirm_keywords.is_empty() || engine.cancel_keywords.is_empty() {
        return Err(ConfigError::Validation(
            "engine.confirm_keywords and engine.cancel_keywords must not be empty".to_string(),
        ));
    }

    let overlap = engine.confirm_keywords.iter().find(|word| {
        engine.cancel_keywords.iter().any(|other| other.eq_ignore_ascii_case(word))
    });
    if let Some(word) = overlap {
        return Err(ConfigError::Validation(format!(
            "engine keyword `{word}` is listed as both a confirm and a cancel keyword"
        )));
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

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    channel: Option<ChannelPatch>,
    delivery: Option<DeliveryPatch>,
    engine: Option<EnginePatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    backend: Option<StorageBackend>,
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ChannelPatch {
    transport: Option<TransportKind>,
    api_base_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct DeliveryPatch {
    max_attempts: Option<u32>,
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    jitter_ratio: Option<f64>,
    credential_ttl_secs: Option<u64>,
    send_timeout_ms: Option<u64>,
    failed_bucket_capacity: Option<usize>,
    per_second: Option<u32>,
    per_minute: Option<u32>,
    per_hour: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct EnginePatch {
    call_timeout_ms: Option<u64>,
    confirm_keywords: Option<Vec<String>>,
    cancel_keywords: Option<Vec<String>>,
    booking_intent_keywords: Option<Vec<String>>,
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

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use tempfile::TempDir;

    use super::{
        AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat, StorageBackend,
        TransportKind,
    };

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    fn write_config(dir: &TempDir, body: &str) -> Result<std::path::PathBuf, String> {
        let path = dir.path().join("slotline.toml");
        fs::write(&path, body).map_err(|err| err.to_string())?;
        Ok(path)
    }

    #[test]
    fn defaults_match_documented_values() -> Result<(), String> {
        let config = AppConfig::default();
        config.validate().map_err(|err| err.to_string())?;

        ensure(config.delivery.max_attempts == 5, "default max attempts is 5")?;
        ensure(config.delivery.credential_ttl_secs == 300, "credentials cache for five minutes")?;
        ensure(config.delivery.failed_bucket_capacity == 1_000, "failed bucket keeps 1000")?;
        ensure(config.delivery.default_rate_limit.per_second == 10, "default per-second ceiling")?;
        ensure(config.delivery.default_rate_limit.per_minute == 250, "default per-minute ceiling")?;
        ensure(config.delivery.default_rate_limit.per_hour == 5000, "default per-hour ceiling")?;
        ensure(config.engine.call_timeout_ms == 3_000, "engine calls are bounded at 3s")?;
        ensure(
            config.engine.confirm_keywords.iter().any(|word| word == "yes"),
            "yes confirms a booking",
        )?;
        ensure(matches!(config.logging.format, LogFormat::Compact), "compact logs by default")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_SLOTLINE_CHANNEL_URL", "https://chat.example.test");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = write_config(
                &dir,
                r#"
[channel]
api_base_url = "${TEST_SLOTLINE_CHANNEL_URL}"
"#,
            )?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.channel.api_base_url == "https://chat.example.test",
                "channel url should be interpolated from environment",
            )
        })();

        clear_vars(&["TEST_SLOTLINE_CHANNEL_URL"]);
        result
    }

    #[test]
    fn missing_interpolation_variable_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;
        clear_vars(&["TEST_SLOTLINE_UNSET_VALUE"]);

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = write_config(
            &dir,
            r#"
[database]
url = "${TEST_SLOTLINE_UNSET_VALUE}"
"#,
        )?;

        let error = match AppConfig::load(LoadOptions {
            config_path: Some(path),
            ..LoadOptions::default()
        }) {
            Ok(_) => return Err("expected interpolation failure".to_string()),
            Err(error) => error,
        };
        ensure(
            matches!(error, ConfigError::MissingEnvInterpolation { ref var } if var == "TEST_SLOTLINE_UNSET_VALUE"),
            "missing variable should be named in the error",
        )
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("SLOTLINE_LOG_LEVEL", "warn");
        env::set_var("SLOTLINE_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )
        })();

        clear_vars(&["SLOTLINE_LOG_LEVEL", "SLOTLINE_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("SLOTLINE_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("SLOTLINE_DELIVERY_MAX_ATTEMPTS", "7");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = write_config(
                &dir,
                r#"
[database]
url = "sqlite://from-file.db"

[delivery]
max_attempts = 3
per_second = 2

[engine]
confirm_keywords = ["sure"]

[logging]
level = "warn"
"#,
            )?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    storage_backend: Some(StorageBackend::Memory),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.database.backend == StorageBackend::Memory, "override backend wins")?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.delivery.max_attempts == 7, "env should win over file for attempts")?;
            ensure(
                config.delivery.default_rate_limit.per_second == 2,
                "file should win over defaults for rate ceilings",
            )?;
            ensure(
                config.engine.confirm_keywords == vec!["sure".to_string()],
                "file keywords replace the defaults",
            )
        })();

        clear_vars(&["SLOTLINE_DATABASE_URL", "SLOTLINE_DELIVERY_MAX_ATTEMPTS"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("SLOTLINE_CHANNEL_TRANSPORT", "http");
        env::set_var("SLOTLINE_CHANNEL_API_BASE_URL", "ftp://nowhere");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            ensure(
                matches!(error, ConfigError::Validation(ref message) if message.contains("channel.api_base_url")),
                "validation failure should mention channel.api_base_url",
            )
        })();

        clear_vars(&["SLOTLINE_CHANNEL_TRANSPORT", "SLOTLINE_CHANNEL_API_BASE_URL"]);
        result
    }

    #[test]
    fn invalid_numeric_env_override_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("SLOTLINE_SERVER_PORT", "eighty");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected invalid override".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(error, ConfigError::InvalidEnvOverride { ref key, .. } if key == "SLOTLINE_SERVER_PORT"),
                "invalid port should be reported by key",
            )
        })();

        clear_vars(&["SLOTLINE_SERVER_PORT"]);
        result
    }

    #[test]
    fn overlapping_keywords_are_rejected() -> Result<(), String> {
        let mut config = AppConfig::default();
        config.engine.cancel_keywords.push("OK".to_string());

        let error = match config.validate() {
            Ok(()) => return Err("expected keyword overlap to fail validation".to_string()),
            Err(error) => error,
        };
        ensure(error.to_string().contains("`ok`"), "overlap should name the keyword")
    }

    #[test]
    fn memory_backend_skips_sqlite_url_checks() -> Result<(), String> {
        let mut config = AppConfig::default();
        config.database.backend = StorageBackend::Memory;
        config.database.url = String::new();
        config.channel.transport = TransportKind::Log;
        config.channel.api_base_url = String::new();

        config.validate().map_err(|err| err.to_string())
    }

    #[test]
    fn require_file_reports_missing_path() -> Result<(), String> {
        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let missing = dir.path().join("absent.toml");

        let error = match AppConfig::load(LoadOptions {
            config_path: Some(missing.clone()),
            require_file: true,
            ..LoadOptions::default()
        }) {
            Ok(_) => return Err("expected missing file error".to_string()),
            Err(error) => error,
        };
        ensure(
            matches!(error, ConfigError::MissingConfigFile(ref path) if path == &missing),
            "missing file error should carry the requested path",
        )
    }
}
