use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use slotline_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let rate = config.delivery.default_rate_limit;
    let fields: Vec<(&str, String, Option<&str>)> = vec![
        ("database.backend", config.database.backend.as_str().to_string(), Some("SLOTLINE_DATABASE_BACKEND")),
        ("database.url", config.database.url.clone(), Some("SLOTLINE_DATABASE_URL")),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            Some("SLOTLINE_DATABASE_MAX_CONNECTIONS"),
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            Some("SLOTLINE_DATABASE_TIMEOUT_SECS"),
        ),
        ("channel.transport", format!("{:?}", config.channel.transport), Some("SLOTLINE_CHANNEL_TRANSPORT")),
        ("channel.api_base_url", config.channel.api_base_url.clone(), Some("SLOTLINE_CHANNEL_API_BASE_URL")),
        (
            "delivery.max_attempts",
            config.delivery.max_attempts.to_string(),
            Some("SLOTLINE_DELIVERY_MAX_ATTEMPTS"),
        ),
        (
            "delivery.base_delay_ms",
            config.delivery.base_delay_ms.to_string(),
            Some("SLOTLINE_DELIVERY_BASE_DELAY_MS"),
        ),
        (
            "delivery.max_delay_ms",
            config.delivery.max_delay_ms.to_string(),
            Some("SLOTLINE_DELIVERY_MAX_DELAY_MS"),
        ),
        ("delivery.jitter_ratio", config.delivery.jitter_ratio.to_string(), None),
        (
            "delivery.credential_ttl_secs",
            config.delivery.credential_ttl_secs.to_string(),
            Some("SLOTLINE_DELIVERY_CREDENTIAL_TTL_SECS"),
        ),
        (
            "delivery.send_timeout_ms",
            config.delivery.send_timeout_ms.to_string(),
            Some("SLOTLINE_DELIVERY_SEND_TIMEOUT_MS"),
        ),
        (
            "delivery.failed_bucket_capacity",
            config.delivery.failed_bucket_capacity.to_string(),
            Some("SLOTLINE_DELIVERY_FAILED_BUCKET_CAPACITY"),
        ),
        (
            "delivery.default_rate_limit",
            format!("{}/s {}/min {}/h", rate.per_second, rate.per_minute, rate.per_hour),
            None,
        ),
        (
            "engine.call_timeout_ms",
            config.engine.call_timeout_ms.to_string(),
            Some("SLOTLINE_ENGINE_CALL_TIMEOUT_MS"),
        ),
        ("engine.confirm_keywords", config.engine.confirm_keywords.join(", "), None),
        ("engine.cancel_keywords", config.engine.cancel_keywords.join(", "), None),
        ("engine.booking_intent_keywords", config.engine.booking_intent_keywords.join(", "), None),
        ("server.bind_address", config.server.bind_address.clone(), Some("SLOTLINE_SERVER_BIND_ADDRESS")),
        ("server.port", config.server.port.to_string(), Some("SLOTLINE_SERVER_PORT")),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            Some("SLOTLINE_SERVER_GRACEFUL_SHUTDOWN_SECS"),
        ),
        ("logging.level", config.logging.level.clone(), Some("SLOTLINE_LOGGING_LEVEL")),
        ("logging.format", format!("{:?}", config.logging.format), Some("SLOTLINE_LOGGING_FORMAT")),
    ];

    let mut lines =
        vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_key) in fields {
        let source =
            field_source(key, env_key, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("slotline.toml"), PathBuf::from("config/slotline.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
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
