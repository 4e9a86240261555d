use std::env;
use std::fs;
use std::path::Path;

use secrecy::ExposeSecret;
use toml::Value;
use voxstay_core::config::{resolve_config_path, AppConfig, LoadOptions};

use crate::commands::CommandResult;

struct Field {
    key_path: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

impl Field {
    fn new(
        key_path: &'static str,
        value: impl ToString,
        env_keys: &'static [&'static str],
    ) -> Self {
        Self { key_path, value: value.to_string(), env_keys }
    }
}

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::report(2, format!("config validation failed: {error}"));
        }
    };

    let config_file_path = resolve_config_path(None);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key_path,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(format!("- {} = {} (source: {source})", field.key_path, field.value));
    }

    CommandResult::report(0, lines.join("\n"))
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let secret = if config.payment.tokenizer_secret.expose_secret().is_empty() {
        "<unset>"
    } else {
        "<redacted>"
    };

    vec![
        Field::new("database.url", &config.database.url, &["VOXSTAY_DATABASE_URL"]),
        Field::new(
            "database.max_connections",
            config.database.max_connections,
            &["VOXSTAY_DATABASE_MAX_CONNECTIONS"],
        ),
        Field::new(
            "database.timeout_secs",
            config.database.timeout_secs,
            &["VOXSTAY_DATABASE_TIMEOUT_SECS"],
        ),
        Field::new(
            "server.bind_address",
            &config.server.bind_address,
            &["VOXSTAY_SERVER_BIND_ADDRESS"],
        ),
        Field::new("server.port", config.server.port, &["VOXSTAY_SERVER_PORT"]),
        Field::new(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs,
            &["VOXSTAY_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        Field::new("session.ttl_secs", config.session.ttl_secs, &["VOXSTAY_SESSION_TTL_SECS"]),
        Field::new(
            "session.sweep_interval_secs",
            config.session.sweep_interval_secs,
            &["VOXSTAY_SESSION_SWEEP_INTERVAL_SECS"],
        ),
        Field::new(
            "session.allow_confirmed_amendments",
            config.session.allow_confirmed_amendments,
            &["VOXSTAY_SESSION_ALLOW_CONFIRMED_AMENDMENTS"],
        ),
        Field::new(
            "search.provider",
            config.search.provider.as_str(),
            &["VOXSTAY_SEARCH_PROVIDER"],
        ),
        Field::new(
            "search.base_url",
            config.search.base_url.as_deref().unwrap_or("<unset>"),
            &["VOXSTAY_SEARCH_BASE_URL"],
        ),
        Field::new("search.hotel_code", &config.search.hotel_code, &["VOXSTAY_SEARCH_HOTEL_CODE"]),
        Field::new("search.hotel_name", &config.search.hotel_name, &["VOXSTAY_SEARCH_HOTEL_NAME"]),
        Field::new(
            "search.timeout_secs",
            config.search.timeout_secs,
            &["VOXSTAY_SEARCH_TIMEOUT_SECS"],
        ),
        Field::new(
            "payment.tokenizer_secret",
            secret,
            &["VOXSTAY_PAYMENT_TOKENIZER_SECRET"],
        ),
        Field::new(
            "payment.timeout_secs",
            config.payment.timeout_secs,
            &["VOXSTAY_PAYMENT_TIMEOUT_SECS"],
        ),
        Field::new(
            "logging.level",
            &config.logging.level,
            &["VOXSTAY_LOGGING_LEVEL", "VOXSTAY_LOG_LEVEL"],
        ),
        Field::new(
            "logging.format",
            config.logging.format.as_str(),
            &["VOXSTAY_LOGGING_FORMAT", "VOXSTAY_LOG_FORMAT"],
        ),
    ]
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
