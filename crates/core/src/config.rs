use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::flows::FlowPolicy;
use crate::orchestrator::OrchestratorSettings;

pub const DEFAULT_CONFIG_FILES: [&str; 2] = ["voxstay.toml", "config/voxstay.toml"];

const MIN_TOKENIZER_SECRET_LEN: usize = 16;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub search: SearchConfig,
    pub payment: PaymentConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct SessionConfig {
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
    pub allow_confirmed_amendments: bool,
}

impl SessionConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::try_from(self.ttl_secs).unwrap_or(i64::MAX))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Clone, Debug)]
pub struct SearchConfig {
    pub provider: SearchProvider,
    pub base_url: Option<String>,
    pub hotel_code: String,
    pub hotel_name: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct PaymentConfig {
    pub tokenizer_secret: SecretString,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchProvider {
    Static,
    Azds,
}

impl SearchProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Azds => "azds",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub search_provider: Option<SearchProvider>,
    pub tokenizer_secret: Option<String>,
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
                url: "sqlite://voxstay.db".to_string(),
                max_connections: 5,
                timeout_secs: 5,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            session: SessionConfig {
                ttl_secs: 1800,
                sweep_interval_secs: 60,
                allow_confirmed_amendments: false,
            },
            search: SearchConfig {
                provider: SearchProvider::Static,
                base_url: None,
                hotel_code: "SFPROPER".to_string(),
                hotel_name: "San Francisco Proper Hotel".to_string(),
                timeout_secs: 10,
            },
            payment: PaymentConfig { tokenizer_secret: String::new().into(), timeout_secs: 10 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for SearchProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "static" => Ok(Self::Static),
            "azds" => Ok(Self::Azds),
            other => Err(ConfigError::Validation(format!(
                "unsupported search provider `{other}` (expected static|azds)"
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

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILES[0]));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            search_timeout: Duration::from_secs(self.search.timeout_secs),
            payment_timeout: Duration::from_secs(self.payment.timeout_secs),
            repository_timeout: Duration::from_secs(self.database.timeout_secs),
            policy: FlowPolicy {
                allow_confirmed_amendments: self.session.allow_confirmed_amendments,
            },
        }
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

        if let Some(session) = patch.session {
            if let Some(ttl_secs) = session.ttl_secs {
                self.session.ttl_secs = ttl_secs;
            }
            if let Some(sweep_interval_secs) = session.sweep_interval_secs {
                self.session.sweep_interval_secs = sweep_interval_secs;
            }
            if let Some(allow) = session.allow_confirmed_amendments {
                self.session.allow_confirmed_amendments = allow;
            }
        }

        if let Some(search) = patch.search {
            if let Some(provider) = search.provider {
                self.search.provider = provider;
            }
            if let Some(base_url) = search.base_url {
                self.search.base_url = Some(base_url);
            }
            if let Some(hotel_code) = search.hotel_code {
                self.search.hotel_code = hotel_code;
            }
            if let Some(hotel_name) = search.hotel_name {
                self.search.hotel_name = hotel_name;
            }
            if let Some(timeout_secs) = search.timeout_secs {
                self.search.timeout_secs = timeout_secs;
            }
        }

        if let Some(payment) = patch.payment {
            if let Some(secret) = payment.tokenizer_secret {
                self.payment.tokenizer_secret = secret.into();
            }
            if let Some(timeout_secs) = payment.timeout_secs {
                self.payment.timeout_secs = timeout_secs;
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
        if let Some(value) = read_env("VOXSTAY_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("VOXSTAY_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("VOXSTAY_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("VOXSTAY_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("VOXSTAY_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("VOXSTAY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("VOXSTAY_SERVER_PORT") {
            self.server.port = parse_u16("VOXSTAY_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("VOXSTAY_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("VOXSTAY_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("VOXSTAY_SESSION_TTL_SECS") {
            self.session.ttl_secs = parse_u64("VOXSTAY_SESSION_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("VOXSTAY_SESSION_SWEEP_INTERVAL_SECS") {
            self.session.sweep_interval_secs =
                parse_u64("VOXSTAY_SESSION_SWEEP_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("VOXSTAY_SESSION_ALLOW_CONFIRMED_AMENDMENTS") {
            self.session.allow_confirmed_amendments =
                parse_bool("VOXSTAY_SESSION_ALLOW_CONFIRMED_AMENDMENTS", &value)?;
        }

        if let Some(value) = read_env("VOXSTAY_SEARCH_PROVIDER") {
            self.search.provider = value.parse()?;
        }
        if let Some(value) = read_env("VOXSTAY_SEARCH_BASE_URL") {
            self.search.base_url = Some(value);
        }
        if let Some(value) = read_env("VOXSTAY_SEARCH_HOTEL_CODE") {
            self.search.hotel_code = value;
        }
        if let Some(value) = read_env("VOXSTAY_SEARCH_HOTEL_NAME") {
            self.search.hotel_name = value;
        }
        if let Some(value) = read_env("VOXSTAY_SEARCH_TIMEOUT_SECS") {
            self.search.timeout_secs = parse_u64("VOXSTAY_SEARCH_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("VOXSTAY_PAYMENT_TOKENIZER_SECRET") {
            self.payment.tokenizer_secret = value.into();
        }
        if let Some(value) = read_env("VOXSTAY_PAYMENT_TIMEOUT_SECS") {
            self.payment.timeout_secs = parse_u64("VOXSTAY_PAYMENT_TIMEOUT_SECS", &value)?;
        }

        let log_level = read_env("VOXSTAY_LOGGING_LEVEL").or_else(|| read_env("VOXSTAY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("VOXSTAY_LOGGING_FORMAT").or_else(|| read_env("VOXSTAY_LOG_FORMAT"));
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
        if let Some(log_format) = overrides.log_format {
            self.logging.format = log_format;
        }
        if let Some(bind_address) = overrides.bind_address {
            self.server.bind_address = bind_address;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(provider) = overrides.search_provider {
            self.search.provider = provider;
        }
        if let Some(secret) = overrides.tokenizer_secret {
            self.payment.tokenizer_secret = secret.into();
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_session(&self.session)?;
        validate_search(&self.search)?;
        validate_payment(&self.payment)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

/// The file `load` would read for `explicit_path`, if it exists.
pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    DEFAULT_CONFIG_FILES.into_iter().map(PathBuf::from).find(|path| path.exists())
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

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address must not be empty".to_string()));
    }

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

fn validate_session(session: &SessionConfig) -> Result<(), ConfigError> {
    if session.ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "session.ttl_secs must be greater than zero".to_string(),
        ));
    }

    if session.sweep_interval_secs == 0 || session.sweep_interval_secs > session.ttl_secs {
        return Err(ConfigError::Validation(
            "session.sweep_interval_secs must be in range 1..=session.ttl_secs".to_string(),
        ));
    }

    Ok(())
}

fn validate_search(search: &SearchConfig) -> Result<(), ConfigError> {
    if search.timeout_secs == 0 || search.timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "search.timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    if search.hotel_code.trim().is_empty() {
        return Err(ConfigError::Validation("search.hotel_code must not be empty".to_string()));
    }

    match (search.provider, search.base_url.as_deref()) {
        (SearchProvider::Azds, None) => Err(ConfigError::Validation(
            "search.base_url is required for the azds provider".to_string(),
        )),
        (_, Some(base_url))
            if !base_url.starts_with("http://") && !base_url.starts_with("https://") =>
        {
            Err(ConfigError::Validation(
                "search.base_url must start with http:// or https://".to_string(),
            ))
        }
        _ => Ok(()),
    }
}

fn validate_payment(payment: &PaymentConfig) -> Result<(), ConfigError> {
    let secret = payment.tokenizer_secret.expose_secret();
    if secret.trim().is_empty() {
        return Err(ConfigError::Validation(
            "payment.tokenizer_secret is required. Set VOXSTAY_PAYMENT_TOKENIZER_SECRET or \
             `[payment] tokenizer_secret` to a random value of at least 16 characters"
                .to_string(),
        ));
    }
    if secret.len() < MIN_TOKENIZER_SECRET_LEN {
        return Err(ConfigError::Validation(format!(
            "payment.tokenizer_secret must be at least {MIN_TOKENIZER_SECRET_LEN} characters"
        )));
    }

    if payment.timeout_secs == 0 || payment.timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "payment.timeout_secs must be in range 1..=120".to_string(),
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

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.trim().parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    session: Option<SessionPatch>,
    search: Option<SearchPatch>,
    payment: Option<PaymentPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct SessionPatch {
    ttl_secs: Option<u64>,
    sweep_interval_secs: Option<u64>,
    allow_confirmed_amendments: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchPatch {
    provider: Option<SearchProvider>,
    base_url: Option<String>,
    hotel_code: Option<String>,
    hotel_name: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Default, Deserialize)]
struct PaymentPatch {
    tokenizer_secret: Option<String>,
    timeout_secs: Option<u64>,
}

impl std::fmt::Debug for PaymentPatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentPatch")
            .field("tokenizer_secret", &self.tokenizer_secret.as_ref().map(|_| "[REDACTED]"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
