use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

/// Web server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    #[serde(default = "default_web_host")]
    pub host: String,
    #[serde(default = "default_web_port")]
    pub port: u16,
    /// Directory holding the static site (index.html, retrieve.html, assets)
    #[serde(default = "default_static_dir")]
    pub static_dir: String,
}

fn default_web_host() -> String {
    "0.0.0.0".to_string()
}

fn default_web_port() -> u16 {
    8080
}

fn default_static_dir() -> String {
    "site".to_string()
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: default_web_host(),
            port: default_web_port(),
            static_dir: default_static_dir(),
        }
    }
}

/// Which key-value backend holds the secrets
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Redis,
    /// Process-local map. Only suitable for a single instance.
    Memory,
}

/// Key-value backend configuration
#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// Upper bound of pooled Redis connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// How long a request may wait for a pooled connection
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_max_connections() -> usize {
    10
}

fn default_wait_timeout_ms() -> u64 {
    2000
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            redis_url: default_redis_url(),
            max_connections: default_max_connections(),
            wait_timeout_ms: default_wait_timeout_ms(),
        }
    }
}

impl BackendConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }
}

/// Longest lifetime a secret may be given (30 days)
pub const MAX_LIFETIME_SECS: u64 = 60 * 60 * 24 * 30;

/// Policy knobs of the secret exchange.
///
/// Mnemonics issued under different lengths are not comparable, so these
/// must stay fixed for the lifetime of one deployment.
#[derive(Debug, Deserialize, Clone)]
pub struct ExchangeConfig {
    #[serde(default = "default_lifetime_secs")]
    pub lifetime_secs: u64,
    #[serde(default = "default_mnemonic_len")]
    pub mnemonic_len: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_lifetime_secs() -> u64 {
    60 * 60 * 24
}

fn default_mnemonic_len() -> usize {
    10
}

fn default_max_attempts() -> u32 {
    10
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            lifetime_secs: default_lifetime_secs(),
            mnemonic_len: default_mnemonic_len(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl ExchangeConfig {
    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.lifetime_secs)
    }
}

/// Output format of the log lines
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration. Levels come from `RUST_LOG`.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LogConfig {
    #[serde(default)]
    pub format: LogFormat,
}

/// Root application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub web: WebConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub log: LogConfig,
    /// Origins allowed to call the API cross-origin. `*` allows any.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

fn default_cors_origins() -> Vec<String> {
    vec!["*".to_string()]
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            web: WebConfig::default(),
            backend: BackendConfig::default(),
            exchange: ExchangeConfig::default(),
            log: LogConfig::default(),
            cors_origins: default_cors_origins(),
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Environment variables with prefix KEEDROP_, e.g.
            // KEEDROP_WEB__PORT, KEEDROP_BACKEND__REDIS_URL, KEEDROP_CORS_ORIGINS
            .add_source(
                Environment::with_prefix("KEEDROP")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("cors_origins")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the exchange cannot operate with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.exchange.lifetime_secs == 0 {
            return Err(ConfigError::Message(
                "exchange.lifetime_secs must be greater than zero".into(),
            ));
        }
        if self.exchange.lifetime_secs > MAX_LIFETIME_SECS {
            return Err(ConfigError::Message(format!(
                "exchange.lifetime_secs must not exceed {} (30 days)",
                MAX_LIFETIME_SECS
            )));
        }
        if self.exchange.mnemonic_len == 0 {
            return Err(ConfigError::Message(
                "exchange.mnemonic_len must be greater than zero".into(),
            ));
        }
        if self.exchange.max_attempts == 0 {
            return Err(ConfigError::Message(
                "exchange.max_attempts must be greater than zero".into(),
            ));
        }
        if self.cors_origins.iter().all(|o| o.trim().is_empty()) {
            return Err(ConfigError::Message("cors_origins must not be empty".into()));
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.web.host, self.web.port)
    }
}
