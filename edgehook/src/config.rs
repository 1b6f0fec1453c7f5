use serde::{Deserialize, Serialize};
use std::{error::Error, net::SocketAddr};
use tracing::{Level, level_filters::LevelFilter};

pub const DEFAULT_CONFIG_PATH: &str = "edgehook.toml";

/// Environment variable holding the config path.
pub const CONFIG_PATH_ENV: &str = "EDGEHOOK_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
pub enum LogLevel {
    #[serde(rename = "trace")]
    Trace,
    #[serde(rename = "debug")]
    Debug,
    #[default]
    #[serde(rename = "info")]
    Info,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl From<LogLevel> for Level {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl From<LogLevel> for LevelFilter {
    fn from(value: LogLevel) -> Self {
        match value {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Logging level.
    #[serde(default = "default_log_level")]
    pub log_level: LogLevel,
    /// Call the hook through its exported C entry points instead of in-process.
    #[serde(default)]
    pub ffi: bool,
    /// Maximum number of cached answers.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
    /// How many times the replay list is run. Later rounds are served from cache.
    #[serde(default = "default_rounds")]
    pub rounds: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            ffi: false,
            cache_capacity: default_cache_capacity(),
            rounds: default_rounds(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RenameConfig {
    pub from: String,
    pub to: String,
    /// Match any name ending in `from`, not only `from` itself.
    #[serde(default = "default_true")]
    pub suffix: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BackendConfig {
    pub key: String,
    pub addr: SocketAddr,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
pub struct RewriteConfig {
    /// Names answered with NXDOMAIN. `*.example.com` blocks every name below it.
    #[serde(default)]
    pub block: Vec<String>,
    /// Upper bound applied to TTLs on delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_ttl: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    /// Session flag that makes cache hits bypass the cache.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bypass_env_key: Option<String>,
    #[serde(default)]
    pub rename: Vec<RenameConfig>,
    #[serde(default)]
    pub backend: Vec<BackendConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ReplayQuery {
    pub name: String,
    #[serde(default = "default_qtype")]
    pub qtype: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ZoneRecord {
    /// A record in presentation format, e.g. `www.example.com 300 A 192.0.2.1`.
    pub record: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub rewrite: RewriteConfig,
    #[serde(default)]
    pub replay: Vec<ReplayQuery>,
    #[serde(default)]
    pub zone: Vec<ZoneRecord>,
}

pub fn decode_from_path(path: &str) -> anyhow::Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|_| ConfigError::NotFound)?;
    let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Decode(e.message().into()))?;
    Ok(config)
}

/// Load the config, writing a default one to `config_path` if there is none.
pub fn load_config(config_path: &str) -> anyhow::Result<Config> {
    match decode_from_path(config_path) {
        Ok(cfg) => Ok(cfg),
        Err(ConfigError::NotFound) => create_default_config(config_path),
        Err(ConfigError::Decode(e)) => Err(ConfigError::Decode(e).into()),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    NotFound,
    Decode(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => f.write_str("config file not found"),
            Self::Decode(e) => f.write_str(e),
        }
    }
}

impl Error for ConfigError {}

pub fn create_default_config(config_path: &str) -> anyhow::Result<Config> {
    let cfg = sample_config();
    let toml_str = toml::to_string_pretty(&cfg)?;
    std::fs::write(config_path, toml_str)?;
    Ok(cfg)
}

/// A small self-contained setup: one blocked name, one rename and a zone to answer from.
pub(crate) fn sample_config() -> Config {
    let zone = [
        "www.origin.internal 3600 A 192.0.2.10",
        "www.origin.internal 3600 AAAA 2001:db8::10",
        "api.origin.internal 60 CNAME www.origin.internal",
    ];
    Config {
        server: ServerConfig::default(),
        rewrite: RewriteConfig {
            block: vec!["ads.example.com".into()],
            max_ttl: Some(300),
            service_id: Some("edge".into()),
            bypass_env_key: Some("bypass".into()),
            rename: vec![RenameConfig {
                from: "example.com".into(),
                to: "origin.internal".into(),
                suffix: true,
            }],
            backend: vec![],
        },
        replay: ["www.example.com", "api.example.com", "ads.example.com"]
            .into_iter()
            .map(|name| ReplayQuery {
                name: name.into(),
                qtype: default_qtype(),
            })
            .collect(),
        zone: zone.iter().map(|r| ZoneRecord { record: (*r).into() }).collect(),
    }
}

fn default_log_level() -> LogLevel {
    LogLevel::default()
}

fn default_cache_capacity() -> u64 {
    8192
}

fn default_rounds() -> u32 {
    2
}

fn default_qtype() -> String {
    "A".into()
}

fn default_true() -> bool {
    true
}
