use crate::broadcast::DEFAULT_SUBSCRIBER_BUFFER;
use crate::forecast::ForecastConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
pub const DEFAULT_SERVER_PORT: u16 = 5000;
pub const DEFAULT_STORE_PATH: &str = "data/sensor_data.jsonl";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub app: AppSection,
    pub logging: LoggingSection,
    #[serde(default)]
    pub server: Option<ServerSection>,
    #[serde(default)]
    pub store: Option<StoreSection>,
    #[serde(default)]
    pub broadcast: Option<BroadcastSection>,
    #[serde(default)]
    pub forecast: Option<ForecastSection>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSection {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSection {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSection {
    /// Port of the primary HTTP API (default: 5000)
    pub port: Option<u16>,
    /// Port of the raw ingestion listener; disabled when unset
    pub ingest_port: Option<u16>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreSection {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BroadcastSection {
    /// Events queued per subscriber before new ones are dropped
    pub subscriber_buffer: Option<usize>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ForecastSection {
    pub horizon: Option<usize>,
    pub trees: Option<usize>,
    pub seed: Option<u64>,
    pub test_fraction: Option<f64>,
    pub min_history: Option<usize>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

pub fn load_default() -> Result<Config, ConfigError> {
    load_from_path(DEFAULT_CONFIG_PATH)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    Ok(config)
}

impl Config {
    pub fn server_port(&self) -> u16 {
        self.server
            .as_ref()
            .and_then(|s| s.port)
            .unwrap_or(DEFAULT_SERVER_PORT)
    }

    pub fn ingest_port(&self) -> Option<u16> {
        self.server.as_ref().and_then(|s| s.ingest_port)
    }

    /// Store file path; an empty path falls back to the default.
    pub fn store_path(&self) -> PathBuf {
        self.store
            .as_ref()
            .and_then(|s| s.path.clone())
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH))
    }

    pub fn subscriber_buffer(&self) -> usize {
        self.broadcast
            .as_ref()
            .and_then(|b| b.subscriber_buffer)
            .unwrap_or(DEFAULT_SUBSCRIBER_BUFFER)
    }

    pub fn forecast_config(&self) -> ForecastConfig {
        let defaults = ForecastConfig::default();
        let Some(section) = self.forecast.as_ref() else {
            return defaults;
        };
        ForecastConfig {
            horizon: section.horizon.unwrap_or(defaults.horizon),
            trees: section.trees.unwrap_or(defaults.trees),
            seed: section.seed.unwrap_or(defaults.seed),
            test_fraction: section.test_fraction.unwrap_or(defaults.test_fraction),
            min_history: section.min_history.unwrap_or(defaults.min_history),
            ..defaults
        }
    }

    pub fn log_level(&self) -> tracing::Level {
        self.logging
            .level
            .parse()
            .unwrap_or(tracing::Level::INFO)
    }
}
