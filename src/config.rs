use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub system: SystemConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    pub models: Vec<ModelConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfig {
    pub database_path: String,
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshConfig {
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl RefreshConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MonitoringConfig {
    #[serde(default)]
    pub csv_logging: bool,
    #[serde(default = "default_csv_log_path")]
    pub csv_log_path: String,
}

/// A model on the leaderboard, addressed by its OpenRouter id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub id: String,
    pub name: String,
    pub params: String,
    pub provider: String,
    pub color: String,
}

fn default_request_timeout() -> u64 { 15 }
fn default_max_tokens() -> u32 { 15 }
fn default_csv_log_path() -> String { "data/estimates.csv".to_string() }

#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub openrouter_api_key: String,
    pub openrouter_url: String,
    pub polymarket_gamma_url: String,
    pub database_path: Option<String>,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;

        if config.models.is_empty() {
            anyhow::bail!("At least one [[models]] entry is required");
        }

        Ok(config)
    }
}

impl EnvConfig {
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        Ok(Self {
            openrouter_api_key: std::env::var("CALIBRATEDAI_OPENROUTER_API_KEY")
                .context("CALIBRATEDAI_OPENROUTER_API_KEY not set")?,
            openrouter_url: std::env::var("OPENROUTER_URL")
                .unwrap_or_else(|_| "https://openrouter.ai/api/v1".to_string()),
            polymarket_gamma_url: std::env::var("POLYMARKET_GAMMA_URL")
                .unwrap_or_else(|_| "https://gamma-api.polymarket.com".to_string()),
            database_path: std::env::var("CALIBRATEDAI_DB_PATH").ok(),
        })
    }
}
