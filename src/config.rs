use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const ENV_PREFIX: &str = "CHAPTERSCAN";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub gateway: GatewayConfig,
    pub scraper: ScraperConfig,
    pub patterns: PatternsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub max_retries: u32,
    pub rate_limited_delay_ms: u64,
    pub ssl_handshake_delay_ms: u64,
    pub timeout_delay_ms: u64,
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Minimum spacing between physical requests to the same host. 0 disables it.
    pub min_request_interval_ms: u64,
    pub user_agent: Option<String>,
    /// CORS proxy template; `{url}` is replaced with the percent-encoded target.
    pub proxy_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    pub file_types: Vec<String>,
    pub consecutive_miss_threshold: u32,
    pub chapter_count: u32,
    pub validate_images: bool,
    pub fetch_interval_ms: u64,
    pub batch_size: usize,
    pub probe_concurrency: usize,
    pub max_sequence_length: u32,
    pub load_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PatternsConfig {
    /// Env-format file with per-domain chapter URL templates.
    pub file: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            rate_limited_delay_ms: 2000,
            ssl_handshake_delay_ms: 1000,
            timeout_delay_ms: 1500,
            request_timeout_secs: 30,
            connect_timeout_secs: 10,
            min_request_interval_ms: 0,
            user_agent: None,
            proxy_url: None,
        }
    }
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            file_types: vec!["jpg".to_string(), "png".to_string(), "webp".to_string()],
            consecutive_miss_threshold: 2,
            chapter_count: 1,
            validate_images: true,
            fetch_interval_ms: 15_000,
            batch_size: 5,
            probe_concurrency: 3,
            max_sequence_length: 500,
            load_timeout_ms: 5000,
        }
    }
}

impl GatewayConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl ScraperConfig {
    pub fn fetch_interval(&self) -> Duration {
        Duration::from_millis(self.fetch_interval_ms)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }
}

impl Config {
    /// Layers an optional TOML file under `CHAPTERSCAN__SECTION__KEY` environment variables.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(config::File::from(path).format(config::FileFormat::Toml).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__").try_parsing(true))
            .build()?;
        let config: Config = settings.try_deserialize()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}
