use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::common::constants::{DEFAULT_CURRENCY, DEFAULT_TIMEZONE};
use crate::common::error::{ImportError, Result};

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

pub const ENV_API_KEY: &str = "HUMANITIX_API_KEY";
pub const ENV_ORGANISER_ID: &str = "HUMANITIX_ORGANISER_ID";
pub const ENV_BASE_URL: &str = "HUMANITIX_BASE_URL";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub api: ApiConfig,
    pub import: ImportConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: String,
    pub organiser_id: Option<String>,
    pub timeout_seconds: u64,
    pub page_size: u32,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.humanitix.com".to_string(),
            api_key: String::new(),
            organiser_id: None,
            timeout_seconds: 30,
            page_size: 100,
            retry_attempts: 3,
            retry_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ImportConfig {
    pub batch_size: usize,
    pub memory_target_mb: u64,
    pub max_pages: u32,
    pub create_missing_entities: bool,
    pub fetch_images: bool,
    pub default_timezone: String,
    pub default_currency: String,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            batch_size: 25,
            memory_target_mb: 256,
            max_pages: 50,
            create_missing_entities: true,
            fetch_images: true,
            default_timezone: DEFAULT_TIMEZONE.to_string(),
            default_currency: DEFAULT_CURRENCY.to_string(),
        }
    }
}

impl ImportConfig {
    pub fn timezone(&self) -> Result<Tz> {
        self.default_timezone.parse::<Tz>().map_err(|_| {
            ImportError::Config(format!("unknown default_timezone '{}'", self.default_timezone))
        })
    }

    pub fn memory_target_bytes(&self) -> u64 {
        self.memory_target_mb.saturating_mul(1024 * 1024)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub directory: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: "logs".to_string(),
        }
    }
}

impl Config {
    /// Load `config.toml` from the working directory, falling back to defaults
    /// when it is absent, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = if Path::new(DEFAULT_CONFIG_PATH).exists() {
            Self::load_from(DEFAULT_CONFIG_PATH)?
        } else {
            debug!("No {} found, using defaults", DEFAULT_CONFIG_PATH);
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ImportError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        let config: Config = toml::from_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Credentials and endpoint from the environment win over the file
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(key) = non_empty(ENV_API_KEY) {
            self.api.api_key = key;
        }
        if let Some(organiser) = non_empty(ENV_ORGANISER_ID) {
            self.api.organiser_id = Some(organiser);
        }
        if let Some(url) = non_empty(ENV_BASE_URL) {
            self.api.base_url = url;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.import.timezone()?;
        if self.import.batch_size == 0 {
            return Err(ImportError::Config("import.batch_size must be at least 1".to_string()));
        }
        if self.api.page_size == 0 {
            return Err(ImportError::Config("api.page_size must be at least 1".to_string()));
        }
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://") {
            return Err(ImportError::Config(format!(
                "api.base_url must be an http(s) URL, got '{}'",
                self.api.base_url
            )));
        }
        Ok(())
    }

    /// Live imports need a key; offline fixture runs do not
    pub fn require_api_key(&self) -> Result<&str> {
        let key = self.api.api_key.trim();
        if key.is_empty() {
            return Err(ImportError::MissingCredentials(format!(
                "set api.api_key in {} or {}",
                DEFAULT_CONFIG_PATH, ENV_API_KEY
            )));
        }
        Ok(key)
    }
}
