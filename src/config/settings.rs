//! Settings loaded from defaults, TOML files, and environment variables

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::catalog::ModelSpec;
use crate::error::{AppError, Result};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub server: ServerConfig,
    pub provider: ProviderConfig,
    pub storage: StorageConfig,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
    /// Model catalog overrides merged on top of the built-in table
    #[serde(default)]
    pub models: HashMap<String, ModelSpec>,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// External generation provider configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_provider_timeout")]
    pub timeout_ms: u64,
}

fn default_provider_url() -> String {
    "https://openrouter.ai/api".to_string()
}

fn default_provider_timeout() -> u64 {
    60000
}

/// Artifact storage configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub base_path: String,
    /// Public URL prefix artifacts are served under (CDN domain in production)
    #[serde(default = "default_url_prefix")]
    pub url_prefix: String,
}

fn default_storage_path() -> String {
    "./artifacts".to_string()
}

fn default_url_prefix() -> String {
    "http://localhost:8080/artifacts".to_string()
}

/// Retry and backoff policy for generation jobs
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,
    /// Total wall-clock deadline for a job across all attempts
    #[serde(default = "default_max_job_duration")]
    pub max_job_duration_secs: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    2000
}

fn default_max_job_duration() -> u64 {
    600
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay(),
            max_job_duration_secs: default_max_job_duration(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Settings {
    /// Load settings from configuration files and environment variables
    pub fn load() -> Result<Self> {
        Self::load_from_path("config/default.toml")
    }

    /// Load settings from a specific configuration file path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            // Start with default values
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .set_default("provider.base_url", default_provider_url())?
            .set_default("provider.api_key", "")?
            .set_default("provider.timeout_ms", default_provider_timeout() as i64)?
            .set_default("storage.base_path", default_storage_path())?
            .set_default("storage.url_prefix", default_url_prefix())?
            .set_default("retry.max_retries", default_max_retries() as i64)?
            .set_default("retry.base_delay_ms", default_base_delay() as i64)?
            .set_default(
                "retry.max_job_duration_secs",
                default_max_job_duration() as i64,
            )?
            .set_default("logging.level", default_log_level())?
            .set_default("logging.format", default_log_format())?
            // Load from configuration file
            .add_source(
                File::with_name(path.as_ref().to_str().unwrap_or("config/default"))
                    .required(false),
            )
            // Override with environment variables (prefixed with PIXELFORGE__)
            .add_source(
                Environment::with_prefix("PIXELFORGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        Ok(settings)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(AppError::Config(config::ConfigError::Message(
                "Server port cannot be 0".to_string(),
            )));
        }
        if self.provider.base_url.is_empty() {
            return Err(AppError::Config(config::ConfigError::Message(
                "Provider base URL cannot be empty".to_string(),
            )));
        }
        if self.provider.timeout_ms == 0 {
            return Err(AppError::Config(config::ConfigError::Message(
                "Provider timeout must be positive".to_string(),
            )));
        }
        if self.retry.base_delay_ms == 0 {
            return Err(AppError::Config(config::ConfigError::Message(
                "Retry base delay must be positive".to_string(),
            )));
        }
        for (name, spec) in &self.models {
            if spec.provider_id.is_empty() {
                return Err(AppError::Config(config::ConfigError::Message(format!(
                    "Model '{}' must have a provider id",
                    name
                ))));
            }
        }
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
            },
            provider: ProviderConfig {
                base_url: default_provider_url(),
                api_key: String::new(),
                timeout_ms: default_provider_timeout(),
            },
            storage: StorageConfig {
                base_path: default_storage_path(),
                url_prefix: default_url_prefix(),
            },
            retry: RetryConfig::default(),
            logging: LoggingConfig {
                level: default_log_level(),
                format: default_log_format(),
            },
            models: HashMap::new(),
        }
    }
}
