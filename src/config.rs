use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, TriageError};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub classification: ClassificationConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub batch: BatchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationConfig {
    /// Whether the AI backend may be consulted at all; the rule engine runs
    /// regardless whenever the AI path does not produce a valid result
    #[serde(default = "default_ai_enabled")]
    pub enabled: bool,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_classify_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            enabled: default_ai_enabled(),
            model: default_model(),
            request_timeout_secs: default_classify_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Ceiling on classification calls per user within one window
    #[serde(default = "default_max_calls")]
    pub max_calls_per_window: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_calls_per_window: default_max_calls(),
            window_secs: default_window_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Remote calls issued between cooperative throttle pauses
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_delay_ms")]
    pub chunk_delay_ms: u64,
    /// Page size requested from the provider's message listing
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_delay_ms: default_chunk_delay_ms(),
            page_size: default_page_size(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_ai_enabled() -> bool {
    true
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_classify_timeout() -> u64 {
    20
}

fn default_max_calls() -> u32 {
    10
}

fn default_window_secs() -> u64 {
    60
}

fn default_chunk_size() -> usize {
    5
}

fn default_chunk_delay_ms() -> u64 {
    200
}

fn default_page_size() -> usize {
    100
}

fn default_request_timeout() -> u64 {
    30
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        // If the file doesn't exist, return defaults with a warning
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| TriageError::Config(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| TriageError::Config(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                TriageError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| TriageError::Config(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| TriageError::Config(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.classification.request_timeout_secs == 0 {
            return Err(TriageError::Config(
                "classification.request_timeout_secs must be at least 1".to_string(),
            ));
        }

        if self.rate_limit.max_calls_per_window == 0 {
            return Err(TriageError::Config(
                "rate_limit.max_calls_per_window must be at least 1".to_string(),
            ));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(TriageError::Config(
                "rate_limit.window_secs must be at least 1".to_string(),
            ));
        }

        if self.batch.chunk_size == 0 {
            return Err(TriageError::Config(
                "batch.chunk_size must be at least 1".to_string(),
            ));
        }
        if self.batch.page_size == 0 {
            return Err(TriageError::Config(
                "batch.page_size must be at least 1".to_string(),
            ));
        }
        if self.batch.page_size > 500 {
            return Err(TriageError::Config(
                "batch.page_size cannot exceed 500".to_string(),
            ));
        }
        if self.batch.request_timeout_secs == 0 {
            return Err(TriageError::Config(
                "batch.request_timeout_secs must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
