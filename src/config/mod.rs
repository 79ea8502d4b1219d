//! Configuration for note_harvest

mod capture;
mod enrichment;
mod logging;
mod session;

pub use capture::{CaptureConfig, ReplayPolicy, DEFAULT_URL_PATTERN};
pub use enrichment::{ClassifierConfig, EnrichmentConfig};
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use session::{ExportConfig, SessionConfig, StoreConfig, DEFAULT_USER_AGENT};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Persistent state location
    #[serde(default)]
    pub store: StoreConfig,
    /// Authenticated session relayed to the page executor
    #[serde(default)]
    pub session: SessionConfig,
    /// Capture configuration seeded into storage on first run
    #[serde(default)]
    pub capture: CaptureConfig,
    /// Replay pacing policy
    #[serde(default)]
    pub replay: ReplayPolicy,
    /// Secondary enrichment
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    /// Relevance classifier endpoint
    #[serde(default)]
    pub classifier: ClassifierConfig,
    /// Workbook output
    #[serde(default)]
    pub export: ExportConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file '{}'", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Render as TOML, for `init`
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    /// Validate all configuration fields.
    ///
    /// Collects every problem and reports them together.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        // Capture
        if self.capture.max_captures == 0 {
            errors.push("capture.maxCaptures must be positive".to_string());
        }
        for pattern in &self.capture.url_patterns {
            if let Err(e) = regex::Regex::new(pattern) {
                errors.push(format!("capture url pattern '{}' is invalid: {}", pattern, e));
            }
        }

        // Replay
        if self.replay.default_page_size == 0 {
            errors.push("replay.default_page_size must be positive".to_string());
        }
        if self.replay.pagination_field.is_empty() {
            errors.push("replay.pagination_field must not be empty".to_string());
        }
        if !self.replay.total_pointer.starts_with('/') {
            errors.push(format!(
                "replay.total_pointer must be a JSON pointer starting with '/', got '{}'",
                self.replay.total_pointer
            ));
        }
        if self.replay.pre_fetch_jitter_min_ms > self.replay.pre_fetch_jitter_max_ms {
            errors.push("replay.pre_fetch_jitter_min_ms must not exceed pre_fetch_jitter_max_ms".to_string());
        }

        // Enrichment
        if self.enrichment.project_window_days < 0 {
            errors.push("enrichment.project_window_days must not be negative".to_string());
        }
        if self.enrichment.detail_jitter_min_ms > self.enrichment.detail_jitter_max_ms {
            errors.push("enrichment.detail_jitter_min_ms must not exceed detail_jitter_max_ms".to_string());
        }
        if let Err(e) = url::Url::parse(&self.enrichment.note_url_base) {
            errors.push(format!("enrichment.note_url_base is not a URL: {}", e));
        }

        // Classifier
        if self.classifier.enabled {
            if let Err(e) = url::Url::parse(&self.classifier.endpoint) {
                errors.push(format!("classifier.endpoint is not a URL: {}", e));
            }
            if self.classifier.model.is_empty() {
                errors.push("classifier.model must not be empty".to_string());
            }
            if !(0.0..=2.0).contains(&self.classifier.temperature) {
                errors.push("classifier.temperature must be between 0.0 and 2.0".to_string());
            }
        }

        // Store
        if self.store.path.as_os_str().is_empty() {
            errors.push("store.path must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "Configuration validation failed:\n  - {}",
                errors.join("\n  - ")
            );
        }
    }
}
