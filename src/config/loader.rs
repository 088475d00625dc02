//! Configuration Loader
//!
//! Handles loading and merging router configuration from multiple sources.

use crate::api::ContextWindow;
use crate::config::provider::{ProviderConfig, RouterConfig, RoutingMode};
use crate::error::{Result, RouterError};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment variable pointing at an explicit config file
pub const CONFIG_PATH_ENV: &str = "RELAY_CONFIG";

/// One config file; every setting is optional so later files only override what they set
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    routing_mode: Option<RoutingMode>,
    selected_provider: Option<String>,
    requests_per_minute: Option<u32>,
    min_request_interval_ms: Option<u64>,
    pace_evenly: Option<bool>,
    max_tokens: Option<u32>,
    request_timeout_secs: Option<u64>,
    retry_on_timeout: Option<bool>,
    max_attempts: Option<usize>,
    context: Option<ContextWindow>,
    #[serde(default)]
    providers: Vec<ProviderConfig>,
}

/// Configuration loader with support for multiple sources
pub struct ConfigLoader {
    config: RouterConfig,
    sources: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader and load from default locations
    pub fn new() -> Result<Self> {
        let mut loader = Self::empty();

        for path in Self::get_config_paths() {
            if path.exists() {
                loader.load_from_file(&path)?;
            }
        }

        Ok(loader)
    }

    /// Create a loader with a specific config file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let mut loader = Self::empty();
        loader.load_from_file(path)?;
        Ok(loader)
    }

    /// Parse configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let mut loader = Self::empty();
        let file: ConfigFile = serde_json::from_str(json)
            .map_err(|e| RouterError::Config(format!("Failed to parse config: {}", e)))?;
        loader.merge_file(file);
        Ok(loader)
    }

    fn empty() -> Self {
        Self {
            config: RouterConfig::default(),
            sources: Vec::new(),
        }
    }

    /// Get list of config paths to check, lowest precedence first
    fn get_config_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Some(home_dir) = dirs::home_dir() {
            paths.push(home_dir.join(".llmrelay").join("config.json"));
        }

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("llmrelay").join("config.json"));
        }

        paths.push(PathBuf::from("llmrelay.json"));

        if let Ok(custom_path) = std::env::var(CONFIG_PATH_ENV) {
            paths.push(PathBuf::from(custom_path));
        }

        paths
    }

    /// Load configuration from a specific file
    fn load_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            RouterError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;

        let file: ConfigFile = serde_json::from_str(&content).map_err(|e| {
            RouterError::Config(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        debug!(path = %path.display(), providers = file.providers.len(), "Loaded config file");
        self.merge_file(file);
        self.sources.push(path.to_path_buf());
        Ok(())
    }

    /// Merge another file into this config (later files override earlier)
    fn merge_file(&mut self, other: ConfigFile) {
        let config = &mut self.config;

        if let Some(mode) = other.routing_mode {
            config.routing_mode = mode;
        }
        if other.selected_provider.is_some() {
            config.selected_provider = other.selected_provider;
        }
        if let Some(rpm) = other.requests_per_minute {
            config.requests_per_minute = rpm;
        }
        if let Some(ms) = other.min_request_interval_ms {
            config.min_request_interval_ms = ms;
        }
        if let Some(pace) = other.pace_evenly {
            config.pace_evenly = pace;
        }
        if other.max_tokens.is_some() {
            config.max_tokens = other.max_tokens;
        }
        if let Some(secs) = other.request_timeout_secs {
            config.request_timeout_secs = secs;
        }
        if let Some(retry) = other.retry_on_timeout {
            config.retry_on_timeout = retry;
        }
        if other.max_attempts.is_some() {
            config.max_attempts = other.max_attempts;
        }
        if other.context.is_some() {
            config.context = other.context;
        }

        // Same id replaces in place, new ids append, so registry order stays stable
        for provider in other.providers {
            match config.providers.iter_mut().find(|p| p.id == provider.id) {
                Some(existing) => *existing = provider,
                None => config.providers.push(provider),
            }
        }
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Files that contributed to the configuration, in load order
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    /// Take ownership of the configuration
    pub fn into_config(self) -> RouterConfig {
        self.config
    }
}
