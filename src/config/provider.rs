//! Provider Configuration
//!
//! Defines the configuration schema for the provider registry and routing.

use crate::api::ContextWindow;
use crate::error::{Result, RouterError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

/// Default dispatch timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Smallest completion cap a config may set
pub const MIN_MAX_TOKENS: u32 = 256;

/// How providers are picked for each request
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    /// Always use the one configured provider
    #[default]
    Selected,

    /// Cycle through enabled providers on successive requests
    RoundRobin,

    /// Try enabled providers in registry order until one succeeds
    Failover,
}

impl std::fmt::Display for RoutingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoutingMode::Selected => write!(f, "selected"),
            RoutingMode::RoundRobin => write!(f, "round_robin"),
            RoutingMode::Failover => write!(f, "failover"),
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Routing mode, fixed for the process lifetime
    #[serde(default)]
    pub routing_mode: RoutingMode,

    /// Target of `selected` mode (defaults to the first provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_provider: Option<String>,

    /// Default requests per minute per provider, 0 = unlimited
    #[serde(default)]
    pub requests_per_minute: u32,

    /// Minimum spacing between requests to the same provider
    #[serde(default)]
    pub min_request_interval_ms: u64,

    /// Spread each provider's per-minute budget evenly instead of allowing bursts
    #[serde(default)]
    pub pace_evenly: bool,

    /// Completion token cap applied to every request (raised to at least 256)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Upper bound for a single dispatch
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Treat dispatch timeouts like a rejected key and fail over
    #[serde(default)]
    pub retry_on_timeout: bool,

    /// Attempts per request (defaults from the registry shape)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<usize>,

    /// Conversation trimming applied before dispatch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextWindow>,

    /// Providers in routing order
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_enabled() -> bool {
    true
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            routing_mode: RoutingMode::default(),
            selected_provider: None,
            requests_per_minute: 0,
            min_request_interval_ms: 0,
            pace_evenly: false,
            max_tokens: None,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            retry_on_timeout: false,
            max_attempts: None,
            context: None,
            providers: Vec::new(),
        }
    }
}

impl RouterConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }

    /// Configured token cap with the floor applied
    pub fn max_tokens_cap(&self) -> Option<u32> {
        self.max_tokens.map(|cap| cap.max(MIN_MAX_TOKENS))
    }

    /// Resolve keys and validate every provider, preserving order
    pub fn entries(&self) -> Result<Vec<ProviderEntry>> {
        let mut seen = HashSet::new();
        let mut entries = Vec::with_capacity(self.providers.len());

        for provider in &self.providers {
            let entry = provider.resolve()?;
            if !seen.insert(entry.id.clone()) {
                return Err(RouterError::Config(format!(
                    "Duplicate provider id '{}'",
                    entry.id
                )));
            }
            entries.push(entry);
        }

        if let Some(selected) = &self.selected_provider {
            if self.routing_mode == RoutingMode::Selected && !seen.contains(selected) {
                return Err(RouterError::Config(format!(
                    "selected_provider '{}' is not in the registry",
                    selected
                )));
            }
        }

        Ok(entries)
    }
}

/// Keys as written in config: a single string or a list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum KeySource {
    /// Comma- or newline-separated keys
    One(String),
    Many(Vec<String>),
}

impl KeySource {
    fn collect_into(&self, out: &mut Vec<String>) {
        match self {
            KeySource::One(raw) => out.extend(raw.replace(',', "\n").lines().map(str::to_string)),
            KeySource::Many(list) => out.extend(list.iter().cloned()),
        }
    }
}

/// Configuration for a single provider, as written in config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique provider id
    pub id: String,

    /// Base URL of the OpenAI-compatible API
    #[serde(default)]
    pub api_base: String,

    /// Model name sent upstream
    #[serde(default)]
    pub model: String,

    /// API keys (list or separated string)
    #[serde(default, alias = "api_keys", skip_serializing_if = "Option::is_none")]
    pub keys: Option<KeySource>,

    /// Single API key (or separated string)
    #[serde(default, alias = "api_key", skip_serializing_if = "Option::is_none")]
    pub key: Option<KeySource>,

    /// Environment variable holding a key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_env: Option<String>,

    /// Environment variables holding additional keys
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys_env: Vec<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Per-provider override of the requests-per-minute default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_minute: Option<u32>,

    /// Additional headers to send with requests
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
}

impl ProviderConfig {
    /// Get all API keys for this provider: ordered, trimmed and de-duplicated
    pub fn api_keys(&self) -> Vec<String> {
        let mut raw = Vec::new();

        if let Some(key) = &self.key {
            key.collect_into(&mut raw);
        }
        if let Some(keys) = &self.keys {
            keys.collect_into(&mut raw);
        }
        for env_var in self.key_env.iter().chain(self.keys_env.iter()) {
            if let Ok(value) = std::env::var(env_var) {
                KeySource::One(value).collect_into(&mut raw);
            }
        }

        let mut keys: Vec<String> = Vec::with_capacity(raw.len());
        for key in raw {
            let key = key.trim();
            if !key.is_empty() && !keys.iter().any(|k| k == key) {
                keys.push(key.to_string());
            }
        }
        keys
    }

    /// Validate and turn into a registry entry
    pub fn resolve(&self) -> Result<ProviderEntry> {
        let id = self.id.trim();
        if id.is_empty() {
            return Err(RouterError::Config("Provider id must not be empty".to_string()));
        }

        let entry = ProviderEntry {
            id: id.to_string(),
            api_base: normalize_api_base(&self.api_base),
            model: self.model.trim().to_string(),
            keys: self.api_keys(),
            enabled: self.enabled,
            requests_per_minute: self.requests_per_minute,
            headers: self.headers.clone(),
        };

        if entry.enabled {
            if entry.api_base.is_empty() {
                return Err(RouterError::Config(format!(
                    "Provider '{}' has no api_base",
                    entry.id
                )));
            }
            if entry.model.is_empty() {
                return Err(RouterError::Config(format!(
                    "Provider '{}' has no model",
                    entry.id
                )));
            }
            if entry.keys.is_empty() {
                return Err(RouterError::Config(format!(
                    "Provider '{}' is enabled but has no API keys. Add `keys`, `key` or `key_env`, or set `enabled: false`",
                    entry.id
                )));
            }
        }

        Ok(entry)
    }
}

/// A resolved upstream endpoint in the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderEntry {
    pub id: String,
    pub api_base: String,
    pub model: String,
    /// Non-empty when enabled
    pub keys: Vec<String>,
    pub enabled: bool,
    pub requests_per_minute: Option<u32>,
    pub headers: HashMap<String, String>,
}

impl ProviderEntry {
    /// Full chat completions endpoint
    pub fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.api_base)
    }

    /// Enabled and holding at least one key
    pub fn is_routable(&self) -> bool {
        self.enabled && !self.keys.is_empty()
    }
}

/// Strip trailing slashes and an already-present `/chat/completions` suffix
pub fn normalize_api_base(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    trimmed
        .strip_suffix("/chat/completions")
        .unwrap_or(trimmed)
        .trim_end_matches('/')
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(json: &str) -> ProviderConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_deserialize_router_config() {
        let json = r#"{
            "routing_mode": "failover",
            "requests_per_minute": 30,
            "providers": [
                {"id": "groq", "api_base": "https://api.groq.com/openai/v1", "model": "llama-3.1-70b", "keys": ["k1", "k2"]},
                {"id": "local", "api_base": "http://localhost:11434/v1", "model": "llama3", "enabled": false}
            ]
        }"#;

        let config: RouterConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.routing_mode, RoutingMode::Failover);
        assert_eq!(config.requests_per_minute, 30);
        assert_eq!(config.request_timeout_secs, DEFAULT_TIMEOUT_SECS);

        let entries = config.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, "groq");
        assert_eq!(entries[0].keys, vec!["k1", "k2"]);
        assert!(entries[0].is_routable());
        assert!(!entries[1].is_routable());
    }

    #[test]
    fn test_key_string_is_split_and_deduplicated() {
        let config = provider(
            r#"{"id": "p", "api_base": "https://x", "model": "m", "api_key": " a, b\nc ,a,, ", "keys": ["c", "d"]}"#,
        );
        assert_eq!(config.api_keys(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_keys_from_env() {
        std::env::set_var("LLMRELAY_TEST_PROVIDER_KEY", "env-key-1,env-key-2");
        let config = provider(
            r#"{"id": "p", "api_base": "https://x", "model": "m", "key": "inline", "key_env": "LLMRELAY_TEST_PROVIDER_KEY", "keys_env": ["LLMRELAY_TEST_MISSING_KEY"]}"#,
        );
        assert_eq!(config.api_keys(), vec!["inline", "env-key-1", "env-key-2"]);
    }

    #[test]
    fn test_enabled_provider_requires_keys() {
        let config = provider(r#"{"id": "p", "api_base": "https://x", "model": "m"}"#);
        assert!(matches!(config.resolve(), Err(RouterError::Config(_))));

        let disabled =
            provider(r#"{"id": "p", "api_base": "https://x", "model": "m", "enabled": false}"#);
        assert!(disabled.resolve().is_ok());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let config: RouterConfig = serde_json::from_str(
            r#"{"providers": [
                {"id": "a", "api_base": "https://x", "model": "m", "key": "k"},
                {"id": "a", "api_base": "https://y", "model": "m", "key": "k"}
            ]}"#,
        )
        .unwrap();
        assert!(config.entries().is_err());
    }

    #[test]
    fn test_unknown_selected_provider_rejected() {
        let config: RouterConfig = serde_json::from_str(
            r#"{"routing_mode": "selected", "selected_provider": "missing", "providers": [
                {"id": "a", "api_base": "https://x", "model": "m", "key": "k"}
            ]}"#,
        )
        .unwrap();
        assert!(config.entries().is_err());
    }

    #[test]
    fn test_normalize_api_base() {
        assert_eq!(normalize_api_base("https://api.x.com/v1/"), "https://api.x.com/v1");
        assert_eq!(
            normalize_api_base(" https://api.x.com/v1/chat/completions "),
            "https://api.x.com/v1"
        );
        assert_eq!(normalize_api_base(""), "");
    }

    #[test]
    fn test_chat_url() {
        let entry = provider(
            r#"{"id": "p", "api_base": "http://localhost:8080/v1/", "model": "m", "key": "k"}"#,
        )
        .resolve()
        .unwrap();
        assert_eq!(entry.chat_url(), "http://localhost:8080/v1/chat/completions");
    }
}
