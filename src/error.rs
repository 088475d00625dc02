//! Router Error Types
//!
//! Error taxonomy for routing, rate limiting and dispatch.

use std::time::Duration;
use thiserror::Error;

/// Why an upstream refused a request with a credential-level rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionKind {
    /// HTTP 429 or a rate limit message
    RateLimit,

    /// Billing, credit or quota exhausted
    Quota,

    /// Key rejected (401/403)
    Auth,
}

impl std::fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionKind::RateLimit => write!(f, "rate limit"),
            RejectionKind::Quota => write!(f, "quota"),
            RejectionKind::Auth => write!(f, "auth"),
        }
    }
}

/// Main error type for routing operations
#[derive(Debug, Error)]
pub enum RouterError {
    /// Rate limited, either by the local limiter or by the upstream
    #[error("{}", rate_limited_message(.provider, .retry_after))]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    /// Key rejected by the upstream for quota or auth reasons
    #[error("Provider '{provider}' rejected the request ({kind}): {message}")]
    AuthOrQuotaRejected {
        provider: String,
        kind: RejectionKind,
        message: String,
    },

    /// Transport failure, unexpected status or malformed response
    #[error("Request to '{provider}' failed on attempt {attempt}: {message}")]
    NetworkOrProtocol {
        provider: String,
        attempt: usize,
        message: String,
    },

    /// No enabled, non-excluded provider left to try
    #[error("No providers available. Enable at least one provider with a key in the registry")]
    NoProvidersAvailable,

    /// Caller canceled the request
    #[error("Request canceled{}", canceled_suffix(.provider, .attempt))]
    Canceled {
        provider: Option<String>,
        attempt: usize,
    },

    /// Dispatch did not complete within the configured timeout
    #[error("Request to '{provider}' timed out after {after:?} on attempt {attempt}")]
    Timeout {
        provider: String,
        attempt: usize,
        after: Duration,
    },

    /// Every candidate was tried without success
    #[error("All {attempts} attempts failed (tried: {}): {last}", .tried.join(", "))]
    AttemptsExhausted {
        attempts: usize,
        tried: Vec<String>,
        #[source]
        last: Box<RouterError>,
    },

    /// Configuration errors (invalid JSON, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

fn rate_limited_message(provider: &str, retry_after: &Option<Duration>) -> String {
    match retry_after {
        Some(wait) => format!(
            "Rate limited by '{}', retry after {:.1} seconds",
            provider,
            wait.as_secs_f64()
        ),
        None => format!(
            "Rate limited by '{}'. Consider adding more API keys or providers.",
            provider
        ),
    }
}

fn canceled_suffix(provider: &Option<String>, attempt: &usize) -> String {
    match provider {
        Some(p) => format!(" while routing to '{}' (attempt {})", p, attempt),
        None => String::new(),
    }
}

impl RouterError {
    /// Whether a failover to another key or provider may recover from this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RouterError::RateLimited { .. } | RouterError::AuthOrQuotaRejected { .. }
        )
    }

    /// Provider the error was observed on, if any
    pub fn provider(&self) -> Option<&str> {
        match self {
            RouterError::RateLimited { provider, .. }
            | RouterError::AuthOrQuotaRejected { provider, .. }
            | RouterError::NetworkOrProtocol { provider, .. }
            | RouterError::Timeout { provider, .. } => Some(provider),
            RouterError::Canceled { provider, .. } => provider.as_deref(),
            RouterError::AttemptsExhausted { last, .. } => last.provider(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for RouterError {
    fn from(err: serde_json::Error) -> Self {
        RouterError::Config(format!("JSON parsing error: {}", err))
    }
}

impl From<std::io::Error> for RouterError {
    fn from(err: std::io::Error) -> Self {
        RouterError::Config(format!("IO error: {}", err))
    }
}

/// Result type alias for router operations
pub type Result<T> = std::result::Result<T, RouterError>;
