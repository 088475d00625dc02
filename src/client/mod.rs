//! Client Module
//!
//! The chat-completion backend seam, its HTTP implementation and rate limiting.

pub mod http;
pub mod rate_limiter;

pub use http::HttpClient;
pub use rate_limiter::{RateLimit, RateLimiter};

use crate::api::{CompletionRequest, CompletionResponse};
use crate::config::ProviderEntry;
use crate::error::RejectionKind;
use futures::future::BoxFuture;
use std::time::Duration;

/// Outcome of a failed dispatch, as seen by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The key was refused: rate limit, quota or auth
    Rejected {
        kind: RejectionKind,
        status: Option<u16>,
        message: String,
        retry_after: Option<Duration>,
    },

    /// Non-success status that is not a key rejection
    Status { status: u16, message: String },

    /// Connection, TLS or I/O failure
    Transport(String),

    /// Response body could not be decoded
    Decode(String),
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DispatchError::Rejected {
                kind,
                status,
                message,
                ..
            } => match status {
                Some(code) => write!(f, "{} rejection (HTTP {}): {}", kind, code, message),
                None => write!(f, "{} rejection: {}", kind, message),
            },
            DispatchError::Status { status, message } => {
                write!(f, "HTTP {}: {}", status, message)
            }
            DispatchError::Transport(msg) => write!(f, "transport error: {}", msg),
            DispatchError::Decode(msg) => write!(f, "malformed response: {}", msg),
        }
    }
}

impl std::error::Error for DispatchError {}

/// An OpenAI-compatible chat-completion collaborator.
///
/// `request.model` is already set to the provider's model when this is called.
pub trait ChatBackend: Send + Sync {
    fn complete<'a>(
        &'a self,
        provider: &'a ProviderEntry,
        api_key: &'a str,
        request: &'a CompletionRequest,
    ) -> BoxFuture<'a, Result<CompletionResponse, DispatchError>>;
}
