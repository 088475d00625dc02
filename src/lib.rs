//! llmrelay - multi-provider LLM request router
//!
//! Routes OpenAI-compatible chat completions over an ordered registry of
//! providers with key rotation, per-provider rate limiting and failover.
//!
//! ```no_run
//! use llmrelay::{CompletionRequest, ConfigLoader, Message, RequestRouter};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> llmrelay::Result<()> {
//! let config = ConfigLoader::new()?.into_config();
//! let router = RequestRouter::from_config(&config)?;
//! let request = CompletionRequest::new(vec![Message::user("Hello")]);
//! let response = router.send(request, &CancellationToken::new()).await?;
//! println!("{}", response.content().unwrap_or_default());
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod router;

pub use api::{CompletionRequest, CompletionResponse, ContextWindow, Message, MessageContent};
pub use client::{ChatBackend, DispatchError, HttpClient, RateLimit, RateLimiter};
pub use config::{ConfigLoader, ProviderEntry, RouterConfig, RoutingMode};
pub use error::{RejectionKind, Result, RouterError};
pub use router::{RequestRouter, RoutingPolicy};
