//! Request Router
//!
//! Runs one chat completion through selection, rate limiting, dispatch and
//! failover. States per call: selecting → rate-limit check → dispatching →
//! success, retry (back to selecting) or terminal failure.

use crate::api::{CompletionRequest, CompletionResponse, ContextWindow};
use crate::client::{ChatBackend, DispatchError, HttpClient, RateLimit, RateLimiter};
use crate::config::{RouterConfig, RoutingMode};
use crate::error::{RejectionKind, Result, RouterError};
use crate::router::key_pool::KeyPoolStats;
use crate::router::policy::{Candidate, Exclusions, RoutingPolicy};
use crate::router::registry::{Registry, RegistryStore};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Admission checks after the first refusal, each preceded by one wait
const ADMISSION_RECHECKS: usize = 1;

/// Per-request behaviour taken from configuration
#[derive(Debug, Clone)]
pub struct RouterSettings {
    /// Fixed attempt budget; derived from the registry when unset
    pub max_attempts: Option<usize>,
    pub request_timeout: Duration,
    pub retry_on_timeout: bool,
    pub context: Option<ContextWindow>,

    /// Upper bound on `max_tokens`, filled in when the request leaves it unset
    pub max_tokens: Option<u32>,
}

impl From<&RouterConfig> for RouterSettings {
    fn from(config: &RouterConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            request_timeout: config.request_timeout(),
            retry_on_timeout: config.retry_on_timeout,
            context: config.context,
            max_tokens: config.max_tokens_cap(),
        }
    }
}

/// Routes chat completions over the provider registry
pub struct RequestRouter<B = HttpClient> {
    registry: RegistryStore,
    policy: RoutingPolicy,
    limiter: RateLimiter,
    backend: B,
    settings: RouterSettings,
}

impl RequestRouter<HttpClient> {
    /// Build a router that dispatches over HTTP
    pub fn from_config(config: &RouterConfig) -> Result<Self> {
        Self::with_backend(config, HttpClient::new()?)
    }
}

impl<B: ChatBackend> RequestRouter<B> {
    /// Build a router over any chat-completion backend
    pub fn with_backend(config: &RouterConfig, backend: B) -> Result<Self> {
        let entries = config.entries()?;

        let limiter = RateLimiter::new(RateLimit {
            requests_per_minute: config.requests_per_minute,
            min_interval: config.min_request_interval(),
        })
        .with_even_pacing(config.pace_evenly);
        limiter.configure(&entries);

        info!(
            mode = %config.routing_mode,
            providers = entries.len(),
            enabled = entries.iter().filter(|e| e.is_routable()).count(),
            "Provider registry loaded"
        );

        Ok(Self {
            registry: RegistryStore::new(entries),
            policy: RoutingPolicy::new(config.routing_mode, config.selected_provider.clone()),
            limiter,
            backend,
            settings: RouterSettings::from(config),
        })
    }

    /// Swap in a new provider list. Routing mode and settings stay as built.
    pub fn reload(&self, config: &RouterConfig) -> Result<()> {
        let entries = config.entries()?;
        self.limiter.configure(&entries);
        info!(providers = entries.len(), "Provider registry replaced");
        self.registry.replace(entries);
        Ok(())
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.snapshot()
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn mode(&self) -> RoutingMode {
        self.policy.mode()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Key usage for one provider in the current registry
    pub fn key_stats(&self, provider: &str) -> Option<KeyPoolStats> {
        let registry = self.registry.snapshot();
        let index = registry.position(provider)?;
        registry.pool(index).map(|p| p.stats())
    }

    /// Attempt budget for one call
    pub fn max_attempts(&self, registry: &Registry) -> usize {
        if let Some(max) = self.settings.max_attempts {
            return max.max(1);
        }
        let routable = registry.routable().count();
        let widest_pool = registry
            .routable()
            .filter_map(|i| registry.pool(i))
            .map(|p| p.len())
            .max()
            .unwrap_or(0);
        routable.max(widest_pool).max(1)
    }

    /// Send a chat completion, failing over per the routing mode
    pub async fn send(
        &self,
        mut request: CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<CompletionResponse> {
        let registry = self.registry.snapshot();
        let budget = self.max_attempts(&registry);

        if let Some(window) = &self.settings.context {
            window.trim(&mut request.messages);
        }
        if let Some(cap) = self.settings.max_tokens {
            request.max_tokens = Some(request.max_tokens.map_or(cap, |n| n.min(cap)));
        }

        let mut excluded = Exclusions::new();
        let mut tried: Vec<String> = Vec::new();
        let mut attempts = 0;
        let mut last_error: Option<RouterError> = None;

        for attempt in 0..budget {
            if cancel.is_cancelled() {
                return Err(RouterError::Canceled {
                    provider: None,
                    attempt: attempt + 1,
                });
            }

            let Some(candidate) = self.policy.next_candidate(&registry, attempt, &mut excluded)
            else {
                break;
            };
            attempts = attempt + 1;

            let provider_id = candidate.provider.id.as_str();
            if !tried.iter().any(|t| t == provider_id) {
                tried.push(provider_id.to_string());
            }
            debug!(
                provider = provider_id,
                key_index = candidate.key_index,
                attempt = attempts,
                mode = %self.policy.mode(),
                "Selected provider"
            );

            if let Err(err) = self.wait_for_admission(provider_id, attempts, cancel).await {
                match err {
                    RouterError::RateLimited { .. } => {
                        warn!(provider = provider_id, attempt = attempts, "Still rate limited after waiting");
                        excluded.exclude_provider(candidate.index);
                        last_error = Some(err);
                        continue;
                    }
                    other => return Err(other),
                }
            }

            request.model = candidate.provider.model.clone();

            match self.dispatch(&registry, &candidate, &request, attempts, cancel).await {
                Ok(response) => {
                    info!(provider = provider_id, attempt = attempts, "Request completed");
                    return Ok(response);
                }
                Err(err) if self.is_failover_trigger(&err) => {
                    warn!(provider = provider_id, attempt = attempts, error = %err, "Failing over");
                    if let Some(key) = registry.pool(candidate.index).and_then(|p| p.key(candidate.key_index)) {
                        key.record_failure();
                    }
                    let pool_len = registry.pool(candidate.index).map_or(0, |p| p.len());
                    excluded.exclude_key(candidate.index, candidate.key_index, pool_len);
                    if self.policy.mode() == RoutingMode::Failover {
                        excluded.exclude_provider(candidate.index);
                    }
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        match last_error {
            None => Err(RouterError::NoProvidersAvailable),
            Some(last) => Err(RouterError::AttemptsExhausted {
                attempts,
                tried,
                last: Box::new(last),
            }),
        }
    }

    fn is_failover_trigger(&self, err: &RouterError) -> bool {
        match err {
            RouterError::Timeout { .. } => self.settings.retry_on_timeout,
            other => other.is_retryable(),
        }
    }

    /// Admit or wait once and recheck; the wait holds no lock and is cancellable
    async fn wait_for_admission(
        &self,
        provider: &str,
        attempt: usize,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut wait = self.limiter.admit(provider);

        for _ in 0..ADMISSION_RECHECKS {
            if wait.is_zero() {
                return Ok(());
            }

            info!(
                provider,
                ?wait,
                "Rate limit reached, waiting"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(RouterError::Canceled {
                        provider: Some(provider.to_string()),
                        attempt,
                    });
                }
                _ = tokio::time::sleep(wait) => {}
            }

            wait = self.limiter.admit(provider);
        }

        if wait.is_zero() {
            Ok(())
        } else {
            Err(RouterError::RateLimited {
                provider: provider.to_string(),
                retry_after: Some(wait),
            })
        }
    }

    /// One bounded, cancellable call to the backend
    async fn dispatch(
        &self,
        registry: &Registry,
        candidate: &Candidate<'_>,
        request: &CompletionRequest,
        attempt: usize,
        cancel: &CancellationToken,
    ) -> Result<CompletionResponse> {
        let provider = candidate.provider;
        if let Some(key) = registry.pool(candidate.index).and_then(|p| p.key(candidate.key_index)) {
            key.record_usage();
        }

        let timeout = self.settings.request_timeout;
        let call = self.backend.complete(provider, candidate.key, request);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(RouterError::Canceled {
                    provider: Some(provider.id.clone()),
                    attempt,
                });
            }
            result = tokio::time::timeout(timeout, call) => result,
        };

        match outcome {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => Err(classify(&provider.id, attempt, err)),
            Err(_) => Err(RouterError::Timeout {
                provider: provider.id.clone(),
                attempt,
                after: timeout,
            }),
        }
    }
}

/// Map a backend failure onto the router's error taxonomy
fn classify(provider: &str, attempt: usize, err: DispatchError) -> RouterError {
    match err {
        DispatchError::Rejected {
            kind: RejectionKind::RateLimit,
            retry_after,
            ..
        } => RouterError::RateLimited {
            provider: provider.to_string(),
            retry_after,
        },
        DispatchError::Rejected { kind, message, .. } => RouterError::AuthOrQuotaRejected {
            provider: provider.to_string(),
            kind,
            message,
        },
        other => RouterError::NetworkOrProtocol {
            provider: provider.to_string(),
            attempt,
            message: other.to_string(),
        },
    }
}
