//! HTTP Client
//!
//! reqwest-backed chat completions with response classification.

use crate::api::{CompletionRequest, CompletionResponse, ErrorBody};
use crate::client::rate_limiter::parse_duration_string;
use crate::client::{ChatBackend, DispatchError};
use crate::config::ProviderEntry;
use crate::error::{RejectionKind, Result, RouterError};
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

/// Body text kept in error messages
const MAX_ERROR_BODY: usize = 500;

/// HTTP client for OpenAI-compatible endpoints
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Create a new HTTP client. The overall request deadline is enforced by the router.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|e| RouterError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    fn headers(provider: &ProviderEntry, api_key: &str) -> std::result::Result<HeaderMap, DispatchError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|e| {
                DispatchError::Transport(format!("Invalid API key format: {}", e))
            })?,
        );

        for (key, value) in &provider.headers {
            match (
                HeaderName::try_from(key.as_str()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(val)) => {
                    headers.insert(name, val);
                }
                _ => warn!(provider = %provider.id, header = %key, "Skipping invalid header"),
            }
        }

        Ok(headers)
    }

    /// POST one chat completion and classify the outcome
    pub async fn post_chat(
        &self,
        provider: &ProviderEntry,
        api_key: &str,
        request: &CompletionRequest,
    ) -> std::result::Result<CompletionResponse, DispatchError> {
        let url = provider.chat_url();
        let headers = Self::headers(provider, api_key)?;

        debug!(provider = %provider.id, %url, model = %request.model, "POST chat completion");

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .json(request)
            .send()
            .await
            .map_err(|e| DispatchError::Transport(e.to_string()))?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_duration_string);

        let body = response
            .text()
            .await
            .map_err(|e| DispatchError::Transport(format!("Failed to read body: {}", e)))?;

        if status.is_success() {
            return match serde_json::from_str::<CompletionResponse>(&body) {
                Ok(response) => Ok(response),
                // Some gateways report failures inside a 200 body
                Err(_) if ErrorBody::parse(&body).is_some() => {
                    Err(classify_failure(status, &body, retry_after))
                }
                Err(e) => Err(DispatchError::Decode(format!(
                    "Failed to parse response: {}. Body: {}",
                    e,
                    truncate(&body)
                ))),
            };
        }

        Err(classify_failure(status, &body, retry_after))
    }
}

impl ChatBackend for HttpClient {
    fn complete<'a>(
        &'a self,
        provider: &'a ProviderEntry,
        api_key: &'a str,
        request: &'a CompletionRequest,
    ) -> BoxFuture<'a, std::result::Result<CompletionResponse, DispatchError>> {
        self.post_chat(provider, api_key, request).boxed()
    }
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

/// Detect quota or billing exhaustion from an error message
pub fn is_quota_error(text: &str) -> bool {
    let lower = text.to_lowercase();
    ["quota", "insufficient_quota", "max budget", "billing", "credit"]
        .iter()
        .any(|t| lower.contains(t))
}

/// Detect a rate limit message
pub fn is_rate_limit_error(text: &str) -> bool {
    let lower = text.to_lowercase();
    ["rate limit", "rate_limit", "too many requests"]
        .iter()
        .any(|t| lower.contains(t))
}

/// Map a failed response (error status or error body) onto a dispatch error
pub fn classify_failure(status: StatusCode, body: &str, retry_after: Option<Duration>) -> DispatchError {
    let message = ErrorBody::parse(body)
        .map(|b| b.summary())
        .unwrap_or_else(|| truncate(body).to_string());
    let code = status.as_u16();

    let kind = if status == StatusCode::PAYMENT_REQUIRED || is_quota_error(&message) {
        Some(RejectionKind::Quota)
    } else if status == StatusCode::TOO_MANY_REQUESTS || is_rate_limit_error(&message) {
        Some(RejectionKind::RateLimit)
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Some(RejectionKind::Auth)
    } else {
        None
    };

    match kind {
        Some(kind) => DispatchError::Rejected {
            kind,
            status: Some(code),
            message,
            retry_after,
        },
        None => DispatchError::Status {
            status: code,
            message,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Message;
    use mockito::Server;
    use std::collections::HashMap;

    fn entry(api_base: &str) -> ProviderEntry {
        ProviderEntry {
            id: "mock".to_string(),
            api_base: api_base.to_string(),
            model: "llama3".to_string(),
            keys: vec!["sk-test".to_string()],
            enabled: true,
            requests_per_minute: None,
            headers: [("x-team".to_string(), "core".to_string())]
                .into_iter()
                .collect::<HashMap<_, _>>(),
        }
    }

    fn request() -> CompletionRequest {
        let mut request = CompletionRequest::new(vec![Message::user("ping")]);
        request.model = "llama3".to_string();
        request
    }

    #[test]
    fn test_classify_failure() {
        let quota = classify_failure(
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"error": {"message": "You exceeded your current quota", "type": "insufficient_quota"}}"#,
            None,
        );
        assert!(matches!(
            quota,
            DispatchError::Rejected { kind: RejectionKind::Quota, .. }
        ));

        let limited = classify_failure(StatusCode::TOO_MANY_REQUESTS, "slow down", Some(Duration::from_secs(3)));
        assert_eq!(
            limited,
            DispatchError::Rejected {
                kind: RejectionKind::RateLimit,
                status: Some(429),
                message: "slow down".to_string(),
                retry_after: Some(Duration::from_secs(3)),
            }
        );

        let auth = classify_failure(StatusCode::UNAUTHORIZED, "invalid api key", None);
        assert!(matches!(
            auth,
            DispatchError::Rejected { kind: RejectionKind::Auth, .. }
        ));

        let body_limited = classify_failure(StatusCode::BAD_REQUEST, "Rate limit exceeded", None);
        assert!(matches!(
            body_limited,
            DispatchError::Rejected { kind: RejectionKind::RateLimit, .. }
        ));

        let server = classify_failure(StatusCode::INTERNAL_SERVER_ERROR, "boom", None);
        assert_eq!(
            server,
            DispatchError::Status {
                status: 500,
                message: "boom".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_post_chat_success() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .match_header("authorization", "Bearer sk-test")
            .match_header("x-team", "core")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"model": "llama3"}"#.to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"id": "1", "object": "chat.completion", "created": 0, "model": "llama3",
                    "choices": [{"index": 0, "message": {"role": "assistant", "content": "pong"}}]}"#,
            )
            .create_async()
            .await;

        let client = HttpClient::new().unwrap();
        let provider = entry(&format!("{}/v1", server.url()));
        let response = client.post_chat(&provider, "sk-test", &request()).await.unwrap();

        assert_eq!(response.content(), Some("pong".to_string()));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_post_chat_rate_limited_with_retry_after() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(429)
            .with_header("retry-after", "12")
            .with_body(r#"{"error": {"message": "Rate limit reached", "type": "requests"}}"#)
            .create_async()
            .await;

        let client = HttpClient::new().unwrap();
        let provider = entry(&format!("{}/v1", server.url()));
        let err = client.post_chat(&provider, "sk-test", &request()).await.unwrap_err();

        match err {
            DispatchError::Rejected {
                kind, retry_after, ..
            } => {
                assert_eq!(kind, RejectionKind::RateLimit);
                assert_eq!(retry_after, Some(Duration::from_secs(12)));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_post_chat_unparseable_retry_after_is_ignored() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(429)
            .with_header("retry-after", "1e30s")
            .with_body("Too Many Requests")
            .create_async()
            .await;

        let client = HttpClient::new().unwrap();
        let provider = entry(&format!("{}/v1", server.url()));
        let err = client.post_chat(&provider, "sk-test", &request()).await.unwrap_err();

        assert!(matches!(
            err,
            DispatchError::Rejected {
                kind: RejectionKind::RateLimit,
                retry_after: None,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_post_chat_error_body_with_success_status() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"error": {"message": "You exceeded your current quota", "type": "insufficient_quota"}}"#,
            )
            .create_async()
            .await;

        let client = HttpClient::new().unwrap();
        let provider = entry(&format!("{}/v1", server.url()));
        let err = client.post_chat(&provider, "sk-test", &request()).await.unwrap_err();

        match err {
            DispatchError::Rejected { kind, status, .. } => {
                assert_eq!(kind, RejectionKind::Quota);
                assert_eq!(status, Some(200));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_post_chat_unclassified_error_body_is_terminal() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(r#"{"error": {"message": "model not found", "type": "invalid_request_error"}}"#)
            .create_async()
            .await;

        let client = HttpClient::new().unwrap();
        let provider = entry(&format!("{}/v1", server.url()));
        let err = client.post_chat(&provider, "sk-test", &request()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Status { status: 200, .. }));
    }

    #[tokio::test]
    async fn test_post_chat_malformed_body() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let client = HttpClient::new().unwrap();
        let provider = entry(&format!("{}/v1", server.url()));
        let err = client.post_chat(&provider, "sk-test", &request()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Decode(_)));
    }

    #[tokio::test]
    async fn test_post_chat_connection_refused() {
        let client = HttpClient::new().unwrap();
        let provider = entry("http://127.0.0.1:9");
        let err = client.post_chat(&provider, "sk-test", &request()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Transport(_)));
    }
}
