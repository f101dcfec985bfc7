//! Client for OpenAI-compatible `/chat/completions` endpoints.

use std::time::Duration;

use conduit_types::{ApiError, ChatRequest};
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};

use crate::retry::RetryPolicy;
use crate::stream::CompletionStream;

/// Default endpoint root used when no base URL is configured.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Streaming chat-completions client.
#[derive(Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    retry: RetryPolicy,
}

impl ChatClient {
    /// Create a client for `base_url` (e.g. `https://api.openai.com/v1`).
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        Ok(Self {
            http,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn headers(&self) -> Result<HeaderMap, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        if !self.api_key.is_empty() {
            let bearer = HeaderValue::from_str(&format!("Bearer {}", self.api_key)).map_err(
                |_| ApiError::Auth {
                    message: "API key contains characters not allowed in a header".into(),
                },
            )?;
            headers.insert(AUTHORIZATION, bearer);
        }
        Ok(headers)
    }

    /// Send a streaming chat-completion request.
    ///
    /// Transient failures before the body starts streaming are retried per
    /// the client's [`RetryPolicy`]; errors inside the stream are not.
    pub async fn stream_chat(&self, request: &ChatRequest) -> Result<CompletionStream, ApiError> {
        let url = format!("{}/chat/completions", self.base_url);
        let headers = self.headers()?;
        let body = serde_json::to_string(request).map_err(|e| ApiError::BadRequest {
            message: format!("Failed to serialize request: {e}"),
        })?;

        let mut attempt = 0;
        loop {
            tracing::debug!(
                model = %request.model,
                attempt = attempt + 1,
                "POST {url}"
            );

            let (err, retry_after) = match self
                .http
                .post(&url)
                .headers(headers.clone())
                .body(body.clone())
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => {
                    return Ok(CompletionStream::new(response.bytes_stream()));
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let retry_after = parse_retry_after(response.headers());
                    let text = response.text().await.unwrap_or_default();
                    (classify_error(status, &text, retry_after), retry_after)
                }
                Err(e) if e.is_timeout() => (ApiError::Timeout, None),
                Err(e) => (ApiError::Network(e.to_string()), None),
            };

            if !self.retry.should_retry(&err, attempt) {
                return Err(err);
            }

            let delay = self.retry.delay_ms(attempt, retry_after);
            tracing::warn!(
                attempt = attempt + 1,
                max_retries = self.retry.max_retries,
                "Transient chat API error: {err}. Retrying in {delay}ms"
            );
            tokio::time::sleep(Duration::from_millis(delay)).await;
            attempt += 1;
        }
    }
}

/// Parse the `retry-after` header value as seconds and convert to milliseconds.
fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(|secs| (secs * 1000.0) as u64)
}

/// Classify an HTTP error response into a typed ApiError.
fn classify_error(status: u16, body: &str, retry_after: Option<u64>) -> ApiError {
    #[derive(serde::Deserialize)]
    struct ErrorBody {
        error: Option<ErrorDetail>,
    }
    #[derive(serde::Deserialize)]
    struct ErrorDetail {
        message: Option<String>,
    }

    let message = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .and_then(|e| e.message)
        .unwrap_or_else(|| body.to_string());

    match status {
        401 | 403 => ApiError::Auth { message },
        400 | 404 | 413 | 422 => ApiError::BadRequest { message },
        429 => ApiError::RateLimited {
            retry_after_ms: retry_after,
        },
        503 | 529 => ApiError::Overloaded,
        _ => ApiError::Server { status, message },
    }
}
