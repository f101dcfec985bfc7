//! [`ChatProvider`] implementation for OpenAI-compatible endpoints.

use crate::client::ChatClient;
use crate::retry::RetryPolicy;
use conduit_types::provider::{ChatProvider, DeltaStream};
use conduit_types::{ApiError, ChatRequest};
use std::future::Future;
use std::pin::Pin;

/// OpenAI-compatible chat provider.
///
/// Thin wrapper over [`ChatClient`]; retry logic stays in the client.
#[derive(Clone)]
pub struct OpenAiProvider {
    client: ChatClient,
}

impl OpenAiProvider {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self, ApiError> {
        Ok(Self {
            client: ChatClient::new(api_key, base_url)?,
        })
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.client = self.client.with_retry_policy(policy);
        self
    }
}

impl ChatProvider for OpenAiProvider {
    fn stream_chat<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> Pin<Box<dyn Future<Output = Result<DeltaStream, ApiError>> + Send + 'a>> {
        Box::pin(async move {
            let stream = self.client.stream_chat(request).await?;
            Ok(Box::pin(stream) as DeltaStream)
        })
    }

    fn name(&self) -> &str {
        "openai"
    }
}
