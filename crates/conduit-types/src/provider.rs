//! Provider trait for streaming chat-completion backends.

use crate::{ApiError, ChatDelta, ChatRequest};
use futures_core::Stream;
use std::future::Future;
use std::pin::Pin;

/// A boxed async stream of deltas from a chat provider.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<ChatDelta, ApiError>> + Send>>;

/// Trait for chat-completion providers.
///
/// Dyn-compatible so the tool-call loop works with `Arc<dyn ChatProvider>`.
pub trait ChatProvider: Send + Sync {
    /// Send a streaming request, returning a stream of deltas.
    fn stream_chat<'a>(
        &'a self,
        request: &'a ChatRequest,
    ) -> Pin<Box<dyn Future<Output = Result<DeltaStream, ApiError>> + Send + 'a>>;

    /// Provider name for logging/display (e.g., "openai").
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn provider_is_dyn_compatible() {
        fn _accept(_p: &dyn ChatProvider) {}
    }

    #[test]
    fn arc_provider_is_send_sync() {
        fn _assert_send_sync<T: Send + Sync>() {}
        _assert_send_sync::<Arc<dyn ChatProvider>>();
    }
}
