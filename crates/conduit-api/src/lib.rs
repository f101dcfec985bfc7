//! OpenAI-compatible chat-completions client with SSE streaming for Conduit.

mod client;
mod provider;
mod retry;
mod sse;
mod stream;

pub use client::{ChatClient, DEFAULT_BASE_URL};
pub use provider::OpenAiProvider;
pub use retry::RetryPolicy;
pub use stream::CompletionStream;
