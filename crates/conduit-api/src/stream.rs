//! Async stream that converts chat-completion SSE chunks into [`ChatDelta`]s.

use crate::sse::{SseEvent, SseParser};
use conduit_types::{ApiError, ChatDelta, ToolCallDelta};
use futures_core::Stream;
use pin_project_lite::pin_project;
use serde::Deserialize;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Payload that marks the end of a completion stream.
const DONE_MARKER: &str = "[DONE]";

type ByteStream = Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>;

pin_project! {
    /// An async stream of [`ChatDelta`]s from an OpenAI-compatible endpoint.
    ///
    /// Ends at the `[DONE]` marker or when the body closes, whichever comes first.
    pub struct CompletionStream {
        #[pin]
        inner: ByteStream,
        parser: SseParser,
        // Trailing bytes of a UTF-8 sequence split across chunks.
        partial: Vec<u8>,
        queue: VecDeque<Result<ChatDelta, ApiError>>,
        done: bool,
    }
}

impl CompletionStream {
    /// Create a new CompletionStream from a reqwest byte stream.
    pub fn new(
        byte_stream: impl Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
    ) -> Self {
        Self {
            inner: Box::pin(byte_stream),
            parser: SseParser::new(),
            partial: Vec::new(),
            queue: VecDeque::new(),
            done: false,
        }
    }
}

impl Stream for CompletionStream {
    type Item = Result<ChatDelta, ApiError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let mut this = self.project();

        loop {
            if let Some(item) = this.queue.pop_front() {
                return Poll::Ready(Some(item));
            }
            if *this.done {
                return Poll::Ready(None);
            }

            match this.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    this.partial.extend_from_slice(&bytes);
                    let text = take_utf8(this.partial);
                    for event in this.parser.feed(&text) {
                        if enqueue(&event, this.queue) {
                            *this.done = true;
                            break;
                        }
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    *this.done = true;
                    return Poll::Ready(Some(Err(ApiError::Network(e.to_string()))));
                }
                Poll::Ready(None) => {
                    *this.done = true;
                    if !this.partial.is_empty() {
                        let rest = String::from_utf8_lossy(&this.partial[..]).into_owned();
                        this.partial.clear();
                        for event in this.parser.feed(&rest) {
                            if enqueue(&event, this.queue) {
                                break;
                            }
                        }
                    }
                    if let Some(event) = this.parser.finish() {
                        enqueue(&event, this.queue);
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Decode the longest valid UTF-8 prefix of `buf`, leaving an incomplete
/// trailing sequence in place. Invalid bytes are replaced.
fn take_utf8(buf: &mut Vec<u8>) -> String {
    match std::str::from_utf8(buf) {
        Ok(s) => {
            let text = s.to_string();
            buf.clear();
            text
        }
        Err(e) if e.error_len().is_none() => {
            let valid = e.valid_up_to();
            let text = String::from_utf8_lossy(&buf[..valid]).into_owned();
            buf.drain(..valid);
            text
        }
        Err(_) => {
            let text = String::from_utf8_lossy(buf).into_owned();
            buf.clear();
            text
        }
    }
}

/// Push the delta carried by `event` onto the queue. Returns `true` at the
/// end-of-stream marker.
fn enqueue(event: &SseEvent, queue: &mut VecDeque<Result<ChatDelta, ApiError>>) -> bool {
    let data = event.data.trim();
    if data == DONE_MARKER {
        return true;
    }
    if data.is_empty() {
        return false;
    }
    match parse_chunk(data) {
        Ok(Some(delta)) => queue.push_back(Ok(delta)),
        Ok(None) => {}
        Err(e) => queue.push_back(Err(e)),
    }
    false
}

#[derive(Deserialize)]
struct Chunk {
    #[serde(default)]
    choices: Vec<Choice>,
    error: Option<ChunkError>,
}

#[derive(Deserialize)]
struct ChunkError {
    message: Option<String>,
    code: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Option<Delta>,
}

#[derive(Deserialize)]
struct Delta {
    content: Option<String>,
    reasoning_content: Option<String>,
    reasoning: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<DeltaToolCall>>,
}

#[derive(Deserialize)]
struct DeltaToolCall {
    #[serde(default)]
    index: usize,
    id: Option<String>,
    function: Option<DeltaFunction>,
}

#[derive(Deserialize)]
struct DeltaFunction {
    name: Option<String>,
    arguments: Option<String>,
}

/// Parse one `data:` payload. Chunks without a first choice (usage
/// trailers, keep-alives) yield `None`.
fn parse_chunk(data: &str) -> Result<Option<ChatDelta>, ApiError> {
    let chunk: Chunk = serde_json::from_str(data)
        .map_err(|e| ApiError::StreamParse(format!("invalid chunk: {e}")))?;

    if let Some(error) = chunk.error {
        let status = error
            .code
            .as_ref()
            .and_then(serde_json::Value::as_u64)
            .and_then(|c| u16::try_from(c).ok())
            .unwrap_or(0);
        return Err(ApiError::Server {
            status,
            message: error.message.unwrap_or_else(|| "stream error".into()),
        });
    }

    let Some(delta) = chunk.choices.into_iter().next().and_then(|c| c.delta) else {
        return Ok(None);
    };

    let tool_calls: Vec<ToolCallDelta> = delta
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| {
            let (name, arguments) = match tc.function {
                Some(f) => (f.name, f.arguments),
                None => (None, None),
            };
            ToolCallDelta {
                index: tc.index,
                id: tc.id,
                name,
                arguments,
            }
        })
        .collect();

    let delta = ChatDelta {
        content: delta.content.filter(|s| !s.is_empty()),
        reasoning: delta
            .reasoning_content
            .filter(|s| !s.is_empty())
            .or(delta.reasoning.filter(|s| !s.is_empty())),
        tool_calls,
    };

    if delta.content.is_none() && delta.reasoning.is_none() && delta.tool_calls.is_empty() {
        return Ok(None);
    }
    Ok(Some(delta))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_chunk() {
        let delta = parse_chunk(r#"{"choices":[{"index":0,"delta":{"content":"Hi"}}]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(delta, ChatDelta::text("Hi"));
    }

    #[test]
    fn role_only_chunk_is_skipped() {
        let delta =
            parse_chunk(r#"{"choices":[{"index":0,"delta":{"role":"assistant","content":""}}]}"#)
                .unwrap();
        assert!(delta.is_none());
    }

    #[test]
    fn usage_trailer_is_skipped() {
        let delta = parse_chunk(r#"{"choices":[],"usage":{"total_tokens":12}}"#).unwrap();
        assert!(delta.is_none());
    }

    #[test]
    fn reasoning_under_either_key() {
        let a = parse_chunk(r#"{"choices":[{"delta":{"reasoning_content":"hmm"}}]}"#)
            .unwrap()
            .unwrap();
        let b = parse_chunk(r#"{"choices":[{"delta":{"reasoning":"hmm"}}]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(a.reasoning.as_deref(), Some("hmm"));
        assert_eq!(a, b);
    }

    #[test]
    fn reasoning_under_both_keys_in_one_chunk() {
        let both = parse_chunk(
            r#"{"choices":[{"delta":{"reasoning_content":"first","reasoning":"first"}}]}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(both.reasoning.as_deref(), Some("first"));

        let fallback =
            parse_chunk(r#"{"choices":[{"delta":{"reasoning_content":"","reasoning":"alt"}}]}"#)
                .unwrap()
                .unwrap();
        assert_eq!(fallback.reasoning.as_deref(), Some("alt"));
    }

    #[test]
    fn tool_call_fragment() {
        let data = r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"id":"call_9","type":"function","function":{"name":"fs__read","arguments":"{\"pa"}}]}}]}"#;
        let delta = parse_chunk(data).unwrap().unwrap();
        assert_eq!(
            delta.tool_calls,
            vec![ToolCallDelta {
                index: 1,
                id: Some("call_9".into()),
                name: Some("fs__read".into()),
                arguments: Some("{\"pa".into()),
            }]
        );
    }

    #[test]
    fn error_payload_becomes_server_error() {
        let err = parse_chunk(r#"{"error":{"message":"upstream died","code":502}}"#).unwrap_err();
        match err {
            ApiError::Server { status, message } => {
                assert_eq!(status, 502);
                assert_eq!(message, "upstream died");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn malformed_chunk_is_parse_error() {
        assert!(matches!(
            parse_chunk("{not json"),
            Err(ApiError::StreamParse(_))
        ));
    }

    #[test]
    fn take_utf8_keeps_split_sequence() {
        let snowman = "☃".as_bytes();
        let mut buf = b"a".to_vec();
        buf.extend_from_slice(&snowman[..1]);
        assert_eq!(take_utf8(&mut buf), "a");
        assert_eq!(buf.len(), 1);
        buf.extend_from_slice(&snowman[1..]);
        assert_eq!(take_utf8(&mut buf), "☃");
        assert!(buf.is_empty());
    }
}
