//! The streaming tool-call loop.
//!
//! Each round opens one model stream. Text-only rounds end the loop; rounds
//! in which the model requests tools execute them, extend the conversation
//! with the calls and their results, and resubmit.

use crate::pending::PendingToolCalls;
use conduit_types::provider::ChatProvider;
use conduit_types::{
    ChatMessage, ChatRequest, ConduitError, FunctionSchema, ToolExecutor, ToolOutput, preview,
    truncate_str,
};
use futures_util::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Default maximum number of model streams per run.
pub const DEFAULT_MAX_ROUNDS: usize = 10;

/// Tool output longer than this is shortened in `ToolEnd` events.
const TOOL_OUTPUT_PREVIEW_BYTES: usize = 2000;

/// Events emitted while the loop runs.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopEvent {
    /// Full display text of the current round so far. Empty clears the display.
    Text(String),
    /// A tool is about to be executed.
    ToolStart { name: String, arguments: String },
    /// A tool has finished executing.
    ToolEnd {
        name: String,
        output: String,
        is_error: bool,
    },
    /// The round ceiling stopped the loop.
    RoundLimitReached,
    /// The cancellation token fired.
    Cancelled,
    /// The model answered without requesting tools.
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStop {
    Finished,
    RoundLimit,
    Cancelled,
}

/// Result of one [`ToolCallLoop::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    /// Final display text.
    pub content: String,
    /// Number of model streams opened.
    pub rounds: usize,
    pub stop: LoopStop,
}

/// Drives a chat provider and a tool executor until the model stops calling tools.
pub struct ToolCallLoop {
    provider: Arc<dyn ChatProvider>,
    executor: Arc<dyn ToolExecutor>,
    model: String,
    temperature: Option<f32>,
    top_p: Option<f32>,
    max_rounds: usize,
}

impl ToolCallLoop {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        executor: Arc<dyn ToolExecutor>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            executor,
            model: model.into(),
            temperature: None,
            top_p: None,
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }

    pub fn set_temperature(&mut self, temperature: f32) {
        self.temperature = Some(temperature);
    }

    pub fn set_top_p(&mut self, top_p: f32) {
        self.top_p = Some(top_p);
    }

    /// Set the round ceiling. At least one round always runs.
    pub fn set_max_rounds(&mut self, max_rounds: usize) {
        self.max_rounds = max_rounds.max(1);
    }

    /// Run the loop over `messages`, appending every round's tool calls and
    /// results, and the final answer.
    ///
    /// Tool failures are written into the conversation as error results.
    /// Cancellation is not an error: the outcome reports `LoopStop::Cancelled`
    /// and messages from completed rounds are kept.
    pub async fn run<F>(
        &self,
        messages: &mut Vec<ChatMessage>,
        tools: Vec<FunctionSchema>,
        cancel: CancellationToken,
        mut on_event: F,
    ) -> Result<LoopOutcome, ConduitError>
    where
        F: FnMut(LoopEvent),
    {
        let tools = if tools.is_empty() { None } else { Some(tools) };

        for round in 1..=self.max_rounds {
            if cancel.is_cancelled() {
                return Ok(cancelled(&mut on_event, String::new(), round - 1));
            }

            let mut request = ChatRequest {
                model: self.model.clone(),
                messages: std::mem::take(messages),
                tool_choice: tools.as_ref().map(|_| "auto".to_string()),
                tools: tools.clone(),
                temperature: self.temperature,
                top_p: self.top_p,
                stream: true,
            };

            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                result = self.provider.stream_chat(&request) => Some(result),
            };

            // Restore messages without cloning the history
            *messages = std::mem::take(&mut request.messages);

            let Some(opened) = opened else {
                return Ok(cancelled(&mut on_event, String::new(), round));
            };
            let mut stream = opened?;

            tracing::debug!(round, provider = self.provider.name(), "Model stream opened");

            let mut content = String::new();
            let mut reasoning = String::new();
            let mut pending = PendingToolCalls::default();

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        let shown = if pending.is_empty() {
                            render(&reasoning, &content)
                        } else {
                            String::new()
                        };
                        return Ok(cancelled(&mut on_event, shown, round));
                    }
                    next = stream.next() => match next {
                        Some(Ok(delta)) => {
                            let had_calls = !pending.is_empty();
                            let mut text_changed = false;
                            if let Some(r) = delta.reasoning.filter(|r| !r.is_empty()) {
                                reasoning.push_str(&r);
                                text_changed = true;
                            }
                            if let Some(t) = delta.content.filter(|t| !t.is_empty()) {
                                content.push_str(&t);
                                text_changed = true;
                            }
                            for fragment in delta.tool_calls {
                                pending.absorb(fragment);
                            }

                            if pending.is_empty() {
                                if text_changed {
                                    on_event(LoopEvent::Text(render(&reasoning, &content)));
                                }
                            } else if !had_calls {
                                // Interim text of a tool round is not shown
                                on_event(LoopEvent::Text(String::new()));
                            }
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => break,
                    }
                }
            }

            if pending.is_empty() {
                if !content.is_empty() {
                    messages.push(ChatMessage::assistant(content.clone()));
                }
                on_event(LoopEvent::Done);
                return Ok(LoopOutcome {
                    content: render(&reasoning, &content),
                    rounds: round,
                    stop: LoopStop::Finished,
                });
            }

            tracing::debug!(round, calls = pending.len(), "Executing tool calls");

            let finished = pending.finish();
            let mut results = Vec::with_capacity(finished.len());
            for call in &finished {
                let name = call.call.function.name.clone();
                on_event(LoopEvent::ToolStart {
                    name: name.clone(),
                    arguments: call.call.function.arguments.clone(),
                });

                let output = match &call.arguments {
                    Err(message) => ToolOutput::error(format!("Error: {message}")),
                    Ok(arguments) => {
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {
                                return Ok(cancelled(&mut on_event, String::new(), round));
                            }
                            result = self.executor.execute(&name, arguments.clone()) => {
                                match result {
                                    Ok(output) => output,
                                    Err(e) => ToolOutput::error(format!("Error: {e}")),
                                }
                            }
                        }
                    }
                };

                if output.is_error {
                    tracing::warn!(
                        tool = %name,
                        "Tool call failed: {}",
                        truncate_str(&output.text, 200)
                    );
                }
                on_event(LoopEvent::ToolEnd {
                    name,
                    output: preview(&output.text, TOOL_OUTPUT_PREVIEW_BYTES).into_owned(),
                    is_error: output.is_error,
                });
                results.push(ChatMessage::tool_result(call.call.id.clone(), output.text));
            }

            messages.push(ChatMessage::assistant_tool_calls(
                finished.into_iter().map(|f| f.call).collect(),
            ));
            messages.extend(results);
        }

        tracing::warn!(max_rounds = self.max_rounds, "Tool-call round limit reached");
        let notice = round_limit_notice(self.max_rounds);
        on_event(LoopEvent::Text(notice.clone()));
        on_event(LoopEvent::RoundLimitReached);
        Ok(LoopOutcome {
            content: notice,
            rounds: self.max_rounds,
            stop: LoopStop::RoundLimit,
        })
    }
}

fn cancelled<F: FnMut(LoopEvent)>(on_event: &mut F, content: String, rounds: usize) -> LoopOutcome {
    on_event(LoopEvent::Cancelled);
    LoopOutcome {
        content,
        rounds,
        stop: LoopStop::Cancelled,
    }
}

/// Display text: reasoning wrapped in `<thinking>` ahead of the answer.
fn render(reasoning: &str, content: &str) -> String {
    if reasoning.is_empty() {
        content.to_string()
    } else {
        format!("<thinking>{reasoning}</thinking>\n\n{content}")
    }
}

/// Notice shown when the loop stops at the round ceiling.
pub fn round_limit_notice(max_rounds: usize) -> String {
    format!("[Tool-call limit reached after {max_rounds} rounds; stopping here.]")
}
