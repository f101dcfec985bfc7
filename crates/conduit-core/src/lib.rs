//! Streaming tool-call loop for Conduit.
//!
//! Consumes a chat provider's delta stream, reassembles tool-call fragments,
//! executes the calls and resubmits until the model answers without tools.

pub mod pending;
pub mod tool_loop;

pub use pending::{FinishedToolCall, PendingToolCall, PendingToolCalls};
pub use tool_loop::{
    DEFAULT_MAX_ROUNDS, LoopEvent, LoopOutcome, LoopStop, ToolCallLoop, round_limit_notice,
};
