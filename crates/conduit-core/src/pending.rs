//! Reassembly of streamed tool-call fragments.

use conduit_types::{ToolCall, ToolCallDelta};
use std::collections::BTreeMap;

/// A tool call still being assembled from stream fragments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingToolCall {
    pub id: String,
    pub name: String,
    /// Argument JSON as received so far.
    pub arguments: String,
}

/// A tool call whose stream segment has ended.
#[derive(Debug, Clone, PartialEq)]
pub struct FinishedToolCall {
    /// The call as it will be recorded in the conversation.
    pub call: ToolCall,
    /// Parsed arguments, or why they could not be parsed.
    pub arguments: Result<serde_json::Value, String>,
}

/// All tool calls of one stream, keyed by their positional index.
#[derive(Debug, Default)]
pub struct PendingToolCalls {
    calls: BTreeMap<usize, PendingToolCall>,
}

impl PendingToolCalls {
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Merge one fragment. Argument pieces are appended in arrival order;
    /// id and name are only replaced by non-empty values.
    pub fn absorb(&mut self, delta: ToolCallDelta) {
        let call = self.calls.entry(delta.index).or_default();
        if let Some(id) = delta.id.filter(|s| !s.is_empty()) {
            call.id = id;
        }
        if let Some(name) = delta.name.filter(|s| !s.is_empty()) {
            call.name = name;
        }
        if let Some(fragment) = delta.arguments {
            call.arguments.push_str(&fragment);
        }
    }

    /// Finalize every call in index order, parsing its argument buffer.
    ///
    /// A blank buffer means no arguments (`{}`). A parse failure affects only
    /// that call.
    pub fn finish(self) -> Vec<FinishedToolCall> {
        self.calls
            .into_iter()
            .map(|(index, pending)| {
                let id = if pending.id.is_empty() {
                    format!("call_{index}")
                } else {
                    pending.id
                };
                let arguments = if pending.arguments.trim().is_empty() {
                    Ok(serde_json::json!({}))
                } else {
                    serde_json::from_str(&pending.arguments)
                        .map_err(|e| format!("Invalid JSON arguments for {}: {e}", pending.name))
                };
                FinishedToolCall {
                    call: ToolCall::new(id, pending.name, pending.arguments),
                    arguments,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fragment(index: usize, id: Option<&str>, name: Option<&str>, args: &str) -> ToolCallDelta {
        ToolCallDelta {
            index,
            id: id.map(String::from),
            name: name.map(String::from),
            arguments: Some(args.to_string()),
        }
    }

    #[test]
    fn split_at_every_boundary_reassembles() {
        let text = r#"{"a":1}"#;
        for split in 0..=text.len() {
            let mut pending = PendingToolCalls::default();
            pending.absorb(fragment(0, Some("call_1"), Some("fs__read"), &text[..split]));
            pending.absorb(fragment(0, None, None, &text[split..]));
            let finished = pending.finish();
            assert_eq!(finished.len(), 1);
            assert_eq!(finished[0].arguments, Ok(json!({"a": 1})), "split at {split}");
        }
    }

    #[test]
    fn one_char_per_fragment_reassembles() {
        let text = r#"{"a":1}"#;
        let mut pending = PendingToolCalls::default();
        pending.absorb(fragment(0, Some("call_1"), Some("fs__read"), ""));
        for ch in text.chars() {
            pending.absorb(fragment(0, None, None, &ch.to_string()));
        }
        assert_eq!(pending.finish()[0].arguments, Ok(json!({"a": 1})));
    }

    #[test]
    fn id_and_name_survive_empty_followups() {
        let mut pending = PendingToolCalls::default();
        pending.absorb(fragment(0, Some("call_9"), Some("web__search"), "{"));
        pending.absorb(fragment(0, Some(""), Some(""), "}"));
        pending.absorb(ToolCallDelta {
            index: 0,
            ..ToolCallDelta::default()
        });
        let finished = pending.finish();
        assert_eq!(finished[0].call.id, "call_9");
        assert_eq!(finished[0].call.function.name, "web__search");
        assert_eq!(finished[0].call.function.arguments, "{}");
    }

    #[test]
    fn interleaved_indices_stay_separate_and_ordered() {
        let mut pending = PendingToolCalls::default();
        pending.absorb(fragment(1, Some("b"), Some("fs__two"), r#"{"n":"#));
        pending.absorb(fragment(0, Some("a"), Some("fs__one"), r#"{"n":"#));
        pending.absorb(fragment(1, None, None, "2}"));
        pending.absorb(fragment(0, None, None, "1}"));
        assert_eq!(pending.len(), 2);
        let finished = pending.finish();
        assert_eq!(finished[0].call.id, "a");
        assert_eq!(finished[0].arguments, Ok(json!({"n": 1})));
        assert_eq!(finished[1].call.id, "b");
        assert_eq!(finished[1].arguments, Ok(json!({"n": 2})));
    }

    #[test]
    fn blank_arguments_become_empty_object() {
        let mut pending = PendingToolCalls::default();
        pending.absorb(fragment(0, Some("c"), Some("fs__ping"), "  "));
        assert_eq!(pending.finish()[0].arguments, Ok(json!({})));
    }

    #[test]
    fn bad_json_fails_only_that_call() {
        let mut pending = PendingToolCalls::default();
        pending.absorb(fragment(0, Some("a"), Some("fs__bad"), r#"{"a":"#));
        pending.absorb(fragment(1, Some("b"), Some("fs__good"), r#"{"a":2}"#));
        let finished = pending.finish();
        let err = finished[0].arguments.as_ref().unwrap_err();
        assert!(err.contains("fs__bad"));
        assert_eq!(finished[1].arguments, Ok(json!({"a": 2})));
    }

    #[test]
    fn missing_id_gets_positional_id() {
        let mut pending = PendingToolCalls::default();
        pending.absorb(fragment(3, None, Some("fs__x"), "{}"));
        assert_eq!(pending.finish()[0].call.id, "call_3");
    }
}
