//! Reassembly of streamed tool calls.
//!
//! Providers stream a tool call as a series of fragments sharing a call
//! index: a name (usually on the first fragment) followed by pieces of a
//! JSON argument string. [`DeltaAssembler`] folds those fragments back
//! into complete calls while passing text through untouched.

use std::collections::BTreeMap;

use opencodex_core::provider::{StreamFragment, ToolCallFragment};
use tracing::{trace, warn};

/// Something the caller should react to immediately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssemblerOutput {
    /// A text fragment, forwarded as-is.
    Text(String),
    /// The first non-empty name seen for a call index.
    Announced { index: u32, name: String },
}

/// A fully received tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedCall {
    pub index: u32,
    pub name: String,
    /// Raw argument string as concatenated from the stream.
    pub arguments: String,
}

/// Result of one model reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssembledTurn {
    /// Completed calls in announcement order.
    pub calls: Vec<CompletedCall>,
    /// All text fragments, concatenated.
    pub text: String,
}

impl AssembledTurn {
    /// The call the agent acts on: the lowest index.
    pub fn first_call(&self) -> Option<&CompletedCall> {
        self.calls.iter().min_by_key(|c| c.index)
    }
}

#[derive(Debug, Default)]
struct ToolCallBuffer {
    name: Option<String>,
    arguments: String,
}

/// Per-reply accumulator. Create one per provider stream.
#[derive(Debug, Default)]
pub struct DeltaAssembler {
    buffers: BTreeMap<u32, ToolCallBuffer>,
    announced: Vec<u32>,
    text: String,
}

impl DeltaAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one fragment and return what should be surfaced right now.
    pub fn push(&mut self, fragment: StreamFragment) -> Option<AssemblerOutput> {
        match fragment {
            StreamFragment::Text { content } => {
                if content.is_empty() {
                    return None;
                }
                self.text.push_str(&content);
                Some(AssemblerOutput::Text(content))
            }
            StreamFragment::ToolCall(fragment) => self.push_call(fragment),
        }
    }

    fn push_call(&mut self, fragment: ToolCallFragment) -> Option<AssemblerOutput> {
        let ToolCallFragment {
            index,
            name,
            arguments,
        } = fragment;
        let buffer = self.buffers.entry(index).or_default();

        if let Some(arguments) = arguments {
            buffer.arguments.push_str(&arguments);
        }

        match name {
            Some(name) if !name.is_empty() && buffer.name.is_none() => {
                trace!(index, tool = %name, "Tool call announced");
                buffer.name = Some(name.clone());
                self.announced.push(index);
                Some(AssemblerOutput::Announced { index, name })
            }
            _ => None,
        }
    }

    /// Whether any call index has been announced so far.
    pub fn has_calls(&self) -> bool {
        !self.announced.is_empty()
    }

    /// Text received so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Close the reply and hand back completed calls and text.
    pub fn finish(mut self) -> AssembledTurn {
        let mut calls = Vec::with_capacity(self.announced.len());
        for index in &self.announced {
            if let Some(buffer) = self.buffers.remove(index)
                && let Some(name) = buffer.name
            {
                calls.push(CompletedCall {
                    index: *index,
                    name,
                    arguments: buffer.arguments,
                });
            }
        }

        for (index, buffer) in &self.buffers {
            warn!(
                index,
                arguments_len = buffer.arguments.len(),
                "Dropping tool call fragments that never received a name"
            );
        }

        AssembledTurn {
            calls,
            text: self.text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(index: u32, name: Option<&str>, args: Option<&str>) -> StreamFragment {
        StreamFragment::tool_call(index, name, args)
    }

    #[test]
    fn text_passes_through_in_order() {
        let mut asm = DeltaAssembler::new();
        let out: Vec<_> = ["Hello", ", ", "world"]
            .into_iter()
            .filter_map(|t| asm.push(StreamFragment::text(t)))
            .collect();
        assert_eq!(
            out,
            vec![
                AssemblerOutput::Text("Hello".into()),
                AssemblerOutput::Text(", ".into()),
                AssemblerOutput::Text("world".into()),
            ]
        );
        let turn = asm.finish();
        assert_eq!(turn.text, "Hello, world");
        assert!(turn.calls.is_empty());
    }

    #[test]
    fn announces_once_and_concatenates_arguments() {
        let mut asm = DeltaAssembler::new();
        assert_eq!(
            asm.push(call(0, Some("tool_a"), Some(""))),
            Some(AssemblerOutput::Announced {
                index: 0,
                name: "tool_a".into()
            })
        );
        assert_eq!(asm.push(call(0, None, Some(r#"{"x""#))), None);
        assert_eq!(asm.push(call(0, Some(""), Some(": 1}"))), None);
        assert_eq!(asm.push(call(0, Some("tool_a"), None)), None);

        let turn = asm.finish();
        assert_eq!(
            turn.calls,
            vec![CompletedCall {
                index: 0,
                name: "tool_a".into(),
                arguments: r#"{"x": 1}"#.into(),
            }]
        );
    }

    #[test]
    fn arguments_before_name_are_kept() {
        let mut asm = DeltaAssembler::new();
        assert_eq!(asm.push(call(3, Some(""), Some(r#"{"path":"#))), None);
        assert!(!asm.has_calls());
        assert!(matches!(
            asm.push(call(3, Some("file_read"), Some(r#""a.txt"}"#))),
            Some(AssemblerOutput::Announced { index: 3, .. })
        ));
        let turn = asm.finish();
        assert_eq!(turn.calls[0].arguments, r#"{"path":"a.txt"}"#);
    }

    #[test]
    fn calls_keep_announcement_order() {
        let mut asm = DeltaAssembler::new();
        asm.push(call(1, Some("tool_b"), None));
        asm.push(call(0, Some("tool_a"), None));
        let turn = asm.finish();
        let names: Vec<_> = turn.calls.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["tool_b", "tool_a"]);
        assert_eq!(turn.first_call().map(|c| c.name.as_str()), Some("tool_a"));
    }

    #[test]
    fn unnamed_buffers_are_dropped() {
        let mut asm = DeltaAssembler::new();
        asm.push(call(0, Some("bash"), Some("{}")));
        asm.push(call(1, None, Some(r#"{"orphan":true}"#)));
        let turn = asm.finish();
        assert_eq!(turn.calls.len(), 1);
        assert_eq!(turn.calls[0].name, "bash");
    }

    #[test]
    fn text_interleaves_with_calls() {
        let mut asm = DeltaAssembler::new();
        let outputs: Vec<_> = vec![
            StreamFragment::text("Let me check."),
            call(0, Some("bash"), None),
            StreamFragment::text(" One moment."),
        ]
        .into_iter()
        .filter_map(|f| asm.push(f))
        .collect();
        assert!(matches!(outputs[0], AssemblerOutput::Text(_)));
        assert!(matches!(outputs[1], AssemblerOutput::Announced { .. }));
        assert!(matches!(outputs[2], AssemblerOutput::Text(_)));
        assert_eq!(asm.text(), "Let me check. One moment.");
    }
}
