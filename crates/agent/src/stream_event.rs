//! Agent-level streaming events.
//!
//! `StreamEvent` is what a run emits while it works. The gateway forwards
//! each event to the WebSocket client as JSON, unchanged.
//!
//! Within one step the order is fixed: text `chunk`s and
//! `action_streaming` notices as the model produces them, then one
//! `action`, then its `observation`. A run ends with exactly one `end`
//! or `error`.

use opencodex_core::session::ActionMetadata;
use serde::{Deserialize, Serialize};

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The model replied without calling a tool.
    FinalAnswer,
    /// The step budget ran out.
    MaxIterations,
    /// The client cancelled or went away.
    Cancelled,
}

/// Status carried by `action_streaming`.
pub const STREAMING_STATUS: &str = "streaming";

/// Events emitted during a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A turn has started.
    Start,

    /// The user's message was persisted.
    UserMessageSaved { block_id: String, sequence_number: i64 },

    /// Partial text from the LLM.
    Chunk { content: String },

    /// The model has begun proposing a call to `tool`.
    ActionStreaming {
        tool: String,
        status: String,
        step: u32,
    },

    /// The agent is executing a tool.
    Action {
        tool: String,
        input: serde_json::Value,
        step: u32,
    },

    /// Tool execution completed.
    Observation {
        tool: String,
        output: String,
        success: bool,
        step: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<ActionMetadata>,
    },

    /// Reserved; never emitted.
    Thought { content: String },

    /// The turn is complete.
    End { content: String, reason: EndReason },

    /// The turn failed.
    Error { message: String },
}

impl StreamEvent {
    pub fn action_streaming(tool: impl Into<String>, step: u32) -> Self {
        Self::ActionStreaming {
            tool: tool.into(),
            status: STREAMING_STATUS.into(),
            step,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Wire name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::UserMessageSaved { .. } => "user_message_saved",
            Self::Chunk { .. } => "chunk",
            Self::ActionStreaming { .. } => "action_streaming",
            Self::Action { .. } => "action",
            Self::Observation { .. } => "observation",
            Self::Thought { .. } => "thought",
            Self::End { .. } => "end",
            Self::Error { .. } => "error",
        }
    }

    /// True for `end` and `error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End { .. } | Self::Error { .. })
    }
}
