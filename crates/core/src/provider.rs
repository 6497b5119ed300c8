//! Provider trait: the abstraction over LLM backends.
//!
//! A Provider takes a conversation and yields the model's reply as a
//! stream of typed fragments: plain text, or a piece of a tool call
//! keyed by call index. Whatever loosely-typed payload the backend
//! speaks is converted into [`StreamFragment`] inside the adapter.
//!
//! Implementations: OpenAI-compatible endpoints.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::Message;

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// The model to use (e.g., "gpt-4o", "anthropic/claude-sonnet-4")
    pub model: String,

    /// The conversation turns
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Available tools the model can call
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

fn default_temperature() -> f32 {
    0.7
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// One item of a streamed model reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamFragment {
    /// Reasoning or answer prose.
    Text { content: String },
    /// A piece of a tool call.
    ToolCall(ToolCallFragment),
}

impl StreamFragment {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }

    pub fn tool_call(index: u32, name: Option<&str>, arguments: Option<&str>) -> Self {
        Self::ToolCall(ToolCallFragment {
            index,
            name: name.map(String::from),
            arguments: arguments.map(String::from),
        })
    }
}

/// A partial tool call. Fragments sharing an `index` belong to the same call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallFragment {
    pub index: u32,

    /// Name fragment; usually only present on the first fragment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Incremental JSON arguments, concatenated in arrival order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// Receiver side of a provider stream. Closes when the reply is complete.
pub type FragmentStream = mpsc::Receiver<Result<StreamFragment, ProviderError>>;

/// The core Provider trait.
///
/// The agent loop calls `stream()` without knowing which backend is
/// being used.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai", "openrouter").
    fn name(&self) -> &str;

    /// Send a request and get a stream of reply fragments.
    async fn stream(&self, request: ProviderRequest) -> Result<FragmentStream, ProviderError>;

    /// Health check: can we reach the provider?
    async fn health_check(&self) -> Result<bool, ProviderError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_definition_serialization() {
        let tool = ToolDefinition {
            name: "bash".into(),
            description: "Execute a shell command".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "The command to run" }
                },
                "required": ["command"]
            }),
        };
        let json = serde_json::to_string(&tool).unwrap();
        assert!(json.contains("bash"));
        assert!(json.contains("command"));
    }

    #[test]
    fn fragment_constructors() {
        assert_eq!(
            StreamFragment::text("hi"),
            StreamFragment::Text {
                content: "hi".into()
            }
        );
        match StreamFragment::tool_call(2, Some("bash"), None) {
            StreamFragment::ToolCall(f) => {
                assert_eq!(f.index, 2);
                assert_eq!(f.name.as_deref(), Some("bash"));
                assert!(f.arguments.is_none());
            }
            other => panic!("Expected tool call fragment, got {other:?}"),
        }
    }
}
