//! Provider-facing conversation turns.
//!
//! A [`Message`] is one role-tagged turn as the LLM sees it. Content is
//! either a plain string or a list of typed parts, so that tool results
//! can carry an image for vision-capable models.

use serde::{Deserialize, Serialize};

/// The role of a turn in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions
    System,
    /// The end user
    User,
    /// The AI assistant
    Assistant,
    /// Result of a tool invocation, replayed to the model
    Tool,
}

/// The content of a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TurnContent {
    /// Plain text.
    Text(String),
    /// Mixed content (text + images).
    Parts(Vec<ContentPart>),
}

impl TurnContent {
    /// The text portion of this content, concatenated across parts.
    pub fn text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(s) => s.is_empty(),
            Self::Parts(parts) => parts.is_empty(),
        }
    }
}

impl From<String> for TurnContent {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<&str> for TurnContent {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// One part of a multi-part turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageUrl {
    /// A `data:` URI or remote URL.
    pub url: String,
}

/// A tool invocation requested by the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Name of the tool
    pub name: String,

    /// Arguments as a JSON string
    pub arguments: String,
}

/// A single turn in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Who produced this turn
    pub role: Role,

    /// The turn content
    pub content: TurnContent,

    /// Set on assistant turns that invoke a tool
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
}

impl Message {
    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: TurnContent::Text(content.into()),
            function_call: None,
        }
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: TurnContent::Text(content.into()),
            function_call: None,
        }
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: TurnContent::Text(content.into()),
            function_call: None,
        }
    }

    /// Create an assistant turn that invokes `name` with `input`.
    pub fn tool_call(name: impl Into<String>, input: &serde_json::Value) -> Self {
        Self {
            role: Role::Assistant,
            content: TurnContent::Text(String::new()),
            function_call: Some(FunctionCall {
                name: name.into(),
                arguments: input.to_string(),
            }),
        }
    }

    /// Create a tool result turn.
    pub fn tool_result(content: impl Into<TurnContent>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            function_call: None,
        }
    }

    pub fn is_tool_call(&self) -> bool {
        self.function_call.is_some()
    }
}
