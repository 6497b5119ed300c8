//! Persisted conversation model.
//!
//! A [`ChatSession`] owns an append-only log of [`ContentBlock`]s ordered
//! by `sequence_number`. Tool invocations are tracked separately as
//! [`AgentAction`]s and referenced from the log by id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chat session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub project_id: String,
    pub name: String,

    /// Execution environment descriptor (sandbox image, workspace, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<serde_json::Value>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(project_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            name: name.into(),
            environment: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_environment(mut self, environment: serde_json::Value) -> Self {
        self.environment = Some(environment);
        self
    }
}

/// The kind of a content block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    UserText,
    AssistantText,
    ToolCall,
    ToolResult,
}

impl BlockKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserText => "user_text",
            Self::AssistantText => "assistant_text",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
        }
    }
}

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The payload of a content block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockContent {
    UserText {
        text: String,
    },
    AssistantText {
        text: String,
        /// False when the run was aborted mid-stream
        #[serde(default = "default_true")]
        complete: bool,
    },
    ToolCall {
        action_id: String,
        tool: String,
        input: serde_json::Value,
        step: u32,
    },
    ToolResult {
        action_id: String,
        tool: String,
        success: bool,
        output: String,
        step: u32,
    },
}

fn default_true() -> bool {
    true
}

impl BlockContent {
    pub fn kind(&self) -> BlockKind {
        match self {
            Self::UserText { .. } => BlockKind::UserText,
            Self::AssistantText { .. } => BlockKind::AssistantText,
            Self::ToolCall { .. } => BlockKind::ToolCall,
            Self::ToolResult { .. } => BlockKind::ToolResult,
        }
    }
}

/// One entry in a session's conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    pub id: String,
    pub chat_session_id: String,

    /// Dense, strictly increasing within the session. Assigned by storage.
    pub sequence_number: i64,

    pub content: BlockContent,
    pub created_at: DateTime<Utc>,
}

impl ContentBlock {
    pub fn kind(&self) -> BlockKind {
        self.content.kind()
    }
}

/// Lifecycle of an agent action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Running,
    Success,
    Failed,
}

impl ActionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// An image produced by a tool, carried as a data URI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageAttachment {
    /// `data:<mime>;base64,<payload>`
    pub image_data: String,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
}

/// Structured side-data attached to a tool result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionMetadata {
    Image(ImageAttachment),
    /// Any metadata shape this runtime does not interpret.
    #[serde(other)]
    Other,
}

impl ActionMetadata {
    pub fn image(&self) -> Option<&ImageAttachment> {
        match self {
            Self::Image(img) => Some(img),
            Self::Other => None,
        }
    }
}

/// Outcome recorded on a completed action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutput {
    pub success: bool,
    pub result: String,
}

/// One executed tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentAction {
    pub id: String,
    pub chat_session_id: String,

    /// The assistant turn that produced this action
    pub turn_id: String,

    /// Tool name
    pub action_type: String,
    pub action_input: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_output: Option<ActionOutput>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_metadata: Option<ActionMetadata>,

    pub status: ActionStatus,
    pub step: u32,
    pub created_at: DateTime<Utc>,
}

impl AgentAction {
    /// Success flag and output text, if the action has finished.
    pub fn result(&self) -> Option<(bool, &str)> {
        self.action_output
            .as_ref()
            .map(|o| (o.success, o.result.as_str()))
    }
}

/// Input for creating an action. Storage assigns id, status and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAgentAction {
    pub chat_session_id: String,
    pub turn_id: String,
    pub action_type: String,
    pub action_input: serde_json::Value,
    pub step: u32,
}
