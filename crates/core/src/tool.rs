//! Tool trait: the abstraction over agent capabilities.
//!
//! Tools are what give the agent the ability to act in the world:
//! execute shell commands, read and write workspace files.
//!
//! The executor only ever calls [`Tool::validate_and_execute`], which
//! folds every fault into a failed [`ToolResult`] so a misbehaving tool
//! can never abort a run.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ToolError;
use crate::provider::ToolDefinition;
use crate::session::ActionMetadata;

/// The result of a tool execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool executed successfully
    pub success: bool,

    /// Human-readable output
    pub output: String,

    /// Optional structured data (e.g. an embedded image)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<ActionMetadata>,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            metadata: None,
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(mut self, metadata: ActionMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// The core Tool trait.
///
/// Each tool (bash, file_read, file_write) implements this trait. Tools
/// are registered in the [`ToolRegistry`] and made available to the
/// agent loop.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "bash", "file_read").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Execute the tool with already-validated arguments.
    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }

    /// Validate `arguments` against the schema, then execute.
    ///
    /// Never fails: invalid arguments and execution errors come back as
    /// `ToolResult { success: false, .. }`.
    async fn validate_and_execute(&self, arguments: serde_json::Value) -> ToolResult {
        if let Err(e) = validate_arguments(&self.parameters_schema(), &arguments) {
            return ToolResult::failure(e.to_string());
        }
        match self.execute(arguments).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(tool = %self.name(), error = %e, "Tool execution failed");
                ToolResult::failure(e.to_string())
            }
        }
    }
}

/// Check that `arguments` is an object carrying every key the schema
/// lists under `required`.
pub fn validate_arguments(
    schema: &serde_json::Value,
    arguments: &serde_json::Value,
) -> Result<(), ToolError> {
    let obj = arguments.as_object().ok_or_else(|| {
        ToolError::InvalidArguments(format!("expected a JSON object, got {arguments}"))
    })?;

    let missing: Vec<&str> = schema["required"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|k| k.as_str())
        .filter(|k| !obj.contains_key(*k))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ToolError::InvalidArguments(format!(
            "missing required field(s): {}",
            missing.join(", ")
        )))
    }
}

/// A registry of available tools.
///
/// The agent loop uses this to:
/// 1. Get tool definitions to send to the LLM
/// 2. Look up and execute tools when the LLM requests them
///
/// Tools are kept in registration order. Registering a name twice
/// replaces the tool in its original slot.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        match self.index.get(&name) {
            Some(&slot) => self.tools[slot] = tool,
            None => {
                self.index.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.index.get(name).map(|&slot| Arc::clone(&self.tools[slot]))
    }

    /// All registered tools, in registration order.
    pub fn list(&self) -> &[Arc<dyn Tool>] {
        &self.tools
    }

    /// Get all tool definitions (for sending to the LLM).
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.to_definition()).collect()
    }

    /// List all registered tool names.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A simple test tool for unit tests.
    struct EchoTool {
        label: &'static str,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            self.label
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string" }
                },
                "required": ["text"]
            })
        }
        async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
            let text = arguments["text"].as_str().unwrap_or("").to_string();
            Ok(ToolResult::success(text))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "broken"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({ "type": "object", "properties": {} })
        }
        async fn execute(&self, _arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
            Err(ToolError::ExecutionFailed {
                tool_name: "broken".into(),
                reason: "disk on fire".into(),
            })
        }
    }

    #[tokio::test]
    async fn registry_register_and_execute() {
        let registry = ToolRegistry::new().with(Arc::new(EchoTool { label: "Echo" }));

        let tool = registry.get("echo").unwrap();
        let result = tool
            .validate_and_execute(serde_json::json!({"text": "hello world"}))
            .await;
        assert!(result.success);
        assert_eq!(result.output, "hello world");
    }

    #[test]
    fn registry_get_unknown_is_none() {
        let registry = ToolRegistry::new();
        assert!(registry.get("nonexistent").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn registry_preserves_registration_order() {
        let registry = ToolRegistry::new()
            .with(Arc::new(FailingTool))
            .with(Arc::new(EchoTool { label: "Echo" }));
        assert_eq!(registry.names(), vec!["broken", "echo"]);
        let defs = registry.definitions();
        assert_eq!(defs[0].name, "broken");
        assert_eq!(defs[1].name, "echo");
    }

    #[test]
    fn registry_collision_overwrites_in_place() {
        let registry = ToolRegistry::new()
            .with(Arc::new(EchoTool { label: "first" }))
            .with(Arc::new(FailingTool))
            .with(Arc::new(EchoTool { label: "second" }));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["echo", "broken"]);
        assert_eq!(registry.get("echo").unwrap().description(), "second");
    }

    #[tokio::test]
    async fn missing_required_field_is_a_failed_result() {
        let tool = EchoTool { label: "Echo" };
        let result = tool.validate_and_execute(serde_json::json!({})).await;
        assert!(!result.success);
        assert!(result.output.contains("text"));
    }

    #[tokio::test]
    async fn non_object_arguments_are_a_failed_result() {
        let tool = EchoTool { label: "Echo" };
        let result = tool.validate_and_execute(serde_json::json!("raw")).await;
        assert!(!result.success);
        assert!(result.output.contains("JSON object"));
    }

    #[tokio::test]
    async fn execution_error_is_a_failed_result() {
        let result = FailingTool.validate_and_execute(serde_json::json!({})).await;
        assert!(!result.success);
        assert!(result.output.contains("disk on fire"));
    }
}
