//! File write tool: create or overwrite workspace files.

use async_trait::async_trait;
use opencodex_core::error::ToolError;
use opencodex_core::tool::{Tool, ToolResult};

use crate::workspace::Workspace;

pub struct FileWriteTool {
    workspace: Workspace,
}

impl FileWriteTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Write content to a file in the workspace. Creates parent directories and overwrites existing files."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to write, e.g. /workspace/out/report.md"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let path = arguments["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;

        let content = arguments["content"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'content' argument".into()))?;

        let resolved = self
            .workspace
            .resolve(path)
            .map_err(|e| ToolError::PermissionDenied {
                tool_name: "file_write".into(),
                reason: e.to_string(),
            })?;

        match self.workspace.write(&resolved, content.as_bytes()).await {
            Ok(()) => Ok(ToolResult::success(format!(
                "Successfully wrote {} bytes to {path}",
                content.len()
            ))),
            Err(e) => Ok(ToolResult::failure(format!("Failed to write file: {e}"))),
        }
    }
}
