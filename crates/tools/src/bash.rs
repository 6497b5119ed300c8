//! Bash tool: execute commands in the sandbox.
//!
//! Commands run in the workspace directory with a timeout. A non-zero
//! exit status is reported as a failed result carrying the exit code,
//! stdout and stderr.

use async_trait::async_trait;
use opencodex_core::error::{SandboxError, ToolError};
use opencodex_core::tool::{Tool, ToolResult};
use std::time::Duration;
use tracing::{debug, warn};

use crate::workspace::Workspace;

pub struct BashTool {
    workspace: Workspace,
    timeout: Duration,
}

impl BashTool {
    pub fn new(workspace: Workspace, timeout: Duration) -> Self {
        Self { workspace, timeout }
    }
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a bash command in the workspace and return stdout/stderr. Use this for running programs, listing files, installing packages, git operations, etc."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The command to execute"
                },
                "working_dir": {
                    "type": "string",
                    "description": "Directory to run in, relative to /workspace (default: /workspace)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let command = arguments["command"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'command' argument".into()))?;

        let working_dir = match arguments["working_dir"].as_str() {
            Some(dir) => self.workspace.resolve(dir).map_err(|e| ToolError::PermissionDenied {
                tool_name: "bash".into(),
                reason: e.to_string(),
            })?,
            None => self.workspace.root().to_path_buf(),
        };

        debug!(command = %command, "Executing bash command");

        let output = self
            .workspace
            .sandbox()
            .execute(command, &working_dir, self.timeout)
            .await
            .map_err(|e| match e {
                SandboxError::Timeout(secs) => ToolError::Timeout {
                    tool_name: "bash".into(),
                    timeout_secs: secs,
                },
                other => ToolError::Sandbox(other),
            })?;

        let stdout = output.stdout.trim_end();
        let stderr = output.stderr.trim_end();

        if output.succeeded() {
            let text = if stderr.is_empty() {
                stdout.to_string()
            } else {
                format!("{stdout}\n[stderr]: {stderr}")
            };
            Ok(ToolResult::success(text.trim().to_string()))
        } else {
            warn!(command = %command, exit_code = output.exit_code, "Command failed");
            Ok(ToolResult::failure(
                format!("[exit code: {}]\n{stdout}\n{stderr}", output.exit_code)
                    .trim()
                    .to_string(),
            ))
        }
    }
}
