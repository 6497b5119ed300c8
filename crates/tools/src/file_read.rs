//! File read tool: read workspace files, including images.
//!
//! Text files come back verbatim. Image files come back as a short
//! human-readable summary, with the bytes attached as a base64 data URI
//! in the result metadata so they can be shown to the user and, for
//! vision-capable models, replayed to the model.

use async_trait::async_trait;
use base64::Engine as _;
use opencodex_core::error::ToolError;
use opencodex_core::session::{ActionMetadata, ImageAttachment};
use opencodex_core::tool::{Tool, ToolResult};
use std::path::Path;

use crate::workspace::Workspace;

/// Largest file this tool will load.
const MAX_FILE_SIZE: usize = 10 * 1024 * 1024;

/// Map a file extension to an image MIME type.
pub fn image_mime_from_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?;
    match ext.to_ascii_lowercase().as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "bmp" => Some("image/bmp"),
        "svg" => Some("image/svg+xml"),
        _ => None,
    }
}

pub struct FileReadTool {
    workspace: Workspace,
}

impl FileReadTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read the contents of a file in the workspace. Image files (png, jpg, gif, webp, bmp, svg) are displayed to the user."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The file path to read, e.g. /workspace/src/main.py"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let path = arguments["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;

        let resolved = self
            .workspace
            .resolve(path)
            .map_err(|e| ToolError::PermissionDenied {
                tool_name: "file_read".into(),
                reason: e.to_string(),
            })?;

        let Some(bytes) = self.workspace.read(&resolved).await? else {
            return Ok(ToolResult::failure(format!("File not found: {path}")));
        };

        if bytes.len() > MAX_FILE_SIZE {
            return Ok(ToolResult::failure(format!(
                "File too large: {path} ({} bytes, limit {MAX_FILE_SIZE})",
                bytes.len()
            )));
        }

        if let Some(mime_type) = image_mime_from_extension(&resolved) {
            let size_kb = bytes.len().div_ceil(1024);
            let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
            let filename = resolved
                .file_name()
                .map(|n| n.to_string_lossy().into_owned());

            return Ok(ToolResult::success(format!(
                "Successfully read image file: {path} ({size_kb}KB, {mime_type})\n\
                 Image will be displayed to the user in the chat."
            ))
            .with_metadata(ActionMetadata::Image(ImageAttachment {
                image_data: format!("data:{mime_type};base64,{encoded}"),
                mime_type: mime_type.to_string(),
                filename,
            })));
        }

        match String::from_utf8(bytes) {
            Ok(content) => Ok(ToolResult::success(content)),
            Err(_) => Ok(ToolResult::failure(format!(
                "File is binary and cannot be displayed as text: {path}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::LocalSandbox;
    use std::sync::Arc;

    const PNG_HEADER: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

    fn tool(root: &Path, sandbox: LocalSandbox) -> FileReadTool {
        FileReadTool::new(Workspace::new(root, Arc::new(sandbox)))
    }

    #[test]
    fn tool_definition() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool(dir.path(), LocalSandbox::new(dir.path()));
        assert_eq!(tool.name(), "file_read");
        let schema = tool.parameters_schema();
        assert_eq!(schema["required"], serde_json::json!(["path"]));
        assert!(schema["properties"]["path"].is_object());
    }

    #[test]
    fn image_extensions() {
        assert_eq!(image_mime_from_extension(Path::new("a.PNG")), Some("image/png"));
        assert_eq!(image_mime_from_extension(Path::new("a.jpeg")), Some("image/jpeg"));
        assert_eq!(image_mime_from_extension(Path::new("a.txt")), None);
        assert_eq!(image_mime_from_extension(Path::new("Makefile")), None);
    }

    #[tokio::test]
    async fn read_text_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("test.txt"), "Hello, world!\n").unwrap();

        let tool = tool(dir.path(), LocalSandbox::new(dir.path()));
        let result = tool
            .validate_and_execute(serde_json::json!({"path": "/workspace/test.txt"}))
            .await;

        assert!(result.success);
        assert_eq!(result.output, "Hello, world!\n");
        assert!(result.metadata.is_none());
    }

    #[tokio::test]
    async fn read_image_file_attaches_data_uri() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("out")).unwrap();
        std::fs::write(dir.path().join("out/chart.png"), PNG_HEADER).unwrap();

        let tool = tool(dir.path(), LocalSandbox::new(dir.path()));
        let result = tool
            .validate_and_execute(serde_json::json!({"path": "/workspace/out/chart.png"}))
            .await;

        assert!(result.success);
        assert_eq!(
            result.output,
            "Successfully read image file: /workspace/out/chart.png (1KB, image/png)\n\
             Image will be displayed to the user in the chat."
        );
        let image = result.metadata.as_ref().and_then(|m| m.image()).unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.filename.as_deref(), Some("chart.png"));
        assert_eq!(image.image_data, "data:image/png;base64,iVBORw0KGgo=");
        assert!(!result.output.contains("iVBORw0KGgo"));
    }

    #[tokio::test]
    async fn read_nonexistent_file() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool(dir.path(), LocalSandbox::new(dir.path()));
        let result = tool
            .validate_and_execute(serde_json::json!({"path": "/workspace/nope.txt"}))
            .await;
        assert!(!result.success);
        assert!(result.output.contains("File not found"));
    }

    #[tokio::test]
    async fn stopped_sandbox_reads_from_storage() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("saved.txt"), "persisted").unwrap();
        let tool = tool(dir.path(), LocalSandbox::stopped(dir.path()));
        let result = tool
            .validate_and_execute(serde_json::json!({"path": "saved.txt"}))
            .await;
        assert!(result.success);
        assert_eq!(result.output, "persisted");
    }

    #[tokio::test]
    async fn path_outside_workspace_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool(dir.path(), LocalSandbox::new(dir.path()));
        let result = tool
            .validate_and_execute(serde_json::json!({"path": "/etc/passwd"}))
            .await;
        assert!(!result.success);
        assert!(result.output.contains("Permission denied"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlink_out_of_workspace_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "TOP-SECRET").unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        let tool = tool(dir.path(), LocalSandbox::stopped(dir.path()));
        let result = tool
            .validate_and_execute(serde_json::json!({"path": "/workspace/link/secret.txt"}))
            .await;
        assert!(!result.success);
        assert!(result.output.contains("Permission denied"));
        assert!(!result.output.contains("TOP-SECRET"));
    }

    #[tokio::test]
    async fn missing_path_argument() {
        let dir = tempfile::tempdir().unwrap();
        let tool = tool(dir.path(), LocalSandbox::new(dir.path()));
        assert!(tool.execute(serde_json::json!({})).await.is_err());
        let result = tool.validate_and_execute(serde_json::json!({})).await;
        assert!(!result.success);
    }
}
