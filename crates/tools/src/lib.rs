//! Built-in tool implementations for OpenCodex.
//!
//! Tools give the agent the ability to act inside its workspace:
//! run commands, read files (images included) and write files.

pub mod bash;
pub mod file_read;
pub mod file_write;
pub mod sandbox;
pub mod workspace;

use opencodex_core::tool::ToolRegistry;
use std::sync::Arc;
use std::time::Duration;

pub use bash::BashTool;
pub use file_read::FileReadTool;
pub use file_write::FileWriteTool;
pub use sandbox::LocalSandbox;
pub use workspace::Workspace;

/// Create a registry with all built-in tools, in the order the model sees them.
pub fn default_registry(workspace: Workspace, command_timeout: Duration) -> ToolRegistry {
    ToolRegistry::new()
        .with(Arc::new(BashTool::new(workspace.clone(), command_timeout)))
        .with(Arc::new(FileReadTool::new(workspace.clone())))
        .with(Arc::new(FileWriteTool::new(workspace)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_lists_builtins_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::new(dir.path(), Arc::new(LocalSandbox::new(dir.path())));
        let registry = default_registry(ws, Duration::from_secs(30));
        assert_eq!(registry.names(), vec!["bash", "file_read", "file_write"]);
    }
}
