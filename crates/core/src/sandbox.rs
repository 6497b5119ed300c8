//! Sandbox trait: where tools run commands and read files.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

use crate::error::SandboxError;

/// Captured output of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }
}

#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Whether the sandbox is up. Tools fall back to durable storage when not.
    async fn is_running(&self) -> bool;

    /// Run `command` in `working_dir`, killing it after `timeout`.
    async fn execute(
        &self,
        command: &str,
        working_dir: &Path,
        timeout: Duration,
    ) -> Result<CommandOutput, SandboxError>;

    /// Read a file. `Ok(None)` when it does not exist.
    async fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>, SandboxError>;

    /// Write a file, creating parent directories.
    async fn write_file(&self, path: &Path, contents: &[u8]) -> Result<(), SandboxError>;
}
