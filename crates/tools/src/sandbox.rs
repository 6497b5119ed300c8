//! Local process sandbox.
//!
//! Runs commands with `sh -c` on the host, rooted at the workspace
//! directory. Commands are killed when their timeout elapses.

use async_trait::async_trait;
use opencodex_core::error::SandboxError;
use opencodex_core::sandbox::{CommandOutput, Sandbox};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

pub struct LocalSandbox {
    root: PathBuf,
    running: AtomicBool,
}

impl LocalSandbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            running: AtomicBool::new(true),
        }
    }

    /// A sandbox that reports itself as not running.
    pub fn stopped(root: impl Into<PathBuf>) -> Self {
        let sandbox = Self::new(root);
        sandbox.stop();
        sandbox
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
    }

    fn ensure_running(&self) -> Result<(), SandboxError> {
        if self.running.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SandboxError::NotRunning(self.root.display().to_string()))
        }
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    async fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn execute(
        &self,
        command: &str,
        working_dir: &Path,
        timeout: Duration,
    ) -> Result<CommandOutput, SandboxError> {
        self.ensure_running()?;
        debug!(command = %command, cwd = %working_dir.display(), "Executing command");

        let mut cmd = if cfg!(target_os = "windows") {
            let mut c = Command::new("cmd");
            c.args(["/C", command]);
            c
        } else {
            let mut c = Command::new("sh");
            c.args(["-c", command]);
            c
        };
        cmd.current_dir(working_dir).kill_on_drop(true);

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(output) => output?,
            Err(_) => {
                warn!(command = %command, timeout_secs = timeout.as_secs(), "Command timed out");
                return Err(SandboxError::Timeout(timeout.as_secs()));
            }
        };

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn read_file(&self, path: &Path) -> Result<Option<Vec<u8>>, SandboxError> {
        self.ensure_running()?;
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_file(&self, path: &Path, contents: &[u8]) -> Result<(), SandboxError> {
        self.ensure_running()?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, contents).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn execute_echo() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = LocalSandbox::new(dir.path());
        let out = sandbox
            .execute("echo hello", dir.path(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(out.succeeded());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn execute_reports_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = LocalSandbox::new(dir.path());
        let out = sandbox
            .execute("echo oops >&2; exit 3", dir.path(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn execute_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = LocalSandbox::new(dir.path());
        let err = sandbox
            .execute("sleep 5", dir.path(), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Timeout(_)));
    }

    #[tokio::test]
    async fn stopped_sandbox_refuses_work() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = LocalSandbox::stopped(dir.path());
        assert!(!sandbox.is_running().await);
        assert!(matches!(
            sandbox.read_file(&dir.path().join("x")).await,
            Err(SandboxError::NotRunning(_))
        ));
        sandbox.start();
        assert!(sandbox.read_file(&dir.path().join("x")).await.unwrap().is_none());
    }
}
