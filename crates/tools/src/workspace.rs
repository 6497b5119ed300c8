//! Workspace file access.
//!
//! Tools address files as `/workspace/<path>` (or relative to the
//! workspace). Paths are mapped onto the host workspace root and may not
//! escape it. Reads and writes go through the sandbox while it is
//! running and fall back to the workspace directory on disk otherwise.

use opencodex_core::error::SandboxError;
use opencodex_core::sandbox::Sandbox;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Mount point of the workspace as seen by the model.
pub const WORKSPACE_MOUNT: &str = "/workspace";

#[derive(Clone)]
pub struct Workspace {
    root: PathBuf,
    sandbox: Arc<dyn Sandbox>,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>, sandbox: Arc<dyn Sandbox>) -> Self {
        Self {
            root: root.into(),
            sandbox,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sandbox(&self) -> &Arc<dyn Sandbox> {
        &self.sandbox
    }

    /// Map a model-facing path onto the host filesystem.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, SandboxError> {
        let relative = match path.strip_prefix(WORKSPACE_MOUNT) {
            Some("") => "",
            Some(rest) if rest.starts_with('/') => rest.trim_start_matches('/'),
            _ if Path::new(path).is_absolute() => {
                return Err(SandboxError::OutsideWorkspace(path.to_string()));
            }
            _ => path,
        };

        let mut resolved = self.root.clone();
        let mut depth = 0usize;
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => {
                    resolved.push(part);
                    depth += 1;
                }
                Component::CurDir => {}
                Component::ParentDir if depth > 0 => {
                    resolved.pop();
                    depth -= 1;
                }
                _ => return Err(SandboxError::OutsideWorkspace(path.to_string())),
            }
        }
        self.confine(&resolved, path)?;
        Ok(resolved)
    }

    /// Reject paths whose symlinks lead out of the workspace.
    ///
    /// The deepest ancestor that exists on disk is canonicalized, so paths
    /// of files about to be created are checked through their parent.
    fn confine(&self, resolved: &Path, path: &str) -> Result<(), SandboxError> {
        let Ok(root) = self.root.canonicalize() else {
            return Ok(());
        };
        let Some(existing) = resolved
            .ancestors()
            .find(|p| p.symlink_metadata().is_ok())
        else {
            return Ok(());
        };
        // A dangling link cannot be canonicalized and is refused.
        match existing.canonicalize() {
            Ok(canonical) if canonical.starts_with(&root) => Ok(()),
            _ => {
                debug!(path, resolved = %resolved.display(), "Path leaves the workspace through a symlink");
                Err(SandboxError::OutsideWorkspace(path.to_string()))
            }
        }
    }

    /// Read a workspace file. `Ok(None)` when it does not exist.
    pub async fn read(&self, path: &Path) -> Result<Option<Vec<u8>>, SandboxError> {
        if self.sandbox.is_running().await {
            return self.sandbox.read_file(path).await;
        }
        debug!(path = %path.display(), "Sandbox not running, reading from workspace storage");
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn write(&self, path: &Path, contents: &[u8]) -> Result<(), SandboxError> {
        if self.sandbox.is_running().await {
            return self.sandbox.write_file(path, contents).await;
        }
        debug!(path = %path.display(), "Sandbox not running, writing to workspace storage");
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
    use crate::sandbox::LocalSandbox;

    fn workspace(root: &Path) -> Workspace {
        Workspace::new(root, Arc::new(LocalSandbox::new(root)))
    }

    #[test]
    fn resolve_workspace_paths() {
        let ws = workspace(Path::new("/srv/ws"));
        assert_eq!(
            ws.resolve("/workspace/out/chart.png").unwrap(),
            PathBuf::from("/srv/ws/out/chart.png")
        );
        assert_eq!(
            ws.resolve("notes/a.txt").unwrap(),
            PathBuf::from("/srv/ws/notes/a.txt")
        );
        assert_eq!(ws.resolve("/workspace").unwrap(), PathBuf::from("/srv/ws"));
        assert_eq!(
            ws.resolve("a/../b.txt").unwrap(),
            PathBuf::from("/srv/ws/b.txt")
        );
    }

    #[test]
    fn resolve_rejects_escapes() {
        let ws = workspace(Path::new("/srv/ws"));
        assert!(ws.resolve("/etc/passwd").is_err());
        assert!(ws.resolve("../secret").is_err());
        assert!(ws.resolve("/workspace/../../etc").is_err());
        assert!(ws.resolve("/workspacefoo/x").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn resolve_rejects_symlink_escapes() {
        let ws_dir = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("secret.txt"), "TOP-SECRET").unwrap();
        std::os::unix::fs::symlink(outside.path(), ws_dir.path().join("link")).unwrap();
        std::os::unix::fs::symlink(
            outside.path().join("gone"),
            ws_dir.path().join("dangling"),
        )
        .unwrap();
        let ws = workspace(ws_dir.path());

        assert!(ws.resolve("/workspace/link/secret.txt").is_err());
        assert!(ws.resolve("/workspace/link/new/file.txt").is_err());
        assert!(ws.resolve("dangling").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn resolve_allows_symlinks_within_workspace() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("real")).unwrap();
        std::os::unix::fs::symlink(dir.path().join("real"), dir.path().join("alias")).unwrap();
        let ws = workspace(dir.path());

        assert_eq!(
            ws.resolve("/workspace/alias/a.txt").unwrap(),
            dir.path().join("alias/a.txt")
        );
        assert!(ws.resolve("/workspace/new/dir/b.txt").is_ok());
    }

    #[tokio::test]
    async fn stopped_sandbox_falls_back_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "on disk").unwrap();
        let ws = Workspace::new(dir.path(), Arc::new(LocalSandbox::stopped(dir.path())));

        let bytes = ws.read(&dir.path().join("a.txt")).await.unwrap().unwrap();
        assert_eq!(bytes, b"on disk");
        assert!(ws.read(&dir.path().join("missing")).await.unwrap().is_none());

        ws.write(&dir.path().join("sub/b.txt"), b"new").await.unwrap();
        assert_eq!(std::fs::read(dir.path().join("sub/b.txt")).unwrap(), b"new");
    }
}
