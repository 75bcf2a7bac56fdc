//! # Workspace
//!
//! A [`Workspace`] is the ephemeral local copy of one source at one branch.
//! It owns its root directory: dropping the workspace, or calling
//! [`Workspace::destroy`], removes the directory recursively. All reads are
//! scoped to the root and reject paths that would leave it.

use std::fs;
use std::path::{Component, Path, PathBuf};

use log::{debug, warn};
use tempfile::{Builder, TempDir};

use crate::error::{Error, Result};

/// Prefix of every workspace directory name.
pub const WORKSPACE_PREFIX: &str = "labsync-ws-";

/// An exclusively owned, ephemeral checkout of a source.
#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    root: PathBuf,
}

impl Workspace {
    /// Creates a fresh, empty workspace directory under `parent`.
    pub fn create_in(parent: &Path) -> Result<Self> {
        fs::create_dir_all(parent).map_err(|e| Error::WorkspaceCreate {
            message: format!("{}: {}", parent.display(), e),
        })?;

        let dir = Builder::new()
            .prefix(WORKSPACE_PREFIX)
            .tempdir_in(parent)
            .map_err(|e| Error::WorkspaceCreate {
                message: format!("{}: {}", parent.display(), e),
            })?;
        let root = dir.path().to_path_buf();
        debug!("created workspace {}", root.display());

        Ok(Self {
            dir: Some(dir),
            root,
        })
    }

    /// Root directory of the workspace.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns `true` until the workspace has been destroyed.
    pub fn is_live(&self) -> bool {
        self.dir.is_some()
    }

    /// Resolves `relative` to an absolute path inside the workspace.
    ///
    /// Fails with [`Error::WorkspaceEscape`] for absolute paths, for paths
    /// whose `..` components climb above the root, and for paths that leave
    /// the root through a symlink.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        if !self.is_live() {
            return Err(Error::WorkspaceDestroyed);
        }

        let lexical = scoped_join(&self.root, relative).ok_or_else(|| Error::WorkspaceEscape {
            path: relative.to_string(),
        })?;

        if lexical.exists() {
            let canonical_root = self.root.canonicalize()?;
            let canonical = lexical.canonicalize()?;
            if !canonical.starts_with(&canonical_root) {
                return Err(Error::WorkspaceEscape {
                    path: relative.to_string(),
                });
            }
        }

        Ok(lexical)
    }

    /// Reads a file relative to the workspace root.
    pub fn read_file(&self, relative: &str) -> Result<Vec<u8>> {
        let path = self.resolve(relative)?;
        if !path.is_file() {
            return Err(Error::ArtifactNotFound {
                path: relative.to_string(),
            });
        }
        Ok(fs::read(path)?)
    }

    /// Returns whether a regular file exists at `relative`.
    ///
    /// Paths that escape the root, and any path once the workspace has been
    /// destroyed, report `false`.
    pub fn exists(&self, relative: &str) -> bool {
        self.resolve(relative)
            .map(|path| path.is_file())
            .unwrap_or(false)
    }

    /// Removes the workspace directory. Safe to call more than once.
    pub fn destroy(&mut self) {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            match dir.close() {
                Ok(()) => debug!("removed workspace {}", path.display()),
                Err(e) => warn!("could not remove workspace {}: {}", path.display(), e),
            }
        }
    }
}

/// Joins `relative` onto `root` without leaving it, normalizing `.` and `..`.
///
/// Returns `None` when the path is absolute or climbs above `root`.
pub fn scoped_join(root: &Path, relative: &str) -> Option<PathBuf> {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    let mut joined = root.to_path_buf();
    joined.extend(parts);
    Some(joined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn workspace_with(files: &[(&str, &str)]) -> (TempDir, Workspace) {
        let parent = TempDir::new().unwrap();
        let ws = Workspace::create_in(parent.path()).unwrap();
        for (path, content) in files {
            let full = ws.root().join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(full, content).unwrap();
        }
        (parent, ws)
    }

    #[test]
    fn test_read_and_exists() {
        let (_parent, ws) = workspace_with(&[("path/a.yaml", "kind: ConfigMap")]);
        assert!(ws.exists("path/a.yaml"));
        assert!(ws.exists("./path/../path/a.yaml"));
        assert!(!ws.exists("path/b.yaml"));
        assert!(!ws.exists("path"));
        assert_eq!(ws.read_file("path/a.yaml").unwrap(), b"kind: ConfigMap");
    }

    #[test]
    fn test_missing_file_is_artifact_not_found() {
        let (_parent, ws) = workspace_with(&[]);
        let result = ws.read_file("path/b.yaml");
        assert!(matches!(result, Err(Error::ArtifactNotFound { ref path }) if path == "path/b.yaml"));
    }

    #[test]
    fn test_rejects_escape() {
        let (parent, ws) = workspace_with(&[]);
        fs::write(parent.path().join("secret.txt"), "outside").unwrap();

        assert!(matches!(
            ws.read_file("../secret.txt"),
            Err(Error::WorkspaceEscape { .. })
        ));
        assert!(matches!(
            ws.read_file("/etc/passwd"),
            Err(Error::WorkspaceEscape { .. })
        ));
        assert!(!ws.exists("../secret.txt"));
    }

    #[cfg(unix)]
    #[test]
    fn test_rejects_symlink_escape() {
        let (parent, ws) = workspace_with(&[]);
        let outside = parent.path().join("outside.yaml");
        fs::write(&outside, "outside").unwrap();
        std::os::unix::fs::symlink(&outside, ws.root().join("link.yaml")).unwrap();

        assert!(matches!(
            ws.read_file("link.yaml"),
            Err(Error::WorkspaceEscape { .. })
        ));
    }

    #[test]
    fn test_destroy_is_idempotent() {
        let (_parent, mut ws) = workspace_with(&[("a.yaml", "x")]);
        let root = ws.root().to_path_buf();

        ws.destroy();
        assert!(!root.exists());
        assert!(!ws.is_live());

        ws.destroy();
        assert!(!root.exists());
        assert!(matches!(ws.read_file("a.yaml"), Err(Error::WorkspaceDestroyed)));
        assert!(!ws.exists("a.yaml"));
    }

    #[test]
    fn test_drop_removes_directory() {
        let (_parent, ws) = workspace_with(&[("a.yaml", "x")]);
        let root = ws.root().to_path_buf();
        drop(ws);
        assert!(!root.exists());
    }

    #[test]
    fn test_scoped_join() {
        let root = Path::new("/ws");
        assert_eq!(scoped_join(root, "a/b"), Some(PathBuf::from("/ws/a/b")));
        assert_eq!(scoped_join(root, "a/../b"), Some(PathBuf::from("/ws/b")));
        assert_eq!(scoped_join(root, "../b"), None);
        assert_eq!(scoped_join(root, "/b"), None);
    }
}
