//! # Source Fetcher
//!
//! This module provides the `SourceFetcher`, which retrieves a snapshot of a
//! remote catalog source into a fresh [`Workspace`].
//!
//! ## Design
//!
//! The fetcher is built around the `GitOperations` trait, which separates the
//! fetch logic from the concrete version-control client. In the application
//! `DefaultGitOperations` wraps the system `git` command; in tests it is
//! replaced with a mock that writes files straight into the target directory.
//!
//! A fetch either returns a live workspace or an error. When the clone fails
//! the half-populated workspace is removed before the error is returned, so
//! no partial workspace is ever left behind.

use std::path::{Path, PathBuf};
use std::time::Duration;

use log::{debug, info};
use walkdir::WalkDir;

use crate::error::Result;
use crate::workspace::Workspace;

/// Trait for git operations - allows mocking in tests
pub trait GitOperations: Send + Sync {
    /// Clones only `branch` of `url` into the existing, empty `target_dir`.
    fn clone_branch(&self, url: &str, branch: &str, target_dir: &Path, timeout: Duration)
        -> Result<()>;
}

/// The default implementation of `GitOperations`, which uses the system's
/// `git` command.
pub struct DefaultGitOperations;

impl GitOperations for DefaultGitOperations {
    fn clone_branch(
        &self,
        url: &str,
        branch: &str,
        target_dir: &Path,
        timeout: Duration,
    ) -> Result<()> {
        crate::git::clone_branch(url, branch, target_dir, timeout)
    }
}

/// Retrieves sources into ephemeral workspaces.
pub struct SourceFetcher {
    git_ops: Box<dyn GitOperations>,
    workspace_root: PathBuf,
    timeout: Duration,
}

impl SourceFetcher {
    /// Creates a fetcher using the system `git`, creating workspaces under
    /// `workspace_root`.
    pub fn new(workspace_root: PathBuf, timeout: Duration) -> Self {
        Self::with_operations(Box::new(DefaultGitOperations), workspace_root, timeout)
    }

    /// Creates a fetcher with a custom `GitOperations` implementation.
    pub fn with_operations(
        git_ops: Box<dyn GitOperations>,
        workspace_root: PathBuf,
        timeout: Duration,
    ) -> Self {
        Self {
            git_ops,
            workspace_root,
            timeout,
        }
    }

    /// Fetches `branch` of `url` into a new workspace.
    pub fn fetch(&self, url: &str, branch: &str) -> Result<Workspace> {
        let mut workspace = Workspace::create_in(&self.workspace_root)?;
        info!("fetching {}@{}", url, branch);

        if let Err(e) = self
            .git_ops
            .clone_branch(url, branch, workspace.root(), self.timeout)
        {
            workspace.destroy();
            return Err(e);
        }

        let files = WalkDir::new(workspace.root())
            .into_iter()
            .filter_entry(|entry| entry.file_name() != ".git")
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .count();
        debug!(
            "fetched {} files from {}@{} into {}",
            files,
            url,
            branch,
            workspace.root().display()
        );

        Ok(workspace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::fs;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    /// Mock git operations for testing
    struct MockGitOperations {
        clone_calls: Arc<Mutex<Vec<(String, String, PathBuf)>>>,
        files: Vec<(String, String)>,
        failure: Option<fn(&str, &str) -> Error>,
    }

    impl MockGitOperations {
        fn with_files(files: &[(&str, &str)]) -> Self {
            Self {
                clone_calls: Arc::new(Mutex::new(Vec::new())),
                files: files
                    .iter()
                    .map(|(p, c)| (p.to_string(), c.to_string()))
                    .collect(),
                failure: None,
            }
        }

        fn failing(failure: fn(&str, &str) -> Error) -> Self {
            Self {
                failure: Some(failure),
                // Partial content is written before the failure is reported.
                ..Self::with_files(&[("partial.yaml", "x")])
            }
        }
    }

    impl GitOperations for MockGitOperations {
        fn clone_branch(
            &self,
            url: &str,
            branch: &str,
            target_dir: &Path,
            _timeout: Duration,
        ) -> Result<()> {
            self.clone_calls.lock().unwrap().push((
                url.to_string(),
                branch.to_string(),
                target_dir.to_path_buf(),
            ));
            for (path, content) in &self.files {
                let full = target_dir.join(path);
                fs::create_dir_all(full.parent().unwrap())?;
                fs::write(full, content)?;
            }
            match self.failure {
                Some(make) => Err(make(url, branch)),
                None => Ok(()),
            }
        }
    }

    fn leftover_workspaces(root: &Path) -> usize {
        fs::read_dir(root).map(|entries| entries.count()).unwrap_or(0)
    }

    #[test]
    fn test_fetch_populates_workspace() {
        let root = TempDir::new().unwrap();
        let git = MockGitOperations::with_files(&[("catalog.yaml", "name: x")]);
        let calls = git.clone_calls.clone();
        let fetcher = SourceFetcher::with_operations(
            Box::new(git),
            root.path().to_path_buf(),
            Duration::from_secs(1),
        );

        let mut ws = fetcher.fetch("https://example.test/labs.git", "main").unwrap();
        assert!(ws.exists("catalog.yaml"));

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "https://example.test/labs.git");
        assert_eq!(calls[0].1, "main");
        assert_eq!(calls[0].2, ws.root());

        ws.destroy();
        assert_eq!(leftover_workspaces(root.path()), 0);
    }

    #[test]
    fn test_failed_fetch_leaves_no_workspace() {
        let root = TempDir::new().unwrap();
        let fetcher = SourceFetcher::with_operations(
            Box::new(MockGitOperations::failing(|url, branch| Error::BranchNotFound {
                url: url.to_string(),
                branch: branch.to_string(),
            })),
            root.path().to_path_buf(),
            Duration::from_secs(1),
        );

        let result = fetcher.fetch("https://example.test/labs.git", "nope");
        assert!(matches!(result, Err(Error::BranchNotFound { .. })));
        assert_eq!(leftover_workspaces(root.path()), 0);
    }

    #[test]
    fn test_unreachable_source_is_distinct() {
        let root = TempDir::new().unwrap();
        let fetcher = SourceFetcher::with_operations(
            Box::new(MockGitOperations::failing(|url, branch| {
                Error::SourceUnreachable {
                    url: url.to_string(),
                    branch: branch.to_string(),
                    message: "Could not resolve host".to_string(),
                    hint: None,
                }
            })),
            root.path().to_path_buf(),
            Duration::from_secs(1),
        );

        let result = fetcher.fetch("https://example.test/labs.git", "main");
        assert!(matches!(result, Err(Error::SourceUnreachable { .. })));
        assert_eq!(leftover_workspaces(root.path()), 0);
    }

    #[test]
    fn test_workspace_create_failure() {
        let root = TempDir::new().unwrap();
        let blocker = root.path().join("file");
        fs::write(&blocker, "not a directory").unwrap();

        let fetcher = SourceFetcher::with_operations(
            Box::new(MockGitOperations::with_files(&[])),
            blocker,
            Duration::from_secs(1),
        );
        let result = fetcher.fetch("https://example.test/labs.git", "main");
        assert!(matches!(result, Err(Error::WorkspaceCreate { .. })));
    }
}
