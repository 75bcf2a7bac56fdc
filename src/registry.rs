//! # Repository Registry
//!
//! The registry is the persisted list of external catalog sources. It lives in
//! a single YAML document (by default `~/.labsync/registry.yaml`):
//!
//! ```yaml
//! externalRepositories:
//!   - url: https://github.com/example/labs.git
//!     branch: main
//!     manifestPath: girus-labs.yaml
//!     description: Community labs
//! ```
//!
//! Every operation reads the whole document, modifies it in memory, and writes
//! the whole document back. Writes go to a temporary file in the same directory
//! which is then renamed over the registry, so a failed write leaves the
//! previous registry intact and is always reported to the caller.
//!
//! There is no locking between concurrent invocations; the registry file is a
//! single-writer resource per process.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::defaults::{DEFAULT_BRANCH, DEFAULT_MANIFEST_PATH};
use crate::error::{Error, Result};

/// One external catalog source. Identity is the `url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryDescriptor {
    /// Git URL of the repository
    pub url: String,
    /// Branch to fetch
    #[serde(default)]
    pub branch: String,
    /// Path of the catalog manifest inside the repository
    #[serde(default)]
    pub manifest_path: String,
    /// Free-form description
    #[serde(default)]
    pub description: String,
}

impl RepositoryDescriptor {
    /// Creates a descriptor with default branch and manifest path.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            branch: String::new(),
            manifest_path: String::new(),
            description: String::new(),
        }
        .normalized()
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = branch.into();
        self.normalized()
    }

    pub fn with_manifest_path(mut self, manifest_path: impl Into<String>) -> Self {
        self.manifest_path = manifest_path.into();
        self.normalized()
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Fills in the default branch and manifest path where they are missing.
    pub fn normalized(mut self) -> Self {
        self.url = self.url.trim().to_string();
        if self.branch.trim().is_empty() {
            self.branch = DEFAULT_BRANCH.to_string();
        }
        if self.manifest_path.trim().is_empty() {
            self.manifest_path = DEFAULT_MANIFEST_PATH.to_string();
        }
        self
    }

    /// Display name of the repository, derived from its url.
    pub fn display_name(&self) -> String {
        repo_name_from_url(&self.url)
    }
}

/// Returns the last path segment of a repository url, without `.git`.
pub fn repo_name_from_url(url: &str) -> String {
    url.trim_end_matches('/')
        .trim_end_matches(".git")
        .rsplit(['/', ':'])
        .next()
        .filter(|segment| !segment.is_empty())
        .unwrap_or("unknown-repo")
        .to_string()
}

/// Whether an upsert created or replaced a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Added,
    Updated,
}

/// On-disk shape of the registry file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistryDocument {
    #[serde(default)]
    external_repositories: Vec<RepositoryDescriptor>,
}

/// Handle on the registry file.
#[derive(Debug, Clone)]
pub struct Registry {
    path: PathBuf,
}

impl Registry {
    /// Opens the registry stored at `path`. The file need not exist yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Opens the registry at its default per-user location.
    pub fn at_default_location() -> Self {
        Self::new(crate::defaults::default_registry_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lists every descriptor in registry order.
    pub fn list(&self) -> Result<Vec<RepositoryDescriptor>> {
        Ok(self
            .load()?
            .external_repositories
            .into_iter()
            .map(RepositoryDescriptor::normalized)
            .collect())
    }

    /// Looks up a descriptor by url.
    pub fn find(&self, url: &str) -> Result<Option<RepositoryDescriptor>> {
        Ok(self.list()?.into_iter().find(|d| d.url == url.trim()))
    }

    /// Adds `descriptor`, or replaces the descriptor with the same url in place.
    pub fn upsert(&self, descriptor: RepositoryDescriptor) -> Result<UpsertOutcome> {
        let descriptor = descriptor.normalized();
        if descriptor.url.is_empty() {
            return Err(Error::InvalidUrl {
                url: descriptor.url,
                message: "url must not be empty".to_string(),
            });
        }

        let mut document = self.load()?;
        let outcome = match document
            .external_repositories
            .iter_mut()
            .find(|existing| existing.url == descriptor.url)
        {
            Some(existing) => {
                *existing = descriptor;
                UpsertOutcome::Updated
            }
            None => {
                document.external_repositories.push(descriptor);
                UpsertOutcome::Added
            }
        };

        self.save(&document)?;
        Ok(outcome)
    }

    /// Removes the descriptor for `url`. Returns `false` if none existed.
    pub fn remove(&self, url: &str) -> Result<bool> {
        let mut document = self.load()?;
        let before = document.external_repositories.len();
        document
            .external_repositories
            .retain(|existing| existing.url != url.trim());

        if document.external_repositories.len() == before {
            debug!("registry has no entry for {}, nothing to remove", url);
            return Ok(false);
        }

        self.save(&document)?;
        Ok(true)
    }

    /// Removes every descriptor. Returns how many were removed.
    pub fn clear(&self) -> Result<usize> {
        let removed = self.load()?.external_repositories.len();
        self.save(&RegistryDocument::default())?;
        Ok(removed)
    }

    fn load(&self) -> Result<RegistryDocument> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(RegistryDocument::default());
            }
            Err(e) => return Err(self.unavailable(e)),
        };

        if content.trim().is_empty() {
            return Ok(RegistryDocument::default());
        }

        serde_yaml::from_str(&content).map_err(|e| Error::RegistryParse {
            path: self.path.clone(),
            message: e.to_string(),
        })
    }

    fn save(&self, document: &RegistryDocument) -> Result<()> {
        let content = serde_yaml::to_string(document).map_err(|e| Error::RegistryUnavailable {
            path: self.path.clone(),
            message: e.to_string(),
        })?;

        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|e| self.unavailable(e))?;

        let mut staged = NamedTempFile::new_in(&parent).map_err(|e| self.unavailable(e))?;
        staged
            .write_all(content.as_bytes())
            .and_then(|_| staged.as_file().sync_all())
            .map_err(|e| self.unavailable(e))?;
        staged
            .persist(&self.path)
            .map_err(|e| self.unavailable(e.error))?;

        debug!(
            "wrote {} repositories to {}",
            document.external_repositories.len(),
            self.path.display()
        );
        Ok(())
    }

    fn unavailable(&self, e: std::io::Error) -> Error {
        Error::RegistryUnavailable {
            path: self.path.clone(),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry_in(dir: &TempDir) -> Registry {
        Registry::new(dir.path().join("state").join("registry.yaml"))
    }

    #[test]
    fn test_list_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let registry = registry_in(&dir);
        assert!(registry.list().unwrap().is_empty());
    }

    #[test]
    fn test_upsert_applies_defaults() {
        let dir = TempDir::new().unwrap();
        let registry = registry_in(&dir);

        let outcome = registry
            .upsert(RepositoryDescriptor {
                url: "https://example.test/labs.git".to_string(),
                branch: String::new(),
                manifest_path: String::new(),
                description: String::new(),
            })
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Added);

        let repos = registry.list().unwrap();
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].branch, "main");
        assert_eq!(repos[0].manifest_path, "girus-labs.yaml");
    }

    #[test]
    fn test_upsert_existing_url_updates_in_place() {
        let dir = TempDir::new().unwrap();
        let registry = registry_in(&dir);

        registry
            .upsert(RepositoryDescriptor::new("https://example.test/a.git"))
            .unwrap();
        registry
            .upsert(RepositoryDescriptor::new("https://example.test/b.git"))
            .unwrap();

        let outcome = registry
            .upsert(
                RepositoryDescriptor::new("https://example.test/a.git")
                    .with_branch("dev")
                    .with_manifest_path("catalog.yaml")
                    .with_description("updated"),
            )
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);

        let repos = registry.list().unwrap();
        assert_eq!(repos.len(), 2);
        assert_eq!(repos[0].url, "https://example.test/a.git");
        assert_eq!(repos[0].branch, "dev");
        assert_eq!(repos[0].manifest_path, "catalog.yaml");
        assert_eq!(repos[0].description, "updated");
        assert_eq!(repos[1].url, "https://example.test/b.git");
    }

    #[test]
    fn test_upsert_rejects_empty_url() {
        let dir = TempDir::new().unwrap();
        let registry = registry_in(&dir);
        let result = registry.upsert(RepositoryDescriptor::new("  "));
        assert!(matches!(result, Err(Error::InvalidUrl { .. })));
        assert!(!registry.path().exists());
    }

    #[test]
    fn test_remove_unknown_url_is_noop() {
        let dir = TempDir::new().unwrap();
        let registry = registry_in(&dir);
        registry
            .upsert(RepositoryDescriptor::new("https://example.test/a.git"))
            .unwrap();

        assert!(!registry.remove("https://example.test/missing.git").unwrap());
        assert_eq!(registry.list().unwrap().len(), 1);
    }

    #[test]
    fn test_remove_existing_url() {
        let dir = TempDir::new().unwrap();
        let registry = registry_in(&dir);
        registry
            .upsert(RepositoryDescriptor::new("https://example.test/a.git"))
            .unwrap();
        registry
            .upsert(RepositoryDescriptor::new("https://example.test/b.git"))
            .unwrap();

        assert!(registry.remove("https://example.test/a.git").unwrap());
        let repos = registry.list().unwrap();
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].url, "https://example.test/b.git");
    }

    #[test]
    fn test_clear_removes_everything() {
        let dir = TempDir::new().unwrap();
        let registry = registry_in(&dir);
        registry
            .upsert(RepositoryDescriptor::new("https://example.test/a.git"))
            .unwrap();
        registry
            .upsert(RepositoryDescriptor::new("https://example.test/b.git"))
            .unwrap();

        assert_eq!(registry.clear().unwrap(), 2);
        assert!(registry.list().unwrap().is_empty());
    }

    #[test]
    fn test_persists_across_handles() {
        let dir = TempDir::new().unwrap();
        registry_in(&dir)
            .upsert(RepositoryDescriptor::new("https://example.test/a.git").with_branch("v2"))
            .unwrap();

        let reopened = registry_in(&dir);
        let found = reopened.find("https://example.test/a.git").unwrap().unwrap();
        assert_eq!(found.branch, "v2");
    }

    #[test]
    fn test_reads_camel_case_document() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.yaml");
        fs::write(
            &path,
            r#"externalRepositories:
  - url: https://example.test/labs.git
    manifestPath: catalog.yaml
"#,
        )
        .unwrap();

        let repos = Registry::new(&path).list().unwrap();
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].manifest_path, "catalog.yaml");
        assert_eq!(repos[0].branch, "main");
    }

    #[test]
    fn test_malformed_registry_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.yaml");
        fs::write(&path, "externalRepositories: [unclosed").unwrap();

        let result = Registry::new(&path).list();
        assert!(matches!(result, Err(Error::RegistryParse { .. })));
    }

    #[test]
    fn test_write_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "file").unwrap();

        let registry = Registry::new(blocker.join("registry.yaml"));
        let result = registry.upsert(RepositoryDescriptor::new("https://example.test/a.git"));
        assert!(matches!(result, Err(Error::RegistryUnavailable { .. })));
    }

    #[test]
    fn test_repo_name_from_url() {
        assert_eq!(repo_name_from_url("https://example.test/org/labs.git"), "labs");
        assert_eq!(repo_name_from_url("https://example.test/org/labs/"), "labs");
        assert_eq!(repo_name_from_url("git@github.com:org/labs.git"), "labs");
        assert_eq!(repo_name_from_url("labs"), "labs");
        assert_eq!(repo_name_from_url(""), "unknown-repo");
    }
}
