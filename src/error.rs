//! # Error Handling
//!
//! This module defines the centralized error type for `labsync`. It uses the
//! `thiserror` library to describe every failure mode of a synchronization run
//! with enough context to name the unit (source, entry, path) that failed.
//!
//! ## Key Components
//!
//! - **`Error`**: The main enum covering registry, fetch, catalog, control
//!   plane, and access failures.
//! - **`ValidationError`**: The distinguishable causes for which a catalog
//!   manifest is rejected.
//! - **`Result<T>`**: A type alias for `std::result::Result<T, Error>`.
//!
//! ## Severity
//!
//! Most variants describe a failure scoped to one source or one entry and are
//! converted into report data by the pipeline and the synchronizer. Only the
//! variants for which [`Error::is_fatal`] returns `true` abort a run.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Reasons a parsed catalog manifest is rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The manifest has no `name`.
    #[error("catalog manifest has no name")]
    MissingName,

    /// The manifest lists no labs.
    #[error("catalog manifest does not define any labs")]
    NoEntries,

    /// The entry at `index` (1-based) has no name.
    #[error("lab #{index} has no name")]
    EntryMissingName { index: usize },

    /// The named entry has no artifact path.
    #[error("lab '{name}' has no path to its file")]
    EntryMissingPath { name: String },
}

/// Main error type for labsync operations
#[derive(Error, Debug)]
pub enum Error {
    /// The registry file could not be read or written.
    #[error("Registry unavailable at {}: {message}", path.display())]
    RegistryUnavailable { path: PathBuf, message: String },

    /// The registry file exists but is not a valid registry document.
    #[error("Registry file {} is malformed: {message}", path.display())]
    RegistryParse { path: PathBuf, message: String },

    /// A repository url was rejected before it reached the registry.
    #[error("Invalid repository url '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    /// The remote source could not be reached, or access was denied.
    #[error("Could not fetch {url}@{branch}: {message}{}", hint.as_ref().map(|h| format!("\n  hint: {}", h)).unwrap_or_default())]
    SourceUnreachable {
        url: String,
        branch: String,
        message: String,
        /// Optional hint for how to resolve the fetch issue
        hint: Option<String>,
    },

    /// The remote source exists but has no such branch.
    #[error("Branch '{branch}' not found in {url}")]
    BranchNotFound { url: String, branch: String },

    /// The local workspace could not be created.
    #[error("Could not create workspace: {message}")]
    WorkspaceCreate { message: String },

    /// A relative path tried to leave the workspace root.
    #[error("Path '{path}' escapes the workspace root")]
    WorkspaceEscape { path: String },

    /// The workspace was already destroyed.
    #[error("Workspace has already been destroyed")]
    WorkspaceDestroyed,

    /// A file referenced from the workspace does not exist.
    #[error("artifact not found: {path}")]
    ArtifactNotFound { path: String },

    /// The catalog manifest is not well-formed YAML of the expected shape.
    #[error("Catalog manifest parsing error: {message}")]
    ManifestParse { message: String },

    /// The catalog manifest parsed but failed validation.
    #[error("Invalid catalog manifest: {0}")]
    ManifestInvalid(#[from] ValidationError),

    /// A local lab file is not a lab definition.
    #[error("Invalid lab file {}: {message}", path.display())]
    InvalidLabFile { path: PathBuf, message: String },

    /// A lab was requested by name but the catalog does not list it.
    #[error("Lab '{name}' not found in repository {url}")]
    LabNotFound { name: String, url: String },

    /// The control plane cannot be reached at all.
    #[error("Control plane unreachable: {message}")]
    ControlPlaneUnavailable { message: String },

    /// A single control-plane request failed.
    #[error("Control plane {operation} failed: {message}")]
    ControlPlane { operation: String, message: String },

    /// The lab backend is not running.
    #[error("Lab backend is not ready: {message}")]
    BackendNotReady { message: String },

    /// An external command did not finish within its time budget.
    #[error("Command '{command}' timed out after {}s", timeout.as_secs())]
    CommandTimeout { command: String, timeout: Duration },

    /// An external command could not be started.
    #[error("Could not run '{command}': {message}")]
    CommandSpawn { command: String, message: String },

    /// An HTTP connectivity probe failed before a status code was received.
    #[error("Probe of {url} failed: {message}")]
    Probe { url: String, message: String },

    /// Local network forwarding could not be started.
    #[error("Port forwarding for {target} failed: {message}")]
    Forward { target: String, message: String },

    /// An I/O error, wrapped from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A JSON parsing error, wrapped from `serde_json::Error`.
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// A regular expression error, wrapped from `regex::Error`.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl Error {
    /// Returns `true` for errors that must abort a whole synchronization run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::RegistryUnavailable { .. }
                | Error::RegistryParse { .. }
                | Error::ControlPlaneUnavailable { .. }
        )
    }
}

/// A convenient type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
