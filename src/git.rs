use std::path::Path;
use std::process::Command;
use std::time::Duration;

use log::debug;
use regex::Regex;
use url::Url;

use crate::error::{Error, Result};
use crate::process;

const AUTH_HINT: &str = "Make sure you have access to the repository. For private repos, \
ensure an SSH key is loaded in ssh-agent, git credentials are configured, or a personal \
access token is set up";

/// Clone a single branch of a repository using a shallow clone
///
/// This uses the system git command, which automatically handles:
/// - SSH keys from ~/.ssh/
/// - Git credential helpers
/// - Personal access tokens
/// - Any authentication configured in ~/.gitconfig
///
/// `target_dir` may exist but must be empty.
pub fn clone_branch(url: &str, branch: &str, target_dir: &Path, timeout: Duration) -> Result<()> {
    let mut command = Command::new("git");
    command
        .args(["clone", "--quiet", "--depth=1", "--single-branch", "--branch", branch])
        .arg(url)
        .arg(target_dir)
        .env("GIT_TERMINAL_PROMPT", "0");

    let output = match process::run(command, timeout) {
        Ok(output) => output,
        Err(Error::CommandTimeout { timeout, .. }) => {
            return Err(Error::SourceUnreachable {
                url: url.to_string(),
                branch: branch.to_string(),
                message: format!("clone did not finish within {}s", timeout.as_secs()),
                hint: None,
            });
        }
        Err(e) => return Err(e),
    };

    if output.success {
        debug!("cloned {}@{} into {}", url, branch, target_dir.display());
        return Ok(());
    }

    Err(classify_clone_failure(url, branch, output.diagnostic()))
}

/// Maps git's stderr onto the distinct fetch failure modes.
pub fn classify_clone_failure(url: &str, branch: &str, stderr: &str) -> Error {
    let lowered = stderr.to_lowercase();
    if (lowered.contains("remote branch") && lowered.contains("not found"))
        || lowered.contains("couldn't find remote ref")
    {
        return Error::BranchNotFound {
            url: url.to_string(),
            branch: branch.to_string(),
        };
    }

    if stderr.contains("No space left on device")
        || stderr.contains("could not create work tree dir")
        || stderr.contains("could not create leading directories")
    {
        return Error::WorkspaceCreate {
            message: stderr.to_string(),
        };
    }

    let auth_failure = stderr.contains("Authentication failed")
        || stderr.contains("Permission denied")
        || stderr.contains("Could not read from remote repository")
        || stderr.contains("terminal prompts disabled");

    Error::SourceUnreachable {
        url: url.to_string(),
        branch: branch.to_string(),
        message: stderr.to_string(),
        hint: auth_failure.then(|| AUTH_HINT.to_string()),
    }
}

/// Checks a user supplied repository location and expands GitHub shorthand.
///
/// Accepts `scheme://` urls (`https`, `http`, `ssh`, `git`, `file`),
/// scp-like `user@host:path` locations, local paths, and `org/repo`
/// shorthand which expands to `https://github.com/org/repo`.
pub fn normalize_url(input: &str) -> Result<String> {
    let trimmed = input.trim();
    let invalid = |message: &str| Error::InvalidUrl {
        url: trimmed.to_string(),
        message: message.to_string(),
    };

    if trimmed.is_empty() {
        return Err(invalid("url must not be empty"));
    }

    if trimmed.contains("://") {
        let parsed = Url::parse(trimmed).map_err(|e| invalid(&e.to_string()))?;
        return match parsed.scheme() {
            "https" | "http" | "ssh" | "git" | "file" => Ok(trimmed.to_string()),
            other => Err(invalid(&format!("unsupported scheme '{}'", other))),
        };
    }

    let scp_like = Regex::new(r"^[\w.-]+@[\w.-]+:\S+$").map_err(Error::Regex)?;
    if scp_like.is_match(trimmed) {
        return Ok(trimmed.to_string());
    }

    if trimmed.starts_with('/') || trimmed.starts_with("./") || trimmed.starts_with("../") {
        return Ok(trimmed.to_string());
    }

    let shorthand = Regex::new(r"^[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+$").map_err(Error::Regex)?;
    if shorthand.is_match(trimmed) {
        return Ok(format!("https://github.com/{}", trimmed));
    }

    Err(invalid("expected a git url, a local path, or org/repo"))
}
