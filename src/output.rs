//! # Output Configuration
//!
//! This module provides utilities for controlling CLI output appearance,
//! including color and emoji support based on terminal capabilities and
//! user preferences, and renders run reports as human-readable text.
//!
//! ## Respecting User Preferences
//!
//! The module respects the following environment variables and flags:
//! - `--color=never|always|auto` - CLI flag for color control
//! - `NO_COLOR` - Disables colors when set (per https://no-color.org/)
//! - `CLICOLOR=0` - Disables colors
//! - `CLICOLOR_FORCE=1` - Forces colors even in non-TTY
//! - `TERM=dumb` - Disables colors for dumb terminals
//!
//! ## Usage
//!
//! ```rust,ignore
//! use labsync::output::{OutputConfig, emoji};
//!
//! let config = OutputConfig::from_env_and_flag("auto");
//! println!("{} Synchronizing...", emoji(&config, "🔄", "[SYNC]"));
//! ```

use std::env;
use std::fmt::Write;

use console::{style, Color};

use crate::access::{PathOutcome, ReconcileReport};
use crate::config::RunConfig;
use crate::registry::RepositoryDescriptor;
use crate::reload::ReloadOutcome;
use crate::sync::{LabFileReport, SourceStatus, SyncReport};

/// Output configuration for controlling colors and emojis.
#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Whether colors and emojis should be used in output.
    pub use_color: bool,
}

impl OutputConfig {
    /// Create an output configuration from environment and CLI flag.
    ///
    /// # Arguments
    /// * `color_flag` - The value of the --color CLI flag: "always", "never", or "auto"
    ///
    /// In auto mode, colors are disabled if:
    /// - `NO_COLOR` environment variable is set (any value, including empty)
    /// - `CLICOLOR=0` is set
    /// - `TERM=dumb` is set
    /// - stdout is not a TTY (unless `CLICOLOR_FORCE=1`)
    pub fn from_env_and_flag(color_flag: &str) -> Self {
        let use_color = match color_flag.to_lowercase().as_str() {
            "always" => true,
            "never" => false,
            _ => Self::detect_color_support(),
        };

        Self { use_color }
    }

    /// Detect whether color output is supported based on environment.
    fn detect_color_support() -> bool {
        // The presence of NO_COLOR (even if empty) disables colors
        if env::var_os("NO_COLOR").is_some() {
            return false;
        }

        if env::var("CLICOLOR").is_ok_and(|v| v == "0") {
            return false;
        }

        if env::var("CLICOLOR_FORCE").is_ok_and(|v| v != "0" && !v.is_empty()) {
            return true;
        }

        if env::var("TERM").is_ok_and(|v| v == "dumb") {
            return false;
        }

        console::Term::stdout().features().colors_supported()
    }

    /// Create a configuration with colors always enabled.
    pub fn with_color() -> Self {
        Self { use_color: true }
    }

    /// Create a configuration with colors always disabled.
    pub fn without_color() -> Self {
        Self { use_color: false }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self::from_env_and_flag("auto")
    }
}

/// Returns the emoji when colors are enabled, the plain text otherwise.
pub fn emoji<'a>(config: &OutputConfig, emoji_str: &'a str, plain: &'a str) -> &'a str {
    if config.use_color {
        emoji_str
    } else {
        plain
    }
}

fn paint(config: &OutputConfig, text: &str, color: Color) -> String {
    if config.use_color {
        style(text).fg(color).force_styling(true).to_string()
    } else {
        text.to_string()
    }
}

/// One line describing a registered repository.
pub fn render_descriptor(descriptor: &RepositoryDescriptor) -> String {
    let mut line = format!(
        "{} (branch: {}, manifest: {})",
        descriptor.url, descriptor.branch, descriptor.manifest_path
    );
    if !descriptor.description.is_empty() {
        let _ = write!(line, " - {}", descriptor.description);
    }
    line
}

/// Renders the whole outcome of a synchronization run.
///
/// With [`RunConfig::verbose`], applied entries and healthy access paths are
/// listed too.
pub fn render_sync_report(config: &OutputConfig, report: &SyncReport, run: &RunConfig) -> String {
    let verbose = run.verbose;
    let mut out = String::new();

    if report.sources.is_empty() {
        let _ = writeln!(
            out,
            "{} No repositories registered. Add one with `labsync repo add <URL>`.",
            emoji(config, "ℹ️ ", "[INFO]")
        );
    }

    for source in &report.sources {
        let header = format!(
            "{} ({}@{})",
            source.repo_name(),
            source.descriptor.url,
            source.descriptor.branch
        );
        match &source.status {
            SourceStatus::Processed(batch) => {
                let _ = writeln!(out, "{} {}", emoji(config, "📦", "[REPO]"), header);
                if verbose {
                    for name in &batch.applied_names {
                        let _ = writeln!(
                            out,
                            "   {} {}",
                            emoji(config, "✅", "[OK]"),
                            paint(config, name, Color::Green)
                        );
                    }
                } else if !batch.applied_names.is_empty() {
                    let _ = writeln!(
                        out,
                        "   {} {} lab(s) applied",
                        emoji(config, "✅", "[OK]"),
                        batch.applied_names.len()
                    );
                }
                for failure in &batch.failures {
                    let _ = writeln!(
                        out,
                        "   {} {}: {}",
                        emoji(config, "❌", "[FAIL]"),
                        paint(config, &failure.entry.name, Color::Red),
                        failure.cause
                    );
                }
            }
            SourceStatus::Failed(cause) => {
                let _ = writeln!(
                    out,
                    "{} {}: {}",
                    emoji(config, "❌", "[FAIL]"),
                    header,
                    paint(config, cause, Color::Red)
                );
            }
            SourceStatus::Skipped(cause) => {
                let _ = writeln!(
                    out,
                    "{} {}: {}",
                    emoji(config, "⏭️ ", "[SKIP]"),
                    header,
                    cause
                );
            }
        }
    }

    out.push_str(&render_reload(config, &report.reload));
    if let Some(access) = &report.access {
        out.push_str(&render_access(config, access, verbose));
    }

    let summary = format!(
        "{} applied / {} failed",
        report.total_applied(),
        report.total_failed()
    );
    let color = if report.is_success() {
        Color::Green
    } else {
        Color::Red
    };
    let _ = writeln!(out, "\n{}", paint(config, &summary, color));
    out
}

/// Renders the reload outcome, including the manual step for soft failures.
pub fn render_reload(config: &OutputConfig, reload: &ReloadOutcome) -> String {
    match reload {
        ReloadOutcome::Skipped => String::new(),
        ReloadOutcome::Confirmed { elapsed } => format!(
            "{} Backend reloaded in {}s\n",
            emoji(config, "🔄", "[RELOAD]"),
            elapsed.as_secs()
        ),
        ReloadOutcome::Unconfirmed { reason, manual }
        | ReloadOutcome::RequestFailed { reason, manual } => format!(
            "{} Labs were applied but the backend reload is unconfirmed: {}\n   Run manually: {}\n",
            emoji(config, "⚠️ ", "[WARN]"),
            paint(config, reason, Color::Yellow),
            manual
        ),
    }
}

/// Renders the access reconciliation outcome.
pub fn render_access(config: &OutputConfig, report: &ReconcileReport, verbose: bool) -> String {
    let mut out = String::new();
    for path in &report.paths {
        match &path.outcome {
            PathOutcome::AlreadyHealthy if verbose => {
                let _ = writeln!(
                    out,
                    "{} {} access is healthy",
                    emoji(config, "🔌", "[ACCESS]"),
                    path.target
                );
            }
            PathOutcome::AlreadyHealthy => {}
            PathOutcome::Restored { strategy } => {
                let _ = writeln!(
                    out,
                    "{} {} access restored ({})",
                    emoji(config, "🔌", "[ACCESS]"),
                    path.target,
                    strategy
                );
            }
            PathOutcome::Failed { reason, manual } => {
                let _ = writeln!(
                    out,
                    "{} {} access could not be restored: {}",
                    emoji(config, "⚠️ ", "[WARN]"),
                    path.target,
                    paint(config, reason, Color::Yellow)
                );
                for command in manual {
                    let _ = writeln!(out, "   Run manually: {}", command);
                }
            }
        }
    }
    out
}

/// Renders the outcome of applying a single lab file.
pub fn render_lab_file_report(config: &OutputConfig, report: &LabFileReport) -> String {
    let mut out = format!(
        "{} Lab '{}' ({}) applied: {}\n",
        emoji(config, "✅", "[OK]"),
        report.definition.title,
        report.definition.id,
        report.applied
    );
    out.push_str(&render_reload(config, &report.reload));
    if let Some(access) = &report.access {
        out.push_str(&render_access(config, access, false));
    }
    out
}
