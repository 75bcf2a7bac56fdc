//! Optional progress indication for long waits.
//!
//! Progress is purely cosmetic. Waiting code reports into a
//! [`ProgressNotifier`] and never depends on what the notifier does with it.
//! [`Spinner`] renders an animated spinner on stderr, ticking on its own
//! background thread while the caller blocks. [`NoProgress`] discards every
//! update.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// Receiver of progress updates from a blocking operation.
pub trait ProgressNotifier: Send + Sync {
    /// Replaces the status message.
    fn update(&self, message: &str);

    /// Ends progress display with a final message.
    fn finish(&self, message: &str);
}

/// Discards all updates.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressNotifier for NoProgress {
    fn update(&self, _message: &str) {}

    fn finish(&self, _message: &str) {}
}

/// Spinner on stderr. Hidden automatically when stderr is not a terminal.
pub struct Spinner {
    bar: ProgressBar,
}

impl Spinner {
    pub fn start(message: &str) -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]") {
            bar.set_style(style);
        }
        bar.set_message(message.to_string());
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar }
    }
}

impl ProgressNotifier for Spinner {
    fn update(&self, message: &str) {
        self.bar.set_message(message.to_string());
    }

    fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.finish_and_clear();
        }
    }
}

/// Returns a spinner when `enabled`, otherwise a notifier that does nothing.
pub fn notifier(enabled: bool, message: &str) -> Box<dyn ProgressNotifier> {
    if enabled {
        Box::new(Spinner::start(message))
    } else {
        Box::new(NoProgress)
    }
}
