//! Cancellable wait-with-timeout.
//!
//! [`wait_until`] polls a condition at a fixed interval until it reports
//! ready, the timeout elapses, or a [`CancelToken`] is triggered. Status
//! text from each poll is forwarded to a [`ProgressNotifier`]; completion
//! detection never depends on it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::error::Result;
use crate::progress::ProgressNotifier;

/// Longest single sleep, so cancellation is noticed promptly.
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Shared flag that asks a wait to stop early.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of a single poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus<T> {
    Ready(T),
    /// Not ready yet; carries a status line for progress display.
    Pending(String),
}

/// How a wait ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome<T> {
    Ready(T),
    TimedOut {
        elapsed: Duration,
        /// Last status reported before the deadline.
        last_status: Option<String>,
    },
    Cancelled,
}

/// Polls `poll` every `interval` until it is ready or `timeout` elapses.
///
/// A poll error is logged and treated as "not ready". At least one poll is
/// always made, and no sleep extends past the deadline.
pub fn wait_until<T, F>(
    timeout: Duration,
    interval: Duration,
    cancel: &CancelToken,
    progress: &dyn ProgressNotifier,
    mut poll: F,
) -> WaitOutcome<T>
where
    F: FnMut() -> Result<PollStatus<T>>,
{
    let start = Instant::now();
    let mut last_status = None;

    loop {
        if cancel.is_cancelled() {
            return WaitOutcome::Cancelled;
        }

        match poll() {
            Ok(PollStatus::Ready(value)) => {
                debug!("wait finished after {:?}", start.elapsed());
                return WaitOutcome::Ready(value);
            }
            Ok(PollStatus::Pending(status)) => {
                progress.update(&status);
                last_status = Some(status);
            }
            Err(e) => {
                warn!("poll failed, will retry: {}", e);
                last_status = Some(e.to_string());
            }
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            return WaitOutcome::TimedOut {
                elapsed,
                last_status,
            };
        }

        if !sleep_unless_cancelled(interval.min(timeout - elapsed), cancel) {
            return WaitOutcome::Cancelled;
        }
    }
}

/// Sleeps for `duration`; returns `false` if cancelled first.
pub fn sleep_unless_cancelled(duration: Duration, cancel: &CancelToken) -> bool {
    let deadline = Instant::now() + duration;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep(SLEEP_SLICE.min(deadline - now));
    }
}
