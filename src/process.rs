//! Bounded execution of external binaries.
//!
//! Every external call labsync makes (`git`, `kubectl`, `lsof`, `ps`) goes
//! through [`run`], which enforces a time budget so that no step of a run can
//! block forever. Output is captured on reader threads so a chatty child can
//! never fill its pipe and stall.

use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use log::debug;

use crate::error::{Error, Result};

/// Interval between checks on a running child.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Stderr if it has content, stdout otherwise, trimmed.
    pub fn diagnostic(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

/// Renders a command the way a user would type it.
pub fn describe(command: &Command) -> String {
    let mut parts = vec![command.get_program().to_string_lossy().into_owned()];
    parts.extend(command.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

/// Runs `command` to completion, killing it once `timeout` has elapsed.
pub fn run(mut command: Command, timeout: Duration) -> Result<CommandOutput> {
    let rendered = describe(&command);
    debug!("running `{}` (timeout {:?})", rendered, timeout);

    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::CommandSpawn {
            command: rendered.clone(),
            message: e.to_string(),
        })?;

    let stdout_reader = child.stdout.take().map(|mut out| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = out.read_to_end(&mut buf);
            buf
        })
    });
    let stderr_reader = child.stderr.take().map(|mut err| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = err.read_to_end(&mut buf);
            buf
        })
    });

    let start = Instant::now();
    let status = loop {
        match child.try_wait()? {
            Some(status) => break status,
            None if start.elapsed() >= timeout => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::CommandTimeout {
                    command: rendered,
                    timeout,
                });
            }
            None => thread::sleep(POLL_INTERVAL),
        }
    };

    let collect = |handle: Option<thread::JoinHandle<Vec<u8>>>| {
        handle
            .and_then(|h| h.join().ok())
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default()
    };

    let output = CommandOutput {
        success: status.success(),
        code: status.code(),
        stdout: collect(stdout_reader),
        stderr: collect(stderr_reader),
    };
    debug!("`{}` exited with {:?}", rendered, output.code);
    Ok(output)
}
