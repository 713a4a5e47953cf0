//! Version Probe
//!
//! Asks the installed binary which version it is, and the bounded
//! child-process runner shared with the service controller.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const SPAWN_ATTEMPTS: u32 = 5;

/// Failure running a child process
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Wait error: {0}")]
    Wait(#[source] std::io::Error),
    #[error("{program} did not finish within {timeout:?}")]
    Timeout { program: String, timeout: Duration },
}

/// Captured result of a finished child process
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

/// Run `command` to completion, killing it if it outlives `timeout`
pub fn run_with_timeout(mut command: Command, timeout: Duration) -> Result<ProcessOutput, ProcessError> {
    let program = command.get_program().to_string_lossy().into_owned();

    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    let mut child = spawn(&mut command)
        .map_err(|source| ProcessError::Spawn { program: program.clone(), source })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = wait_with_deadline(&mut child, timeout)
        .map_err(ProcessError::Wait)?
        .ok_or(ProcessError::Timeout { program, timeout })?;

    Ok(ProcessOutput {
        status,
        stdout: collect(stdout),
        stderr: collect(stderr),
    })
}

/// Spawn, retrying while the executable is still open for writing somewhere
/// (a just-written artifact whose fd leaked into a concurrent fork).
fn spawn(command: &mut Command) -> std::io::Result<Child> {
    let mut attempt = 1;
    loop {
        match command.spawn() {
            Err(e) if is_text_busy(&e) && attempt < SPAWN_ATTEMPTS => {
                debug!(attempt, "executable busy, retrying spawn");
                thread::sleep(POLL_INTERVAL * attempt);
                attempt += 1;
            }
            result => return result,
        }
    }
}

#[cfg(unix)]
fn is_text_busy(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(libc::ETXTBSY)
}

#[cfg(not(unix))]
fn is_text_busy(_e: &std::io::Error) -> bool {
    false
}

fn wait_with_deadline(child: &mut Child, timeout: Duration) -> std::io::Result<Option<ExitStatus>> {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if start.elapsed() > timeout {
            let _ = child.kill();
            let _ = child.wait();
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = pipe.read_to_end(&mut buf);
            String::from_utf8_lossy(&buf).into_owned()
        })
    })
}

fn collect(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

/// Source of the currently installed version
pub trait VersionProbe {
    /// Version reported by the binary at `binary`, or `""` if it cannot be
    /// determined for any reason.
    fn installed_version(&self, binary: &Path) -> String;
}

impl<T: VersionProbe + ?Sized> VersionProbe for Arc<T> {
    fn installed_version(&self, binary: &Path) -> String {
        (**self).installed_version(binary)
    }
}

/// Runs `<binary> <flag>` and reads trimmed stdout
#[derive(Debug, Clone)]
pub struct CommandProbe {
    flag: String,
    timeout: Duration,
}

impl CommandProbe {
    pub fn new(flag: impl Into<String>, timeout: Duration) -> Self {
        Self { flag: flag.into(), timeout }
    }
}

impl Default for CommandProbe {
    fn default() -> Self {
        Self::new("--version", Duration::from_secs(10))
    }
}

impl VersionProbe for CommandProbe {
    fn installed_version(&self, binary: &Path) -> String {
        let mut command = Command::new(binary);
        command.arg(&self.flag);

        match run_with_timeout(command, self.timeout) {
            Ok(output) if output.status.success() => output.stdout.trim().to_string(),
            Ok(output) => {
                debug!(binary = %binary.display(), code = ?output.status.code(), "version query exited non-zero");
                String::new()
            }
            Err(e) => {
                debug!(binary = %binary.display(), error = %e, "version query failed");
                String::new()
            }
        }
    }
}
