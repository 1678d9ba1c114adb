//! The command execution primitive: runs a subprocess, streams its
//! stdout/stderr as they arrive, optionally enforces a wall-clock
//! timeout, and returns a structured [`CommandResult`].
//!
//! The source tool multiplexed stdout/stderr with `select(2)` over two
//! non-blocking pipes in a single thread. Rust's ownership rules make a
//! reader-thread-per-stream the idiomatic equivalent: each thread owns
//! one end of the pipe outright, so there is no need for non-blocking
//! reads or a readiness loop. See `DESIGN.md` for the substitution
//! rationale.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};

/// How a command should be invoked: a single string run through `sh -c`,
/// or an argv list run directly with no shell interpretation.
#[derive(Debug, Clone)]
pub enum CommandSpec {
    Shell(String),
    Argv(Vec<String>),
}

impl From<&str> for CommandSpec {
    fn from(s: &str) -> Self {
        CommandSpec::Shell(s.to_string())
    }
}

impl From<String> for CommandSpec {
    fn from(s: String) -> Self {
        CommandSpec::Shell(s)
    }
}

impl From<Vec<String>> for CommandSpec {
    fn from(v: Vec<String>) -> Self {
        CommandSpec::Argv(v)
    }
}

impl<'a> From<Vec<&'a str>> for CommandSpec {
    fn from(v: Vec<&'a str>) -> Self {
        CommandSpec::Argv(v.into_iter().map(String::from).collect())
    }
}

impl<'a, const N: usize> From<[&'a str; N]> for CommandSpec {
    fn from(v: [&'a str; N]) -> Self {
        CommandSpec::Argv(v.into_iter().map(String::from).collect())
    }
}

impl CommandSpec {
    fn display(&self) -> String {
        match self {
            CommandSpec::Shell(s) => s.clone(),
            CommandSpec::Argv(v) => v.join(" "),
        }
    }
}

/// The raw output of a completed (or timed-out) child process.
#[derive(Debug, Clone)]
pub struct Response {
    pub command: String,
    pub stderr: Vec<u8>,
    pub stdout: Vec<u8>,
    pub status_code: i32,
}

/// `success` is `status_code == 0`, except where a caller has
/// post-processed the result to normalize a documented non-fatal exit
/// code (`fsck == 1`, `growpart == 1`; see `gator_lib::linux`).
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub success: bool,
    pub response: Response,
}

impl CommandResult {
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.response.stdout).into_owned()
    }

    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.response.stderr).into_owned()
    }

    /// Recast a result as successful without altering its captured output.
    /// Used to normalize the documented non-fatal exit codes of `fsck`
    /// and `growpart`.
    pub fn force_success(mut self) -> Self {
        self.success = true;
        self
    }
}

const READ_CHUNK: usize = 4096;

/// Strip a recorded virtualenv-style `bin/` prefix from `PATH`. The
/// source tool did this unconditionally when running inside a Python
/// venv; there's no Rust equivalent, so this is opt-in via
/// `GATOR_VENV_PREFIX`, which a wrapper script may set before invoking
/// gator from inside one.
fn sanitized_path() -> Option<String> {
    let path = std::env::var("PATH").ok()?;
    let prefix = std::env::var("GATOR_VENV_PREFIX").ok()?;
    let needle = format!("{prefix}/bin:");
    path.contains(&needle).then(|| path.replace(&needle, ""))
}

fn stream_reader(mut stream: impl Read + Send + 'static, label: &'static str) -> thread::JoinHandle<Vec<u8>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    let text = String::from_utf8_lossy(&chunk[..n]);
                    for line in text.split_inclusive('\n') {
                        let line = line.trim_end_matches('\n');
                        if !line.is_empty() {
                            tracing::debug!(target: "gator::command", "{label}: {line}");
                        }
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        buf
    })
}

/// Run `cmd`, streaming stdout/stderr as they arrive and optionally
/// enforcing a wall-clock `timeout`.
pub fn monitor_command(cmd: impl Into<CommandSpec>, timeout: Option<Duration>) -> Result<CommandResult> {
    let spec = cmd.into();
    let command_str = spec.display();
    anyhow::ensure!(!command_str.trim().is_empty(), "empty command passed to monitor_command");
    tracing::debug!(target: "gator::command", "command: {command_str}");

    let mut builder = match &spec {
        CommandSpec::Shell(s) => {
            let mut c = Command::new("sh");
            c.arg("-c").arg(s);
            c
        }
        CommandSpec::Argv(argv) => {
            let (exe, rest) = argv
                .split_first()
                .context("empty argv passed to monitor_command")?;
            let mut c = Command::new(exe);
            c.args(rest);
            c
        }
    };
    builder.stdin(Stdio::null());
    builder.stdout(Stdio::piped());
    builder.stderr(Stdio::piped());
    if let Some(path) = sanitized_path() {
        builder.env("PATH", path);
    }

    let mut child = builder
        .spawn()
        .with_context(|| format!("spawning: {command_str}"))?;
    let stdout = child.stdout.take().expect("piped stdout");
    let stderr = child.stderr.take().expect("piped stderr");
    let out_handle = stream_reader(stdout, "stdout");
    let err_handle = stream_reader(stderr, "stderr");

    let status = wait_with_timeout(child, timeout)?;
    let stdout_buf = out_handle.join().unwrap_or_default();
    let stderr_buf = err_handle.join().unwrap_or_default();

    let status_code = status.and_then(|s| s.code()).unwrap_or(-1);
    tracing::debug!(target: "gator::command", "status code: {status_code}");

    Ok(CommandResult {
        success: status_code == 0,
        response: Response {
            command: command_str,
            stderr: stderr_buf,
            stdout: stdout_buf,
            status_code,
        },
    })
}

/// Run `cmd` with no timeout.
pub fn run(cmd: impl Into<CommandSpec>) -> Result<CommandResult> {
    monitor_command(cmd, None)
}

/// Wait for `child`, killing it if `timeout` elapses first. `None`
/// means the child was killed due to timeout; the caller synthesizes a
/// non-zero status code for that case.
fn wait_with_timeout(child: Child, timeout: Option<Duration>) -> Result<Option<ExitStatus>> {
    let pid = child.id();
    let (tx, rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        let mut child = child;
        let _ = tx.send(child.wait().ok());
    });

    let Some(timeout) = timeout else {
        let status = rx.recv().ok().flatten();
        let _ = handle.join();
        return Ok(status);
    };

    match rx.recv_timeout(timeout) {
        Ok(status) => {
            let _ = handle.join();
            Ok(status)
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            tracing::warn!(target: "gator::command", "timeout of {timeout:?} exceeded, terminating child");
            kill_pid(pid);
            let status = rx.recv().ok().flatten();
            let _ = handle.join();
            Ok(status)
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            let _ = handle.join();
            Ok(None)
        }
    }
}

fn kill_pid(pid: u32) {
    let Some(pid) = rustix::process::Pid::from_raw(pid as i32) else {
        return;
    };
    if let Err(e) = rustix::process::kill_process(pid, rustix::process::Signal::Kill) {
        tracing::debug!(target: "gator::command", "failed to kill pid {pid:?}: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_and_exit_status() {
        let result = run(vec!["echo".to_string(), "hello".to_string()]).unwrap();
        assert!(result.success);
        assert_eq!(result.response.status_code, 0);
        assert_eq!(result.stdout_str().trim(), "hello");
    }

    #[test]
    fn nonzero_exit_is_failure() {
        let result = run("exit 3").unwrap();
        assert!(!result.success);
        assert_eq!(result.response.status_code, 3);
    }

    #[test]
    fn timeout_kills_child_and_reports_failure() {
        let result = monitor_command("sleep 5", Some(Duration::from_millis(100))).unwrap();
        assert!(!result.success);
    }

    #[test]
    fn force_success_normalizes_fsck_like_exit() {
        let result = run("exit 1").unwrap().force_success();
        assert!(result.success);
        assert_eq!(result.response.status_code, 1);
    }

    #[test]
    fn empty_command_is_rejected() {
        assert!(run("   ").is_err());
    }
}
