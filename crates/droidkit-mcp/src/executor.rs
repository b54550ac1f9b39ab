//! Bounded subprocess execution.
//!
//! Each run spawns exactly one child with stdin closed and stdout/stderr
//! captured in full. The child leads its own process group. On timeout the
//! whole group is killed and the child reaped before the result is returned,
//! keeping whatever output arrived up to that point.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::protocol::{CallToolResult, JsonRpcError, ToolContent};
use crate::registry::CommandLine;

/// Default upper bound for a single command.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Exit code reported when the command hit its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = -1;

/// Exit code reported when the command could not be started.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = -2;

/// How long to keep draining pipes after the child is gone.
const CAPTURE_GRACE: Duration = Duration::from_millis(500);

/// Why a command could not run to completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionFailure {
    Timeout,
    SpawnFailure,
}

/// Outcome of one command execution.
///
/// A non-zero exit is a normal result and carries no `error` tag.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    #[serde(rename = "executionTime", serialize_with = "serialize_seconds")]
    pub elapsed: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionFailure>,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip)]
    pub pid: Option<u32>,
}

fn serialize_seconds<S: Serializer>(elapsed: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    let millis = elapsed.as_millis() as f64;
    serializer.serialize_f64(millis / 1000.0)
}

impl ExecutionResult {
    fn spawn_failure(command: String, reason: &std::io::Error, elapsed: Duration) -> Self {
        Self {
            exit_code: SPAWN_FAILURE_EXIT_CODE,
            stdout: String::new(),
            stderr: format!("Execution error: {reason}"),
            elapsed,
            error: Some(ExecutionFailure::SpawnFailure),
            message: Some(format!("Failed to execute command: {reason}")),
            command,
            pid: None,
        }
    }

    /// Whether the command ran and exited with status zero.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.exit_code == 0
    }

    /// Human-readable rendering used as the tool result text.
    pub fn render_text(&self) -> String {
        format!(
            "Command: {}\n\nSTDOUT:\n{}\nSTDERR:\n{}\nExit Code: {}",
            self.command, self.stdout, self.stderr, self.exit_code
        )
    }

    /// Convert a completed run into a `tools/call` result.
    pub fn into_call_result(self) -> CallToolResult {
        let mut text = self.render_text();
        if let Some(message) = &self.message {
            text.push_str(&format!("\n{message}"));
        }
        CallToolResult {
            content: vec![ToolContent::Text { text }],
            is_error: Some(self.exit_code != 0),
            exit_code: Some(self.exit_code),
            execution_time: Some(self.elapsed.as_millis() as f64 / 1000.0),
            stdout: Some(self.stdout),
            stderr: Some(self.stderr),
            command: Some(self.command),
        }
    }

    /// Convert a run that could not complete into a `-32000` error.
    pub fn into_rpc_error(self) -> JsonRpcError {
        let message = self
            .message
            .clone()
            .unwrap_or_else(|| format!("Command failed: {}", self.command));
        let data = serde_json::to_value(&self).unwrap_or_default();
        JsonRpcError::execution(message).with_data(data)
    }
}

/// Runs command lines produced by tool handlers.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(&self, command: &CommandLine, timeout: Duration) -> ExecutionResult;
}

/// Executes commands as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Executor for ProcessExecutor {
    async fn run(&self, command: &CommandLine, timeout: Duration) -> ExecutionResult {
        let started = Instant::now();
        let rendered = command.to_string();
        let logged = command.redacted().to_string();

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // The child leads its own group so a timeout reaches everything it started.
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &command.env {
            cmd.env(key, value);
        }

        tracing::info!(command = %logged, timeout_ms = timeout.as_millis() as u64, "executing command");

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(command = %logged, error = %e, "failed to spawn command");
                return ExecutionResult::spawn_failure(rendered, &e, started.elapsed());
            }
        };

        let pid = child.id();
        let stdout_capture = child.stdout.take().map(PipeCapture::spawn);
        let stderr_capture = child.stderr.take().map(PipeCapture::spawn);

        let (exit_code, error, message, capture_budget) =
            match tokio::time::timeout(timeout, child.wait()).await {
                Ok(Ok(status)) => {
                    let remaining = timeout.saturating_sub(started.elapsed());
                    let (code, message) = exit_code(&status);
                    (code, None, message, remaining + CAPTURE_GRACE)
                }
                Ok(Err(e)) => {
                    terminate(&mut child, pid, &logged).await;
                    (
                        SPAWN_FAILURE_EXIT_CODE,
                        Some(ExecutionFailure::SpawnFailure),
                        Some(format!("Failed to execute command: {e}")),
                        CAPTURE_GRACE,
                    )
                }
                Err(_) => {
                    terminate(&mut child, pid, &logged).await;
                    tracing::warn!(
                        command = %logged,
                        timeout_ms = timeout.as_millis() as u64,
                        "command timed out"
                    );
                    (
                        TIMEOUT_EXIT_CODE,
                        Some(ExecutionFailure::Timeout),
                        Some(timeout_message(timeout)),
                        CAPTURE_GRACE,
                    )
                }
            };

        let stdout = collect(stdout_capture, capture_budget).await;
        let stderr = collect(stderr_capture, CAPTURE_GRACE).await;
        let elapsed = started.elapsed();

        if error.is_none() {
            if exit_code == 0 {
                tracing::info!(
                    command = %logged,
                    exit_code,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "command completed"
                );
            } else {
                tracing::warn!(
                    command = %logged,
                    exit_code,
                    elapsed_ms = elapsed.as_millis() as u64,
                    reason = message.as_deref().unwrap_or("non-zero exit"),
                    "command exited with non-zero status"
                );
            }
        }

        ExecutionResult {
            exit_code,
            stdout,
            stderr,
            elapsed,
            error,
            command: rendered,
            message,
            pid,
        }
    }
}

/// Exit code of a finished child. A signal death reports `128 + signal`.
fn exit_code(status: &ExitStatus) -> (i32, Option<String>) {
    if let Some(code) = status.code() {
        return (code, None);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return (
                128 + signal,
                Some(format!("Command terminated by signal {signal}")),
            );
        }
    }
    (-1, Some("Command exited without a status code".to_string()))
}

pub(crate) fn timeout_message(timeout: Duration) -> String {
    if timeout.subsec_nanos() == 0 {
        format!("Command timed out after {} seconds", timeout.as_secs())
    } else {
        format!("Command timed out after {} ms", timeout.as_millis())
    }
}

/// Kill the child's process group, then kill and reap the child itself.
async fn terminate(child: &mut Child, pid: Option<u32>, logged: &str) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        if let Some(pid) = pid.and_then(|pid| i32::try_from(pid).ok())
            && let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL)
        {
            tracing::debug!(pid, error = %e, "failed to kill process group");
        }
    }
    #[cfg(not(unix))]
    let _ = pid;

    // kill() also reaps the child, so no zombie is left behind.
    if let Err(e) = child.kill().await {
        tracing::error!(command = %logged, error = %e, "failed to kill command");
    }
}

/// Bytes read from one pipe so far. They survive the reader being abandoned.
struct PipeCapture {
    buf: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl PipeCapture {
    fn spawn<R>(reader: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let task = tokio::spawn(read_into(reader, Arc::clone(&buf)));
        Self { buf, task }
    }

    /// Wait up to `budget` for end of stream, then return what was captured.
    /// A grandchild holding the pipe open must not stall the caller.
    async fn finish(mut self, budget: Duration) -> String {
        match tokio::time::timeout(budget, &mut self.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "output reader task failed"),
            Err(_) => {
                self.task.abort();
                tracing::debug!("output pipe still open after command exit; capture truncated");
            }
        }
        let bytes = std::mem::take(&mut *self.buf.lock());
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

async fn read_into<R: AsyncRead + Unpin>(mut reader: R, buf: Arc<Mutex<Vec<u8>>>) {
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => buf.lock().extend_from_slice(&chunk[..n]),
        }
    }
}

async fn collect(capture: Option<PipeCapture>, budget: Duration) -> String {
    match capture {
        Some(capture) => capture.finish(budget).await,
        None => String::new(),
    }
}
