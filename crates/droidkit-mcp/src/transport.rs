//! Client-side stdio transport and response correlation.
//!
//! A spawned server's stdout is drained by a background reader thread that
//! decodes each line into the shared [`InboundQueue`]. Callers send requests
//! through a mutex-guarded writer and then wait on the queue for the response
//! carrying their id. Messages that arrive for other callers stay queued in
//! arrival order, so out-of-order responses are never lost.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, BufWriter};
use std::path::Path;
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::codec;
use crate::error::{McpError, Result};
use crate::protocol::{JsonRpcNotification, JsonRpcResponse, Message, RequestId};

/// How long `shutdown` waits for the server to exit after stdin closes.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Number of server stderr lines kept for diagnostics.
const STDERR_TAIL_LINES: usize = 200;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);

// ─────────────────────────────────────────────────────────────────────────────
// Inbound queue
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct QueueState {
    messages: VecDeque<Message>,
    closed: bool,
}

/// Thread-safe queue of decoded inbound messages.
///
/// The reader only ever pushes and never waits on callers; callers only ever
/// wait on the queue.
#[derive(Debug, Default)]
pub struct InboundQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl InboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, message: Message) {
        self.state.lock().messages.push_back(message);
        self.ready.notify_all();
    }

    /// Mark the stream as finished. Queued messages stay claimable.
    pub fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait up to `timeout` for the response to `id`.
    ///
    /// Non-matching messages are left in place for later callers.
    pub fn await_response(&self, id: &RequestId, timeout: Duration) -> Result<JsonRpcResponse> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            let position = state
                .messages
                .iter()
                .position(|m| matches!(m, Message::Response(r) if &r.id == id));
            if let Some(Message::Response(response)) = position.and_then(|i| state.messages.remove(i)) {
                return Ok(response);
            }
            if state.closed {
                return Err(McpError::ConnectionClosed);
            }
            if Instant::now() >= deadline {
                return Err(McpError::Timeout);
            }
            self.ready.wait_until(&mut state, deadline);
        }
    }

    /// Remove and return every queued notification, leaving responses alone.
    pub fn take_notifications(&self) -> Vec<JsonRpcNotification> {
        let mut state = self.state.lock();
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(state.messages.len());
        for message in state.messages.drain(..) {
            match message {
                Message::Notification(n) => taken.push(n),
                other => kept.push_back(other),
            }
        }
        state.messages = kept;
        taken
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Stdio transport
// ─────────────────────────────────────────────────────────────────────────────

/// A spawned MCP server speaking line-delimited JSON-RPC on stdio.
pub struct StdioTransport {
    name: String,
    child: Mutex<Child>,
    stdin: Mutex<Option<BufWriter<ChildStdin>>>,
    inbound: Arc<InboundQueue>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
}

impl StdioTransport {
    /// Spawn `command` and start the reader threads.
    pub fn spawn(
        command: &str,
        args: &[String],
        env: Option<&[(String, String)]>,
        working_dir: Option<&Path>,
    ) -> Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(env_vars) = env {
            for (key, value) in env_vars {
                cmd.env(key, value);
            }
        }
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| McpError::spawn_failed(format!("failed to spawn '{command}': {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::spawn_failed("failed to capture stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::spawn_failed("failed to capture stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| McpError::spawn_failed("failed to capture stderr"))?;

        let inbound = Arc::new(InboundQueue::new());
        let stderr_tail = Arc::new(Mutex::new(VecDeque::new()));

        let spawned = spawn_reader(command, stdout, Arc::clone(&inbound))
            .and_then(|_| spawn_stderr_reader(command, stderr, Arc::clone(&stderr_tail)));
        if let Err(e) = spawned {
            let _ = child.kill();
            let _ = child.wait();
            return Err(McpError::spawn_failed(format!("failed to start reader thread: {e}")));
        }

        tracing::debug!(server = %command, pid = child.id(), "spawned stdio MCP server");

        Ok(Self {
            name: command.to_string(),
            child: Mutex::new(child),
            stdin: Mutex::new(Some(BufWriter::new(stdin))),
            inbound,
            stderr_tail,
        })
    }

    /// Write one whole message. Concurrent senders never interleave.
    pub fn send(&self, message: &Message) -> Result<()> {
        let mut guard = self.stdin.lock();
        let writer = guard.as_mut().ok_or(McpError::ConnectionClosed)?;
        codec::write_message_blocking(writer, message)?;
        tracing::trace!(server = %self.name, method = ?message.method(), id = ?message.id(), "sent MCP message");
        Ok(())
    }

    /// The queue the reader thread feeds.
    pub fn inbound(&self) -> &Arc<InboundQueue> {
        &self.inbound
    }

    pub fn await_response(&self, id: &RequestId, timeout: Duration) -> Result<JsonRpcResponse> {
        self.inbound.await_response(id, timeout)
    }

    /// Recent stderr output of the server, oldest first.
    pub fn stderr_lines(&self) -> Vec<String> {
        self.stderr_tail.lock().iter().cloned().collect()
    }

    pub fn pid(&self) -> u32 {
        self.child.lock().id()
    }

    /// Close the server's stdin, signalling EOF.
    pub fn close_stdin(&self) {
        self.stdin.lock().take();
    }

    /// Whether the server process is still running.
    pub fn is_connected(&self) -> bool {
        matches!(self.child.lock().try_wait(), Ok(None))
    }

    /// Close stdin, wait up to `grace` for the server to exit, then kill it.
    pub fn shutdown(&self, grace: Duration) -> Result<()> {
        self.close_stdin();

        let deadline = Instant::now() + grace;
        let mut child = self.child.lock();
        loop {
            if let Some(status) = child.try_wait()? {
                tracing::debug!(server = %self.name, ?status, "MCP server exited");
                return Ok(());
            }
            if Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(EXIT_POLL_INTERVAL);
        }

        tracing::debug!(server = %self.name, "MCP server did not exit in time, killing");
        let _ = child.kill();
        child.wait()?;
        Ok(())
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        let _ = self.shutdown(Duration::ZERO);
    }
}

fn spawn_reader(
    server: &str,
    stdout: ChildStdout,
    inbound: Arc<InboundQueue>,
) -> std::io::Result<()> {
    let server = server.to_string();
    std::thread::Builder::new()
        .name("mcp-reader".to_string())
        .spawn(move || {
            let mut reader = BufReader::new(stdout);
            let mut line = Vec::new();
            loop {
                line.clear();
                match reader.read_until(b'\n', &mut line) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(server = %server, error = %e, "failed to read from MCP server");
                        break;
                    }
                }
                if codec::is_blank(&line) {
                    continue;
                }
                match codec::decode_bytes(&line) {
                    Ok(message) => {
                        tracing::trace!(server = %server, id = ?message.id(), "received MCP message");
                        inbound.push(message);
                    }
                    Err(e) => tracing::warn!(
                        server = %server,
                        error = %e.error,
                        "discarding undecodable line from MCP server"
                    ),
                }
            }
            inbound.close();
        })
        .map(|_| ())
}

fn spawn_stderr_reader(
    server: &str,
    stderr: ChildStderr,
    tail: Arc<Mutex<VecDeque<String>>>,
) -> std::io::Result<()> {
    let server = server.to_string();
    std::thread::Builder::new()
        .name("mcp-stderr".to_string())
        .spawn(move || {
            for line in BufReader::new(stderr).lines() {
                let Ok(line) = line else { break };
                tracing::debug!(server = %server, line = %line, "MCP server stderr");
                let mut tail = tail.lock();
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        })
        .map(|_| ())
}
