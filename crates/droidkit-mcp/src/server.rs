//! The read-dispatch-write loop for one connection.
//!
//! The loop handles one message at a time: read a line, decode it, dispatch
//! it, write the response, repeat. Per-message failures turn into error
//! responses (or a log line when no id can be recovered). Only EOF on the
//! input ends the loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};

use crate::codec::{self, DecodeError};
use crate::dispatcher::{Dispatcher, Outcome};
use crate::error::Result;
use crate::executor::{Executor, ProcessExecutor};
use crate::protocol::{JsonRpcResponse, Message, ServerInfo};
use crate::registry::ToolRegistry;
use crate::session::Session;

/// How much of an undecodable line ends up in the log.
const LOG_PREVIEW_CHARS: usize = 200;

/// A stdio MCP server exposing a fixed tool registry.
pub struct McpServer<E = ProcessExecutor> {
    dispatcher: Dispatcher<E>,
}

impl McpServer<ProcessExecutor> {
    pub fn new(registry: impl Into<Arc<ToolRegistry>>, server_info: ServerInfo) -> Self {
        Self {
            dispatcher: Dispatcher::new(registry, server_info),
        }
    }
}

impl<E: Executor> McpServer<E> {
    pub fn with_executor<F: Executor>(self, executor: F) -> McpServer<F> {
        McpServer {
            dispatcher: self.dispatcher.with_executor(executor),
        }
    }

    pub fn with_protocol_version(self, version: impl Into<String>) -> Self {
        Self {
            dispatcher: self.dispatcher.with_protocol_version(version),
        }
    }

    pub fn with_default_timeout(self, timeout: Duration) -> Self {
        Self {
            dispatcher: self.dispatcher.with_default_timeout(timeout),
        }
    }

    pub fn with_working_dir(self, dir: impl Into<PathBuf>) -> Self {
        Self {
            dispatcher: self.dispatcher.with_working_dir(dir),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher<E> {
        &self.dispatcher
    }

    /// Serve on the process's stdin/stdout until stdin closes.
    pub async fn serve_stdio(&self) -> Result<()> {
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve one connection until `reader` reaches EOF.
    ///
    /// Returns an error only when the streams themselves fail.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut reader = BufReader::new(reader);
        let mut session = Session::new();
        let mut line = Vec::new();

        tracing::info!(
            server = %self.dispatcher.server_info().name,
            tools = self.dispatcher.registry().len(),
            "MCP server listening"
        );

        loop {
            line.clear();
            let read = match reader.read_until(b'\n', &mut line).await {
                Ok(read) => read,
                Err(e) => {
                    tracing::error!(error = %e, "failed to read from input stream");
                    session.close();
                    return Err(e.into());
                }
            };
            if read == 0 {
                break;
            }
            if codec::is_blank(&line) {
                continue;
            }

            let reply = match codec::decode_bytes(&line) {
                Ok(message) => match self.dispatcher.dispatch(&mut session, message).await {
                    Outcome::Reply(response) => Some(response),
                    Outcome::NoReply => None,
                },
                Err(DecodeError { error, id: Some(id) }) => {
                    tracing::warn!(%id, code = error.code, error = %error, "rejecting undecodable message");
                    Some(JsonRpcResponse::failure(id, error))
                }
                Err(DecodeError { error, id: None }) => {
                    tracing::warn!(
                        code = error.code,
                        error = %error,
                        line = %preview(&line),
                        "dropping undecodable message without a recoverable id"
                    );
                    None
                }
            };

            if let Some(response) = reply
                && let Err(e) = codec::write_message(&mut writer, &Message::Response(response)).await
            {
                tracing::error!(error = %e, "failed to write response");
                session.close();
                return Err(e);
            }
        }

        session.close();
        tracing::info!("input closed, MCP server stopping");
        Ok(())
    }
}

fn preview(line: &[u8]) -> String {
    String::from_utf8_lossy(line)
        .trim_end()
        .chars()
        .take(LOG_PREVIEW_CHARS)
        .collect()
}
