//! MCP client for driving stdio MCP servers.

use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use serde_json::Value;

use crate::error::{McpError, Result};
use crate::protocol::{
    Arguments, CallToolParams, CallToolResult, InitializeParams, InitializeResult,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListToolsResult, Message, RequestId,
    ServerInfo, ToolInfo,
};
use crate::transport::{DEFAULT_SHUTDOWN_GRACE, StdioTransport};

/// Default time to wait for any single response.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for a stdio MCP server connection.
#[derive(Debug, Clone)]
pub struct McpServerConfig {
    /// Name used in logs.
    pub name: String,
    /// Command to spawn.
    pub command: String,
    /// Arguments to pass to the command.
    pub args: Vec<String>,
    /// Environment variables to set.
    pub env: Vec<(String, String)>,
    /// Working directory of the server process.
    pub working_dir: Option<PathBuf>,
    /// How long to wait for each response.
    pub request_timeout: Duration,
}

impl McpServerConfig {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: Vec::new(),
            working_dir: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// An MCP client connected to a single server process.
///
/// The low-level `send_request` / `await_response` pair may be used from
/// several threads at once; responses are matched by id.
pub struct McpClient {
    config: McpServerConfig,
    transport: StdioTransport,
    server_info: Option<ServerInfo>,
    protocol_version: Option<String>,
    request_id: AtomicI64,
    initialized: bool,
}

impl McpClient {
    /// Spawn the server. Does not perform the handshake; call `initialize()`.
    pub fn connect_stdio(config: McpServerConfig) -> Result<Self> {
        let env = if config.env.is_empty() {
            None
        } else {
            Some(config.env.as_slice())
        };
        let transport = StdioTransport::spawn(
            &config.command,
            &config.args,
            env,
            config.working_dir.as_deref(),
        )?;

        tracing::info!(
            server = %config.name,
            command = %config.command,
            "connected to MCP server via stdio"
        );

        Ok(Self {
            config,
            transport,
            server_info: None,
            protocol_version: None,
            request_id: AtomicI64::new(1),
            initialized: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    /// Protocol version the server advertised.
    pub fn protocol_version(&self) -> Option<&str> {
        self.protocol_version.as_deref()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    pub fn transport(&self) -> &StdioTransport {
        &self.transport
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.request_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Send a request without waiting; returns its id.
    pub fn send_request(&self, method: &str, params: Option<Value>) -> Result<RequestId> {
        let id = self.next_request_id();
        let request = JsonRpcRequest::new(id.clone(), method, params);
        self.transport.send(&Message::Request(request))?;
        Ok(id)
    }

    /// Send a notification (no response expected).
    pub fn send_notification(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notification = JsonRpcNotification::new(method, params);
        self.transport.send(&Message::Notification(notification))
    }

    /// Wait for the response to `id`, whatever order responses arrive in.
    pub fn await_response(&self, id: &RequestId, timeout: Duration) -> Result<JsonRpcResponse> {
        self.transport.await_response(id, timeout)
    }

    /// Send a request and wait for its result.
    pub fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        self.request_with_timeout(method, params, self.config.request_timeout)
    }

    fn request_with_timeout(&self, method: &str, params: Option<Value>, timeout: Duration) -> Result<Value> {
        let id = self.send_request(method, params)?;
        let response = self.await_response(&id, timeout).map_err(|e| {
            if matches!(e, McpError::Timeout) {
                tracing::warn!(server = %self.config.name, method, %id, "timed out waiting for response");
            }
            e
        })?;
        Ok(response.into_result()?)
    }

    /// Perform the handshake and send the `initialized` notification.
    pub fn initialize(&mut self) -> Result<&ServerInfo> {
        if self.initialized {
            return self.server_info.as_ref().ok_or(McpError::NotInitialized);
        }

        let params = InitializeParams::default();
        let result = self.request("initialize", Some(serde_json::to_value(&params)?))?;
        let init_result: InitializeResult = serde_json::from_value(result)?;

        if init_result.protocol_version != params.protocol_version {
            tracing::warn!(
                server = %self.config.name,
                requested = %params.protocol_version,
                advertised = %init_result.protocol_version,
                "server advertised a different protocol version"
            );
        }
        tracing::info!(
            server = %init_result.server_info.name,
            version = %init_result.server_info.version,
            protocol = %init_result.protocol_version,
            "MCP server initialized"
        );

        self.send_notification("notifications/initialized", None)?;

        self.protocol_version = Some(init_result.protocol_version);
        self.initialized = true;
        Ok(self.server_info.insert(init_result.server_info))
    }

    /// List available tools from the server.
    pub fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        if !self.initialized {
            return Err(McpError::NotInitialized);
        }

        let result = self.request("tools/list", None)?;
        let list_result: ListToolsResult = serde_json::from_value(result)?;

        tracing::debug!(
            server = %self.config.name,
            tool_count = list_result.tools.len(),
            "listed MCP tools"
        );

        Ok(list_result.tools)
    }

    /// Call a tool with the configured request timeout.
    pub fn call_tool(&self, name: &str, arguments: Arguments) -> Result<CallToolResult> {
        self.call_tool_with_timeout(name, arguments, self.config.request_timeout)
    }

    /// Call a tool, waiting at most `timeout` for the result.
    pub fn call_tool_with_timeout(
        &self,
        name: &str,
        arguments: Arguments,
        timeout: Duration,
    ) -> Result<CallToolResult> {
        if !self.initialized {
            return Err(McpError::NotInitialized);
        }

        let params = CallToolParams {
            name: name.to_string(),
            arguments: Some(Value::Object(arguments)),
        };

        tracing::debug!(server = %self.config.name, tool = %name, "calling MCP tool");

        let result = self.request_with_timeout("tools/call", Some(serde_json::to_value(&params)?), timeout)?;
        let call_result: CallToolResult = serde_json::from_value(result)?;

        if call_result.is_error() {
            tracing::debug!(
                server = %self.config.name,
                tool = %name,
                exit_code = ?call_result.exit_code,
                "MCP tool reported an error"
            );
        }

        Ok(call_result)
    }

    /// Close stdin and wait for the server to exit, killing it after a grace period.
    pub fn shutdown(&mut self) -> Result<()> {
        tracing::info!(server = %self.config.name, "shutting down MCP server");
        self.initialized = false;
        self.transport.shutdown(DEFAULT_SHUTDOWN_GRACE)
    }
}
