//! MCP (Model Context Protocol) stdio engine for droidkit.
//!
//! This crate exposes command-line tools as MCP tools: a line-delimited
//! JSON-RPC server that validates calls against a fixed tool registry and runs
//! each call as a bounded subprocess, plus a client for driving such servers.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  McpServer                                                  │
//! │  - One line in, one line out, strictly sequential           │
//! │  - Owns the Session (lifecycle gate)                        │
//! └─────────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Dispatcher                                                 │
//! │  - initialize, tools/list, tools/call                       │
//! │  - Schema validation before anything is spawned             │
//! └─────────────────────────────────────────────────────────────┘
//!              │                               │
//!              ▼                               ▼
//! ┌────────────────────────────┐  ┌────────────────────────────┐
//! │  ToolRegistry              │  │  Executor                  │
//! │  - descriptor + handler    │  │  - one child per call      │
//! │  - handler → CommandLine   │  │  - timeout kills the child │
//! └────────────────────────────┘  └────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use droidkit_mcp::{
//!     CommandLine, InputSchema, McpServer, PropertySchema, ServerInfo, ToolDescriptor,
//!     ToolRegistry, require_string,
//! };
//!
//! let registry = ToolRegistry::builder()
//!     .register(
//!         ToolDescriptor::new(
//!             "echo",
//!             "Print a message",
//!             InputSchema::new().required("message", PropertySchema::string("Text")),
//!         ),
//!         |args: &Arguments| Ok(CommandLine::new("echo").arg(require_string(args, "message")?)),
//!     )?
//!     .build();
//!
//! McpServer::new(registry, ServerInfo::new("echo-server", "0.1.0"))
//!     .serve_stdio()
//!     .await?;
//! ```
//!
//! # Wire format
//!
//! Every message is one JSON object on one line:
//!
//! ```text
//! {"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"echo","arguments":{"message":"hi"}}}\n
//! ```
//!
//! The protocol flow is:
//! 1. Client sends `initialize` with capabilities
//! 2. Server responds with its capabilities
//! 3. Client sends `notifications/initialized`
//! 4. Client can now call `tools/list` and `tools/call`

pub mod client;
pub mod codec;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-export main types
pub use client::{McpClient, McpServerConfig};
pub use dispatcher::{Dispatcher, Outcome};
pub use error::{McpError, Result};
pub use executor::{ExecutionFailure, ExecutionResult, Executor, ProcessExecutor};
pub use protocol::{
    Arguments, CallToolParams, CallToolResult, InitializeParams, InitializeResult, JsonRpcError,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListToolsResult, MCP_PROTOCOL_VERSION,
    Message, RequestId, ServerCapabilities, ServerInfo, ToolContent, ToolInfo, ToolsCapability,
};
pub use registry::{
    CommandLine, InputSchema, ParamType, PropertySchema, Redacted, ToolDescriptor, ToolError, ToolHandler,
    ToolRegistry, ToolRegistryBuilder, bool_arg, require_string, scalar_arg, string_arg,
    string_list_arg,
};
pub use server::McpServer;
pub use session::{Session, SessionState};
pub use transport::{InboundQueue, StdioTransport};
