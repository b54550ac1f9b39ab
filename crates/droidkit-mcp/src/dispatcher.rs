//! Method routing for one connection.
//!
//! Every request passes the session's lifecycle gate first, then goes to a
//! typed handler picked from [`Method`]. Failures become JSON-RPC error
//! responses attached to the request id; nothing here ends the connection.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use crate::executor::{DEFAULT_TIMEOUT, Executor, ProcessExecutor};
use crate::protocol::{
    Arguments, CallToolParams, InitializeParams, InitializeResult, JsonRpcError,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListToolsResult, MCP_PROTOCOL_VERSION,
    Message, ServerCapabilities, ServerInfo,
};
use crate::registry::ToolRegistry;
use crate::session::Session;

/// Notification the client sends once it has processed the `initialize` response.
pub const INITIALIZED: &str = "initialized";

/// Namespaced spelling of [`INITIALIZED`] used by newer clients.
pub const NOTIFICATIONS_INITIALIZED: &str = "notifications/initialized";

/// Methods the server understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method<'a> {
    Initialize,
    ToolsList,
    ToolsCall,
    Unknown(&'a str),
}

impl<'a> From<&'a str> for Method<'a> {
    fn from(method: &'a str) -> Self {
        match method {
            "initialize" => Self::Initialize,
            "tools/list" => Self::ToolsList,
            "tools/call" => Self::ToolsCall,
            other => Self::Unknown(other),
        }
    }
}

/// What the runtime loop should write back.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Reply(JsonRpcResponse),
    NoReply,
}

type HandlerResult = Result<Value, JsonRpcError>;

/// Routes decoded messages to the registry and the executor.
pub struct Dispatcher<E = ProcessExecutor> {
    registry: Arc<ToolRegistry>,
    executor: E,
    server_info: ServerInfo,
    protocol_version: String,
    default_timeout: Duration,
    working_dir: Option<PathBuf>,
}

impl Dispatcher<ProcessExecutor> {
    pub fn new(registry: impl Into<Arc<ToolRegistry>>, server_info: ServerInfo) -> Self {
        Self {
            registry: registry.into(),
            executor: ProcessExecutor,
            server_info,
            protocol_version: MCP_PROTOCOL_VERSION.to_string(),
            default_timeout: DEFAULT_TIMEOUT,
            working_dir: None,
        }
    }
}

impl<E: Executor> Dispatcher<E> {
    /// Swap the executor, keeping everything else.
    pub fn with_executor<F: Executor>(self, executor: F) -> Dispatcher<F> {
        Dispatcher {
            registry: self.registry,
            executor,
            server_info: self.server_info,
            protocol_version: self.protocol_version,
            default_timeout: self.default_timeout,
            working_dir: self.working_dir,
        }
    }

    /// Canonical protocol version echoed in `initialize` results.
    pub fn with_protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = version.into();
        self
    }

    /// Timeout for tools that do not set their own.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Working directory for tools that do not set their own.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Handle one inbound message.
    pub async fn dispatch(&self, session: &mut Session, message: Message) -> Outcome {
        match message {
            Message::Request(request) => Outcome::Reply(self.handle_request(session, request).await),
            Message::Notification(notification) => {
                self.handle_notification(session, &notification);
                Outcome::NoReply
            }
            Message::Response(response) => {
                tracing::debug!(id = %response.id, "ignoring response sent to server");
                Outcome::NoReply
            }
        }
    }

    async fn handle_request(&self, session: &mut Session, request: JsonRpcRequest) -> JsonRpcResponse {
        let JsonRpcRequest { id, method, params, .. } = request;
        tracing::debug!(%id, method = %method, "handling request");

        let result = match session.admit(&method) {
            Err(e) => Err(e),
            Ok(()) => match Method::from(method.as_str()) {
                Method::Initialize => self.initialize(session, params),
                Method::ToolsList => self.list_tools(),
                Method::ToolsCall => self.call_tool(params).await,
                Method::Unknown(name) => Err(JsonRpcError::method_not_found(name)),
            },
        };

        match result {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(error) => {
                tracing::debug!(%id, method = %method, code = error.code, message = %error.message, "request failed");
                JsonRpcResponse::failure(id, error)
            }
        }
    }

    fn handle_notification(&self, session: &mut Session, notification: &JsonRpcNotification) {
        match notification.method.as_str() {
            INITIALIZED | NOTIFICATIONS_INITIALIZED => session.acknowledge_initialized(),
            other => tracing::debug!(method = other, "ignoring notification"),
        }
    }

    fn initialize(&self, session: &mut Session, params: Option<Value>) -> HandlerResult {
        let params: InitializeParams = parse_params(params)?.unwrap_or_default();
        session.complete_handshake(params, &self.protocol_version);

        to_result(&InitializeResult {
            protocol_version: self.protocol_version.clone(),
            capabilities: ServerCapabilities::tools_only(),
            server_info: self.server_info.clone(),
        })
    }

    fn list_tools(&self) -> HandlerResult {
        to_result(&ListToolsResult {
            tools: self.registry.tool_infos(),
        })
    }

    async fn call_tool(&self, params: Option<Value>) -> HandlerResult {
        let params: CallToolParams =
            parse_params(params)?.ok_or_else(|| JsonRpcError::missing_field("name"))?;

        let tool = self
            .registry
            .get(&params.name)
            .ok_or_else(|| JsonRpcError::tool_not_found(&params.name))?;

        let arguments = match params.arguments {
            None | Some(Value::Null) => Arguments::new(),
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(JsonRpcError::invalid_params(
                    "Invalid params: 'arguments' must be an object",
                ));
            }
        };

        // Nothing is spawned unless the arguments pass the schema.
        tool.descriptor().input_schema.validate(&arguments)?;
        let mut command = tool.handler().command(&arguments)?;
        if command.working_dir.is_none()
            && let Some(dir) = &self.working_dir
        {
            command.working_dir = Some(dir.clone());
        }
        let timeout = command.timeout.unwrap_or(self.default_timeout);

        tracing::info!(tool = %params.name, command = %command.redacted(), "calling tool");
        let result = self.executor.run(&command, timeout).await;

        if result.error.is_some() {
            return Err(result.into_rpc_error());
        }
        to_result(&result.into_call_result())
    }
}

/// Deserialize optional params; `null` counts as absent.
fn parse_params<T: serde::de::DeserializeOwned>(params: Option<Value>) -> Result<Option<T>, JsonRpcError> {
    match params {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| JsonRpcError::invalid_params(format!("Invalid params: {e}"))),
    }
}

fn to_result<T: Serialize>(value: &T) -> HandlerResult {
    serde_json::to_value(value).map_err(|e| JsonRpcError::internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecutionFailure;
    use crate::protocol::{CallToolResult, RequestId};
    use crate::testing::{CountingExecutor, echo_registry};
    use serde_json::json;

    fn dispatcher(executor: CountingExecutor) -> Dispatcher<CountingExecutor> {
        Dispatcher::new(echo_registry(), ServerInfo::new("test-server", "0.0.1"))
            .with_executor(executor)
            .with_default_timeout(Duration::from_secs(3))
    }

    fn request(id: i64, method: &str, params: Value) -> Message {
        Message::Request(JsonRpcRequest::new(id, method, Some(params)))
    }

    async fn reply(d: &Dispatcher<CountingExecutor>, session: &mut Session, msg: Message) -> JsonRpcResponse {
        match d.dispatch(session, msg).await {
            Outcome::Reply(resp) => resp,
            Outcome::NoReply => panic!("expected a reply"),
        }
    }

    async fn initialized(d: &Dispatcher<CountingExecutor>) -> Session {
        let mut session = Session::new();
        let resp = reply(d, &mut session, request(0, "initialize", json!({}))).await;
        assert!(!resp.is_error());
        session
    }

    #[test]
    fn test_method_routing_table() {
        assert_eq!(Method::from("initialize"), Method::Initialize);
        assert_eq!(Method::from("tools/list"), Method::ToolsList);
        assert_eq!(Method::from("tools/call"), Method::ToolsCall);
        assert_eq!(Method::from("resources/list"), Method::Unknown("resources/list"));
    }

    #[tokio::test]
    async fn test_call_before_initialize_is_rejected() {
        let executor = CountingExecutor::new();
        let d = dispatcher(executor.clone());
        let mut session = Session::new();

        for name in ["echo", "no-such-tool"] {
            let resp = reply(
                &d,
                &mut session,
                request(1, "tools/call", json!({"name": name, "arguments": {"message": "x"}})),
            )
            .await;
            assert_eq!(resp.error.unwrap().code, JsonRpcError::SERVER_NOT_INITIALIZED);
        }
        assert_eq!(executor.runs(), 0);
    }

    #[tokio::test]
    async fn test_initialize_advertises_canonical_version() {
        let d = dispatcher(CountingExecutor::new()).with_protocol_version("2024-11-05");
        let mut session = Session::new();
        let resp = reply(
            &d,
            &mut session,
            request(1, "initialize", json!({"protocolVersion": "1999-01-01"})),
        )
        .await;
        let result: InitializeResult = serde_json::from_value(resp.result.unwrap()).unwrap();
        assert_eq!(result.protocol_version, "2024-11-05");
        assert_eq!(result.server_info.name, "test-server");
        assert!(result.capabilities.tools.is_some());
        assert_eq!(session.client_protocol_version(), Some("1999-01-01"));
    }

    #[tokio::test]
    async fn test_initialize_accepts_missing_params() {
        let d = dispatcher(CountingExecutor::new());
        let mut session = Session::new();
        let msg = Message::Request(JsonRpcRequest::new(1i64, "initialize", None));
        let resp = reply(&d, &mut session, msg).await;
        assert!(!resp.is_error());
        assert!(session.is_initialized());
    }

    #[tokio::test]
    async fn test_initialized_notifications_get_no_reply() {
        let d = dispatcher(CountingExecutor::new());
        let mut session = initialized(&d).await;
        for method in [INITIALIZED, NOTIFICATIONS_INITIALIZED, "notifications/cancelled"] {
            let msg = Message::Notification(JsonRpcNotification::new(method, None));
            assert_eq!(d.dispatch(&mut session, msg).await, Outcome::NoReply);
        }
        assert!(!session.awaiting_initialized());
    }

    #[tokio::test]
    async fn test_list_tools_in_registration_order() {
        let d = dispatcher(CountingExecutor::new());
        let mut session = initialized(&d).await;
        let resp = reply(&d, &mut session, request(2, "tools/list", json!({}))).await;
        let result: ListToolsResult = serde_json::from_value(resp.result.unwrap()).unwrap();
        let names: Vec<_> = result.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["echo", "slow"]);
        assert_eq!(result.tools[0].required_fields(), vec!["message"]);
    }

    #[tokio::test]
    async fn test_unknown_method_names_the_method() {
        let d = dispatcher(CountingExecutor::new());
        let mut session = initialized(&d).await;
        let resp = reply(&d, &mut session, request(3, "prompts/list", json!({}))).await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, JsonRpcError::METHOD_NOT_FOUND);
        assert!(err.message.contains("prompts/list"));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let executor = CountingExecutor::new();
        let d = dispatcher(executor.clone());
        let mut session = initialized(&d).await;
        let resp = reply(&d, &mut session, request(4, "tools/call", json!({"name": "rm"}))).await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, JsonRpcError::METHOD_NOT_FOUND);
        assert!(err.message.contains("rm"));
        assert_eq!(executor.runs(), 0);
    }

    #[tokio::test]
    async fn test_missing_required_field_spawns_nothing() {
        let executor = CountingExecutor::new();
        let d = dispatcher(executor.clone());
        let mut session = initialized(&d).await;
        let resp = reply(
            &d,
            &mut session,
            request(5, "tools/call", json!({"name": "echo", "arguments": {}})),
        )
        .await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, JsonRpcError::INVALID_PARAMS);
        assert!(err.message.contains("message"));
        assert_eq!(err.data.unwrap()["field"], "message");
        assert_eq!(executor.runs(), 0);
    }

    #[tokio::test]
    async fn test_non_object_arguments() {
        let executor = CountingExecutor::new();
        let d = dispatcher(executor.clone());
        let mut session = initialized(&d).await;
        let resp = reply(
            &d,
            &mut session,
            request(6, "tools/call", json!({"name": "echo", "arguments": ["hello"]})),
        )
        .await;
        assert_eq!(resp.error.unwrap().code, JsonRpcError::INVALID_PARAMS);
        assert_eq!(executor.runs(), 0);
    }

    #[tokio::test]
    async fn test_successful_call() {
        let executor = CountingExecutor::new();
        let d = dispatcher(executor.clone()).with_working_dir("/tmp");
        let mut session = initialized(&d).await;
        let resp = reply(
            &d,
            &mut session,
            request(7, "tools/call", json!({"name": "echo", "arguments": {"message": "hello"}})),
        )
        .await;
        assert_eq!(resp.id, RequestId::Number(7));
        let result: CallToolResult = serde_json::from_value(resp.result.unwrap()).unwrap();
        assert!(!result.is_error());
        assert_eq!(result.exit_code, Some(0));
        assert!(result.stdout.unwrap().contains("hello"));

        let seen = executor.seen();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0.program, "echo");
        assert_eq!(seen[0].0.working_dir, Some(PathBuf::from("/tmp")));
        assert_eq!(seen[0].1, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_tool_timeout_overrides_default() {
        let executor = CountingExecutor::new();
        let d = dispatcher(executor.clone());
        let mut session = initialized(&d).await;
        reply(&d, &mut session, request(8, "tools/call", json!({"name": "slow"}))).await;
        assert_eq!(executor.seen()[0].1, Duration::from_secs(7));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_a_normal_result() {
        let d = dispatcher(CountingExecutor::exiting_with(2));
        let mut session = initialized(&d).await;
        let resp = reply(
            &d,
            &mut session,
            request(9, "tools/call", json!({"name": "echo", "arguments": {"message": "x"}})),
        )
        .await;
        assert!(!resp.is_error());
        let result: CallToolResult = serde_json::from_value(resp.result.unwrap()).unwrap();
        assert!(result.is_error());
        assert_eq!(result.exit_code, Some(2));
    }

    #[tokio::test]
    async fn test_timeout_is_execution_error() {
        let d = dispatcher(CountingExecutor::failing_with(ExecutionFailure::Timeout));
        let mut session = initialized(&d).await;
        let resp = reply(
            &d,
            &mut session,
            request(10, "tools/call", json!({"name": "echo", "arguments": {"message": "x"}})),
        )
        .await;
        let err = resp.error.unwrap();
        assert_eq!(err.code, JsonRpcError::EXECUTION_ERROR);
        let data = err.data.unwrap();
        assert_eq!(data["exitCode"], -1);
        assert_eq!(data["error"], "timeout");

        // The session stays usable.
        let resp = reply(&d, &mut session, request(11, "tools/list", json!({}))).await;
        assert!(!resp.is_error());
    }

    #[tokio::test]
    async fn test_responses_are_ignored() {
        let d = dispatcher(CountingExecutor::new());
        let mut session = initialized(&d).await;
        let msg = Message::Response(JsonRpcResponse::success(RequestId::Number(1), json!({})));
        assert_eq!(d.dispatch(&mut session, msg).await, Outcome::NoReply);
    }
}
