//! Integration tests for the stdio server and client.
//!
//! These tests spawn the mock MCP server binary and drive it through the real
//! client, covering the full protocol flow end to end.

use std::time::{Duration, Instant};

use droidkit_mcp::{Arguments, JsonRpcError, McpClient, McpError, McpServerConfig, RequestId};
use serde_json::{Value, json};

fn mock_server_path() -> String {
    env!("CARGO_BIN_EXE_mock-mcp-server").to_string()
}

fn connect(args: &[&str]) -> McpClient {
    let config = McpServerConfig::new("mock", mock_server_path())
        .with_args(args.iter().map(|s| s.to_string()).collect())
        .with_request_timeout(Duration::from_secs(20));
    McpClient::connect_stdio(config).expect("Failed to connect")
}

fn connected() -> McpClient {
    let mut client = connect(&[]);
    client.initialize().expect("Failed to initialize");
    client
}

fn arguments(value: Value) -> Arguments {
    value.as_object().cloned().unwrap_or_default()
}

#[test]
fn test_lifecycle_scenario() {
    let client = connect(&[]);

    // Before the handshake only `initialize` is accepted.
    let id = client.send_request("tools/list", None).unwrap();
    let resp = client.await_response(&id, Duration::from_secs(10)).unwrap();
    assert_eq!(resp.error.unwrap().code, JsonRpcError::SERVER_NOT_INITIALIZED);

    let mut client = client;
    let info = client.initialize().expect("Failed to initialize");
    assert_eq!(info.name, "mock-mcp-server");
    assert!(client.is_initialized());
    assert_eq!(client.protocol_version(), Some("2024-11-05"));

    let names: Vec<String> = client
        .list_tools()
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(names, vec!["echo", "fail", "sleep", "missing"]);

    client.shutdown().unwrap();
    assert!(!client.is_connected());
}

#[test]
fn test_server_name_is_configurable() {
    let mut client = connect(&["--name", "keytool-mcp-server"]);
    assert_eq!(client.initialize().unwrap().name, "keytool-mcp-server");
}

#[test]
fn test_echo_scenario() {
    let client = connected();
    let result = client
        .call_tool("echo", arguments(json!({"message": "hello"})))
        .expect("Failed to call tool");

    assert!(!result.is_error());
    assert_eq!(result.exit_code, Some(0));
    assert!(result.stdout.as_deref().unwrap().contains("hello"));
    assert_eq!(result.command.as_deref(), Some("echo hello"));
    let text = result.text().unwrap();
    assert!(text.starts_with("Command: echo hello"));
    assert!(text.contains("Exit Code: 0"));
}

#[test]
fn test_nonzero_exit_is_a_result() {
    let client = connected();
    let result = client.call_tool("fail", Arguments::new()).unwrap();

    assert!(result.is_error());
    assert_eq!(result.exit_code, Some(3));
    assert_eq!(result.stdout.as_deref(), Some("partial\n"));
    assert_eq!(result.stderr.as_deref(), Some("boom\n"));
}

#[test]
fn test_missing_argument_is_invalid_params() {
    let client = connected();
    let err = client.call_tool("echo", Arguments::new()).unwrap_err();
    match err {
        McpError::ServerError { code, message, .. } => {
            assert_eq!(code, JsonRpcError::INVALID_PARAMS);
            assert!(message.contains("message"));
        }
        other => panic!("expected server error, got {other:?}"),
    }
}

#[test]
fn test_unknown_tool() {
    let client = connected();
    let err = client.call_tool("rm", Arguments::new()).unwrap_err();
    assert_eq!(err.code(), Some(JsonRpcError::METHOD_NOT_FOUND));
}

#[test]
fn test_spawn_failure_is_execution_error() {
    let client = connected();
    let err = client.call_tool("missing", Arguments::new()).unwrap_err();
    match err {
        McpError::ServerError { code, data, .. } => {
            assert_eq!(code, JsonRpcError::EXECUTION_ERROR);
            let data = data.unwrap();
            assert_eq!(data["exitCode"], -2);
            assert_eq!(data["error"], "spawn-failure");
        }
        other => panic!("expected server error, got {other:?}"),
    }
}

#[test]
fn test_timeout_kills_command_and_server_keeps_going() {
    let mut client = connect(&["--timeout-ms", "300"]);
    client.initialize().unwrap();

    let started = Instant::now();
    let err = client
        .call_tool("sleep", arguments(json!({"seconds": 30})))
        .unwrap_err();
    assert!(started.elapsed() < Duration::from_secs(10));
    match err {
        McpError::ServerError { code, message, data } => {
            assert_eq!(code, JsonRpcError::EXECUTION_ERROR);
            assert!(message.contains("timed out"));
            let data = data.unwrap();
            assert_eq!(data["exitCode"], -1);
            assert_eq!(data["error"], "timeout");
        }
        other => panic!("expected server error, got {other:?}"),
    }

    // Still initialized and answering.
    let result = client
        .call_tool("echo", arguments(json!({"message": "after"})))
        .unwrap();
    assert!(!result.is_error());
}

#[test]
fn test_responses_awaited_out_of_order() {
    let client = connected();

    let slow = client
        .send_request(
            "tools/call",
            Some(json!({"name": "sleep", "arguments": {"seconds": 1}})),
        )
        .unwrap();
    let fast = client
        .send_request(
            "tools/call",
            Some(json!({"name": "echo", "arguments": {"message": "second"}})),
        )
        .unwrap();

    // Claim the later id first; the earlier response must stay available.
    let second = client.await_response(&fast, Duration::from_secs(20)).unwrap();
    assert_eq!(second.id, fast);
    assert!(second.result.unwrap()["stdout"].as_str().unwrap().contains("second"));

    let first = client.await_response(&slow, Duration::from_secs(20)).unwrap();
    assert_eq!(first.id, slow);
    assert_eq!(first.result.unwrap()["exitCode"], 0);
}

#[test]
fn test_await_timeout_is_not_fatal() {
    let client = connected();
    let id = client
        .send_request(
            "tools/call",
            Some(json!({"name": "sleep", "arguments": {"seconds": 1}})),
        )
        .unwrap();

    let err = client.await_response(&id, Duration::from_millis(50)).unwrap_err();
    assert!(matches!(err, McpError::Timeout));

    // The late response is still delivered to a later wait.
    let resp = client.await_response(&id, Duration::from_secs(20)).unwrap();
    assert_eq!(resp.id, id);
}

#[test]
fn test_unanswered_id_times_out() {
    let client = connected();
    let err = client
        .await_response(&RequestId::Number(999), Duration::from_millis(100))
        .unwrap_err();
    assert!(matches!(err, McpError::Timeout));
}

#[test]
fn test_concurrent_requests_from_threads() {
    let client = connected();
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|n| {
                let client = &client;
                scope.spawn(move || {
                    let result = client
                        .call_tool("echo", arguments(json!({"message": format!("msg-{n}")})))
                        .unwrap();
                    (n, result.stdout.unwrap())
                })
            })
            .collect();
        for handle in handles {
            let (n, stdout) = handle.join().unwrap();
            assert_eq!(stdout, format!("msg-{n}\n"));
        }
    });
}

#[test]
fn test_raw_parse_error_with_id_is_answered() {
    // Drive the server directly with malformed input over stdin.
    use std::io::{BufRead, BufReader, Write};
    use std::process::{Command, Stdio};

    let mut child = Command::new(mock_server_path())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    let mut stdin = child.stdin.take().unwrap();
    let mut stdout = BufReader::new(child.stdout.take().unwrap());

    writeln!(stdin, "garbage without an id").unwrap();
    writeln!(stdin).unwrap();
    writeln!(stdin, r#"{{"jsonrpc":"2.0","id":41,"method":"tools/list""#).unwrap();
    writeln!(stdin, r#"{{"jsonrpc":"2.0","id":42,"method":"initialize","params":{{}}}}"#).unwrap();
    drop(stdin);

    let mut lines = Vec::new();
    let mut line = String::new();
    while stdout.read_line(&mut line).unwrap() > 0 {
        lines.push(serde_json::from_str::<Value>(&line).unwrap());
        line.clear();
    }
    assert!(child.wait().unwrap().success());

    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["id"], 41);
    assert_eq!(lines[0]["error"]["code"], JsonRpcError::PARSE_ERROR);
    assert_eq!(lines[1]["id"], 42);
    assert_eq!(lines[1]["result"]["serverInfo"]["name"], "mock-mcp-server");
}
