//! Shared fixtures for in-crate tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::executor::{ExecutionFailure, ExecutionResult, Executor};
use crate::protocol::Arguments;
use crate::registry::{
    CommandLine, InputSchema, PropertySchema, ToolDescriptor, ToolError, ToolRegistry,
    require_string,
};

/// Executor that records every command instead of spawning it.
#[derive(Clone, Default)]
pub struct CountingExecutor {
    runs: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<(CommandLine, Duration)>>>,
    outcome: Option<ExecutionFailure>,
    exit_code: i32,
}

impl CountingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every run exits with `code`.
    pub fn exiting_with(code: i32) -> Self {
        Self {
            exit_code: code,
            ..Self::default()
        }
    }

    /// Every run fails with `failure`.
    pub fn failing_with(failure: ExecutionFailure) -> Self {
        Self {
            outcome: Some(failure),
            ..Self::default()
        }
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<(CommandLine, Duration)> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl Executor for CountingExecutor {
    async fn run(&self, command: &CommandLine, timeout: Duration) -> ExecutionResult {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push((command.clone(), timeout));

        let (exit_code, message) = match self.outcome {
            Some(ExecutionFailure::Timeout) => (
                crate::executor::TIMEOUT_EXIT_CODE,
                Some(crate::executor::timeout_message(timeout)),
            ),
            Some(ExecutionFailure::SpawnFailure) => (
                crate::executor::SPAWN_FAILURE_EXIT_CODE,
                Some("Failed to execute command: not found".to_string()),
            ),
            None => (self.exit_code, None),
        };

        ExecutionResult {
            exit_code,
            stdout: format!("{}\n", command.args.join(" ")),
            stderr: String::new(),
            elapsed: Duration::from_millis(5),
            error: self.outcome,
            command: command.to_string(),
            message,
            pid: None,
        }
    }
}

/// Registry with one `echo` tool requiring `message`.
pub fn echo_registry() -> ToolRegistry {
    ToolRegistry::builder()
        .register(
            ToolDescriptor::new(
                "echo",
                "Print a message",
                InputSchema::new().required("message", PropertySchema::string("Text to print")),
            ),
            |arguments: &Arguments| -> Result<CommandLine, ToolError> {
                Ok(CommandLine::new("echo").arg(require_string(arguments, "message")?))
            },
        )
        .and_then(|builder| {
            builder.register(
                ToolDescriptor::new("slow", "Sleep briefly", InputSchema::new()),
                |_: &Arguments| -> Result<CommandLine, ToolError> {
                    Ok(CommandLine::new("sleep").arg("1").timeout(Duration::from_secs(7)))
                },
            )
        })
        .map(|builder| builder.build())
        .expect("fixture registry")
}
