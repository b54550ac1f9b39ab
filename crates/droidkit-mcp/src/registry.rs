//! Tool registry: descriptors, input schemas and the handler contract.
//!
//! A handler never runs anything itself. It turns validated arguments into a
//! [`CommandLine`] which the dispatcher hands to the process executor.
//! The registry is built once at startup and is read-only afterwards.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::error::{McpError, Result};
use crate::protocol::{Arguments, JsonRpcError, ToolInfo};

// ─────────────────────────────────────────────────────────────────────────────
// Schemas
// ─────────────────────────────────────────────────────────────────────────────

/// JSON type of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    /// Whether `value` has this type.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        };
        f.write_str(name)
    }
}

/// Schema of a single named parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertySchema {
    #[serde(rename = "type")]
    pub param_type: ParamType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Element schema for arrays.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<PropertySchema>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl PropertySchema {
    pub fn new(param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            param_type,
            description: Some(description.into()),
            items: None,
            default: None,
        }
    }

    pub fn string(description: impl Into<String>) -> Self {
        Self::new(ParamType::String, description)
    }

    pub fn integer(description: impl Into<String>) -> Self {
        Self::new(ParamType::Integer, description)
    }

    pub fn boolean(description: impl Into<String>) -> Self {
        Self::new(ParamType::Boolean, description)
    }

    /// An array of strings.
    pub fn string_array(description: impl Into<String>) -> Self {
        Self {
            items: Some(Box::new(Self {
                param_type: ParamType::String,
                description: None,
                items: None,
                default: None,
            })),
            ..Self::new(ParamType::Array, description)
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    fn check(&self, field: &str, value: &Value) -> std::result::Result<(), JsonRpcError> {
        if !self.param_type.accepts(value) {
            return Err(JsonRpcError::invalid_params(format!(
                "Invalid params: field '{field}' must be of type {}",
                self.param_type
            ))
            .with_data(serde_json::json!({ "field": field })));
        }
        if let (Some(items), Value::Array(elements)) = (&self.items, value) {
            for element in elements {
                items.check(field, element)?;
            }
        }
        Ok(())
    }
}

/// Object schema describing a tool's named parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSchema {
    #[serde(rename = "type")]
    pub schema_type: String,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertySchema>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
}

impl InputSchema {
    pub fn new() -> Self {
        Self {
            schema_type: "object".to_string(),
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }

    /// Add a required parameter.
    pub fn required(mut self, name: impl Into<String>, schema: PropertySchema) -> Self {
        let name = name.into();
        self.required.push(name.clone());
        self.properties.insert(name, schema);
        self
    }

    /// Add an optional parameter.
    pub fn optional(mut self, name: impl Into<String>, schema: PropertySchema) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    /// Check arguments against the schema.
    ///
    /// Every required field must be present and non-null; every declared field
    /// that is present must have the declared type. Undeclared extras pass.
    pub fn validate(&self, arguments: &Arguments) -> std::result::Result<(), JsonRpcError> {
        for field in &self.required {
            match arguments.get(field) {
                None | Some(Value::Null) => return Err(JsonRpcError::missing_field(field)),
                Some(_) => {}
            }
        }
        for (field, value) in arguments {
            if value.is_null() {
                continue;
            }
            if let Some(schema) = self.properties.get(field) {
                schema.check(field, value)?;
            }
        }
        Ok(())
    }
}

impl Default for InputSchema {
    fn default() -> Self {
        Self::new()
    }
}

/// The advertised signature of a callable tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: InputSchema) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    /// Wire representation for `tools/list`.
    pub fn to_info(&self) -> ToolInfo {
        ToolInfo {
            name: self.name.clone(),
            description: Some(self.description.clone()),
            input_schema: serde_json::to_value(&self.input_schema).ok(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Handler contract
// ─────────────────────────────────────────────────────────────────────────────

/// An external command ready to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Per-tool override of the server's default timeout.
    pub timeout: Option<Duration>,
    /// Indices into `args` that must never be logged.
    secret: Vec<usize>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            timeout: None,
            secret: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append an argument that is masked in [`CommandLine::redacted`].
    pub fn secret_arg(mut self, arg: impl Into<String>) -> Self {
        self.secret.push(self.args.len());
        self.args.push(arg.into());
        self
    }

    /// Mask an argument already in `args`.
    pub fn mark_secret(&mut self, index: usize) {
        if index < self.args.len() && !self.secret.contains(&index) {
            self.secret.push(index);
        }
    }

    pub fn is_secret(&self, index: usize) -> bool {
        self.secret.contains(&index)
    }

    /// Display form safe for logs: secret arguments are replaced by `***`.
    pub fn redacted(&self) -> Redacted<'_> {
        Redacted(self)
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Log rendering of a [`CommandLine`] with secret arguments masked.
#[derive(Debug, Clone, Copy)]
pub struct Redacted<'a>(&'a CommandLine);

impl fmt::Display for Redacted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.program)?;
        for (index, arg) in self.0.args.iter().enumerate() {
            if self.0.is_secret(index) {
                f.write_str(" ***")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Why a handler could not produce a command line.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ToolError {
    /// An argument passed schema validation but is still unusable.
    #[error("invalid argument '{field}': {reason}")]
    InvalidArgument { field: String, reason: String },

    /// The wrapped tool is not available on this host.
    #[error("{0}")]
    Unavailable(String),
}

impl ToolError {
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl From<ToolError> for JsonRpcError {
    fn from(err: ToolError) -> Self {
        match &err {
            ToolError::InvalidArgument { field, .. } => JsonRpcError::invalid_params(err.to_string())
                .with_data(serde_json::json!({ "field": field })),
            ToolError::Unavailable(_) => JsonRpcError::execution(err.to_string()),
        }
    }
}

/// Maps validated arguments to the command that implements a tool.
pub trait ToolHandler: Send + Sync {
    fn command(&self, arguments: &Arguments) -> std::result::Result<CommandLine, ToolError>;
}

impl<F> ToolHandler for F
where
    F: Fn(&Arguments) -> std::result::Result<CommandLine, ToolError> + Send + Sync,
{
    fn command(&self, arguments: &Arguments) -> std::result::Result<CommandLine, ToolError> {
        self(arguments)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// A descriptor together with its handler.
pub struct RegisteredTool {
    descriptor: ToolDescriptor,
    handler: Box<dyn ToolHandler>,
}

impl RegisteredTool {
    pub fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    pub fn handler(&self) -> &dyn ToolHandler {
        self.handler.as_ref()
    }
}

impl fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Immutable name → tool mapping, in registration order.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    /// Descriptors in registration order.
    pub fn list(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.iter().map(|t| &t.descriptor)
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn names(&self) -> Vec<&str> {
        self.list().map(|d| d.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Wire representation of every tool, for `tools/list`.
    pub fn tool_infos(&self) -> Vec<ToolInfo> {
        self.list().map(ToolDescriptor::to_info).collect()
    }
}

/// Collects tools before the registry is frozen.
#[derive(Default)]
pub struct ToolRegistryBuilder {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistryBuilder {
    /// Register a tool.
    ///
    /// Fails on an empty or duplicate name, or when the schema requires a
    /// parameter it does not declare.
    pub fn register(
        mut self,
        descriptor: ToolDescriptor,
        handler: impl ToolHandler + 'static,
    ) -> Result<Self> {
        if descriptor.name.trim().is_empty() {
            return Err(McpError::tool_error("tool name must not be empty"));
        }
        if self.index.contains_key(&descriptor.name) {
            return Err(McpError::tool_error(format!(
                "tool '{}' is registered twice",
                descriptor.name
            )));
        }
        if let Some(undeclared) = descriptor
            .input_schema
            .required
            .iter()
            .find(|field| !descriptor.input_schema.properties.contains_key(*field))
        {
            return Err(McpError::tool_error(format!(
                "tool '{}' requires undeclared parameter '{}'",
                descriptor.name, undeclared
            )));
        }

        self.index.insert(descriptor.name.clone(), self.tools.len());
        self.tools.push(RegisteredTool {
            descriptor,
            handler: Box::new(handler),
        });
        Ok(self)
    }

    pub fn build(self) -> ToolRegistry {
        ToolRegistry {
            tools: self.tools,
            index: self.index,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Argument helpers for handlers
// ─────────────────────────────────────────────────────────────────────────────

/// A non-empty string argument.
pub fn string_arg<'a>(arguments: &'a Arguments, key: &str) -> Option<&'a str> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// A string argument that must be present and non-empty.
pub fn require_string<'a>(
    arguments: &'a Arguments,
    key: &str,
) -> std::result::Result<&'a str, ToolError> {
    string_arg(arguments, key).ok_or_else(|| ToolError::invalid_argument(key, "must not be empty"))
}

/// A string, number or boolean argument rendered as text.
pub fn scalar_arg(arguments: &Arguments, key: &str) -> Option<String> {
    match arguments.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub fn bool_arg(arguments: &Arguments, key: &str) -> bool {
    arguments.get(key).and_then(Value::as_bool).unwrap_or(false)
}

/// An array-of-strings argument; absent means empty.
pub fn string_list_arg(
    arguments: &Arguments,
    key: &str,
) -> std::result::Result<Vec<String>, ToolError> {
    let Some(value) = arguments.get(key) else {
        return Ok(Vec::new());
    };
    let items = value
        .as_array()
        .ok_or_else(|| ToolError::invalid_argument(key, "must be an array of strings"))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_string)
                .ok_or_else(|| ToolError::invalid_argument(key, "must be an array of strings"))
        })
        .collect()
}
