//! Command tools defined under `[[tools]]` in config.
//!
//! Each entry becomes a descriptor whose schema comes from its parameters and
//! a handler that renders the entry's `{placeholder}` argument templates.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde_json::Value;

use droidkit_config::{ArgTemplate, ParameterEntry, ParameterKind, ToolEntry, placeholders};
use droidkit_mcp::{
    Arguments, CommandLine, InputSchema, ParamType, PropertySchema, ToolDescriptor, ToolError,
    ToolHandler, ToolRegistry, scalar_arg,
};

pub fn registry(tools: &[ToolEntry]) -> Result<ToolRegistry> {
    let mut builder = ToolRegistry::builder();
    for entry in tools {
        entry.validate()?;
        builder = builder.register(descriptor(entry), TemplateTool::from(entry))?;
    }
    Ok(builder.build())
}

fn descriptor(entry: &ToolEntry) -> ToolDescriptor {
    let mut schema = InputSchema::new();
    for (name, parameter) in &entry.parameters {
        let mut property = PropertySchema::new(param_type(parameter.kind), &parameter.description);
        if parameter.description.is_empty() {
            property.description = None;
        }
        if let Some(default) = &parameter.default {
            property = property.with_default(default_value(parameter.kind, default));
        }
        schema = if parameter.required {
            schema.required(name, property)
        } else {
            schema.optional(name, property)
        };
    }

    let description = if entry.description.is_empty() {
        format!("Run {}", entry.command)
    } else {
        entry.description.clone()
    };
    ToolDescriptor::new(&entry.name, description, schema)
}

fn param_type(kind: ParameterKind) -> ParamType {
    match kind {
        ParameterKind::String => ParamType::String,
        ParameterKind::Integer => ParamType::Integer,
        ParameterKind::Number => ParamType::Number,
        ParameterKind::Boolean => ParamType::Boolean,
    }
}

/// Advertise a default with the parameter's JSON type when it parses as one.
fn default_value(kind: ParameterKind, default: &str) -> Value {
    let typed = match kind {
        ParameterKind::String => None,
        ParameterKind::Integer => default.parse::<i64>().ok().map(Value::from),
        ParameterKind::Number => default.parse::<f64>().ok().map(Value::from),
        ParameterKind::Boolean => default.parse::<bool>().ok().map(Value::from),
    };
    typed.unwrap_or_else(|| Value::String(default.to_string()))
}

/// Handler rendering a config entry into a command line.
#[derive(Debug, Clone)]
struct TemplateTool {
    command: String,
    args: Vec<ArgTemplate>,
    parameters: BTreeMap<String, ParameterEntry>,
    working_dir: Option<PathBuf>,
    env: BTreeMap<String, String>,
    timeout: Option<Duration>,
}

impl From<&ToolEntry> for TemplateTool {
    fn from(entry: &ToolEntry) -> Self {
        Self {
            command: entry.command.clone(),
            args: entry.args.clone(),
            parameters: entry.parameters.clone(),
            working_dir: entry.working_dir.clone(),
            env: entry.env.clone(),
            timeout: entry.timeout_secs.map(Duration::from_secs),
        }
    }
}

impl TemplateTool {
    /// Argument value as text, falling back to the parameter's default.
    fn value(&self, name: &str, arguments: &Arguments) -> Result<Option<String>, ToolError> {
        if let Some(value) = scalar_arg(arguments, name) {
            return Ok(Some(value));
        }
        let parameter = self.parameters.get(name);
        if let Some(default) = parameter.and_then(|p| p.default.clone()) {
            return Ok(Some(default));
        }
        if parameter.is_some_and(|p| p.required) {
            return Err(ToolError::invalid_argument(name, "must not be empty"));
        }
        Ok(None)
    }

    /// Whether an argument template uses any secret parameter.
    fn is_secret(&self, part: &str) -> bool {
        placeholders(part)
            .into_iter()
            .any(|name| self.parameters.get(name).is_some_and(|p| p.secret))
    }

    /// Render one template entry; `None` when a placeholder has no value.
    fn expand(
        &self,
        template: &ArgTemplate,
        arguments: &Arguments,
    ) -> Result<Option<Vec<String>>, ToolError> {
        let mut values = BTreeMap::new();
        for name in template.placeholders() {
            match self.value(name, arguments)? {
                Some(value) => {
                    values.insert(name, value);
                }
                None => return Ok(None),
            }
        }
        Ok(Some(
            template
                .parts()
                .iter()
                .map(|part| substitute(part, &values))
                .collect(),
        ))
    }
}

impl ToolHandler for TemplateTool {
    fn command(&self, arguments: &Arguments) -> Result<CommandLine, ToolError> {
        let mut cmd = CommandLine::new(&self.command);
        for template in &self.args {
            let Some(parts) = self.expand(template, arguments)? else {
                continue;
            };
            for (part, value) in template.parts().iter().zip(parts) {
                cmd = if self.is_secret(part) {
                    cmd.secret_arg(value)
                } else {
                    cmd.arg(value)
                };
            }
        }
        if let Some(dir) = &self.working_dir {
            cmd = cmd.current_dir(dir);
        }
        for (key, value) in &self.env {
            cmd = cmd.env_var(key, value);
        }
        if let Some(timeout) = self.timeout {
            cmd = cmd.timeout(timeout);
        }
        Ok(cmd)
    }
}

/// Replace each `{name}` in `template` in a single pass.
///
/// Values are inserted verbatim, so a value that itself looks like a
/// placeholder is not expanded again.
fn substitute(template: &str, values: &BTreeMap<&str, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        let found = after
            .find('}')
            .and_then(|close| values.get_key_value(&after[..close]));
        match found {
            Some((name, value)) => {
                out.push_str(&rest[..open]);
                out.push_str(value);
                rest = &after[name.len() + 1..];
            }
            None => {
                out.push_str(&rest[..=open]);
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
