//! Configuration types mapping to the TOML schema.
//!
//! Top-level config:
//! ```toml
//! [server]                 # protocol version, default timeout, working dir
//! [logging]                # rolling file log
//! [keytool]                # keytool tool set
//! [signer]                 # uber-apk-signer tool set
//! [[tools]]                # config-defined command tools
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Protocol version advertised when none is configured.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

/// Environment variable that overrides `[signer] jar_path`.
pub const SIGNER_JAR_ENV: &str = "UBER_APK_SIGNER_JAR_PATH";

// ─────────────────────────────────────────────────────────────────────────────
// Top-level Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root configuration structure.
///
/// All sections are optional so that partial configs (e.g. project-local
/// overrides) can be loaded and merged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DroidkitConfig {
    /// Server settings shared by every tool set.
    pub server: Option<ServerConfig>,

    /// Log output settings.
    pub logging: Option<LoggingConfig>,

    /// keytool tool set.
    pub keytool: Option<KeytoolConfig>,

    /// uber-apk-signer tool set.
    pub signer: Option<SignerConfig>,

    /// Config-defined command tools (`[[tools]]`).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolEntry>,
}

impl DroidkitConfig {
    /// Create an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> crate::Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> crate::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Merge another config on top of this one (other takes priority).
    ///
    /// Sections are replaced whole. Tools are merged by name: a later entry
    /// replaces an earlier one with the same name, new names are appended.
    pub fn merge(&mut self, other: DroidkitConfig) {
        if other.server.is_some() {
            self.server = other.server;
        }

        if other.logging.is_some() {
            self.logging = other.logging;
        }

        if other.keytool.is_some() {
            self.keytool = other.keytool;
        }

        if other.signer.is_some() {
            self.signer = other.signer;
        }

        for tool in other.tools {
            match self.tools.iter_mut().find(|t| t.name == tool.name) {
                Some(existing) => *existing = tool,
                None => self.tools.push(tool),
            }
        }
    }

    /// Effective server settings.
    pub fn server(&self) -> ServerConfig {
        self.server.clone().unwrap_or_default()
    }

    /// Effective logging settings.
    pub fn logging(&self) -> LoggingConfig {
        self.logging.clone().unwrap_or_default()
    }

    /// Effective keytool settings.
    pub fn keytool(&self) -> KeytoolConfig {
        self.keytool.clone().unwrap_or_default()
    }

    /// Effective signer settings.
    pub fn signer(&self) -> SignerConfig {
        self.signer.clone().unwrap_or_default()
    }

    /// Check every `[[tools]]` entry.
    pub fn validate_tools(&self) -> crate::Result<()> {
        let mut seen = HashSet::new();
        for tool in &self.tools {
            tool.validate()?;
            if !seen.insert(tool.name.as_str()) {
                return Err(ConfigError::invalid_tool(&tool.name, "defined more than once"));
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Server Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Canonical protocol version advertised in `initialize`.
    pub protocol_version: String,
    /// Timeout for tools without their own, in seconds.
    pub default_timeout_secs: u64,
    /// Default working directory for subprocesses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            protocol_version: DEFAULT_PROTOCOL_VERSION.to_string(),
            default_timeout_secs: 60,
            working_dir: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Logging configuration section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Write a daily rolling JSON log file.
    pub file: bool,
    /// Default level filter when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for log files; defaults to `<config dir>/logs`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: true,
            level: "info".to_string(),
            directory: None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tool set Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// keytool tool set settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeytoolConfig {
    /// keytool executable.
    pub binary: String,
    pub timeout_secs: u64,
}

impl Default for KeytoolConfig {
    fn default() -> Self {
        Self {
            binary: "keytool".to_string(),
            timeout_secs: 60,
        }
    }
}

/// uber-apk-signer tool set settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignerConfig {
    /// Java executable used to run the jar.
    pub java: String,
    /// Location of `uber-apk-signer.jar`.
    pub jar_path: PathBuf,
    pub timeout_secs: u64,
}

impl Default for SignerConfig {
    fn default() -> Self {
        Self {
            java: "java".to_string(),
            jar_path: PathBuf::from("/usr/local/bin/uber-apk-signer.jar"),
            timeout_secs: 120,
        }
    }
}

impl SignerConfig {
    /// Jar path after applying the `UBER_APK_SIGNER_JAR_PATH` override.
    pub fn resolved_jar_path(&self) -> PathBuf {
        match std::env::var(SIGNER_JAR_ENV) {
            Ok(path) if !path.is_empty() => PathBuf::from(path),
            _ => self.jar_path.clone(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Config-defined tools
// ─────────────────────────────────────────────────────────────────────────────

/// A command tool defined in config.
///
/// ```toml
/// [[tools]]
/// name = "apktool_decode"
/// description = "Decode an APK"
/// command = "apktool"
/// args = ["d", "{apk_path}", ["-o", "{output_dir}"], "-f"]
///
/// [tools.parameters.apk_path]
/// type = "string"
/// required = true
///
/// [tools.parameters.output_dir]
/// type = "string"
/// ```
///
/// A nested array is a group: it is dropped as a unit when any placeholder
/// in it has no value, so a flag goes away together with its operand.
/// Arguments that use a parameter marked `secret = true` are masked in logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Program to run.
    pub command: String,
    /// Argument templates; `{param}` is replaced by the argument value.
    #[serde(default)]
    pub args: Vec<ArgTemplate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables for the command.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterEntry>,
}

impl ToolEntry {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            command: command.into(),
            args: Vec::new(),
            timeout_secs: None,
            working_dir: None,
            env: BTreeMap::new(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(ArgTemplate::Single(arg.into()));
        self
    }

    pub fn with_arg_group<I, S>(mut self, group: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args
            .push(ArgTemplate::Group(group.into_iter().map(Into::into).collect()));
        self
    }

    pub fn with_parameter(mut self, name: impl Into<String>, parameter: ParameterEntry) -> Self {
        self.parameters.insert(name.into(), parameter);
        self
    }

    /// Check the entry is usable: names set, every placeholder declared.
    pub fn validate(&self) -> crate::Result<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::invalid_tool("<unnamed>", "name must not be empty"));
        }
        if self.command.trim().is_empty() {
            return Err(ConfigError::invalid_tool(&self.name, "command must not be empty"));
        }
        for arg in &self.args {
            for placeholder in arg.placeholders() {
                if !self.parameters.contains_key(placeholder) {
                    return Err(ConfigError::invalid_tool(
                        &self.name,
                        format!("argument '{arg}' references undeclared parameter '{placeholder}'"),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// One entry of a tool's `args`: a single argument or a group kept together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgTemplate {
    Single(String),
    Group(Vec<String>),
}

impl ArgTemplate {
    /// The argument templates in this entry, in argv order.
    pub fn parts(&self) -> &[String] {
        match self {
            Self::Single(arg) => std::slice::from_ref(arg),
            Self::Group(args) => args,
        }
    }

    pub fn placeholders(&self) -> Vec<&str> {
        self.parts().iter().flat_map(|p| placeholders(p)).collect()
    }
}

impl std::fmt::Display for ArgTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Single(arg) => f.write_str(arg),
            Self::Group(args) => write!(f, "[{}]", args.join(" ")),
        }
    }
}

/// JSON type of a config-defined parameter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    #[default]
    String,
    Integer,
    Number,
    Boolean,
}

/// One parameter of a config-defined tool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParameterEntry {
    #[serde(rename = "type")]
    pub kind: ParameterKind,
    pub description: String,
    pub required: bool,
    /// Value used when the argument is absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Arguments rendered from this parameter are masked in logs.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub secret: bool,
}

impl ParameterEntry {
    pub fn required(kind: ParameterKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
            required: true,
            default: None,
            secret: false,
        }
    }

    pub fn optional(kind: ParameterKind, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(kind, description)
        }
    }
}

/// Names of the `{placeholder}`s in an argument template, in order.
///
/// Only `{` followed by identifier characters and `}` counts; other braces
/// are literal text.
pub fn placeholders(template: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if is_identifier(&after[..close]) => {
                found.push(&after[..close]);
                rest = &after[close + 1..];
            }
            _ => rest = after,
        }
    }
    found
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
