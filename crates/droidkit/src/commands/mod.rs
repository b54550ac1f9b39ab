//! CLI command handlers.

use std::path::PathBuf;

use droidkit_config::{DroidkitConfig, LoadedConfig};

pub mod call;
pub mod config;
pub mod serve;
pub mod tools;

/// Shared context for all commands.
#[derive(Debug, Clone)]
pub struct Context {
    /// Resolved configuration and where it came from.
    pub loaded: LoadedConfig,
    /// Config file given with `--config`, if any.
    pub config_path: Option<PathBuf>,
    /// Output as JSON for scripting.
    pub json_output: bool,
    /// Verbose output enabled.
    pub verbose: bool,
}

impl Context {
    pub fn config(&self) -> &DroidkitConfig {
        &self.loaded.config
    }
}
