//! Configuration system for droidkit.
//!
//! Provides TOML-based configuration with:
//! - Server settings (protocol version, default timeout, working directory)
//! - Per-tool-set sections (`[keytool]`, `[signer]`)
//! - Command tools defined in config (`[[tools]]`)
//! - Config file layering (XDG user config + project-local overrides)

pub mod discovery;
pub mod error;
pub mod types;

pub use discovery::{
    ConfigSource, LoadedConfig, default_log_dir, load_config, load_config_file,
    load_config_with_options, xdg_config_dir, xdg_config_path,
};
pub use error::{ConfigError, Result};
pub use types::*;
