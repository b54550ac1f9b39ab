//! Built-in tool sets.
//!
//! Each tool set is a fixed registry plus the server identity it announces
//! in `initialize`.

use anyhow::Result;
use clap::ValueEnum;

use droidkit_config::DroidkitConfig;
use droidkit_mcp::{ServerInfo, ToolRegistry};

pub mod custom;
pub mod keytool;
pub mod signer;

/// A tool set `droidkit serve` can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Toolset {
    /// Java keytool: keystores and certificates
    Keytool,
    /// uber-apk-signer: sign and verify APKs
    Signer,
    /// Command tools defined under `[[tools]]` in config
    Custom,
}

impl Toolset {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Keytool => "keytool",
            Self::Signer => "signer",
            Self::Custom => "custom",
        }
    }

    /// Name announced in `serverInfo`.
    pub fn server_name(self) -> &'static str {
        match self {
            Self::Keytool => "keytool-mcp-server",
            Self::Signer => "uber-apk-signer-mcp-server",
            Self::Custom => "droidkit-mcp-server",
        }
    }

    pub fn server_info(self) -> ServerInfo {
        ServerInfo::new(self.server_name(), env!("CARGO_PKG_VERSION"))
    }

    /// Build the registry for this tool set from config.
    pub fn registry(self, config: &DroidkitConfig) -> Result<ToolRegistry> {
        match self {
            Self::Keytool => keytool::registry(&config.keytool()),
            Self::Signer => signer::registry(&config.signer()),
            Self::Custom => custom::registry(&config.tools),
        }
    }
}
