//! Serve command - run a tool set as an MCP stdio server.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Args;
use tracing::info;

use droidkit_mcp::McpServer;

use super::Context;
use crate::toolsets::Toolset;

/// Arguments for the serve command.
#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Tool set to expose
    #[arg(value_enum)]
    pub toolset: Toolset,

    /// Timeout in seconds for tools without their own
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Working directory for commands that do not set one
    #[arg(long)]
    pub working_dir: Option<PathBuf>,
}

/// Run the serve command until stdin closes.
pub async fn run(args: ServeArgs, ctx: &Context) -> Result<()> {
    let server_config = ctx.config().server();
    let registry = args.toolset.registry(ctx.config())?;
    let default_timeout =
        Duration::from_secs(args.timeout.unwrap_or(server_config.default_timeout_secs));

    info!(
        server = args.toolset.server_name(),
        tools = registry.len(),
        protocol_version = %server_config.protocol_version,
        "Starting MCP server on stdio"
    );

    let mut server = McpServer::new(registry, args.toolset.server_info())
        .with_protocol_version(server_config.protocol_version)
        .with_default_timeout(default_timeout);
    if let Some(dir) = args.working_dir.or(server_config.working_dir) {
        server = server.with_working_dir(dir);
    }

    server.serve_stdio().await?;
    info!("stdin closed, server stopped");
    Ok(())
}
