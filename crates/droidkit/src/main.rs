//! droidkit - MCP stdio servers for Android APK tooling
//!
//! Main entry point for the droidkit CLI.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::warn;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};

use droidkit_config::{ConfigSource, LoadedConfig, LoggingConfig};

mod commands;
mod toolsets;

use commands::{call, config, serve, tools};

// ─────────────────────────────────────────────────────────────────────────────
// CLI Structure
// ─────────────────────────────────────────────────────────────────────────────

/// droidkit - MCP stdio servers for Android APK tooling
#[derive(Parser)]
#[command(name = "droidkit")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output as JSON (for scripting)
    #[arg(long, global = true)]
    pub json: bool,

    /// Load this config file instead of discovering one
    #[arg(long, global = true, env = "DROIDKIT_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve a tool set as an MCP server over stdin/stdout
    Serve(serve::ServeArgs),

    /// List the tools a tool set exposes
    Tools(tools::ToolsArgs),

    /// Call one tool on a stdio MCP server
    Call(call::CallArgs),

    /// Configuration management
    Config(config::ConfigArgs),
}

// ─────────────────────────────────────────────────────────────────────────────
// Main
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let loaded = load(cli.config.as_deref())?;
    let _guard = init_logging(cli.verbose, &loaded.config.logging());

    for warning in &loaded.warnings {
        warn!("{}", warning);
    }

    let ctx = commands::Context {
        loaded,
        config_path: cli.config,
        json_output: cli.json,
        verbose: cli.verbose,
    };

    match cli.command {
        Commands::Serve(args) => serve::run(args, &ctx).await,
        Commands::Tools(args) => tools::run(args, &ctx).await,
        Commands::Call(args) => call::run(args, &ctx).await,
        Commands::Config(args) => config::run(args, &ctx).await,
    }
}

/// Resolve configuration: an explicit file, or the discovered layers.
fn load(path: Option<&Path>) -> Result<LoadedConfig> {
    let Some(path) = path else {
        return Ok(droidkit_config::load_config(None)?);
    };

    let config = droidkit_config::load_config_file(path)?;
    let warnings = config
        .validate_tools()
        .err()
        .map(|e| vec![e.to_string()])
        .unwrap_or_default();
    Ok(LoadedConfig {
        config,
        sources: vec![ConfigSource {
            path: path.to_path_buf(),
            loaded: true,
        }],
        warnings,
    })
}

/// Console logs go to stderr; stdout belongs to the protocol.
///
/// `RUST_LOG` wins over `--verbose` and the configured level. The rolling JSON
/// file is optional and its failure to open only costs the file layer.
fn init_logging(verbose: bool, logging: &LoggingConfig) -> Option<WorkerGuard> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};

    let level = if verbose { "debug" } else { logging.level.as_str() };
    let console_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "droidkit={level},droidkit_mcp={level},droidkit_config={level},warn"
        ))
    });

    let mut file_error = None;
    let file_writer = if logging.file {
        match log_dir(logging) {
            Some(dir) => match RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("droidkit")
                .filename_suffix("log")
                .build(&dir)
            {
                Ok(appender) => Some(tracing_appender::non_blocking(appender)),
                Err(e) => {
                    file_error = Some(format!("file logging disabled ({}): {}", dir.display(), e));
                    None
                }
            },
            None => None,
        }
    } else {
        None
    };
    let (file_writer, guard) = match file_writer {
        Some((writer, guard)) => (Some(writer), Some(guard)),
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_filter(console_filter),
        )
        .with(file_writer.map(|writer| {
            fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(EnvFilter::new(
                    "droidkit=trace,droidkit_mcp=trace,droidkit_config=trace,info",
                ))
        }))
        .init();

    if let Some(message) = file_error {
        warn!("{}", message);
    }

    guard
}

fn log_dir(logging: &LoggingConfig) -> Option<PathBuf> {
    logging
        .directory
        .clone()
        .or_else(droidkit_config::default_log_dir)
}
