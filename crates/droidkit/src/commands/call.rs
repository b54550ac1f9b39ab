//! Call command - drive a stdio MCP server for a single tool call.
//!
//! Without a server command after `--`, droidkit spawns itself as
//! `droidkit serve <toolset>` and calls the tool there.

use std::time::Duration;

use anyhow::{Context as _, Result, anyhow, bail};
use clap::Args;
use console::style;
use serde_json::Value;
use tracing::{debug, warn};

use droidkit_mcp::{Arguments, McpClient, McpServerConfig};

use super::Context;
use crate::toolsets::Toolset;

/// Arguments for the call command.
#[derive(Args, Debug)]
pub struct CallArgs {
    /// Tool to call
    pub tool: String,

    /// String argument in KEY=VALUE format
    #[arg(long = "arg", short = 'a', value_name = "KEY=VALUE")]
    pub args: Vec<String>,

    /// JSON argument in KEY=JSON format (numbers, booleans, arrays)
    #[arg(long = "json-arg", value_name = "KEY=JSON")]
    pub json_args: Vec<String>,

    /// Built-in tool set to call when no server command is given
    #[arg(long, value_enum, default_value = "keytool")]
    pub toolset: Toolset,

    /// Seconds to wait for each response
    #[arg(long, default_value = "120")]
    pub timeout: u64,

    /// Server command and its arguments
    #[arg(last = true)]
    pub server: Vec<String>,
}

/// Run the call command.
pub async fn run(args: CallArgs, ctx: &Context) -> Result<()> {
    let arguments = parse_arguments(&args.args, &args.json_args)?;
    let config = server_config(&args, ctx)?.with_request_timeout(Duration::from_secs(args.timeout));
    let command = config.command.clone();

    let mut client = McpClient::connect_stdio(config)
        .with_context(|| format!("failed to start MCP server '{}'", command))?;
    let server = client.initialize()?.clone();
    debug!(server = %server.name, version = %server.version, "connected");

    let outcome = client.call_tool(&args.tool, arguments);
    if let Err(e) = client.shutdown() {
        warn!(error = %e, "server did not shut down cleanly");
    }
    let result = outcome?;

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        if ctx.verbose {
            println!("{} {}", style("Server:").dim(), server.name);
        }
        match result.text().filter(|t| !t.is_empty()) {
            Some(text) => println!("{}", text),
            None => print!("{}", result.stdout.as_deref().unwrap_or("")),
        }
    }

    if result.is_error() {
        bail!(
            "tool '{}' failed with exit code {}",
            args.tool,
            result
                .exit_code
                .map_or_else(|| "unknown".to_string(), |c| c.to_string())
        );
    }
    Ok(())
}

/// The explicit server command, or this binary serving the chosen tool set.
fn server_config(args: &CallArgs, ctx: &Context) -> Result<McpServerConfig> {
    if let Some((command, rest)) = args.server.split_first() {
        return Ok(McpServerConfig::new(command.clone(), command.clone()).with_args(rest.to_vec()));
    }

    let exe = std::env::current_exe().context("cannot locate the droidkit executable")?;
    let mut config = McpServerConfig::new(args.toolset.server_name(), exe.to_string_lossy());
    if let Some(path) = &ctx.config_path {
        config = config
            .with_arg("--config")
            .with_arg(path.to_string_lossy());
    }
    Ok(config.with_arg("serve").with_arg(args.toolset.as_str()))
}

/// Build tool arguments from `--arg` and `--json-arg` pairs.
fn parse_arguments(pairs: &[String], json_pairs: &[String]) -> Result<Arguments> {
    let mut arguments = Arguments::new();
    for pair in pairs {
        let (key, value) = split_pair(pair)?;
        arguments.insert(key.to_string(), Value::String(value.to_string()));
    }
    for pair in json_pairs {
        let (key, raw) = split_pair(pair)?;
        let value: Value = serde_json::from_str(raw)
            .with_context(|| format!("argument '{}' is not valid JSON", key))?;
        arguments.insert(key.to_string(), value);
    }
    Ok(arguments)
}

fn split_pair(pair: &str) -> Result<(&str, &str)> {
    match pair.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key, value)),
        _ => Err(anyhow!(
            "Invalid argument format: '{}'. Use KEY=VALUE.",
            pair
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_string_arguments() {
        let arguments = parse_arguments(
            &strings(&["keystore_path=/tmp/k.jks", "dname=CN=Test, O=Test"]),
            &[],
        )
        .unwrap();
        assert_eq!(arguments["keystore_path"], "/tmp/k.jks");
        // Only the first '=' separates key from value.
        assert_eq!(arguments["dname"], "CN=Test, O=Test");
    }

    #[test]
    fn test_parse_json_arguments() {
        let arguments = parse_arguments(
            &strings(&["validity=365"]),
            &strings(&["args=[\"-list\",\"-v\"]", "allow_resign=true"]),
        )
        .unwrap();
        assert_eq!(arguments["validity"], "365");
        assert_eq!(arguments["args"], json!(["-list", "-v"]));
        assert_eq!(arguments["allow_resign"], true);
    }

    #[test]
    fn test_parse_rejects_malformed_pairs() {
        assert!(parse_arguments(&strings(&["novalue"]), &[]).is_err());
        assert!(parse_arguments(&strings(&["=x"]), &[]).is_err());
        assert!(parse_arguments(&[], &strings(&["args=[oops"])).is_err());
    }
}
