//! Tools command - list the tools a tool set exposes.

use anyhow::Result;
use clap::Args;
use console::style;

use droidkit_mcp::ToolInfo;

use super::Context;
use crate::toolsets::Toolset;

/// Arguments for the tools command.
#[derive(Args, Debug)]
pub struct ToolsArgs {
    /// Tool set to describe
    #[arg(value_enum)]
    pub toolset: Toolset,
}

/// Run the tools command.
pub async fn run(args: ToolsArgs, ctx: &Context) -> Result<()> {
    let registry = args.toolset.registry(ctx.config())?;
    let infos = registry.tool_infos();

    if ctx.json_output {
        println!("{}", serde_json::to_string_pretty(&infos)?);
        return Ok(());
    }

    if infos.is_empty() {
        println!("No tools defined for {}.", args.toolset.as_str());
        if args.toolset == Toolset::Custom {
            println!();
            println!("Define command tools with [[tools]] entries in droidkit.toml.");
        }
        return Ok(());
    }

    println!(
        "{} ({} tools)",
        style(args.toolset.server_name()).bold(),
        infos.len()
    );
    println!();
    for info in &infos {
        print_tool(info, ctx.verbose)?;
    }
    Ok(())
}

fn print_tool(info: &ToolInfo, verbose: bool) -> Result<()> {
    println!(
        "  {:<20} {}",
        style(&info.name).cyan(),
        info.description.as_deref().unwrap_or("")
    );

    let required = info.required_fields();
    if !required.is_empty() {
        println!("  {:<20} {} {}", "", style("requires:").dim(), required.join(", "));
    }

    if verbose && let Some(schema) = &info.input_schema {
        for line in serde_json::to_string_pretty(schema)?.lines() {
            println!("  {:<20} {}", "", style(line).dim());
        }
    }
    Ok(())
}
