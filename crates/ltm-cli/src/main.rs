//! ltm: command-line front end and MCP server for the long-term memory store.
//!
//! With no subcommand (or `serve`) the memory tools are served over MCP on stdio.
//! `ltm tool <name> '<json>'` runs a single tool and prints its result.

mod cli;
mod config;
mod mcp;
mod tools;

use crate::cli::{Cli, Commands};
use clap::Parser;
use ltm_memory::origin::OriginMapper;
use ltm_memory::MemorySubstrate;
use ltm_types::error::{LtmError, LtmResult};
use serde_json::Value;
use tracing::info;

/// Trace to stderr; stdout carries the MCP protocol.
fn init_tracing_stderr(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("ltm: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> LtmResult<()> {
    let config_path = config::resolve_config_path(cli.config.as_deref());
    let config = config::load_config(&config_path)?;
    init_tracing_stderr(&config.log_level);

    if let Some(Commands::Tools) = cli.command {
        for tool in tools::TOOLS {
            println!("{:<20} {}", tool.name, tool.description);
        }
        return Ok(());
    }

    let memory_dir = config::resolve_memory_dir(cli.memory_dir.as_deref(), &config, &config_path);
    let origins = OriginMapper::from_config(&config)?;
    let substrate = MemorySubstrate::open(&memory_dir, origins)?;
    info!(
        memory_dir = %substrate.memory_dir().display(),
        config = %config_path.display(),
        "ltm ready"
    );
    let ctx = tools::ToolContext::new(substrate, config, config_path);

    match cli.command {
        None | Some(Commands::Serve) => mcp::run_mcp_server(&ctx),
        Some(Commands::Tool { name, args }) => {
            let args: Value = match args.as_deref() {
                Some(raw) => serde_json::from_str(raw)
                    .map_err(|e| LtmError::InvalidInput(format!("arguments are not JSON: {e}")))?,
                None => Value::Null,
            };
            let result = tools::call_tool(&ctx, &name, args)?;
            let text = serde_json::to_string_pretty(&result)
                .map_err(|e| LtmError::Serialization(e.to_string()))?;
            println!("{text}");
            Ok(())
        }
        Some(Commands::Tools) => Ok(()),
    }
}
