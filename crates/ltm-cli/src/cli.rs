//! Clap CLI definitions for ltm.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  ltm                                         Serve the memory tools over MCP (stdio)
  ltm tools                                   List the available tools
  ltm tool get_tags                           Show every tag with its usage count
  ltm tool query_memories '{\"tags\":[\"rust\"]}'   Rank memories by tag overlap
  ltm tool add_origin '{\"name\":\"proj\",\"path\":\"~/src/proj\"}'

\x1b[1;36mEnvironment:\x1b[0m
  LTM_CONFIG   Config file (default ~/.ltm/config.toml)
  LTM_PATH     Memory directory (default ~/.ltm/memories)
  RUST_LOG     Log filter, overrides log_level from the config";

/// ltm: long-term memories as markdown files, indexed in SQLite and queried by tag.
#[derive(Parser)]
#[command(name = "ltm", version, about, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to the config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Memory directory (overrides the config and LTM_PATH).
    #[arg(long, global = true)]
    pub memory_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the memory tools over MCP (JSON-RPC 2.0 on stdio). The default.
    Serve,
    /// Invoke a single tool and print its JSON result.
    Tool {
        /// Tool name, e.g. `store_memory`.
        name: String,
        /// Tool arguments as a JSON object.
        args: Option<String>,
    },
    /// List the available tools.
    Tools,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_is_none() {
        let cli = Cli::try_parse_from(["ltm"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_tool_subcommand() {
        let cli = Cli::try_parse_from([
            "ltm",
            "--memory-dir",
            "/tmp/mem",
            "tool",
            "get_memory",
            r#"{"id":"x"}"#,
        ])
        .unwrap();
        assert_eq!(cli.memory_dir, Some(PathBuf::from("/tmp/mem")));
        match cli.command {
            Some(Commands::Tool { name, args }) => {
                assert_eq!(name, "get_memory");
                assert_eq!(args.as_deref(), Some(r#"{"id":"x"}"#));
            }
            _ => panic!("expected tool subcommand"),
        }
    }

    #[test]
    fn test_verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
