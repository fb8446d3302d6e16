// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! CLI argument definitions using Clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// txing - streaming LLM chat gateway
#[derive(Parser, Debug)]
#[command(name = "txing")]
#[command(version, about = "Streaming LLM chat gateway with a tool-calling agent")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Settings file path (defaults to ~/.txing/settings.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Channel catalog path, overriding the settings
    #[arg(long, global = true)]
    pub channels: Option<PathBuf>,

    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one chat turn and stream JSON lines to stdout
    Chat(ChatArgs),

    /// Serve a connection over JSONL stdin/stdout
    ServeStdio(ServeStdioArgs),

    /// Run the tool-calling agent and print SSE frames
    Agent(AgentArgs),

    /// List channels and the model each one resolves to
    Channels(ChannelsArgs),
}

/// Arguments for the chat subcommand
#[derive(clap::Args, Debug, Default)]
pub struct ChatArgs {
    /// Message to send
    pub text: String,

    /// Logical model (defaults to the gateway default model)
    #[arg(short, long)]
    pub model: Option<String>,

    /// Request web search
    #[arg(long)]
    pub web: bool,
}

/// Arguments for the serve-stdio subcommand
#[derive(clap::Args, Debug, Default)]
pub struct ServeStdioArgs {
    /// Signed-in user id (anonymous when omitted)
    #[arg(long)]
    pub user: Option<i64>,

    /// Conversation to continue (-1 starts a new one)
    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    pub conversation: i64,
}

/// Arguments for the agent subcommand
#[derive(clap::Args, Debug, Default)]
pub struct AgentArgs {
    /// Task for the agent
    pub text: String,

    /// Agent kind (defaults to the configured kind)
    #[arg(short, long)]
    pub kind: Option<String>,
}

/// Arguments for the channels subcommand
#[derive(clap::Args, Debug, Default)]
pub struct ChannelsArgs {
    /// Resolve targets as if web search were requested
    #[arg(long)]
    pub web: bool,

    /// Resolve targets for the "app" LLM type
    #[arg(long)]
    pub app: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    // ==================== CLI Global Arguments ====================

    #[test]
    fn test_cli_verbose_multiple() {
        let cli = Cli::parse_from(["txing", "-vv", "channels"]);
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_cli_config_global() {
        let cli = Cli::parse_from(["txing", "channels", "--config", "/tmp/s.json"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/s.json")));
    }

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["txing"]).is_err());
    }

    // ==================== Subcommands ====================

    #[test]
    fn test_chat_args() {
        let cli = Cli::parse_from(["txing", "chat", "hello there", "--model", "deepseek-v3", "--web"]);
        match cli.command {
            Commands::Chat(args) => {
                assert_eq!(args.text, "hello there");
                assert_eq!(args.model.as_deref(), Some("deepseek-v3"));
                assert!(args.web);
            }
            other => panic!("expected chat, got {:?}", other),
        }
    }

    #[test]
    fn test_serve_stdio_defaults() {
        let cli = Cli::parse_from(["txing", "serve-stdio"]);
        match cli.command {
            Commands::ServeStdio(args) => {
                assert!(args.user.is_none());
                assert_eq!(args.conversation, -1);
            }
            other => panic!("expected serve-stdio, got {:?}", other),
        }
    }

    #[test]
    fn test_serve_stdio_user() {
        let cli = Cli::parse_from(["txing", "serve-stdio", "--user", "42", "--conversation", "7"]);
        match cli.command {
            Commands::ServeStdio(args) => {
                assert_eq!(args.user, Some(42));
                assert_eq!(args.conversation, 7);
            }
            other => panic!("expected serve-stdio, got {:?}", other),
        }
    }

    #[test]
    fn test_agent_args() {
        let cli = Cli::parse_from(["txing", "agent", "plan a trip", "--kind", "toolcall"]);
        match cli.command {
            Commands::Agent(args) => {
                assert_eq!(args.text, "plan a trip");
                assert_eq!(args.kind.as_deref(), Some("toolcall"));
            }
            other => panic!("expected agent, got {:?}", other),
        }
    }
}
