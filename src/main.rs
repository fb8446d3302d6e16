// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! txing - streaming LLM chat gateway
//!
//! Entry point for the txing CLI.

use clap::Parser;

use txing::cli::{Cli, Commands, Runtime};
use txing::config::Settings;

#[path = "main/cli_commands.rs"]
mod cli_commands;

use cli_commands::{run_agent, run_channels, run_chat, run_serve_stdio};

/// Build the log filter. `RUST_LOG` wins, then `-v`, then the settings level.
fn env_filter(verbose: u8, default_level: &str) -> tracing_subscriber::EnvFilter {
    if std::env::var_os("RUST_LOG").is_some() {
        return tracing_subscriber::EnvFilter::from_default_env();
    }

    let mut filter = tracing_subscriber::EnvFilter::try_new(default_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    let level = if verbose > 1 { "trace" } else { "debug" };
    if verbose > 0 {
        for target in ["txing.chat", "txing.channel", "txing.agent", "txing.llm", "txing.embedded", "txing.cli"] {
            if let Ok(parsed) = format!("{}={}", target, level).parse() {
                filter = filter.add_directive(parsed);
            }
        }
    }
    filter
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };

    // stdout carries JSONL/SSE, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(cli.verbose, &settings.logging.level))
        .with_writer(std::io::stderr)
        .init();

    let mut settings = settings;
    if let Some(channels) = cli.channels.clone() {
        settings.channels_file = Some(channels);
    }
    let runtime = Runtime::from_settings(settings)?;

    match cli.command {
        Commands::Chat(args) => run_chat(&runtime, args).await?,
        Commands::ServeStdio(args) => run_serve_stdio(&runtime, args).await?,
        Commands::Agent(args) => run_agent(&runtime, args).await?,
        Commands::Channels(args) => run_channels(&runtime, args)?,
    }

    Ok(())
}
