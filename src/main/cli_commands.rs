// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use txing::chat::conversation::{Conversation, ANONYMOUS_USER_ID, NEW_CONVERSATION_ID};
use txing::chat::pipeline::{handle_chat, stream_agent, TurnStatus};
use txing::chat::wire::WsMessageRequest;
use txing::chat::MessageSink;
use txing::cli::{AgentArgs, ChannelsArgs, ChatArgs, Runtime, ServeStdioArgs};
use txing::embedded::{self, JsonLSink, SseHook};

/// Cancel `cancel` on Ctrl-C
fn cancel_on_ctrl_c(cancel: &CancellationToken) {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!(target: "txing.cli", "interrupted, stopping");
            cancel.cancel();
        }
    });
}

pub async fn run_chat(runtime: &Runtime, args: ChatArgs) -> anyhow::Result<()> {
    let model = args
        .model
        .unwrap_or_else(|| runtime.settings.gateway.default_model.clone());
    let request = WsMessageRequest::chat(args.text)
        .with_model(model.clone())
        .with_enable_web(args.web);

    let mut conversation = Conversation::new(NEW_CONVERSATION_ID, ANONYMOUS_USER_ID, model);
    conversation
        .handle_message(&request)
        .context("cannot send an empty message")?;

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(&cancel);

    let sink = JsonLSink::new(tokio::io::stdout());
    let outcome = handle_chat(
        Arc::clone(&runtime.dispatcher),
        &runtime.pipeline_options(),
        conversation.id,
        conversation.chat_config(),
        cancel,
        &sink,
    )
    .await;

    match outcome.status {
        TurnStatus::Completed | TurnStatus::Cancelled => Ok(()),
        TurnStatus::Failed => anyhow::bail!("chat turn failed, see log for details"),
        TurnStatus::ClientGone => anyhow::bail!("stdout closed before the reply finished"),
    }
}

pub async fn run_serve_stdio(runtime: &Runtime, args: ServeStdioArgs) -> anyhow::Result<()> {
    let (source, sink) = embedded::stdio();
    let mut connection = runtime.connection();
    if let Some(user_id) = args.user {
        connection = connection.for_user(user_id, args.conversation);
    }

    let sink: Arc<dyn MessageSink> = Arc::new(sink);
    connection.serve(source, sink).await?;
    Ok(())
}

pub async fn run_agent(runtime: &Runtime, args: AgentArgs) -> anyhow::Result<()> {
    let agent = runtime
        .agent_factory()
        .create(args.kind.as_deref())
        .context("failed to create agent")?;

    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(&cancel);

    let hook = SseHook::new(tokio::io::stdout());
    let result = stream_agent(
        agent,
        args.text,
        cancel,
        runtime.settings.gateway.relay_capacity,
        &hook,
    )
    .await;
    hook.finish(&result, &runtime.settings.gateway.failure_message).await?;

    if let Ok(run) = &result {
        if run.step_limit_reached {
            tracing::warn!(target: "txing.cli", steps = run.steps, "agent stopped at its step limit");
        }
    }
    Ok(())
}

pub fn run_channels(runtime: &Runtime, args: ChannelsArgs) -> anyhow::Result<()> {
    let rows = runtime.channel_rows(args.web, args.app)?;
    if rows.is_empty() {
        println!("No channels configured.");
        return Ok(());
    }

    println!("{:<6} {:<14} {:<16} {:<8} {:<24} TARGET", "ID", "TYPE", "NAME", "ENABLED", "MODEL");
    for row in rows {
        println!(
            "{:<6} {:<14} {:<16} {:<8} {:<24} {}",
            row.channel_id,
            row.channel_type,
            row.name,
            if row.enabled { "yes" } else { "no" },
            row.model,
            row.target.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}
