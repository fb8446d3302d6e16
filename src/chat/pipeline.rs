// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Per-turn streaming pipeline
//!
//! The provider call runs on its own task and pushes chunks into a bounded
//! relay; the calling task drains the relay, accumulates a
//! [`ChatRespBuffer`] and forwards each chunk to the client as it arrives.
//! The producer finishes by sending [`RelayMessage::End`] with its result.
//! A panicking producer never sends it; the consumer then finds the panic on
//! the join handle.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentRun, ToolCallAgent};
use crate::chat::buffer::ChatRespBuffer;
use crate::chat::connection::MessageSink;
use crate::chat::dispatch::ChatDispatcher;
use crate::chat::wire::WsMessageResponse;
use crate::config::GatewayConfig;
use crate::error::{Result, TxingError};
use crate::llm::chat_config::ChatConfig;
use crate::llm::chunk::{Chunk, Hook};

/// Sent when a turn finishes without producing any text
pub const DEFAULT_RESP_MESSAGE: &str = "Sorry, I don't understand your message.";

/// Sent when a turn fails; the cause is only logged
pub const GENERIC_FAILURE_MESSAGE: &str = "Sorry, something went wrong. Please try again later.";

/// Item on the relay between producer and consumer
#[derive(Debug)]
pub enum RelayMessage {
    Chunk(Chunk),
    End(Result<()>),
}

/// Hook that forwards chunks onto the relay.
///
/// Blocks while the relay is full. Fails once the consumer has gone away,
/// which aborts the producer.
#[derive(Debug, Clone)]
pub struct RelayHook {
    tx: mpsc::Sender<RelayMessage>,
}

#[async_trait]
impl Hook for RelayHook {
    async fn on_chunk(&self, chunk: Chunk) -> Result<()> {
        self.tx
            .send(RelayMessage::Chunk(chunk))
            .await
            .map_err(|_| TxingError::Delivery("relay closed".to_string()))
    }
}

/// Pipeline knobs
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub relay_capacity: usize,
    pub fallback_message: String,
    pub failure_message: String,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            relay_capacity: 20,
            fallback_message: DEFAULT_RESP_MESSAGE.to_string(),
            failure_message: GENERIC_FAILURE_MESSAGE.to_string(),
        }
    }
}

impl From<&GatewayConfig> for PipelineOptions {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            relay_capacity: config.relay_capacity,
            fallback_message: config.fallback_message.clone(),
            failure_message: config.failure_message.clone(),
        }
    }
}

/// How a turn ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    Completed,
    Cancelled,
    Failed,
    /// The client stopped accepting messages mid-turn
    ClientGone,
}

/// What a turn produced, for persistence
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub status: TurnStatus,
    pub content: String,
    pub reasoning_content: String,
    pub chunks: usize,
}

impl TurnOutcome {
    /// Whether the reply should be stored with the conversation
    pub fn should_persist(&self) -> bool {
        match self.status {
            TurnStatus::Completed => true,
            TurnStatus::Cancelled | TurnStatus::ClientGone => {
                !self.content.is_empty() || !self.reasoning_content.is_empty()
            }
            TurnStatus::Failed => false,
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

async fn reap<T>(handle: JoinHandle<T>) -> Result<T> {
    match handle.await {
        Ok(value) => Ok(value),
        Err(err) if err.is_panic() => {
            let message = panic_message(err.into_panic());
            tracing::error!(target: "txing.chat.pipeline", %message, "producer panicked");
            Err(TxingError::Panicked(message))
        }
        Err(_) => Err(TxingError::Cancelled),
    }
}

/// Run one turn: spawn `produce`, relay its chunks to `sink`, and finish
/// with exactly one terminal message.
///
/// `produce` receives the turn's cancellation token and the relay hook.
/// Cancelling `cancel` from outside (a client "stop") ends the turn with a
/// bare terminal message; a producer failure ends it with the generic
/// failure text.
pub async fn stream_turn<F, Fut>(
    options: &PipelineOptions,
    conversation_id: i64,
    cancel: CancellationToken,
    sink: &dyn MessageSink,
    produce: F,
) -> TurnOutcome
where
    F: FnOnce(CancellationToken, RelayHook) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel(options.relay_capacity.max(1));
    let hook = RelayHook { tx: tx.clone() };
    let producer_cancel = cancel.clone();

    let handle = tokio::spawn(async move {
        let result = produce(producer_cancel, hook).await;
        // the consumer may already be gone
        let _ = tx.send(RelayMessage::End(result)).await;
    });

    let mut buffer = ChatRespBuffer::new();
    let result = loop {
        match rx.recv().await {
            Some(RelayMessage::Chunk(chunk)) => {
                buffer.write_chunk(&chunk);
                let update = WsMessageResponse::from_chunk(conversation_id, &chunk);
                if let Err(err) = sink.send(update).await {
                    tracing::warn!(
                        target: "txing.chat.pipeline",
                        conversation_id,
                        error = %err,
                        "client send failed, abandoning turn"
                    );
                    cancel.cancel();
                    drop(rx);
                    if let Err(err) = reap(handle).await {
                        tracing::debug!(target: "txing.chat.pipeline", error = %err, "producer ended after client left");
                    }
                    let (content, reasoning_content) = (buffer.content().to_string(), buffer.reasoning_content().to_string());
                    return TurnOutcome {
                        status: TurnStatus::ClientGone,
                        chunks: buffer.count(),
                        content,
                        reasoning_content,
                    };
                }
            }
            Some(RelayMessage::End(result)) => {
                let joined = reap(handle).await;
                break result.and(joined);
            }
            None => {
                break match reap(handle).await {
                    Ok(()) => Err(TxingError::Delivery("producer ended without a result".to_string())),
                    Err(err) => Err(err),
                };
            }
        }
    };

    let (status, terminal) = match result {
        Ok(()) if buffer.is_empty() => {
            tracing::debug!(target: "txing.chat.pipeline", conversation_id, "empty reply, sending fallback");
            (
                TurnStatus::Completed,
                WsMessageResponse::terminal_with(conversation_id, options.fallback_message.clone()),
            )
        }
        Ok(()) => (TurnStatus::Completed, WsMessageResponse::terminal(conversation_id)),
        Err(err) if err.is_cancellation() => {
            tracing::info!(target: "txing.chat.pipeline", conversation_id, chunks = buffer.count(), "turn cancelled");
            (TurnStatus::Cancelled, WsMessageResponse::terminal(conversation_id))
        }
        Err(err) => {
            tracing::error!(
                target: "txing.chat.pipeline",
                conversation_id,
                chunks = buffer.count(),
                error = %err,
                "turn failed"
            );
            (
                TurnStatus::Failed,
                WsMessageResponse::terminal_with(conversation_id, options.failure_message.clone()),
            )
        }
    };

    if let Err(err) = sink.send(terminal).await {
        tracing::debug!(target: "txing.chat.pipeline", error = %err, "terminal message not delivered");
    }

    tracing::debug!(
        target: "txing.chat.pipeline",
        conversation_id,
        ?status,
        chunks = buffer.count(),
        elapsed_ms = buffer.elapsed().num_milliseconds(),
        "turn finished"
    );

    let chunks = buffer.count();
    let (content, reasoning_content) = buffer.into_parts();
    TurnOutcome {
        status,
        content,
        reasoning_content,
        chunks,
    }
}

/// Stream a plain chat turn for `config` to `sink`.
pub async fn handle_chat(
    dispatcher: Arc<ChatDispatcher>,
    options: &PipelineOptions,
    conversation_id: i64,
    config: ChatConfig,
    cancel: CancellationToken,
    sink: &dyn MessageSink,
) -> TurnOutcome {
    stream_turn(options, conversation_id, cancel, sink, move |cancel, hook| async move {
        dispatcher.new_chat_request(&cancel, &config, &hook).await
    })
    .await
}

/// Run `agent` on its own task and relay its chunks to `hook` in order.
///
/// A panic inside the run comes back as [`TxingError::Panicked`]. A hook
/// failure cancels the run and is returned as-is.
pub async fn stream_agent(
    agent: ToolCallAgent,
    input: String,
    cancel: CancellationToken,
    relay_capacity: usize,
    hook: &dyn Hook,
) -> Result<AgentRun> {
    let (tx, mut rx) = mpsc::channel(relay_capacity.max(1));
    let relay = RelayHook { tx };
    let producer_cancel = cancel.clone();

    let handle = tokio::spawn(async move { agent.run(&producer_cancel, &input, &relay).await });

    // the relay closes when the run returns or unwinds
    while let Some(message) = rx.recv().await {
        let RelayMessage::Chunk(chunk) = message else {
            continue;
        };
        if let Err(err) = hook.on_chunk(chunk).await {
            tracing::warn!(target: "txing.chat.pipeline", error = %err, "agent output not delivered, cancelling run");
            cancel.cancel();
            drop(rx);
            if let Err(reaped) = reap(handle).await {
                tracing::debug!(target: "txing.chat.pipeline", error = %reaped, "agent run ended after delivery failure");
            }
            return Err(err);
        }
    }

    reap(handle).await?
}
