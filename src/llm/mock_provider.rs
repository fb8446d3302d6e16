// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Scripted adapters for tests
//!
//! [`MockRequester`] and [`MockToolModel`] replay fixed scripts instead of
//! calling a provider. [`MockFactory`] hands them out for a channel type and
//! [`CollectingHook`] records what reaches the caller.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::channel::ChannelConfig;
use crate::error::{ApiError, Result, TxingError};
use crate::llm::chat_config::ChatConfig;
use crate::llm::chunk::{Chunk, Hook};
use crate::llm::message::{AgentMessage, ToolCall};
use crate::llm::provider::{
    ChatRequester, ChatRequesterFactory, ModelTurnRequest, ToolCallingModel,
};

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> MutexGuard<'a, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            tracing::warn!(what, "mock lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

/// A failure a script can produce
#[derive(Debug, Clone, PartialEq)]
pub enum MockFailure {
    /// Non-success HTTP status
    Server { status: u16, message: String },
    RateLimited,
    AuthenticationFailed,
    /// Broken stream after it started
    Stream(String),
}

impl MockFailure {
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        MockFailure::Server {
            status,
            message: message.into(),
        }
    }

    pub fn to_error(&self) -> TxingError {
        let api = match self {
            MockFailure::Server { status, message } => ApiError::ServerError {
                status: *status,
                message: message.clone(),
            },
            MockFailure::RateLimited => ApiError::RateLimited(0),
            MockFailure::AuthenticationFailed => ApiError::AuthenticationFailed,
            MockFailure::Stream(message) => ApiError::StreamError(message.clone()),
        };
        TxingError::Api(api)
    }
}

/// One step of a requester script
#[derive(Debug, Clone)]
pub enum MockStep {
    Chunk(Chunk),
    Delay(Duration),
    Fail(MockFailure),
    /// Panic inside the adapter
    Panic(String),
    /// Park until the turn is cancelled
    WaitForCancel,
}

impl MockStep {
    pub fn content(text: impl Into<String>) -> Self {
        MockStep::Chunk(Chunk::content(text))
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        MockStep::Chunk(Chunk::reasoning(text))
    }
}

async fn run_step(step: &MockStep, cancel: &CancellationToken, hook: &dyn Hook) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(TxingError::Cancelled);
    }
    match step {
        MockStep::Chunk(chunk) => hook.on_chunk(chunk.clone()).await,
        MockStep::Delay(delay) => {
            tokio::select! {
                _ = cancel.cancelled() => Err(TxingError::Cancelled),
                _ = tokio::time::sleep(*delay) => Ok(()),
            }
        }
        MockStep::Fail(failure) => Err(failure.to_error()),
        MockStep::Panic(message) => panic!("{}", message),
        MockStep::WaitForCancel => {
            cancel.cancelled().await;
            Err(TxingError::Cancelled)
        }
    }
}

/// Chat requester that replays one script per call.
///
/// Call `n` runs script `n`; once the scripts run out the last one repeats.
#[derive(Clone, Default)]
pub struct MockRequester {
    scripts: Vec<Vec<MockStep>>,
    calls: Arc<AtomicUsize>,
    recorded: Arc<Mutex<Vec<ChatConfig>>>,
}

impl MockRequester {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stream each string as a content chunk, then end cleanly.
    pub fn replying<I, S>(pieces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new().then(pieces.into_iter().map(MockStep::content).collect())
    }

    /// Append the script for the next call.
    pub fn then(mut self, steps: Vec<MockStep>) -> Self {
        self.scripts.push(steps);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Configs received so far, in call order
    pub fn recorded_configs(&self) -> Vec<ChatConfig> {
        lock(&self.recorded, "recorded configs").clone()
    }
}

#[async_trait]
impl ChatRequester for MockRequester {
    async fn stream_chat(
        &self,
        cancel: &CancellationToken,
        config: &ChatConfig,
        hook: &dyn Hook,
    ) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.recorded, "recorded configs").push(config.clone());

        let Some(script) = self.scripts.get(call).or_else(|| self.scripts.last()) else {
            return Ok(());
        };
        for step in script {
            run_step(step, cancel, hook).await?;
        }
        Ok(())
    }
}

/// One scripted model step
#[derive(Debug, Clone)]
pub enum MockTurn {
    /// Stream `chunks`, then return `message`
    Reply {
        chunks: Vec<Chunk>,
        message: AgentMessage,
    },
    Fail(MockFailure),
    WaitForCancel,
}

impl MockTurn {
    /// A final text answer, streamed as one chunk
    pub fn text(text: impl Into<String>) -> Self {
        let text = text.into();
        MockTurn::Reply {
            chunks: vec![Chunk::content(text.clone())],
            message: AgentMessage::assistant(text, Vec::new()),
        }
    }

    /// An assistant message asking for tools
    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        MockTurn::Reply {
            chunks: Vec::new(),
            message: AgentMessage::assistant("", calls),
        }
    }
}

/// Tool-calling model that replays one turn per call.
///
/// Like [`MockRequester`], the last turn repeats once the script runs out.
#[derive(Clone, Default)]
pub struct MockToolModel {
    turns: Vec<MockTurn>,
    calls: Arc<AtomicUsize>,
    recorded: Arc<Mutex<Vec<ModelTurnRequest>>>,
}

impl MockToolModel {
    pub fn new(turns: Vec<MockTurn>) -> Self {
        Self {
            turns,
            ..Default::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn recorded_requests(&self) -> Vec<ModelTurnRequest> {
        lock(&self.recorded, "recorded requests").clone()
    }
}

#[async_trait]
impl ToolCallingModel for MockToolModel {
    async fn stream_turn(
        &self,
        cancel: &CancellationToken,
        request: &ModelTurnRequest,
        hook: &dyn Hook,
    ) -> Result<AgentMessage> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.recorded, "recorded requests").push(request.clone());

        let turn = self
            .turns
            .get(call)
            .or_else(|| self.turns.last())
            .cloned()
            .unwrap_or_else(|| MockTurn::text(""));

        match turn {
            MockTurn::Reply { chunks, message } => {
                for chunk in chunks {
                    if cancel.is_cancelled() {
                        return Err(TxingError::Cancelled);
                    }
                    hook.on_chunk(chunk).await?;
                }
                Ok(message)
            }
            MockTurn::Fail(failure) => Err(failure.to_error()),
            MockTurn::WaitForCancel => {
                cancel.cancelled().await;
                Err(TxingError::Cancelled)
            }
        }
    }
}

/// Factory serving fixed mock adapters for one channel type
pub struct MockFactory {
    channel_type: String,
    requester: Option<Arc<MockRequester>>,
    model: Option<Arc<MockToolModel>>,
    created: AtomicUsize,
}

impl MockFactory {
    pub fn new(channel_type: impl Into<String>) -> Self {
        Self {
            channel_type: channel_type.into(),
            requester: None,
            model: None,
            created: AtomicUsize::new(0),
        }
    }

    pub fn with_requester(mut self, requester: MockRequester) -> Self {
        self.requester = Some(Arc::new(requester));
        self
    }

    pub fn with_model(mut self, model: MockToolModel) -> Self {
        self.model = Some(Arc::new(model));
        self
    }

    /// How many adapters were handed out
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl ChatRequesterFactory for MockFactory {
    fn channel_type(&self) -> &str {
        &self.channel_type
    }

    fn create_chat_requester(&self, channel: &dyn ChannelConfig) -> Result<Arc<dyn ChatRequester>> {
        channel.random_secret()?;
        self.created.fetch_add(1, Ordering::SeqCst);
        let requester: Arc<dyn ChatRequester> = match &self.requester {
            Some(requester) => requester.clone(),
            None => Arc::new(MockRequester::new()),
        };
        Ok(requester)
    }

    fn create_tool_model(&self, channel: &dyn ChannelConfig) -> Result<Arc<dyn ToolCallingModel>> {
        let model = self.model.clone().ok_or_else(|| {
            TxingError::Config(format!(
                "channel type {} (channel #{}) does not support tool calling",
                self.channel_type,
                channel.id()
            ))
        })?;
        self.created.fetch_add(1, Ordering::SeqCst);
        let model: Arc<dyn ToolCallingModel> = model;
        Ok(model)
    }
}

/// Hook that records every chunk, optionally failing after a few.
#[derive(Debug, Default)]
pub struct CollectingHook {
    chunks: Mutex<Vec<Chunk>>,
    fail_after: Option<usize>,
}

impl CollectingHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `n` chunks, then reject the rest with a delivery error.
    pub fn failing_after(n: usize) -> Self {
        Self {
            chunks: Mutex::new(Vec::new()),
            fail_after: Some(n),
        }
    }

    pub fn chunks(&self) -> Vec<Chunk> {
        lock(&self.chunks, "collected chunks").clone()
    }

    /// Concatenated content of every collected chunk
    pub fn content(&self) -> String {
        self.chunks().iter().map(|c| c.content.as_str()).collect()
    }

    pub fn reasoning(&self) -> String {
        self.chunks()
            .iter()
            .map(|c| c.reasoning_content.as_str())
            .collect()
    }
}

#[async_trait]
impl Hook for CollectingHook {
    async fn on_chunk(&self, chunk: Chunk) -> Result<()> {
        let mut chunks = lock(&self.chunks, "collected chunks");
        if self.fail_after.is_some_and(|limit| chunks.len() >= limit) {
            return Err(TxingError::Delivery("client went away".to_string()));
        }
        chunks.push(chunk);
        Ok(())
    }
}
