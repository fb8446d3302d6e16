// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Adapter traits
//!
//! Every upstream provider is reached through a [`ChatRequester`]. Providers
//! that understand function calling also implement [`ToolCallingModel`],
//! which the agent drives. A [`ChatRequesterFactory`] builds both from a
//! channel.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::channel::ChannelConfig;
use crate::error::{Result, TxingError};
use crate::llm::chat_config::ChatConfig;
use crate::llm::chunk::Hook;
use crate::llm::message::AgentMessage;

/// Streams one chat turn from a provider.
#[async_trait]
pub trait ChatRequester: Send + Sync {
    /// Stream the reply to `config` through `hook`.
    ///
    /// Returns `Ok(())` on a clean end of stream. Returns
    /// [`TxingError::Cancelled`] promptly once `cancel` fires, and propagates
    /// the hook's error unchanged when the hook rejects a chunk.
    async fn stream_chat(
        &self,
        cancel: &CancellationToken,
        config: &ChatConfig,
        hook: &dyn Hook,
    ) -> Result<()>;
}

/// Definition of a tool offered to the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    /// Tool name
    pub name: String,

    /// Tool description
    pub description: String,

    /// Input schema (JSON Schema object)
    pub parameters: serde_json::Value,
}

/// One model call made by the agent
#[derive(Debug, Clone)]
pub struct ModelTurnRequest {
    pub model: String,
    pub messages: Vec<AgentMessage>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: Option<u32>,
}

/// A chat model that can ask for tools.
#[async_trait]
pub trait ToolCallingModel: Send + Sync {
    /// Run one model step. Content and reasoning deltas go to `hook` as they
    /// arrive; the assembled assistant message (with any tool calls) is
    /// returned.
    async fn stream_turn(
        &self,
        cancel: &CancellationToken,
        request: &ModelTurnRequest,
        hook: &dyn Hook,
    ) -> Result<AgentMessage>;
}

/// Builds requesters for one channel type.
pub trait ChatRequesterFactory: Send + Sync {
    /// Channel-type key this factory serves (e.g. "polo")
    fn channel_type(&self) -> &str;

    /// Return the requester for one of the channel's credentials, creating
    /// and caching it on first use.
    fn create_chat_requester(&self, channel: &dyn ChannelConfig) -> Result<Arc<dyn ChatRequester>>;

    /// Same as [`create_chat_requester`](Self::create_chat_requester) for
    /// the tool-calling surface. Channel types without function calling keep
    /// the default.
    fn create_tool_model(&self, channel: &dyn ChannelConfig) -> Result<Arc<dyn ToolCallingModel>> {
        Err(TxingError::Config(format!(
            "channel type {} (channel #{}) does not support tool calling",
            self.channel_type(),
            channel.id()
        )))
    }
}
