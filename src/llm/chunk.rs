// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Streamed output fragments and the hook that carries them upward.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One normalized unit of streamed output.
///
/// Plain chat uses `content` and `reasoning_content`; the tool-calling agent
/// also fills the tool fields. Empty strings mean "not set".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub reasoning_content: String,
    #[serde(default)]
    pub tool_call_id: String,
    #[serde(default)]
    pub tool_name: String,
    /// Raw JSON arguments of a tool call
    #[serde(default)]
    pub tool_params: String,
    #[serde(default)]
    pub tool_result: String,
    /// Human-readable summary of a tool call or result
    #[serde(default)]
    pub show_msg: String,
}

impl Chunk {
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: text.into(),
            ..Default::default()
        }
    }

    pub fn reasoning(text: impl Into<String>) -> Self {
        Self {
            reasoning_content: text.into(),
            ..Default::default()
        }
    }

    /// Build a chunk from a stream delta, or `None` when both parts are empty.
    pub fn from_delta(content: Option<String>, reasoning: Option<String>) -> Option<Self> {
        let content = content.unwrap_or_default();
        let reasoning_content = reasoning.unwrap_or_default();
        if content.is_empty() && reasoning_content.is_empty() {
            return None;
        }
        Some(Self {
            content,
            reasoning_content,
            ..Default::default()
        })
    }

    /// Announces a tool call before it runs
    pub fn tool_request(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        tool_params: impl Into<String>,
        show_msg: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            tool_params: tool_params.into(),
            show_msg: show_msg.into(),
            ..Default::default()
        }
    }

    /// Reports a tool result
    pub fn tool_response(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        tool_result: impl Into<String>,
        show_msg: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            tool_result: tool_result.into(),
            show_msg: show_msg.into(),
            ..Default::default()
        }
    }

    pub fn is_tool_event(&self) -> bool {
        !self.tool_call_id.is_empty() || !self.tool_name.is_empty()
    }
}

/// Receives chunks from an adapter or the agent.
///
/// Returning an error aborts the producing call; the producer must stop and
/// propagate that error instead of emitting anything further.
#[async_trait]
pub trait Hook: Send + Sync {
    async fn on_chunk(&self, chunk: Chunk) -> Result<()>;
}

/// Adapts a synchronous closure into a [`Hook`].
pub struct FnHook<F>(pub F);

#[async_trait]
impl<F> Hook for FnHook<F>
where
    F: Fn(Chunk) -> Result<()> + Send + Sync,
{
    async fn on_chunk(&self, chunk: Chunk) -> Result<()> {
        (self.0)(chunk)
    }
}

#[async_trait]
impl<H: Hook + ?Sized> Hook for std::sync::Arc<H> {
    async fn on_chunk(&self, chunk: Chunk) -> Result<()> {
        (**self).on_chunk(chunk).await
    }
}
