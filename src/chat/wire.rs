// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Client-facing message shapes
//!
//! Field names follow the client protocol exactly, which mixes camelCase
//! (`conversationId`, `enableWeb`) with snake_case (`reasoning_content`,
//! sampling parameters).

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::llm::chunk::Chunk;

pub const MESSAGE_TYPE_CHAT: &str = "chat";
pub const MESSAGE_TYPE_STOP: &str = "stop";
pub const MESSAGE_TYPE_PING: &str = "ping";

/// What an inbound message asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Chat,
    Stop,
    Ping,
    Unknown,
}

/// Inbound client message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WsMessageRequest {
    #[serde(rename = "type", default)]
    pub message_type: String,

    #[serde(default)]
    pub content: String,

    #[serde(default)]
    pub model: String,

    #[serde(rename = "enableWeb", default)]
    pub enable_web: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f32>,
}

impl WsMessageRequest {
    pub fn chat(content: impl Into<String>) -> Self {
        Self {
            message_type: MESSAGE_TYPE_CHAT.to_string(),
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn stop() -> Self {
        Self {
            message_type: MESSAGE_TYPE_STOP.to_string(),
            ..Default::default()
        }
    }

    pub fn ping() -> Self {
        Self {
            message_type: MESSAGE_TYPE_PING.to_string(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_enable_web(mut self, enable_web: bool) -> Self {
        self.enable_web = enable_web;
        self
    }

    pub fn kind(&self) -> MessageKind {
        match self.message_type.as_str() {
            MESSAGE_TYPE_CHAT => MessageKind::Chat,
            MESSAGE_TYPE_STOP => MessageKind::Stop,
            MESSAGE_TYPE_PING => MessageKind::Ping,
            _ => MessageKind::Unknown,
        }
    }
}

/// Outbound message, one per chunk plus a terminal one
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WsMessageResponse {
    #[serde(rename = "conversationId", default)]
    pub conversation_id: i64,

    #[serde(default)]
    pub content: String,

    #[serde(default)]
    pub reasoning_content: String,

    #[serde(default)]
    pub end: bool,

    #[serde(rename = "toolCallId", default, skip_serializing_if = "String::is_empty")]
    pub tool_call_id: String,

    #[serde(rename = "toolName", default, skip_serializing_if = "String::is_empty")]
    pub tool_name: String,

    #[serde(rename = "toolParams", default, skip_serializing_if = "String::is_empty")]
    pub tool_params: String,

    #[serde(rename = "toolResult", default, skip_serializing_if = "String::is_empty")]
    pub tool_result: String,

    #[serde(rename = "showMsg", default, skip_serializing_if = "String::is_empty")]
    pub show_msg: String,
}

impl WsMessageResponse {
    /// Partial update carrying one chunk
    pub fn from_chunk(conversation_id: i64, chunk: &Chunk) -> Self {
        Self {
            conversation_id,
            content: chunk.content.clone(),
            reasoning_content: chunk.reasoning_content.clone(),
            end: false,
            tool_call_id: chunk.tool_call_id.clone(),
            tool_name: chunk.tool_name.clone(),
            tool_params: chunk.tool_params.clone(),
            tool_result: chunk.tool_result.clone(),
            show_msg: chunk.show_msg.clone(),
        }
    }

    /// Final message with text, e.g. the fallback or failure string
    pub fn terminal_with(conversation_id: i64, content: impl Into<String>) -> Self {
        Self {
            conversation_id,
            content: content.into(),
            end: true,
            ..Default::default()
        }
    }

    /// Bare `end: true` marker
    pub fn terminal(conversation_id: i64) -> Self {
        Self {
            conversation_id,
            end: true,
            ..Default::default()
        }
    }
}

/// One frame of agent output in SSE form
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStreamEvent {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reasoning_content: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tool_call_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tool_params: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub tool_result: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub show_msg: String,
    #[serde(default)]
    pub end: bool,
}

impl From<&Chunk> for AgentStreamEvent {
    fn from(chunk: &Chunk) -> Self {
        Self {
            content: chunk.content.clone(),
            reasoning_content: chunk.reasoning_content.clone(),
            tool_call_id: chunk.tool_call_id.clone(),
            tool_name: chunk.tool_name.clone(),
            tool_params: chunk.tool_params.clone(),
            tool_result: chunk.tool_result.clone(),
            show_msg: chunk.show_msg.clone(),
            end: false,
        }
    }
}

impl AgentStreamEvent {
    pub fn end() -> Self {
        Self {
            end: true,
            ..Default::default()
        }
    }

    /// `data: <json>\n\n`
    pub fn to_sse(&self) -> Result<String> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }

    /// Terminal frame reporting a failure
    pub fn error_frame(message: &str) -> String {
        let body = serde_json::json!({ "error": message, "end": true });
        format!("data: {}\n\n", body)
    }
}
