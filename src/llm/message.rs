// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Message types for LLM interactions
//!
//! [`Message`] is the plain role/content entry carried by a chat turn and
//! persisted with a conversation. [`AgentMessage`] extends it with the
//! tool-call bookkeeping the agent loop needs.

use serde::{Deserialize, Serialize};

/// Role of the message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System prompt
    System,
    /// User message
    User,
    /// Assistant response
    Assistant,
    /// Tool result fed back to the model
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Role of the message sender
    pub role: Role,

    /// Text content
    #[serde(default)]
    pub content: String,

    /// Model "thinking" text, kept for assistant messages
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reasoning_content: String,

    /// Optional participant name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            reasoning_content: String::new(),
            name: None,
        }
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// Attach reasoning text
    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning_content = reasoning.into();
        self
    }
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON argument string exactly as the model produced it
    #[serde(default)]
    pub arguments: String,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Check the arguments. Empty is accepted, anything else must be a JSON object.
    pub fn validate_arguments(&self) -> std::result::Result<(), String> {
        if self.arguments.is_empty() {
            return Ok(());
        }
        serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&self.arguments)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}

/// An entry of the agent's message history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentMessage {
    pub role: Role,

    #[serde(default)]
    pub content: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reasoning_content: String,

    /// Calls requested by an assistant message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// Set on tool messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Set on tool messages
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl AgentMessage {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            reasoning_content: String::new(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::plain(Role::Assistant, content);
        msg.tool_calls = tool_calls;
        msg
    }

    /// A tool result. `tool_call_id` may be empty when the result does not
    /// answer a specific call.
    pub fn tool(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let mut msg = Self::plain(Role::Tool, content);
        let id = tool_call_id.into();
        let name = tool_name.into();
        msg.tool_call_id = (!id.is_empty()).then_some(id);
        msg.tool_name = (!name.is_empty()).then_some(name);
        msg
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

impl From<&Message> for AgentMessage {
    fn from(msg: &Message) -> Self {
        let mut converted = AgentMessage::plain(msg.role, msg.content.clone());
        converted.reasoning_content = msg.reasoning_content.clone();
        converted
    }
}
