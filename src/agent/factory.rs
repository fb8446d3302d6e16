// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Agent kinds and construction
//!
//! Kinds differ only in their system prompt. Every agent gets its model from
//! the channel selector, using the configured agent model and the `"model"`
//! LLM type.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::channel::{MappingParams, LLM_TYPE_MODEL, PARAM_TYPE};
use crate::chat::dispatch::ChatDispatcher;
use crate::config::settings::AgentConfig;
use crate::error::{Result, TxingError};
use crate::tools::{ShowMsgRegistry, ToolExecutor, ToolRegistry};

use super::runner::ToolCallAgent;

pub const GENERAL_AGENT: &str = "general";
pub const TOOLCALL_AGENT: &str = "toolcall";

/// A named agent flavour
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentKind {
    pub name: String,
    pub description: String,
    pub system_prompt: String,
}

impl AgentKind {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            system_prompt: system_prompt.into(),
        }
    }
}

fn builtin_kinds() -> Vec<AgentKind> {
    vec![
        AgentKind::new(
            GENERAL_AGENT,
            "A general-purpose AI agent",
            "You are a helpful AI assistant. Use your capabilities to assist the user.",
        ),
        AgentKind::new(
            TOOLCALL_AGENT,
            "An agent that solves problems with tools",
            "You are a helpful AI assistant that can use tools to solve problems.",
        ),
    ]
}

/// Builds agents by kind name
pub struct AgentFactory {
    dispatcher: Arc<ChatDispatcher>,
    executor: ToolExecutor,
    show_msgs: Arc<ShowMsgRegistry>,
    kinds: HashMap<String, AgentKind>,
    config: AgentConfig,
    agent_model: String,
}

impl AgentFactory {
    pub fn new(
        dispatcher: Arc<ChatDispatcher>,
        tools: Arc<ToolRegistry>,
        config: AgentConfig,
        agent_model: impl Into<String>,
    ) -> Self {
        let kinds = builtin_kinds()
            .into_iter()
            .map(|kind| (kind.name.clone(), kind))
            .collect();
        Self {
            dispatcher,
            executor: ToolExecutor::new(tools),
            show_msgs: Arc::new(ShowMsgRegistry::with_builtins()),
            kinds,
            config,
            agent_model: agent_model.into(),
        }
    }

    pub fn with_show_msgs(mut self, show_msgs: ShowMsgRegistry) -> Self {
        self.show_msgs = Arc::new(show_msgs);
        self
    }

    /// Add or replace a kind
    pub fn register(&mut self, kind: AgentKind) {
        self.kinds.insert(kind.name.clone(), kind);
    }

    pub fn kind(&self, name: &str) -> Option<&AgentKind> {
        self.kinds.get(name)
    }

    /// Registered kind names, sorted
    pub fn kinds(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.kinds.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build an agent of `kind`, or of the configured default kind.
    pub fn create(&self, kind: Option<&str>) -> Result<ToolCallAgent> {
        let name = kind.unwrap_or(self.config.default_kind.as_str());
        let kind = self
            .kinds
            .get(name)
            .ok_or_else(|| TxingError::InvalidInput(format!("unknown agent type: {}", name)))?;

        let mut params = MappingParams::new();
        params.insert(PARAM_TYPE.to_string(), Value::from(LLM_TYPE_MODEL));
        let (selection, model) = self.dispatcher.tool_model(&self.agent_model, &params)?;

        tracing::info!(
            target: "txing.agent",
            kind = %kind.name,
            channel_id = selection.channel.id,
            model = %selection.target_model,
            "agent created"
        );

        Ok(ToolCallAgent::new(model, selection.target_model, self.executor.clone())
            .with_system_prompt(kind.system_prompt.clone())
            .with_max_steps(self.config.max_steps)
            .with_max_tokens(Some(self.config.max_tokens))
            .with_show_msgs(self.show_msgs.clone()))
    }
}

impl std::fmt::Debug for AgentFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentFactory")
            .field("kinds", &self.kinds())
            .field("agent_model", &self.agent_model)
            .finish()
    }
}
