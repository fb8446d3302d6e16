// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Wiring shared by every subcommand
//!
//! Builds the channel store, adapter registry, dispatcher and stores from
//! [`Settings`] once at startup and hands them out by reference.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;

use crate::agent::AgentFactory;
use crate::channel::{
    Channel, ChannelCatalog, ChannelConfig, ChannelSelector, ChannelStore, InMemoryChannelStore,
    MappingParams, LLM_TYPE_APP, LLM_TYPE_MODEL, PARAM_ENABLE_WEB, PARAM_TYPE,
};
use crate::chat::connection::Connection;
use crate::chat::conversation::InMemoryConversationStore;
use crate::chat::dispatch::ChatDispatcher;
use crate::chat::pipeline::PipelineOptions;
use crate::config::Settings;
use crate::error::Result;
use crate::llm::factory::AdapterRegistry;
use crate::llm::retry::RetryConfig;
use crate::tools::ToolRegistry;

/// Long-lived services for one process
pub struct Runtime {
    pub settings: Settings,
    pub channels: Arc<InMemoryChannelStore>,
    pub dispatcher: Arc<ChatDispatcher>,
    pub conversations: Arc<InMemoryConversationStore>,
    pub tools: Arc<ToolRegistry>,
}

/// One line of the `channels` listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRow {
    pub channel_id: i64,
    pub channel_type: String,
    pub name: String,
    pub enabled: bool,
    pub model: String,
    /// `None` when the channel's mapping rejects the request context
    pub target: Option<String>,
}

impl Runtime {
    /// Build from settings with the default adapters. A missing channel
    /// catalog leaves the store empty.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let path = settings.channels_path();
        let channels = load_channels(&path)?;
        let registry = AdapterRegistry::with_defaults(&settings.http);
        Ok(Self::with_registry(settings, channels, registry))
    }

    pub fn with_registry(settings: Settings, channels: Vec<Channel>, registry: AdapterRegistry) -> Self {
        let store = Arc::new(InMemoryChannelStore::new(channels));
        let selector_store: Arc<dyn ChannelStore> = store.clone();
        let dispatcher = ChatDispatcher::new(
            ChannelSelector::new(selector_store),
            Arc::new(registry),
            RetryConfig::from(&settings.resilience),
        );
        let conversations = Arc::new(InMemoryConversationStore::new(settings.gateway.default_model.clone()));

        Self {
            settings,
            channels: store,
            dispatcher: Arc::new(dispatcher),
            conversations,
            tools: Arc::new(ToolRegistry::new()),
        }
    }

    /// Replace the tool registry handed to agents
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Arc::new(tools);
        self
    }

    pub fn pipeline_options(&self) -> PipelineOptions {
        PipelineOptions::from(&self.settings.gateway)
    }

    pub fn connection(&self) -> Connection {
        Connection::new(
            Arc::clone(&self.dispatcher),
            self.conversations.clone(),
            &self.settings.gateway,
        )
    }

    pub fn agent_factory(&self) -> AgentFactory {
        AgentFactory::new(
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.tools),
            self.settings.agent.clone(),
            self.settings.gateway.agent_model.clone(),
        )
    }

    /// Every (channel, model) pair with its resolved target under the given
    /// request context.
    pub fn channel_rows(&self, enable_web: bool, app: bool) -> Result<Vec<ChannelRow>> {
        let mut params = MappingParams::new();
        params.insert(PARAM_ENABLE_WEB.to_string(), Value::Bool(enable_web));
        let llm_type = if app { LLM_TYPE_APP } else { LLM_TYPE_MODEL };
        params.insert(PARAM_TYPE.to_string(), Value::from(llm_type));

        let mut rows = Vec::new();
        for channel in self.channels.all_channels()? {
            for model in &channel.models {
                rows.push(ChannelRow {
                    channel_id: channel.id,
                    channel_type: channel.channel_type.clone(),
                    name: channel.name.clone(),
                    enabled: channel.status,
                    model: model.clone(),
                    target: channel.mapping_model(model, &params),
                });
            }
        }
        Ok(rows)
    }
}

fn load_channels(path: &Path) -> Result<Vec<Channel>> {
    if !path.exists() {
        tracing::warn!(target: "txing.cli", path = %path.display(), "channel catalog not found, no channels configured");
        return Ok(Vec::new());
    }
    let catalog = ChannelCatalog::load_from(path)?;
    tracing::info!(target: "txing.cli", path = %path.display(), channels = catalog.channels.len(), "loaded channel catalog");
    Ok(catalog.channels)
}
