// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Routes a chat turn to a channel and streams it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::channel::{ChannelConfig, ChannelSelector, MappingParams, Selection};
use crate::error::{Result, TxingError};
use crate::llm::chat_config::ChatConfig;
use crate::llm::chunk::{Chunk, Hook};
use crate::llm::factory::AdapterRegistry;
use crate::llm::provider::ToolCallingModel;
use crate::llm::retry::{is_retryable, with_retry_if, RetryConfig};

/// Passes chunks through and remembers that one got out.
struct DeliveryTracker<'a> {
    inner: &'a dyn Hook,
    delivered: &'a AtomicBool,
}

#[async_trait]
impl Hook for DeliveryTracker<'_> {
    async fn on_chunk(&self, chunk: Chunk) -> Result<()> {
        self.delivered.store(true, Ordering::SeqCst);
        self.inner.on_chunk(chunk).await
    }
}

/// Selects a channel per request and drives its adapter.
#[derive(Clone)]
pub struct ChatDispatcher {
    selector: ChannelSelector,
    registry: Arc<AdapterRegistry>,
    retry: RetryConfig,
}

impl ChatDispatcher {
    pub fn new(selector: ChannelSelector, registry: Arc<AdapterRegistry>, retry: RetryConfig) -> Self {
        Self {
            selector,
            registry,
            retry,
        }
    }

    pub fn selector(&self) -> &ChannelSelector {
        &self.selector
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    /// Stream one chat turn for `config` through `hook`.
    ///
    /// The channel is chosen for `config.model` and the request is sent with
    /// the channel's target model. Failed attempts are retried up to the
    /// channel's `retry` count, but only while nothing has reached `hook`.
    pub async fn new_chat_request(
        &self,
        cancel: &CancellationToken,
        config: &ChatConfig,
        hook: &dyn Hook,
    ) -> Result<()> {
        let params = config.mapping_params();
        let selection = self.selector.choose_channel_and_model(&config.model, &params)?;
        let requester = self.registry.create_chat_requester(&selection.channel)?;
        let routed = config.clone().with_model(selection.target_model.clone());

        tracing::info!(
            target: "txing.chat.dispatch",
            model = %config.model,
            channel_id = selection.channel.id(),
            target_model = %selection.target_model,
            "dispatching chat request"
        );

        let delivered = AtomicBool::new(false);
        let tracker = DeliveryTracker {
            inner: hook,
            delivered: &delivered,
        };
        let retry = self.retry.clone().with_max_retries(selection.channel.retry());

        let attempts = with_retry_if(
            || requester.stream_chat(cancel, &routed, &tracker),
            Some(retry),
            "stream_chat",
            |err| !delivered.load(Ordering::SeqCst) && is_retryable(err),
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TxingError::Cancelled),
            result = attempts => result,
        }
    }

    /// Pick a channel for a tool-calling turn and build its model.
    pub fn tool_model(
        &self,
        model: &str,
        params: &MappingParams,
    ) -> Result<(Selection, Arc<dyn ToolCallingModel>)> {
        let selection = self.selector.choose_channel_and_model(model, params)?;
        let tool_model = self.registry.create_tool_model(&selection.channel)?;
        Ok((selection, tool_model))
    }
}
