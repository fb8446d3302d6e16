// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! OpenAI-compatible chat completions client
//!
//! Every supported channel type speaks the `/chat/completions` SSE dialect
//! with small differences in authorization, forwarded sampling parameters and
//! tolerance for broken frames. Those differences live in a [`Dialect`]; the
//! HTTP and streaming logic is shared.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::channel::ChannelConfig;
use crate::config::HttpConfig;
use crate::error::{ApiError, Result, TxingError};
use crate::llm::chat_config::ChatConfig;
use crate::llm::chunk::{Chunk, Hook};
use crate::llm::factory::RequesterCache;
use crate::llm::message::{AgentMessage, ToolCall};
use crate::llm::provider::{
    ChatRequester, ChatRequesterFactory, ModelTurnRequest, ToolCallingModel, ToolDefinition,
};

use super::common::{deliver, next_payload, parse_error, parse_retry_after_seconds, sse_frames};

const CHAT_COMPLETIONS_PATH: &str = "/chat/completions";

/// How the API key is presented
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `Authorization: sk-<key>`
    SkPrefix,
}

impl AuthScheme {
    fn header_value(self, key: &str) -> String {
        match self {
            AuthScheme::Bearer => format!("Bearer {}", key),
            AuthScheme::SkPrefix => format!("sk-{}", key),
        }
    }
}

/// Which sampling parameters reach the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamPolicy {
    /// Every parameter the request carries
    All,
    /// Everything except `top_k`
    AllButTopK,
    /// max_tokens, temperature, top_p, presence and frequency penalties
    Core,
}

/// Per-channel-type behavior of the shared client
#[derive(Debug)]
pub struct Dialect {
    /// Channel type served
    pub channel_type: &'static str,
    /// Used when the channel has no endpoint
    pub default_base_url: Option<&'static str>,
    pub auth: AuthScheme,
    pub params: ParamPolicy,
    /// Send `Accept: application/json`
    pub accept_json: bool,
    /// Buffer unparseable payloads and retry them joined with the next line
    pub lenient_frames: bool,
}

/// Build the chat completions URL for an endpoint.
///
/// The path is appended unless the endpoint already ends with it.
pub fn chat_completions_url(endpoint: &str, default_base: Option<&str>) -> Result<String> {
    let trimmed = endpoint.trim();
    let base = if trimmed.is_empty() {
        default_base.ok_or_else(|| TxingError::Config("channel has no endpoint".to_string()))?
    } else {
        trimmed
    };
    let base = base.trim_end_matches('/');

    if base.ends_with(CHAT_COMPLETIONS_PATH) {
        Ok(base.to_string())
    } else {
        Ok(format!("{}{}", base, CHAT_COMPLETIONS_PATH))
    }
}

/// Streaming client for one endpoint and credential
pub struct CompatClient {
    client: reqwest::Client,
    url: String,
    api_key: String,
    dialect: &'static Dialect,
}

impl std::fmt::Debug for CompatClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompatClient")
            .field("url", &self.url)
            .field("dialect", &self.dialect.channel_type)
            .finish_non_exhaustive()
    }
}

impl CompatClient {
    pub fn new(
        dialect: &'static Dialect,
        endpoint: &str,
        api_key: impl Into<String>,
        http: &HttpConfig,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(http.request_timeout_secs))
            .connect_timeout(Duration::from_secs(http.connect_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url: chat_completions_url(endpoint, dialect.default_base_url)?,
            api_key: api_key.into(),
            dialect,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn chat_body<'a>(&self, config: &'a ChatConfig) -> CompatRequest<'a> {
        let mut body = CompatRequest {
            model: &config.model,
            messages: config
                .messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.as_str(),
                    content: m.content.clone(),
                    tool_calls: None,
                    tool_call_id: None,
                })
                .collect(),
            stream: true,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
            top_k: None,
            presence_penalty: config.presence_penalty,
            frequency_penalty: config.frequency_penalty,
            repetition_penalty: None,
            tools: Vec::new(),
        };

        match self.dialect.params {
            ParamPolicy::All => {
                body.top_k = config.top_k;
                body.repetition_penalty = config.repetition_penalty;
            }
            ParamPolicy::AllButTopK => {
                body.repetition_penalty = config.repetition_penalty;
            }
            ParamPolicy::Core => {}
        }

        body
    }

    fn turn_body<'a>(&self, request: &'a ModelTurnRequest) -> CompatRequest<'a> {
        CompatRequest {
            model: &request.model,
            messages: request.messages.iter().map(WireMessage::from_agent).collect(),
            stream: true,
            max_tokens: request.max_tokens,
            temperature: None,
            top_p: None,
            top_k: None,
            presence_penalty: None,
            frequency_penalty: None,
            repetition_penalty: None,
            tools: request.tools.iter().map(WireTool::from_definition).collect(),
        }
    }

    async fn open(&self, cancel: &CancellationToken, body: &CompatRequest<'_>) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, self.dialect.auth.header_value(&self.api_key))
            .json(body);
        if self.dialect.accept_json {
            request = request.header(ACCEPT, "application/json");
        }

        tracing::debug!(
            target: "txing.llm.compat",
            channel_type = self.dialect.channel_type,
            url = %self.url,
            model = body.model,
            messages = body.messages.len(),
            tools = body.tools.len(),
            "sending chat completion request"
        );

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TxingError::Cancelled),
            sent = request.send() => sent?,
        };

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let retry_after = parse_retry_after_seconds(response.headers());
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(
                target: "txing.llm.compat",
                channel_type = self.dialect.channel_type,
                status,
                "provider returned an error status"
            );
            return Err(parse_error(status, retry_after, &body));
        }

        Ok(response)
    }
}

fn decode_chunk(value: serde_json::Value) -> Result<StreamChunk> {
    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(TxingError::Api(ApiError::StreamError(message)));
    }
    serde_json::from_value(value)
        .map_err(|e| TxingError::Api(ApiError::StreamError(format!("unexpected frame shape: {}", e))))
}

#[async_trait]
impl ChatRequester for CompatClient {
    async fn stream_chat(
        &self,
        cancel: &CancellationToken,
        config: &ChatConfig,
        hook: &dyn Hook,
    ) -> Result<()> {
        let body = self.chat_body(config);
        let response = self.open(cancel, &body).await?;

        let frames = sse_frames(response, self.dialect.lenient_frames);
        tokio::pin!(frames);

        while let Some(payload) = next_payload(cancel, &mut frames).await? {
            let chunk = decode_chunk(payload)?;
            for choice in chunk.choices {
                if let Some(out) = Chunk::from_delta(choice.delta.content, choice.delta.reasoning_content) {
                    deliver(cancel, hook, out).await?;
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, Default)]
struct PendingToolCall {
    index: Option<usize>,
    id: String,
    name: String,
    arguments: String,
}

/// Collects streamed tool-call fragments into whole calls.
///
/// A fragment joins the call with the same `index`, or failing that the same
/// `id`. A fragment carrying neither continues the most recent call.
#[derive(Debug, Default)]
struct ToolCallAssembler {
    calls: Vec<PendingToolCall>,
}

impl ToolCallAssembler {
    fn slot(&mut self, index: Option<usize>, id: Option<&str>) -> &mut PendingToolCall {
        let found = match (index, id) {
            (Some(index), _) => self.calls.iter().position(|c| c.index == Some(index)),
            (None, Some(id)) => self.calls.iter().position(|c| c.id == id),
            (None, None) => self.calls.len().checked_sub(1),
        };
        let at = match found {
            Some(at) => at,
            None => {
                self.calls.push(PendingToolCall {
                    index,
                    ..Default::default()
                });
                self.calls.len() - 1
            }
        };
        &mut self.calls[at]
    }

    fn push(&mut self, fragment: StreamToolCall) {
        let id = fragment.id.filter(|id| !id.is_empty());
        let slot = self.slot(fragment.index, id.as_deref());
        if let Some(id) = id {
            slot.id = id;
        }
        if let Some(function) = fragment.function {
            if let Some(name) = function.name.filter(|n| !n.is_empty()) {
                slot.name = name;
            }
            if let Some(args) = function.arguments {
                slot.arguments.push_str(&args);
            }
        }
    }

    /// Calls ordered by index, falling back to arrival order
    fn finish(self) -> Vec<ToolCall> {
        let mut calls: Vec<(usize, PendingToolCall)> = self
            .calls
            .into_iter()
            .enumerate()
            .map(|(position, call)| (call.index.unwrap_or(position), call))
            .collect();
        calls.sort_by_key(|(order, _)| *order);
        calls
            .into_iter()
            .map(|(order, call)| {
                let id = if call.id.is_empty() {
                    format!("call_{}", order)
                } else {
                    call.id
                };
                ToolCall::new(id, call.name, call.arguments)
            })
            .collect()
    }
}

#[async_trait]
impl ToolCallingModel for CompatClient {
    async fn stream_turn(
        &self,
        cancel: &CancellationToken,
        request: &ModelTurnRequest,
        hook: &dyn Hook,
    ) -> Result<AgentMessage> {
        let body = self.turn_body(request);
        let response = self.open(cancel, &body).await?;

        let frames = sse_frames(response, self.dialect.lenient_frames);
        tokio::pin!(frames);

        let mut content = String::new();
        let mut reasoning = String::new();
        let mut tool_calls = ToolCallAssembler::default();

        while let Some(payload) = next_payload(cancel, &mut frames).await? {
            let chunk = decode_chunk(payload)?;
            for choice in chunk.choices {
                let delta = choice.delta;

                for fragment in delta.tool_calls.unwrap_or_default() {
                    tool_calls.push(fragment);
                }

                if let Some(text) = &delta.content {
                    content.push_str(text);
                }
                if let Some(text) = &delta.reasoning_content {
                    reasoning.push_str(text);
                }
                if let Some(out) = Chunk::from_delta(delta.content, delta.reasoning_content) {
                    deliver(cancel, hook, out).await?;
                }
            }
        }

        let mut message = AgentMessage::assistant(content, tool_calls.finish());
        message.reasoning_content = reasoning;
        Ok(message)
    }
}

/// Factory for every channel of one OpenAI-compatible type.
///
/// Clients are cached per endpoint and credential, so repeated requests on a
/// channel reuse one connection pool.
pub struct CompatFactory {
    dialect: &'static Dialect,
    http: HttpConfig,
    cache: RequesterCache<CompatClient>,
}

impl CompatFactory {
    pub fn new(dialect: &'static Dialect, http: HttpConfig) -> Self {
        Self {
            dialect,
            http,
            cache: RequesterCache::new(),
        }
    }

    /// Number of distinct clients built so far
    pub fn cached_clients(&self) -> usize {
        self.cache.len()
    }

    fn client_for(&self, channel: &dyn ChannelConfig) -> Result<Arc<CompatClient>> {
        let secret = channel.random_secret()?;
        let key = format!("{}\n{}", channel.endpoint(), secret);
        self.cache.get_or_try_insert_with(&key, || {
            tracing::debug!(
                target: "txing.llm.compat",
                channel_id = channel.id(),
                channel_type = self.dialect.channel_type,
                "building client for channel credential"
            );
            CompatClient::new(self.dialect, channel.endpoint(), secret.clone(), &self.http).map(Arc::new)
        })
    }
}

impl ChatRequesterFactory for CompatFactory {
    fn channel_type(&self) -> &str {
        self.dialect.channel_type
    }

    fn create_chat_requester(&self, channel: &dyn ChannelConfig) -> Result<Arc<dyn ChatRequester>> {
        let client: Arc<dyn ChatRequester> = self.client_for(channel)?;
        Ok(client)
    }

    fn create_tool_model(&self, channel: &dyn ChannelConfig) -> Result<Arc<dyn ToolCallingModel>> {
        let client: Arc<dyn ToolCallingModel> = self.client_for(channel)?;
        Ok(client)
    }
}

// Wire types

#[derive(Debug, Serialize)]
struct CompatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    repetition_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl WireMessage {
    fn from_agent(msg: &AgentMessage) -> Self {
        let tool_calls = msg.has_tool_calls().then(|| {
            msg.tool_calls
                .iter()
                .map(|call| WireToolCall {
                    id: call.id.clone(),
                    r#type: "function",
                    function: WireFunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.clone(),
                    },
                })
                .collect()
        });

        Self {
            role: msg.role.as_str(),
            content: msg.content.clone(),
            tool_calls,
            tool_call_id: msg.tool_call_id.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    r#type: &'static str,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    r#type: &'static str,
    function: WireFunction,
}

impl WireTool {
    fn from_definition(def: &ToolDefinition) -> Self {
        Self {
            r#type: "function",
            function: WireFunction {
                name: def.name.clone(),
                description: def.description.clone(),
                parameters: def.parameters.clone(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    index: Option<usize>,
    id: Option<String>,
    function: Option<StreamFunction>,
}

#[derive(Debug, Deserialize)]
struct StreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}
