// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Settings management for txing
//!
//! Handles loading and saving settings from ~/.txing/settings.json

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

mod io;

/// Main settings structure, stored in ~/.txing/settings.json
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Chat gateway behaviour
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Retry and resilience settings for upstream calls
    #[serde(default)]
    pub resilience: ResilienceConfig,

    /// HTTP client settings shared by every adapter
    #[serde(default)]
    pub http: HttpConfig,

    /// Tool-calling agent settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Channel catalog (JSON, YAML or TOML)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels_file: Option<PathBuf>,

    /// Logging defaults (RUST_LOG still wins)
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// What to do with a chat message that arrives while a turn is running
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConcurrentTurnPolicy {
    /// Hold it in the inbound queue until the running turn ends
    #[default]
    Queue,
    /// Answer it immediately with a terminal "busy" message
    Reject,
}

/// Gateway-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Model used by new conversations
    #[serde(default = "default_conversation_model")]
    pub default_model: String,

    /// Logical model the agent asks the selector for
    #[serde(default = "default_agent_model")]
    pub agent_model: String,

    /// Inbound per-connection queue size (oldest dropped on overflow)
    #[serde(default = "default_inbound_queue_capacity")]
    pub inbound_queue_capacity: usize,

    /// Relay channel size between producer and consumer of a turn
    #[serde(default = "default_relay_capacity")]
    pub relay_capacity: usize,

    /// Sent when a turn finishes without any content
    #[serde(default = "default_fallback_message")]
    pub fallback_message: String,

    /// Sent when a turn fails
    #[serde(default = "default_failure_message")]
    pub failure_message: String,

    #[serde(default)]
    pub concurrent_turn_policy: ConcurrentTurnPolicy,
}

fn default_conversation_model() -> String {
    "deepseek-v3-250324".to_string()
}

fn default_agent_model() -> String {
    "deepseek-v3".to_string()
}

fn default_inbound_queue_capacity() -> usize {
    10
}

fn default_relay_capacity() -> usize {
    20
}

fn default_fallback_message() -> String {
    crate::chat::pipeline::DEFAULT_RESP_MESSAGE.to_string()
}

fn default_failure_message() -> String {
    crate::chat::pipeline::GENERIC_FAILURE_MESSAGE.to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            default_model: default_conversation_model(),
            agent_model: default_agent_model(),
            inbound_queue_capacity: default_inbound_queue_capacity(),
            relay_capacity: default_relay_capacity(),
            fallback_message: default_fallback_message(),
            failure_message: default_failure_message(),
            concurrent_turn_policy: ConcurrentTurnPolicy::default(),
        }
    }
}

/// Configuration for retry and resilience
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Maximum number of retry attempts (a channel's `retry` overrides it)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay in milliseconds for exponential backoff
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds (cap for backoff)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Jitter percentage (0.0 to 1.0) for randomizing delays
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    16000
}

fn default_jitter() -> f64 {
    0.25
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: default_jitter(),
        }
    }
}

/// HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    120
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Tool-calling agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Hard ceiling on state-machine steps per run
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// max_tokens sent with every model call
    #[serde(default = "default_agent_max_tokens")]
    pub max_tokens: u32,

    /// Agent kind used when a request does not name one
    #[serde(default = "default_agent_kind")]
    pub default_kind: String,
}

fn default_max_steps() -> usize {
    500
}

fn default_agent_max_tokens() -> u32 {
    8192
}

fn default_agent_kind() -> String {
    "general".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_tokens: default_agent_max_tokens(),
            default_kind: default_agent_kind(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level directive when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}
