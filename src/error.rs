// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Error types for txing
//!
//! Every fallible operation in the gateway returns [`TxingError`]. Provider
//! failures are grouped under [`ApiError`] so the retry layer can classify
//! them without looking at message text.

use thiserror::Error;

/// Main error type for gateway operations
#[derive(Error, Debug)]
pub enum TxingError {
    /// Upstream provider errors
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// No enabled channel can serve the requested model
    #[error("no channel found for model {0}")]
    NoChannelForModel(String),

    /// A channel names a type that has no registered factory
    #[error("unknown channel type {channel_type} (channel #{channel_id})")]
    UnknownChannelType {
        channel_type: String,
        channel_id: i64,
    },

    /// Tool execution errors
    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    /// Agent state machine errors
    #[error("Agent error: {0}")]
    Agent(String),

    /// The turn was stopped by the client
    #[error("operation cancelled")]
    Cancelled,

    /// The hook could not hand a chunk to the client
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// A background producer panicked
    #[error("producer panicked: {0}")]
    Panicked(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(String),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(String),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl TxingError {
    /// True when the error only reports that the client asked to stop.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TxingError::Cancelled)
    }
}

/// API-specific error types
#[derive(Error, Debug)]
pub enum ApiError {
    /// Authentication failed (invalid API key)
    #[error("Authentication failed: invalid API key")]
    AuthenticationFailed,

    /// Rate limited by the API
    #[error("Rate limited: retry after {0} seconds")]
    RateLimited(u32),

    /// Requested model not found
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Context window exceeded
    #[error("Context too long: {current} tokens exceeds limit of {limit}")]
    ContextTooLong { current: u32, limit: u32 },

    /// Network connectivity error
    #[error("Network error: {0}")]
    Network(String),

    /// Invalid response from API
    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    /// API returned an error
    #[error("API error ({status}): {message}")]
    ServerError { status: u16, message: String },

    /// Timeout waiting for response
    #[error("Request timed out")]
    Timeout,

    /// Streaming error
    #[error("Streaming error: {0}")]
    StreamError(String),
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, TxingError>;

impl From<toml::de::Error> for TxingError {
    fn from(err: toml::de::Error) -> Self {
        TxingError::Toml(err.to_string())
    }
}

impl From<serde_yaml::Error> for TxingError {
    fn from(err: serde_yaml::Error) -> Self {
        TxingError::Yaml(err.to_string())
    }
}
