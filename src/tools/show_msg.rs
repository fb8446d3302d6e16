// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! Human-readable summaries of tool activity
//!
//! Each known tool can turn its raw arguments and raw result into a short
//! line for the client. Tools without a builder produce an empty summary and
//! the agent falls back to a generic one.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::{Result, TxingError};

pub const WEB_SEARCH_TOOL: &str = "web_search_tool";
pub const MARKDOWN_TO_PDF_FILE_TOOL: &str = "markdown_to_pdf_file_tool";

/// Builds summaries for one tool
pub trait ShowMsgBuilder: Send + Sync {
    fn build_request(&self, params: &str) -> Result<String>;
    fn build_response(&self, response: &str) -> Result<String>;
}

/// Builders keyed by tool name
#[derive(Clone, Default)]
pub struct ShowMsgRegistry {
    builders: HashMap<String, Arc<dyn ShowMsgBuilder>>,
}

impl ShowMsgRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the web search and PDF export builders
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(WEB_SEARCH_TOOL, Arc::new(WebSearchShowMsg));
        registry.register(MARKDOWN_TO_PDF_FILE_TOOL, Arc::new(MarkdownPdfShowMsg));
        registry
    }

    pub fn register(&mut self, tool_name: impl Into<String>, builder: Arc<dyn ShowMsgBuilder>) {
        self.builders.insert(tool_name.into(), builder);
    }

    pub fn contains(&self, tool_name: &str) -> bool {
        self.builders.contains_key(tool_name)
    }

    /// Summary of a call. Unknown tools give an empty string.
    pub fn request_msg(&self, tool_name: &str, params: &str) -> Result<String> {
        match self.builders.get(tool_name) {
            Some(builder) => builder.build_request(params),
            None => Ok(String::new()),
        }
    }

    /// Summary of a result. Unknown tools give an empty string.
    pub fn response_msg(&self, tool_name: &str, response: &str) -> Result<String> {
        match self.builders.get(tool_name) {
            Some(builder) => builder.build_response(response),
            None => Ok(String::new()),
        }
    }
}

impl std::fmt::Debug for ShowMsgRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.builders.keys().collect();
        names.sort();
        f.debug_struct("ShowMsgRegistry").field("builders", &names).finish()
    }
}

fn string_field(params: &str, field: &str) -> Result<String> {
    let value: Value = serde_json::from_str(params)
        .map_err(|e| TxingError::InvalidInput(format!("tool params are not JSON: {}", e)))?;
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| TxingError::InvalidInput(format!("tool params have no \"{}\" string", field)))
}

/// `web_search_tool`
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSearchShowMsg;

impl WebSearchShowMsg {
    /// Number of result pages in a raw search response
    fn count_results(response: &str) -> Result<usize> {
        let trimmed = response.trim();
        if trimmed.is_empty() || trimmed.to_lowercase().contains("no results") {
            return Ok(0);
        }

        let parsed = serde_json::from_str::<Value>(trimmed).or_else(|_| {
            // Several objects separated by commas
            serde_json::from_str::<Value>(&format!("[{}]", trimmed))
        });

        match parsed {
            Ok(Value::Array(items)) => Ok(items.len()),
            Ok(Value::Object(_)) => Ok(1),
            Ok(other) => Err(TxingError::InvalidInput(format!(
                "unexpected search response: {}",
                other
            ))),
            Err(e) => Err(TxingError::InvalidInput(format!(
                "search response is not JSON: {}",
                e
            ))),
        }
    }
}

impl ShowMsgBuilder for WebSearchShowMsg {
    fn build_request(&self, params: &str) -> Result<String> {
        Ok(format!("Web search: {}", string_field(params, "query")?))
    }

    fn build_response(&self, response: &str) -> Result<String> {
        Ok(format!("Found {} related pages", Self::count_results(response)?))
    }
}

/// `markdown_to_pdf_file_tool`
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownPdfShowMsg;

impl ShowMsgBuilder for MarkdownPdfShowMsg {
    fn build_request(&self, params: &str) -> Result<String> {
        Ok(format!("Save as PDF: {}", string_field(params, "filename")?))
    }

    fn build_response(&self, response: &str) -> Result<String> {
        Ok(response.to_string())
    }
}
